use std::collections::HashMap;

use crate::semantics::types::TypeDesc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Variable,
    Type,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub kind: BindingKind,
    pub ty: TypeDesc,
    pub is_final: bool,
    pub tracked: bool,
    /// Set when the binding is a `final int` with a compile-time-known
    /// value, which makes it usable in array size expressions.
    pub const_int: Option<i64>,
}

impl Binding {
    pub fn variable(ty: TypeDesc) -> Self {
        Self { kind: BindingKind::Variable, ty, is_final: false, tracked: false, const_int: None }
    }
}

#[derive(Debug)]
struct Scope {
    /// Function, method, constructor and destructor bodies (and the global
    /// scope) open a function root; shadowing is legal across roots only.
    function_root: bool,
    symbols: HashMap<String, Binding>,
    order: Vec<String>,
}

/// Stack of name→binding frames. Lookups walk outward; redeclaration is
/// rejected anywhere between the current scope and the nearest enclosing
/// function root.
#[derive(Debug, Default)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self { scopes: Vec::new() }
    }

    pub fn push_function_scope(&mut self) {
        self.scopes.push(Scope { function_root: true, symbols: HashMap::new(), order: Vec::new() });
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope { function_root: false, symbols: HashMap::new(), order: Vec::new() });
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Declares a name in the current scope. Fails when the name is already
    /// bound anywhere within the current function region.
    pub fn declare(&mut self, name: &str, binding: Binding) -> Result<(), String> {
        for scope in self.scopes.iter().rev() {
            if scope.symbols.contains_key(name) {
                return Err(format!("'{}' is already declared in this scope", name));
            }
            if scope.function_root {
                break;
            }
        }
        let scope = self.scopes.last_mut().expect("no open scope");
        scope.symbols.insert(name.to_string(), binding);
        scope.order.push(name.to_string());
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.symbols.get(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.scopes.iter_mut().rev().find_map(|scope| scope.symbols.get_mut(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scopes_may_not_shadow_within_a_function() {
        let mut table = SymbolTable::new();
        table.push_function_scope();
        table.declare("x", Binding::variable(TypeDesc::Int)).unwrap();
        table.push_scope();
        assert!(table.declare("x", Binding::variable(TypeDesc::Int)).is_err());
    }

    #[test]
    fn function_scopes_may_shadow_globals() {
        let mut table = SymbolTable::new();
        table.push_function_scope(); // global scope
        table.declare("x", Binding::variable(TypeDesc::Int)).unwrap();
        table.push_function_scope(); // a function body
        assert!(table.declare("x", Binding::variable(TypeDesc::Float)).is_ok());
        assert_eq!(table.lookup("x").unwrap().ty, TypeDesc::Float);
        table.pop_scope();
        assert_eq!(table.lookup("x").unwrap().ty, TypeDesc::Int);
    }

    #[test]
    fn lookup_walks_outward() {
        let mut table = SymbolTable::new();
        table.push_function_scope();
        table.declare("x", Binding::variable(TypeDesc::Int)).unwrap();
        table.push_scope();
        table.declare("y", Binding::variable(TypeDesc::Bit)).unwrap();
        assert!(table.lookup("x").is_some());
        table.pop_scope();
        assert!(table.lookup("y").is_none());
    }
}
