use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::*;
use crate::error::{BlochError, Result};
use crate::semantics::registry::{ClassInfo, ClassRegistry, OverloadChoice};
use crate::semantics::symbols::{Binding, BindingKind, SymbolTable};
use crate::semantics::types::TypeDesc;

/// Built-in gate signatures, pre-seeded into the flat function namespace.
pub const GATES: &[(&str, &[TypeDesc])] = &[
    ("h", &[TypeDesc::Qubit]),
    ("x", &[TypeDesc::Qubit]),
    ("y", &[TypeDesc::Qubit]),
    ("z", &[TypeDesc::Qubit]),
    ("rx", &[TypeDesc::Qubit, TypeDesc::Float]),
    ("ry", &[TypeDesc::Qubit, TypeDesc::Float]),
    ("rz", &[TypeDesc::Qubit, TypeDesc::Float]),
    ("cx", &[TypeDesc::Qubit, TypeDesc::Qubit]),
];

pub fn is_gate_name(name: &str) -> bool {
    GATES.iter().any(|(gate, _)| *gate == name)
}

#[derive(Debug, Clone)]
pub struct FunctionSig {
    pub name: String,
    pub params: Vec<TypeDesc>,
    pub param_names: Vec<String>,
    pub ret: TypeDesc,
    pub quantum: bool,
    pub shots: Option<u64>,
    pub span: Span,
}

/// Statically resolved method target for one call site.
#[derive(Debug, Clone)]
pub struct CallTarget {
    /// Declared (unspecialised) name of the class the resolution landed in.
    pub decl_class: String,
    pub sig: Vec<TypeDesc>,
    pub is_virtual: bool,
    pub is_static: bool,
}

/// Everything the evaluator needs beyond the AST itself.
pub struct Analysis {
    pub registry: Rc<ClassRegistry>,
    pub functions: HashMap<String, Rc<FunctionSig>>,
    pub call_targets: HashMap<NodeId, CallTarget>,
    pub ctor_targets: HashMap<NodeId, Vec<TypeDesc>>,
    /// Member/MethodCall nodes whose receiver is a class name, not a value.
    pub static_receivers: HashMap<NodeId, String>,
    pub shots: Option<u64>,
}

pub fn analyze(program: &Program) -> Result<Analysis> {
    let registry = Rc::new(ClassRegistry::build(program)?);
    let mut analyzer = Analyzer {
        program,
        registry: registry.clone(),
        functions: HashMap::new(),
        symbols: SymbolTable::new(),
        call_targets: HashMap::new(),
        ctor_targets: HashMap::new(),
        static_receivers: HashMap::new(),
        current_class: None,
        current_ctor: None,
        in_static_context: false,
        current_return: None,
        in_destructor: false,
    };
    analyzer.collect_functions()?;
    analyzer.check_program()?;
    let shots = analyzer.functions.get("main").and_then(|f| f.shots);
    Ok(Analysis {
        registry,
        functions: analyzer.functions,
        call_targets: analyzer.call_targets,
        ctor_targets: analyzer.ctor_targets,
        static_receivers: analyzer.static_receivers,
        shots,
    })
}

struct Analyzer<'p> {
    program: &'p Program,
    registry: Rc<ClassRegistry>,
    functions: HashMap<String, Rc<FunctionSig>>,
    symbols: SymbolTable,
    call_targets: HashMap<NodeId, CallTarget>,
    ctor_targets: HashMap<NodeId, Vec<TypeDesc>>,
    static_receivers: HashMap<NodeId, String>,
    current_class: Option<Rc<ClassInfo>>,
    /// Set while walking a constructor body: the class being constructed.
    current_ctor: Option<Rc<ClassInfo>>,
    in_static_context: bool,
    current_return: Option<TypeDesc>,
    in_destructor: bool,
}

impl<'p> Analyzer<'p> {
    // ---- pass 1: function signature map ----

    fn collect_functions(&mut self) -> Result<()> {
        for function in &self.program.functions {
            if is_gate_name(&function.name) {
                return Err(BlochError::semantic(
                    function.span,
                    format!("'{}' is a built-in gate and cannot be redeclared", function.name),
                ));
            }
            if self.functions.contains_key(&function.name) {
                return Err(BlochError::semantic(
                    function.span,
                    format!("duplicate top-level function '{}'", function.name),
                ));
            }

            let mut params = Vec::new();
            for param in &function.params {
                let ty = self.registry.resolve_type(&param.ty, &HashMap::new())?;
                if ty == TypeDesc::Void {
                    return Err(BlochError::semantic(
                        param.span,
                        format!("parameter '{}' cannot have type 'void'", param.name),
                    ));
                }
                params.push(ty);
            }
            let ret = self.registry.resolve_type(&function.return_type, &HashMap::new())?;

            if function.quantum {
                if function.name == "main" {
                    return Err(BlochError::semantic(
                        function.span,
                        "'@quantum' may not decorate 'main'",
                    ));
                }
                if !(ret == TypeDesc::Bit || ret == TypeDesc::Void || ret.is_bit_array()) {
                    return Err(BlochError::semantic(
                        function.span,
                        format!(
                            "'@quantum' function '{}' must return 'bit', 'bit[]' or 'void', not '{}'",
                            function.name, ret
                        ),
                    ));
                }
            }
            if let Some(shots) = function.shots {
                if function.name != "main" {
                    return Err(BlochError::semantic(
                        function.span,
                        "'@shots' is only valid on 'main'",
                    ));
                }
                if shots == 0 {
                    return Err(BlochError::semantic(
                        function.span,
                        "'@shots' requires a shot count greater than zero",
                    ));
                }
            }
            if function.name == "main" && !function.params.is_empty() {
                return Err(BlochError::semantic(function.span, "'main' takes no parameters"));
            }

            self.functions.insert(
                function.name.clone(),
                Rc::new(FunctionSig {
                    name: function.name.clone(),
                    params,
                    param_names: function.params.iter().map(|p| p.name.clone()).collect(),
                    ret,
                    quantum: function.quantum,
                    shots: function.shots,
                    span: function.span,
                }),
            );
        }
        Ok(())
    }

    // ---- pass 2: bodies ----

    fn check_program(&mut self) -> Result<()> {
        // Free statements share the global scope, visible to everything
        self.symbols.push_function_scope();
        let statements = &self.program.statements;
        for stmt in statements {
            self.check_stmt(stmt)?;
        }

        let functions: Vec<&FunctionDecl> = self.program.functions.iter().collect();
        for function in functions {
            let sig = self.functions[&function.name].clone();
            self.current_return = Some(sig.ret.clone());
            self.symbols.push_function_scope();
            for (name, ty) in sig.param_names.iter().zip(sig.params.iter()) {
                self.declare(name, Binding::variable(ty.clone()), function.span)?;
            }
            for stmt in &function.body {
                self.check_stmt(stmt)?;
            }
            self.symbols.pop_scope();
            self.current_return = None;
        }

        let classes: Vec<&ClassDecl> = self.program.classes.iter().collect();
        for class in classes {
            self.check_class(class)?;
        }
        Ok(())
    }

    fn check_class(&mut self, class: &ClassDecl) -> Result<()> {
        let info = self.registry.template_info(&class.name, class.span)?;
        self.current_class = Some(info.clone());

        // Field initialisers (instance and static) are checked in class scope
        for (field, ast_field) in field_infos_in_decl_order(&info, class) {
            // The registry folds literal field sizes when it builds the
            // descriptor; anything it could not fold is rejected here
            if let TypeKind::Array { size: Some(_), resolved_size, .. } = &ast_field.ty.kind {
                if resolved_size.get().is_none() && !matches!(field.ty, TypeDesc::Array { size: Some(_), .. }) {
                    return Err(BlochError::semantic(
                        ast_field.span,
                        format!(
                            "array size of field '{}' must be an integer literal",
                            field.name
                        ),
                    ));
                }
                if let TypeDesc::Array { size: Some(n), .. } = &field.ty {
                    resolved_size.set(Some(*n));
                }
            }
            if let Some(init) = &field.init {
                if field.ty == TypeDesc::Qubit || field.ty.is_qubit_array() {
                    return Err(BlochError::semantic(
                        field.span,
                        "qubit fields cannot have initialisers",
                    ));
                }
                self.in_static_context = field.is_static;
                self.symbols.push_function_scope();
                let ty = self.infer(init)?;
                self.symbols.pop_scope();
                self.in_static_context = false;
                if !self.registry.assignable(&ty, &field.ty) {
                    return Err(BlochError::semantic(
                        field.span,
                        format!("cannot initialise field '{}' of type '{}' with '{}'", field.name, field.ty, ty),
                    ));
                }
            }
        }

        for method in info.methods.clone() {
            let Some(body) = &method.body else { continue };
            self.in_static_context = method.is_static;
            self.current_return = Some(method.ret.clone());
            self.symbols.push_function_scope();
            for (name, ty) in method.param_names.iter().zip(method.params.iter()) {
                self.declare(name, Binding::variable(ty.clone()), method.span)?;
            }
            for stmt in body.iter() {
                self.check_stmt(stmt)?;
            }
            self.symbols.pop_scope();
            self.current_return = None;
            self.in_static_context = false;
        }

        for ctor in info.constructors.clone() {
            let Some(body) = &ctor.body else { continue };
            self.current_ctor = Some(info.clone());
            self.current_return = Some(info.desc());
            self.symbols.push_function_scope();
            for (name, ty) in ctor.param_names.iter().zip(ctor.params.iter()) {
                self.declare(name, Binding::variable(ty.clone()), ctor.span)?;
            }
            for (i, stmt) in body.iter().enumerate() {
                // `super(...)` is only legal as the first constructor statement
                if i > 0 {
                    if let StmtKind::Expr(e) = &stmt.kind {
                        if matches!(e.kind, ExprKind::SuperCall { method: None, .. }) {
                            return Err(BlochError::semantic(
                                stmt.span,
                                "'super(...)' must be the first statement of a constructor",
                            ));
                        }
                    }
                }
                self.check_stmt(stmt)?;
            }
            self.symbols.pop_scope();
            self.current_return = None;
            self.current_ctor = None;
        }

        if let Some(dtor) = &info.destructor {
            if let Some(body) = &dtor.body {
                self.in_destructor = true;
                self.current_return = Some(TypeDesc::Void);
                self.symbols.push_function_scope();
                for stmt in body {
                    self.check_stmt(stmt)?;
                }
                self.symbols.pop_scope();
                self.current_return = None;
                self.in_destructor = false;
            }
        }

        self.check_final_fields(&info)?;
        self.current_class = None;
        Ok(())
    }

    /// A `final` instance field is initialised at declaration or assigned
    /// exactly once on every path of every constructor of its class — never
    /// both.
    fn check_final_fields(&mut self, info: &Rc<ClassInfo>) -> Result<()> {
        for field in info.fields.clone() {
            if !field.is_final || field.is_static {
                continue;
            }
            for ctor in &info.constructors {
                let assigned_by_default = ctor.is_default
                    && ctor.param_names.iter().any(|p| *p == field.name);
                let counts = match &ctor.body {
                    Some(body) => {
                        let (count, _) = self.walk_ctor_assignments(body, &field.name, (0, 0), ctor.span)?;
                        count
                    }
                    None if assigned_by_default => (1, 1),
                    None => (0, 0),
                };
                if field.init.is_some() {
                    if counts.1 > 0 {
                        return Err(BlochError::semantic(
                            ctor.span,
                            format!(
                                "final field '{}' is initialised at declaration and assigned in a constructor",
                                field.name
                            ),
                        ));
                    }
                } else if counts != (1, 1) {
                    return Err(BlochError::semantic(
                        ctor.span,
                        format!(
                            "final field '{}' must be assigned exactly once on every constructor path",
                            field.name
                        ),
                    ));
                }
            }
            if field.init.is_none() && info.constructors.is_empty() {
                return Err(BlochError::semantic(
                    field.span,
                    format!("final field '{}' is never assigned", field.name),
                ));
            }
        }
        Ok(())
    }

    /// Interval analysis over a constructor body: how many times is
    /// `this.<field>` assigned before each return point.
    fn walk_ctor_assignments(
        &self,
        stmts: &[Stmt],
        field: &str,
        incoming: (u32, u32),
        _ctor_span: Span,
    ) -> Result<((u32, u32), bool)> {
        let mut current = incoming;
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Expr(e) | StmtKind::Echo(e) => {
                    let n = count_field_assignments(e, field);
                    current = (current.0 + n, current.1.saturating_add(n));
                }
                StmtKind::VarDecl { init: Some(e), .. } => {
                    let n = count_field_assignments(e, field);
                    current = (current.0 + n, current.1.saturating_add(n));
                }
                StmtKind::Return(value) => {
                    if let Some(e) = value {
                        let n = count_field_assignments(e, field);
                        current = (current.0 + n, current.1.saturating_add(n));
                    }
                    if current != (1, 1) {
                        return Err(BlochError::semantic(
                            stmt.span,
                            format!(
                                "final field '{}' must be assigned exactly once before this return",
                                field
                            ),
                        ));
                    }
                    return Ok((current, true));
                }
                StmtKind::Block(inner) => {
                    let (next, terminated) =
                        self.walk_ctor_assignments(inner, field, current, _ctor_span)?;
                    current = next;
                    if terminated {
                        return Ok((current, true));
                    }
                }
                StmtKind::If { cond, then_branch, else_branch } => {
                    let n = count_field_assignments(cond, field);
                    current = (current.0 + n, current.1.saturating_add(n));
                    let (t, t_term) = self.walk_ctor_assignments(
                        std::slice::from_ref(then_branch),
                        field,
                        current,
                        _ctor_span,
                    )?;
                    let (e, e_term) = match else_branch {
                        Some(branch) => self.walk_ctor_assignments(
                            std::slice::from_ref(branch),
                            field,
                            current,
                            _ctor_span,
                        )?,
                        None => (current, false),
                    };
                    current = match (t_term, e_term) {
                        (true, true) => return Ok((current, true)),
                        (true, false) => e,
                        (false, true) => t,
                        (false, false) => (t.0.min(e.0), t.1.max(e.1)),
                    };
                }
                StmtKind::Ternary { cond, then_branch, else_branch } => {
                    let n = count_field_assignments(cond, field);
                    current = (current.0 + n, current.1.saturating_add(n));
                    let (t, _) = self.walk_ctor_assignments(
                        std::slice::from_ref(then_branch),
                        field,
                        current,
                        _ctor_span,
                    )?;
                    let (e, _) = self.walk_ctor_assignments(
                        std::slice::from_ref(else_branch),
                        field,
                        current,
                        _ctor_span,
                    )?;
                    current = (t.0.min(e.0), t.1.max(e.1));
                }
                StmtKind::While { cond, body } => {
                    let n = count_field_assignments(cond, field);
                    current = (current.0 + n, current.1.saturating_add(n));
                    let (b, _) =
                        self.walk_ctor_assignments(std::slice::from_ref(body), field, current, _ctor_span)?;
                    if b.1 > current.1 {
                        current = (current.0, u32::MAX);
                    }
                }
                StmtKind::For { init, cond, step, body } => {
                    let mut loop_stmts: Vec<&Stmt> = Vec::new();
                    if let Some(i) = init {
                        let (after_init, _) = self.walk_ctor_assignments(
                            std::slice::from_ref(i),
                            field,
                            current,
                            _ctor_span,
                        )?;
                        current = after_init;
                    }
                    if let Some(c) = cond {
                        let n = count_field_assignments(c, field);
                        current = (current.0 + n, current.1.saturating_add(n));
                    }
                    loop_stmts.push(body);
                    if let Some(s) = step {
                        loop_stmts.push(s);
                    }
                    let mut b = current;
                    for s in loop_stmts {
                        let (next, _) =
                            self.walk_ctor_assignments(std::slice::from_ref(s), field, b, _ctor_span)?;
                        b = next;
                    }
                    if b.1 > current.1 {
                        current = (current.0, u32::MAX);
                    }
                }
                _ => {}
            }
        }
        Ok((current, false))
    }

    // ---- statements ----

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::VarDecl { is_final, tracked, ty, name, init } => {
                self.check_var_decl(stmt.span, *is_final, *tracked, ty, name, init.as_ref())
            }
            StmtKind::Block(stmts) => {
                self.symbols.push_scope();
                let result = stmts.iter().try_for_each(|s| self.check_stmt(s));
                self.symbols.pop_scope();
                result
            }
            StmtKind::Expr(e) => {
                self.infer(e)?;
                Ok(())
            }
            StmtKind::Return(value) => self.check_return(stmt.span, value.as_ref()),
            StmtKind::If { cond, then_branch, else_branch } => {
                self.expect_boolean(cond, "if condition")?;
                self.check_stmt(then_branch)?;
                if let Some(branch) = else_branch {
                    self.check_stmt(branch)?;
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                self.expect_boolean(cond, "while condition")?;
                self.check_stmt(body)
            }
            StmtKind::For { init, cond, step, body } => {
                self.symbols.push_scope();
                let result = (|| {
                    if let Some(i) = init {
                        self.check_stmt(i)?;
                    }
                    if let Some(c) = cond {
                        self.expect_boolean(c, "for condition")?;
                    }
                    if let Some(s) = step {
                        self.check_stmt(s)?;
                    }
                    self.check_stmt(body)
                })();
                self.symbols.pop_scope();
                result
            }
            StmtKind::Echo(e) => {
                let ty = self.infer(e)?;
                if ty == TypeDesc::Void {
                    return Err(BlochError::semantic(stmt.span, "cannot echo a 'void' expression"));
                }
                Ok(())
            }
            StmtKind::Reset(e) => {
                let ty = self.infer(e)?;
                if ty != TypeDesc::Qubit && !ty.is_qubit_array() {
                    return Err(BlochError::semantic(
                        stmt.span,
                        format!("'reset' requires a qubit or qubit array, not '{}'", ty),
                    ));
                }
                Ok(())
            }
            StmtKind::MeasureStmt(e) => {
                let ty = self.infer(e)?;
                if ty != TypeDesc::Qubit && !ty.is_qubit_array() {
                    return Err(BlochError::semantic(
                        stmt.span,
                        format!("'measure' requires a qubit or qubit array, not '{}'", ty),
                    ));
                }
                Ok(())
            }
            StmtKind::Destroy(e) => {
                let ty = self.infer(e)?;
                if !ty.is_class() && ty != TypeDesc::Null {
                    return Err(BlochError::semantic(
                        stmt.span,
                        format!("'destroy' requires a class reference, not '{}'", ty),
                    ));
                }
                Ok(())
            }
            StmtKind::Ternary { cond, then_branch, else_branch } => {
                self.expect_boolean(cond, "ternary condition")?;
                self.check_stmt(then_branch)?;
                self.check_stmt(else_branch)
            }
        }
    }

    fn check_var_decl(
        &mut self,
        span: Span,
        is_final: bool,
        tracked: bool,
        ty: &Type,
        name: &str,
        init: Option<&Expr>,
    ) -> Result<()> {
        let subst = self.current_subst();
        let desc = self.registry.resolve_type(ty, &subst)?;
        if desc == TypeDesc::Void {
            return Err(BlochError::semantic(span, format!("variable '{}' cannot have type 'void'", name)));
        }
        if tracked && !(desc == TypeDesc::Qubit || desc.is_qubit_array()) {
            return Err(BlochError::semantic(
                span,
                "'@tracked' is only valid on qubit or qubit-array declarations",
            ));
        }

        // Array sizes must be compile-time constants
        let mut desc = desc;
        if let TypeKind::Array { size: Some(size), resolved_size, .. } = &ty.kind {
            let n = match resolved_size.get() {
                Some(n) => n,
                None => {
                    let n = self.const_int(size).ok_or_else(|| {
                        BlochError::semantic(size.span, "array size must be a compile-time constant")
                    })?;
                    if n < 0 {
                        return Err(BlochError::semantic(size.span, "array size must be non-negative"));
                    }
                    resolved_size.set(Some(n as usize));
                    n as usize
                }
            };
            if let TypeDesc::Array { elem, .. } = desc {
                desc = TypeDesc::Array { elem, size: Some(n) };
            }
        }

        if desc == TypeDesc::Qubit || desc.is_qubit_array() {
            if init.is_some() {
                return Err(BlochError::semantic(
                    span,
                    "qubit declarations cannot have an initialiser",
                ));
            }
        } else if let Some(init) = init {
            let init_ty = match (&init.kind, &desc) {
                // An array literal takes its element type from the declaration
                (ExprKind::ArrayLiteral(elements), TypeDesc::Array { elem, size }) => {
                    for element in elements {
                        let e_ty = self.infer(element)?;
                        if !self.registry.assignable(&e_ty, elem) {
                            return Err(BlochError::semantic(
                                element.span,
                                format!("array element of type '{}' does not fit '{}[]'", e_ty, elem),
                            ));
                        }
                    }
                    if let Some(n) = size {
                        if elements.len() != *n {
                            return Err(BlochError::semantic(
                                init.span,
                                format!("array literal has {} elements but the type wants {}", elements.len(), n),
                            ));
                        }
                    }
                    desc.clone()
                }
                _ => self.infer(init)?,
            };
            if !self.registry.assignable(&init_ty, &desc) {
                return Err(BlochError::semantic(
                    span,
                    format!("cannot assign '{}' to variable '{}' of type '{}'", init_ty, name, desc),
                ));
            }
        } else if is_final {
            return Err(BlochError::semantic(
                span,
                format!("final variable '{}' requires an initialiser", name),
            ));
        }

        let const_int = if is_final && desc == TypeDesc::Int {
            init.and_then(|e| self.const_int(e))
        } else {
            None
        };
        self.declare(
            name,
            Binding { kind: BindingKind::Variable, ty: desc, is_final, tracked, const_int },
            span,
        )
    }

    fn check_return(&mut self, span: Span, value: Option<&Expr>) -> Result<()> {
        if self.in_destructor {
            if value.is_some() {
                return Err(BlochError::semantic(span, "destructors cannot return a value"));
            }
            return Ok(());
        }
        if self.current_ctor.is_some() {
            match value {
                None => return Ok(()),
                Some(e) if matches!(e.kind, ExprKind::This) => return Ok(()),
                Some(e) => {
                    return Err(BlochError::semantic(
                        e.span,
                        "a constructor can only 'return this'",
                    ));
                }
            }
        }
        let expected = self.current_return.clone().ok_or_else(|| {
            BlochError::semantic(span, "'return' outside of a function")
        })?;
        match value {
            None => {
                if expected != TypeDesc::Void {
                    return Err(BlochError::semantic(
                        span,
                        format!("function must return a value of type '{}'", expected),
                    ));
                }
            }
            Some(e) => {
                if expected == TypeDesc::Void {
                    return Err(BlochError::semantic(span, "cannot return a value from a void function"));
                }
                let ty = self.infer(e)?;
                if !self.registry.assignable(&ty, &expected) {
                    return Err(BlochError::semantic(
                        e.span,
                        format!("cannot return '{}' from a function returning '{}'", ty, expected),
                    ));
                }
            }
        }
        Ok(())
    }

    // ---- expressions ----

    fn infer(&mut self, expr: &Expr) -> Result<TypeDesc> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                Literal::Int(_) => TypeDesc::Int,
                Literal::Long(_) => TypeDesc::Long,
                Literal::Float(_) => TypeDesc::Float,
                Literal::Bit(_) => TypeDesc::Bit,
                Literal::Boolean(_) => TypeDesc::Boolean,
                Literal::Char(_) => TypeDesc::Char,
                Literal::Str(_) => TypeDesc::Str,
            }),
            ExprKind::Null => Ok(TypeDesc::Null),
            ExprKind::Variable(name) => {
                if let Some(binding) = self.symbols.lookup(name) {
                    if binding.kind == BindingKind::Variable {
                        return Ok(binding.ty.clone());
                    }
                }
                // Bare member access inside a class body
                if let Some(class) = self.current_class.clone() {
                    if let Some((declaring, field)) = self.registry.find_field(&class, name) {
                        if !field.is_static && self.in_static_context {
                            return Err(BlochError::semantic(
                                expr.span,
                                format!("instance field '{}' is not available in a static context", name),
                            ));
                        }
                        self.check_member_visibility(field.vis, &declaring, expr.span, "field", name)?;
                        return Ok(field.ty.clone());
                    }
                }
                if self.registry.is_class_name(name) {
                    return Err(BlochError::semantic(
                        expr.span,
                        format!("class '{}' cannot be used as a value", name),
                    ));
                }
                Err(BlochError::semantic(expr.span, format!("unknown variable '{}'", name)))
            }
            ExprKind::This => match (&self.current_class, self.in_static_context) {
                (Some(class), false) => Ok(class.desc()),
                (Some(_), true) => {
                    Err(BlochError::semantic(expr.span, "'this' is not available in a static context"))
                }
                (None, _) => Err(BlochError::semantic(expr.span, "'this' outside of a class")),
            },
            ExprKind::Binary { op, lhs, rhs } => self.infer_binary(expr.span, *op, lhs, rhs),
            ExprKind::Unary { op, operand } => {
                let ty = self.infer(operand)?;
                match op {
                    UnaryOp::Neg if ty.is_numeric() => Ok(ty),
                    UnaryOp::Neg => Err(BlochError::semantic(
                        expr.span,
                        format!("unary '-' requires a numeric operand, not '{}'", ty),
                    )),
                    UnaryOp::Not if ty == TypeDesc::Boolean => Ok(TypeDesc::Boolean),
                    UnaryOp::Not => Err(BlochError::semantic(
                        expr.span,
                        format!("'!' requires a boolean operand, not '{}'", ty),
                    )),
                    UnaryOp::BitNot if ty == TypeDesc::Bit || ty.is_bit_array() => Ok(ty),
                    UnaryOp::BitNot => Err(BlochError::semantic(
                        expr.span,
                        format!("'~' requires a bit or bit array, not '{}'", ty),
                    )),
                }
            }
            ExprKind::Postfix { target, .. } => {
                let ty = self.check_assign_target(target)?;
                if !ty.is_integer() {
                    return Err(BlochError::semantic(
                        expr.span,
                        format!("'++'/'--' require an int or long target, not '{}'", ty),
                    ));
                }
                Ok(ty)
            }
            ExprKind::Cast { target, operand } => {
                let source = self.infer(operand)?;
                let target_desc = TypeDesc::from_primitive(*target);
                let castable = |t: &TypeDesc| {
                    matches!(t, TypeDesc::Int | TypeDesc::Long | TypeDesc::Float | TypeDesc::Bit)
                };
                if !castable(&target_desc) || !castable(&source) {
                    return Err(BlochError::semantic(
                        expr.span,
                        format!("cannot cast from '{}' to '{}'", source, target_desc),
                    ));
                }
                Ok(target_desc)
            }
            ExprKind::Call { name, args } => self.infer_call(expr, name, args),
            ExprKind::MethodCall { recv, name, args } => self.infer_method_call(expr, recv, name, args),
            ExprKind::SuperCall { method, args } => self.infer_super_call(expr, method.as_deref(), args),
            ExprKind::Index { target, index } => {
                let target_ty = self.infer(target)?;
                let index_ty = self.infer(index)?;
                if !index_ty.is_numeric() && index_ty != TypeDesc::Bit {
                    return Err(BlochError::semantic(
                        index.span,
                        format!("array index must be numeric, not '{}'", index_ty),
                    ));
                }
                match target_ty {
                    TypeDesc::Array { elem, .. } => Ok(*elem),
                    other => Err(BlochError::semantic(
                        expr.span,
                        format!("cannot index into '{}'", other),
                    )),
                }
            }
            ExprKind::Member { target, name } => self.infer_member(expr, target, name),
            ExprKind::Assign { target, value } => self.infer_assignment(target, value),
            ExprKind::ArrayLiteral(elements) => {
                if elements.is_empty() {
                    return Err(BlochError::semantic(
                        expr.span,
                        "cannot infer the type of an empty array literal",
                    ));
                }
                let first = self.infer(&elements[0])?;
                for element in &elements[1..] {
                    let ty = self.infer(element)?;
                    if !self.registry.assignable(&ty, &first) {
                        return Err(BlochError::semantic(
                            element.span,
                            format!("array element of type '{}' does not fit '{}[]'", ty, first),
                        ));
                    }
                }
                Ok(TypeDesc::Array { elem: Box::new(first), size: Some(elements.len()) })
            }
            ExprKind::Measure(operand) => {
                let ty = self.infer(operand)?;
                match ty {
                    TypeDesc::Qubit => Ok(TypeDesc::Bit),
                    TypeDesc::Array { ref elem, size } if **elem == TypeDesc::Qubit => {
                        Ok(TypeDesc::Array { elem: Box::new(TypeDesc::Bit), size })
                    }
                    other => Err(BlochError::semantic(
                        expr.span,
                        format!("'measure' requires a qubit or qubit array, not '{}'", other),
                    )),
                }
            }
            ExprKind::New { class, type_args, args } => self.infer_new(expr, class, type_args, args),
        }
    }

    fn infer_binary(&mut self, span: Span, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<TypeDesc> {
        let left = self.infer(lhs)?;
        let right = self.infer(rhs)?;

        let numericish = |t: &TypeDesc| t.is_numeric() || *t == TypeDesc::Bit;
        let promote = |a: &TypeDesc, b: &TypeDesc| {
            if *a == TypeDesc::Float || *b == TypeDesc::Float {
                TypeDesc::Float
            } else if *a == TypeDesc::Long || *b == TypeDesc::Long {
                TypeDesc::Long
            } else {
                TypeDesc::Int
            }
        };

        match op {
            BinaryOp::Add => {
                if left == TypeDesc::Str || right == TypeDesc::Str {
                    if left == TypeDesc::Void || right == TypeDesc::Void {
                        return Err(BlochError::semantic(span, "cannot concatenate a 'void' expression"));
                    }
                    return Ok(TypeDesc::Str);
                }
                if left.is_numeric() && right.is_numeric() {
                    return Ok(promote(&left, &right));
                }
                Err(BlochError::semantic(
                    span,
                    format!("operator '+' cannot combine '{}' and '{}'", left, right),
                ))
            }
            BinaryOp::Sub | BinaryOp::Mul => {
                if left.is_numeric() && right.is_numeric() {
                    Ok(promote(&left, &right))
                } else {
                    Err(BlochError::semantic(
                        span,
                        format!("operator '{}' requires numeric operands, got '{}' and '{}'", op.symbol(), left, right),
                    ))
                }
            }
            BinaryOp::Div => {
                if left.is_numeric() && right.is_numeric() {
                    // Division always lands in float
                    Ok(TypeDesc::Float)
                } else {
                    Err(BlochError::semantic(
                        span,
                        format!("operator '/' requires numeric operands, got '{}' and '{}'", left, right),
                    ))
                }
            }
            BinaryOp::Mod => {
                if left.is_integer() && right.is_integer() {
                    Ok(promote(&left, &right))
                } else {
                    Err(BlochError::semantic(
                        span,
                        format!("operator '%' requires integer operands, got '{}' and '{}'", left, right),
                    ))
                }
            }
            BinaryOp::Eq | BinaryOp::NotEq => {
                // `null` only compares against class references
                if left == TypeDesc::Null || right == TypeDesc::Null {
                    let other = if left == TypeDesc::Null { &right } else { &left };
                    if other.is_class() || *other == TypeDesc::Null {
                        return Ok(TypeDesc::Boolean);
                    }
                    return Err(BlochError::semantic(
                        span,
                        format!("'null' can only be compared against class references, not '{}'", other),
                    ));
                }
                let comparable = (numericish(&left) && numericish(&right))
                    || left == right
                    || (left.is_class() && right.is_class());
                if comparable {
                    Ok(TypeDesc::Boolean)
                } else {
                    Err(BlochError::semantic(
                        span,
                        format!("cannot compare '{}' with '{}'", left, right),
                    ))
                }
            }
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                if numericish(&left) && numericish(&right) {
                    Ok(TypeDesc::Boolean)
                } else {
                    Err(BlochError::semantic(
                        span,
                        format!("operator '{}' requires numeric operands, got '{}' and '{}'", op.symbol(), left, right),
                    ))
                }
            }
            BinaryOp::And | BinaryOp::Or => {
                if left == TypeDesc::Boolean && right == TypeDesc::Boolean {
                    Ok(TypeDesc::Boolean)
                } else {
                    Err(BlochError::semantic(
                        span,
                        format!("operator '{}' requires boolean operands, got '{}' and '{}'", op.symbol(), left, right),
                    ))
                }
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if left == TypeDesc::Bit && right == TypeDesc::Bit {
                    Ok(TypeDesc::Bit)
                } else if left.is_bit_array() && right.is_bit_array() {
                    Ok(left)
                } else {
                    Err(BlochError::semantic(
                        span,
                        format!("operator '{}' requires bit or bit[] operands, got '{}' and '{}'", op.symbol(), left, right),
                    ))
                }
            }
        }
    }

    fn infer_call(&mut self, expr: &Expr, name: &str, args: &[Expr]) -> Result<TypeDesc> {
        let arg_types: Result<Vec<TypeDesc>> = args.iter().map(|a| self.infer(a)).collect();
        let arg_types = arg_types?;

        if let Some((_, gate_params)) = GATES.iter().find(|(gate, _)| *gate == name) {
            if arg_types.len() != gate_params.len() {
                return Err(BlochError::semantic(
                    expr.span,
                    format!("gate '{}' expects {} argument(s), got {}", name, gate_params.len(), arg_types.len()),
                ));
            }
            for (arg, param) in arg_types.iter().zip(gate_params.iter()) {
                if arg != param {
                    return Err(BlochError::semantic(
                        expr.span,
                        format!("gate '{}' expects a '{}' argument, got '{}'", name, param, arg),
                    ));
                }
            }
            return Ok(TypeDesc::Void);
        }

        // Bare method calls inside a class body resolve against the class
        if !self.functions.contains_key(name) {
            if let Some(class) = self.current_class.clone() {
                let methods = self.registry.find_methods(&class, name);
                if !methods.is_empty() {
                    let want_static = self.in_static_context
                        || methods.iter().all(|(_, m)| m.is_static);
                    return self.resolve_member_call(expr, &class, name, args, want_static);
                }
            }
        }

        let sig = self.functions.get(name).cloned().ok_or_else(|| {
            BlochError::semantic(expr.span, format!("unknown function '{}'", name))
        })?;
        // The top-level namespace is flat: calls match by arity, then each
        // argument is checked against the declared parameter type
        if sig.params.len() != arg_types.len() {
            return Err(BlochError::semantic(
                expr.span,
                format!(
                    "function '{}' expects {} argument(s), got {}",
                    name,
                    sig.params.len(),
                    arg_types.len()
                ),
            ));
        }
        for (i, (arg, param)) in arg_types.iter().zip(sig.params.iter()).enumerate() {
            if !self.registry.assignable(arg, param) {
                return Err(BlochError::semantic(
                    args[i].span,
                    format!("argument {} of '{}' expects '{}', got '{}'", i + 1, name, param, arg),
                ));
            }
        }
        Ok(sig.ret.clone())
    }

    fn infer_method_call(
        &mut self,
        expr: &Expr,
        recv: &Expr,
        name: &str,
        args: &[Expr],
    ) -> Result<TypeDesc> {
        // A class-name receiver selects from static members
        if let ExprKind::Variable(class_name) = &recv.kind {
            if self.symbols.lookup(class_name).is_none() && self.registry.is_class_name(class_name) {
                let info = self.registry.template_info(class_name, recv.span)?;
                let ty = self.resolve_member_call(expr, &info, name, args, true)?;
                self.static_receivers.insert(expr.id, info.decl_name.clone());
                return Ok(ty);
            }
        }

        let recv_ty = self.infer(recv)?;
        if recv_ty == TypeDesc::Null {
            return Err(BlochError::semantic(recv.span, "cannot call a method on 'null'"));
        }
        let info = self.registry.info_for(&recv_ty, recv.span)?;
        self.resolve_member_call(expr, &info, name, args, false)
    }

    fn resolve_member_call(
        &mut self,
        expr: &Expr,
        info: &Rc<ClassInfo>,
        name: &str,
        args: &[Expr],
        want_static: bool,
    ) -> Result<TypeDesc> {
        let arg_types: Result<Vec<TypeDesc>> = args.iter().map(|a| self.infer(a)).collect();
        let arg_types = arg_types?;

        let found = self.registry.find_methods(info, name);
        let found: Vec<_> = found
            .into_iter()
            .filter(|(_, m)| m.is_static == want_static)
            .collect();
        if found.is_empty() {
            return Err(BlochError::semantic(
                expr.span,
                format!(
                    "class '{}' has no {}method '{}'",
                    info.key,
                    if want_static { "static " } else { "" },
                    name
                ),
            ));
        }

        let sigs: Vec<Vec<TypeDesc>> = found.iter().map(|(_, m)| m.params.clone()).collect();
        let chosen = match self.registry.pick_overload(&arg_types, &sigs) {
            OverloadChoice::Unique(i) => i,
            OverloadChoice::Ambiguous => {
                return Err(BlochError::semantic(
                    expr.span,
                    format!("ambiguous call to overloaded method '{}'", name),
                ));
            }
            OverloadChoice::None => {
                return Err(BlochError::semantic(
                    expr.span,
                    format!(
                        "no overload of '{}' matches argument types ({})",
                        name,
                        arg_types.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
                    ),
                ));
            }
        };
        let (declaring, method) = &found[chosen];
        self.check_member_visibility(method.vis, declaring, expr.span, "method", name)?;

        self.call_targets.insert(
            expr.id,
            CallTarget {
                decl_class: declaring.decl_name.clone(),
                sig: method.params.clone(),
                is_virtual: method.is_virtual || method.is_override,
                is_static: method.is_static,
            },
        );
        Ok(method.ret.clone())
    }

    fn infer_super_call(
        &mut self,
        expr: &Expr,
        method: Option<&str>,
        args: &[Expr],
    ) -> Result<TypeDesc> {
        let current = self.current_class.clone().ok_or_else(|| {
            BlochError::semantic(expr.span, "'super' outside of a class")
        })?;
        if self.in_static_context {
            return Err(BlochError::semantic(expr.span, "'super' is not available in a static context"));
        }
        let base = self.registry.base_of(&current).ok_or_else(|| {
            BlochError::semantic(expr.span, format!("class '{}' has no base class", current.key))
        })?;

        match method {
            // `super.m(args)` binds statically in the base chain
            Some(name) => self.resolve_member_call(expr, &base, name, args, false),
            // `super(args)` resolves a base constructor
            None => {
                if self.current_ctor.is_none() {
                    return Err(BlochError::semantic(
                        expr.span,
                        "'super(...)' is only valid inside a constructor",
                    ));
                }
                let arg_types: Result<Vec<TypeDesc>> = args.iter().map(|a| self.infer(a)).collect();
                let arg_types = arg_types?;
                let sigs: Vec<Vec<TypeDesc>> =
                    base.constructors.iter().map(|c| c.params.clone()).collect();
                let chosen = match self.registry.pick_overload(&arg_types, &sigs) {
                    OverloadChoice::Unique(i) => i,
                    OverloadChoice::Ambiguous => {
                        return Err(BlochError::semantic(
                            expr.span,
                            format!("ambiguous call to a constructor of '{}'", base.key),
                        ));
                    }
                    OverloadChoice::None => {
                        return Err(BlochError::semantic(
                            expr.span,
                            format!("no constructor of '{}' matches these arguments", base.key),
                        ));
                    }
                };
                self.ctor_targets.insert(expr.id, base.constructors[chosen].params.clone());
                Ok(TypeDesc::Void)
            }
        }
    }

    fn infer_member(&mut self, expr: &Expr, target: &Expr, name: &str) -> Result<TypeDesc> {
        // A class-name receiver selects a static field
        if let ExprKind::Variable(class_name) = &target.kind {
            if self.symbols.lookup(class_name).is_none() && self.registry.is_class_name(class_name) {
                let info = self.registry.template_info(class_name, target.span)?;
                let (declaring, field) = self.registry.find_field(&info, name).ok_or_else(|| {
                    BlochError::semantic(
                        expr.span,
                        format!("class '{}' has no field '{}'", class_name, name),
                    )
                })?;
                if !field.is_static {
                    return Err(BlochError::semantic(
                        expr.span,
                        format!("field '{}' of class '{}' is not static", name, class_name),
                    ));
                }
                self.check_member_visibility(field.vis, &declaring, expr.span, "field", name)?;
                self.static_receivers.insert(expr.id, info.decl_name.clone());
                return Ok(field.ty.clone());
            }
        }

        let target_ty = self.infer(target)?;
        if target_ty == TypeDesc::Null {
            return Err(BlochError::semantic(target.span, "cannot access a member of 'null'"));
        }
        let info = self.registry.info_for(&target_ty, target.span)?;
        let (declaring, field) = self.registry.find_field(&info, name).ok_or_else(|| {
            BlochError::semantic(expr.span, format!("class '{}' has no field '{}'", info.key, name))
        })?;
        if field.is_static {
            return Err(BlochError::semantic(
                expr.span,
                format!("static field '{}' must be accessed through its class", name),
            ));
        }
        self.check_member_visibility(field.vis, &declaring, expr.span, "field", name)?;
        Ok(field.ty.clone())
    }

    fn infer_new(
        &mut self,
        expr: &Expr,
        class: &str,
        type_args: &[Type],
        args: &[Expr],
    ) -> Result<TypeDesc> {
        let subst = self.current_subst();
        let resolved_args: Result<Vec<TypeDesc>> =
            type_args.iter().map(|t| self.registry.resolve_type(t, &subst)).collect();
        let resolved_args = resolved_args?;

        let info = if resolved_args.is_empty() {
            self.registry.template_info(class, expr.span)?
        } else {
            self.registry.instantiate(class, &resolved_args, expr.span)?
        };
        if resolved_args.is_empty() && !info.type_params.is_empty() {
            return Err(BlochError::semantic(
                expr.span,
                format!("generic class '{}' requires type arguments", class),
            ));
        }
        if info.is_static {
            return Err(BlochError::semantic(
                expr.span,
                format!("cannot instantiate static class '{}'", class),
            ));
        }
        if info.is_abstract() {
            return Err(BlochError::semantic(
                expr.span,
                format!("cannot instantiate abstract class '{}'", class),
            ));
        }

        let arg_types: Result<Vec<TypeDesc>> = args.iter().map(|a| self.infer(a)).collect();
        let arg_types = arg_types?;
        let sigs: Vec<Vec<TypeDesc>> = info.constructors.iter().map(|c| c.params.clone()).collect();
        let chosen = match self.registry.pick_overload(&arg_types, &sigs) {
            OverloadChoice::Unique(i) => i,
            OverloadChoice::Ambiguous => {
                return Err(BlochError::semantic(
                    expr.span,
                    format!("ambiguous call to a constructor of '{}'", info.key),
                ));
            }
            OverloadChoice::None => {
                return Err(BlochError::semantic(
                    expr.span,
                    format!("no constructor of '{}' matches these arguments", info.key),
                ));
            }
        };
        let ctor = &info.constructors[chosen];
        self.check_member_visibility(ctor.vis, &info, expr.span, "constructor", &info.key)?;
        self.ctor_targets.insert(expr.id, ctor.params.clone());
        Ok(info.desc())
    }

    fn infer_assignment(&mut self, target: &Expr, value: &Expr) -> Result<TypeDesc> {
        let target_ty = self.check_assign_target(target)?;
        let value_ty = match (&value.kind, &target_ty) {
            (ExprKind::ArrayLiteral(elements), TypeDesc::Array { elem, .. }) => {
                for element in elements {
                    let ty = self.infer(element)?;
                    if !self.registry.assignable(&ty, elem) {
                        return Err(BlochError::semantic(
                            element.span,
                            format!("array element of type '{}' does not fit '{}[]'", ty, elem),
                        ));
                    }
                }
                target_ty.clone()
            }
            _ => self.infer(value)?,
        };
        if !self.registry.assignable(&value_ty, &target_ty) {
            return Err(BlochError::semantic(
                value.span,
                format!("cannot assign '{}' to a target of type '{}'", value_ty, target_ty),
            ));
        }
        Ok(target_ty)
    }

    /// Validates an assignment / increment target and returns its type,
    /// enforcing the `final` discipline.
    fn check_assign_target(&mut self, target: &Expr) -> Result<TypeDesc> {
        match &target.kind {
            ExprKind::Variable(name) => {
                let binding = match self.symbols.lookup(name).cloned() {
                    Some(binding) => binding,
                    None => {
                        // Bare writes reach non-final fields of the current class
                        if let Some(class) = self.current_class.clone() {
                            if let Some((declaring, field)) = self.registry.find_field(&class, name) {
                                if !field.is_static && self.in_static_context {
                                    return Err(BlochError::semantic(
                                        target.span,
                                        format!("instance field '{}' is not available in a static context", name),
                                    ));
                                }
                                if field.is_final {
                                    return Err(BlochError::semantic(
                                        target.span,
                                        format!("cannot assign to final field '{}'", name),
                                    ));
                                }
                                self.check_member_visibility(
                                    field.vis, &declaring, target.span, "field", name,
                                )?;
                                return Ok(field.ty.clone());
                            }
                        }
                        return Err(BlochError::semantic(
                            target.span,
                            format!("unknown variable '{}'", name),
                        ));
                    }
                };
                if binding.is_final {
                    return Err(BlochError::semantic(
                        target.span,
                        format!("cannot assign to final variable '{}'", name),
                    ));
                }
                if binding.ty == TypeDesc::Qubit {
                    return Err(BlochError::semantic(
                        target.span,
                        format!("cannot reassign qubit '{}'", name),
                    ));
                }
                Ok(binding.ty)
            }
            ExprKind::Member { target: recv, name } => {
                let field_ty = self.infer(target)?;
                // Re-find the field for the final check
                let is_this = matches!(recv.kind, ExprKind::This);
                let static_recv = self.static_receivers.get(&target.id).cloned();
                let (declaring, field) = if let Some(class_name) = static_recv {
                    let info = self.registry.template_info(&class_name, recv.span)?;
                    self.registry.find_field(&info, name).expect("checked by infer")
                } else {
                    let recv_ty = self.infer(recv)?;
                    let info = self.registry.info_for(&recv_ty, recv.span)?;
                    self.registry.find_field(&info, name).expect("checked by infer")
                };
                if field.is_final {
                    let in_own_ctor = is_this
                        && self
                            .current_ctor
                            .as_ref()
                            .is_some_and(|c| c.decl_name == declaring.decl_name);
                    if !in_own_ctor || field.is_static {
                        return Err(BlochError::semantic(
                            target.span,
                            format!("cannot assign to final field '{}'", name),
                        ));
                    }
                    if field.init.is_some() {
                        return Err(BlochError::semantic(
                            target.span,
                            format!(
                                "final field '{}' is already initialised at declaration",
                                name
                            ),
                        ));
                    }
                }
                Ok(field_ty)
            }
            ExprKind::Index { .. } => {
                let elem_ty = self.infer(target)?;
                // Writing requires an integer index at compile time
                if let ExprKind::Index { index, .. } = &target.kind {
                    let index_ty = self.infer(index)?;
                    if !index_ty.is_integer() {
                        return Err(BlochError::semantic(
                            index.span,
                            format!("assignment index must be 'int' or 'long', not '{}'", index_ty),
                        ));
                    }
                }
                Ok(elem_ty)
            }
            _ => Err(BlochError::semantic(target.span, "invalid assignment target")),
        }
    }

    // ---- helpers ----

    fn declare(&mut self, name: &str, binding: Binding, span: Span) -> Result<()> {
        self.symbols
            .declare(name, binding)
            .map_err(|message| BlochError::semantic(span, message))
    }

    fn expect_boolean(&mut self, expr: &Expr, what: &str) -> Result<()> {
        let ty = self.infer(expr)?;
        if ty != TypeDesc::Boolean {
            return Err(BlochError::semantic(
                expr.span,
                format!("{} must be 'boolean', not '{}'", what, ty),
            ));
        }
        Ok(())
    }

    fn current_subst(&self) -> HashMap<String, TypeDesc> {
        self.current_class.as_ref().map(|c| c.subst.clone()).unwrap_or_default()
    }

    fn check_member_visibility(
        &self,
        vis: Visibility,
        declaring: &Rc<ClassInfo>,
        span: Span,
        kind: &str,
        name: &str,
    ) -> Result<()> {
        let allowed = match vis {
            Visibility::Public => true,
            Visibility::Private => self
                .current_class
                .as_ref()
                .is_some_and(|c| c.decl_name == declaring.decl_name),
            Visibility::Protected => self.current_class.as_ref().is_some_and(|c| {
                let mut current = Some(c.clone());
                while let Some(class) = current {
                    if class.decl_name == declaring.decl_name {
                        return true;
                    }
                    current = self.registry.base_of(&class);
                }
                false
            }),
        };
        if allowed {
            Ok(())
        } else {
            Err(BlochError::semantic(
                span,
                format!("{} '{}' is {} in '{}'", kind, name, vis.name(), declaring.key),
            ))
        }
    }

    /// Compile-time integer evaluation: literals, `final int` bindings with
    /// known values, and simple arithmetic over those.
    fn const_int(&self, expr: &Expr) -> Option<i64> {
        match &expr.kind {
            ExprKind::Literal(Literal::Int(n)) | ExprKind::Literal(Literal::Long(n)) => Some(*n),
            ExprKind::Variable(name) => self.symbols.lookup(name).and_then(|b| b.const_int),
            ExprKind::Unary { op: UnaryOp::Neg, operand } => self.const_int(operand).map(|n| -n),
            ExprKind::Binary { op, lhs, rhs } => {
                let a = self.const_int(lhs)?;
                let b = self.const_int(rhs)?;
                match op {
                    BinaryOp::Add => Some(a + b),
                    BinaryOp::Sub => Some(a - b),
                    BinaryOp::Mul => Some(a * b),
                    BinaryOp::Div if b != 0 => Some(a / b),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Occurrences of `this.<field> = ...` (or bare `<field> = ...`) inside an
/// expression tree.
fn count_field_assignments(expr: &Expr, field: &str) -> u32 {
    let mut count = 0;
    visit_expr(expr, &mut |e| {
        if let ExprKind::Assign { target, .. } = &e.kind {
            if let ExprKind::Member { target: recv, name } = &target.kind {
                if name == field && matches!(recv.kind, ExprKind::This) {
                    count += 1;
                }
            }
        }
    });
    count
}

fn visit_expr(expr: &Expr, f: &mut impl FnMut(&Expr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Binary { lhs, rhs, .. } => {
            visit_expr(lhs, f);
            visit_expr(rhs, f);
        }
        ExprKind::Unary { operand, .. } => visit_expr(operand, f),
        ExprKind::Postfix { target, .. } => visit_expr(target, f),
        ExprKind::Cast { operand, .. } => visit_expr(operand, f),
        ExprKind::Call { args, .. } | ExprKind::SuperCall { args, .. } => {
            args.iter().for_each(|a| visit_expr(a, f));
        }
        ExprKind::MethodCall { recv, args, .. } => {
            visit_expr(recv, f);
            args.iter().for_each(|a| visit_expr(a, f));
        }
        ExprKind::Index { target, index } => {
            visit_expr(target, f);
            visit_expr(index, f);
        }
        ExprKind::Member { target, .. } => visit_expr(target, f),
        ExprKind::Assign { target, value } => {
            visit_expr(target, f);
            visit_expr(value, f);
        }
        ExprKind::ArrayLiteral(elements) => elements.iter().for_each(|e| visit_expr(e, f)),
        ExprKind::Measure(operand) => visit_expr(operand, f),
        ExprKind::New { args, .. } => args.iter().for_each(|a| visit_expr(a, f)),
        _ => {}
    }
}

fn field_infos_in_decl_order<'a>(
    info: &'a Rc<ClassInfo>,
    class: &'a ClassDecl,
) -> Vec<(Rc<crate::semantics::registry::FieldInfo>, &'a Field)> {
    let mut out = Vec::new();
    for ast_field in &class.fields {
        let found = info
            .fields
            .iter()
            .chain(info.statics.iter())
            .find(|f| f.name == ast_field.name)
            .cloned();
        if let Some(field) = found {
            out.push((field, ast_field));
        }
    }
    out
}
