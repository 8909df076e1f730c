use crate::runtime::value::Value;

/// One named binding. `tracked` carries the heading used when the binding's
/// outcome is recorded on release, e.g. `qubit q`.
#[derive(Debug)]
pub struct Slot {
    pub name: String,
    pub value: Value,
    pub tracked: Option<String>,
}

#[derive(Debug, Default)]
struct Scope {
    slots: Vec<Slot>,
}

#[derive(Debug, Default)]
struct Frame {
    scopes: Vec<Scope>,
}

/// Per-call-frame chain of scopes over a shared global frame. Lookups walk
/// the current frame's scopes outward and then fall through to globals;
/// names never escape their frame otherwise.
#[derive(Debug, Default)]
pub struct EnvStack {
    globals: Frame,
    frames: Vec<Frame>,
}

impl EnvStack {
    pub fn new() -> Self {
        let mut env = Self::default();
        env.globals.scopes.push(Scope::default());
        env
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Frame { scopes: vec![Scope::default()] });
    }

    /// Pops the whole frame; slots come back innermost-scope-first, each
    /// scope in reverse declaration order.
    pub fn pop_frame(&mut self) -> Vec<Slot> {
        let mut released = Vec::new();
        if let Some(frame) = self.frames.pop() {
            for scope in frame.scopes.into_iter().rev() {
                released.extend(scope.slots.into_iter().rev());
            }
        }
        released
    }

    pub fn push_scope(&mut self) {
        self.current_frame_mut().scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) -> Vec<Slot> {
        match self.current_frame_mut().scopes.pop() {
            Some(scope) => scope.slots.into_iter().rev().collect(),
            None => Vec::new(),
        }
    }

    /// Tears down the global scope at shutdown.
    pub fn pop_globals(&mut self) -> Vec<Slot> {
        let mut released = Vec::new();
        for scope in self.globals.scopes.drain(..).rev() {
            released.extend(scope.slots.into_iter().rev());
        }
        released
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().unwrap_or(&mut self.globals)
    }

    pub fn declare(&mut self, name: &str, value: Value, tracked: Option<String>) {
        let scope = self
            .current_frame_mut()
            .scopes
            .last_mut()
            .expect("no open scope");
        scope.slots.push(Slot { name: name.to_string(), value, tracked });
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.find(name).map(|slot| slot.value.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Replaces a binding's value, returning the old one for release.
    pub fn set(&mut self, name: &str, value: Value) -> Option<Value> {
        let in_frame = self
            .frames
            .last()
            .is_some_and(|frame| frame_contains(frame, name));
        let slot = if in_frame {
            find_in_frame_mut(self.frames.last_mut().unwrap(), name)?
        } else {
            find_in_frame_mut(&mut self.globals, name)?
        };
        Some(std::mem::replace(&mut slot.value, value))
    }

    fn find(&self, name: &str) -> Option<&Slot> {
        if let Some(frame) = self.frames.last() {
            for scope in frame.scopes.iter().rev() {
                if let Some(slot) = scope.slots.iter().rev().find(|s| s.name == name) {
                    return Some(slot);
                }
            }
        }
        for scope in self.globals.scopes.iter().rev() {
            if let Some(slot) = scope.slots.iter().rev().find(|s| s.name == name) {
                return Some(slot);
            }
        }
        None
    }
}

fn frame_contains(frame: &Frame, name: &str) -> bool {
    frame
        .scopes
        .iter()
        .any(|scope| scope.slots.iter().any(|s| s.name == name))
}

fn find_in_frame_mut<'a>(frame: &'a mut Frame, name: &str) -> Option<&'a mut Slot> {
    for scope in frame.scopes.iter_mut().rev() {
        if let Some(slot) = scope.slots.iter_mut().rev().find(|s| s.name == name) {
            return Some(slot);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_hide_caller_locals_but_not_globals() {
        let mut env = EnvStack::new();
        env.declare("g", Value::Int(1), None);
        env.push_frame();
        env.declare("x", Value::Int(2), None);
        env.push_frame();
        assert_eq!(env.get("x"), None);
        assert_eq!(env.get("g"), Some(Value::Int(1)));
        env.pop_frame();
        assert_eq!(env.get("x"), Some(Value::Int(2)));
    }

    #[test]
    fn pop_scope_releases_in_reverse_declaration_order() {
        let mut env = EnvStack::new();
        env.push_frame();
        env.push_scope();
        env.declare("a", Value::Int(1), None);
        env.declare("b", Value::Int(2), None);
        let slots = env.pop_scope();
        let names: Vec<_> = slots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn set_updates_the_innermost_binding() {
        let mut env = EnvStack::new();
        env.push_frame();
        env.declare("x", Value::Int(1), None);
        env.push_scope();
        let old = env.set("x", Value::Int(5)).unwrap();
        assert_eq!(old, Value::Int(1));
        assert_eq!(env.get("x"), Some(Value::Int(5)));
    }
}
