use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::ast::{
    ClassDecl, DestructorDecl, Expr, ExprKind, Literal, Program, Span, Stmt, Type, TypeKind,
    Visibility,
};
use crate::error::{BlochError, Result};
use crate::semantics::types::TypeDesc;

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub name: String,
    pub vis: Visibility,
    pub is_static: bool,
    pub is_final: bool,
    pub tracked: bool,
    pub ty: TypeDesc,
    pub init: Option<Rc<Expr>>,
    pub declared_in: String,
    /// Slot into the object record; meaningless for statics.
    pub slot: usize,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub name: String,
    pub vis: Visibility,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    pub quantum: bool,
    pub params: Vec<TypeDesc>,
    pub param_names: Vec<String>,
    pub ret: TypeDesc,
    pub body: Option<Rc<Vec<Stmt>>>,
    pub declared_in: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct CtorInfo {
    pub vis: Visibility,
    pub params: Vec<TypeDesc>,
    pub param_names: Vec<String>,
    pub body: Option<Rc<Vec<Stmt>>>,
    pub is_default: bool,
    pub implicit: bool,
    pub declared_in: String,
    pub span: Span,
}

/// One resolved (and possibly monomorphised) class descriptor.
#[derive(Debug)]
pub struct ClassInfo {
    /// Cache key, e.g. `Box<int>`; equals `decl_name` for plain classes.
    pub key: String,
    pub decl_name: String,
    pub base: Option<String>,
    pub is_static: bool,
    pub declared_abstract: bool,
    pub type_params: Vec<String>,
    pub subst: HashMap<String, TypeDesc>,
    /// Own instance fields, declaration order.
    pub fields: Vec<Rc<FieldInfo>>,
    /// Own static fields, declaration order.
    pub statics: Vec<Rc<FieldInfo>>,
    /// Base-first concatenation of every instance field; index is the slot.
    pub all_fields: Vec<Rc<FieldInfo>>,
    pub methods: Vec<Rc<MethodInfo>>,
    pub constructors: Vec<Rc<CtorInfo>>,
    pub destructor: Option<Rc<DestructorDecl>>,
    /// (name, erased parameter list) of abstract methods with no body here.
    pub unresolved_abstract: Vec<(String, Vec<TypeDesc>)>,
    pub has_tracked_field: bool,
    pub span: Span,
}

impl ClassInfo {
    pub fn is_abstract(&self) -> bool {
        self.declared_abstract || !self.unresolved_abstract.is_empty()
    }

    pub fn desc(&self) -> TypeDesc {
        TypeDesc::Class {
            name: self.decl_name.clone(),
            args: self.type_params.iter().map(|p| self.subst[p].clone()).collect(),
        }
    }
}

/// Class registry built ahead of body analysis. Generic classes get a
/// template descriptor (type parameters left opaque); the first
/// `new C<Args>` materialises and caches a concrete descriptor.
pub struct ClassRegistry {
    decls: HashMap<String, Rc<ClassDecl>>,
    infos: RefCell<HashMap<String, Rc<ClassInfo>>>,
    root_object: Option<String>,
}

impl ClassRegistry {
    pub fn build(program: &Program) -> Result<Self> {
        let mut decls = HashMap::new();
        for class in &program.classes {
            if decls.insert(class.name.clone(), Rc::new(class.clone())).is_some() {
                return Err(BlochError::semantic(
                    class.span,
                    format!("duplicate class '{}'", class.name),
                ));
            }
        }

        let root_object = if program.has_root_object && decls.contains_key("Object") {
            Some("Object".to_string())
        } else {
            None
        };

        let registry = Self { decls, infos: RefCell::new(HashMap::new()), root_object };
        registry.check_inheritance_graph()?;
        for class in &program.classes {
            registry.template_info(&class.name, class.span)?;
        }
        Ok(registry)
    }

    pub fn root_object(&self) -> Option<&str> {
        self.root_object.as_deref()
    }

    pub fn decl(&self, name: &str) -> Option<Rc<ClassDecl>> {
        // Dotted names from qualified imports resolve by their last segment
        self.decls.get(name).cloned().or_else(|| {
            name.rsplit('.').next().and_then(|last| self.decls.get(last).cloned())
        })
    }

    pub fn is_class_name(&self, name: &str) -> bool {
        self.decl(name).is_some()
    }

    pub fn info(&self, key: &str) -> Option<Rc<ClassInfo>> {
        self.infos.borrow().get(key).cloned()
    }

    /// Inheritance must be single-parent and acyclic, checked on declared
    /// names before any descriptor is built.
    fn check_inheritance_graph(&self) -> Result<()> {
        for (name, decl) in &self.decls {
            let mut seen = HashSet::new();
            seen.insert(name.clone());
            let mut current = decl.clone();
            loop {
                let base_name = match base_decl_name(&current) {
                    Some(n) => n,
                    None => break,
                };
                if current.type_params.iter().any(|p| p.name == base_name) {
                    return Err(BlochError::semantic(
                        current.span,
                        format!("class '{}' cannot extend its own type parameter", current.name),
                    ));
                }
                let base = self.decl(&base_name).ok_or_else(|| {
                    BlochError::semantic(
                        current.span,
                        format!("unknown base class '{}'", base_name),
                    )
                })?;
                if !seen.insert(base.name.clone()) {
                    return Err(BlochError::semantic(
                        decl.span,
                        format!("inheritance cycle involving class '{}'", name),
                    ));
                }
                current = base;
            }
        }
        Ok(())
    }

    /// The descriptor used to analyse a class body: type parameters stay
    /// opaque placeholders.
    pub fn template_info(&self, name: &str, span: Span) -> Result<Rc<ClassInfo>> {
        let decl = self.decl(name).ok_or_else(|| {
            BlochError::semantic(span, format!("unknown class '{}'", name))
        })?;
        let subst: HashMap<String, TypeDesc> = decl
            .type_params
            .iter()
            .map(|p| (p.name.clone(), TypeDesc::Class { name: p.name.clone(), args: vec![] }))
            .collect();
        let key = decl.name.clone();
        self.build_info(key, decl, subst)
    }

    /// Materialises (or fetches from cache) a concrete descriptor for
    /// `name<args>`, checking arity and upper bounds.
    pub fn instantiate(&self, name: &str, args: &[TypeDesc], span: Span) -> Result<Rc<ClassInfo>> {
        let decl = self.decl(name).ok_or_else(|| {
            BlochError::semantic(span, format!("unknown class '{}'", name))
        })?;
        if decl.type_params.len() != args.len() {
            return Err(BlochError::semantic(
                span,
                format!(
                    "class '{}' expects {} type argument(s), got {}",
                    decl.name,
                    decl.type_params.len(),
                    args.len()
                ),
            ));
        }

        let subst: HashMap<String, TypeDesc> = decl
            .type_params
            .iter()
            .zip(args.iter())
            .map(|(p, a)| (p.name.clone(), a.clone()))
            .collect();

        // Every argument must satisfy the parameter's declared upper bound.
        // Placeholder arguments (type parameters of an enclosing template)
        // are checked when they are themselves substituted.
        for (param, arg) in decl.type_params.iter().zip(args.iter()) {
            if let Some(bound) = &param.bound {
                let placeholder = matches!(
                    arg,
                    TypeDesc::Class { name, args } if args.is_empty() && self.decl(name).is_none()
                );
                if placeholder {
                    continue;
                }
                let bound_desc = self.resolve_type(bound, &subst)?;
                if !self.assignable(arg, &bound_desc) {
                    return Err(BlochError::semantic(
                        span,
                        format!(
                            "type argument '{}' does not satisfy bound '{}' of parameter '{}'",
                            arg, bound_desc, param.name
                        ),
                    ));
                }
            }
        }

        let key = class_key(&decl.name, args);
        self.build_info(key, decl, subst)
    }

    pub fn info_for(&self, desc: &TypeDesc, span: Span) -> Result<Rc<ClassInfo>> {
        match desc {
            TypeDesc::Class { name, args } => {
                if args.is_empty() {
                    if let Some(info) = self.info(name) {
                        return Ok(info);
                    }
                    self.template_info(name, span)
                } else {
                    self.instantiate(name, args, span)
                }
            }
            other => Err(BlochError::semantic(span, format!("'{}' is not a class type", other))),
        }
    }

    /// Resolves a syntactic type against the registry and a type-parameter
    /// substitution.
    pub fn resolve_type(&self, ty: &Type, subst: &HashMap<String, TypeDesc>) -> Result<TypeDesc> {
        match &ty.kind {
            TypeKind::Primitive(p) => Ok(TypeDesc::from_primitive(*p)),
            TypeKind::Named { name, args } => {
                if let Some(desc) = subst.get(name) {
                    if !args.is_empty() {
                        return Err(BlochError::semantic(
                            ty.span,
                            format!("type parameter '{}' takes no type arguments", name),
                        ));
                    }
                    return Ok(desc.clone());
                }
                let decl = self.decl(name).ok_or_else(|| {
                    BlochError::semantic(ty.span, format!("unknown type '{}'", name))
                })?;
                if decl.type_params.len() != args.len() {
                    return Err(BlochError::semantic(
                        ty.span,
                        format!(
                            "class '{}' expects {} type argument(s), got {}",
                            decl.name,
                            decl.type_params.len(),
                            args.len()
                        ),
                    ));
                }
                let resolved: Result<Vec<TypeDesc>> =
                    args.iter().map(|a| self.resolve_type(a, subst)).collect();
                Ok(TypeDesc::Class { name: decl.name.clone(), args: resolved? })
            }
            TypeKind::Array { elem, size, resolved_size } => {
                let elem_desc = self.resolve_type(elem, subst)?;
                if matches!(elem_desc, TypeDesc::Array { .. }) {
                    return Err(BlochError::semantic(
                        ty.span,
                        "multi-dimensional arrays are not supported",
                    ));
                }
                let resolved = match resolved_size.get() {
                    Some(n) => Some(n),
                    None => match size {
                        Some(expr) => literal_int(expr).and_then(|n| usize::try_from(n).ok()),
                        None => None,
                    },
                };
                Ok(TypeDesc::Array { elem: Box::new(elem_desc), size: resolved })
            }
        }
    }

    fn build_info(
        &self,
        key: String,
        decl: Rc<ClassDecl>,
        subst: HashMap<String, TypeDesc>,
    ) -> Result<Rc<ClassInfo>> {
        if let Some(info) = self.info(&key) {
            return Ok(info);
        }

        // Base descriptor first; the chain is finite by the graph check
        let base_info = match &decl.base {
            Some(base_ty) => {
                let desc = self.resolve_type(base_ty, &subst)?;
                let TypeDesc::Class { name, args } = &desc else {
                    return Err(BlochError::semantic(
                        base_ty.span,
                        format!("base type '{}' is not a class", desc),
                    ));
                };
                let base_decl = self.decl(name).ok_or_else(|| {
                    BlochError::semantic(base_ty.span, format!("unknown base class '{}'", name))
                })?;
                if base_decl.is_static {
                    return Err(BlochError::semantic(
                        base_ty.span,
                        format!("cannot extend static class '{}'", base_decl.name),
                    ));
                }
                Some(if args.is_empty() && !base_decl.type_params.is_empty() {
                    return Err(BlochError::semantic(
                        base_ty.span,
                        format!("generic base class '{}' requires type arguments", base_decl.name),
                    ));
                } else if args.is_empty() {
                    self.template_info(name, base_ty.span)?
                } else {
                    self.instantiate(name, args, base_ty.span)?
                })
            }
            None => match &self.root_object {
                Some(root) if *root != decl.name => Some(self.template_info(root, decl.span)?),
                _ => None,
            },
        };

        let info = self.build_members(key, &decl, subst, base_info)?;
        let info = Rc::new(info);
        self.infos.borrow_mut().insert(info.key.clone(), info.clone());
        Ok(info)
    }

    fn build_members(
        &self,
        key: String,
        decl: &ClassDecl,
        subst: HashMap<String, TypeDesc>,
        base_info: Option<Rc<ClassInfo>>,
    ) -> Result<ClassInfo> {
        if decl.destructors.len() > 1 {
            return Err(BlochError::semantic(
                decl.destructors[1].span,
                format!("class '{}' declares more than one destructor", decl.name),
            ));
        }
        if decl.is_static {
            if let Some(dtor) = decl.destructors.first() {
                return Err(BlochError::semantic(
                    dtor.span,
                    format!("static class '{}' cannot declare a destructor", decl.name),
                ));
            }
            if let Some(ctor) = decl.constructors.first() {
                return Err(BlochError::semantic(
                    ctor.span,
                    format!("static class '{}' cannot declare constructors", decl.name),
                ));
            }
        }

        let base_fields = base_info.as_ref().map_or(0, |b| b.all_fields.len());
        let mut fields: Vec<Rc<FieldInfo>> = Vec::new();
        let mut statics: Vec<Rc<FieldInfo>> = Vec::new();
        let mut seen_fields: HashSet<String> = HashSet::new();

        for field in &decl.fields {
            if decl.is_static && !field.is_static {
                return Err(BlochError::semantic(
                    field.span,
                    format!("static class '{}' cannot declare instance field '{}'", decl.name, field.name),
                ));
            }
            if !seen_fields.insert(field.name.clone()) {
                return Err(BlochError::semantic(
                    field.span,
                    format!("duplicate field '{}' in class '{}'", field.name, decl.name),
                ));
            }
            if let Some(base) = &base_info {
                if self.find_field(base, &field.name).is_some() {
                    return Err(BlochError::semantic(
                        field.span,
                        format!("field '{}' is already declared in a base class", field.name),
                    ));
                }
            }
            let ty = self.resolve_type(&field.ty, &subst)?;
            if ty == TypeDesc::Void {
                return Err(BlochError::semantic(field.span, "a field cannot have type 'void'"));
            }
            if field.tracked && !(ty == TypeDesc::Qubit || ty.is_qubit_array()) {
                return Err(BlochError::semantic(
                    field.span,
                    "'@tracked' is only valid on qubit or qubit-array fields",
                ));
            }
            if field.is_static && field.is_final && field.init.is_none() {
                return Err(BlochError::semantic(
                    field.span,
                    format!("final static field '{}' requires a declaration initialiser", field.name),
                ));
            }
            let info = FieldInfo {
                name: field.name.clone(),
                vis: field.vis,
                is_static: field.is_static,
                is_final: field.is_final,
                tracked: field.tracked,
                ty,
                init: field.init.clone().map(Rc::new),
                declared_in: key.clone(),
                slot: if field.is_static { usize::MAX } else { base_fields + fields.len() },
                span: field.span,
            };
            if field.is_static {
                statics.push(Rc::new(info));
            } else {
                fields.push(Rc::new(info));
            }
        }

        let mut methods: Vec<Rc<MethodInfo>> = Vec::new();
        for method in &decl.methods {
            if decl.is_static && !method.is_static {
                return Err(BlochError::semantic(
                    method.span,
                    format!("static class '{}' cannot declare instance method '{}'", decl.name, method.name),
                ));
            }
            if method.is_static && (method.is_virtual || method.is_override) {
                return Err(BlochError::semantic(
                    method.span,
                    format!("static method '{}' cannot be virtual or override", method.name),
                ));
            }
            let mut params = Vec::new();
            for param in &method.params {
                let ty = self.resolve_type(&param.ty, &subst)?;
                if ty == TypeDesc::Void {
                    return Err(BlochError::semantic(
                        param.span,
                        format!("parameter '{}' cannot have type 'void'", param.name),
                    ));
                }
                params.push(ty.erased());
            }
            let ret = self.resolve_type(&method.return_type, &subst)?;
            if method.quantum
                && !(ret == TypeDesc::Bit || ret == TypeDesc::Void || ret.is_bit_array())
            {
                return Err(BlochError::semantic(
                    method.span,
                    format!(
                        "'@quantum' method '{}' must return 'bit', 'bit[]' or 'void', not '{}'",
                        method.name, ret
                    ),
                ));
            }
            if methods.iter().any(|m| m.name == method.name && m.params == params) {
                return Err(BlochError::semantic(
                    method.span,
                    format!("duplicate method '{}' with identical parameter types", method.name),
                ));
            }
            if method.body.is_none() && !method.is_virtual {
                return Err(BlochError::semantic(
                    method.span,
                    format!("method '{}' without a body must be virtual", method.name),
                ));
            }
            methods.push(Rc::new(MethodInfo {
                name: method.name.clone(),
                vis: method.vis,
                is_static: method.is_static,
                is_virtual: method.is_virtual,
                is_override: method.is_override,
                quantum: method.quantum,
                params,
                param_names: method.params.iter().map(|p| p.name.clone()).collect(),
                ret,
                body: method.body.clone().map(Rc::new),
                declared_in: key.clone(),
                span: method.span,
            }));
        }

        // An `override` must find a matching virtual somewhere up the chain
        for method in &methods {
            if method.is_override {
                let found = base_info.as_ref().and_then(|base| {
                    self.find_virtual(base, &method.name, &method.params)
                });
                match found {
                    Some(target) if target.ret == method.ret => {}
                    Some(target) => {
                        return Err(BlochError::semantic(
                            method.span,
                            format!(
                                "override of '{}' changes the return type from '{}' to '{}'",
                                method.name, target.ret, method.ret
                            ),
                        ));
                    }
                    None => {
                        return Err(BlochError::semantic(
                            method.span,
                            format!("no virtual method '{}' with this signature to override", method.name),
                        ));
                    }
                }
            }
        }

        // Unresolved abstract methods: inherited plus own bodyless virtuals,
        // minus signatures implemented with a body in this class
        let mut unresolved: Vec<(String, Vec<TypeDesc>)> = base_info
            .as_ref()
            .map(|b| b.unresolved_abstract.clone())
            .unwrap_or_default();
        for method in &methods {
            if method.is_virtual && method.body.is_none() {
                unresolved.push((method.name.clone(), method.params.clone()));
            }
        }
        unresolved.retain(|(name, params)| {
            !methods.iter().any(|m| m.body.is_some() && m.name == *name && m.params == *params)
        });

        let mut constructors: Vec<Rc<CtorInfo>> = Vec::new();
        for ctor in &decl.constructors {
            let mut params = Vec::new();
            for param in &ctor.params {
                let ty = self.resolve_type(&param.ty, &subst)?;
                if ty == TypeDesc::Void {
                    return Err(BlochError::semantic(
                        param.span,
                        format!("parameter '{}' cannot have type 'void'", param.name),
                    ));
                }
                params.push(ty.erased());
            }
            if constructors.iter().any(|c| c.params == params) {
                return Err(BlochError::semantic(
                    ctor.span,
                    "duplicate constructor with identical parameter types",
                ));
            }
            constructors.push(Rc::new(CtorInfo {
                vis: ctor.vis,
                params,
                param_names: ctor.params.iter().map(|p| p.name.clone()).collect(),
                body: ctor.body.clone().map(Rc::new),
                is_default: ctor.is_default,
                implicit: false,
                declared_in: key.clone(),
                span: ctor.span,
            }));
        }
        if constructors.is_empty() && !decl.is_static {
            constructors.push(Rc::new(CtorInfo {
                vis: Visibility::Public,
                params: Vec::new(),
                param_names: Vec::new(),
                body: None,
                is_default: false,
                implicit: true,
                declared_in: key.clone(),
                span: decl.span,
            }));
        }

        let mut all_fields: Vec<Rc<FieldInfo>> =
            base_info.as_ref().map(|b| b.all_fields.clone()).unwrap_or_default();
        all_fields.extend(fields.iter().cloned());

        // A `= default` constructor must map each parameter onto a field
        for (ctor, decl_ctor) in constructors.iter().zip(decl.constructors.iter()) {
            if !ctor.is_default {
                continue;
            }
            for (ty, name) in ctor.params.iter().zip(ctor.param_names.iter()) {
                let matches = all_fields
                    .iter()
                    .any(|f| f.name == *name && f.ty.erased() == *ty);
                if !matches {
                    return Err(BlochError::semantic(
                        decl_ctor.span,
                        format!(
                            "'= default' constructor parameter '{}' does not match any field",
                            name
                        ),
                    ));
                }
            }
        }

        let has_tracked_field = all_fields.iter().any(|f| f.tracked);

        Ok(ClassInfo {
            key,
            decl_name: decl.name.clone(),
            base: base_info.map(|b| b.key.clone()),
            is_static: decl.is_static,
            declared_abstract: decl.is_abstract,
            type_params: decl.type_params.iter().map(|p| p.name.clone()).collect(),
            subst,
            fields,
            statics,
            all_fields,
            methods,
            constructors,
            destructor: decl.destructors.first().cloned().map(Rc::new),
            unresolved_abstract: unresolved,
            has_tracked_field,
            span: decl.span,
        })
    }

    // ---- chain walking ----

    pub fn base_of(&self, info: &ClassInfo) -> Option<Rc<ClassInfo>> {
        info.base.as_ref().and_then(|key| self.info(key))
    }

    /// Finds a field by name, returning the class that *declares* it so
    /// visibility is checked against the right class.
    pub fn find_field(&self, info: &Rc<ClassInfo>, name: &str) -> Option<(Rc<ClassInfo>, Rc<FieldInfo>)> {
        let mut current = Some(info.clone());
        while let Some(class) = current {
            let found = class
                .all_fields
                .iter()
                .find(|f| f.name == name)
                .or_else(|| class.statics.iter().find(|f| f.name == name))
                .cloned();
            if let Some(field) = found {
                let declaring = self.info(&field.declared_in).unwrap_or(class);
                return Some((declaring, field));
            }
            current = self.base_of(&class);
        }
        None
    }

    pub fn find_methods(&self, info: &Rc<ClassInfo>, name: &str) -> Vec<(Rc<ClassInfo>, Rc<MethodInfo>)> {
        let mut found: Vec<(Rc<ClassInfo>, Rc<MethodInfo>)> = Vec::new();
        let mut current = Some(info.clone());
        while let Some(class) = current {
            for method in class.methods.iter().filter(|m| m.name == name) {
                // A derived declaration with the same signature hides the base one
                if !found.iter().any(|(_, m)| m.params == method.params) {
                    found.push((class.clone(), method.clone()));
                }
            }
            current = self.base_of(&class);
        }
        found
    }

    fn find_virtual(&self, start: &Rc<ClassInfo>, name: &str, params: &[TypeDesc]) -> Option<Rc<MethodInfo>> {
        let mut current = Some(start.clone());
        while let Some(class) = current {
            if let Some(m) = class
                .methods
                .iter()
                .find(|m| m.is_virtual && m.name == name && m.params == *params)
            {
                return Some(m.clone());
            }
            current = self.base_of(&class);
        }
        None
    }

    pub fn is_subclass(&self, derived: &TypeDesc, base: &TypeDesc) -> bool {
        let (Some(from), Some(to)) = (derived.class_key(), base.class_key()) else {
            return false;
        };
        if from == to {
            return true;
        }
        let mut current = self.info(&from);
        while let Some(class) = current {
            if class.key == to {
                return true;
            }
            current = self.base_of(&class);
        }
        false
    }

    /// Assignability: identical types, `null` into any reference, a derived
    /// reference into a base-typed slot, and arrays of the same element
    /// kind regardless of declared size.
    pub fn assignable(&self, value: &TypeDesc, target: &TypeDesc) -> bool {
        if value.erased() == target.erased() {
            return true;
        }
        match (value, target) {
            (TypeDesc::Null, TypeDesc::Class { .. }) => true,
            (TypeDesc::Class { .. }, TypeDesc::Class { .. }) => self.is_subclass(value, target),
            _ => false,
        }
    }

    /// Ranks overloads: exact match on every parameter first, then the most
    /// specific assignable candidate.
    pub fn pick_overload(&self, args: &[TypeDesc], candidates: &[Vec<TypeDesc>]) -> OverloadChoice {
        let arity: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, sig)| sig.len() == args.len())
            .map(|(i, _)| i)
            .collect();

        for &i in &arity {
            let exact = candidates[i]
                .iter()
                .zip(args.iter())
                .all(|(param, arg)| param.erased() == arg.erased());
            if exact {
                return OverloadChoice::Unique(i);
            }
        }

        let applicable: Vec<usize> = arity
            .into_iter()
            .filter(|&i| {
                candidates[i]
                    .iter()
                    .zip(args.iter())
                    .all(|(param, arg)| self.assignable(arg, param))
            })
            .collect();

        match applicable.len() {
            0 => OverloadChoice::None,
            1 => OverloadChoice::Unique(applicable[0]),
            _ => {
                let most_specific: Vec<usize> = applicable
                    .iter()
                    .copied()
                    .filter(|&a| {
                        applicable.iter().all(|&b| {
                            a == b
                                || candidates[a]
                                    .iter()
                                    .zip(candidates[b].iter())
                                    .all(|(pa, pb)| self.assignable(pa, pb))
                        })
                    })
                    .collect();
                if most_specific.len() == 1 {
                    OverloadChoice::Unique(most_specific[0])
                } else {
                    OverloadChoice::Ambiguous
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadChoice {
    Unique(usize),
    Ambiguous,
    None,
}

fn base_decl_name(decl: &ClassDecl) -> Option<String> {
    decl.base.as_ref().and_then(|ty| match &ty.kind {
        TypeKind::Named { name, .. } => Some(name.clone()),
        _ => None,
    })
}

pub fn class_key(name: &str, args: &[TypeDesc]) -> String {
    if args.is_empty() {
        name.to_string()
    } else {
        let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
        format!("{}<{}>", name, rendered.join(", "))
    }
}

/// Folds size expressions built from integer literals; anything involving
/// names needs the analyser's symbol table.
fn literal_int(expr: &Expr) -> Option<i64> {
    match &expr.kind {
        ExprKind::Literal(Literal::Int(n)) | ExprKind::Literal(Literal::Long(n)) => Some(*n),
        ExprKind::Unary { op: crate::ast::UnaryOp::Neg, operand } => literal_int(operand).map(|n| -n),
        ExprKind::Binary { op, lhs, rhs } => {
            let a = literal_int(lhs)?;
            let b = literal_int(rhs)?;
            match op {
                crate::ast::BinaryOp::Add => Some(a + b),
                crate::ast::BinaryOp::Sub => Some(a - b),
                crate::ast::BinaryOp::Mul => Some(a * b),
                crate::ast::BinaryOp::Div if b != 0 => Some(a / b),
                _ => None,
            }
        }
        _ => None,
    }
}
