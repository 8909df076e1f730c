use std::fmt;

use crate::ast::Primitive;

/// Resolved type descriptor used for signature comparison, overload
/// resolution and assignability checks. Array sizes are erased in
/// signatures; `Null` is the type of the `null` literal and only ever
/// assignable to class references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDesc {
    Int,
    Long,
    Float,
    Bit,
    Boolean,
    Char,
    Str,
    Qubit,
    Void,
    Class { name: String, args: Vec<TypeDesc> },
    Array { elem: Box<TypeDesc>, size: Option<usize> },
    Null,
}

impl TypeDesc {
    pub fn from_primitive(p: Primitive) -> Self {
        match p {
            Primitive::Int => TypeDesc::Int,
            Primitive::Long => TypeDesc::Long,
            Primitive::Float => TypeDesc::Float,
            Primitive::Bit => TypeDesc::Bit,
            Primitive::Boolean => TypeDesc::Boolean,
            Primitive::Char => TypeDesc::Char,
            Primitive::String => TypeDesc::Str,
            Primitive::Qubit => TypeDesc::Qubit,
            Primitive::Void => TypeDesc::Void,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeDesc::Int | TypeDesc::Long | TypeDesc::Float)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, TypeDesc::Int | TypeDesc::Long)
    }

    pub fn is_class(&self) -> bool {
        matches!(self, TypeDesc::Class { .. })
    }

    pub fn is_qubit_array(&self) -> bool {
        matches!(self, TypeDesc::Array { elem, .. } if **elem == TypeDesc::Qubit)
    }

    pub fn is_bit_array(&self) -> bool {
        matches!(self, TypeDesc::Array { elem, .. } if **elem == TypeDesc::Bit)
    }

    /// The cache key for a class descriptor, e.g. `Box<int>`.
    pub fn class_key(&self) -> Option<String> {
        match self {
            TypeDesc::Class { .. } => Some(self.to_string()),
            _ => None,
        }
    }

    /// Drops array sizes so parameter lists compare structurally.
    pub fn erased(&self) -> TypeDesc {
        match self {
            TypeDesc::Array { elem, .. } => {
                TypeDesc::Array { elem: Box::new(elem.erased()), size: None }
            }
            TypeDesc::Class { name, args } => TypeDesc::Class {
                name: name.clone(),
                args: args.iter().map(TypeDesc::erased).collect(),
            },
            other => other.clone(),
        }
    }

    /// Replaces type-parameter placeholders using `subst`.
    pub fn substitute(&self, subst: &std::collections::HashMap<String, TypeDesc>) -> TypeDesc {
        match self {
            TypeDesc::Class { name, args } if args.is_empty() => {
                subst.get(name).cloned().unwrap_or_else(|| self.clone())
            }
            TypeDesc::Class { name, args } => TypeDesc::Class {
                name: name.clone(),
                args: args.iter().map(|a| a.substitute(subst)).collect(),
            },
            TypeDesc::Array { elem, size } => {
                TypeDesc::Array { elem: Box::new(elem.substitute(subst)), size: *size }
            }
            other => other.clone(),
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Int => write!(f, "int"),
            TypeDesc::Long => write!(f, "long"),
            TypeDesc::Float => write!(f, "float"),
            TypeDesc::Bit => write!(f, "bit"),
            TypeDesc::Boolean => write!(f, "boolean"),
            TypeDesc::Char => write!(f, "char"),
            TypeDesc::Str => write!(f, "string"),
            TypeDesc::Qubit => write!(f, "qubit"),
            TypeDesc::Void => write!(f, "void"),
            TypeDesc::Null => write!(f, "null"),
            TypeDesc::Class { name, args } => {
                if args.is_empty() {
                    write!(f, "{}", name)
                } else {
                    let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
                    write!(f, "{}<{}>", name, rendered.join(", "))
                }
            }
            TypeDesc::Array { elem, size } => match size {
                Some(n) => write!(f, "{}[{}]", elem, n),
                None => write!(f, "{}[]", elem),
            },
        }
    }
}
