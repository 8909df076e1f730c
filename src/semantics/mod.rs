pub mod analyzer;
pub mod registry;
pub mod symbols;
pub mod types;

pub use analyzer::{analyze, Analysis, CallTarget};
pub use registry::{ClassInfo, ClassRegistry, CtorInfo, FieldInfo, MethodInfo};
pub use types::TypeDesc;
