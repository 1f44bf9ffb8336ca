pub mod value;
#[allow(clippy::module_inception)]
pub mod vm;

pub use value::{Closure, ScopeFrame, Value};
pub use vm::VM;
