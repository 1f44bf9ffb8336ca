pub mod chunk;
#[allow(clippy::module_inception)]
pub mod compiler;
pub mod opcode;

pub use chunk::{Chunk, Constant, FunctionConstant, PatchSlot, PLACEHOLDER};
pub use compiler::Compiler;
pub use opcode::OpCode;
