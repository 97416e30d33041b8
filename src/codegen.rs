//! Code construction substrate: identifiers, typed IR, the block builder and
//! the scopes that allocate names and inject external values.
pub mod builder;
pub mod code;
pub mod name;
mod render;
pub mod scope;

pub use builder::{BlockKind, CodeBuilder};
pub use code::{BinOp, Expr, Function, JsonType, Stmt};
pub use name::Name;
pub use scope::{Checkpoint, Finalized, Scope, Slot, ValueCode, ValueDescriptor, ValueScope};
