//! Error types for the keel protocol layer.

mod kernel;
mod system;

pub use kernel::*;
pub use system::*;
