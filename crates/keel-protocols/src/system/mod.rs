//! System protocol definitions.
//!
//! A system is any `Send + Sync` value the kernel constructs, wires, and
//! drives. Its optional behaviours are exposed as capability traits which
//! the [`System`] trait hands out through `as_*` accessors.

mod capability;
mod inject;
mod key;
mod state;
mod traits;

pub use capability::*;
pub use inject::*;
pub use key::*;
pub use state::*;
pub use traits::*;
