//! vsre-script
//!
//! The live, queryable reconstruction of a compiled VesperScript unit: a
//! [`ScriptModel`] populated from a `.vsb` container (or recovered source
//! text), its base chain, and the descriptor facade the host reads.
//!
//! The model is buffer-in like the decoder underneath it: base-chain
//! resolution and text parsing go through a [`ScriptHost`] collaborator, so
//! nothing here blocks on I/O.

mod descriptor;
mod error;
mod host;
mod model;

pub use descriptor::ScriptDescriptor;
pub use error::ScriptError;
pub use host::{BaseSource, NativeOnlyHost, ScriptHost};
pub use model::{ScriptModel, DEFAULT_ORIGINAL_CLASS};
