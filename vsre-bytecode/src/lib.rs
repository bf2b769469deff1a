//! vsre-bytecode
//!
//! Parsing of compiled VesperScript containers (`.vsb`) back into their
//! structural form, across the historical revisions of the format.
//!
//! This crate is buffer-in, structure-out: it never touches the file system
//! and never executes anything. Feed it bytes, get a [`DecodedUnit`] (or a
//! [`DecodeError`] telling you where the container went wrong).

mod builder;
mod decode;
mod error;
mod revision;
mod unit;
mod value;

pub use builder::ContainerBuilder;
pub use decode::{decode, CONTAINER_MAGIC, HEADER_LEN};
pub use error::DecodeError;
pub use revision::{rules_for, RevisionRules, LATEST_REVISION};
pub use unit::{DecodedUnit, SubclassRange};
pub use value::Value;
