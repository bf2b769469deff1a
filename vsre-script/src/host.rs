use anyhow::{bail, Result};
use bytes::Bytes;
use vsre_bytecode::DecodedUnit;

/// Where a declared base type resolves to.
pub enum BaseSource {
    /// A host-native type. Terminates the chain successfully; nothing is
    /// decoded for it.
    Native,
    /// Another compiled unit, to be decoded and reloaded recursively.
    Binary(Bytes),
    /// Recovered/overridden source text for the base unit.
    Text(String),
}

/// Host hooks the reload orchestrator depends on.
///
/// This keeps the model independent from the host's resource system while
/// still enabling:
/// - base-chain resolution (fetching sibling units by type name)
/// - text-backed models (the scripting language's own front end)
pub trait ScriptHost {
    /// Resolve a declared base type name to its source.
    fn resolve_base(&self, name: &str) -> Result<BaseSource>;

    /// Parse source text into unit structure. Only needed for text-backed
    /// models; the default refuses.
    fn parse_source(&self, _source: &str) -> Result<DecodedUnit> {
        bail!("no language front end available")
    }
}

/// A host that treats every base type as native.
///
/// Good enough for shallow structural queries and standalone tooling, where
/// sibling units are not available for fetching.
pub struct NativeOnlyHost;

impl ScriptHost for NativeOnlyHost {
    fn resolve_base(&self, _name: &str) -> Result<BaseSource> {
        Ok(BaseSource::Native)
    }
}
