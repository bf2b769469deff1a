use vsre_bytecode::DecodeError;

#[derive(thiserror::Error, Debug)]
pub enum ScriptError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The base chain would revisit a unit already mid-resolution.
    /// Malformed input data, not a transient condition.
    #[error("cyclic inheritance: base chain revisits {name:?}")]
    CyclicInheritance { name: String },

    /// Reload requested while one is already in progress. Retryable.
    #[error("reload already in progress")]
    Busy,

    /// The operation needs a configured (binary) backing and none is set.
    #[error("no decodable source is configured")]
    MissingSource,

    #[error("unknown subclass {name:?}")]
    UnknownSubclass { name: String },

    /// Failure reported by the host collaborator (base resolution or the
    /// language front end).
    #[error("front end failure: {0}")]
    FrontEnd(anyhow::Error),

    /// Caller error on `get_static`; not a decode failure.
    #[error("static variable index {index} out of range (count={count})")]
    IndexOutOfRange { index: usize, count: usize },
}
