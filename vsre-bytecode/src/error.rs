#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The header names a revision with no registered decoding rules.
    /// Distinct from corruption: the container may be fine, we just don't
    /// speak this version of the format.
    #[error("unsupported container revision {revision}")]
    UnsupportedRevision { revision: u32 },

    /// A structural invariant of the binary format is violated. `offset` is
    /// the byte position where the violation was detected.
    #[error("malformed container at offset 0x{offset:X}: {reason}")]
    MalformedContainer { offset: usize, reason: String },
}

impl DecodeError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        DecodeError::MalformedContainer {
            offset,
            reason: reason.into(),
        }
    }
}
