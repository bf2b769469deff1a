use vsre_nls::Encoding;

use crate::error::DecodeError;

/// Decoding rules for one historical revision of the container format.
///
/// Rules are pure data: the decoder branches on these fields instead of
/// hard-coding per-revision paths. Registered once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionRules {
    pub id: u32,

    /// Encoding of the identifier pool and string constants.
    pub ident_encoding: Encoding,

    /// Revision 1 toolchains wrote u16 element counts; later ones u32.
    pub wide_counts: bool,

    /// Whether this revision retains enough debug info to recover source
    /// text. Revisions without it still decode structurally.
    pub source_recovery: bool,

    /// Revision 3 added a (reserved) u32 flags field to each nested-class
    /// index entry.
    pub subclass_entry_flags: bool,
}

pub const LATEST_REVISION: u32 = 3;

lazy_static::lazy_static! {
    static ref REVISIONS: Vec<RevisionRules> = vec![
        RevisionRules {
            id: 1,
            ident_encoding: Encoding::Latin1,
            wide_counts: false,
            source_recovery: false,
            subclass_entry_flags: false,
        },
        RevisionRules {
            id: 2,
            ident_encoding: Encoding::Utf8,
            wide_counts: true,
            source_recovery: true,
            subclass_entry_flags: false,
        },
        RevisionRules {
            id: 3,
            ident_encoding: Encoding::Utf8,
            wide_counts: true,
            source_recovery: true,
            subclass_entry_flags: true,
        },
    ];
}

/// Look up the decoding rules for `revision`.
pub fn rules_for(revision: u32) -> Result<&'static RevisionRules, DecodeError> {
    REVISIONS
        .iter()
        .find(|r| r.id == revision)
        .ok_or(DecodeError::UnsupportedRevision { revision })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_revisions_resolve() {
        for id in 1..=LATEST_REVISION {
            let rules = rules_for(id).unwrap();
            assert_eq!(rules.id, id);
        }
    }

    #[test]
    fn unknown_revision_is_distinct_from_malformed() {
        let err = rules_for(99).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnsupportedRevision { revision: 99 }
        ));
    }

    #[test]
    fn only_later_revisions_recover_source() {
        assert!(!rules_for(1).unwrap().source_recovery);
        assert!(rules_for(2).unwrap().source_recovery);
    }
}
