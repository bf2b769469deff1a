use vsre_nls::{Decoder as NlsDecoder, TextDecoder};

use crate::error::DecodeError;
use crate::revision::{rules_for, RevisionRules};
use crate::unit::{DecodedUnit, SubclassRange};
use crate::value::{Value, TAG_BOOL, TAG_FLOAT, TAG_INT, TAG_NIL, TAG_STR};

pub const CONTAINER_MAGIC: &[u8; 4] = b"VSBC";
pub const HEADER_LEN: usize = 12;

pub(crate) const FLAG_TOOL: u32 = 1 << 0;
pub(crate) const FLAG_ABSTRACT: u32 = 1 << 1;

pub(crate) const SEC_CONSTANTS: u16 = 0x01;
pub(crate) const SEC_IDENTIFIERS: u16 = 0x02;
pub(crate) const SEC_CLASS_DECL: u16 = 0x03;
pub(crate) const SEC_MEMBERS: u16 = 0x04;
pub(crate) const SEC_SUBCLASSES: u16 = 0x05;
pub(crate) const SEC_SOURCE: u16 = 0x06;

/// Identifier-pool index meaning "no identifier".
pub(crate) const NO_IDENT: u32 = u32::MAX;

/// Bounds-checked reader over one slice of the container.
///
/// `base` is the slice's offset inside the outer buffer, so every error
/// carries an absolute byte offset.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], base: usize) -> Self {
        Self { buf, pos: 0, base }
    }

    #[inline]
    fn offset(&self) -> usize {
        self.base + self.pos
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::malformed(
                self.offset(),
                format!(
                    "unexpected end of section while reading {} ({} bytes needed, {} left)",
                    what,
                    n,
                    self.remaining()
                ),
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self, what: &str) -> Result<u8, DecodeError> {
        Ok(self.take(1, what)?[0])
    }

    fn read_u16(&mut self, what: &str) -> Result<u16, DecodeError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self, what: &str) -> Result<u32, DecodeError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self, what: &str) -> Result<i64, DecodeError> {
        let b = self.take(8, what)?;
        Ok(i64::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_f64(&mut self, what: &str) -> Result<f64, DecodeError> {
        let b = self.take(8, what)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }

    /// Element count; revision 1 toolchains wrote u16, later ones u32.
    fn read_count(&mut self, rules: &RevisionRules, what: &str) -> Result<u32, DecodeError> {
        if rules.wide_counts {
            self.read_u32(what)
        } else {
            Ok(self.read_u16(what)? as u32)
        }
    }

    /// Length-prefixed string in the revision's identifier encoding.
    fn read_string(
        &mut self,
        nls: &NlsDecoder,
        what: &str,
    ) -> Result<String, DecodeError> {
        let len = self.read_u32(what)? as usize;
        let bytes = self.take(len, what)?;
        Ok(nls.decode(bytes).into_owned())
    }
}

struct Section {
    tag: u16,
    start: usize,
    end: usize,
}

/// Decode one container buffer into its structural form.
///
/// `pinned_revision` (non-zero) bypasses the header's revision field; the
/// magic marker is always enforced. Unknown section tags are skipped,
/// provided their length fields are in range.
pub fn decode(buffer: &[u8], pinned_revision: Option<u32>) -> Result<DecodedUnit, DecodeError> {
    if buffer.len() < HEADER_LEN {
        return Err(DecodeError::malformed(
            0,
            format!(
                "buffer too small for header: {} bytes, need {}",
                buffer.len(),
                HEADER_LEN
            ),
        ));
    }
    if &buffer[0..4] != CONTAINER_MAGIC {
        return Err(DecodeError::malformed(0, "bad magic marker"));
    }

    let header_revision = u32::from_le_bytes(buffer[4..8].try_into().unwrap());
    let flags = u32::from_le_bytes(buffer[8..12].try_into().unwrap());

    let revision = match pinned_revision {
        Some(rev) if rev != 0 => rev,
        _ => header_revision,
    };
    let rules = rules_for(revision)?;
    let nls = NlsDecoder::new(rules.ident_encoding);

    let sections = walk_sections(buffer)?;

    let constants = match find(&sections, SEC_CONSTANTS) {
        Some(s) => parse_constants(buffer, s, rules, &nls)?,
        None => Vec::new(),
    };
    let idents = match find(&sections, SEC_IDENTIFIERS) {
        Some(s) => parse_identifiers(buffer, s, rules, &nls)?,
        None => Vec::new(),
    };

    let (base_type_name, local_name, global_name) = match find(&sections, SEC_CLASS_DECL) {
        Some(s) => parse_class_decl(buffer, s, &idents)?,
        None => (String::new(), String::new(), String::new()),
    };

    let (members, static_variables) = match find(&sections, SEC_MEMBERS) {
        Some(s) => parse_members(buffer, s, rules, &idents, &constants)?,
        None => (Vec::new(), Vec::new()),
    };

    let subclasses = match find(&sections, SEC_SUBCLASSES) {
        Some(s) => parse_subclasses(buffer, s, rules, &idents)?,
        None => Vec::new(),
    };

    // Source recovery is best-effort: a broken debug section never fails
    // the structural decode.
    let recovered_source = if rules.source_recovery {
        match find(&sections, SEC_SOURCE) {
            Some(s) => match parse_source(buffer, s, &nls) {
                Ok(text) => Some(text),
                Err(e) => {
                    log::warn!("source recovery failed, continuing without: {}", e);
                    None
                }
            },
            None => None,
        }
    } else {
        None
    };

    Ok(DecodedUnit {
        revision,
        base_type_name,
        local_name,
        global_name,
        is_tool: flags & FLAG_TOOL != 0,
        is_abstract: flags & FLAG_ABSTRACT != 0,
        subclasses,
        members,
        static_variables,
        recovered_source,
    })
}

fn find<'s>(sections: &'s [Section], tag: u16) -> Option<&'s Section> {
    sections.iter().find(|s| s.tag == tag)
}

fn is_known_tag(tag: u16) -> bool {
    (SEC_CONSTANTS..=SEC_SOURCE).contains(&tag)
}

/// First pass: collect section extents, skipping tags we don't understand.
/// Sections are processed afterwards in a fixed logical order, so a
/// reordered (but well-formed) container still decodes.
fn walk_sections(buffer: &[u8]) -> Result<Vec<Section>, DecodeError> {
    let mut sections: Vec<Section> = Vec::new();
    let mut pos = HEADER_LEN;

    while pos < buffer.len() {
        if buffer.len() - pos < 8 {
            return Err(DecodeError::malformed(pos, "truncated section header"));
        }
        let tag = u16::from_le_bytes(buffer[pos..pos + 2].try_into().unwrap());
        // pos+2..pos+4 is reserved; read and ignored.
        let payload_len =
            u32::from_le_bytes(buffer[pos + 4..pos + 8].try_into().unwrap()) as usize;

        let start = pos + 8;
        let end = match start.checked_add(payload_len) {
            Some(end) if end <= buffer.len() => end,
            _ => {
                return Err(DecodeError::malformed(
                    pos + 4,
                    format!(
                        "section 0x{:02X} payload length {} runs past end of buffer",
                        tag, payload_len
                    ),
                ));
            }
        };

        if is_known_tag(tag) {
            if sections.iter().any(|s| s.tag == tag) {
                return Err(DecodeError::malformed(
                    pos,
                    format!("duplicate section 0x{:02X}", tag),
                ));
            }
            sections.push(Section { tag, start, end });
        } else {
            log::warn!(
                "skipping unknown section 0x{:02X} at 0x{:X} ({} bytes)",
                tag,
                pos,
                payload_len
            );
        }
        pos = end;
    }

    Ok(sections)
}

fn section_reader<'a>(buffer: &'a [u8], section: &Section) -> Reader<'a> {
    Reader::new(&buffer[section.start..section.end], section.start)
}

fn parse_constants(
    buffer: &[u8],
    section: &Section,
    rules: &RevisionRules,
    nls: &NlsDecoder,
) -> Result<Vec<Value>, DecodeError> {
    let mut r = section_reader(buffer, section);
    let count = r.read_count(rules, "constant count")?;
    let mut pool = Vec::new();
    for _ in 0..count {
        let tag_off = r.offset();
        let tag = r.read_u8("constant tag")?;
        let value = match tag {
            TAG_NIL => Value::Nil,
            TAG_BOOL => Value::Bool(r.read_u8("bool constant")? != 0),
            TAG_INT => Value::Int(r.read_i64("int constant")?),
            TAG_FLOAT => Value::Float(r.read_f64("float constant")?),
            TAG_STR => Value::Str(r.read_string(nls, "string constant")?),
            other => {
                return Err(DecodeError::malformed(
                    tag_off,
                    format!("unknown constant tag {}", other),
                ));
            }
        };
        pool.push(value);
    }
    Ok(pool)
}

fn parse_identifiers(
    buffer: &[u8],
    section: &Section,
    rules: &RevisionRules,
    nls: &NlsDecoder,
) -> Result<Vec<String>, DecodeError> {
    let mut r = section_reader(buffer, section);
    let count = r.read_count(rules, "identifier count")?;
    let mut pool = Vec::new();
    for _ in 0..count {
        pool.push(r.read_string(nls, "identifier")?);
    }
    Ok(pool)
}

/// Read an identifier-pool index and resolve it. `NO_IDENT` resolves to the
/// empty string; anything else out of range is malformed.
fn read_ident(
    r: &mut Reader<'_>,
    idents: &[String],
    what: &str,
) -> Result<String, DecodeError> {
    let at = r.offset();
    let idx = r.read_u32(what)?;
    if idx == NO_IDENT {
        return Ok(String::new());
    }
    idents.get(idx as usize).cloned().ok_or_else(|| {
        DecodeError::malformed(
            at,
            format!(
                "{}: identifier index {} out of range (pool size {})",
                what,
                idx,
                idents.len()
            ),
        )
    })
}

fn parse_class_decl(
    buffer: &[u8],
    section: &Section,
    idents: &[String],
) -> Result<(String, String, String), DecodeError> {
    let mut r = section_reader(buffer, section);
    let base_type = read_ident(&mut r, idents, "base type name")?;
    let local_name = read_ident(&mut r, idents, "local name")?;
    let global_name = read_ident(&mut r, idents, "global name")?;
    Ok((base_type, local_name, global_name))
}

fn parse_members(
    buffer: &[u8],
    section: &Section,
    rules: &RevisionRules,
    idents: &[String],
    constants: &[Value],
) -> Result<(Vec<String>, Vec<Value>), DecodeError> {
    let mut r = section_reader(buffer, section);

    let member_count = r.read_count(rules, "member count")?;
    let mut members: Vec<String> = Vec::new();
    for _ in 0..member_count {
        let at = r.offset();
        let name = read_ident(&mut r, idents, "member name")?;
        if members.iter().any(|m| *m == name) {
            return Err(DecodeError::malformed(
                at,
                format!("duplicate member {:?}", name),
            ));
        }
        members.push(name);
    }

    let static_count = r.read_count(rules, "static count")?;
    let mut statics = Vec::new();
    for _ in 0..static_count {
        let at = r.offset();
        let idx = r.read_u32("static initializer index")? as usize;
        let value = constants.get(idx).cloned().ok_or_else(|| {
            DecodeError::malformed(
                at,
                format!(
                    "static initializer index {} out of range (pool size {})",
                    idx,
                    constants.len()
                ),
            )
        })?;
        statics.push(value);
    }

    Ok((members, statics))
}

fn parse_subclasses(
    buffer: &[u8],
    section: &Section,
    rules: &RevisionRules,
    idents: &[String],
) -> Result<Vec<SubclassRange>, DecodeError> {
    let mut r = section_reader(buffer, section);
    let count = r.read_count(rules, "subclass count")?;
    let mut subclasses: Vec<SubclassRange> = Vec::new();

    for _ in 0..count {
        let entry_off = r.offset();
        let name = read_ident(&mut r, idents, "subclass name")?;
        let start = r.read_u32("subclass range start")?;
        let end = r.read_u32("subclass range end")?;
        if rules.subclass_entry_flags {
            // Reserved per-entry flags, introduced by revision 3.
            let _ = r.read_u32("subclass entry flags")?;
        }

        if subclasses.iter().any(|s| s.name == name) {
            return Err(DecodeError::malformed(
                entry_off,
                format!("duplicate subclass {:?}", name),
            ));
        }
        if start > end || end as usize > buffer.len() {
            return Err(DecodeError::malformed(
                entry_off,
                format!("subclass {:?} range {}..{} out of bounds", name, start, end),
            ));
        }
        // Ranges are half-open; any two overlapping ranges are malformed.
        if let Some(other) = subclasses
            .iter()
            .find(|s| start < s.end && s.start < end)
        {
            return Err(DecodeError::malformed(
                entry_off,
                format!(
                    "subclass {:?} range {}..{} overlaps {:?} range {}..{}",
                    name, start, end, other.name, other.start, other.end
                ),
            ));
        }

        subclasses.push(SubclassRange { name, start, end });
    }

    Ok(subclasses)
}

fn parse_source(
    buffer: &[u8],
    section: &Section,
    nls: &NlsDecoder,
) -> Result<String, DecodeError> {
    let mut r = section_reader(buffer, section);
    let line_count = r.read_u32("source line count")?;
    let mut lines = Vec::new();
    for _ in 0..line_count {
        lines.push(r.read_string(nls, "source line")?);
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ContainerBuilder;

    #[test]
    fn short_buffers_are_malformed() {
        for len in 0..HEADER_LEN {
            let buf = vec![0u8; len];
            let err = decode(&buf, None).unwrap_err();
            assert!(
                matches!(err, DecodeError::MalformedContainer { .. }),
                "len={}: {:?}",
                len,
                err
            );
        }
    }

    #[test]
    fn bad_magic_is_malformed() {
        let mut buf = ContainerBuilder::new(2).build().unwrap().to_vec();
        buf[0] = b'X';
        let err = decode(&buf, None).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MalformedContainer { offset: 0, .. }
        ));
    }

    #[test]
    fn unregistered_header_revision_is_unsupported() {
        let mut buf = ContainerBuilder::new(2).build().unwrap().to_vec();
        buf[4..8].copy_from_slice(&77u32.to_le_bytes());
        let err = decode(&buf, None).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnsupportedRevision { revision: 77 }
        ));
    }

    #[test]
    fn pinned_revision_bypasses_header_field() {
        let mut buf = ContainerBuilder::new(2).build().unwrap().to_vec();
        buf[4..8].copy_from_slice(&77u32.to_le_bytes());
        let unit = decode(&buf, Some(2)).unwrap();
        assert_eq!(unit.revision, 2);
    }

    #[test]
    fn unknown_sections_are_skipped() {
        let mut buf = ContainerBuilder::new(2)
            .global_name("Widget")
            .build()
            .unwrap()
            .to_vec();
        // Append an unknown section: tag 0x7F, reserved, 3-byte payload.
        buf.extend_from_slice(&0x7Fu16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let unit = decode(&buf, None).unwrap();
        assert_eq!(unit.global_name, "Widget");
    }

    #[test]
    fn truncated_section_payload_is_malformed_at_length_field() {
        let mut buf = ContainerBuilder::new(2).build().unwrap().to_vec();
        let header_off = buf.len();
        buf.extend_from_slice(&0x7Fu16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&1000u32.to_le_bytes());

        let err = decode(&buf, None).unwrap_err();
        match err {
            DecodeError::MalformedContainer { offset, .. } => {
                assert_eq!(offset, header_off + 4)
            }
            other => panic!("expected MalformedContainer, got {:?}", other),
        }
    }

    #[test]
    fn out_of_range_identifier_index_reports_offset() {
        // Hand-build a container whose class declaration indexes an empty
        // identifier pool.
        let mut buf = Vec::new();
        buf.extend_from_slice(CONTAINER_MAGIC);
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&SEC_CLASS_DECL.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&12u32.to_le_bytes());
        let field_off = buf.len();
        buf.extend_from_slice(&5u32.to_le_bytes()); // base type: index 5, pool empty
        buf.extend_from_slice(&NO_IDENT.to_le_bytes());
        buf.extend_from_slice(&NO_IDENT.to_le_bytes());

        let err = decode(&buf, None).unwrap_err();
        match err {
            DecodeError::MalformedContainer { offset, reason } => {
                assert_eq!(offset, field_off);
                assert!(reason.contains("out of range"), "{}", reason);
            }
            other => panic!("expected MalformedContainer, got {:?}", other),
        }
    }

    #[test]
    fn overlapping_subclass_ranges_are_malformed() {
        let mut buf = ContainerBuilder::new(2)
            .raw_subclass("A", 100, 200)
            .raw_subclass("B", 150, 250)
            .build()
            .unwrap()
            .to_vec();
        // Pad with an unknown section so both ranges are in bounds and the
        // overlap is the only fault.
        buf.extend_from_slice(&0x7Fu16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&300u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 300]);

        let err = decode(&buf, None).unwrap_err();
        match err {
            DecodeError::MalformedContainer { reason, .. } => {
                assert!(reason.contains("overlaps"), "{}", reason)
            }
            other => panic!("expected MalformedContainer, got {:?}", other),
        }
    }

    #[test]
    fn broken_source_section_is_non_fatal() {
        let mut buf = ContainerBuilder::new(2)
            .global_name("Widget")
            .build()
            .unwrap()
            .to_vec();
        // SOURCE section claiming one line but carrying no line data.
        buf.extend_from_slice(&SEC_SOURCE.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());

        let unit = decode(&buf, None).unwrap();
        assert_eq!(unit.global_name, "Widget");
        assert_eq!(unit.recovered_source, None);
    }
}
