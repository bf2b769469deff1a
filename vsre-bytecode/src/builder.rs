use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use bytes::Bytes;
use vsre_nls::Decoder as NlsDecoder;

use crate::decode::{
    CONTAINER_MAGIC, FLAG_ABSTRACT, FLAG_TOOL, HEADER_LEN, NO_IDENT, SEC_CLASS_DECL,
    SEC_CONSTANTS, SEC_IDENTIFIERS, SEC_MEMBERS, SEC_SOURCE, SEC_SUBCLASSES,
};
use crate::revision::{rules_for, RevisionRules};
use crate::value::Value;

enum SubclassSpec {
    /// A nested unit serialized into the output; its byte range is computed.
    Nested { name: String, builder: ContainerBuilder },
    /// A verbatim range entry. Tooling/test use; nothing is serialized for it.
    Raw { name: String, start: u32, end: u32 },
}

/// Writes well-formed containers for any registered revision.
///
/// This is the encode direction used by the test suite and by tooling that
/// re-emits recovered units. It makes no attempt to reproduce the original
/// compiler's output byte-for-byte; it writes sections in canonical order.
pub struct ContainerBuilder {
    revision: u32,
    tool: bool,
    abstract_: bool,
    base_type: String,
    local_name: String,
    global_name: String,
    members: Vec<String>,
    statics: Vec<Value>,
    source: Option<String>,
    subclasses: Vec<SubclassSpec>,
}

impl ContainerBuilder {
    pub fn new(revision: u32) -> Self {
        Self {
            revision,
            tool: false,
            abstract_: false,
            base_type: String::new(),
            local_name: String::new(),
            global_name: String::new(),
            members: Vec::new(),
            statics: Vec::new(),
            source: None,
            subclasses: Vec::new(),
        }
    }

    pub fn revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    pub fn tool(mut self, tool: bool) -> Self {
        self.tool = tool;
        self
    }

    pub fn abstract_class(mut self, abstract_: bool) -> Self {
        self.abstract_ = abstract_;
        self
    }

    pub fn base_type(mut self, name: impl Into<String>) -> Self {
        self.base_type = name.into();
        self
    }

    pub fn local_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = name.into();
        self
    }

    pub fn global_name(mut self, name: impl Into<String>) -> Self {
        self.global_name = name.into();
        self
    }

    pub fn member(mut self, name: impl Into<String>) -> Self {
        self.members.push(name.into());
        self
    }

    pub fn static_value(mut self, value: Value) -> Self {
        self.statics.push(value);
        self
    }

    pub fn source(mut self, text: impl Into<String>) -> Self {
        self.source = Some(text.into());
        self
    }

    /// Nest a complete child unit; it is serialized after the sections and
    /// indexed with its computed byte range. The child inherits this
    /// builder's revision.
    pub fn subclass(mut self, name: impl Into<String>, builder: ContainerBuilder) -> Self {
        self.subclasses.push(SubclassSpec::Nested {
            name: name.into(),
            builder,
        });
        self
    }

    /// Index a verbatim byte range without serializing anything for it.
    pub fn raw_subclass(mut self, name: impl Into<String>, start: u32, end: u32) -> Self {
        self.subclasses.push(SubclassSpec::Raw {
            name: name.into(),
            start,
            end,
        });
        self
    }

    pub fn build(&self) -> Result<Bytes> {
        self.build_with_revision(self.revision)
    }

    fn build_with_revision(&self, revision: u32) -> Result<Bytes> {
        let rules = rules_for(revision).context("cannot build container")?;
        let nls = NlsDecoder::new(rules.ident_encoding);

        for (i, m) in self.members.iter().enumerate() {
            if self.members[..i].contains(m) {
                bail!("duplicate member {:?}", m);
            }
        }
        let sub_names: Vec<&str> = self
            .subclasses
            .iter()
            .map(|s| match s {
                SubclassSpec::Nested { name, .. } => name.as_str(),
                SubclassSpec::Raw { name, .. } => name.as_str(),
            })
            .collect();
        for (i, n) in sub_names.iter().enumerate() {
            if sub_names[..i].contains(n) {
                bail!("duplicate subclass {:?}", n);
            }
        }

        // Identifier pool: every name referenced by any section, deduplicated.
        let mut idents: Vec<String> = Vec::new();
        let base_idx = intern_opt(&mut idents, &self.base_type);
        let local_idx = intern_opt(&mut idents, &self.local_name);
        let global_idx = intern_opt(&mut idents, &self.global_name);
        let member_idx: Vec<u32> = self
            .members
            .iter()
            .map(|m| intern(&mut idents, m))
            .collect();
        let sub_idx: Vec<u32> = sub_names.iter().map(|n| intern(&mut idents, n)).collect();

        // Serialize children first so the nested-class index can carry
        // their final ranges.
        let mut children: Vec<Bytes> = Vec::new();
        for spec in &self.subclasses {
            if let SubclassSpec::Nested { builder, .. } = spec {
                children.push(builder.build_with_revision(revision)?);
            }
        }

        let constants_payload = self.encode_constants(rules, &nls)?;
        let idents_payload = encode_identifiers(rules, &nls, &idents)?;
        let class_payload = encode_class_decl(base_idx, local_idx, global_idx);
        let members_payload = self.encode_members(rules, &member_idx)?;

        let source_payload = match (&self.source, rules.source_recovery) {
            (Some(text), true) => Some(encode_source(&nls, text)),
            // Revisions without debug info simply don't retain the text.
            _ => None,
        };

        let entry_size = if rules.subclass_entry_flags { 16 } else { 12 };
        let subclass_payload_len = if self.subclasses.is_empty() {
            None
        } else {
            let count_len = if rules.wide_counts { 4 } else { 2 };
            Some(count_len + self.subclasses.len() * entry_size)
        };

        let mut sections_total = 0usize;
        for payload in [
            &constants_payload,
            &idents_payload,
            &class_payload,
            &members_payload,
        ] {
            sections_total += 8 + payload.len();
        }
        if let Some(len) = subclass_payload_len {
            sections_total += 8 + len;
        }
        if let Some(p) = &source_payload {
            sections_total += 8 + p.len();
        }

        // Children start right after the last section.
        let mut child_off = (HEADER_LEN + sections_total) as u32;
        let mut entries: Vec<(u32, u32, u32)> = Vec::new();
        let mut child_iter = children.iter();
        for (spec, idx) in self.subclasses.iter().zip(&sub_idx) {
            match spec {
                SubclassSpec::Nested { .. } => {
                    let blob = child_iter.next().expect("child built above");
                    let start = child_off;
                    let end = child_off + blob.len() as u32;
                    entries.push((*idx, start, end));
                    child_off = end;
                }
                SubclassSpec::Raw { start, end, .. } => {
                    entries.push((*idx, *start, *end));
                }
            }
        }

        let mut subclasses_payload = Vec::new();
        if !self.subclasses.is_empty() {
            push_count(&mut subclasses_payload, rules, entries.len())?;
            for (idx, start, end) in &entries {
                subclasses_payload.write_u32::<LittleEndian>(*idx)?;
                subclasses_payload.write_u32::<LittleEndian>(*start)?;
                subclasses_payload.write_u32::<LittleEndian>(*end)?;
                if rules.subclass_entry_flags {
                    subclasses_payload.write_u32::<LittleEndian>(0)?;
                }
            }
            debug_assert_eq!(Some(subclasses_payload.len()), subclass_payload_len);
        }

        let mut out = Vec::with_capacity(HEADER_LEN + sections_total);
        out.extend_from_slice(CONTAINER_MAGIC);
        out.write_u32::<LittleEndian>(revision)?;
        let mut flags = 0u32;
        if self.tool {
            flags |= FLAG_TOOL;
        }
        if self.abstract_ {
            flags |= FLAG_ABSTRACT;
        }
        out.write_u32::<LittleEndian>(flags)?;

        push_section(&mut out, SEC_CONSTANTS, &constants_payload)?;
        push_section(&mut out, SEC_IDENTIFIERS, &idents_payload)?;
        push_section(&mut out, SEC_CLASS_DECL, &class_payload)?;
        push_section(&mut out, SEC_MEMBERS, &members_payload)?;
        if !subclasses_payload.is_empty() {
            push_section(&mut out, SEC_SUBCLASSES, &subclasses_payload)?;
        }
        if let Some(p) = &source_payload {
            push_section(&mut out, SEC_SOURCE, p)?;
        }

        for blob in &children {
            out.extend_from_slice(blob);
        }

        Ok(out.into())
    }

    fn encode_constants(&self, rules: &RevisionRules, nls: &NlsDecoder) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        push_count(&mut payload, rules, self.statics.len())?;
        for value in &self.statics {
            payload.write_u8(value.type_tag())?;
            match value {
                Value::Nil => {}
                Value::Bool(b) => payload.write_u8(*b as u8)?,
                Value::Int(v) => payload.write_i64::<LittleEndian>(*v)?,
                Value::Float(v) => payload.write_f64::<LittleEndian>(*v)?,
                Value::Str(s) => push_string(&mut payload, nls, s)?,
            }
        }
        Ok(payload)
    }

    fn encode_members(&self, rules: &RevisionRules, member_idx: &[u32]) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        push_count(&mut payload, rules, member_idx.len())?;
        for idx in member_idx {
            payload.write_u32::<LittleEndian>(*idx)?;
        }
        // Static initializers reference the constant pool one-to-one here.
        push_count(&mut payload, rules, self.statics.len())?;
        for i in 0..self.statics.len() {
            payload.write_u32::<LittleEndian>(i as u32)?;
        }
        Ok(payload)
    }
}

fn intern(pool: &mut Vec<String>, name: &str) -> u32 {
    if let Some(pos) = pool.iter().position(|n| n == name) {
        return pos as u32;
    }
    pool.push(name.to_string());
    (pool.len() - 1) as u32
}

fn intern_opt(pool: &mut Vec<String>, name: &str) -> u32 {
    if name.is_empty() {
        NO_IDENT
    } else {
        intern(pool, name)
    }
}

fn push_count(buf: &mut Vec<u8>, rules: &RevisionRules, n: usize) -> Result<()> {
    if rules.wide_counts {
        buf.write_u32::<LittleEndian>(u32::try_from(n)?)?;
    } else {
        let n = u16::try_from(n).context("element count exceeds revision 1 limits")?;
        buf.write_u16::<LittleEndian>(n)?;
    }
    Ok(())
}

fn push_string(buf: &mut Vec<u8>, nls: &NlsDecoder, s: &str) -> Result<()> {
    let bytes = nls.encode_owned(s);
    buf.write_u32::<LittleEndian>(u32::try_from(bytes.len())?)?;
    buf.extend_from_slice(&bytes);
    Ok(())
}

fn push_section(out: &mut Vec<u8>, tag: u16, payload: &[u8]) -> Result<()> {
    out.write_u16::<LittleEndian>(tag)?;
    out.write_u16::<LittleEndian>(0)?; // reserved
    out.write_u32::<LittleEndian>(u32::try_from(payload.len())?)?;
    out.extend_from_slice(payload);
    Ok(())
}

fn encode_identifiers(
    rules: &RevisionRules,
    nls: &NlsDecoder,
    idents: &[String],
) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    push_count(&mut payload, rules, idents.len())?;
    for name in idents {
        push_string(&mut payload, nls, name)?;
    }
    Ok(payload)
}

fn encode_class_decl(base_idx: u32, local_idx: u32, global_idx: u32) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&base_idx.to_le_bytes());
    payload.extend_from_slice(&local_idx.to_le_bytes());
    payload.extend_from_slice(&global_idx.to_le_bytes());
    payload
}

fn encode_source(nls: &NlsDecoder, text: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    let lines: Vec<&str> = text.split('\n').collect();
    payload.extend_from_slice(&(lines.len() as u32).to_le_bytes());
    for line in lines {
        let bytes = nls.encode_owned(line);
        payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        payload.extend_from_slice(&bytes);
    }
    payload
}
