use bytes::Bytes;
use vsre_bytecode::{decode, DecodedUnit, Value};

use crate::error::ScriptError;
use crate::host::{BaseSource, ScriptHost};

/// The native script class a reconstruction masquerades as when saved back
/// through the host's resource system.
pub const DEFAULT_ORIGINAL_CLASS: &str = "VesperScript";

#[derive(Clone, Debug)]
enum Backing {
    Binary(Bytes),
    Text(String),
}

/// The live, host-facing reconstruction of one compiled unit.
///
/// Created empty, populated by [`ScriptModel::reload`], queryable at any
/// point: a model that never loaded (or whose last reload failed) still
/// answers identity and validity queries, it just answers them degraded.
///
/// Mutation goes through `&mut self` only, so one writer per model is
/// enforced by the borrow checker; the `reloading` flag additionally rejects
/// re-entrant reloads arriving through the host callbacks.
#[derive(Debug)]
pub struct ScriptModel {
    original_class: String,
    path: Option<String>,
    tool: bool,
    valid: bool,
    reloading: bool,
    override_revision: u32,
    backing: Option<Backing>,
    structure: Option<DecodedUnit>,
    base: Option<Box<ScriptModel>>,
    /// Host-native terminator of the chain, when the direct base is not a
    /// decompilable unit.
    native_base: Option<String>,
    error_message: String,
    tooling_enabled: bool,
}

impl Default for ScriptModel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptModel {
    pub fn new() -> Self {
        Self {
            original_class: DEFAULT_ORIGINAL_CLASS.to_string(),
            path: None,
            tool: false,
            valid: false,
            reloading: false,
            override_revision: 0,
            backing: None,
            structure: None,
            base: None,
            native_base: None,
            error_message: String::new(),
            tooling_enabled: false,
        }
    }

    // ---- identity & configuration -------------------------------------

    pub fn original_class(&self) -> &str {
        &self.original_class
    }

    pub fn set_original_class(&mut self, class: impl Into<String>) {
        self.original_class = class.into();
    }

    /// Class name used when the host re-saves this unit.
    pub fn save_class(&self) -> &str {
        &self.original_class
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = Some(path.into());
    }

    /// False when the model has no real path (a path-less/default unit).
    pub fn path_valid(&self) -> bool {
        self.path.is_some()
    }

    /// 0 means auto-detect from the container header.
    pub fn override_revision(&self) -> u32 {
        self.override_revision
    }

    pub fn set_override_revision(&mut self, revision: u32) {
        self.override_revision = revision;
    }

    pub fn tooling_enabled(&self) -> bool {
        self.tooling_enabled
    }

    pub fn set_tooling_enabled(&mut self, enabled: bool) {
        self.tooling_enabled = enabled;
    }

    // ---- backing -------------------------------------------------------

    /// Make the model binary-backed. Any previously decoded structure stays
    /// readable but is no longer valid until the next explicit reload.
    pub fn set_binary(&mut self, bytes: Bytes) {
        self.backing = Some(Backing::Binary(bytes));
        self.valid = false;
    }

    /// Make the model text-backed. Same invalidation rule as
    /// [`ScriptModel::set_binary`]; there is no implicit re-parse.
    pub fn set_source_code(&mut self, source: impl Into<String>) {
        self.backing = Some(Backing::Text(source.into()));
        self.valid = false;
    }

    pub fn is_binary_backed(&self) -> bool {
        matches!(self.backing, Some(Backing::Binary(_)))
    }

    pub fn has_source_code(&self) -> bool {
        self.source_code().is_some()
    }

    /// The authoritative text when text-backed, otherwise whatever source
    /// recovery produced.
    pub fn source_code(&self) -> Option<&str> {
        match &self.backing {
            Some(Backing::Text(text)) => Some(text),
            _ => self
                .structure
                .as_ref()
                .and_then(|s| s.recovered_source.as_deref()),
        }
    }

    // ---- reload orchestration -----------------------------------------

    /// Re-read whatever currently backs this model, rebuild its structure
    /// and base chain, and commit the result.
    ///
    /// On failure the previous structure and base stay untouched; only
    /// `is_valid` and `error_message` change. The error is also returned.
    pub fn reload(&mut self, host: &dyn ScriptHost) -> Result<(), ScriptError> {
        let mut in_progress = Vec::new();
        self.reload_guarded(host, &mut in_progress)
    }

    fn reload_guarded(
        &mut self,
        host: &dyn ScriptHost,
        in_progress: &mut Vec<String>,
    ) -> Result<(), ScriptError> {
        if self.reloading {
            return Err(ScriptError::Busy);
        }
        self.reloading = true;
        let outcome = self.rebuild_structure(host, in_progress);
        self.reloading = false;

        match outcome {
            Ok((unit, base, native_base)) => {
                self.tool = unit.is_tool;
                self.structure = Some(unit);
                self.base = base;
                self.native_base = native_base;
                self.valid = true;
                self.error_message.clear();
                Ok(())
            }
            Err(e) => {
                self.valid = false;
                self.error_message = e.to_string();
                log::warn!(
                    "reload of {} failed: {}",
                    self.path.as_deref().unwrap_or("<pathless unit>"),
                    self.error_message
                );
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn rebuild_structure(
        &self,
        host: &dyn ScriptHost,
        in_progress: &mut Vec<String>,
    ) -> Result<(DecodedUnit, Option<Box<ScriptModel>>, Option<String>), ScriptError> {
        let unit = match &self.backing {
            None => return Err(ScriptError::MissingSource),
            Some(Backing::Binary(bytes)) => {
                let pin = (self.override_revision != 0).then_some(self.override_revision);
                decode(bytes, pin)?
            }
            Some(Backing::Text(text)) => {
                host.parse_source(text).map_err(ScriptError::FrontEnd)?
            }
        };

        // Guard the chain against revisiting this unit through its own
        // bases. The unit's global name may already be on the stack when we
        // are the base of someone else; base names are pushed below.
        let pushed = !unit.global_name.is_empty() && !in_progress.contains(&unit.global_name);
        if pushed {
            in_progress.push(unit.global_name.clone());
        }
        let resolved = resolve_base(&unit.base_type_name, host, in_progress);
        if pushed {
            in_progress.pop();
        }
        let (base, native_base) = resolved?;
        Ok((unit, base, native_base))
    }

    /// Decode one nested class on demand.
    ///
    /// Only meaningful on a Valid, binary-backed model (nested ranges are
    /// byte ranges of the binary container). The child is reloaded with the
    /// parent's resolved revision pinned, so a mixed-revision container
    /// cannot reinterpret nested blobs.
    pub fn subclass(&self, name: &str, host: &dyn ScriptHost) -> Result<ScriptModel, ScriptError> {
        let (Some(Backing::Binary(bytes)), true) = (&self.backing, self.valid) else {
            return Err(ScriptError::MissingSource);
        };
        let structure = self.structure.as_ref().expect("valid model has structure");
        let Some(range) = structure.subclass(name) else {
            return Err(ScriptError::UnknownSubclass {
                name: name.to_string(),
            });
        };

        let mut child = ScriptModel::new();
        child.original_class = self.original_class.clone();
        child.tooling_enabled = self.tooling_enabled;
        child.set_override_revision(structure.revision);
        child.set_binary(bytes.slice(range.byte_range()));
        child.reload(host)?;
        Ok(child)
    }

    // ---- queries -------------------------------------------------------

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading
    }

    pub fn is_tool(&self) -> bool {
        self.tool
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Revision the current structure was decoded under, if any.
    pub fn revision(&self) -> Option<u32> {
        self.structure.as_ref().map(|s| s.revision)
    }

    pub fn structure(&self) -> Option<&DecodedUnit> {
        self.structure.as_ref()
    }

    pub fn base(&self) -> Option<&ScriptModel> {
        self.base.as_deref()
    }

    pub fn base_type_name(&self) -> &str {
        self.structure
            .as_ref()
            .map(|s| s.base_type_name.as_str())
            .unwrap_or("")
    }

    pub fn local_name(&self) -> &str {
        self.structure
            .as_ref()
            .map(|s| s.local_name.as_str())
            .unwrap_or("")
    }

    pub fn global_name(&self) -> &str {
        self.structure
            .as_ref()
            .map(|s| s.global_name.as_str())
            .unwrap_or("")
    }

    /// Members declared directly on this unit, declaration order.
    pub fn members(&self) -> &[String] {
        self.structure
            .as_ref()
            .map(|s| s.members.as_slice())
            .unwrap_or(&[])
    }

    /// True if `name` is a member of this unit or any ancestor.
    pub fn has_member(&self, name: &str) -> bool {
        let mut cur = Some(self);
        while let Some(model) = cur {
            if let Some(s) = &model.structure {
                if s.has_member(name) {
                    return true;
                }
            }
            cur = model.base.as_deref();
        }
        false
    }

    pub fn static_count(&self) -> usize {
        self.structure
            .as_ref()
            .map(|s| s.static_variables.len())
            .unwrap_or(0)
    }

    pub fn static_variables(&self) -> &[Value] {
        self.structure
            .as_ref()
            .map(|s| s.static_variables.as_slice())
            .unwrap_or(&[])
    }

    /// Bounds-checked static slot access. Out of range is a caller error,
    /// never a decode failure.
    pub fn get_static(&self, index: usize) -> Result<&Value, ScriptError> {
        self.static_variables()
            .get(index)
            .ok_or(ScriptError::IndexOutOfRange {
                index,
                count: self.static_count(),
            })
    }

    pub fn subclass_names(&self) -> Vec<&str> {
        self.structure
            .as_ref()
            .map(|s| s.subclasses.iter().map(|r| r.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// The host-native type terminating this model's chain, if the chain
    /// resolved all the way down to one.
    pub fn instance_base_type(&self) -> Option<&str> {
        let mut cur = self;
        while let Some(base) = cur.base.as_deref() {
            cur = base;
        }
        cur.native_base.as_deref()
    }

    /// Whether this unit's chain contains `name`, either as a decompiled
    /// unit's global name or as the native terminator.
    pub fn inherits_from(&self, name: &str) -> bool {
        let mut cur = Some(self);
        while let Some(model) = cur {
            if model.global_name() == name && !name.is_empty() {
                return true;
            }
            if model.native_base.as_deref() == Some(name) {
                return true;
            }
            cur = model.base.as_deref();
        }
        false
    }

    /// True only if every unit in the chain decoded successfully and none
    /// of them forbids runtime instantiation. False is an answer here, not
    /// an error.
    pub fn can_instantiate(&self) -> bool {
        let mut cur = Some(self);
        while let Some(model) = cur {
            if !model.valid {
                return false;
            }
            let Some(s) = &model.structure else {
                return false;
            };
            if s.is_abstract {
                return false;
            }
            if s.is_tool && !self.tooling_enabled {
                return false;
            }
            cur = model.base.as_deref();
        }
        true
    }
}

fn resolve_base(
    name: &str,
    host: &dyn ScriptHost,
    in_progress: &mut Vec<String>,
) -> Result<(Option<Box<ScriptModel>>, Option<String>), ScriptError> {
    if name.is_empty() {
        return Ok((None, None));
    }
    if in_progress.iter().any(|n| n == name) {
        return Err(ScriptError::CyclicInheritance {
            name: name.to_string(),
        });
    }

    let source = host.resolve_base(name).map_err(ScriptError::FrontEnd)?;
    let mut model = ScriptModel::new();
    match source {
        BaseSource::Native => return Ok((None, Some(name.to_string()))),
        BaseSource::Binary(bytes) => model.set_binary(bytes),
        BaseSource::Text(text) => model.set_source_code(text),
    }

    in_progress.push(name.to_string());
    let outcome = model.reload_guarded(host, in_progress);
    in_progress.pop();
    outcome?;

    Ok((Some(Box::new(model)), None))
}
