use vsre_bytecode::Value;

use crate::model::ScriptModel;

/// The uniform contract the host consumes a reconstructed script through.
///
/// Every method is total: an Invalid (or never-loaded) model still answers
/// identity and validity queries instead of raising, so a caller can render
/// "this script is broken: <message>" rather than fault.
pub trait ScriptDescriptor {
    fn is_valid(&self) -> bool;
    fn error_message(&self) -> &str;

    fn global_name(&self) -> &str;
    fn local_name(&self) -> &str;
    fn save_class(&self) -> &str;

    /// The decoded base unit, when the chain has one.
    fn base(&self) -> Option<&dyn ScriptDescriptor>;

    /// Host-native type terminating the chain, when resolution reached one.
    fn instance_base_type(&self) -> Option<&str>;

    /// Members declared directly on this unit, declaration order.
    fn members(&self) -> &[String];

    fn static_values(&self) -> &[Value];

    fn subclass_names(&self) -> Vec<&str>;

    fn is_tool(&self) -> bool;
    fn can_instantiate(&self) -> bool;

    /// Tooling-only surface; `None` unless tooling is enabled on the model.
    fn doc_class_name(&self) -> Option<&str>;
    fn class_icon_path(&self) -> Option<String>;
}

impl ScriptDescriptor for ScriptModel {
    fn is_valid(&self) -> bool {
        ScriptModel::is_valid(self)
    }

    fn error_message(&self) -> &str {
        ScriptModel::error_message(self)
    }

    fn global_name(&self) -> &str {
        ScriptModel::global_name(self)
    }

    fn local_name(&self) -> &str {
        ScriptModel::local_name(self)
    }

    fn save_class(&self) -> &str {
        ScriptModel::save_class(self)
    }

    fn base(&self) -> Option<&dyn ScriptDescriptor> {
        ScriptModel::base(self).map(|b| b as &dyn ScriptDescriptor)
    }

    fn instance_base_type(&self) -> Option<&str> {
        ScriptModel::instance_base_type(self)
    }

    fn members(&self) -> &[String] {
        ScriptModel::members(self)
    }

    fn static_values(&self) -> &[Value] {
        ScriptModel::static_variables(self)
    }

    fn subclass_names(&self) -> Vec<&str> {
        ScriptModel::subclass_names(self)
    }

    fn is_tool(&self) -> bool {
        ScriptModel::is_tool(self)
    }

    fn can_instantiate(&self) -> bool {
        ScriptModel::can_instantiate(self)
    }

    fn doc_class_name(&self) -> Option<&str> {
        if !self.tooling_enabled() {
            return None;
        }
        let name = if !self.global_name().is_empty() {
            self.global_name()
        } else {
            self.local_name()
        };
        (!name.is_empty()).then_some(name)
    }

    fn class_icon_path(&self) -> Option<String> {
        if !self.tooling_enabled() {
            return None;
        }
        // Editor convention: icon sits next to the container.
        self.path().map(|p| {
            let stem = p.strip_suffix(".vsb").unwrap_or(p);
            format!("{}.svg", stem)
        })
    }
}
