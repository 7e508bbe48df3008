//! Tool manifest (tools.json) for declarative skill tools.
//!
//! A manifest is a JSON array of tool declarations. Entries that are individually
//! broken are skipped with a warning; a duplicate tool name rejects the whole manifest.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// File name of the manifest at a skill's root.
pub const MANIFEST_FILE: &str = "tools.json";

/// Parameter name -> spec. Ordered by name so listings are deterministic.
pub type ParameterSet = BTreeMap<String, ParameterSpec>;

/// One tool as declared in a manifest (parsed and validated, not yet registered).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// Handler script relative to the skill directory. None => stub tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: ParameterSet,
}

/// JSON type a parameter value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    /// True if the JSON value has this type.
    pub fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// Declared shape of one tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub description: String,
    /// Allowed literal values. Non-empty when present; every value matches `ty`.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ParameterSpec {
    /// Check the parameter's own invariants (description, enum shape).
    pub fn check(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("description must not be empty".to_string());
        }
        if let Some(values) = &self.allowed {
            if values.is_empty() {
                return Err("enum must not be empty".to_string());
            }
            if let Some(bad) = values.iter().find(|v| !self.ty.matches(v)) {
                return Err(format!(
                    "enum value {} is not of type {}",
                    bad,
                    self.ty.as_str()
                ));
            }
        }
        Ok(())
    }
}

/// Manifest-level failure: no tools from this manifest are accepted.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("MalformedManifest: {0}")]
    MalformedManifest(#[from] serde_json::Error),
    #[error("NotAnArray: manifest top level must be a JSON array")]
    NotAnArray,
    #[error("DuplicateToolName: {0}")]
    DuplicateToolName(String),
}

/// Per-entry warning: the entry at `index` was skipped, the rest of the manifest stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippableEntry {
    pub index: usize,
    pub name: Option<String>,
    pub reason: String,
}

impl fmt::Display for SkippableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(n) => write!(f, "SkippableEntry: entry {} ({}): {}", self.index, n, self.reason),
            None => write!(f, "SkippableEntry: entry {}: {}", self.index, self.reason),
        }
    }
}

/// Accepted declarations (input order) plus the warnings for skipped entries.
#[derive(Debug, Clone, Default)]
pub struct ValidatedManifest {
    pub tools: Vec<ToolDeclaration>,
    pub warnings: Vec<SkippableEntry>,
}

/// Raw entry shape; every field optional so missing fields become warnings, not parse errors.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    parameters: Option<BTreeMap<String, ParameterSpec>>,
}

/// True if `name` matches `^[a-z][a-z0-9_]*$`.
pub fn is_valid_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Validate every spec in a parameter set; the first failure is returned as `"param: reason"`.
pub fn check_parameters(parameters: &ParameterSet) -> Result<(), String> {
    for (name, spec) in parameters {
        if name.trim().is_empty() {
            return Err("parameter name must not be empty".to_string());
        }
        spec.check().map_err(|e| format!("parameter {}: {}", name, e))?;
    }
    Ok(())
}

/// Parse and validate the raw text of a tools.json file.
pub fn validate(raw: &str) -> Result<ValidatedManifest, ValidationError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let serde_json::Value::Array(items) = value else {
        return Err(ValidationError::NotAnArray);
    };

    // Duplicates are judged on every entry carrying a string name, even ones skipped below.
    let mut seen = HashSet::new();
    for item in &items {
        if let Some(name) = item.get("name").and_then(|n| n.as_str()) {
            if !name.is_empty() && !seen.insert(name) {
                return Err(ValidationError::DuplicateToolName(name.to_string()));
            }
        }
    }

    let mut out = ValidatedManifest::default();
    for (index, item) in items.into_iter().enumerate() {
        let hint = item
            .get("name")
            .and_then(|n| n.as_str())
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        match validate_entry(item) {
            Ok(decl) => out.tools.push(decl),
            Err(reason) => out.warnings.push(SkippableEntry {
                index,
                name: hint,
                reason,
            }),
        }
    }
    Ok(out)
}

fn validate_entry(item: serde_json::Value) -> Result<ToolDeclaration, String> {
    if !item.is_object() {
        return Err("entry must be a JSON object".to_string());
    }
    let raw: RawEntry = serde_json::from_value(item).map_err(|e| e.to_string())?;

    let name = raw.name.unwrap_or_default();
    if name.is_empty() {
        return Err("missing or empty name".to_string());
    }
    if !is_valid_tool_name(&name) {
        return Err(format!("name {:?} must match ^[a-z][a-z0-9_]*$", name));
    }
    let description = raw.description.unwrap_or_default();
    if description.trim().is_empty() {
        return Err("missing or empty description".to_string());
    }
    if let Some(script) = &raw.script {
        if script.trim().is_empty() {
            return Err("script must not be empty when present".to_string());
        }
    }
    let parameters = raw.parameters.unwrap_or_default();
    check_parameters(&parameters)?;

    Ok(ToolDeclaration {
        name,
        description,
        script: raw.script,
        parameters,
    })
}

/// Serialize declarations back into manifest form (pretty JSON array).
pub fn render(tools: &[ToolDeclaration]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(tools)
}
