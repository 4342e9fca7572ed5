//! Parameters and argument values for runnable tasks.
//!
//! Naming follows the usual convention: a *parameter* is the variable in the
//! task's signature, an *argument* is the value supplied for it at the call
//! site.

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// How a parameter may be supplied at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    PositionalOnly,
    PositionalOrKeyword,
    VarPositional,
    KeywordOnly,
    VarKeyword,
}

/// One parameter of a task's signature.
///
/// `annotation` and `default` use `None` as the "nothing declared" marker;
/// a declared default of any real value is always `Some`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParameterKind,
    pub annotation: Option<String>,
    pub default: Option<ArgValue>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        ParameterSpec {
            name: name.into(),
            kind,
            annotation: None,
            default: None,
        }
    }
}

/// A name already bound in the kernel's namespace.
///
/// Rendered as a bare identifier instead of a literal, so the kernel
/// resolves the value from its own state rather than receiving a serialized
/// copy. This is how tasks consume objects that only exist inside the
/// long-lived kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarName(String);

impl VarName {
    pub fn new(name: impl Into<String>) -> Result<Self, BuildError> {
        let name = name.into();
        if !is_identifier(&name) {
            return Err(BuildError::InvalidIdentifier(name));
        }
        Ok(VarName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VarName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An argument value for a generated call expression: one of the supported
/// literal kinds, or a reference into the kernel's namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Var(VarName),
}

impl ArgValue {
    /// Shorthand for a validated variable reference.
    pub fn var(name: impl Into<String>) -> Result<Self, BuildError> {
        Ok(ArgValue::Var(VarName::new(name)?))
    }

    /// Render as a source literal, or as a bare identifier for variable
    /// references.
    pub fn render(&self) -> String {
        match self {
            ArgValue::Str(s) => render_str(s),
            ArgValue::Bool(true) => "True".to_string(),
            ArgValue::Bool(false) => "False".to_string(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(f) => render_float(*f),
            ArgValue::Var(name) => name.as_str().to_string(),
        }
    }
}

impl TryFrom<&serde_json::Value> for ArgValue {
    type Error = BuildError;

    /// Coerce a JSON value from an argument form or CLI into a supported
    /// literal kind. Arrays, objects and null have no literal rendering.
    fn try_from(value: &serde_json::Value) -> Result<Self, BuildError> {
        use serde_json::Value;
        match value {
            Value::String(s) => Ok(ArgValue::Str(s.clone())),
            Value::Bool(b) => Ok(ArgValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ArgValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(ArgValue::Float(f))
                } else {
                    Err(BuildError::UnsupportedValue(value.clone()))
                }
            }
            other => Err(BuildError::UnsupportedValue(other.clone())),
        }
    }
}

fn render_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn render_float(f: f64) -> String {
    if f.is_nan() {
        "float('nan')".to_string()
    } else if f.is_infinite() {
        if f.is_sign_positive() {
            "float('inf')".to_string()
        } else {
            "float('-inf')".to_string()
        }
    } else {
        // Debug formatting keeps the trailing ".0" on round floats, so the
        // rendered literal stays a float on the kernel side.
        format!("{f:?}")
    }
}

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

pub(crate) fn is_module_path(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}
