pub mod loader;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use loader::{load_template, parse_template};

/// A literal scalar as written in a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_str(&self) -> bool {
        matches!(self, Scalar::Str(_))
    }

    /// Numeric view, accepting numeric strings such as `"22"`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Str(s) => s.trim().parse::<f64>().ok(),
            Scalar::Null | Scalar::Bool(_) => None,
        }
    }

    /// Template booleans: `true`, `"true"`, `"True"`, `"1"` and `1`, plus the false
    /// counterparts. Anything else is not a boolean.
    pub fn to_boolean(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            Scalar::Int(1) => Some(true),
            Scalar::Int(0) => Some(false),
            Scalar::Str(s) => match s.as_str() {
                "true" | "True" | "1" => Some(true),
                "false" | "False" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Str(s) => write!(f, "{}", s),
        }
    }
}

/// A mapping key with the line it was written on.
#[derive(Debug, Clone, PartialEq)]
pub struct DocKey {
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    /// Entries in source order.
    Mapping(Vec<(DocKey, DocNode)>),
    Sequence(Vec<DocNode>),
    Scalar(Scalar),
}

/// A parsed value together with its 1-based source line.
#[derive(Debug, Clone, PartialEq)]
pub struct DocNode {
    pub value: DocValue,
    pub line: usize,
}

impl DocNode {
    pub fn scalar(value: Scalar, line: usize) -> Self {
        Self {
            value: DocValue::Scalar(value),
            line,
        }
    }

    pub fn get(&self, key: &str) -> Option<&DocNode> {
        match &self.value {
            DocValue::Mapping(entries) => entries
                .iter()
                .find(|(k, _)| k.name == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn entries(&self) -> &[(DocKey, DocNode)] {
        match &self.value {
            DocValue::Mapping(entries) => entries,
            _ => &[],
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match &self.value {
            DocValue::Scalar(s) => Some(s),
            _ => None,
        }
    }
}

/// One parsed template file, ready for compilation.
#[derive(Debug, Clone)]
pub struct TemplateDocument {
    pub path: String,
    pub root: DocNode,
}
