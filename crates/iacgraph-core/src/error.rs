use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while loading, compiling or storing template graphs.
///
/// Traversals in [`crate::query`] never produce these; they degrade to empty results.
#[derive(Debug, Error)]
pub enum IacError {
    #[error("{path}: failed to parse template: {message}")]
    TemplateParse { path: String, message: String },

    #[error("{path}:{line}: function is not supported: {name}")]
    UnsupportedIntrinsicFunction {
        path: String,
        name: String,
        line: usize,
    },

    #[error("{path}:{line}: unresolved reference '{name}'")]
    UnresolvedReference {
        path: String,
        name: String,
        line: usize,
    },

    #[error("template file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("graph query backend error: {0}")]
    GraphQueryBackend(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IacError {
    pub(crate) fn parse(path: &str, message: impl Into<String>) -> Self {
        IacError::TemplateParse {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Whether a check should report this failure as UNKNOWN instead of propagating it.
    pub fn is_designated(&self) -> bool {
        matches!(
            self,
            IacError::TemplateParse { .. }
                | IacError::UnsupportedIntrinsicFunction { .. }
                | IacError::UnresolvedReference { .. }
                | IacError::FileNotFound(_)
        )
    }

    /// Message carried by an UNKNOWN verdict.
    pub fn unknown_message(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IacError::TemplateParse { .. } => "TemplateParseError",
            IacError::UnsupportedIntrinsicFunction { .. } => "UnsupportedIntrinsicFunction",
            IacError::UnresolvedReference { .. } => "UnresolvedReference",
            IacError::FileNotFound(_) => "FileNotFound",
            IacError::GraphQueryBackend(_) => "GraphQueryBackendError",
            IacError::Io { .. } => "IoError",
        }
    }
}

pub type Result<T, E = IacError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_designated_kinds() {
        assert!(IacError::FileNotFound(PathBuf::from("a.yaml")).is_designated());
        assert!(IacError::parse("a.yaml", "bad").is_designated());
        assert!(!IacError::GraphQueryBackend("down".into()).is_designated());
    }

    #[test]
    fn test_display_includes_location() {
        let err = IacError::UnresolvedReference {
            path: "stack.yaml".into(),
            name: "MissingBucket".into(),
            line: 12,
        };
        assert_eq!(
            err.to_string(),
            "stack.yaml:12: unresolved reference 'MissingBucket'"
        );
    }
}
