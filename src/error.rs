use thiserror::Error;

pub type TranspileResult<T> = std::result::Result<T, TranspileError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ParseErrorKind {
    #[error("Expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    /// `expected_what` describes what was expected, e.g. " (expected '%}')"
    #[error("Unexpected EOF{expected_what}")]
    UnexpectedEOF { expected_what: String },
    #[error("Invalid identifier starting with '{at_char}'")]
    InvalidIdentifier { at_char: String },
    #[error("Unknown keyword '{keyword}'")]
    UnknownKeyword { keyword: String },
    #[error("Expected {description}")]
    Expected { description: String },
    #[error("Unterminated {what}")]
    Unterminated { what: String },
    #[error("Parser error: {0}")]
    Message(String),
}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<String>) -> Self {
        Self::UnexpectedEOF {
            expected_what: expected.map_or_else(String::new, |e| format!(" (expected '{}')", e)),
        }
    }
}

/// A syntax error, pointing at the fragment of source the parser choked on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("Parse error at line {line}, column {column} near '{fragment}': {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub fragment: String,
    #[source]
    pub kind: ParseErrorKind,
}

/// Failures raised by the content model collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentError {
    #[error("Unknown site '{site}'")]
    UnknownSite { site: String },
    #[error("Macro '{name}' is not defined by any entity of site '{site}'")]
    UnknownMacro { site: String, name: String },
    #[error("Entity '{entity}' has no properties")]
    MissingProperties { entity: String },
    #[error("View model '{path}' does not exist")]
    UnknownViewModel { path: String },
    #[error("Content model failure: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum TranspileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Macro '{name}' could not be located for site '{site}'")]
    MacroNotFound { site: String, name: String },
    #[error("View model '{path}' could not be resolved")]
    ViewModelNotFound { path: String },
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("Pass '{pass}' cannot rewrite {node}: {reason}")]
    Pass {
        pass: &'static str,
        node: String,
        reason: String,
    },
    #[error("Renderer cannot emit {node}: {reason}")]
    Render { node: String, reason: String },
    #[error("Invalid pipeline configuration: {0}")]
    Config(String),
    #[error("Invalid pipeline configuration: {0}")]
    ConfigSyntax(#[from] serde_json::Error),
}

impl TranspileError {
    pub(crate) fn pass(pass: &'static str, node: &crate::Node, reason: impl Into<String>) -> Self {
        Self::Pass {
            pass,
            node: node.describe(),
            reason: reason.into(),
        }
    }

    /// Whether the failure came from the source text itself rather than from
    /// looking something up.
    pub fn is_syntax(&self) -> bool {
        matches!(self, Self::Parse(_))
    }

    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::MacroNotFound { .. } | Self::ViewModelNotFound { .. } | Self::Content(_)
        )
    }
}
