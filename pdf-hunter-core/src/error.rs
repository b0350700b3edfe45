//! Error types for pdf-hunter-core.

use thiserror::Error;

/// Result type alias using pdf-hunter-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds that get accumulated into `RunState::errors`.
///
/// Distinct from [`Error`] itself: `ErrorKind` is `Copy` + serializable so
/// it can live inside an `ErrorRecord` and cross an additive merge, whereas
/// `Error` carries messages (and occasionally non-serializable sources).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InputError,
    RenderError,
    ToolError,
    LlmTimeout,
    LlmSchemaError,
    RecursionLimit,
    BrowserError,
    PersistenceError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InputError => "INPUT_ERROR",
            Self::RenderError => "RENDER_ERROR",
            Self::ToolError => "TOOL_ERROR",
            Self::LlmTimeout => "LLM_TIMEOUT",
            Self::LlmSchemaError => "LLM_SCHEMA_ERROR",
            Self::RecursionLimit => "RECURSION_LIMIT",
            Self::BrowserError => "BROWSER_ERROR",
            Self::PersistenceError => "PERSISTENCE_ERROR",
        };
        write!(f, "{s}")
    }
}

/// Errors that can occur during PDF Hunter orchestration.
#[derive(Error, Debug)]
pub enum Error {
    /// The input PDF could not be read, or arguments were invalid. Always fatal.
    #[error("input error: {0}")]
    Input(String),

    /// Page rendering or QR decoding failed for one page.
    #[error("render error: {0}")]
    Render(String),

    /// An external PDF tool (pdfid/pdf-parser/peepdf/PyMuPDF) failed.
    #[error("tool error: {tool} - {message}")]
    Tool {
        tool: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An LLM call exceeded its deadline.
    #[error("LLM call timed out after {duration_ms}ms")]
    LlmTimeout { duration_ms: u64 },

    /// Structured output did not conform to schema after one retry.
    #[error("LLM structured output did not conform to schema: {0}")]
    LlmSchemaError(String),

    /// A ReAct loop's step or action budget was exhausted.
    #[error("recursion limit exceeded: {0}")]
    RecursionLimit(String),

    /// Browser navigation/click/eval failed.
    #[error("browser error: {0}")]
    Browser(String),

    /// Writing a session artifact failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// LLM transport/provider error not otherwise classified.
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything that doesn't fit the taxonomy above.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn tool_with_source(
        tool: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn llm_timeout(duration_ms: u64) -> Self {
        Self::LlmTimeout { duration_ms }
    }

    pub fn recursion_limit(what: impl Into<String>) -> Self {
        Self::RecursionLimit(what.into())
    }

    /// Classify this error for accumulation into `RunState::errors`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::InputError,
            Self::Render(_) => ErrorKind::RenderError,
            Self::Tool { .. } => ErrorKind::ToolError,
            Self::LlmTimeout { .. } => ErrorKind::LlmTimeout,
            Self::LlmSchemaError(_) => ErrorKind::LlmSchemaError,
            Self::RecursionLimit(_) => ErrorKind::RecursionLimit,
            Self::Browser(_) => ErrorKind::BrowserError,
            Self::Persistence(_) => ErrorKind::PersistenceError,
            Self::LlmApi { .. } => ErrorKind::LlmTimeout,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::ToolError,
        }
    }

    /// Whether this error must abort the run rather than accumulate as an
    /// `ErrorRecord`. Only an unreadable input file qualifies unconditionally;
    /// the final-report persistence failure is judged separately by its
    /// caller since `Persistence` is non-fatal everywhere else.
    pub fn is_always_fatal(&self) -> bool {
        matches!(self, Self::Input(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_error_is_fatal() {
        assert!(Error::Input("bad path".into()).is_always_fatal());
        assert!(!Error::Render("page 3".into()).is_always_fatal());
    }

    #[test]
    fn kind_mapping_is_stable() {
        assert_eq!(Error::Browser("nav failed".into()).kind(), ErrorKind::BrowserError);
        assert_eq!(
            Error::LlmSchemaError("bad json".into()).kind(),
            ErrorKind::LlmSchemaError
        );
    }
}
