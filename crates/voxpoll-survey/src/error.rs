//! Error types for the survey layer.

use thiserror::Error;

/// Failures of the language-model call behind extraction and reports.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// No API key is configured. Not retried.
    #[error("OPENAI_API_KEY is missing")]
    MissingApiKey,

    /// The upstream answered with a non-success status.
    #[error("extraction upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The request never produced a response.
    #[error("extraction request failed: {0}")]
    Network(String),
}

impl From<reqwest::Error> for ExtractionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Errors raised by the survey store, pipeline and report service.
///
/// The validation and lookup variants display as their stable wire code so
/// the HTTP layer can forward `to_string()` directly.
#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("TRANSCRIPT_REQUIRED")]
    TranscriptRequired,

    #[error("SURVEY_DEFINITION_NOT_FOUND")]
    DefinitionNotFound,

    /// No definition was named and none exists.
    #[error("SURVEY_DEFINITION_MISSING")]
    DefinitionMissing,

    #[error("SESSION_NOT_FOUND")]
    SessionNotFound,

    #[error("QUESTIONS_REQUIRED")]
    QuestionsRequired,

    #[error("INVALID_QUESTION_TYPE")]
    InvalidQuestionType(String),

    #[error("DUPLICATE_QUESTION_ID")]
    DuplicateQuestionId(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("survey database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("survey pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("survey serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking database task panicked or was cancelled.
    #[error("survey task failed: {0}")]
    Task(String),
}

impl SurveyError {
    /// Stable code for the HTTP error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TranscriptRequired => "TRANSCRIPT_REQUIRED",
            Self::DefinitionNotFound => "SURVEY_DEFINITION_NOT_FOUND",
            Self::DefinitionMissing => "SURVEY_DEFINITION_MISSING",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::QuestionsRequired => "QUESTIONS_REQUIRED",
            Self::InvalidQuestionType(_) => "INVALID_QUESTION_TYPE",
            Self::DuplicateQuestionId(_) => "DUPLICATE_QUESTION_ID",
            Self::Extraction(ExtractionError::MissingApiKey) => "OPENAI_API_KEY_MISSING",
            Self::Extraction(_) => "EXTRACTION_FAILED",
            Self::Database(_) | Self::Pool(_) | Self::Serialization(_) | Self::Task(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Returns `true` for caller mistakes (HTTP 400 territory).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::TranscriptRequired
                | Self::DefinitionNotFound
                | Self::DefinitionMissing
                | Self::QuestionsRequired
                | Self::InvalidQuestionType(_)
                | Self::DuplicateQuestionId(_)
        )
    }
}

impl From<tokio::task::JoinError> for SurveyError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
