//! Survey domain for voxpoll: definitions, extraction and reports.
//!
//! A finished conversation enters through [`SurveyExtractionPipeline`]:
//!
//! 1. the transcript is stored as a session against a survey definition,
//! 2. [`build_extraction_prompt`] renders per-question rules,
//! 3. an [`ExtractionModel`] maps the transcript to raw JSON,
//! 4. [`normalize_answers`] turns that JSON into exactly one
//!    [`AnswerRecord`](voxpoll_types::AnswerRecord) per question,
//! 5. the answer map is stored as the session's response.
//!
//! [`ReportService`] builds a narrative policy report over a stored session
//! and caches it in a [`ReportCache`] until the session is re-extracted.
//!
//! The live side lives here too: [`build_interview_addon`] renders the
//! interviewer instructions for the realtime model, and [`flow`] is the
//! server-driven interview state machine behind the interview socket, with
//! [`summary`] producing its end-of-interview report.
//!
//! Store functions take a plain `rusqlite::Connection`; the pipeline and
//! report service check connections out of a
//! [`DbPool`](voxpoll_db::DbPool) on the blocking pool.

mod error;
mod extractor;
pub mod flow;
mod interview;
mod normalize;
mod pipeline;
mod prompt;
pub mod report;
mod store;
pub mod summary;

pub use error::{ExtractionError, SurveyError};
pub use extractor::{
    CompletionRequest, ExtractionModel, OpenAiChatModel, DEFAULT_CHAT_BASE_URL, DEFAULT_CHAT_MODEL,
};
pub use flow::{
    question_flow, EndReason, FlowAction, FlowPrompt, InterviewRegistry, InterviewSession, Stage,
};
pub use interview::{build_interview_addon, compose_system_prompt};
pub use normalize::normalize_answers;
pub use pipeline::{Submission, SurveyExtractionPipeline, EXTRACTION_TEMPERATURE};
pub use prompt::build_extraction_prompt;
pub use report::{
    AssetSource, DocumentRenderer, ExportedDocument, InMemoryReportCache, PlainTextRenderer,
    PolicyReport, ReportCache, ReportService,
};
pub use store::{
    get_definition, get_response, get_session, insert_definition, insert_session,
    latest_definition, list_definitions, list_submissions, upsert_response, validate_questions,
    SubmissionRecord, SurveyResponse, SurveySession,
};
pub use summary::{build_summary, InterviewSummary};
