//! Shared types for the voxpoll workspace.
//!
//! This crate holds the data model every other crate agrees on: survey
//! definitions and their questions, transcripts, and the normalized answer
//! records produced by extraction. Realtime-session types (model allow-list,
//! paralinguistic readings) live in [`realtime`].
//!
//! Nothing here performs I/O. Persistence lives in `voxpoll-survey`, the live
//! session in `voxpoll-voice`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod realtime;

pub use realtime::{ParalinguisticReading, RealtimeModel};

/// Literal sentinel written to `reasoning` when the transcript holds no
/// evidence for a question.
pub const NO_EVIDENCE: &str = "NO_EVIDENCE";

/// Respondent identity used when a submission does not name one.
pub const ANONYMOUS_RESPONDENT: &str = "anonymous";

/// Question types understood by the extraction prompt builder.
///
/// Types read back from storage that are not in the known set deserialize into
/// [`QuestionType::Other`] so older or hand-edited definitions still load; the
/// prompt builder gives them the generic summarizer rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QuestionType {
    SingleSelect,
    MultiSelect,
    Scale,
    Number,
    Currency,
    TextSummary,
    Custom,
    /// A type outside the known set.
    Other(String),
}

impl QuestionType {
    /// Wire labels of every known type, in declaration order.
    pub const KNOWN: [&'static str; 7] = [
        "SINGLE_SELECT",
        "MULTI_SELECT",
        "SCALE",
        "TEXT_SUMMARY",
        "NUMBER",
        "CURRENCY",
        "CUSTOM",
    ];

    /// Returns the wire label for this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::SingleSelect => "SINGLE_SELECT",
            Self::MultiSelect => "MULTI_SELECT",
            Self::Scale => "SCALE",
            Self::Number => "NUMBER",
            Self::Currency => "CURRENCY",
            Self::TextSummary => "TEXT_SUMMARY",
            Self::Custom => "CUSTOM",
            Self::Other(label) => label,
        }
    }

    /// Parses a known label. Returns `None` for anything outside the known set.
    pub fn parse_known(label: &str) -> Option<Self> {
        match label {
            "SINGLE_SELECT" => Some(Self::SingleSelect),
            "MULTI_SELECT" => Some(Self::MultiSelect),
            "SCALE" => Some(Self::Scale),
            "NUMBER" => Some(Self::Number),
            "CURRENCY" => Some(Self::Currency),
            "TEXT_SUMMARY" => Some(Self::TextSummary),
            "CUSTOM" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Returns `true` unless this is an [`QuestionType::Other`] label.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for QuestionType {
    fn from(label: String) -> Self {
        Self::parse_known(&label).unwrap_or(Self::Other(label))
    }
}

impl From<QuestionType> for String {
    fn from(value: QuestionType) -> Self {
        match value {
            QuestionType::Other(label) => label,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single question within a survey definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyQuestion {
    /// Identifier, unique within its definition (e.g. `Q1`).
    pub id: String,
    /// The prompt text read to the respondent.
    pub text: String,
    /// Question type driving the extraction rule.
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// Fixed option set for select-style questions.
    #[serde(default)]
    pub options: Vec<String>,
    /// Free-form extraction guidance. Used verbatim for `CUSTOM` questions and
    /// appended as an additional instruction for every other type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_guide: Option<String>,
}

/// An ordered list of questions, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub questions: Vec<SurveyQuestion>,
    pub created_at: String,
}

impl SurveyDefinition {
    /// Question ids in definition order.
    pub fn question_ids(&self) -> impl Iterator<Item = &str> {
        self.questions.iter().map(|q| q.id.as_str())
    }

    /// Looks up a question by id.
    pub fn question(&self, id: &str) -> Option<&SurveyQuestion> {
        self.questions.iter().find(|q| q.id == id)
    }
}

/// Speaker of a transcript item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl TranscriptRole {
    /// Returns the wire label for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One utterance in a session transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub role: TranscriptRole,
    pub text: String,
    /// RFC 3339 timestamp. Submissions may omit it; the pipeline stamps the
    /// submission time before persisting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl TranscriptItem {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TranscriptRole::User,
            text: text.into(),
            timestamp: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TranscriptRole::Assistant,
            text: text.into(),
            timestamp: None,
        }
    }
}

/// An evidence-backed inference that is not a confirmed answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub value: serde_json::Value,
    pub confidence: f64,
    pub evidence: Vec<String>,
}

/// Normalized answer for one question.
///
/// `value` is `Null` when the transcript did not answer the question; in that
/// case `reasoning` holds [`NO_EVIDENCE`]. Optional fields are omitted from the
/// serialized form when the model did not supply a valid value for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub original_text: Option<String>,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypotheses: Option<Vec<Hypothesis>>,
}

impl AnswerRecord {
    /// The record used for every question the model did not answer.
    pub fn no_evidence() -> Self {
        Self {
            value: serde_json::Value::Null,
            original_text: None,
            reasoning: NO_EVIDENCE.to_string(),
            confidence: None,
            evidence: None,
            hypotheses: None,
        }
    }

    /// Returns `true` when the record carries a non-null value.
    pub fn is_answered(&self) -> bool {
        !self.value.is_null()
    }
}

/// Answer records keyed by question id.
pub type AnswerMap = BTreeMap<String, AnswerRecord>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn question_type_labels_round_trip() {
        for label in QuestionType::KNOWN {
            let parsed = QuestionType::from(label.to_string());
            assert!(parsed.is_known(), "{label} should be known");
            assert_eq!(parsed.as_str(), label);
        }
    }

    #[test]
    fn unknown_question_type_is_preserved() {
        let q: SurveyQuestion = serde_json::from_value(json!({
            "id": "Q9",
            "text": "free",
            "type": "RANKING"
        }))
        .unwrap();
        assert_eq!(q.question_type, QuestionType::Other("RANKING".to_string()));
        assert!(q.options.is_empty());

        let back = serde_json::to_value(&q).unwrap();
        assert_eq!(back["type"], "RANKING");
    }

    #[test]
    fn no_evidence_record_serializes_with_nulls() {
        let value = serde_json::to_value(AnswerRecord::no_evidence()).unwrap();
        assert_eq!(
            value,
            json!({"value": null, "originalText": null, "reasoning": "NO_EVIDENCE"})
        );
    }

    #[test]
    fn transcript_item_without_timestamp_deserializes() {
        let item: TranscriptItem =
            serde_json::from_value(json!({"role": "user", "text": "안녕하세요"})).unwrap();
        assert_eq!(item.role, TranscriptRole::User);
        assert!(item.timestamp.is_none());
    }
}
