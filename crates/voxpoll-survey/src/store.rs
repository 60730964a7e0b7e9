//! Persistence for definitions, sessions and responses.
//!
//! Every function takes a plain `&Connection` so callers decide whether it
//! runs on a pooled connection inside `spawn_blocking` or on an in-memory
//! database in tests. Timestamps are assigned by SQLite defaults
//! (RFC 3339, millisecond precision, UTC).

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use voxpoll_types::{AnswerMap, SurveyDefinition, SurveyQuestion, TranscriptItem};

use crate::error::SurveyError;

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveySession {
    pub id: String,
    pub definition_id: String,
    pub respondent_id: String,
    pub transcript: Vec<TranscriptItem>,
    pub created_at: String,
}

/// The extracted answers for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResponse {
    pub id: String,
    pub session_id: String,
    pub answers: AnswerMap,
    pub created_at: String,
    pub updated_at: String,
}

/// A session paired with its response, if extraction has stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub session: SurveySession,
    pub response: Option<SurveyResponse>,
}

/// Rejects empty question lists, unknown types and duplicate ids.
pub fn validate_questions(questions: &[SurveyQuestion]) -> Result<(), SurveyError> {
    if questions.is_empty() {
        return Err(SurveyError::QuestionsRequired);
    }
    if let Some(q) = questions.iter().find(|q| !q.question_type.is_known()) {
        return Err(SurveyError::InvalidQuestionType(
            q.question_type.as_str().to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for q in questions {
        if !seen.insert(q.id.as_str()) {
            return Err(SurveyError::DuplicateQuestionId(q.id.clone()));
        }
    }
    Ok(())
}

/// Validates and stores a new definition under a fresh UUID.
pub fn insert_definition(
    conn: &Connection,
    name: Option<&str>,
    questions: Vec<SurveyQuestion>,
) -> Result<SurveyDefinition, SurveyError> {
    validate_questions(&questions)?;

    let id = uuid::Uuid::new_v4().to_string();
    let questions_json = serde_json::to_string(&questions)?;
    let created_at: String = conn.query_row(
        "INSERT INTO survey_definitions (definition_id, name, questions_json)
         VALUES (?1, ?2, ?3)
         RETURNING created_at",
        params![id, name, questions_json],
        |row| row.get(0),
    )?;

    tracing::info!(definition_id = %id, questions = questions.len(), "survey definition created");

    Ok(SurveyDefinition {
        id,
        name: name.map(str::to_string),
        questions,
        created_at,
    })
}

const DEFINITION_COLUMNS: &str = "definition_id, name, questions_json, created_at";

fn definition_from_row(row: &Row<'_>) -> rusqlite::Result<(String, Option<String>, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_definition(
    (id, name, questions_json, created_at): (String, Option<String>, String, String),
) -> Result<SurveyDefinition, SurveyError> {
    Ok(SurveyDefinition {
        id,
        name,
        questions: serde_json::from_str(&questions_json)?,
        created_at,
    })
}

pub fn get_definition(conn: &Connection, id: &str) -> Result<Option<SurveyDefinition>, SurveyError> {
    conn.query_row(
        &format!("SELECT {DEFINITION_COLUMNS} FROM survey_definitions WHERE definition_id = ?1"),
        params![id],
        definition_from_row,
    )
    .optional()?
    .map(decode_definition)
    .transpose()
}

/// The most recently created definition. Ties on `created_at` go to the
/// later insert.
pub fn latest_definition(conn: &Connection) -> Result<Option<SurveyDefinition>, SurveyError> {
    conn.query_row(
        &format!(
            "SELECT {DEFINITION_COLUMNS} FROM survey_definitions ORDER BY created_at DESC, id DESC LIMIT 1"
        ),
        [],
        definition_from_row,
    )
    .optional()?
    .map(decode_definition)
    .transpose()
}

/// All definitions, newest first.
pub fn list_definitions(conn: &Connection) -> Result<Vec<SurveyDefinition>, SurveyError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DEFINITION_COLUMNS} FROM survey_definitions ORDER BY created_at DESC, id DESC"
    ))?;
    let rows = stmt.query_map([], definition_from_row)?;
    rows.map(|row| decode_definition(row?)).collect()
}

/// Stores a new session. The transcript is frozen from here on.
pub fn insert_session(
    conn: &Connection,
    definition_id: &str,
    respondent_id: &str,
    transcript: &[TranscriptItem],
) -> Result<SurveySession, SurveyError> {
    let id = uuid::Uuid::new_v4().to_string();
    let transcript_json = serde_json::to_string(transcript)?;
    let created_at: String = conn.query_row(
        "INSERT INTO survey_sessions (session_id, definition_id, respondent_id, transcript_json)
         VALUES (?1, ?2, ?3, ?4)
         RETURNING created_at",
        params![id, definition_id, respondent_id, transcript_json],
        |row| row.get(0),
    )?;

    Ok(SurveySession {
        id,
        definition_id: definition_id.to_string(),
        respondent_id: respondent_id.to_string(),
        transcript: transcript.to_vec(),
        created_at,
    })
}

const SESSION_COLUMNS: &str = "s.session_id, s.definition_id, s.respondent_id, s.transcript_json, s.created_at";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_session(
    (id, definition_id, respondent_id, transcript_json, created_at): (String, String, String, String, String),
) -> Result<SurveySession, SurveyError> {
    Ok(SurveySession {
        id,
        definition_id,
        respondent_id,
        transcript: serde_json::from_str(&transcript_json)?,
        created_at,
    })
}

pub fn get_session(conn: &Connection, id: &str) -> Result<Option<SurveySession>, SurveyError> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM survey_sessions s WHERE s.session_id = ?1"),
        params![id],
        session_from_row,
    )
    .optional()?
    .map(decode_session)
    .transpose()
}

/// Inserts the session's response, or overwrites the answers of the existing
/// one. The response id and `created_at` survive an overwrite.
pub fn upsert_response(
    conn: &Connection,
    session_id: &str,
    answers: &AnswerMap,
) -> Result<SurveyResponse, SurveyError> {
    let answers_json = serde_json::to_string(answers)?;
    let (id, created_at, updated_at): (String, String, String) = conn.query_row(
        "INSERT INTO survey_responses (response_id, session_id, answers_json)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (session_id) DO UPDATE SET
            answers_json = excluded.answers_json,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         RETURNING response_id, created_at, updated_at",
        params![uuid::Uuid::new_v4().to_string(), session_id, answers_json],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    Ok(SurveyResponse {
        id,
        session_id: session_id.to_string(),
        answers: answers.clone(),
        created_at,
        updated_at,
    })
}

pub fn get_response(conn: &Connection, session_id: &str) -> Result<Option<SurveyResponse>, SurveyError> {
    conn.query_row(
        "SELECT response_id, answers_json, created_at, updated_at
         FROM survey_responses WHERE session_id = ?1",
        params![session_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        },
    )
    .optional()?
    .map(|(id, answers_json, created_at, updated_at)| {
        Ok(SurveyResponse {
            id,
            session_id: session_id.to_string(),
            answers: serde_json::from_str(&answers_json)?,
            created_at,
            updated_at,
        })
    })
    .transpose()
}

/// Every session with its response, newest session first.
pub fn list_submissions(conn: &Connection) -> Result<Vec<SubmissionRecord>, SurveyError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS}, r.response_id, r.answers_json, r.created_at, r.updated_at
         FROM survey_sessions s
         LEFT JOIN survey_responses r ON r.session_id = s.session_id
         ORDER BY s.created_at DESC, s.id DESC"
    ))?;

    let rows = stmt.query_map([], |row| {
        let session = session_from_row(row)?;
        let response: Option<(String, String, String, String)> = match row.get::<_, Option<String>>(5)? {
            Some(id) => Some((id, row.get(6)?, row.get(7)?, row.get(8)?)),
            None => None,
        };
        Ok((session, response))
    })?;

    rows.map(|row| {
        let (session, response) = row?;
        let session = decode_session(session)?;
        let response = response
            .map(|(id, answers_json, created_at, updated_at)| {
                Ok::<_, SurveyError>(SurveyResponse {
                    id,
                    session_id: session.id.clone(),
                    answers: serde_json::from_str(&answers_json)?,
                    created_at,
                    updated_at,
                })
            })
            .transpose()?;
        Ok(SubmissionRecord { session, response })
    })
    .collect()
}
