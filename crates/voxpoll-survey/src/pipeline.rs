//! Transcript-to-answers extraction.
//!
//! [`SurveyExtractionPipeline::submit`] persists a new session and its
//! extracted response; [`SurveyExtractionPipeline::reextract`] reruns
//! extraction over a stored transcript and overwrites the response. Database
//! work runs on the blocking pool; the model call does not hold a connection.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use voxpoll_db::DbPool;
use voxpoll_types::{AnswerMap, SurveyDefinition, TranscriptItem, ANONYMOUS_RESPONDENT};

use crate::error::SurveyError;
use crate::extractor::{CompletionRequest, ExtractionModel};
use crate::normalize::normalize_answers;
use crate::prompt::build_extraction_prompt;
use crate::report::ReportCache;
use crate::store::{self, SurveyResponse, SurveySession};

pub const EXTRACTION_TEMPERATURE: f32 = 0.1;

/// A session together with the response extracted from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub session: SurveySession,
    pub response: SurveyResponse,
}

pub struct SurveyExtractionPipeline {
    pool: DbPool,
    model: Arc<dyn ExtractionModel>,
    reports: Arc<dyn ReportCache>,
    /// One async lock per session currently being re-extracted.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SurveyExtractionPipeline {
    pub fn new(pool: DbPool, model: Arc<dyn ExtractionModel>, reports: Arc<dyn ReportCache>) -> Self {
        Self {
            pool,
            model,
            reports,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `transcript` as a new session and extracts its answers.
    ///
    /// With no `definition_id` the latest definition is used. An empty
    /// transcript is rejected before anything is written.
    pub async fn submit(
        &self,
        definition_id: Option<&str>,
        mut transcript: Vec<TranscriptItem>,
        respondent_id: Option<&str>,
    ) -> Result<Submission, SurveyError> {
        if transcript.is_empty() {
            return Err(SurveyError::TranscriptRequired);
        }

        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        for item in transcript.iter_mut().filter(|t| t.timestamp.is_none()) {
            item.timestamp = Some(now.clone());
        }

        let respondent = respondent_id
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(ANONYMOUS_RESPONDENT)
            .to_string();

        let pool = self.pool.clone();
        let requested = definition_id.map(str::to_string);
        let (definition, session) = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            let definition = match requested.as_deref() {
                Some(id) => store::get_definition(&conn, id)?.ok_or(SurveyError::DefinitionNotFound)?,
                None => store::latest_definition(&conn)?.ok_or(SurveyError::DefinitionMissing)?,
            };
            let session = store::insert_session(&conn, &definition.id, &respondent, &transcript)?;
            Ok::<_, SurveyError>((definition, session))
        })
        .await??;

        tracing::info!(
            session_id = %session.id,
            definition_id = %definition.id,
            turns = session.transcript.len(),
            "survey session stored"
        );

        let answers = self.extract(&definition, &session.transcript).await?;
        let response = self.store_response(&session.id, answers).await?;
        Ok(Submission { session, response })
    }

    /// Reruns extraction for a stored session and overwrites its response.
    ///
    /// Calls for the same session run one at a time. The session's cached
    /// report is invalidated once the new answers are stored.
    pub async fn reextract(&self, session_id: &str) -> Result<Submission, SurveyError> {
        let entry = self.session_lock(session_id);
        let _held = entry.lock.lock().await;
        self.reextract_locked(session_id).await
    }

    async fn reextract_locked(&self, session_id: &str) -> Result<Submission, SurveyError> {
        let pool = self.pool.clone();
        let id = session_id.to_string();
        let (session, definition) = tokio::task::spawn_blocking(move || -> Result<_, SurveyError> {
            let conn = pool.get()?;
            let session = store::get_session(&conn, &id)?.ok_or(SurveyError::SessionNotFound)?;
            if session.transcript.is_empty() {
                return Err(SurveyError::TranscriptRequired);
            }
            let definition = store::get_definition(&conn, &session.definition_id)?
                .ok_or(SurveyError::DefinitionNotFound)?;
            Ok((session, definition))
        })
        .await??;

        let answers = self.extract(&definition, &session.transcript).await?;
        let response = self.store_response(&session.id, answers).await?;
        self.reports.invalidate(&session.id).await;

        tracing::info!(session_id = %session.id, "survey response re-extracted");
        Ok(Submission { session, response })
    }

    /// Prompt, model call and normalization. Unparseable model output becomes
    /// an empty object, which normalizes to an all-`NO_EVIDENCE` map.
    async fn extract(
        &self,
        definition: &SurveyDefinition,
        transcript: &[TranscriptItem],
    ) -> Result<AnswerMap, SurveyError> {
        let request = CompletionRequest {
            system: build_extraction_prompt(definition),
            user: serde_json::to_string(&json!({ "transcript": transcript }))?,
            temperature: EXTRACTION_TEMPERATURE,
            json_mode: true,
        };

        let raw = self.model.complete(&request).await?;
        let parsed = serde_json::from_str::<Value>(&raw).unwrap_or_else(|err| {
            tracing::warn!(definition_id = %definition.id, error = %err, "extraction output was not valid JSON");
            json!({})
        });

        let answers = normalize_answers(definition, &parsed);
        tracing::debug!(
            definition_id = %definition.id,
            answered = answers.values().filter(|a| a.is_answered()).count(),
            total = answers.len(),
            "extraction normalized"
        );
        Ok(answers)
    }

    async fn store_response(&self, session_id: &str, answers: AnswerMap) -> Result<SurveyResponse, SurveyError> {
        let pool = self.pool.clone();
        let id = session_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<SurveyResponse, SurveyError> {
            let conn = pool.get()?;
            store::upsert_response(&conn, &id, &answers)
        })
        .await?
    }

    fn session_lock(&self, session_id: &str) -> SessionLock<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks.entry(session_id.to_string()).or_default().clone();
        SessionLock {
            locks: &self.locks,
            session_id: session_id.to_string(),
            lock,
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A checked-out per-session lock. The map entry is dropped with the last
/// holder, including when the owning future is cancelled.
struct SessionLock<'a> {
    locks: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    session_id: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Release our handle under the map lock; clones are only taken there.
        drop(std::mem::take(&mut self.lock));
        if locks.get(&self.session_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.session_id);
        }
    }
}
