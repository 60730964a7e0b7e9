//! Server-driven interview flow.
//!
//! An [`InterviewSession`] walks the questions of a survey definition one at
//! a time. Each user turn (partial or final ASR text plus its
//! [`ParalinguisticReading`]) yields a list of [`FlowAction`]s: ask the next
//! question, clarify the current one, or end the interview. Fatigue and
//! avoidance counters decide early termination.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use voxpoll_types::{ParalinguisticReading, SurveyDefinition};

/// Any of these in a final turn ends the interview immediately.
pub const TERMINATION_KEYWORDS: &[&str] = &["끝", "그만", "됐어", "이거 언제 끝나", "여기까지"];
/// Any of these in a final turn counts as avoidance.
pub const AVOIDANCE_TOKENS: &[&str] = &["없다", "모르겠다", "기억 안 나", "글쎄"];

const MAX_SESSION_MINUTES: i64 = 20;
const LONG_SILENCE_MS: u64 = 5_000;
const SHORT_UTTERANCE_MS: u64 = 800;
const FATIGUE_SCORE_LIMIT: f64 = 0.6;
const AVOIDANCE_LIMIT: u32 = 3;
const FATIGUE_LIMIT: u32 = 4;

/// Idle interviews older than this are evicted from [`InterviewRegistry`].
pub const SESSION_IDLE_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Intro,
    Rapport,
    Screening,
    Core,
    Deepening,
    Wrapup,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Fatigue,
    Keyword,
    Avoidance,
    Complete,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fatigue => "fatigue",
            Self::Keyword => "keyword",
            Self::Avoidance => "avoidance",
            Self::Complete => "complete",
        }
    }
}

/// One step of the interview script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowQuestion {
    pub id: String,
    pub stage: Stage,
    pub utterance: String,
}

/// Lays out `definition` as an interview script.
///
/// The first question is the intro, the last third is wrap-up, the third
/// before it is deepening and everything else is core.
pub fn question_flow(definition: &SurveyDefinition) -> Vec<FlowQuestion> {
    let total = definition.questions.len();
    let third = total / 3;
    definition
        .questions
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let stage = if i == 0 {
                Stage::Intro
            } else if i >= total - third {
                Stage::Wrapup
            } else if i >= total - 2 * third {
                Stage::Deepening
            } else {
                Stage::Core
            };
            FlowQuestion {
                id: q.id.clone(),
                stage,
                utterance: q.text.clone(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPrompt {
    pub utterance: String,
    pub state: Stage,
    pub hint: Option<String>,
}

/// What the client should do next. Serializes as `{type, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FlowAction {
    Ask(FlowPrompt),
    Clarify(FlowPrompt),
    End { reason: EndReason },
}

/// A final answer recorded against a question.
#[derive(Debug, Clone, PartialEq)]
pub struct LogItem {
    pub question_id: String,
    pub question: String,
    pub answer: String,
    pub reading: ParalinguisticReading,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InterviewSession {
    pub id: String,
    flow: Vec<FlowQuestion>,
    stage: Stage,
    question_index: usize,
    fatigue: u32,
    avoidance: u32,
    end_reason: Option<EndReason>,
    started_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    last_question: Option<String>,
    log: Vec<LogItem>,
}

impl InterviewSession {
    pub fn new(id: impl Into<String>, flow: Vec<FlowQuestion>) -> Self {
        Self::started_at(id, flow, Utc::now())
    }

    pub fn started_at(id: impl Into<String>, flow: Vec<FlowQuestion>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            flow,
            stage: Stage::Intro,
            question_index: 0,
            fatigue: 0,
            avoidance: 0,
            end_reason: None,
            started_at: now,
            last_seen: now,
            last_question: None,
            log: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_complete(&self) -> bool {
        self.stage == Stage::End
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn log(&self) -> &[LogItem] {
        &self.log
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn fatigue(&self) -> u32 {
        self.fatigue
    }

    pub fn avoidance(&self) -> u32 {
        self.avoidance
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_seen = now;
    }

    /// The prompt for the current question, or `None` (and stage `End`) once
    /// the script is exhausted.
    pub fn next_question(&mut self) -> Option<FlowPrompt> {
        let Some(q) = self.flow.get(self.question_index) else {
            self.stage = Stage::End;
            return None;
        };
        self.last_question = Some(q.utterance.clone());
        self.stage = q.stage;
        Some(FlowPrompt {
            utterance: q.utterance.clone(),
            state: q.stage,
            hint: Some(q.id.clone()),
        })
    }

    pub fn handle_user_turn(&mut self, text: &str, reading: &ParalinguisticReading, is_final: bool) -> Vec<FlowAction> {
        self.handle_user_turn_at(text, reading, is_final, Utc::now())
    }

    /// Applies one user turn observed at `now`.
    pub fn handle_user_turn_at(
        &mut self,
        text: &str,
        reading: &ParalinguisticReading,
        is_final: bool,
        now: DateTime<Utc>,
    ) -> Vec<FlowAction> {
        self.touch(now);

        if now - self.started_at > Duration::minutes(MAX_SESSION_MINUTES) {
            return vec![self.end(EndReason::Fatigue)];
        }

        if is_final && TERMINATION_KEYWORDS.iter().any(|k| text.contains(k)) {
            return vec![self.end(EndReason::Keyword)];
        }

        if !is_final && reading.silence_ms_before > LONG_SILENCE_MS {
            self.fatigue += 1;
            return vec![self.clarify_after_silence()];
        }

        if is_final && is_avoidance(text) {
            self.avoidance += 1;
        } else {
            self.avoidance = self.avoidance.saturating_sub(1);
        }

        if reading.silence_ms_before > LONG_SILENCE_MS {
            self.fatigue += 1;
        }
        if reading.fatigue_score.is_some_and(|s| s > FATIGUE_SCORE_LIMIT) {
            self.fatigue += 1;
        }
        if reading.utterance_ms < SHORT_UTTERANCE_MS {
            self.fatigue += 1;
        }

        if self.avoidance >= AVOIDANCE_LIMIT {
            return vec![self.end(EndReason::Avoidance)];
        }
        if self.fatigue >= FATIGUE_LIMIT {
            return vec![self.end(EndReason::Fatigue)];
        }

        if is_final {
            self.record(text, reading, now);
            self.question_index += 1;
        }

        if self.question_index >= self.flow.len() {
            return vec![self.end(EndReason::Complete)];
        }

        self.next_question().map(FlowAction::Ask).into_iter().collect()
    }

    /// Repeats the last question more gently after the user talked over it.
    pub fn handle_barge_in(&self) -> FlowAction {
        let utterance = match &self.last_question {
            Some(q) => format!("{q} 혹시 이 부분이 어려우시면 편하게 말씀 주세요."),
            None => "말씀해 주시면 이어서 질문드릴게요.".to_string(),
        };
        FlowAction::Clarify(FlowPrompt {
            utterance,
            state: self.stage,
            hint: Some("제가 천천히 다시 여쭤볼게요.".to_string()),
        })
    }

    fn clarify_after_silence(&self) -> FlowAction {
        let base = self.last_question.as_deref().unwrap_or("제가 다시 여쭤볼게요.");
        FlowAction::Clarify(FlowPrompt {
            utterance: format!("{base} 혹시 질문이 길었나요? 편하게 한두 마디로 말씀 주세요."),
            state: self.stage,
            hint: Some("silence".to_string()),
        })
    }

    fn end(&mut self, reason: EndReason) -> FlowAction {
        self.stage = Stage::End;
        self.end_reason = Some(reason);
        tracing::info!(
            session_id = %self.id,
            reason = reason.as_str(),
            answered = self.log.len(),
            "interview ended"
        );
        FlowAction::End { reason }
    }

    fn record(&mut self, answer: &str, reading: &ParalinguisticReading, now: DateTime<Utc>) {
        let Some(q) = self.flow.get(self.question_index) else {
            return;
        };
        self.log.push(LogItem {
            question_id: q.id.clone(),
            question: q.utterance.clone(),
            answer: answer.to_string(),
            reading: reading.clone(),
            timestamp: now,
        });
    }
}

fn is_avoidance(text: &str) -> bool {
    AVOIDANCE_TOKENS.iter().any(|t| text.contains(t))
}

/// Live interviews keyed by session id.
#[derive(Debug, Default)]
pub struct InterviewRegistry {
    sessions: Mutex<HashMap<String, InterviewSession>>,
}

impl InterviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: InterviewSession) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session.id.clone(), session);
    }

    /// Runs `f` against the session, if it exists.
    pub fn with_session<R>(&self, id: &str, f: impl FnOnce(&mut InterviewSession) -> R) -> Option<R> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get_mut(id).map(f)
    }

    pub fn remove(&self, id: &str) -> Option<InterviewSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops sessions idle for longer than the TTL. Returns how many.
    pub fn evict_stale(&self, now: DateTime<Utc>) -> usize {
        let ttl = Duration::minutes(SESSION_IDLE_TTL_MINUTES);
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_seen <= ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle interview sessions");
        }
        evicted
    }
}
