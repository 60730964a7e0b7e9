//! End-of-interview summary sent over the interview socket.
//!
//! Keys are Korean on the wire; clients render them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::flow::InterviewSession;

/// Answers that count as avoidance when given verbatim.
const AVOIDANT_ANSWERS: &[&str] = &["없다", "모르겠다", "기억 안 나"];
const HESITATION_SILENCE_MS: u64 = 3_000;
const BASE_TRUST: f64 = 0.8;
const TRUST_PENALTY: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewSummary {
    #[serde(rename = "명시적_답변")]
    pub explicit_answers: BTreeMap<String, String>,
    #[serde(rename = "암묵적_패턴")]
    pub implicit: ImplicitPatterns,
    #[serde(rename = "시간_변화")]
    pub temporal: TemporalContext,
    #[serde(rename = "사회적_맥락")]
    pub social: SocialContext,
    #[serde(rename = "설문_메타")]
    pub meta: SummaryMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplicitPatterns {
    /// Tokens longer than one character that occur at least twice, most
    /// frequent first.
    #[serde(rename = "반복_키워드")]
    pub repeated_keywords: Vec<String>,
    #[serde(rename = "감정_태그")]
    pub emotion_tags: Vec<String>,
    #[serde(rename = "회피_주제")]
    pub avoidance_topics: Vec<String>,
    #[serde(rename = "침묵_주제")]
    pub hesitation_topics: Vec<String>,
    #[serde(rename = "필러")]
    pub fillers: Vec<String>,
}

/// Reserved for timeline analysis; currently always empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalContext {
    #[serde(rename = "과거")]
    pub past: BTreeMap<String, String>,
    #[serde(rename = "현재")]
    pub present: BTreeMap<String, String>,
    #[serde(rename = "전환점")]
    pub turning_points: Vec<String>,
}

/// Reserved for support-network analysis; currently always empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialContext {
    #[serde(rename = "주요_의존_대상")]
    pub dependants: Vec<String>,
    #[serde(rename = "지원_네트워크")]
    pub support_network: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryMeta {
    #[serde(rename = "총_소요_시간")]
    pub duration_ms: i64,
    #[serde(rename = "중단_사유")]
    pub end_reason: String,
    #[serde(rename = "응답_신뢰도_추정")]
    pub trust_score: f64,
}

pub fn build_summary(session: &InterviewSession) -> InterviewSummary {
    build_summary_at(session, Utc::now())
}

/// Summarizes `session`; `now` bounds the duration when nothing was logged.
pub fn build_summary_at(session: &InterviewSession, now: DateTime<Utc>) -> InterviewSummary {
    let log = session.log();

    let explicit_answers: BTreeMap<String, String> = log
        .iter()
        .map(|item| (item.question_id.clone(), item.answer.clone()))
        .collect();

    // (token, count), in first-seen order.
    let mut counts: Vec<(&str, usize)> = Vec::new();
    let mut hesitation_topics = Vec::new();
    let mut fillers = Vec::new();
    for item in log {
        for token in item.answer.split_whitespace().filter(|t| t.chars().count() > 1) {
            match counts.iter_mut().find(|(t, _)| *t == token) {
                Some((_, n)) => *n += 1,
                None => counts.push((token, 1)),
            }
        }
        if item.reading.hesitation || item.reading.silence_ms_before > HESITATION_SILENCE_MS {
            hesitation_topics.push(item.question_id.clone());
        }
        if let Some(filler) = &item.reading.filler {
            fillers.extend(filler.iter().cloned());
        }
    }
    // Stable sort keeps first-seen order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    let repeated_keywords = counts
        .iter()
        .filter(|(_, n)| *n >= 2)
        .map(|(t, _)| t.to_string())
        .collect();

    let avoidance_topics: Vec<String> = log
        .iter()
        .filter(|item| AVOIDANT_ANSWERS.contains(&item.answer.as_str()))
        .map(|item| item.question_id.clone())
        .collect();

    let avoidant_answers = explicit_answers
        .values()
        .filter(|a| AVOIDANT_ANSWERS.contains(&a.as_str()))
        .count();
    let trust_score = (BASE_TRUST
        - TRUST_PENALTY * avoidant_answers as f64
        - TRUST_PENALTY * hesitation_topics.len() as f64)
        .clamp(0.1, 0.95);

    let end = log.last().map(|item| item.timestamp).unwrap_or(now);
    let end_reason = match session.end_reason() {
        Some(reason) => reason.as_str().to_string(),
        None if session.is_complete() => "complete".to_string(),
        None => "interrupted".to_string(),
    };

    InterviewSummary {
        explicit_answers,
        implicit: ImplicitPatterns {
            repeated_keywords,
            emotion_tags: Vec::new(),
            avoidance_topics,
            hesitation_topics,
            fillers,
        },
        temporal: TemporalContext::default(),
        social: SocialContext::default(),
        meta: SummaryMeta {
            duration_ms: (end - session.started()).num_milliseconds(),
            end_reason,
            trust_score,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowQuestion, Stage};
    use chrono::Duration;
    use voxpoll_types::ParalinguisticReading;

    fn flow(n: usize) -> Vec<FlowQuestion> {
        (1..=n)
            .map(|i| FlowQuestion {
                id: format!("Q{i}"),
                stage: Stage::Core,
                utterance: format!("질문 {i}"),
            })
            .collect()
    }

    fn calm() -> ParalinguisticReading {
        ParalinguisticReading {
            silence_ms_before: 800,
            utterance_ms: 1500,
            ..Default::default()
        }
    }

    #[test]
    fn empty_session_is_interrupted() {
        let t0 = Utc::now();
        let session = InterviewSession::started_at("s", flow(3), t0);
        let summary = build_summary_at(&session, t0 + Duration::seconds(2));
        assert!(summary.explicit_answers.is_empty());
        assert_eq!(summary.meta.end_reason, "interrupted");
        assert_eq!(summary.meta.duration_ms, 2000);
        assert_eq!(summary.meta.trust_score, 0.8);
    }

    #[test]
    fn patterns_and_trust_are_derived_from_log() {
        let t0 = Utc::now();
        let mut session = InterviewSession::started_at("s", flow(4), t0);
        session.next_question();
        session.handle_user_turn_at("병원 가요 병원", &calm(), true, t0 + Duration::seconds(5));
        let hesitant = ParalinguisticReading {
            hesitation: true,
            filler: Some(vec!["음".into()]),
            ..calm()
        };
        session.handle_user_turn_at("음 시장 병원", &hesitant, true, t0 + Duration::seconds(9));
        session.handle_user_turn_at("모르겠다", &calm(), true, t0 + Duration::seconds(12));

        let summary = build_summary_at(&session, t0 + Duration::minutes(5));
        assert_eq!(summary.explicit_answers["Q3"], "모르겠다");
        assert_eq!(summary.implicit.repeated_keywords, vec!["병원".to_string()]);
        assert_eq!(summary.implicit.hesitation_topics, vec!["Q2".to_string()]);
        assert_eq!(summary.implicit.avoidance_topics, vec!["Q3".to_string()]);
        assert_eq!(summary.implicit.fillers, vec!["음".to_string()]);
        assert_eq!(summary.meta.duration_ms, 12_000);
        assert!((summary.meta.trust_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn serializes_with_korean_keys() {
        let session = InterviewSession::started_at("s", flow(1), Utc::now());
        let value = serde_json::to_value(build_summary(&session)).unwrap();
        assert!(value["설문_메타"]["응답_신뢰도_추정"].is_number());
        assert!(value["암묵적_패턴"]["반복_키워드"].is_array());
    }
}
