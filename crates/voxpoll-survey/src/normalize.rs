//! Deterministic normalization of raw extraction output.
//!
//! [`normalize_answers`] is the only place untyped model output is accepted.
//! The definition decides which keys exist: every question id gets exactly
//! one [`AnswerRecord`], ids the model invented are dropped, and every field
//! is type-checked individually so one malformed field never discards the
//! rest of the record.

use serde_json::{Map, Value};
use voxpoll_types::{AnswerMap, AnswerRecord, Hypothesis, SurveyDefinition, NO_EVIDENCE};

/// Builds the answer map for `definition` from the model's raw JSON.
///
/// `raw` is expected to look like `{"answers": {"Q1": {...}}}` but may be
/// anything; missing or non-object pieces degrade to the no-evidence record.
/// Feeding the serialized output back in yields the same map.
pub fn normalize_answers(definition: &SurveyDefinition, raw: &Value) -> AnswerMap {
    let answers = raw.get("answers").and_then(Value::as_object);

    definition
        .question_ids()
        .map(|id| {
            let record = answers
                .and_then(|map| map.get(id))
                .and_then(Value::as_object)
                .map(normalize_record)
                .unwrap_or_else(AnswerRecord::no_evidence);
            (id.to_string(), record)
        })
        .collect()
}

fn normalize_record(entry: &Map<String, Value>) -> AnswerRecord {
    let reasoning = entry
        .get("reasoning")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_EVIDENCE)
        .to_string();

    AnswerRecord {
        value: entry.get("value").cloned().unwrap_or(Value::Null),
        original_text: entry
            .get("originalText")
            .and_then(Value::as_str)
            .map(str::to_string),
        reasoning,
        confidence: entry.get("confidence").and_then(finite_number),
        evidence: entry.get("evidence").and_then(Value::as_array).map(|a| strings(a)),
        hypotheses: entry
            .get("hypotheses")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(normalize_hypothesis).collect()),
    }
}

/// Reshapes one hypothesis. Entries without evidence are dropped.
fn normalize_hypothesis(item: &Value) -> Option<Hypothesis> {
    let item = item.as_object()?;
    let evidence = item
        .get("evidence")
        .and_then(Value::as_array)
        .map(|a| strings(a))
        .unwrap_or_default();
    if evidence.is_empty() {
        return None;
    }

    Some(Hypothesis {
        value: item.get("value").cloned().unwrap_or(Value::Null),
        confidence: item.get("confidence").and_then(finite_number).unwrap_or(0.0),
        evidence,
    })
}

fn finite_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite())
}

fn strings(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}
