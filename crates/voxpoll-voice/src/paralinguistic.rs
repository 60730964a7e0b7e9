//! Text-only hesitation heuristics.
//!
//! There is no audio analysis here: the reading is derived from the
//! transcript text and the gap since the previous turn.

use voxpoll_types::ParalinguisticReading;

/// Filler tokens, matched as substrings in this order.
pub const HESITATION_LEXICON: [&str; 4] = ["음", "어", "글쎄", "저기"];

const MAX_SILENCE_MS: u64 = 8_000;
const MS_PER_CHAR: u64 = 120;
const MIN_UTTERANCE_MS: u64 = 400;
const MAX_UTTERANCE_MS: u64 = 12_000;

/// Estimates a reading for `text`, spoken `ms_since_last_turn` after the
/// previous turn.
pub fn estimate(text: &str, ms_since_last_turn: u64) -> ParalinguisticReading {
    let filler: Vec<String> = HESITATION_LEXICON
        .iter()
        .filter(|token| text.contains(*token))
        .map(|token| token.to_string())
        .collect();

    let chars = text.chars().count() as u64;
    let utterance_ms = chars
        .saturating_mul(MS_PER_CHAR)
        .clamp(MIN_UTTERANCE_MS, MAX_UTTERANCE_MS);

    ParalinguisticReading {
        silence_ms_before: ms_since_last_turn.min(MAX_SILENCE_MS),
        utterance_ms,
        hesitation: !filler.is_empty(),
        filler: if filler.is_empty() { None } else { Some(filler) },
        fatigue_score: None,
    }
}
