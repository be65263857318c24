//! Slow, bounded drift of the worldview

use super::core::{Traits, WORLDVIEW_KEYS};
use crate::llm::{parse_json, ChatMessage, LlmClient};
use anyhow::Result;
use std::collections::BTreeMap;

/// Largest change to one trait per evolution
pub const MAX_STEP: f64 = 0.05;

fn numbers(traits: &Traits) -> String {
    traits
        .iter()
        .map(|(k, v)| format!("{}={:.2}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn request(biology: &Traits, worldview: &Traits, medium_memory: &str) -> Vec<ChatMessage> {
    let keys = WORLDVIEW_KEYS
        .iter()
        .map(|k| format!("\"{}\"", k))
        .collect::<Vec<_>>()
        .join(", ");
    vec![
        ChatMessage::system(format!(
            "You adjust the personality of a chat bot after its recent experiences. Traits are \
             between 0 and 1. Reply with a JSON object holding a small change (between -{step} \
             and {step}) for each of these keys: {keys}. Reply with JSON only.",
            step = MAX_STEP,
            keys = keys,
        )),
        ChatMessage::user(format!(
            "Fixed temperament: {}\nCurrent worldview: {}\nRecent memory:\n{}",
            numbers(biology),
            numbers(worldview),
            medium_memory.trim()
        )),
    ]
}

/// Apply `deltas` to the worldview keys only, each step clamped to ±`MAX_STEP` and each value
/// to [0, 1].
pub fn apply(worldview: &Traits, deltas: &BTreeMap<String, f64>) -> Traits {
    let mut next = worldview.clone();
    for key in WORLDVIEW_KEYS {
        let Some(delta) = deltas.get(key).copied().filter(|d| d.is_finite()) else {
            continue;
        };
        let value = next.entry(key.to_owned()).or_insert(0.5);
        *value = (*value + delta.clamp(-MAX_STEP, MAX_STEP)).clamp(0.0, 1.0);
    }
    next
}

/// Ask the model for deltas and return the evolved worldview.
pub async fn evolve(
    llm: &dyn LlmClient,
    biology: &Traits,
    worldview: &Traits,
    medium_memory: &str,
) -> Result<Traits> {
    let reply = llm.chat(&request(biology, worldview, medium_memory)).await?;
    let deltas: BTreeMap<String, f64> = parse_json(&reply)?;
    Ok(apply(worldview, &deltas))
}
