//! Folding the short-term buffer into medium memory

use super::state::{GuildState, Speaker};
use crate::llm::ChatMessage;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Buffered characters that trigger a summary
pub const SUMMARY_THRESHOLD: usize = 6000;

const SUMMARIZER_PROMPT: &str = "You maintain the long-term memory of a member of a Discord \
server. Merge the current memory with the recent conversation into one or two short \
paragraphs. Keep names, running jokes, ongoing topics, and how people get along. Drop small \
talk. Reply with the new memory only.";

/// An episodic memory written after each summary
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MemoryEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub summary: String,
    pub participants: Vec<String>,
    pub emotional_weight: f64,
    pub importance: f64,
    pub timestamp: DateTime<Utc>,
}

pub fn is_due(state: &GuildState) -> bool {
    state.short_chars > SUMMARY_THRESHOLD
}

fn transcript(state: &GuildState) -> String {
    state
        .short_buffer
        .iter()
        .map(|msg| match msg.speaker {
            Speaker::User(_) => format!("{}: {}", msg.author_name, msg.content),
            Speaker::Assistant => format!("You: {}", msg.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn request(state: &GuildState) -> Vec<ChatMessage> {
    let memory = match state.medium_memory.trim() {
        "" => "(nothing yet)",
        memory => memory,
    };
    vec![
        ChatMessage::system(SUMMARIZER_PROMPT),
        ChatMessage::user(format!(
            "Current memory:\n{}\n\nRecent conversation:\n{}",
            memory,
            transcript(state)
        )),
    ]
}

pub fn memory_entry(state: &GuildState, summary: &str, now: DateTime<Utc>) -> MemoryEntry {
    let participants: BTreeSet<String> = state
        .short_buffer
        .iter()
        .filter(|msg| matches!(msg.speaker, Speaker::User(_)))
        .map(|msg| msg.author_name.clone())
        .collect();
    let emotions = &state.emotions;

    MemoryEntry {
        kind: "conversation".to_owned(),
        summary: summary.to_owned(),
        participants: participants.into_iter().collect(),
        emotional_weight: ((emotions.engagement + emotions.joy - 0.5 * emotions.anger) / 2.0)
            .clamp(0.0, 1.0),
        importance: 0.6,
        timestamp: now,
    }
}
