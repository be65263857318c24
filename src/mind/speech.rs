//! Building what the mind says and sending it

use super::{
    core::{render_traits, Traits},
    state::{Emotions, GuildState, Speaker},
};
use crate::{
    helper::{split_message, MESSAGE_LIMIT},
    llm::ChatMessage,
};
use anyhow::Result;
use serenity::all::{ChannelId, CreateMessage, Http};
use std::{collections::HashSet, sync::Arc, time::Duration};

pub const CHARS_PER_TOKEN: usize = 4;
/// Pause between the chunks of a long reply
pub const CHUNK_GAP: Duration = Duration::from_millis(200);

/// Token budgets per prompt section
#[derive(Debug, Clone)]
pub struct Budgets {
    pub medium_memory: usize,
    pub people: usize,
    pub short_context: usize,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            medium_memory: 500,
            people: 250,
            short_context: 1500,
        }
    }
}

/// Snapshot of the process-wide core for one prompt
pub struct Persona {
    pub identity: String,
    pub biology: Traits,
    pub worldview: Traits,
}

/// Sends the mind's messages
#[serenity::async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, channel_id: ChannelId, content: &str) -> Result<()>;
}

pub struct SerenityOutbound {
    http: Arc<Http>,
}

impl SerenityOutbound {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[serenity::async_trait]
impl Outbound for SerenityOutbound {
    async fn send(&self, channel_id: ChannelId, content: &str) -> Result<()> {
        channel_id
            .send_message(&self.http, CreateMessage::new().content(content))
            .await?;
        Ok(())
    }
}

/// First `max_chars` characters of `text`
fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// The mood as instructions, never as numbers
pub fn mood_lines(emotions: &Emotions) -> Vec<&'static str> {
    let mut lines = Vec::new();
    if emotions.anger > 0.5 {
        lines.push("You are irritated right now. Keep it short and a bit blunt.");
    }
    if emotions.joy > 0.5 {
        lines.push("You are in a good mood.");
    }
    if emotions.fatigue > 0.6 {
        lines.push("You are tired. Keep replies brief.");
    }
    if emotions.engagement > 0.5 {
        lines.push("You are really into the current conversation.");
    }
    if lines.is_empty() {
        lines.push("You feel calm.");
    }
    lines
}

pub fn system_prompt(
    persona: &Persona,
    state: &GuildState,
    custom_prompt: Option<&str>,
    budgets: &Budgets,
) -> String {
    let mut prompt = persona.identity.clone();
    prompt.push_str("\n\nTemperament: ");
    prompt.push_str(&render_traits(&persona.biology));
    prompt.push_str("\nOutlook: ");
    prompt.push_str(&render_traits(&persona.worldview));
    prompt.push_str("\n\n");
    prompt.push_str(&mood_lines(&state.emotions).join(" "));

    let memory = state.medium_memory.trim();
    if !memory.is_empty() {
        prompt.push_str("\n\nWhat you remember about this server:\n");
        prompt.push_str(truncate(memory, budgets.medium_memory * CHARS_PER_TOKEN));
    }

    // People in the recent conversation, most recent speaker first
    let mut seen = HashSet::new();
    let mut people = String::new();
    let people_budget = budgets.people * CHARS_PER_TOKEN;
    for msg in state.short_buffer.iter().rev() {
        let Speaker::User(user_id) = msg.speaker else {
            continue;
        };
        if !seen.insert(user_id) {
            continue;
        }
        let Some(person) = state.people.get(&user_id) else {
            continue;
        };
        if people.len() + person.summary.len() + 3 > people_budget {
            break;
        }
        people.push_str("\n- ");
        people.push_str(&person.summary);
    }
    if !people.is_empty() {
        prompt.push_str("\n\nPeople here:");
        prompt.push_str(&people);
    }

    if let Some(custom) = custom_prompt.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(custom);
    }
    prompt
}

/// System prompt followed by as much of the recent conversation as the budget allows.
pub fn build_messages(
    persona: &Persona,
    state: &GuildState,
    custom_prompt: Option<&str>,
    budgets: &Budgets,
) -> Vec<ChatMessage> {
    // Build in reverse order so that we can stop adding once the budget is spent.
    let budget = budgets.short_context * CHARS_PER_TOKEN;
    let mut used = 0;
    let mut messages = Vec::new();
    for msg in state.short_buffer.iter().rev() {
        let message = match msg.speaker {
            Speaker::User(_) => ChatMessage::user(format!("{}: {}", msg.author_name, msg.content)),
            Speaker::Assistant => ChatMessage::assistant(msg.content.clone()),
        };
        used += message.content.chars().count();
        if used > budget {
            break;
        }
        messages.push(message);
    }

    messages.push(ChatMessage::system(system_prompt(
        persona,
        state,
        custom_prompt,
        budgets,
    )));
    // Reverse back to chronological order.
    messages.reverse();
    messages
}

/// Send `reply` in Discord-sized chunks.  Returns the chunks sent.
pub async fn deliver(outbound: &dyn Outbound, channel_id: ChannelId, reply: &str) -> Result<usize> {
    let chunks = split_message(reply, MESSAGE_LIMIT);
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(CHUNK_GAP).await;
        }
        outbound.send(channel_id, chunk).await?;
    }
    Ok(chunks.len())
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::{
        llm::ChatMessageRole,
        mind::{core::WORLDVIEW_KEYS, person::Person},
    };
    use chrono::Utc;
    use serenity::all::UserId;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Records what would have been sent
    #[derive(Default)]
    pub struct FakeOutbound {
        pub sent: Mutex<Vec<(ChannelId, String, Instant)>>,
    }

    impl FakeOutbound {
        pub fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, text, _)| text.clone())
                .collect()
        }
    }

    #[serenity::async_trait]
    impl Outbound for FakeOutbound {
        async fn send(&self, channel_id: ChannelId, content: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((channel_id, content.to_owned(), Instant::now()));
            Ok(())
        }
    }

    pub fn persona() -> Persona {
        Persona {
            identity: "You are Nex.".to_owned(),
            biology: [("energy".to_owned(), 0.9)].into_iter().collect(),
            worldview: WORLDVIEW_KEYS.iter().map(|k| (k.to_string(), 0.5)).collect(),
        }
    }

    fn chatty_state() -> GuildState {
        let now = Utc::now();
        let mut state = GuildState::default();
        let channel = ChannelId::new(1);
        state.people.insert(UserId::new(1), Person::new(UserId::new(1), "Kim"));
        state.people.insert(UserId::new(2), Person::new(UserId::new(2), "Lee"));
        state.push_user(UserId::new(1), "Kim", "first", false, channel, now);
        state.push_assistant("reply", now);
        state.push_user(UserId::new(2), "Lee", "second", true, channel, now);
        state
    }

    #[test]
    fn messages_are_chronological_after_the_system_prompt() {
        let state = chatty_state();
        let messages = build_messages(&persona(), &state, None, &Budgets::default());

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, ChatMessageRole::system);
        assert_eq!(messages[1].content, "Kim: first");
        assert_eq!(messages[2], ChatMessage::assistant("reply"));
        assert_eq!(messages[3].content, "Lee: second");
    }

    #[test]
    fn short_context_keeps_the_newest_messages() {
        let state = chatty_state();
        let budgets = Budgets {
            short_context: 4, // 16 characters
            ..Default::default()
        };
        let messages = build_messages(&persona(), &state, None, &budgets);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "reply");
        assert_eq!(messages[2].content, "Lee: second");
    }

    #[test]
    fn system_prompt_has_every_section() {
        let mut state = chatty_state();
        state.medium_memory = "Kim likes trains.".to_owned();
        let prompt = system_prompt(&persona(), &state, Some("Speak German."), &Budgets::default());

        assert!(prompt.starts_with("You are Nex."));
        assert!(prompt.contains("energy=very high"));
        assert!(prompt.contains("optimism=moderate"));
        assert!(prompt.contains("You feel calm."));
        assert!(prompt.contains("Kim likes trains."));
        // Most recent speaker first
        let lee = prompt.find("Lee is").unwrap();
        let kim = prompt.find("Kim is").unwrap();
        assert!(lee < kim);
        assert!(prompt.ends_with("Speak German."));
    }

    #[test]
    fn medium_memory_is_trimmed() {
        let mut state = GuildState::default();
        state.medium_memory = "m".repeat(10_000);
        let budgets = Budgets {
            medium_memory: 10,
            ..Default::default()
        };
        let prompt = system_prompt(&persona(), &state, None, &budgets);
        assert!(prompt.contains(&"m".repeat(40)));
        assert!(!prompt.contains(&"m".repeat(41)));
    }

    #[tokio::test(start_paused = true)]
    async fn long_replies_go_out_in_spaced_chunks() {
        let outbound = FakeOutbound::default();
        let reply = format!("{}\n{}", "a".repeat(1500), "b".repeat(1500));
        let sent = deliver(&outbound, ChannelId::new(7), &reply).await.unwrap();

        assert_eq!(sent, 2);
        let log = outbound.sent.lock().unwrap();
        assert_eq!(log[0].1, "a".repeat(1500));
        assert!(log[1].2 - log[0].2 >= CHUNK_GAP);
    }
}
