//! What the mind thinks of each person, updated by cheap heuristics

use super::state::Emotions;
use serenity::all::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Neutral,
    Positive,
    Negative,
    Aggressive,
}

const POSITIVE: [&str; 10] = [
    "thanks", "thank you", "love", "great", "awesome", "nice", "lol", "haha", "cool", "<3",
];
const NEGATIVE: [&str; 8] = [
    "hate", "stupid", "shut up", "annoying", "dumb", "boring", "idiot", "useless",
];

/// Classify a message by its wording, caps ratio, and exclamation marks.
pub fn classify(content: &str) -> Tone {
    let lower = content.to_lowercase();
    let letters: Vec<char> = content.chars().filter(|c| c.is_alphabetic()).collect();
    let caps_ratio = if letters.len() >= 8 {
        letters.iter().filter(|c| c.is_uppercase()).count() as f64 / letters.len() as f64
    } else {
        0.0
    };
    let exclamations = content.matches('!').count();
    let negative = NEGATIVE.iter().any(|w| lower.contains(w));
    let positive = POSITIVE.iter().any(|w| lower.contains(w));

    if (negative && (caps_ratio > 0.6 || exclamations >= 2)) || (caps_ratio > 0.8 && exclamations >= 3) {
        Tone::Aggressive
    } else if negative {
        Tone::Negative
    } else if positive {
        Tone::Positive
    } else {
        Tone::Neutral
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Person {
    pub user_id: UserId,
    #[serde(default)]
    pub name: String,
    pub respect: f64,
    pub trust: f64,
    pub irritation: f64,
    pub affinity: f64,
    #[serde(default)]
    pub summary: String,
}

impl Person {
    pub fn new(user_id: UserId, name: &str) -> Self {
        let mut person = Self {
            user_id,
            name: name.to_owned(),
            respect: 0.5,
            trust: 0.5,
            irritation: 0.0,
            affinity: 0.5,
            summary: String::new(),
        };
        person.summary = person.describe();
        person
    }

    /// Nudge the relationship by the tone of one message.
    pub fn observe(&mut self, name: &str, tone: Tone) {
        self.name = name.to_owned();
        let (affinity, trust, irritation) = match tone {
            Tone::Neutral => (0.0, 0.005, -0.01),
            Tone::Positive => (0.03, 0.01, -0.02),
            Tone::Negative => (-0.03, -0.01, 0.04),
            Tone::Aggressive => (-0.05, -0.03, 0.08),
        };
        self.affinity = (self.affinity + affinity).clamp(0.0, 1.0);
        self.trust = (self.trust + trust).clamp(0.0, 1.0);
        self.irritation = (self.irritation + irritation).clamp(0.0, 1.0);
        self.summary = self.describe();
    }

    /// How this person colors the mood
    pub fn affect(&self, emotions: &mut Emotions) {
        if self.irritation > 0.6 {
            emotions.anger = (emotions.anger + 0.05).min(1.0);
        }
        if self.affinity > 0.7 {
            emotions.joy = (emotions.joy + 0.03).min(1.0);
            emotions.engagement = (emotions.engagement + 0.03).min(1.0);
        }
    }

    /// Plain-language summary for prompts
    pub fn describe(&self) -> String {
        let feeling = match (self.affinity, self.irritation) {
            (_, i) if i > 0.6 => "has been getting on your nerves",
            (a, _) if a > 0.7 => "is someone you like a lot",
            (a, _) if a < 0.3 => "is someone you are cool towards",
            _ => "is someone you know casually",
        };
        let trust = if self.trust > 0.7 {
            ", and you trust them"
        } else if self.trust < 0.3 {
            ", and you don't fully trust them"
        } else {
            ""
        };
        format!("{} {}{}.", self.name, feeling, trust)
    }
}
