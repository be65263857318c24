//! Chat completions from OpenAI-compatible providers

use crate::config::AiConfig;
use anyhow::{anyhow, Context as _, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Per-request HTTP timeout
pub const LLM_TIMEOUT: Duration = Duration::from_secs(25);

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: ChatMessageRole,
    pub content: String,
}

#[allow(non_camel_case_types)] // Serialized literally; case matters
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChatMessageRole {
    system,
    user,
    assistant,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatMessageRole::system,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatMessageRole::user,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatMessageRole::assistant,
            content: content.into(),
        }
    }
}

/// Something that continues a chat
#[serenity::async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(serde::Serialize)]
struct LlmChatRequest<'a> {
    /// LLM model name
    model: &'a str,
    /// Chat conversation to continue.
    messages: &'a [ChatMessage],
    /// Whether to stream one token at a time, or return entire response is one go
    stream: bool,
    temperature: f32,
}

#[derive(serde::Deserialize)]
struct LlmChatResponse {
    choices: Vec<LlmChoice>,
}

#[derive(serde::Deserialize)]
struct LlmChoice {
    message: ChatMessage,
}

/// g4f and pollinations both speak the OpenAI chat format; only the endpoint and model differ.
pub struct HttpLlm {
    url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpLlm {
    pub fn new(cfg: &AiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .context("Could not build HTTP client")?;
        Ok(Self {
            url: cfg.base_url.clone(),
            model: cfg.model.clone(),
            client,
        })
    }
}

#[serenity::async_trait]
impl LlmClient for HttpLlm {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = LlmChatRequest {
            model: &self.model,
            messages,
            stream: false,
            temperature: 0.8,
        };

        crate::log_internal!("Sending request to chat endpoint {}... ", self.url);
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Could not reach {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "{} answered {}: {}",
                self.url,
                status,
                body.chars().take(200).collect::<String>()
            ));
        }

        let response: LlmChatResponse = response
            .json()
            .await
            .with_context(|| format!("Could not parse response from {}", self.url))?;
        crate::log_internal!("Sending request to chat endpoint {}... done", self.url);

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_owned())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow!("{} returned no content", self.url))
    }
}

/// Parse a JSON object out of a model reply, which may wrap it in a code fence or prose.
pub fn parse_json<T: DeserializeOwned>(reply: &str) -> Result<T> {
    if let Ok(parsed) = serde_json::from_str(reply.trim()) {
        return Ok(parsed);
    }

    let body = match reply.find("```json") {
        Some(start) => {
            let after = &reply[start + 7..];
            after.find("```").map_or(after, |end| &after[..end])
        }
        None => match (reply.find('{'), reply.rfind('}')) {
            (Some(start), Some(end)) if start < end => &reply[start..=end],
            _ => reply,
        },
    };

    serde_json::from_str(body.trim())
        .with_context(|| format!("Could not find JSON in reply: {}", reply))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::{collections::VecDeque, sync::Mutex};

    /// Replies from a script and records every request
    #[derive(Default)]
    pub struct FakeLlm {
        pub replies: Mutex<VecDeque<Result<String>>>,
        pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl FakeLlm {
        pub fn replying(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
                ..Default::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                replies: Mutex::new(VecDeque::from([Err(anyhow!("503 Service Unavailable"))])),
                ..Default::default()
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[serenity::async_trait]
    impl LlmClient for FakeLlm {
        async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("no scripted reply")))
        }
    }

    #[test]
    fn request_serializes_openai_style() {
        let messages = [ChatMessage::system("be nice"), ChatMessage::user("hi")];
        let request = LlmChatRequest {
            model: "openai",
            messages: &messages,
            stream: false,
            temperature: 0.8,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "openai");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn response_parses() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"hello"}}]}"#;
        let response: LlmChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.choices[0].message.content, "hello");
    }

    #[test]
    fn json_found_in_fences_and_prose() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Delta {
            curiosity: f64,
        }

        let plain: Delta = parse_json(r#"{"curiosity": 0.1}"#).unwrap();
        assert_eq!(plain, Delta { curiosity: 0.1 });
        let fenced: Delta = parse_json("Sure!\n```json\n{\"curiosity\": -0.02}\n```").unwrap();
        assert_eq!(fenced, Delta { curiosity: -0.02 });
        let prose: Delta = parse_json("Here: {\"curiosity\": 0.03} done").unwrap();
        assert_eq!(prose, Delta { curiosity: 0.03 });
        assert!(parse_json::<Delta>("no json here").is_err());
    }
}
