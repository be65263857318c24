//! Flag-reaction translation through Google's public translate front-end

use anyhow::{anyhow, Result};
use std::time::Duration;

const TRANSLATE_URL: &str = "https://translate.googleapis.com/translate_a/single";
const TRANSLATE_TIMEOUT: Duration = Duration::from_secs(15);

/// Country (ISO 3166 alpha-2) → language code understood by the translator
const FLAG_LANGUAGES: &[(&str, &str)] = &[
    ("AE", "ar"),
    ("AR", "es"),
    ("AT", "de"),
    ("AU", "en"),
    ("BR", "pt"),
    ("CA", "en"),
    ("CH", "de"),
    ("CN", "zh-CN"),
    ("CZ", "cs"),
    ("DE", "de"),
    ("DK", "da"),
    ("EG", "ar"),
    ("ES", "es"),
    ("FI", "fi"),
    ("FR", "fr"),
    ("GB", "en"),
    ("GR", "el"),
    ("HU", "hu"),
    ("ID", "id"),
    ("IL", "iw"),
    ("IN", "hi"),
    ("IT", "it"),
    ("JP", "ja"),
    ("KR", "ko"),
    ("MX", "es"),
    ("NL", "nl"),
    ("NO", "no"),
    ("PL", "pl"),
    ("PT", "pt"),
    ("RO", "ro"),
    ("RU", "ru"),
    ("SA", "ar"),
    ("SE", "sv"),
    ("TH", "th"),
    ("TR", "tr"),
    ("TW", "zh-TW"),
    ("UA", "uk"),
    ("US", "en"),
    ("VN", "vi"),
];

/// The two letters of a regional-indicator flag, e.g. `"🇩🇪"` → `"DE"`.
pub fn flag_country(emoji: &str) -> Option<String> {
    const FIRST: u32 = 0x1F1E6;
    let letters: Vec<char> = emoji
        .chars()
        .map(|c| {
            let offset = (c as u32).checked_sub(FIRST).filter(|o| *o < 26)?;
            char::from_u32('A' as u32 + offset)
        })
        .collect::<Option<_>>()?;
    (letters.len() == 2).then(|| letters.into_iter().collect())
}

/// Target language for a flag emoji, if it is one we know.
pub fn flag_language(emoji: &str) -> Option<&'static str> {
    let country = flag_country(emoji)?;
    FLAG_LANGUAGES
        .iter()
        .find(|(c, _)| *c == country)
        .map(|(_, language)| *language)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub text: String,
    /// Detected source language
    pub source: Option<String>,
}

/// Read the front-end's nested-array reply: `[[["text", "original", …], …], null, "de", …]`.
pub fn parse_response(body: &serde_json::Value) -> Result<Translation> {
    let segments = body
        .get(0)
        .and_then(|s| s.as_array())
        .ok_or_else(|| anyhow!("Unexpected translation reply"))?;
    let text: String = segments
        .iter()
        .filter_map(|segment| segment.get(0).and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        return Err(anyhow!("Empty translation"));
    }

    Ok(Translation {
        text,
        source: body.get(2).and_then(|s| s.as_str()).map(str::to_owned),
    })
}

pub struct Translator {
    client: reqwest::Client,
    url: String,
}

impl Translator {
    pub fn new() -> Result<Self> {
        Self::with_url(TRANSLATE_URL)
    }

    pub fn with_url(url: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(TRANSLATE_TIMEOUT)
                .build()?,
            url: url.to_owned(),
        })
    }

    pub async fn translate(&self, text: &str, target: &str) -> Result<Translation> {
        let body = self
            .client
            .get(&self.url)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flags_map_to_languages() {
        assert_eq!(flag_country("🇩🇪").as_deref(), Some("DE"));
        assert_eq!(flag_language("🇩🇪"), Some("de"));
        assert_eq!(flag_language("🇺🇸"), Some("en"));
        assert_eq!(flag_language("🇯🇵"), Some("ja"));
    }

    #[test]
    fn other_emoji_are_ignored() {
        assert_eq!(flag_country("👍"), None);
        assert_eq!(flag_country("🇩"), None);
        assert_eq!(flag_country("DE"), None);
        // A valid flag we have no language for
        assert_eq!(flag_language("🇦🇶"), None);
    }

    #[test]
    fn table_is_sorted_and_unique() {
        assert!(FLAG_LANGUAGES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn reply_segments_are_joined() {
        let body = json!([
            [["Hello ", "Hallo ", null, null, 10], ["world", "Welt", null, null, 10]],
            null,
            "de"
        ]);
        let translation = parse_response(&body).unwrap();
        assert_eq!(translation.text, "Hello world");
        assert_eq!(translation.source.as_deref(), Some("de"));
    }

    #[test]
    fn malformed_replies_are_errors() {
        assert!(parse_response(&json!({"error": 1})).is_err());
        assert!(parse_response(&json!([[], null, "de"])).is_err());
    }

    #[tokio::test]
    async fn queries_the_front_end() {
        use axum::{extract::Query, routing::get, Json, Router};
        use std::collections::HashMap;

        let app = Router::new().route(
            "/single",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q["client"], "gtx");
                assert_eq!(q["tl"], "fr");
                Json(json!([[[format!("[{}]", q["q"]), q["q"], null]], null, "en"]))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let translator = Translator::with_url(&format!("http://{}/single", addr)).unwrap();
        let translation = translator.translate("good morning", "fr").await.unwrap();
        assert_eq!(translation.text, "[good morning]");
        assert_eq!(translation.source.as_deref(), Some("en"));
    }
}
