//! Turning user input into playable tracks

use crate::error::BotError;
use anyhow::Result;
use regex::Regex;
use std::{process::Stdio, sync::OnceLock, time::Duration};
use tokio::process::Command;

pub const YTDLP_PIPE: &str = "ytdlp-pipe";
pub const YTDLP_LINK: &str = "ytdlp-link";
pub const KKDAI_PIPE: &str = "kkdai-pipe";
pub const KKDAI_LINK: &str = "kkdai-link";
pub const FFMPEG_LINK: &str = "ffmpeg-link";

pub const PARSERS: [&str; 5] = [YTDLP_PIPE, YTDLP_LINK, KKDAI_PIPE, KKDAI_LINK, FFMPEG_LINK];

#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    /// Media URL, or a downloader search expression for title searches
    pub url: String,
    pub title: String,
    pub duration: Option<Duration>,
    pub source_name: &'static str,
    /// Parsers to try, in order
    pub parsers: Vec<String>,
}

struct Source {
    name: &'static str,
    pattern: &'static str,
    /// Downloader search prefix, for sources that can look up titles
    search_prefix: Option<&'static str>,
    parsers: &'static [&'static str],
    is_radio: bool,
}

const SOURCES: [Source; 3] = [
    Source {
        name: "youtube",
        pattern: r"^https?://(www\.|m\.|music\.)?(youtube\.com|youtu\.be)/",
        search_prefix: Some("ytsearch1:"),
        parsers: &[YTDLP_PIPE, YTDLP_LINK, KKDAI_PIPE, KKDAI_LINK],
        is_radio: false,
    },
    Source {
        name: "soundcloud",
        pattern: r"^https?://(www\.|m\.)?soundcloud\.com/",
        search_prefix: Some("scsearch1:"),
        parsers: &[YTDLP_PIPE, YTDLP_LINK],
        is_radio: false,
    },
    // Any other stream URL
    Source {
        name: "radio",
        pattern: r"^https?://\S+$",
        search_prefix: None,
        parsers: &[FFMPEG_LINK],
        is_radio: true,
    },
];

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SOURCES
            .iter()
            .filter_map(|s| Regex::new(s.pattern).ok())
            .collect()
    })
}

fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

pub fn source_names() -> impl Iterator<Item = &'static str> {
    SOURCES.iter().map(|s| s.name)
}

/// Resolve `input` (URL or search text) to tracks, honoring an explicit source and parser.
pub fn resolve(input: &str, source: Option<&str>, parser: Option<&str>) -> Result<Vec<TrackInfo>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(BotError::InvalidInput("Give me a URL or something to search for.".to_owned()).into());
    }
    let url = is_url(input);

    let index = match source {
        Some(name) => {
            let index = SOURCES
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| BotError::InvalidInput(format!("Unknown source `{}`.", name)))?;
            let chosen = &SOURCES[index];
            if url && !matches(index, input) {
                return Err(BotError::InvalidInput(format!(
                    "That URL is not a {} link.",
                    chosen.name
                ))
                .into());
            }
            if !url && chosen.search_prefix.is_none() {
                return Err(BotError::InvalidInput(format!(
                    "The {} source needs a URL.",
                    chosen.name
                ))
                .into());
            }
            index
        }
        // Specific sources first; radio takes whatever URL is left.
        None if url => (0..SOURCES.len())
            .filter(|i| !SOURCES[*i].is_radio)
            .find(|i| matches(*i, input))
            .or_else(|| SOURCES.iter().position(|s| s.is_radio))
            .ok_or_else(|| BotError::InvalidInput("I can't play that URL.".to_owned()))?,
        // Bare text is a YouTube search.
        None => 0,
    };
    let chosen = &SOURCES[index];

    let selected = parser.unwrap_or(chosen.parsers[0]);
    if !chosen.parsers.contains(&selected) {
        return Err(BotError::InvalidInput(format!(
            "The {} source can't use the `{}` parser. Try one of: {}.",
            chosen.name,
            selected,
            chosen.parsers.join(", ")
        ))
        .into());
    }
    let mut parsers: Vec<String> = vec![selected.to_owned()];
    parsers.extend(
        chosen
            .parsers
            .iter()
            .filter(|p| **p != selected)
            .map(|p| p.to_string()),
    );

    let track_url = match chosen.search_prefix {
        _ if url => input.to_owned(),
        Some(prefix) => format!("{}{}", prefix, input),
        None => {
            return Err(BotError::InvalidInput(format!("The {} source needs a URL.", chosen.name)).into())
        }
    };

    Ok(vec![TrackInfo {
        url: track_url,
        title: input.to_owned(),
        duration: None,
        source_name: chosen.name,
        parsers,
    }])
}

fn matches(index: usize, input: &str) -> bool {
    patterns().get(index).is_some_and(|re| re.is_match(input))
}

/// Fill in the title and duration the downloader reports.  Radio streams have neither, and a
/// failed lookup leaves the track as it was.
pub async fn describe(track: &mut TrackInfo) {
    if SOURCES.iter().any(|s| s.name == track.source_name && s.is_radio) {
        return;
    }
    let output = Command::new("yt-dlp")
        .args(["--no-playlist", "--skip-download", "--print", "duration", "--print", "title"])
        .arg(&track.url)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => {
            let (duration, title) = parse_metadata(&String::from_utf8_lossy(&output.stdout));
            track.duration = duration.or(track.duration);
            if let Some(title) = title {
                track.title = title;
            }
        }
        Ok(output) => crate::log_warn!("yt-dlp could not describe {}: {}", track.url, output.status),
        Err(e) => crate::log_warn!("Could not run yt-dlp for {}: {}", track.url, e),
    }
}

/// Duration and title from `--print duration --print title` output
fn parse_metadata(stdout: &str) -> (Option<Duration>, Option<String>) {
    let mut lines = stdout.lines().map(str::trim);
    let duration = lines
        .next()
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64);
    let title = lines
        .next()
        .filter(|line| !line.is_empty() && *line != "NA")
        .map(str::to_owned);
    (duration, title)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(input: &str, source: Option<&str>, parser: Option<&str>) -> TrackInfo {
        let mut tracks = resolve(input, source, parser).unwrap();
        assert_eq!(tracks.len(), 1);
        tracks.remove(0)
    }

    #[test]
    fn youtube_url_detected() {
        let track = one("https://www.youtube.com/watch?v=abc", None, None);
        assert_eq!(track.source_name, "youtube");
        assert_eq!(track.parsers[0], YTDLP_PIPE);
        assert_eq!(track.parsers.len(), 4);
        assert_eq!(one("https://youtu.be/abc", None, None).source_name, "youtube");
    }

    #[test]
    fn soundcloud_url_detected() {
        let track = one("https://soundcloud.com/artist/song", None, None);
        assert_eq!(track.source_name, "soundcloud");
    }

    #[test]
    fn unknown_urls_fall_back_to_radio() {
        let track = one("http://stream.example.org:8000/live.mp3", None, None);
        assert_eq!(track.source_name, "radio");
        assert_eq!(track.parsers, vec![FFMPEG_LINK.to_owned()]);
    }

    #[test]
    fn text_is_a_youtube_search() {
        let track = one("lofi hip hop", None, None);
        assert_eq!(track.source_name, "youtube");
        assert_eq!(track.url, "ytsearch1:lofi hip hop");
        assert_eq!(track.title, "lofi hip hop");

        let track = one("lofi hip hop", Some("soundcloud"), None);
        assert_eq!(track.url, "scsearch1:lofi hip hop");
    }

    #[test]
    fn radio_never_takes_text() {
        assert!(resolve("jazz", Some("radio"), None).is_err());
    }

    #[test]
    fn explicit_source_must_match_url() {
        assert!(resolve("https://soundcloud.com/a/b", Some("youtube"), None).is_err());
        // Radio accepts any URL when asked for explicitly.
        assert_eq!(
            one("https://youtu.be/abc", Some("radio"), None).source_name,
            "radio"
        );
    }

    #[test]
    fn selected_parser_goes_first() {
        let track = one("https://youtu.be/abc", None, Some(KKDAI_LINK));
        assert_eq!(
            track.parsers,
            vec![KKDAI_LINK, YTDLP_PIPE, YTDLP_LINK, KKDAI_PIPE]
        );
    }

    #[test]
    fn downloader_metadata_parsed() {
        let (duration, title) = parse_metadata("213.5\nNever Gonna Give You Up\n");
        assert_eq!(duration, Some(Duration::from_millis(213_500)));
        assert_eq!(title.as_deref(), Some("Never Gonna Give You Up"));

        // Live streams report no duration
        assert_eq!(parse_metadata("NA\nLofi radio\n").0, None);
        assert_eq!(parse_metadata("").1, None);
        assert_eq!(parse_metadata("12\nNA").1, None);
    }

    #[tokio::test]
    async fn radio_tracks_are_not_described() {
        let mut track = one("http://radio.example/live", None, None);
        let before = track.clone();
        describe(&mut track).await;
        assert_eq!(track, before);
    }

    #[test]
    fn unsupported_parser_rejected() {
        assert!(resolve("https://soundcloud.com/a/b", None, Some(KKDAI_PIPE)).is_err());
        assert!(resolve("http://radio.example/live", None, Some(YTDLP_PIPE)).is_err());
        assert!(resolve("   ", None, None).is_err());
        assert!(resolve("x", Some("bandcamp"), None).is_err());
    }
}
