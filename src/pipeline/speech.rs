//! Speech rendering: text → MP3 audio.
//!
//! ## Why chunk the text?
//!
//! The Google Translate speech endpoint only accepts short inputs (about
//! 100 characters per request). Longer text is split at sentence ends when
//! possible, then at word boundaries, and very long words are hard-split.
//! Each chunk is fetched in order and the MP3 frames are concatenated, which
//! players handle as one continuous stream.
//!
//! The service depends on [`SpeechSynthesizer`], so tests plug in a local
//! fake instead of the public endpoint.

use crate::config::ServiceConfig;
use crate::error::BizBotError;
use crate::pipeline::write_atomic;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Maximum characters per speech request.
pub const MAX_CHUNK_CHARS: usize = 100;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Something that turns text into encoded audio bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BizBotError>;
}

/// [`SpeechSynthesizer`] backed by the Google Translate `translate_tts` endpoint.
#[derive(Debug, Clone)]
pub struct GoogleTts {
    client: reqwest::Client,
    endpoint: String,
    language: String,
}

impl GoogleTts {
    pub fn new(config: &ServiceConfig) -> Result<Self, BizBotError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.speech_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BizBotError::SpeechFailed(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.speech_endpoint.clone(),
            language: config.speech_language.clone(),
        })
    }

    async fn fetch_chunk(&self, chunk: &str, idx: usize, total: usize) -> Result<Vec<u8>, BizBotError> {
        let total_s = total.to_string();
        let idx_s = idx.to_string();
        let len_s = chunk.chars().count().to_string();
        let url = reqwest::Url::parse_with_params(
            &self.endpoint,
            [
                ("ie", "UTF-8"),
                ("q", chunk),
                ("tl", self.language.as_str()),
                ("client", "tw-ob"),
                ("total", total_s.as_str()),
                ("idx", idx_s.as_str()),
                ("textlen", len_s.as_str()),
            ],
        )
        .map_err(|e| BizBotError::SpeechFailed(format!("bad endpoint '{}': {e}", self.endpoint)))?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                BizBotError::SpeechFailed(format!("chunk {} timed out", idx + 1))
            } else {
                BizBotError::SpeechFailed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(BizBotError::SpeechFailed(format!(
                "chunk {}/{}: HTTP {}",
                idx + 1,
                total,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BizBotError::SpeechFailed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BizBotError> {
        let chunks = chunk_text(text, MAX_CHUNK_CHARS);
        debug!("Speech: {} chunks for {} chars", chunks.len(), text.chars().count());

        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            audio.extend(self.fetch_chunk(chunk, idx, chunks.len()).await?);
        }
        Ok(audio)
    }
}

/// Synthesise `text` and store the audio at `path`, returning the bytes.
///
/// Blank text fails with [`BizBotError::EmptyInput`] before any request is
/// made or file written.
pub async fn narrate(
    synth: &dyn SpeechSynthesizer,
    text: &str,
    path: &Path,
) -> Result<Vec<u8>, BizBotError> {
    if text.trim().is_empty() {
        return Err(BizBotError::EmptyInput { what: "text to narrate" });
    }
    info!("Narrating: {}", preview(text, 50));

    let audio = synth.synthesize(text).await?;
    if audio.is_empty() {
        return Err(BizBotError::SpeechFailed("service returned no audio".into()));
    }
    write_atomic(path, &audio).await?;
    debug!("Wrote {} bytes of audio to {}", audio.len(), path.display());
    Ok(audio)
}

/// First `n` characters of `text`, on a char boundary.
pub fn preview(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

// ── Chunking ─────────────────────────────────────────────────────────────

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Sentences are packed together while they fit; a sentence that does not
/// fit on its own is split between words; a word longer than `max_chars`
/// is split between characters.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    let push = |piece: &str, current: &mut String, current_len: &mut usize, chunks: &mut Vec<String>| {
        let len = piece.chars().count();
        let needed = if current.is_empty() { len } else { *current_len + 1 + len };
        if needed > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(current));
            *current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            *current_len += 1;
        }
        current.push_str(piece);
        *current_len += len;
    };

    for sentence in split_sentences(text) {
        let sentence = sentence.split_whitespace().collect::<Vec<_>>().join(" ");
        if sentence.is_empty() {
            continue;
        }
        if sentence.chars().count() <= max_chars {
            push(&sentence, &mut current, &mut current_len, &mut chunks);
            continue;
        }
        for word in sentence.split(' ') {
            for piece in split_long_word(word, max_chars) {
                push(piece, &mut current, &mut current_len, &mut chunks);
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Cut after `.`, `!`, `?`, `;` or `:` when followed by whitespace or the
/// end, and at every newline. `3.5` stays together.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let at_end_or_space = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if c == '\n' || (matches!(c, '.' | '!' | '?' | ';' | ':') && at_end_or_space) {
            let end = i + c.len_utf8();
            out.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}

fn split_long_word(word: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (i, _) in word.char_indices() {
        if count == max_chars {
            pieces.push(&word[start..i]);
            start = i;
            count = 0;
        }
        count += 1;
    }
    if start < word.len() {
        pieces.push(&word[start..]);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("Hello world.", 100), vec!["Hello world."]);
    }

    #[test]
    fn chunks_never_exceed_limit() {
        let text = "Revenue grew strongly in the third quarter. ".repeat(20)
            + &"x".repeat(250)
            + " tail";
        let chunks = chunk_text(&text, MAX_CHUNK_CHARS);
        assert!(chunks.len() > 5);
        for c in &chunks {
            assert!(c.chars().count() <= MAX_CHUNK_CHARS, "too long: {c:?}");
            assert!(!c.is_empty());
        }
        let rejoined: String = chunks.concat().split_whitespace().collect();
        let original: String = text.split_whitespace().collect();
        assert_eq!(rejoined, original);
    }

    #[test]
    fn prefers_sentence_boundaries() {
        let a = "a".repeat(60) + ".";
        let b = "b".repeat(60) + ".";
        let chunks = chunk_text(&format!("{a} {b}"), 100);
        assert_eq!(chunks, vec![a, b]);
    }

    #[test]
    fn decimals_stay_together() {
        assert_eq!(
            split_sentences("Growth was 3.5 percent. Good"),
            vec!["Growth was 3.5 percent.", " Good"]
        );
    }

    #[test]
    fn long_word_split_on_char_boundaries() {
        let word = "é".repeat(7);
        let pieces = split_long_word(&word, 3);
        assert_eq!(pieces, vec!["ééé", "ééé", "é"]);
    }

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(chunk_text("  \n\t ", 100).is_empty());
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("héllo wörld", 4), "héll");
        assert_eq!(preview("short", 50), "short");
    }

    struct Silent;

    #[async_trait]
    impl SpeechSynthesizer for Silent {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, BizBotError> {
            panic!("must not be called for blank input");
        }
    }

    #[tokio::test]
    async fn narrate_rejects_blank_text_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        let err = narrate(&Silent, "   \n", &path).await.unwrap_err();
        assert!(matches!(err, BizBotError::EmptyInput { .. }));
        assert!(!path.exists());
    }

    /// Serves `ID3<idx>:<q>;` for every chunk request, or 500 when `fail` is set.
    async fn spawn_fake_endpoint(fail: bool) -> String {
        let app = Router::new().route(
            "/translate_tts",
            get(move |Query(params): Query<HashMap<String, String>>| async move {
                if fail {
                    return Err(StatusCode::INTERNAL_SERVER_ERROR);
                }
                assert_eq!(params.get("client").map(String::as_str), Some("tw-ob"));
                assert_eq!(params.get("tl").map(String::as_str), Some("en"));
                Ok(format!("ID3{}:{};", params["idx"], params["q"]).into_bytes())
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/translate_tts")
    }

    fn config_for(endpoint: String) -> ServiceConfig {
        ServiceConfig::builder().speech_endpoint(endpoint).build().unwrap()
    }

    #[tokio::test]
    async fn google_tts_concatenates_chunks_in_order() {
        let tts = GoogleTts::new(&config_for(spawn_fake_endpoint(false).await)).unwrap();
        let first = "a".repeat(60) + ".";
        let second = "b".repeat(60) + ".";

        let audio = tts.synthesize(&format!("{first} {second}")).await.unwrap();
        let audio = String::from_utf8(audio).unwrap();
        assert_eq!(audio, format!("ID30:{first};ID31:{second};"));
    }

    #[tokio::test]
    async fn narrate_writes_audio_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last-answer-audio.mp3");
        let tts = GoogleTts::new(&config_for(spawn_fake_endpoint(false).await)).unwrap();

        let audio = narrate(&tts, "Hello there.", &path).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), audio);
        assert_eq!(audio, b"ID30:Hello there.;");
    }

    #[tokio::test]
    async fn endpoint_failure_is_speech_error_and_keeps_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary-audio.mp3");
        std::fs::write(&path, b"previous").unwrap();
        let tts = GoogleTts::new(&config_for(spawn_fake_endpoint(true).await)).unwrap();

        let err = narrate(&tts, "Hello.", &path).await.unwrap_err();
        assert!(matches!(err, BizBotError::SpeechFailed(_)), "got {err:?}");
        assert_eq!(std::fs::read(&path).unwrap(), b"previous");
    }
}
