//! Legacy embedded-JSON reply extraction
//!
//! With `response-format: embedded-json` the chat model replies with
//! `{"response": "..."}`. The extractor watches the raw token stream, starts
//! decoding after the `"response"` marker and stops at the closing quote.
//! Escape sequences may be split across chunks. Decoded text is held back
//! until the closing quote arrives, so a cut-off reply yields nothing.

use thiserror::Error;
use tracing::debug;

const MARKERS: [&str; 2] = ["\"response\": \"", "\"response\":\""];

/// Seek buffer cap; when exceeded only the tail is kept
const SEEK_BUFFER_CAP: usize = 200;
const SEEK_BUFFER_KEEP: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("Response marker not found in model output")]
    MarkerNotFound,

    #[error("Model output ended inside the response string")]
    Unterminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seeking,
    Emitting,
    Done,
}

/// Incremental extractor for the `response` string of a streamed JSON object
#[derive(Debug)]
pub struct ResponseExtractor {
    phase: Phase,
    seek: String,
    escape: String,
    decoded: String,
}

impl Default for ResponseExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseExtractor {
    pub fn new() -> Self {
        Self {
            phase: Phase::Seeking,
            seek: String::new(),
            escape: String::new(),
            decoded: String::new(),
        }
    }

    /// Feed one chunk; returns the whole reply once its closing quote is
    /// seen and an empty string otherwise
    pub fn push(&mut self, chunk: &str) -> String {
        match self.phase {
            Phase::Done => String::new(),
            Phase::Emitting => self.emit(chunk),
            Phase::Seeking => {
                self.seek.push_str(chunk);
                let found = MARKERS
                    .iter()
                    .filter_map(|m| self.seek.find(m).map(|at| at + m.len()))
                    .min();
                match found {
                    Some(start) => {
                        debug!(start, "ResponseExtractor::push: marker found");
                        let rest = self.seek.split_off(start);
                        self.seek.clear();
                        self.phase = Phase::Emitting;
                        self.emit(&rest)
                    }
                    None => {
                        if self.seek.len() > SEEK_BUFFER_CAP {
                            let mut cut = self.seek.len() - SEEK_BUFFER_KEEP;
                            while !self.seek.is_char_boundary(cut) {
                                cut += 1;
                            }
                            self.seek.drain(..cut);
                        }
                        String::new()
                    }
                }
            }
        }
    }

    fn emit(&mut self, chunk: &str) -> String {
        for c in chunk.chars() {
            if self.escape.is_empty() {
                match c {
                    '\\' => self.escape.push(c),
                    '"' => {
                        debug!(len = self.decoded.len(), "ResponseExtractor::emit: closing quote");
                        self.phase = Phase::Done;
                        return self.decoded.clone();
                    }
                    _ => self.decoded.push(c),
                }
                continue;
            }

            self.escape.push(c);
            if let Some(text) = decode_escape(&self.escape) {
                self.decoded.push_str(&text);
                self.escape.clear();
            }
        }
        String::new()
    }

    /// Everything decoded so far, released or not
    pub fn decoded(&self) -> &str {
        &self.decoded
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// End of stream: the full reply, or why there is none
    pub fn finish(self) -> Result<String, ExtractError> {
        match self.phase {
            Phase::Done => Ok(self.decoded),
            Phase::Seeking => Err(ExtractError::MarkerNotFound),
            Phase::Emitting => Err(ExtractError::Unterminated),
        }
    }
}

/// Decode a complete escape sequence; `None` while more input is needed
fn decode_escape(seq: &str) -> Option<String> {
    let mut chars = seq.chars().skip(1);
    let kind = chars.next()?;
    let simple = match kind {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '"' => '"',
        '\\' => '\\',
        '/' => '/',
        'b' => '\u{8}',
        'f' => '\u{c}',
        'u' => {
            let hex: String = chars.collect();
            if hex.len() < 4 {
                return None;
            }
            let decoded = u32::from_str_radix(&hex, 16)
                .ok()
                .and_then(char::from_u32)
                .unwrap_or(char::REPLACEMENT_CHARACTER);
            return Some(decoded.to_string());
        }
        other => return Some(format!("\\{}", other)),
    };
    Some(simple.to_string())
}
