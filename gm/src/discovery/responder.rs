//! Response streamer
//!
//! Builds the coaching prompt from the updated Blueprint and the recent
//! history, then streams the reply through the gateway. Turn flags are
//! derived from history alone, with no model call.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::extractor::ResponseExtractor;
use crate::config::ResponseFormat;
use crate::domain::{Blueprint, BlueprintField, HistoryEntry, MessageRole};
use crate::llm::{LlmError, LlmGateway, Message};
use crate::prompts::PromptLoader;

pub(crate) const CHAT_PROMPT: &str = "discovery-chat";
pub(crate) const CHAT_TAG: &str = "generate_chat";

const GREETING_FIRST_TURN: &str = "Start with a warm, brief Korean greeting since this is the first interaction.";
const GREETING_DEFAULT: &str = "DO NOT greet. Continue naturally.";
const SUGGESTION_INSTRUCTION: &str = "The user is asking for ideas. Offer two or three concrete options that fit \
     their situation, then ask which one feels right.";

/// Lowercase substrings that mark a request for suggestions
const SUGGESTION_KEYWORDS: [&str; 8] = ["제안", "추천", "도와", "알려", "예시", "suggest", "help", "recommend"];

const RAW_BUFFER: usize = 64;

/// Per-turn switches computed from history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnFlags {
    pub is_first_turn: bool,
    pub wants_suggestions: bool,
}

impl TurnFlags {
    /// `history` includes the current user message as its last entry
    pub fn from_history(history: &[HistoryEntry]) -> Self {
        let user_turns = history.iter().filter(|h| h.role == MessageRole::User).count();
        let latest = latest_message(history).to_lowercase();
        let flags = Self {
            is_first_turn: user_turns <= 1,
            wants_suggestions: SUGGESTION_KEYWORDS.iter().any(|k| latest.contains(k)),
        };
        debug!(?flags, user_turns, "TurnFlags::from_history: called");
        flags
    }
}

pub(crate) fn latest_message(history: &[HistoryEntry]) -> &str {
    history.last().map(|h| h.content.as_str()).unwrap_or_default()
}

/// The last `window` turns as `role: content` lines
pub(crate) fn history_lines(history: &[HistoryEntry], window: usize) -> String {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .map(|h| format!("{}: {}", h.role, h.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The single human turn both discovery calls send
pub(crate) fn human_turn(history: &[HistoryEntry], window: usize) -> Message {
    Message::user(format!(
        "Latest: {}\n\nHistory:\n{}",
        latest_message(history),
        history_lines(history, window)
    ))
}

#[derive(Debug, Serialize)]
struct ChatVars {
    goal: String,
    goal_score: u8,
    why: String,
    why_score: u8,
    timeline: String,
    obstacles: String,
    resources: String,
    milestones: String,
    uncertainties: String,
    missing_fields: String,
    greeting_instruction: &'static str,
    suggestion_instruction: &'static str,
    embedded_json: bool,
}

/// Streams the coaching reply for one turn
#[derive(Clone)]
pub struct ResponseStreamer {
    gateway: LlmGateway,
    prompts: Arc<PromptLoader>,
    history_window: usize,
    format: ResponseFormat,
}

impl ResponseStreamer {
    pub fn new(gateway: LlmGateway, prompts: Arc<PromptLoader>, history_window: usize, format: ResponseFormat) -> Self {
        debug!(history_window, ?format, "ResponseStreamer::new: called");
        Self {
            gateway,
            prompts,
            history_window,
            format,
        }
    }

    fn system_prompt(&self, history: &[HistoryEntry], blueprint: &Blueprint, missing: &[BlueprintField]) -> Result<String, LlmError> {
        let flags = TurnFlags::from_history(history);
        let vars = ChatVars {
            goal: blueprint.display_value(BlueprintField::Goal),
            goal_score: blueprint.field_scores.goal,
            why: blueprint.display_value(BlueprintField::Why),
            why_score: blueprint.field_scores.why,
            timeline: blueprint.display_value(BlueprintField::Timeline),
            obstacles: blueprint.display_value(BlueprintField::Obstacles),
            resources: blueprint.display_value(BlueprintField::Resources),
            milestones: blueprint.display_value(BlueprintField::Milestones),
            uncertainties: blueprint.display_uncertainties(),
            missing_fields: missing.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", "),
            greeting_instruction: if flags.is_first_turn { GREETING_FIRST_TURN } else { GREETING_DEFAULT },
            suggestion_instruction: if flags.wants_suggestions { SUGGESTION_INSTRUCTION } else { "" },
            embedded_json: self.format == ResponseFormat::EmbeddedJson,
        };
        self.prompts
            .render(CHAT_PROMPT, &vars)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    /// Stream the reply to `tx`; returns the full reply text
    ///
    /// Plain replies are relayed chunk by chunk. Embedded-JSON replies are
    /// relayed in one piece once the response string is complete, and not
    /// at all when it never closes. If `tx` closes, generation is abandoned
    /// and the text so far is returned.
    pub async fn stream(
        &self,
        history: &[HistoryEntry],
        blueprint: &Blueprint,
        missing: &[BlueprintField],
        tx: mpsc::Sender<String>,
    ) -> Result<String, LlmError> {
        debug!(history_len = history.len(), missing = missing.len(), "ResponseStreamer::stream: called");
        let system = self.system_prompt(history, blueprint, missing)?;
        let messages = vec![human_turn(history, self.history_window)];

        match self.format {
            ResponseFormat::Plain => self.gateway.stream(&system, messages, CHAT_TAG, tx).await,
            ResponseFormat::EmbeddedJson => self.stream_embedded(&system, messages, tx).await,
        }
    }

    async fn stream_embedded(&self, system: &str, messages: Vec<Message>, tx: mpsc::Sender<String>) -> Result<String, LlmError> {
        debug!("ResponseStreamer::stream_embedded: called");
        let (raw_tx, mut raw_rx) = mpsc::channel::<String>(RAW_BUFFER);

        let relay = async move {
            let mut extractor = ResponseExtractor::new();
            while let Some(raw) = raw_rx.recv().await {
                let text = extractor.push(&raw);
                if !text.is_empty() && tx.send(text).await.is_err() {
                    debug!("ResponseStreamer::stream_embedded: receiver dropped");
                    break;
                }
            }
            extractor
        };

        let (result, extractor) = tokio::join!(self.gateway.stream(system, messages, CHAT_TAG, raw_tx), relay);
        result?;
        extractor.finish().map_err(|e| {
            warn!(error = %e, "ResponseStreamer::stream_embedded: no usable reply");
            LlmError::InvalidResponse(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::llm::client::mock::MockLlmClient;

    fn streamer(mock: Arc<MockLlmClient>, format: ResponseFormat) -> ResponseStreamer {
        let gateway = LlmGateway::new(mock, &LlmConfig::default());
        let prompts = Arc::new(PromptLoader::embedded_only().unwrap());
        ResponseStreamer::new(gateway, prompts, 6, format)
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> String {
        let mut out = String::new();
        while let Some(t) = rx.recv().await {
            out.push_str(&t);
        }
        out
    }

    #[test]
    fn test_first_turn_and_suggestion_flags() {
        let first = TurnFlags::from_history(&[HistoryEntry::user("안녕하세요")]);
        assert!(first.is_first_turn);
        assert!(!first.wants_suggestions);

        let later = TurnFlags::from_history(&[
            HistoryEntry::user("hi"),
            HistoryEntry::assistant("hello"),
            HistoryEntry::user("Can you HELP me pick?"),
        ]);
        assert!(!later.is_first_turn);
        assert!(later.wants_suggestions);

        let korean = TurnFlags::from_history(&[HistoryEntry::user("좋은 방법 추천해줘")]);
        assert!(korean.wants_suggestions);
    }

    #[test]
    fn test_history_window_is_bounded() {
        let history: Vec<_> = (0..10).map(|i| HistoryEntry::user(format!("m{}", i))).collect();
        let lines = history_lines(&history, 6);
        assert_eq!(lines.lines().count(), 6);
        assert!(lines.starts_with("user: m4"));
        assert!(lines.ends_with("user: m9"));

        let turn = human_turn(&history, 6);
        assert!(turn.content.starts_with("Latest: m9\n\nHistory:\nuser: m4"));
    }

    #[tokio::test]
    async fn test_prompt_uses_sentinels_and_greeting() {
        let mock = Arc::new(MockLlmClient::new(vec!["반가워요!"]));
        let s = streamer(mock.clone(), ResponseFormat::Plain);
        let (tx, rx) = mpsc::channel(64);

        let missing = Blueprint::default().missing_fields(60);
        let full = s
            .stream(&[HistoryEntry::user("안녕")], &Blueprint::default(), &missing, tx)
            .await
            .unwrap();
        assert_eq!(full, "반가워요!");
        assert_eq!(collect(rx).await, full);

        let request = &mock.requests()[0];
        assert!(request.has_tag(CHAT_TAG));
        assert!(request.system_prompt.contains("- Goal: Not set (score 0/100)"));
        assert!(request.system_prompt.contains("Unresolved uncertainties: None"));
        assert!(request.system_prompt.contains("Still unclear: goal, why"));
        assert!(request.system_prompt.contains(GREETING_FIRST_TURN));
        assert!(request.system_prompt.contains("Do NOT output JSON"));
        assert!(!request.system_prompt.contains(SUGGESTION_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_embedded_json_streams_only_response_text() {
        let mock = Arc::new(MockLlmClient::new(vec![r#"{"response": "첫 줄\n둘째 줄"}"#]));
        let s = streamer(mock.clone(), ResponseFormat::EmbeddedJson);
        let (tx, rx) = mpsc::channel(64);

        let history = [HistoryEntry::user("a"), HistoryEntry::assistant("b"), HistoryEntry::user("c")];
        let full = s.stream(&history, &Blueprint::default(), &[], tx).await.unwrap();
        assert_eq!(full, "첫 줄\n둘째 줄");
        assert_eq!(collect(rx).await, full);

        let request = &mock.requests()[0];
        assert!(request.system_prompt.contains("\"response\""));
        assert!(request.system_prompt.contains(GREETING_DEFAULT));
    }

    #[tokio::test]
    async fn test_embedded_json_without_marker_emits_nothing() {
        let mock = Arc::new(MockLlmClient::new(vec!["plain text, no json at all"]));
        let s = streamer(mock, ResponseFormat::EmbeddedJson);
        let (tx, rx) = mpsc::channel(64);

        let err = s.stream(&[HistoryEntry::user("a")], &Blueprint::default(), &[], tx).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
        assert!(collect(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_embedded_json_cut_off_relays_nothing() {
        let mock = Arc::new(MockLlmClient::new(vec![r#"{"response": "half a sentence and then the stream di"#]));
        let s = streamer(mock, ResponseFormat::EmbeddedJson);
        let (tx, rx) = mpsc::channel(64);

        let err = s.stream(&[HistoryEntry::user("a")], &Blueprint::default(), &[], tx).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
        assert_eq!(collect(rx).await, "");
    }
}
