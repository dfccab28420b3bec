//! Tagboard IPC
//!
//! Event bus for adapter-to-core communication

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

static NEXT_TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn generate_trace_id() -> String {
    let ts = now_unix_secs();
    let n = NEXT_TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("trace-{}-{}", ts, n)
}

fn default_schema_version() -> u16 {
    1
}

fn default_trace_id() -> String {
    generate_trace_id()
}

/// A marked region of a message's text denoting a mention.
///
/// `offset` and `length` are byte positions into the message text; the
/// transport adapter is responsible for converting whatever offset unit the
/// platform uses into bytes before a span is published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
    pub kind: SpanKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SpanKind {
    /// An inline `@handle` mention; the handle text lives in the message body.
    #[serde(rename = "bare_handle")]
    BareHandle,
    /// A mention the platform resolved to a concrete account.
    #[serde(rename = "resolved_account")]
    ResolvedAccount {
        #[serde(default)]
        account: Option<AccountRef>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRef {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    #[serde(default = "default_trace_id")]
    pub trace_id: String,
    pub channel: String,
    pub kind: MessageKind,
    pub chat_id: Option<i64>,
    pub message_id: Option<i64>,
    #[serde(default)]
    pub chat_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageKind {
    #[serde(rename = "message")]
    Message {
        from: String,
        text: String,
        #[serde(default)]
        spans: Vec<Span>,
    },

    #[serde(rename = "command")]
    Command { name: String, args: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: i64,
    pub text: String,
    pub reply_to: Option<i64>,
}

impl Envelope {
    pub fn new(channel: &str, kind: MessageKind) -> Self {
        Self {
            schema_version: default_schema_version(),
            trace_id: generate_trace_id(),
            channel: channel.to_string(),
            kind,
            chat_id: None,
            message_id: None,
            chat_type: None,
        }
    }

    pub fn with_chat_id(mut self, chat_id: i64) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_chat_type(mut self, chat_type: &str) -> Self {
        self.chat_type = Some(chat_type.to_string());
        self
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

pub const EVENT_BUS_CAPACITY: usize = 256;
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    inbound: broadcast::Sender<Envelope>,
    outbound: broadcast::Sender<OutboundMessage>,
}

impl EventBus {
    pub fn new() -> Self {
        let (inbound_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (outbound_tx, _) = broadcast::channel(OUTBOUND_CAPACITY);

        Self {
            inbound: inbound_tx,
            outbound: outbound_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inbound.subscribe()
    }

    pub fn publish(&self, envelope: Envelope) -> anyhow::Result<()> {
        self.inbound.send(envelope)?;
        Ok(())
    }

    pub fn outbound_sender(&self) -> broadcast::Sender<OutboundMessage> {
        self.outbound.clone()
    }

    pub fn outbound_subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.outbound.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_envelope() -> Envelope {
        Envelope::new(
            "telegram",
            MessageKind::Message {
                from: "user".to_string(),
                text: "hello @bob".to_string(),
                spans: vec![Span {
                    offset: 6,
                    length: 4,
                    kind: SpanKind::BareHandle,
                }],
            },
        )
    }

    #[test]
    fn envelope_has_schema_version_and_trace_id() {
        let env = message_envelope();
        assert_eq!(env.schema_version, 1);
        assert!(env.trace_id.starts_with("trace-"));
    }

    #[test]
    fn trace_id_different_for_each_envelope() {
        let env1 = message_envelope();
        let env2 = message_envelope();
        assert_ne!(env1.trace_id, env2.trace_id);
    }

    #[test]
    fn deserialize_message_without_spans_defaults_to_empty() {
        let json = r#"{
            "channel": "telegram",
            "kind": {"type": "message", "from": "user", "text": "hello"},
            "chat_id": 123,
            "message_id": 456
        }"#;
        let env: Envelope = serde_json::from_str(json).expect("deserialize");
        match env.kind {
            MessageKind::Message { spans, .. } => assert!(spans.is_empty()),
            other => panic!("unexpected kind: {:?}", other),
        }
        assert_eq!(env.schema_version, 1);
    }

    #[test]
    fn serialize_roundtrip_preserves_spans_and_chat_type() {
        let env = message_envelope()
            .with_chat_id(123)
            .with_message_id(456)
            .with_chat_type("supergroup");

        let json = env.to_json().expect("serialize");
        let parsed = Envelope::from_json(&json).expect("deserialize");

        assert_eq!(parsed.chat_id, Some(123));
        assert_eq!(parsed.message_id, Some(456));
        assert_eq!(parsed.chat_type.as_deref(), Some("supergroup"));
        match parsed.kind {
            MessageKind::Message { spans, .. } => {
                assert_eq!(spans.len(), 1);
                assert_eq!(spans[0].offset, 6);
                assert_eq!(spans[0].length, 4);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn resolved_account_span_roundtrip() {
        let span = Span {
            offset: 0,
            length: 5,
            kind: SpanKind::ResolvedAccount {
                account: Some(AccountRef {
                    id: 42,
                    username: None,
                    first_name: "Ada".to_string(),
                    last_name: Some("Lovelace".to_string()),
                }),
            },
        };
        let json = serde_json::to_string(&span).expect("serialize");
        let parsed: Span = serde_json::from_str(&json).expect("deserialize");
        match parsed.kind {
            SpanKind::ResolvedAccount { account: Some(acc) } => {
                assert_eq!(acc.id, 42);
                assert_eq!(acc.first_name, "Ada");
                assert_eq!(acc.last_name.as_deref(), Some("Lovelace"));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }
}
