//! Tagboard Core
//!
//! Wires the transport event bus to the mention store: extracts mentions
//! from inbound messages, counts them, and answers the bot commands.

pub mod mentions;

use anyhow::Result;
use std::sync::Arc;
use tagboard_ipc::{Envelope, EventBus, MessageKind, OutboundMessage, Span};
use tagboard_storage::{LeaderboardRow, MentionStore};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

pub const LEADERBOARD_LIMIT: u32 = tagboard_storage::DEFAULT_LEADERBOARD_LIMIT;

const START_TEXT: &str = "Hi! I track how often people are mentioned in this chat.\n\
    - Mention someone with @username or via text mention.\n\
    - Use /stats to see the leaderboard.\n\
    Stats are per chat and stored in SQLite.";

const EMPTY_STATS_TEXT: &str = "No mentions tracked yet.";

/// What happened to one message's worth of mention spans.
///
/// `skipped` counts spans dropped as malformed (out of bounds, empty
/// handle, account-less resolved mention); those are not errors. Storage
/// failures are logged per record and do not abort the remainder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSummary {
    pub stored: usize,
    pub skipped: usize,
}

/// Mentions are only counted in group scopes; private and channel traffic
/// is ignored by policy.
pub fn is_group_scope(chat_type: Option<&str>) -> bool {
    matches!(chat_type, Some("group") | Some("supergroup"))
}

pub fn format_leaderboard(rows: &[LeaderboardRow]) -> String {
    if rows.is_empty() {
        return EMPTY_STATS_TEXT.to_string();
    }
    let mut lines = vec!["Mention leaderboard:".to_string()];
    for (i, row) in rows.iter().enumerate() {
        lines.push(format!("{}. {}: {}", i + 1, row.display, row.count));
    }
    lines.join("\n")
}

/// Extract and count every mention in one message. Malformed spans are
/// skipped; a storage failure on one record is logged and the rest still
/// apply.
pub async fn record_mentions(
    storage: &Mutex<MentionStore>,
    chat_id: i64,
    text: &str,
    spans: &[Span],
) -> ProcessSummary {
    let records = mentions::extract(text, spans);
    let mut summary = ProcessSummary {
        stored: 0,
        skipped: spans.len().saturating_sub(records.len()),
    };

    let store = storage.lock().await;
    for record in &records {
        match store.record(chat_id, &record.hint, &record.display) {
            Ok(()) => summary.stored += 1,
            Err(err) => {
                error!(
                    "Failed to record mention of {} in chat {}: {}",
                    record.display, chat_id, err
                );
            }
        }
    }

    summary
}

pub struct TagboardRuntime {
    storage: Arc<Mutex<MentionStore>>,
    event_bus: EventBus,
}

impl TagboardRuntime {
    pub fn new(storage: MentionStore) -> Self {
        Self {
            storage: Arc::new(Mutex::new(storage)),
            event_bus: EventBus::new(),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn storage(&self) -> Arc<Mutex<MentionStore>> {
        Arc::clone(&self.storage)
    }

    /// Process inbound envelopes until the bus closes. Each envelope is
    /// handled in its own task, so chats never block each other.
    pub async fn run(&self) -> Result<()> {
        info!("Tagboard runtime starting...");

        let mut inbound_rx = self.event_bus.subscribe();
        let outbound = self.event_bus.outbound_sender();

        loop {
            match inbound_rx.recv().await {
                Ok(envelope) => {
                    let storage = Arc::clone(&self.storage);
                    let outbound = outbound.clone();
                    tokio::spawn(async move {
                        handle_envelope(envelope, storage, outbound).await;
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Tagboard runtime stopped: event bus closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Tagboard runtime lagged; skipped {} envelopes", skipped);
                }
            }
        }

        Ok(())
    }
}

async fn handle_envelope(
    envelope: Envelope,
    storage: Arc<Mutex<MentionStore>>,
    outbound: broadcast::Sender<OutboundMessage>,
) {
    let Some(chat_id) = envelope.chat_id else {
        return;
    };

    match envelope.kind {
        MessageKind::Command { ref name, .. } => {
            let reply = match name.as_str() {
                "start" => START_TEXT.to_string(),
                "stats" => {
                    let store = storage.lock().await;
                    match store.leaderboard(chat_id, LEADERBOARD_LIMIT) {
                        Ok(rows) => format_leaderboard(&rows),
                        Err(err) => {
                            error!(
                                "Leaderboard query failed for chat {} (trace_id={}): {}",
                                chat_id, envelope.trace_id, err
                            );
                            return;
                        }
                    }
                }
                _ => return,
            };

            let message = OutboundMessage {
                channel: envelope.channel.clone(),
                chat_id,
                text: reply,
                reply_to: envelope.message_id,
            };
            if let Err(err) = outbound.send(message) {
                warn!("Failed to queue reply for chat {}: {}", chat_id, err);
            }
        }
        MessageKind::Message { text, spans, .. } => {
            if !is_group_scope(envelope.chat_type.as_deref()) {
                return;
            }
            if spans.is_empty() {
                return;
            }

            let summary = record_mentions(&storage, chat_id, &text, &spans).await;
            debug!(
                "Processed {} mention span(s) in chat {}: {} stored, {} skipped (trace_id={})",
                spans.len(),
                chat_id,
                summary.stored,
                summary.skipped,
                envelope.trace_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{format_leaderboard, is_group_scope, record_mentions, ProcessSummary};
    use std::time::{SystemTime, UNIX_EPOCH};
    use tagboard_ipc::{Span, SpanKind};
    use tagboard_storage::{LeaderboardRow, MentionStore};
    use tokio::sync::Mutex;

    fn temp_store(name: &str) -> MentionStore {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("tagboard-core-{}-{}.db", name, ts));
        MentionStore::new(path).expect("store init")
    }

    fn bare(offset: usize, length: usize) -> Span {
        Span {
            offset,
            length,
            kind: SpanKind::BareHandle,
        }
    }

    #[test]
    fn group_and_supergroup_are_in_scope() {
        assert!(is_group_scope(Some("group")));
        assert!(is_group_scope(Some("supergroup")));
        assert!(!is_group_scope(Some("private")));
        assert!(!is_group_scope(Some("channel")));
        assert!(!is_group_scope(None));
    }

    #[test]
    fn empty_leaderboard_renders_placeholder() {
        assert_eq!(format_leaderboard(&[]), "No mentions tracked yet.");
    }

    #[test]
    fn leaderboard_lines_are_one_indexed() {
        let rows = vec![
            LeaderboardRow {
                display: "@amy".to_string(),
                count: 5,
            },
            LeaderboardRow {
                display: "Zed".to_string(),
                count: 2,
            },
        ];
        assert_eq!(
            format_leaderboard(&rows),
            "Mention leaderboard:\n1. @amy: 5\n2. Zed: 2"
        );
    }

    #[tokio::test]
    async fn case_variant_mentions_merge_end_to_end() {
        let storage = Mutex::new(temp_store("e2e"));
        let text = "hello @Alice and @alice";

        let summary = record_mentions(&storage, 1, text, &[bare(6, 6), bare(17, 6)]).await;
        assert_eq!(
            summary,
            ProcessSummary {
                stored: 2,
                skipped: 0,
            }
        );

        let rows = storage.lock().await.leaderboard(1, 50).expect("query");
        assert_eq!(
            rows,
            vec![LeaderboardRow {
                display: "@alice".to_string(),
                count: 2,
            }]
        );
    }

    #[tokio::test]
    async fn malformed_spans_count_as_skipped_not_errors() {
        let storage = Mutex::new(temp_store("skip"));
        let text = "hi @bob";

        let summary =
            record_mentions(&storage, 1, text, &[bare(3, 4), bare(100, 4), bare(0, 0)]).await;
        assert_eq!(
            summary,
            ProcessSummary {
                stored: 1,
                skipped: 2,
            }
        );
    }
}
