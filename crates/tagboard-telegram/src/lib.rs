//! Tagboard Telegram Adapter
//!
//! Telegram Bot API long-polling with offset persistence, client
//! recreation, entity-to-span conversion, and message chunking

use anyhow::{anyhow, Result};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Range;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tagboard_config::TelegramConfig;
use tagboard_ipc::{AccountRef, Envelope, EventBus, MessageKind, OutboundMessage, Span, SpanKind};
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub entities: Vec<TelegramMessageEntity>,
    #[serde(default)]
    pub caption_entities: Vec<TelegramMessageEntity>,
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessageEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub offset: i64,
    pub length: i64,
    #[serde(default)]
    pub user: Option<TelegramUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: Option<bool>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: T,
}

pub struct TelegramAdapter {
    client: Client,
    bot_token: String,
    allowed_chats: Option<HashSet<i64>>,
    api_url: String,
    data_dir: PathBuf,
    poll_timeout_secs: u64,
    client_recreate_interval_secs: u64,
    event_bus: Option<EventBus>,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig, data_dir: PathBuf) -> Self {
        let api_url = format!("https://api.telegram.org/bot{}", config.bot_token);
        let allowed_chats = config
            .allowed_chats
            .clone()
            .map(|items| items.into_iter().collect());
        let client = Self::build_client();
        let poll_timeout_secs = config.poll_timeout_secs.unwrap_or(60);
        let client_recreate_interval_secs = config.client_recreate_interval_secs.unwrap_or(60);

        Self {
            client,
            bot_token: config.bot_token.clone(),
            allowed_chats,
            api_url,
            data_dir,
            poll_timeout_secs,
            client_recreate_interval_secs,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn build_client() -> Client {
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(600))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(180))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client")
    }

    fn offset_path(&self) -> PathBuf {
        let runtime_dir = self.data_dir.join("runtime");
        let _ = std::fs::create_dir_all(&runtime_dir);
        let bot_id = self.bot_token.split(':').next().unwrap_or("default");
        runtime_dir.join(format!("telegram.{}.offset", bot_id))
    }

    fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&chat_id))
    }

    async fn read_offset(&self) -> Option<i64> {
        let p = self.offset_path();
        match fs::read_to_string(&p).await {
            Ok(content) => content.trim().parse().ok(),
            Err(_) => None,
        }
    }

    async fn write_offset(&self, offset: i64) {
        let p = self.offset_path();
        if let Some(parent) = p.parent() {
            let _ = fs::create_dir_all(parent).await;
        }
        let _ = fs::write(&p, format!("{}\n", offset)).await;
    }

    pub async fn get_updates(
        &self,
        client: &Client,
        offset: Option<i64>,
    ) -> Result<Vec<TelegramUpdate>> {
        let url = format!("{}/getUpdates", self.api_url);

        let mut payload = serde_json::json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });

        if let Some(offset) = offset {
            payload["offset"] = serde_json::json!(offset);
        }

        let resp = client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram getUpdates request failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow!("telegram getUpdates HTTP error: {}", e))?;

        let parsed: ApiResponse<Vec<TelegramUpdate>> = resp
            .json()
            .await
            .map_err(|e| anyhow!("telegram getUpdates decode failed: {}", e))?;

        if !parsed.ok {
            return Err(anyhow!("telegram getUpdates returned ok=false"));
        }

        Ok(parsed.result)
    }

    /// Send a plain-text message, split across Telegram's length limit.
    pub async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<()> {
        let url = format!("{}/sendMessage", self.api_url);
        let chunks = chunk_message(text);

        for (i, chunk) in chunks.iter().enumerate() {
            let mut payload = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });

            if i == 0 {
                if let Some(reply_to_message_id) = reply_to {
                    payload["reply_to_message_id"] = serde_json::json!(reply_to_message_id);
                }
            }

            let resp = self
                .client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| anyhow!("telegram sendMessage request failed: {}", e))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(anyhow!("telegram sendMessage HTTP {}: {}", status, body));
            }

            let parsed: ApiResponse<serde_json::Value> = resp
                .json()
                .await
                .map_err(|e| anyhow!("telegram sendMessage decode failed: {}", e))?;
            if !parsed.ok {
                return Err(anyhow!("telegram sendMessage returned ok=false"));
            }
        }

        Ok(())
    }

    async fn sync_bot_commands(&self, client: &Client) -> Result<()> {
        let url = format!("{}/setMyCommands", self.api_url);
        let payload = serde_json::json!({
            "commands": [
                { "command": "start", "description": "What this bot does" },
                { "command": "stats", "description": "Show the mention leaderboard" }
            ]
        });

        let resp = client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram setMyCommands request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("telegram setMyCommands HTTP {}: {}", status, body));
        }

        let parsed: ApiResponse<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| anyhow!("telegram setMyCommands decode failed: {}", e))?;

        if !parsed.ok {
            return Err(anyhow!("telegram setMyCommands returned ok=false"));
        }

        Ok(())
    }

    pub async fn poll(&self) -> Result<()> {
        let mut offset: Option<i64> = self.read_offset().await;

        info!(offset = ?offset, "Telegram polling started");

        let mut client = self.client.clone();
        let mut client_recreate_at =
            Instant::now() + Duration::from_secs(self.client_recreate_interval_secs);

        if let Err(err) = self.sync_bot_commands(&client).await {
            warn!("Failed to sync Telegram bot commands: {}", err);
        } else {
            info!("Telegram bot commands synced");
        }

        loop {
            if Instant::now() >= client_recreate_at {
                info!("Recreating HTTP client to prevent stale connections");
                client = Self::build_client();
                client_recreate_at =
                    Instant::now() + Duration::from_secs(self.client_recreate_interval_secs);
            }

            let updates = match self.get_updates(&client, offset).await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Telegram polling error: {}", err);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);
                self.write_offset(update.update_id + 1).await;

                if let Some(message) = &update.message {
                    self.handle_message(message);
                }
            }
        }
    }

    fn handle_message(&self, message: &TelegramMessage) {
        let chat_id = message.chat.id;

        if !self.is_chat_allowed(chat_id) {
            debug!("Skipping message from unauthorized chat {}", chat_id);
            return;
        }

        let Some(event_bus) = &self.event_bus else {
            debug!("No event bus configured, message not forwarded");
            return;
        };

        let from = message
            .from
            .as_ref()
            .map(|u| u.id.to_string())
            .unwrap_or_default();

        // Commands only arrive as message text, never as captions.
        let kind = if let Some((name, args)) = message.text.as_deref().and_then(parse_command) {
            MessageKind::Command { name, args }
        } else {
            let (text, entities) = match (&message.text, &message.caption) {
                (Some(text), _) => (text.as_str(), &message.entities),
                (None, Some(caption)) => (caption.as_str(), &message.caption_entities),
                (None, None) => return,
            };
            let spans = spans_from_entities(text, entities);
            if spans.is_empty() {
                return;
            }
            MessageKind::Message {
                from,
                text: text.to_string(),
                spans,
            }
        };

        let envelope = Envelope::new("telegram", kind)
            .with_chat_id(chat_id)
            .with_message_id(message.message_id)
            .with_chat_type(&message.chat.chat_type);

        if let Err(e) = event_bus.publish(envelope) {
            warn!("Failed to publish message to event bus: {}", e);
        }
    }

    pub async fn run_outbound_handler(&self, mut receiver: broadcast::Receiver<OutboundMessage>) {
        info!("Telegram outbound handler started");

        loop {
            match receiver.recv().await {
                Ok(msg) => {
                    if msg.channel != "telegram" {
                        continue;
                    }
                    if let Err(e) = self.send_message(msg.chat_id, &msg.text, msg.reply_to).await {
                        warn!("Failed to send outbound message: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Telegram outbound handler stopped: channel closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Telegram outbound handler lagged; skipped {} messages",
                        skipped
                    );
                }
            }
        }
    }
}

/// Parse `/name arg ...`, tolerating the `/name@botname` group form.
fn parse_command(text: &str) -> Option<(String, Vec<String>)> {
    let mut parts = text.trim().split_whitespace();
    let first = parts.next()?;
    let name = first.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name);
    if name.is_empty() {
        return None;
    }
    let args = parts.map(str::to_string).collect();
    Some((name.to_lowercase(), args))
}

/// Map Telegram mention entities onto byte-offset spans.
///
/// Only `mention` and `text_mention` are meaningful here; every other
/// entity type is ignored. Entities whose UTF-16 range does not map onto
/// the text are dropped.
fn spans_from_entities(text: &str, entities: &[TelegramMessageEntity]) -> Vec<Span> {
    let mut spans = Vec::new();

    for entity in entities {
        let kind = match entity.entity_type.as_str() {
            "mention" => SpanKind::BareHandle,
            "text_mention" => SpanKind::ResolvedAccount {
                account: entity.user.as_ref().map(account_ref),
            },
            _ => continue,
        };

        let Some(range) = utf16_range_to_bytes(text, entity.offset, entity.length) else {
            debug!(
                "Dropping {} entity with unmappable range {}+{}",
                entity.entity_type, entity.offset, entity.length
            );
            continue;
        };

        spans.push(Span {
            offset: range.start,
            length: range.len(),
            kind,
        });
    }

    spans
}

fn account_ref(user: &TelegramUser) -> AccountRef {
    AccountRef {
        id: user.id,
        username: user.username.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
    }
}

/// Telegram entity offsets count UTF-16 code units; convert to a byte range
/// into `text`. Returns None for ranges that fall outside the text or split
/// a surrogate pair.
fn utf16_range_to_bytes(text: &str, offset: i64, length: i64) -> Option<Range<usize>> {
    if offset < 0 || length <= 0 {
        return None;
    }
    let start_unit = offset as usize;
    let end_unit = start_unit.checked_add(length as usize)?;

    let mut unit = 0usize;
    let mut start = None;
    let mut end = None;

    for (byte_idx, c) in text.char_indices() {
        if unit == start_unit {
            start = Some(byte_idx);
        }
        if unit == end_unit {
            end = Some(byte_idx);
            break;
        }
        unit += c.len_utf16();
        if unit > end_unit {
            return None;
        }
    }
    if end.is_none() && unit == end_unit {
        end = Some(text.len());
    }

    match (start, end) {
        (Some(s), Some(e)) if s < e => Some(s..e),
        _ => None,
    }
}

/// Split a reply into pieces under Telegram's 4096-character limit,
/// breaking on line boundaries where possible.
fn chunk_message(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for piece in text.split_inclusive('\n') {
        let piece_len = piece.chars().count();

        if piece_len > TELEGRAM_MAX_MESSAGE_LEN {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            // a single oversized line gets hard-split by characters
            for c in piece.chars() {
                current.push(c);
                current_len += 1;
                if current_len == TELEGRAM_MAX_MESSAGE_LEN {
                    chunks.push(std::mem::take(&mut current));
                    current_len = 0;
                }
            }
            continue;
        }

        if current_len + piece_len > TELEGRAM_MAX_MESSAGE_LEN {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(piece);
        current_len += piece_len;
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}
