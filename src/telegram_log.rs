//! Mirrors log lines into an operator chat.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// INFO lines buffered before an early flush.
const MAX_BATCH_LINES: usize = 50;
const MAX_LOG_CHARS: usize = 4000;

/// A formatted log line and whether it should skip the batch.
struct LogLine {
    text: String,
    urgent: bool,
}

impl LogLine {
    fn new(level: Level, message: String) -> Self {
        match level {
            Level::ERROR => Self { text: format!("❌ {message}"), urgent: true },
            Level::WARN => Self { text: format!("⚠️ {message}"), urgent: true },
            _ => Self { text: message, urgent: false },
        }
    }
}

/// INFO lines waiting for the next flush.
#[derive(Default)]
struct Batch {
    lines: Vec<String>,
}

impl Batch {
    /// Add a line; returns the joined batch once it is full.
    fn push(&mut self, line: String) -> Option<String> {
        self.lines.push(line);
        (self.lines.len() >= MAX_BATCH_LINES).then(|| self.take()).flatten()
    }

    fn take(&mut self) -> Option<String> {
        if self.lines.is_empty() {
            return None;
        }
        let joined = self.lines.join("\n");
        self.lines.clear();
        Some(joined)
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_LOG_CHARS {
        let head: String = text.chars().take(MAX_LOG_CHARS).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<LogLine>,
}

impl TelegramLogLayer {
    /// Spawns the sender task; must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_sender(bot, chat_id, rx));
        Self { tx }
    }
}

async fn run_sender(bot: Bot, chat_id: ChatId, mut rx: mpsc::UnboundedReceiver<LogLine>) {
    let mut batch = Batch::default();
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(LogLine { text, urgent: true }) => send_log(&bot, chat_id, &text).await,
                Some(LogLine { text, urgent: false }) => {
                    if let Some(full) = batch.push(text) {
                        send_log(&bot, chat_id, &full).await;
                    }
                }
                None => break,
            },
            _ = interval.tick() => {
                if let Some(pending) = batch.take() {
                    send_log(&bot, chat_id, &pending).await;
                }
            }
        }
    }

    if let Some(pending) = batch.take() {
        send_log(&bot, chat_id, &pending).await;
    }
}

async fn send_log(bot: &Bot, chat_id: ChatId, text: &str) {
    // Logging here would feed back into this layer.
    if let Err(e) = bot.send_message(chat_id, truncate(text)).await {
        eprintln!("Failed to send log to Telegram: {e}");
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }
        // Telegram's own HTTP client logs would echo every send.
        if event.metadata().target().starts_with("teloxide") {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if self.tx.send(LogLine::new(level, visitor.message)).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}
