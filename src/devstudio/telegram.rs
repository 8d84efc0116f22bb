//! Telegram client using teloxide.

use teloxide::prelude::*;
use tracing::warn;

/// Telegram's limit for a single text message.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send a plain-text reply, split into as many messages as needed.
    pub async fn send_reply(&self, chat_id: i64, text: &str) -> Result<(), String> {
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            self.bot
                .send_message(ChatId(chat_id), chunk)
                .await
                .map_err(|e| {
                    let msg = format!("Failed to send: {e}");
                    warn!("{}", msg);
                    msg
                })?;
        }
        Ok(())
    }
}

/// Split on line boundaries into pieces of at most `max_chars` chars.
/// Lines longer than the limit are cut mid-line.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                if piece.len() == max_chars {
                    chunks.push(piece.iter().collect());
                } else {
                    current = piece.iter().collect();
                    current_len = piece.len();
                }
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(split_message("hello\nworld", 4096), vec!["hello\nworld"]);
        assert!(split_message("", 4096).is_empty());
    }

    #[test]
    fn test_splits_on_lines() {
        let chunks = split_message("aaaa\nbbbb\ncccc", 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n", "cccc"]);
    }

    #[test]
    fn test_long_line_is_cut() {
        let text = "é".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }
}
