//! Dev Studio: a chat wizard for creating and managing mini apps.

pub mod database;
pub mod engine;
pub mod replies;
pub mod state;
pub mod telegram;


pub use database::Database;
pub use engine::DevStudio;
pub use telegram::TelegramClient;
