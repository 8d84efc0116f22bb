mod config;
mod devstudio;
mod telegram_log;

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use teloxide::prelude::*;
use teloxide::types::ChatKind;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use config::Config;
use devstudio::{Database, DevStudio, TelegramClient};

struct BotState {
    config: Config,
    db: Arc<Database>,
    studio: DevStudio,
    telegram: TelegramClient,
    /// System app the Dev Studio chat is logged against.
    system_app_id: i64,
    dm_denied: Mutex<HashSet<UserId>>,
}

impl BotState {
    fn new(config: Config, bot: &Bot) -> rusqlite::Result<Self> {
        let db_path = config.data_dir.join("devstudio.db");
        let db = Arc::new(Database::open(&db_path)?);
        db.seed_categories(config.categories.iter().map(|c| (c.name.as_str(), c.icon.as_str())))?;

        let studio = DevStudio::new(db.clone(), config.username_pattern.clone());
        let system_app = studio.install()?;
        info!("Dev Studio system app: {} (@{})", system_app.id, system_app.bot_username);

        Ok(Self {
            config,
            db,
            studio,
            telegram: TelegramClient::new(bot.clone()),
            system_app_id: system_app.id,
            dm_denied: Mutex::new(HashSet::new()),
        })
    }

    /// Record one chat turn. Failures are logged and otherwise ignored.
    fn log_turn(&self, user_id: i64, content: &str, is_from_bot: bool) {
        if let Err(e) = self.db.log_message(self.system_app_id, user_id, content, is_from_bot) {
            warn!("Failed to log message for {}: {e}", user_id);
        }
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "devstudio.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("devstudio.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting Dev Studio...");
    info!("Loaded config from {config_path}");
    if !config.allowed_users.is_empty() {
        info!("Restricted to {} users", config.allowed_users.len());
    }

    let state = match BotState::new(config, &bot) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to open database: {e}");
            std::process::exit(1);
        }
    };

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    if !matches!(msg.chat.kind, ChatKind::Private(_)) {
        return Ok(());
    }
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if !state.config.is_allowed(user.id) {
        let mut denied = state.dm_denied.lock().await;
        if denied.insert(user.id) {
            let username = user.username.as_deref().unwrap_or(&user.first_name);
            info!("DM from non-allowed user {} ({}) - denial", username, user.id);
            bot.send_message(msg.chat.id, "Access denied.").await.ok();
        }
        return Ok(());
    }

    let user_id = user.id.0 as i64;
    state.log_turn(user_id, text, false);
    if let Err(e) = state.db.touch_app_user(state.system_app_id, user_id) {
        warn!("Failed to record user {}: {e}", user_id);
    }

    let reply = state.studio.handle_message(user_id, text);

    state.log_turn(user_id, &reply, true);
    if let Err(e) = state.telegram.send_reply(msg.chat.id.0, &reply).await {
        error!("Failed to reply to {}: {e}", user_id);
    }
    Ok(())
}
