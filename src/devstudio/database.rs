//! Persistent SQLite database for conversation states, apps and bot commands.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::devstudio::state::{ConversationState, Step};

/// Description given to the `/start` command derived from a welcome message.
const START_COMMAND_DESCRIPTION: &str = "Start the app";

/// Moderation status of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModerationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "approved" => ModerationStatus::Approved,
            "rejected" => ModerationStatus::Rejected,
            _ => ModerationStatus::Pending,
        }
    }
}

/// An app category. Listed in seeding order.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub icon: String,
}

/// A mini app record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct App {
    pub id: i64,
    pub title: String,
    pub subtitle: String,
    pub description: String,
    pub icon: String,
    pub creator_id: i64,
    pub bot_username: String,
    pub api_token: String,
    pub webhook_url: String,
    pub moderation_status: ModerationStatus,
    /// Distinct users recorded in `app_users`.
    pub users_count: i64,
}

/// Fields needed to insert an app.
#[derive(Debug, Clone)]
pub struct NewApp {
    pub title: String,
    pub description: String,
    pub icon: String,
    pub category_id: i64,
    pub creator_id: i64,
    pub bot_username: String,
    pub welcome_message: Option<String>,
    pub api_token: String,
    pub moderation_status: ModerationStatus,
}

/// A command an app's bot answers with a canned response, as listed in menus.
#[derive(Debug, Clone, PartialEq)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

const APP_COLUMNS: &str = "id, title, subtitle, description, icon, creator_id, bot_username,
     api_token, webhook_url, moderation_status,
     (SELECT COUNT(*) FROM app_users u WHERE u.app_id = apps.id)";

fn app_from_row(row: &Row<'_>) -> rusqlite::Result<App> {
    Ok(App {
        id: row.get(0)?,
        title: row.get(1)?,
        subtitle: row.get(2)?,
        description: row.get(3)?,
        icon: row.get(4)?,
        creator_id: row.get(5)?,
        bot_username: row.get(6)?,
        api_token: row.get(7)?,
        webhook_url: row.get(8)?,
        moderation_status: ModerationStatus::from_str(&row.get::<_, String>(9)?),
        users_count: row.get(10)?,
    })
}

fn command_from_row(row: &Row<'_>) -> rusqlite::Result<BotCommand> {
    Ok(BotCommand {
        command: row.get(0)?,
        description: row.get(1)?,
    })
}

/// Fixed-width timestamp so text ordering equals time ordering.
fn now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn encode_step(step: &Step) -> rusqlite::Result<String> {
    serde_json::to_string(step).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Persistent SQLite database for Dev Studio.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn new() -> rusqlite::Result<Self> {
        let db = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        db.init_schema()?;
        Ok(db)
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let db = Self { conn: Mutex::new(Connection::open(path)?) };
        db.init_schema()?;

        let (apps, states) = db.get_counts()?;
        info!("Loaded database from {:?} ({} apps, {} conversations)", path, apps, states);
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn().execute_batch(r#"
            CREATE TABLE IF NOT EXISTS conversation_states (
                user_id INTEGER PRIMARY KEY,
                state TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                icon TEXT NOT NULL DEFAULT '',
                sort_order INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS apps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                subtitle TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                icon TEXT NOT NULL DEFAULT '',
                category_id INTEGER NOT NULL,
                creator_id INTEGER NOT NULL,
                bot_username TEXT NOT NULL UNIQUE,
                welcome_message TEXT NOT NULL DEFAULT '',
                api_token TEXT NOT NULL UNIQUE,
                webhook_url TEXT NOT NULL DEFAULT '',
                moderation_status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS bot_commands (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                app_id INTEGER NOT NULL,
                command TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                response TEXT NOT NULL DEFAULT '',
                is_enabled INTEGER NOT NULL DEFAULT 1,
                UNIQUE(app_id, command)
            );

            CREATE TABLE IF NOT EXISTS app_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                app_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                is_from_bot INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS app_users (
                app_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                last_used TEXT NOT NULL,
                PRIMARY KEY (app_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS webhook_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                app_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_apps_creator ON apps(creator_id);
            CREATE INDEX IF NOT EXISTS idx_bot_commands_app ON bot_commands(app_id);
            CREATE INDEX IF NOT EXISTS idx_app_messages_app_user ON app_messages(app_id, user_id);
            CREATE INDEX IF NOT EXISTS idx_webhook_logs_app ON webhook_logs(app_id);
        "#)
    }

    fn get_counts(&self) -> rusqlite::Result<(i64, i64)> {
        let conn = self.conn();
        let apps = conn.query_row("SELECT COUNT(*) FROM apps", [], |row| row.get(0))?;
        let states = conn.query_row("SELECT COUNT(*) FROM conversation_states", [], |row| row.get(0))?;
        Ok((apps, states))
    }

    // ==================== CONVERSATION STATE ====================

    /// Load a user's conversation, creating an idle one on first contact.
    ///
    /// A stored payload that no longer parses is treated as idle.
    pub fn get_or_create_state(&self, user_id: i64) -> rusqlite::Result<ConversationState> {
        let conn = self.conn();
        let existing = conn
            .query_row(
                "SELECT data, updated_at FROM conversation_states WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        if let Some((data, updated_at)) = existing {
            let step = serde_json::from_str(&data).unwrap_or_else(|e| {
                warn!("Unreadable conversation state for {user_id}, resetting to idle: {e}");
                Step::Idle
            });
            return Ok(ConversationState { user_id, step, updated_at });
        }

        let updated_at = now();
        conn.execute(
            "INSERT INTO conversation_states (user_id, state, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, Step::Idle.name(), encode_step(&Step::Idle)?, updated_at],
        )?;
        debug!("Created conversation state for {user_id}");
        Ok(ConversationState { user_id, step: Step::Idle, updated_at })
    }

    /// Persist a user's step, overwriting whatever was stored.
    pub fn save_state(&self, user_id: i64, step: &Step) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO conversation_states (user_id, state, data, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                state = excluded.state,
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![user_id, step.name(), encode_step(step)?, now()],
        )?;
        Ok(())
    }

    // ==================== CATEGORIES ====================

    /// Insert categories that don't exist yet. Order follows the iterator.
    pub fn seed_categories<'a>(
        &self,
        seeds: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> rusqlite::Result<usize> {
        let conn = self.conn();
        let mut count = 0;
        for (i, (name, icon)) in seeds.into_iter().enumerate() {
            count += conn.execute(
                "INSERT OR IGNORE INTO categories (name, icon, sort_order) VALUES (?1, ?2, ?3)",
                params![name, icon, i as i64 + 1],
            )?;
        }
        if count > 0 {
            info!("Seeded {} categories", count);
        }
        Ok(count)
    }

    pub fn list_categories(&self) -> rusqlite::Result<Vec<Category>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, icon FROM categories ORDER BY sort_order ASC, id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Category {
                id: row.get(0)?,
                name: row.get(1)?,
                icon: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    // ==================== APPS ====================

    /// Insert an app, plus a `/start` command when a welcome message is given.
    /// Both rows are written in one transaction.
    pub fn create_app(&self, new: &NewApp) -> rusqlite::Result<App> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let created_at = now();
        let welcome = new.welcome_message.clone().unwrap_or_default();

        tx.execute(
            "INSERT INTO apps (title, subtitle, description, icon, category_id, creator_id, bot_username,
                               welcome_message, api_token, moderation_status, created_at)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                new.title,
                new.description,
                new.icon,
                new.category_id,
                new.creator_id,
                new.bot_username,
                welcome,
                new.api_token,
                new.moderation_status.as_str(),
                created_at,
            ],
        )?;
        let id = tx.last_insert_rowid();

        if !welcome.is_empty() {
            tx.execute(
                "INSERT INTO bot_commands (app_id, command, description, response, is_enabled)
                 VALUES (?1, '/start', ?2, ?3, 1)",
                params![id, START_COMMAND_DESCRIPTION, welcome],
            )?;
        }
        tx.commit()?;

        info!("Created app {} (@{}) for {}", id, new.bot_username, new.creator_id);
        Ok(App {
            id,
            title: new.title.clone(),
            subtitle: new.description.clone(),
            description: new.description.clone(),
            icon: new.icon.clone(),
            creator_id: new.creator_id,
            bot_username: new.bot_username.clone(),
            api_token: new.api_token.clone(),
            webhook_url: String::new(),
            moderation_status: new.moderation_status,
            users_count: 0,
        })
    }

    /// Apps owned by `creator_id`, newest first.
    pub fn apps_by_creator(&self, creator_id: i64) -> rusqlite::Result<Vec<App>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {APP_COLUMNS} FROM apps WHERE creator_id = ?1 ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![creator_id], app_from_row)?;
        rows.collect()
    }

    pub fn get_app(&self, app_id: i64) -> rusqlite::Result<Option<App>> {
        let sql = format!("SELECT {APP_COLUMNS} FROM apps WHERE id = ?1");
        self.conn().query_row(&sql, params![app_id], app_from_row).optional()
    }

    pub fn find_app_by_username(&self, username: &str) -> rusqlite::Result<Option<App>> {
        let sql = format!("SELECT {APP_COLUMNS} FROM apps WHERE bot_username = ?1");
        self.conn().query_row(&sql, params![username], app_from_row).optional()
    }

    pub fn username_taken(&self, username: &str) -> rusqlite::Result<bool> {
        self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM apps WHERE bot_username = ?1)",
            params![username],
            |row| row.get(0),
        )
    }

    /// Rename an app. Content edits send the app back to moderation.
    pub fn update_title(&self, app_id: i64, title: &str) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE apps SET title = ?2, moderation_status = 'pending' WHERE id = ?1",
            params![app_id, title],
        )?;
        Ok(())
    }

    /// Replace description and subtitle. Content edits send the app back to moderation.
    pub fn update_description(&self, app_id: i64, description: &str) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE apps SET description = ?2, subtitle = ?2, moderation_status = 'pending' WHERE id = ?1",
            params![app_id, description],
        )?;
        Ok(())
    }

    /// Set the webhook URL; an empty string clears it.
    pub fn set_webhook_url(&self, app_id: i64, url: &str) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE apps SET webhook_url = ?2 WHERE id = ?1",
            params![app_id, url],
        )?;
        Ok(())
    }

    /// Delete an app together with its commands, messages, users and webhook logs.
    pub fn delete_app(&self, app_id: i64) -> rusqlite::Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for table in ["bot_commands", "app_messages", "app_users", "webhook_logs"] {
            tx.execute(&format!("DELETE FROM {table} WHERE app_id = ?1"), params![app_id])?;
        }
        let deleted = tx.execute("DELETE FROM apps WHERE id = ?1", params![app_id])?;
        tx.commit()?;

        if deleted > 0 {
            info!("🗑️ Deleted app {}", app_id);
        }
        Ok(deleted > 0)
    }

    /// Make sure the approved system app `username` exists with the given commands.
    pub fn ensure_system_app(
        &self,
        username: &str,
        new: impl FnOnce() -> NewApp,
        commands: &[(&str, &str)],
    ) -> rusqlite::Result<App> {
        let app = match self.find_app_by_username(username)? {
            Some(app) => app,
            None => self.create_app(&new())?,
        };

        let conn = self.conn();
        for (command, description) in commands {
            conn.execute(
                "INSERT OR IGNORE INTO bot_commands (app_id, command, description, response, is_enabled)
                 VALUES (?1, ?2, ?3, '', 1)",
                params![app.id, command, description],
            )?;
        }
        Ok(app)
    }

    // ==================== BOT COMMANDS ====================

    pub fn create_command(
        &self,
        app_id: i64,
        command: &str,
        description: &str,
        response: &str,
    ) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO bot_commands (app_id, command, description, response, is_enabled)
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![app_id, command, description, response],
        )?;
        debug!("Added command {} to app {}", command, app_id);
        Ok(())
    }

    pub fn find_command(&self, app_id: i64, command: &str) -> rusqlite::Result<Option<BotCommand>> {
        self.conn()
            .query_row(
                "SELECT command, description FROM bot_commands WHERE app_id = ?1 AND command = ?2",
                params![app_id, command],
                command_from_row,
            )
            .optional()
    }

    /// Returns whether a command was removed.
    pub fn delete_command(&self, app_id: i64, command: &str) -> rusqlite::Result<bool> {
        let n = self.conn().execute(
            "DELETE FROM bot_commands WHERE app_id = ?1 AND command = ?2",
            params![app_id, command],
        )?;
        Ok(n > 0)
    }

    /// Commands of an app, sorted by command string.
    pub fn list_commands(&self, app_id: i64) -> rusqlite::Result<Vec<BotCommand>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT command, description FROM bot_commands WHERE app_id = ?1 ORDER BY command ASC",
        )?;
        let rows = stmt.query_map(params![app_id], command_from_row)?;
        rows.collect()
    }

    // ==================== CHAT LOG ====================

    /// Record one turn of an app chat.
    pub fn log_message(
        &self,
        app_id: i64,
        user_id: i64,
        content: &str,
        is_from_bot: bool,
    ) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO app_messages (app_id, user_id, content, is_from_bot, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![app_id, user_id, content, is_from_bot, now()],
        )?;
        Ok(())
    }

    /// Mark `user_id` as a user of `app_id`.
    pub fn touch_app_user(&self, app_id: i64, user_id: i64) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO app_users (app_id, user_id, last_used) VALUES (?1, ?2, ?3)
             ON CONFLICT(app_id, user_id) DO UPDATE SET last_used = excluded.last_used",
            params![app_id, user_id, now()],
        )?;
        Ok(())
    }

    // ==================== TEST HELPERS ====================

    #[cfg(test)]
    pub fn count_for_app(&self, table: &str, app_id: i64) -> i64 {
        self.conn()
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE app_id = ?1"),
                params![app_id],
                |row| row.get(0),
            )
            .unwrap()
    }

    /// Response of an enabled command.
    #[cfg(test)]
    pub fn command_response(&self, app_id: i64, command: &str) -> Option<String> {
        self.conn()
            .query_row(
                "SELECT response FROM bot_commands WHERE app_id = ?1 AND command = ?2 AND is_enabled = 1",
                params![app_id, command],
                |row| row.get(0),
            )
            .optional()
            .unwrap()
    }

    #[cfg(test)]
    pub fn log_webhook_call(&self, app_id: i64, url: &str, status_code: i64) {
        self.conn()
            .execute(
                "INSERT INTO webhook_logs (app_id, url, status_code, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![app_id, url, status_code, now()],
            )
            .unwrap();
    }

    #[cfg(test)]
    pub fn set_moderation_status(&self, app_id: i64, status: ModerationStatus) {
        self.conn()
            .execute(
                "UPDATE apps SET moderation_status = ?2 WHERE id = ?1",
                params![app_id, status.as_str()],
            )
            .unwrap();
    }

    #[cfg(test)]
    pub fn corrupt_state(&self, user_id: i64, data: &str) {
        self.conn()
            .execute(
                "UPDATE conversation_states SET data = ?2 WHERE user_id = ?1",
                params![user_id, data],
            )
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devstudio::state::AppDraft;

    fn new_app(creator_id: i64, username: &str, token: &str, welcome: Option<&str>) -> NewApp {
        NewApp {
            title: "Crypto Tracker".to_string(),
            description: "Tracks coin prices in real time".to_string(),
            icon: "🤖".to_string(),
            category_id: 1,
            creator_id,
            bot_username: username.to_string(),
            welcome_message: welcome.map(str::to_string),
            api_token: token.to_string(),
            moderation_status: ModerationStatus::Pending,
        }
    }

    #[test]
    fn test_state_created_idle_on_first_contact() {
        let db = Database::new().unwrap();
        let state = db.get_or_create_state(42).unwrap();
        assert_eq!(state.user_id, 42);
        assert_eq!(state.step, Step::Idle);
    }

    #[test]
    fn test_state_roundtrip_through_columns() {
        let db = Database::new().unwrap();
        db.get_or_create_state(42).unwrap();
        let step = Step::AwaitingAppIcon {
            draft: AppDraft {
                name: "Crypto Tracker".to_string(),
                description: "Tracks coin prices in real time".to_string(),
                ..AppDraft::default()
            },
        };
        db.save_state(42, &step).unwrap();

        assert_eq!(db.get_or_create_state(42).unwrap().step, step);
        let tag: String = db
            .conn()
            .query_row("SELECT state FROM conversation_states WHERE user_id = 42", [], |row| row.get(0))
            .unwrap();
        assert_eq!(tag, "awaiting_app_icon");
    }

    #[test]
    fn test_unreadable_state_reads_as_idle() {
        let db = Database::new().unwrap();
        db.save_state(7, &Step::EditingApp { app_id: 3 }).unwrap();
        db.corrupt_state(7, r#"{"state":"editing_app"}"#);
        assert_eq!(db.get_or_create_state(7).unwrap().step, Step::Idle);
    }

    #[test]
    fn test_categories_ordered_and_seeded_once() {
        let db = Database::new().unwrap();
        let seeds = [("AI", "🤖"), ("Games", "🎮"), ("Trading", "📊")];
        assert_eq!(db.seed_categories(seeds).unwrap(), 3);
        assert_eq!(db.seed_categories(seeds).unwrap(), 0);

        let names: Vec<String> = db.list_categories().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["AI", "Games", "Trading"]);
    }

    #[test]
    fn test_create_app_with_welcome_adds_start_command() {
        let db = Database::new().unwrap();
        let app = db.create_app(&new_app(1, "mytradingapp", "tok1", Some("Hi!"))).unwrap();

        assert_eq!(app.moderation_status, ModerationStatus::Pending);
        let start = db.find_command(app.id, "/start").unwrap().unwrap();
        assert_eq!(start.description, "Start the app");
        assert_eq!(db.command_response(app.id, "/start").as_deref(), Some("Hi!"));
    }

    #[test]
    fn test_create_app_without_welcome_has_no_commands() {
        let db = Database::new().unwrap();
        let app = db.create_app(&new_app(1, "mytradingapp", "tok1", None)).unwrap();
        assert!(db.list_commands(app.id).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_token_fails_and_leaves_nothing_behind() {
        let db = Database::new().unwrap();
        db.create_app(&new_app(1, "firstapp", "same", None)).unwrap();
        let err = db.create_app(&new_app(1, "secondapp", "same", Some("Hi!")));
        assert!(err.is_err());
        assert!(!db.username_taken("secondapp").unwrap());
    }

    #[test]
    fn test_apps_by_creator_newest_first() {
        let db = Database::new().unwrap();
        let a = db.create_app(&new_app(1, "aaaapp", "t1", None)).unwrap();
        let b = db.create_app(&new_app(1, "bbbapp", "t2", None)).unwrap();
        db.create_app(&new_app(2, "otherapp", "t3", None)).unwrap();

        let ids: Vec<i64> = db.apps_by_creator(1).unwrap().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn test_edit_resets_moderation() {
        let db = Database::new().unwrap();
        let app = db.create_app(&new_app(1, "mytradingapp", "t1", None)).unwrap();
        db.set_moderation_status(app.id, ModerationStatus::Approved);

        db.update_description(app.id, "A brand new description").unwrap();
        let app = db.get_app(app.id).unwrap().unwrap();
        assert_eq!(app.moderation_status, ModerationStatus::Pending);
        assert_eq!(app.subtitle, "A brand new description");
    }

    #[test]
    fn test_delete_app_cascades() {
        let db = Database::new().unwrap();
        let app = db.create_app(&new_app(1, "mytradingapp", "t1", Some("Hi!"))).unwrap();
        let keep = db.create_app(&new_app(1, "keepapp", "t2", Some("Hello"))).unwrap();
        db.log_message(app.id, 5, "hello", false).unwrap();
        db.touch_app_user(app.id, 5).unwrap();
        db.log_webhook_call(app.id, "https://example.com/hook", 200);

        assert!(db.delete_app(app.id).unwrap());
        assert!(db.get_app(app.id).unwrap().is_none());
        for table in ["bot_commands", "app_messages", "app_users", "webhook_logs"] {
            assert_eq!(db.count_for_app(table, app.id), 0, "{table} not cleared");
        }
        assert_eq!(db.count_for_app("bot_commands", keep.id), 1);
        assert!(!db.delete_app(app.id).unwrap());
    }

    #[test]
    fn test_users_count_tracks_app_users() {
        let db = Database::new().unwrap();
        let app = db.create_app(&new_app(1, "mytradingapp", "t1", None)).unwrap();
        db.touch_app_user(app.id, 10).unwrap();
        db.touch_app_user(app.id, 10).unwrap();
        db.touch_app_user(app.id, 11).unwrap();
        assert_eq!(db.get_app(app.id).unwrap().unwrap().users_count, 2);
    }

    #[test]
    fn test_ensure_system_app_is_idempotent() {
        let db = Database::new().unwrap();
        let commands = [("/start", "Start"), ("/help", "Help")];
        let make = || NewApp {
            moderation_status: ModerationStatus::Approved,
            ..new_app(0, "devstudio", "system", None)
        };
        let first = db.ensure_system_app("devstudio", make, &commands).unwrap();
        let second = db.ensure_system_app("devstudio", make, &commands).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.moderation_status, ModerationStatus::Approved);
        assert_eq!(db.list_commands(first.id).unwrap().len(), 2);
    }

    #[test]
    fn test_commands_sorted_and_deletable() {
        let db = Database::new().unwrap();
        let app = db.create_app(&new_app(1, "mytradingapp", "t1", None)).unwrap();
        db.create_command(app.id, "/price", "Price", "42").unwrap();
        db.create_command(app.id, "/about", "About", "us").unwrap();
        assert!(db.create_command(app.id, "/price", "Again", "43").is_err());

        let names: Vec<String> = db.list_commands(app.id).unwrap().into_iter().map(|c| c.command).collect();
        assert_eq!(names, vec!["/about", "/price"]);

        assert!(db.delete_command(app.id, "/price").unwrap());
        assert!(!db.delete_command(app.id, "/price").unwrap());
    }
}
