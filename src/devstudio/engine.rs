//! Dev Studio engine - one chat message in, one reply and one state transition out.

use rand::RngCore;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::devstudio::database::{App, Database, ModerationStatus, NewApp};
use crate::devstudio::replies;
use crate::devstudio::state::{AppAction, AppDraft, Step};

/// Bot username of the Dev Studio system app.
pub const SYSTEM_APP_USERNAME: &str = "devstudio";

/// Slash commands understood by Dev Studio, as registered on the system app.
pub const COMMANDS: &[(&str, &str)] = &[
    ("/start", "Get started"),
    ("/newapp", "Create a new app"),
    ("/myapps", "My apps"),
    ("/edit", "Edit an app"),
    ("/delete", "Delete an app"),
    ("/token", "Get the API token"),
    ("/commands", "Configure commands"),
    ("/webhook", "Configure the webhook"),
    ("/help", "Help"),
    ("/cancel", "Cancel the current action"),
];

const CANCEL: &str = "/cancel";
const SKIP: &str = "/skip";
const NAME_MIN_CHARS: usize = 3;
const NAME_MAX_CHARS: usize = 50;
const DESCRIPTION_MIN_CHARS: usize = 10;
/// Coarse single-emoji check.
const ICON_MAX_CHARS: usize = 10;
const USERNAME_MIN_CHARS: usize = 5;
const USERNAME_SUFFIX: &str = "app";
const WEBHOOK_SCHEME: &str = "https://";

/// Commands that interrupt whatever flow the user is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Help,
    NewApp,
    MyApps,
    Token,
    Edit,
    Delete,
    Commands,
    Webhook,
}

impl Command {
    fn parse(text: &str) -> Option<Self> {
        match text {
            "/start" => Some(Command::Start),
            "/help" => Some(Command::Help),
            "/newapp" => Some(Command::NewApp),
            "/myapps" => Some(Command::MyApps),
            "/token" => Some(Command::Token),
            "/edit" => Some(Command::Edit),
            "/delete" => Some(Command::Delete),
            "/commands" => Some(Command::Commands),
            "/webhook" => Some(Command::Webhook),
            _ => None,
        }
    }
}

/// 32 random bytes, hex encoded.
pub fn generate_api_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Steps whose expected input may itself start with `/`.
fn takes_slash_input(step: &Step) -> bool {
    matches!(
        step,
        Step::AwaitingWelcome { .. } | Step::AwaitingWebhook { .. } | Step::AwaitingCommand { .. }
    )
}

type TokenSource = Box<dyn Fn() -> String + Send + Sync>;

/// Outcome of one message.
struct Turn {
    next: Step,
    reply: String,
}

impl Turn {
    fn to(next: Step, reply: impl Into<String>) -> Self {
        Self { next, reply: reply.into() }
    }

    /// Validation failure: keep the step, tell the user what's wrong.
    fn stay(step: Step, reply: impl Into<String>) -> Self {
        Self::to(step, reply)
    }

    fn idle(reply: impl Into<String>) -> Self {
        Self::to(Step::Idle, reply)
    }
}

fn check_app_name(name: &str) -> Result<(), &'static str> {
    let len = name.chars().count();
    if len < NAME_MIN_CHARS {
        return Err("The name is too short. At least 3 characters.");
    }
    if len > NAME_MAX_CHARS {
        return Err("The name is too long. At most 50 characters.");
    }
    Ok(())
}

fn check_description(description: &str) -> Result<(), &'static str> {
    if description.chars().count() < DESCRIPTION_MIN_CHARS {
        return Err("The description is too short. At least 10 characters.");
    }
    Ok(())
}

/// Parse a 1-based list choice into an index below `len`.
fn pick_index(text: &str, len: usize) -> Option<usize> {
    let n: usize = text.parse().ok()?;
    (1..=len).contains(&n).then(|| n - 1)
}

/// The Dev Studio conversation engine.
pub struct DevStudio {
    db: Arc<Database>,
    username_pattern: Regex,
    tokens: TokenSource,
}

impl DevStudio {
    pub fn new(db: Arc<Database>, username_pattern: Regex) -> Self {
        Self {
            db,
            username_pattern,
            tokens: Box::new(generate_api_token),
        }
    }

    /// Replace the API token generator.
    #[cfg(test)]
    pub fn with_token_source(mut self, tokens: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.tokens = Box::new(tokens);
        self
    }

    /// Make sure the Dev Studio system app and its command list exist.
    pub fn install(&self) -> rusqlite::Result<App> {
        let categories = self.db.list_categories()?;
        let category_id = categories
            .iter()
            .find(|c| c.name == "Services")
            .or(categories.first())
            .map(|c| c.id)
            .unwrap_or(0);

        self.db.ensure_system_app(
            SYSTEM_APP_USERNAME,
            || NewApp {
                title: "Dev Studio".to_string(),
                description: "Create and manage your apps, set up commands and get API tokens.".to_string(),
                icon: "⚡".to_string(),
                category_id,
                creator_id: 0,
                bot_username: SYSTEM_APP_USERNAME.to_string(),
                welcome_message: Some(replies::WELCOME.to_string()),
                api_token: (self.tokens)(),
                moderation_status: ModerationStatus::Approved,
            },
            COMMANDS,
        )
    }

    /// Process one message from `user_id` and return the reply.
    ///
    /// Never fails: a storage error resets the user to idle and yields a
    /// generic retry message.
    pub fn handle_message(&self, user_id: i64, text: &str) -> String {
        let text = text.trim();
        match self.process(user_id, text) {
            Ok(reply) => reply,
            Err(e) => {
                error!("Dev Studio turn failed for {}: {e}", user_id);
                if let Err(e) = self.db.save_state(user_id, &Step::Idle) {
                    warn!("Failed to reset state for {}: {e}", user_id);
                }
                replies::TRY_AGAIN.to_string()
            }
        }
    }

    fn process(&self, user_id: i64, text: &str) -> rusqlite::Result<String> {
        let state = self.db.get_or_create_state(user_id)?;
        debug!("State of {} is {} since {}", state.user_id, state.step.name(), state.updated_at);
        let before = state.step.name();
        let turn = self.dispatch(user_id, state.step, text)?;
        self.db.save_state(user_id, &turn.next)?;

        info!(
            "💬 {} [{} → {}]: \"{}\"",
            user_id,
            before,
            turn.next.name(),
            text.chars().take(50).collect::<String>()
        );
        Ok(turn.reply)
    }

    fn dispatch(&self, user_id: i64, step: Step, text: &str) -> rusqlite::Result<Turn> {
        if text == CANCEL {
            return Ok(Turn::idle(replies::CANCELLED));
        }
        if let Some(command) = Command::parse(text) {
            return self.run_command(user_id, command, step);
        }
        // Other slash text is only input for /skip, /clear and new command names.
        if text.starts_with('/') && !takes_slash_input(&step) {
            return Ok(Turn::stay(step, replies::UNKNOWN_COMMAND));
        }
        self.handle_input(user_id, step, text)
    }

    // ==================== COMMANDS ====================

    fn run_command(&self, user_id: i64, command: Command, step: Step) -> rusqlite::Result<Turn> {
        match command {
            Command::Start => Ok(Turn::stay(step, replies::WELCOME)),
            Command::Help => Ok(Turn::stay(step, replies::HELP)),
            Command::NewApp => Ok(Turn::to(Step::AwaitingAppName, replies::NEW_APP)),
            Command::MyApps => {
                let apps = self.db.apps_by_creator(user_id)?;
                Ok(Turn::stay(step, replies::my_apps(&apps)))
            }
            Command::Token => self.fan_out(user_id, AppAction::Token, step),
            Command::Edit => self.fan_out(user_id, AppAction::Edit, step),
            Command::Delete => self.fan_out(user_id, AppAction::Delete, step),
            Command::Commands => self.fan_out(user_id, AppAction::Commands, step),
            Command::Webhook => self.fan_out(user_id, AppAction::Webhook, step),
        }
    }

    /// Zero apps: explain. One app: go straight in. More: ask for a number.
    fn fan_out(&self, user_id: i64, action: AppAction, step: Step) -> rusqlite::Result<Turn> {
        let apps = self.db.apps_by_creator(user_id)?;
        match apps.as_slice() {
            [] => Ok(Turn::stay(step, replies::no_apps(action))),
            [app] if action == AppAction::Token => Ok(Turn::stay(step, replies::token_card(app))),
            [app] => self.enter(action, app),
            _ => {
                let app_ids = apps.iter().map(|a| a.id).collect();
                Ok(Turn::to(
                    Step::SelectingApp { action, app_ids },
                    replies::app_list(&apps, action),
                ))
            }
        }
    }

    /// Start the sub-flow for `action` on `app`.
    fn enter(&self, action: AppAction, app: &App) -> rusqlite::Result<Turn> {
        let app_id = app.id;
        Ok(match action {
            AppAction::Token => Turn::idle(replies::token_card(app)),
            AppAction::Edit => Turn::to(Step::EditingApp { app_id }, replies::edit_menu(app)),
            AppAction::Delete => Turn::to(Step::DeletingApp { app_id }, replies::confirm_delete(app)),
            AppAction::Commands => Turn::to(Step::AwaitingCommand { app_id }, self.commands_menu(app_id)?),
            AppAction::Webhook => Turn::to(Step::AwaitingWebhook { app_id }, replies::webhook_prompt(app)),
        })
    }

    fn commands_menu(&self, app_id: i64) -> rusqlite::Result<String> {
        let app = self.db.get_app(app_id)?.unwrap_or_default();
        let commands = self.db.list_commands(app_id)?;
        Ok(replies::commands_menu(&app, &commands))
    }

    // ==================== FREEFORM INPUT ====================

    fn handle_input(&self, user_id: i64, step: Step, text: &str) -> rusqlite::Result<Turn> {
        match step {
            Step::Idle => Ok(Turn::stay(Step::Idle, replies::NOT_UNDERSTOOD)),
            Step::AwaitingAppName => Ok(on_app_name(text)),
            Step::AwaitingAppDesc { draft } => Ok(on_app_desc(draft, text)),
            Step::AwaitingAppIcon { draft } => self.on_app_icon(draft, text),
            Step::AwaitingCategory { draft } => self.on_category(draft, text),
            Step::AwaitingUsername { draft } => self.on_username(draft, text),
            Step::AwaitingWelcome { draft } => Ok(self.on_welcome(user_id, draft, text)),
            Step::SelectingApp { action, app_ids } => self.on_app_selection(user_id, action, app_ids, text),
            Step::EditingApp { app_id } => self.on_edit_choice(app_id, text),
            Step::AwaitingNewName { app_id } => self.on_new_name(app_id, text),
            Step::AwaitingNewDesc { app_id } => self.on_new_desc(app_id, text),
            Step::AwaitingCommand { app_id } => self.on_command(app_id, text),
            Step::AwaitingCmdDesc { app_id, command } => {
                let reply = replies::ASK_CMD_RESPONSE;
                let description = text.to_string();
                Ok(Turn::to(Step::AwaitingCmdResponse { app_id, command, description }, reply))
            }
            Step::AwaitingCmdResponse { app_id, command, description } => {
                self.on_cmd_response(app_id, &command, &description, text)
            }
            Step::AwaitingWebhook { app_id } => self.on_webhook(app_id, text),
            Step::DeletingApp { app_id } => self.on_delete_confirm(app_id, text),
        }
    }

    fn on_app_icon(&self, mut draft: AppDraft, icon: &str) -> rusqlite::Result<Turn> {
        if icon.chars().count() > ICON_MAX_CHARS {
            return Ok(Turn::stay(Step::AwaitingAppIcon { draft }, "Send just one emoji"));
        }
        let categories = self.db.list_categories()?;
        draft.icon = icon.to_string();
        Ok(Turn::to(Step::AwaitingCategory { draft }, replies::category_list(&categories)))
    }

    fn on_category(&self, mut draft: AppDraft, text: &str) -> rusqlite::Result<Turn> {
        if text.parse::<usize>().is_err() {
            return Ok(Turn::stay(Step::AwaitingCategory { draft }, "Enter the category number"));
        }
        let categories = self.db.list_categories()?;
        let Some(category) = pick_index(text, categories.len()).map(|i| &categories[i]) else {
            return Ok(Turn::stay(Step::AwaitingCategory { draft }, "Invalid category number"));
        };

        draft.category_id = category.id;
        let reply = replies::ask_username(category);
        Ok(Turn::to(Step::AwaitingUsername { draft }, reply))
    }

    fn on_username(&self, mut draft: AppDraft, text: &str) -> rusqlite::Result<Turn> {
        let username = text.strip_prefix('@').unwrap_or(text).to_lowercase();

        let rejection = if username.chars().count() < USERNAME_MIN_CHARS {
            Some("The username is too short. At least 5 characters.")
        } else if !username.ends_with(USERNAME_SUFFIX) {
            Some("The username must end with 'app'")
        } else if !self.username_pattern.is_match(&username) {
            Some("The username may contain only a-z, 0-9 and _")
        } else if self.db.username_taken(&username)? {
            Some("This username is already taken. Try another one.")
        } else {
            None
        };
        if let Some(reply) = rejection {
            return Ok(Turn::stay(Step::AwaitingUsername { draft }, reply));
        }

        let reply = replies::ask_welcome(&username);
        draft.username = username;
        Ok(Turn::to(Step::AwaitingWelcome { draft }, reply))
    }

    /// Last step of `/newapp`: always ends the flow.
    fn on_welcome(&self, user_id: i64, draft: AppDraft, text: &str) -> Turn {
        let welcome_message = (text != SKIP).then(|| text.to_string());
        let new = NewApp {
            title: draft.name,
            description: draft.description,
            icon: draft.icon,
            category_id: draft.category_id,
            creator_id: user_id,
            bot_username: draft.username,
            welcome_message,
            api_token: (self.tokens)(),
            moderation_status: ModerationStatus::Pending,
        };

        match self.db.create_app(&new) {
            Ok(app) => Turn::idle(replies::app_created(&app)),
            Err(e) => {
                error!("Failed to create app @{} for {}: {e}", new.bot_username, user_id);
                Turn::idle(replies::CREATE_FAILED)
            }
        }
    }

    fn on_app_selection(
        &self,
        user_id: i64,
        action: AppAction,
        app_ids: Vec<i64>,
        text: &str,
    ) -> rusqlite::Result<Turn> {
        if text.parse::<usize>().is_err() {
            return Ok(Turn::stay(Step::SelectingApp { action, app_ids }, "Enter the app number"));
        }
        let Some(app_id) = pick_index(text, app_ids.len()).map(|i| app_ids[i]) else {
            return Ok(Turn::stay(Step::SelectingApp { action, app_ids }, "Invalid number"));
        };

        match self.db.get_app(app_id)?.filter(|app| app.creator_id == user_id) {
            Some(app) => self.enter(action, &app),
            None => Ok(Turn::stay(
                Step::SelectingApp { action, app_ids },
                "That app no longer exists. Pick another number or /cancel",
            )),
        }
    }

    fn on_edit_choice(&self, app_id: i64, choice: &str) -> rusqlite::Result<Turn> {
        let app = self.db.get_app(app_id)?.unwrap_or_default();
        Ok(match choice {
            "1" => Turn::to(Step::AwaitingNewName { app_id }, replies::ask_new_name(&app)),
            "2" => Turn::to(Step::AwaitingNewDesc { app_id }, replies::ask_new_description(&app)),
            "3" => Turn::to(Step::AwaitingCommand { app_id }, self.commands_menu(app_id)?),
            "4" => Turn::to(Step::AwaitingWebhook { app_id }, replies::webhook_prompt(&app)),
            "5" => Turn::idle(replies::token_card(&app)),
            _ => Turn::stay(Step::EditingApp { app_id }, "Choose an option from 1 to 5"),
        })
    }

    fn on_new_name(&self, app_id: i64, name: &str) -> rusqlite::Result<Turn> {
        if let Err(reply) = check_app_name(name) {
            return Ok(Turn::stay(Step::AwaitingNewName { app_id }, reply));
        }
        self.db.update_title(app_id, name)?;
        Ok(Turn::idle(replies::name_updated(name)))
    }

    fn on_new_desc(&self, app_id: i64, description: &str) -> rusqlite::Result<Turn> {
        if let Err(reply) = check_description(description) {
            return Ok(Turn::stay(Step::AwaitingNewDesc { app_id }, reply));
        }
        self.db.update_description(app_id, description)?;
        Ok(Turn::idle(replies::DESCRIPTION_UPDATED))
    }

    /// Command menu input: `delete <cmd>` or a new `/command` name.
    fn on_command(&self, app_id: i64, text: &str) -> rusqlite::Result<Turn> {
        if let Some(target) = text.strip_prefix("delete ") {
            let target = target.trim();
            let command = if target.starts_with('/') {
                target.to_string()
            } else {
                format!("/{target}")
            };
            let deleted = self.db.delete_command(app_id, &command)?;
            let menu = self.commands_menu(app_id)?;
            let reply = if deleted {
                replies::command_deleted(&command, &menu)
            } else {
                replies::command_not_found(&command, &menu)
            };
            return Ok(Turn::stay(Step::AwaitingCommand { app_id }, reply));
        }

        if !text.starts_with('/') {
            return Ok(Turn::stay(Step::AwaitingCommand { app_id }, "A command must start with /"));
        }
        if text.len() < 2 || text.contains(char::is_whitespace) {
            return Ok(Turn::stay(
                Step::AwaitingCommand { app_id },
                "A command is a single word, for example /price",
            ));
        }
        if self.db.find_command(app_id, text)?.is_some() {
            return Ok(Turn::stay(Step::AwaitingCommand { app_id }, replies::command_exists(text)));
        }

        let command = text.to_string();
        let reply = replies::ask_cmd_description(&command);
        Ok(Turn::to(Step::AwaitingCmdDesc { app_id, command }, reply))
    }

    fn on_cmd_response(
        &self,
        app_id: i64,
        command: &str,
        description: &str,
        response: &str,
    ) -> rusqlite::Result<Turn> {
        self.db.create_command(app_id, command, description, response)?;
        let menu = self.commands_menu(app_id)?;
        Ok(Turn::to(Step::AwaitingCommand { app_id }, replies::command_added(command, &menu)))
    }

    fn on_webhook(&self, app_id: i64, url: &str) -> rusqlite::Result<Turn> {
        if url == "clear" || url == "/clear" {
            self.db.set_webhook_url(app_id, "")?;
            return Ok(Turn::idle(replies::WEBHOOK_CLEARED));
        }
        if !url.starts_with(WEBHOOK_SCHEME) {
            return Ok(Turn::stay(Step::AwaitingWebhook { app_id }, "The URL must start with https://"));
        }
        self.db.set_webhook_url(app_id, url)?;
        Ok(Turn::idle(replies::webhook_set(url)))
    }

    fn on_delete_confirm(&self, app_id: i64, confirm: &str) -> rusqlite::Result<Turn> {
        if confirm.to_uppercase() != "YES" {
            return Ok(Turn::idle(replies::DELETE_ABORTED));
        }
        let title = self.db.get_app(app_id)?.map(|app| app.title).unwrap_or_default();
        self.db.delete_app(app_id)?;
        Ok(Turn::idle(replies::app_deleted(&title)))
    }
}

fn on_app_name(name: &str) -> Turn {
    if let Err(reply) = check_app_name(name) {
        return Turn::stay(Step::AwaitingAppName, reply);
    }
    let draft = AppDraft {
        name: name.to_string(),
        ..AppDraft::default()
    };
    Turn::to(Step::AwaitingAppDesc { draft }, replies::ask_description(name))
}

fn on_app_desc(mut draft: AppDraft, description: &str) -> Turn {
    if let Err(reply) = check_description(description) {
        return Turn::stay(Step::AwaitingAppDesc { draft }, reply);
    }
    draft.description = description.to_string();
    Turn::to(Step::AwaitingAppIcon { draft }, replies::ASK_ICON)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_64_hex_chars_and_fresh() {
        let a = generate_api_token();
        let b = generate_api_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_name_bounds_count_chars() {
        assert!(check_app_name("ab").is_err());
        assert!(check_app_name("abc").is_ok());
        assert!(check_app_name(&"x".repeat(50)).is_ok());
        assert!(check_app_name(&"x".repeat(51)).is_err());
        // Three multi-byte chars are still three chars.
        assert!(check_app_name("ééé").is_ok());
    }

    #[test]
    fn test_pick_index() {
        assert_eq!(pick_index("1", 3), Some(0));
        assert_eq!(pick_index("3", 3), Some(2));
        assert_eq!(pick_index("0", 3), None);
        assert_eq!(pick_index("4", 3), None);
        assert_eq!(pick_index("-1", 3), None);
        assert_eq!(pick_index("abc", 3), None);
    }

    #[test]
    fn test_command_table_matches_parser() {
        for (command, _) in COMMANDS {
            if *command == CANCEL {
                continue;
            }
            assert!(Command::parse(command).is_some(), "{command} not parsed");
        }
        assert_eq!(Command::parse("/skip"), None);
        assert_eq!(Command::parse("/newapp now"), None);
    }

    #[test]
    fn test_slash_input_steps() {
        assert!(takes_slash_input(&Step::AwaitingWelcome { draft: AppDraft::default() }));
        assert!(takes_slash_input(&Step::AwaitingWebhook { app_id: 1 }));
        assert!(takes_slash_input(&Step::AwaitingCommand { app_id: 1 }));
        assert!(!takes_slash_input(&Step::Idle));
        assert!(!takes_slash_input(&Step::AwaitingAppName));
        assert!(!takes_slash_input(&Step::DeletingApp { app_id: 1 }));
        assert!(!takes_slash_input(&Step::AwaitingCmdResponse {
            app_id: 1,
            command: "/price".to_string(),
            description: "Current price".to_string(),
        }));
    }
}
