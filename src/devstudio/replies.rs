//! Reply texts and list/menu formatting for Dev Studio.

use std::fmt::Write;

use crate::devstudio::database::{App, BotCommand, Category, ModerationStatus};
use crate::devstudio::state::AppAction;

pub const WELCOME: &str = "Hi! ⚡ Welcome to Dev Studio!

Here you can:
• Create a new app
• Set up commands and auto-replies
• Get an API token for integrations
• Configure webhooks

Start with /newapp to create your first app!

/help - all commands";

pub const HELP: &str = "📋 Available commands:

🆕 Create and manage
/newapp - Create a new app
/myapps - List my apps
/edit - Edit an app
/delete - Delete an app

⚙️ App settings
/token - Show the API token
/commands - Configure commands
/webhook - Configure the webhook

❌ /cancel - Cancel the current action";

pub const CANCELLED: &str = "Action cancelled. What can I do for you?\n\nUse /help for the list of commands.";

pub const NOT_UNDERSTOOD: &str = "I don't understand. Use /help for the list of commands.";

pub const UNKNOWN_COMMAND: &str = "Unknown command. Use /help for the list of commands.";

pub const TRY_AGAIN: &str = "Something went wrong. Please try again.";

pub const CREATE_FAILED: &str = "Failed to create the app. Try again with /newapp";

pub const NEW_APP: &str = "Great! Let's create a new app.

What will your app be called?
(For example: \"Crypto Trading\" or \"NFT Gallery\")";

pub const ASK_ICON: &str = "Now pick an icon (emoji) for the app:\n\n(Send a single emoji, for example: 🤖 🎮 💰 🔥 ⚡)";

pub const ASK_CMD_RESPONSE: &str = "Now enter the reply your app sends for this command:";

pub const DELETE_ABORTED: &str = "Deletion cancelled.";

pub const WEBHOOK_CLEARED: &str = "✅ Webhook removed";

pub const DESCRIPTION_UPDATED: &str = "✅ Description updated!\n\nThe app was sent for moderation again.";

pub fn no_apps(action: AppAction) -> &'static str {
    match action {
        AppAction::Delete => "You don't have any apps.",
        _ => "You don't have any apps yet. Create one with /newapp",
    }
}

fn moderation_label(status: ModerationStatus) -> &'static str {
    match status {
        ModerationStatus::Pending => "⏳ In review",
        ModerationStatus::Approved => "✅ Active",
        ModerationStatus::Rejected => "❌ Rejected",
    }
}

/// `/myapps` listing.
pub fn my_apps(apps: &[App]) -> String {
    if apps.is_empty() {
        return "You don't have any apps yet. Create your first one with /newapp".to_string();
    }

    let mut out = String::from("📱 Your apps:\n\n");
    for (i, app) in apps.iter().enumerate() {
        let username = if app.bot_username.is_empty() {
            "not set".to_string()
        } else {
            format!("@{}", app.bot_username)
        };
        let _ = writeln!(out, "{}. {} {}", i + 1, app.icon, app.title);
        if !app.subtitle.is_empty() {
            let _ = writeln!(out, "   {}", app.subtitle);
        }
        let _ = writeln!(out, "   Username: {}", username);
        let _ = writeln!(out, "   Status: {}", moderation_label(app.moderation_status));
        let _ = writeln!(out, "   Users: {}\n", app.users_count);
    }
    out.push_str("Use /edit to edit an app or /token to get its token");
    out
}

/// Numbered app list shown before a sub-flow.
pub fn app_list(apps: &[App], action: AppAction) -> String {
    let header = match action {
        AppAction::Token => "Pick an app to get its token (enter the number):",
        AppAction::Edit => "Pick an app to edit (enter the number):",
        AppAction::Delete => "Pick an app to delete (enter the number):",
        AppAction::Commands => "Pick an app to configure commands (enter the number):",
        AppAction::Webhook => "Pick an app to configure the webhook (enter the number):",
    };
    let mut out = format!("{header}\n\n");
    for (i, app) in apps.iter().enumerate() {
        let _ = writeln!(out, "{}. {} {} (@{})", i + 1, app.icon, app.title, app.bot_username);
    }
    out
}

pub fn token_card(app: &App) -> String {
    format!(
        "🔑 API token for {} {}

{}

⚠️ Keep the token safe!",
        app.icon, app.title, app.api_token
    )
}

pub fn edit_menu(app: &App) -> String {
    format!(
        "⚙️ Editing: {} {}

Choose what to change:

1. 📝 Name
2. 📄 Description
3. 📋 Commands
4. 🔗 Webhook
5. 🔑 Show token

Enter a number or /cancel:",
        app.icon, app.title
    )
}

pub fn commands_menu(app: &App, commands: &[BotCommand]) -> String {
    let mut out = format!("📋 Commands of {}:\n\n", app.title);
    if commands.is_empty() {
        out.push_str("No commands yet.\n\n");
    } else {
        for cmd in commands {
            let _ = writeln!(out, "{} - {}", cmd.command, cmd.description);
        }
        out.push('\n');
    }
    out.push_str("Enter a new command (for example /help)\nOr 'delete /command' to remove one\n\n/cancel - exit");
    out
}

pub fn category_list(categories: &[Category]) -> String {
    let mut out = String::from("Pick a category for the app (enter the number):\n\n");
    for (i, cat) in categories.iter().enumerate() {
        let _ = writeln!(out, "{}. {} {}", i + 1, cat.icon, cat.name);
    }
    out
}

fn current_webhook(app: &App) -> &str {
    if app.webhook_url.is_empty() { "not set" } else { &app.webhook_url }
}

pub fn webhook_prompt(app: &App) -> String {
    format!(
        "🔗 Webhook for {}\n\nCurrent URL: {}\n\nEnter the new webhook URL, 'clear' to remove it, or /cancel:",
        app.title,
        current_webhook(app)
    )
}

pub fn webhook_set(url: &str) -> String {
    format!("✅ Webhook set:\n{url}\n\nUser messages will now be delivered to this URL.")
}

pub fn confirm_delete(app: &App) -> String {
    format!(
        "⚠️ Are you sure you want to delete \"{}\"?\n\nEnter YES to confirm or /cancel to abort.",
        app.title
    )
}

pub fn app_deleted(title: &str) -> String {
    format!("✅ App \"{title}\" deleted.")
}

pub fn ask_description(name: &str) -> String {
    format!("Great name: {name}!\n\nNow describe what your app does (short description):")
}

pub fn ask_username(category: &Category) -> String {
    format!(
        "Category: {} {}

Now pick a username for the app.

The username must:
• Be unique
• Contain only a-z, 0-9 and _
• End with 'app'

(For example: mytradingapp, nft_gallery_app)",
        category.icon, category.name
    )
}

pub fn ask_welcome(username: &str) -> String {
    format!(
        "Username @{username} is available! ✅

Now write a welcome message.

Users will see it when they send /start:

(Or send /skip to skip this step)"
    )
}

pub fn app_created(app: &App) -> String {
    format!(
        "🎉 Congratulations! Your app is created!

{} {}
@{}

🔑 API token (save it!):
{}

📋 Status: ⏳ In review
The app will be reviewed within 24 hours.

What's next:
• /commands - add commands
• /webhook - set up a webhook
• /token - show the token again",
        app.icon, app.title, app.bot_username, app.api_token
    )
}

pub fn ask_new_name(app: &App) -> String {
    format!("Current name: {}\n\nEnter the new name:", app.title)
}

pub fn ask_new_description(app: &App) -> String {
    format!("Current description: {}\n\nEnter the new description:", app.description)
}

pub fn name_updated(name: &str) -> String {
    format!("✅ Name changed to: {name}\n\nThe app was sent for moderation again.")
}

pub fn ask_cmd_description(command: &str) -> String {
    format!("Command: {command}\n\nEnter a short description of the command:")
}

pub fn command_exists(command: &str) -> String {
    format!("Command {command} already exists. To remove it, send: delete {command}")
}

pub fn command_added(command: &str, menu: &str) -> String {
    format!("✅ Command {command} added!\n\n{menu}")
}

pub fn command_deleted(command: &str, menu: &str) -> String {
    format!("✅ Command {command} deleted!\n\n{menu}")
}

pub fn command_not_found(command: &str, menu: &str) -> String {
    format!("Command {command} not found.\n\n{menu}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(id: i64, title: &str, username: &str) -> App {
        App {
            id,
            title: title.to_string(),
            icon: "🤖".to_string(),
            bot_username: username.to_string(),
            ..App::default()
        }
    }

    #[test]
    fn test_app_list_is_one_based() {
        let apps = vec![app(3, "Third", "thirdapp"), app(1, "First", "firstapp")];
        let text = app_list(&apps, AppAction::Token);
        assert!(text.starts_with("Pick an app to get its token"));
        assert!(text.contains("1. 🤖 Third (@thirdapp)"));
        assert!(text.contains("2. 🤖 First (@firstapp)"));
        assert!(!text.contains("0."));
    }

    #[test]
    fn test_my_apps_shows_status_and_users() {
        let mut approved = app(1, "Crypto Tracker", "mytradingapp");
        approved.moderation_status = ModerationStatus::Approved;
        approved.users_count = 12;
        let text = my_apps(&[approved, app(2, "No Name", "")]);

        assert!(text.contains("Status: ✅ Active"));
        assert!(text.contains("Users: 12"));
        assert!(text.contains("Username: not set"));
        assert!(text.contains("Status: ⏳ In review"));
    }

    #[test]
    fn test_commands_menu_empty_and_filled() {
        let a = app(1, "Crypto Tracker", "mytradingapp");
        assert!(commands_menu(&a, &[]).contains("No commands yet."));

        let cmd = BotCommand {
            command: "/price".to_string(),
            description: "Current price".to_string(),
        };
        let text = commands_menu(&a, &[cmd]);
        assert!(text.contains("/price - Current price"));
        assert!(!text.contains("No commands yet."));
    }

    #[test]
    fn test_webhook_prompt_shows_current_url() {
        let mut a = app(1, "Crypto Tracker", "mytradingapp");
        assert!(webhook_prompt(&a).contains("Current URL: not set"));
        a.webhook_url = "https://example.com/hook".to_string();
        assert!(webhook_prompt(&a).contains("Current URL: https://example.com/hook"));
    }
}
