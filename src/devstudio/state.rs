//! Conversation state for the Dev Studio wizard.
//!
//! Each user has exactly one [`Step`]. The step carries the data of the flow it
//! belongs to, so a draft from an abandoned `/newapp` can never leak into an
//! edit or command flow started later.

use serde::{Deserialize, Serialize};

/// Fields collected while walking through `/newapp`.
///
/// Fields are filled in order; the current step tells which ones are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDraft {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub category_id: i64,
    #[serde(default)]
    pub username: String,
}

/// Sub-flow to resume once the user picks an app from a numbered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppAction {
    Token,
    Edit,
    Delete,
    Commands,
    Webhook,
}

/// Where a user currently is in the conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Step {
    #[default]
    Idle,
    AwaitingAppName,
    AwaitingAppDesc {
        draft: AppDraft,
    },
    AwaitingAppIcon {
        draft: AppDraft,
    },
    AwaitingCategory {
        draft: AppDraft,
    },
    AwaitingUsername {
        draft: AppDraft,
    },
    AwaitingWelcome {
        draft: AppDraft,
    },
    /// `app_ids` is the list exactly as it was numbered for the user.
    SelectingApp {
        action: AppAction,
        app_ids: Vec<i64>,
    },
    EditingApp {
        app_id: i64,
    },
    AwaitingNewName {
        app_id: i64,
    },
    AwaitingNewDesc {
        app_id: i64,
    },
    AwaitingCommand {
        app_id: i64,
    },
    AwaitingCmdDesc {
        app_id: i64,
        command: String,
    },
    AwaitingCmdResponse {
        app_id: i64,
        command: String,
        description: String,
    },
    AwaitingWebhook {
        app_id: i64,
    },
    DeletingApp {
        app_id: i64,
    },
}

impl Step {
    /// Tag stored in the `state` column. Matches the serde tag.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Idle => "idle",
            Step::AwaitingAppName => "awaiting_app_name",
            Step::AwaitingAppDesc { .. } => "awaiting_app_desc",
            Step::AwaitingAppIcon { .. } => "awaiting_app_icon",
            Step::AwaitingCategory { .. } => "awaiting_category",
            Step::AwaitingUsername { .. } => "awaiting_username",
            Step::AwaitingWelcome { .. } => "awaiting_welcome",
            Step::SelectingApp { .. } => "selecting_app",
            Step::EditingApp { .. } => "editing_app",
            Step::AwaitingNewName { .. } => "awaiting_new_name",
            Step::AwaitingNewDesc { .. } => "awaiting_new_desc",
            Step::AwaitingCommand { .. } => "awaiting_command",
            Step::AwaitingCmdDesc { .. } => "awaiting_cmd_desc",
            Step::AwaitingCmdResponse { .. } => "awaiting_cmd_response",
            Step::AwaitingWebhook { .. } => "awaiting_webhook",
            Step::DeletingApp { .. } => "deleting_app",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Step::Idle)
    }
}

/// Persisted conversation record for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    pub user_id: i64,
    pub step: Step,
    pub updated_at: String,
}
