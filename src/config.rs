use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use teloxide::types::{ChatId, UserId};

/// Default allowed characters for new app usernames.
const DEFAULT_USERNAME_PATTERN: &str = "^[a-z0-9_]+$";

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Invalid regex pattern.
    InvalidRegex { pattern: String, source: regex::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidRegex { pattern, source } => {
                write!(f, "invalid regex pattern '{}': {}", pattern, source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidRegex { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

/// A category offered during `/newapp`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategorySeed {
    pub name: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    log_chat_id: Option<i64>,
    /// Directory for the database and logs. Defaults to current directory.
    data_dir: Option<String>,
    /// Regex new app usernames must match.
    username_pattern: Option<String>,
    #[serde(default)]
    categories: Vec<CategorySeed>,
    /// Users who may talk to Dev Studio. Empty means everyone.
    #[serde(default)]
    allowed_users: Vec<u64>,
}

pub struct Config {
    pub telegram_bot_token: String,
    pub log_chat_id: Option<ChatId>,
    /// Directory for state files (database, logs).
    pub data_dir: PathBuf,
    pub username_pattern: Regex,
    /// Categories in display order.
    pub categories: Vec<CategorySeed>,
    pub allowed_users: HashSet<UserId>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        check_bot_token(&file.telegram_bot_token)?;

        if let Some(empty) = file.categories.iter().find(|c| c.name.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "category names must not be empty (icon '{}')",
                empty.icon
            )));
        }
        let categories = if file.categories.is_empty() {
            default_categories()
        } else {
            file.categories
        };

        let pattern = file
            .username_pattern
            .unwrap_or_else(|| DEFAULT_USERNAME_PATTERN.to_string());
        let username_pattern = Regex::new(&pattern)
            .map_err(|e| ConfigError::InvalidRegex { pattern, source: e })?;

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            log_chat_id: file.log_chat_id.map(ChatId),
            data_dir,
            username_pattern,
            categories,
            allowed_users: file.allowed_users.into_iter().map(UserId).collect(),
        })
    }

    /// Check if user may use Dev Studio.
    pub fn is_allowed(&self, user_id: UserId) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id)
    }
}

/// Bot tokens look like `<numeric bot id>:<secret>`.
fn check_bot_token(token: &str) -> Result<(), ConfigError> {
    if token.is_empty() {
        return Err(ConfigError::Validation("telegram_bot_token is required".into()));
    }
    match token.split_once(':') {
        Some((bot_id, secret))
            if bot_id.parse::<u64>().is_ok() && !secret.is_empty() && !secret.contains(':') =>
        {
            Ok(())
        }
        _ => Err(ConfigError::Validation(format!(
            "telegram_bot_token must look like <bot id>:<secret>, got {} chars",
            token.chars().count()
        ))),
    }
}

fn default_categories() -> Vec<CategorySeed> {
    [
        ("AI", "🤖"),
        ("Games", "🎮"),
        ("Trading", "📊"),
        ("DePIN", "📡"),
        ("DeFi", "💰"),
        ("NFT", "🖼️"),
        ("Staking", "🔒"),
        ("Services", "🛠️"),
    ]
    .into_iter()
    .map(|(name, icon)| CategorySeed { name: name.to_string(), icon: icon.to_string() })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_with_defaults() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert!(config.log_chat_id.is_none());
        assert_eq!(config.categories.len(), 8);
        assert_eq!(config.categories[0].name, "AI");
        assert_eq!(config.categories[7].name, "Services");
        assert!(config.username_pattern.is_match("nft_gallery_app"));
        assert!(!config.username_pattern.is_match("my-app"));
        assert!(config.is_allowed(UserId(42)));
    }

    #[test]
    fn test_custom_fields() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "data_dir": "/var/lib/devstudio",
            "log_chat_id": -100123,
            "username_pattern": "^[a-z]+$",
            "categories": [{"name": "Tools", "icon": "🔧"}, {"name": "Fun"}],
            "allowed_users": [7, 8]
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/devstudio"));
        assert_eq!(config.log_chat_id, Some(ChatId(-100123)));
        assert!(!config.username_pattern.is_match("my_app"));
        assert_eq!(
            config.categories,
            vec![
                CategorySeed { name: "Tools".into(), icon: "🔧".into() },
                CategorySeed { name: "Fun".into(), icon: String::new() },
            ]
        );
        assert!(config.is_allowed(UserId(7)));
        assert!(!config.is_allowed(UserId(9)));
    }

    #[test]
    fn test_missing_bot_token() {
        let file = write_config(r#"{ "telegram_bot_token": "" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn test_malformed_bot_tokens() {
        for token in ["devstudio_no_colon", "devstudio:secret", "123456789:", "1:2:3"] {
            let err = assert_err(check_bot_token(token));
            assert!(err.to_string().contains("<bot id>:<secret>"), "{token}: {err}");
        }
        assert!(check_bot_token("123456789:ABCdef").is_ok());
    }

    #[test]
    fn test_bot_token_error_hides_secret() {
        let file = write_config(r#"{ "telegram_bot_token": "devstudio:SuperSecret" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(!err.to_string().contains("SuperSecret"));
    }

    #[test]
    fn test_blank_category_name() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "categories": [{"name": "  ", "icon": "🔧"}]
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("category"));
    }

    #[test]
    fn test_invalid_username_pattern() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "username_pattern": "[invalid(regex"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::InvalidRegex { .. }));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
