use std::collections::HashSet;
use std::env;
use thiserror::Error;

const DEFAULT_SECRET: &str = "change_this_secret";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} missing")]
    Missing(&'static str),
    #[error("invalid {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone)]
pub struct Config {
    pub bot_token: Option<String>,
    pub bot_username: String,
    pub secret_key: Vec<u8>,
    pub managers_chat_id: i64,
    pub staff_user_ids: HashSet<i64>,
    pub promo_valid_days: i64,
    pub database_url: String,
    pub session_ttl_minutes: i64,
    pub survey_delay_minutes: i64,
    pub prizes_file: Option<String>,
    pub bind_addr: String,
    /// Compared against `X-Telegram-Bot-Api-Secret-Token` when set.
    pub webhook_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = env::var("SECRET_KEY").unwrap_or_else(|_| {
            tracing::warn!("SECRET_KEY not set, using the insecure default");
            DEFAULT_SECRET.to_string()
        });

        let database_url = env::var("DATABASE_URL")
            .or_else(|_| env::var("DB_PATH").map(|path| sqlite_url(&path)))
            .unwrap_or_else(|_| "sqlite://bot.db".to_string());

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| {
            let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
            format!("0.0.0.0:{}", port)
        });

        Ok(Self {
            bot_token: env::var("TELEGRAM_BOT_TOKEN")
                .or_else(|_| env::var("BOT_TOKEN"))
                .ok()
                .filter(|t| !t.trim().is_empty()),
            bot_username: env::var("BOT_USERNAME")
                .map(|raw| raw.trim().trim_start_matches('@').to_string())
                .ok()
                .filter(|val| !val.is_empty())
                .unwrap_or_else(|| "feedback_bot".to_string()),
            secret_key: secret.into_bytes(),
            managers_chat_id: parse_var("MANAGERS_CHAT_ID", 0)?,
            staff_user_ids: parse_id_list(&env::var("STAFF_USER_IDS").unwrap_or_default())
                .map_err(|value| ConfigError::Invalid {
                    key: "STAFF_USER_IDS",
                    value,
                })?,
            promo_valid_days: parse_var("PROMO_VALID_DAYS", 30)?,
            database_url,
            session_ttl_minutes: parse_var("SURVEY_SESSION_TTL_MINUTES", 180)?,
            survey_delay_minutes: parse_var("SURVEY_DELAY_MINUTES", 60)?,
            prizes_file: env::var("PRIZES_FILE").ok().filter(|p| !p.trim().is_empty()),
            bind_addr,
            webhook_secret: env::var("WEBHOOK_SECRET").ok().filter(|s| !s.trim().is_empty()),
        })
    }

    /// Checks that only matter for the long-running server.
    pub fn require_server_settings(&self) -> Result<&str, ConfigError> {
        if self.secret_key == DEFAULT_SECRET.as_bytes() {
            return Err(ConfigError::Missing("SECRET_KEY"));
        }
        self.bot_token
            .as_deref()
            .ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))
    }

    pub fn alerts_enabled(&self) -> bool {
        self.managers_chat_id != 0
    }

    pub fn is_staff(&self, user_id: i64, chat_id: i64) -> bool {
        self.staff_user_ids.contains(&user_id)
            || (self.alerts_enabled() && chat_id == self.managers_chat_id)
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Config {
            bot_token: Some("token".into()),
            bot_username: "bot".into(),
            secret_key: b"s3cret".to_vec(),
            managers_chat_id: -100,
            staff_user_ids: [7].into_iter().collect(),
            promo_valid_days: 30,
            database_url: "sqlite::memory:".into(),
            session_ttl_minutes: 180,
            survey_delay_minutes: 60,
            prizes_file: None,
            bind_addr: "127.0.0.1:0".into(),
            webhook_secret: None,
        }
    }
}

fn parse_var(key: &'static str, default: i64) -> Result<i64, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        _ => Ok(default),
    }
}

fn parse_id_list(raw: &str) -> Result<HashSet<i64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().map_err(|_| s.to_string()))
        .collect()
}

fn sqlite_url(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite://{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config::for_tests()
    }

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("").unwrap().len(), 0);
        let ids = parse_id_list(" 1, 22 ,-3").unwrap();
        assert!(ids.contains(&1) && ids.contains(&22) && ids.contains(&-3));
        assert_eq!(parse_id_list("1,abc").unwrap_err(), "abc");
    }

    #[test]
    fn test_sqlite_url() {
        assert_eq!(sqlite_url("./bot.db"), "sqlite://./bot.db");
        assert_eq!(sqlite_url("sqlite::memory:"), "sqlite::memory:");
    }

    #[test]
    fn test_staff_check() {
        let mut config = sample();
        assert!(config.is_staff(7, 7));
        assert!(config.is_staff(99, -100));
        assert!(!config.is_staff(99, 99));

        config.managers_chat_id = 0;
        assert!(!config.is_staff(0, 0));
    }

    #[test]
    fn test_server_settings_reject_default_secret() {
        let mut config = sample();
        assert_eq!(config.require_server_settings().unwrap(), "token");
        config.secret_key = DEFAULT_SECRET.as_bytes().to_vec();
        assert!(matches!(
            config.require_server_settings(),
            Err(ConfigError::Missing("SECRET_KEY"))
        ));
    }
}
