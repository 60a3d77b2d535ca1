use anyhow::{Context, Result};
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_WELCOME: &str = "Welcome, {username}!";

/// Name of the seeded onboarding survey. Its broadcast messages are never
/// pinned, and it is the fallback join survey for groups without an explicit
/// assignment.
pub const ONBOARDING_SURVEY: &str = "onboarding";

/// All runtime knobs, read from the environment exactly once at startup and
/// passed around inside `AppState`. No module-level globals.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub admin_ids: HashSet<i64>,
    pub captcha_enabled: bool,
    pub captcha_timeout_mins: i64,
    pub welcome_template: String,
    pub test_mode: bool,
    pub db_path: String,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bot_token = env::var("TG_BOT_TOKEN").context("Missing TG_BOT_TOKEN")?;
        let admin_raw = env::var("ADMIN_IDS").context("Missing ADMIN_IDS")?;
        let admin_ids = parse_admin_ids(&admin_raw)
            .with_context(|| format!("Bad ADMIN_IDS value: {}", admin_raw))?;

        let captcha_enabled = env_bool("ENABLE_CAPTCHA", false);
        let captcha_timeout_mins = env::var("CAPTCHA_TIMEOUT_MINUTES")
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(5)
            .max(1);

        let welcome_template =
            env::var("WELCOME_MESSAGE").unwrap_or_else(|_| DEFAULT_WELCOME.to_string());
        let test_mode = env_bool("TEST_MODE", false);

        let db_path = env::var("DB_PATH").unwrap_or_else(|_| "pollgate.sqlite".to_string());
        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()));

        Ok(Config {
            bot_token,
            admin_ids,
            captcha_enabled,
            captcha_timeout_mins,
            welcome_template,
            test_mode,
            db_path,
            data_dir,
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn parse_admin_ids(raw: &str) -> Result<HashSet<i64>> {
    let mut ids = HashSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        ids.insert(part.parse::<i64>().context("ADMIN_IDS entries must be integers")?);
    }
    anyhow::ensure!(!ids.is_empty(), "ADMIN_IDS is empty");
    Ok(ids)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_ids_parse_trims_and_skips_blanks() {
        let ids = parse_admin_ids("1, 42 ,,7").unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&42));
    }

    #[test]
    fn admin_ids_reject_garbage() {
        assert!(parse_admin_ids("1,abc").is_err());
        assert!(parse_admin_ids("").is_err());
    }
}
