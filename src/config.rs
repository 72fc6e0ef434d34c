use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Storage key of the persisted profile. Every context, including the
/// service worker, must use this exact value.
pub const PROFILE_STORE_KEY: &str = "trilinder.randomnotificationsite.persistentDataStore";

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";
pub const DEFAULT_USER_AGENT: &str = "ping-client";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Get the client home directory
pub fn get_client_home() -> Result<PathBuf> {
    if let Ok(val) = env::var("PING_CLIENT_HOME") {
        if !val.is_empty() {
            return Ok(PathBuf::from(val));
        }
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("Cannot determine home directory")?;

    Ok(PathBuf::from(home).join(".ping_client"))
}

/// Get the directory backing the local key/value storage
pub fn get_storage_dir() -> Result<PathBuf> {
    let home = get_client_home()?;
    Ok(home.join("local_storage"))
}

pub fn default_base_url() -> String {
    match env::var("PING_CLIENT_BASE_URL") {
        Ok(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
        _ => DEFAULT_BASE_URL.to_string(),
    }
}

pub fn default_user_agent() -> String {
    env::var("PING_CLIENT_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EnvGuard, ENV_LOCK};

    #[test]
    fn storage_dir_follows_client_home() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|err| err.into_inner());
        let temp_dir = tempfile::tempdir().unwrap();
        let _guard = EnvGuard::set("PING_CLIENT_HOME", temp_dir.path());

        let dir = get_storage_dir().unwrap();

        assert_eq!(dir, temp_dir.path().join("local_storage"));
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|err| err.into_inner());
        let _guard = EnvGuard::set("PING_CLIENT_BASE_URL", "http://example.test:8080/");

        assert_eq!(default_base_url(), "http://example.test:8080");
    }

    #[test]
    fn base_url_defaults_when_unset() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|err| err.into_inner());
        let _guard = EnvGuard::unset("PING_CLIENT_BASE_URL");

        assert_eq!(default_base_url(), DEFAULT_BASE_URL);
    }
}
