// src/config.rs
// Process configuration: env-var driven, with `.env` support for local runs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

const DEFAULT_FEED_URL: &str =
    "https://api.bseindia.com/BseIndiaAPI/api/AnnSubCategoryGetData/w";
const DEFAULT_ATTACHMENT_URL: &str =
    "https://www.bseindia.com/xml-data/corpfiling/AttachLive";
const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Everything the process needs, resolved once at startup and injected into
/// the components that use it. No ambient global state.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Gemini API key. The only setting without a default.
    pub api_key: String,
    /// Scratch directory for downloaded transcripts.
    pub dest_dir: PathBuf,
    pub feed_base_url: String,
    pub attachment_base_url: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    /// Deadline for one pipeline invocation.
    pub pipeline_deadline: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(v) => v.parse::<u16>().map_err(|_| {
                anyhow::anyhow!("PORT must be a valid port number, got {v:?}")
            })?,
            Err(_) => 8080,
        };

        let api_key = std::env::var("API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            bail!("API_KEY must be set (Gemini API key)");
        }

        let dest_dir = std::env::var("DEST_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("downloads"));

        let deadline_secs = std::env::var("PIPELINE_DEADLINE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(600);

        Ok(Self {
            port,
            api_key,
            dest_dir,
            feed_base_url: env_or("FEED_BASE_URL", DEFAULT_FEED_URL),
            attachment_base_url: env_or("ATTACHMENT_BASE_URL", DEFAULT_ATTACHMENT_URL),
            gemini_base_url: env_or("GEMINI_BASE_URL", DEFAULT_GEMINI_URL),
            gemini_model: env_or("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            pipeline_deadline: Duration::from_secs(deadline_secs),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn clear_vars() {
        for k in [
            "PORT",
            "API_KEY",
            "DEST_DIR",
            "FEED_BASE_URL",
            "ATTACHMENT_BASE_URL",
            "GEMINI_BASE_URL",
            "GEMINI_MODEL",
            "PIPELINE_DEADLINE_SECS",
        ] {
            env::remove_var(k);
        }
    }

    #[serial_test::serial]
    #[test]
    fn missing_api_key_is_an_error() {
        clear_vars();
        assert!(Config::from_env().is_err());
    }

    #[serial_test::serial]
    #[test]
    fn defaults_apply_when_only_api_key_is_set() {
        clear_vars();
        env::set_var("API_KEY", "test-key");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.gemini_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(cfg.dest_dir, PathBuf::from("downloads"));
        assert_eq!(cfg.pipeline_deadline, Duration::from_secs(600));
        env::remove_var("API_KEY");
    }

    #[serial_test::serial]
    #[test]
    fn overrides_take_effect() {
        clear_vars();
        env::set_var("API_KEY", "k");
        env::set_var("PORT", "9091");
        env::set_var("GEMINI_MODEL", "gemini-x");
        env::set_var("PIPELINE_DEADLINE_SECS", "30");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.port, 9091);
        assert_eq!(cfg.gemini_model, "gemini-x");
        assert_eq!(cfg.pipeline_deadline, Duration::from_secs(30));
        clear_vars();
    }
}
