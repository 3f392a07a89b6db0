use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Display name of the group the bot answers in
    #[serde(default = "default_target_group_name")]
    pub target_group_name: String,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WhatsAppConfig {
    /// Where the bridge keeps the authenticated session
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    /// Node entry point of the bridge. When unset the bridge is expected to
    /// be running already.
    #[serde(default)]
    pub sidecar_script: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PacingConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl PacingConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_target_group_name() -> String {
    "AgenticTest".to_string()
}

fn default_model() -> String {
    "gemini-pro".to_string()
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_session_dir() -> PathBuf {
    PathBuf::from("./whatsapp-sessions")
}

fn default_client_id() -> String {
    "whatsapp-bot".to_string()
}

fn default_bridge_url() -> String {
    "ws://127.0.0.1:3710".to_string()
}

fn default_min_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    1500
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_base_url(),
        }
    }
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            session_dir: default_session_dir(),
            client_id: default_client_id(),
            bridge_url: default_bridge_url(),
            sidecar_script: None,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_group_name: default_target_group_name(),
            gemini: GeminiConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            pacing: PacingConfig::default(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_millis(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a whole number of milliseconds, got {:?}", name, value))
}

impl Config {
    /// Load the optional TOML file, then let the process environment override it.
    /// The session directory is created if it does not exist yet.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env(lookup)?;
        config.validate()?;

        if !config.whatsapp.session_dir.exists() {
            std::fs::create_dir_all(&config.whatsapp.session_dir).with_context(|| {
                format!(
                    "Failed to create session directory: {}",
                    config.whatsapp.session_dir.display()
                )
            })?;
        }

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Overlay values from an environment lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        if let Some(name) = get("TARGET_GROUP_NAME") {
            self.target_group_name = name;
        }
        if let Some(key) = get("GEMINI_API_KEY") {
            self.gemini.api_key = Some(key);
        }
        if let Some(model) = get("GEMINI_MODEL") {
            self.gemini.model = model;
        }
        if let Some(url) = get("GEMINI_BASE_URL") {
            self.gemini.base_url = url;
        }
        if let Some(dir) = get("WHATSAPP_SESSION_DIR") {
            self.whatsapp.session_dir = PathBuf::from(dir);
        }
        if let Some(id) = get("WHATSAPP_CLIENT_ID") {
            self.whatsapp.client_id = id;
        }
        if let Some(url) = get("WHATSAPP_BRIDGE_URL") {
            self.whatsapp.bridge_url = url;
        }
        if let Some(script) = get("WHATSAPP_SIDECAR_SCRIPT") {
            self.whatsapp.sidecar_script = Some(PathBuf::from(script));
        }
        if let Some(ms) = get("REPLY_DELAY_MIN_MS") {
            self.pacing.min_delay_ms = parse_millis("REPLY_DELAY_MIN_MS", &ms)?;
        }
        if let Some(ms) = get("REPLY_DELAY_MAX_MS") {
            self.pacing.max_delay_ms = parse_millis("REPLY_DELAY_MAX_MS", &ms)?;
        }

        self.gemini.api_key = non_empty(self.gemini.api_key.take());
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.pacing.max_delay_ms < self.pacing.min_delay_ms {
            bail!(
                "Reply delay range is inverted: min {}ms > max {}ms",
                self.pacing.min_delay_ms,
                self.pacing.max_delay_ms
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.target_group_name, "AgenticTest");
        assert_eq!(config.gemini.model, "gemini-pro");
        assert!(config.gemini.api_key.is_none());
        assert_eq!(config.whatsapp.session_dir, PathBuf::from("./whatsapp-sessions"));
        assert_eq!(config.pacing.min_delay(), Duration::from_millis(500));
        assert_eq!(config.pacing.max_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("TARGET_GROUP_NAME", "Team Chat"),
                ("GEMINI_API_KEY", "secret"),
                ("WHATSAPP_BRIDGE_URL", "ws://localhost:9000"),
                ("REPLY_DELAY_MIN_MS", "0"),
                ("REPLY_DELAY_MAX_MS", "10"),
            ]))
            .unwrap();

        assert_eq!(config.target_group_name, "Team Chat");
        assert_eq!(config.gemini.api_key.as_deref(), Some("secret"));
        assert_eq!(config.whatsapp.bridge_url, "ws://localhost:9000");
        assert_eq!(config.pacing.min_delay_ms, 0);
        assert_eq!(config.pacing.max_delay_ms, 10);
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("TARGET_GROUP_NAME", ""), ("GEMINI_API_KEY", "  ")]))
            .unwrap();
        assert_eq!(config.target_group_name, "AgenticTest");
        assert!(config.gemini.api_key.is_none());
    }

    #[test]
    fn test_bad_delay_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("REPLY_DELAY_MIN_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("REPLY_DELAY_MIN_MS"));
    }

    #[test]
    fn test_inverted_range_fails_validation() {
        let mut config = Config::default();
        config.pacing.min_delay_ms = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groupbot.toml");
        std::fs::write(
            &path,
            r#"
target_group_name = "From File"

[gemini]
api_key = ""
model = "gemini-1.5-flash"

[pacing]
min_delay_ms = 100
"#,
        )
        .unwrap();

        let mut config = Config::from_file(&path).unwrap();
        assert_eq!(config.target_group_name, "From File");
        assert_eq!(config.gemini.model, "gemini-1.5-flash");
        assert_eq!(config.pacing.min_delay_ms, 100);
        assert_eq!(config.pacing.max_delay_ms, 1500);

        config
            .apply_env(env(&[("TARGET_GROUP_NAME", "From Env")]))
            .unwrap();
        assert_eq!(config.target_group_name, "From Env");
        assert!(config.gemini.api_key.is_none());
    }

    fn write_config(dir: &Path, session_dir: &Path) -> PathBuf {
        let path = dir.join("groupbot.toml");
        std::fs::write(
            &path,
            format!(
                "[whatsapp]\nsession_dir = {:?}\n",
                session_dir.display().to_string()
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_load_creates_missing_session_dir() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = dir.path().join("state").join("sessions");
        let path = write_config(dir.path(), &session_dir);

        let config = Config::load_with(Some(&path), env(&[])).unwrap();
        assert_eq!(config.whatsapp.session_dir, session_dir);
        assert!(session_dir.is_dir());
    }

    #[test]
    fn test_load_keeps_existing_session_dir() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = dir.path().join("sessions");
        std::fs::create_dir(&session_dir).unwrap();
        std::fs::write(session_dir.join("session.json"), "{}").unwrap();
        let path = write_config(dir.path(), &session_dir);

        Config::load_with(Some(&path), env(&[])).unwrap();
        assert_eq!(
            std::fs::read_to_string(session_dir.join("session.json")).unwrap(),
            "{}"
        );
    }

    #[test]
    fn test_load_session_dir_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = dir.path().join("from-env");
        let session_str = session_dir.display().to_string();

        let config =
            Config::load_with(None, env(&[("WHATSAPP_SESSION_DIR", session_str.as_str())])).unwrap();
        assert_eq!(config.whatsapp.session_dir, session_dir);
        assert!(session_dir.is_dir());
    }
}
