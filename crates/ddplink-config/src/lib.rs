//! Shared configuration for ddplink clients.
//!
//! TOML profiles merged with `DDPLINK_*` environment variables, credential
//! resolution, and translation to `ddplink_core::ClientOptions`. Nested keys
//! use a double underscore in the environment, e.g.
//! `DDPLINK_PROFILES__LOCAL__ENDPOINT`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use ddplink_core::ClientOptions;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{profile}'")]
    NoProfile { profile: String },

    #[error("profile '{profile}' names a user but no password could be resolved")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    /// Connection defaults shared by every profile.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "enabled")]
    pub auto_reconnect: bool,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "enabled")]
    pub clear_data_on_reconnection: bool,

    /// Bound for connect, disconnect and method calls.
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub clean_queue: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_interval_ms: default_reconnect_interval_ms(),
            clear_data_on_reconnection: true,
            timeout_ms: None,
            clean_queue: false,
        }
    }
}

fn enabled() -> bool {
    true
}
fn default_reconnect_interval_ms() -> u64 {
    10_000
}

/// A named server profile. Unset options fall back to [`Defaults`].
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Websocket endpoint (e.g., "wss://example.com/websocket").
    pub endpoint: String,

    /// Username for password login.
    pub username: Option<String>,

    /// Password (plaintext; prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Resume token from an earlier login.
    pub token: Option<String>,

    pub auto_reconnect: Option<bool>,
    pub reconnect_interval_ms: Option<u64>,
    pub clear_data_on_reconnection: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub clean_queue: Option<bool>,

    /// Protocol version to announce; the client default when unset.
    pub ddp_version: Option<String>,
}

/// How to log in after connecting.
#[derive(Debug)]
pub enum Credentials {
    Password { username: String, password: SecretString },
    Token(SecretString),
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "ddplink", "ddplink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("ddplink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the platform config file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment. A missing file yields
/// the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("DDPLINK_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

// ── Profile selection ───────────────────────────────────────────────

impl Config {
    /// Look up `name`, or the default profile when `None`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::NoProfile { profile: name.into() })
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve login credentials for a profile.
///
/// A resume token wins over a password. The username may come from
/// `DDPLINK_USERNAME`; the password is looked up in `DDPLINK_PASSWORD`, then
/// the profile's `password_env`, then the plaintext field. `Ok(None)` means
/// the profile does not log in.
pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Result<Option<Credentials>, ConfigError> {
    if let Some(ref token) = profile.token {
        return Ok(Some(Credentials::Token(SecretString::from(token.clone()))));
    }

    let Some(username) = profile
        .username
        .clone()
        .or_else(|| std::env::var("DDPLINK_USERNAME").ok())
    else {
        return Ok(None);
    };

    // 1. Env var
    if let Ok(pw) = std::env::var("DDPLINK_PASSWORD") {
        return Ok(Some(Credentials::Password {
            username,
            password: SecretString::from(pw),
        }));
    }

    // 2. Profile's password_env → env var lookup
    if let Some(ref env_name) = profile.password_env {
        if let Ok(pw) = std::env::var(env_name) {
            return Ok(Some(Credentials::Password {
                username,
                password: SecretString::from(pw),
            }));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(Some(Credentials::Password {
            username,
            password: SecretString::from(pw.clone()),
        }));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Translation ─────────────────────────────────────────────────────

/// Build `ClientOptions` from a profile, falling back to `defaults`.
pub fn profile_to_client_options(profile: &Profile, defaults: &Defaults) -> Result<ClientOptions, ConfigError> {
    let endpoint: Url = profile.endpoint.parse().map_err(|_| ConfigError::Validation {
        field: "endpoint".into(),
        reason: format!("invalid URL: {}", profile.endpoint),
    })?;
    if !matches!(endpoint.scheme(), "ws" | "wss") {
        return Err(ConfigError::Validation {
            field: "endpoint".into(),
            reason: format!("expected a ws:// or wss:// URL, got '{endpoint}'"),
        });
    }

    let reconnect_interval_ms = profile
        .reconnect_interval_ms
        .unwrap_or(defaults.reconnect_interval_ms);
    if reconnect_interval_ms == 0 {
        return Err(ConfigError::Validation {
            field: "reconnect_interval_ms".into(),
            reason: "must be greater than zero".into(),
        });
    }

    let mut options = ClientOptions::new(endpoint);
    options.auto_reconnect = profile.auto_reconnect.unwrap_or(defaults.auto_reconnect);
    options.reconnect_interval_ms = reconnect_interval_ms;
    options.clear_data_on_reconnection = profile
        .clear_data_on_reconnection
        .unwrap_or(defaults.clear_data_on_reconnection);
    options.max_timeout_ms = profile.timeout_ms.or(defaults.timeout_ms);
    options.clean_queue = profile.clean_queue.unwrap_or(defaults.clean_queue);
    if let Some(ref version) = profile.ddp_version {
        options.ddp_version.clone_from(version);
    }
    Ok(options)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    fn write(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn profile(endpoint: &str) -> Profile {
        Profile {
            endpoint: endpoint.into(),
            ..Profile::default()
        }
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert!(cfg.profiles.is_empty());
        assert!(cfg.defaults.auto_reconnect);
        assert_eq!(cfg.defaults.reconnect_interval_ms, 10_000);
    }

    #[test]
    fn loads_profiles_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
default_profile = "local"

[defaults]
timeout_ms = 5000
clean_queue = true

[profiles.local]
endpoint = "ws://localhost:3000/websocket"
username = "ada"
password = "hunter2"

[profiles.prod]
endpoint = "wss://example.com/websocket"
timeout_ms = 250
auto_reconnect = false
"#,
        );

        let cfg = load_config_from(&path).unwrap();
        let (name, local) = cfg.profile(None).unwrap();
        assert_eq!(name, "local");

        let options = profile_to_client_options(local, &cfg.defaults).unwrap();
        assert_eq!(options.endpoint.as_str(), "ws://localhost:3000/websocket");
        assert_eq!(options.max_timeout_ms, Some(5000));
        assert!(options.clean_queue);
        assert!(options.auto_reconnect);

        let (_, prod) = cfg.profile(Some("prod")).unwrap();
        let options = profile_to_client_options(prod, &cfg.defaults).unwrap();
        assert_eq!(options.max_timeout_ms, Some(250));
        assert!(!options.auto_reconnect);
        assert_eq!(options.ddp_version, "1");
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let cfg = Config::default();
        let err = cfg.profile(Some("nope")).unwrap_err();
        assert!(matches!(err, ConfigError::NoProfile { ref profile } if profile == "nope"));
    }

    #[test]
    fn endpoint_must_be_a_websocket_url() {
        let defaults = Defaults::default();
        for bad in ["not a url", "https://example.com/websocket"] {
            let err = profile_to_client_options(&profile(bad), &defaults).unwrap_err();
            assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "endpoint"));
        }
    }

    #[test]
    fn zero_reconnect_interval_is_rejected() {
        let mut p = profile("ws://localhost/websocket");
        p.reconnect_interval_ms = Some(0);
        let err = profile_to_client_options(&p, &Defaults::default()).unwrap_err();
        assert!(err.to_string().contains("reconnect_interval_ms"));
    }

    #[test]
    fn token_wins_over_password() {
        let mut p = profile("ws://localhost/websocket");
        p.username = Some("ada".into());
        p.password = Some("pw".into());
        p.token = Some("tok".into());

        match resolve_credentials(&p, "local").unwrap() {
            Some(Credentials::Token(token)) => assert_eq!(token.expose_secret(), "tok"),
            other => panic!("expected token credentials, got {other:?}"),
        }
    }

    #[test]
    fn plaintext_password_resolves() {
        let mut p = profile("ws://localhost/websocket");
        p.username = Some("ada".into());
        p.password = Some("pw".into());

        match resolve_credentials(&p, "local").unwrap() {
            Some(Credentials::Password { username, password }) => {
                assert_eq!(username, "ada");
                assert!(!password.expose_secret().is_empty());
            }
            other => panic!("expected password credentials, got {other:?}"),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.profiles.insert("default".into(), profile("wss://example.com/websocket"));
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let (_, p) = loaded.profile(None).unwrap();
        assert_eq!(p.endpoint, "wss://example.com/websocket");
    }
}
