//! Configuration management for reward-keys
//!
//! The configuration is loaded once per lifecycle pass and then shared between
//! the console (the only writer) and the event dispatch path (readers) through
//! [`SharedConfig`]. Edits made in the console are visible to the next event.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;
use tracing::warn;

use crate::dispatch::normalize;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Channel and application credentials
    #[serde(default)]
    pub twitch: Credentials,

    /// Reward display name -> logical action identifier
    #[serde(default = "default_rewards")]
    pub rewards: BTreeMap<String, String>,

    /// How bound actions are performed
    #[serde(default)]
    pub key_behavior: KeyBehavior,

    /// Sound played on every accepted redemption
    #[serde(default)]
    pub sound: SoundConfig,

    /// Event dispatch tuning
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Which window receives input before an action is injected
    #[serde(default)]
    pub focus: FocusConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Channel login name (lowercase)
    #[serde(default)]
    pub channel_name: String,

    /// Application client id from the developer console
    #[serde(default)]
    pub client_id: String,

    /// User access token; cleared when the remote rejects it
    #[serde(default)]
    pub oauth_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBehavior {
    /// How long hold actions keep the key down
    #[serde(default = "default_hold_duration")]
    pub hold_duration_seconds: f64,

    /// Identifiers performed as press, wait, release
    #[serde(default = "default_hold_keys")]
    pub hold_keys: Vec<String>,

    /// Identifiers performed as a momentary press or click
    #[serde(default = "default_single_press_keys")]
    pub single_press_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sound_file")]
    pub sound_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Minimum spacing between two triggers of the same reward
    #[serde(default = "default_rate_limit")]
    pub rate_limit_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusConfig {
    /// Window title (or part of one) to bring forward; empty disables it
    #[serde(default)]
    pub manual_focus_title: String,

    /// Track windows of known game processes when no manual title is set
    #[serde(default = "default_true")]
    pub auto_focus_enabled: bool,

    /// Process names that mark a running game
    #[serde(default = "default_known_game_processes")]
    pub known_game_processes: Vec<String>,
}

/// How an action identifier is performed according to the behavior profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Hold,
    SinglePress,
    Undefined,
}

// Default value functions
fn default_rewards() -> BTreeMap<String, String> {
    BTreeMap::from([("Example Reward".to_string(), "space".to_string())])
}

fn default_hold_duration() -> f64 {
    1.0
}

fn default_hold_keys() -> Vec<String> {
    ["w", "a", "s", "d"].iter().map(|s| s.to_string()).collect()
}

fn default_single_press_keys() -> Vec<String> {
    ["e", "r", "f", "g", "q", "space", "lmb", "rmb"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_sound_file() -> PathBuf {
    PathBuf::from("sounds").join("alert.ogg")
}

fn default_known_game_processes() -> Vec<String> {
    ["RobloxPlayerBeta.exe", "cs2.exe", "dota2.exe"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_rate_limit() -> f64 {
    crate::dispatch::DEFAULT_MIN_INTERVAL.as_secs_f64()
}

impl Default for KeyBehavior {
    fn default() -> Self {
        Self {
            hold_duration_seconds: default_hold_duration(),
            hold_keys: default_hold_keys(),
            single_press_keys: default_single_press_keys(),
        }
    }
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sound_file: default_sound_file(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit_seconds: default_rate_limit(),
        }
    }
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            manual_focus_title: String::new(),
            auto_focus_enabled: true,
            known_game_processes: default_known_game_processes(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            twitch: Credentials::default(),
            rewards: default_rewards(),
            key_behavior: KeyBehavior::default(),
            sound: SoundConfig::default(),
            dispatch: DispatchConfig::default(),
            focus: FocusConfig::default(),
            config_path: None,
        }
    }
}

impl Credentials {
    /// All three values must be present before the bot can connect
    pub fn is_complete(&self) -> bool {
        !self.channel_name.trim().is_empty()
            && !self.client_id.trim().is_empty()
            && !self.oauth_token.trim().is_empty()
    }
}

impl KeyBehavior {
    /// Classify an (already aliased) action identifier.
    ///
    /// An identifier listed in both sets is treated as a hold.
    pub fn classify(&self, action: &str) -> ActionKind {
        let matches = |list: &[String]| list.iter().any(|k| k.trim().eq_ignore_ascii_case(action));
        if matches(&self.hold_keys) {
            ActionKind::Hold
        } else if matches(&self.single_press_keys) {
            ActionKind::SinglePress
        } else {
            ActionKind::Undefined
        }
    }

    /// Hold duration, or the default when the stored value is unusable
    pub fn hold_duration(&self) -> Duration {
        positive_duration(self.hold_duration_seconds)
            .unwrap_or_else(|| Duration::from_secs_f64(default_hold_duration()))
    }
}

impl DispatchConfig {
    pub fn min_interval(&self) -> Duration {
        let secs = self.rate_limit_seconds;
        if secs == 0.0 {
            return Duration::ZERO;
        }
        positive_duration(secs).unwrap_or(crate::dispatch::DEFAULT_MIN_INTERVAL)
    }
}

impl FocusConfig {
    /// Add a process to the detection list. Returns false if it was
    /// already there (compared case-insensitively).
    pub fn add_known_process(&mut self, name: &str) -> bool {
        let name = name.trim();
        if self
            .known_game_processes
            .iter()
            .any(|known| known.eq_ignore_ascii_case(name))
        {
            return false;
        }
        self.known_game_processes.push(name.to_string());
        self.known_game_processes.sort();
        true
    }

    fn tidy(&mut self) {
        self.manual_focus_title = self.manual_focus_title.trim().to_string();
        self.known_game_processes.retain(|name| !name.trim().is_empty());
        self.known_game_processes.sort();
        self.known_game_processes.dedup();
    }
}

/// `secs` as a duration if it is positive and fits in a [`Duration`]
pub fn positive_duration(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

impl Config {
    /// Load configuration from the default location or create a default one
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_config_path()?)
    }

    /// Load configuration from an explicit path.
    ///
    /// A missing file is created with defaults. A file that cannot be read or
    /// parsed degrades to defaults with a warning; it is only replaced on the
    /// next save.
    pub fn load_from(config_path: PathBuf) -> Result<Self> {
        if !config_path.exists() {
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            return Ok(config);
        }

        let parsed = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))
            .and_then(|contents| {
                toml::from_str::<Config>(&contents)
                    .with_context(|| format!("Failed to parse config file: {:?}", config_path))
            });

        let mut config = match parsed {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}. Falling back to default settings.", e);
                Config::default()
            }
        };
        config.config_path = Some(config_path);
        config.focus.tidy();
        config.warn_on_unusable_timings();
        config.warn_on_undefined_bindings();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = match &self.config_path {
            Some(path) => path.clone(),
            None => Self::default_config_path()?,
        };

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Get default config path
    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "reward-keys", "bot")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Check if the setup prompt needs to be run
    pub fn needs_setup(&self) -> bool {
        !self.twitch.is_complete()
    }

    /// Bind a reward to an action, replacing any binding whose name only
    /// differs in case or surrounding whitespace
    pub fn bind_reward(&mut self, name: &str, action: &str) {
        let key = normalize(name);
        self.rewards.retain(|existing, _| normalize(existing) != key);
        self.rewards.insert(name.trim().to_string(), action.trim().to_string());
    }

    /// Remove a reward binding. Returns the stored name when one was removed.
    pub fn unbind_reward(&mut self, name: &str) -> Option<String> {
        let key = normalize(name);
        let found = self.rewards.keys().find(|existing| normalize(existing) == key).cloned()?;
        self.rewards.remove(&found);
        Some(found)
    }

    /// Forget the access token after the remote rejected it
    pub fn invalidate_token(&mut self) {
        self.twitch.oauth_token.clear();
    }

    /// Copy with credentials masked, for display
    pub fn redacted(&self) -> Config {
        let mut display = self.clone();
        display.twitch.oauth_token = mask(&display.twitch.oauth_token);
        display.twitch.client_id = mask(&display.twitch.client_id);
        display
    }

    fn warn_on_unusable_timings(&self) {
        let hold = self.key_behavior.hold_duration_seconds;
        if positive_duration(hold).is_none() {
            warn!(
                "hold_duration_seconds = {} is out of range; using {}s",
                hold,
                self.key_behavior.hold_duration().as_secs_f64()
            );
        }
        let rate = self.dispatch.rate_limit_seconds;
        if rate != 0.0 && positive_duration(rate).is_none() {
            warn!(
                "rate_limit_seconds = {} is out of range; using {}s",
                rate,
                self.dispatch.min_interval().as_secs_f64()
            );
        }
    }

    fn warn_on_undefined_bindings(&self) {
        for (reward, action) in &self.rewards {
            let action = crate::input::canonical_name(action);
            if self.key_behavior.classify(&action) == ActionKind::Undefined {
                warn!(
                    "Reward '{}' is bound to '{}', which is neither a hold nor a single-press key",
                    reward, action
                );
            }
        }
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{}", tail)
}

/// Configuration shared between the console and the dispatch path.
///
/// Guards are never held across an await point.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Config> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a mutation and persist the result
    pub fn update<R>(&self, f: impl FnOnce(&mut Config) -> R) -> Result<R> {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = f(&mut guard);
        guard.save()?;
        Ok(result)
    }
}
