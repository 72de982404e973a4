use anyhow::{anyhow, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable holding the GitHub username
pub const USERNAME_ENV: &str = "GITHUB_USERNAME";

/// Environment variable holding the GitHub access token
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Main configuration structure for forkupdate
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// GitHub endpoint and discovery settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Fork synchronization settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// REST API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Host used to build git remote URLs
    #[serde(default = "default_host")]
    pub host: String,

    /// Fallback username when neither the environment nor the flag provide one
    pub username: Option<String>,

    /// Repository exclusion patterns
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Git executable to invoke
    #[serde(default = "default_git_binary")]
    pub git_binary: String,

    /// Root for per-fork working copies (OS temp dir if unset)
    pub work_dir: Option<String>,

    /// Depth passed to `git clone --depth`
    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_host() -> String {
    "github.com".to_string()
}
fn default_git_binary() -> String {
    "git".to_string()
}
fn default_clone_depth() -> u32 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            host: default_host(),
            username: None,
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            git_binary: default_git_binary(),
            work_dir: None,
            clone_depth: default_clone_depth(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!("No configuration at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        // Expand environment variables in paths
        config.expand_paths()?;

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("forkupdate").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        if let Some(work_dir) = &self.sync.work_dir {
            self.sync.work_dir = Some(
                shellexpand::full(work_dir)
                    .context("Failed to expand work_dir path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Directory under which working copies are created
    pub fn work_root(&self) -> PathBuf {
        match &self.sync.work_dir {
            Some(dir) => PathBuf::from(dir),
            None => std::env::temp_dir(),
        }
    }

    /// Check if repository name matches any exclusion pattern
    pub fn is_excluded(&self, name: &str) -> bool {
        self.github.exclude_patterns.iter().any(|pattern| {
            // Simple glob pattern matching
            if pattern.contains('*') {
                let pattern_regex = regex::escape(pattern).replace(r"\*", ".*");

                regex::Regex::new(&format!("^{}$", pattern_regex))
                    .map(|re| re.is_match(name))
                    .unwrap_or(false)
            } else {
                name == pattern
            }
        })
    }
}

/// GitHub username and access token
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    token: String,
}

impl Credentials {
    /// Resolve credentials from the process environment, CLI flags and config
    pub fn resolve(
        flag_username: Option<&str>,
        flag_token: Option<&str>,
        config: &Config,
    ) -> Result<Self> {
        Self::resolve_with(
            |key| std::env::var(key).ok(),
            flag_username,
            flag_token,
            config,
        )
    }

    /// Resolve credentials with an explicit environment lookup.
    ///
    /// The environment wins over the flags; the config file can only supply a
    /// username. Empty values count as absent.
    pub fn resolve_with<F>(
        lookup: F,
        flag_username: Option<&str>,
        flag_token: Option<&str>,
        config: &Config,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = first_non_empty([
            lookup(USERNAME_ENV),
            flag_username.map(str::to_string),
            config.github.username.clone(),
        ])
        .ok_or_else(|| anyhow!("no username"))?;

        let token = first_non_empty([lookup(TOKEN_ENV), flag_token.map(str::to_string)])
            .ok_or_else(|| anyhow!("no token"))?;

        Ok(Self { username, token })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

fn first_non_empty<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
