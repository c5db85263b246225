//! Configuration management for termux-agent.
//!
//! The CLI agent reads a JSON config file. Resolution order for its path:
//! `--config` flag, then `TERMUX_AGENT_CONFIG`, then
//! `<config dir>/termux-agent/config.json`.
//!
//! The proxy is configured via environment variables:
//! - `PROXY_HOST` - Optional. Bind host. Defaults to `0.0.0.0`.
//! - `PROXY_PORT` - Optional. Bind port. Defaults to `8000`.
//! - `PROXY_UPSTREAM_BASE` - Optional. Upstream OpenAI-compatible base URL.
//! - `PROXY_HEADERS_FILE` - Optional. JSON object replacing the upstream header bundle.
//! - `PROXY_UPSTREAM_TIMEOUT_SECS` - Optional. Timeout for non-streaming upstream calls. Defaults to `300`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No default model configured: set \"default_model\" to one of {0}")]
    MissingBackend(String),

    #[error("Unknown model '{0}': expected one of {1}")]
    UnknownBackend(String, String),

    #[error("Missing API key for provider '{0}' (set providers.{0}.api_key or {1})")]
    MissingApiKey(String, String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Could not determine the user config directory; pass --config explicitly")]
    NoConfigDir,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backends
// ─────────────────────────────────────────────────────────────────────────────

/// Provider endpoints a backend can be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Local OpenAI-compatible endpoint (usually the bundled `chat-proxy`).
    Local,
    /// Together AI hosted inference.
    Together,
}

impl Provider {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Together => "together",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Local => "http://127.0.0.1:61252/v1",
            Self::Together => "https://api.together.xyz/v1",
        }
    }

    /// Environment variable consulted when the config file has no key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Local => "LOCAL_API_KEY",
            Self::Together => "TOGETHER_API_KEY",
        }
    }

    /// Key used when neither the file nor the environment provides one.
    fn fallback_api_key(&self) -> Option<&'static str> {
        match self {
            // The local proxy does not check credentials.
            Self::Local => Some("sk-"),
            Self::Together => None,
        }
    }
}

/// The fixed set of named model backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Qwen,
    Gpt,
    Gemini,
    DeepSeek,
    Kimi,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Backend::Qwen,
        Backend::Gpt,
        Backend::Gemini,
        Backend::DeepSeek,
        Backend::Kimi,
    ];

    /// Name used for `default_model` in the config file.
    pub fn config_key(&self) -> &'static str {
        match self {
            Self::Qwen => "qwen",
            Self::Gpt => "gpt",
            Self::Gemini => "gemini-2.5-pro",
            Self::DeepSeek => "deepseek-v3",
            Self::Kimi => "kimi-k2",
        }
    }

    /// Model identifier sent to the provider.
    pub fn model_id(&self) -> &'static str {
        match self {
            Self::Qwen => "Qwen/Qwen3-235B-A22B-fp8-tput",
            Self::Gpt => "gpt-5",
            Self::Gemini => "google/gemini-2.5-pro-preview-05-06",
            Self::DeepSeek => "deepseek-ai/DeepSeek-V3",
            Self::Kimi => "moonshotai/Kimi-K2-Instruct",
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            Self::DeepSeek | Self::Kimi => Provider::Together,
            Self::Qwen | Self::Gpt | Self::Gemini => Provider::Local,
        }
    }

    fn known_keys() -> String {
        Self::ALL
            .iter()
            .map(|b| b.config_key())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|b| b.config_key() == needle)
            .ok_or_else(|| ConfigError::UnknownBackend(needle.to_string(), Self::known_keys()))
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.config_key())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config file
// ─────────────────────────────────────────────────────────────────────────────

/// Credentials/endpoint override for one provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Tool-related settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Script that turns a cloned repository into one text file.
    /// Downloaded on first use when missing.
    #[serde(default)]
    pub repo_converter: Option<PathBuf>,

    /// Timeout for batch shell commands.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Directory tools resolve relative paths against. Defaults to the
    /// process working directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            repo_converter: None,
            command_timeout_secs: default_command_timeout(),
            working_dir: None,
        }
    }
}

/// On-disk configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub default_model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_true")]
    pub streaming: bool,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u64,

    /// Timeout for a single model call; `0` disables it.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,

    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> usize {
    50
}

fn default_max_context_tokens() -> u64 {
    128_000
}

fn default_request_timeout() -> u64 {
    600
}

fn default_command_timeout() -> u64 {
    120
}

impl FileConfig {
    /// Load and parse the config file.
    ///
    /// # Errors
    ///
    /// A missing, unreadable or malformed file is a fatal configuration error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }
}

/// Resolve which config file to load.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(path) = std::env::var_os("TERMUX_AGENT_CONFIG").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("termux-agent").join("config.json"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Directory for state such as REPL history.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("termux-agent"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// ─────────────────────────────────────────────────────────────────────────────
// Session config
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one agent session needs. Built once at startup; never mutated
/// once the loop runs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub backend: Backend,
    pub model: String,
    pub api_key: String,
    pub base_url: String,
    pub temperature: f32,
    pub streaming: bool,
    /// REPL session (true) or one-shot query (false).
    pub interactive: bool,
    pub max_iterations: usize,
    pub max_context_tokens: u64,
    /// `None` means model calls may block indefinitely.
    pub request_timeout: Option<Duration>,
    pub working_dir: PathBuf,
    pub tools: ToolsConfig,
}

impl SessionConfig {
    /// Build a session config from the file plus an optional CLI backend flag.
    ///
    /// The flag wins over `default_model`; when neither names a backend the
    /// session cannot start.
    pub fn resolve(
        file: &FileConfig,
        flag: Option<Backend>,
        interactive: bool,
    ) -> Result<Self, ConfigError> {
        Self::resolve_with(file, flag, interactive, |k| std::env::var(k).ok())
    }

    fn resolve_with(
        file: &FileConfig,
        flag: Option<Backend>,
        interactive: bool,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let backend = match flag {
            Some(b) => b,
            None => match file.default_model.as_deref() {
                Some(name) => name.parse()?,
                None => return Err(ConfigError::MissingBackend(Backend::known_keys())),
            },
        };

        let provider = backend.provider();
        let entry = file.providers.get(provider.key()).cloned().unwrap_or_default();

        let base_url = entry
            .base_url
            .unwrap_or_else(|| provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();

        let api_key = entry
            .api_key
            .filter(|k| !k.is_empty())
            .or_else(|| env(provider.api_key_env()).filter(|k| !k.is_empty()))
            .or_else(|| provider.fallback_api_key().map(str::to_string))
            .ok_or_else(|| {
                ConfigError::MissingApiKey(
                    provider.key().to_string(),
                    provider.api_key_env().to_string(),
                )
            })?;

        if !(0.0..=2.0).contains(&file.temperature) {
            return Err(ConfigError::InvalidValue(
                "temperature".to_string(),
                format!("{} is outside 0.0..=2.0", file.temperature),
            ));
        }
        if file.max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "max_iterations".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let working_dir = file
            .tools
            .working_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        Ok(Self {
            backend,
            model: backend.model_id().to_string(),
            api_key,
            base_url,
            temperature: file.temperature,
            streaming: file.streaming,
            interactive,
            max_iterations: file.max_iterations,
            max_context_tokens: file.max_context_tokens,
            request_timeout: (file.request_timeout_secs > 0)
                .then(|| Duration::from_secs(file.request_timeout_secs)),
            working_dir,
            tools: file.tools.clone(),
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(backend: Backend, base_url: String, working_dir: PathBuf) -> Self {
        Self {
            backend,
            model: backend.model_id().to_string(),
            api_key: "sk-test".to_string(),
            base_url,
            temperature: default_temperature(),
            streaming: false,
            interactive: true,
            max_iterations: default_max_iterations(),
            max_context_tokens: default_max_context_tokens(),
            request_timeout: Some(Duration::from_secs(default_request_timeout())),
            working_dir,
            tools: ToolsConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Proxy config
// ─────────────────────────────────────────────────────────────────────────────

/// Upstream the proxy was originally built against.
pub const DEFAULT_UPSTREAM_BASE: &str = "https://gpt-chatbotru-chat1.ru/api/openai/v1";

/// Browser-emulation header bundle sent on every upstream request.
pub fn default_upstream_headers() -> Vec<(String, String)> {
    [
        ("accept", "text/event-stream"),
        ("accept-language", "fr,fr-FR;q=0.9,en;q=0.8,en-GB;q=0.7,en-US;q=0.6"),
        ("content-type", "application/json"),
        ("origin", "https://gpt-chatbotru-chat1.ru"),
        ("priority", "u=1, i"),
        ("referer", "https://gpt-chatbotru-chat1.ru/"),
        (
            "sec-ch-ua",
            "\"Not)A;Brand\";v=\"8\", \"Chromium\";v=\"138\", \"Microsoft Edge\";v=\"138\"",
        ),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
        ("sec-fetch-dest", "empty"),
        ("sec-fetch-mode", "cors"),
        ("sec-fetch-site", "same-origin"),
        ("sec-fetch-storage-access", "active"),
        (
            "user-agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36 Edg/138.0.0.0",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Streaming proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Base URL; `/chat/completions` and `/models` are appended.
    pub upstream_base: String,
    pub headers: Vec<(String, String)>,
    /// Timeout for non-streaming upstream calls. Streams have none.
    pub upstream_timeout: Duration,
}

impl ProxyConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = env("PROXY_HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = env("PROXY_PORT")
            .unwrap_or_else(|| "8000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PROXY_PORT".to_string(), format!("{}", e)))?;

        let upstream_base = env("PROXY_UPSTREAM_BASE")
            .unwrap_or_else(|| DEFAULT_UPSTREAM_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let upstream_timeout = env("PROXY_UPSTREAM_TIMEOUT_SECS")
            .unwrap_or_else(|| "300".to_string())
            .parse()
            .map(Duration::from_secs)
            .map_err(|e| {
                ConfigError::InvalidValue("PROXY_UPSTREAM_TIMEOUT_SECS".to_string(), format!("{}", e))
            })?;

        let headers = match env("PROXY_HEADERS_FILE") {
            Some(path) => load_headers_file(Path::new(&path))?,
            None => default_upstream_headers(),
        };

        Ok(Self {
            host,
            port,
            upstream_base,
            headers,
            upstream_timeout,
        })
    }

    /// Create a config targeting the given upstream (useful for testing).
    pub fn new(upstream_base: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            upstream_base: upstream_base.into().trim_end_matches('/').to_string(),
            headers: default_upstream_headers(),
            upstream_timeout: Duration::from_secs(300),
        }
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.upstream_base)
    }

    pub fn models_url(&self) -> String {
        format!("{}/models", self.upstream_base)
    }
}

fn load_headers_file(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let map: BTreeMap<String, String> =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(map.into_iter().collect())
}
