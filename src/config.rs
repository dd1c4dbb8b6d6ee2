use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const MAX_WINDOW_SECS: u64 = 86_400;

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerConfig,
    api: ApiConfig,
    authz: AuthzConfig,
    storage: StorageConfig,
    #[serde(default)]
    limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerConfig {
    bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiConfig {
    provider: String,
    key: String,
    url: String,
    model: String,
    #[serde(default = "default_max_tokens")]
    max_tokens: u64,
}

fn default_max_tokens() -> u64 {
    1024
}

#[derive(Debug, Clone, Deserialize)]
struct AuthzConfig {
    provider: String,
    pdp_url: Option<String>,
    api_key: Option<String>,
    #[serde(default = "default_resource")]
    resource: String,
    #[serde(default)]
    grants: HashMap<String, Vec<String>>,
}

fn default_resource() -> String {
    "prompt_requests".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct StorageConfig {
    data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct LimitsConfig {
    max_requests: usize,
    window_secs: u64,
    max_prompt_chars: usize,
    cleanup_interval: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_secs: 60,
            max_prompt_chars: 1000,
            cleanup_interval: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub api_provider: String,
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u64,
    pub authz_provider: String,
    pub pdp_url: Option<String>,
    pub pdp_api_key: Option<String>,
    pub authz_resource: String,
    pub authz_grants: HashMap<String, Vec<String>>,
    pub data_dir: PathBuf,
    pub max_requests: usize,
    pub window_secs: u64,
    pub max_prompt_chars: usize,
    pub cleanup_interval: u64,
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        let config_file: ConfigFile =
            toml::from_str(content).context("Failed to parse config file")?;

        if config_file.limits.max_requests == 0 {
            anyhow::bail!("limits.max_requests must be at least 1");
        }
        if !(1..=MAX_WINDOW_SECS).contains(&config_file.limits.window_secs) {
            anyhow::bail!(
                "limits.window_secs must be between 1 and {}",
                MAX_WINDOW_SECS
            );
        }

        Ok(Self {
            bind: config_file.server.bind,
            api_provider: config_file.api.provider,
            api_key: config_file.api.key,
            api_url: config_file.api.url,
            model: config_file.api.model,
            max_tokens: config_file.api.max_tokens,
            authz_provider: config_file.authz.provider,
            pdp_url: config_file.authz.pdp_url,
            pdp_api_key: config_file.authz.api_key,
            authz_resource: config_file.authz.resource,
            authz_grants: config_file.authz.grants,
            data_dir: config_file.storage.data_dir.into(),
            max_requests: config_file.limits.max_requests,
            window_secs: config_file.limits.window_secs,
            max_prompt_chars: config_file.limits.max_prompt_chars,
            cleanup_interval: config_file.limits.cleanup_interval,
        })
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::parse(&content)
    }

    pub fn load() -> Result<Self> {
        let path =
            std::env::var("SENTINEL_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [api]
        provider = "openai"
        key = "sk-test"
        url = "https://api.openai.com/v1"
        model = "gpt-4-turbo"

        [authz]
        provider = "permit"
        pdp_url = "http://localhost:7766"
        api_key = "permit_key"

        [storage]
        data_dir = "./data"
    "#;

    #[test]
    fn defaults_fill_optional_sections() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.max_requests, 5);
        assert_eq!(config.window_secs, 60);
        assert_eq!(config.max_prompt_chars, 1000);
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.authz_resource, "prompt_requests");
        assert!(config.authz_grants.is_empty());
        assert_eq!(config.data_dir, PathBuf::from("./data"));
    }

    #[test]
    fn static_grants_and_limits_are_read() {
        let content = r#"
            [server]
            bind = "127.0.0.1:9000"

            [api]
            provider = "anthropic"
            key = "k"
            url = "https://api.anthropic.com"
            model = "claude"
            max_tokens = 512

            [authz]
            provider = "static"

            [authz.grants]
            create = ["*"]
            approve = ["mom", "dad"]

            [storage]
            data_dir = "/var/lib/sentinel"

            [limits]
            max_requests = 3
            window_secs = 30
        "#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.authz_provider, "static");
        assert_eq!(config.authz_grants["approve"], vec!["mom", "dad"]);
        assert_eq!(config.max_requests, 3);
        assert_eq!(config.window_secs, 30);
        assert_eq!(config.max_prompt_chars, 1000);
        assert_eq!(config.max_tokens, 512);
    }

    #[test]
    fn zero_request_ceiling_is_rejected() {
        let content = format!("{}\n[limits]\nmax_requests = 0\n", MINIMAL);
        assert!(Config::parse(&content).is_err());
    }

    #[test]
    fn window_must_be_positive_and_bounded() {
        for window in ["0", "86401", "9223372036854775808"] {
            let content = format!("{}\n[limits]\nwindow_secs = {}\n", MINIMAL, window);
            assert!(Config::parse(&content).is_err(), "window_secs = {}", window);
        }
        let content = format!("{}\n[limits]\nwindow_secs = 86400\n", MINIMAL);
        assert_eq!(Config::parse(&content).unwrap().window_secs, 86_400);
    }

    #[test]
    fn missing_required_section_fails() {
        assert!(Config::parse("[api]\nprovider = \"openai\"\n").is_err());
    }
}
