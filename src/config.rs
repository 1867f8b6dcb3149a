//! Configuration for tilawa.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TILAWA_HOME, AUPHONIC_API_KEY, ...)
//! 2. Config file (.tilawa/config.yaml)
//! 3. Defaults (~/.tilawa)
//!
//! Config file discovery:
//! - Searches current directory and parents for .tilawa/config.yaml
//! - `paths.home` is relative to the .tilawa/ directory, other paths to
//!   the project root containing it

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::auphonic::DEFAULT_API_URL;
use crate::cache::CACHE_DIR_NAME;
use crate::core::orchestrator::WorkflowSettings;
use crate::core::validation::IngestLimits;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_BIND: &str = "127.0.0.1:9000";
const DEFAULT_BUCKET: &str = "recitations";
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub provider: Option<ProviderConfig>,
    #[serde(default)]
    pub workflow: Option<WorkflowSettings>,
    #[serde(default)]
    pub ingest: Option<IngestLimits>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .tilawa/)
    pub home: Option<String>,
    /// Object storage root (relative to project root)
    pub storage: Option<String>,
    /// Offline cache directory (relative to project root)
    pub cache: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub public_url: Option<String>,
    pub bucket: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub webhook_url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    pub max_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Bearer token -> user id
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state (job logs)
    pub home: PathBuf,
    /// Object storage root
    pub storage_dir: PathBuf,
    /// Offline cache directory
    pub cache_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    pub workflow: WorkflowSettings,
    pub ingest: IngestLimits,
    pub cache_max_size_bytes: Option<u64>,
    /// Bearer token -> user id
    pub api_tokens: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub bind: String,
    /// Base URL clients and the provider use to reach this server
    pub public_url: String,
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub api_url: String,
    /// Absent disables enhancement
    pub api_key: Option<String>,
    pub webhook_url: String,
    pub timeout_secs: u64,
}

impl ResolvedConfig {
    /// Directory holding one subdirectory per job
    pub fn jobs_dir(&self) -> PathBuf {
        self.home.join("jobs")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".tilawa").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Parse `token=user,token=user`
fn parse_tokens(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (token, user) = pair.split_once('=')?;
            let (token, user) = (token.trim(), user.trim());
            (!token.is_empty() && !user.is_empty()).then(|| (token.to_string(), user.to_string()))
        })
        .collect()
}

/// Merge a config file and environment over defaults
fn resolve(
    default_home: PathBuf,
    file: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let (config_file, config) = match file {
        Some((path, config)) => (Some(path), Some(config)),
        None => (None, None),
    };

    let tilawa_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);
    let base_dir = tilawa_dir
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);

    let paths = config.as_ref().map(|c| c.paths.clone()).unwrap_or_default();

    let home = match (env("TILAWA_HOME"), &paths.home, &tilawa_dir) {
        (Some(h), _, _) => PathBuf::from(h),
        (None, Some(h), Some(dir)) => resolve_path(dir, h),
        _ => default_home,
    };

    let relative = |p: &String| match &base_dir {
        Some(base) => resolve_path(base, p),
        None => PathBuf::from(p),
    };
    let storage_dir = paths
        .storage
        .as_ref()
        .map(relative)
        .unwrap_or_else(|| home.join("storage"));
    let cache_dir = paths
        .cache
        .as_ref()
        .map(relative)
        .unwrap_or_else(|| home.join(CACHE_DIR_NAME));

    let server_cfg = config
        .as_ref()
        .and_then(|c| c.server.clone())
        .unwrap_or_default();
    let public_url = env("TILAWA_PUBLIC_URL")
        .or(server_cfg.public_url)
        .unwrap_or_else(|| format!("http://{}", DEFAULT_BIND));
    let public_url = public_url.trim_end_matches('/').to_string();
    let server = ServerSettings {
        bind: env("TILAWA_BIND")
            .or(server_cfg.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string()),
        bucket: server_cfg
            .bucket
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
        public_url: public_url.clone(),
    };

    let provider_cfg = config
        .as_ref()
        .and_then(|c| c.provider.clone())
        .unwrap_or_default();
    let provider = ProviderSettings {
        api_url: env("AUPHONIC_API_URL")
            .or(provider_cfg.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        api_key: env("AUPHONIC_API_KEY")
            .or(provider_cfg.api_key)
            .filter(|k| !k.is_empty()),
        webhook_url: env("WEBHOOK_URL")
            .or(provider_cfg.webhook_url)
            .unwrap_or_else(|| format!("{}/api/auphonic/webhook", public_url)),
        timeout_secs: provider_cfg
            .timeout_seconds
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
    };

    let mut api_tokens = config
        .as_ref()
        .and_then(|c| c.auth.clone())
        .map(|a| a.tokens)
        .unwrap_or_default();
    if let Some(raw) = env("TILAWA_API_TOKENS") {
        api_tokens.extend(parse_tokens(&raw));
    }

    ResolvedConfig {
        home,
        storage_dir,
        cache_dir,
        config_file,
        server,
        provider,
        workflow: config
            .as_ref()
            .and_then(|c| c.workflow.clone())
            .unwrap_or_default(),
        ingest: config
            .as_ref()
            .and_then(|c| c.ingest.clone())
            .unwrap_or_default(),
        cache_max_size_bytes: config
            .as_ref()
            .and_then(|c| c.cache.as_ref())
            .and_then(|c| c.max_size_bytes),
        api_tokens,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".tilawa");

    let file = match find_config_file() {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    Ok(resolve(default_home, file, |key| std::env::var(key).ok()))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(PathBuf::from("/home/u/.tilawa"), None, no_env);

        assert_eq!(config.home, PathBuf::from("/home/u/.tilawa"));
        assert_eq!(config.jobs_dir(), PathBuf::from("/home/u/.tilawa/jobs"));
        assert_eq!(config.cache_dir, PathBuf::from("/home/u/.tilawa/audio_cache"));
        assert_eq!(config.server.bucket, "recitations");
        assert_eq!(
            config.provider.webhook_url,
            "http://127.0.0.1:9000/api/auphonic/webhook"
        );
        assert!(config.provider.api_key.is_none());
        assert_eq!(config.workflow.wait_window_secs, 300);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let tilawa_dir = temp.path().join(".tilawa");
        std::fs::create_dir_all(&tilawa_dir).unwrap();

        let config_path = tilawa_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
  storage: ./objects
server:
  public_url: https://tilawa.example.com/
provider:
  api_key: from-file
workflow:
  wait_window_secs: 120
  download_retry:
    max_attempts: 5
ingest:
  max_duration_seconds: 600
cache:
  max_size_bytes: 1048576
auth:
  tokens:
    abc: user-1
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version, "1.0");

        let config = resolve(
            PathBuf::from("/unused"),
            Some((config_path.clone(), parsed)),
            no_env,
        );

        assert_eq!(config.server.public_url, "https://tilawa.example.com");
        assert_eq!(
            config.provider.webhook_url,
            "https://tilawa.example.com/api/auphonic/webhook"
        );
        assert_eq!(config.provider.api_key.as_deref(), Some("from-file"));
        assert_eq!(config.workflow.wait_window_secs, 120);
        assert_eq!(config.workflow.download_retry.max_attempts, 5);
        assert_eq!(config.ingest.max_duration_seconds, 600.0);
        assert_eq!(config.ingest.max_file_bytes, 50 * 1024 * 1024);
        assert_eq!(config.cache_max_size_bytes, Some(1_048_576));
        assert_eq!(config.api_tokens.get("abc").map(String::as_str), Some("user-1"));
        assert!(config.storage_dir.ends_with("objects"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            version: "1.0".to_string(),
            paths: PathsConfig::default(),
            server: None,
            provider: Some(ProviderConfig {
                api_key: Some("from-file".to_string()),
                ..Default::default()
            }),
            workflow: None,
            ingest: None,
            cache: None,
            auth: None,
        };

        let env = |key: &str| match key {
            "TILAWA_HOME" => Some("/srv/tilawa".to_string()),
            "AUPHONIC_API_KEY" => Some("from-env".to_string()),
            "TILAWA_API_TOKENS" => Some("t1=alice, t2=bob,broken".to_string()),
            _ => None,
        };

        let config = resolve(
            PathBuf::from("/unused"),
            Some((PathBuf::from("/proj/.tilawa/config.yaml"), file)),
            env,
        );

        assert_eq!(config.home, PathBuf::from("/srv/tilawa"));
        assert_eq!(config.provider.api_key.as_deref(), Some("from-env"));
        assert_eq!(config.api_tokens.len(), 2);
        assert_eq!(config.api_tokens["t2"], "bob");
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/./subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
