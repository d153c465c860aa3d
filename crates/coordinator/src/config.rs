//! Coordinator configuration: which tab URLs may receive the clock engine.
//!
//! Loaded from YAML (path in `FAUXTIME_COORDINATOR_CONFIG`) and compiled once
//! into a [`UrlPolicy`]. Host patterns are globs where `*` matches any run of
//! characters, matched case-insensitively against the URL host.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "FAUXTIME_COORDINATOR_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("malformed YAML in config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid host pattern '{pattern}': {source}")]
    Pattern { pattern: String, source: regex::Error },
    #[error("{0}")]
    Invalid(String),
}

/// Raw, serializable coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub allowed_hosts: Vec<String>,
    pub restricted_schemes: Vec<String>,
    pub restricted_hosts: Vec<String>,
    pub bridge_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        let schemes = [
            "chrome",
            "chrome-extension",
            "edge",
            "about",
            "data",
            "file",
            "view-source",
            "moz-extension",
            "devtools",
            "javascript",
            "blob",
        ];
        let hosts = [
            "chrome.google.com",
            "chromewebstore.google.com",
            "addons.mozilla.org",
            "microsoftedge.microsoft.com",
        ];
        Self {
            allowed_hosts: vec!["*".to_string()],
            restricted_schemes: schemes.iter().map(|s| (*s).to_string()).collect(),
            restricted_hosts: hosts.iter().map(|s| (*s).to_string()).collect(),
            bridge_timeout_ms: 5000,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let f = File::open(&path).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Ok(serde_yaml::from_reader(BufReader::new(f))?)
    }

    /// Load from `FAUXTIME_COORDINATOR_CONFIG` if set. A broken file is logged
    /// and replaced by defaults so the coordinator still starts.
    pub fn from_env() -> Self {
        let Ok(path) = std::env::var(CONFIG_ENV) else {
            return Self::default();
        };
        Self::from_yaml_path(&path).unwrap_or_else(|e| {
            warn!(path = %path, error = %e, "coordinator config unusable; using defaults");
            Self::default()
        })
    }

    /// Validate and compile the patterns.
    pub fn compile(&self) -> Result<UrlPolicy, ConfigError> {
        if self.bridge_timeout_ms == 0 {
            return Err(ConfigError::Invalid("bridge_timeout_ms must be positive".into()));
        }
        let mut schemes = HashSet::new();
        for (i, s) in self.restricted_schemes.iter().enumerate() {
            let s = s.trim().trim_end_matches(':').to_ascii_lowercase();
            if s.is_empty() {
                return Err(ConfigError::Invalid(format!("restricted_schemes[{i}] must be non-empty")));
            }
            schemes.insert(s);
        }
        Ok(UrlPolicy {
            allowed: compile_globs(&self.allowed_hosts)?,
            restricted_schemes: schemes,
            restricted_hosts: compile_globs(&self.restricted_hosts)?,
            bridge_timeout: Duration::from_millis(self.bridge_timeout_ms),
        })
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns.iter().map(|p| glob_to_regex(p)).collect()
}

fn glob_to_regex(pattern: &str) -> Result<Regex, ConfigError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid("host pattern must be non-empty".into()));
    }
    let body = trimmed.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
    Regex::new(&format!("(?i)^{body}$"))
        .map_err(|source| ConfigError::Pattern { pattern: trimmed.to_string(), source })
}

/// Why a URL will not receive the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restriction {
    Scheme(String),
    Host(String),
    NotAllowed(String),
    Unparseable,
}

impl std::fmt::Display for Restriction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheme(s) => write!(f, "restricted scheme '{s}'"),
            Self::Host(h) => write!(f, "restricted host '{h}'"),
            Self::NotAllowed(h) => write!(f, "host '{h}' not in allowed_hosts"),
            Self::Unparseable => f.write_str("unparseable url"),
        }
    }
}

/// Compiled form of [`CoordinatorConfig`].
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    allowed: Vec<Regex>,
    restricted_schemes: HashSet<String>,
    restricted_hosts: Vec<Regex>,
    bridge_timeout: Duration,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        // The default config only contains valid patterns.
        CoordinatorConfig::default().compile().unwrap_or_else(|_| Self {
            allowed: Vec::new(),
            restricted_schemes: HashSet::new(),
            restricted_hosts: Vec::new(),
            bridge_timeout: Duration::from_millis(5000),
        })
    }
}

impl UrlPolicy {
    pub fn bridge_timeout(&self) -> Duration {
        self.bridge_timeout
    }

    /// `None` when `url` may be injected into.
    pub fn restriction(&self, url: &str) -> Option<Restriction> {
        let Some((scheme, host)) = split_url(url) else {
            return Some(Restriction::Unparseable);
        };
        if self.restricted_schemes.contains(&scheme) {
            return Some(Restriction::Scheme(scheme));
        }
        if host.is_empty() {
            return Some(Restriction::Unparseable);
        }
        if self.restricted_hosts.iter().any(|r| r.is_match(&host)) {
            return Some(Restriction::Host(host));
        }
        if !self.allowed.iter().any(|r| r.is_match(&host)) {
            return Some(Restriction::NotAllowed(host));
        }
        None
    }
}

/// Lowercased scheme and bare host (no userinfo, no port).
fn split_url(url: &str) -> Option<(String, String)> {
    let (scheme, rest) = url.trim().split_once(':')?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
        return None;
    }
    let scheme = scheme.to_ascii_lowercase();
    let Some(rest) = rest.strip_prefix("//") else {
        return Some((scheme, String::new()));
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = if host_port.starts_with('[') {
        host_port.split_once(']').map_or(host_port, |(h, _)| h).trim_start_matches('[')
    } else {
        host_port.split(':').next().unwrap_or_default()
    };
    Some((scheme, host.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> UrlPolicy {
        CoordinatorConfig::default().compile().unwrap()
    }

    #[test]
    fn ordinary_pages_are_allowed() {
        let p = policy();
        assert_eq!(p.restriction("https://example.com/a?b#c"), None);
        assert_eq!(p.restriction("http://user:pw@Example.COM:8080/"), None);
        assert_eq!(p.restriction("http://[::1]:3000/"), None);
    }

    #[test]
    fn privileged_schemes_and_stores_are_restricted() {
        let p = policy();
        assert_eq!(p.restriction("chrome://settings"), Some(Restriction::Scheme("chrome".into())));
        assert_eq!(p.restriction("about:blank"), Some(Restriction::Scheme("about".into())));
        assert_eq!(
            p.restriction("https://chromewebstore.google.com/detail/x"),
            Some(Restriction::Host("chromewebstore.google.com".into()))
        );
        assert_eq!(p.restriction("not a url"), Some(Restriction::Unparseable));
    }

    #[test]
    fn allowed_hosts_glob_limits_injection() {
        let cfg = CoordinatorConfig::from_yaml_str(
            "allowed_hosts: ['*.example.com', 'localhost']\nbridge_timeout_ms: 250\n",
        )
        .unwrap();
        let p = cfg.compile().unwrap();
        assert_eq!(p.restriction("https://app.example.com/"), None);
        assert_eq!(p.restriction("http://localhost:8080/"), None);
        assert_eq!(
            p.restriction("https://example.org/"),
            Some(Restriction::NotAllowed("example.org".into()))
        );
        assert_eq!(p.bridge_timeout(), Duration::from_millis(250));
        // Unlisted keys keep their defaults.
        assert!(cfg.restricted_schemes.iter().any(|s| s == "chrome"));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let cfg = CoordinatorConfig { bridge_timeout_ms: 0, ..CoordinatorConfig::default() };
        assert!(matches!(cfg.compile(), Err(ConfigError::Invalid(_))));
        let cfg = CoordinatorConfig { allowed_hosts: vec![" ".into()], ..CoordinatorConfig::default() };
        assert!(matches!(cfg.compile(), Err(ConfigError::Invalid(_))));
        assert!(CoordinatorConfig::from_yaml_str("allowed_hosts: 3").is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.yaml");
        std::fs::write(&path, "restricted_hosts: ['*.internal']\n").unwrap();
        let p = CoordinatorConfig::from_yaml_path(&path).unwrap().compile().unwrap();
        assert!(matches!(p.restriction("https://db.internal/"), Some(Restriction::Host(_))));
        assert!(CoordinatorConfig::from_yaml_path(dir.path().join("missing.yaml")).is_err());
    }
}
