//! Credential lookup for registries
//!
//! Precedence: explicit per-registry credentials, then the `auths` section of
//! the Docker client's `config.json`, then anonymous access.

use crate::config::AuthConfig;
use crate::error::{ResolverError, Result};
use crate::reference::DEFAULT_REGISTRY;
use crate::registry::Credentials;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const DOCKER_HUB_ALIASES: &[&str] = &[
    DEFAULT_REGISTRY,
    "docker.io",
    "registry-1.docker.io",
    "index.docker.io/v1",
];

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuthEntry {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default)]
pub struct Keychain {
    explicit: HashMap<String, AuthConfig>,
    docker_auths: HashMap<String, DockerAuthEntry>,
}

impl Keychain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keychain backed by the Docker config of the current user, if any
    pub fn from_environment() -> Result<Self> {
        match default_docker_config_path() {
            Some(path) if path.is_file() => Self::new().with_docker_config(&path),
            _ => Ok(Self::new()),
        }
    }

    pub fn with_explicit(mut self, registry: &str, auth: AuthConfig) -> Self {
        self.explicit.insert(normalize_registry_key(registry), auth);
        self
    }

    pub fn with_docker_config(mut self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ResolverError::Auth(format!(
                "Failed to read docker config {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: DockerConfigFile = serde_json::from_str(&content).map_err(|e| {
            ResolverError::Auth(format!(
                "Malformed docker config {}: {}",
                path.display(),
                e
            ))
        })?;

        for (key, entry) in config.auths {
            self.docker_auths.insert(normalize_registry_key(&key), entry);
        }
        Ok(self)
    }

    pub fn resolve(&self, registry: &str) -> Result<Credentials> {
        let candidates = registry_candidates(registry);

        for key in &candidates {
            if let Some(auth) = self.explicit.get(key) {
                return Ok(Credentials::basic(&auth.username, &auth.password));
            }
        }

        for key in &candidates {
            if let Some(entry) = self.docker_auths.get(key) {
                if let Some(credentials) = decode_entry(registry, entry)? {
                    return Ok(credentials);
                }
            }
        }

        Ok(Credentials::Anonymous)
    }
}

fn decode_entry(registry: &str, entry: &DockerAuthEntry) -> Result<Option<Credentials>> {
    if let Some(encoded) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = STANDARD.decode(encoded.trim()).map_err(|e| {
            ResolverError::Auth(format!("Invalid auth entry for {}: {}", registry, e))
        })?;
        let decoded = String::from_utf8(decoded).map_err(|e| {
            ResolverError::Auth(format!("Invalid auth entry for {}: {}", registry, e))
        })?;
        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            ResolverError::Auth(format!(
                "Invalid auth entry for {}: expected user:password",
                registry
            ))
        })?;
        return Ok(Some(Credentials::basic(username, password)));
    }

    match (&entry.username, &entry.password) {
        (Some(username), Some(password)) => Ok(Some(Credentials::basic(username, password))),
        _ => Ok(None),
    }
}

fn registry_candidates(registry: &str) -> Vec<String> {
    let key = normalize_registry_key(registry);
    if DOCKER_HUB_ALIASES.contains(&key.as_str()) {
        DOCKER_HUB_ALIASES.iter().map(|s| s.to_string()).collect()
    } else {
        vec![key]
    }
}

/// `https://index.docker.io/v1/` -> `index.docker.io/v1`, `https://gcr.io` -> `gcr.io`
fn normalize_registry_key(key: &str) -> String {
    let key = key
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');

    if key.starts_with("index.docker.io/v1") {
        return "index.docker.io/v1".to_string();
    }
    key.split('/').next().unwrap_or(key).to_lowercase()
}

fn default_docker_config_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        return Some(PathBuf::from(dir).join("config.json"));
    }
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .map(|home| PathBuf::from(home).join(".docker").join("config.json"))
}
