//! Configuration management module

use crate::error::{ResolverError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default size of the upload worker pool and of the HTTP connection pool
pub const DEFAULT_MAX_CONCURRENT: usize = 32;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Explicit credentials for one registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl AuthConfig {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Parse `REGISTRY=USER:PASSWORD`
    pub fn parse_registry_auth(entry: &str) -> Result<(String, AuthConfig)> {
        let (registry, credentials) = entry.split_once('=').ok_or_else(|| {
            ResolverError::Argument(format!(
                "Registry auth '{}' must look like REGISTRY=USER:PASSWORD",
                registry_only(entry)
            ))
        })?;
        let (username, password) = credentials.split_once(':').ok_or_else(|| {
            ResolverError::Argument(format!(
                "Registry auth for '{}' must look like REGISTRY=USER:PASSWORD",
                registry
            ))
        })?;

        let auth = AuthConfig::new(username.to_string(), password.to_string());
        auth.validate()?;
        Ok((registry.trim().to_string(), auth))
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(ResolverError::Validation(
                "Username cannot be empty".to_string(),
            ));
        }
        if self.password.is_empty() {
            return Err(ResolverError::Validation(
                "Password cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// Never echo a password back in an error message
fn registry_only(entry: &str) -> &str {
    entry.split(['=', ':']).next().unwrap_or_default()
}

/// Which name a published image's digest is registered under for substitution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OverrideKey {
    /// The `name` exactly as given in the image spec
    #[default]
    Original,
    /// The stamped, chrooted name the image was pushed to
    Published,
}

/// Runtime configuration for one resolver invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub max_concurrent: usize,
    pub timeout: u64,
    pub skip_tls: bool,
    pub verbose: bool,
    pub quiet: bool,
    pub allow_unused_images: bool,
    pub no_push: bool,
    pub override_key: OverrideKey,
    pub image_chroot: Option<String>,
    #[serde(skip)]
    pub registry_auth: HashMap<String, AuthConfig>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout: DEFAULT_TIMEOUT_SECS,
            skip_tls: false,
            verbose: false,
            quiet: false,
            allow_unused_images: false,
            no_push: false,
            override_key: OverrideKey::Original,
            image_chroot: None,
            registry_auth: HashMap::new(),
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(ResolverError::Validation(
                "max_concurrent must be greater than 0".to_string(),
            ));
        }
        if self.timeout == 0 {
            return Err(ResolverError::Validation(
                "timeout must be greater than 0".to_string(),
            ));
        }
        if self.timeout > 86400 {
            return Err(ResolverError::Validation(
                "timeout cannot exceed 24 hours (86400 seconds)".to_string(),
            ));
        }
        if let Some(chroot) = &self.image_chroot {
            if chroot.trim_matches('/').is_empty() {
                return Err(ResolverError::Validation(
                    "image chroot cannot be empty".to_string(),
                ));
            }
        }
        for auth in self.registry_auth.values() {
            auth.validate()?;
        }
        Ok(())
    }

    /// Create config from environment variables and defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RESOLVER_MAX_CONCURRENT") {
            if let Ok(max_concurrent) = val.parse() {
                config.max_concurrent = max_concurrent;
            }
        }
        if let Ok(val) = std::env::var("RESOLVER_TIMEOUT") {
            if let Ok(timeout) = val.parse() {
                config.timeout = timeout;
            }
        }
        if let Ok(val) = std::env::var("RESOLVER_VERBOSE") {
            config.verbose = is_truthy(&val);
        }
        if let Ok(val) = std::env::var("RESOLVER_SKIP_TLS") {
            config.skip_tls = is_truthy(&val);
        }

        config
    }
}

fn is_truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
