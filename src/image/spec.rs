//! Publish specifications
//!
//! An image spec describes one locally built image and the name to publish
//! it under: `name=gcr.io/foo/app:{TAG};tarball=app.tar` or
//! `name=...;config=config.json;digest=d1,d2;layer=l1.tar.gz,l2.tar.gz`.

use crate::digest::DigestUtils;
use crate::error::{ResolverError, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSpec {
    pub name: Option<String>,
    pub tarball: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub digests: Vec<String>,
    pub layers: Vec<PathBuf>,
}

impl ImageSpec {
    /// Parse a `key=value;key=value` spec. Syntax only, see [`validate`](Self::validate).
    pub fn parse(spec: &str) -> Result<Self> {
        let mut parsed = ImageSpec::default();

        for item in spec.split(';').filter(|item| !item.is_empty()) {
            let (key, value) = item.split_once('=').ok_or_else(|| {
                ResolverError::Argument(format!(
                    "Malformed image spec item '{}' in '{}'",
                    item, spec
                ))
            })?;

            match key {
                "name" => parsed.name = Some(value.to_string()),
                "tarball" => parsed.tarball = Some(PathBuf::from(value)),
                "config" => parsed.config = Some(PathBuf::from(value)),
                "digest" => parsed.digests = split_list(value).map(str::to_string).collect(),
                "layer" => parsed.layers = split_list(value).map(PathBuf::from).collect(),
                other => {
                    return Err(ResolverError::Argument(format!(
                        "Unknown image spec key '{}' in '{}'",
                        other, spec
                    )));
                }
            }
        }

        Ok(parsed)
    }

    /// The name exactly as given, for error messages
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    pub fn validate(&self) -> Result<&str> {
        let name = self
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ResolverError::Argument("Expected \"name\" in image spec".to_string()))?;

        let has_layers = !self.layers.is_empty() || !self.digests.is_empty();
        if has_layers && self.config.is_none() && self.tarball.is_none() {
            return Err(ResolverError::Argument(format!(
                "{}: Using \"layer\" or \"digest\" requires \"config\" to be specified",
                name
            )));
        }
        if self.config.is_none() && self.tarball.is_none() {
            return Err(ResolverError::Argument(format!(
                "{}: Either \"config\" or \"tarball\" must be specified",
                name
            )));
        }
        if self.digests.len() != self.layers.len() {
            return Err(ResolverError::Argument(format!(
                "{}: \"digest\" and \"layer\" must have matching lengths ({} vs {})",
                name,
                self.digests.len(),
                self.layers.len()
            )));
        }

        Ok(name)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|v| !v.is_empty())
}

/// A `digest` entry is either a literal digest or a file holding one
pub fn read_digest_arg(arg: &str) -> Result<String> {
    let path = Path::new(arg);
    let raw = if path.is_file() {
        std::fs::read_to_string(path)?
    } else {
        arg.to_string()
    };

    DigestUtils::normalize_digest(&raw).map_err(|_| {
        ResolverError::Argument(format!("'{}' is neither a digest nor a digest file", arg))
    })
}
