//! Image reference parsing
//!
//! An image reference names a repository on a registry plus either a mutable
//! tag (`gcr.io/foo/bar:baz`) or an immutable content digest
//! (`gcr.io/foo/bar@sha256:...`). Parsing never produces partial objects: a
//! malformed string yields [`ResolverError::Reference`].

use crate::digest::DigestUtils;
use crate::error::{ResolverError, Result};
use oci_client::Reference;
use std::fmt;
use std::str::FromStr;

/// Registry used when a reference names none
pub const DEFAULT_REGISTRY: &str = "index.docker.io";
/// Tag assumed by weak parsing when a reference names none
pub const DEFAULT_TAG: &str = "latest";

fn parse_reference(reference: &str) -> Result<Reference> {
    Reference::try_from(reference).map_err(|e| {
        ResolverError::Reference(format!("Invalid image reference '{}': {}", reference, e))
    })
}

/// Whether the last path component carries a `:tag`. A colon earlier in the
/// string belongs to a registry port.
fn has_explicit_tag(reference: &str) -> bool {
    reference
        .rsplit('/')
        .next()
        .is_some_and(|last| last.contains(':'))
}

/// A repository on a specific registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository {
    registry: String,
    repository: String,
}

impl Repository {
    pub fn parse(name: &str) -> Result<Self> {
        if name.contains('@') || has_explicit_tag(name) {
            return Err(ResolverError::Reference(format!(
                "'{}' is not a bare repository name",
                name
            )));
        }
        Ok(Self::from(&parse_reference(name)?))
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }
}

impl From<&Reference> for Repository {
    fn from(reference: &Reference) -> Self {
        Self {
            registry: reference.resolve_registry().to_string(),
            repository: reference.repository().to_string(),
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)
    }
}

/// A mutable, human-assigned pointer into a repository
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    repository: Repository,
    tag: String,
}

impl Tag {
    /// Parse a tag, requiring the `:tag` suffix to be present.
    pub fn parse(reference: &str) -> Result<Self> {
        Self::parse_with(reference, true)
    }

    /// Parse a tag, defaulting to `latest` when none is given.
    pub fn parse_weak(reference: &str) -> Result<Self> {
        Self::parse_with(reference, false)
    }

    fn parse_with(reference: &str, strict: bool) -> Result<Self> {
        if reference.contains('@') {
            return Err(ResolverError::Reference(format!(
                "'{}' is a digest reference, not a tag",
                reference
            )));
        }
        if strict && !has_explicit_tag(reference) {
            return Err(ResolverError::Reference(format!(
                "'{}' does not specify a tag",
                reference
            )));
        }

        let parsed = parse_reference(reference)?;
        Ok(Self {
            repository: Repository::from(&parsed),
            tag: parsed.tag().unwrap_or(DEFAULT_TAG).to_string(),
        })
    }

    pub fn registry(&self) -> &str {
        self.repository.registry()
    }

    pub fn repository(&self) -> &str {
        self.repository.repository()
    }

    pub fn context(&self) -> &Repository {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The fully-qualified digest reference for this tag's repository
    pub fn with_digest(&self, digest: &str) -> Result<Digest> {
        Digest::new(self.repository.clone(), digest)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl FromStr for Tag {
    type Err = ResolverError;

    fn from_str(s: &str) -> Result<Self> {
        Tag::parse(s)
    }
}

/// An immutable, content-addressed reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    repository: Repository,
    digest: String,
}

impl Digest {
    pub fn new(repository: Repository, digest: &str) -> Result<Self> {
        if !DigestUtils::is_valid_docker_digest(digest) {
            return Err(ResolverError::Reference(format!(
                "Invalid digest '{}'",
                digest
            )));
        }
        Ok(Self {
            repository,
            digest: digest.to_string(),
        })
    }

    pub fn registry(&self) -> &str {
        self.repository.registry()
    }

    pub fn repository(&self) -> &str {
        self.repository.repository()
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.digest)
    }
}
