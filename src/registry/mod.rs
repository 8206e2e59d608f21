//! Registry module for Docker registry interactions
//!
//! The resolver and publisher only ever talk to a registry through the
//! [`Registry`] trait. [`HttpRegistry`] implements it over the Docker
//! Registry HTTP API v2; [`InMemoryRegistry`] implements it for tests.

pub mod auth;
pub mod client;
pub mod keychain;
pub mod memory;

use crate::error::Result;
use crate::reference::{Repository, Tag};
use async_trait::async_trait;
use std::fmt;

pub use client::{HttpRegistry, HttpRegistryBuilder};
pub use keychain::Keychain;
pub use memory::InMemoryRegistry;

/// Manifest media types understood by the resolver
pub mod media_types {
    pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST_V2: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
    pub const DOCKER_MANIFEST_V1_SIGNED: &str =
        "application/vnd.docker.distribution.manifest.v1+prettyjws";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const DOCKER_CONTAINER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
}

/// Manifest schema generation requested from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestSchema {
    /// Schema 2 manifests and manifest lists (Docker v2.2, OCI)
    V2_2,
    /// Legacy schema 1 manifests
    V2,
}

impl ManifestSchema {
    /// Schemas in the order resolution tries them
    pub const FALLBACK_ORDER: [ManifestSchema; 2] = [ManifestSchema::V2_2, ManifestSchema::V2];

    pub fn accepted_media_types(&self) -> &'static [&'static str] {
        match self {
            ManifestSchema::V2_2 => &[
                media_types::DOCKER_MANIFEST_V2,
                media_types::DOCKER_MANIFEST_LIST_V2,
                media_types::OCI_MANIFEST,
                media_types::OCI_INDEX,
            ],
            ManifestSchema::V2 => &[
                media_types::DOCKER_MANIFEST_V1_SIGNED,
                media_types::DOCKER_MANIFEST_V1,
            ],
        }
    }

    pub fn accept_header(&self) -> String {
        self.accepted_media_types().join(", ")
    }

    pub fn accepts(&self, media_type: &str) -> bool {
        self.accepted_media_types().contains(&media_type)
    }
}

impl fmt::Display for ManifestSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestSchema::V2_2 => write!(f, "v2.2"),
            ManifestSchema::V2 => write!(f, "v2"),
        }
    }
}

/// Credentials resolved for one registry
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    Anonymous,
    Basic { username: String, password: String },
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Credentials::Anonymous)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => write!(f, "Anonymous"),
            Credentials::Basic { username, .. } => {
                write!(f, "Basic {{ username: {:?}, password: \"***\" }}", username)
            }
        }
    }
}

/// A manifest as served by a registry
#[derive(Debug, Clone)]
pub struct RemoteManifest {
    pub digest: String,
    pub media_type: String,
    pub body: Vec<u8>,
}

/// The registry operations tag resolution and publishing depend on
#[async_trait]
pub trait Registry: Send + Sync {
    /// Pick credentials for a repository using keychain precedence
    async fn resolve_credentials(&self, repository: &Repository) -> Result<Credentials>;

    /// Fetch the manifest a tag points at. `Ok(None)` means the tag does not
    /// exist under `schema`; every other failure is an error.
    async fn fetch_manifest(
        &self,
        tag: &Tag,
        credentials: &Credentials,
        schema: ManifestSchema,
    ) -> Result<Option<RemoteManifest>>;

    /// Store a blob under `digest`. Blobs already present may be skipped.
    async fn upload_blob(
        &self,
        repository: &Repository,
        credentials: &Credentials,
        digest: &str,
        data: &[u8],
    ) -> Result<()>;

    /// Commit a manifest under `tag`. Every blob it references must
    /// already have been uploaded.
    async fn upload_manifest(
        &self,
        tag: &Tag,
        credentials: &Credentials,
        media_type: &str,
        manifest: &[u8],
    ) -> Result<()>;
}
