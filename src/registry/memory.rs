//! A registry held entirely in memory
//!
//! Used by the test suites in place of a live registry. It serves manifests
//! per schema, counts fetches, stores uploaded blobs and manifests and can be
//! told to fail in the ways a real registry does.

use crate::digest::DigestUtils;
use crate::error::{ResolverError, Result};
use crate::reference::{Repository, Tag};
use crate::registry::{Credentials, ManifestSchema, Registry, RemoteManifest, media_types};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    // (repository, tag) -> (media type, manifest bytes)
    manifests: HashMap<(String, String), (String, Vec<u8>)>,
    blobs: HashMap<(String, String), Vec<u8>>,
    credentials: HashMap<String, Credentials>,
    denied: HashSet<String>,
    failing_fetches: HashSet<String>,
    failing_blobs: HashSet<String>,
    fetch_calls: usize,
    blob_uploads: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: Mutex<State>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` under `reference` (a fully-specified tag) as `media_type`
    pub fn with_manifest(self, reference: &str, media_type: &str, body: &[u8]) -> Result<Self> {
        let tag = Tag::parse(reference)?;
        self.lock()?.manifests.insert(
            (tag.context().to_string(), tag.tag().to_string()),
            (media_type.to_string(), body.to_vec()),
        );
        Ok(self)
    }

    pub fn with_credentials(self, registry: &str, credentials: Credentials) -> Result<Self> {
        self.lock()?
            .credentials
            .insert(registry.to_string(), credentials);
        Ok(self)
    }

    /// Reject every request against `registry` as unauthorized
    pub fn deny(self, registry: &str) -> Result<Self> {
        self.lock()?.denied.insert(registry.to_string());
        Ok(self)
    }

    /// Answer manifest fetches for `reference` with a registry error
    pub fn fail_fetch(self, reference: &str) -> Result<Self> {
        let tag = Tag::parse(reference)?;
        self.lock()?.failing_fetches.insert(tag.to_string());
        Ok(self)
    }

    /// Answer uploads of the blob `digest` with an upload error
    pub fn fail_blob(self, digest: &str) -> Result<Self> {
        self.lock()?.failing_blobs.insert(digest.to_string());
        Ok(self)
    }

    pub fn fetch_calls(&self) -> usize {
        self.lock().map(|state| state.fetch_calls).unwrap_or_default()
    }

    pub fn blob_uploads(&self) -> usize {
        self.lock().map(|state| state.blob_uploads).unwrap_or_default()
    }

    pub fn blob(&self, repository: &str, digest: &str) -> Option<Vec<u8>> {
        let repository = Repository::parse(repository).ok()?;
        self.lock()
            .ok()?
            .blobs
            .get(&(repository.to_string(), digest.to_string()))
            .cloned()
    }

    /// Manifest bytes committed under `reference`
    pub fn uploaded_manifest(&self, reference: &str) -> Option<Vec<u8>> {
        let tag = Tag::parse(reference).ok()?;
        self.lock()
            .ok()?
            .manifests
            .get(&(tag.context().to_string(), tag.tag().to_string()))
            .map(|(_, body)| body.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| ResolverError::Registry("registry state poisoned".to_string()))
    }

    fn check_access(state: &State, registry: &str) -> Result<()> {
        if state.denied.contains(registry) {
            return Err(ResolverError::Auth(format!("Access to {} denied", registry)));
        }
        Ok(())
    }
}

// Digests of the config and layers a schema 2 manifest refers to
fn referenced_blobs(manifest: &[u8]) -> Result<Vec<String>> {
    let value: Value = serde_json::from_slice(manifest)?;
    let mut digests = Vec::new();

    if let Some(digest) = value.pointer("/config/digest").and_then(Value::as_str) {
        digests.push(digest.to_string());
    }
    if let Some(layers) = value.get("layers").and_then(Value::as_array) {
        for layer in layers {
            if let Some(digest) = layer.get("digest").and_then(Value::as_str) {
                digests.push(digest.to_string());
            }
        }
    }
    Ok(digests)
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn resolve_credentials(&self, repository: &Repository) -> Result<Credentials> {
        let state = self.lock()?;
        Ok(state
            .credentials
            .get(repository.registry())
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_manifest(
        &self,
        tag: &Tag,
        _credentials: &Credentials,
        schema: ManifestSchema,
    ) -> Result<Option<RemoteManifest>> {
        let mut state = self.lock()?;
        state.fetch_calls += 1;
        Self::check_access(&state, tag.registry())?;

        if state.failing_fetches.contains(&tag.to_string()) {
            return Err(ResolverError::Registry(format!(
                "Registry unavailable for manifest fetch for {}",
                tag
            )));
        }

        let key = (tag.context().to_string(), tag.tag().to_string());
        Ok(state
            .manifests
            .get(&key)
            .filter(|(media_type, _)| schema.accepts(media_type))
            .map(|(media_type, body)| RemoteManifest {
                digest: DigestUtils::compute_docker_digest(body),
                media_type: media_type.clone(),
                body: body.clone(),
            }))
    }

    async fn upload_blob(
        &self,
        repository: &Repository,
        _credentials: &Credentials,
        digest: &str,
        data: &[u8],
    ) -> Result<()> {
        let mut state = self.lock()?;
        Self::check_access(&state, repository.registry())?;

        if state.failing_blobs.contains(digest) {
            return Err(ResolverError::Upload(format!(
                "Upload of blob {} to {} failed",
                digest, repository
            )));
        }
        DigestUtils::verify_data_integrity(data, digest)?;

        state.blob_uploads += 1;
        state
            .blobs
            .insert((repository.to_string(), digest.to_string()), data.to_vec());
        Ok(())
    }

    async fn upload_manifest(
        &self,
        tag: &Tag,
        _credentials: &Credentials,
        media_type: &str,
        manifest: &[u8],
    ) -> Result<()> {
        let mut state = self.lock()?;
        Self::check_access(&state, tag.registry())?;

        let repository = tag.context().to_string();
        if media_type == media_types::DOCKER_MANIFEST_V2 {
            for digest in referenced_blobs(manifest)? {
                if !state.blobs.contains_key(&(repository.clone(), digest.clone())) {
                    return Err(ResolverError::Upload(format!(
                        "Manifest for {} references missing blob {}",
                        tag, digest
                    )));
                }
            }
        }

        state.manifests.insert(
            (repository, tag.tag().to_string()),
            (media_type.to_string(), manifest.to_vec()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_respects_schema() {
        let registry = InMemoryRegistry::new()
            .with_manifest("gcr.io/foo/old:v1", media_types::DOCKER_MANIFEST_V1_SIGNED, b"{}")
            .unwrap();
        let tag = Tag::parse("gcr.io/foo/old:v1").unwrap();
        let creds = Credentials::Anonymous;

        let modern = registry
            .fetch_manifest(&tag, &creds, ManifestSchema::V2_2)
            .await
            .unwrap();
        assert!(modern.is_none());

        let legacy = registry
            .fetch_manifest(&tag, &creds, ManifestSchema::V2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(legacy.digest, DigestUtils::compute_docker_digest(b"{}"));
        assert_eq!(registry.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_manifest_requires_blobs() {
        let registry = InMemoryRegistry::new();
        let tag = Tag::parse("gcr.io/foo/app:v1").unwrap();
        let config_digest = DigestUtils::compute_docker_digest(b"config");
        let manifest = format!(r#"{{"config": {{"digest": "{}"}}, "layers": []}}"#, config_digest);

        let err = registry
            .upload_manifest(
                &tag,
                &Credentials::Anonymous,
                media_types::DOCKER_MANIFEST_V2,
                manifest.as_bytes(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::Upload(_)));

        registry
            .upload_blob(tag.context(), &Credentials::Anonymous, &config_digest, b"config")
            .await
            .unwrap();
        registry
            .upload_manifest(
                &tag,
                &Credentials::Anonymous,
                media_types::DOCKER_MANIFEST_V2,
                manifest.as_bytes(),
            )
            .await
            .unwrap();
        assert_eq!(
            registry.uploaded_manifest("gcr.io/foo/app:v1").unwrap(),
            manifest.as_bytes()
        );
    }

    #[tokio::test]
    async fn test_denied_registry() {
        let registry = InMemoryRegistry::new().deny("gcr.io").unwrap();
        let tag = Tag::parse("gcr.io/foo/app:v1").unwrap();
        let err = registry
            .fetch_manifest(&tag, &Credentials::Anonymous, ManifestSchema::V2_2)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::Auth(_)));
    }
}
