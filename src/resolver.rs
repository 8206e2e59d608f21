//! Tag to digest resolution
//!
//! [`TagResolver`] turns `registry/repo:tag` strings into fully-qualified
//! `registry/repo@sha256:...` references, consulting the [`DigestCache`]
//! first and the registry at most once per distinct string. Strings that do
//! not parse as tags are reported as [`Resolved::NotATag`] so the walker can
//! keep them as they were; every registry failure is an error.

use crate::cache::DigestCache;
use crate::digest::DigestUtils;
use crate::error::{ResolverError, Result};
use crate::logging::Logger;
use crate::reference::Tag;
use crate::registry::{ManifestSchema, Registry};
use crate::walker::StringResolver;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Outcome of resolving one string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Digest(String),
    NotATag,
}

pub struct TagResolver<'a> {
    registry: &'a dyn Registry,
    cache: DigestCache,
    logger: Logger,
    network_resolutions: usize,
}

impl<'a> TagResolver<'a> {
    pub fn new(registry: &'a dyn Registry, cache: DigestCache, logger: Logger) -> Self {
        Self {
            registry,
            cache,
            logger,
            network_resolutions: 0,
        }
    }

    /// Resolve `reference` to a digest reference.
    ///
    /// Fails with [`ResolverError::Reference`] when `reference` is not a tag,
    /// and with [`ResolverError::NotFound`] when the registry has no manifest
    /// for it under any schema.
    pub async fn tag_to_digest(&mut self, reference: &str) -> Result<String> {
        if let Some(digest) = self.cache.get(reference) {
            return Ok(digest.to_string());
        }

        let tag = Tag::parse(reference)?;
        let credentials = self.registry.resolve_credentials(tag.context()).await?;
        self.network_resolutions += 1;

        for schema in ManifestSchema::FALLBACK_ORDER {
            let Some(manifest) = self
                .registry
                .fetch_manifest(&tag, &credentials, schema)
                .await?
            else {
                self.logger
                    .detail(&format!("{} has no {} manifest", tag, schema));
                continue;
            };

            // Must not surface as a reference error, `resolve` swallows those
            let digest = tag.with_digest(&manifest.digest).map_err(|_| {
                ResolverError::Registry(format!(
                    "{} returned invalid digest '{}'",
                    tag, manifest.digest
                ))
            })?;
            self.logger.verbose(&format!(
                "Resolved {} to {} ({} manifest)",
                reference,
                DigestUtils::format_digest_short(digest.digest()),
                schema
            ));
            return Ok(self
                .cache
                .insert(reference.to_string(), digest.to_string())
                .to_string());
        }

        Err(ResolverError::NotFound(format!(
            "No manifest for {} under any supported schema",
            tag
        )))
    }

    /// Like [`tag_to_digest`](Self::tag_to_digest), with "not a tag" as a
    /// value rather than an error
    pub async fn resolve(&mut self, reference: &str) -> Result<Resolved> {
        match self.tag_to_digest(reference).await {
            Ok(digest) => Ok(Resolved::Digest(digest)),
            Err(e) if e.is_reference() => Ok(Resolved::NotATag),
            Err(e) => Err(e),
        }
    }

    /// Number of references that needed a registry round trip
    pub fn network_resolutions(&self) -> usize {
        self.network_resolutions
    }

    pub fn cache(&self) -> &DigestCache {
        &self.cache
    }
}

#[async_trait]
impl StringResolver for TagResolver<'_> {
    async fn resolve_str(&mut self, value: &str) -> Result<String> {
        Ok(match self.resolve(value).await? {
            Resolved::Digest(digest) => digest,
            Resolved::NotATag => value.to_string(),
        })
    }
}

/// Records which of a set of names the walk visited
pub struct TrackingResolver<R> {
    inner: R,
    unseen: BTreeSet<String>,
}

impl<R: StringResolver> TrackingResolver<R> {
    pub fn new(inner: R, expected: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner,
            unseen: expected.into_iter().collect(),
        }
    }

    /// Expected names never visited, sorted
    pub fn unseen(&self) -> Vec<String> {
        self.unseen.iter().cloned().collect()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[async_trait]
impl<R: StringResolver> StringResolver for TrackingResolver<R> {
    async fn resolve_str(&mut self, value: &str) -> Result<String> {
        self.unseen.remove(value);
        self.inner.resolve_str(value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use crate::registry::media_types;
    use crate::walker;

    const MANIFEST: &[u8] = br#"{"schemaVersion": 2}"#;

    fn registry() -> InMemoryRegistry {
        InMemoryRegistry::new()
            .with_manifest("gcr.io/foo/bar:baz", media_types::DOCKER_MANIFEST_V2, MANIFEST)
            .unwrap()
            .with_manifest(
                "gcr.io/foo/legacy:v1",
                media_types::DOCKER_MANIFEST_V1_SIGNED,
                b"{\"schemaVersion\": 1}",
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_resolves_and_caches() {
        let registry = registry();
        let mut resolver = TagResolver::new(&registry, DigestCache::new(), Logger::new_quiet());

        let first = resolver.tag_to_digest("gcr.io/foo/bar:baz").await.unwrap();
        let second = resolver.tag_to_digest("gcr.io/foo/bar:baz").await.unwrap();

        assert_eq!(
            first,
            format!(
                "gcr.io/foo/bar@{}",
                DigestUtils::compute_docker_digest(MANIFEST)
            )
        );
        assert_eq!(first, second);
        assert_eq!(registry.fetch_calls(), 1);
        assert_eq!(resolver.network_resolutions(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_needs_no_registry() {
        let registry = InMemoryRegistry::new();
        let cache = DigestCache::with_overrides([(
            "gcr.io/foo/bar:baz".to_string(),
            "foo@sha256:deadbeef".to_string(),
        )]);
        let mut resolver = TagResolver::new(&registry, cache, Logger::new_quiet());

        assert_eq!(
            resolver.tag_to_digest("gcr.io/foo/bar:baz").await.unwrap(),
            "foo@sha256:deadbeef"
        );
        assert_eq!(registry.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_legacy_schema_fallback() {
        let registry = registry();
        let mut resolver = TagResolver::new(&registry, DigestCache::new(), Logger::new_quiet());

        let digest = resolver.tag_to_digest("gcr.io/foo/legacy:v1").await.unwrap();
        assert!(digest.starts_with("gcr.io/foo/legacy@sha256:"));
        assert_eq!(registry.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_under_both_schemas() {
        let registry = registry();
        let mut resolver = TagResolver::new(&registry, DigestCache::new(), Logger::new_quiet());

        let err = resolver.tag_to_digest("gcr.io/foo/gone:v1").await.unwrap_err();
        assert!(matches!(err, ResolverError::NotFound(_)));
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_transient_error_skips_fallback() {
        let registry = registry().fail_fetch("gcr.io/foo/bar:baz").unwrap();
        let mut resolver = TagResolver::new(&registry, DigestCache::new(), Logger::new_quiet());

        let err = resolver.resolve("gcr.io/foo/bar:baz").await.unwrap_err();
        assert!(matches!(err, ResolverError::Registry(_)));
        assert_eq!(registry.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal() {
        let registry = registry().deny("gcr.io").unwrap();
        let mut resolver = TagResolver::new(&registry, DigestCache::new(), Logger::new_quiet());

        let err = resolver.resolve("gcr.io/foo/bar:baz").await.unwrap_err();
        assert!(matches!(err, ResolverError::Auth(_)));
    }

    #[tokio::test]
    async fn test_non_tags_are_kept() {
        let registry = registry();
        let mut resolver = TagResolver::new(&registry, DigestCache::new(), Logger::new_quiet());

        for input in ["value1", "http://example.com/a b", "8080", "--verbose"] {
            assert_eq!(resolver.resolve(input).await.unwrap(), Resolved::NotATag);
            assert_eq!(resolver.resolve_str(input).await.unwrap(), input);
        }
        assert_eq!(registry.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_digest_references_round_trip() {
        let registry = registry();
        let mut resolver = TagResolver::new(&registry, DigestCache::new(), Logger::new_quiet());
        let resolved = resolver.tag_to_digest("gcr.io/foo/bar:baz").await.unwrap();

        assert_eq!(resolver.resolve_str(&resolved).await.unwrap(), resolved);
        assert_eq!(registry.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_tracking_resolver_reports_unseen() {
        let registry = registry();
        let resolver = TagResolver::new(&registry, DigestCache::new(), Logger::new_quiet());
        let mut tracking = TrackingResolver::new(
            resolver,
            ["gcr.io/foo/bar:baz".to_string(), "gcr.io/foo/other:v2".to_string()],
        );

        let text = "spec:\n  image: gcr.io/foo/bar:baz\n";
        let resolved = walker::resolve(text, &mut tracking).await.unwrap();

        assert!(resolved.contains("gcr.io/foo/bar@sha256:"));
        assert_eq!(tracking.unseen(), ["gcr.io/foo/other:v2"]);
    }
}
