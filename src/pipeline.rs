//! Publish-then-resolve orchestration
//!
//! Published images become digest overrides for the resolver. Every override
//! key is expected to appear somewhere in the template; keys the walk never
//! visits are reported back rather than failing the resolution itself.

use crate::cache::DigestCache;
use crate::config::OverrideKey;
use crate::error::Result;
use crate::image::ImageSpec;
use crate::logging::Logger;
use crate::publish::{PublishResult, Publisher};
use crate::registry::Registry;
use crate::resolver::{TagResolver, TrackingResolver};
use crate::walker;

/// The resolved template plus the override keys it never mentioned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub text: String,
    pub unreferenced: Vec<String>,
    pub network_resolutions: usize,
}

/// Publish specs serially, in order. The first failure aborts, naming the spec.
pub async fn publish_images(
    publisher: &Publisher<'_>,
    specs: &[ImageSpec],
    logger: &Logger,
) -> Result<Vec<PublishResult>> {
    let mut results = Vec::with_capacity(specs.len());
    for spec in specs {
        match publisher.publish(spec).await {
            Ok(result) => results.push(result),
            Err(e) => {
                logger.error(&format!(
                    "Error publishing provided image {}: {}",
                    spec.display_name(),
                    e
                ));
                return Err(e);
            }
        }
    }
    Ok(results)
}

/// `(key, digest reference)` pairs to seed the digest cache with
pub fn overrides(results: &[PublishResult], key: OverrideKey) -> Vec<(String, String)> {
    results
        .iter()
        .map(|result| {
            let name = match key {
                OverrideKey::Original => result.original_name.clone(),
                OverrideKey::Published => result.published_name.clone(),
            };
            (name, result.digest_reference())
        })
        .collect()
}

pub async fn resolve_template(
    registry: &dyn Registry,
    template: &str,
    overrides: Vec<(String, String)>,
    logger: &Logger,
) -> Result<Resolution> {
    let expected: Vec<String> = overrides.iter().map(|(key, _)| key.clone()).collect();
    let resolver = TagResolver::new(registry, DigestCache::with_overrides(overrides), logger.clone());
    let mut tracking = TrackingResolver::new(resolver, expected);

    let text = walker::resolve(template, &mut tracking).await?;
    let unreferenced = tracking.unseen();
    let network_resolutions = tracking.into_inner().network_resolutions();

    logger.verbose(&format!(
        "Resolution needed {} registry lookups",
        network_resolutions
    ));
    Ok(Resolution {
        text,
        unreferenced,
        network_resolutions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InMemoryRegistry, media_types};

    #[tokio::test]
    async fn test_unreferenced_override_is_reported() {
        let registry = InMemoryRegistry::new();
        let overrides = vec![
            ("gcr.io/foo/a:v1".to_string(), "gcr.io/foo/a@sha256:aaa".to_string()),
            ("gcr.io/foo/b:v1".to_string(), "gcr.io/foo/b@sha256:bbb".to_string()),
        ];

        let resolution = resolve_template(
            &registry,
            "image: gcr.io/foo/a:v1\n",
            overrides,
            &Logger::new_quiet(),
        )
        .await
        .unwrap();

        assert_eq!(resolution.text, "image: gcr.io/foo/a@sha256:aaa\n");
        assert_eq!(resolution.unreferenced, ["gcr.io/foo/b:v1"]);
        assert_eq!(resolution.network_resolutions, 0);
    }

    #[tokio::test]
    async fn test_repeated_references_resolve_once() {
        let registry = InMemoryRegistry::new()
            .with_manifest("gcr.io/foo/web:v2", media_types::DOCKER_MANIFEST_V2, b"{}")
            .unwrap();
        let template = "a: gcr.io/foo/web:v2\n---\nb: [gcr.io/foo/web:v2, gcr.io/foo/web:v2]\n";

        let resolution = resolve_template(&registry, template, Vec::new(), &Logger::new_quiet())
            .await
            .unwrap();

        assert_eq!(registry.fetch_calls(), 1);
        assert_eq!(resolution.network_resolutions, 1);
        assert_eq!(resolution.text.matches("gcr.io/foo/web@sha256:").count(), 3);
    }
}
