//! Image publishing
//!
//! [`Publisher`] stamps and re-roots an image spec's name, assembles the
//! image and pushes it: config and layer blobs concurrently through a bounded
//! pool, then the manifest once every blob is in place.

use crate::config::DEFAULT_MAX_CONCURRENT;
use crate::digest::DigestUtils;
use crate::error::{ResolverError, Result};
use crate::image::{self, Image, ImageSpec, Layer};
use crate::logging::Logger;
use crate::reference::{Repository, Tag};
use crate::registry::{Credentials, Registry};
use crate::stamp::Stamper;
use futures::future::try_join_all;
use std::collections::HashSet;
use std::time::Instant;
use tokio::sync::Semaphore;

/// Outcome of publishing one spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    /// The `name` as written in the spec
    pub original_name: String,
    /// The stamped, chrooted name the image was pushed to
    pub published_name: String,
    pub target: Tag,
    pub digest: String,
}

impl PublishResult {
    /// `registry/repository@sha256:...` for the pushed image
    pub fn digest_reference(&self) -> String {
        format!("{}@{}", self.target.context(), self.digest)
    }
}

pub struct Publisher<'a> {
    registry: &'a dyn Registry,
    logger: Logger,
    chroot: Option<String>,
    stamper: Option<Stamper>,
    max_concurrent: usize,
    push: bool,
}

impl<'a> Publisher<'a> {
    pub fn new(registry: &'a dyn Registry, logger: Logger) -> Self {
        Self {
            registry,
            logger,
            chroot: None,
            stamper: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            push: true,
        }
    }

    pub fn with_chroot(mut self, chroot: Option<String>) -> Self {
        self.chroot = chroot;
        self
    }

    pub fn with_stamper(mut self, stamper: Option<Stamper>) -> Self {
        self.stamper = stamper;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// With `false`, images are assembled and digested but not uploaded
    pub fn with_push(mut self, push: bool) -> Self {
        self.push = push;
        self
    }

    /// The name an image spec's `name` publishes to
    pub fn published_name(&self, name: &str) -> Result<(String, Tag)> {
        let stamped = match &self.stamper {
            Some(stamper) => stamper.stamp(name)?,
            None => name.to_string(),
        };
        let published = match &self.chroot {
            Some(chroot) => format!(
                "{}/{}",
                chroot.trim_end_matches('/'),
                stamped.trim_start_matches('/')
            ),
            None => stamped,
        };
        let tag = Tag::parse_weak(&published)?;
        Ok((published, tag))
    }

    pub async fn publish(&self, spec: &ImageSpec) -> Result<PublishResult> {
        let original_name = spec.validate()?.to_string();
        let (published_name, target) = self.published_name(&original_name)?;

        self.logger.step(&format!("Publishing {} as {}", original_name, target));
        let image = image::assemble(spec, &self.logger).await?;

        if self.push {
            let credentials = self.registry.resolve_credentials(target.context()).await?;
            self.upload_image(&target, &credentials, &image).await?;
        } else {
            self.logger
                .info(&format!("Skipping push of {} (--no-push)", target));
        }

        Ok(PublishResult {
            original_name,
            published_name,
            target,
            digest: image.digest().to_string(),
        })
    }

    /// Upload every blob of `image`, then commit its manifest under `target`
    pub async fn upload_image(
        &self,
        target: &Tag,
        credentials: &Credentials,
        image: &Image,
    ) -> Result<()> {
        let start_time = Instant::now();
        let repository = target.context();
        let semaphore = Semaphore::new(self.max_concurrent);

        let config_digest = image.config_digest();
        let mut seen = HashSet::from([config_digest.clone()]);
        let layers: Vec<&Layer> = image
            .layers()
            .iter()
            .filter(|layer| seen.insert(layer.digest().to_string()))
            .collect();

        self.logger.info(&format!(
            "Uploading {} blobs ({}) with {} concurrent workers",
            layers.len() + 1,
            self.logger.format_size(image.total_size()),
            self.max_concurrent
        ));

        let config_upload = async {
            let _permit = semaphore.acquire().await.map_err(|e| {
                ResolverError::Upload(format!("Failed to acquire upload permit: {}", e))
            })?;
            self.registry
                .upload_blob(repository, credentials, &config_digest, image.config())
                .await
        };
        let layer_uploads = try_join_all(layers.iter().enumerate().map(|(index, layer)| {
            self.upload_layer(repository, credentials, index, layer, &semaphore)
        }));
        futures::try_join!(config_upload, layer_uploads)?;

        self.registry
            .upload_manifest(target, credentials, image.media_type(), image.manifest())
            .await?;

        self.logger.success(&format!(
            "Pushed {}@{} in {}",
            target,
            DigestUtils::format_digest_short(image.digest()),
            self.logger.format_duration(start_time.elapsed())
        ));
        Ok(())
    }

    async fn upload_layer(
        &self,
        repository: &Repository,
        credentials: &Credentials,
        index: usize,
        layer: &Layer,
        semaphore: &Semaphore,
    ) -> Result<()> {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|e| ResolverError::Upload(format!("Failed to acquire upload permit: {}", e)))?;

        let data = layer.data().await?;
        DigestUtils::verify_data_integrity(&data, layer.digest()).map_err(|e| {
            ResolverError::Upload(format!("Layer {} of {}: {}", index + 1, repository, e))
        })?;

        self.logger.detail(&format!(
            "Uploading layer {} ({})",
            index + 1,
            self.logger.format_size(layer.descriptor.size)
        ));
        match self
            .registry
            .upload_blob(repository, credentials, layer.digest(), &data)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.logger
                    .error(&format!("Layer {} failed: {}", index + 1, e));
                Err(e)
            }
        }
    }
}
