//! Image assembly from local build outputs
//!
//! An image is built from an [`ImageSpec`]: a `docker save` tarball, a config
//! file plus explicit `(digest, layer)` pairs, or both. When both are given the
//! config file wins and the explicit layers are stacked on the tarball's.

pub mod manifest;
pub mod spec;
pub mod tarball;

pub use manifest::{Descriptor, Image, ImageManifest, Layer, LayerSource};
pub use spec::{ImageSpec, read_digest_arg};
pub use tarball::DockerArchive;

use crate::error::{ResolverError, Result};
use crate::logging::Logger;

/// Build the image described by a validated spec
pub async fn assemble(spec: &ImageSpec, logger: &Logger) -> Result<Image> {
    let name = spec.validate()?;

    let base = match &spec.tarball {
        Some(path) => Some(DockerArchive::load(path, logger).await?),
        None => None,
    };

    let config = match (&spec.config, &base) {
        (Some(path), _) => tokio::fs::read(path).await.map_err(|e| {
            ResolverError::Argument(format!(
                "{}: failed to read config {}: {}",
                name,
                path.display(),
                e
            ))
        })?,
        (None, Some(base)) => base.config.clone(),
        (None, None) => {
            return Err(ResolverError::Argument(format!(
                "{}: Either \"config\" or \"tarball\" must be specified",
                name
            )));
        }
    };

    let mut layers: Vec<Layer> = base
        .map(|base| base.layers.into_iter().map(Layer::from_bytes).collect())
        .unwrap_or_default();

    for (digest, path) in spec.digests.iter().zip(&spec.layers) {
        let digest = read_digest_arg(digest)?;
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| {
                ResolverError::Argument(format!(
                    "{}: failed to read layer {}: {}",
                    name,
                    path.display(),
                    e
                ))
            })?
            .len();
        layers.push(Layer::from_file(path.clone(), digest, size));
    }

    let image = Image::new(config, layers)?;
    logger.detail(&format!(
        "Assembled {} with {} layers ({})",
        name,
        image.layers().len(),
        logger.format_size(image.total_size())
    ));
    Ok(image)
}
