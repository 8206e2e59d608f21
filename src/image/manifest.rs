use crate::digest::DigestUtils;
use crate::error::Result;
use crate::registry::media_types;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::PathBuf;

/// Content descriptor as it appears in an image manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

/// Docker image manifest, schema version 2
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u32,
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

#[derive(Debug, Clone)]
pub enum LayerSource {
    /// Blob read from disk at upload time
    File(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub descriptor: Descriptor,
    pub source: LayerSource,
}

impl Layer {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            descriptor: Descriptor {
                media_type: media_types::DOCKER_LAYER_GZIP.to_string(),
                size: data.len() as u64,
                digest: DigestUtils::compute_docker_digest(&data),
            },
            source: LayerSource::Bytes(data),
        }
    }

    /// A layer on disk whose digest was supplied by the caller. The digest is
    /// verified when the blob is read for upload.
    pub fn from_file(path: PathBuf, digest: String, size: u64) -> Self {
        Self {
            descriptor: Descriptor {
                media_type: media_types::DOCKER_LAYER_GZIP.to_string(),
                size,
                digest,
            },
            source: LayerSource::File(path),
        }
    }

    pub fn digest(&self) -> &str {
        &self.descriptor.digest
    }

    pub async fn data(&self) -> Result<Cow<'_, [u8]>> {
        match &self.source {
            LayerSource::Bytes(data) => Ok(Cow::Borrowed(data.as_slice())),
            LayerSource::File(path) => Ok(Cow::Owned(tokio::fs::read(path).await?)),
        }
    }
}

/// An assembled image ready for upload
///
/// The manifest bytes are rendered once, so the digest reported here is the
/// digest of exactly what gets pushed.
#[derive(Debug, Clone)]
pub struct Image {
    config: Vec<u8>,
    layers: Vec<Layer>,
    manifest: Vec<u8>,
    digest: String,
}

impl Image {
    pub fn new(config: Vec<u8>, layers: Vec<Layer>) -> Result<Self> {
        let manifest = ImageManifest {
            schema_version: 2,
            media_type: media_types::DOCKER_MANIFEST_V2.to_string(),
            config: Descriptor {
                media_type: media_types::DOCKER_CONTAINER_CONFIG.to_string(),
                size: config.len() as u64,
                digest: DigestUtils::compute_docker_digest(&config),
            },
            layers: layers.iter().map(|l| l.descriptor.clone()).collect(),
        };
        let manifest = serde_json::to_vec_pretty(&manifest)?;
        let digest = DigestUtils::compute_docker_digest(&manifest);

        Ok(Self {
            config,
            layers,
            manifest,
            digest,
        })
    }

    pub fn config(&self) -> &[u8] {
        &self.config
    }

    pub fn config_digest(&self) -> String {
        DigestUtils::compute_docker_digest(&self.config)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn manifest(&self) -> &[u8] {
        &self.manifest
    }

    pub fn media_type(&self) -> &'static str {
        media_types::DOCKER_MANIFEST_V2
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn total_size(&self) -> u64 {
        self.layers.iter().map(|l| l.descriptor.size).sum::<u64>() + self.config.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_shape() {
        let image = Image::new(
            b"{}".to_vec(),
            vec![Layer::from_bytes(b"one".to_vec()), Layer::from_bytes(b"two".to_vec())],
        )
        .unwrap();

        let manifest: ImageManifest = serde_json::from_slice(image.manifest()).unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.config.digest, image.config_digest());
        assert_eq!(manifest.layers.len(), 2);
        assert_eq!(
            manifest.layers[0].digest,
            DigestUtils::compute_docker_digest(b"one")
        );
        assert_eq!(image.digest(), DigestUtils::compute_docker_digest(image.manifest()));
    }

    #[test]
    fn test_manifest_uses_camel_case() {
        let image = Image::new(b"{}".to_vec(), vec![]).unwrap();
        let text = String::from_utf8(image.manifest().to_vec()).unwrap();
        assert!(text.contains("\"schemaVersion\": 2"));
        assert!(text.contains("\"mediaType\""));
    }

    #[test]
    fn test_layer_order_preserved() {
        let layers: Vec<Layer> = (0..5)
            .map(|i| Layer::from_bytes(format!("layer-{}", i).into_bytes()))
            .collect();
        let expected: Vec<String> = layers.iter().map(|l| l.digest().to_string()).collect();
        let image = Image::new(b"{}".to_vec(), layers).unwrap();

        let manifest: ImageManifest = serde_json::from_slice(image.manifest()).unwrap();
        let actual: Vec<String> = manifest.layers.into_iter().map(|d| d.digest).collect();
        assert_eq!(actual, expected);
    }
}
