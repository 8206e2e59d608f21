//! Reading `docker save` archives
//!
//! The archive's `manifest.json` lists the config file and the layer
//! tarballs in stack order. Layers are returned gzip-compressed; compression
//! uses a zero mtime so the same archive always yields the same digests.

use crate::error::{ResolverError, Result};
use crate::logging::Logger;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tar::Archive;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ArchiveManifestEntry {
    config: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    layers: Vec<String>,
}

/// The config and ordered, compressed layers of a saved image
#[derive(Debug, Clone)]
pub struct DockerArchive {
    pub config: Vec<u8>,
    pub layers: Vec<Vec<u8>>,
    pub repo_tags: Vec<String>,
}

impl DockerArchive {
    pub async fn load(path: &Path, logger: &Logger) -> Result<Self> {
        logger.detail(&format!("Reading image archive {}", path.display()));
        let owned: PathBuf = path.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || Self::load_blocking(&owned))
            .await
            .map_err(|e| ResolverError::Io(std::io::Error::other(e)))??;

        logger.detail(&format!(
            "Archive {} holds {} layers",
            path.display(),
            archive.layers.len()
        ));
        Ok(archive)
    }

    fn load_blocking(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            ResolverError::Argument(format!(
                "Failed to open image archive {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut archive = Archive::new(file);
        archive.set_ignore_zeros(true);

        let mut entries: HashMap<String, Vec<u8>> = HashMap::new();
        for entry_result in archive.entries().map_err(|e| {
            ResolverError::Parse(format!("Failed to read tar entries: {}", e))
        })? {
            let mut entry = entry_result
                .map_err(|e| ResolverError::Parse(format!("Failed to read tar entry: {}", e)))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }

            let entry_path = entry
                .path()
                .map_err(|e| ResolverError::Parse(format!("Failed to read entry path: {}", e)))?
                .to_string_lossy()
                .trim_start_matches("./")
                .to_string();

            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            entries.insert(entry_path, data);
        }

        let manifest = entries.get("manifest.json").ok_or_else(|| {
            ResolverError::Parse(format!("{} has no manifest.json", path.display()))
        })?;
        let manifest: Vec<ArchiveManifestEntry> = serde_json::from_slice(manifest)?;
        let entry = manifest.into_iter().next().ok_or_else(|| {
            ResolverError::Parse(format!("{} has an empty manifest.json", path.display()))
        })?;

        let config = take_entry(&mut entries, &entry.config, path)?;
        let mut layers = Vec::with_capacity(entry.layers.len());
        for layer_path in &entry.layers {
            // The same layer may be listed twice
            let data = match entries.get(layer_path.as_str()) {
                Some(data) => data.clone(),
                None => {
                    return Err(ResolverError::Parse(format!(
                        "Layer '{}' not found in {}",
                        layer_path,
                        path.display()
                    )));
                }
            };
            layers.push(compress_layer(data)?);
        }

        Ok(Self {
            config,
            layers,
            repo_tags: entry.repo_tags.unwrap_or_default(),
        })
    }
}

fn take_entry(entries: &mut HashMap<String, Vec<u8>>, name: &str, archive: &Path) -> Result<Vec<u8>> {
    entries.remove(name).ok_or_else(|| {
        ResolverError::Parse(format!(
            "'{}' not found in {}",
            name,
            archive.display()
        ))
    })
}

/// Gzip `data` unless it already is
pub fn compress_layer(data: Vec<u8>) -> Result<Vec<u8>> {
    if data.starts_with(&GZIP_MAGIC) {
        return Ok(data);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }

    fn write_archive(layers: &[&[u8]]) -> tempfile::NamedTempFile {
        let mut builder = tar::Builder::new(Vec::new());
        let names: Vec<String> = (0..layers.len()).map(|i| format!("l{}/layer.tar", i)).collect();
        let manifest = serde_json::json!([{
            "Config": "config.json",
            "RepoTags": ["app:latest"],
            "Layers": names,
        }]);
        append(&mut builder, "manifest.json", manifest.to_string().as_bytes());
        append(&mut builder, "config.json", br#"{"os":"linux"}"#);
        for (name, data) in names.iter().zip(layers) {
            append(&mut builder, name, data);
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&builder.into_inner().unwrap()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_load_archive() {
        let file = write_archive(&[b"first", b"second"]);
        let archive = DockerArchive::load(file.path(), &Logger::new_quiet())
            .await
            .unwrap();

        assert_eq!(archive.config, br#"{"os":"linux"}"#);
        assert_eq!(archive.repo_tags, ["app:latest"]);
        assert_eq!(archive.layers.len(), 2);
        assert!(archive.layers.iter().all(|l| l.starts_with(&GZIP_MAGIC)));
    }

    #[tokio::test]
    async fn test_layer_compression_is_deterministic() {
        let file = write_archive(&[b"same"]);
        let first = DockerArchive::load(file.path(), &Logger::new_quiet())
            .await
            .unwrap();
        let second = DockerArchive::load(file.path(), &Logger::new_quiet())
            .await
            .unwrap();
        assert_eq!(first.layers, second.layers);
    }

    #[test]
    fn test_compressed_layers_pass_through() {
        let compressed = compress_layer(b"data".to_vec()).unwrap();
        assert_eq!(compress_layer(compressed.clone()).unwrap(), compressed);
    }

    #[tokio::test]
    async fn test_missing_archive_is_argument_error() {
        let err = DockerArchive::load(Path::new("/nonexistent/app.tar"), &Logger::new_quiet())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::Argument(_)));
    }
}
