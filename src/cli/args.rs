//! Command-line argument parsing

use crate::config::{AuthConfig, OverrideKey, ResolverConfig};
use crate::error::{ResolverError, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Clone)]
#[command(name = "k8s-image-resolver")]
#[command(about = "Publish local images and resolve image tags in Kubernetes YAML to digests")]
#[command(version)]
pub struct Args {
    /// Template to resolve
    #[arg(long = "template", help = "The template file to resolve")]
    pub template: PathBuf,

    /// Images to publish before resolving
    #[arg(
        long = "image-spec",
        value_name = "SPEC",
        help = "Image to publish: name=...;tarball=...;config=...;digest=d1,d2;layer=l1,l2"
    )]
    pub image_specs: Vec<String>,

    #[arg(
        long = "image-chroot",
        value_name = "REPO",
        help = "The repository under which to chroot image references when publishing them"
    )]
    pub image_chroot: Option<String>,

    #[arg(
        long = "stamp-info-file",
        value_name = "PATH",
        help = "File of `KEY value` lines substituted into {KEY} placeholders in image names"
    )]
    pub stamp_info_files: Vec<PathBuf>,

    /// Do not fail when a published image is never referenced
    #[arg(long = "allow-unused-images")]
    pub allow_unused_images: bool,

    /// Assemble images and compute their digests without uploading them
    #[arg(long = "no-push")]
    pub no_push: bool,

    #[arg(
        long = "override-key",
        value_enum,
        default_value_t = OverrideKey::Original,
        help = "Name published digests are substituted for"
    )]
    pub override_key: OverrideKey,

    #[arg(
        long = "registry-auth",
        value_name = "REGISTRY=USER:PASSWORD",
        help = "Explicit credentials for a registry"
    )]
    pub registry_auth: Vec<String>,

    #[arg(
        long = "output",
        short = 'o',
        help = "Write the resolved template here instead of stdout"
    )]
    pub output: Option<PathBuf>,

    /// Unset flags fall back to RESOLVER_MAX_CONCURRENT, then the default
    #[arg(
        long = "max-concurrent",
        short = 'j',
        value_name = "N",
        help = "Number of concurrent upload workers and pooled connections [default: 32]"
    )]
    pub max_concurrent: Option<usize>,

    #[arg(
        long = "timeout",
        short = 't',
        value_name = "SECS",
        help = "Timeout for network operations in seconds [default: 300]"
    )]
    pub timeout: Option<u64>,

    #[arg(long = "skip-tls", short = 'k', help = "Skip TLS certificate verification")]
    pub skip_tls: bool,

    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long = "quiet", short = 'q', help = "Only report errors")]
    pub quiet: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    pub fn validate(&self) -> Result<()> {
        if !Path::new(&self.template).is_file() {
            return Err(ResolverError::Argument(format!(
                "Template does not exist: {}",
                self.template.display()
            )));
        }
        for path in &self.stamp_info_files {
            if !path.is_file() {
                return Err(ResolverError::Argument(format!(
                    "Stamp info file does not exist: {}",
                    path.display()
                )));
            }
        }
        if self.verbose && self.quiet {
            return Err(ResolverError::Argument(
                "--verbose and --quiet cannot be used together".to_string(),
            ));
        }
        Ok(())
    }

    /// Runtime configuration: environment defaults overridden by flags
    pub fn to_config(&self) -> Result<ResolverConfig> {
        self.apply_to(ResolverConfig::from_env())
    }

    fn apply_to(&self, mut config: ResolverConfig) -> Result<ResolverConfig> {
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent = max_concurrent;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        config.skip_tls |= self.skip_tls;
        config.verbose |= self.verbose;
        config.quiet = self.quiet;
        config.allow_unused_images = self.allow_unused_images;
        config.no_push = self.no_push;
        config.override_key = self.override_key;
        config.image_chroot = self.image_chroot.clone();

        for entry in &self.registry_auth {
            let (registry, auth) = AuthConfig::parse_registry_auth(entry)?;
            config.registry_auth.insert(registry, auth);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT_SECS};

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["k8s-image-resolver", "--template", "deploy.yaml"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.max_concurrent, None);
        let config = args.apply_to(ResolverConfig::default()).unwrap();
        assert_eq!(config.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT_SECS);
        assert_eq!(args.override_key, OverrideKey::Original);
        assert!(args.image_specs.is_empty());
        assert!(!args.allow_unused_images);
    }

    #[test]
    fn test_repeated_flags() {
        let args = parse(&[
            "--image-spec",
            "name=a:v1;tarball=a.tar",
            "--image-spec",
            "name=b:v1;tarball=b.tar",
            "--stamp-info-file",
            "stable.txt",
            "--override-key",
            "published",
        ]);
        assert_eq!(args.image_specs.len(), 2);
        assert_eq!(args.stamp_info_files, [PathBuf::from("stable.txt")]);
        assert_eq!(args.override_key, OverrideKey::Published);
    }

    #[test]
    fn test_to_config_applies_flags() {
        let args = parse(&[
            "--registry-auth",
            "gcr.io=me:secret",
            "--image-chroot",
            "gcr.io/ci",
            "--no-push",
        ]);
        let config = args.to_config().unwrap();
        assert!(config.no_push);
        assert_eq!(config.image_chroot.as_deref(), Some("gcr.io/ci"));
        assert_eq!(config.registry_auth["gcr.io"].username, "me");
    }

    #[test]
    fn test_explicit_default_value_beats_environment() {
        let environment = ResolverConfig {
            max_concurrent: 8,
            timeout: 60,
            ..ResolverConfig::default()
        };

        let args = parse(&["--max-concurrent", "32", "--timeout", "300"]);
        let config = args.apply_to(environment.clone()).unwrap();
        assert_eq!(config.max_concurrent, 32);
        assert_eq!(config.timeout, 300);

        let config = parse(&[]).apply_to(environment).unwrap();
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.timeout, 60);
    }

    #[test]
    fn test_bad_registry_auth_rejected() {
        let args = parse(&["--registry-auth", "gcr.io"]);
        assert!(matches!(args.to_config(), Err(ResolverError::Argument(_))));
    }

    #[test]
    fn test_missing_template_rejected() {
        let args = parse(&[]);
        assert!(args.validate().is_err());
    }
}
