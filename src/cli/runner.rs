//! Runs one resolver invocation end to end

use crate::cli::args::Args;
use crate::config::ResolverConfig;
use crate::error::{ResolverError, Result};
use crate::image::ImageSpec;
use crate::logging::Logger;
use crate::pipeline::{self, Resolution};
use crate::publish::Publisher;
use crate::registry::{HttpRegistry, Keychain, Registry};
use crate::stamp::Stamper;
use std::io::Write;

pub struct Runner {
    args: Args,
    config: ResolverConfig,
    logger: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        let config = args.to_config()?;
        let logger = if config.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(config.verbose)
        };

        Ok(Self {
            args,
            config,
            logger,
        })
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub async fn run(&self) -> Result<()> {
        self.args.validate()?;

        let specs = self
            .args
            .image_specs
            .iter()
            .map(|spec| ImageSpec::parse(spec))
            .collect::<Result<Vec<_>>>()?;
        let stamper = if self.args.stamp_info_files.is_empty() {
            None
        } else {
            Some(Stamper::from_files(self.args.stamp_info_files.as_slice(), &self.logger)?)
        };

        let registry = self.create_registry()?;
        let resolution = self.execute(&registry, &specs, stamper).await?;
        self.write_output(&resolution.text)?;

        if !resolution.unreferenced.is_empty() {
            self.report_unreferenced(&resolution.unreferenced)?;
        }

        self.logger.success(&format!(
            "Resolved {} in {}",
            self.args.template.display(),
            self.logger.elapsed()
        ));
        Ok(())
    }

    fn create_registry(&self) -> Result<HttpRegistry> {
        let keychain = Keychain::from_environment()?;
        HttpRegistry::builder(self.logger.clone())
            .with_keychain(keychain)
            .with_explicit_auth(&self.config.registry_auth)
            .with_max_concurrent(self.config.max_concurrent)
            .with_timeout(self.config.timeout)
            .with_skip_tls(self.config.skip_tls)
            .build()
    }

    /// Publish every spec, then resolve the template against the results
    pub async fn execute(
        &self,
        registry: &dyn Registry,
        specs: &[ImageSpec],
        stamper: Option<Stamper>,
    ) -> Result<Resolution> {
        let mut overrides = Vec::new();

        if !specs.is_empty() {
            self.logger.section("Publishing images");
            let publisher = Publisher::new(registry, self.logger.clone())
                .with_chroot(self.config.image_chroot.clone())
                .with_stamper(stamper)
                .with_max_concurrent(self.config.max_concurrent)
                .with_push(!self.config.no_push);

            let results = pipeline::publish_images(&publisher, specs, &self.logger).await?;
            self.logger.summary(
                "Published images",
                &results
                    .iter()
                    .map(|r| format!("{} -> {}", r.original_name, r.digest_reference()))
                    .collect::<Vec<_>>(),
            );
            overrides = pipeline::overrides(&results, self.config.override_key);
        }

        self.logger.section("Resolving template");
        let template = tokio::fs::read_to_string(&self.args.template).await?;
        pipeline::resolve_template(registry, &template, overrides, &self.logger).await
    }

    fn write_output(&self, text: &str) -> Result<()> {
        match &self.args.output {
            Some(path) => {
                std::fs::write(path, text)?;
                self.logger
                    .info(&format!("Wrote resolved template to {}", path.display()));
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
        }
        Ok(())
    }

    /// Warn about unreferenced names, or fail with them for `main` to report
    fn report_unreferenced(&self, names: &[String]) -> Result<()> {
        if !self.config.allow_unused_images {
            return Err(ResolverError::Unreferenced(names.to_vec()));
        }

        self.logger.warning(&format!(
            "The following image references were not found in {}:\n{}",
            self.args.template.display(),
            names
                .iter()
                .map(|name| format!("    {}", name))
                .collect::<Vec<_>>()
                .join("\n")
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use clap::Parser;

    #[test]
    fn test_unused_images_allowed_only_with_flag() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("deploy.yaml");
        std::fs::write(&template, "image: gcr.io/foo/a:v1\n").unwrap();
        let template = template.to_string_lossy().to_string();

        let strict = Runner::new(
            Args::try_parse_from(["k8s-image-resolver", "--template", template.as_str(), "--quiet"]).unwrap(),
        )
        .unwrap();
        let err = strict
            .report_unreferenced(&["gcr.io/foo/b:v1".to_string()])
            .unwrap_err();
        assert!(matches!(&err, ResolverError::Unreferenced(names) if names == &["gcr.io/foo/b:v1"]));
        assert!(err.to_string().contains("gcr.io/foo/b:v1"));

        let lenient = Runner::new(
            Args::try_parse_from([
                "k8s-image-resolver",
                "--template",
                template.as_str(),
                "--quiet",
                "--allow-unused-images",
            ])
            .unwrap(),
        )
        .unwrap();
        assert!(
            lenient
                .report_unreferenced(&["gcr.io/foo/b:v1".to_string()])
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_execute_without_specs() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("deploy.yaml");
        std::fs::write(&template, "replicas: 3\nname: web\n").unwrap();
        let template = template.to_string_lossy().to_string();

        let runner = Runner::new(
            Args::try_parse_from(["k8s-image-resolver", "--template", template.as_str(), "--quiet"]).unwrap(),
        )
        .unwrap();
        let registry = InMemoryRegistry::new();
        let resolution = runner.execute(&registry, &[], None).await.unwrap();

        assert_eq!(resolution.text, "replicas: 3\nname: web\n");
        assert!(resolution.unreferenced.is_empty());
    }
}
