// Docker Registry HTTP API v2 implementation of the `Registry` capability:
// manifest lookup by tag, monolithic blob upload and manifest commit, with
// bearer/basic challenge handling shared by every request.

use crate::config::{AuthConfig, DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT_SECS};
use crate::digest::DigestUtils;
use crate::error::{ResolverError, Result};
use crate::logging::Logger;
use crate::reference::{DEFAULT_REGISTRY, Repository, Tag};
use crate::registry::auth::{Challenge, TokenAuthenticator, parse_challenge};
use crate::registry::{Credentials, Keychain, ManifestSchema, Registry, RemoteManifest};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";
const DOCKER_HUB_API: &str = "https://registry-1.docker.io";

#[derive(Debug, Clone)]
enum Authorization {
    Bearer(String),
    Basic(String, String),
}

pub struct HttpRegistryBuilder {
    keychain: Keychain,
    max_concurrent: usize,
    timeout: u64,
    skip_tls: bool,
    logger: Logger,
}

impl HttpRegistryBuilder {
    pub fn new(logger: Logger) -> Self {
        Self {
            keychain: Keychain::new(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout: DEFAULT_TIMEOUT_SECS,
            skip_tls: false,
            logger,
        }
    }

    pub fn with_keychain(mut self, keychain: Keychain) -> Self {
        self.keychain = keychain;
        self
    }

    pub fn with_explicit_auth(mut self, auths: &HashMap<String, AuthConfig>) -> Self {
        for (registry, auth) in auths {
            self.keychain = self.keychain.with_explicit(registry, auth.clone());
        }
        self
    }

    /// Size of the idle connection pool kept per registry host
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_skip_tls(mut self, skip_tls: bool) -> Self {
        self.skip_tls = skip_tls;
        self
    }

    pub fn build(self) -> Result<HttpRegistry> {
        let mut builder = Client::builder()
            .pool_max_idle_per_host(self.max_concurrent)
            .timeout(Duration::from_secs(self.timeout));
        if self.skip_tls {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }
        let client = builder.build()?;

        Ok(HttpRegistry {
            auth: TokenAuthenticator::new(client.clone(), self.logger.clone()),
            client,
            keychain: self.keychain,
            logger: self.logger,
            authorizations: Mutex::new(HashMap::new()),
        })
    }
}

pub struct HttpRegistry {
    client: Client,
    keychain: Keychain,
    auth: TokenAuthenticator,
    logger: Logger,
    authorizations: Mutex<HashMap<String, Authorization>>,
}

impl HttpRegistry {
    pub fn builder(logger: Logger) -> HttpRegistryBuilder {
        HttpRegistryBuilder::new(logger)
    }

    /// Send a request built by `build`, answering one authentication
    /// challenge if the registry issues it.
    async fn send<F>(
        &self,
        repository: &Repository,
        credentials: &Credentials,
        actions: &str,
        build: F,
    ) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let key = format!("{}|{}", repository, actions);
        let cached = self.authorizations.lock().await.get(&key).cloned();

        let response = authorize(build(&self.client), cached.as_ref()).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let header = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let authorization = match header.as_deref().and_then(parse_challenge) {
            Some(Challenge::Bearer { realm, service, .. }) => {
                let scope = format!("repository:{}:{}", repository.repository(), actions);
                let token = self
                    .auth
                    .bearer_token(&realm, service.as_deref(), &scope, credentials)
                    .await?;
                Authorization::Bearer(token)
            }
            Some(Challenge::Basic) => match credentials {
                Credentials::Basic { username, password } => {
                    Authorization::Basic(username.clone(), password.clone())
                }
                Credentials::Anonymous => {
                    return Err(ResolverError::Auth(format!(
                        "{} requires credentials but none were found",
                        repository.registry()
                    )));
                }
            },
            None => {
                return Err(ResolverError::Auth(format!(
                    "{} rejected the request without a usable challenge",
                    repository.registry()
                )));
            }
        };

        let retry = authorize(build(&self.client), Some(&authorization))
            .send()
            .await?;
        if matches!(
            retry.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(ResolverError::Auth(format!(
                "Access to {} denied (status {})",
                repository,
                retry.status()
            )));
        }

        self.authorizations.lock().await.insert(key, authorization);
        Ok(retry)
    }

    async fn status_error(response: Response, operation: &str) -> ResolverError {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());

        match status.as_u16() {
            401 => ResolverError::Auth(format!(
                "Unauthorized to perform {}: {}",
                operation, error_text
            )),
            403 => ResolverError::Auth(format!(
                "Forbidden: insufficient permissions for {}: {}",
                operation, error_text
            )),
            429 => ResolverError::Registry(format!(
                "Rate limited during {}: {}",
                operation, error_text
            )),
            500 => ResolverError::Registry(format!(
                "Registry server error during {}: {}",
                operation, error_text
            )),
            502 | 503 => ResolverError::Registry(format!(
                "Registry unavailable for {}: {}",
                operation, error_text
            )),
            _ => ResolverError::Registry(format!(
                "{} failed (status {}): {}",
                operation, status, error_text
            )),
        }
    }
}

fn authorize(request: RequestBuilder, authorization: Option<&Authorization>) -> RequestBuilder {
    match authorization {
        Some(Authorization::Bearer(token)) => request.bearer_auth(token),
        Some(Authorization::Basic(username, password)) => {
            request.basic_auth(username, Some(password))
        }
        None => request,
    }
}

/// Base URL of the registry API for a registry name
pub fn registry_base_url(registry: &str) -> String {
    if registry == DEFAULT_REGISTRY {
        return DOCKER_HUB_API.to_string();
    }

    let host = registry.split(':').next().unwrap_or(registry);
    if host == "localhost" || host.starts_with("127.") {
        format!("http://{}", registry)
    } else {
        format!("https://{}", registry)
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn resolve_credentials(&self, repository: &Repository) -> Result<Credentials> {
        let credentials = self.keychain.resolve(repository.registry())?;
        self.logger.detail(&format!(
            "Using {} credentials for {}",
            if credentials.is_anonymous() {
                "anonymous"
            } else {
                "configured"
            },
            repository.registry()
        ));
        Ok(credentials)
    }

    async fn fetch_manifest(
        &self,
        tag: &Tag,
        credentials: &Credentials,
        schema: ManifestSchema,
    ) -> Result<Option<RemoteManifest>> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            registry_base_url(tag.registry()),
            tag.repository(),
            tag.tag()
        );
        let accept = schema.accept_header();
        self.logger
            .detail(&format!("Fetching {} manifest: {}", schema, url));

        let response = self
            .send(tag.context(), credentials, "pull", |client| {
                client.get(&url).header(ACCEPT, &accept)
            })
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response, &format!("manifest fetch for {}", tag)).await);
        }

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or_default().trim().to_string())
            .unwrap_or_default();

        // Registries that cannot serve the requested schema fall back to schema 1
        if !media_type.is_empty() && !schema.accepts(&media_type) {
            self.logger.detail(&format!(
                "{} served {} for a {} request",
                tag, media_type, schema
            ));
            return Ok(None);
        }

        let header_digest = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        let digest = match header_digest {
            Some(digest) => DigestUtils::normalize_digest(&digest).map_err(|_| {
                ResolverError::Registry(format!(
                    "{} returned an invalid digest header '{}'",
                    tag, digest
                ))
            })?,
            None => DigestUtils::compute_docker_digest(&body),
        };

        Ok(Some(RemoteManifest {
            digest,
            media_type,
            body,
        }))
    }

    async fn upload_blob(
        &self,
        repository: &Repository,
        credentials: &Credentials,
        digest: &str,
        data: &[u8],
    ) -> Result<()> {
        let base = registry_base_url(repository.registry());
        let blob_url = format!("{}/v2/{}/blobs/{}", base, repository.repository(), digest);

        let existing = self
            .send(repository, credentials, "pull,push", |client| {
                client.head(&blob_url)
            })
            .await?;
        if existing.status().is_success() {
            self.logger.detail(&format!(
                "Blob {} already exists, skipping",
                DigestUtils::format_digest_short(digest)
            ));
            return Ok(());
        }

        let start_url = format!("{}/v2/{}/blobs/uploads/", base, repository.repository());
        let started = self
            .send(repository, credentials, "pull,push", |client| {
                client.post(&start_url)
            })
            .await?;
        if !started.status().is_success() {
            return Err(Self::status_error(started, "blob upload start").await);
        }

        let location = started
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ResolverError::Upload("No Location header in upload response".to_string())
            })?;

        // Location may be relative to the registry
        let mut upload_url = url::Url::parse(&base)?.join(location)?;
        upload_url.query_pairs_mut().append_pair("digest", digest);

        let finished = self
            .send(repository, credentials, "pull,push", |client| {
                client
                    .put(upload_url.clone())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(data.to_vec())
            })
            .await?;
        if !finished.status().is_success() {
            return Err(Self::status_error(finished, "blob upload").await);
        }

        self.logger.detail(&format!(
            "Blob {} uploaded ({})",
            DigestUtils::format_digest_short(digest),
            self.logger.format_size(data.len() as u64)
        ));
        Ok(())
    }

    async fn upload_manifest(
        &self,
        tag: &Tag,
        credentials: &Credentials,
        media_type: &str,
        manifest: &[u8],
    ) -> Result<()> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            registry_base_url(tag.registry()),
            tag.repository(),
            tag.tag()
        );

        let response = self
            .send(tag.context(), credentials, "pull,push", |client| {
                client
                    .put(&url)
                    .header(CONTENT_TYPE, media_type)
                    .body(manifest.to_vec())
            })
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response, &format!("manifest upload for {}", tag)).await);
        }

        self.logger
            .detail(&format!("Manifest uploaded successfully for {}", tag));
        Ok(())
    }
}
