//! Authentication challenges and token exchange for registry access

use crate::error::{ResolverError, Result};
use crate::logging::Logger;
use crate::registry::Credentials;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// A parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
    Basic,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Parse `Bearer realm="...",service="...",scope="..."` or `Basic realm="..."`
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, params_str) = header.split_once(' ').unwrap_or((header, ""));

    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let params = parse_params(params_str);
    let realm = params.get("realm")?.to_string();
    Some(Challenge::Bearer {
        realm,
        service: params.get("service").map(|s| s.to_string()),
        scope: params.get("scope").map(|s| s.to_string()),
    })
}

// Quoted values may themselves contain commas (e.g. multi-action scopes)
fn parse_params(params_str: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = params_str.trim();

    while !rest.is_empty() {
        let Some(eq_pos) = rest.find('=') else { break };
        let key = rest[..eq_pos].trim().trim_start_matches(',').trim().to_lowercase();
        rest = rest[eq_pos + 1..].trim_start();

        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            value = quoted[..end].to_string();
            rest = quoted.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = &rest[end..];
        }
        rest = rest.trim_start().trim_start_matches(',').trim_start();
        params.insert(key, value);
    }

    params
}

/// Exchanges credentials for bearer tokens, caching them for the run
#[derive(Debug)]
pub struct TokenAuthenticator {
    client: Client,
    logger: Logger,
    tokens: Mutex<HashMap<String, String>>,
}

impl TokenAuthenticator {
    pub fn new(client: Client, logger: Logger) -> Self {
        Self {
            client,
            logger,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub async fn bearer_token(
        &self,
        realm: &str,
        service: Option<&str>,
        scope: &str,
        credentials: &Credentials,
    ) -> Result<String> {
        let cache_key = format!("{}|{}|{}", realm, service.unwrap_or_default(), scope);
        if let Some(token) = self.tokens.lock().await.get(&cache_key) {
            return Ok(token.clone());
        }

        let mut url = url::Url::parse(realm)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = service {
                query.append_pair("service", service);
            }
            query.append_pair("scope", scope);
        }

        self.logger
            .detail(&format!("Requesting token for scope {} from {}", scope, realm));

        let mut request = self.client.get(url);
        if let Credentials::Basic { username, password } = credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(match status.as_u16() {
                401 => ResolverError::Auth(format!("Invalid credentials for {}", scope)),
                403 => ResolverError::Auth(format!("Access denied for {}", scope)),
                _ => ResolverError::Auth(format!(
                    "Token request for {} failed (status {}): {}",
                    scope, status, error_text
                )),
            });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ResolverError::Auth(format!("Failed to parse token response: {}", e)))?;
        let token = token_response
            .token
            .or(token_response.access_token)
            .ok_or_else(|| {
                ResolverError::Auth(format!("Token response for {} carried no token", scope))
            })?;

        self.logger
            .detail(&format!("Token obtained (length: {} chars)", token.len()));
        self.tokens.lock().await.insert(cache_key, token.clone());
        Ok(token)
    }
}
