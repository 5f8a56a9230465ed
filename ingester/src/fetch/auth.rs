use ingest_core::{Credentials, Error, Result};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, instrument};
use url::Url;

/// How one request carries its credentials.
#[derive(Clone, PartialEq)]
pub enum RequestAuth {
    Basic { username: String, password: String },
    Bearer(String),
    Header { name: String, value: String },
    Query { name: String, value: String },
}

impl fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestAuth::Basic { username, .. } => write!(f, "Basic({})", username),
            RequestAuth::Bearer(_) => write!(f, "Bearer(..)"),
            RequestAuth::Header { name, .. } => write!(f, "Header({})", name),
            RequestAuth::Query { name, .. } => write!(f, "Query({})", name),
        }
    }
}

impl RequestAuth {
    /// Attaches header-borne credentials. Query credentials are merged by the
    /// fetcher together with the call parameters.
    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            RequestAuth::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            RequestAuth::Bearer(token) => builder.bearer_auth(token),
            RequestAuth::Header { name, value } => builder.header(name.as_str(), value.as_str()),
            RequestAuth::Query { .. } => builder,
        }
    }

    pub fn query_pair(&self) -> Option<(&str, &str)> {
        match self {
            RequestAuth::Query { name, value } => Some((name.as_str(), value.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

pub struct Authenticator {
    client: Client,
}

impl Authenticator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Turns endpoint credentials into request credentials. OAuth2 endpoints
    /// negotiate a fresh bearer token on every call.
    pub async fn resolve(&self, credentials: &Credentials) -> Result<RequestAuth> {
        match credentials {
            Credentials::Basic { username, password } => Ok(RequestAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            Credentials::OAuth2ClientCredentials {
                client_id,
                client_secret,
                token_url,
            } => {
                let token = self
                    .client_credentials_token(client_id, client_secret, token_url)
                    .await?;
                Ok(RequestAuth::Bearer(token))
            }
            // "Bearer" as a header name means the standard Authorization header
            Credentials::ApiKeyHeader { header, token } if header == "Bearer" => {
                Ok(RequestAuth::Bearer(token.clone()))
            }
            Credentials::ApiKeyHeader { header, token } => Ok(RequestAuth::Header {
                name: header.clone(),
                value: token.clone(),
            }),
            Credentials::ApiKeyQuery { param, token } => Ok(RequestAuth::Query {
                name: param.clone(),
                value: token.clone(),
            }),
            Credentials::Unsupported { auth_type } => Err(Error::UnsupportedAuth {
                auth_type: auth_type.clone(),
            }),
        }
    }

    #[instrument(skip(self, client_secret, token_url), fields(token_url = %token_url))]
    async fn client_credentials_token(
        &self,
        client_id: &str,
        client_secret: &str,
        token_url: &Url,
    ) -> Result<String> {
        let oauth_error = |details: String| Error::OAuth {
            token_url: token_url.to_string(),
            details,
        };

        let response = self
            .client
            .post(token_url.clone())
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(oauth_error(format!("status {}: {}", status.as_u16(), body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| oauth_error(format!("invalid token response: {}", e)))?;

        if let Some(kind) = token.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                return Err(oauth_error(format!("unsupported token_type '{}'", kind)));
            }
        }

        debug!(client_id, "Obtained OAuth2 access token");
        Ok(token.access_token)
    }
}
