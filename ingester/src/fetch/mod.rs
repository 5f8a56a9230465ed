pub mod auth;

use crate::model::{Payload, QueryParams};
use auth::{Authenticator, RequestAuth};
use ingest_core::config::HttpConfig;
use ingest_core::telemetry::{FETCH_DURATION, FETCH_TOTAL};
use ingest_core::{record_metric, Endpoint, Result, ResponseFormat};
use reqwest::{Client, Request, StatusCode};
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Issues one authenticated GET per call and decodes the body per the
/// endpoint's declared format.
pub struct Fetcher {
    client: Client,
    authenticator: Authenticator,
}

impl Fetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self::with_client(client))
    }

    fn with_client(client: Client) -> Self {
        Self {
            authenticator: Authenticator::new(client.clone()),
            client,
        }
    }

    /// Builds the GET for `endpoint`: credentials attached, auth query parameter
    /// and `params` merged. On a key collision `params` wins.
    pub async fn build_request(
        &self,
        endpoint: &Endpoint,
        params: Option<&QueryParams>,
    ) -> Result<Request> {
        let auth = self.authenticator.resolve(&endpoint.credentials).await?;
        let query = merge_query(&endpoint.name, &auth, params);

        let mut builder = self.client.get(endpoint.url.clone());
        builder = auth.apply(builder);
        if !query.is_empty() {
            builder = builder.query(&query);
        }

        Ok(builder.build()?)
    }

    /// Fetches `endpoint` once. `Ok(None)` means no data this cycle: a status
    /// other than 200, or a format this client does not decode.
    #[instrument(skip(self, endpoint, params), fields(endpoint = %endpoint.name))]
    pub async fn fetch(
        &self,
        endpoint: &Endpoint,
        params: Option<&QueryParams>,
    ) -> Result<Option<Payload>> {
        let request = self.build_request(endpoint, params).await?;
        let url = request.url().clone();

        let started = Instant::now();
        let response = self.client.execute(request).await;
        record_metric!(
            histogram,
            FETCH_DURATION,
            started.elapsed().as_secs_f64(),
            "endpoint" = endpoint.name.clone()
        );

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                record_metric!(counter, FETCH_TOTAL, 1, "endpoint" = endpoint.name.clone(), "outcome" = "transport_error");
                return Err(e.into());
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            warn!(
                url = %redact(&url, endpoint),
                status = status.as_u16(),
                "Error fetching data"
            );
            record_metric!(counter, FETCH_TOTAL, 1, "endpoint" = endpoint.name.clone(), "outcome" = "bad_status");
            return Ok(None);
        }

        let payload = match &endpoint.format {
            ResponseFormat::Json => Some(Payload::Json(serde_json::from_slice(
                &response.bytes().await?,
            )?)),
            ResponseFormat::Xml => Some(Payload::Text(response.text().await?)),
            ResponseFormat::Unsupported(format) => {
                warn!(format = %format, "Response format not handled, discarding body");
                None
            }
        };

        debug!(
            status = status.as_u16(),
            decoded = payload.is_some(),
            "Fetched endpoint"
        );
        record_metric!(counter, FETCH_TOTAL, 1, "endpoint" = endpoint.name.clone(), "outcome" = "ok");
        Ok(payload)
    }
}

fn merge_query(endpoint: &str, auth: &RequestAuth, params: Option<&QueryParams>) -> QueryParams {
    let mut query = QueryParams::new();
    if let Some((name, value)) = auth.query_pair() {
        query.insert(name.to_string(), value.to_string());
    }

    for (key, value) in params.into_iter().flatten() {
        if query.insert(key.clone(), value.clone()).is_some() {
            warn!(
                endpoint,
                param = %key,
                "Query parameter overrides the API key parameter of the same name"
            );
        }
    }

    query
}

// Keeps API keys passed as query parameters out of the logs.
fn redact(url: &url::Url, endpoint: &Endpoint) -> String {
    let ingest_core::Credentials::ApiKeyQuery { param, .. } = &endpoint.credentials else {
        return url.to_string();
    };

    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == param.as_str() { "***".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
