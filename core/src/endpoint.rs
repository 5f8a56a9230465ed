use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Timestamp layout used for `last_run` markers and the incremental `since` parameter.
pub const CURSOR_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Date layout used for `start_date`/`end_date` and the backfill `date` parameter.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One entry of the `endpoints` table, as written in the configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub url: String,
    pub auth_type: String,
    #[serde(default)]
    pub auth_params: BTreeMap<String, String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub last_run: Option<String>,
}

/// A validated endpoint. Built once at load time from an [`EndpointConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub name: String,
    pub url: Url,
    pub credentials: Credentials,
    pub format: ResponseFormat,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Clone, PartialEq)]
pub enum Credentials {
    Basic {
        username: String,
        password: String,
    },
    OAuth2ClientCredentials {
        client_id: String,
        client_secret: String,
        token_url: Url,
    },
    ApiKeyHeader {
        header: String,
        token: String,
    },
    ApiKeyQuery {
        param: String,
        token: String,
    },
    /// Unknown `auth_type`; the endpoint is skipped at run time.
    Unsupported {
        auth_type: String,
    },
}

impl Credentials {
    pub fn kind(&self) -> &str {
        match self {
            Credentials::Basic { .. } => "basic",
            Credentials::OAuth2ClientCredentials { .. } => "oauth2",
            Credentials::ApiKeyHeader { .. } | Credentials::ApiKeyQuery { .. } => "apikey",
            Credentials::Unsupported { auth_type } => auth_type.as_str(),
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::OAuth2ClientCredentials {
                client_id,
                token_url,
                ..
            } => f
                .debug_struct("OAuth2ClientCredentials")
                .field("client_id", client_id)
                .field("token_url", &token_url.as_str())
                .finish_non_exhaustive(),
            Credentials::ApiKeyHeader { header, .. } => f
                .debug_struct("ApiKeyHeader")
                .field("header", header)
                .finish_non_exhaustive(),
            Credentials::ApiKeyQuery { param, .. } => f
                .debug_struct("ApiKeyQuery")
                .field("param", param)
                .finish_non_exhaustive(),
            Credentials::Unsupported { auth_type } => f
                .debug_struct("Unsupported")
                .field("auth_type", auth_type)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Xml,
    Unsupported(String),
}

impl ResponseFormat {
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some("json") => ResponseFormat::Json,
            Some("xml") => ResponseFormat::Xml,
            Some(other) => ResponseFormat::Unsupported(other.to_string()),
            None => ResponseFormat::Unsupported(String::new()),
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseFormat::Json => write!(f, "json"),
            ResponseFormat::Xml => write!(f, "xml"),
            ResponseFormat::Unsupported(name) if name.is_empty() => write!(f, "<none>"),
            ResponseFormat::Unsupported(name) => write!(f, "{}", name),
        }
    }
}

impl EndpointConfig {
    /// Validates the raw entry into a typed [`Endpoint`]. Returns a message
    /// describing the first problem found.
    pub fn validate(&self, name: &str) -> Result<Endpoint, String> {
        if name.is_empty() || name.contains('/') {
            return Err(format!(
                "endpoint name '{}' must be non-empty and must not contain '/'",
                name
            ));
        }

        let url = Url::parse(&self.url)
            .map_err(|e| format!("endpoints.{}.url '{}' is invalid: {}", name, self.url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "endpoints.{}.url must use http or https, got '{}'",
                name,
                url.scheme()
            ));
        }

        let credentials = self.credentials(name)?;

        let start_date = parse_date(name, "start_date", self.start_date.as_deref())?;
        let end_date = parse_date(name, "end_date", self.end_date.as_deref())?;
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(format!(
                    "endpoints.{}.start_date {} is after end_date {}",
                    name, start, end
                ));
            }
        }

        let last_run = match self.last_run.as_deref() {
            Some(raw) => Some(parse_cursor(raw).ok_or_else(|| {
                format!(
                    "endpoints.{}.last_run '{}' is not a timestamp (expected {} or RFC 3339)",
                    name, raw, CURSOR_FORMAT
                )
            })?),
            None => None,
        };

        Ok(Endpoint {
            name: name.to_string(),
            url,
            credentials,
            format: ResponseFormat::from_name(self.format.as_deref()),
            start_date,
            end_date,
            last_run,
        })
    }

    fn credentials(&self, name: &str) -> Result<Credentials, String> {
        let param = |key: &str| -> Result<String, String> {
            self.auth_params
                .get(key)
                .cloned()
                .ok_or_else(|| {
                    format!(
                        "endpoints.{}.auth_params.{} is required for auth_type '{}'",
                        name, key, self.auth_type
                    )
                })
        };

        match self.auth_type.as_str() {
            "basic" => Ok(Credentials::Basic {
                username: param("username")?,
                password: param("password")?,
            }),
            "oauth2" => {
                let raw_token_url = param("token_url")?;
                let token_url = Url::parse(&raw_token_url).map_err(|e| {
                    format!(
                        "endpoints.{}.auth_params.token_url '{}' is invalid: {}",
                        name, raw_token_url, e
                    )
                })?;
                Ok(Credentials::OAuth2ClientCredentials {
                    client_id: param("client_id")?,
                    client_secret: param("client_secret")?,
                    token_url,
                })
            }
            "apikey" => {
                let header = self.auth_params.get("header_key");
                let query = self.auth_params.get("query_param");
                match (header, query) {
                    (Some(header), None) => Ok(Credentials::ApiKeyHeader {
                        header: header.clone(),
                        token: param("token")?,
                    }),
                    (None, Some(query)) => Ok(Credentials::ApiKeyQuery {
                        param: query.clone(),
                        token: param("token")?,
                    }),
                    (Some(_), Some(_)) => Err(format!(
                        "endpoints.{}.auth_params must set only one of header_key or query_param",
                        name
                    )),
                    (None, None) => Err(format!(
                        "endpoints.{}.auth_params must set header_key or query_param for apikey auth",
                        name
                    )),
                }
            }
            other => Ok(Credentials::Unsupported {
                auth_type: other.to_string(),
            }),
        }
    }
}

fn parse_date(name: &str, field: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, String> {
    raw.map(|value| {
        NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| {
            format!(
                "endpoints.{}.{} '{}' is not a YYYY-MM-DD date: {}",
                name, field, value, e
            )
        })
    })
    .transpose()
}

/// Parses a cursor value written either as `YYYY-MM-DDTHH:MM:SS` (taken as UTC)
/// or as RFC 3339.
pub fn parse_cursor(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, CURSOR_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn entry(auth_type: &str, params: &[(&str, &str)]) -> EndpointConfig {
        EndpointConfig {
            url: "https://api.example.com/v1/items".to_string(),
            auth_type: auth_type.to_string(),
            auth_params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            format: Some("json".to_string()),
            start_date: None,
            end_date: None,
            last_run: None,
        }
    }

    #[test]
    fn basic_requires_username_and_password() {
        let ok = entry("basic", &[("username", "u"), ("password", "p")])
            .validate("items")
            .unwrap();
        assert_eq!(
            ok.credentials,
            Credentials::Basic {
                username: "u".into(),
                password: "p".into()
            }
        );

        let err = entry("basic", &[("username", "u")]).validate("items").unwrap_err();
        assert!(err.contains("auth_params.password"), "{}", err);
    }

    #[test]
    fn oauth2_requires_valid_token_url() {
        let err = entry(
            "oauth2",
            &[("client_id", "id"), ("client_secret", "s"), ("token_url", "not a url")],
        )
        .validate("items")
        .unwrap_err();
        assert!(err.contains("token_url"), "{}", err);

        let ok = entry(
            "oauth2",
            &[
                ("client_id", "id"),
                ("client_secret", "s"),
                ("token_url", "https://auth.example.com/token"),
            ],
        )
        .validate("items")
        .unwrap();
        assert_eq!(ok.credentials.kind(), "oauth2");
    }

    #[test]
    fn apikey_needs_exactly_one_shape() {
        let header = entry("apikey", &[("header_key", "X-Api-Key"), ("token", "t")])
            .validate("items")
            .unwrap();
        assert_eq!(
            header.credentials,
            Credentials::ApiKeyHeader {
                header: "X-Api-Key".into(),
                token: "t".into()
            }
        );

        let query = entry("apikey", &[("query_param", "api_key"), ("token", "t")])
            .validate("items")
            .unwrap();
        assert_eq!(
            query.credentials,
            Credentials::ApiKeyQuery {
                param: "api_key".into(),
                token: "t".into()
            }
        );

        assert!(entry("apikey", &[("token", "t")]).validate("items").is_err());
        assert!(entry(
            "apikey",
            &[("header_key", "X"), ("query_param", "k"), ("token", "t")]
        )
        .validate("items")
        .is_err());
        assert!(entry("apikey", &[("header_key", "X")]).validate("items").is_err());
    }

    #[test]
    fn unknown_auth_type_is_kept_as_unsupported() {
        let endpoint = entry("kerberos", &[]).validate("items").unwrap();
        assert_eq!(
            endpoint.credentials,
            Credentials::Unsupported {
                auth_type: "kerberos".into()
            }
        );
    }

    #[test]
    fn dates_and_cursor_are_parsed() {
        let mut raw = entry("basic", &[("username", "u"), ("password", "p")]);
        raw.start_date = Some("2024-01-01".into());
        raw.end_date = Some("2024-01-03".into());
        raw.last_run = Some("2024-01-02T10:30:00".into());

        let endpoint = raw.validate("items").unwrap();
        assert_eq!(endpoint.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(endpoint.end_date, NaiveDate::from_ymd_opt(2024, 1, 3));
        assert_eq!(
            endpoint.last_run,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 10, 30, 0).unwrap())
        );
    }

    #[test]
    fn rejects_inverted_date_range() {
        let mut raw = entry("basic", &[("username", "u"), ("password", "p")]);
        raw.start_date = Some("2024-02-01".into());
        raw.end_date = Some("2024-01-01".into());
        assert!(raw.validate("items").is_err());
    }

    #[test]
    fn rejects_names_that_break_object_keys() {
        let raw = entry("basic", &[("username", "u"), ("password", "p")]);
        assert!(raw.validate("a/b").is_err());
        assert!(raw.validate("").is_err());
    }

    #[test]
    fn format_names() {
        assert_eq!(ResponseFormat::from_name(Some("json")), ResponseFormat::Json);
        assert_eq!(ResponseFormat::from_name(Some("xml")), ResponseFormat::Xml);
        assert_eq!(
            ResponseFormat::from_name(Some("csv")),
            ResponseFormat::Unsupported("csv".into())
        );
        assert_eq!(ResponseFormat::from_name(None).to_string(), "<none>");
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = Credentials::Basic {
            username: "u".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn cursor_accepts_rfc3339() {
        assert_eq!(
            parse_cursor("2024-01-02T10:30:00+02:00"),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 8, 30, 0).unwrap())
        );
        assert_eq!(parse_cursor("yesterday"), None);
    }
}
