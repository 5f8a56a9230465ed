use crate::endpoint::{Credentials, Endpoint, EndpointConfig, ResponseFormat};
use config::{ConfigError, Environment, File};
use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Read from the file directly rather than through the layered sources,
    /// which lowercase map keys. Names are used verbatim in object keys.
    #[serde(skip)]
    pub endpoints: IndexMap<String, EndpointConfig>,
    pub http: HttpConfig,
    pub sink: SinkConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    /// Total attempts per object write; 1 disables retries.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Object storage settings, read from the `S3_*` environment variables.
#[derive(Clone, Deserialize)]
pub struct StorageConfig {
    pub bucket_name: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .finish_non_exhaustive()
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(Environment::with_prefix("S3"))
    }

    #[cfg(test)]
    pub(crate) fn from_vars(vars: config::Map<String, String>) -> Result<Self, ConfigError> {
        Self::from_source(Environment::with_prefix("S3").source(Some(vars)))
    }

    fn from_source(env: Environment) -> Result<Self, ConfigError> {
        let storage: StorageConfig = config::Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()?;

        for (var, value) in [
            ("S3_BUCKET_NAME", &storage.bucket_name),
            ("S3_REGION", &storage.region),
            ("S3_ACCESS_KEY", &storage.access_key),
            ("S3_SECRET_KEY", &storage.secret_key),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Message(format!("{} must not be empty", var)));
            }
        }

        Ok(storage)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        // Load default configuration
        builder = builder.add_source(config::Config::try_from(&Config::default())?);

        // The endpoints file is mandatory
        if !path.exists() {
            return Err(ConfigError::Message(format!(
                "config file {} not found",
                path.display()
            )));
        }
        let endpoints = read_endpoints(path)?;
        builder = builder.add_source(File::from(path));

        // Layer on environment variables (INGEST__ prefix)
        builder = builder.add_source(
            Environment::with_prefix("INGEST")
                .separator("__")
                .try_parsing(true),
        );

        let mut settings: Config = builder.build()?.try_deserialize()?;
        settings.endpoints = endpoints;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Message(
                "at least one entry in endpoints is required".into(),
            ));
        }

        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Message(
                "http.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sink.max_retries == 0 {
            return Err(ConfigError::Message(
                "sink.max_retries must be greater than 0".into(),
            ));
        }

        self.endpoints()?;
        Ok(())
    }

    /// Typed endpoints in configuration order.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        let endpoints = self
            .endpoints
            .iter()
            .map(|(name, raw)| raw.validate(name).map_err(ConfigError::Message))
            .collect::<Result<Vec<_>, _>>()?;

        for endpoint in &endpoints {
            tracing::debug!(
                endpoint = %endpoint.name,
                auth = endpoint.credentials.kind(),
                format = %endpoint.format,
                "Endpoint configured"
            );
            if let Credentials::Unsupported { .. } = &endpoint.credentials {
                tracing::warn!(
                    endpoint = %endpoint.name,
                    auth_type = endpoint.credentials.kind(),
                    "Unsupported auth_type, endpoint will be skipped"
                );
            }
            if let ResponseFormat::Unsupported(format) = &endpoint.format {
                tracing::warn!(
                    endpoint = %endpoint.name,
                    format = %format,
                    "Unsupported response format, endpoint will yield no data"
                );
            }
        }

        Ok(endpoints)
    }
}

#[derive(Deserialize)]
struct EndpointsFile {
    #[serde(default, deserialize_with = "unique_endpoints")]
    endpoints: IndexMap<String, EndpointConfig>,
}

/// Parses the `endpoints` table of a `.json` or `.toml` file, keeping names
/// exactly as written and in document order.
fn read_endpoints(path: &Path) -> Result<IndexMap<String, EndpointConfig>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Message(format!("failed to read {}: {}", path.display(), e))
    })?;

    let parsed: EndpointsFile = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Message(format!("{}: {}", path.display(), e)))?,
        Some("toml") => toml::from_str(&raw)
            .map_err(|e| ConfigError::Message(format!("{}: {}", path.display(), e)))?,
        _ => {
            return Err(ConfigError::Message(format!(
                "config file {} must have a .json or .toml extension",
                path.display()
            )))
        }
    };

    Ok(parsed.endpoints)
}

fn unique_endpoints<'de, D>(deserializer: D) -> Result<IndexMap<String, EndpointConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EndpointTable;

    impl<'de> Visitor<'de> for EndpointTable {
        type Value = IndexMap<String, EndpointConfig>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a table of endpoints keyed by name")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut endpoints = IndexMap::new();
            while let Some((name, entry)) = access.next_entry::<String, EndpointConfig>()? {
                if endpoints.contains_key(&name) {
                    return Err(de::Error::custom(format!(
                        "endpoint '{}' is defined more than once",
                        name
                    )));
                }
                endpoints.insert(name, entry);
            }
            Ok(endpoints)
        }
    }

    deserializer.deserialize_map(EndpointTable)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: IndexMap::new(),
            http: HttpConfig {
                timeout_secs: 30,
                connect_timeout_secs: 10,
                user_agent: concat!("api-ingest/", env!("CARGO_PKG_VERSION")).to_string(),
            },
            sink: SinkConfig {
                max_retries: 1,
                retry_base_delay_ms: 500,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                log_format: LogFormat::Pretty,
                metrics_enabled: false,
                metrics_port: 9090,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_config(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_json_endpoints_in_document_order() {
        let file = write_config(
            ".json",
            r#"{
                "endpoints": {
                    "weather": {
                        "url": "https://weather.example.com/v1/obs",
                        "auth_type": "apikey",
                        "auth_params": {"query_param": "appid", "token": "t"},
                        "format": "json"
                    },
                    "alerts": {
                        "url": "https://alerts.example.com/feed",
                        "auth_type": "basic",
                        "auth_params": {"username": "u", "password": "p"},
                        "format": "xml",
                        "start_date": "2024-01-01"
                    }
                },
                "http": {"timeout_secs": 5}
            }"#,
        );

        let config = Config::load(file.path()).unwrap();
        let names: Vec<_> = config.endpoints.keys().cloned().collect();
        assert_eq!(names, vec!["weather".to_string(), "alerts".to_string()]);
        assert_eq!(config.http.timeout_secs, 5);
        // untouched sections keep their defaults
        assert_eq!(config.http.connect_timeout_secs, 10);
        assert_eq!(config.sink.max_retries, 1);

        let endpoints = config.endpoints().unwrap();
        assert_eq!(endpoints[1].format, ResponseFormat::Xml);
    }

    #[test]
    fn loads_toml() {
        let file = write_config(
            ".toml",
            r#"
            [endpoints.orders]
            url = "https://shop.example.com/orders"
            auth_type = "basic"
            format = "json"

            [endpoints.orders.auth_params]
            username = "u"
            password = "p"
            "#,
        );

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.endpoints.len(), 1);
    }

    #[test]
    fn endpoint_names_keep_their_case() {
        let file = write_config(
            ".json",
            r#"{
                "endpoints": {
                    "WeatherObs": {
                        "url": "https://weather.example.com/obs",
                        "auth_type": "apikey",
                        "auth_params": {"header_key": "X-Api-Key", "token": "t"},
                        "format": "json"
                    },
                    "api.v2": {
                        "url": "https://api.example.com/v2",
                        "auth_type": "basic",
                        "auth_params": {"username": "u", "password": "p"},
                        "format": "json"
                    }
                }
            }"#,
        );

        let config = Config::load(file.path()).unwrap();
        let names: Vec<_> = config.endpoints().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["WeatherObs".to_string(), "api.v2".to_string()]);
    }

    #[test]
    fn names_differing_only_by_case_are_distinct_endpoints() {
        let file = write_config(
            ".json",
            r#"{
                "endpoints": {
                    "Orders": {"url": "https://a.example.com", "auth_type": "basic",
                               "auth_params": {"username": "u", "password": "p"}, "format": "json"},
                    "orders": {"url": "https://b.example.com", "auth_type": "basic",
                               "auth_params": {"username": "u", "password": "p"}, "format": "xml"}
                }
            }"#,
        );

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints["Orders"].url, "https://a.example.com");
        assert_eq!(config.endpoints["orders"].url, "https://b.example.com");
    }

    #[test]
    fn toml_names_keep_their_case() {
        let file = write_config(
            ".toml",
            r#"
            [endpoints.DailySales]
            url = "https://shop.example.com/sales"
            auth_type = "basic"
            auth_params = { username = "u", password = "p" }
            "#,
        );

        let config = Config::load(file.path()).unwrap();
        assert!(config.endpoints.contains_key("DailySales"));
    }

    #[test]
    fn duplicate_endpoint_names_fail_at_load() {
        let file = write_config(
            ".json",
            r#"{
                "endpoints": {
                    "orders": {"url": "https://a.example.com", "auth_type": "kerberos"},
                    "orders": {"url": "https://b.example.com", "auth_type": "kerberos"}
                }
            }"#,
        );

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("more than once"), "{}", err);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = write_config(".yaml", "endpoints: {}\n");
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains(".json or .toml"), "{}", err);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load(Path::new("/nonexistent/ingest-config.json")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn invalid_endpoint_fails_at_load() {
        let file = write_config(
            ".json",
            r#"{"endpoints": {"broken": {"url": "https://x.example.com", "auth_type": "basic"}}}"#,
        );
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("username"), "{}", err);
    }

    #[test]
    fn empty_endpoints_fail_validation() {
        assert!(Config::default().validate().is_err());
    }

    fn vars(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn storage_requires_all_four_variables() {
        let storage = StorageConfig::from_vars(vars(&[
            ("S3_BUCKET_NAME", "landing"),
            ("S3_REGION", "eu-west-1"),
            ("S3_ACCESS_KEY", "AKIA"),
            ("S3_SECRET_KEY", "secret"),
        ]))
        .unwrap();
        assert_eq!(storage.bucket_name, "landing");
        assert_eq!(storage.endpoint_url, None);
        assert!(!format!("{:?}", storage).contains("secret"));

        let missing_region = vars(&[
            ("S3_BUCKET_NAME", "landing"),
            ("S3_ACCESS_KEY", "AKIA"),
            ("S3_SECRET_KEY", "secret"),
        ]);
        assert!(StorageConfig::from_vars(missing_region).is_err());

        let blank_region = vars(&[
            ("S3_BUCKET_NAME", "landing"),
            ("S3_REGION", " "),
            ("S3_ACCESS_KEY", "AKIA"),
            ("S3_SECRET_KEY", "secret"),
        ]);
        assert!(StorageConfig::from_vars(blank_region).is_err());
    }
}
