use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported authentication type '{auth_type}'")]
    UnsupportedAuth { auth_type: String },

    #[error("oauth2 token exchange with {token_url} failed: {details}")]
    OAuth { token_url: String, details: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error for key '{key}': {details}")]
    Storage { key: String, details: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
