use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Extra query parameters for one fetch, in insertion order.
pub type QueryParams = IndexMap<String, String>;

/// Incremental cursors (`last_run`) keyed by endpoint name.
pub type Cursors = IndexMap<String, DateTime<Utc>>;

/// Decoded response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Json(serde_json::Value),
    /// Raw XML text, passed through unparsed.
    Text(String),
}

impl Payload {
    /// True when the payload carries nothing worth storing.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Json(serde_json::Value::Null) => true,
            Payload::Json(serde_json::Value::Array(items)) => items.is_empty(),
            Payload::Json(serde_json::Value::Object(fields)) => fields.is_empty(),
            Payload::Json(serde_json::Value::String(s)) | Payload::Text(s) => s.is_empty(),
            Payload::Json(serde_json::Value::Bool(b)) => !b,
            Payload::Json(serde_json::Value::Number(n)) => n.as_f64() == Some(0.0),
        }
    }

    /// Number of top-level records, for log output.
    pub fn record_count(&self) -> usize {
        match self {
            Payload::Json(serde_json::Value::Array(items)) => items.len(),
            Payload::Json(serde_json::Value::Object(fields)) => fields.len(),
            Payload::Text(text) => text.len(),
            Payload::Json(_) => 1,
        }
    }

    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Batch,
    Historical,
    Incremental,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Batch => write!(f, "batch"),
            DriverKind::Historical => write!(f, "historical"),
            DriverKind::Incremental => write!(f, "incremental"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Persist,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Persisted { key: String },
    NoData,
    Skipped { reason: String },
    Failed { stage: Stage, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointOutcome {
    pub endpoint: String,
    /// Backfill date, for historical runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub driver: DriverKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcomes: Vec<EndpointOutcome>,
}

impl RunReport {
    pub fn new(driver: DriverKind) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            driver,
            started_at: Utc::now(),
            finished_at: None,
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, endpoint: &str, date: Option<NaiveDate>, status: OutcomeStatus) {
        self.outcomes.push(EndpointOutcome {
            endpoint: endpoint.to_string(),
            date,
            status,
        });
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn persisted(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Persisted { .. }))
    }

    pub fn no_data(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::NoData))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&OutcomeStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}
