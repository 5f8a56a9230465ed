use crate::fetch::Fetcher;
use crate::model::{Cursors, DriverKind, OutcomeStatus, QueryParams, RunReport, Stage};
use crate::sink::Sink;
use chrono::{DateTime, Days, NaiveDate, Utc};
use ingest_core::endpoint::{CURSOR_FORMAT, DATE_FORMAT};
use ingest_core::telemetry::ENDPOINT_SKIPPED_TOTAL;
use ingest_core::{record_metric, Endpoint, Error};
use tracing::{info, instrument, warn};

/// How far back an incremental run reaches for an endpoint with no cursor.
const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Drives fetch → persist over every configured endpoint, one at a time and
/// in configuration order. Failures stay local to an endpoint cycle.
pub struct Runner {
    endpoints: Vec<Endpoint>,
    fetcher: Fetcher,
    sink: Sink,
}

impl Runner {
    pub fn new(endpoints: Vec<Endpoint>, fetcher: Fetcher, sink: Sink) -> Self {
        Self {
            endpoints,
            fetcher,
            sink,
        }
    }

    /// Initial cursors taken from each endpoint's configured `last_run`.
    pub fn seed_cursors(&self) -> Cursors {
        self.endpoints
            .iter()
            .filter_map(|e| e.last_run.map(|ts| (e.name.clone(), ts)))
            .collect()
    }

    #[instrument(skip(self))]
    pub async fn run_batch(&self) -> RunReport {
        let mut report = RunReport::new(DriverKind::Batch);
        info!(run_id = %report.run_id, endpoints = self.endpoints.len(), "Starting batch ingestion");

        for endpoint in &self.endpoints {
            let status = self.cycle(endpoint, None).await;
            report.record(&endpoint.name, None, status);
        }

        finish(report)
    }

    #[instrument(skip(self))]
    pub async fn run_historical(&self) -> RunReport {
        self.run_historical_until(Utc::now().date_naive()).await
    }

    /// Backfill with `today` as the default `end_date`.
    pub async fn run_historical_until(&self, today: NaiveDate) -> RunReport {
        let mut report = RunReport::new(DriverKind::Historical);
        info!(run_id = %report.run_id, endpoints = self.endpoints.len(), "Starting historical ingestion");

        for endpoint in &self.endpoints {
            let Some(start) = endpoint.start_date else {
                warn!(endpoint = %endpoint.name, "No start_date configured, skipping backfill");
                record_metric!(counter, ENDPOINT_SKIPPED_TOTAL, 1, "endpoint" = endpoint.name.clone());
                report.record(
                    &endpoint.name,
                    None,
                    OutcomeStatus::Skipped {
                        reason: "start_date is not configured".to_string(),
                    },
                );
                continue;
            };
            let end = endpoint.end_date.unwrap_or(today);

            info!(endpoint = %endpoint.name, start = %start, end = %end, "Backfilling endpoint");

            let mut date = start;
            while date <= end {
                let params =
                    QueryParams::from([("date".to_string(), date.format(DATE_FORMAT).to_string())]);
                let status = self.cycle(endpoint, Some(&params)).await;
                let unsupported = matches!(status, OutcomeStatus::Skipped { .. });
                report.record(&endpoint.name, Some(date), status);

                // the remaining dates would be skipped for the same reason
                if unsupported {
                    break;
                }

                let Some(next) = date.checked_add_days(Days::new(1)) else {
                    break;
                };
                date = next;
            }
        }

        finish(report)
    }

    /// Fetches everything since each endpoint's cursor. Returns the report and
    /// the cursors to use next time; a cursor only advances when the cycle
    /// persisted data.
    #[instrument(skip(self, cursors))]
    pub async fn run_incremental(&self, mut cursors: Cursors) -> (RunReport, Cursors) {
        let mut report = RunReport::new(DriverKind::Incremental);
        info!(run_id = %report.run_id, endpoints = self.endpoints.len(), "Starting incremental ingestion");

        for endpoint in &self.endpoints {
            let started = Utc::now();
            let since = cursors
                .get(&endpoint.name)
                .copied()
                .or(endpoint.last_run)
                .unwrap_or(started - chrono::Duration::hours(DEFAULT_LOOKBACK_HOURS));

            let params = QueryParams::from([("since".to_string(), format_cursor(since))]);
            let status = self.cycle(endpoint, Some(&params)).await;

            if matches!(status, OutcomeStatus::Persisted { .. }) {
                cursors.insert(endpoint.name.clone(), started);
            }
            report.record(&endpoint.name, None, status);
        }

        (finish(report), cursors)
    }

    /// One fetch and, when there is data, one persist.
    async fn cycle(&self, endpoint: &Endpoint, params: Option<&QueryParams>) -> OutcomeStatus {
        let payload = match self.fetcher.fetch(endpoint, params).await {
            Ok(Some(payload)) if !payload.is_empty() => payload,
            Ok(_) => return OutcomeStatus::NoData,
            Err(Error::UnsupportedAuth { auth_type }) => {
                warn!(
                    endpoint = %endpoint.name,
                    auth_type = %auth_type,
                    "Unsupported authentication type, skipping endpoint"
                );
                record_metric!(counter, ENDPOINT_SKIPPED_TOTAL, 1, "endpoint" = endpoint.name.clone());
                return OutcomeStatus::Skipped {
                    reason: format!("unsupported auth_type '{}'", auth_type),
                };
            }
            Err(e) => {
                warn!(endpoint = %endpoint.name, error = %e, "Fetch failed");
                return OutcomeStatus::Failed {
                    stage: Stage::Fetch,
                    error: e.to_string(),
                };
            }
        };

        info!(
            endpoint = %endpoint.name,
            records = payload.record_count(),
            "Processing data from {}",
            endpoint.name
        );

        match self.sink.persist(&endpoint.name, &payload).await {
            Ok(key) => OutcomeStatus::Persisted { key },
            Err(e) => OutcomeStatus::Failed {
                stage: Stage::Persist,
                error: e.to_string(),
            },
        }
    }
}

fn format_cursor(ts: DateTime<Utc>) -> String {
    ts.format(CURSOR_FORMAT).to_string()
}

fn finish(report: RunReport) -> RunReport {
    let report = report.finish();
    info!(
        run_id = %report.run_id,
        driver = %report.driver,
        persisted = report.persisted(),
        no_data = report.no_data(),
        skipped = report.skipped(),
        failed = report.failed(),
        "Ingestion run finished"
    );
    report
}
