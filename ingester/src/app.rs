use crate::fetch::Fetcher;
use crate::model::{Cursors, RunReport};
use crate::runner::Runner;
use crate::sink::{S3Store, Sink};
use ingest_core::{Config, Result, StorageConfig};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct App {
    runner: Runner,
}

impl App {
    #[instrument(skip(config, storage))]
    pub async fn new(config: Config, storage: StorageConfig) -> Result<Self> {
        info!("Initializing application");

        let endpoints = config.endpoints()?;

        let fetcher = Fetcher::new(&config.http)?;

        let store = S3Store::new(&storage).await;
        info!(
            bucket = %storage.bucket_name,
            region = %storage.region,
            endpoints = endpoints.len(),
            "Object storage configured"
        );

        let sink = Sink::new(Arc::new(store), config.sink.clone());

        Ok(Self {
            runner: Runner::new(endpoints, fetcher, sink),
        })
    }

    pub async fn run_batch(&self) -> RunReport {
        self.runner.run_batch().await
    }

    pub async fn run_historical(&self) -> RunReport {
        self.runner.run_historical().await
    }

    /// Runs one incremental pass seeded from the configured `last_run` values.
    /// The advanced cursors are returned to the caller and not stored.
    pub async fn run_incremental(&self) -> (RunReport, Cursors) {
        let cursors = self.runner.seed_cursors();
        self.runner.run_incremental(cursors).await
    }
}
