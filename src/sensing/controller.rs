use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    db::{Database, Run},
    settings::IngestSettings,
};

use super::{
    loop_worker::{ingest_loop, IngestPipeline, IngestStats},
    router::{DeviceTopics, RecordRouter},
};

/// Owns the background task of one ingestion session.
pub struct IngestController {
    handle: Option<JoinHandle<Result<IngestStats>>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for IngestController {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    /// Registers `run` (no-op if it already exists) and starts consuming messages for it.
    pub async fn start(&mut self, settings: IngestSettings, run: Run, db: Database) -> Result<()> {
        if self.handle.is_some() {
            bail!("ingestion already active");
        }

        if db.ensure_run(&run).await? {
            info!("Created run {}", run.run_id);
        } else {
            info!("Resuming existing run {}", run.run_id);
        }

        let topics = DeviceTopics::new(&settings.topic_prefix, &settings.device_id);
        let pipeline = IngestPipeline::new(db, RecordRouter::new(run.run_id, topics));

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(ingest_loop(settings, pipeline, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub fn cancel_token(&self) -> Option<CancellationToken> {
        self.cancel_token.clone()
    }

    /// Waits for the session to end on its own or through its cancel token.
    pub async fn wait(&mut self) -> Result<IngestStats> {
        self.cancel_token = None;
        match self.handle.take() {
            Some(handle) => handle.await.context("ingest loop task failed to join")?,
            None => Ok(IngestStats::default()),
        }
    }
}
