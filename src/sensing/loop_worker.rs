use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{Database, Timestamp},
    settings::IngestSettings,
};

use super::{
    quality::QualityEvaluator,
    router::{Record, RecordRouter},
};

const REQUEST_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub events: u64,
    pub measurements: u64,
    pub discarded: u64,
    pub ignored: u64,
}

/// Routes and persists messages one at a time, in arrival order. Each record is
/// committed before `handle` returns.
pub struct IngestPipeline {
    db: Database,
    router: RecordRouter,
    evaluator: QualityEvaluator,
    stats: IngestStats,
}

impl IngestPipeline {
    pub fn new(db: Database, router: RecordRouter) -> Self {
        Self {
            db,
            router,
            evaluator: QualityEvaluator::default(),
            stats: IngestStats::default(),
        }
    }

    pub fn router(&self) -> &RecordRouter {
        &self.router
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// A malformed payload is logged and dropped; only store failures are errors.
    pub async fn handle(
        &mut self,
        topic: &str,
        payload: &[u8],
        received_at: Timestamp,
    ) -> Result<()> {
        let record = match self
            .router
            .route(&mut self.evaluator, topic, payload, received_at)
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("ignoring message on unrouted topic {topic}");
                self.stats.ignored += 1;
                return Ok(());
            }
            Err(err) => {
                warn!("bad payload on {topic}, discarding: {err}");
                self.stats.discarded += 1;
                return Ok(());
            }
        };

        match record {
            Record::Event(event) => {
                self.db
                    .append_event(&event)
                    .await
                    .with_context(|| format!("failed to persist message from {topic}"))?;
                self.stats.events += 1;
                info!("{topic} {}", event.value.as_deref().unwrap_or_default());
            }
            Record::Measurement(measurement) => {
                self.db
                    .append_measurement(&measurement)
                    .await
                    .with_context(|| format!("failed to persist message from {topic}"))?;
                self.stats.measurements += 1;
                let channels = measurement.channels;
                info!(
                    "data {} temp={:?} rh={:?} press_hPa={:?} quality={}",
                    measurement.timestamp,
                    channels.temp_c,
                    channels.rh_pct,
                    channels.press_hpa,
                    measurement
                        .quality
                        .map(|q| q.as_str())
                        .unwrap_or_default(),
                );
            }
        }

        Ok(())
    }
}

/// Runs until `cancel_token` fires or the broker is unreachable for more than
/// the configured number of consecutive attempts.
pub async fn ingest_loop(
    settings: IngestSettings,
    mut pipeline: IngestPipeline,
    cancel_token: CancellationToken,
) -> Result<IngestStats> {
    let mut options = MqttOptions::new(
        settings.client_id(),
        settings.broker_host.clone(),
        settings.broker_port,
    );
    options.set_keep_alive(settings.keep_alive());

    let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
    let topics = pipeline.router().topics().clone();
    let mut consecutive_failures: u32 = 0;

    info!(
        "Listening on {}:{} for {}/{}/#",
        settings.broker_host, settings.broker_port, settings.topic_prefix, settings.device_id
    );

    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                info!("ingest loop shutting down");
                if let Err(err) = client.try_disconnect() {
                    debug!("disconnect request not queued: {err}");
                }
                break;
            }
            event = eventloop.poll() => match event {
                Ok(MqttEvent::Incoming(Packet::ConnAck(ack))) => {
                    consecutive_failures = 0;
                    info!("Connected to broker ({:?})", ack.code);
                    // Subscriptions do not survive a reconnect with a clean session.
                    for topic in topics.all() {
                        client
                            .subscribe(topic, QoS::AtLeastOnce)
                            .await
                            .with_context(|| format!("failed to subscribe to {topic}"))?;
                    }
                    info!(
                        "Logging to {} | run_id={} | device_id={}",
                        settings.db_path.display(),
                        pipeline.router().run_id(),
                        settings.device_id
                    );
                }
                Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                    consecutive_failures = 0;
                    pipeline
                        .handle(&publish.topic, &publish.payload, Timestamp::now())
                        .await?;
                }
                Ok(_) => {}
                Err(err) => {
                    consecutive_failures += 1;
                    if let Some(max) = settings.max_reconnect_attempts {
                        if consecutive_failures > max {
                            bail!(
                                "broker connection lost after {consecutive_failures} attempts: {err}"
                            );
                        }
                    }
                    warn!(
                        "broker connection error (attempt {consecutive_failures}): {err}; retrying in {:?}",
                        settings.reconnect_delay()
                    );
                    tokio::select! {
                        _ = cancel_token.cancelled() => {}
                        _ = tokio::time::sleep(settings.reconnect_delay()) => {}
                    }
                }
            }
        }
    }

    Ok(pipeline.stats())
}
