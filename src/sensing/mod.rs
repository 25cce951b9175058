//! Ingestion: MQTT messages in, one committed row per message out.

pub mod controller;
pub mod loop_worker;
pub mod payload;
pub mod quality;
pub mod router;

pub use controller::IngestController;
pub use loop_worker::{ingest_loop, IngestPipeline, IngestStats};
pub use payload::{DataPayload, PayloadError};
pub use quality::{QualityConfig, QualityEvaluator};
pub use router::{DeviceTopics, Record, RecordKind, RecordRouter};
