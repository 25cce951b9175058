use crate::db::{
    models::{HEARTBEAT_LABEL, STATUS_LABEL},
    Event, Measurement, Timestamp,
};

use super::{
    payload::{DataPayload, PayloadError},
    quality::QualityEvaluator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Status,
    Heartbeat,
    Data,
}

/// The three topics one device publishes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    pub status: String,
    pub heartbeat: String,
    pub data: String,
}

impl DeviceTopics {
    pub fn new(prefix: &str, device_id: &str) -> Self {
        let base = format!("{}/{}", prefix.trim_end_matches('/'), device_id);
        Self {
            status: format!("{base}/status"),
            heartbeat: format!("{base}/heartbeat"),
            data: format!("{base}/data"),
        }
    }

    pub fn classify(&self, topic: &str) -> Option<RecordKind> {
        if topic == self.status {
            Some(RecordKind::Status)
        } else if topic == self.heartbeat {
            Some(RecordKind::Heartbeat)
        } else if topic == self.data {
            Some(RecordKind::Data)
        } else {
            None
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.status, &self.heartbeat, &self.data]
    }
}

/// A decoded message, ready for exactly one append.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Event(Event),
    Measurement(Measurement),
}

/// Maps raw transport messages of one run onto store records.
#[derive(Debug, Clone)]
pub struct RecordRouter {
    run_id: String,
    topics: DeviceTopics,
}

impl RecordRouter {
    pub fn new(run_id: impl Into<String>, topics: DeviceTopics) -> Self {
        Self {
            run_id: run_id.into(),
            topics,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    /// Returns `Ok(None)` for topics this router does not own.
    pub fn route(
        &self,
        evaluator: &mut QualityEvaluator,
        topic: &str,
        payload: &[u8],
        received_at: Timestamp,
    ) -> Result<Option<Record>, PayloadError> {
        let Some(kind) = self.topics.classify(topic) else {
            return Ok(None);
        };

        let record = match kind {
            RecordKind::Status => self.text_event(STATUS_LABEL, payload, received_at),
            RecordKind::Heartbeat => self.text_event(HEARTBEAT_LABEL, payload, received_at),
            RecordKind::Data => {
                let data = DataPayload::decode(payload)?;
                let quality = evaluator.evaluate(data.iaq_acc, data.iaq);
                Record::Measurement(Measurement {
                    run_id: self.run_id.clone(),
                    timestamp: received_at,
                    channels: data.channels(),
                    quality: Some(quality),
                })
            }
        };

        Ok(Some(record))
    }

    fn text_event(&self, label: &str, payload: &[u8], received_at: Timestamp) -> Record {
        let text = String::from_utf8_lossy(payload).into_owned();
        Record::Event(Event::new(self.run_id.clone(), received_at, label, Some(text)))
    }
}
