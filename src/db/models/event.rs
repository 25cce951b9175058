use crate::db::helpers::Timestamp;

pub const STATUS_LABEL: &str = "status";
pub const HEARTBEAT_LABEL: &str = "heartbeat";

/// A discrete labelled occurrence. Labels repeat freely within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub run_id: String,
    pub timestamp: Timestamp,
    pub label: String,
    pub value: Option<String>,
}

impl Event {
    pub fn new(
        run_id: impl Into<String>,
        timestamp: Timestamp,
        label: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            timestamp,
            label: label.into(),
            value,
        }
    }
}
