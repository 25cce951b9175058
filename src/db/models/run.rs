//! One logging session (`experiments` table).

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub date_start: DateTime<Utc>,
    pub location: Option<String>,
    pub device_id: Option<String>,
    pub notes: Option<String>,
}

impl Run {
    /// Run ids are derived from the local wall clock at session start.
    pub fn generate_id(now: DateTime<Local>) -> String {
        now.format("exp-%Y%m%d-%H%M%S").to_string()
    }
}
