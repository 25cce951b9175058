use serde::{Deserialize, Serialize};

/// Per-run metadata pair; at most one value per (run, key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub key: String,
    pub value: Option<String>,
}
