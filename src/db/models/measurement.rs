//! Sensor samples and their derived quality label.

use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};

use crate::db::helpers::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityLabel {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "unstable")]
    Unstable,
    /// Sensor has not reported a settled accuracy yet.
    #[serde(rename = "acc<2")]
    LowAccuracy,
}

impl QualityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLabel::Ok => "ok",
            QualityLabel::Unstable => "unstable",
            QualityLabel::LowAccuracy => "acc<2",
        }
    }
}

impl fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityLabel {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ok" => Ok(QualityLabel::Ok),
            "unstable" => Ok(QualityLabel::Unstable),
            "acc<2" => Ok(QualityLabel::LowAccuracy),
            other => Err(anyhow!("unknown quality flag '{other}'")),
        }
    }
}

/// Channel values of one sample. Any channel the payload did not report is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelReadings {
    pub iaq: Option<f64>,
    pub iaq_accuracy: Option<i64>,
    pub b_voc_eq_ppm: Option<f64>,
    pub eco2_ppm: Option<f64>,
    pub temp_c: Option<f64>,
    pub rh_pct: Option<f64>,
    pub press_hpa: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub run_id: String,
    pub timestamp: Timestamp,
    pub channels: ChannelReadings,
    pub quality: Option<QualityLabel>,
}
