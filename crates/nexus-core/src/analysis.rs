//! Analysis metrics pushed to subscribers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message_id::MessageId;

/// `type` tag of [`MetricsFrame`].
pub const METRICS_FRAME_TYPE: &str = "metrics";

/// Outcome of an analysis pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    /// Backend produced metrics.
    Success,
    /// Fallback value; see [`AnalysisMetrics::error`].
    Error,
}

/// Result of analyzing one completion.
///
/// Always present: a failed analysis yields [`AnalysisMetrics::fallback`]
/// rather than nothing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetrics {
    /// Success or fallback.
    pub status: AnalysisStatus,
    /// Whether the backend judged the text machine-written.
    pub is_ai_generated: bool,
    /// Backend's human-likeness score.
    pub human_likeness_score: f64,
    /// Detailed metrics keyed by name.
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
    /// Failure reason, set only on fallback values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisMetrics {
    /// Successful analysis.
    pub fn success(
        is_ai_generated: bool,
        human_likeness_score: f64,
        metrics: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            status: AnalysisStatus::Success,
            is_ai_generated,
            human_likeness_score,
            metrics,
            error: None,
        }
    }

    /// Neutral value substituted when analysis fails.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            status: AnalysisStatus::Error,
            is_ai_generated: false,
            human_likeness_score: 0.0,
            metrics: BTreeMap::new(),
            error: Some(reason.into()),
        }
    }

    /// Whether this is a fallback value.
    pub fn is_fallback(&self) -> bool {
        self.status == AnalysisStatus::Error
    }
}

/// Frame pushed to every subscriber once a completion has been analyzed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsFrame {
    /// Always [`METRICS_FRAME_TYPE`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Id of the chat reply the metrics belong to.
    pub message_id: MessageId,
    /// The analysis result, possibly a fallback.
    pub data: AnalysisMetrics,
}

impl MetricsFrame {
    /// Frame for `message_id`.
    pub fn new(message_id: MessageId, data: AnalysisMetrics) -> Self {
        Self {
            kind: METRICS_FRAME_TYPE.to_string(),
            message_id,
            data,
        }
    }
}
