//! # nexus-core
//!
//! Domain types shared by every Nexus crate.
//!
//! - [`chat`]: inbound chat requests and the synchronous reply
//! - [`message_id`]: content-addressed id derived from completion text
//! - [`analysis`]: analysis metrics, the fallback used on failure, and the
//!   frame pushed to subscribers
//! - [`errors`]: error taxonomy (validation, upstream, analysis, delivery)
//! - [`retry`]: bounded retry policy for upstream calls

#![deny(unsafe_code)]

pub mod analysis;
pub mod chat;
pub mod errors;
pub mod message_id;
pub mod retry;

pub use analysis::{AnalysisMetrics, AnalysisStatus, METRICS_FRAME_TYPE, MetricsFrame};
pub use chat::{ChatReply, ChatRequest, ChatRole, ChatTurn};
pub use errors::{AnalysisError, DeliveryError, RelayError, UpstreamError, ValidationError};
pub use message_id::MessageId;
pub use retry::RetryConfig;
