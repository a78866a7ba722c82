//! Nier Snapshot Service
//!
//! Periodic still-frame capture for the Nier factory floor analytics
//! platform. On a fixed interval the service asks ffmpeg for a single JPEG
//! frame from an RTSP camera and either stores it as a file or POSTs it to an
//! HTTP endpoint. Failed attempts are logged and the next tick tries again.
//!
//! ## Architecture
//!
//! ```text
//!                ┌────────────────┐   frame    ┌────────────────┐
//!  tick ───────▶ │ FfmpegCapturer │ ─────────▶ │ FrameDeliverer │──▶ frames/*.jpg
//!                └────────────────┘            └────────────────┘    or POST
//!                        │                             │
//!                        └──────── CaptureOutcome ─────┘
//!                                       │
//!                                       ▼
//!                          app-YYYY-MM-DD.log / error-YYYY-MM-DD.log
//! ```

pub mod config;
pub mod frame_capturer;
pub mod frame_deliverer;
pub mod log_sink;
pub mod logging;
pub mod scheduler;

pub use config::{CaptureConfig, ConfigValidationError, DeliveryTarget, LogFormat};
pub use frame_capturer::{
    CaptureError, FfmpegCapturer, FramePayload, FrameSource, TranscoderCommand,
};
pub use frame_deliverer::{
    DeliveryAction, DeliveryError, FrameDeliverer, HttpDeliverer, LocalDeliverer,
};
pub use log_sink::RotatingLogSink;
pub use logging::{LogContext, LogDestination};
pub use scheduler::{CaptureOutcome, CaptureScheduler, StatsSnapshot};
