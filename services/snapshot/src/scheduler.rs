//! Fixed-interval capture loop.
//!
//! The scheduler alternates between waiting for the next tick and running a
//! single capture-and-deliver attempt. Attempts never overlap: a slow attempt
//! simply delays the following tick. Every attempt ends in a
//! [`CaptureOutcome`] that is logged and counted, and no outcome stops the
//! loop.

use crate::config::CaptureConfig;
use crate::frame_capturer::{CaptureError, FfmpegCapturer, FrameSource};
use crate::frame_deliverer::{self, DeliveryAction, DeliveryError, FrameDeliverer};
use crate::logging::LogContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::instrument::WithSubscriber;
use tracing::{error, info};

/// Result of one capture-and-deliver attempt.
#[derive(Debug)]
pub enum CaptureOutcome {
    Success {
        size: usize,
        elapsed: Duration,
        action: DeliveryAction,
    },
    CaptureFailure {
        cause: CaptureError,
    },
    DeliveryFailure {
        cause: DeliveryError,
        action: DeliveryAction,
    },
}

impl CaptureOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CaptureOutcome::Success { .. })
    }

    /// Write the outcome to the current dispatcher, together with the
    /// running totals in `totals`.
    pub fn report(&self, attempt: u64, totals: &StatsSnapshot) {
        match self {
            CaptureOutcome::Success {
                size,
                elapsed,
                action,
            } => {
                info!(
                    attempt = attempt,
                    size_bytes = *size as u64,
                    elapsed_ms = elapsed.as_millis() as u64,
                    frames_delivered = totals.frames_delivered,
                    bytes_delivered = totals.bytes_delivered,
                    capture_failures = totals.capture_failures,
                    delivery_failures = totals.delivery_failures,
                    "{} frame",
                    action.past_tense()
                );
            }
            CaptureOutcome::CaptureFailure { cause } => {
                error!(
                    attempt = attempt,
                    error = %cause,
                    frames_delivered = totals.frames_delivered,
                    capture_failures = totals.capture_failures,
                    delivery_failures = totals.delivery_failures,
                    "capture failed"
                );
            }
            CaptureOutcome::DeliveryFailure { cause, action } => {
                error!(
                    attempt = attempt,
                    error = %cause,
                    frames_delivered = totals.frames_delivered,
                    capture_failures = totals.capture_failures,
                    delivery_failures = totals.delivery_failures,
                    "{} failed",
                    action.verb()
                );
            }
        }
    }
}

/// Counters over the lifetime of a scheduler.
#[derive(Debug, Default)]
pub struct CaptureStats {
    attempts: AtomicU64,
    frames_delivered: AtomicU64,
    bytes_delivered: AtomicU64,
    capture_failures: AtomicU64,
    delivery_failures: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub frames_delivered: u64,
    pub bytes_delivered: u64,
    pub capture_failures: u64,
    pub delivery_failures: u64,
}

impl CaptureStats {
    /// Count an attempt and return its 1-based number.
    fn begin_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record(&self, outcome: &CaptureOutcome) {
        match outcome {
            CaptureOutcome::Success { size, .. } => {
                self.frames_delivered.fetch_add(1, Ordering::Relaxed);
                self.bytes_delivered
                    .fetch_add(*size as u64, Ordering::Relaxed);
            }
            CaptureOutcome::CaptureFailure { .. } => {
                self.capture_failures.fetch_add(1, Ordering::Relaxed);
            }
            CaptureOutcome::DeliveryFailure { .. } => {
                self.delivery_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Drives capture and delivery on a fixed interval, forever.
pub struct CaptureScheduler {
    interval: Duration,
    deadline: Duration,
    source: Box<dyn FrameSource>,
    deliverer: Box<dyn FrameDeliverer>,
    log: LogContext,
    stats: CaptureStats,
}

impl CaptureScheduler {
    pub fn new(
        interval: Duration,
        deadline: Duration,
        source: Box<dyn FrameSource>,
        deliverer: Box<dyn FrameDeliverer>,
        log: LogContext,
    ) -> Self {
        Self {
            interval,
            deadline,
            source,
            deliverer,
            log,
            stats: CaptureStats::default(),
        }
    }

    /// Scheduler using ffmpeg and the configured delivery target.
    pub fn from_config(config: &CaptureConfig, log: LogContext) -> Result<Self, DeliveryError> {
        let source = FfmpegCapturer::new(&config.ffmpeg_path, &config.rtsp_url);
        let deliverer = frame_deliverer::for_target(&config.delivery_target())?;

        Ok(Self::new(
            config.interval(),
            config.request_timeout(),
            Box::new(source),
            deliverer,
            log,
        ))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run the loop under this scheduler's logging context. Never returns.
    pub async fn run(&self) {
        self.run_loop()
            .with_subscriber(self.log.dispatch().clone())
            .await
    }

    async fn run_loop(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.deadline.as_millis() as u64,
            "starting capture loop"
        );

        loop {
            ticker.tick().await;

            let attempt = self.stats.begin_attempt();
            let outcome = self.run_once().await;
            self.stats.record(&outcome);
            outcome.report(attempt, &self.stats.snapshot());
        }
    }

    /// One capture-and-deliver attempt. Each external call gets the full
    /// deadline.
    pub async fn run_once(&self) -> CaptureOutcome {
        let started = Instant::now();

        let payload = match self.source.capture(self.deadline).await {
            Ok(payload) => payload,
            Err(cause) => return CaptureOutcome::CaptureFailure { cause },
        };

        let action = self.deliverer.action();
        if let Err(cause) = self.deliverer.deliver(&payload, self.deadline).await {
            return CaptureOutcome::DeliveryFailure { cause, action };
        }

        CaptureOutcome::Success {
            size: payload.len(),
            elapsed: started.elapsed(),
            action,
        }
    }
}
