//! MAC Scheduler HARQ Core
//!
//! This crate implements the per-user HARQ (Hybrid ARQ) state machines of
//! the base station MAC scheduler: the retransmission processes, their
//! downlink and uplink specializations, and the entity that owns one fixed
//! bank of each per connected user.
//!
//! The core answers two questions for the scheduler at every transmission
//! opportunity: which processes are free for new data, and which require a
//! retransmission. It performs no resource allocation, no link adaptation
//! and no I/O; every operation is non-blocking and allocation-free once
//! the banks are built.

pub mod config;
pub mod harq;
pub mod metrics;

use common::tti::TtiPoint;
use thiserror::Error;

pub use config::SchedConfig;
pub use harq::{
    DlFeedbackResult, DlHarqProcess, HarqEntity, HarqProcess, PrbInterval, RbgMask,
    UlHarqProcess, MAX_TB,
};
pub use metrics::HarqMetrics;

/// Errors surfaced by the scheduler core
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedError {
    #[error("HARQ feedback for inactive process")]
    InactiveHarq,

    #[error("no HARQ process matches the feedback slot")]
    NoProcessFound,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Delay in TTIs between a downlink transmission and the arrival of its
/// HARQ feedback (FDD operation).
pub const FDD_HARQ_DELAY_DL_MS: u32 = 4;

/// Delay in TTIs between a receive tick and the transmission slot of the
/// grants decided at that tick (FDD operation).
pub const FDD_HARQ_DELAY_UL_MS: u32 = 4;

/// Uplink transmission slot being scheduled at receive tick `tti_rx`.
///
/// The grant leaves the control channel `FDD_HARQ_DELAY_UL_MS` slots after
/// the tick and the UE transmits `FDD_HARQ_DELAY_DL_MS` slots after that.
pub fn to_tx_ul(tti_rx: TtiPoint) -> TtiPoint {
    tti_rx + (FDD_HARQ_DELAY_UL_MS + FDD_HARQ_DELAY_DL_MS)
}
