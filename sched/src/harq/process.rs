//! Common HARQ Process State
//!
//! A single retransmission process with up to two parallel transport block
//! slots. Downlink and uplink processes compose this record and add their
//! direction-specific allocation state.

use common::tti::TtiPoint;
use tracing::{debug, info, warn};

use crate::SchedError;

/// Maximum number of parallel transport blocks per process (spatial
/// multiplexing uses both, single-layer transmission uses slot 0 only).
pub const MAX_TB: usize = 2;

/// Retransmission state shared by downlink and uplink HARQ processes.
///
/// A transport block slot is *active* from its initial transmission until
/// it is acknowledged or its retransmission budget is exhausted. Both TB
/// slots of one grant share the same transmission TTI.
#[derive(Debug, Clone)]
pub struct HarqProcess {
    id: u32,
    tti: TtiPoint,
    max_retx: u32,
    active: [bool; MAX_TB],
    ack_state: [bool; MAX_TB],
    ndi: [bool; MAX_TB],
    n_rtx: [u32; MAX_TB],
    tx_cnt: [u32; MAX_TB],
    last_mcs: [i32; MAX_TB],
    last_tbs: [i32; MAX_TB],
}

impl HarqProcess {
    /// Create an empty process with a stable index within its bank
    pub(crate) fn new(id: u32) -> Self {
        Self {
            id,
            tti: TtiPoint::default(),
            max_retx: 0,
            active: [false; MAX_TB],
            ack_state: [false; MAX_TB],
            ndi: [false; MAX_TB],
            n_rtx: [0; MAX_TB],
            tx_cnt: [0; MAX_TB],
            last_mcs: [-1; MAX_TB],
            last_tbs: [-1; MAX_TB],
        }
    }

    /// Deactivate a TB slot and zero its counters. The NDI bit survives a
    /// reset so that the toggle on the next transmission stays meaningful.
    pub fn reset(&mut self, tb_idx: usize) {
        self.ack_state[tb_idx] = false;
        self.active[tb_idx] = false;
        self.n_rtx[tb_idx] = 0;
        self.tti = TtiPoint::default();
        self.last_mcs[tb_idx] = -1;
        self.last_tbs[tb_idx] = -1;
        self.tx_cnt[tb_idx] = 0;
    }

    /// Stable index of this process within its bank
    pub fn get_id(&self) -> u32 {
        self.id
    }

    /// Slot of the last (re)transmission
    pub fn get_tti(&self) -> TtiPoint {
        self.tti
    }

    /// True when no TB slot is active
    pub fn is_empty(&self) -> bool {
        (0..MAX_TB).all(|tb| self.is_empty_tb(tb))
    }

    /// True when the given TB slot is inactive
    pub fn is_empty_tb(&self, tb_idx: usize) -> bool {
        !self.active[tb_idx]
    }

    /// True while the TB is active and has not been acknowledged
    pub fn has_pending_retx(&self, tb_idx: usize) -> bool {
        self.active[tb_idx] && !self.ack_state[tb_idx]
    }

    /// Record HARQ feedback for a TB slot.
    ///
    /// A positive acknowledgement empties the slot. A negative one empties
    /// it only once the retransmission budget is exhausted; the budget is
    /// checked here rather than in [`new_retx`](Self::new_retx), so a
    /// retransmission may be enqueued on any slot between transmission and
    /// feedback without extra bookkeeping.
    pub fn set_ack(&mut self, tb_idx: usize, ack: bool) -> Result<(), SchedError> {
        if self.is_empty_tb(tb_idx) {
            warn!("Received ACK for inactive HARQ pid={} tb={}", self.id, tb_idx);
            return Err(SchedError::InactiveHarq);
        }
        self.ack_state[tb_idx] = ack;
        debug!(
            "ACK={} received pid={}, tb_idx={}, n_rtx={}, max_retx={}",
            ack, self.id, tb_idx, self.n_rtx[tb_idx], self.max_retx
        );
        if !ack && self.n_rtx[tb_idx] + 1 >= self.max_retx {
            info!(
                "SCHED: discarding TB={} pid={}, tti={}, maximum number of retx exceeded ({})",
                tb_idx,
                self.id,
                self.tti.to_uint(),
                self.max_retx
            );
            self.active[tb_idx] = false;
        } else if ack {
            self.active[tb_idx] = false;
        }
        Ok(())
    }

    /// Start a new transmission on a TB slot the caller has decided is free.
    ///
    /// Toggles the NDI bit, zeroes the retransmission counter and records
    /// the modulation parameters for later retransmissions. The other TB
    /// slot of the process is unaffected.
    pub fn new_tx(&mut self, tb_idx: usize, tti: TtiPoint, mcs: i32, tbs: i32, max_retx: u32) {
        self.reset(tb_idx);
        self.ndi[tb_idx] = !self.ndi[tb_idx];
        self.tti = tti;
        self.max_retx = max_retx;
        self.tx_cnt[tb_idx] += 1;
        self.last_mcs[tb_idx] = mcs;
        self.last_tbs[tb_idx] = tbs;
        self.active[tb_idx] = true;
    }

    /// Schedule a retransmission of an unacknowledged TB.
    ///
    /// Returns the `(mcs, tbs)` pair of the original transmission, which
    /// the retransmission must reuse. The NDI bit is left untouched.
    pub fn new_retx(&mut self, tb_idx: usize, tti: TtiPoint) -> (i32, i32) {
        self.ack_state[tb_idx] = false;
        self.tti = tti;
        self.n_rtx[tb_idx] += 1;
        (self.last_mcs[tb_idx], self.last_tbs[tb_idx])
    }

    /// Recycle the process when retransmissions are disabled.
    ///
    /// With `max_retx == 0` no feedback will ever free the slots, so a
    /// non-empty process is forced empty each TTI.
    pub fn reset_pending_data(&mut self) {
        if self.max_retx == 0 && !self.is_empty() {
            self.active = [false; MAX_TB];
        }
    }

    /// Total transmissions of the TB, including the initial one
    pub fn nof_tx(&self, tb_idx: usize) -> u32 {
        self.tx_cnt[tb_idx]
    }

    /// Retransmissions of the TB (0 after the initial transmission)
    pub fn nof_retx(&self, tb_idx: usize) -> u32 {
        self.n_rtx[tb_idx]
    }

    /// Current New-Data-Indicator bit of the TB
    pub fn get_ndi(&self, tb_idx: usize) -> bool {
        self.ndi[tb_idx]
    }

    /// Retransmission cap supplied by the latest new transmission
    pub fn max_nof_retx(&self) -> u32 {
        self.max_retx
    }

    /// Transport block size of the last (re)transmission, -1 when unset
    pub fn get_tbs(&self, tb_idx: usize) -> i32 {
        self.last_tbs[tb_idx]
    }

    /// Last received feedback for the TB; meaningful only while active or
    /// during feedback processing
    pub(crate) fn ack_state(&self, tb_idx: usize) -> bool {
        self.ack_state[tb_idx]
    }
}
