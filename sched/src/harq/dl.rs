//! Downlink HARQ Process
//!
//! Extends the common process with the allocation records of the last
//! downlink grant and gates retransmission eligibility on the HARQ
//! feedback window.

use common::tti::TtiPoint;

use super::process::HarqProcess;
use crate::SchedError;

/// Resource-block-group allocation bitmap of a downlink grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RbgMask(pub u32);

impl RbgMask {
    /// Number of allocated resource block groups
    pub fn nof_rbgs(&self) -> u32 {
        self.0.count_ones()
    }

    /// True when no resource block group is allocated
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// A downlink HARQ process with two transport block slots
#[derive(Debug, Clone)]
pub struct DlHarqProcess {
    proc: HarqProcess,
    rbgmask: RbgMask,
    n_cce: u32,
    /// Slots between a transmission and the arrival of its feedback
    ack_delay: u32,
}

impl DlHarqProcess {
    pub(crate) fn new(id: u32, ack_delay: u32) -> Self {
        Self {
            proc: HarqProcess::new(id),
            rbgmask: RbgMask::default(),
            n_cce: 0,
            ack_delay,
        }
    }

    /// Start a new transmission, recording the grant's RBG mask and CCE index
    #[allow(clippy::too_many_arguments)]
    pub fn new_tx(
        &mut self,
        new_mask: RbgMask,
        tb_idx: usize,
        tti_tx_dl: TtiPoint,
        mcs: i32,
        tbs: i32,
        n_cce: u32,
        max_retx: u32,
    ) {
        self.n_cce = n_cce;
        self.rbgmask = new_mask;
        self.proc.new_tx(tb_idx, tti_tx_dl, mcs, tbs, max_retx);
    }

    /// Schedule a retransmission under a possibly different allocation.
    /// Returns the `(mcs, tbs)` of the original transmission.
    pub fn new_retx(
        &mut self,
        new_mask: RbgMask,
        tb_idx: usize,
        tti_tx_dl: TtiPoint,
        n_cce: u32,
    ) -> (i32, i32) {
        self.n_cce = n_cce;
        self.rbgmask = new_mask;
        self.proc.new_retx(tb_idx, tti_tx_dl)
    }

    /// Record HARQ feedback for a TB slot
    pub fn set_ack(&mut self, tb_idx: usize, ack: bool) -> Result<(), SchedError> {
        self.proc.set_ack(tb_idx, ack)
    }

    /// Earliest slot at which a retransmission of the current TB may be
    /// scheduled: feedback arrives `ack_delay` slots after the
    /// transmission and the retransmission follows it.
    fn to_tx_dl_ack(&self) -> TtiPoint {
        self.proc.get_tti() + (self.ack_delay + 1)
    }

    /// True when the TB awaits a retransmission and the feedback window
    /// for its last transmission has already elapsed at `tti_tx_dl`
    pub fn has_pending_retx_tb(&self, tb_idx: usize, tti_tx_dl: TtiPoint) -> bool {
        tti_tx_dl >= self.to_tx_dl_ack() && self.proc.has_pending_retx(tb_idx)
    }

    /// True when either TB slot has a pending retransmission at `tti_tx_dl`
    pub fn has_pending_retx(&self, tti_tx_dl: TtiPoint) -> bool {
        self.has_pending_retx_tb(0, tti_tx_dl) || self.has_pending_retx_tb(1, tti_tx_dl)
    }

    /// Control-channel element index of the last grant
    pub fn get_n_cce(&self) -> u32 {
        self.n_cce
    }

    /// RBG allocation bitmap of the last grant
    pub fn get_rbgmask(&self) -> RbgMask {
        self.rbgmask
    }

    pub fn reset_pending_data(&mut self) {
        self.proc.reset_pending_data();
    }

    pub fn reset(&mut self, tb_idx: usize) {
        self.proc.reset(tb_idx);
    }

    pub fn get_id(&self) -> u32 {
        self.proc.get_id()
    }

    pub fn get_tti(&self) -> TtiPoint {
        self.proc.get_tti()
    }

    pub fn is_empty(&self) -> bool {
        self.proc.is_empty()
    }

    pub fn is_empty_tb(&self, tb_idx: usize) -> bool {
        self.proc.is_empty_tb(tb_idx)
    }

    pub fn get_ndi(&self, tb_idx: usize) -> bool {
        self.proc.get_ndi(tb_idx)
    }

    pub fn nof_tx(&self, tb_idx: usize) -> u32 {
        self.proc.nof_tx(tb_idx)
    }

    pub fn nof_retx(&self, tb_idx: usize) -> u32 {
        self.proc.nof_retx(tb_idx)
    }

    pub fn max_nof_retx(&self) -> u32 {
        self.proc.max_nof_retx()
    }

    pub fn get_tbs(&self, tb_idx: usize) -> i32 {
        self.proc.get_tbs(tb_idx)
    }
}
