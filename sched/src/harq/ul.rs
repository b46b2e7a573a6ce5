//! Uplink HARQ Process
//!
//! Uplink HARQ is synchronous and single-layer: each process carries one
//! transport block and its slot is fixed by the bank index. The process
//! additionally latches the PHICH feedback owed to the UE and accounts for
//! the bytes still in flight.

use common::tti::TtiPoint;

use super::process::HarqProcess;
use crate::to_tx_ul;

/// Half-open PRB range `[start, stop)` of an uplink grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrbInterval {
    start: u32,
    stop: u32,
}

impl PrbInterval {
    /// Create an interval from its bounds
    pub fn new(start: u32, stop: u32) -> Self {
        Self { start, stop }
    }

    /// Create an interval from its first PRB and length
    pub fn with_len(start: u32, len: u32) -> Self {
        Self { start, stop: start + len }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn stop(&self) -> u32 {
        self.stop
    }

    /// Number of PRBs in the interval
    pub fn len(&self) -> u32 {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }
}

/// An uplink HARQ process (transport block slot 0 only)
#[derive(Debug, Clone)]
pub struct UlHarqProcess {
    proc: HarqProcess,
    allocation: PrbInterval,
    pending_data: u32,
    pending_phich: bool,
}

impl UlHarqProcess {
    pub(crate) fn new(id: u32) -> Self {
        Self {
            proc: HarqProcess::new(id),
            allocation: PrbInterval::default(),
            pending_data: 0,
            pending_phich: false,
        }
    }

    /// PRB interval of the last grant
    pub fn get_alloc(&self) -> PrbInterval {
        self.allocation
    }

    /// True while the TB is unacknowledged
    pub fn has_pending_retx(&self) -> bool {
        self.proc.has_pending_retx(0)
    }

    /// Start a new uplink transmission. Latches the PHICH owed for this
    /// transmission and records the TB size as in-flight data.
    pub fn new_tx(&mut self, tti: TtiPoint, mcs: i32, tbs: i32, alloc: PrbInterval, max_retx: u32) {
        self.allocation = alloc;
        self.proc.new_tx(0, tti, mcs, tbs, max_retx);
        self.pending_data = tbs.max(0) as u32;
        self.pending_phich = true;
    }

    /// Schedule a retransmission, possibly on a different PRB interval.
    /// Returns the `(mcs, tbs)` of the original transmission.
    pub fn new_retx(&mut self, tti: TtiPoint, alloc: PrbInterval) -> (i32, i32) {
        self.allocation = alloc;
        let out = self.proc.new_retx(0, tti);
        self.pending_phich = true;
        out
    }

    /// True when retransmitting at `tti_tx_ul` with `alloc` needs a new
    /// control-channel grant. A retransmission that keeps the stored PRB
    /// interval and lands on the canonical slot for this process reuses
    /// the previous grant.
    pub fn retx_requires_pdcch(&self, tti_tx_ul: TtiPoint, alloc: PrbInterval) -> bool {
        alloc != self.allocation || tti_tx_ul != to_tx_ul(self.proc.get_tti())
    }

    /// Record the decode outcome for this process. Returns false when the
    /// process carries nothing.
    pub fn set_ack(&mut self, tb_idx: usize, ack: bool) -> bool {
        if self.proc.is_empty() {
            return false;
        }
        self.proc.set_ack(tb_idx, ack).is_ok()
    }

    /// True while a PHICH for the last (re)transmission is still owed
    pub fn has_pending_phich(&self) -> bool {
        self.pending_phich
    }

    /// Consume the PHICH latch, returning the feedback value to signal.
    /// Exactly one pop observes the latch per (re)transmission.
    pub fn pop_pending_phich(&mut self) -> bool {
        let ack = self.proc.ack_state(0);
        self.pending_phich = false;
        ack
    }

    /// Per-TTI housekeeping: recycle a no-retransmission process and drop
    /// the in-flight byte count once the process has emptied.
    pub fn reset_pending_data(&mut self) {
        self.proc.reset_pending_data();
        if self.proc.is_empty_tb(0) {
            self.pending_data = 0;
        }
    }

    /// Bytes still in flight on this process
    pub fn get_pending_data(&self) -> u32 {
        self.pending_data
    }

    pub fn reset(&mut self, tb_idx: usize) {
        self.proc.reset(tb_idx);
        self.pending_data = 0;
        self.pending_phich = false;
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
