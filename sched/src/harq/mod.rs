//! Per-User HARQ Entity
//!
//! Each connected user owns one fixed bank of downlink processes and one
//! of uplink processes. The entity routes HARQ feedback into the banks,
//! selects processes for new transmissions or retransmissions, and runs
//! the per-TTI housekeeping.
//!
//! The required call order within one receive tick is: [`HarqEntity::new_tti`],
//! then feedback ([`HarqEntity::set_ack_info`] / [`HarqEntity::set_ul_crc`]),
//! then [`HarqEntity::reset_pending_data`], then the scheduler queries and
//! any `new_tx` / `new_retx` on the returned processes. Process references
//! returned by the queries must not be retained across TTIs.

pub mod dl;
pub mod process;
pub mod ul;

pub use dl::{DlHarqProcess, RbgMask};
pub use process::{HarqProcess, MAX_TB};
pub use ul::{PrbInterval, UlHarqProcess};

use common::tti::TtiPoint;
use common::types::Rnti;
use tracing::{debug, warn};

use crate::config::SchedConfig;
use crate::metrics::HarqMetrics;
use crate::{to_tx_ul, SchedError};

/// Size of the ring recording recently observed receive ticks. Must cover
/// more than one HARQ round trip so an entry is checked before reuse.
const LAST_TTI_RING: usize = 20;

/// Outcome of routing downlink HARQ feedback into the process bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlFeedbackResult {
    /// Feedback applied; carries the process id and the size of the TB it
    /// refers to
    Applied { pid: u32, tbs: i32 },
    /// A process matched the feedback slot but the TB was already inactive
    Inactive { pid: u32 },
    /// No process matched the feedback slot
    NoProcess,
}

/// Owner of the per-user HARQ process banks.
///
/// The banks are sized at construction and never reallocate. Downlink
/// process selection is either synchronous (the slot index determines the
/// process) or asynchronous (any free process; retransmissions pick the
/// oldest eligible one). Uplink selection is always synchronous.
pub struct HarqEntity {
    rnti: Rnti,
    dl_harqs: Vec<DlHarqProcess>,
    ul_harqs: Vec<UlHarqProcess>,
    /// Receive ticks actually observed, indexed by `tti % LAST_TTI_RING`
    last_ttis: Vec<Option<TtiPoint>>,
    is_async: bool,
    ack_delay_dl: u32,
    metrics: HarqMetrics,
}

impl HarqEntity {
    /// Build the process banks for the user identified by `rnti`
    pub fn new(rnti: Rnti, cfg: &SchedConfig) -> Result<Self, SchedError> {
        cfg.validate()?;
        Ok(Self {
            rnti,
            dl_harqs: (0..cfg.nof_dl_harqs)
                .map(|i| DlHarqProcess::new(i as u32, cfg.fdd_harq_delay_dl_ms))
                .collect(),
            ul_harqs: (0..cfg.nof_ul_harqs).map(|i| UlHarqProcess::new(i as u32)).collect(),
            last_ttis: vec![None; LAST_TTI_RING],
            is_async: cfg.is_async,
            ack_delay_dl: cfg.fdd_harq_delay_dl_ms,
            metrics: HarqMetrics::default(),
        })
    }

    /// RNTI of the user owning these process banks
    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    /// Number of downlink processes in the bank
    pub fn nof_dl_harqs(&self) -> usize {
        self.dl_harqs.len()
    }

    /// Number of uplink processes in the bank
    pub fn nof_ul_harqs(&self) -> usize {
        self.ul_harqs.len()
    }

    /// Reset every process of both banks (user detach)
    pub fn reset(&mut self) {
        for h in self.dl_harqs.iter_mut() {
            for tb in 0..MAX_TB {
                h.reset(tb);
            }
        }
        for h in self.ul_harqs.iter_mut() {
            for tb in 0..MAX_TB {
                h.reset(tb);
            }
        }
    }

    /// Record the latest receive tick. Must be invoked once per tick,
    /// before feedback routing and before asynchronous selection.
    pub fn new_tti(&mut self, tti_rx: TtiPoint) {
        let idx = tti_rx.to_uint() as usize % self.last_ttis.len();
        self.last_ttis[idx] = Some(tti_rx);
    }

    /// Downlink process available for new data at `tti_tx_dl`, if any.
    ///
    /// Synchronous mode only ever considers the process tied to the slot;
    /// asynchronous mode returns the first empty process in index order.
    pub fn get_empty_dl_harq(&mut self, tti_tx_dl: TtiPoint) -> Option<&mut DlHarqProcess> {
        if !self.is_async {
            let idx = tti_tx_dl.to_uint() as usize % self.dl_harqs.len();
            let h = &mut self.dl_harqs[idx];
            return if h.is_empty() { Some(h) } else { None };
        }
        self.dl_harqs.iter_mut().find(|h| h.is_empty())
    }

    /// Downlink process requiring a retransmission at `tti_tx_dl`, if any
    pub fn get_pending_dl_harq(&mut self, tti_tx_dl: TtiPoint) -> Option<&mut DlHarqProcess> {
        if !self.is_async {
            let idx = tti_tx_dl.to_uint() as usize % self.dl_harqs.len();
            let h = &mut self.dl_harqs[idx];
            return if h.has_pending_retx(tti_tx_dl) { Some(h) } else { None };
        }
        self.get_oldest_dl_harq(tti_tx_dl)
    }

    /// Oldest downlink process with a pending retransmission whose feedback
    /// tick was actually observed. Age is `tti_tx_dl - h.tti`; ties break
    /// to the lowest process id.
    fn get_oldest_dl_harq(&mut self, tti_tx_dl: TtiPoint) -> Option<&mut DlHarqProcess> {
        let mut oldest: Option<(usize, i32)> = None;
        for (idx, h) in self.dl_harqs.iter().enumerate() {
            let ack_tti_rx = h.get_tti() + self.ack_delay_dl;
            let observed = self.last_ttis[ack_tti_rx.to_uint() as usize % self.last_ttis.len()]
                == Some(ack_tti_rx);
            if h.has_pending_retx(tti_tx_dl) && observed {
                let age = tti_tx_dl - h.get_tti();
                if oldest.map_or(true, |(_, best)| age > best) {
                    oldest = Some((idx, age));
                }
            }
        }
        oldest.map(move |(idx, _)| &mut self.dl_harqs[idx])
    }

    /// Route downlink HARQ feedback received at `tti_rx` to the process
    /// whose last transmission it acknowledges.
    ///
    /// At most one process can match: the feedback delay is constant and a
    /// process transmits at most once per slot. Feedback that matches no
    /// process, or a process whose TB is already inactive, is counted and
    /// dropped, never fatal.
    pub fn set_ack_info(&mut self, tti_rx: TtiPoint, tb_idx: usize, ack: bool) -> DlFeedbackResult {
        for h in self.dl_harqs.iter_mut() {
            if h.get_tti() + self.ack_delay_dl == tti_rx {
                return match h.set_ack(tb_idx, ack) {
                    Ok(()) => {
                        let tbs = h.get_tbs(tb_idx);
                        self.metrics.dl_feedback(ack, tbs);
                        if !ack && h.is_empty_tb(tb_idx) {
                            self.metrics.discard();
                        }
                        DlFeedbackResult::Applied { pid: h.get_id(), tbs }
                    }
                    Err(_) => DlFeedbackResult::Inactive { pid: h.get_id() },
                };
            }
        }
        debug!("No DL HARQ process of rnti=0x{:x} matches ACK for tti_rx={}", self.rnti.0, tti_rx);
        DlFeedbackResult::NoProcess
    }

    /// Uplink process for transmission slot `tti_tx_ul`. Uplink HARQ is
    /// synchronous: the slot index uniquely determines the process.
    pub fn get_ul_harq(&mut self, tti_tx_ul: TtiPoint) -> &mut UlHarqProcess {
        let idx = tti_tx_ul.to_uint() as usize % self.ul_harqs.len();
        &mut self.ul_harqs[idx]
    }

    /// Record the CRC outcome of an uplink transmission. `tti_rx` is the
    /// slot the transport block was received in, which for synchronous
    /// uplink HARQ is also the transmission slot. Returns the process id,
    /// or `None` when the process carries nothing.
    pub fn set_ul_crc(&mut self, tti_rx: TtiPoint, tb_idx: usize, ack: bool) -> Option<u32> {
        let idx = tti_rx.to_uint() as usize % self.ul_harqs.len();
        let h = &mut self.ul_harqs[idx];
        let pid = h.get_id();
        let tbs = h.get_tbs(tb_idx);
        if !h.set_ack(tb_idx, ack) {
            warn!("UL CRC for empty HARQ rnti=0x{:x} pid={} tti_rx={}", self.rnti.0, pid, tti_rx);
            return None;
        }
        self.metrics.ul_crc(ack, tbs);
        if !ack && h.is_empty() {
            self.metrics.discard();
        }
        Some(pid)
    }

    /// Per-TTI housekeeping, invoked after feedback processing: recycle
    /// the uplink process about to be rescheduled and any downlink process
    /// configured without retransmissions.
    pub fn reset_pending_data(&mut self, tti_rx: TtiPoint) {
        let tti_tx_ul = to_tx_ul(tti_rx);
        self.get_ul_harq(tti_tx_ul).reset_pending_data();
        for h in self.dl_harqs.iter_mut() {
            h.reset_pending_data();
        }
    }

    /// Read-only view of a downlink process, for metrics and inspection
    pub fn dl_harq(&self, pid: usize) -> &DlHarqProcess {
        &self.dl_harqs[pid]
    }

    /// Read-only view of an uplink process, for metrics and inspection
    pub fn ul_harq(&self, pid: usize) -> &UlHarqProcess {
        &self.ul_harqs[pid]
    }

    /// Aggregate HARQ counters for this user
    pub fn metrics(&self) -> &HarqMetrics {
        &self.metrics
    }

    /// Clear the aggregate counters after a metrics read-out
    pub fn reset_metrics(&mut self) {
        self.metrics = HarqMetrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(nof_dl: usize, nof_ul: usize, is_async: bool) -> SchedConfig {
        SchedConfig {
            nof_dl_harqs: nof_dl,
            nof_ul_harqs: nof_ul,
            is_async,
            ..SchedConfig::default()
        }
    }

    fn entity(nof_dl: usize, nof_ul: usize, is_async: bool) -> HarqEntity {
        HarqEntity::new(Rnti::new(0x4601), &config(nof_dl, nof_ul, is_async)).unwrap()
    }

    #[test]
    fn test_rejects_empty_banks() {
        let rnti = Rnti::new(0x4601);
        assert!(HarqEntity::new(rnti, &config(0, 8, false)).is_err());
        assert!(HarqEntity::new(rnti, &config(8, 0, false)).is_err());
    }

    #[test]
    fn test_dl_tx_then_ack() {
        let cfg = config(8, 8, false);
        let mut e = HarqEntity::new(Rnti::new(0x4601), &cfg).unwrap();
        assert_eq!(e.rnti(), Rnti::new(0x4601));
        e.new_tti(TtiPoint::new(10));

        let h = e.get_empty_dl_harq(TtiPoint::new(10)).unwrap();
        assert_eq!(h.get_id(), 2); // 10 mod 8
        h.new_tx(RbgMask(0b1111), 0, TtiPoint::new(10), 20, 1000, 3, cfg.harq_max_retx);
        assert_eq!(h.max_nof_retx(), 4);

        e.new_tti(TtiPoint::new(14));
        let res = e.set_ack_info(TtiPoint::new(14), 0, true);
        assert_eq!(res, DlFeedbackResult::Applied { pid: 2, tbs: 1000 });

        // The process is empty again and reusable at its next slot
        let h = e.get_empty_dl_harq(TtiPoint::new(18)).unwrap();
        assert_eq!(h.get_id(), 2);
        assert!(h.is_empty());
    }

    #[test]
    fn test_dl_nack_then_retx() {
        let mut e = entity(8, 8, false);
        e.new_tti(TtiPoint::new(10));
        let h = e.get_empty_dl_harq(TtiPoint::new(10)).unwrap();
        let ndi = h.get_ndi(0);
        h.new_tx(RbgMask(0b1111), 0, TtiPoint::new(10), 20, 1000, 3, 4);
        let ndi_after_tx = h.get_ndi(0);
        assert_ne!(ndi, ndi_after_tx);

        e.new_tti(TtiPoint::new(14));
        let res = e.set_ack_info(TtiPoint::new(14), 0, false);
        assert_eq!(res, DlFeedbackResult::Applied { pid: 2, tbs: 1000 });

        // Still active, eligible for retransmission once the feedback
        // window has elapsed; the process slot recurs at 18 in sync mode
        assert!(e.get_empty_dl_harq(TtiPoint::new(18)).is_none());
        let h = e.get_pending_dl_harq(TtiPoint::new(18)).unwrap();
        assert_eq!(h.get_id(), 2);
        let (mcs, tbs) = h.new_retx(RbgMask(0b0011), 0, TtiPoint::new(18), 5);
        assert_eq!((mcs, tbs), (20, 1000));
        assert_eq!(h.nof_retx(0), 1);
        assert_eq!(h.get_ndi(0), ndi_after_tx, "retransmission keeps the NDI");
    }

    #[test]
    fn test_dl_retx_exhaustion_frees_process() {
        let mut e = entity(8, 8, false);
        e.new_tti(TtiPoint::new(10));
        let h = e.get_empty_dl_harq(TtiPoint::new(10)).unwrap();
        h.new_tx(RbgMask(0b1111), 0, TtiPoint::new(10), 20, 1000, 3, 2);

        e.new_tti(TtiPoint::new(14));
        e.set_ack_info(TtiPoint::new(14), 0, false);
        let h = e.get_pending_dl_harq(TtiPoint::new(18)).unwrap();
        h.new_retx(RbgMask(0b1111), 0, TtiPoint::new(18), 3);

        // Second NACK exhausts the budget of two and discards the TB
        e.new_tti(TtiPoint::new(22));
        let res = e.set_ack_info(TtiPoint::new(22), 0, false);
        assert_eq!(res, DlFeedbackResult::Applied { pid: 2, tbs: 1000 });

        let h = e.get_empty_dl_harq(TtiPoint::new(26)).unwrap();
        assert_eq!(h.get_id(), 2);
        assert_eq!(e.metrics().discards, 1);
    }

    #[test]
    fn test_feedback_for_unknown_slot_is_ignored() {
        let mut e = entity(8, 8, false);
        e.new_tti(TtiPoint::new(10));
        let h = e.get_empty_dl_harq(TtiPoint::new(10)).unwrap();
        h.new_tx(RbgMask(1), 0, TtiPoint::new(10), 20, 1000, 3, 4);

        // Feedback slot matching no transmission
        assert_eq!(e.set_ack_info(TtiPoint::new(15), 0, true), DlFeedbackResult::NoProcess);
        // Feedback slot matching a process whose TB slot is inactive
        assert_eq!(
            e.set_ack_info(TtiPoint::new(14), 1, true),
            DlFeedbackResult::Inactive { pid: 2 }
        );
    }

    #[test]
    fn test_sync_selection_is_deterministic() {
        let mut e = entity(8, 8, false);
        e.new_tti(TtiPoint::new(10));
        let h = e.get_empty_dl_harq(TtiPoint::new(10)).unwrap();
        h.new_tx(RbgMask(1), 0, TtiPoint::new(10), 20, 1000, 3, 4);
        e.new_tti(TtiPoint::new(14));
        e.set_ack_info(TtiPoint::new(14), 0, false);

        // Only slot indices congruent to the transmitting process may see it
        assert!(e.get_pending_dl_harq(TtiPoint::new(17)).is_none());
        assert!(e.get_empty_dl_harq(TtiPoint::new(18)).is_none());
        let h = e.get_pending_dl_harq(TtiPoint::new(18)).unwrap();
        assert_eq!(h.get_id(), 2);
    }

    #[test]
    fn test_async_empty_selection_in_index_order() {
        let mut e = entity(4, 4, true);
        e.new_tti(TtiPoint::new(10));
        for expected in 0..4 {
            let h = e.get_empty_dl_harq(TtiPoint::new(10)).unwrap();
            assert_eq!(h.get_id(), expected);
            h.new_tx(RbgMask(1), 0, TtiPoint::new(10), 20, 1000, 3, 4);
        }
        assert!(e.get_empty_dl_harq(TtiPoint::new(10)).is_none());
    }

    /// Transmit on processes 0..n at consecutive slots starting at 10
    fn stagger_txs(e: &mut HarqEntity, n: u32) {
        for i in 0..n {
            e.new_tti(TtiPoint::new(10 + i));
            let h = e.get_empty_dl_harq(TtiPoint::new(10 + i)).unwrap();
            assert_eq!(h.get_id(), i);
            h.new_tx(RbgMask(1), 0, TtiPoint::new(10 + i), 20, 1000, 3, 4);
        }
    }

    #[test]
    fn test_async_retx_picks_oldest() {
        let mut e = entity(4, 4, true);
        stagger_txs(&mut e, 3);

        for tti_rx in [14, 15, 16] {
            e.new_tti(TtiPoint::new(tti_rx));
            let res = e.set_ack_info(TtiPoint::new(tti_rx), 0, false);
            assert!(matches!(res, DlFeedbackResult::Applied { .. }));
        }

        // Ages at slot 17 are 7, 6 and 5: the oldest wins
        let h = e.get_pending_dl_harq(TtiPoint::new(17)).unwrap();
        assert_eq!(h.get_id(), 0);

        // Once process 0 is acknowledged the next oldest follows
        e.set_ack_info(TtiPoint::new(14), 0, true);
        let h = e.get_pending_dl_harq(TtiPoint::new(17)).unwrap();
        assert_eq!(h.get_id(), 1);
    }

    #[test]
    fn test_async_retx_tie_breaks_to_lowest_id() {
        let mut e = entity(4, 4, true);
        e.new_tti(TtiPoint::new(10));

        // Two grants in the same slot: their ages stay equal forever
        for pid in 0..2 {
            let h = e.get_empty_dl_harq(TtiPoint::new(10)).unwrap();
            assert_eq!(h.get_id(), pid);
            h.new_tx(RbgMask(1), 0, TtiPoint::new(10), 20, 1000, 3, 4);
        }
        e.new_tti(TtiPoint::new(14));

        // Both are eligible at slot 17 with age 7: the lower id wins
        let h = e.get_pending_dl_harq(TtiPoint::new(17)).unwrap();
        assert_eq!(h.get_id(), 0);

        // Acknowledging the winner leaves its equally old peer next in line
        let res = e.set_ack_info(TtiPoint::new(14), 0, true);
        assert_eq!(res, DlFeedbackResult::Applied { pid: 0, tbs: 1000 });
        let h = e.get_pending_dl_harq(TtiPoint::new(17)).unwrap();
        assert_eq!(h.get_id(), 1);
    }

    #[test]
    fn test_async_retx_requires_observed_feedback_tick() {
        let mut e = entity(4, 4, true);
        stagger_txs(&mut e, 3);

        // The tick carrying process 0's feedback is never observed
        for tti_rx in [15, 16] {
            e.new_tti(TtiPoint::new(tti_rx));
            e.set_ack_info(TtiPoint::new(tti_rx), 0, false);
        }

        let h = e.get_pending_dl_harq(TtiPoint::new(17)).unwrap();
        assert_eq!(h.get_id(), 1, "process 0 is skipped until its feedback tick is seen");
    }

    #[test]
    fn test_ul_synchronous_phich_flow() {
        let mut e = entity(8, 8, false);
        e.new_tti(TtiPoint::new(10));

        let alloc = PrbInterval::with_len(0, 10);
        let h = e.get_ul_harq(TtiPoint::new(10));
        assert_eq!(h.get_id(), 2); // 10 mod 8
        h.new_tx(TtiPoint::new(10), 10, 500, alloc, 3);
        assert!(h.has_pending_phich());
        assert_eq!(h.get_pending_data(), 500);

        // CRC for the transport block received in slot 10
        assert_eq!(e.set_ul_crc(TtiPoint::new(10), 0, true), Some(2));

        let h = e.get_ul_harq(TtiPoint::new(10));
        assert!(h.pop_pending_phich());
        assert!(!h.has_pending_phich());
        assert!(h.pop_pending_phich(), "second pop returns the stored feedback");
        assert!(!h.has_pending_phich());

        // Housekeeping at tick 10 recycles the process for slot 18
        e.reset_pending_data(TtiPoint::new(10));
        let h = e.get_ul_harq(TtiPoint::new(18));
        assert_eq!(h.get_id(), 2);
        assert!(h.is_empty());
        assert_eq!(h.get_pending_data(), 0);
    }

    #[test]
    fn test_ul_crc_for_empty_process() {
        let mut e = entity(8, 8, false);
        e.new_tti(TtiPoint::new(10));
        assert_eq!(e.set_ul_crc(TtiPoint::new(10), 0, true), None);
    }

    #[test]
    fn test_reset_empties_all_processes() {
        let mut e = entity(4, 4, true);
        stagger_txs(&mut e, 3);
        let alloc = PrbInterval::with_len(0, 8);
        e.get_ul_harq(TtiPoint::new(10)).new_tx(TtiPoint::new(10), 10, 400, alloc, 3);

        e.reset();
        for pid in 0..4 {
            let h = e.dl_harq(pid);
            assert!(h.is_empty());
            assert_eq!(h.nof_tx(0), 0);
            assert_eq!(h.get_tti(), TtiPoint::default());
        }
        assert!(e.get_ul_harq(TtiPoint::new(10)).is_empty());
        assert_eq!(e.get_ul_harq(TtiPoint::new(10)).get_pending_data(), 0);
    }

    #[test]
    fn test_metrics_track_feedback() {
        let mut e = entity(8, 8, false);
        e.new_tti(TtiPoint::new(10));
        let h = e.get_empty_dl_harq(TtiPoint::new(10)).unwrap();
        h.new_tx(RbgMask(1), 0, TtiPoint::new(10), 20, 1000, 3, 4);
        e.new_tti(TtiPoint::new(14));
        e.set_ack_info(TtiPoint::new(14), 0, true);

        let alloc = PrbInterval::with_len(0, 10);
        e.get_ul_harq(TtiPoint::new(11)).new_tx(TtiPoint::new(11), 10, 500, alloc, 3);
        e.set_ul_crc(TtiPoint::new(11), 0, false);

        let m = e.metrics();
        assert_eq!(m.tx_pkts, 1);
        assert_eq!(m.tx_errors, 0);
        assert_eq!(m.tx_brate, 8000);
        assert_eq!(m.rx_pkts, 1);
        assert_eq!(m.rx_errors, 1);
        assert_eq!(m.rx_brate, 0);

        e.reset_metrics();
        assert_eq!(e.metrics(), &HarqMetrics::default());
    }
}
