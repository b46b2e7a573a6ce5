//! Per-User HARQ Metrics
//!
//! Aggregate counters updated as feedback is routed through the HARQ
//! entity. A metrics reader on another thread takes the owning user's
//! lock before reading; the counters themselves are plain fields.

/// HARQ counters for one user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarqMetrics {
    /// Downlink transport blocks with feedback received
    pub tx_pkts: u32,
    /// Downlink transport blocks negatively acknowledged
    pub tx_errors: u32,
    /// Downlink bits acknowledged
    pub tx_brate: u64,
    /// Uplink transport blocks with CRC outcome received
    pub rx_pkts: u32,
    /// Uplink transport blocks failing CRC
    pub rx_errors: u32,
    /// Uplink bits received correctly
    pub rx_brate: u64,
    /// Transport blocks dropped after exhausting their retransmissions
    pub discards: u32,
}

impl HarqMetrics {
    pub(crate) fn dl_feedback(&mut self, ack: bool, tbs: i32) {
        self.tx_pkts += 1;
        if ack {
            self.tx_brate += tbs.max(0) as u64 * 8;
        } else {
            self.tx_errors += 1;
        }
    }

    pub(crate) fn ul_crc(&mut self, crc: bool, tbs: i32) {
        self.rx_pkts += 1;
        if crc {
            self.rx_brate += tbs.max(0) as u64 * 8;
        } else {
            self.rx_errors += 1;
        }
    }

    pub(crate) fn discard(&mut self) {
        self.discards += 1;
    }
}
