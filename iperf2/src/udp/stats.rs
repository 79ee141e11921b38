//! Receiver statistics of a UDP test.

/// Sequence accounting of received datagrams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// The next expected sequence number.
    pub expected: u32,
    /// Datagrams skipped by the sequence.
    pub lost: u32,
    /// Datagrams not arriving as expected.
    pub out_of_order: u32,
    /// Datagrams received.
    pub packets: u32,
    pub jitter: Jitter,
}

/// Interarrival jitter, smoothed as for RTP (RFC 1889).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Jitter {
    /// The smoothed estimate in microseconds.
    pub estimate: i64,
    last_transit: Option<u32>,
}

impl Stats {
    /// Account for a datagram with a non-negative sequence number.
    ///
    /// A gap counts every skipped number as lost and the datagram as out of order. A late or
    /// repeated number is only out of order. The sequence continues after the received number in
    /// any case.
    pub fn record(&mut self, seq: i32) {
        let seq = seq as u32;
        if seq != self.expected {
            let gap = seq.wrapping_sub(self.expected) as i32;
            if gap > 0 {
                self.lost = self.lost.saturating_add(gap as u32);
            }
            self.out_of_order += 1;
        }
        self.expected = seq.wrapping_add(1);
        self.packets += 1;
    }
}

impl Jitter {
    /// Add a transit time sample, in microseconds of a wrapping clock.
    pub fn update(&mut self, transit: u32) {
        if let Some(last) = self.last_transit {
            let delta = i64::from(transit.wrapping_sub(last) as i32).abs();
            self.estimate += (delta - self.estimate) >> 4;
        }
        self.last_transit = Some(transit);
    }

    /// The estimate in whole microseconds.
    pub fn micros(&self) -> u64 {
        self.estimate.max(0) as u64
    }
}
