//! Rate control of UDP senders.

/// How often a sender may send, and how many datagrams at once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Pacing {
    /// Minimum time between two bursts, in microseconds.
    pub delay_us: u32,
    /// Datagrams per burst.
    pub frames: u32,
}

impl Pacing {
    /// Pace datagrams of `len` bytes to `rate` bits per second.
    ///
    /// The delay is truncated to the clock resolution, so the effective rate may be somewhat
    /// higher. Rates that would need a delay below the resolution send several datagrams per tick
    /// instead.
    pub fn new(rate: u32, len: u32, resolution_us: u32) -> Self {
        let resolution = resolution_us.max(1);
        let ideal = Self::ideal_delay(rate, len);
        net_trace!("ideal frame delay: {} us", ideal);

        let delay = ideal / resolution * resolution;
        let pacing = match delay {
            0 => Pacing { delay_us: resolution, frames: resolution / ideal.max(1) },
            delay => Pacing { delay_us: delay, frames: 1 },
        };
        net_debug!("sending {} frame(s) once per {} us", pacing.frames, pacing.delay_us);
        pacing
    }

    /// The exact delay between datagrams for a rate, in microseconds.
    pub fn ideal_delay(rate: u32, len: u32) -> u32 {
        let delay = u64::from(len) * 8 * 1_000_000 / u64::from(rate.max(1));
        delay.min(u32::MAX.into()) as u32
    }

    /// Send one datagram on every opportunity.
    pub fn immediate() -> Self {
        Pacing { delay_us: 0, frames: 1 }
    }
}
