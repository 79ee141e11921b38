use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Flags, Result};
use crate::time::{Duration, Timestamp};

byte_wrapper! {
    /// A buffer containing a UDP test datagram.
    ///
    /// Starts with the sequence header, the payload after it is either a settings record with
    /// filler or, for datagrams from the receiver, the final report.
    pub struct datagram([u8]);
}

byte_wrapper! {
    /// A buffer containing the receiver report, found in the payload of a datagram.
    pub struct report([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub const ID: Field = 0..4;
    pub const TV_SEC: Field = 4..8;
    pub const TV_USEC: Field = 8..12;
    pub const ID2: Field = 12..16;
    pub const PAYLOAD: usize = ID2.end;

    pub const FLAGS: Field = 0..4;
    pub const TOTAL_LEN1: Field = 4..8;
    pub const TOTAL_LEN2: Field = 8..12;
    pub const STOP_SEC: Field = 12..16;
    pub const STOP_USEC: Field = 16..20;
    pub const ERROR_CNT: Field = 20..24;
    pub const OUTORDER_CNT: Field = 24..28;
    pub const DATAGRAMS: Field = 28..32;
    pub const JITTER1: Field = 32..36;
    pub const JITTER2: Field = 36..40;
}

/// Length of the sequence header of each datagram.
pub const HEADER_LEN: usize = field::PAYLOAD;

/// Length of the report record.
pub const REPORT_LEN: usize = field::JITTER2.end;

/// A high-level representation of the datagram header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Header {
    /// The sequence number, negated by a sender that has finished.
    pub id: i32,
    /// Time of sending on the sender's clock.
    pub timestamp: Timestamp,
    /// Upper half of 64-bit sequence numbers, unused.
    pub id2: i32,
}

/// A high-level representation of the receiver report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Report {
    pub flags: Flags,
    /// Bytes received in total.
    pub total_len: u64,
    /// Test duration on the receiver's clock.
    pub stop: Timestamp,
    /// Datagrams missing from the sequence.
    pub error_cnt: u32,
    /// Datagrams that arrived out of sequence.
    pub outorder_cnt: u32,
    /// Datagrams received.
    pub datagrams: u32,
    /// Smoothed transit time variation, in microseconds.
    pub jitter_us: u64,
}

impl datagram {
    /// Imbue a raw octet buffer with datagram structure.
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    /// Imbue a mutable octet buffer with datagram structure.
    pub fn new_unchecked_mut(data: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(data)
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(data: &[u8]) -> Result<&Self> {
        Self::new_unchecked(data).check_len()?;
        Ok(Self::new_unchecked(data))
    }

    /// Ensure that no accessor method will panic if called.
    ///
    /// Returns `Err(Error::Truncated)` if the buffer is too short for the header.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < HEADER_LEN {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    #[inline]
    pub fn id(&self) -> i32 {
        NetworkEndian::read_i32(&self.0[field::ID])
    }

    #[inline]
    pub fn tv_sec(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::TV_SEC])
    }

    #[inline]
    pub fn tv_usec(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::TV_USEC])
    }

    #[inline]
    pub fn id2(&self) -> i32 {
        NetworkEndian::read_i32(&self.0[field::ID2])
    }

    #[inline]
    pub fn set_id(&mut self, value: i32) {
        NetworkEndian::write_i32(&mut self.0[field::ID], value)
    }

    #[inline]
    pub fn set_tv_sec(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::TV_SEC], value)
    }

    #[inline]
    pub fn set_tv_usec(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::TV_USEC], value)
    }

    #[inline]
    pub fn set_id2(&mut self, value: i32) {
        NetworkEndian::write_i32(&mut self.0[field::ID2], value)
    }

    pub fn payload_slice(&self) -> &[u8] {
        &self.0[field::PAYLOAD..]
    }

    pub fn payload_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0[field::PAYLOAD..]
    }
}

impl report {
    /// Imbue a raw octet buffer with report structure.
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    /// Imbue a mutable octet buffer with report structure.
    pub fn new_unchecked_mut(data: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(data)
    }

    /// Shorthand for a combination of [new_unchecked] and [check_len].
    ///
    /// [new_unchecked]: #method.new_unchecked
    /// [check_len]: #method.check_len
    pub fn new_checked(data: &[u8]) -> Result<&Self> {
        Self::new_unchecked(data).check_len()?;
        Ok(Self::new_unchecked(data))
    }

    /// Ensure that no accessor method will panic if called.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < REPORT_LEN {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    #[inline]
    pub fn flags(&self) -> Flags {
        Flags(NetworkEndian::read_u32(&self.0[field::FLAGS]))
    }

    /// The 64-bit byte total, transmitted as two halves.
    #[inline]
    pub fn total_len(&self) -> u64 {
        let high = NetworkEndian::read_u32(&self.0[field::TOTAL_LEN1]);
        let low = NetworkEndian::read_u32(&self.0[field::TOTAL_LEN2]);
        u64::from(high) << 32 | u64::from(low)
    }

    #[inline]
    pub fn stop_sec(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::STOP_SEC])
    }

    #[inline]
    pub fn stop_usec(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::STOP_USEC])
    }

    #[inline]
    pub fn error_cnt(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::ERROR_CNT])
    }

    #[inline]
    pub fn outorder_cnt(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::OUTORDER_CNT])
    }

    #[inline]
    pub fn datagrams(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::DATAGRAMS])
    }

    /// Whole seconds of the jitter.
    #[inline]
    pub fn jitter1(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::JITTER1])
    }

    /// Microseconds of the jitter within the second.
    #[inline]
    pub fn jitter2(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::JITTER2])
    }

    #[inline]
    pub fn set_flags(&mut self, value: Flags) {
        NetworkEndian::write_u32(&mut self.0[field::FLAGS], value.0)
    }

    #[inline]
    pub fn set_total_len(&mut self, value: u64) {
        NetworkEndian::write_u32(&mut self.0[field::TOTAL_LEN1], (value >> 32) as u32);
        NetworkEndian::write_u32(&mut self.0[field::TOTAL_LEN2], value as u32);
    }

    #[inline]
    pub fn set_stop_sec(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::STOP_SEC], value)
    }

    #[inline]
    pub fn set_stop_usec(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::STOP_USEC], value)
    }

    #[inline]
    pub fn set_error_cnt(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::ERROR_CNT], value)
    }

    #[inline]
    pub fn set_outorder_cnt(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::OUTORDER_CNT], value)
    }

    #[inline]
    pub fn set_datagrams(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::DATAGRAMS], value)
    }

    #[inline]
    pub fn set_jitter1(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::JITTER1], value)
    }

    #[inline]
    pub fn set_jitter2(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::JITTER2], value)
    }
}

impl AsRef<[u8]> for datagram {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for report {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Header {
    /// Parse a datagram header and return a high-level representation.
    pub fn parse(packet: &datagram) -> Result<Header> {
        packet.check_len()?;
        Ok(Header {
            id: packet.id(),
            timestamp: Timestamp {
                secs: packet.tv_sec(),
                micros: packet.tv_usec(),
            },
            id2: packet.id2(),
        })
    }

    /// Return the length of a header emitted from this representation.
    pub fn buffer_len(&self) -> usize {
        HEADER_LEN
    }

    /// Emit a high-level representation into a datagram.
    pub fn emit(&self, packet: &mut datagram) {
        packet.set_id(self.id);
        packet.set_tv_sec(self.timestamp.secs);
        packet.set_tv_usec(self.timestamp.micros);
        packet.set_id2(self.id2);
    }

    /// Check if the sender signals the end of its test.
    pub fn is_final(&self) -> bool {
        self.id < 0
    }
}

impl Report {
    /// Parse a report record and return a high-level representation.
    pub fn parse(packet: &report) -> Result<Report> {
        packet.check_len()?;
        Ok(Report {
            flags: packet.flags(),
            total_len: packet.total_len(),
            stop: Timestamp {
                secs: packet.stop_sec(),
                micros: packet.stop_usec(),
            },
            error_cnt: packet.error_cnt(),
            outorder_cnt: packet.outorder_cnt(),
            datagrams: packet.datagrams(),
            jitter_us: u64::from(packet.jitter1()) * 1_000_000 + u64::from(packet.jitter2()),
        })
    }

    /// Return the length of a report emitted from this representation.
    pub fn buffer_len(&self) -> usize {
        REPORT_LEN
    }

    /// Emit a high-level representation into a report record.
    pub fn emit(&self, packet: &mut report) {
        packet.set_flags(self.flags);
        packet.set_total_len(self.total_len);
        packet.set_stop_sec(self.stop.secs);
        packet.set_stop_usec(self.stop.micros);
        packet.set_error_cnt(self.error_cnt);
        packet.set_outorder_cnt(self.outorder_cnt);
        packet.set_datagrams(self.datagrams);
        packet.set_jitter1((self.jitter_us / 1_000_000) as u32);
        packet.set_jitter2((self.jitter_us % 1_000_000) as u32);
    }

    /// The receiver's measured test duration.
    pub fn duration(&self) -> Duration {
        Duration::new(self.stop.secs.into(), self.stop.micros.saturating_mul(1000))
    }
}
