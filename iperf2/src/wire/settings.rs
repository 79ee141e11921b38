use core::{fmt, ops};
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};
use crate::time::Duration;

byte_wrapper! {
    /// A buffer containing the settings record a client sends ahead of its data.
    ///
    /// The base record is always present. The extended block follows it only if the flags carry
    /// [`Flags::EXTEND`], a record without it comes from a legacy client.
    ///
    /// [`Flags::EXTEND`]: struct.Flags.html#associatedconstant.EXTEND
    pub struct settings([u8]);
}

mod field {
    use crate::wire::field::Field;

    pub const FLAGS: Field = 0..4;
    pub const NUM_THREADS: Field = 4..8;
    pub const REMOTE_PORT: Field = 8..12;
    pub const BUFFER_LEN: Field = 12..16;
    pub const WIN_BAND: Field = 16..20;
    pub const AMOUNT: Field = 20..24;

    pub const TYPE: Field = 24..28;
    pub const LEN: Field = 28..32;
    pub const EFLAGS: Field = 32..36;
    pub const VERSION_U: Field = 36..40;
    pub const VERSION_L: Field = 40..44;
    pub const RESERVED: Field = 44..48;
    pub const RATE: Field = 48..52;
    pub const RATE_UNITS: Field = 52..56;
    pub const REAL_TIME: Field = 56..60;
}

/// Length of the base settings record.
pub const BASE_LEN: usize = field::AMOUNT.end;

/// Length of the settings record including the extended block.
pub const EXTENDED_LEN: usize = field::REAL_TIME.end;

/// The flags word of the base settings record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u32);

/// The flags word of the extended block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExtFlags(pub u32);

/// The test limit, either a byte count or a run time.
///
/// On the wire this is one signed word, a negative value being a time in hundredths of a second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Amount {
    /// Stop after this many bytes.
    Bytes(u32),
    /// Stop after this many hundredths of a second.
    Time(u32),
}

/// The extended settings block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extended {
    pub kind: i32,
    pub len: i32,
    pub eflags: ExtFlags,
    pub version_u: i32,
    pub version_l: i32,
    pub reserved: i32,
    /// Requested rate, in bits per second unless the units flag says packets.
    pub rate: i32,
    pub rate_units: i32,
    pub real_time: i32,
}

/// A high-level representation of a settings record.
///
/// The `EXTEND` bit of `flags` and the presence of `extended` are kept in agreement by
/// [`parse`], [`extend`] and [`clear_flags`].
///
/// [`parse`]: #method.parse
/// [`extend`]: #method.extend
/// [`clear_flags`]: #method.clear_flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Settings {
    pub flags: Flags,
    pub num_threads: u32,
    /// The port on which the client expects a connection back.
    pub remote_port: u32,
    /// Requested write or datagram size, zero for the default.
    pub buffer_len: u32,
    /// TCP window or UDP rate.
    pub win_band: u32,
    pub amount: Amount,
    pub extended: Option<Extended>,
}

impl Flags {
    /// The server should run a test back to the client.
    pub const ANSWER_TEST: Flags = Flags(0x8000_0000);
    /// The extended block follows the base record.
    pub const EXTEND: Flags = Flags(0x4000_0000);
    pub const UDP_TESTS: Flags = Flags(0x2000_0000);
    pub const SEQNO_64B: Flags = Flags(0x0800_0000);
    pub const VERSION2: Flags = Flags(0x0400_0000);
    /// The test back should run in parallel instead of after the client finished.
    pub const ANSWER_NOW: Flags = Flags(0x0000_0001);

    pub const fn empty() -> Self {
        Flags(0)
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    pub fn answer_test(self) -> bool {
        self.contains(Flags::ANSWER_TEST)
    }

    pub fn answer_now(self) -> bool {
        self.contains(Flags::ANSWER_NOW)
    }

    pub fn extend(self) -> bool {
        self.contains(Flags::EXTEND)
    }
}

impl ExtFlags {
    pub const UNITS_PPS: ExtFlags = ExtFlags(0x0000_0001);
    /// The server should transmit on the client's connection.
    pub const REVERSE: ExtFlags = ExtFlags(0x0400_0000);

    pub fn contains(self, other: ExtFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ExtFlags) {
        self.0 |= other.0;
    }

    pub fn reverse(self) -> bool {
        self.contains(ExtFlags::REVERSE)
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

impl fmt::LowerHex for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Amount {
    /// Interpret the signed wire value.
    pub fn from_raw(raw: i32) -> Self {
        if raw < 0 {
            Amount::Time(raw.unsigned_abs())
        } else {
            Amount::Bytes(raw as u32)
        }
    }

    /// The signed wire value.
    pub fn raw(self) -> i32 {
        match self {
            Amount::Bytes(bytes) => bytes as i32,
            Amount::Time(centis) => (centis as i32).wrapping_neg(),
        }
    }

    /// Check if the signed wire word can carry this limit.
    ///
    /// Byte counts above `i32::MAX` and a run time of zero have no encoding.
    pub fn fits_wire(self) -> bool {
        match self {
            Amount::Bytes(bytes) => bytes <= i32::MAX as u32,
            Amount::Time(centis) => centis != 0 && centis <= i32::MIN.unsigned_abs(),
        }
    }

    /// The run time, if this is a time limited test.
    pub fn time_limit(self) -> Option<Duration> {
        match self {
            Amount::Time(centis) => Some(Duration::from_millis(u64::from(centis) * 10)),
            Amount::Bytes(_) => None,
        }
    }

    /// The byte count, if this is a byte limited test.
    pub fn byte_limit(self) -> Option<u64> {
        match self {
            Amount::Bytes(bytes) => Some(bytes.into()),
            Amount::Time(_) => None,
        }
    }

    /// Check if a test with this limit is over.
    pub fn reached(self, elapsed: Duration, bytes: u64) -> bool {
        self.reached_with_margin(elapsed, bytes, Duration::from_millis(0), 0)
    }

    /// Check if a test is over even when allowing for some slack.
    ///
    /// Only the margin matching the kind of limit applies.
    pub fn reached_with_margin(self, elapsed: Duration, bytes: u64, time: Duration, volume: u64) -> bool {
        match self {
            Amount::Time(_) => self.time_limit()
                .map_or(false, |limit| elapsed >= limit + time),
            Amount::Bytes(limit) => bytes >= u64::from(limit) + volume,
        }
    }
}

impl Default for Amount {
    fn default() -> Self {
        Amount::Bytes(0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Amount::Bytes(bytes) => write!(f, "{} bytes", bytes),
            Amount::Time(centis) => write!(f, "{}.{:02}s", centis / 100, centis % 100),
        }
    }
}

impl settings {
    /// Imbue a raw octet buffer with settings record structure.
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    /// Imbue a mutable octet buffer with settings record structure.
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

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Ensure that no accessor method will panic if called.
    ///
    /// Returns `Err(Error::Truncated)` if the buffer is shorter than the base record or, when the
    /// flags announce the extended block, shorter than the extended record.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < BASE_LEN {
            Err(Error::Truncated)
        } else if self.flags().extend() && self.0.len() < EXTENDED_LEN {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }

    #[inline]
    pub fn flags(&self) -> Flags {
        Flags(NetworkEndian::read_u32(&self.0[field::FLAGS]))
    }

    #[inline]
    pub fn num_threads(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::NUM_THREADS])
    }

    #[inline]
    pub fn remote_port(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::REMOTE_PORT])
    }

    #[inline]
    pub fn buffer_len(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::BUFFER_LEN])
    }

    #[inline]
    pub fn win_band(&self) -> u32 {
        NetworkEndian::read_u32(&self.0[field::WIN_BAND])
    }

    /// Return the signed amount field.
    #[inline]
    pub fn amount(&self) -> i32 {
        NetworkEndian::read_i32(&self.0[field::AMOUNT])
    }

    /// Read the extended block, without regard for the flags.
    ///
    /// # Panics
    /// This function panics if the buffer is shorter than the extended record.
    pub fn extended(&self) -> Extended {
        let read = |field: ops::Range<usize>| NetworkEndian::read_i32(&self.0[field]);
        Extended {
            kind: read(field::TYPE),
            len: read(field::LEN),
            eflags: ExtFlags(NetworkEndian::read_u32(&self.0[field::EFLAGS])),
            version_u: read(field::VERSION_U),
            version_l: read(field::VERSION_L),
            reserved: read(field::RESERVED),
            rate: read(field::RATE),
            rate_units: read(field::RATE_UNITS),
            real_time: read(field::REAL_TIME),
        }
    }

    #[inline]
    pub fn set_flags(&mut self, value: Flags) {
        NetworkEndian::write_u32(&mut self.0[field::FLAGS], value.0)
    }

    #[inline]
    pub fn set_num_threads(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::NUM_THREADS], value)
    }

    #[inline]
    pub fn set_remote_port(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::REMOTE_PORT], value)
    }

    #[inline]
    pub fn set_buffer_len(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::BUFFER_LEN], value)
    }

    #[inline]
    pub fn set_win_band(&mut self, value: u32) {
        NetworkEndian::write_u32(&mut self.0[field::WIN_BAND], value)
    }

    #[inline]
    pub fn set_amount(&mut self, value: i32) {
        NetworkEndian::write_i32(&mut self.0[field::AMOUNT], value)
    }

    /// Write the extended block, without touching the flags.
    ///
    /// # Panics
    /// This function panics if the buffer is shorter than the extended record.
    pub fn set_extended(&mut self, ext: &Extended) {
        let data = &mut self.0;
        NetworkEndian::write_i32(&mut data[field::TYPE], ext.kind);
        NetworkEndian::write_i32(&mut data[field::LEN], ext.len);
        NetworkEndian::write_u32(&mut data[field::EFLAGS], ext.eflags.0);
        NetworkEndian::write_i32(&mut data[field::VERSION_U], ext.version_u);
        NetworkEndian::write_i32(&mut data[field::VERSION_L], ext.version_l);
        NetworkEndian::write_i32(&mut data[field::RESERVED], ext.reserved);
        NetworkEndian::write_i32(&mut data[field::RATE], ext.rate);
        NetworkEndian::write_i32(&mut data[field::RATE_UNITS], ext.rate_units);
        NetworkEndian::write_i32(&mut data[field::REAL_TIME], ext.real_time);
    }
}

impl AsRef<[u8]> for settings {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Settings {
    /// Parse a settings record and return a high-level representation.
    pub fn parse(packet: &settings) -> Result<Settings> {
        packet.check_len()?;

        let extended = if packet.flags().extend() {
            let ext = packet.extended();
            if ext.len < 0 {
                return Err(Error::Malformed);
            }
            Some(ext)
        } else {
            None
        };

        Ok(Settings {
            flags: packet.flags(),
            num_threads: packet.num_threads(),
            remote_port: packet.remote_port(),
            buffer_len: packet.buffer_len(),
            win_band: packet.win_band(),
            amount: Amount::from_raw(packet.amount()),
            extended,
        })
    }

    /// Return the length of the record emitted from this representation.
    pub fn buffer_len(&self) -> usize {
        match self.extended {
            Some(_) => EXTENDED_LEN,
            None => BASE_LEN,
        }
    }

    /// Emit a high-level representation into a settings record.
    pub fn emit(&self, packet: &mut settings) {
        packet.set_flags(self.flags);
        packet.set_num_threads(self.num_threads);
        packet.set_remote_port(self.remote_port);
        packet.set_buffer_len(self.buffer_len);
        packet.set_win_band(self.win_band);
        packet.set_amount(self.amount.raw());
        if let Some(ext) = &self.extended {
            packet.set_extended(ext);
        }
    }

    /// The record as it precedes a TCP stream.
    ///
    /// TCP peers always exchange the full length, the extended half is zero without the flag.
    pub fn stream_record(&self) -> [u8; EXTENDED_LEN] {
        let mut record = [0; EXTENDED_LEN];
        self.emit(settings::new_unchecked_mut(&mut record[..]));
        record
    }

    /// Add the extended block, setting the flag that announces it.
    pub fn extend(&mut self) -> &mut Extended {
        self.flags.insert(Flags::EXTEND);
        self.extended.get_or_insert_with(Extended::default)
    }

    /// Drop all requests, so that a receiver of this record never answers back.
    pub fn clear_flags(&mut self) {
        self.flags = Flags::empty();
        self.extended = None;
    }

    /// Check for a request that the server transmits on this connection.
    pub fn is_reverse(&self) -> bool {
        self.flags.extend() && self.extended.map_or(false, |ext| ext.eflags.reverse())
    }

    /// The rate requested in the extended block.
    pub fn rate(&self) -> Option<i32> {
        self.extended.filter(|_| self.flags.extend()).map(|ext| ext.rate)
    }
}
