//! Initialize a buffer with the iperf pattern.
//!
//! The payload of both TCP streams and UDP datagrams is the repeated sequence of ASCII digits,
//! continued across writes so that a receiver can check alignment.

/// Length of the static pattern slice.
///
/// Longer than the largest segment on common links, plus one full period for alignment.
pub const LEN: usize = 1600;

/// The pattern, starting at digit `0`.
pub static DIGITS: [u8; LEN] = digits();

const fn digits() -> [u8; LEN] {
    let mut buf = [0; LEN];
    let mut i = 0;
    while i < LEN {
        buf[i] = b'0' + (i % 10) as u8;
        i += 1;
    }
    buf
}

/// A slice of the pattern at some position of the sequence.
///
/// The `offset` is the offset in the sequence, modulo 10. The length is clipped to what the static
/// pattern provides.
pub fn slice(offset: usize, len: usize) -> &'static [u8] {
    let start = offset % 10;
    let end = start + len.min(LEN - 10);
    &DIGITS[start..end]
}

/// Initialize a buffer with the full pattern.
///
/// The `offset` is the offset in the sequence, modulo 10.
#[inline]
pub fn init(buf: &mut [u8], offset: usize) {
    let start = offset % 10;
    let period = LEN - 10;
    buf.chunks_mut(period)
        .for_each(|chunk| chunk.copy_from_slice(&DIGITS[start..start + chunk.len()]));
}
