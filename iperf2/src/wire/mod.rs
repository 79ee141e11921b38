/*! Byte level access to the iperf2 records.

# Representations

The `wire` module deals with the three records exchanged by iperf2 peers, with two levels of
functionality each:

 * First, the lowercase byte wrappers [`settings`], [`datagram`] and [`report`] extract fields
   from sequences of octets and insert fields into them, in network byte order.
 * Second, the compact `Repr` structs [`Settings`], [`Header`] and [`Report`] can be parsed from
   such a wrapper and emitted back into one.

[`settings`]: struct.settings.html
[`datagram`]: struct.datagram.html
[`report`]: struct.report.html
[`Settings`]: struct.Settings.html
[`Header`]: struct.Header.html
[`Report`]: struct.Report.html

The wrappers guarantee that, if their `check_len()` method returned `Ok(())`, no field accessor or
setter will panic. The `Repr::parse()` methods never panic and the `Repr::emit()` methods never
panic as long as the buffer is at least `Repr::buffer_len()` octets long. Bytes beyond the known
size of a record are never inspected.

# Layout

A TCP stream starts with the settings record. A UDP test datagram starts with the [`Header`]
followed by the settings record, the remaining bytes are filler. The final statistics of a UDP
receiver travel in a datagram of the same header followed by a [`Report`].

```
# use iperf2::wire::{Amount, Flags, Settings, settings};
let repr = Settings {
    flags: Flags::ANSWER_TEST,
    num_threads: 1,
    remote_port: 5001,
    buffer_len: 0,
    win_band: 0,
    amount: Amount::from_raw(-1000),
    extended: None,
};

let mut buffer = vec![0; repr.buffer_len()];
repr.emit(settings::new_unchecked_mut(&mut buffer));
let parsed = Settings::parse(settings::new_checked(&buffer).unwrap()).unwrap();
assert_eq!(parsed, repr);
```
*/
#[path = "datagram.rs"]
mod datagram_impl;
mod error;
#[path = "settings.rs"]
mod settings_impl;

pub use self::error::{Error, Result};

pub use self::settings_impl::{
    settings,
    Amount,
    ExtFlags,
    Extended,
    Flags,
    Settings,
    BASE_LEN as SETTINGS_BASE_LEN,
    EXTENDED_LEN as SETTINGS_EXTENDED_LEN,
};

pub use self::datagram_impl::{
    datagram,
    report,
    Header,
    Report,
    HEADER_LEN as DATAGRAM_HEADER_LEN,
    REPORT_LEN as DATAGRAM_REPORT_LEN,
};

mod field {
    pub type Field = ::core::ops::Range<usize>;
}
