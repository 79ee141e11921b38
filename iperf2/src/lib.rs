//! An iperf2 compatible bandwidth test engine for callback driven network stacks.
//!
//! ## Table of contents
//!
//! 1. [Design](#design)
//! 2. [The engine](engine/index.html)
//! 3. [The wire module](wire/index.html)
//! 4. [Sessions and reports](session/index.html)
//! 5. Transports
//!    1. [The stack interface](stack/index.html)
//!    1. [TCP tests](tcp/index.html)
//!    1. [UDP tests](udp/index.html)
//! 6. Internals
//!    1. [The managed module](managed/index.html)
//!
//! ## Design
//!
//! The engine speaks the protocol of iperf 2 on both ends: as a server accepting tests from
//! stock `iperf -s`, and as a client measuring against stock servers, including the reverse,
//! dual and tradeoff modes in which the server transmits back.
//!
//! Nothing here ever blocks or spawns. The host owns the network stack and hands it to every call
//! as an implementation of [`Stack`]. It forwards socket events and expired timers to the
//! engine, and polls it regularly to pace UDP senders. All calls happen on one thread, one at a
//! time. Sessions refer to each other only through generation checked ids, so an event for a
//! session that was closed in the meantime is ignored instead of touching a stale one.
//!
//! Each test ends with exactly one [`Report`] to the [`Reporter`] of the engine.
//!
//! [`Stack`]: stack/trait.Stack.html
//! [`Report`]: session/struct.Report.html
//! [`Reporter`]: session/trait.Reporter.html
#![warn(missing_docs)]

// tests should be able to use `std`
#![cfg_attr(all(
    not(feature = "std"),
    not(test)),
no_std)]

extern crate alloc;

#[macro_use] mod macros;
pub mod config;
pub mod engine;
pub mod managed;
pub mod pattern;
pub mod session;
pub mod stack;
pub mod tcp;
pub mod time;
pub mod udp;
pub mod wire;

pub use config::{Config, TcpClient, UdpClient};
pub use engine::{Error, Iperf};
pub use session::{FnReporter, Mode, Outcome, Report, Reporter, SessionId};
