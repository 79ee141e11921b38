//! Containers with a fixed capacity chosen at construction.
//!
//! The test engine never grows beyond the number of sessions configured by the host, so all its
//! bookkeeping goes through these instead of unbounded collections.
pub mod slotmap;

pub use self::slotmap::{Key, SlotMap};
