//! proctor.telemetry_event.v1 schema
//!
//! Wire format for proctoring telemetry, its validated typed form, and the
//! batch adapter used at the store boundary.

mod adapter;
mod event;
mod raw_event;

pub use adapter::*;
pub use event::*;
pub use raw_event::*;
