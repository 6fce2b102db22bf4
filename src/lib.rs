//! Thin CLI launcher for the Kagan core host. All actual orchestration,
//! storage and protocol logic lives in the `kagan-runtime` crate; this
//! package only knows how to start it, ask whether it's running, and stop
//! it.

pub mod core;
