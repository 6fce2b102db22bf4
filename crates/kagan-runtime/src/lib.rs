//! Kagan core host: instance lease, IPC server, capability dispatch,
//! storage, domain event bus, automation orchestrator and ACP agent
//! supervisor (spec §4).

pub mod acp;
pub mod dispatch;
pub mod events;
pub mod idempotency;
pub mod instrumentation;
pub mod jobs;
pub mod lease;
pub mod merge;
pub mod orchestrator;
pub mod plugins;
pub mod queued_messages;
pub mod registry;
pub mod server;
pub mod storage;
pub mod transport;
pub mod worktree;
