//! Agent Client Protocol subsystem (spec §4.12-§4.14): spawning and
//! negotiating with agent processes, terminal emulation, and permission
//! brokering.

pub mod jsonrpc;
pub mod messages;
pub mod negotiation;
pub mod permission;
pub mod registry;
pub mod supervisor;
pub mod terminal;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcpError {
    #[error("supervisor error: {0}")]
    Supervisor(#[from] supervisor::SupervisorError),

    #[error("terminal error: {0}")]
    Terminal(#[from] terminal::TerminalError),

    #[error("backend error: {0}")]
    Backend(#[from] registry::BackendError),

    #[error(transparent)]
    Rpc(#[from] jsonrpc::RpcError),
}
