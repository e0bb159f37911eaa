//! Collaborator trait definitions

mod discovery;
mod tunnel;

pub use discovery::Discovery;
pub use tunnel::{TunnelNotifier, TunnelProvider, TunnelSignals};
