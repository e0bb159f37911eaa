//! kpf-forward: Forward session manager
//!
//! Owns the table of local-to-pod forwards. At most one session exists per
//! [`SessionKey`](kpf_core::SessionKey); every start reserves its key before
//! any network work so concurrent starts for the same key are rejected.

pub mod allocator;
pub mod manager;
mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use manager::{ForwardManager, DEFAULT_ESTABLISH_TIMEOUT};
pub use session::{SessionFailure, SessionInfo};
