//! kpf-core: Core abstractions and configuration for kpf
//!
//! This crate provides the domain types, error taxonomy, collaborator
//! traits and configuration shared by the forward manager, the Kubernetes
//! backend and the TUI.

pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{ConfigError, DiscoveryError, ForwardError, TunnelError};
pub use traits::{Discovery, TunnelNotifier, TunnelProvider, TunnelSignals};
pub use types::{ForwardState, PodTarget, PortRecord, ServiceRecord, SessionKey};
