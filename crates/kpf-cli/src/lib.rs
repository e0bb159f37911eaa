//! kpf: Kubernetes port forwarding TUI
//!
//! Lists the Services of a cluster, one row per port, and toggles local
//! forwards to them. The [`app::App`] state machine owns all view state and
//! talks to the forward manager only through [`app::Command`]s and
//! [`app::Message`]s.

pub mod app;
pub mod output;
pub mod runner;
pub mod table;
pub mod ui;
