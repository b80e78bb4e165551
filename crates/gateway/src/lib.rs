//! HTTP gateway for the orgbridge connection manager.
//!
//! The binary (`orgbridge`) parses the CLI, initialises tracing, builds the
//! [`AppState`](state::AppState) via [`bootstrap`] and serves [`api::router`].

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod state;
