//! Host lifecycle.
//!
//! A host assembles *hosted routines* (a node is one), drives their
//! dependency-ordered start/stop phases, and blocks until a process signal
//! or an explicit [`HostApplication::stop`]. Application-level listeners
//! observe started / stopping / stopped transitions.

mod application;
mod host;
mod routine;

pub use application::HostApplication;
pub use host::{Host, HostBuilder};
pub use routine::{HostedRoutine, LifecycleRoutine};
