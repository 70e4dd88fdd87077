#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Process bootstrap: construct the gateways bottom-up, wire the services,
//! spawn the workers, and host the API.

pub mod bootstrap;

pub use bootstrap::{AppHandles, build, run};
