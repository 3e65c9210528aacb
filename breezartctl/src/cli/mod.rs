//! Command-line surface of `breezartctl`
//!
//! `commands` holds the clap definitions, `handlers` runs them against
//! a [`breezart_client::DeviceClient`].

mod commands;
mod handlers;

pub use commands::*;
pub use handlers::*;
