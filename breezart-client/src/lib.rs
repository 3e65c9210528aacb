//! breezart-client
//!
//! Network client for Breezart ventilation controllers. Layers, bottom up:
//!
//! - `transport`: line-framed TCP and serial transports behind the
//!   `Transport`/`Connector` traits
//! - `protocol`: typed requests and responses, and the `LineCodec`
//! - `session::SessionManager`: connect, authenticate, state machine,
//!   one request in flight
//! - `client::DeviceClient`: power, rotation speed and status with the
//!   configured lifecycle policy
//! - `simulator::ControllerSimulator`: software controller for tests and
//!   the CLI's mock mode

pub mod client;
pub mod protocol;
pub mod session;
pub mod simulator;
pub mod transport;

pub use client::DeviceClient;
pub use protocol::{Codec, Command, LineCodec, Request, Response};
pub use session::{SessionManager, SessionState};
pub use simulator::ControllerSimulator;
pub use transport::{Connector, LineDriver, SerialConnector, TcpConnector, Transport};
