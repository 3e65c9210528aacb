//! Controller protocol codec
//!
//! Requests and responses are single ASCII lines. Fields are separated by
//! `_`, the first field is the command tag, numbers are hexadecimal:
//!
//! ```text
//! VAuth_<password>   -> VAuth_OK
//! VPr07              -> VPr07_<min>_<max>[_<firmware>]
//! VSt07              -> VSt07_<unit_state>_<speed_step>[_...]
//! VWPwr_<0|1>        -> VWPwr_OK
//! VWSpd_<step>       -> VWSpd_OK
//! ```
//!
//! Errors come back as `VE...` codes instead of the tagged response.

use breezart_core::{BreezartError, DeviceProperties, Result, UnitState, UnitStatus};
use std::fmt;
use tracing::{debug, warn};

/// Separator between fields of a line
pub const FIELD_SEPARATOR: char = '_';

/// Acknowledgement payload of a successful command
const ACK: &str = "OK";

/// Controller error codes
pub mod error_codes {
    /// Password rejected
    pub const BAD_PASSWORD: &str = "VEPas";
    /// Command sent before authenticating
    pub const NOT_AUTHENTICATED: &str = "VEAut";
    /// Unknown command
    pub const UNKNOWN_COMMAND: &str = "VECmd";
    /// Malformed request or out-of-range value
    pub const BAD_FORMAT: &str = "VEFrm";
    /// Common prefix of all error codes
    pub const PREFIX: &str = "VE";
}

/// Commands supported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Authenticate,
    GetProperties,
    GetStatus,
    SetPower,
    SetSpeed,
}

impl Command {
    /// Tag that starts both the request and its response
    pub fn tag(self) -> &'static str {
        match self {
            Command::Authenticate => "VAuth",
            Command::GetProperties => "VPr07",
            Command::GetStatus => "VSt07",
            Command::SetPower => "VWPwr",
            Command::SetSpeed => "VWSpd",
        }
    }
}

/// A request to the controller
#[derive(Clone, PartialEq, Eq)]
pub enum Request {
    Authenticate { password: String },
    GetProperties,
    GetStatus,
    SetPower(bool),
    /// Device-native speed step
    SetSpeed(u32),
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::Authenticate { .. } => Command::Authenticate,
            Request::GetProperties => Command::GetProperties,
            Request::GetStatus => Command::GetStatus,
            Request::SetPower(_) => Command::SetPower,
            Request::SetSpeed(_) => Command::SetSpeed,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Authenticate { .. } => f.write_str("Authenticate { password: <redacted> }"),
            Request::GetProperties => f.write_str("GetProperties"),
            Request::GetStatus => f.write_str("GetStatus"),
            Request::SetPower(on) => write!(f, "SetPower({})", on),
            Request::SetSpeed(step) => write!(f, "SetSpeed({})", step),
        }
    }
}

/// A decoded response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Authenticated,
    Properties(DeviceProperties),
    Status(UnitStatus),
    Ack,
}

/// Wire codec between typed requests and protocol lines
///
/// Implement this to talk to a controller with a different wire format;
/// the session manager and device client only see [`Request`] and
/// [`Response`].
pub trait Codec: Send + Sync {
    /// Encode a request into one line (without terminator)
    fn encode(&self, request: &Request) -> String;

    /// Decode the response line to a request of kind `command`
    fn decode(&self, command: Command, line: &str) -> Result<Response>;

    /// Whether `line` answers a request of kind `command`
    ///
    /// Controller error lines answer whatever request was pending.
    fn is_response_to(&self, command: Command, line: &str) -> bool;
}

/// Default line codec
#[derive(Debug, Clone, Copy, Default)]
pub struct LineCodec;

impl Codec for LineCodec {
    fn encode(&self, request: &Request) -> String {
        let tag = request.command().tag();
        match request {
            Request::Authenticate { password } => {
                format!("{}{}{}", tag, FIELD_SEPARATOR, password)
            }
            Request::GetProperties | Request::GetStatus => tag.to_string(),
            Request::SetPower(on) => format!("{}{}{}", tag, FIELD_SEPARATOR, u8::from(*on)),
            Request::SetSpeed(step) => format!("{}{}{:X}", tag, FIELD_SEPARATOR, step),
        }
    }

    fn decode(&self, command: Command, line: &str) -> Result<Response> {
        let line = line.trim();

        if line.starts_with(error_codes::PREFIX) {
            return Err(controller_error(command, line));
        }

        if !self.is_response_to(command, line) {
            warn!(
                "Response tag mismatch: expected {}, got {:?}",
                command.tag(),
                line
            );
            return Err(BreezartError::Protocol(format!(
                "Expected response to {}, got: {}",
                command.tag(),
                line
            )));
        }

        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        let response = match command {
            Command::Authenticate => {
                expect_ack(command, &fields)?;
                Response::Authenticated
            }
            Command::SetPower | Command::SetSpeed => {
                expect_ack(command, &fields)?;
                Response::Ack
            }
            Command::GetProperties => {
                let speed_min = parse_hex_field(&fields, 1, "speed_min")?;
                let speed_max = parse_hex_field(&fields, 2, "speed_max")?;
                let firmware = fields
                    .get(3)
                    .filter(|f| !f.is_empty())
                    .map(|f| f.to_string());
                Response::Properties(DeviceProperties {
                    speed_min,
                    speed_max,
                    firmware,
                })
            }
            Command::GetStatus => {
                let code = parse_hex_field(&fields, 1, "unit_state")?;
                let unit_state = u16::try_from(code).map_err(|_| {
                    BreezartError::Protocol(format!("Unit state out of range: {:X}", code))
                })?;
                let speed_step = parse_hex_field(&fields, 2, "speed_step")?;
                Response::Status(UnitStatus {
                    unit_state: UnitState(unit_state),
                    speed_step,
                })
            }
        };

        debug!("Decoded {:?} response: {:?}", command, response);
        Ok(response)
    }

    fn is_response_to(&self, command: Command, line: &str) -> bool {
        let line = line.trim();
        line.starts_with(error_codes::PREFIX)
            || line.split(FIELD_SEPARATOR).next() == Some(command.tag())
    }
}

/// Map a `VE...` line to an error
fn controller_error(command: Command, code: &str) -> BreezartError {
    match code {
        error_codes::BAD_PASSWORD => {
            BreezartError::Authentication("Controller rejected the password".to_string())
        }
        error_codes::NOT_AUTHENTICATED => BreezartError::Authentication(
            "Controller reports the session is not authenticated".to_string(),
        ),
        error_codes::UNKNOWN_COMMAND => BreezartError::Protocol(format!(
            "Controller does not support {}",
            command.tag()
        )),
        error_codes::BAD_FORMAT => BreezartError::Protocol(format!(
            "Controller rejected {} as malformed",
            command.tag()
        )),
        other => BreezartError::Protocol(format!(
            "Controller error {} in response to {}",
            other,
            command.tag()
        )),
    }
}

fn expect_ack(command: Command, fields: &[&str]) -> Result<()> {
    match fields.get(1) {
        Some(value) if *value == ACK && fields.len() == 2 => Ok(()),
        _ => Err(BreezartError::Protocol(format!(
            "Expected {}_{}, got: {}",
            command.tag(),
            ACK,
            fields.join("_")
        ))),
    }
}

fn parse_hex_field(fields: &[&str], index: usize, name: &str) -> Result<u32> {
    let raw = fields.get(index).ok_or_else(|| {
        BreezartError::Protocol(format!("Missing {} field in: {}", name, fields.join("_")))
    })?;
    u32::from_str_radix(raw, 16).map_err(|e| {
        BreezartError::Protocol(format!("Invalid {} value: {} - {}", name, raw, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(command: Command, line: &str) -> Result<Response> {
        LineCodec.decode(command, line)
    }

    #[test]
    fn test_command_tags() {
        assert_eq!(Command::Authenticate.tag(), "VAuth");
        assert_eq!(Command::GetProperties.tag(), "VPr07");
        assert_eq!(Command::GetStatus.tag(), "VSt07");
        assert_eq!(Command::SetPower.tag(), "VWPwr");
        assert_eq!(Command::SetSpeed.tag(), "VWSpd");
    }

    #[test]
    fn test_encode() {
        let codec = LineCodec;
        assert_eq!(
            codec.encode(&Request::Authenticate {
                password: "7531".to_string()
            }),
            "VAuth_7531"
        );
        assert_eq!(codec.encode(&Request::GetProperties), "VPr07");
        assert_eq!(codec.encode(&Request::GetStatus), "VSt07");
        assert_eq!(codec.encode(&Request::SetPower(true)), "VWPwr_1");
        assert_eq!(codec.encode(&Request::SetPower(false)), "VWPwr_0");
        assert_eq!(codec.encode(&Request::SetSpeed(4)), "VWSpd_4");
        assert_eq!(codec.encode(&Request::SetSpeed(10)), "VWSpd_A");
    }

    #[test]
    fn test_request_debug_redacts_password() {
        let request = Request::Authenticate {
            password: "7531".to_string(),
        };
        assert!(!format!("{:?}", request).contains("7531"));
    }

    #[test]
    fn test_decode_status() {
        let response = decode(Command::GetStatus, "VSt07_3_4").unwrap();
        assert_eq!(
            response,
            Response::Status(UnitStatus {
                unit_state: UnitState(3),
                speed_step: 4,
            })
        );

        // Hex fields and trailing extras
        let response = decode(Command::GetStatus, "VSt07_1_a_17_2F\r\n").unwrap();
        assert_eq!(
            response,
            Response::Status(UnitStatus {
                unit_state: UnitState(1),
                speed_step: 10,
            })
        );
    }

    #[test]
    fn test_decode_status_malformed() {
        for line in ["VSt07", "VSt07_1", "VSt07_X_4", "VSt07_1_", "VSt07_10000_1"] {
            assert!(
                matches!(
                    decode(Command::GetStatus, line),
                    Err(BreezartError::Protocol(_))
                ),
                "line {:?}",
                line
            );
        }
    }

    #[test]
    fn test_decode_properties() {
        let response = decode(Command::GetProperties, "VPr07_1_A_fw2.4").unwrap();
        assert_eq!(
            response,
            Response::Properties(DeviceProperties {
                speed_min: 1,
                speed_max: 10,
                firmware: Some("fw2.4".to_string()),
            })
        );

        let response = decode(Command::GetProperties, "VPr07_0_6").unwrap();
        assert_eq!(
            response,
            Response::Properties(DeviceProperties {
                speed_min: 0,
                speed_max: 6,
                firmware: None,
            })
        );
    }

    #[test]
    fn test_decode_acks() {
        assert_eq!(
            decode(Command::Authenticate, "VAuth_OK").unwrap(),
            Response::Authenticated
        );
        assert_eq!(decode(Command::SetPower, "VWPwr_OK").unwrap(), Response::Ack);
        assert_eq!(decode(Command::SetSpeed, "VWSpd_OK").unwrap(), Response::Ack);

        assert!(matches!(
            decode(Command::SetPower, "VWPwr_NO"),
            Err(BreezartError::Protocol(_))
        ));
        assert!(matches!(
            decode(Command::SetPower, "VWPwr_OK_1"),
            Err(BreezartError::Protocol(_))
        ));
    }

    #[test]
    fn test_tag_mismatch_is_protocol_error() {
        // A status line answering a power command belongs to someone else
        assert!(matches!(
            decode(Command::SetPower, "VSt07_1_4"),
            Err(BreezartError::Protocol(_))
        ));
        assert!(matches!(
            decode(Command::GetStatus, "garbage"),
            Err(BreezartError::Protocol(_))
        ));
        assert!(matches!(
            decode(Command::GetStatus, ""),
            Err(BreezartError::Protocol(_))
        ));
    }

    #[test]
    fn test_is_response_to() {
        assert!(LineCodec.is_response_to(Command::GetStatus, "VSt07_1_4"));
        assert!(LineCodec.is_response_to(Command::GetStatus, "VSt07_zz"));
        assert!(LineCodec.is_response_to(Command::SetSpeed, "VEFrm"));
        assert!(!LineCodec.is_response_to(Command::GetStatus, "VXyz_1"));
        assert!(!LineCodec.is_response_to(Command::GetStatus, "VSt07x_1"));
        assert!(!LineCodec.is_response_to(Command::SetPower, "VSt07_1_4"));
    }

    #[test]
    fn test_controller_errors() {
        assert!(matches!(
            decode(Command::Authenticate, "VEPas"),
            Err(BreezartError::Authentication(_))
        ));
        assert!(matches!(
            decode(Command::GetStatus, "VEAut"),
            Err(BreezartError::Authentication(_))
        ));
        assert!(matches!(
            decode(Command::SetSpeed, "VEFrm"),
            Err(BreezartError::Protocol(_))
        ));
        assert!(matches!(
            decode(Command::GetProperties, "VECmd"),
            Err(BreezartError::Protocol(_))
        ));
        assert!(matches!(
            decode(Command::GetStatus, "VEXyz"),
            Err(BreezartError::Protocol(_))
        ));
    }
}
