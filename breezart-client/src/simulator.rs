//! In-process controller simulator
//!
//! Speaks the controller line protocol so the client can be exercised
//! without hardware: either in memory through [`ControllerSimulator::connector`]
//! or over real TCP through [`ControllerSimulator::bind`]. Faults
//! (unreachable controller, stalled responses, garbage lines) can be
//! switched on at runtime.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use breezart_core::{BreezartError, Result, UnitState};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::{error_codes, Command, FIELD_SEPARATOR};
use crate::transport::{Connector, Transport, LINE_SUFFIX};

/// Firmware string reported by the simulated controller
pub const SIMULATOR_FIRMWARE: &str = "SIM-1.0";

/// Simulated ventilation unit
#[derive(Debug, Clone)]
struct SimulatedUnit {
    unit_state: UnitState,
    speed_step: u32,
    speed_min: u32,
    speed_max: u32,
}

#[derive(Debug, Default)]
struct Faults {
    unreachable: bool,
    stalled: bool,
    injected: Option<String>,
    /// Stall and injection only hit requests of this kind when set
    target: Option<Command>,
}

impl Faults {
    fn applies_to(&self, line: &str) -> bool {
        self.target
            .map_or(true, |command| line.split(FIELD_SEPARATOR).next() == Some(command.tag()))
    }
}

struct Inner {
    password: String,
    unit: Mutex<SimulatedUnit>,
    faults: Mutex<Faults>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// A simulated controller
///
/// Cheap to clone; all clones share the same unit and fault switches.
#[derive(Clone)]
pub struct ControllerSimulator {
    inner: Arc<Inner>,
}

impl ControllerSimulator {
    /// Create a powered-off unit at its lowest speed step
    pub fn new(password: impl Into<String>, speed_min: u32, speed_max: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                password: password.into(),
                unit: Mutex::new(SimulatedUnit {
                    unit_state: UnitState(0),
                    speed_step: speed_min,
                    speed_min,
                    speed_max,
                }),
                faults: Mutex::new(Faults::default()),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }),
        }
    }

    /// Refuse new connections while `false`
    pub async fn set_reachable(&self, reachable: bool) {
        self.inner.faults.lock().await.unreachable = !reachable;
    }

    /// Never answer requests while `true`
    pub async fn set_stalled(&self, stalled: bool) {
        self.inner.faults.lock().await.stalled = stalled;
    }

    /// Answer the next request with `line` instead of the real response
    pub async fn inject_response(&self, line: impl Into<String>) {
        self.inner.faults.lock().await.injected = Some(line.into());
    }

    /// Limit stalls and injected responses to requests of kind `command`
    ///
    /// `None` applies them to every request, authentication included.
    pub async fn target_faults(&self, command: Option<Command>) {
        self.inner.faults.lock().await.target = command;
    }

    pub async fn set_unit_state(&self, state: UnitState) {
        self.inner.unit.lock().await.unit_state = state;
    }

    pub async fn set_speed_step(&self, step: u32) {
        self.inner.unit.lock().await.speed_step = step;
    }

    pub async fn unit_state(&self) -> UnitState {
        self.inner.unit.lock().await.unit_state
    }

    pub async fn speed_step(&self) -> u32 {
        self.inner.unit.lock().await.speed_step
    }

    /// Number of connections accepted so far
    pub fn connections_opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Number of connections closed so far
    pub fn connections_closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Connections accepted but not yet closed
    pub fn open_connections(&self) -> usize {
        self.connections_opened()
            .saturating_sub(self.connections_closed())
    }

    /// In-memory connector to this simulator
    pub fn connector(&self) -> SimulatorConnector {
        SimulatorConnector { sim: self.clone() }
    }

    /// Listen on `addr` and serve connections in the background
    pub async fn bind(&self, addr: &str) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!("Simulated controller listening on {}", local);

        let sim = self.clone();
        let handle = tokio::spawn(async move { sim.serve(listener).await });
        Ok((local, handle))
    }

    /// Accept and serve connections until the task is aborted
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    continue;
                }
            };

            if self.inner.faults.lock().await.unreachable {
                debug!("Dropping connection from {} (unreachable)", peer);
                continue;
            }

            let sim = self.clone();
            tokio::spawn(async move {
                sim.inner.opened.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = sim.handle_connection(socket).await {
                    debug!("Connection from {} ended: {}", peer, e);
                }
                sim.inner.closed.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream) -> std::io::Result<()> {
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut authenticated = false;

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(reply) = self.reply(&mut authenticated, line).await else {
                continue;
            };
            writer
                .write_all(format!("{}{}", reply, LINE_SUFFIX).as_bytes())
                .await?;
            writer.flush().await?;
        }
        Ok(())
    }

    /// Apply faults, then answer. `None` means the request is swallowed.
    async fn reply(&self, authenticated: &mut bool, line: &str) -> Option<String> {
        {
            let mut faults = self.inner.faults.lock().await;
            if faults.applies_to(line) {
                if faults.stalled {
                    return None;
                }
                if let Some(injected) = faults.injected.take() {
                    return Some(injected);
                }
            }
        }
        Some(self.respond(authenticated, line).await)
    }

    /// Protocol handler for one request line
    async fn respond(&self, authenticated: &mut bool, line: &str) -> String {
        let mut fields = line.splitn(2, FIELD_SEPARATOR);
        let tag = fields.next().unwrap_or_default();
        let argument = fields.next();

        if tag == Command::Authenticate.tag() {
            return if argument == Some(self.inner.password.as_str()) {
                *authenticated = true;
                ok(Command::Authenticate)
            } else {
                warn!("Simulator rejected password");
                error_codes::BAD_PASSWORD.to_string()
            };
        }

        if !*authenticated {
            return error_codes::NOT_AUTHENTICATED.to_string();
        }

        let mut unit = self.inner.unit.lock().await;

        if tag == Command::GetProperties.tag() {
            format!(
                "{tag}{sep}{:X}{sep}{:X}{sep}{}",
                unit.speed_min,
                unit.speed_max,
                SIMULATOR_FIRMWARE,
                sep = FIELD_SEPARATOR
            )
        } else if tag == Command::GetStatus.tag() {
            format!(
                "{tag}{sep}{:X}{sep}{:X}",
                unit.unit_state.code(),
                unit.speed_step,
                sep = FIELD_SEPARATOR
            )
        } else if tag == Command::SetPower.tag() {
            match argument {
                Some("1") => unit.unit_state = UnitState(1),
                Some("0") => unit.unit_state = UnitState(0),
                _ => return error_codes::BAD_FORMAT.to_string(),
            }
            ok(Command::SetPower)
        } else if tag == Command::SetSpeed.tag() {
            match argument.and_then(|raw| u32::from_str_radix(raw, 16).ok()) {
                Some(step) if (unit.speed_min..=unit.speed_max).contains(&step) => {
                    unit.speed_step = step;
                    ok(Command::SetSpeed)
                }
                _ => error_codes::BAD_FORMAT.to_string(),
            }
        } else {
            error_codes::UNKNOWN_COMMAND.to_string()
        }
    }
}

fn ok(command: Command) -> String {
    format!("{}{}OK", command.tag(), FIELD_SEPARATOR)
}

/// Connector handing out in-memory transports to a simulator
#[derive(Clone)]
pub struct SimulatorConnector {
    sim: ControllerSimulator,
}

#[async_trait]
impl Connector for SimulatorConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        if self.sim.inner.faults.lock().await.unreachable {
            return Err(BreezartError::Connection(
                "Simulated controller is unreachable".to_string(),
            ));
        }

        self.sim.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatorTransport {
            sim: self.sim.clone(),
            authenticated: false,
            open: true,
        }))
    }

    fn describe(&self) -> String {
        "sim://controller".to_string()
    }
}

struct SimulatorTransport {
    sim: ControllerSimulator,
    authenticated: bool,
    open: bool,
}

#[async_trait]
impl Transport for SimulatorTransport {
    async fn transaction(&mut self, request: &str) -> Result<String> {
        if !self.open {
            return Err(BreezartError::DeviceDisconnected(
                "Transport already closed".to_string(),
            ));
        }
        match self.sim.reply(&mut self.authenticated, request.trim()).await {
            Some(reply) => Ok(reply),
            // A stalled controller never answers; the caller's deadline fires
            None => std::future::pending().await,
        }
    }

    async fn shutdown(&mut self) {
        if std::mem::replace(&mut self.open, false) {
            self.sim.inner.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn peer(&self) -> &str {
        "simulator"
    }
}
