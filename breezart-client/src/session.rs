//! Session manager for controller connections
//!
//! Owns the transport to one controller and the session state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Ready
//!       ^              |              |             |
//!       |              +--------------+-------------+--> Failed
//!       +---------------------- reset() ------------------+
//! ```
//!
//! `disconnect()` returns to Disconnected from any state. All transitions
//! happen while holding the transport lock, so they never interleave.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use breezart_core::{is_session_fatal, BreezartError, ConnectionConfig, Result};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::protocol::{Codec, Request, Response};
use crate::transport::{Connector, Transport};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport open
    Disconnected,
    /// Transport is being opened
    Connecting,
    /// Credentials sent, waiting for the verdict
    Authenticating,
    /// Authenticated and usable
    Ready,
    /// Last connect or request failed at transport or authentication level
    Failed,
}

impl SessionState {
    /// Get a string representation for logs and CLI output
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        }
    }

    fn in_progress(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Authenticating)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manages the connection and authentication of one controller session
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    codec: Arc<dyn Codec>,
    connection: ConnectionConfig,
    /// Deadline for each network step
    timeout: Duration,
    /// Log every request and response line
    debug_wire: bool,
    state: watch::Sender<SessionState>,
    /// Latches once the session has been Ready at least once
    ready_once: watch::Sender<bool>,
    /// Open transport (Some only while Ready)
    transport: Mutex<Option<Box<dyn Transport>>>,
    /// Set when the controller rejected the password, cleared by `reset()`
    credentials_rejected: AtomicBool,
}

impl SessionManager {
    /// Create a session manager in the Disconnected state
    pub fn new(
        connector: Arc<dyn Connector>,
        codec: Arc<dyn Codec>,
        connection: ConnectionConfig,
        timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (ready_once, _) = watch::channel(false);
        Self {
            connector,
            codec,
            connection,
            timeout,
            debug_wire: false,
            state,
            ready_once,
            transport: Mutex::new(None),
            credentials_rejected: AtomicBool::new(false),
        }
    }

    /// Enable request/response logging
    pub fn with_debug_wire(mut self, debug_wire: bool) -> Self {
        self.debug_wire = debug_wire;
        self
    }

    /// Get the current session state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Whether the controller rejected the password since the last reset
    pub fn credentials_rejected(&self) -> bool {
        self.credentials_rejected.load(Ordering::SeqCst)
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Whether a transport is currently open
    pub async fn has_transport(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    /// Deadline applied to each network step
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_state(&self, new: SessionState) {
        let old = self.state.send_replace(new);
        if old != new {
            debug!("Session state {} -> {}", old, new);
        }
        if new == SessionState::Ready {
            self.ready_once.send_replace(true);
        }
    }

    /// Wait until the session has been Ready once
    ///
    /// Resolves immediately if that already happened. Does not connect.
    pub async fn await_ready(&self) {
        let mut ready = self.ready_once.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Open and authenticate the session
    ///
    /// Returns immediately if already Ready. If another connect is in
    /// progress, waits for its outcome instead of starting a second one.
    /// From Failed, refuses until [`reset`](Self::reset) is called.
    pub async fn connect(&self) -> Result<()> {
        match self.state() {
            SessionState::Ready => return Ok(()),
            state if state.in_progress() => return self.wait_for_attempt().await,
            _ => {}
        }

        let mut slot = self.transport.lock().await;

        match self.state() {
            SessionState::Ready => return Ok(()),
            SessionState::Failed => {
                return Err(BreezartError::Connection(
                    "Session is in failed state; reset before reconnecting".to_string(),
                ));
            }
            _ => {}
        }

        self.set_state(SessionState::Connecting);
        info!("Connecting to {}", self.connector.describe());

        let mut transport = match timeout(self.timeout, self.connector.connect()).await {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                warn!("Failed to connect to {}: {}", self.connector.describe(), e);
                self.set_state(SessionState::Failed);
                return Err(e);
            }
            Err(_) => {
                warn!("Connecting to {} timed out", self.connector.describe());
                self.set_state(SessionState::Failed);
                return Err(BreezartError::Timeout(format!(
                    "Connecting to {} timed out after {:?}",
                    self.connector.describe(),
                    self.timeout
                )));
            }
        };

        self.set_state(SessionState::Authenticating);
        let request = Request::Authenticate {
            password: self.connection.password().to_string(),
        };

        match self.round_trip(transport.as_mut(), &request).await {
            Ok(Response::Authenticated) => {
                info!("Session with {} ready", transport.peer());
                *slot = Some(transport);
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Ok(other) => {
                self.close(transport).await;
                self.set_state(SessionState::Failed);
                Err(BreezartError::Protocol(format!(
                    "Unexpected response to authentication: {:?}",
                    other
                )))
            }
            Err(e) => {
                if matches!(e, BreezartError::Authentication(_)) {
                    error!("Controller {} rejected the password", transport.peer());
                    self.credentials_rejected.store(true, Ordering::SeqCst);
                } else {
                    warn!("Authentication with {} failed: {}", transport.peer(), e);
                }
                self.close(transport).await;
                self.set_state(SessionState::Failed);
                Err(e)
            }
        }
    }

    /// Wait for a connect started by someone else
    async fn wait_for_attempt(&self) -> Result<()> {
        let mut states = self.state.subscribe();
        let outcome = *states
            .wait_for(|state| !state.in_progress())
            .await
            .map_err(|_| BreezartError::Connection("Session closed".to_string()))?;

        match outcome {
            SessionState::Ready => Ok(()),
            SessionState::Failed if self.credentials_rejected() => Err(
                BreezartError::Authentication("Controller rejected the password".to_string()),
            ),
            other => Err(BreezartError::Connection(format!(
                "Concurrent connection attempt ended {}",
                other
            ))),
        }
    }

    /// Close the transport and return to Disconnected
    ///
    /// Never fails; a transport that is already gone is fine.
    pub async fn disconnect(&self) {
        let mut slot = self.transport.lock().await;
        if let Some(transport) = slot.take() {
            debug!("Closing session with {}", transport.peer());
            self.close(transport).await;
        }
        self.set_state(SessionState::Disconnected);
    }

    /// Leave the Failed state
    ///
    /// Returns `true` if the session was Failed. Also clears the
    /// rejected-credentials latch.
    pub async fn reset(&self) -> bool {
        let mut slot = self.transport.lock().await;
        self.credentials_rejected.store(false, Ordering::SeqCst);

        if self.state() != SessionState::Failed {
            return false;
        }
        if let Some(transport) = slot.take() {
            self.close(transport).await;
        }
        self.set_state(SessionState::Disconnected);
        true
    }

    /// Send one request on the Ready session and decode the response
    ///
    /// Holds the transport for the whole round trip, so responses always
    /// belong to the request that was sent. Transport-level failures drop
    /// the transport and move the session to Failed. So does a reply tagged
    /// for another command: the stream is out of step and a late answer may
    /// still arrive. Other protocol errors leave the session Ready.
    pub async fn exchange(&self, request: &Request) -> Result<Response> {
        let mut slot = self.transport.lock().await;

        if self.state() != SessionState::Ready {
            return Err(BreezartError::NotReady);
        }
        let Some(transport) = slot.as_mut() else {
            return Err(BreezartError::NotReady);
        };

        let command = request.command();
        let sent = self.send(transport.as_mut(), request).await;
        let result = match sent {
            Ok(raw) if !self.codec.is_response_to(command, &raw) => {
                let err = BreezartError::Protocol(format!(
                    "Expected response to {}, got: {}",
                    command.tag(),
                    raw
                ));
                warn!("Session out of step during {:?}: {}", command, err);
                if let Some(transport) = slot.take() {
                    self.close(transport).await;
                }
                self.set_state(SessionState::Failed);
                return Err(err);
            }
            Ok(raw) => self.codec.decode(command, &raw),
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => Ok(response),
            Err(e) if is_session_fatal(&e) => {
                warn!("Session lost during {:?}: {}", command, e);
                if let Some(transport) = slot.take() {
                    self.close(transport).await;
                }
                self.set_state(SessionState::Failed);
                Err(e)
            }
            Err(e) => {
                warn!("{:?} failed: {}", command, e);
                Err(e)
            }
        }
    }

    /// Encode, send, await and decode, all under the deadline
    async fn round_trip(&self, transport: &mut dyn Transport, request: &Request) -> Result<Response> {
        let raw = self.send(transport, request).await?;
        self.codec.decode(request.command(), &raw)
    }

    /// Encode and send, then wait for the raw response line
    async fn send(&self, transport: &mut dyn Transport, request: &Request) -> Result<String> {
        let command = request.command();
        let line = self.codec.encode(request);

        if self.debug_wire {
            debug!("TX {:?}", request);
        }

        let raw = match timeout(self.timeout, transport.transaction(&line)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BreezartError::Timeout(format!(
                    "{:?} to {} timed out after {:?}",
                    command,
                    transport.peer(),
                    self.timeout
                )))
            }
        };

        if self.debug_wire {
            debug!("RX {:?}", raw);
        }
        Ok(raw)
    }

    async fn close(&self, mut transport: Box<dyn Transport>) {
        if timeout(self.timeout, transport.shutdown()).await.is_err() {
            debug!("Shutdown of {} timed out", transport.peer());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LineCodec;
    use crate::simulator::{ControllerSimulator, SimulatorConnector};
    use async_trait::async_trait;
    use breezart_core::{UnitState, UnitStatus};

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn manager(sim: &ControllerSimulator, password: &str) -> SessionManager {
        SessionManager::new(
            Arc::new(sim.connector()),
            Arc::new(LineCodec),
            ConnectionConfig::new("simulator", password),
            TIMEOUT,
        )
    }

    #[test]
    fn test_session_state_as_str() {
        assert_eq!(SessionState::Disconnected.as_str(), "disconnected");
        assert_eq!(SessionState::Connecting.as_str(), "connecting");
        assert_eq!(SessionState::Authenticating.as_str(), "authenticating");
        assert_eq!(SessionState::Ready.as_str(), "ready");
        assert_eq!(SessionState::Failed.as_str(), "failed");
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = manager(&sim, "7531");

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.has_transport().await);
        assert!(matches!(
            session.exchange(&Request::GetStatus).await,
            Err(BreezartError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_connect_authenticates() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = manager(&sim, "7531");
        let mut states = session.subscribe();

        session.connect().await.unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.has_transport().await);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SessionState::Ready);
        assert_eq!(sim.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = manager(&sim, "7531");

        session.connect().await.unwrap();
        session.connect().await.unwrap();

        assert_eq!(sim.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_attempt() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = Arc::new(manager(&sim, "7531"));

        let (a, b) = tokio::join!(session.connect(), session.connect());

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(sim.connections_opened(), 1);
    }

    /// Delays every connect so a second caller can join the attempt
    struct SlowConnector {
        inner: SimulatorConnector,
        delay: Duration,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>> {
            tokio::time::sleep(self.delay).await;
            self.inner.connect().await
        }

        fn describe(&self) -> String {
            self.inner.describe()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_caller_sees_rejected_password() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let connector = SlowConnector {
            inner: sim.connector(),
            delay: Duration::from_millis(50),
        };
        let session = Arc::new(SessionManager::new(
            Arc::new(connector),
            Arc::new(LineCodec),
            ConnectionConfig::new("simulator", "0000"),
            TIMEOUT,
        ));

        let mut states = session.subscribe();
        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.connect().await })
        };
        states.wait_for(|state| state.in_progress()).await.unwrap();

        let second = session.connect().await;

        assert!(matches!(second, Err(BreezartError::Authentication(_))));
        assert!(matches!(
            first.await.unwrap(),
            Err(BreezartError::Authentication(_))
        ));
        assert_eq!(sim.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_controller_fails() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        sim.set_reachable(false).await;
        let session = manager(&sim, "7531");

        let result = session.connect().await;

        assert!(matches!(result, Err(BreezartError::Connection(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.has_transport().await);
        assert!(!session.credentials_rejected());
    }

    #[tokio::test]
    async fn test_rejected_password_fails_and_closes_transport() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = manager(&sim, "0000");

        let result = session.connect().await;

        assert!(matches!(result, Err(BreezartError::Authentication(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.credentials_rejected());
        assert_eq!(sim.connections_opened(), 1);
        assert_eq!(sim.connections_closed(), 1);
    }

    #[tokio::test]
    async fn test_failed_requires_reset() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        sim.set_reachable(false).await;
        let session = manager(&sim, "7531");
        let _ = session.connect().await;

        sim.set_reachable(true).await;
        assert!(matches!(
            session.connect().await,
            Err(BreezartError::Connection(_))
        ));

        assert!(session.reset().await);
        assert_eq!(session.state(), SessionState::Disconnected);
        session.connect().await.unwrap();
        assert!(session.is_ready());

        // reset outside Failed is a no-op
        assert!(!session.reset().await);
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_reset_clears_rejection_latch() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = manager(&sim, "0000");
        let _ = session.connect().await;
        assert!(session.credentials_rejected());

        session.reset().await;
        assert!(!session.credentials_rejected());
    }

    #[tokio::test]
    async fn test_disconnect_is_unconditional() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = manager(&sim, "7531");

        // Already disconnected
        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);

        session.connect().await.unwrap();
        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.has_transport().await);
        assert_eq!(sim.connections_closed(), 1);

        // From Failed
        sim.set_reachable(false).await;
        let _ = session.connect().await;
        assert_eq!(session.state(), SessionState::Failed);
        session.disconnect().await;
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_exchange_status() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        sim.set_unit_state(UnitState(3)).await;
        sim.set_speed_step(4).await;
        let session = manager(&sim, "7531");
        session.connect().await.unwrap();

        let response = session.exchange(&Request::GetStatus).await.unwrap();

        assert_eq!(
            response,
            Response::Status(UnitStatus {
                unit_state: UnitState(3),
                speed_step: 4,
            })
        );
    }

    #[tokio::test]
    async fn test_protocol_error_keeps_session() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = manager(&sim, "7531");
        session.connect().await.unwrap();

        sim.inject_response("VSt07_zz").await;
        let result = session.exchange(&Request::GetStatus).await;
        assert!(matches!(result, Err(BreezartError::Protocol(_))));
        assert!(session.is_ready());

        // Next request works on the same connection
        assert!(session.exchange(&Request::GetStatus).await.is_ok());
        assert_eq!(sim.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_reply_for_other_command_drops_session() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = manager(&sim, "7531");
        session.connect().await.unwrap();

        sim.inject_response("VXyz_1").await;
        let result = session.exchange(&Request::GetStatus).await;

        assert!(matches!(result, Err(BreezartError::Protocol(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.has_transport().await);
        assert_eq!(sim.open_connections(), 0);
        assert!(!session.credentials_rejected());
    }

    #[tokio::test]
    async fn test_controller_error_keeps_session() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = manager(&sim, "7531");
        session.connect().await.unwrap();

        sim.inject_response("VECmd").await;
        assert!(matches!(
            session.exchange(&Request::GetStatus).await,
            Err(BreezartError::Protocol(_))
        ));
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_timeout_fails_session() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = manager(&sim, "7531");
        session.connect().await.unwrap();

        sim.set_stalled(true).await;
        let result = session.exchange(&Request::GetStatus).await;

        assert!(matches!(result, Err(BreezartError::Timeout(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!session.has_transport().await);
        assert_eq!(sim.connections_closed(), 1);
    }

    #[tokio::test]
    async fn test_connect_timeout_during_authentication() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        sim.set_stalled(true).await;
        let session = manager(&sim, "7531");

        let result = session.connect().await;

        assert!(matches!(result, Err(BreezartError::Timeout(_))));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(sim.connections_closed(), 1);
    }

    #[tokio::test]
    async fn test_await_ready_fires_immediately_when_ready() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = manager(&sim, "7531");
        session.connect().await.unwrap();

        timeout(Duration::from_secs(1), session.await_ready())
            .await
            .expect("await_ready should resolve immediately");
    }

    #[tokio::test]
    async fn test_await_ready_waits_for_first_ready() {
        let sim = ControllerSimulator::new("7531", 1, 6);
        let session = Arc::new(manager(&sim, "7531"));

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.await_ready().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        session.connect().await.unwrap();
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve after connect")
            .unwrap();

        // Still resolves after the session dropped again
        session.disconnect().await;
        timeout(Duration::from_secs(1), session.await_ready())
            .await
            .expect("await_ready latches the first Ready");
    }
}
