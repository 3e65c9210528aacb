//! High-level device client
//!
//! Translates framework-facing operations (power, rotation speed as a
//! percentage, status) into controller requests, and applies the lifecycle
//! policy:
//!
//! - [`Lifecycle::LongLived`]: one session held open and reconnected in the
//!   background. Status and command operations never wait for it; while it
//!   is down they report a benign default or [`Ack::SkippedNotReady`].
//! - [`Lifecycle::PerOperation`]: every operation connects, runs one
//!   request and disconnects, surfacing any failure.

use std::sync::Arc;

use breezart_core::{
    is_session_fatal, Ack, BreezartError, DeviceConfig, DeviceProperties, FanStatus, Lifecycle,
    ReconnectConfig, Result, SpeedRange,
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::protocol::{Codec, Command, LineCodec, Request, Response};
use crate::session::{SessionManager, SessionState};
use crate::transport::{Connector, SerialConnector, TcpConnector};

/// What an operation does when a long-lived session is not Ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WhenNotReady {
    /// Return immediately without touching the network
    Skip,
    /// Connect now and wait for the outcome
    Connect,
}

/// Client for one ventilation controller
pub struct DeviceClient {
    config: DeviceConfig,
    /// Configured range; authoritative over what the device reports
    speed_range: SpeedRange,
    session: Arc<SessionManager>,
    /// One request in flight per client
    op_lock: Mutex<()>,
    last_status: RwLock<Option<FanStatus>>,
    /// Background connect/reconnect task (long-lived only)
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceClient {
    /// Create a client for the transport named in `config`
    ///
    /// Uses the serial line when `serial_device` is set, TCP otherwise.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        let connector: Arc<dyn Connector> = match &config.serial_device {
            Some(path) => Arc::new(SerialConnector::new(
                path.clone(),
                config.baud_rate,
                config.timeout(),
            )),
            None => Arc::new(TcpConnector::new(config.address())),
        };
        Self::with_connector(config, connector, Arc::new(LineCodec))
    }

    /// Create a client with a custom connector and codec
    pub fn with_connector(
        config: DeviceConfig,
        connector: Arc<dyn Connector>,
        codec: Arc<dyn Codec>,
    ) -> Result<Self> {
        config.validate()?;
        let speed_range = config.speed_range()?;

        info!(
            "Creating client for '{}' via {} ({} session, steps {}..={})",
            config.name,
            connector.describe(),
            config.lifecycle,
            speed_range.min(),
            speed_range.max()
        );

        let session = SessionManager::new(connector, codec, config.connection(), config.timeout())
            .with_debug_wire(config.debug_wire);

        Ok(Self {
            config,
            speed_range,
            session: Arc::new(session),
            op_lock: Mutex::new(()),
            last_status: RwLock::new(None),
            supervisor: Mutex::new(None),
        })
    }

    /// Begin connecting in the background (long-lived only)
    ///
    /// Returns immediately. Use [`SessionManager::await_ready`] through
    /// [`session`](Self::session) to wait for the first Ready.
    pub async fn start(&self) {
        match self.config.lifecycle {
            Lifecycle::LongLived => self.spawn_supervisor().await,
            Lifecycle::PerOperation => {
                debug!("Per-operation session; nothing to start");
            }
        }
    }

    /// Read the controller's capabilities
    ///
    /// Always surfaces errors. A device range that differs from the
    /// configured one is logged; the configured range stays in use.
    pub async fn get_properties(&self) -> Result<DeviceProperties> {
        let response = self
            .perform(Request::GetProperties, WhenNotReady::Connect)
            .await?
            .ok_or(BreezartError::NotReady)?;

        let Response::Properties(properties) = response else {
            return Err(unexpected(Command::GetProperties, &response));
        };

        if !properties.agrees_with(&self.speed_range) {
            warn!(
                "Device reports speed steps {}..={}, configured {}..={}; using configured range",
                properties.speed_min,
                properties.speed_max,
                self.speed_range.min(),
                self.speed_range.max()
            );
        }
        Ok(properties)
    }

    /// Read power and rotation speed
    ///
    /// A long-lived session that is not Ready yields
    /// [`FanStatus::not_ready`] instead of an error.
    pub async fn get_status(&self) -> Result<FanStatus> {
        let Some(response) = self.perform(Request::GetStatus, WhenNotReady::Skip).await? else {
            debug!("Session not ready; reporting default status");
            return Ok(FanStatus::not_ready());
        };

        let Response::Status(unit) = response else {
            return Err(unexpected(Command::GetStatus, &response));
        };

        if !self.speed_range.contains(unit.speed_step) {
            warn!(
                "Device reports speed step {} outside configured {}..={}",
                unit.speed_step,
                self.speed_range.min(),
                self.speed_range.max()
            );
        }

        let status = FanStatus::from_unit(unit, &self.speed_range);
        *self.last_status.write().await = Some(status);
        Ok(status)
    }

    /// Switch the unit on or off
    pub async fn set_power(&self, on: bool) -> Result<Ack> {
        self.command(Request::SetPower(on)).await
    }

    /// Set rotation speed as a percentage
    ///
    /// Percentages above 100 fail with [`BreezartError::InvalidInput`]
    /// before any I/O.
    pub async fn set_rotation_speed(&self, percent: u32) -> Result<Ack> {
        let step = self.speed_range.step_for(percent)?;
        debug!("Rotation speed {}% -> step {}", percent, step);
        self.command(Request::SetSpeed(step)).await
    }

    /// Stop background reconnection and close the session
    ///
    /// The next operation in long-lived mode restarts the background task.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.supervisor.lock().await.take() {
            handle.abort();
        }
        self.session.disconnect().await;
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn speed_range(&self) -> SpeedRange {
        self.speed_range
    }

    /// Most recent successfully read status
    pub async fn last_status(&self) -> Option<FanStatus> {
        *self.last_status.read().await
    }

    async fn command(&self, request: Request) -> Result<Ack> {
        let command = request.command();
        match self.perform(request, WhenNotReady::Skip).await? {
            Some(Response::Ack) => Ok(Ack::Applied),
            Some(other) => Err(unexpected(command, &other)),
            None => {
                warn!("Session not ready; {:?} was not sent", command);
                Ok(Ack::SkippedNotReady)
            }
        }
    }

    /// Run one request under the lifecycle policy
    ///
    /// `Ok(None)` only in long-lived mode under [`WhenNotReady::Skip`].
    async fn perform(&self, request: Request, policy: WhenNotReady) -> Result<Option<Response>> {
        let _op = self.op_lock.lock().await;

        match self.config.lifecycle {
            Lifecycle::LongLived => self.perform_long_lived(&request, policy).await,
            Lifecycle::PerOperation => self.perform_once(&request).await.map(Some),
        }
    }

    async fn perform_long_lived(
        &self,
        request: &Request,
        policy: WhenNotReady,
    ) -> Result<Option<Response>> {
        if !self.session.is_ready() {
            match policy {
                WhenNotReady::Skip => {
                    self.ensure_supervisor().await;
                    return Ok(None);
                }
                WhenNotReady::Connect => self.connect_now().await?,
            }
        }

        match self.session.exchange(request).await {
            Ok(response) => Ok(Some(response)),
            Err(BreezartError::NotReady) if policy == WhenNotReady::Skip => {
                self.ensure_supervisor().await;
                Ok(None)
            }
            Err(e) => {
                if is_session_fatal(&e) {
                    self.ensure_supervisor().await;
                }
                Err(e)
            }
        }
    }

    /// Connect, run `request`, then disconnect regardless of the outcome
    async fn perform_once(&self, request: &Request) -> Result<Response> {
        let result = match self.session.connect().await {
            Ok(()) => self.session.exchange(request).await,
            Err(e) => Err(e),
        };
        self.session.disconnect().await;
        result
    }

    /// Connect in the foreground for operations that must not be skipped
    async fn connect_now(&self) -> Result<()> {
        if self.session.state() == SessionState::Failed {
            if self.session.credentials_rejected() {
                return Err(BreezartError::Authentication(
                    "Controller rejected the password; fix the configuration and reset the session"
                        .to_string(),
                ));
            }
            self.session.reset().await;
        }

        if let Err(e) = self.session.connect().await {
            self.ensure_supervisor().await;
            return Err(e);
        }
        Ok(())
    }

    /// Restart background reconnection if it is allowed and not running
    async fn ensure_supervisor(&self) {
        if self.config.lifecycle != Lifecycle::LongLived || !self.config.reconnect.enabled {
            return;
        }
        if self.session.credentials_rejected() {
            debug!("Credentials were rejected; not reconnecting");
            return;
        }
        self.spawn_supervisor().await;
    }

    async fn spawn_supervisor(&self) {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let session = self.session.clone();
        let policy = self.config.reconnect.clone();
        *supervisor = Some(tokio::spawn(async move {
            if let Err(e) = maintain_session(session, policy).await {
                warn!("Background connection stopped: {}", e);
            }
        }));
    }
}

impl Drop for DeviceClient {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.get_mut().take() {
            handle.abort();
        }
    }
}

/// Bring the session to Ready, retrying with exponential backoff
///
/// Stops on success, on a rejected password, when reconnection is disabled
/// (after the first attempt) or when `max_attempts` is reached.
pub(crate) async fn maintain_session(
    session: Arc<SessionManager>,
    policy: ReconnectConfig,
) -> Result<()> {
    let mut attempt = 0u32;
    let mut delay = policy.initial_delay();

    loop {
        attempt += 1;
        session.reset().await;

        info!(
            "Connection attempt {}/{}",
            attempt,
            if policy.max_attempts == 0 {
                "unlimited".to_string()
            } else {
                policy.max_attempts.to_string()
            }
        );

        match session.connect().await {
            Ok(()) => {
                if attempt > 1 {
                    info!("Reconnected after {} attempts", attempt);
                }
                return Ok(());
            }
            Err(e @ BreezartError::Authentication(_)) => {
                error!("Authentication rejected; not retrying until reset");
                return Err(e);
            }
            Err(e) => {
                if !policy.enabled || policy.exhausted(attempt) {
                    error!("Giving up after {} attempts: {}", attempt, e);
                    return Err(BreezartError::ReconnectionFailed {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
                warn!("Attempt {} failed: {}; retrying in {:?}", attempt, e, delay);
                sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}

fn unexpected(command: Command, response: &Response) -> BreezartError {
    BreezartError::Protocol(format!(
        "Unexpected response to {}: {:?}",
        command.tag(),
        response
    ))
}
