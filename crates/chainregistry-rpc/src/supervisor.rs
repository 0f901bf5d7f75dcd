//! Connection supervision: one logical ledger connection, kept alive.
//!
//! Two independent tasks run once [`ConnectionSupervisor::start`] is called:
//!
//! - **watchdog**: every `watchdog_interval`, reconnects if the
//!   reconnect-required flag is set, the state is `Disconnected`, or the held
//!   transport has closed
//! - **heartbeat**: every `heartbeat_interval`, polls the head block; an
//!   error requests a reconnect, a timeout marks the connection `Degraded`
//!
//! Connect attempts never overlap: a second request while one is in flight
//! just waits for its outcome. Failures are counted, never fatal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use chainregistry_core::config::SupervisorSettings;
use chainregistry_core::{ConnectionState, ConnectionStatus, RegistryError};

use crate::transport::{Connector, LedgerTransport};

/// Timing and retry knobs for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub watchdog_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Bound on connect + handshake.
    pub connect_timeout: Duration,
    pub heartbeat_timeout: Duration,
    /// Failures `ensure_connected` tolerates before giving up (0 = never).
    /// The watchdog ignores it.
    pub max_connect_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&SupervisorSettings::default())
    }
}

impl From<&SupervisorSettings> for SupervisorConfig {
    fn from(s: &SupervisorSettings) -> Self {
        Self {
            watchdog_interval: Duration::from_millis(s.watchdog_interval_ms),
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            connect_timeout: Duration::from_millis(s.connect_timeout_ms),
            heartbeat_timeout: Duration::from_millis(s.heartbeat_timeout_ms),
            max_connect_attempts: s.max_connect_attempts,
        }
    }
}

/// Resets the in-flight flag however the attempt ends.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ─── ConnectionSupervisor ─────────────────────────────────────────────────────

pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    config: SupervisorConfig,
    status: watch::Sender<ConnectionStatus>,
    transport: RwLock<Option<Arc<dyn LedgerTransport>>>,
    reconnect_required: AtomicBool,
    connecting: AtomicBool,
}

impl ConnectionSupervisor {
    pub fn new(connector: Arc<dyn Connector>, config: SupervisorConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            connector,
            config,
            status,
            transport: RwLock::new(None),
            reconnect_required: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Non-blocking liveness check.
    pub fn is_connected(&self) -> bool {
        self.live_transport().is_some()
    }

    /// Snapshot of the current connection bookkeeping.
    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Liveness-change notifications.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Last-known head block. Fails with `NotConnected` while disconnected.
    pub fn current_height(&self) -> Result<u64, RegistryError> {
        if !self.is_connected() {
            return Err(RegistryError::NotConnected);
        }
        self.status.borrow().height.ok_or(RegistryError::NotConnected)
    }

    /// Record a head height observed by a caller; heights never go backwards.
    pub fn observe_height(&self, height: u64) {
        self.status.send_if_modified(|s| {
            if s.height.map_or(true, |h| height > h) {
                s.height = Some(height);
                true
            } else {
                false
            }
        });
    }

    /// The held transport, if connected.
    pub fn transport(&self) -> Result<Arc<dyn LedgerTransport>, RegistryError> {
        self.live_transport().ok_or(RegistryError::NotConnected)
    }

    fn live_transport(&self) -> Option<Arc<dyn LedgerTransport>> {
        if !self.status.borrow().state.has_transport() {
            return None;
        }
        self.transport
            .read()
            .unwrap()
            .as_ref()
            .filter(|t| t.is_open())
            .cloned()
    }

    /// Return once connected, attempting on demand.
    ///
    /// Fails with [`RegistryError::Connection`] once `max_connect_attempts`
    /// consecutive failures accumulate while waiting. The limit only bounds
    /// this caller's wait: the watchdog keeps retrying every
    /// `watchdog_interval` without limit.
    pub async fn ensure_connected(&self) -> Result<Arc<dyn LedgerTransport>, RegistryError> {
        let mut rx = self.status.subscribe();
        let mut baseline = rx.borrow_and_update().consecutive_failures;
        loop {
            if let Some(t) = self.live_transport() {
                return Ok(t);
            }

            let (failures, last_error) = {
                let s = self.status.borrow();
                (s.consecutive_failures, s.last_error.clone())
            };
            baseline = baseline.min(failures);
            let max = self.config.max_connect_attempts;
            if max > 0 && failures - baseline >= max {
                return Err(RegistryError::Connection(format!(
                    "no connection to {} after {max} attempts: {}",
                    self.connector.endpoint(),
                    last_error.unwrap_or_else(|| "unknown error".into())
                )));
            }

            if self.attempt_connect().await {
                if self.live_transport().is_none() {
                    tokio::time::sleep(self.config.watchdog_interval).await;
                }
            } else {
                // Someone else is connecting; wait for the outcome.
                let _ = tokio::time::timeout(self.config.watchdog_interval, rx.changed()).await;
            }
        }
    }

    /// Mark the connection unusable; the watchdog reconnects on its next tick.
    pub async fn request_reconnect(&self, reason: &str) {
        self.reconnect_required.store(true, Ordering::Release);
        let dropped = self.transport.write().unwrap().take();
        self.status.send_modify(|s| {
            if s.state != ConnectionState::Connecting {
                s.state = ConnectionState::Disconnected;
            }
            s.last_error = Some(reason.to_string());
        });
        if let Some(t) = dropped {
            tracing::warn!(endpoint = %t.endpoint(), reason, "reconnect requested");
            t.close().await;
        }
    }

    /// Like [`request_reconnect`](Self::request_reconnect), but only if
    /// `transport` is still the one held; stale reports are ignored.
    pub async fn request_reconnect_for(&self, transport: &Arc<dyn LedgerTransport>, reason: &str) {
        let current = self.transport.read().unwrap().clone();
        let same = current
            .as_ref()
            .map_or(false, |c| Arc::as_ptr(c) as *const () == Arc::as_ptr(transport) as *const ());
        if same {
            self.request_reconnect(reason).await;
        }
    }

    /// Drop the transport and stop reconnecting.
    pub async fn disconnect(&self) {
        self.reconnect_required.store(false, Ordering::Release);
        let dropped = self.transport.write().unwrap().take();
        if let Some(t) = dropped {
            t.close().await;
        }
        self.status.send_modify(|s| s.state = ConnectionState::Disconnected);
    }

    /// One connect attempt. Returns `false` if another attempt was in flight.
    async fn attempt_connect(&self) -> bool {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let _guard = ConnectingGuard(&self.connecting);

        self.reconnect_required.store(false, Ordering::Release);
        let stale = self.transport.write().unwrap().take();
        if let Some(t) = stale {
            t.close().await;
        }
        self.status.send_modify(|s| s.state = ConnectionState::Connecting);

        let endpoint = self.connector.endpoint();
        tracing::debug!(endpoint, "connecting to ledger node");

        let handshake = async {
            let transport = self.connector.connect().await?;
            let height = transport.block_number().await?;
            Ok::<_, crate::TransportError>((transport, height))
        };

        let reason = match tokio::time::timeout(self.config.connect_timeout, handshake).await {
            Ok(Ok((transport, height))) => {
                *self.transport.write().unwrap() = Some(transport);
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Connected;
                    s.last_error = None;
                    s.consecutive_failures = 0;
                    s.height = Some(height);
                    s.last_heartbeat_at = Some(Utc::now());
                });
                tracing::info!(endpoint, height, "connected to ledger node");
                return true;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("connect timed out after {}ms", self.config.connect_timeout.as_millis()),
        };

        self.reconnect_required.store(true, Ordering::Release);
        let mut failures = 0;
        self.status.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.consecutive_failures += 1;
            s.last_error = Some(reason.clone());
            failures = s.consecutive_failures;
        });
        tracing::warn!(endpoint, failures, error = %reason, "connect attempt failed");
        true
    }

    async fn watchdog_tick(&self) {
        let state = self.status.borrow().state;
        let transport_closed = state.has_transport()
            && !self
                .transport
                .read()
                .unwrap()
                .as_ref()
                .map_or(false, |t| t.is_open());
        let needed = self.reconnect_required.load(Ordering::Acquire)
            || state == ConnectionState::Disconnected
            || transport_closed;
        if needed {
            self.attempt_connect().await;
        }
    }

    async fn heartbeat_tick(&self) {
        if !self.status.borrow().state.has_transport() {
            return;
        }
        let Some(transport) = self.transport.read().unwrap().clone() else {
            return;
        };
        if !transport.is_open() {
            self.request_reconnect_for(&transport, "transport closed").await;
            return;
        }

        match tokio::time::timeout(self.config.heartbeat_timeout, transport.block_number()).await {
            Ok(Ok(height)) => {
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Connected;
                    s.height = Some(height);
                    s.last_heartbeat_at = Some(Utc::now());
                });
                tracing::trace!(height, "heartbeat");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "heartbeat failed");
                self.request_reconnect_for(&transport, &format!("heartbeat failed: {e}"))
                    .await;
            }
            Err(_) => {
                let reason = format!(
                    "heartbeat timed out after {}ms",
                    self.config.heartbeat_timeout.as_millis()
                );
                tracing::warn!(reason = %reason, "connection degraded");
                self.reconnect_required.store(true, Ordering::Release);
                self.status.send_modify(|s| {
                    s.state = ConnectionState::Degraded;
                    s.last_error = Some(reason);
                });
            }
        }
    }

    /// Spawn the watchdog and heartbeat tasks.
    pub fn start(self: &Arc<Self>) -> SupervisorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let watchdog = {
            let sup = Arc::clone(self);
            let mut stop = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sup.config.watchdog_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => sup.watchdog_tick().await,
                        _ = stop.changed() => break,
                    }
                }
                tracing::debug!("watchdog stopped");
            })
        };

        let heartbeat = {
            let sup = Arc::clone(self);
            let mut stop = shutdown_rx;
            tokio::spawn(async move {
                let period = sup.config.heartbeat_interval;
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => sup.heartbeat_tick().await,
                        _ = stop.changed() => break,
                    }
                }
                tracing::debug!("heartbeat stopped");
            })
        };

        SupervisorHandle {
            shutdown_tx,
            tasks: vec![watchdog, heartbeat],
            supervisor: Arc::clone(self),
        }
    }
}

/// Owns the supervisor's background tasks.
pub struct SupervisorHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    supervisor: Arc<ConnectionSupervisor>,
}

impl SupervisorHandle {
    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    /// Stop both tasks, close the transport and move to `Disconnected`.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        self.supervisor.disconnect().await;
        tracing::info!("supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnector, MockLedger};

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            watchdog_interval: Duration::from_millis(20),
            heartbeat_interval: Duration::from_millis(30),
            connect_timeout: Duration::from_millis(200),
            heartbeat_timeout: Duration::from_millis(50),
            max_connect_attempts: 5,
        }
    }

    fn setup(height: u64) -> (Arc<MockConnector>, Arc<ConnectionSupervisor>) {
        let ledger = MockLedger::new();
        ledger.set_height(height);
        let connector = Arc::new(MockConnector::new(ledger));
        let sup = Arc::new(ConnectionSupervisor::new(connector.clone(), fast_config()));
        (connector, sup)
    }

    async fn wait_for(mut cond: impl FnMut() -> bool, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn current_height_requires_connection() {
        let (_, sup) = setup(7);
        assert!(matches!(sup.current_height(), Err(RegistryError::NotConnected)));
        assert!(matches!(sup.transport(), Err(RegistryError::NotConnected)));
        assert_eq!(sup.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn watchdog_connects_and_shutdown_disconnects() {
        let (connector, sup) = setup(7);
        let handle = sup.start();
        assert!(wait_for(|| sup.is_connected(), Duration::from_secs(1)).await);
        assert_eq!(sup.current_height().unwrap(), 7);
        assert_eq!(connector.connect_count(), 1);

        handle.shutdown().await;
        assert!(!sup.is_connected());
        assert_eq!(sup.status().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn reconnects_after_drop_within_bound() {
        let (connector, sup) = setup(1);
        let handle = sup.start();
        assert!(wait_for(|| sup.is_connected(), Duration::from_secs(1)).await);

        connector.drop_current();
        assert!(!sup.is_connected());

        let cfg = sup.config().clone();
        let bound = cfg.watchdog_interval + cfg.connect_timeout + Duration::from_millis(200);
        assert!(wait_for(|| sup.is_connected(), bound).await);
        assert_eq!(connector.connect_count(), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failures_are_counted_then_reset() {
        let (connector, sup) = setup(3);
        connector.refuse_next(1);

        assert!(sup.attempt_connect().await);
        let status = sup.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_error.is_some());

        assert!(sup.attempt_connect().await);
        let status = sup.status();
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_error, None);
        assert_eq!(status.height, Some(3));
    }

    #[tokio::test]
    async fn ensure_connected_retries_on_demand() {
        let (connector, sup) = setup(3);
        connector.refuse_next(3);
        sup.ensure_connected().await.unwrap();
        assert_eq!(connector.connect_count(), 4);
        assert_eq!(sup.status().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn ensure_connected_gives_up_after_max_attempts() {
        let (connector, sup) = setup(3);
        connector.refuse_next(100);
        let err = sup.ensure_connected().await.err().unwrap();
        assert!(matches!(err, RegistryError::Connection(_)));
        assert_eq!(connector.connect_count(), 5);
    }

    #[tokio::test]
    async fn watchdog_keeps_retrying_after_caller_gives_up() {
        let (connector, sup) = setup(3);
        connector.refuse_next(8);
        assert!(sup.ensure_connected().await.is_err());
        assert_eq!(connector.connect_count(), 5);

        let handle = sup.start();
        assert!(wait_for(|| sup.is_connected(), Duration::from_secs(2)).await);
        assert_eq!(connector.connect_count(), 9);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_requests_collapse_into_one_attempt() {
        let (connector, sup) = setup(3);
        connector.set_delay(Duration::from_millis(50));

        let results = futures::future::join_all((0..5).map(|_| sup.ensure_connected())).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn heartbeat_error_requests_reconnect() {
        let (connector, sup) = setup(3);
        let handle = sup.start();
        assert!(wait_for(|| sup.is_connected(), Duration::from_secs(1)).await);

        connector.ledger().set_failing(true);
        assert!(wait_for(|| !sup.is_connected(), Duration::from_secs(1)).await);

        connector.ledger().set_failing(false);
        assert!(wait_for(|| sup.is_connected(), Duration::from_secs(1)).await);
        assert!(connector.connect_count() >= 2);
        assert_eq!(sup.status().consecutive_failures, 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn heartbeat_timeout_degrades_connection() {
        let (connector, sup) = setup(3);
        let mut rx = sup.subscribe();
        let handle = sup.start();
        assert!(wait_for(|| sup.is_connected(), Duration::from_secs(1)).await);

        connector.ledger().set_stalled(true);
        let degraded = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if rx.borrow_and_update().state == ConnectionState::Degraded {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(degraded.is_ok());

        connector.ledger().set_stalled(false);
        assert!(wait_for(|| sup.is_connected(), Duration::from_secs(2)).await);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stale_reconnect_reports_are_ignored() {
        let (connector, sup) = setup(3);
        let first = sup.ensure_connected().await.unwrap();
        connector.drop_current();
        let second = sup.ensure_connected().await.unwrap();
        assert_eq!(connector.connect_count(), 2);

        sup.request_reconnect_for(&first, "old transport").await;
        assert!(sup.is_connected());

        sup.request_reconnect_for(&second, "current transport").await;
        assert!(!sup.is_connected());
    }
}
