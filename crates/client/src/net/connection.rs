use std::cell::{Cell, RefCell};
use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{Notify, watch};

use super::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    RateLimited,
    Error,
}

/// What the rest of the application is told about the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Online,
    Reconnecting,
    Error,
    Offline,
    OfflineMode,
}

impl From<ConnectionState> for ConnectionStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => Self::Offline,
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Connected => Self::Online,
            ConnectionState::Reconnecting => Self::Reconnecting,
            ConnectionState::RateLimited | ConnectionState::Error => Self::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joined {
    pub entity_id: String,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("join rejected: {0}")]
    Rejected(String),
    #[error("join rate limited")]
    RateLimited,
    #[error("link unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("a connection attempt is already in flight")]
    AlreadyConnecting,
    #[error("join rejected: {0}")]
    Rejected(String),
    #[error("join rate limited")]
    RateLimited,
    #[error(transparent)]
    Transport(TransportError),
    #[error("retry loop superseded by an explicit connect")]
    Superseded,
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected(reason) => Self::Rejected(reason),
            TransportError::RateLimited => Self::RateLimited,
            other => Self::Transport(other),
        }
    }
}

/// Performs one join handshake against whatever carries packets.
pub trait Connector {
    fn connect(&self, identity: &str) -> impl Future<Output = Result<Joined, TransportError>>;
}

struct InFlight<'a>(&'a Cell<bool>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Drives connect and reconnect attempts. All methods take `&self` so an
/// explicit connect can interleave with a retry loop on the same task; at
/// most one attempt is in flight at a time.
pub struct ConnectionSupervisor<K> {
    connector: K,
    retry: RetryConfig,
    state: Cell<ConnectionState>,
    in_flight: Cell<bool>,
    abort_backoff: Notify,
    status: watch::Sender<ConnectionStatus>,
    rng: RefCell<StdRng>,
}

impl<K: Connector> ConnectionSupervisor<K> {
    pub fn new(connector: K, retry: RetryConfig) -> Self {
        Self::with_rng(connector, retry, StdRng::from_entropy())
    }

    pub fn with_seed(connector: K, retry: RetryConfig, seed: u64) -> Self {
        Self::with_rng(connector, retry, StdRng::seed_from_u64(seed))
    }

    fn with_rng(connector: K, retry: RetryConfig, rng: StdRng) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Offline);
        Self {
            connector,
            retry,
            state: Cell::new(ConnectionState::Disconnected),
            in_flight: Cell::new(false),
            abort_backoff: Notify::new(),
            status,
            rng: RefCell::new(rng),
        }
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn is_connecting(&self) -> bool {
        self.in_flight.get()
    }

    fn transition(&self, state: ConnectionState) {
        let previous = self.state.replace(state);
        if previous != state {
            info!("connection {:?} -> {:?}", previous, state);
        }
        self.publish(state.into());
    }

    fn publish(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    /// Exponential backoff for the retry after `failures` failed attempts,
    /// capped, then spread by the configured jitter fraction.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let capped = self
            .retry
            .base_delay_ms
            .saturating_mul(1 << exponent)
            .min(self.retry.max_delay_ms);
        let jitter = self.retry.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return Duration::from_millis(capped);
        }
        let factor = self.rng.borrow_mut().gen_range((1.0 - jitter)..=(1.0 + jitter));
        Duration::from_millis(capped).mul_f64(factor)
    }

    /// One join attempt. Cuts short any backoff wait of a running retry loop.
    pub async fn connect(&self, identity: &str) -> Result<Joined, ConnectError> {
        if self.in_flight.replace(true) {
            return Err(ConnectError::AlreadyConnecting);
        }
        let _guard = InFlight(&self.in_flight);
        self.abort_backoff.notify_waiters();

        if self.state.get() != ConnectionState::Reconnecting {
            self.transition(ConnectionState::Connecting);
        }
        match self.connector.connect(identity).await {
            Ok(joined) => {
                info!("joined as {} in slot {}", joined.entity_id, joined.slot);
                self.transition(ConnectionState::Connected);
                Ok(joined)
            }
            Err(err) => {
                warn!("connect failed: {}", err);
                let state = match err {
                    TransportError::RateLimited => ConnectionState::RateLimited,
                    _ => ConnectionState::Error,
                };
                self.transition(state);
                Err(err.into())
            }
        }
    }

    pub async fn connect_with_retry(&self, identity: &str) -> Result<Joined, ConnectError> {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.backoff_delay(attempt - 1);
                debug!("retrying connect in {:?} (attempt {}/{})", delay, attempt, attempts);
                self.transition(ConnectionState::Reconnecting);

                let aborted = self.abort_backoff.notified();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = aborted => {
                        debug!("backoff interrupted by an explicit connect");
                        return Err(ConnectError::Superseded);
                    }
                }
            }

            match self.connect(identity).await {
                Ok(joined) => return Ok(joined),
                Err(ConnectError::AlreadyConnecting) => return Err(ConnectError::AlreadyConnecting),
                Err(_) => {}
            }
        }

        if self.retry.offline_fallback {
            info!("connect gave up after {} attempts, continuing offline", attempts);
            self.state.set(ConnectionState::Disconnected);
            self.publish(ConnectionStatus::OfflineMode);
        } else {
            self.transition(ConnectionState::Error);
        }
        Err(ConnectError::Exhausted { attempts })
    }

    pub fn disconnect(&self) {
        self.transition(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::time::Instant;

    use super::*;

    struct Scripted {
        outcomes: RefCell<VecDeque<Result<Joined, TransportError>>>,
        delay: Duration,
        calls: Cell<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<Joined, TransportError>>) -> Self {
            Self {
                outcomes: RefCell::new(outcomes.into()),
                delay: Duration::ZERO,
                calls: Cell::new(0),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl Connector for Scripted {
        async fn connect(&self, identity: &str) -> Result<Joined, TransportError> {
            self.calls.set(self.calls.get() + 1);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.outcomes.borrow_mut().pop_front();
            next.unwrap_or_else(|| {
                Ok(Joined {
                    entity_id: identity.to_string(),
                    slot: 0,
                })
            })
        }
    }

    fn down() -> Result<Joined, TransportError> {
        Err(TransportError::Unavailable("refused".into()))
    }

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backs_off_then_connects() {
        let supervisor = ConnectionSupervisor::new(Scripted::new(vec![down(), down()]), no_jitter());
        let start = Instant::now();

        let joined = supervisor.connect_with_retry("p").await.unwrap();

        let elapsed = start.elapsed();
        assert_eq!(joined.entity_id, "p");
        assert_eq!(supervisor.connector().calls.get(), 3);
        assert!(elapsed >= Duration::from_millis(750), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(800), "{elapsed:?}");
        assert_eq!(supervisor.status(), ConnectionStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_falls_back_to_offline_mode() {
        let supervisor = ConnectionSupervisor::new(Scripted::new(vec![down(); 5]), no_jitter());
        let status = supervisor.subscribe();

        let err = supervisor.connect_with_retry("p").await.unwrap_err();

        assert_eq!(err, ConnectError::Exhausted { attempts: 5 });
        assert_eq!(*status.borrow(), ConnectionStatus::OfflineMode);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_without_fallback_is_an_error() {
        let retry = RetryConfig {
            max_attempts: 2,
            offline_fallback: false,
            ..no_jitter()
        };
        let supervisor = ConnectionSupervisor::new(Scripted::new(vec![down(); 2]), retry);

        let err = supervisor.connect_with_retry("p").await.unwrap_err();
        assert_eq!(err, ConnectError::Exhausted { attempts: 2 });
        assert_eq!(supervisor.status(), ConnectionStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_connects_are_refused() {
        let connector = Scripted::new(Vec::new()).slow(Duration::from_millis(100));
        let supervisor = ConnectionSupervisor::new(connector, no_jitter());

        let (first, second) = tokio::join!(supervisor.connect("a"), supervisor.connect("b"));

        assert!(first.is_ok());
        assert_eq!(second, Err(ConnectError::AlreadyConnecting));
        assert_eq!(supervisor.connector().calls.get(), 1);
        assert!(!supervisor.is_connecting());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_cuts_backoff_short() {
        let supervisor = ConnectionSupervisor::new(Scripted::new(vec![down()]), no_jitter());

        let (retry, explicit) = tokio::join!(supervisor.connect_with_retry("p"), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            supervisor.connect("p").await
        });

        assert_eq!(retry, Err(ConnectError::Superseded));
        assert!(explicit.is_ok());
        assert_eq!(supervisor.connector().calls.get(), 2);
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_join_is_reported() {
        let supervisor = ConnectionSupervisor::new(
            Scripted::new(vec![Err(TransportError::RateLimited)]),
            no_jitter(),
        );

        let err = supervisor.connect("p").await.unwrap_err();
        assert_eq!(err, ConnectError::RateLimited);
        assert_eq!(supervisor.state(), ConnectionState::RateLimited);
        assert_eq!(supervisor.status(), ConnectionStatus::Error);
    }

    #[test]
    fn backoff_is_capped_and_jittered() {
        let supervisor =
            ConnectionSupervisor::with_seed(Scripted::new(Vec::new()), RetryConfig::default(), 3);

        for failures in 1..12u32 {
            let nominal = (250u64 << (failures - 1).min(31)).min(8000) as f64;
            let delay = supervisor.backoff_delay(failures).as_secs_f64() * 1000.0;
            assert!(delay >= nominal * 0.7 - 1e-6, "{failures}: {delay}");
            assert!(delay <= nominal * 1.3 + 1e-6, "{failures}: {delay}");
        }
    }
}
