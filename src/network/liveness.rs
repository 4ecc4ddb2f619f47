//! Control-plane keepalive tracking
//!
//! The peer pings periodically. If no ping arrives for `ping_timeout`
//! while connected, the watchdog tears the transport down and reconnects.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::network::transport::Transport;
use crate::shutdown::ShutdownSignal;

/// Connection and ping timing shared between the network handler and
/// the watchdog. Timestamps are microseconds since `origin`, 0 = never.
#[derive(Debug)]
pub struct LivenessState {
    origin: Instant,
    connected: AtomicBool,
    connected_at_us: AtomicU64,
    last_ping_us: AtomicU64,
    pings: AtomicU64,
    lock: Mutex<()>,
    connected_cv: Condvar,
}

impl LivenessState {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            connected: AtomicBool::new(false),
            connected_at_us: AtomicU64::new(0),
            last_ping_us: AtomicU64::new(0),
            pings: AtomicU64::new(0),
            lock: Mutex::new(()),
            connected_cv: Condvar::new(),
        }
    }

    fn to_us(&self, at: Instant) -> u64 {
        (at.saturating_duration_since(self.origin).as_micros() as u64).max(1)
    }

    fn from_us(&self, us: u64) -> Option<Instant> {
        (us != 0).then(|| self.origin + Duration::from_micros(us))
    }

    /// Fresh connection: start the grace period and forget old pings
    pub fn mark_connected(&self, now: Instant) {
        let _guard = self.lock.lock();
        self.connected_at_us.store(self.to_us(now), Ordering::Release);
        self.last_ping_us.store(0, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        self.connected_cv.notify_all();
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn record_ping(&self, now: Instant) {
        self.last_ping_us.store(self.to_us(now), Ordering::Release);
        self.pings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn connected_at(&self) -> Option<Instant> {
        self.from_us(self.connected_at_us.load(Ordering::Acquire))
    }

    pub fn last_ping_at(&self) -> Option<Instant> {
        self.from_us(self.last_ping_us.load(Ordering::Acquire))
    }

    /// Pings received since startup
    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    /// Block until connected or `timeout` elapses. Returns the
    /// connection state seen last.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !self.is_connected() {
            if self.connected_cv.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_connected()
    }
}

impl Default for LivenessState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    None,
    Reconnect,
}

/// Periodic ping-timeout check
pub struct LivenessWatchdog {
    state: Arc<LivenessState>,
    ping_timeout: Duration,
    grace: Duration,
    reconnects: u64,
}

impl LivenessWatchdog {
    pub fn new(state: Arc<LivenessState>, ping_timeout: Duration, grace: Duration) -> Self {
        Self {
            state,
            ping_timeout,
            grace,
            reconnects: 0,
        }
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Evaluate the timeout at `now`.
    ///
    /// On timeout the ping clock restarts at `now`, so a connection that
    /// stays silent fires again only after another full timeout.
    pub fn check(&mut self, now: Instant) -> WatchdogAction {
        if !self.state.is_connected() {
            return WatchdogAction::None;
        }
        let Some(connected_at) = self.state.connected_at() else {
            return WatchdogAction::None;
        };
        if now.saturating_duration_since(connected_at) < self.grace {
            return WatchdogAction::None;
        }

        let reference = self
            .state
            .last_ping_at()
            .map_or(connected_at, |ping| ping.max(connected_at));
        if now.saturating_duration_since(reference) <= self.ping_timeout {
            return WatchdogAction::None;
        }

        self.state.last_ping_us.store(self.state.to_us(now), Ordering::Release);
        self.reconnects += 1;
        WatchdogAction::Reconnect
    }

    /// Watchdog thread body: check every `check_interval`, and on timeout
    /// disconnect, wait `reconnect_delay`, reconnect.
    pub fn run(
        mut self,
        transport: Arc<dyn Transport>,
        check_interval: Duration,
        reconnect_delay: Duration,
        shutdown: &ShutdownSignal,
    ) {
        tracing::debug!("Liveness watchdog started");
        while !shutdown.wait(check_interval) {
            if self.check(Instant::now()) != WatchdogAction::Reconnect {
                continue;
            }
            tracing::warn!(
                "No ping from peer for {:?}, reconnecting",
                self.ping_timeout
            );
            transport.disconnect();
            if shutdown.wait(reconnect_delay) {
                break;
            }
            if let Err(e) = transport.connect() {
                tracing::warn!("Reconnect request failed: {}", e);
            }
        }
        tracing::debug!("Liveness watchdog stopped after {} reconnects", self.reconnects);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);
    const GRACE: Duration = Duration::from_secs(1);

    fn watchdog() -> (LivenessWatchdog, Arc<LivenessState>) {
        let state = Arc::new(LivenessState::new());
        (LivenessWatchdog::new(state.clone(), TIMEOUT, GRACE), state)
    }

    #[test]
    fn test_idle_while_disconnected() {
        let (mut wd, _) = watchdog();
        let later = Instant::now() + TIMEOUT * 3;
        assert_eq!(wd.check(later), WatchdogAction::None);
    }

    #[test]
    fn test_single_reconnect_per_timeout() {
        let (mut wd, state) = watchdog();
        let t0 = Instant::now();
        state.mark_connected(t0);

        assert_eq!(wd.check(t0 + TIMEOUT), WatchdogAction::None);

        let fired = t0 + TIMEOUT + Duration::from_millis(1);
        assert_eq!(wd.check(fired), WatchdogAction::Reconnect);
        // Further checks in the same window do not fire again
        for step in 1..=9 {
            let now = fired + Duration::from_secs(step);
            assert_eq!(wd.check(now), WatchdogAction::None);
        }
        assert_eq!(wd.reconnects(), 1);

        // Still silent a full timeout later: fires once more
        assert_eq!(
            wd.check(fired + TIMEOUT + Duration::from_millis(1)),
            WatchdogAction::Reconnect
        );
        assert_eq!(wd.reconnects(), 2);
    }

    #[test]
    fn test_ping_keeps_connection_alive() {
        let (mut wd, state) = watchdog();
        let t0 = Instant::now();
        state.mark_connected(t0);
        state.record_ping(t0 + Duration::from_secs(8));

        assert_eq!(wd.check(t0 + Duration::from_secs(15)), WatchdogAction::None);
        assert_eq!(wd.check(t0 + Duration::from_secs(19)), WatchdogAction::Reconnect);
        assert_eq!(state.pings(), 1);
    }

    #[test]
    fn test_grace_after_connect() {
        let state = Arc::new(LivenessState::new());
        // Timeout shorter than the grace period
        let mut wd = LivenessWatchdog::new(state.clone(), Duration::from_millis(100), GRACE);
        let t0 = Instant::now();
        state.mark_connected(t0);

        assert_eq!(wd.check(t0 + Duration::from_millis(500)), WatchdogAction::None);
        assert_eq!(wd.check(t0 + GRACE), WatchdogAction::Reconnect);
    }

    #[test]
    fn test_reconnect_resets_ping_history() {
        let state = LivenessState::new();
        let t0 = Instant::now();
        state.mark_connected(t0);
        state.record_ping(t0);
        assert!(state.last_ping_at().is_some());

        state.mark_disconnected();
        assert!(!state.wait_connected(Duration::from_millis(5)));
        state.mark_connected(t0 + Duration::from_secs(1));
        assert!(state.last_ping_at().is_none());
        assert!(state.wait_connected(Duration::from_millis(5)));
    }
}
