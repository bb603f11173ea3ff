//! Bounded connection pool keyed by route.
//!
//! - Per-route caps (with named-route overrides) and one global cap
//! - Idle connections reused most-recently-used first
//! - LRU eviction of another route's idle connection when the global cap is reached
//! - Waiters parked on a `Notify` until capacity or an idle connection frees up

use crate::config::ConnectionPoolConfig;
use crate::error::{ClientError, Result};
use crate::pool::route::{Route, Scheme};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A transport connection that can sit idle in the pool.
pub trait Poolable: Send + 'static {
    /// False once the peer or the protocol layer has given up on the connection.
    fn is_open(&self) -> bool;
}

/// Opens new connections on behalf of the pool.
pub trait Connect: Send + Sync + 'static {
    type Connection: Poolable;

    fn connect(&self, route: &Route) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// Connection caps enforced by the pool
#[derive(Debug, Clone)]
pub struct PoolLimits {
    max_per_route: usize,
    max_total: usize,
    overrides: HashMap<Route, usize>,
}

impl PoolLimits {
    pub fn new(max_per_route: usize, max_total: usize) -> Self {
        PoolLimits {
            max_per_route,
            max_total,
            overrides: HashMap::new(),
        }
    }

    /// Give one route its own cap; it still counts toward the global cap.
    pub fn with_override(mut self, route: Route, max: usize) -> Self {
        self.overrides.insert(route, max);
        self
    }

    pub fn from_config(config: &ConnectionPoolConfig) -> Result<Self> {
        let mut limits = PoolLimits::new(config.max_per_route, config.max_total);
        for o in &config.route_overrides {
            let scheme = Scheme::parse(&o.scheme).ok_or_else(|| {
                ClientError::Config(format!("unsupported scheme in route override: {}", o.scheme))
            })?;
            let port = o.port.unwrap_or_else(|| scheme.default_port());
            limits = limits.with_override(Route::new(scheme, &o.host, port), o.max_connections);
        }
        limits.validate()?;
        Ok(limits)
    }

    pub fn max_for(&self, route: &Route) -> usize {
        self.overrides
            .get(route)
            .copied()
            .unwrap_or(self.max_per_route)
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    fn validate(&self) -> Result<()> {
        if self.max_total == 0 {
            return Err(ClientError::RouteRejected(
                "global connection cap must be positive".to_string(),
            ));
        }
        if self.max_per_route == 0 {
            return Err(ClientError::RouteRejected(
                "per-route connection cap must be positive".to_string(),
            ));
        }
        if let Some((route, _)) = self.overrides.iter().find(|(_, max)| **max == 0) {
            return Err(ClientError::RouteRejected(format!(
                "connection cap for {} must be positive",
                route
            )));
        }
        Ok(())
    }
}

impl Default for PoolLimits {
    fn default() -> Self {
        PoolLimits::new(40, 40)
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub leased: usize,
    pub idle: usize,
    pub max: usize,
}

struct IdleEntry<C> {
    conn: C,
    created_at: Instant,
    last_used: Instant,
    /// None means the connection never expires on its own
    expires_at: Option<Instant>,
}

impl<C: Poolable> IdleEntry<C> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    fn is_reusable(&self, now: Instant) -> bool {
        !self.is_expired(now) && self.conn.is_open()
    }
}

struct RoutePool<C> {
    /// Oldest at the front, most recently released at the back
    idle: VecDeque<IdleEntry<C>>,
    /// Leased + idle connections for this route
    allocated: usize,
}

impl<C> Default for RoutePool<C> {
    fn default() -> Self {
        RoutePool {
            idle: VecDeque::new(),
            allocated: 0,
        }
    }
}

struct PoolState<C> {
    routes: HashMap<Route, RoutePool<C>>,
    total: usize,
    closed: bool,
}

impl<C> PoolState<C> {
    fn release_slot(&mut self, route: &Route) {
        if let Some(rp) = self.routes.get_mut(route) {
            rp.allocated = rp.allocated.saturating_sub(1);
            if rp.allocated == 0 && rp.idle.is_empty() {
                self.routes.remove(route);
            }
        }
        self.total = self.total.saturating_sub(1);
    }

    fn idle_count(&self) -> usize {
        self.routes.values().map(|rp| rp.idle.len()).sum()
    }

    /// Drop the least recently used idle connection held by a route other than `except`.
    fn evict_lru(&mut self, except: &Route) -> Option<(Route, C)> {
        let victim = self
            .routes
            .iter()
            .filter(|(route, _)| *route != except)
            .filter_map(|(route, rp)| rp.idle.front().map(|e| (route, e.last_used)))
            .min_by_key(|(_, last_used)| *last_used)
            .map(|(route, _)| route.clone())?;
        let entry = self.routes.get_mut(&victim)?.idle.pop_front()?;
        self.release_slot(&victim);
        Some((victim, entry.conn))
    }
}

enum Checkout<C: Poolable> {
    Idle(IdleEntry<C>),
    Reserved(Reservation<C>),
}

/// Shared pool state. The reaper holds it weakly.
pub(crate) struct PoolCore<C> {
    limits: PoolLimits,
    state: Mutex<PoolState<C>>,
    available: Notify,
}

impl<C: Poolable> PoolCore<C> {
    fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Connection pool lock poisoned, recovering state");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Hand out an idle connection or reserve capacity for a new one.
    fn try_checkout(self: &Arc<Self>, route: &Route, now: Instant) -> Result<Option<Checkout<C>>> {
        let max = self.limits.max_for(route);
        if max == 0 {
            return Err(ClientError::RouteRejected(format!(
                "connection cap for {} is zero",
                route
            )));
        }

        let mut stale = Vec::new();
        let mut evicted = None;
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return Err(ClientError::PoolClosed);
            }

            let mut reused = None;
            if let Some(rp) = state.routes.get_mut(route) {
                while let Some(entry) = rp.idle.pop_back() {
                    if entry.is_reusable(now) {
                        reused = Some(entry);
                        break;
                    }
                    stale.push(entry.conn);
                }
            }
            for _ in 0..stale.len() {
                state.release_slot(route);
            }

            if let Some(entry) = reused {
                Some(Checkout::Idle(entry))
            } else {
                let allocated = state.routes.get(route).map_or(0, |rp| rp.allocated);
                let has_room = allocated < max
                    && (state.total < self.limits.max_total || {
                        evicted = state.evict_lru(route);
                        evicted.is_some()
                    });
                if has_room {
                    state.routes.entry(route.clone()).or_default().allocated += 1;
                    state.total += 1;
                    Some(Checkout::Reserved(Reservation {
                        core: Arc::clone(self),
                        route: route.clone(),
                        armed: true,
                    }))
                } else {
                    None
                }
            }
        };

        if !stale.is_empty() {
            debug!(route = %route, closed = stale.len(), "Discarded stale idle connections");
            self.available.notify_waiters();
        }
        if let Some((victim, _conn)) = evicted {
            debug!(route = %route, evicted = %victim, "Evicted idle connection to honor global cap");
        }
        Ok(outcome)
    }

    fn check_in(&self, route: &Route, conn: C, created_at: Instant, keep_alive: Option<Duration>, reusable: bool) {
        let now = Instant::now();
        let expires_at = keep_alive.and_then(|d| now.checked_add(d));
        let entry = IdleEntry {
            conn,
            created_at,
            last_used: now,
            expires_at,
        };

        let discarded = {
            let mut state = self.lock();
            if state.closed || !reusable || !entry.is_reusable(now) {
                state.release_slot(route);
                Some(entry)
            } else {
                state.routes.entry(route.clone()).or_default().idle.push_back(entry);
                None
            }
        };

        match discarded {
            Some(entry) => debug!(
                route = %route,
                age_ms = now.saturating_duration_since(entry.created_at).as_millis() as u64,
                "Closed released connection"
            ),
            None => debug!(route = %route, keep_alive = ?keep_alive, "Returned connection to pool"),
        }
        self.available.notify_waiters();
    }

    fn discard(&self, route: &Route) {
        self.lock().release_slot(route);
        self.available.notify_waiters();
    }

    /// Close idle connections matching `predicate`. Returns how many were closed.
    fn sweep<F>(&self, now: Instant, predicate: F) -> usize
    where
        F: Fn(&IdleEntry<C>, Instant) -> bool,
    {
        let mut closed = Vec::new();
        {
            let mut state = self.lock();
            let mut emptied = Vec::new();
            for (route, rp) in state.routes.iter_mut() {
                let before = rp.idle.len();
                let mut kept = VecDeque::with_capacity(before);
                for entry in rp.idle.drain(..) {
                    if predicate(&entry, now) {
                        closed.push(entry.conn);
                    } else {
                        kept.push_back(entry);
                    }
                }
                rp.idle = kept;
                let removed = before - rp.idle.len();
                if removed > 0 {
                    emptied.push((route.clone(), removed));
                }
            }
            for (route, removed) in emptied {
                for _ in 0..removed {
                    state.release_slot(&route);
                }
            }
        }

        let count = closed.len();
        if count > 0 {
            self.available.notify_waiters();
        }
        count
    }

    pub(crate) fn close_expired_at(&self, now: Instant) -> usize {
        self.sweep(now, |entry, now| entry.is_expired(now))
    }

    pub(crate) fn close_idle_at(&self, now: Instant, max_idle: Duration) -> usize {
        self.sweep(now, move |entry, now| {
            now.saturating_duration_since(entry.last_used) > max_idle
        })
    }

    fn stats(&self) -> PoolStats {
        let state = self.lock();
        let idle = state.idle_count();
        PoolStats {
            leased: state.total - idle,
            idle,
            max: self.limits.max_total,
        }
    }

    fn route_stats(&self, route: &Route) -> PoolStats {
        let state = self.lock();
        let (allocated, idle) = state
            .routes
            .get(route)
            .map_or((0, 0), |rp| (rp.allocated, rp.idle.len()));
        PoolStats {
            leased: allocated - idle,
            idle,
            max: self.limits.max_for(route),
        }
    }

    fn shutdown(&self) -> usize {
        let drained: Vec<C> = {
            let mut state = self.lock();
            state.closed = true;
            let mut drained = Vec::new();
            let routes: Vec<Route> = state.routes.keys().cloned().collect();
            for route in routes {
                let idle: Vec<IdleEntry<C>> = state
                    .routes
                    .get_mut(&route)
                    .map(|rp| rp.idle.drain(..).collect())
                    .unwrap_or_default();
                for entry in idle {
                    state.release_slot(&route);
                    drained.push(entry.conn);
                }
            }
            drained
        };
        self.available.notify_waiters();
        drained.len()
    }
}

/// Capacity reserved for a connection that is still being opened.
/// Dropping it before `fill` gives the capacity back.
struct Reservation<C: Poolable> {
    core: Arc<PoolCore<C>>,
    route: Route,
    armed: bool,
}

impl<C: Poolable> Reservation<C> {
    fn fill(mut self, conn: C) -> Pooled<C> {
        self.armed = false;
        Pooled {
            conn: Some(conn),
            route: self.route.clone(),
            created_at: Instant::now(),
            keep_alive: None,
            reused: false,
            core: Arc::clone(&self.core),
        }
    }
}

impl<C: Poolable> Drop for Reservation<C> {
    fn drop(&mut self) {
        if self.armed {
            self.core.discard(&self.route);
        }
    }
}

/// A connection checked out of the pool.
///
/// Hand it back with [`ConnectionPool::release`]. Dropping it instead closes
/// the connection and frees its slot.
pub struct Pooled<C: Poolable> {
    conn: Option<C>,
    route: Route,
    created_at: Instant,
    keep_alive: Option<Duration>,
    reused: bool,
    core: Arc<PoolCore<C>>,
}

impl<C: Poolable> Pooled<C> {
    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// True when the connection came from the idle set rather than a fresh connect
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// How long the connection may stay idle once released.
    pub fn set_keep_alive(&mut self, keep_alive: Duration) {
        self.keep_alive = Some(keep_alive);
    }
}

impl<C: Poolable> Deref for Pooled<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection present until released")
    }
}

impl<C: Poolable> DerefMut for Pooled<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection present until released")
    }
}

impl<C: Poolable> Drop for Pooled<C> {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            self.core.discard(&self.route);
        }
    }
}

/// Route-partitioned pool of reusable connections opened through `K`.
pub struct ConnectionPool<K: Connect> {
    core: Arc<PoolCore<K::Connection>>,
    connector: Arc<K>,
}

impl<K: Connect> Clone for ConnectionPool<K> {
    fn clone(&self) -> Self {
        ConnectionPool {
            core: Arc::clone(&self.core),
            connector: Arc::clone(&self.connector),
        }
    }
}

impl<K: Connect> ConnectionPool<K> {
    pub fn new(limits: PoolLimits, connector: K) -> Result<Self> {
        limits.validate()?;
        Ok(ConnectionPool {
            core: Arc::new(PoolCore {
                limits,
                state: Mutex::new(PoolState {
                    routes: HashMap::new(),
                    total: 0,
                    closed: false,
                }),
                available: Notify::new(),
            }),
            connector: Arc::new(connector),
        })
    }

    pub fn limits(&self) -> &PoolLimits {
        &self.core.limits
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Get a connection for `route`, waiting up to `timeout` for an idle
    /// connection or free capacity. A failed or cancelled wait leaves no trace.
    pub async fn acquire(&self, route: &Route, timeout: Duration) -> Result<Pooled<K::Connection>> {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.core.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.core.try_checkout(route, Instant::now())? {
                Some(Checkout::Idle(entry)) => {
                    debug!(route = %route, "Reusing pooled connection");
                    return Ok(Pooled {
                        conn: Some(entry.conn),
                        route: route.clone(),
                        created_at: entry.created_at,
                        keep_alive: None,
                        reused: true,
                        core: Arc::clone(&self.core),
                    });
                }
                Some(Checkout::Reserved(reservation)) => {
                    let conn = self.connector.connect(route).await?;
                    debug!(route = %route, "Opened new pooled connection");
                    return Ok(reservation.fill(conn));
                }
                None => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let waited = started.elapsed();
                warn!(route = %route, waited_ms = waited.as_millis() as u64, "Connection pool exhausted");
                return Err(ClientError::PoolExhausted {
                    route: route.to_string(),
                    waited,
                });
            }
        }
    }

    /// Return a connection. It goes back to the idle set only if `reusable`,
    /// still open and within its keep-alive deadline.
    pub fn release(&self, mut conn: Pooled<K::Connection>, reusable: bool) {
        if let Some(inner) = conn.conn.take() {
            conn.core
                .check_in(&conn.route, inner, conn.created_at, conn.keep_alive, reusable);
        }
    }

    /// Close idle connections whose keep-alive deadline has passed.
    pub fn close_expired(&self) -> usize {
        self.core.close_expired_at(Instant::now())
    }

    /// Close idle connections unused for longer than `max_idle`.
    pub fn close_idle(&self, max_idle: Duration) -> usize {
        self.core.close_idle_at(Instant::now(), max_idle)
    }

    pub fn stats(&self) -> PoolStats {
        self.core.stats()
    }

    pub fn route_stats(&self, route: &Route) -> PoolStats {
        self.core.route_stats(route)
    }

    /// Close every idle connection and fail all current and future acquires.
    pub fn shutdown(&self) -> usize {
        self.core.shutdown()
    }

    pub(crate) fn downgrade(&self) -> Weak<PoolCore<K::Connection>> {
        Arc::downgrade(&self.core)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory connection; `open` can be flipped to simulate a peer close.
    pub(crate) struct FakeConn {
        pub id: usize,
        pub open: Arc<AtomicBool>,
    }

    impl Poolable for FakeConn {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeConnector {
        pub opened: AtomicUsize,
        pub fail: AtomicBool,
        pub delay: Option<Duration>,
    }

    impl Connect for FakeConnector {
        type Connection = FakeConn;

        async fn connect(&self, route: &Route) -> Result<FakeConn> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::Connect {
                    route: route.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                });
            }
            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn {
                id,
                open: Arc::new(AtomicBool::new(true)),
            })
        }
    }

    pub(crate) fn fake_pool(limits: PoolLimits) -> ConnectionPool<FakeConnector> {
        ConnectionPool::new(limits, FakeConnector::default()).unwrap()
    }

    fn route(host: &str) -> Route {
        Route::new(Scheme::Http, host, 80)
    }

    const NO_WAIT: Duration = Duration::ZERO;

    #[tokio::test]
    async fn test_acquire_opens_then_reuses() {
        let pool = fake_pool(PoolLimits::new(2, 4));
        let a = route("a.example");

        let mut conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        assert!(!conn.is_reused());
        let first_id = conn.id;
        conn.set_keep_alive(Duration::from_secs(20));
        pool.release(conn, true);
        assert_eq!(pool.route_stats(&a).idle, 1);

        let conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        assert!(conn.is_reused());
        assert_eq!(conn.id, first_id);
        assert_eq!(pool.connector().opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_timeout_at_cap_fails_immediately() {
        let pool = fake_pool(PoolLimits::new(1, 10));
        let a = route("a.example");
        let _held = pool.acquire(&a, NO_WAIT).await.unwrap();

        let started = Instant::now();
        let err = pool.acquire(&a, NO_WAIT).await.err().unwrap();
        assert!(matches!(err, ClientError::PoolExhausted { .. }));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_failed_wait_leaves_counts_untouched() {
        let pool = fake_pool(PoolLimits::new(1, 1));
        let a = route("a.example");
        let held = pool.acquire(&a, NO_WAIT).await.unwrap();

        for _ in 0..3 {
            assert!(pool.acquire(&a, Duration::from_millis(10)).await.is_err());
        }
        assert_eq!(pool.stats(), PoolStats { leased: 1, idle: 0, max: 1 });

        pool.release(held, false);
        assert_eq!(pool.stats().leased, 0);
        assert!(pool.acquire(&a, NO_WAIT).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_reusable_release_is_never_handed_out() {
        let pool = fake_pool(PoolLimits::new(2, 2));
        let a = route("a.example");

        let conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        let broken_id = conn.id;
        pool.release(conn, false);
        assert_eq!(pool.route_stats(&a).idle, 0);

        let conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        assert_ne!(conn.id, broken_id);
        assert!(!conn.is_reused());
    }

    #[tokio::test]
    async fn test_closed_connection_not_returned_to_idle() {
        let pool = fake_pool(PoolLimits::new(2, 2));
        let a = route("a.example");

        let conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        conn.open.store(false, Ordering::SeqCst);
        pool.release(conn, true);
        assert_eq!(pool.stats(), PoolStats { leased: 0, idle: 0, max: 2 });
    }

    #[tokio::test]
    async fn test_idle_connection_closed_by_peer_is_skipped() {
        let pool = fake_pool(PoolLimits::new(2, 2));
        let a = route("a.example");

        let conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        let flag = Arc::clone(&conn.open);
        let stale_id = conn.id;
        pool.release(conn, true);
        flag.store(false, Ordering::SeqCst);

        let conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        assert_ne!(conn.id, stale_id);
        assert_eq!(pool.route_stats(&a).leased, 1);
    }

    #[tokio::test]
    async fn test_drop_without_release_frees_slot() {
        let pool = fake_pool(PoolLimits::new(1, 1));
        let a = route("a.example");
        {
            let _conn = pool.acquire(&a, NO_WAIT).await.unwrap();
            assert_eq!(pool.stats().leased, 1);
        }
        assert_eq!(pool.stats().leased, 0);
        assert!(pool.acquire(&a, NO_WAIT).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_failure_returns_capacity() {
        let pool = fake_pool(PoolLimits::new(1, 1));
        let a = route("a.example");
        pool.connector().fail.store(true, Ordering::SeqCst);

        assert!(matches!(
            pool.acquire(&a, NO_WAIT).await,
            Err(ClientError::Connect { .. })
        ));
        assert_eq!(pool.stats().leased, 0);

        pool.connector().fail.store(false, Ordering::SeqCst);
        assert!(pool.acquire(&a, NO_WAIT).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_connect_returns_capacity() {
        let connector = FakeConnector {
            delay: Some(Duration::from_secs(5)),
            ..FakeConnector::default()
        };
        let pool = ConnectionPool::new(PoolLimits::new(1, 1), connector).unwrap();
        let a = route("a.example");

        let attempt = tokio::time::timeout(Duration::from_millis(20), pool.acquire(&a, NO_WAIT)).await;
        assert!(attempt.is_err());
        assert_eq!(pool.stats().leased, 0);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let pool = fake_pool(PoolLimits::new(1, 1));
        let a = route("a.example");
        let mut held = pool.acquire(&a, NO_WAIT).await.unwrap();
        held.set_keep_alive(Duration::from_secs(20));
        let held_id = held.id;

        let waiter = {
            let pool = pool.clone();
            let a = a.clone();
            tokio::spawn(async move { pool.acquire(&a, Duration::from_secs(5)).await.map(|c| c.id) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.release(held, true);

        assert_eq!(waiter.await.unwrap().unwrap(), held_id);
    }

    #[tokio::test]
    async fn test_route_override_cap() {
        let local = Route::new(Scheme::Http, "localhost", 8080);
        let pool = fake_pool(PoolLimits::new(1, 10).with_override(local.clone(), 3));

        let mut held = Vec::new();
        for _ in 0..3 {
            held.push(pool.acquire(&local, NO_WAIT).await.unwrap());
        }
        assert!(pool.acquire(&local, NO_WAIT).await.is_err());
        assert_eq!(pool.route_stats(&local).max, 3);

        let other = route("b.example");
        let _b = pool.acquire(&other, NO_WAIT).await.unwrap();
        assert!(pool.acquire(&other, NO_WAIT).await.is_err());
    }

    #[tokio::test]
    async fn test_override_still_bounded_by_global_cap() {
        let local = Route::new(Scheme::Http, "localhost", 8080);
        let pool = fake_pool(PoolLimits::new(1, 2).with_override(local.clone(), 80));

        let _x = pool.acquire(&local, NO_WAIT).await.unwrap();
        let _y = pool.acquire(&local, NO_WAIT).await.unwrap();
        assert!(matches!(
            pool.acquire(&local, NO_WAIT).await,
            Err(ClientError::PoolExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_global_cap_evicts_other_routes_idle() {
        let pool = fake_pool(PoolLimits::new(2, 2));
        let a = route("a.example");
        let b = route("b.example");

        let mut first = pool.acquire(&a, NO_WAIT).await.unwrap();
        let mut second = pool.acquire(&a, NO_WAIT).await.unwrap();
        let oldest = first.id;
        first.set_keep_alive(Duration::from_secs(20));
        second.set_keep_alive(Duration::from_secs(20));
        pool.release(first, true);
        tokio::time::sleep(Duration::from_millis(2)).await;
        pool.release(second, true);
        assert_eq!(pool.route_stats(&a).idle, 2);

        let _b = pool.acquire(&b, NO_WAIT).await.unwrap();
        assert_eq!(pool.route_stats(&a).idle, 1);
        assert_eq!(pool.stats(), PoolStats { leased: 1, idle: 1, max: 2 });

        let survivor = pool.acquire(&a, NO_WAIT).await.unwrap();
        assert_ne!(survivor.id, oldest);
    }

    #[tokio::test]
    async fn test_global_cap_without_idle_exhausts() {
        let pool = fake_pool(PoolLimits::new(2, 2));
        let _a = pool.acquire(&route("a.example"), NO_WAIT).await.unwrap();
        let _b = pool.acquire(&route("b.example"), NO_WAIT).await.unwrap();
        assert!(matches!(
            pool.acquire(&route("c.example"), NO_WAIT).await,
            Err(ClientError::PoolExhausted { .. })
        ));
    }

    #[test]
    fn test_zero_caps_rejected() {
        assert!(matches!(
            ConnectionPool::new(PoolLimits::new(0, 10), FakeConnector::default()),
            Err(ClientError::RouteRejected(_))
        ));
        assert!(matches!(
            ConnectionPool::new(PoolLimits::new(10, 0), FakeConnector::default()),
            Err(ClientError::RouteRejected(_))
        ));
        let limits = PoolLimits::new(10, 10).with_override(route("a.example"), 0);
        assert!(matches!(
            ConnectionPool::new(limits, FakeConnector::default()),
            Err(ClientError::RouteRejected(_))
        ));
    }

    #[test]
    fn test_limits_from_config() {
        let limits = PoolLimits::from_config(&ConnectionPoolConfig::default()).unwrap();
        assert_eq!(limits.max_total(), 40);
        assert_eq!(limits.max_for(&route("example.com")), 40);
        assert_eq!(
            limits.max_for(&Route::new(Scheme::Http, "localhost", 8080)),
            80
        );
        assert_eq!(limits.max_for(&Route::new(Scheme::Https, "localhost", 8080)), 40);
    }

    #[test]
    fn test_limits_from_config_bad_scheme() {
        let mut config = ConnectionPoolConfig::default();
        config.route_overrides[0].scheme = "gopher".to_string();
        assert!(matches!(
            PoolLimits::from_config(&config),
            Err(ClientError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_close_expired_respects_deadline() {
        let pool = fake_pool(PoolLimits::new(2, 2));
        let a = route("a.example");
        let mut conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        conn.set_keep_alive(Duration::from_secs(10));
        pool.release(conn, true);

        let now = Instant::now();
        assert_eq!(pool.core.close_expired_at(now + Duration::from_secs(5)), 0);
        assert_eq!(pool.route_stats(&a).idle, 1);

        assert_eq!(pool.core.close_expired_at(now + Duration::from_secs(11)), 1);
        assert_eq!(pool.stats(), PoolStats { leased: 0, idle: 0, max: 2 });
    }

    #[tokio::test]
    async fn test_close_idle_ignores_keep_alive() {
        let pool = fake_pool(PoolLimits::new(2, 2));
        let a = route("a.example");
        let mut conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        conn.set_keep_alive(Duration::from_secs(3600));
        pool.release(conn, true);

        let now = Instant::now();
        assert_eq!(pool.core.close_idle_at(now + Duration::from_secs(10), Duration::from_secs(30)), 0);
        assert_eq!(pool.core.close_idle_at(now + Duration::from_secs(31), Duration::from_secs(30)), 1);
        assert_eq!(pool.route_stats(&a).idle, 0);
    }

    #[tokio::test]
    async fn test_expired_idle_not_reused() {
        let pool = fake_pool(PoolLimits::new(2, 2));
        let a = route("a.example");
        let mut conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        let first = conn.id;
        conn.set_keep_alive(Duration::from_millis(5));
        pool.release(conn, true);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        assert_ne!(conn.id, first);
    }

    #[tokio::test]
    async fn test_zero_keep_alive_is_not_retained() {
        let pool = fake_pool(PoolLimits::new(2, 2));
        let a = route("a.example");
        let mut conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        conn.set_keep_alive(Duration::ZERO);
        pool.release(conn, true);
        assert_eq!(pool.route_stats(&a).idle, 0);
    }

    #[tokio::test]
    async fn test_shutdown_fails_waiters_and_closes_idle() {
        let pool = fake_pool(PoolLimits::new(1, 1));
        let a = route("a.example");
        let b = route("b.example");
        let mut conn = pool.acquire(&a, NO_WAIT).await.unwrap();
        conn.set_keep_alive(Duration::from_secs(20));
        pool.release(conn, true);
        let held = pool.acquire(&a, NO_WAIT).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(&b, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.shutdown();

        assert!(matches!(waiter.await.unwrap(), Err(ClientError::PoolClosed)));
        pool.release(held, true);
        assert_eq!(pool.stats(), PoolStats { leased: 0, idle: 0, max: 1 });
        assert!(matches!(
            pool.acquire(&a, NO_WAIT).await,
            Err(ClientError::PoolClosed)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_release_respects_caps() {
        const PER_ROUTE: usize = 3;
        const TOTAL: usize = 5;
        let pool = fake_pool(PoolLimits::new(PER_ROUTE, TOTAL));
        let routes = [route("a.example"), route("b.example"), route("c.example")];
        let in_use: Arc<Vec<AtomicUsize>> = Arc::new(routes.iter().map(|_| AtomicUsize::new(0)).collect());
        let total_in_use = Arc::new(AtomicUsize::new(0));
        let violations = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for worker in 0..24 {
            let pool = pool.clone();
            let routes = routes.clone();
            let in_use = Arc::clone(&in_use);
            let total_in_use = Arc::clone(&total_in_use);
            let violations = Arc::clone(&violations);
            tasks.push(tokio::spawn(async move {
                for round in 0..20 {
                    let idx = (worker + round) % routes.len();
                    let Ok(mut conn) = pool.acquire(&routes[idx], Duration::from_secs(5)).await else {
                        continue;
                    };
                    let here = in_use[idx].fetch_add(1, Ordering::SeqCst) + 1;
                    let everywhere = total_in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    if here > PER_ROUTE || everywhere > TOTAL {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                    in_use[idx].fetch_sub(1, Ordering::SeqCst);
                    total_in_use.fetch_sub(1, Ordering::SeqCst);
                    conn.set_keep_alive(Duration::from_secs(20));
                    pool.release(conn, round % 4 != 0);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        let stats = pool.stats();
        assert_eq!(stats.leased, 0);
        assert!(stats.idle <= TOTAL);
    }
}
