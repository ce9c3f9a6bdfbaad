//! BETA1: cache-aware rendezvous hashing with bounded load.
//!
//! # Selection
//! ```text
//! rank healthy servers by hash(key ‖ server) (descending)
//!     → walk the ranking, admit the first candidate that is
//!         - not above capacity_factor × average load
//!         - not warming up above warmup_quota_factor × average load
//!     → nobody admitted: lowest-loaded server, preferring warm ones
//!     → remember the key on the chosen server
//! ```
//!
//! # Design Decisions
//! - Ranking is a pure function of (key, healthy set); no shared ranking state
//! - Admission rejections are retried internally, never surfaced
//! - Membership is diffed on every selection; new servers warm up, removed
//!   servers lose their state
//! - Hit/redirect counters are observability only

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::Beta1Config;
use crate::observability::metrics;
use crate::pool::{Server, ServerId, ServerPool};
use crate::strategy::snapshot::{ratio, Beta1Summary};
use crate::strategy::{Clock, MetricsSnapshot, Strategy, StrategyKind};

/// Rendezvous weight of `server` for `key`.
pub fn hrw_weight(key: &str, server: &ServerId) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(key.as_bytes());
    hasher.write_u8(0xff);
    hasher.write(server.host.as_bytes());
    hasher.write_u16(server.port);
    hasher.finish()
}

/// Servers in preference order for `key`: highest weight first.
pub fn rank(key: &str, servers: &[Arc<Server>]) -> Vec<Arc<Server>> {
    let mut weighted: Vec<(u64, Arc<Server>)> = servers
        .iter()
        .map(|s| (hrw_weight(key, s.id()), s.clone()))
        .collect();
    weighted.sort_by(|(wa, a), (wb, b)| wb.cmp(wa).then_with(|| a.id().cmp(b.id())));
    weighted.into_iter().map(|(_, s)| s).collect()
}

/// Why admission control turned a candidate away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BoundedLoad,
    WarmUp,
}

/// Insertion-ordered set that forgets its oldest key past `limit`.
#[derive(Debug)]
struct RecentKeys {
    order: VecDeque<String>,
    members: HashSet<String>,
    limit: usize,
}

impl RecentKeys {
    fn new(limit: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            limit,
        }
    }

    fn record(&mut self, key: &str) {
        if self.members.contains(key) {
            return;
        }
        if self.order.len() >= self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(key.to_string());
        self.members.insert(key.to_string());
    }

    fn contains(&self, key: &str) -> bool {
        self.members.contains(key)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug)]
struct CacheState {
    keys: RecentKeys,
    total_requests: u64,
    warmup_started: Option<Instant>,
}

impl CacheState {
    fn new(limit: usize, warmup_started: Option<Instant>) -> Self {
        Self {
            keys: RecentKeys::new(limit),
            total_requests: 0,
            warmup_started,
        }
    }
}

#[derive(Debug)]
pub struct Beta1 {
    config: Beta1Config,
    servers: DashMap<ServerId, CacheState>,
    known: ArcSwapOption<Vec<ServerId>>,
    rescan: Mutex<()>,
    selections: AtomicU64,
    hits: AtomicU64,
    bounded_redirects: AtomicU64,
    warmup_redirects: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Beta1 {
    pub fn new(config: Beta1Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            servers: DashMap::new(),
            known: ArcSwapOption::empty(),
            rescan: Mutex::new(()),
            selections: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            bounded_redirects: AtomicU64::new(0),
            warmup_redirects: AtomicU64::new(0),
            clock,
        }
    }

    fn warmup_duration(&self) -> Duration {
        Duration::from_secs(self.config.warmup_secs)
    }

    /// Diff pool membership against the last observation.
    ///
    /// The first observation is the baseline: servers present when the
    /// strategy starts do not warm up.
    fn observe_membership(&self, pool: &ServerPool) {
        let current = pool.members();
        if self.known.load().as_deref() == Some(&current) {
            return;
        }

        let _guard = self.rescan.lock();
        let previous = self.known.load_full();
        let now = self.clock.now();
        let limit = self.config.recent_key_limit;

        match previous.as_deref() {
            None => {
                for id in &current {
                    self.servers
                        .entry(id.clone())
                        .or_insert_with(|| CacheState::new(limit, None));
                }
            }
            Some(previous) if previous == &current => return,
            Some(previous) => {
                let before: BTreeSet<&ServerId> = previous.iter().collect();
                let after: BTreeSet<&ServerId> = current.iter().collect();

                for id in after.difference(&before) {
                    self.servers
                        .insert((*id).clone(), CacheState::new(limit, Some(now)));
                    tracing::info!(server = %id, warmup_secs = self.config.warmup_secs, "BETA1 server warming up");
                }
                for id in before.difference(&after) {
                    self.servers.remove(*id);
                    tracing::info!(server = %id, "BETA1 server state purged");
                }
            }
        }
        self.known.store(Some(Arc::new(current)));
    }

    fn warming_since(&self, id: &ServerId, now: Instant) -> Option<Duration> {
        let started = self.servers.get(id)?.warmup_started?;
        let elapsed = now.saturating_duration_since(started);
        (elapsed < self.warmup_duration()).then_some(elapsed)
    }

    /// Admission is judged on the load the candidate will carry once this
    /// dispatch lands, against the average including it.
    ///
    /// An idle server always fits under the capacity bound; the warm-up
    /// quota has no such floor.
    fn admit(&self, candidate: &Server, average_after: f64, now: Instant) -> Result<(), Rejection> {
        let projected = candidate.active_connections() as f64 + 1.0;
        if projected > (self.config.capacity_factor * average_after).max(1.0) {
            return Err(Rejection::BoundedLoad);
        }
        if self.warming_since(candidate.id(), now).is_some()
            && projected > self.config.warmup_quota_factor * average_after
        {
            return Err(Rejection::WarmUp);
        }
        Ok(())
    }

    /// Lowest-loaded server, preferring servers that are not warming up.
    fn fallback(&self, healthy: &[Arc<Server>], now: Instant) -> Option<Arc<Server>> {
        let warm = healthy
            .iter()
            .filter(|s| self.warming_since(s.id(), now).is_none())
            .min_by_key(|s| s.active_connections());
        warm.or_else(|| healthy.iter().min_by_key(|s| s.active_connections()))
            .cloned()
    }

    fn remember(&self, server: &ServerId, key: &str) {
        let mut state = self
            .servers
            .entry(server.clone())
            .or_insert_with(|| CacheState::new(self.config.recent_key_limit, None));
        state.keys.record(key);
        state.total_requests += 1;
    }

    /// Whether `key` is among the recently seen keys of `server`.
    pub fn has_recent_key(&self, server: &ServerId, key: &str) -> bool {
        self.servers
            .get(server)
            .is_some_and(|state| state.keys.contains(key))
    }

    pub fn is_warming(&self, server: &ServerId) -> bool {
        self.warming_since(server, self.clock.now()).is_some()
    }
}

impl Strategy for Beta1 {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Beta1
    }

    fn select(&self, pool: &ServerPool, key: Option<&str>) -> Option<Arc<Server>> {
        self.observe_membership(pool);

        let healthy = pool.list_healthy();
        if healthy.is_empty() {
            return None;
        }
        let now = self.clock.now();

        let Some(key) = key else {
            return self.fallback(&healthy, now);
        };

        let total: usize = healthy.iter().map(|s| s.active_connections()).sum();
        let average_after = (total + 1) as f64 / healthy.len() as f64;

        let ranked = rank(key, &healthy);
        let mut first_rejection = None;
        let mut admitted = None;
        for (position, candidate) in ranked.iter().enumerate() {
            match self.admit(candidate, average_after, now) {
                Ok(()) => {
                    admitted = Some((position, candidate.clone()));
                    break;
                }
                Err(reason) => {
                    first_rejection.get_or_insert(reason);
                }
            }
        }

        let chosen = match admitted {
            Some((0, server)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_beta1_selection("hit");
                server
            }
            other => {
                match first_rejection {
                    Some(Rejection::WarmUp) => {
                        self.warmup_redirects.fetch_add(1, Ordering::Relaxed);
                        metrics::record_beta1_selection("warmup_redirect");
                    }
                    _ => {
                        self.bounded_redirects.fetch_add(1, Ordering::Relaxed);
                        metrics::record_beta1_selection("bounded_redirect");
                    }
                }
                match other {
                    Some((_, server)) => server,
                    None => self.fallback(&healthy, now)?,
                }
            }
        };
        self.selections.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(key, server = %chosen.id(), average_after, "BETA1 selected");
        self.remember(chosen.id(), key);
        Some(chosen)
    }

    fn annotate(&self, snapshot: &mut MetricsSnapshot) {
        let now = self.clock.now();
        let warmup = self.warmup_duration().as_secs_f64();
        let mut warming = 0;

        for entry in self.servers.iter() {
            let progress = match self.warming_since(entry.key(), now) {
                Some(elapsed) if warmup > 0.0 => {
                    warming += 1;
                    (elapsed.as_secs_f64() / warmup).clamp(0.0, 1.0)
                }
                _ => 1.0,
            };
            if let Some(server) = snapshot.server_mut(entry.key()) {
                server.warmup_progress = Some(progress);
                server.recent_keys = Some(entry.value().keys.len());
                server.total_requests = Some(entry.value().total_requests);
            }
        }

        let selections = self.selections.load(Ordering::Relaxed);
        let bounded = self.bounded_redirects.load(Ordering::Relaxed);
        let warmup_redirects = self.warmup_redirects.load(Ordering::Relaxed);
        snapshot.beta1 = Some(Beta1Summary {
            selections,
            cache_hit_rate: ratio(self.hits.load(Ordering::Relaxed), selections),
            redirect_rate: ratio(bounded + warmup_redirects, selections),
            bounded_redirect_rate: ratio(bounded, selections),
            warmup_redirect_rate: ratio(warmup_redirects, selections),
            warming_servers: warming,
        });
    }
}
