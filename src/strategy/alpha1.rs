//! ALPHA1: tail-latency reduction.
//!
//! Samples two healthy servers at random and routes to the one with the
//! lower tail-risk score:
//!
//! ```text
//! risk = work_ewma + β · interference_signal + γ · head_request_age
//! ```
//!
//! - `work_ewma`: smoothed outstanding work, `connections × latency_ewma`
//! - `interference_signal`: volatility of the connection count, in the same
//!   unit as work
//! - `head_request_age`: age of the oldest outstanding request (ms)
//!
//! Every `adjust_every` completions the rolling p99 is compared against
//! `0.9 × SLO`; β and γ grow while the tail is too slow and decay back toward
//! their initial values otherwise, always clamped to their configured bounds.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::config::Alpha1Config;
use crate::observability::metrics;
use crate::pool::{LatencyWindow, Server, ServerId, ServerPool};
use crate::strategy::snapshot::{ratio, Alpha1Summary};
use crate::strategy::{Clock, Completion, MetricsSnapshot, Strategy, StrategyKind};

/// Adaptive risk weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskWeights {
    pub beta: f64,
    pub gamma: f64,
}

/// Tail-risk score of one server.
pub fn risk(work_ewma: f64, interference: f64, head_age_ms: f64, weights: RiskWeights) -> f64 {
    work_ewma + weights.beta * interference + weights.gamma * head_age_ms
}

#[derive(Debug, Default)]
struct TailState {
    latency_ewma: Option<f64>,
    work_ewma: f64,
    interference: f64,
    conn_samples: VecDeque<f64>,
    outstanding: VecDeque<Instant>,
}

impl TailState {
    /// Latency unit used to turn connection counts into work.
    fn unit_ms(&self) -> f64 {
        self.latency_ewma.unwrap_or(0.0).max(1.0)
    }

    fn head_age_ms(&self, now: Instant) -> f64 {
        self.outstanding
            .iter()
            .min()
            .map(|oldest| now.saturating_duration_since(*oldest).as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

fn std_dev(samples: &VecDeque<f64>) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[derive(Debug)]
pub struct Alpha1 {
    config: Alpha1Config,
    servers: DashMap<ServerId, TailState>,
    weights: ArcSwap<RiskWeights>,
    recent: Mutex<LatencyWindow>,
    completions: AtomicU64,
    dispatched: AtomicU64,
    hedged: AtomicU64,
    rng: Mutex<StdRng>,
    clock: Arc<dyn Clock>,
}

impl Alpha1 {
    pub fn new(config: Alpha1Config, rng: StdRng, clock: Arc<dyn Clock>) -> Self {
        let weights = RiskWeights {
            beta: config.beta,
            gamma: config.gamma,
        };
        let recent = LatencyWindow::new(config.p99_window);
        Self {
            config,
            servers: DashMap::new(),
            weights: ArcSwap::from_pointee(weights),
            recent: Mutex::new(recent),
            completions: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            hedged: AtomicU64::new(0),
            rng: Mutex::new(rng),
            clock,
        }
    }

    pub fn weights(&self) -> RiskWeights {
        **self.weights.load()
    }

    pub fn target_p99_ms(&self) -> f64 {
        0.9 * self.config.slo_ms
    }

    pub fn p99_ms(&self) -> Option<f64> {
        self.recent.lock().percentile(99.0)
    }

    /// Refresh the server's smoothed state and return its current risk.
    fn touch(&self, server: &Server, weights: RiskWeights, now: Instant) -> f64 {
        let alpha = self.config.ewma_alpha;
        let connections = server.active_connections() as f64;

        let mut entry = self.servers.entry(server.id().clone()).or_default();
        let state = entry.value_mut();
        let unit = state.unit_ms();

        state.work_ewma = alpha * connections * unit + (1.0 - alpha) * state.work_ewma;
        state.conn_samples.push_back(connections);
        while state.conn_samples.len() > self.config.volatility_window {
            state.conn_samples.pop_front();
        }
        state.interference = std_dev(&state.conn_samples) * unit;

        risk(state.work_ewma, state.interference, state.head_age_ms(now), weights)
    }

    /// Whether a request with `estimated_service_ms` on `server` is predicted
    /// to miss `SLO × hedge_multiplier`.
    pub fn should_hedge(&self, server: &ServerId, estimated_service_ms: f64) -> bool {
        let queued = self.servers.get(server).map(|s| s.work_ewma).unwrap_or(0.0);
        let predicted_finish = queued + estimated_service_ms;
        predicted_finish > self.config.slo_ms * self.config.hedge_multiplier
    }

    /// One feedback step from `current`, clamped to the configured bounds.
    fn step(&self, current: RiskWeights, tail_too_slow: bool) -> RiskWeights {
        let c = &self.config;
        let next = if tail_too_slow {
            RiskWeights {
                beta: current.beta * c.increase_factor,
                gamma: current.gamma * c.increase_factor,
            }
        } else {
            RiskWeights {
                beta: current.beta + (c.beta - current.beta) * c.decay_rate,
                gamma: current.gamma + (c.gamma - current.gamma) * c.decay_rate,
            }
        };
        RiskWeights {
            beta: next.beta.clamp(c.beta_min, c.beta_max),
            gamma: next.gamma.clamp(c.gamma_min, c.gamma_max),
        }
    }

    /// Feedback step, run once per `adjust_every` completions.
    fn adjust(&self) {
        let Some(p99) = self.p99_ms() else {
            return;
        };
        let target = self.target_p99_ms();
        let tail_too_slow = p99 > target;

        // Overlapping steps each apply on top of the other
        let previous = self
            .weights
            .rcu(|current| Arc::new(self.step(**current, tail_too_slow)));
        let next = self.step(*previous, tail_too_slow);

        metrics::record_alpha1_weights(next.beta, next.gamma);
        tracing::debug!(
            p99_ms = p99,
            target_ms = target,
            beta = next.beta,
            gamma = next.gamma,
            "ALPHA1 weights adjusted"
        );
    }
}

impl Strategy for Alpha1 {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Alpha1
    }

    fn select(&self, pool: &ServerPool, _key: Option<&str>) -> Option<Arc<Server>> {
        let healthy = pool.list_healthy();
        let weights = self.weights();
        let now = self.clock.now();

        match healthy.len() {
            0 => None,
            1 => {
                self.touch(&healthy[0], weights, now);
                Some(healthy[0].clone())
            }
            n => {
                let (a, b) = {
                    let mut rng = self.rng.lock();
                    let picked = rand::seq::index::sample(&mut *rng, n, 2);
                    (picked.index(0), picked.index(1))
                };
                let risk_a = self.touch(&healthy[a], weights, now);
                let risk_b = self.touch(&healthy[b], weights, now);
                let chosen = if risk_b < risk_a { b } else { a };

                tracing::trace!(
                    first = %healthy[a].id(),
                    first_risk = risk_a,
                    second = %healthy[b].id(),
                    second_risk = risk_b,
                    "ALPHA1 compared candidates"
                );
                Some(healthy[chosen].clone())
            }
        }
    }

    fn on_dispatch(&self, server: &ServerId, started: Instant) {
        self.servers
            .entry(server.clone())
            .or_default()
            .outstanding
            .push_back(started);
    }

    fn on_complete(&self, server: &ServerId, completion: &Completion) {
        {
            let mut state = self.servers.entry(server.clone()).or_default();
            let position = completion
                .started
                .and_then(|started| state.outstanding.iter().position(|t| *t == started));
            match position {
                Some(index) => {
                    state.outstanding.remove(index);
                }
                None => {
                    state.outstanding.pop_front();
                }
            }

            if completion.success {
                let alpha = self.config.ewma_alpha;
                state.latency_ewma = Some(match state.latency_ewma {
                    Some(prev) => alpha * completion.latency_ms + (1.0 - alpha) * prev,
                    None => completion.latency_ms,
                });
            }
        }

        self.recent.lock().push(completion.latency_ms);

        // Exactly one completer observes each multiple of `adjust_every`
        let completed = self.completions.fetch_add(1, Ordering::AcqRel) + 1;
        if completed % self.config.adjust_every == 0 {
            self.adjust();
        }
    }

    fn hedge_advice(&self, server: &ServerId) -> bool {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        let estimated = self
            .servers
            .get(server)
            .and_then(|s| s.latency_ewma)
            .unwrap_or(0.0);
        let hedge = self.should_hedge(server, estimated);
        if hedge {
            self.hedged.fetch_add(1, Ordering::Relaxed);
            metrics::record_hedge_advised();
        }
        hedge
    }

    fn annotate(&self, snapshot: &mut MetricsSnapshot) {
        let now = self.clock.now();
        for entry in self.servers.iter() {
            if let Some(server) = snapshot.server_mut(entry.key()) {
                let state = entry.value();
                server.work_ewma = Some(state.work_ewma);
                server.interference_signal = Some(state.interference);
                server.head_request_age_ms = Some(state.head_age_ms(now));
            }
        }

        let weights = self.weights();
        snapshot.alpha1 = Some(Alpha1Summary {
            p99_ms: self.p99_ms(),
            target_p99_ms: self.target_p99_ms(),
            beta: weights.beta,
            gamma: weights.gamma,
            hedge_rate: ratio(
                self.hedged.load(Ordering::Relaxed),
                self.dispatched.load(Ordering::Relaxed),
            ),
            completions: self.completions.load(Ordering::Relaxed),
        });
    }
}
