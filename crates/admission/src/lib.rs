//! Per-identity admission control.
//!
//! Each identity gets a fixed window of `limit` actions. Windows are created
//! lazily on first use, replaced wholesale once expired, and evicted by a
//! background sweep owned by the controller.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::{Duration, Instant},
};

use {
    courier_common::Identity,
    courier_config::AdmissionConfig,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use courier_metrics::{admission as adm_metrics, counter, gauge, labels};

/// Rate state for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub count: u32,
    pub reset_at: Instant,
}

/// Outcome of an admission check. Denial is a policy outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed,
    Denied { retry_after: Duration },
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Time until the caller's window resets; zero when allowed.
    pub fn retry_after(&self) -> Duration {
        match self {
            Self::Allowed => Duration::ZERO,
            Self::Denied { retry_after } => *retry_after,
        }
    }
}

/// Fixed-window rate limiter keyed by [`Identity`].
pub struct AdmissionController {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<Identity, RateWindow>>,
    cancel: CancellationToken,
}

impl AdmissionController {
    /// Build a controller without a sweep task. Expired windows are still
    /// replaced on access; call [`sweep_at`](Self::sweep_at) to reclaim memory.
    pub fn new(config: &AdmissionConfig) -> Self {
        Self::with_limit(config.limit, config.window())
    }

    pub fn with_limit(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Build a controller and spawn its periodic sweep on the current tokio
    /// runtime. The sweep stops on [`shutdown`](Self::shutdown) or when the
    /// controller is dropped.
    pub fn start(config: &AdmissionConfig) -> Arc<Self> {
        let controller = Arc::new(Self::new(config));
        spawn_sweeper(
            Arc::downgrade(&controller),
            controller.cancel.clone(),
            config.sweep_interval(),
        );
        info!(
            limit = config.limit,
            window_ms = config.window_ms,
            sweep_interval_ms = config.sweep_interval_ms,
            "admission controller started"
        );
        controller
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn allow(&self, identity: &Identity) -> AdmissionDecision {
        self.allow_at(identity, Instant::now())
    }

    pub fn allow_at(&self, identity: &Identity, now: Instant) -> AdmissionDecision {
        let decision = if self.limit == 0 {
            AdmissionDecision::Denied {
                retry_after: self.window,
            }
        } else {
            let fresh = RateWindow {
                count: 1,
                reset_at: now + self.window,
            };
            match self.lock().entry(identity.clone()) {
                Entry::Occupied(mut occupied) => {
                    let state = occupied.get_mut();
                    if now > state.reset_at {
                        *state = fresh;
                        AdmissionDecision::Allowed
                    } else if state.count < self.limit {
                        state.count += 1;
                        AdmissionDecision::Allowed
                    } else {
                        AdmissionDecision::Denied {
                            retry_after: state.reset_at.saturating_duration_since(now),
                        }
                    }
                },
                Entry::Vacant(vacant) => {
                    vacant.insert(fresh);
                    AdmissionDecision::Allowed
                },
            }
        };

        let retry_after_ms = decision.retry_after().as_millis() as u64;
        if decision.is_allowed() {
            debug!(%identity, allowed = true, retry_after_ms, "admission decision");
        } else {
            info!(%identity, allowed = false, retry_after_ms, "admission denied");
        }
        #[cfg(feature = "metrics")]
        counter!(
            adm_metrics::DECISIONS_TOTAL,
            labels::ALLOWED => if decision.is_allowed() { "true" } else { "false" }
        )
        .increment(1);

        decision
    }

    /// Snapshot of one identity's window, if tracked.
    pub fn window_of(&self, identity: &Identity) -> Option<RateWindow> {
        self.lock().get(identity).copied()
    }

    /// Remove windows whose reset time has passed. Returns how many were evicted.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let (evicted, remaining) = {
            let mut windows = self.lock();
            let before = windows.len();
            windows.retain(|_, state| now <= state.reset_at);
            (before - windows.len(), windows.len())
        };
        if evicted > 0 {
            debug!(evicted, remaining, "swept expired admission windows");
        }
        #[cfg(feature = "metrics")]
        {
            counter!(adm_metrics::EVICTIONS_TOTAL).increment(evicted as u64);
            gauge!(adm_metrics::TRACKED_IDENTITIES).set(remaining as f64);
        }
        evicted
    }

    pub fn tracked_identities(&self) -> usize {
        self.lock().len()
    }

    /// Stop the sweep task. Admission checks keep working.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            info!("admission controller sweep stopped");
        }
    }

    pub fn is_sweeping(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Identity, RateWindow>> {
        self.windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for AdmissionController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_sweeper(
    controller: Weak<AdmissionController>,
    cancel: CancellationToken,
    every: Duration,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let Some(controller) = controller.upgrade() else {
                        break;
                    };
                    controller.sweep_at(Instant::now());
                },
            }
        }
        debug!("admission sweep task exited");
    });
}
