//! TTL-bounded record of jobs already handed to a provider.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::JobKey;

#[derive(Default)]
struct Claims {
    by_key: HashMap<JobKey, Instant>,
    /// Claims in the order they were made. Entries whose key was released
    /// or re-claimed since are stale and skipped when popped.
    order: VecDeque<(Instant, JobKey)>,
}

impl Claims {
    fn is_live(&self, at: Instant, key: &JobKey) -> bool {
        self.by_key.get(key) == Some(&at)
    }

    fn expire(&mut self, now: Instant, ttl: Duration) {
        while let Some((at, _)) = self.order.front() {
            if now.saturating_duration_since(*at) < ttl {
                break;
            }
            if let Some((at, key)) = self.order.pop_front()
                && self.is_live(at, &key)
            {
                self.by_key.remove(&key);
            }
        }
    }

    fn evict_oldest(&mut self) {
        while let Some((at, key)) = self.order.pop_front() {
            if self.is_live(at, &key) {
                self.by_key.remove(&key);
                return;
            }
        }
    }

    fn compact(&mut self) {
        let Self { by_key, order } = self;
        order.retain(|(at, key)| by_key.get(key) == Some(at));
    }
}

/// Remembers `(messageId, recipientId)` pairs so re-dispatching a message
/// never creates a second job for the same recipient.
///
/// A claim lives until its TTL runs out, it is evicted as the oldest entry
/// of a full ledger, or it is [released](Self::release) after a failed send.
pub struct JobLedger {
    claims: Mutex<Claims>,
    ttl: Duration,
    max_entries: usize,
}

impl JobLedger {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            claims: Mutex::new(Claims::default()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Record `key`. Returns `false` if it was already recorded within the TTL.
    pub fn claim(&self, key: &JobKey) -> bool {
        self.claim_at(key, Instant::now())
    }

    /// `now` must not go backwards between calls.
    pub fn claim_at(&self, key: &JobKey, now: Instant) -> bool {
        let mut claims = self.lock();
        claims.expire(now, self.ttl);
        if claims.by_key.contains_key(key) {
            return false;
        }
        if claims.by_key.len() >= self.max_entries {
            claims.evict_oldest();
        }
        claims.by_key.insert(key.clone(), now);
        claims.order.push_back((now, key.clone()));
        if claims.order.len() > self.max_entries * 2 {
            claims.compact();
        }
        true
    }

    /// Forget `key` so a later dispatch creates a fresh job for it.
    pub fn release(&self, key: &JobKey) {
        self.lock().by_key.remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Claims> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, courier_common::Identity};

    fn key(message: &str, recipient: &str) -> JobKey {
        JobKey {
            message_id: message.into(),
            recipient_id: Identity::new(recipient),
        }
    }

    #[test]
    fn second_claim_is_rejected() {
        let ledger = JobLedger::new(Duration::from_secs(60), 10);
        assert!(ledger.claim(&key("m1", "c")));
        assert!(!ledger.claim(&key("m1", "c")));
        assert!(ledger.claim(&key("m1", "d")));
        assert!(ledger.claim(&key("m2", "c")));
    }

    #[test]
    fn claims_expire_after_ttl() {
        let ledger = JobLedger::new(Duration::from_secs(60), 10);
        let t0 = Instant::now();
        assert!(ledger.claim_at(&key("m1", "c"), t0));
        assert!(!ledger.claim_at(&key("m1", "c"), t0 + Duration::from_secs(59)));
        assert!(ledger.claim_at(&key("m1", "c"), t0 + Duration::from_secs(61)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn oldest_claim_is_evicted_when_full() {
        let ledger = JobLedger::new(Duration::from_secs(60), 2);
        let t0 = Instant::now();
        ledger.claim_at(&key("m1", "c"), t0);
        ledger.claim_at(&key("m2", "c"), t0 + Duration::from_millis(1));
        ledger.claim_at(&key("m3", "c"), t0 + Duration::from_millis(2));
        assert_eq!(ledger.len(), 2);
        assert!(ledger.claim_at(&key("m1", "c"), t0 + Duration::from_millis(3)));
    }

    #[test]
    fn released_claim_can_be_made_again() {
        let ledger = JobLedger::new(Duration::from_secs(60), 10);
        assert!(ledger.claim(&key("m1", "c")));
        ledger.release(&key("m1", "c"));
        assert!(ledger.is_empty());
        assert!(ledger.claim(&key("m1", "c")));
        assert!(!ledger.claim(&key("m1", "c")));
    }

    #[test]
    fn eviction_skips_released_claims() {
        let ledger = JobLedger::new(Duration::from_secs(60), 2);
        let t0 = Instant::now();
        let at = |ms| t0 + Duration::from_millis(ms);

        ledger.claim_at(&key("a", "c"), at(0));
        ledger.release(&key("a", "c"));
        ledger.claim_at(&key("b", "c"), at(1));
        ledger.claim_at(&key("a", "c"), at(2));
        // Full: the stale first claim of `a` is skipped and `b` goes.
        ledger.claim_at(&key("d", "c"), at(3));

        assert_eq!(ledger.len(), 2);
        assert!(!ledger.claim_at(&key("a", "c"), at(4)));
        assert!(!ledger.claim_at(&key("d", "c"), at(4)));
        assert!(ledger.claim_at(&key("b", "c"), at(4)));
    }

    #[test]
    fn churn_keeps_order_queue_bounded() {
        let ledger = JobLedger::new(Duration::from_secs(60), 4);
        let t0 = Instant::now();
        for i in 0..100u64 {
            let k = key("m", &format!("r{}", i % 3));
            ledger.claim_at(&k, t0 + Duration::from_millis(i));
            ledger.release(&k);
        }
        assert!(ledger.is_empty());
        assert!(ledger.lock().order.len() <= 8);
    }
}
