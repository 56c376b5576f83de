//! Linear-refill rate limiting
//!
//! A [`RateLimitState`] is a snapshot of `(limit, capacity at last update,
//! last update time)`. The capacity available at any later time is computed
//! lazily: it grows linearly from the snapshot value and refills from empty to
//! `limit` over one rate-limit duration, saturating at `limit`.
//!
//! [`RateLimiter`] holds the (configurable) duration and exposes the pure
//! operations over a state value. Nothing here mutates shared state: every
//! operation takes a snapshot and returns the next one, so the caller (a
//! chain's own execution model) decides where it is stored.
//!
//! Timestamps are unix seconds.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NttError, Result};

/// Rate limit duration of the reference deployment (24 hours)
pub const RATE_LIMIT_DURATION_SECS: u64 = 60 * 60 * 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    /// The maximum capacity of the rate limiter.
    pub limit: u64,
    /// Capacity at `last_update`. The actual capacity is recomputed from the
    /// time passed since then.
    pub capacity_at_last_update: u64,
    /// Timestamp of the last debit (or limit change) that counted towards the
    /// capacity. Queued transfers do not count.
    pub last_update: u64,
}

impl RateLimitState {
    /// A limiter that starts full.
    pub fn new(limit: u64, now: u64) -> Self {
        Self {
            limit,
            capacity_at_last_update: limit,
            last_update: now,
        }
    }

    pub fn with_capacity(limit: u64, capacity: u64, last_update: u64) -> Result<Self> {
        if capacity > limit {
            return Err(NttError::Config(format!(
                "rate limit capacity {} exceeds limit {}",
                capacity, limit
            )));
        }
        Ok(Self {
            limit,
            capacity_at_last_update: capacity,
            last_update,
        })
    }
}

/// What to do when a debit does not fit in the current capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExceeded {
    /// Leave the state untouched and fail with `RateLimitExceeded`
    Reject,
    /// Defer the transfer until enough capacity has refilled
    Queue,
}

/// The result of a debit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The amount fit; the new state has the capacity reduced.
    Consumed(RateLimitState),
    /// The amount did not fit. The state is unchanged: the capacity is only
    /// consumed when the queued transfer is released.
    Queued {
        state: RateLimitState,
        release_at: u64,
    },
}

impl DebitOutcome {
    pub fn state(&self) -> RateLimitState {
        match self {
            DebitOutcome::Consumed(state) => *state,
            DebitOutcome::Queued { state, .. } => *state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    duration_secs: u64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RATE_LIMIT_DURATION_SECS)
    }
}

impl RateLimiter {
    /// A zero duration means capacity refills instantly.
    pub fn new(duration_secs: u64) -> Self {
        Self { duration_secs }
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    /// Capacity available at `now`.
    ///
    /// capacity = min(limit, capacity_at_last_update + elapsed * limit / duration)
    ///
    /// The product is computed in u128; elapsed and limit are both u64 so it
    /// cannot overflow. A snapshot newer than `now` refills nothing.
    pub fn current_capacity(&self, state: &RateLimitState, now: u64) -> u64 {
        if self.duration_secs == 0 {
            return state.limit;
        }
        let limit = state.limit as u128;
        let elapsed = now.saturating_sub(state.last_update) as u128;
        let refilled = elapsed * limit / self.duration_secs as u128;
        let capacity = (state.capacity_at_last_update as u128 + refilled).min(limit);
        capacity as u64
    }

    /// Time at which the deficit of `amount` has refilled, given no other
    /// debits.
    ///
    /// release_at = now + ceil((amount - capacity) * duration / limit)
    ///
    /// An amount above the limit still gets a finite wait: the release
    /// consumes whatever capacity exists then, saturating at zero.
    pub fn queue_release_time(&self, state: &RateLimitState, now: u64, amount: u64) -> Result<u64> {
        let capacity = self.current_capacity(state, now);
        if amount <= capacity {
            return Ok(now);
        }
        if state.limit == 0 {
            // Nothing ever refills.
            return Err(NttError::RateLimitExceeded {
                requested: amount,
                capacity,
            });
        }
        let deficit = (amount - capacity) as u128;
        let limit = state.limit as u128;
        let numerator = deficit
            .checked_mul(self.duration_secs as u128)
            .ok_or(NttError::ArithmeticOverflow("queue release time"))?;
        let wait = numerator.div_ceil(limit);
        let wait = u64::try_from(wait).map_err(|_| NttError::ArithmeticOverflow("queue release time"))?;
        now.checked_add(wait)
            .ok_or(NttError::ArithmeticOverflow("queue release time"))
    }

    /// Consume `amount` from the capacity available at `now`.
    pub fn debit(
        &self,
        state: &RateLimitState,
        now: u64,
        amount: u64,
        on_exceeded: OnExceeded,
    ) -> Result<DebitOutcome> {
        let capacity = self.current_capacity(state, now);
        if amount <= capacity {
            let next = RateLimitState {
                limit: state.limit,
                capacity_at_last_update: capacity - amount,
                last_update: now.max(state.last_update),
            };
            debug!(amount, capacity, remaining = next.capacity_at_last_update, "Rate limit consumed");
            return Ok(DebitOutcome::Consumed(next));
        }

        match on_exceeded {
            OnExceeded::Reject => Err(NttError::RateLimitExceeded {
                requested: amount,
                capacity,
            }),
            OnExceeded::Queue => {
                let release_at = self.queue_release_time(state, now, amount)?;
                debug!(amount, capacity, release_at, "Rate limit exceeded, queueing");
                Ok(DebitOutcome::Queued {
                    state: *state,
                    release_at,
                })
            }
        }
    }

    /// Consume up to `amount`, saturating at zero capacity.
    ///
    /// Used when a queued transfer is released: its wait already covered the
    /// deficit, so whatever capacity exists at execution time is consumed and
    /// the release proceeds.
    pub fn consume_saturating(&self, state: &RateLimitState, now: u64, amount: u64) -> RateLimitState {
        let capacity = self.current_capacity(state, now);
        RateLimitState {
            limit: state.limit,
            capacity_at_last_update: capacity.saturating_sub(amount),
            last_update: now.max(state.last_update),
        }
    }

    /// Give `amount` of capacity back, capped at the limit.
    pub fn credit(&self, state: &RateLimitState, now: u64, amount: u64) -> RateLimitState {
        let capacity = self.current_capacity(state, now);
        RateLimitState {
            limit: state.limit,
            capacity_at_last_update: capacity.saturating_add(amount).min(state.limit),
            last_update: now.max(state.last_update),
        }
    }

    /// Change the limit, shifting the current capacity by the difference
    /// between the old and the new limit.
    pub fn set_limit(&self, state: &RateLimitState, now: u64, new_limit: u64) -> RateLimitState {
        let capacity = self.current_capacity(state, now);
        let new_capacity = if state.limit > new_limit {
            capacity.saturating_sub(state.limit - new_limit)
        } else {
            capacity.saturating_add(new_limit - state.limit)
        };
        RateLimitState {
            limit: new_limit,
            capacity_at_last_update: new_capacity.min(new_limit),
            last_update: now.max(state.last_update),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = RATE_LIMIT_DURATION_SECS;
    const T0: u64 = 1_700_000_000;

    #[test]
    fn test_capacity_bounded_by_limit() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::with_capacity(1000, 300, T0).unwrap();
        for dt in [0, 1, DAY / 3, DAY, 10 * DAY, u64::MAX - T0] {
            let capacity = limiter.current_capacity(&state, T0 + dt);
            assert!(capacity <= state.limit);
        }
    }

    #[test]
    fn test_replenishment_linearity() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::with_capacity(1000, 300, T0).unwrap();
        assert_eq!(limiter.current_capacity(&state, T0 + DAY / 2), 800);
        assert_eq!(limiter.current_capacity(&state, T0 + DAY), 1000);
    }

    #[test]
    fn test_stale_snapshot_does_not_refill() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::with_capacity(1000, 300, T0).unwrap();
        assert_eq!(limiter.current_capacity(&state, T0 - 100), 300);
    }

    #[test]
    fn test_capacity_no_overflow_near_u64_max() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::with_capacity(u64::MAX, 0, 0).unwrap();
        assert_eq!(limiter.current_capacity(&state, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_debit_consumes() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::new(100_000, T0);

        let outcome = limiter.debit(&state, T0, 30_000, OnExceeded::Reject).unwrap();
        let next = match outcome {
            DebitOutcome::Consumed(next) => next,
            other => panic!("expected Consumed, got {:?}", other),
        };
        assert_eq!(limiter.current_capacity(&next, T0), 70_000);
        assert_eq!(next.limit, 100_000);
        assert_eq!(next.last_update, T0);

        // replenish a quarter of the limit
        assert_eq!(limiter.current_capacity(&next, T0 + DAY / 4), 95_000);
    }

    #[test]
    fn test_debit_reject_leaves_state_unchanged() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::new(1000, T0);

        let err = limiter.debit(&state, T0, 1500, OnExceeded::Reject).unwrap_err();
        match err {
            NttError::RateLimitExceeded { requested, capacity } => {
                assert_eq!(requested, 1500);
                assert_eq!(capacity, 1000);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(state, RateLimitState::new(1000, T0));
    }

    #[test]
    fn test_debit_queue_release_time() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::with_capacity(1000, 200, T0).unwrap();

        let outcome = limiter.debit(&state, T0, 700, OnExceeded::Queue).unwrap();
        // deficit 500 => ceil(500 * DAY / 1000) = DAY / 2
        assert_eq!(
            outcome,
            DebitOutcome::Queued {
                state,
                release_at: T0 + DAY / 2,
            }
        );
    }

    #[test]
    fn test_queue_release_time_rounds_up() {
        let limiter = RateLimiter::new(10);
        let state = RateLimitState::with_capacity(3, 0, T0).unwrap();
        // 1 * 10 / 3 = 3.33 -> 4
        assert_eq!(limiter.queue_release_time(&state, T0, 1).unwrap(), T0 + 4);
    }

    #[test]
    fn test_debit_queue_above_limit() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::new(1000, T0);
        let outcome = limiter.debit(&state, T0, 1500, OnExceeded::Queue).unwrap();
        // ceil(500 * DAY / 1000)
        assert_eq!(
            outcome,
            DebitOutcome::Queued {
                state,
                release_at: T0 + 43_200,
            }
        );
    }

    #[test]
    fn test_queue_with_zero_limit_is_rejected() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::new(0, T0);
        assert!(limiter.debit(&state, T0, 1, OnExceeded::Queue).is_err());
        // zero-amount debits always fit
        assert!(limiter.debit(&state, T0, 0, OnExceeded::Reject).is_ok());
    }

    #[test]
    fn test_queued_amount_fits_at_release_time() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::with_capacity(1000, 100, T0).unwrap();
        let release_at = limiter.queue_release_time(&state, T0, 650).unwrap();
        assert!(limiter.current_capacity(&state, release_at) >= 650);
        assert!(limiter.current_capacity(&state, release_at - 1) < 650);
    }

    #[test]
    fn test_credit_caps_at_limit() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::with_capacity(100_000, 95_000, T0).unwrap();

        let state = limiter.credit(&state, T0, 2_000);
        assert_eq!(limiter.current_capacity(&state, T0), 97_000);

        let state = limiter.credit(&state, T0, 50_000);
        assert_eq!(limiter.current_capacity(&state, T0), 100_000);
    }

    #[test]
    fn test_credit_does_not_move_timestamp_backwards() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::with_capacity(1000, 0, T0).unwrap();
        let credited = limiter.credit(&state, T0 - 50, 10);
        assert_eq!(credited.last_update, T0);
        assert_eq!(credited.capacity_at_last_update, 10);
    }

    #[test]
    fn test_set_limit_shifts_capacity() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::with_capacity(100_000, 95_000, T0).unwrap();

        let lowered = limiter.set_limit(&state, T0, 50_000);
        assert_eq!(limiter.current_capacity(&lowered, T0), 45_000);

        let raised = limiter.set_limit(&lowered, T0, 100_000);
        assert_eq!(limiter.current_capacity(&raised, T0), 95_000);
    }

    #[test]
    fn test_consume_saturating() {
        let limiter = RateLimiter::default();
        let state = RateLimitState::with_capacity(1000, 100, T0).unwrap();
        let next = limiter.consume_saturating(&state, T0, 400);
        assert_eq!(next.capacity_at_last_update, 0);
    }

    #[test]
    fn test_zero_duration_is_always_full() {
        let limiter = RateLimiter::new(0);
        let state = RateLimitState::with_capacity(1000, 0, T0).unwrap();
        assert_eq!(limiter.current_capacity(&state, T0), 1000);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_capacity_never_exceeds_limit(
                limit in any::<u64>(),
                fill in 0.0f64..=1.0,
                last_update in 0u64..=u64::MAX / 2,
                elapsed in any::<u64>(),
                duration in 0u64..=10 * DAY,
            ) {
                let capacity = (limit as f64 * fill) as u64;
                let state = RateLimitState::with_capacity(limit, capacity.min(limit), last_update).unwrap();
                let limiter = RateLimiter::new(duration);
                let now = last_update.saturating_add(elapsed);
                prop_assert!(limiter.current_capacity(&state, now) <= limit);
            }

            #[test]
            fn test_debit_keeps_capacity_in_range(
                limit in 1u64..=u64::MAX,
                amount in any::<u64>(),
                elapsed in 0u64..=2 * DAY,
            ) {
                let limiter = RateLimiter::default();
                let state = RateLimitState::with_capacity(limit, 0, T0).unwrap();
                let now = T0 + elapsed;
                let before = limiter.current_capacity(&state, now);
                match limiter.debit(&state, now, amount, OnExceeded::Reject) {
                    Ok(DebitOutcome::Consumed(next)) => {
                        prop_assert_eq!(next.capacity_at_last_update, before - amount);
                    }
                    Ok(DebitOutcome::Queued { .. }) => prop_assert!(false, "reject mode never queues"),
                    Err(NttError::RateLimitExceeded { capacity, .. }) => {
                        prop_assert!(amount > before);
                        prop_assert_eq!(capacity, before);
                    }
                    Err(e) => prop_assert!(false, "unexpected error: {}", e),
                }
            }
        }
    }
}
