//! Credential pool: a set of API tokens with observed rate-limit budgets.
//!
//! Selection always prefers the credential with the highest remaining budget
//! that satisfies the caller's minimum. A credential that reports exhaustion
//! is unusable until its observed reset time; callers rotate to the next-best
//! credential up to a bounded number of rotations before surfacing
//! `RateLimited`.
//!
//! The whole pool sits behind one async mutex: budget read-modify-write is
//! serialized per credential as required, and the pool is small enough that
//! finer locking buys nothing.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

/// Budget GitHub grants a fresh token before we have observed any headers.
const ASSUMED_FRESH_REMAINING: u32 = 5000;

/// Default bound on credential rotations for a single API call.
pub const DEFAULT_MAX_ROTATIONS: u32 = 3;

/// Errors from credential acquisition.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every credential is exhausted (or below the requested minimum).
    /// Carries the nearest observed reset time so the caller can report when
    /// the pool becomes usable again.
    #[error("all credentials rate-limited{}", match .reset_at {
        Some(t) => format!(", nearest reset at {}", t.to_rfc3339()),
        None => String::new(),
    })]
    RateLimited { reset_at: Option<DateTime<Utc>> },
}

/// Last-observed rate-limit budget for one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub remaining: u32,
    pub reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct TokenState {
    token: String,
    budget: TokenBudget,
    /// Set when the credential reported exhaustion; unusable until then.
    exhausted_until: Option<DateTime<Utc>>,
}

impl TokenState {
    fn usable_remaining(&self, now: DateTime<Utc>) -> u32 {
        match self.exhausted_until {
            Some(until) if until > now => 0,
            _ => self.budget.remaining,
        }
    }
}

/// A checked-out credential. The index ties budget reports back to the
/// pool entry; the token itself is what goes on the wire.
#[derive(Debug, Clone)]
pub struct Lease {
    token: String,
    index: usize,
}

impl Lease {
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Shared pool of API credentials.
pub struct CredentialPool {
    tokens: Mutex<Vec<TokenState>>,
    max_rotations: u32,
}

impl CredentialPool {
    /// Builds a pool from raw token strings. Fresh tokens are assumed to
    /// carry a full budget until the first response headers say otherwise.
    pub fn new(tokens: Vec<String>) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|token| TokenState {
                token,
                budget: TokenBudget {
                    remaining: ASSUMED_FRESH_REMAINING,
                    reset_at: None,
                },
                exhausted_until: None,
            })
            .collect();
        CredentialPool {
            tokens: Mutex::new(tokens),
            max_rotations: DEFAULT_MAX_ROTATIONS,
        }
    }

    pub fn with_max_rotations(mut self, max_rotations: u32) -> Self {
        self.max_rotations = max_rotations;
        self
    }

    /// Upper bound on rotations per API call.
    pub fn max_rotations(&self) -> u32 {
        self.max_rotations
    }

    /// Checks out the credential with the highest remaining budget that has
    /// at least `min_remaining` calls left.
    ///
    /// Never blocks waiting for a reset: when nothing qualifies the caller
    /// gets `RateLimited` with the nearest reset time, and webhook
    /// redelivery is the recovery path.
    pub async fn acquire(&self, min_remaining: u32) -> Result<Lease, PoolError> {
        let tokens = self.tokens.lock().await;
        let now = Utc::now();

        // min over (Reverse(budget), index): highest budget, earliest entry
        // on ties, so selection is deterministic.
        let best = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.usable_remaining(now) >= min_remaining.max(1))
            .min_by_key(|(index, t)| (std::cmp::Reverse(t.usable_remaining(now)), *index));

        match best {
            Some((index, state)) => Ok(Lease {
                token: state.token.clone(),
                index,
            }),
            None => Err(PoolError::RateLimited {
                reset_at: nearest_reset(&tokens),
            }),
        }
    }

    /// Records the budget observed in a response's rate-limit headers.
    pub async fn report(&self, lease: &Lease, remaining: u32, reset_at: Option<DateTime<Utc>>) {
        let mut tokens = self.tokens.lock().await;
        if let Some(state) = tokens.get_mut(lease.index) {
            state.budget = TokenBudget { remaining, reset_at };
            if remaining > 0 {
                state.exhausted_until = None;
            }
        }
    }

    /// Marks a credential unusable until its reset time after the API
    /// reported exhaustion. The caller rotates to the next credential.
    pub async fn mark_exhausted(&self, lease: &Lease, reset_at: Option<DateTime<Utc>>) {
        let mut tokens = self.tokens.lock().await;
        if let Some(state) = tokens.get_mut(lease.index) {
            state.budget.remaining = 0;
            state.budget.reset_at = reset_at;
            // Without an observed reset, park the credential for a minute
            // rather than hammering it.
            state.exhausted_until =
                Some(reset_at.unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(60)));
        }
    }

    /// Snapshot of per-credential budgets, for logs and tests.
    pub async fn budgets(&self) -> Vec<TokenBudget> {
        self.tokens.lock().await.iter().map(|t| t.budget).collect()
    }
}

fn nearest_reset(tokens: &[TokenState]) -> Option<DateTime<Utc>> {
    tokens.iter().filter_map(|t| t.budget.reset_at).min()
}
