//! Per-strategy quota accounting and oldest-first eviction.
//!
//! Usage is always re-derived from the [`RedundancyStore`]. The only state the
//! tracker owns is, per strategy, an admission lock and the bytes reserved by
//! replications that were admitted but have not written their record yet.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use vrd_core::{RecordId, RedundancyRecord, RedundancyStrategyConfig, StrategyName};

use crate::error::QuotaError;
use crate::redundancy_store::{RecordRemover, RedundancyStore, RemovalOutcome};

/// Why a candidate was not admitted. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The candidate alone is larger than the whole budget.
    LargerThanBudget { size: u64, limit: u64 },
    /// Even after evicting every record the in-flight reservations leave no room.
    ReservedByInFlight { size: u64, reserved: u64, limit: u64 },
    /// Every evictable record is gone and the candidate still does not fit.
    NothingLeftToEvict { size: u64, used: u64, limit: u64 },
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LargerThanBudget { .. } => "quota.larger_than_budget",
            Self::ReservedByInFlight { .. } => "quota.reserved_by_in_flight",
            Self::NothingLeftToEvict { .. } => "quota.nothing_left_to_evict",
        }
    }
}

/// Outcome of [`QuotaTracker::try_admit`].
#[derive(Debug)]
pub enum AdmitDecision {
    Admitted {
        reservation: QuotaReservation,
        /// Records removed to make room, oldest first.
        evicted: Vec<RedundancyRecord>,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl AdmitDecision {
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Point-in-time budget view of one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStats {
    pub strategy: StrategyName,
    pub used: u64,
    pub reserved: u64,
    pub limit: u64,
}

impl QuotaStats {
    #[must_use]
    pub const fn available(&self) -> u64 {
        self.limit.saturating_sub(self.used.saturating_add(self.reserved))
    }

    /// Whether committed plus reserved bytes reach 90% of the limit.
    #[must_use]
    pub const fn is_near_capacity(&self) -> bool {
        let committed = self.used.saturating_add(self.reserved) as u128;
        committed * 10 >= self.limit as u128 * 9
    }
}

#[derive(Debug, Default)]
struct Ledger {
    admission: tokio::sync::Mutex<()>,
    reserved: AtomicU64,
}

/// Budget held for an admitted candidate until its replication finishes.
///
/// Released on drop, whether the replication succeeded or not.
#[derive(Debug)]
pub struct QuotaReservation {
    ledger: Arc<Ledger>,
    strategy: StrategyName,
    bytes: u64,
}

impl QuotaReservation {
    #[must_use]
    pub const fn strategy(&self) -> &StrategyName {
        &self.strategy
    }

    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        self.ledger.reserved.fetch_sub(self.bytes, Ordering::SeqCst);
    }
}

/// Per-strategy admission control.
///
/// Budgets are partitioned by strategy name: each has its own ledger and
/// admission lock, and no lock spans strategies.
pub struct QuotaTracker {
    store: Arc<dyn RedundancyStore>,
    ledgers: Mutex<HashMap<StrategyName, Arc<Ledger>>>,
}

impl std::fmt::Debug for QuotaTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaTracker")
            .field("strategies", &self.ledgers.lock().len())
            .finish_non_exhaustive()
    }
}

impl QuotaTracker {
    #[must_use]
    pub fn new(store: Arc<dyn RedundancyStore>) -> Self {
        Self {
            store,
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    fn ledger(&self, strategy: &StrategyName) -> Arc<Ledger> {
        Arc::clone(self.ledgers.lock().entry(strategy.clone()).or_default())
    }

    /// Decide whether `size` bytes fit into `strategy`'s budget, evicting the
    /// oldest records it owns when needed.
    ///
    /// Evictions go through `remover` and each one completes before the budget
    /// is re-checked. Nothing is evicted for a candidate that could never fit.
    ///
    /// # Errors
    /// Returns `Eviction` if the remover fails; records evicted before the
    /// failure stay removed.
    pub async fn try_admit(
        &self,
        strategy: &RedundancyStrategyConfig,
        size: u64,
        remover: &dyn RecordRemover,
    ) -> Result<AdmitDecision, QuotaError> {
        let ledger = self.ledger(&strategy.name);
        let _admission = ledger.admission.lock().await;
        let limit = strategy.size_limit_bytes;

        if size > limit {
            return Ok(AdmitDecision::Skipped {
                reason: SkipReason::LargerThanBudget { size, limit },
            });
        }

        let reserved = ledger.reserved.load(Ordering::SeqCst);
        if reserved.saturating_add(size) > limit {
            return Ok(AdmitDecision::Skipped {
                reason: SkipReason::ReservedByInFlight {
                    size,
                    reserved,
                    limit,
                },
            });
        }

        let fits = |used: u64| {
            used.saturating_add(ledger.reserved.load(Ordering::SeqCst))
                .saturating_add(size)
                <= limit
        };

        let mut evicted = Vec::new();
        let mut attempted = HashSet::new();
        loop {
            let used = self.store.strategy_usage(&strategy.name).await;
            if fits(used) {
                break;
            }

            let oldest = self
                .store
                .oldest_for_strategy(&strategy.name)
                .await
                .into_iter()
                .find(|record| !attempted.contains(&record.id));
            let Some(oldest) = oldest else {
                return Ok(AdmitDecision::Skipped {
                    reason: SkipReason::NothingLeftToEvict { size, used, limit },
                });
            };

            attempted.insert(oldest.id);
            if let Some(record) = evict(&strategy.name, oldest.id, remover).await? {
                evicted.push(record);
            }
        }

        ledger.reserved.fetch_add(size, Ordering::SeqCst);
        tracing::debug!(
            strategy = %strategy.name,
            size,
            evicted = evicted.len(),
            "Admitted candidate"
        );

        Ok(AdmitDecision::Admitted {
            reservation: QuotaReservation {
                ledger: Arc::clone(&ledger),
                strategy: strategy.name.clone(),
                bytes: size,
            },
            evicted,
        })
    }

    /// Evict oldest records until `strategy` is back within its limit.
    ///
    /// Used when a limit was lowered since the records were admitted.
    ///
    /// # Errors
    /// Returns `Eviction` if the remover fails.
    pub async fn enforce_limit(
        &self,
        strategy: &RedundancyStrategyConfig,
        remover: &dyn RecordRemover,
    ) -> Result<Vec<RedundancyRecord>, QuotaError> {
        let ledger = self.ledger(&strategy.name);
        let _admission = ledger.admission.lock().await;

        let mut evicted = Vec::new();
        let mut attempted = HashSet::new();
        while self.store.strategy_usage(&strategy.name).await > strategy.size_limit_bytes {
            let oldest = self
                .store
                .oldest_for_strategy(&strategy.name)
                .await
                .into_iter()
                .find(|record| !attempted.contains(&record.id));
            let Some(oldest) = oldest else { break };

            attempted.insert(oldest.id);
            if let Some(record) = evict(&strategy.name, oldest.id, remover).await? {
                evicted.push(record);
            }
        }

        if !evicted.is_empty() {
            tracing::info!(
                strategy = %strategy.name,
                evicted = evicted.len(),
                limit = strategy.size_limit_bytes,
                "Evicted records over a reduced budget"
            );
        }
        Ok(evicted)
    }

    /// Current budget view of `strategy`.
    pub async fn stats(&self, strategy: &RedundancyStrategyConfig) -> QuotaStats {
        let reserved = self
            .ledgers
            .lock()
            .get(&strategy.name)
            .map_or(0, |ledger| ledger.reserved.load(Ordering::SeqCst));
        QuotaStats {
            strategy: strategy.name.clone(),
            used: self.store.strategy_usage(&strategy.name).await,
            reserved,
            limit: strategy.size_limit_bytes,
        }
    }
}

async fn evict(
    strategy: &StrategyName,
    id: RecordId,
    remover: &dyn RecordRemover,
) -> Result<Option<RedundancyRecord>, QuotaError> {
    let outcome = remover
        .remove_record(id)
        .await
        .map_err(|source| QuotaError::Eviction {
            strategy: strategy.clone(),
            source,
        })?;
    match outcome {
        RemovalOutcome::Removed(record) => {
            tracing::info!(
                strategy = %strategy,
                record_id = %record.id,
                size = record.size_bytes,
                "Evicted redundancy"
            );
            Ok(Some(record))
        }
        RemovalOutcome::AlreadyAbsent => Ok(None),
    }
}
