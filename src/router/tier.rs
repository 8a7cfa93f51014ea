//! Tier selection, model resolution and daily quota tracking
//!
//! Policy:
//! - the free plan always resolves to the free tier, whatever the complexity or
//!   preferred tier;
//! - pro and enterprise plans get their preferred tier when it is enabled,
//!   under quota and allowed by the plan; otherwise medium/heavy work escalates
//!   to a higher tier with quota left; otherwise the free tier.
//!
//! Quota counters live in memory and reset when the calendar date changes. A
//! process restart zeroes them.

use super::{Complexity, Plan, TaskType, TierId};
use crate::config::{Config, RoutingConfig, TierConfig};
use crate::error::DispatchError;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Source of "today" for quota resets
pub type DateSource = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// How a model id was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    /// Caller supplied the model id
    Explicit,
    /// Task-type table for an elevated plan
    SmartRouting,
    /// Runtime override of the tier default
    Override,
    /// The tier's configured default
    TierDefault,
}

/// Resolved model for a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelChoice {
    pub model: String,
    pub source: ModelSource,
}

/// Per-tier quota usage for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierQuotaSnapshot {
    pub tier: TierId,
    pub enabled: bool,
    pub used: u32,
    pub limit: Option<u32>,
}

#[derive(Debug)]
struct QuotaUsage {
    used: HashMap<TierId, u32>,
    last_reset: NaiveDate,
}

impl QuotaUsage {
    /// Zero the counters once when the date moves on
    fn roll_over(&mut self, today: NaiveDate) {
        if today != self.last_reset {
            tracing::info!(
                previous_date = %self.last_reset,
                today = %today,
                "Resetting daily tier quotas"
            );
            self.used.clear();
            self.last_reset = today;
        }
    }
}

/// Picks a tier and a model for each request and tracks per-tier daily quota
pub struct TierRouter {
    tiers: Vec<TierConfig>,
    routing: RoutingConfig,
    overrides: RwLock<HashMap<TierId, String>>,
    usage: Mutex<QuotaUsage>,
    today: DateSource,
}

impl fmt::Debug for TierRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierRouter")
            .field("tiers", &self.tiers)
            .field("routing", &self.routing)
            .finish_non_exhaustive()
    }
}

impl TierRouter {
    /// Create a router using the local calendar date for quota resets
    pub fn new(config: &Config) -> Self {
        Self::with_date_source(config, Arc::new(|| Local::now().date_naive()))
    }

    /// Create a router with a custom date source
    pub fn with_date_source(config: &Config, today: DateSource) -> Self {
        let mut tiers = config.tiers.clone();
        tiers.sort_by_key(|t| t.id());
        let last_reset = today();

        Self {
            tiers,
            routing: config.routing.clone(),
            overrides: RwLock::new(HashMap::new()),
            usage: Mutex::new(QuotaUsage {
                used: HashMap::new(),
                last_reset,
            }),
            today,
        }
    }

    /// Configured tier by id
    pub fn tier(&self, id: TierId) -> Option<&TierConfig> {
        self.tiers.iter().find(|t| t.id() == id)
    }

    /// Check that a tier can take one more request today
    ///
    /// # Errors
    /// `QuotaExceeded` when the daily cap is reached. A disabled or
    /// unconfigured tier reports a cap of zero.
    pub fn check_quota(&self, id: TierId) -> Result<(), DispatchError> {
        let Some(tier) = self.tier(id).filter(|t| t.enabled()) else {
            return Err(DispatchError::QuotaExceeded {
                tier: id,
                used: 0,
                limit: 0,
            });
        };
        let Some(limit) = tier.max_requests_per_day() else {
            return Ok(());
        };

        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        usage.roll_over((self.today)());
        let used = usage.used.get(&id).copied().unwrap_or(0);
        if used < limit {
            Ok(())
        } else {
            Err(DispatchError::QuotaExceeded {
                tier: id,
                used,
                limit,
            })
        }
    }

    /// Whether a tier is enabled and under its daily quota
    pub fn is_tier_available(&self, id: TierId) -> bool {
        self.check_quota(id).is_ok()
    }

    /// Select the tier for a request
    pub fn select_tier(
        &self,
        complexity: Complexity,
        preferred: Option<TierId>,
        plan: Plan,
    ) -> TierId {
        if plan == Plan::Free {
            return TierId::Free;
        }

        if let Some(tier) = preferred.filter(|t| plan.allows(*t)) {
            match self.check_quota(tier) {
                Ok(()) => return tier,
                Err(e) => tracing::warn!(
                    preferred_tier = %tier,
                    plan = plan.as_str(),
                    error = %e,
                    "Preferred tier unavailable, falling back"
                ),
            }
        }

        if complexity.wants_escalation() {
            let mut candidates: Vec<TierId> = TierId::ALL
                .into_iter()
                .filter(|t| *t > TierId::Free && plan.allows(*t))
                .collect();
            if complexity == Complexity::Heavy {
                candidates.reverse();
            }
            for tier in candidates {
                match self.check_quota(tier) {
                    Ok(()) => return tier,
                    Err(e) => tracing::debug!(
                        tier = %tier,
                        error = %e,
                        "Escalation candidate unavailable"
                    ),
                }
            }
        }

        TierId::Free
    }

    /// Task-type model for an elevated plan
    ///
    /// Returns `None` for the free plan or when smart routing is disabled.
    pub fn select_model_for_paid_user(&self, task: TaskType, plan: Plan) -> Option<String> {
        if !self.routing.smart_routing {
            return None;
        }
        self.routing.table(plan)?.resolve(plan, task)
    }

    /// Select the tier for a request that may name a model
    ///
    /// A named model moves the request onto the lowest tier that serves it,
    /// is allowed by the plan and still has quota, so the request is counted
    /// and billed on that tier. When no such tier exists the policy of
    /// [`select_tier`](Self::select_tier) decides alone.
    pub fn select_tier_for_model(
        &self,
        complexity: Complexity,
        preferred: Option<TierId>,
        plan: Plan,
        explicit: Option<&str>,
    ) -> TierId {
        let selected = self.select_tier(complexity, preferred, plan);
        let Some(model) = explicit else {
            return selected;
        };
        if self.tier_serves(selected, plan, model) {
            return selected;
        }

        let serving = self
            .tiers
            .iter()
            .map(TierConfig::id)
            .filter(|id| self.tier_serves(*id, plan, model))
            .find(|id| self.is_tier_available(*id));
        match serving {
            Some(tier) => {
                tracing::debug!(
                    tier = %tier,
                    model = model,
                    plan = plan.as_str(),
                    "Requested model moved request to serving tier"
                );
                tier
            }
            None => {
                tracing::warn!(
                    model = model,
                    plan = plan.as_str(),
                    tier = %selected,
                    "No available tier serves requested model"
                );
                selected
            }
        }
    }

    /// Resolve the model id for a request on a given tier
    ///
    /// Precedence: explicit caller model (when the tier serves it and the
    /// plan may use the tier) > smart-routing model (elevated plan on a paid
    /// tier) > runtime override > tier default.
    pub fn resolve_model(
        &self,
        tier: TierId,
        plan: Plan,
        task: Option<TaskType>,
        explicit: Option<&str>,
    ) -> ModelChoice {
        if let Some(model) = explicit {
            if self.tier_serves(tier, plan, model) {
                return ModelChoice {
                    model: model.to_string(),
                    source: ModelSource::Explicit,
                };
            }
            tracing::warn!(
                model = model,
                plan = plan.as_str(),
                tier = %tier,
                "Ignoring requested model not served by the selected tier"
            );
        }

        if plan.is_elevated()
            && tier > TierId::Free
            && let Some(task) = task
        {
            // The table follows the tier actually used, never above the plan
            let table_plan = match tier.min(plan.max_tier()) {
                TierId::Enterprise => Plan::Enterprise,
                _ => Plan::Pro,
            };
            if let Some(model) = self.select_model_for_paid_user(task, table_plan) {
                return ModelChoice {
                    model,
                    source: ModelSource::SmartRouting,
                };
            }
        }

        let overridden = self
            .overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tier)
            .cloned();
        if let Some(model) = overridden {
            return ModelChoice {
                model,
                source: ModelSource::Override,
            };
        }

        ModelChoice {
            model: self
                .tier(tier)
                .or_else(|| self.tier(TierId::Free))
                .map(|t| t.default_model().to_string())
                .unwrap_or_default(),
            source: ModelSource::TierDefault,
        }
    }

    fn tier_serves(&self, tier: TierId, plan: Plan, model: &str) -> bool {
        plan.allows(tier)
            && self
                .tier(tier)
                .is_some_and(|t| t.enabled() && t.serves(model))
    }

    /// Replace a tier's default model at runtime
    pub fn set_model_override(&self, tier: TierId, model: impl Into<String>) {
        let model = model.into();
        tracing::info!(tier = %tier, model = %model, "Tier model override set");
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tier, model);
    }

    /// Remove a runtime model override
    pub fn clear_model_override(&self, tier: TierId) {
        self.overrides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tier);
    }

    /// Count one provider attempt against a tier's daily quota
    pub fn track_usage(&self, tier: TierId) {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        usage.roll_over((self.today)());
        let used = usage.used.entry(tier).or_insert(0);
        *used = used.saturating_add(1);
        tracing::debug!(tier = %tier, used = *used, "Tier usage tracked");
    }

    /// Requests counted against a tier today
    pub fn usage(&self, tier: TierId) -> u32 {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        usage.roll_over((self.today)());
        usage.used.get(&tier).copied().unwrap_or(0)
    }

    /// Usage for every configured tier
    pub fn quota_snapshot(&self) -> Vec<TierQuotaSnapshot> {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        usage.roll_over((self.today)());
        self.tiers
            .iter()
            .map(|t| TierQuotaSnapshot {
                tier: t.id(),
                enabled: t.enabled(),
                used: usage.used.get(&t.id()).copied().unwrap_or(0),
                limit: t.max_requests_per_day(),
            })
            .collect()
    }
}
