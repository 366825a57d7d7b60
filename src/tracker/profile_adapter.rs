// src/tracker/profile_adapter.rs — History-based profile override
//
// After the static classification picks a profile, the adapter consults the
// outcome history for the same (task type, complexity) key. A sufficiently
// evidenced suggestion replaces the static pick and rederives the
// validation-control flags. Critical risk can never be downgraded.

use std::sync::Arc;

use crate::core::task_abstraction::profile_config;
use crate::core::types::{RiskLevel, TaskContext, ValidationProfile};
use crate::tracker::OutcomeTracker;

pub struct ProfileAdapter {
    tracker: Arc<OutcomeTracker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterDecision {
    Kept,
    Overridden {
        from: ValidationProfile,
        to: ValidationProfile,
    },
    RejectedDowngrade,
}

impl ProfileAdapter {
    pub fn new(tracker: Arc<OutcomeTracker>) -> Self {
        Self { tracker }
    }

    /// Apply a history-based override to a freshly classified context.
    /// Runs once, at construction time of the TaskContext; afterwards the
    /// context is immutable.
    pub fn apply(&self, ctx: &mut TaskContext) -> AdapterDecision {
        let suggestion = match self
            .tracker
            .suggest_profile(ctx.task_type.as_str(), ctx.complexity.as_str())
        {
            Ok(Some(name)) => name,
            Ok(None) => return AdapterDecision::Kept,
            Err(e) => {
                tracing::debug!("Profile suggestion query failed: {}", e);
                return AdapterDecision::Kept;
            }
        };

        let Some(suggested) = ValidationProfile::parse(&suggestion) else {
            tracing::warn!("Tracker suggested unknown profile '{}'", suggestion);
            return AdapterDecision::Kept;
        };

        if suggested == ctx.validation_profile {
            return AdapterDecision::Kept;
        }

        // Safety clamp: critical risk stays on the critical profile no
        // matter what the history says.
        if ctx.risk_level == RiskLevel::Critical && suggested != ValidationProfile::Critical {
            tracing::info!(
                "Rejecting profile downgrade {} -> {} for critical-risk task",
                ctx.validation_profile,
                suggested
            );
            return AdapterDecision::RejectedDowngrade;
        }

        let from = ctx.validation_profile;
        let cfg = profile_config(suggested);
        ctx.validation_profile = suggested;
        ctx.fail_fast = cfg.fail_fast;
        ctx.parallel_validation = cfg.parallel;
        tracing::info!(
            "Profile override from history: {} -> {} ({}/{})",
            from,
            suggested,
            ctx.task_type,
            ctx.complexity
        );
        AdapterDecision::Overridden { from, to: suggested }
    }
}
