//! Per-category debounce state.
//!
//! Each category owns an independent gate: a running count, the time of the
//! last report and the policy that decides whether the next detection may
//! report. The frame loop owns these values and lends them to the reporter.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::category::{Category, CategoryPolicy};

/// Why a detection did not produce a report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    Cooldown,
    LowConfidence,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CategoryState {
    count: u64,
    last_report_time: DateTime<Utc>,
    cooldown: Duration,
    min_confidence: f32,
}

impl CategoryState {
    /// Fresh gate: zero reports, last report at the Unix epoch.
    pub fn new(policy: CategoryPolicy) -> Self {
        Self {
            count: 0,
            last_report_time: DateTime::<Utc>::UNIX_EPOCH,
            cooldown: policy.cooldown,
            min_confidence: policy.min_confidence,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn last_report_time(&self) -> DateTime<Utc> {
        self.last_report_time
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    /// Decide whether a detection at `now` with `confidence` may report.
    ///
    /// Cooldown is checked first. A `now` earlier than the last report is
    /// treated as still inside the cooldown.
    pub fn gate(&self, confidence: f32, now: DateTime<Utc>) -> Result<(), SuppressReason> {
        let in_cooldown = match now.signed_duration_since(self.last_report_time).to_std() {
            Ok(elapsed) => elapsed < self.cooldown,
            Err(_) => true,
        };
        if in_cooldown {
            return Err(SuppressReason::Cooldown);
        }
        if confidence < self.min_confidence {
            return Err(SuppressReason::LowConfidence);
        }
        Ok(())
    }

    /// Record a report at `now` and return the new count.
    pub(crate) fn commit(&mut self, now: DateTime<Utc>) -> u64 {
        self.count += 1;
        self.last_report_time = now;
        self.count
    }
}

/// The three independent gates, indexed by category.
#[derive(Clone, Debug, PartialEq)]
pub struct CategoryStates {
    states: [CategoryState; 3],
}

impl CategoryStates {
    pub fn new(policy_for: impl Fn(Category) -> CategoryPolicy) -> Self {
        Self {
            states: Category::ALL.map(|category| CategoryState::new(policy_for(category))),
        }
    }

    pub fn get(&self, category: Category) -> &CategoryState {
        &self.states[category.index()]
    }

    pub fn get_mut(&mut self, category: Category) -> &mut CategoryState {
        &mut self.states[category.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &CategoryState)> {
        Category::ALL.into_iter().zip(self.states.iter())
    }
}

impl Default for CategoryStates {
    fn default() -> Self {
        Self::new(CategoryPolicy::default_for)
    }
}
