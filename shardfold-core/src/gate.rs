//! Safety gate: is a window closed enough to consolidate?
//!
//! All checks are pure functions of the window and an injected `today`, so
//! tests pin the calendar instead of racing the wall clock.
//!
//! - Monthly: eligible once `today >= first day of next month + wait_days`.
//! - Yearly: eligible once `today.year() > window year`.
//! - Anything malformed is not eligible and logs a warning.

use crate::catalog::Tier;
use crate::window::{Granularity, WindowKey};
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::HashMap;
use tracing::warn;

/// Days to wait after a month ends before consolidating it, so late
/// corrections can land in the daily shards first.
pub const DEFAULT_WAIT_DAYS: u32 = 5;

/// Whether a monthly window may be consolidated on `today`.
pub fn is_safe_to_merge(window: &WindowKey, today: NaiveDate, wait_days: u32) -> bool {
    match monthly_cutoff(window, wait_days) {
        Some(cutoff) => today >= cutoff,
        None => {
            warn!(window = %window, "not a consolidatable month window; treating as not safe");
            false
        }
    }
}

/// Label form of [`is_safe_to_merge`]; an unparseable label is never safe.
pub fn is_safe_to_merge_label(label: &str, today: NaiveDate, wait_days: u32) -> bool {
    match WindowKey::parse(label).parsed() {
        Some(window) => is_safe_to_merge(&window, today, wait_days),
        None => {
            warn!(label, "failed to parse month label; treating as not safe");
            false
        }
    }
}

/// Whether a yearly window lies strictly before `today`'s year.
pub fn is_past_year(window: &WindowKey, today: NaiveDate) -> bool {
    match window {
        WindowKey::Year(year) => *year < today.year(),
        other => {
            warn!(window = %other, "not a year window; treating as not past");
            false
        }
    }
}

/// Label form of [`is_past_year`]; an unparseable label is never past.
pub fn is_past_year_label(label: &str, today: NaiveDate) -> bool {
    match WindowKey::parse(label).parsed() {
        Some(window) => is_past_year(&window, today),
        None => {
            warn!(label, "failed to parse year label; treating as not past");
            false
        }
    }
}

fn monthly_cutoff(window: &WindowKey, wait_days: u32) -> Option<NaiveDate> {
    if window.granularity() != Granularity::Month {
        return None;
    }
    window
        .next_start()?
        .checked_add_signed(Duration::days(i64::from(wait_days)))
}

fn yearly_cutoff(window: &WindowKey) -> Option<NaiveDate> {
    match window {
        WindowKey::Year(_) => window.next_start(),
        _ => None,
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Eligible,
    /// The window closes on `opens_on`.
    NotYetClosed { opens_on: NaiveDate },
    /// The key does not belong to this tier.
    Malformed,
}

impl GateDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, GateDecision::Eligible)
    }
}

/// Per-invocation memo of computed cutoff dates.
///
/// Owned by one batch run and passed by `&mut`; a fresh run starts empty.
#[derive(Debug, Default)]
pub struct CutoffMemo {
    cutoffs: HashMap<WindowKey, Option<NaiveDate>>,
}

impl CutoffMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cutoffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cutoffs.is_empty()
    }

    fn cutoff_with(
        &mut self,
        window: &WindowKey,
        compute: impl FnOnce(&WindowKey) -> Option<NaiveDate>,
    ) -> Option<NaiveDate> {
        *self
            .cutoffs
            .entry(*window)
            .or_insert_with(|| compute(window))
    }
}

/// Tier-aware gate bound to one `today`.
#[derive(Debug, Clone, Copy)]
pub struct SafetyGate {
    tier: Tier,
    today: NaiveDate,
    wait_days: u32,
}

impl SafetyGate {
    pub fn new(tier: Tier, today: NaiveDate) -> Self {
        Self {
            tier,
            today,
            wait_days: DEFAULT_WAIT_DAYS,
        }
    }

    pub fn with_wait_days(mut self, wait_days: u32) -> Self {
        self.wait_days = wait_days;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn evaluate(&self, window: &WindowKey, memo: &mut CutoffMemo) -> GateDecision {
        let wait_days = self.wait_days;
        let cutoff = match self.tier {
            Tier::Monthly => memo.cutoff_with(window, |w| monthly_cutoff(w, wait_days)),
            Tier::Yearly => memo.cutoff_with(window, yearly_cutoff),
        };

        match cutoff {
            None => {
                warn!(window = %window, tier = %self.tier, "window does not match tier; not eligible");
                GateDecision::Malformed
            }
            Some(opens_on) if self.today >= opens_on => GateDecision::Eligible,
            Some(opens_on) => GateDecision::NotYetClosed { opens_on },
        }
    }
}
