// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded restart budget with a cool-down reset.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_attempts: u32,
    /// Quiet period after the last attempt that restores the full budget.
    pub reset_window: Duration,
}

/// Restart accounting for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestartState {
    pub restart_count: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
}

impl RestartState {
    /// True once `reset_window` has passed since the last attempt.
    pub fn window_elapsed(&self, policy: &RestartPolicy, now: DateTime<Utc>) -> bool {
        self.last_restart_at.is_some_and(|last| {
            (now - last)
                .to_std()
                .is_ok_and(|since| since >= policy.reset_window)
        })
    }

    /// Consume one restart attempt if the budget allows, recording it at `now`.
    ///
    /// The count is zeroed first when the reset window has elapsed.
    pub fn try_acquire(&mut self, policy: &RestartPolicy, now: DateTime<Utc>) -> bool {
        if self.window_elapsed(policy, now) {
            self.restart_count = 0;
        }
        if self.restart_count >= policy.max_attempts {
            return false;
        }
        self.restart_count += 1;
        self.last_restart_at = Some(now);
        true
    }

    pub fn is_exhausted(&self, policy: &RestartPolicy) -> bool {
        self.restart_count >= policy.max_attempts
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    const POLICY: RestartPolicy = RestartPolicy {
        max_attempts: 3,
        reset_window: Duration::from_secs(3600),
    };

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn budget_exhausts_then_recovers_after_window() {
        let mut state = RestartState::default();
        for i in 0..3 {
            assert!(state.try_acquire(&POLICY, t0() + TimeDelta::minutes(i)));
        }
        assert!(state.is_exhausted(&POLICY));
        assert!(!state.try_acquire(&POLICY, t0() + TimeDelta::minutes(30)));

        // The refused attempt did not move the window.
        let last = t0() + TimeDelta::minutes(2);
        assert_eq!(state.last_restart_at, Some(last));
        assert!(!state.try_acquire(&POLICY, last + TimeDelta::minutes(59)));
        assert!(state.try_acquire(&POLICY, last + TimeDelta::minutes(60)));
        assert_eq!(state.restart_count, 1);
    }

    #[test]
    fn quiet_period_restores_budget_before_exhaustion() {
        let mut state = RestartState::default();
        assert!(state.try_acquire(&POLICY, t0()));
        assert!(state.try_acquire(&POLICY, t0() + TimeDelta::hours(2)));
        assert_eq!(state.restart_count, 1);
    }
}
