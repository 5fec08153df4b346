//! Rolling-window token budget with threshold notifications

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::Mutex;
use tracing::warn;

/// Default rolling window: one hour
pub const DEFAULT_WINDOW_MS: i64 = 3_600_000;

/// Notifications emitted by the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetEvent {
    /// Emitted on every `record_usage` call
    Usage {
        prompt: u64,
        completion: u64,
        total: u64,
        used_in_window: u64,
        remaining: u64,
    },
    /// Emitted once per crossing of the 80% or 95% threshold
    Warning { threshold_pct: u8, used: u64, cap: u64 },
    /// Emitted when the remaining budget reaches zero
    Exhausted { used: u64, cap: u64 },
}

/// Synchronous observer; panics are swallowed so telemetry failures never
/// perturb budget state.
pub type BudgetObserver = Box<dyn Fn(&BudgetEvent) + Send + Sync>;

/// Point-in-time budget snapshot for the control surface.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BudgetStatus {
    pub cap: u64,
    pub used_in_window: u64,
    pub remaining: u64,
    pub window_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct UsageRecord {
    at_ms: i64,
    prompt: u64,
    completion: u64,
    total: u64,
}

struct BudgetInner {
    records: VecDeque<UsageRecord>,
    warned_80: bool,
    warned_95: bool,
}

/// Rolling-window usage accounting.
///
/// `can_spend` and `record_usage` are atomic; both prune records older
/// than the window before computing usage.
pub struct TokenBudget {
    window_ms: i64,
    cap: u64,
    inner: Mutex<BudgetInner>,
    observer: Mutex<Option<BudgetObserver>>,
}

impl TokenBudget {
    pub fn new(cap: u64) -> Self {
        Self::with_window(cap, DEFAULT_WINDOW_MS)
    }

    pub fn with_window(cap: u64, window_ms: i64) -> Self {
        Self {
            window_ms,
            cap,
            inner: Mutex::new(BudgetInner {
                records: VecDeque::new(),
                warned_80: false,
                warned_95: false,
            }),
            observer: Mutex::new(None),
        }
    }

    pub fn set_observer(&self, observer: BudgetObserver) {
        *self.observer.lock() = Some(observer);
    }

    pub fn cap(&self) -> u64 {
        self.cap
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn notify(&self, event: BudgetEvent) {
        if let Some(observer) = self.observer.lock().as_ref() {
            if catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                warn!("budget observer panicked; notification dropped");
            }
        }
    }

    /// Drop records outside the window and reset latches when usage falls
    /// beneath the 80% threshold (both latches reset together).
    fn prune(inner: &mut BudgetInner, window_ms: i64, cap: u64, now_ms: i64) {
        let cutoff = now_ms - window_ms;
        while inner
            .records
            .front()
            .map(|r| r.at_ms < cutoff)
            .unwrap_or(false)
        {
            inner.records.pop_front();
        }
        let used: u64 = inner.records.iter().map(|r| r.total).sum();
        if (used as u128) * 100 < (cap as u128) * 80 {
            inner.warned_80 = false;
            inner.warned_95 = false;
        }
    }

    fn used_of(inner: &BudgetInner) -> u64 {
        inner.records.iter().map(|r| r.total).sum()
    }

    /// Whether `estimate` more tokens fit in the window.
    ///
    /// Strict inequality: a zero-remainder budget cannot spend even zero
    /// tokens.
    pub fn can_spend(&self, estimate: u64) -> bool {
        self.can_spend_at(Self::now_ms(), estimate)
    }

    fn can_spend_at(&self, now_ms: i64, estimate: u64) -> bool {
        let mut inner = self.inner.lock();
        Self::prune(&mut inner, self.window_ms, self.cap, now_ms);
        self.cap.saturating_sub(Self::used_of(&inner)) > estimate
    }

    /// Append a usage record and emit notifications.
    pub fn record_usage(&self, prompt: u64, completion: u64, total: u64) {
        self.record_usage_at(Self::now_ms(), prompt, completion, total)
    }

    fn record_usage_at(&self, now_ms: i64, prompt: u64, completion: u64, total: u64) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            // prune first so a window roll-off is observed by the latches
            // before the new record lands
            Self::prune(&mut inner, self.window_ms, self.cap, now_ms);
            inner.records.push_back(UsageRecord {
                at_ms: now_ms,
                prompt,
                completion,
                total,
            });

            let used = Self::used_of(&inner);
            let remaining = self.cap.saturating_sub(used);
            events.push(BudgetEvent::Usage {
                prompt,
                completion,
                total,
                used_in_window: used,
                remaining,
            });
            if !inner.warned_80 && (used as u128) * 100 >= (self.cap as u128) * 80 {
                inner.warned_80 = true;
                events.push(BudgetEvent::Warning {
                    threshold_pct: 80,
                    used,
                    cap: self.cap,
                });
            }
            if !inner.warned_95 && (used as u128) * 100 >= (self.cap as u128) * 95 {
                inner.warned_95 = true;
                events.push(BudgetEvent::Warning {
                    threshold_pct: 95,
                    used,
                    cap: self.cap,
                });
            }
            if remaining == 0 {
                events.push(BudgetEvent::Exhausted {
                    used,
                    cap: self.cap,
                });
            }
        }
        for event in events {
            self.notify(event);
        }
    }

    /// Clear records and latches
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.warned_80 = false;
        inner.warned_95 = false;
    }

    /// Snapshot after pruning
    pub fn status(&self) -> BudgetStatus {
        self.status_at(Self::now_ms())
    }

    fn status_at(&self, now_ms: i64) -> BudgetStatus {
        let mut inner = self.inner.lock();
        Self::prune(&mut inner, self.window_ms, self.cap, now_ms);
        let used = Self::used_of(&inner);
        BudgetStatus {
            cap: self.cap,
            used_in_window: used,
            remaining: self.cap.saturating_sub(used),
            window_ms: self.window_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    fn collecting_observer(budget: &TokenBudget) -> Arc<StdMutex<Vec<BudgetEvent>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        budget.set_observer(Box::new(move |event| {
            sink.lock().unwrap().push(event.clone());
        }));
        seen
    }

    fn warnings(events: &[BudgetEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                BudgetEvent::Warning { threshold_pct, .. } => Some(*threshold_pct),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_strict_inequality_on_zero_remainder() {
        let budget = TokenBudget::new(100);
        budget.record_usage_at(1_000, 0, 0, 100);
        assert!(!budget.can_spend_at(1_000, 0));
    }

    #[test]
    fn test_usage_is_pure_function_of_window() {
        let budget = TokenBudget::with_window(1_000, 1_000);
        budget.record_usage_at(0, 0, 0, 400);
        budget.record_usage_at(500, 0, 0, 300);
        assert_eq!(budget.status_at(500).used_in_window, 700);
        // the first record falls out of the window
        assert_eq!(budget.status_at(1_500).used_in_window, 300);
        assert_eq!(budget.status_at(2_000).used_in_window, 0);
    }

    #[test]
    fn test_warning_latches_fire_once() {
        let budget = TokenBudget::new(100);
        let seen = collecting_observer(&budget);
        budget.record_usage_at(0, 0, 0, 80);
        budget.record_usage_at(1, 0, 0, 5);
        assert_eq!(warnings(&seen.lock().unwrap()), vec![80]);

        budget.record_usage_at(2, 0, 0, 10);
        assert_eq!(warnings(&seen.lock().unwrap()), vec![80, 95]);

        // still latched
        budget.record_usage_at(3, 0, 0, 1);
        assert_eq!(warnings(&seen.lock().unwrap()), vec![80, 95]);
    }

    #[test]
    fn test_latches_reset_when_usage_drops_below_80() {
        let budget = TokenBudget::with_window(100, 1_000);
        let seen = collecting_observer(&budget);
        budget.record_usage_at(0, 0, 0, 95);
        assert_eq!(warnings(&seen.lock().unwrap()), vec![80, 95]);

        // window rolls past the first record, then usage rises again
        budget.record_usage_at(2_000, 0, 0, 95);
        assert_eq!(warnings(&seen.lock().unwrap()), vec![80, 95, 80, 95]);
    }

    #[test]
    fn test_exhausted_emitted_at_zero_remaining() {
        let budget = TokenBudget::new(50);
        let seen = collecting_observer(&budget);
        budget.record_usage_at(0, 10, 20, 50);
        let events = seen.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, BudgetEvent::Exhausted { used: 50, cap: 50 })));
        // usage is still emitted every call
        assert!(events
            .iter()
            .any(|e| matches!(e, BudgetEvent::Usage { total: 50, .. })));
    }

    #[test]
    fn test_observer_panic_is_swallowed() {
        let budget = TokenBudget::new(100);
        budget.set_observer(Box::new(|_| panic!("subscriber bug")));
        budget.record_usage_at(0, 0, 0, 10);
        assert_eq!(budget.status_at(0).used_in_window, 10);
    }

    #[test]
    fn test_reset_clears_everything() {
        let budget = TokenBudget::new(100);
        let seen = collecting_observer(&budget);
        budget.record_usage_at(0, 0, 0, 90);
        budget.reset();
        assert_eq!(budget.status_at(1).used_in_window, 0);
        budget.record_usage_at(2, 0, 0, 85);
        // the 80% warning fires again after reset
        assert_eq!(warnings(&seen.lock().unwrap()), vec![80, 80]);
    }
}
