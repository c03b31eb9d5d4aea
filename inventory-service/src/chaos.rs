//! Deterministic fault injection around the reservation engine.
//!
//! Both hooks are keyed off the order id so a test can pick which orders are
//! affected: the pre-decision delay fires when the id's trailing digit is a
//! multiple of `modulo`, the post-commit crash fires when the sum of all
//! decimal digits in the id is a multiple of `post_commit_fail_modulo`.
//! Ids without digits never trigger. Both hooks are off by default.

use std::time::Duration;
use tracing::warn;

use crate::error::{InventoryError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaosConfig {
    pub enabled: bool,
    pub delay: Duration,
    pub modulo: u32,
    pub post_commit_fail_enabled: bool,
    pub post_commit_fail_modulo: u32,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay: Duration::from_millis(5000),
            modulo: 5,
            post_commit_fail_enabled: false,
            post_commit_fail_modulo: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChaosInjector {
    config: ChaosConfig,
}

impl ChaosInjector {
    pub fn new(config: ChaosConfig) -> Self {
        Self { config }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn should_delay(&self, order_id: &str) -> bool {
        self.config.enabled
            && trailing_digit(order_id).is_some_and(|d| divides(self.config.modulo, d))
    }

    pub fn should_fail_after_commit(&self, order_id: &str) -> bool {
        self.config.post_commit_fail_enabled
            && digit_sum(order_id).is_some_and(|s| divides(self.config.post_commit_fail_modulo, s))
    }

    /// Sleeps before the decision starts for matching orders.
    pub async fn before_decision(&self, order_id: &str) {
        if self.should_delay(order_id) {
            warn!(order_id, delay_ms = self.config.delay.as_millis() as u64, "chaos: delaying reservation");
            tokio::time::sleep(self.config.delay).await;
        }
    }

    /// Fails a call whose transaction has already committed, as a crash
    /// between commit and response would.
    pub fn after_commit(&self, order_id: &str) -> Result<()> {
        if self.should_fail_after_commit(order_id) {
            warn!(order_id, "chaos: crashing after commit");
            return Err(InventoryError::InjectedFault(format!(
                "post-commit crash for order {order_id}"
            )));
        }
        Ok(())
    }
}

fn divides(modulo: u32, value: u32) -> bool {
    modulo != 0 && value % modulo == 0
}

fn trailing_digit(order_id: &str) -> Option<u32> {
    order_id.chars().last()?.to_digit(10)
}

fn digit_sum(order_id: &str) -> Option<u32> {
    let mut digits = order_id.chars().filter_map(|c| c.to_digit(10)).peekable();
    digits.peek()?;
    Some(digits.sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn injector(modulo: u32, fail_modulo: u32) -> ChaosInjector {
        ChaosInjector::new(ChaosConfig {
            enabled: true,
            delay: Duration::from_millis(20),
            modulo,
            post_commit_fail_enabled: true,
            post_commit_fail_modulo: fail_modulo,
        })
    }

    #[test]
    fn delay_keys_off_trailing_digit() {
        let chaos = injector(5, 3);
        assert!(chaos.should_delay("order-15"));
        assert!(chaos.should_delay("order-10"));
        assert!(!chaos.should_delay("order-13"));
        assert!(!chaos.should_delay("order-1a"));
    }

    #[test]
    fn crash_keys_off_digit_sum() {
        let chaos = injector(5, 3);
        assert!(chaos.should_fail_after_commit("o-12"));
        assert!(chaos.should_fail_after_commit("o-9x"));
        assert!(!chaos.should_fail_after_commit("o-11"));
        assert!(!chaos.should_fail_after_commit("no-digits"));
    }

    #[test]
    fn hooks_are_inert_when_disabled_or_modulo_is_zero() {
        let chaos = ChaosInjector::disabled();
        assert!(!chaos.should_delay("o-5"));
        assert!(!chaos.should_fail_after_commit("o-3"));
        assert!(chaos.after_commit("o-3").is_ok());

        let chaos = injector(0, 0);
        assert!(!chaos.should_delay("o-0"));
        assert!(!chaos.should_fail_after_commit("o-0"));
    }

    #[test]
    fn after_commit_reports_an_injected_fault() {
        let err = injector(5, 3).after_commit("o-3").unwrap_err();
        assert!(matches!(err, InventoryError::InjectedFault(_)));
    }

    #[tokio::test]
    async fn matching_orders_are_delayed() {
        let chaos = injector(5, 3);
        let started = std::time::Instant::now();
        chaos.before_decision("o-5").await;
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
