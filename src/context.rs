use crate::config::CompressorConfig;

/// Token budget for one compression pass, derived from the caller's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub max_context_window: usize,
    pub reserved_overhead: usize,
    /// Usable space for the action history.
    pub limit: usize,
    /// Requested size of the history summary.
    pub historical_target: usize,
    /// Per-field budget for the most recent action.
    pub recent_field_budget: usize,
}

impl ContextBudget {
    /// limit = window - reserved overhead, split between the summary and
    /// the recent action by `historical_fraction`.
    pub fn new(max_context_window: usize, config: &CompressorConfig) -> Self {
        let limit = max_context_window.saturating_sub(config.reserved_overhead);
        let historical_target = ((limit as f64 * config.historical_fraction) as usize).max(1);
        let recent_field_budget = limit
            .saturating_sub(historical_target)
            .max(config.min_field_tokens);

        Self {
            max_context_window,
            reserved_overhead: config.reserved_overhead,
            limit,
            historical_target,
            recent_field_budget,
        }
    }

    pub fn fits(&self, tokens: usize) -> bool {
        tokens <= self.limit
    }

    /// Fraction of the usable limit `tokens` would occupy (1.0 when the
    /// limit is zero).
    pub fn usage_fraction(&self, tokens: usize) -> f64 {
        if self.limit == 0 {
            return 1.0;
        }
        tokens as f64 / self.limit as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_subtracts_reservation() {
        let budget = ContextBudget::new(100_000, &CompressorConfig::default());
        assert_eq!(budget.limit, 80_000);
        assert_eq!(budget.historical_target, 40_000);
        assert_eq!(budget.recent_field_budget, 40_000);
        assert!(budget.fits(80_000));
        assert!(!budget.fits(85_000));
    }

    #[test]
    fn small_window_saturates_to_zero() {
        let budget = ContextBudget::new(10_000, &CompressorConfig::default());
        assert_eq!(budget.limit, 0);
        assert_eq!(budget.historical_target, 1);
        assert_eq!(budget.recent_field_budget, 1_000);
        assert_eq!(budget.usage_fraction(10), 1.0);
    }

    #[test]
    fn fraction_moves_budget_between_parts() {
        let config = CompressorConfig::default().with_historical_fraction(0.25);
        let budget = ContextBudget::new(60_000, &config);
        assert_eq!(budget.limit, 40_000);
        assert_eq!(budget.historical_target, 10_000);
        assert_eq!(budget.recent_field_budget, 30_000);
        assert!((budget.usage_fraction(20_000) - 0.5).abs() < f64::EPSILON);
    }
}
