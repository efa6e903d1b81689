//! Token accounting and cost computation

use mate_ai::Usage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// USD per million tokens, flat or progressively tiered
#[derive(Debug, Clone, PartialEq)]
pub enum Rate {
    Flat(f64),
    /// `thresholds` are cumulative token counts where the next tier starts;
    /// a well-formed rate has exactly one fewer threshold than rates.
    Tiered { rates: Vec<f64>, thresholds: Vec<u64> },
}

/// Price `tokens` under `rate`
pub fn compute_cost(tokens: u64, rate: &Rate) -> f64 {
    match rate {
        Rate::Flat(per_million) => tokens as f64 / 1e6 * per_million,
        Rate::Tiered { rates, thresholds } => {
            let Some(&first) = rates.first() else {
                return 0.0;
            };
            if thresholds.len() + 1 != rates.len() {
                return tokens as f64 / 1e6 * first;
            }

            let mut cost = 0.0;
            let mut remaining = tokens;
            let mut floor = 0u64;
            for (tier, rate) in rates.iter().enumerate() {
                if remaining == 0 {
                    break;
                }
                let width = match thresholds.get(tier) {
                    Some(&ceiling) => ceiling.saturating_sub(floor),
                    None => remaining,
                };
                let billed = remaining.min(width);
                cost += billed as f64 / 1e6 * rate;
                remaining -= billed;
                if let Some(&ceiling) = thresholds.get(tier) {
                    floor = ceiling;
                }
            }
            cost
        }
    }
}

/// Per-model pricing as it appears in configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    #[serde(default)]
    pub in_rates: Vec<f64>,
    #[serde(default)]
    pub in_thresholds: Vec<u64>,
    #[serde(default)]
    pub out_rates: Vec<f64>,
    #[serde(default)]
    pub out_thresholds: Vec<u64>,
}

impl ModelRates {
    pub fn flat(input: f64, output: f64) -> Self {
        Self {
            in_rates: vec![input],
            out_rates: vec![output],
            ..Default::default()
        }
    }

    pub fn input(&self) -> Rate {
        to_rate(&self.in_rates, &self.in_thresholds)
    }

    pub fn output(&self) -> Rate {
        to_rate(&self.out_rates, &self.out_thresholds)
    }

    /// Cost of a usage record under these rates
    pub fn cost(&self, usage: Usage) -> f64 {
        compute_cost(usage.input, &self.input()) + compute_cost(usage.output, &self.output())
    }
}

fn to_rate(rates: &[f64], thresholds: &[u64]) -> Rate {
    match (rates, thresholds) {
        ([single], []) => Rate::Flat(*single),
        _ => Rate::Tiered {
            rates: rates.to_vec(),
            thresholds: thresholds.to_vec(),
        },
    }
}

/// Pricing table keyed by model id
pub type PricingTable = HashMap<String, ModelRates>;

/// Prompt-scoped and conversation-scoped token counters for one agent
#[derive(Debug, Clone, Default)]
pub struct TokenAccountant {
    rates: Option<ModelRates>,
    prompt: Usage,
    total: Usage,
    prompt_cost: f64,
    total_cost: f64,
}

impl TokenAccountant {
    /// Accountant pricing with `rates`; without rates every cost is zero
    pub fn new(rates: Option<ModelRates>) -> Self {
        Self {
            rates,
            ..Default::default()
        }
    }

    /// Record one backend response. Each increment is priced on its own,
    /// so tier thresholds apply per request rather than to the running sum.
    pub fn add_usage(&mut self, usage: Usage) {
        self.prompt.add(usage);
        self.total.add(usage);
        let cost = self.rates.as_ref().map_or(0.0, |r| r.cost(usage));
        self.prompt_cost += cost;
        self.total_cost += cost;
    }

    /// Start a new user turn
    pub fn prompt_reset(&mut self) {
        self.prompt = Usage::default();
        self.prompt_cost = 0.0;
    }

    /// Forget everything, as on conversation reset
    pub fn reset(&mut self) {
        self.prompt = Usage::default();
        self.total = Usage::default();
        self.prompt_cost = 0.0;
        self.total_cost = 0.0;
    }

    pub fn prompt_usage(&self) -> Usage {
        self.prompt
    }

    pub fn total_usage(&self) -> Usage {
        self.total
    }

    pub fn prompt_cost(&self) -> f64 {
        self.prompt_cost
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_flat_rate() {
        assert!(approx(compute_cost(2_000_000, &Rate::Flat(0.3)), 0.6));
    }

    #[test]
    fn test_tiered_progressive_billing() {
        let rate = Rate::Tiered {
            rates: vec![1.0, 2.0],
            thresholds: vec![1000],
        };
        let expected = 1000.0 / 1e6 * 1.0 + 500.0 / 1e6 * 2.0;
        assert!(approx(compute_cost(1500, &rate), expected));
        // Within the first tier only.
        assert!(approx(compute_cost(800, &rate), 800.0 / 1e6));
    }

    #[test]
    fn test_three_tiers() {
        let rate = Rate::Tiered {
            rates: vec![1.0, 2.0, 4.0],
            thresholds: vec![100, 300],
        };
        let expected = (100.0 * 1.0 + 200.0 * 2.0 + 50.0 * 4.0) / 1e6;
        assert!(approx(compute_cost(350, &rate), expected));
    }

    #[test]
    fn test_malformed_tiers_fall_back_to_first_rate() {
        let rate = Rate::Tiered {
            rates: vec![1.25, 2.5],
            thresholds: vec![],
        };
        assert!(approx(compute_cost(4000, &rate), 4000.0 / 1e6 * 1.25));
    }

    #[test]
    fn test_empty_rates_cost_nothing() {
        let rate = Rate::Tiered {
            rates: vec![],
            thresholds: vec![],
        };
        assert_eq!(compute_cost(1_000_000, &rate), 0.0);
    }

    #[test]
    fn test_config_shape() {
        let rates: ModelRates = parse_rates(
            r#"{"in_rates":[1.25,2.5],"in_thresholds":[200000],"out_rates":[10.0],"out_thresholds":[]}"#,
        );
        assert_eq!(
            rates.input(),
            Rate::Tiered {
                rates: vec![1.25, 2.5],
                thresholds: vec![200000]
            }
        );
        assert_eq!(rates.output(), Rate::Flat(10.0));
    }

    fn parse_rates(json: &str) -> ModelRates {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_accountant_scopes() {
        let mut acc = TokenAccountant::new(Some(ModelRates::flat(1.0, 2.0)));
        acc.add_usage(Usage::new(1000, 100));
        acc.prompt_reset();
        acc.add_usage(Usage::new(500, 50));

        assert_eq!(acc.prompt_usage(), Usage::new(500, 50));
        assert_eq!(acc.total_usage(), Usage::new(1500, 150));
        assert!(approx(acc.prompt_cost(), 500.0 / 1e6 + 100.0 / 1e6));
        assert!(approx(acc.total_cost(), 1500.0 / 1e6 + 300.0 / 1e6));

        acc.reset();
        assert_eq!(acc.total_usage(), Usage::default());
        assert_eq!(acc.total_cost(), 0.0);
    }

    #[test]
    fn test_tiers_apply_per_increment() {
        let rates = ModelRates {
            in_rates: vec![1.25, 2.5],
            in_thresholds: vec![200_000],
            out_rates: vec![10.0],
            out_thresholds: vec![],
        };
        let mut acc = TokenAccountant::new(Some(rates));
        for _ in 0..3 {
            acc.add_usage(Usage::new(150_000, 0));
        }

        // Each request stays in the first tier even though the sum crosses it.
        let expected = 3.0 * 150_000.0 / 1e6 * 1.25;
        assert_eq!(acc.prompt_usage(), Usage::new(450_000, 0));
        assert!(approx(acc.prompt_cost(), expected));
        assert!(approx(acc.total_cost(), expected));

        acc.add_usage(Usage::new(250_000, 0));
        let crossing = 200_000.0 / 1e6 * 1.25 + 50_000.0 / 1e6 * 2.5;
        assert!(approx(acc.total_cost(), expected + crossing));

        acc.prompt_reset();
        assert_eq!(acc.prompt_cost(), 0.0);
        assert!(approx(acc.total_cost(), expected + crossing));
    }

    #[test]
    fn test_unpriced_model_costs_zero() {
        let mut acc = TokenAccountant::new(None);
        acc.add_usage(Usage::new(10_000, 10_000));
        assert_eq!(acc.prompt_cost(), 0.0);
        assert_eq!(acc.total_cost(), 0.0);
    }
}
