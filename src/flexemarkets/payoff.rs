//! Payoff distributions and the mean-variance utility.
//!
//! A market's description carries its terminal payoffs, either as a plain
//! list (`"10,20,30"`, equally likely states) or with explicit state
//! probabilities (`"10:0.25,20:0.5,30:0.25"`).

use anyhow::{bail, Context};

const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Utility = E[X] − λ·Var[X].
pub fn capm_utility(expectation: f64, variance: f64, risk_aversion: f64) -> f64 {
    expectation - risk_aversion * variance
}

#[derive(Debug, Clone, PartialEq)]
pub struct PayoffDistribution {
    outcomes: Vec<(f64, f64)>,
}

impl PayoffDistribution {
    /// Equally likely payoffs.
    pub fn uniform(payoffs: &[f64]) -> anyhow::Result<Self> {
        if payoffs.is_empty() {
            bail!("payoff distribution has no states");
        }
        let p = 1.0 / payoffs.len() as f64;
        Ok(Self {
            outcomes: payoffs.iter().map(|x| (*x, p)).collect(),
        })
    }

    pub fn parse(description: &str) -> anyhow::Result<Self> {
        if description.trim().is_empty() {
            bail!("empty payoff description");
        }
        let tokens: Vec<&str> = description.split(',').map(str::trim).collect();
        if tokens.iter().any(|t| t.is_empty()) {
            bail!("empty state in payoff description '{description}'");
        }

        let weighted = tokens.iter().filter(|t| t.contains(':')).count();
        let dist = if weighted == 0 {
            let payoffs = tokens
                .iter()
                .map(|t| parse_payoff(t))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Self::uniform(&payoffs)?
        } else if weighted != tokens.len() {
            bail!("payoff description mixes weighted and unweighted states: '{description}'");
        } else {
            let mut outcomes = Vec::with_capacity(tokens.len());
            for t in &tokens {
                let (x, p) = t.split_once(':').unwrap_or((*t, ""));
                let x = parse_payoff(x.trim())?;
                let p: f64 = p
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid probability in '{t}'"))?;
                if !(p > 0.0 && p <= 1.0) {
                    bail!("probability {p} out of range (0, 1] in '{t}'");
                }
                outcomes.push((x, p));
            }

            let total: f64 = outcomes.iter().map(|(_, p)| p).sum();
            if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
                bail!("state probabilities sum to {total:.6}, expected 1");
            }
            Self { outcomes }
        };

        if !dist.expectation().is_finite() || !dist.variance().is_finite() {
            bail!("payoff moments overflow for '{description}'");
        }
        Ok(dist)
    }

    pub fn outcomes(&self) -> &[(f64, f64)] {
        &self.outcomes
    }

    pub fn expectation(&self) -> f64 {
        self.outcomes.iter().map(|(x, p)| x * p).sum()
    }

    /// Population variance E[(X − E[X])²].
    pub fn variance(&self) -> f64 {
        let mean = self.expectation();
        self.outcomes
            .iter()
            .map(|(x, p)| p * (x - mean).powi(2))
            .sum()
    }

    pub fn utility(&self, risk_aversion: f64) -> f64 {
        capm_utility(self.expectation(), self.variance(), risk_aversion)
    }
}

fn parse_payoff(token: &str) -> anyhow::Result<f64> {
    let x: f64 = token
        .parse()
        .with_context(|| format!("invalid payoff '{token}'"))?;
    if !x.is_finite() {
        bail!("payoff '{token}' is not a finite number");
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_description() {
        let d = PayoffDistribution::parse("10, 20,30").unwrap();
        assert_eq!(d.outcomes().len(), 3);
        assert!((d.expectation() - 20.0).abs() < 1e-9);
        assert!((d.variance() - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_description() {
        let d = PayoffDistribution::parse("10:0.25,20:0.5,30:0.25").unwrap();
        assert!((d.expectation() - 20.0).abs() < 1e-9);
        // 0.25*100 + 0 + 0.25*100
        assert!((d.variance() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_utility_worked_example() {
        // E = 90, Var = 16
        let d = PayoffDistribution::parse("86,94").unwrap();
        assert!((d.expectation() - 90.0).abs() < 1e-9);
        assert!((d.variance() - 16.0).abs() < 1e-9);
        assert!((d.utility(0.5) - 82.0).abs() < 1e-9);
        assert!((capm_utility(90.0, 16.0, 0.5) - 82.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_distribution_has_no_variance() {
        let d = PayoffDistribution::parse("50").unwrap();
        assert_eq!(d.variance(), 0.0);
        assert_eq!(d.utility(10.0), 50.0);
    }

    #[test]
    fn test_rejects_bad_descriptions() {
        assert!(PayoffDistribution::parse("").is_err());
        assert!(PayoffDistribution::parse(" , ").is_err());
        assert!(PayoffDistribution::parse("10,abc").is_err());
        assert!(PayoffDistribution::parse("10:0.5,20").is_err());
        assert!(PayoffDistribution::parse("10:0.5,20:0.4").is_err());
        assert!(PayoffDistribution::parse("10:0,20:1").is_err());
        assert!(PayoffDistribution::uniform(&[]).is_err());
    }

    #[test]
    fn test_rejects_empty_states_and_non_finite_payoffs() {
        assert!(PayoffDistribution::parse("10,,20").is_err());
        assert!(PayoffDistribution::parse("10,20,").is_err());
        assert!(PayoffDistribution::parse("NaN,10").is_err());
        assert!(PayoffDistribution::parse("inf,10").is_err());
        assert!(PayoffDistribution::parse("10:0.5,-inf:0.5").is_err());
        // finite payoffs whose variance overflows
        assert!(PayoffDistribution::parse("1e308,-1e308").is_err());
    }
}
