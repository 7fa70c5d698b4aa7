//! Temperature-controlled weighted draw.
//!
//! Weights are normalised, raised to `1 / temperature` and drawn by roulette
//! wheel. A temperature of 1 draws proportionally to the weights; higher
//! temperatures flatten the distribution towards uniform (exploration) and
//! lower ones sharpen it towards the strongest candidate (exploitation).

use log::{debug, trace};
use rand::{thread_rng, Rng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Temperatures are clamped to at least this before inverting.
pub const MIN_TEMPERATURE: f64 = 0.05;

/// The picked candidate and the share of the wheel it occupied.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice<T> {
    pub item: T,
    /// Probability of this pick after tempering, in `[0, 1]`
    pub share: f64,
}

/// Draw one candidate using the thread-local RNG.
pub fn choose<T: Clone>(candidates: &[(Decimal, T)], temperature: f64) -> Option<Choice<T>> {
    choose_with_rng(candidates, temperature, &mut thread_rng())
}

/// Draw one candidate at twice the temperature. Used when the catalog stops
/// answering and the pick comes from the whole known corpus instead.
pub fn choose_evasive<T: Clone>(candidates: &[(Decimal, T)], temperature: f64) -> Option<Choice<T>> {
    choose_evasive_with_rng(candidates, temperature, &mut thread_rng())
}

/// [`choose_evasive`] with an explicit RNG.
pub fn choose_evasive_with_rng<T: Clone, R: Rng>(
    candidates: &[(Decimal, T)],
    temperature: f64,
    rng: &mut R,
) -> Option<Choice<T>> {
    choose_with_rng(candidates, temperature * 2.0, rng)
}

/// Draw one candidate with an explicit RNG.
///
/// Returns `None` only for empty input. When every weight is zero the draw is
/// uniform.
pub fn choose_with_rng<T: Clone, R: Rng>(
    candidates: &[(Decimal, T)],
    temperature: f64,
    rng: &mut R,
) -> Option<Choice<T>> {
    let (_, last) = candidates.last()?;
    if candidates.len() == 1 {
        return Some(Choice { item: last.clone(), share: 1.0 });
    }

    let shares = tempered_shares(candidates, temperature);
    let total: f64 = shares.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        let index = rng.gen_range(0..candidates.len());
        debug!("All {} candidates weigh nothing, drawing uniformly", candidates.len());
        return Some(Choice {
            item: candidates[index].1.clone(),
            share: 1.0 / candidates.len() as f64,
        });
    }

    let draw = rng.gen_range(0.0..total);
    let mut accumulated = 0.0;
    for ((_, item), share) in candidates.iter().zip(&shares) {
        accumulated += share;
        if accumulated > draw {
            trace!("Drew {draw:.4} of {total:.4}");
            return Some(Choice { item: item.clone(), share: share / total });
        }
    }
    // Float drift left the draw past the last boundary.
    let share = shares.last().copied().unwrap_or_default();
    Some(Choice { item: last.clone(), share: share / total })
}

/// `(w / total) ^ (1 / temperature)` per candidate. Negative weights count
/// as zero.
fn tempered_shares<T>(candidates: &[(Decimal, T)], temperature: f64) -> Vec<f64> {
    let exponent = 1.0 / temperature.max(MIN_TEMPERATURE);
    let weights: Vec<f64> = candidates
        .iter()
        .map(|(weight, _)| weight.to_f64().unwrap_or_default().max(0.0))
        .collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return vec![0.0; weights.len()];
    }
    weights.iter().map(|weight| (weight / total).powf(exponent)).collect()
}
