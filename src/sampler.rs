//! Thompson-Sampling math for one experiment group
//!
//! Each variant gets an independent Beta posterior with a uniform prior:
//! `Beta(1 + conversions, 1 + exposures - conversions)`. P(best) is
//! estimated by Monte-Carlo joint draws across the group, and the new
//! weights split the group's original weight sum in proportion to those
//! probabilities.
//!
//! The sampler is seedable so recalculation is reproducible in tests;
//! production construction seeds from entropy.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Beta, Distribution};

use crate::overlay::allocate_weights;

/// Counter snapshot the sampler needs for one variant
#[derive(Debug, Clone, PartialEq)]
pub struct VariantObservations {
    pub value: String,
    pub exposures: u64,
    pub conversions: u64,
}

/// Result of sampling one group
#[derive(Debug, Clone, PartialEq)]
pub struct SampledGroup {
    /// P(best) per variant, in input order; sums to 1
    pub probabilities: Vec<f64>,
    /// New weights per variant, in input order; sums to the original sum
    pub weights: Vec<f64>,
}

/// Numerical failures that skip a group for this cycle
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("group needs at least two variants, got {0}")]
    TooFewVariants(usize),

    #[error("group's declared weights sum to zero")]
    ZeroWeightSum,

    #[error("invalid Beta posterior for variant '{variant}': {reason}")]
    InvalidPosterior { variant: String, reason: String },
}

/// Seedable Thompson sampler
#[derive(Debug)]
pub struct ThompsonSampler {
    trials: usize,
    rng: StdRng,
}

impl ThompsonSampler {
    /// Entropy-seeded sampler for production use
    #[must_use]
    pub fn new(trials: usize) -> Self {
        Self {
            trials: trials.max(1),
            rng: StdRng::from_entropy(),
        }
    }

    /// Fixed-seed sampler (reproducible)
    #[must_use]
    pub fn with_seed(trials: usize, seed: u64) -> Self {
        Self {
            trials: trials.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Estimate each variant's probability of being best
    ///
    /// Runs `trials` joint draws; each draw samples every posterior once
    /// and the maximum wins. Exact ties go to the earlier variant so the
    /// estimate is deterministic under a fixed seed.
    pub fn probability_of_best(
        &mut self,
        variants: &[VariantObservations],
    ) -> Result<Vec<f64>, SampleError> {
        if variants.len() < 2 {
            return Err(SampleError::TooFewVariants(variants.len()));
        }

        let posteriors = variants
            .iter()
            .map(|v| {
                // Conversions can transiently exceed exposures; clamp for
                // sampling purposes only.
                let conversions = v.conversions.min(v.exposures);
                let alpha = 1.0 + conversions as f64;
                let beta = 1.0 + (v.exposures - conversions) as f64;
                Beta::new(alpha, beta).map_err(|e| SampleError::InvalidPosterior {
                    variant: v.value.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut wins = vec![0u64; variants.len()];
        for _ in 0..self.trials {
            let mut best = 0;
            let mut best_draw = f64::NEG_INFINITY;
            for (i, posterior) in posteriors.iter().enumerate() {
                let draw = posterior.sample(&mut self.rng);
                if !draw.is_finite() {
                    return Err(SampleError::InvalidPosterior {
                        variant: variants[i].value.clone(),
                        reason: format!("non-finite draw: {}", draw),
                    });
                }
                if draw > best_draw {
                    best_draw = draw;
                    best = i;
                }
            }
            wins[best] += 1;
        }

        Ok(wins
            .into_iter()
            .map(|w| w as f64 / self.trials as f64)
            .collect())
    }

    /// Produce new weights for a group
    ///
    /// `original_sum` is the group's declared weight sum (the simplex
    /// target, 100 by platform convention). The rounded weights sum to it
    /// exactly; the rounding residual lands on the top-probability
    /// variant.
    pub fn sample_weights(
        &mut self,
        variants: &[VariantObservations],
        original_sum: f64,
    ) -> Result<SampledGroup, SampleError> {
        if !(original_sum > 0.0) {
            return Err(SampleError::ZeroWeightSum);
        }
        let probabilities = self.probability_of_best(variants)?;
        let weights = allocate_weights(&probabilities, original_sum);
        Ok(SampledGroup {
            probabilities,
            weights,
        })
    }
}
