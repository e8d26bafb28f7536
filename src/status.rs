//! Pure participant-status calculations.
//!
//! Everything here is a function of the validation parameters and the
//! participant's counters; the store-touching transition logic lives on the
//! keeper.

use statrs::distribution::{ContinuousCDF, Normal};

use crate::config::ValidationParams;
use crate::errors::{ChainError, ChainResult};
use crate::types::{Participant, ParticipantStatus, ParticipantStatusReason};

/// Expected false-positive mass (with continuity correction) a sample must
/// carry before the invalidation test is trusted. Calibrated against the
/// upstream sample floors.
const WILSON_CRITICAL_MASS: f64 = 2.61;

/// One-sided z-score of the observed invalidation count against the
/// configured false-positive rate. Positive values mean more invalidations
/// than the rate explains.
pub fn z_score_from_fpr(false_positive_rate: f64, validated: u64, invalidated: u64) -> f64 {
    let total = (validated + invalidated) as f64;
    if total == 0.0 || false_positive_rate <= 0.0 || false_positive_rate >= 1.0 {
        return 0.0;
    }
    let expected = false_positive_rate * total;
    let stddev = (false_positive_rate * (1.0 - false_positive_rate) * total).sqrt();
    (invalidated as f64 - expected) / stddev
}

/// Smallest sample size `n ≤ max` whose continuity-corrected expected
/// false-positive count reaches the Wilson critical mass; `max` when no such
/// sample size exists.
pub fn measurements_needed(false_positive_rate: f64, max: u64) -> u64 {
    if false_positive_rate <= 0.0 {
        return max;
    }
    for n in 1..=max {
        if (n as f64 - 0.5) * false_positive_rate >= WILSON_CRITICAL_MASS {
            return n;
        }
    }
    max
}

/// Upper quantile `z_{1−α}` of the standard normal.
pub fn significance_threshold(alpha: f64) -> ChainResult<f64> {
    if !(0.0..1.0).contains(&alpha) || alpha == 0.0 {
        return Err(ChainError::InvalidArgument(format!(
            "invalidation alpha {alpha} outside (0, 1)"
        )));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|err| ChainError::Internal(format!("standard normal unavailable: {err}")))?;
    Ok(normal.inverse_cdf(1.0 - alpha))
}

/// Deterministic status decision for one participant. Pure; the sole caller
/// that persists the outcome is the keeper's status mutator.
pub fn compute_status(
    params: &ValidationParams,
    participant: &Participant,
) -> ChainResult<(ParticipantStatus, ParticipantStatusReason)> {
    if participant.consecutive_invalid_inferences >= params.consecutive_failure_limit {
        return Ok((
            ParticipantStatus::Invalid,
            ParticipantStatusReason::ConsecutiveFailures,
        ));
    }

    let stats = &participant.current_epoch_stats;
    if participant.epochs_completed == 0
        && stats.inference_count < params.min_ramp_up_measurements
    {
        return Ok((ParticipantStatus::Ramping, ParticipantStatusReason::Ramping));
    }

    let total = stats.validated_inferences + stats.invalidated_inferences;
    let z = z_score_from_fpr(
        params.false_positive_rate,
        stats.validated_inferences,
        stats.invalidated_inferences,
    );
    let threshold = significance_threshold(params.invalidation_alpha)?;
    let floor = measurements_needed(params.false_positive_rate, params.max_measurements);
    if z > threshold && total >= floor {
        return Ok((
            ParticipantStatus::Invalid,
            ParticipantStatusReason::StatisticalInvalidations,
        ));
    }

    Ok((ParticipantStatus::Active, ParticipantStatusReason::NoReason))
}
