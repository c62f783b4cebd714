//! Sampler construction
//!
//! Every generate call gets a freshly built sampler chain instead of mutating
//! the previous one, so repetition-penalty history can never leak between
//! unrelated calls on the same session.

use llama_cpp_2::sampling::LlamaSampler;

use crate::inference::error::RuntimeError;

/// Default sampling parameters applied when a session is created.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_TOP_P: f32 = 0.9;

/// Penalty window matching the engine's stock sampler configuration.
const PENALTY_LAST_N: i32 = 64;

/// Builds a sampler chain for one generate call.
///
/// Temperature is clamped to ≥ 0 and the nucleus threshold to [0, 1].
/// Penalties stay at their neutral defaults (repeat 1.0, frequency 0,
/// presence 0) — the penalty stage is kept in the chain only for its
/// accept-history tracking. Very low temperatures select greedy sampling.
pub fn build_sampler(temperature: f32, top_p: f32) -> Result<LlamaSampler, RuntimeError> {
    if !temperature.is_finite() || !top_p.is_finite() {
        return Err(RuntimeError::SamplerInitFailed(format!(
            "non-finite sampling parameters (temperature={temperature}, top_p={top_p})"
        )));
    }

    let temperature = temperature.max(0.0);
    let top_p = top_p.clamp(0.0, 1.0);

    if temperature < 0.01 {
        return Ok(LlamaSampler::greedy());
    }

    Ok(LlamaSampler::chain_simple([
        LlamaSampler::penalties(PENALTY_LAST_N, 1.0, 0.0, 0.0),
        LlamaSampler::top_p(top_p, 1),
        LlamaSampler::temp(temperature),
        LlamaSampler::dist(rand_seed()),
    ]))
}

/// Generates a random seed using system entropy.
fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_temperature_is_clamped_to_greedy() {
        // max(0, -3.0) = 0 < 0.01 → greedy chain, must not error.
        assert!(build_sampler(-3.0, 0.5).is_ok());
    }

    #[test]
    fn test_out_of_range_top_p_is_accepted_after_clamping() {
        assert!(build_sampler(0.7, 2.5).is_ok());
        assert!(build_sampler(0.7, -1.0).is_ok());
    }

    #[test]
    fn test_non_finite_parameters_fail_as_sampler_init() {
        let err = build_sampler(f32::NAN, 0.9).unwrap_err();
        assert!(matches!(err, RuntimeError::SamplerInitFailed(_)));

        let err = build_sampler(0.2, f32::INFINITY).unwrap_err();
        assert!(matches!(err, RuntimeError::SamplerInitFailed(_)));
    }
}
