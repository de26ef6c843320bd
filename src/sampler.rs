//! Sampling configuration and seeded token selection

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VargateError};
use crate::gate::DEFAULT_ENTROPY_THRESHOLD;
use crate::ops::argmax;

/// Options recognized by `generate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Logit sharpness; 0 selects greedy decoding
    pub temperature: f32,
    /// Keep only the `top_k` highest logits (0 disables)
    pub top_k: usize,
    /// Nucleus cutoff in `(0, 1]` (1 disables)
    pub top_p: f32,
    /// Quick-entropy threshold below which a step runs sparse-only
    pub entropy_gate_threshold: f32,
    /// Hard ceiling on prompt plus generated tokens
    pub max_context: usize,
    /// RNG seed; identical seeds give identical samples
    pub seed: u64,
    /// Generation stops after emitting any of these
    pub stop_tokens: Vec<u32>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            entropy_gate_threshold: DEFAULT_ENTROPY_THRESHOLD,
            max_context: 2048,
            seed: 0,
            stop_tokens: Vec::new(),
        }
    }
}

impl SamplingConfig {
    /// Greedy decoding with the given context ceiling
    #[must_use]
    pub fn greedy(max_context: usize) -> Self {
        Self {
            temperature: 0.0,
            top_k: 0,
            top_p: 1.0,
            max_context,
            ..Self::default()
        }
    }

    /// Builder: set the gate threshold
    #[must_use]
    pub fn with_entropy_gate_threshold(mut self, threshold: f32) -> Self {
        self.entropy_gate_threshold = threshold;
        self
    }

    /// Builder: set the seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check option ranges
    ///
    /// # Errors
    ///
    /// [`VargateError::InvalidConfiguration`] naming the first bad option.
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(VargateError::config(format!(
                "temperature must be finite and >= 0, got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(VargateError::config(format!("top_p must be in (0, 1], got {}", self.top_p)));
        }
        if !self.entropy_gate_threshold.is_finite() || self.entropy_gate_threshold < 0.0 {
            return Err(VargateError::config(format!(
                "entropy_gate_threshold must be finite and >= 0, got {}",
                self.entropy_gate_threshold
            )));
        }
        if self.max_context == 0 {
            return Err(VargateError::config("max_context must be positive"));
        }
        Ok(())
    }

    /// Whether `token` ends generation
    #[must_use]
    pub fn is_stop_token(&self, token: u32) -> bool {
        self.stop_tokens.contains(&token)
    }
}

/// Pick the next token from `logits`
///
/// Greedy at temperature 0. Otherwise: scale by `1 / temperature`, keep the
/// `top_k` best (ties to the lower id), softmax, keep the smallest prefix whose
/// mass reaches `top_p`, and draw from what remains.
pub fn sample_token(logits: &[f32], config: &SamplingConfig, rng: &mut StdRng) -> u32 {
    if config.temperature == 0.0 || logits.len() <= 1 {
        return argmax(logits);
    }

    let inv_t = 1.0 / config.temperature;
    let mut candidates: Vec<(u32, f32)> = logits
        .iter()
        .enumerate()
        .map(|(i, &l)| (i as u32, l * inv_t))
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    if config.top_k > 0 {
        candidates.truncate(config.top_k);
    }

    let max = candidates[0].1;
    let mut probs: Vec<f32> = candidates.iter().map(|&(_, l)| (l - max).exp()).collect();
    let sum: f32 = probs.iter().sum();
    for p in &mut probs {
        *p /= sum;
    }

    let mut keep = probs.len();
    if config.top_p < 1.0 {
        let mut cumsum = 0.0;
        for (i, p) in probs.iter().enumerate() {
            cumsum += p;
            if cumsum >= config.top_p {
                keep = i + 1;
                break;
            }
        }
    }

    let mass: f32 = probs[..keep].iter().sum();
    let mut r = rng.gen::<f32>() * mass;
    for (&(token, _), &p) in candidates[..keep].iter().zip(&probs[..keep]) {
        if r < p {
            return token;
        }
        r -= p;
    }
    candidates[keep - 1].0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_greedy_is_argmax() {
        let mut rng = StdRng::seed_from_u64(1);
        let config = SamplingConfig::greedy(16);
        assert_eq!(sample_token(&[0.1, 3.0, 2.0], &config, &mut rng), 1);
    }

    #[test]
    fn test_top_k_one_is_greedy() {
        let config = SamplingConfig {
            top_k: 1,
            ..SamplingConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(sample_token(&[0.5, 0.4, 2.5, 2.4], &config, &mut rng), 2);
        }
    }

    #[test]
    fn test_top_p_excludes_tail() {
        // Token 0 carries ~0.88 of the mass; a 0.5 nucleus keeps only it
        let config = SamplingConfig {
            temperature: 1.0,
            top_k: 0,
            top_p: 0.5,
            ..SamplingConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert_eq!(sample_token(&[4.0, 2.0, 1.0, 0.0], &config, &mut rng), 0);
        }
    }

    #[test]
    fn test_same_seed_same_samples() {
        let config = SamplingConfig {
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            ..SamplingConfig::default()
        };
        let logits: Vec<f32> = (0..32).map(|i| (i as f32 * 0.37).sin()).collect();
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20).map(|_| sample_token(&logits, &config, &mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(11), draw(11));
    }

    #[test]
    fn test_validation() {
        assert!(SamplingConfig::default().validate().is_ok());
        assert!(SamplingConfig { temperature: -1.0, ..SamplingConfig::default() }.validate().is_err());
        assert!(SamplingConfig { top_p: 0.0, ..SamplingConfig::default() }.validate().is_err());
        assert!(SamplingConfig { top_p: 1.5, ..SamplingConfig::default() }.validate().is_err());
        assert!(SamplingConfig { max_context: 0, ..SamplingConfig::default() }.validate().is_err());
        assert!(SamplingConfig::default().with_entropy_gate_threshold(f32::NAN).validate().is_err());
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: SamplingConfig = serde_json::from_str(r#"{"temperature":0.0,"stop_tokens":[2]}"#).unwrap();
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.top_k, 40);
        assert!(config.is_stop_token(2));
        assert!(!config.is_stop_token(3));
    }
}
