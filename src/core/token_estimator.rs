//! Prompt size estimation

use serde::{Deserialize, Serialize};

/// Character-length based token estimator with a safety margin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenEstimator {
    pub average_chars_per_token: f64,
    pub safety_buffer_percentage: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            average_chars_per_token: 4.0,
            safety_buffer_percentage: 20.0,
        }
    }
}

impl TokenEstimator {
    pub fn new(average_chars_per_token: f64, safety_buffer_percentage: f64) -> Self {
        Self {
            average_chars_per_token,
            safety_buffer_percentage,
        }
    }

    /// `ceil(chars / avg) * (1 + buffer/100)`, rounded up
    pub fn estimate(&self, text: &str) -> u64 {
        let chars = text.chars().count() as f64;
        let per_token = if self.average_chars_per_token > 0.0 {
            self.average_chars_per_token
        } else {
            1.0
        };
        let base = (chars / per_token).ceil();
        let buffered = base * (1.0 + self.safety_buffer_percentage.max(0.0) / 100.0);
        buffered.ceil() as u64
    }

    /// Estimate for a system + user prompt pair
    pub fn estimate_prompt(&self, system: &str, user: &str) -> u64 {
        self.estimate(system) + self.estimate(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_buffer_to_rounded_base() {
        let estimator = TokenEstimator::default();
        // 10 chars -> ceil(2.5) = 3 -> 3.6 -> 4
        assert_eq!(estimator.estimate("abcdefghij"), 4);
        assert_eq!(estimator.estimate(&"x".repeat(400)), 120);
        assert_eq!(estimator.estimate(""), 0);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let estimator = TokenEstimator::new(1.0, 0.0);
        assert_eq!(estimator.estimate("čćšđž"), 5);
    }

    #[test]
    fn is_deterministic() {
        let estimator = TokenEstimator::new(3.5, 15.0);
        let text = "Subject: quarterly numbers\nPlease review before Friday.";
        assert_eq!(estimator.estimate(text), estimator.estimate(text));
        assert_eq!(
            estimator.estimate_prompt("sys", text),
            estimator.estimate("sys") + estimator.estimate(text)
        );
    }
}
