use std::f64::consts::PI;

use super::Smoother;
use super::utility::weighted_mean;

/// Centered moving average with Hamming weights and a minimum period of one.
///
/// Near the ends of a series the window is truncated and the remaining
/// weights are renormalized, so every sample gets a value. Even window sizes
/// are widened by one to keep the window centered.
#[derive(Debug, Clone)]
pub struct HammingAverage {
    weights: Vec<f64>,
}

impl HammingAverage {
    pub fn new(window: usize) -> Self {
        let half = window.max(1) / 2;
        let len = 2 * half + 1;
        let weights = if len == 1 {
            vec![1.0]
        } else {
            (0..len)
                .map(|k| 0.54 - 0.46 * (2.0 * PI * k as f64 / (len - 1) as f64).cos())
                .collect()
        };
        HammingAverage { weights }
    }

    pub fn window(&self) -> usize {
        self.weights.len()
    }
}

impl Smoother for HammingAverage {
    fn smooth(&self, values: &[f64]) -> Vec<f64> {
        let n = values.len();
        let half = self.weights.len() / 2;

        (0..n)
            .map(|i| {
                let start = i.saturating_sub(half);
                let end = (i + half + 1).min(n);
                let offset = start + half - i;
                let weights = &self.weights[offset..offset + (end - start)];
                weighted_mean(&values[start..end], weights)
            })
            .collect()
    }
}
