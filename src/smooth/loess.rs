use super::Smoother;
use super::utility::tricube;

/// Degree-1 local regression over a fixed number of neighbouring samples.
///
/// Each output is the value at sample `i` of a weighted least-squares line
/// fitted to the `window` samples nearest `i` (shifted inward at the ends of
/// the series). Weights are tricube in the sample distance, scaled so the
/// farthest sample in the window still has a small positive weight.
#[derive(Debug, Clone)]
pub struct LocalLinear {
    window: usize,
}

impl LocalLinear {
    pub fn new(window: usize) -> Self {
        LocalLinear {
            window: window.max(2),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn fit_at(&self, values: &[f64], i: usize) -> f64 {
        let n = values.len();
        let window = self.window.min(n);
        let start = i.saturating_sub(window / 2).min(n - window);
        let end = start + window;

        let reach = (i - start).max(end - 1 - i) as f64;
        let bandwidth = reach + 1.0;

        let (mut sw, mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (j, y) in values.iter().enumerate().take(end).skip(start) {
            let x = j as f64 - i as f64;
            let w = tricube(x / bandwidth);
            sw += w;
            sx += w * x;
            sy += w * y;
            sxx += w * x * x;
            sxy += w * x * y;
        }

        if sw == 0.0 {
            return values[i];
        }

        let denom = sw * sxx - sx * sx;
        if denom.abs() <= f64::EPSILON * sw * sxx.max(1.0) {
            return sy / sw;
        }

        let slope = (sw * sxy - sx * sy) / denom;
        // x is centered on sample i, so the intercept is the fit at i
        (sy - slope * sx) / sw
    }
}

impl Smoother for LocalLinear {
    fn smooth(&self, values: &[f64]) -> Vec<f64> {
        (0..values.len()).map(|i| self.fit_at(values, i)).collect()
    }
}
