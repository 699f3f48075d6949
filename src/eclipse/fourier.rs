use std::f64::consts::PI;

/// Truncated Fourier series fitted to equally spaced samples over a full turn
#[derive(Debug, Clone)]
pub struct FourierSeries {
    /// `(cos, sin)` coefficients for harmonics `0..=harmonics`
    coefficients: Vec<([f64; 4], [f64; 4])>,
    samples: Vec<[f64; 4]>,
}

/// Harmonics kept when `samples` coarse azimuths are synthesized onto `texels` output azimuths
pub fn harmonic_count(samples: u32, texels: u32) -> u32 {
    (samples / 2).min(texels / 2)
}

impl FourierSeries {
    /// Fit `samples`, taken at azimuths `2πk/N`, keeping `harmonics` harmonics
    ///
    /// When the Nyquist harmonic of an even sample count is kept it gets half weight, so that a
    /// full fit passes through every sample exactly.
    pub fn fit(samples: &[[f64; 4]], harmonics: u32) -> Self {
        let n = samples.len();
        debug_assert!(n > 0);
        let mut coefficients = Vec::with_capacity(harmonics as usize + 1);
        for m in 0..=harmonics as usize {
            let mut a = [0.0; 4];
            let mut b = [0.0; 4];
            for (k, sample) in samples.iter().enumerate() {
                let phase = 2.0 * PI * (m * k) as f64 / n as f64;
                let (sin, cos) = phase.sin_cos();
                for c in 0..4 {
                    a[c] += sample[c] * cos;
                    b[c] += sample[c] * sin;
                }
            }
            let weight = if m == 0 || 2 * m == n {
                1.0 / n as f64
            } else {
                2.0 / n as f64
            };
            for c in 0..4 {
                a[c] *= weight;
                b[c] *= weight;
            }
            if 2 * m == n {
                b = [0.0; 4];
            }
            coefficients.push((a, b));
        }
        Self {
            coefficients,
            samples: samples.to_vec(),
        }
    }

    pub fn harmonics(&self) -> u32 {
        self.coefficients.len() as u32 - 1
    }

    pub fn eval(&self, azimuth: f64) -> [f64; 4] {
        let mut out = [0.0; 4];
        for (m, (a, b)) in self.coefficients.iter().enumerate() {
            let (sin, cos) = (m as f64 * azimuth).sin_cos();
            for c in 0..4 {
                out[c] += a[c] * cos + b[c] * sin;
            }
        }
        out
    }

    /// `eval` limited per channel to the range of the two samples on either side of `azimuth`
    ///
    /// A truncated series rings between samples wherever the sampled field is peaked. The bound
    /// keeps the synthesis exact at the samples and never negative for non-negative samples.
    pub fn eval_bounded(&self, azimuth: f64) -> [f64; 4] {
        let n = self.samples.len();
        let step = 2.0 * PI / n as f64;
        let k = (azimuth.rem_euclid(2.0 * PI) / step).floor() as usize % n;
        let (lo, hi) = (self.samples[k], self.samples[(k + 1) % n]);
        let mut out = self.eval(azimuth);
        for c in 0..4 {
            out[c] = out[c].max(lo[c].min(hi[c])).min(lo[c].max(hi[c]));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(n: usize, f: impl Fn(f64) -> f64) -> Vec<[f64; 4]> {
        (0..n)
            .map(|k| {
                let x = f(2.0 * PI * k as f64 / n as f64);
                [x, -x, 0.5 * x, 1.0]
            })
            .collect()
    }

    #[test]
    fn harmonics_follow_coarser_grid() {
        assert_eq!(harmonic_count(4, 64), 2);
        assert_eq!(harmonic_count(16, 6), 3);
        assert_eq!(harmonic_count(1, 8), 0);
    }

    #[test]
    fn exact_at_samples() {
        for &n in &[1, 2, 3, 4, 5, 8] {
            let samples = at(n, |x| (3.0 * x).cos() + x * x - 0.7 * x);
            let series = FourierSeries::fit(&samples, (n / 2) as u32);
            for (k, s) in samples.iter().enumerate() {
                let y = series.eval(2.0 * PI * k as f64 / n as f64);
                for c in 0..4 {
                    assert!((y[c] - s[c]).abs() < 1e-9, "n={} k={} {:?} {:?}", n, k, y, s);
                }
            }
        }
    }

    #[test]
    fn recovers_low_harmonics() {
        let samples = at(8, |x| 2.0 + x.cos() - 0.5 * (2.0 * x).sin());
        let series = FourierSeries::fit(&samples, 4);
        for i in 0..50 {
            let x = i as f64 * 0.13;
            let expected = 2.0 + x.cos() - 0.5 * (2.0 * x).sin();
            assert!((series.eval(x)[0] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn bounded_between_neighbours() {
        // Peaked toward zero azimuth: the plain series dips below zero opposite the peak
        let samples = at(4, |x| (3.0 * x.cos()).exp());
        let series = FourierSeries::fit(&samples, 2);
        assert!(series.eval(0.75 * PI)[0] < 0.0);
        for j in 0..32 {
            let x = 2.0 * PI * j as f64 / 32.0;
            let k = (j / 8) % 4;
            let (a, b) = (samples[k][0], samples[(k + 1) % 4][0]);
            let y = series.eval_bounded(x)[0];
            assert!(y >= a.min(b) && y <= a.max(b), "{} at {}", y, x);
        }
        for (k, s) in samples.iter().enumerate() {
            let y = series.eval_bounded(2.0 * PI * k as f64 / 4.0);
            assert!((y[0] - s[0]).abs() < 1e-9);
        }
    }

    #[test]
    fn constant_series() {
        let series = FourierSeries::fit(&at(6, |_| 3.0), 0);
        assert_eq!(series.harmonics(), 0);
        assert!((series.eval(1.234)[0] - 3.0).abs() < 1e-12);
    }
}
