//! Conversion of spectral radiance to photopic and scotopic luminance

use crate::model::{AtmosphereModel, WAVELENGTHS_PER_SET};

/// Column-major 4×4 matrix, as consumed by GLSL `mat4`
pub type Mat4 = [[f32; 4]; 4];

pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Maximum photopic luminous efficacy of radiation (lm/W)
pub const PHOTOPIC_LUMINOUS_EFFICACY: f32 = 683.002;
/// Maximum scotopic luminous efficacy of radiation (lm/W)
pub const SCOTOPIC_LUMINOUS_EFFICACY: f32 = 1700.13;

fn lobe(lambda: f32, mean: f32, sigma_below: f32, sigma_above: f32) -> f32 {
    let sigma = if lambda < mean {
        sigma_below
    } else {
        sigma_above
    };
    let t = (lambda - mean) / sigma;
    (-0.5 * t * t).exp()
}

/// CIE 1931 2° colour matching functions at `lambda` nm
///
/// Multi-lobe fit from Wyman, Sloan and Shirley, "Simple Analytic Approximations to the CIE XYZ
/// Color Matching Functions".
pub fn cie_xyz(lambda: f32) -> [f32; 3] {
    let x = 1.056 * lobe(lambda, 599.8, 37.9, 31.0) + 0.362 * lobe(lambda, 442.0, 16.0, 26.7)
        - 0.065 * lobe(lambda, 501.1, 20.4, 26.2);
    let y = 0.821 * lobe(lambda, 568.8, 46.9, 40.5) + 0.286 * lobe(lambda, 530.9, 16.3, 31.1);
    let z = 1.217 * lobe(lambda, 437.0, 11.8, 36.0) + 0.681 * lobe(lambda, 459.0, 26.0, 13.8);
    [x, y, z]
}

/// CIE 1951 scotopic luminous efficiency V′(λ) at `lambda` nm
pub fn scotopic_efficiency(lambda: f32) -> f32 {
    let um = lambda * 1e-3 - 0.5;
    1.019 * (-285.4 * um * um).exp()
}

/// Width of the spectral bin represented by each wavelength
///
/// Interior bins end halfway to their neighbors; the outermost bins span a full spacing.
fn bin_widths(wavelengths: &[f32]) -> Vec<f32> {
    let n = wavelengths.len();
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| {
            let lo = wavelengths[i.saturating_sub(1)];
            let hi = wavelengths[(i + 1).min(n - 1)];
            let span = hi - lo;
            if i == 0 || i == n - 1 {
                span
            } else {
                span / 2.0
            }
        })
        .collect()
}

/// Matrix taking a wavelength set's radiances to (X, Y, Z, scotopic Y) luminance in cd/m²
pub fn radiance_to_luminance(model: &AtmosphereModel, wlset: usize) -> Mat4 {
    let widths = bin_widths(&model.wavelengths);
    let mut m = [[0.0; 4]; 4];
    for (j, column) in m.iter_mut().enumerate() {
        let i = wlset * WAVELENGTHS_PER_SET + j;
        let lambda = model.wavelengths[i];
        let dl = widths[i];
        let [x, y, z] = cie_xyz(lambda);
        *column = [
            x * PHOTOPIC_LUMINOUS_EFFICACY * dl,
            y * PHOTOPIC_LUMINOUS_EFFICACY * dl,
            z * PHOTOPIC_LUMINOUS_EFFICACY * dl,
            scotopic_efficiency(lambda) * SCOTOPIC_LUMINOUS_EFFICACY * dl,
        ];
    }
    m
}

pub fn transform(m: &Mat4, v: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (col, &x) in m.iter().zip(v.iter()) {
        for (o, &c) in out.iter_mut().zip(col.iter()) {
            *o += c * x;
        }
    }
    out
}

pub fn scale(m: &Mat4, s: f32) -> Mat4 {
    let mut out = *m;
    for col in &mut out {
        for x in col.iter_mut() {
            *x *= s;
        }
    }
    out
}
