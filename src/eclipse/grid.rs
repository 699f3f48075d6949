//! Angular placement of coarse-grid nodes and dense output texels
//!
//! Elevations are measured from the local horizontal plane, in radians. The geometric horizon
//! dips below it as the camera rises, and eclipsed radiance changes fastest close to it, so nodes
//! and texels cluster quadratically toward the horizon on both sides.

use std::f64::consts::{FRAC_PI_2, PI};

/// Elevation of the geometric horizon seen from `altitude` above a sphere of `earth_radius`
pub fn horizon_elevation(earth_radius: f32, altitude: f32) -> f64 {
    let r = f64::from(earth_radius);
    let h = f64::from(altitude.max(0.0));
    -(r / (r + h)).min(1.0).acos()
}

/// `per_side` nodes below the horizon followed by `per_side` above, in ascending elevation
///
/// No node lies on the horizon itself. The outermost nodes are the nadir and the zenith.
pub fn elevation_nodes(horizon: f64, per_side: u32) -> Vec<f64> {
    let n = f64::from(per_side);
    let mut nodes = Vec::with_capacity(2 * per_side as usize);
    for i in (0..per_side).rev() {
        let t = (f64::from(i) + 1.0) / n;
        nodes.push(horizon - (horizon + FRAC_PI_2) * t * t);
    }
    for i in 0..per_side {
        let t = (f64::from(i) + 1.0) / n;
        nodes.push(horizon + (FRAC_PI_2 - horizon) * t * t);
    }
    nodes
}

/// Azimuths of the coarse samples, relative to the sun
pub fn azimuth_nodes(count: u32) -> Vec<f64> {
    (0..count)
        .map(|k| 2.0 * PI * f64::from(k) / f64::from(count))
        .collect()
}

/// Azimuth of output texel `index` out of `count`
///
/// Texel zero faces the sun, so every coarse azimuth lands on a texel when `count` is a multiple
/// of the coarse sample count.
pub fn texel_azimuth(index: u32, count: u32) -> f64 {
    2.0 * PI * f64::from(index) / f64::from(count)
}

/// Number of output elevation texels below the horizon
pub fn texels_below_horizon(count: u32) -> u32 {
    count / 2
}

/// Elevation of output texel `index` out of `count`
///
/// The lower half of the texels sits below the horizon and the upper half above it. Each texel
/// centre keeps the quadratic clustering, so none straddles the horizon.
pub fn texel_elevation(horizon: f64, index: u32, count: u32) -> f64 {
    let below = texels_below_horizon(count);
    if index < below {
        let from_horizon = f64::from(below - 1 - index);
        let t = (from_horizon + 0.5) / f64::from(below);
        horizon - (horizon + FRAC_PI_2) * t * t
    } else {
        let above = count - below;
        let t = (f64::from(index - below) + 0.5) / f64::from(above);
        horizon + (FRAC_PI_2 - horizon) * t * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const R: f32 = 6_371_000.0;

    #[test]
    fn horizon_at_ground_is_level() {
        assert_eq!(horizon_elevation(R, 0.0), 0.0);
        assert_eq!(horizon_elevation(R, -5.0), 0.0);
        let dip = horizon_elevation(R, 10_000.0);
        assert!(dip < 0.0 && dip > -0.1, "{}", dip);
    }

    #[test]
    fn nodes_partition_at_horizon() {
        for &altitude in &[0.0, 1.0, 1_000.0, 50_000.0, 119_999.0] {
            let hz = horizon_elevation(R, altitude);
            let nodes = elevation_nodes(hz, 4);
            assert_eq!(nodes.len(), 8);
            assert!(nodes[..4].iter().all(|&e| e < hz), "{:?}", nodes);
            assert!(nodes[4..].iter().all(|&e| e > hz), "{:?}", nodes);
            assert!(nodes.windows(2).all(|w| w[0] < w[1]));
            assert!((nodes[0] + FRAC_PI_2).abs() < 1e-12);
            assert!((nodes[7] - FRAC_PI_2).abs() < 1e-12);
        }
    }

    #[test]
    fn nodes_cluster_near_horizon() {
        let nodes = elevation_nodes(0.0, 4);
        let gaps: Vec<f64> = nodes[4..].windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[0] < g[1]));
    }

    #[test]
    fn texels_stay_on_their_side() {
        let hz = horizon_elevation(R, 30_000.0);
        for &count in &[2, 7, 16] {
            let below = texels_below_horizon(count);
            for i in 0..count {
                let e = texel_elevation(hz, i, count);
                assert!(e > -FRAC_PI_2 && e < FRAC_PI_2);
                if i < below {
                    assert!(e < hz);
                } else {
                    assert!(e > hz);
                }
                if i > 0 {
                    assert!(e > texel_elevation(hz, i - 1, count));
                }
            }
        }
    }

    #[test]
    fn azimuths() {
        let az = azimuth_nodes(4);
        assert_eq!(az.len(), 4);
        assert!((az[1] - FRAC_PI_2).abs() < 1e-12);
        assert_eq!(texel_azimuth(2, 8), az[1]);
    }
}
