/// Natural cubic spline through four-channel samples at ascending abscissae
///
/// Outside the node range the end values are held rather than extrapolated. Between two nodes
/// the result stays within the range of their values.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<[f64; 4]>,
    /// Second derivatives at each node; zero at both ends
    m: Vec<[f64; 4]>,
}

impl CubicSpline {
    /// `xs` must be strictly ascending and as long as `ys`, with at least one node
    pub fn new(xs: &[f64], ys: &[[f64; 4]]) -> Self {
        debug_assert_eq!(xs.len(), ys.len());
        debug_assert!(!xs.is_empty());
        debug_assert!(xs.windows(2).all(|w| w[0] < w[1]));
        let n = xs.len();
        let mut m = vec![[0.0; 4]; n];
        if n > 2 {
            // Tridiagonal system for the interior second derivatives, solved by forward
            // elimination and back substitution.
            let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
            let mut diag = vec![0.0; n];
            let mut rhs = vec![[0.0; 4]; n];
            for i in 1..n - 1 {
                diag[i] = 2.0 * (h[i - 1] + h[i]);
                for c in 0..4 {
                    rhs[i][c] = 6.0
                        * ((ys[i + 1][c] - ys[i][c]) / h[i] - (ys[i][c] - ys[i - 1][c]) / h[i - 1]);
                }
            }
            for i in 2..n - 1 {
                let w = h[i - 1] / diag[i - 1];
                diag[i] -= w * h[i - 1];
                for c in 0..4 {
                    rhs[i][c] -= w * rhs[i - 1][c];
                }
            }
            for i in (1..n - 1).rev() {
                for c in 0..4 {
                    let next = if i + 1 < n - 1 { m[i + 1][c] } else { 0.0 };
                    m[i][c] = (rhs[i][c] - h[i] * next) / diag[i];
                }
            }
        }
        Self {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            m,
        }
    }

    pub fn eval(&self, x: f64) -> [f64; 4] {
        let n = self.xs.len();
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[n - 1] {
            return self.ys[n - 1];
        }
        // Index of the interval containing x
        let i = match self
            .xs
            .binary_search_by(|probe| probe.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Less))
        {
            Ok(i) => return self.ys[i],
            Err(i) => i - 1,
        };
        let h = self.xs[i + 1] - self.xs[i];
        let a = (self.xs[i + 1] - x) / h;
        let b = (x - self.xs[i]) / h;
        let mut out = [0.0; 4];
        for c in 0..4 {
            let y = a * self.ys[i][c]
                + b * self.ys[i + 1][c]
                + ((a * a * a - a) * self.m[i][c] + (b * b * b - b) * self.m[i + 1][c]) * h * h
                    / 6.0;
            let (y0, y1) = (self.ys[i][c], self.ys[i + 1][c]);
            out[c] = y.max(y0.min(y1)).min(y0.max(y1));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splat(x: f64) -> [f64; 4] {
        [x, 2.0 * x, -x, 0.0]
    }

    #[test]
    fn interpolates_nodes() {
        let xs = [-1.0, -0.3, 0.1, 0.2, 1.4];
        let ys: Vec<_> = xs.iter().map(|&x: &f64| splat(x.sin() + 3.0)).collect();
        let spline = CubicSpline::new(&xs, &ys);
        for (x, y) in xs.iter().zip(&ys) {
            assert_eq!(spline.eval(*x), *y);
        }
    }

    #[test]
    fn reproduces_lines() {
        let xs = [0.0, 0.1, 0.5, 0.6, 2.0];
        let ys: Vec<_> = xs.iter().map(|&x| splat(3.0 * x - 1.0)).collect();
        let spline = CubicSpline::new(&xs, &ys);
        for i in 0..=40 {
            let x = f64::from(i) * 0.05;
            let y = spline.eval(x);
            assert!((y[0] - (3.0 * x - 1.0)).abs() < 1e-9, "{} {:?}", x, y);
        }
    }

    #[test]
    fn holds_ends() {
        let spline = CubicSpline::new(&[0.0, 1.0, 2.0], &[splat(1.0), splat(5.0), splat(2.0)]);
        assert_eq!(spline.eval(-3.0), splat(1.0));
        assert_eq!(spline.eval(9.0), splat(2.0));
    }

    #[test]
    fn single_node_is_constant() {
        let spline = CubicSpline::new(&[0.5], &[splat(4.0)]);
        assert_eq!(spline.eval(0.0), splat(4.0));
        assert_eq!(spline.eval(1.0), splat(4.0));
    }

    #[test]
    fn steps_do_not_overshoot() {
        let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
        let ys = [splat(0.0), splat(0.0), splat(1.0), splat(1.0), splat(1.0)];
        let spline = CubicSpline::new(&xs, &ys);
        for i in 0..=80 {
            let x = f64::from(i) * 0.05;
            let y = spline.eval(x)[0];
            assert!((0.0..=1.0).contains(&y), "{} at {}", y, x);
            if x < 1.0 {
                assert_eq!(y, 0.0);
            }
        }
    }

    #[test]
    fn natural_ends_match_known_solution() {
        // Symmetric three-node data: m1 = 6 * (-1 - 1) / (2 * 2) = -3
        let spline = CubicSpline::new(&[0.0, 1.0, 2.0], &[splat(0.0), splat(1.0), splat(0.0)]);
        let y = spline.eval(0.5);
        // a = b = 0.5: 0.5 + (0.125 - 0.5) * -3 / 6
        assert!((y[0] - (0.5 + 0.1875)).abs() < 1e-12, "{:?}", y);
    }
}
