//! Box-constrained quasi-Newton minimisation
//!
//! Projected BFGS: variables pinned at a bound with the gradient pushing
//! outwards form the active set and are frozen for the step, the remaining
//! ones follow the quasi-Newton direction, and every trial point is
//! projected back into the box. Step lengths come from Armijo backtracking.

use sw_core::{SwError, SwResult};

/// Differentiable objective
pub trait Objective {
    fn value(&self, x: &[f64]) -> f64;

    fn gradient(&self, x: &[f64]) -> Vec<f64>;

    /// Value and gradient together (override when they share work)
    fn value_and_gradient(&self, x: &[f64]) -> (f64, Vec<f64>) {
        (self.value(x), self.gradient(x))
    }
}

/// Per-variable lower and upper bounds
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> SwResult<Self> {
        if lower.len() != upper.len() {
            return Err(SwError::InvalidParam(format!(
                "{} lower bounds but {} upper bounds",
                lower.len(),
                upper.len()
            )));
        }
        if let Some(i) = (0..lower.len()).find(|&i| !(lower[i] <= upper[i])) {
            return Err(SwError::InvalidParam(format!(
                "bound {i} is empty: [{}, {}]",
                lower[i], upper[i]
            )));
        }
        Ok(Self { lower, upper })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Clamp `x` into the box
    pub fn project(&self, x: &mut [f64]) {
        for ((v, &lo), &hi) in x.iter_mut().zip(&self.lower).zip(&self.upper) {
            *v = v.clamp(lo, hi);
        }
    }

    fn is_active(&self, i: usize, x: f64, g: f64) -> bool {
        (x <= self.lower[i] && g > 0.0) || (x >= self.upper[i] && g < 0.0)
    }
}

/// Stopping criteria
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimizeOptions {
    pub max_iterations: usize,
    /// Converged when the largest projected-gradient entry falls below this
    pub gradient_tolerance: f64,
    /// Converged when a step improves the value by less than this (relative)
    pub value_tolerance: f64,
    /// Halvings tried before a line search gives up
    pub max_backtracks: usize,
}

impl Default for MinimizeOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            gradient_tolerance: 1e-6,
            value_tolerance: 1e-10,
            max_backtracks: 30,
        }
    }
}

/// Outcome of a minimisation; `x` is the best point visited
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizeResult {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub success: bool,
    pub message: String,
}

/// Minimise `objective` over the box `bounds`, starting from `x0`.
///
/// `x0` is projected into the box first. The best iterate is returned even
/// when the iteration limit is hit; `success` tells whether a convergence
/// criterion was met.
pub fn minimize_bounded<O: Objective + ?Sized>(
    objective: &O,
    x0: &[f64],
    bounds: &Bounds,
    options: &MinimizeOptions,
) -> SwResult<MinimizeResult> {
    let n = x0.len();
    if bounds.len() != n {
        return Err(SwError::InvalidParam(format!(
            "{n} variables but {} bounds",
            bounds.len()
        )));
    }

    let mut x = x0.to_vec();
    bounds.project(&mut x);
    let (mut f, mut g) = objective.value_and_gradient(&x);
    if !f.is_finite() {
        return Err(SwError::Precondition(format!(
            "objective is not finite at the starting point: {f}"
        )));
    }

    let mut h = identity(n);
    let mut fresh_hessian = true;
    let mut iterations = 0;
    let mut success = false;
    let mut message = String::from("iteration limit reached");

    while iterations < options.max_iterations {
        let active: Vec<bool> = (0..n).map(|i| bounds.is_active(i, x[i], g[i])).collect();

        let pg_norm = (0..n)
            .filter(|&i| !active[i])
            .map(|i| g[i].abs())
            .fold(0.0, f64::max);
        if pg_norm < options.gradient_tolerance {
            success = true;
            message = String::from("projected gradient below tolerance");
            break;
        }

        let mut d = descent_direction(&h, &g, &active);
        let mut slope: f64 = d.iter().zip(&g).map(|(a, b)| a * b).sum();
        if !(slope < 0.0) {
            // Curvature estimate went bad: fall back to steepest descent
            h = identity(n);
            fresh_hessian = true;
            d = descent_direction(&h, &g, &active);
            slope = d.iter().zip(&g).map(|(a, b)| a * b).sum();
        }

        iterations += 1;

        let Some((x_new, f_new, step)) = line_search(objective, bounds, &x, f, &g, &d, options)
        else {
            if fresh_hessian {
                message = String::from("line search failed along steepest descent");
                break;
            }
            h = identity(n);
            fresh_hessian = true;
            continue;
        };

        let g_new = objective.gradient(&x_new);
        let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
        let sy: f64 = s.iter().zip(&y).map(|(a, b)| a * b).sum();
        if sy > 1e-12 {
            bfgs_update(&mut h, &s, &y, sy);
            fresh_hessian = false;
        }

        let improvement = f - f_new;
        x = x_new;
        g = g_new;
        f = f_new;

        log::debug!("minimize: iteration {iterations}, value {f:.6}, slope {slope:.3e}");

        // Only trust a stalled value after a full quasi-Newton step
        if step == 1.0 && improvement <= options.value_tolerance * f.abs().max(1.0) {
            success = true;
            message = String::from("relative improvement below tolerance");
            break;
        }
    }

    Ok(MinimizeResult {
        x,
        value: f,
        iterations,
        success,
        message,
    })
}

fn identity(n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| {
            let mut row = vec![0.0; n];
            row[i] = 1.0;
            row
        })
        .collect()
}

/// `-H g` restricted to the free variables
fn descent_direction(h: &[Vec<f64>], g: &[f64], active: &[bool]) -> Vec<f64> {
    (0..g.len())
        .map(|i| {
            if active[i] {
                return 0.0;
            }
            -h[i]
                .iter()
                .zip(g)
                .zip(active)
                .filter(|(_, a)| !**a)
                .map(|((hij, gj), _)| hij * gj)
                .sum::<f64>()
        })
        .collect()
}

/// Armijo backtracking along the projected path `P(x + t d)`.
///
/// Accepts only points that do not increase the objective. Returns the
/// accepted point, its value and the step length.
fn line_search<O: Objective + ?Sized>(
    objective: &O,
    bounds: &Bounds,
    x: &[f64],
    f: f64,
    g: &[f64],
    d: &[f64],
    options: &MinimizeOptions,
) -> Option<(Vec<f64>, f64, f64)> {
    const ARMIJO_C: f64 = 1e-4;
    let mut t = 1.0;

    for _ in 0..=options.max_backtracks {
        let mut trial: Vec<f64> = x.iter().zip(d).map(|(xi, di)| xi + t * di).collect();
        bounds.project(&mut trial);

        let decrease: f64 = trial
            .iter()
            .zip(x)
            .zip(g)
            .map(|((xn, xo), gi)| gi * (xn - xo))
            .sum();
        let f_trial = objective.value(&trial);
        if f_trial.is_finite() && f_trial <= f + ARMIJO_C * decrease.min(0.0) && f_trial <= f {
            return Some((trial, f_trial, t));
        }
        t *= 0.5;
    }
    None
}

/// Inverse-Hessian BFGS update
fn bfgs_update(h: &mut [Vec<f64>], s: &[f64], y: &[f64], sy: f64) {
    let n = s.len();
    let rho = 1.0 / sy;
    let hy: Vec<f64> = (0..n)
        .map(|i| h[i].iter().zip(y).map(|(a, b)| a * b).sum())
        .collect();
    let yhy: f64 = y.iter().zip(&hy).map(|(a, b)| a * b).sum();

    // H' = H - rho (H y s' + s y' H) + (rho^2 y'Hy + rho) s s'
    let ss_coeff = rho * rho * yhy + rho;
    for i in 0..n {
        for j in 0..n {
            h[i][j] += -rho * (hy[i] * s[j] + s[i] * hy[j]) + ss_coeff * s[i] * s[j];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rosenbrock valley
    struct Rosenbrock;

    impl Objective for Rosenbrock {
        fn value(&self, x: &[f64]) -> f64 {
            (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2)
        }

        fn gradient(&self, x: &[f64]) -> Vec<f64> {
            vec![
                -2.0 * (1.0 - x[0]) - 400.0 * x[0] * (x[1] - x[0] * x[0]),
                200.0 * (x[1] - x[0] * x[0]),
            ]
        }
    }

    /// Separable quadratic centred at `c`
    struct Bowl {
        c: Vec<f64>,
    }

    impl Objective for Bowl {
        fn value(&self, x: &[f64]) -> f64 {
            x.iter().zip(&self.c).map(|(a, b)| (a - b).powi(2)).sum()
        }

        fn gradient(&self, x: &[f64]) -> Vec<f64> {
            x.iter().zip(&self.c).map(|(a, b)| 2.0 * (a - b)).collect()
        }
    }

    #[test]
    fn test_unconstrained_rosenbrock() {
        let bounds = Bounds::new(vec![-5.0; 2], vec![5.0; 2]).unwrap();
        let options = MinimizeOptions {
            max_iterations: 500,
            ..Default::default()
        };
        let res = minimize_bounded(&Rosenbrock, &[-1.2, 1.0], &bounds, &options).unwrap();
        assert!(res.success, "{}", res.message);
        assert!((res.x[0] - 1.0).abs() < 1e-3);
        assert!((res.x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_active_bound() {
        let bowl = Bowl { c: vec![3.0, -2.0] };
        let bounds = Bounds::new(vec![0.0, -1.0], vec![1.0, 1.0]).unwrap();
        let res = minimize_bounded(&bowl, &[0.5, 0.5], &bounds, &MinimizeOptions::default()).unwrap();
        assert!((res.x[0] - 1.0).abs() < 1e-12);
        assert!((res.x[1] + 1.0).abs() < 1e-12);
        assert!(res.success);
    }

    #[test]
    fn test_start_is_projected() {
        let bowl = Bowl { c: vec![0.0] };
        let bounds = Bounds::new(vec![2.0], vec![4.0]).unwrap();
        let res = minimize_bounded(&bowl, &[10.0], &bounds, &MinimizeOptions::default()).unwrap();
        assert_eq!(res.x, vec![2.0]);
    }

    #[test]
    fn test_iteration_limit_keeps_progress() {
        let bounds = Bounds::new(vec![-5.0; 2], vec![5.0; 2]).unwrap();
        let options = MinimizeOptions {
            max_iterations: 3,
            ..Default::default()
        };
        let start = [-1.2, 1.0];
        let res = minimize_bounded(&Rosenbrock, &start, &bounds, &options).unwrap();
        assert!(!res.success);
        assert_eq!(res.iterations, 3);
        assert!(res.value <= Rosenbrock.value(&start));
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(Bounds::new(vec![1.0], vec![0.0]).is_err());
        assert!(Bounds::new(vec![1.0], vec![]).is_err());
    }
}
