//! Dense Levenberg–Marquardt for small nonlinear least-squares problems.

use nalgebra::{DMatrix, DVector};

/// A residual function `r(x)`; the solver minimises `½‖r(x)‖²`.
pub trait LeastSquaresProblem {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of the residuals. Defaults to forward differences.
    fn jacobian(&self, params: &DVector<f64>, residuals: &DVector<f64>) -> DMatrix<f64> {
        forward_difference_jacobian(self, params, residuals)
    }
}

pub fn forward_difference_jacobian<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    params: &DVector<f64>,
    residuals: &DVector<f64>,
) -> DMatrix<f64> {
    let n = params.len();
    let m = residuals.len();
    let mut jac = DMatrix::zeros(m, n);
    let mut x = params.clone();
    for j in 0..n {
        let h = f64::EPSILON.sqrt() * params[j].abs().max(1.0);
        x[j] = params[j] + h;
        let r = problem.residuals(&x);
        x[j] = params[j];
        jac.set_column(j, &((r - residuals) / h));
    }
    jac
}

#[derive(Clone, Debug)]
pub struct LmOptions {
    pub max_iters: usize,
    /// Stop when the relative cost decrease falls below this.
    pub ftol: f64,
    /// Stop when the relative step length falls below this.
    pub xtol: f64,
    /// Stop when the largest gradient component falls below this.
    pub gtol: f64,
    pub initial_lambda: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-12,
            initial_lambda: 1e-3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    SmallCostChange,
    SmallStep,
    SmallGradient,
    MaxIterations,
    /// No damping produced a decrease.
    Stalled,
}

impl Termination {
    pub fn was_successful(&self) -> bool {
        !matches!(self, Termination::Stalled)
    }
}

#[derive(Clone, Debug)]
pub struct LmReport {
    pub params: DVector<f64>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub iterations: usize,
    pub termination: Termination,
}

const MAX_LAMBDA: f64 = 1e16;

pub fn levenberg_marquardt<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    x0: DVector<f64>,
    opts: &LmOptions,
) -> LmReport {
    let mut x = x0;
    let mut r = problem.residuals(&x);
    let mut cost = r.norm_squared();
    let mut lambda = opts.initial_lambda;

    let mut termination = Termination::MaxIterations;
    let mut iterations = 0;

    'outer: while iterations < opts.max_iters {
        iterations += 1;
        let jac = problem.jacobian(&x, &r);
        let jt = jac.transpose();
        let g = &jt * &r;
        if g.amax() <= opts.gtol {
            termination = Termination::SmallGradient;
            break;
        }
        let a = &jt * &jac;

        loop {
            let mut damped = a.clone();
            for i in 0..damped.nrows() {
                damped[(i, i)] += lambda * a[(i, i)].max(1e-12);
            }
            let Some(chol) = damped.cholesky() else {
                lambda *= 10.0;
                if lambda > MAX_LAMBDA {
                    termination = Termination::Stalled;
                    break 'outer;
                }
                continue;
            };
            let delta = chol.solve(&(-&g));
            let x_new = &x + &delta;
            let r_new = problem.residuals(&x_new);
            let cost_new = r_new.norm_squared();

            if cost_new.is_finite() && cost_new < cost {
                let rel_cost = (cost - cost_new) / cost.max(f64::MIN_POSITIVE);
                let rel_step = delta.norm() / (x.norm() + opts.xtol);
                x = x_new;
                r = r_new;
                cost = cost_new;
                lambda = (lambda / 10.0).max(1e-15);
                if rel_step <= opts.xtol {
                    termination = Termination::SmallStep;
                    break 'outer;
                }
                if rel_cost <= opts.ftol {
                    termination = Termination::SmallCostChange;
                    break 'outer;
                }
                break;
            }

            lambda *= 10.0;
            if lambda > MAX_LAMBDA {
                // Already at a minimum as far as the damping can tell.
                termination = if cost <= f64::EPSILON {
                    Termination::SmallCostChange
                } else {
                    Termination::Stalled
                };
                break 'outer;
            }
        }
    }

    log::debug!(
        "lm: {} iterations, cost {:.6e}, {:?}",
        iterations,
        cost,
        termination
    );
    LmReport {
        params: x,
        cost,
        iterations,
        termination,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Rosenbrock;

    impl LeastSquaresProblem for Rosenbrock {
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![10.0 * (p[1] - p[0] * p[0]), 1.0 - p[0]])
        }
    }

    struct ExpFit {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresProblem for ExpFit {
        fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.t.len(),
                self.t
                    .iter()
                    .zip(&self.y)
                    .map(|(&t, &y)| p[0] * (p[1] * t).exp() - y),
            )
        }
    }

    #[test]
    fn solves_rosenbrock() {
        let report = levenberg_marquardt(
            &Rosenbrock,
            DVector::from_vec(vec![-1.2, 1.0]),
            &LmOptions::default(),
        );
        assert!(report.termination.was_successful());
        assert_relative_eq!(report.params[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(report.params[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn fits_exponential_decay() {
        let t: Vec<f64> = (0..20).map(|i| i as f64 * 0.25).collect();
        let y = t.iter().map(|&t| 3.0 * (-0.7 * t).exp()).collect();
        let report = levenberg_marquardt(
            &ExpFit { t, y },
            DVector::from_vec(vec![1.0, -0.1]),
            &LmOptions::default(),
        );
        assert_relative_eq!(report.params[0], 3.0, epsilon = 1e-5);
        assert_relative_eq!(report.params[1], -0.7, epsilon = 1e-5);
        assert!(report.cost < 1e-12);
    }

    #[test]
    fn numeric_jacobian_matches_analytic() {
        let p = DVector::from_vec(vec![0.5, 2.0]);
        let r = Rosenbrock.residuals(&p);
        let j = Rosenbrock.jacobian(&p, &r);
        assert_relative_eq!(j[(0, 0)], -20.0 * p[0], epsilon = 1e-5);
        assert_relative_eq!(j[(0, 1)], 10.0, epsilon = 1e-5);
        assert_relative_eq!(j[(1, 0)], -1.0, epsilon = 1e-6);
    }
}
