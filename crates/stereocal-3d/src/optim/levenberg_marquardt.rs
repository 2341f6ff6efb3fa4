//! Levenberg-Marquardt optimizer for non-linear least squares problems.
//!
//! The optimizer minimizes `sum(r_i(p)^2)` by solving the damped normal equations
//! `(J^T J + λ diag(J^T J)) δ = -J^T r` and adapting `λ` after every step.

use faer::prelude::SpSolver;

use crate::CalibError;

/// A non-linear least squares problem over a flat parameter vector.
pub trait LeastSquaresProblem {
    /// Number of parameters.
    fn num_params(&self) -> usize;

    /// Number of residuals.
    fn num_residuals(&self) -> usize;

    /// Evaluate the residuals at `params` into `out`.
    fn residuals(&self, params: &[f64], out: &mut [f64]) -> Result<(), CalibError>;

    /// Evaluate the row-major `num_residuals x num_params` Jacobian into `jac`.
    ///
    /// The default implementation uses forward differences.
    fn jacobian(&self, params: &[f64], jac: &mut [f64]) -> Result<(), CalibError> {
        forward_difference_jacobian(self, params, jac)
    }
}

/// Relative step used for numerical differentiation.
const DIFF_STEP: f64 = 1e-7;

/// Finite difference step for a parameter value.
pub fn difference_step(value: f64) -> f64 {
    DIFF_STEP * value.abs().max(1.0)
}

/// Approximate the Jacobian of a problem with forward differences.
pub fn forward_difference_jacobian<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    params: &[f64],
    jac: &mut [f64],
) -> Result<(), CalibError> {
    let (m, n) = (problem.num_residuals(), problem.num_params());
    let mut base = vec![0.0; m];
    let mut moved = vec![0.0; m];
    problem.residuals(params, &mut base)?;

    let mut p = params.to_vec();
    for j in 0..n {
        let h = difference_step(p[j]);
        p[j] += h;
        problem.residuals(&p, &mut moved)?;
        p[j] = params[j];
        for i in 0..m {
            jac[i * n + j] = (moved[i] - base[i]) / h;
        }
    }
    Ok(())
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizerResult {
    /// Cost at the initial parameters.
    pub initial_cost: f64,
    /// Final cost (sum of squared residuals).
    pub final_cost: f64,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Reason for termination.
    pub termination_reason: TerminationReason,
}

/// Reason why the optimizer terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TerminationReason {
    /// Converged: cost or parameter change below tolerance.
    CostConverged,
    /// Converged: gradient norm below tolerance.
    GradientConverged,
    /// Maximum iterations reached.
    MaxIterations,
    /// Lambda exceeded maximum, no step decreases the cost.
    LambdaMaxExceeded,
}

/// Levenberg-Marquardt optimizer configuration.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    /// Initial damping parameter.
    pub lambda_init: f64,
    /// Maximum damping parameter.
    pub lambda_max: f64,
    /// Factor for lambda adaptation.
    pub lambda_factor: f64,
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the relative cost decrease.
    pub cost_tolerance: f64,
    /// Convergence threshold on the step norm relative to the parameter norm.
    pub step_tolerance: f64,
    /// Convergence threshold on the gradient infinity norm.
    pub gradient_tolerance: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            lambda_init: 1e-3,
            lambda_max: 1e10,
            lambda_factor: 10.0,
            max_iterations: 100,
            cost_tolerance: 1e-12,
            step_tolerance: 1e-5,
            gradient_tolerance: 1e-12,
        }
    }
}

impl LevenbergMarquardt {
    /// Create a new optimizer with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the relative step tolerance.
    pub fn with_step_tolerance(mut self, tol: f64) -> Self {
        self.step_tolerance = tol;
        self
    }

    /// Set the relative cost tolerance.
    pub fn with_cost_tolerance(mut self, tol: f64) -> Self {
        self.cost_tolerance = tol;
        self
    }

    /// Minimize the problem starting from `params`, updated in place.
    ///
    /// # Errors
    ///
    /// Fails if the problem is empty or its evaluation fails. Running out of
    /// iterations is reported through [`TerminationReason`], not as an error.
    pub fn optimize<P: LeastSquaresProblem + ?Sized>(
        &self,
        problem: &P,
        params: &mut [f64],
    ) -> Result<OptimizerResult, CalibError> {
        let (m, n) = (problem.num_residuals(), problem.num_params());
        if n == 0 || m == 0 {
            return Err(CalibError::Degenerate(
                "optimization problem has no parameters or residuals".to_string(),
            ));
        }
        if params.len() != n {
            return Err(CalibError::LengthMismatch(params.len(), n));
        }

        let mut residuals = vec![0.0; m];
        let mut jac = vec![0.0; m * n];
        let mut candidate = vec![0.0; n];
        let mut candidate_residuals = vec![0.0; m];

        problem.residuals(params, &mut residuals)?;
        let initial_cost = sum_squares(&residuals);
        let mut current_cost = initial_cost;

        let mut lambda = self.lambda_init;
        let mut iterations = 0;
        let mut normal_equations: Option<(Vec<f64>, Vec<f64>)> = None;

        let result = |final_cost, iterations, termination_reason| OptimizerResult {
            initial_cost,
            final_cost,
            iterations,
            termination_reason,
        };

        loop {
            if iterations >= self.max_iterations {
                return Ok(result(
                    current_cost,
                    iterations,
                    TerminationReason::MaxIterations,
                ));
            }

            // the system only changes after an accepted step
            let (jtj, jtr) = match normal_equations.take() {
                Some(system) => system,
                None => {
                    problem.jacobian(params, &mut jac)?;
                    build_normal_equations(&jac, &residuals, m, n)
                }
            };

            let gradient_norm = jtr.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
            if gradient_norm < self.gradient_tolerance {
                return Ok(result(
                    current_cost,
                    iterations,
                    TerminationReason::GradientConverged,
                ));
            }

            let delta = solve_damped_system(&jtj, &jtr, lambda, n);
            iterations += 1;

            let Some(delta) = delta else {
                lambda *= self.lambda_factor;
                if lambda > self.lambda_max {
                    return Ok(result(
                        current_cost,
                        iterations,
                        TerminationReason::LambdaMaxExceeded,
                    ));
                }
                normal_equations = Some((jtj, jtr));
                continue;
            };

            let step_norm = delta.iter().map(|v| v * v).sum::<f64>().sqrt();
            let param_norm = params.iter().map(|v| v * v).sum::<f64>().sqrt();
            let small_step = step_norm <= self.step_tolerance * (param_norm + self.step_tolerance);

            for (c, (p, d)) in candidate.iter_mut().zip(params.iter().zip(delta.iter())) {
                *c = p + d;
            }
            problem.residuals(&candidate, &mut candidate_residuals)?;
            let new_cost = sum_squares(&candidate_residuals);

            log::debug!(
                "lm iteration {}: cost {:.6e} -> {:.6e}, lambda {:.1e}",
                iterations,
                current_cost,
                new_cost,
                lambda
            );

            if new_cost.is_finite() && new_cost < current_cost {
                let relative_change = (current_cost - new_cost) / current_cost.max(f64::MIN_POSITIVE);
                params.copy_from_slice(&candidate);
                std::mem::swap(&mut residuals, &mut candidate_residuals);
                current_cost = new_cost;
                lambda = (lambda / self.lambda_factor).max(1e-12);

                if small_step || relative_change < self.cost_tolerance {
                    return Ok(result(
                        current_cost,
                        iterations,
                        TerminationReason::CostConverged,
                    ));
                }
            } else {
                if small_step {
                    return Ok(result(
                        current_cost,
                        iterations,
                        TerminationReason::CostConverged,
                    ));
                }
                lambda *= self.lambda_factor;
                if lambda > self.lambda_max {
                    return Ok(result(
                        current_cost,
                        iterations,
                        TerminationReason::LambdaMaxExceeded,
                    ));
                }
                normal_equations = Some((jtj, jtr));
            }
        }
    }
}

fn sum_squares(v: &[f64]) -> f64 {
    v.iter().map(|r| r * r).sum()
}

/// Build `J^T J` and `J^T r`, skipping the zero entries of each Jacobian row.
fn build_normal_equations(jac: &[f64], residuals: &[f64], m: usize, n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut jtj = vec![0.0; n * n];
    let mut jtr = vec![0.0; n];
    let mut nonzero = Vec::with_capacity(n);

    for i in 0..m {
        let row = &jac[i * n..(i + 1) * n];
        nonzero.clear();
        nonzero.extend((0..n).filter(|&j| row[j] != 0.0));

        for (a, &ja) in nonzero.iter().enumerate() {
            let va = row[ja];
            jtr[ja] += va * residuals[i];
            for &jb in &nonzero[a..] {
                jtj[ja * n + jb] += va * row[jb];
            }
        }
    }

    // mirror the upper triangle
    for a in 0..n {
        for b in a + 1..n {
            jtj[b * n + a] = jtj[a * n + b];
        }
    }

    (jtj, jtr)
}

/// Solve `(J^T J + λ D) δ = -J^T r` with `D` the clamped diagonal of `J^T J`.
fn solve_damped_system(jtj: &[f64], jtr: &[f64], lambda: f64, n: usize) -> Option<Vec<f64>> {
    let h = faer::Mat::<f64>::from_fn(n, n, |i, j| {
        let v = jtj[i * n + j];
        if i == j {
            v + lambda * v.max(1e-9)
        } else {
            v
        }
    });
    let rhs = faer::Mat::<f64>::from_fn(n, 1, |i, _| -jtr[i]);

    let delta = h.partial_piv_lu().solve(rhs);
    let delta = (0..n).map(|i| delta.read(i, 0)).collect::<Vec<_>>();
    delta.iter().all(|v| v.is_finite()).then_some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Fit `y = a * exp(b * x)`.
    struct ExpFit {
        samples: Vec<(f64, f64)>,
    }

    impl LeastSquaresProblem for ExpFit {
        fn num_params(&self) -> usize {
            2
        }

        fn num_residuals(&self) -> usize {
            self.samples.len()
        }

        fn residuals(&self, params: &[f64], out: &mut [f64]) -> Result<(), CalibError> {
            for (r, (x, y)) in out.iter_mut().zip(self.samples.iter()) {
                *r = params[0] * (params[1] * x).exp() - y;
            }
            Ok(())
        }
    }

    /// The Rosenbrock function as a least squares problem.
    struct Rosenbrock;

    impl LeastSquaresProblem for Rosenbrock {
        fn num_params(&self) -> usize {
            2
        }

        fn num_residuals(&self) -> usize {
            2
        }

        fn residuals(&self, p: &[f64], out: &mut [f64]) -> Result<(), CalibError> {
            out[0] = 10.0 * (p[1] - p[0] * p[0]);
            out[1] = 1.0 - p[0];
            Ok(())
        }

        fn jacobian(&self, p: &[f64], jac: &mut [f64]) -> Result<(), CalibError> {
            jac.copy_from_slice(&[-20.0 * p[0], 10.0, -1.0, 0.0]);
            Ok(())
        }
    }

    #[test]
    fn test_lm_exponential_fit() -> Result<(), Box<dyn std::error::Error>> {
        let samples = (0..20)
            .map(|i| {
                let x = i as f64 * 0.1;
                (x, 2.0 * (-1.5 * x).exp())
            })
            .collect();
        let problem = ExpFit { samples };
        let mut params = [1.0, 0.0];

        let result = LevenbergMarquardt::new().optimize(&problem, &mut params)?;
        assert!(result.final_cost < 1e-10, "{result:?}");
        assert!(result.final_cost < result.initial_cost);
        assert_relative_eq!(params[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(params[1], -1.5, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn test_lm_rosenbrock() -> Result<(), Box<dyn std::error::Error>> {
        let mut params = [-1.2, 1.0];
        let lm = LevenbergMarquardt::new()
            .with_max_iterations(500)
            .with_step_tolerance(1e-12);
        let result = lm.optimize(&Rosenbrock, &mut params)?;
        assert_ne!(result.termination_reason, TerminationReason::MaxIterations);
        assert_relative_eq!(params[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(params[1], 1.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_lm_max_iterations() -> Result<(), Box<dyn std::error::Error>> {
        let mut params = [-1.2, 1.0];
        let lm = LevenbergMarquardt::new().with_max_iterations(1);
        let result = lm.optimize(&Rosenbrock, &mut params)?;
        assert_eq!(result.iterations, 1);
        assert_eq!(result.termination_reason, TerminationReason::MaxIterations);
        Ok(())
    }

    #[test]
    fn test_lm_rejects_empty_problem() {
        struct Empty;
        impl LeastSquaresProblem for Empty {
            fn num_params(&self) -> usize {
                0
            }
            fn num_residuals(&self) -> usize {
                0
            }
            fn residuals(&self, _: &[f64], _: &mut [f64]) -> Result<(), CalibError> {
                Ok(())
            }
        }
        let mut params: [f64; 0] = [];
        assert!(LevenbergMarquardt::new().optimize(&Empty, &mut params).is_err());
    }

    #[test]
    fn test_forward_difference_jacobian() -> Result<(), Box<dyn std::error::Error>> {
        let p = [0.5, 0.7];
        let mut numeric = [0.0; 4];
        forward_difference_jacobian(&Rosenbrock, &p, &mut numeric)?;
        let mut analytic = [0.0; 4];
        Rosenbrock.jacobian(&p, &mut analytic)?;
        for (a, b) in numeric.iter().zip(analytic.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
        Ok(())
    }
}
