use diffract_core::Real;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::numdiff::central_difference;

/// Generic non-linear least squares problem with dense parameter/residual vectors.
///
/// Only the residuals are mandatory; the default Jacobian is a central finite
/// difference of [`NllsProblem::residuals`].
pub trait NllsProblem {
    /// Number of parameters in the optimization vector.
    fn num_params(&self) -> usize;
    /// Number of residual rows in the problem.
    fn num_residuals(&self) -> usize;

    /// Residuals for the given parameters.
    fn residuals(&self, x: &DVector<Real>) -> DVector<Real>;

    /// Jacobian of the residuals (rows: residuals, columns: parameters).
    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        central_difference(|p| self.residuals(p), x)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Maximum number of solver iterations before termination.
    ///
    /// The LM backend follows the MINPACK convention and allows
    /// `max_iters * (n + 1)` residual evaluations.
    pub max_iters: usize,
    /// Relative tolerance on the objective (cost) reduction.
    pub ftol: Real,
    /// Orthogonality/gradient tolerance.
    pub gtol: Real,
    /// Relative tolerance on parameter updates.
    pub xtol: Real,
    /// Log every residual evaluation at debug level.
    pub verbose: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            ftol: 1e-10,
            gtol: 1e-10,
            xtol: 1e-10,
            verbose: false,
        }
    }
}

impl SolveOptions {
    /// Use one tolerance for parameter step, residual reduction and gradient.
    pub fn with_tolerance(mut self, tolerance: Real) -> Self {
        self.ftol = tolerance;
        self.xtol = tolerance;
        self.gtol = tolerance;
        self
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SolveReport {
    /// Number of residual evaluations.
    pub iterations: usize,
    /// `0.5 · ‖r‖²` at the returned parameters.
    pub final_cost: Real,
    pub converged: bool,
    /// Human-readable termination reason reported by the backend.
    pub termination: String,
    /// `0.5 · ‖r‖` after every residual evaluation, in call order.
    pub cost_trace: Vec<Real>,
}

pub trait NllsSolverBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport);
}
