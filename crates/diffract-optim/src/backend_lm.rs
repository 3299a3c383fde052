use std::cell::RefCell;

use diffract_core::Real;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::debug;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};

use crate::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};

struct LmWrapper<'a, P: NllsProblem> {
    problem: &'a P,
    params: DVector<Real>,
    verbose: bool,
    cost_trace: RefCell<Vec<Real>>,
}

impl<P: NllsProblem> LmWrapper<'_, P> {
    /// The QR step needs at least as many rows as parameters; missing rows
    /// are zero and leave the cost unchanged.
    fn n_rows(&self) -> usize {
        self.problem.num_residuals().max(self.params.len())
    }
}

impl<'a, P: NllsProblem> LeastSquaresProblem<Real, Dyn, Dyn> for LmWrapper<'a, P> {
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, x: &DVector<Real>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<Real> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        let r = self
            .problem
            .residuals(&self.params)
            .resize_vertically(self.n_rows(), 0.0);
        let cost = 0.5 * r.norm();
        if self.verbose {
            debug!("lm: x = {:?}, 0.5·|r| = {cost:.6e}", self.params.as_slice());
        }
        self.cost_trace.borrow_mut().push(cost);
        Some(r)
    }

    // the Jacobian probes the problem directly so finite-difference
    // evaluations stay out of the cost trace
    fn jacobian(&self) -> Option<DMatrix<Real>> {
        Some(
            self.problem
                .jacobian(&self.params)
                .resize_vertically(self.n_rows(), 0.0),
        )
    }
}

#[derive(Debug, Default, Clone)]
pub struct LmBackend;

impl NllsSolverBackend for LmBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport) {
        let lm = LevenbergMarquardt::new()
            .with_ftol(opts.ftol)
            .with_xtol(opts.xtol)
            .with_gtol(opts.gtol)
            .with_patience(opts.max_iters.max(1));

        let wrapper = LmWrapper {
            problem,
            params: x0,
            verbose: opts.verbose,
            cost_trace: RefCell::new(Vec::new()),
        };

        let (wrapper, report) = lm.minimize(wrapper);
        let x_opt = wrapper.params();
        let termination = format!("{:?}", report.termination);
        debug!(
            "lm: {termination} after {} evaluations, cost {:.6e}",
            report.number_of_evaluations, report.objective_function
        );

        (
            x_opt,
            SolveReport {
                iterations: report.number_of_evaluations,
                final_cost: report.objective_function,
                converged: report.termination.was_successful(),
                termination,
                cost_trace: wrapper.cost_trace.into_inner(),
            },
        )
    }
}
