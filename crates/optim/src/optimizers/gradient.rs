use super::{Backend, Problem};
use crate::errors::{OptimError, Result};
use crate::types::{OptimOutcome, TerminationReport};
use acqopt_space::SearchSpace;
use ndarray::{arr1, Array1};
use std::cell::Cell;

/// Bound constrained gradient-based optimizer (SLSQP without constraints)
///
/// Values are maximized by minimizing the negated objective with the
/// negated gradient, the analytic one when given, central finite differences otherwise.
#[derive(Clone, Debug)]
pub struct GradientBox {
    /// Relative tolerance on objective decrease
    pub ftol_rel: f64,
    /// Absolute tolerance on objective decrease
    pub ftol_abs: f64,
}

impl Default for GradientBox {
    fn default() -> Self {
        GradientBox {
            ftol_rel: 1e6 * f64::EPSILON,
            ftol_abs: 1e-8,
        }
    }
}

/// Checks that every variable of `space` is continuous
pub(crate) fn check_continuous(space: &SearchSpace) -> Result<()> {
    match space.xtypes().iter().enumerate().find(|(_, xt)| !xt.is_float()) {
        Some((index, xtype)) => Err(OptimError::InvalidVariableType {
            index,
            xtype: xtype.clone(),
        }),
        None => Ok(()),
    }
}

impl Backend for GradientBox {
    fn optimize(
        &mut self,
        problem: &Problem<'_>,
        x0: &Array1<f64>,
        max_evals: usize,
    ) -> Result<OptimOutcome> {
        check_continuous(problem.space)?;
        let logger = problem.logger.map(|l| l.named("GradientBox"));
        let objective = problem.objective;
        let dim = problem.space.dim();
        let fd_calls = if objective.has_gradient() { 0 } else { 2 * dim };
        // slsqp counts objective calls, each one may request a gradient
        let maxeval = (max_evals / (fd_calls + 1)).max(1);

        let funcalls = Cell::new(0usize);
        let fun = |x: &[f64], gradient: Option<&mut [f64]>, _u: &mut ()| -> f64 {
            if let Some(gradient) = gradient {
                let grad = objective.gradient(x);
                gradient
                    .iter_mut()
                    .zip(grad)
                    .for_each(|(g, v)| *g = -v);
                funcalls.set(funcalls.get() + fd_calls);
            }
            funcalls.set(funcalls.get() + 1);
            -objective.value(x)
        };
        let cons: Vec<fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64> = vec![];

        let xinit = problem.space.round(x0).to_vec();
        let bounds: Vec<_> = problem
            .space
            .bounds()
            .outer_iter()
            .map(|row| (row[0], row[1]))
            .collect();
        let res = slsqp::minimize(
            fun,
            &xinit,
            &bounds,
            &cons,
            (),
            maxeval,
            Some(slsqp::StopTols {
                ftol_rel: self.ftol_rel,
                ftol_abs: self.ftol_abs,
                ..slsqp::StopTols::default()
            }),
        );
        let (x_opt, y_opt, abnormal) = match res {
            Ok((_, x_opt, y_opt)) => (x_opt, y_opt, None),
            Err((status, x_opt, y_opt)) => {
                if let Some(logger) = &logger {
                    logger.debug(format_args!("abnormal termination: {status:?}"));
                }
                (x_opt, y_opt, Some(format!("{status:?}")))
            }
        };
        let y_opt = if y_opt.is_finite() {
            -y_opt
        } else {
            funcalls.set(funcalls.get() + 1);
            objective.value(&x_opt)
        };
        let funcalls = funcalls.get();
        Ok(OptimOutcome {
            x_opt: arr1(&x_opt),
            y_opt,
            report: TerminationReport {
                funcalls,
                max_evals: (funcalls >= max_evals).then_some(max_evals),
                abnormal,
                ..Default::default()
            },
        })
    }
}
