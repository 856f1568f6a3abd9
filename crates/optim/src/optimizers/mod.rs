//! Optimizers driven by the multistart optimization and the optimizer pipeline
//!
//! Every optimizer implements the ask/tell [`Optimizer`] contract, the ones usable
//! from a random restart implement the run-once [`Backend`] contract.

mod cmaes;
mod gradient;
mod mies;
mod random;

pub use cmaes::*;
pub use gradient::*;
pub use mies::*;
pub use random::*;

pub(crate) use gradient::check_continuous;

use crate::errors::{OptimError, Result};
use crate::types::{Constraints, Objective, OptimOutcome, TerminationReport};
use crate::Logger;
use acqopt_space::SearchSpace;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::cmp::Ordering;
use std::fmt::Display;

/// Settings shared by the caller with the optimizer it drives
#[derive(Clone, Debug)]
pub struct Setup {
    /// Objective function
    pub objective: Objective,
    /// Value which once reached stops the optimizer
    pub target: Option<f64>,
    /// Whether the objective is minimized (otherwise maximized)
    pub minimize: bool,
    /// Evaluation budget
    pub max_evals: usize,
    /// Whether progress is reported at info level
    pub verbose: bool,
    /// Logger handle
    pub logger: Option<Logger>,
}

impl Setup {
    /// Setup to minimize `objective` within `max_evals` evaluations
    pub fn new(objective: Objective, max_evals: usize) -> Self {
        Setup {
            objective,
            target: None,
            minimize: true,
            max_evals,
            verbose: false,
            logger: None,
        }
    }
}

/// Bookkeeping common to all optimizers: settings, evaluation count and best point.
///
/// Values are stored in the caller convention, `score` gives the
/// minimization convention used by optimizers internally.
#[derive(Clone, Debug)]
pub struct RunState {
    objective: Option<Objective>,
    target: Option<f64>,
    minimize: bool,
    max_evals: usize,
    verbose: bool,
    logger: Option<Logger>,
    eval_count: usize,
    xopt: Option<Array1<f64>>,
    fopt: f64,
    best_violation: f64,
}

impl Default for RunState {
    fn default() -> Self {
        RunState {
            objective: None,
            target: None,
            minimize: true,
            max_evals: usize::MAX,
            verbose: false,
            logger: None,
            eval_count: 0,
            xopt: None,
            fopt: f64::NAN,
            best_violation: 0.,
        }
    }
}

impl RunState {
    /// Applies caller settings
    pub fn configure(&mut self, setup: Setup) {
        self.objective = Some(setup.objective);
        self.target = setup.target;
        self.minimize = setup.minimize;
        self.max_evals = setup.max_evals;
        self.verbose = setup.verbose;
        self.logger = setup.logger;
    }

    /// Objective function of an optimizer named `name`
    pub fn objective(&self, name: &'static str) -> Result<&Objective> {
        self.objective.as_ref().ok_or(OptimError::NotConfigured(name))
    }

    /// Whether the objective is minimized
    pub fn minimize(&self) -> bool {
        self.minimize
    }

    /// Evaluation budget
    pub fn max_evals(&self) -> usize {
        self.max_evals
    }

    /// Sets evaluation budget
    pub fn set_max_evals(&mut self, max_evals: usize) {
        self.max_evals = max_evals;
    }

    /// Number of evaluations told so far
    pub fn eval_count(&self) -> usize {
        self.eval_count
    }

    /// Value in minimization convention
    pub fn score(&self, f: f64) -> f64 {
        if self.minimize {
            f
        } else {
            -f
        }
    }

    /// Best point and value found so far
    pub fn best(&self) -> Option<(Array1<f64>, f64)> {
        self.xopt.as_ref().map(|x| (x.to_owned(), self.fopt))
    }

    /// Updates best point if feasible `x` valued `f` improves on it, returns whether it does
    pub fn update_best(&mut self, x: ArrayView1<f64>, f: f64) -> bool {
        self.update_ranked(x, f, 0.)
    }

    fn update_ranked(&mut self, x: ArrayView1<f64>, f: f64, violation: f64) -> bool {
        let improved = match self.xopt {
            None => true,
            Some(_) => {
                feasibility_cmp(
                    (violation, self.score(f)),
                    (self.best_violation, self.score(self.fopt)),
                ) == Ordering::Less
            }
        };
        if improved {
            self.xopt = Some(x.to_owned());
            self.fopt = f;
            self.best_violation = violation;
        }
        improved
    }

    /// Accounts for evaluated points `x` (one per row) and their values `y`,
    /// feasible points being preferred when constraints are given
    pub fn record(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        constraints: Option<&Constraints>,
    ) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(OptimError::InvalidConfig(format!(
                "{} points told with {} values",
                x.nrows(),
                y.len()
            )));
        }
        self.eval_count += y.len();
        for (xi, &yi) in x.rows().into_iter().zip(y.iter()) {
            let violation = constraints.map_or(0., |c| c.violation(&xi.to_vec()));
            self.update_ranked(xi, yi, violation);
        }
        Ok(())
    }

    /// Stop criteria common to all optimizers: budget and target
    pub fn report(&self) -> TerminationReport {
        let target_reached = match (self.target, &self.xopt) {
            (Some(target), Some(_)) => self.score(self.fopt) <= self.score(target),
            _ => false,
        };
        TerminationReport {
            funcalls: self.eval_count,
            max_evals: (self.eval_count >= self.max_evals).then_some(self.max_evals),
            ftarget: target_reached.then_some(self.fopt),
            ..Default::default()
        }
    }

    /// Logs at debug level when a logger is given
    pub fn debug(&self, msg: impl Display) {
        if let Some(logger) = &self.logger {
            logger.debug(msg);
        }
    }

    /// Logs at info level when verbose and a logger is given
    pub fn info(&self, msg: impl Display) {
        if let (true, Some(logger)) = (self.verbose, &self.logger) {
            logger.info(msg);
        }
    }
}

/// Orders `(violation, score)` pairs: least violation first, then least score,
/// NaN counting as the worst value
pub(crate) fn feasibility_cmp(a: (f64, f64), b: (f64, f64)) -> Ordering {
    let key = |v: f64| if v.is_nan() { f64::INFINITY } else { v };
    key(a.0)
        .total_cmp(&key(b.0))
        .then(key(a.1).total_cmp(&key(b.1)))
}

/// Starting state handed over to an optimizer by a pipeline stage transfer
#[derive(Clone, Debug, Default)]
pub enum WarmStart {
    /// Default start
    #[default]
    None,
    /// Warm start of [`OnePlusOneCma`]
    Cma(CmaWarmStart),
    /// Warm start of [`Mies`]
    Mies(MiesWarmStart),
}

impl WarmStart {
    fn kind(&self) -> &'static str {
        match self {
            WarmStart::None => "None",
            WarmStart::Cma(_) => "Cma",
            WarmStart::Mies(_) => "Mies",
        }
    }
}

/// An optimizer following the ask/tell protocol
///
/// The caller asks for points, evaluates them and tells the values back until
/// [`Optimizer::check_stop`] holds.
pub trait Optimizer {
    /// Name used in logs and errors
    fn name(&self) -> &'static str;

    /// Common bookkeeping
    fn state(&self) -> &RunState;

    /// Common bookkeeping
    fn state_mut(&mut self) -> &mut RunState;

    /// Returns `n_points` points to be evaluated (one per row)
    fn ask(&mut self, n_points: usize) -> Result<Array2<f64>>;

    /// Feeds values `y` of asked points `x` back
    fn tell(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    /// Current stop criteria
    fn termination(&self) -> TerminationReport {
        self.state().report()
    }

    /// Whether the optimizer wants to stop, has no side effect
    fn check_stop(&self) -> bool {
        self.termination().is_stopped()
    }

    /// Applies caller settings
    fn configure(&mut self, setup: Setup) {
        self.state_mut().configure(setup)
    }

    /// Evaluates the objective function on each row of `x`
    fn evaluate(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.state().objective(self.name())?.values(x))
    }

    /// Number of evaluations consumed so far
    fn eval_count(&self) -> usize {
        self.state().eval_count()
    }

    /// Sets evaluation budget
    fn set_max_evals(&mut self, max_evals: usize) {
        self.state_mut().set_max_evals(max_evals)
    }

    /// Best point and value found so far
    fn best(&self) -> Option<(Array1<f64>, f64)> {
        self.state().best()
    }

    /// Seeds best point and value, typically with the result of a previous optimizer
    fn seed_best(&mut self, x: Array1<f64>, f: f64) {
        self.state_mut().update_best(x.view(), f);
    }

    /// Sets a non default starting state
    fn warm_start(&mut self, warm_start: WarmStart) -> Result<()> {
        match warm_start {
            WarmStart::None => Ok(()),
            other => Err(OptimError::InvalidWarmStart {
                optimizer: self.name(),
                reason: format!("{} warm start not supported", other.kind()),
            }),
        }
    }

    /// Current step size, if any
    fn step_size(&self) -> Option<f64> {
        None
    }

    /// Current covariance of the search distribution, if any
    fn covariance(&self) -> Option<Array2<f64>> {
        None
    }

    /// Current population, if any
    fn population(&self) -> Option<Array2<f64>> {
        None
    }

    /// Runs ask/evaluate/tell iterations until a stop criterion is met
    fn run(&mut self) -> Result<OptimOutcome> {
        while !self.check_stop() {
            let x = self.ask(1)?;
            let y = self.evaluate(&x)?;
            self.tell(&x, &y)?;
        }
        let report = self.termination();
        let (x_opt, y_opt) = self.best().ok_or_else(|| {
            OptimError::InvalidConfig(format!("{} stopped before any evaluation", self.name()))
        })?;
        self.state()
            .debug(format_args!("{} stopped: {:?}", self.name(), report));
        Ok(OptimOutcome {
            x_opt,
            y_opt,
            report,
        })
    }
}

/// The problem solved from each restart of the multistart optimization
#[derive(Clone, Copy, Debug)]
pub struct Problem<'a> {
    /// Objective function, maximized
    pub objective: &'a Objective,
    /// Search space
    pub space: &'a SearchSpace,
    /// Constraints in positional form
    pub constraints: &'a Constraints,
    /// Logger handle
    pub logger: Option<&'a Logger>,
}

/// An optimizer run once from a given starting point within an evaluation budget,
/// values are maximized.
pub trait Backend {
    /// Maximizes the problem objective starting from `x0`
    fn optimize(
        &mut self,
        problem: &Problem<'_>,
        x0: &Array1<f64>,
        max_evals: usize,
    ) -> Result<OptimOutcome>;
}

/// Setup used by backends implemented over an [`Optimizer`]
pub(crate) fn maximize_setup(problem: &Problem<'_>, max_evals: usize, name: &str) -> Setup {
    Setup {
        objective: problem.objective.clone(),
        target: None,
        minimize: false,
        max_evals,
        verbose: false,
        logger: problem.logger.map(|l| l.named(name)),
    }
}
