//! (1+1)-Cholesky-CMA-ES, see Igel, Suttorp and Hansen,
//! "A computational efficient covariance matrix update and a (1+1)-CMA for evolution strategies" (2006)
use super::{feasibility_cmp, maximize_setup, Backend, Optimizer, Problem, RunState, WarmStart};
use crate::errors::{OptimError, Result};
use crate::types::{Constraints, OptimOutcome, TerminationReport};
use acqopt_space::SearchSpace;
use linfa_linalg::{cholesky::*, norm::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::{rand_distr::StandardNormal, RandomExt};
use rand_xoshiro::Xoshiro256Plus;
use std::cmp::Ordering;
use std::collections::VecDeque;

const P_TARGET: f64 = 2. / 11.;
const P_THRESH: f64 = 0.44;
const C_P: f64 = 1. / 12.;

/// Warm start of [`OnePlusOneCma`], unset fields keep their current value
#[derive(Clone, Debug, Default)]
pub struct CmaWarmStart {
    /// Parent point
    pub x: Option<Array1<f64>>,
    /// Step size
    pub sigma: Option<f64>,
    /// Covariance matrix of the search distribution (positive definite)
    pub cov: Option<Array2<f64>>,
}

/// (1+1)-Cholesky-CMA-ES working within box bounds, constraints being
/// handled by ranking points on their violation first, then on their value.
///
/// The first point asked is the parent itself when its value is unknown.
#[derive(Clone, Debug)]
pub struct OnePlusOneCma {
    state: RunState,
    xlimits: Array2<f64>,
    space: Option<SearchSpace>,
    constraints: Constraints,
    ftol: f64,
    xtol: f64,
    sigma: f64,
    x: Array1<f64>,
    /// (violation, score) of the parent once evaluated
    parent: Option<(f64, f64)>,
    /// Parent set by a warm start, not replaced by a seeded best point
    warm_x: bool,
    a: Array2<f64>,
    a_inv: Array2<f64>,
    p_succ: f64,
    pc: Array1<f64>,
    /// Steps of the pending offspring, in unit of sigma
    pending: Vec<Array1<f64>>,
    history: VecDeque<f64>,
    rng: Xoshiro256Plus,
}

impl OnePlusOneCma {
    /// Constructor given a (nx, 2) matrix \[\[lower bound, upper bound\], ...\],
    /// the parent is drawn uniformly within bounds
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Self {
        Self::new_with_rng(xlimits, Xoshiro256Plus::from_entropy())
    }

    /// Constructor given a search space, discrete variables are rounded to admissible values
    pub fn from_space(space: &SearchSpace) -> Self {
        let seed = space.with_rng(|rng| rng.gen::<u64>());
        let mut cma = Self::new_with_rng(&space.bounds(), Xoshiro256Plus::seed_from_u64(seed));
        if !space.is_continuous() {
            cma.x = space.round(&cma.x);
            cma.space = Some(space.clone());
        }
        cma
    }

    fn new_with_rng(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>, mut rng: Xoshiro256Plus) -> Self {
        let dim = xlimits.nrows();
        let lower = xlimits.column(0);
        let range = &xlimits.column(1) - &lower;
        let u = Array1::random_using(dim, ndarray_rand::rand_distr::Uniform::new(0., 1.), &mut rng);
        OnePlusOneCma {
            state: RunState::default(),
            xlimits: xlimits.to_owned(),
            space: None,
            constraints: Constraints::default(),
            ftol: 1e-12,
            xtol: 1e-12,
            sigma: 0.2,
            x: &lower + &(u * &range),
            parent: None,
            warm_x: false,
            a: Array2::from_diag(&range),
            a_inv: Array2::from_diag(&range.mapv(|r| 1. / r)),
            p_succ: P_TARGET,
            pc: Array1::zeros(dim),
            pending: vec![],
            history: VecDeque::new(),
            rng,
        }
    }

    /// Sets random generator seed for reproducibility
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = Xoshiro256Plus::seed_from_u64(seed);
        self
    }

    /// Sets the starting point
    pub fn x0(mut self, x0: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Self {
        self.x = self.project(x0.to_owned());
        self.parent = None;
        self
    }

    /// Sets the initial step size relative to the bounds range
    pub fn sigma0(mut self, sigma0: f64) -> Self {
        self.sigma = sigma0;
        self
    }

    /// Sets tolerance on the range of recent parent values
    pub fn ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    /// Sets tolerance on the step size
    pub fn xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    /// Sets equality and inequality constraints
    pub fn subject_to(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    fn dim(&self) -> usize {
        self.xlimits.nrows()
    }

    fn history_len(&self) -> usize {
        10 + 30 * self.dim()
    }

    fn project(&self, mut x: Array1<f64>) -> Array1<f64> {
        match &self.space {
            Some(space) => space.round(&x),
            None => {
                Zip::from(&mut x)
                    .and(self.xlimits.column(0))
                    .and(self.xlimits.column(1))
                    .for_each(|v, &lb, &ub| *v = v.clamp(lb, ub));
                x
            }
        }
    }

    /// Search distribution spread along its largest axis
    fn spread(&self) -> f64 {
        self.sigma
            * self
                .a
                .rows()
                .into_iter()
                .map(|row| row.norm_l2())
                .fold(0., f64::max)
    }

    fn push_history(&mut self, score: f64) {
        self.history.push_back(score);
        if self.history.len() > self.history_len() {
            self.history.pop_front();
        }
    }

    fn update_covariance(&mut self, step: &Array1<f64>) {
        let dim = self.dim() as f64;
        let c_c = 2. / (dim + 2.);
        let c_cov = 2. / (dim * dim + 6.);
        let alpha = if self.p_succ < P_THRESH {
            self.pc = (1. - c_c) * &self.pc + (c_c * (2. - c_c)).sqrt() * step;
            1. - c_cov
        } else {
            self.pc = (1. - c_c) * &self.pc;
            1. - c_cov + c_cov * c_c * (2. - c_c)
        };
        let w = self.a_inv.dot(&self.pc);
        let w2 = w.dot(&w);
        if w2 <= 0. || !w2.is_finite() {
            return;
        }
        let sa = alpha.sqrt();
        let r = (1. + c_cov / alpha * w2).sqrt();
        self.a = sa * &self.a + (sa / w2 * (r - 1.)) * outer(&self.pc, &w);
        let wa_inv = w.dot(&self.a_inv);
        self.a_inv = (1. / sa) * &self.a_inv - (1. / (sa * w2) * (1. - 1. / r)) * outer(&w, &wa_inv);
    }
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    a.view()
        .insert_axis(Axis(1))
        .dot(&b.view().insert_axis(Axis(0)))
}

impl Optimizer for OnePlusOneCma {
    fn name(&self) -> &'static str {
        "OnePlusOneCma"
    }

    fn state(&self) -> &RunState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    fn ask(&mut self, n_points: usize) -> Result<Array2<f64>> {
        if self.parent.is_none() {
            self.pending.clear();
            return Ok(self.x.clone().insert_axis(Axis(0)));
        }
        let dim = self.dim();
        let mut x = Array2::zeros((n_points, dim));
        self.pending.clear();
        for mut row in x.rows_mut() {
            let z = Array1::<f64>::random_using(dim, StandardNormal, &mut self.rng);
            let xi = self.project(&self.x + &(self.sigma * self.a.dot(&z)));
            self.pending.push((&xi - &self.x) / self.sigma);
            row.assign(&xi);
        }
        Ok(x)
    }

    fn tell(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if self.parent.is_some() && x.nrows() != self.pending.len() {
            return Err(OptimError::InvalidConfig(format!(
                "{} points asked, {} told",
                self.pending.len(),
                x.nrows()
            )));
        }
        self.state
            .record(x.view(), y.view(), Some(&self.constraints))?;
        let ranked: Vec<(f64, f64)> = x
            .rows()
            .into_iter()
            .zip(y.iter())
            .map(|(xi, &yi)| {
                (
                    self.constraints.violation(&xi.to_vec()),
                    self.state.score(yi),
                )
            })
            .collect();

        let Some(parent) = self.parent else {
            // parent evaluation
            let first = ranked.first().copied().ok_or_else(|| {
                OptimError::InvalidConfig("the starting point should be told".to_string())
            })?;
            self.parent = Some(first);
            self.push_history(first.1);
            return Ok(());
        };

        let (best, offspring) = ranked
            .iter()
            .enumerate()
            .min_by(|a, b| feasibility_cmp(*a.1, *b.1))
            .map(|(i, o)| (i, *o))
            .ok_or_else(|| OptimError::InvalidConfig("no point told".to_string()))?;

        let success = feasibility_cmp(offspring, parent) != Ordering::Greater;
        let dim = self.dim() as f64;
        let d = 1. + dim / 2.;
        self.p_succ = (1. - C_P) * self.p_succ + C_P * f64::from(u8::from(success));
        let sigma = self.sigma;
        self.sigma *= ((self.p_succ - P_TARGET) / (d * (1. - P_TARGET))).exp();

        if success {
            self.x = x.row(best).to_owned();
            self.parent = Some(offspring);
            let step = self.pending[best].clone();
            self.update_covariance(&step);
            self.state.debug(format_args!(
                "iter {} sigma = {:e} f = {}",
                self.state.eval_count(),
                sigma,
                y[best]
            ));
        }
        let score = self.parent.map_or(f64::NAN, |p| p.1);
        self.push_history(score);
        self.pending.clear();
        Ok(())
    }

    fn termination(&self) -> TerminationReport {
        let mut report = self.state.report();
        let spread = self.spread();
        if spread < self.xtol {
            report.xtol = Some(spread);
        }
        if self.history.len() >= self.history_len() {
            let (min, max) = self
                .history
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                });
            if max - min < self.ftol {
                report.ftol = Some(max - min);
            }
        }
        report
    }

    fn seed_best(&mut self, x: Array1<f64>, f: f64) {
        self.state.update_best(x.view(), f);
        if self.parent.is_none()
            && !self.warm_x
            && self.state.eval_count() == 0
            && x.len() == self.dim()
        {
            self.x = self.project(x);
            let violation = self.constraints.violation(&self.x.to_vec());
            self.parent = Some((violation, self.state.score(f)));
        }
    }

    fn warm_start(&mut self, warm_start: WarmStart) -> Result<()> {
        let ws = match warm_start {
            WarmStart::None => return Ok(()),
            WarmStart::Cma(ws) => ws,
            other => {
                return Err(OptimError::InvalidWarmStart {
                    optimizer: self.name(),
                    reason: format!("expected a Cma warm start, got {other:?}"),
                })
            }
        };
        let dim = self.dim();
        let invalid = |reason: String| OptimError::InvalidWarmStart {
            optimizer: "OnePlusOneCma",
            reason,
        };
        if let Some(sigma) = ws.sigma {
            if !(sigma > 0. && sigma.is_finite()) {
                return Err(invalid(format!("step size should be positive, got {sigma}")));
            }
        }
        if let Some(x) = &ws.x {
            if x.len() != dim {
                return Err(invalid(format!("x should have {dim} components, got {}", x.len())));
            }
        }
        let factors = match ws.cov {
            Some(cov) => {
                if cov.shape() != [dim, dim] {
                    return Err(invalid(format!(
                        "covariance shape {:?} should be [{dim}, {dim}]",
                        cov.shape()
                    )));
                }
                let a = cov
                    .cholesky()
                    .map_err(|err| invalid(format!("covariance not positive definite ({err})")))?;
                let a_inv = a.solve_triangular(&Array2::<f64>::eye(dim), UPLO::Lower)?;
                Some((a, a_inv))
            }
            None => None,
        };

        if let Some((a, a_inv)) = factors {
            self.a = a;
            self.a_inv = a_inv;
            self.pc = Array1::zeros(dim);
        }
        if let Some(sigma) = ws.sigma {
            self.sigma = sigma;
        }
        if let Some(x) = ws.x {
            self.x = self.project(x);
            self.parent = None;
            self.warm_x = true;
        }
        self.pending.clear();
        Ok(())
    }

    fn step_size(&self) -> Option<f64> {
        Some(self.sigma)
    }

    fn covariance(&self) -> Option<Array2<f64>> {
        Some(self.a.dot(&self.a.t()))
    }
}

/// Restart backend running [`OnePlusOneCma`] from the restart starting point
#[derive(Clone, Debug)]
pub struct CmaBackend {
    /// Tolerance on the range of recent parent values
    pub ftol: f64,
    /// Tolerance on the step size
    pub xtol: f64,
}

impl Default for CmaBackend {
    fn default() -> Self {
        CmaBackend {
            ftol: 1e-4,
            xtol: 1e-4,
        }
    }
}

impl Backend for CmaBackend {
    fn optimize(
        &mut self,
        problem: &Problem<'_>,
        x0: &Array1<f64>,
        max_evals: usize,
    ) -> Result<OptimOutcome> {
        let mut cma = OnePlusOneCma::from_space(problem.space)
            .x0(x0)
            .subject_to(problem.constraints.clone())
            .ftol(self.ftol)
            .xtol(self.xtol);
        cma.configure(maximize_setup(problem, max_evals, cma.name()));
        cma.run()
    }
}
