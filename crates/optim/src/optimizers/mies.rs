//! Mixed-integer evolution strategy, see Li, Emmerich et al.,
//! "Mixed integer evolution strategies for parameter optimization" (2013)
use super::{feasibility_cmp, maximize_setup, Backend, Optimizer, Problem, RunState, WarmStart};
use crate::errors::{OptimError, Result};
use crate::types::{Constraints, OptimOutcome, TerminationReport};
use acqopt_space::{Sampling, SearchSpace, XType};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1};
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256Plus;
use std::cmp::Ordering;

/// Warm start of [`Mies`], unset fields keep their current value
#[derive(Clone, Debug, Default)]
pub struct MiesWarmStart {
    /// Initial population (one point per row), evaluated first
    pub population: Option<Array2<f64>>,
    /// Initial step size relative to the variable ranges
    pub sigma: Option<f64>,
}

#[derive(Clone, Debug)]
struct Individual {
    x: Array1<f64>,
    /// Per variable: step size of a float, mean step of an ordinal, mutation probability of a category
    strategy: Array1<f64>,
    /// (violation, score)
    fitness: (f64, f64),
}

/// (mu + lambda) mixed-integer evolution strategy
///
/// Floats are mutated with self-adapted gaussian steps, ordinals (integers and
/// ordered levels) with the difference of two geometric variables, categories
/// are resampled with a self-adapted probability. Points are ranked on their
/// constraint violation first, then on their value.
///
/// The first points asked are the initial population, of size `mu`.
#[derive(Clone, Debug)]
pub struct Mies {
    state: RunState,
    space: SearchSpace,
    constraints: Constraints,
    mu: usize,
    lambda: usize,
    sigma0: f64,
    wait_iter: usize,
    x0: Option<Array1<f64>>,
    seeded: Option<Vec<Array1<f64>>>,
    parents: Vec<Individual>,
    offspring: Vec<Individual>,
    pending: Vec<Individual>,
    stagnation: usize,
    rng: Xoshiro256Plus,
}

impl Mies {
    /// Constructor given the search space
    pub fn new(space: &SearchSpace) -> Self {
        let seed = space.with_rng(|rng| rng.gen::<u64>());
        Mies {
            state: RunState::default(),
            space: space.clone(),
            constraints: Constraints::default(),
            mu: 4,
            lambda: 10,
            sigma0: 0.2,
            wait_iter: 20,
            x0: None,
            seeded: None,
            parents: vec![],
            offspring: vec![],
            pending: vec![],
            stagnation: 0,
            rng: Xoshiro256Plus::seed_from_u64(seed),
        }
    }

    /// Sets random generator seed for reproducibility
    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = Xoshiro256Plus::seed_from_u64(seed);
        self
    }

    /// Sets a point of the initial population
    pub fn x0(mut self, x0: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Self {
        self.x0 = Some(self.space.round(x0));
        self
    }

    /// Sets the number of parents
    pub fn mu(mut self, mu: usize) -> Self {
        self.mu = mu.max(1);
        self
    }

    /// Sets the number of offspring per generation
    pub fn lambda(mut self, lambda: usize) -> Self {
        self.lambda = lambda.max(1);
        self
    }

    /// Sets the initial step size relative to the variable ranges
    pub fn sigma0(mut self, sigma0: f64) -> Self {
        self.sigma0 = sigma0;
        self
    }

    /// Sets the number of generations without improvement before stopping
    pub fn stall(mut self, wait_iter: usize) -> Self {
        self.wait_iter = wait_iter;
        self
    }

    /// Sets equality and inequality constraints
    pub fn subject_to(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    fn initial_strategy(&self) -> Array1<f64> {
        let n_cat = self
            .space
            .xtypes()
            .iter()
            .filter(|xt| xt.is_categorical())
            .count()
            .max(1);
        self.space
            .xtypes()
            .iter()
            .map(|xtype| match xtype {
                XType::Float(lb, ub) => self.sigma0 * (ub - lb),
                XType::Int(lb, ub) => (self.sigma0 * (ub - lb) as f64).max(1.),
                XType::Ord(levels) => (self.sigma0 * (levels.len() - 1) as f64).max(1.),
                XType::Enum(_) => (1. / n_cat as f64).min(0.5),
            })
            .collect()
    }

    fn initial_population(&mut self) -> Vec<Individual> {
        let xs = match self.seeded.take() {
            Some(xs) => xs,
            None => {
                let mut xs: Vec<Array1<f64>> = self.x0.iter().cloned().collect();
                let samples = self.space.sample(self.mu - xs.len().min(self.mu), Sampling::Lhs);
                xs.extend(samples.rows().into_iter().map(|row| row.to_owned()));
                xs
            }
        };
        let strategy = self.initial_strategy();
        xs.into_iter()
            .map(|x| Individual {
                x,
                strategy: strategy.clone(),
                fitness: (f64::NAN, f64::NAN),
            })
            .collect()
    }

    /// Discrete recombination of the variables, intermediate one of the strategy parameters
    fn recombine(&mut self) -> Individual {
        let n = self.parents.len();
        let a = &self.parents[self.rng.gen_range(0..n)];
        let b = &self.parents[self.rng.gen_range(0..n)];
        let x = a
            .x
            .iter()
            .zip(b.x.iter())
            .map(|(&xa, &xb)| if self.rng.gen::<bool>() { xa } else { xb })
            .collect();
        Individual {
            x,
            strategy: (&a.strategy + &b.strategy) / 2.,
            fitness: (f64::NAN, f64::NAN),
        }
    }

    fn mutate(&mut self, ind: &mut Individual) {
        let xtypes = self.space.xtypes();
        let count = |pred: fn(&XType) -> bool| xtypes.iter().filter(|xt| pred(xt)).count() as f64;
        let (n_float, n_ord, n_cat) = (
            count(XType::is_float),
            count(XType::is_ordinal),
            count(XType::is_categorical),
        );
        let taus = |n: f64| (1. / (2. * n).sqrt(), 1. / (2. * n.sqrt()).sqrt());
        let (tau_glob_f, tau_f) = taus(n_float);
        let (tau_glob_o, tau_o) = taus(n_ord);
        let tau_c = 1. / (2. * n_cat).sqrt();
        let g_f: f64 = self.rng.sample(StandardNormal);
        let g_o: f64 = self.rng.sample(StandardNormal);

        for (i, xtype) in xtypes.iter().enumerate() {
            let n: f64 = self.rng.sample(StandardNormal);
            match xtype {
                XType::Float(lb, ub) => {
                    let sigma = (ind.strategy[i] * (tau_glob_f * g_f + tau_f * n).exp())
                        .max(1e-12 * (ub - lb));
                    let step: f64 = self.rng.sample(StandardNormal);
                    ind.strategy[i] = sigma;
                    ind.x[i] = (ind.x[i] + sigma * step).clamp(*lb, *ub);
                }
                XType::Int(lb, ub) => {
                    let eta = (ind.strategy[i] * (tau_glob_o * g_o + tau_o * n).exp()).max(1.);
                    ind.strategy[i] = eta;
                    let step = geometric_step(&mut self.rng, eta / n_ord);
                    ind.x[i] = (ind.x[i] + step as f64).clamp(*lb as f64, *ub as f64);
                }
                XType::Ord(levels) => {
                    let eta = (ind.strategy[i] * (tau_glob_o * g_o + tau_o * n).exp()).max(1.);
                    ind.strategy[i] = eta;
                    let step = geometric_step(&mut self.rng, eta / n_ord);
                    let idx = closest_level(levels, ind.x[i]) as i64 + step;
                    ind.x[i] = levels[idx.clamp(0, levels.len() as i64 - 1) as usize];
                }
                XType::Enum(n_levels) => {
                    let pm = ind.strategy[i];
                    let pm = (1. / (1. + (1. - pm) / pm * (-tau_c * n).exp()))
                        .clamp(1. / (3. * n_cat), 0.5);
                    ind.strategy[i] = pm;
                    if *n_levels > 1 && self.rng.gen::<f64>() < pm {
                        let current = ind.x[i] as usize;
                        let k = self.rng.gen_range(0..n_levels - 1);
                        let level = if k >= current { k + 1 } else { k };
                        ind.x[i] = level as f64;
                    }
                }
            }
        }
    }

    fn select(&mut self) {
        let previous = self.parents[0].fitness;
        let mut pool = std::mem::take(&mut self.parents);
        pool.append(&mut self.offspring);
        pool.sort_by(|a, b| feasibility_cmp(a.fitness, b.fitness));
        pool.truncate(self.mu);
        self.parents = pool;
        if feasibility_cmp(self.parents[0].fitness, previous) == Ordering::Less {
            self.stagnation = 0;
        } else {
            self.stagnation += 1;
        }
        self.state.debug(format_args!(
            "iter {} best (violation, f) = {:?}",
            self.state.eval_count(),
            self.parents[0].fitness
        ));
    }
}

/// Difference of two geometric variables of mean step `s`
fn geometric_step(rng: &mut Xoshiro256Plus, s: f64) -> i64 {
    let p = 1. - s / (1. + (1. + s * s).sqrt());
    let mut geometric = || {
        let u: f64 = rng.gen();
        ((1. - u).ln() / (1. - p).ln()).floor() as i64
    };
    geometric() - geometric()
}

fn closest_level(levels: &[f64], val: f64) -> usize {
    levels
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - val).abs().total_cmp(&(b.1 - val).abs()))
        .map_or(0, |(i, _)| i)
}

fn stack(inds: &[Individual], dim: usize) -> Array2<f64> {
    let mut x = Array2::zeros((inds.len(), dim));
    for (mut row, ind) in x.rows_mut().into_iter().zip(inds) {
        row.assign(&ind.x);
    }
    x
}

impl Optimizer for Mies {
    fn name(&self) -> &'static str {
        "Mies"
    }

    fn state(&self) -> &RunState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    fn ask(&mut self, n_points: usize) -> Result<Array2<f64>> {
        if self.parents.is_empty() {
            if self.pending.is_empty() {
                self.pending = self.initial_population();
            }
        } else {
            let mut children = Vec::with_capacity(n_points);
            for _ in 0..n_points {
                let mut child = self.recombine();
                self.mutate(&mut child);
                children.push(child);
            }
            self.pending = children;
        }
        Ok(stack(&self.pending, self.space.dim()))
    }

    fn tell(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if x.nrows() != self.pending.len() {
            return Err(OptimError::InvalidConfig(format!(
                "{} points asked, {} told",
                self.pending.len(),
                x.nrows()
            )));
        }
        self.state
            .record(x.view(), y.view(), Some(&self.constraints))?;
        let mut told = std::mem::take(&mut self.pending);
        for ((ind, xi), &yi) in told.iter_mut().zip(x.rows()).zip(y.iter()) {
            ind.x = xi.to_owned();
            ind.fitness = (
                self.constraints.violation(&ind.x.to_vec()),
                self.state.score(yi),
            );
        }
        if self.parents.is_empty() {
            told.sort_by(|a, b| feasibility_cmp(a.fitness, b.fitness));
            told.truncate(self.mu);
            self.parents = told;
            return Ok(());
        }
        self.offspring.extend(told);
        if self.offspring.len() >= self.lambda {
            self.select();
        }
        Ok(())
    }

    fn termination(&self) -> TerminationReport {
        let mut report = self.state.report();
        if self.stagnation >= self.wait_iter {
            report.stagnation = Some(self.stagnation);
        }
        report
    }

    fn seed_best(&mut self, x: Array1<f64>, f: f64) {
        self.state.update_best(x.view(), f);
        if self.parents.is_empty() && self.pending.is_empty() && x.len() == self.space.dim() {
            self.x0 = Some(self.space.round(&x));
        }
    }

    fn warm_start(&mut self, warm_start: WarmStart) -> Result<()> {
        let ws = match warm_start {
            WarmStart::None => return Ok(()),
            WarmStart::Mies(ws) => ws,
            other => {
                return Err(OptimError::InvalidWarmStart {
                    optimizer: self.name(),
                    reason: format!("expected a Mies warm start, got {other:?}"),
                })
            }
        };
        if let Some(sigma) = ws.sigma {
            if !(sigma > 0. && sigma.is_finite()) {
                return Err(OptimError::InvalidWarmStart {
                    optimizer: self.name(),
                    reason: format!("step size should be positive, got {sigma}"),
                });
            }
        }
        if let Some(population) = &ws.population {
            if population.nrows() == 0 || population.ncols() != self.space.dim() {
                return Err(OptimError::InvalidWarmStart {
                    optimizer: self.name(),
                    reason: format!(
                        "population shape {:?} should be [n > 0, {}]",
                        population.shape(),
                        self.space.dim()
                    ),
                });
            }
        }

        if let Some(sigma) = ws.sigma {
            self.sigma0 = sigma;
            let strategy = self.initial_strategy();
            for ind in self.parents.iter_mut() {
                ind.strategy = strategy.clone();
            }
        }
        if let Some(population) = ws.population {
            self.seeded = Some(
                population
                    .rows()
                    .into_iter()
                    .map(|row| self.space.round(&row))
                    .collect(),
            );
            self.parents.clear();
            self.offspring.clear();
            self.pending.clear();
            self.stagnation = 0;
        }
        Ok(())
    }

    fn population(&self) -> Option<Array2<f64>> {
        (!self.parents.is_empty()).then(|| stack(&self.parents, self.space.dim()))
    }
}

/// Restart backend running [`Mies`] from the restart starting point
#[derive(Clone, Debug)]
pub struct MiesBackend {
    /// Number of parents
    pub mu: usize,
    /// Number of offspring per generation
    pub lambda: usize,
    /// Number of generations without improvement before stopping
    pub wait_iter: usize,
}

impl Default for MiesBackend {
    fn default() -> Self {
        MiesBackend {
            mu: 4,
            lambda: 10,
            wait_iter: 20,
        }
    }
}

impl Backend for MiesBackend {
    fn optimize(
        &mut self,
        problem: &Problem<'_>,
        x0: &Array1<f64>,
        max_evals: usize,
    ) -> Result<OptimOutcome> {
        let mut mies = Mies::new(problem.space)
            .x0(x0)
            .mu(self.mu)
            .lambda(self.lambda)
            .stall(self.wait_iter)
            .subject_to(problem.constraints.clone());
        mies.configure(maximize_setup(problem, max_evals, mies.name()));
        mies.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizers::Setup;
    use crate::types::{CstrFn, Objective};
    use ndarray::array;
    use std::sync::Arc;

    fn mixed_space() -> SearchSpace {
        SearchSpace::new(&[
            XType::Float(-5., 5.),
            XType::Int(-5, 5),
            XType::Ord(vec![0.1, 0.5, 1., 5.]),
            XType::Enum(3),
        ])
        .unwrap()
        .with_seed(42)
    }

    fn mixed_objective() -> Objective {
        Objective::new(|x: &[f64]| {
            (x[0] - 1.).powi(2) + (x[1] - 2.).powi(2) + (x[2] - 1.).abs() + f64::from(x[3] != 1.)
        })
    }

    #[test]
    fn test_mies_mixed_minimization() {
        let mut mies = Mies::new(&mixed_space()).seed(0);
        mies.configure(Setup::new(mixed_objective(), 2000));
        let res = mies.run().expect("MIES minimization");
        assert!(res.y_opt < 0.1, "f = {} at {}", res.y_opt, res.x_opt);
        assert_eq!(res.x_opt[1], 2.);
        assert_eq!(res.x_opt[2], 1.);
        assert_eq!(res.x_opt[3], 1.);
    }

    #[test]
    fn test_mies_points_are_admissible() {
        let space = mixed_space();
        let mut mies = Mies::new(&space).seed(1).x0(&array![0., 0., 0.5, 2.]);
        mies.configure(Setup::new(mixed_objective(), 200));
        let mut x = mies.ask(1).unwrap();
        assert_eq!(x.nrows(), 4);
        assert_eq!(x.row(0), array![0., 0., 0.5, 2.]);
        for _ in 0..15 {
            assert!(x.rows().into_iter().all(|xi| space.contains(&xi)));
            let y = mies.evaluate(&x).unwrap();
            mies.tell(&x, &y).unwrap();
            x = mies.ask(3).unwrap();
            assert_eq!(x.nrows(), 3);
        }
        assert_eq!(mies.population().unwrap().nrows(), 4);
    }

    #[test]
    fn test_mies_constrained() {
        let space = SearchSpace::new(&[XType::Float(-5., 5.), XType::Int(-5, 5)])
            .unwrap()
            .with_seed(3);
        let g: CstrFn = Arc::new(|x: &[f64]| vec![1. - x[1]]);
        let mut mies = Mies::new(&space)
            .seed(3)
            .subject_to(Constraints::new(None, Some(g)));
        mies.configure(Setup::new(
            Objective::new(|x: &[f64]| argmin_testfunctions::sphere(x)),
            1000,
        ));
        let res = mies.run().expect("MIES constrained minimization");
        assert!(res.x_opt[1] >= 1.);
    }

    #[test]
    fn test_mies_stagnation() {
        let space = SearchSpace::new(&[XType::Enum(2)]).unwrap().with_seed(0);
        let mut mies = Mies::new(&space).stall(3);
        mies.configure(Setup::new(Objective::new(|_: &[f64]| 1.), 10_000));
        let res = mies.run().unwrap();
        assert_eq!(res.report.stagnation, Some(3));
        assert_eq!(res.report.funcalls, 4 + 3 * 10);
    }

    #[test]
    fn test_mies_warm_start() {
        let space = mixed_space();
        let mut mies = Mies::new(&space);
        let population = array![[0.2, 1.2, 0.4, 0.], [1., 2., 5., 2.]];
        mies.warm_start(WarmStart::Mies(MiesWarmStart {
            population: Some(population),
            sigma: Some(0.1),
        }))
        .unwrap();
        assert_eq!(
            mies.ask(1).unwrap(),
            array![[0.2, 1., 0.5, 0.], [1., 2., 5., 2.]]
        );
        let wrong_shape = WarmStart::Mies(MiesWarmStart {
            population: Some(array![[1., 2.]]),
            ..Default::default()
        });
        assert!(mies.warm_start(wrong_shape).is_err());
        assert!(matches!(
            mies.warm_start(WarmStart::Cma(Default::default())),
            Err(OptimError::InvalidWarmStart { .. })
        ));
    }
}
