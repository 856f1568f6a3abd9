use super::{Optimizer, RunState};
use crate::errors::Result;
use crate::types::TerminationReport;
use acqopt_space::{Sampling, SearchSpace};
use ndarray::{Array1, Array2};

/// Random search: points are drawn from the search space, one batch per ask.
///
/// Typically used as the exploration stage of a pipeline, it then stops after
/// `n_samples` evaluations.
#[derive(Clone, Debug)]
pub struct RandomSearch {
    state: RunState,
    space: SearchSpace,
    sampling: Sampling,
    n_samples: Option<usize>,
}

impl RandomSearch {
    /// Constructor given the search space, points are drawn uniformly
    pub fn new(space: &SearchSpace) -> Self {
        RandomSearch {
            state: RunState::default(),
            space: space.clone(),
            sampling: Sampling::Uniform,
            n_samples: None,
        }
    }

    /// Sets the number of evaluations after which the search stops,
    /// whatever the budget left
    pub fn n_samples(mut self, n_samples: usize) -> Self {
        self.n_samples = Some(n_samples);
        self
    }

    /// Sets the sampling method used to draw each batch
    pub fn sampling(mut self, sampling: Sampling) -> Self {
        self.sampling = sampling;
        self
    }
}

impl Optimizer for RandomSearch {
    fn name(&self) -> &'static str {
        "RandomSearch"
    }

    fn state(&self) -> &RunState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    fn ask(&mut self, n_points: usize) -> Result<Array2<f64>> {
        Ok(self.space.sample(n_points, self.sampling))
    }

    fn tell(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.state.record(x.view(), y.view(), None)?;
        if let Some((_, fopt)) = self.state.best() {
            self.state.info(format_args!(
                "{} evaluations, best f = {}",
                self.state.eval_count(),
                fopt
            ));
        }
        Ok(())
    }

    fn termination(&self) -> TerminationReport {
        let mut report = self.state.report();
        if let Some(n_samples) = self.n_samples {
            if report.max_evals.is_none() && self.state.eval_count() >= n_samples {
                report.max_evals = Some(n_samples);
            }
        }
        report
    }
}
