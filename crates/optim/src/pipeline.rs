//! Sequential composition of optimizers sharing one objective and one evaluation budget.
//!
//! Each stage runs until its optimizer wants to stop, the next stage then takes
//! over with the budget left, the best point found so far and optionally a warm
//! start computed from the outgoing optimizer state.
use crate::errors::{OptimError, Result};
use crate::optimizers::{Optimizer, Setup, WarmStart};
use crate::types::{Objective, TerminationReport};
use crate::Logger;
use ndarray::{Array1, Array2};
use std::fmt;

/// Computes the warm start of the next stage from the outgoing optimizer
pub type TransferFn = Box<dyn Fn(&dyn Optimizer) -> WarmStart>;

/// An optimizer with the transfer applied when handing over to the next stage
pub struct Stage {
    optimizer: Box<dyn Optimizer>,
    transfer: Option<TransferFn>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("optimizer", &self.optimizer.name())
            .field("transfer", &self.transfer.is_some())
            .finish()
    }
}

impl Stage {
    /// Stage optimizer
    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }
}

/// Status of a pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStatus {
    /// No point asked yet
    NotStarted,
    /// Stage `i` is running
    Active(usize),
    /// Stopped after stage `i`
    Halted(usize),
}

/// Result of a pipeline run
#[derive(Clone, Debug)]
pub struct PipelineResult {
    /// Optimum x value
    pub x_opt: Array1<f64>,
    /// Optimum y value (e.g. f(x_opt))
    pub y_opt: f64,
    /// Termination reports of the stages which ran, in order
    pub reports: Vec<TerminationReport>,
}

/// A sequence of optimizers run one after the other
///
/// ```
/// use acqopt::{CmaWarmStart, OnePlusOneCma, Optimizer, OptimizerPipeline, RandomSearch, WarmStart};
/// use acqopt_space::SearchSpace;
/// use ndarray::array;
///
/// let space = SearchSpace::continuous(&array![[-5., 5.], [-5., 5.]]).unwrap().with_seed(42);
/// let objective = acqopt::Objective::new(|x: &[f64]| x.iter().map(|v| v * v).sum());
///
/// let mut pipeline = OptimizerPipeline::new(objective).max_evals(300);
/// pipeline
///     .add(
///         RandomSearch::new(&space).n_samples(20),
///         Some(Box::new(|opt: &dyn Optimizer| {
///             WarmStart::Cma(CmaWarmStart {
///                 x: opt.best().map(|(x, _)| x),
///                 sigma: Some(0.1),
///                 cov: None,
///             })
///         })),
///     )
///     .expect("first stage");
/// pipeline.add(OnePlusOneCma::from_space(&space), None).expect("second stage");
/// let res = pipeline.run().expect("pipeline run");
/// assert!(res.y_opt < 1e-2);
/// assert_eq!(res.reports.len(), 2);
/// ```
pub struct OptimizerPipeline {
    objective: Objective,
    max_evals: usize,
    target: Option<f64>,
    minimize: bool,
    verbose: bool,
    n_points: usize,
    logger: Option<Logger>,
    stages: Vec<Stage>,
    status: PipelineStatus,
    consumed: usize,
    xopt: Option<Array1<f64>>,
    fopt: f64,
    reports: Vec<TerminationReport>,
}

impl fmt::Debug for OptimizerPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizerPipeline")
            .field("max_evals", &self.max_evals)
            .field("target", &self.target)
            .field("minimize", &self.minimize)
            .field("stages", &self.stages)
            .field("status", &self.status)
            .field("consumed", &self.consumed)
            .finish()
    }
}

impl OptimizerPipeline {
    /// Constructor given the objective function, minimized by default.
    ///
    /// Settings are given to the optimizers when added, hence should be set before.
    pub fn new(objective: Objective) -> Self {
        OptimizerPipeline {
            objective,
            max_evals: 0,
            target: None,
            minimize: true,
            verbose: false,
            n_points: 1,
            logger: None,
            stages: vec![],
            status: PipelineStatus::NotStarted,
            consumed: 0,
            xopt: None,
            fopt: f64::NAN,
            reports: vec![],
        }
    }

    /// Sets the total evaluation budget (required)
    pub fn max_evals(mut self, max_evals: usize) -> Self {
        self.max_evals = max_evals;
        self
    }

    /// Sets the value which once reached stops the optimizers
    pub fn target(mut self, target: f64) -> Self {
        self.target = Some(target);
        self
    }

    /// Sets whether the objective is minimized (otherwise maximized)
    pub fn minimize(mut self, minimize: bool) -> Self {
        self.minimize = minimize;
        self
    }

    /// Sets whether the optimizers report their progress at info level
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets the number of points asked per step
    pub fn n_points(mut self, n_points: usize) -> Self {
        self.n_points = n_points.max(1);
        self
    }

    /// Sets the logger handle, each optimizer logs under its own name nested in its target
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Appends a stage running `optimizer`, configured with the pipeline settings.
    /// `transfer` is applied to `optimizer` when it stops to warm start the next stage.
    pub fn add(
        &mut self,
        optimizer: impl Optimizer + 'static,
        transfer: Option<TransferFn>,
    ) -> Result<()> {
        if self.status != PipelineStatus::NotStarted {
            return Err(OptimError::InvalidConfig(
                "stages should be added before the first ask".to_string(),
            ));
        }
        if self.max_evals == 0 {
            return Err(OptimError::InvalidConfig(
                "max_evals should be positive".to_string(),
            ));
        }
        let mut optimizer: Box<dyn Optimizer> = Box::new(optimizer);
        let name = optimizer.name();
        optimizer.configure(Setup {
            objective: self.objective.clone(),
            target: self.target,
            minimize: self.minimize,
            max_evals: self.max_evals,
            verbose: self.verbose,
            logger: self.logger.as_ref().map(|l| l.named(name)),
        });
        self.stages.push(Stage {
            optimizer,
            transfer,
        });
        Ok(())
    }

    /// Current status
    pub fn status(&self) -> PipelineStatus {
        self.status
    }

    /// Stages in running order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Optimizer of the active stage, the last one which ran once halted
    pub fn active(&self) -> Option<&dyn Optimizer> {
        match self.status {
            PipelineStatus::NotStarted => None,
            PipelineStatus::Active(i) | PipelineStatus::Halted(i) => {
                Some(self.stages[i].optimizer.as_ref())
            }
        }
    }

    /// Best point and value found by the active stage, the last one which ran once halted
    pub fn best(&self) -> Option<(Array1<f64>, f64)> {
        self.xopt.as_ref().map(|x| (x.to_owned(), self.fopt))
    }

    /// Termination reports of the stages which stopped, in order
    pub fn reports(&self) -> &[TerminationReport] {
        &self.reports
    }

    /// Number of evaluations consumed over all stages
    pub fn eval_count(&self) -> usize {
        match self.status {
            PipelineStatus::Active(i) => self.consumed + self.stages[i].optimizer.eval_count(),
            _ => self.consumed,
        }
    }

    fn active_index(&self) -> Result<usize> {
        match self.status {
            PipelineStatus::Active(i) => Ok(i),
            PipelineStatus::Halted(_) => Err(OptimError::PipelineHalted),
            PipelineStatus::NotStarted => Err(OptimError::InvalidConfig(
                "pipeline not started, points should be asked first".to_string(),
            )),
        }
    }

    fn info(&self, msg: impl fmt::Display) {
        if let Some(logger) = &self.logger {
            logger.info(msg);
        }
    }

    /// Points to evaluate (one per row) from the active stage, the first call starts the first stage
    pub fn ask(&mut self, n_points: usize) -> Result<Array2<f64>> {
        if self.status == PipelineStatus::NotStarted {
            if self.stages.is_empty() {
                return Err(OptimError::EmptyPipeline);
            }
            self.status = PipelineStatus::Active(0);
            self.info(format_args!("start with {}", self.stages[0].optimizer.name()));
        }
        let i = self.active_index()?;
        self.stages[i].optimizer.ask(n_points)
    }

    /// Feeds values `y` of points `x` back to the active stage, then switches
    /// to the next stage when the active one stops
    pub fn tell(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let i = self.active_index()?;
        self.stages[i].optimizer.tell(x, y)?;
        self.switch()?;
        if let PipelineStatus::Active(i) | PipelineStatus::Halted(i) = self.status {
            if let Some((x, f)) = self.stages[i].optimizer.best() {
                self.xopt = Some(x);
                self.fopt = f;
            }
        }
        Ok(())
    }

    /// Hands over to the next stage when the active one stops, halts when there is
    /// no next stage or no budget left. Does nothing otherwise.
    pub fn switch(&mut self) -> Result<()> {
        let PipelineStatus::Active(i) = self.status else {
            return Ok(());
        };
        let outgoing = &self.stages[i];
        if !outgoing.optimizer.check_stop() {
            return Ok(());
        }
        let used = outgoing.optimizer.eval_count();
        let report = outgoing.optimizer.termination();
        let remaining = self.max_evals as i64 - (self.consumed + used) as i64;

        if i + 1 < self.stages.len() && remaining > 0 {
            let (done, next) = self.stages.split_at_mut(i + 1);
            let outgoing = &done[i];
            let incoming = &mut next[0];
            // a rejected warm start leaves the incoming stage untouched
            if let Some(transfer) = &outgoing.transfer {
                let warm_start = transfer(outgoing.optimizer.as_ref());
                incoming.optimizer.warm_start(warm_start)?;
            }
            incoming.optimizer.set_max_evals(remaining as usize);
            if let Some((x, f)) = outgoing.optimizer.best() {
                incoming.optimizer.seed_best(x, f);
            }
            let (from, to) = (outgoing.optimizer.name(), incoming.optimizer.name());
            self.info(format_args!(
                "switch from {from} to {to} with {remaining} evaluations left"
            ));
            self.status = PipelineStatus::Active(i + 1);
        } else {
            self.info(format_args!(
                "halt after {} with {} evaluations left",
                outgoing.optimizer.name(),
                remaining
            ));
            self.status = PipelineStatus::Halted(i);
        }
        self.consumed += used;
        self.reports.push(report);
        Ok(())
    }

    /// Evaluates the objective function on each row of `x` through the active stage
    pub fn evaluate(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let i = self.active_index()?;
        self.stages[i].optimizer.evaluate(x)
    }

    /// One ask, evaluate, tell iteration
    pub fn step(&mut self) -> Result<()> {
        let x = self.ask(self.n_points)?;
        let y = self.evaluate(&x)?;
        self.tell(&x, &y)
    }

    /// Runs the stages until the pipeline halts
    pub fn run(&mut self) -> Result<PipelineResult> {
        if self.stages.is_empty() {
            return Err(OptimError::EmptyPipeline);
        }
        while !matches!(self.status, PipelineStatus::Halted(_)) {
            self.step()?;
        }
        let (x_opt, y_opt) = self.best().ok_or_else(|| {
            OptimError::InvalidConfig("pipeline halted before any evaluation".to_string())
        })?;
        Ok(PipelineResult {
            x_opt,
            y_opt,
            reports: self.reports.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizers::{CmaWarmStart, MiesWarmStart, OnePlusOneCma, RandomSearch, RunState};
    use acqopt_space::SearchSpace;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Asks `batch` points per call and stops after `stop_after` tells
    struct Scripted {
        state: RunState,
        batch: usize,
        stop_after: usize,
        tells: usize,
        sigma: Option<f64>,
    }

    impl Scripted {
        fn new(batch: usize, stop_after: usize) -> Self {
            Scripted {
                state: RunState::default(),
                batch,
                stop_after,
                tells: 0,
                sigma: None,
            }
        }
    }

    impl Optimizer for Scripted {
        fn name(&self) -> &'static str {
            "Scripted"
        }

        fn state(&self) -> &RunState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut RunState {
            &mut self.state
        }

        fn ask(&mut self, _n_points: usize) -> Result<Array2<f64>> {
            Ok(Array2::from_elem((self.batch, 1), self.tells as f64))
        }

        fn tell(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
            self.tells += 1;
            self.state.record(x.view(), y.view(), None)
        }

        fn termination(&self) -> TerminationReport {
            let mut report = self.state.report();
            if self.tells >= self.stop_after {
                report.stagnation = Some(self.tells);
            }
            report
        }

        fn warm_start(&mut self, warm_start: WarmStart) -> Result<()> {
            match warm_start {
                WarmStart::None => Ok(()),
                WarmStart::Cma(ws) => {
                    self.sigma = ws.sigma;
                    Ok(())
                }
                WarmStart::Mies(_) => Err(OptimError::InvalidWarmStart {
                    optimizer: "Scripted",
                    reason: "Mies warm start not supported".to_string(),
                }),
            }
        }

        fn step_size(&self) -> Option<f64> {
            self.sigma
        }
    }

    fn constant(value: f64) -> Objective {
        Objective::new(move |_: &[f64]| value)
    }

    fn sigma_transfer(sigma: f64) -> Option<TransferFn> {
        Some(Box::new(move |_: &dyn Optimizer| {
            WarmStart::Cma(CmaWarmStart {
                sigma: Some(sigma),
                ..Default::default()
            })
        }))
    }

    #[test]
    fn test_switch_hands_over_budget_best_and_warm_start() {
        let mut pipeline = OptimizerPipeline::new(constant(2.)).max_evals(100);
        pipeline.add(Scripted::new(10, 1), sigma_transfer(0.5)).unwrap();
        pipeline.add(Scripted::new(1, 1000), None).unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::NotStarted);

        pipeline.step().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Active(1));
        let active = pipeline.active().unwrap();
        assert_eq!(active.state().max_evals(), 90);
        assert_eq!(active.best().map(|(_, f)| f), Some(2.));
        assert_eq!(active.step_size(), Some(0.5));
        assert_eq!(active.eval_count(), 0);
        assert_eq!(pipeline.reports().len(), 1);
        assert_eq!(pipeline.reports()[0].funcalls, 10);
        assert_eq!(pipeline.best().map(|(_, f)| f), Some(2.));
        assert_eq!(pipeline.eval_count(), 10);
    }

    #[test]
    fn test_halts_without_budget_left() {
        let mut pipeline = OptimizerPipeline::new(constant(2.)).max_evals(5);
        pipeline.add(Scripted::new(10, 1), None).unwrap();
        pipeline.add(Scripted::new(1, 1), None).unwrap();
        pipeline.step().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Halted(0));
        assert!(matches!(pipeline.ask(1), Err(OptimError::PipelineHalted)));
        assert!(matches!(
            pipeline.evaluate(&array![[0.]]),
            Err(OptimError::PipelineHalted)
        ));
        assert!(matches!(
            pipeline.tell(&array![[0.]], &array![0.]),
            Err(OptimError::PipelineHalted)
        ));
        let res = pipeline.run().unwrap();
        assert_eq!(res.y_opt, 2.);
        assert_eq!(res.reports.len(), 1);
    }

    #[test]
    fn test_switch_is_idempotent() {
        let mut pipeline = OptimizerPipeline::new(constant(1.)).max_evals(100);
        pipeline.add(Scripted::new(10, 1), None).unwrap();
        pipeline.add(Scripted::new(1, 3), None).unwrap();
        let x = pipeline.ask(1).unwrap();
        // no tell yet
        pipeline.switch().unwrap();
        pipeline.switch().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Active(0));
        assert!(pipeline.reports().is_empty());

        let y = pipeline.evaluate(&x).unwrap();
        pipeline.tell(&x, &y).unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Active(1));
        for _ in 0..3 {
            assert!(!pipeline.active().unwrap().check_stop());
            pipeline.switch().unwrap();
        }
        assert_eq!(pipeline.status(), PipelineStatus::Active(1));
        assert_eq!(pipeline.reports().len(), 1);
    }

    #[test]
    fn test_run_goes_through_all_stages() {
        let mut pipeline = OptimizerPipeline::new(constant(3.)).max_evals(100);
        pipeline.add(Scripted::new(10, 2), None).unwrap();
        pipeline.add(Scripted::new(5, 2), None).unwrap();
        pipeline.add(Scripted::new(1, 1000), None).unwrap();
        let res = pipeline.run().unwrap();
        let funcalls: Vec<usize> = res.reports.iter().map(|r| r.funcalls).collect();
        // the last stage gets what the first two left
        assert_eq!(funcalls, vec![20, 10, 70]);
        assert_eq!(res.reports[2].max_evals, Some(70));
        assert_eq!(pipeline.status(), PipelineStatus::Halted(2));
        assert_eq!(pipeline.eval_count(), 100);
    }

    #[test]
    fn test_pipeline_errors() {
        let mut pipeline = OptimizerPipeline::new(constant(1.)).max_evals(10);
        assert!(matches!(pipeline.ask(1), Err(OptimError::EmptyPipeline)));
        assert!(matches!(pipeline.run(), Err(OptimError::EmptyPipeline)));
        assert!(matches!(
            pipeline.tell(&array![[0.]], &array![0.]),
            Err(OptimError::InvalidConfig(_))
        ));

        pipeline.add(Scripted::new(1, 1), None).unwrap();
        pipeline.ask(1).unwrap();
        assert!(matches!(
            pipeline.add(Scripted::new(1, 1), None),
            Err(OptimError::InvalidConfig(_))
        ));

        let mut no_budget = OptimizerPipeline::new(constant(1.));
        assert!(no_budget.add(Scripted::new(1, 1), None).is_err());
    }

    #[test]
    fn test_rejected_warm_start() {
        let mut pipeline = OptimizerPipeline::new(constant(1.)).max_evals(10);
        let transfer: TransferFn =
            Box::new(|_: &dyn Optimizer| WarmStart::Mies(MiesWarmStart::default()));
        pipeline.add(Scripted::new(1, 1), Some(transfer)).unwrap();
        pipeline.add(Scripted::new(1, 1), None).unwrap();
        assert!(matches!(
            pipeline.step(),
            Err(OptimError::InvalidWarmStart { .. })
        ));
    }

    #[test]
    fn test_rejected_warm_start_leaves_next_stage_untouched() {
        let mut pipeline = OptimizerPipeline::new(constant(1.)).max_evals(100);
        let transfer: TransferFn = Box::new(|_: &dyn Optimizer| {
            WarmStart::Cma(CmaWarmStart {
                x: None,
                sigma: Some(-1.),
                cov: Some(array![[4., 0.], [0., 9.]]),
            })
        });
        pipeline.add(Scripted::new(3, 1), Some(transfer)).unwrap();
        pipeline
            .add(OnePlusOneCma::new(&array![[-5., 5.], [-5., 5.]]), None)
            .unwrap();
        assert!(matches!(
            pipeline.step(),
            Err(OptimError::InvalidWarmStart { .. })
        ));
        assert_eq!(pipeline.status(), PipelineStatus::Active(0));
        assert!(pipeline.reports().is_empty());

        let incoming = pipeline.stages()[1].optimizer();
        assert_eq!(incoming.state().max_evals(), 100);
        assert!(incoming.best().is_none());
        assert_eq!(incoming.step_size(), Some(0.2));
        assert_abs_diff_eq!(
            incoming.covariance().unwrap(),
            array![[100., 0.], [0., 100.]],
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_maximize_with_target() {
        let objective = Objective::new(|x: &[f64]| x[0]);
        let mut pipeline = OptimizerPipeline::new(objective)
            .max_evals(100)
            .minimize(false)
            .target(3.);
        pipeline.add(Scripted::new(2, 2), None).unwrap();
        pipeline.add(Scripted::new(1, 1000), None).unwrap();

        pipeline.step().unwrap();
        pipeline.step().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Active(1));
        assert_eq!(pipeline.best().map(|(_, f)| f), Some(1.));

        // a lower value does not replace the seeded maximum
        pipeline.step().unwrap();
        assert_eq!(pipeline.best(), Some((array![1.], 1.)));

        let res = pipeline.run().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Halted(1));
        assert_eq!(res.y_opt, 3.);
        assert_eq!(res.reports[1].ftarget, Some(3.));
        assert_eq!(res.reports[1].funcalls, 4);
        assert_eq!(pipeline.eval_count(), 8);
    }

    #[test]
    fn test_random_search_then_cma() {
        let space = SearchSpace::continuous(&array![[-5., 5.], [-5., 5.]])
            .unwrap()
            .with_seed(42);
        let objective = Objective::new(|x: &[f64]| argmin_testfunctions::sphere(x));
        let mut pipeline = OptimizerPipeline::new(objective)
            .max_evals(300)
            .logger(Logger::default());
        let transfer: TransferFn = Box::new(|opt: &dyn Optimizer| {
            WarmStart::Cma(CmaWarmStart {
                x: opt.best().map(|(x, _)| x),
                sigma: Some(0.1),
                cov: None,
            })
        });
        pipeline
            .add(RandomSearch::new(&space).n_samples(20), Some(transfer))
            .unwrap();
        pipeline
            .add(OnePlusOneCma::from_space(&space).seed(0), None)
            .unwrap();
        let res = pipeline.run().expect("pipeline run");

        assert_eq!(res.reports.len(), 2);
        assert_eq!(res.reports[0].funcalls, 20);
        assert!(res.reports[1].funcalls <= 280);
        assert!(pipeline.eval_count() <= 300);
        assert!(res.y_opt < 1e-3, "f = {}", res.y_opt);
        assert_abs_diff_eq!(res.x_opt, array![0., 0.], epsilon = 1e-1);
    }
}
