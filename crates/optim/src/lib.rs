//! This library implements two ways of spending a finite evaluation budget on the
//! optimization of an expensive black-box function (typically an acquisition
//! function within a Bayesian optimization loop):
//!
//! * a [`RestartController`] which maximizes the function from random starting points
//!   with one of three optimizers (gradient-based within bounds, (1+1)-CMA-ES or
//!   mixed-integer evolution strategy), keeping the best result over restarts,
//! * an [`OptimizerPipeline`] which runs optimizers one after the other, each one
//!   handing over to the next one with the budget left and a warm start.
//!
//! Search spaces are defined using the `acqopt-space` crate. Constraints
//! `h(x) = 0` and `g(x) <= 0` are handled by the evolution strategies, which rank
//! points on their constraint violation first.
//!
//! # Examples
//!
//! ## Multistart maximization
//!
//! ```
//! use acqopt::{Constraint, Objective, RestartConfig, RestartController};
//! use acqopt_space::SearchSpace;
//! use ndarray::array;
//!
//! let space = SearchSpace::continuous(&array![[-2., 2.], [-2., 2.]])
//!     .expect("valid space")
//!     .with_seed(42);
//! let objective = Objective::new(|x: &[f64]| -(x[0] - 1.).powi(2) - (x[1] - 1.).powi(2));
//! // x0 + x1 <= 1, constraints make CMA-ES run instead of the gradient-based optimizer
//! let g = Constraint::positional(|x: &[f64]| vec![x[0] + x[1] - 1.]);
//!
//! let (x, f) = RestartController::new(RestartConfig::default().max_evals(500))
//!     .optimize(&objective, &space, None, Some(g))
//!     .expect("multistart maximization");
//! println!("Maximum found f(x) = {f} at x = {x}");
//! ```
//!
//! ## Pipeline
//!
//! Points are asked to the active optimizer and their values told back, the pipeline
//! switches to the next optimizer when the active one stops.
//!
//! ```
//! use acqopt::{Mies, Objective, OptimizerPipeline, PipelineStatus, RandomSearch};
//! use acqopt_space::{SearchSpace, XType};
//!
//! let space = SearchSpace::new(&[XType::Float(-5., 5.), XType::Int(0, 10)])
//!     .expect("valid space")
//!     .with_seed(0);
//! let objective = Objective::new(|x: &[f64]| x[0] * x[0] + (x[1] - 3.).abs());
//!
//! let mut pipeline = OptimizerPipeline::new(objective).max_evals(200);
//! pipeline.add(RandomSearch::new(&space).n_samples(20), None).expect("first stage");
//! pipeline.add(Mies::new(&space), None).expect("second stage");
//! while !matches!(pipeline.status(), PipelineStatus::Halted(_)) {
//!     let x = pipeline.ask(5).expect("points asked");
//!     let y = pipeline.evaluate(&x).expect("points evaluated");
//!     pipeline.tell(&x, &y).expect("values told");
//! }
//! let (x, f) = pipeline.best().expect("best point");
//! println!("Minimum found f(x) = {f} at x = {x}");
//! ```
//!
//! # Logging
//!
//! Components given a [`Logger`] handle report their progress through the [`log`] facade,
//! binaries can use `env_logger` with the [`ACQOPT_LOG`] environment variable:
//!
//! ```no_run
//! let env = env_logger::Env::new().filter_or(acqopt::ACQOPT_LOG, "info");
//! env_logger::Builder::from_env(env).init();
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod optimizers;

mod errors;
mod logger;
mod pipeline;
mod restart;
mod types;

pub use crate::errors::*;
pub use crate::logger::*;
pub use crate::optimizers::{
    Backend, CmaBackend, CmaWarmStart, GradientBox, Mies, MiesBackend, MiesWarmStart,
    OnePlusOneCma, Optimizer, Problem, RandomSearch, RunState, Setup, WarmStart,
};
pub use crate::pipeline::*;
pub use crate::restart::*;
pub use crate::types::*;
