use acqopt::{
    CmaWarmStart, Logger, Objective, OnePlusOneCma, Optimizer, OptimizerPipeline, RandomSearch,
    TransferFn, WarmStart, ACQOPT_LOG,
};
use acqopt_space::{Sampling, SearchSpace};
use clap::Parser;
use env_logger::{Builder, Env};
use ndarray::Array2;

/// Griewank test function: min f(x)=0 at x=(0, 0, ..., 0)
fn griewank(x: &[f64]) -> f64 {
    let sum: f64 = x.iter().map(|v| v * v).sum::<f64>() / 4000.;
    let prod: f64 = x
        .iter()
        .enumerate()
        .map(|(i, v)| (v / ((i + 1) as f64).sqrt()).cos())
        .product();
    sum - prod + 1.
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 2)]
    dim: usize,
    #[arg(short, long, default_value_t = 300)]
    max_evals: usize,
    #[arg(short, long, default_value_t = 30)]
    n_samples: usize,
    #[arg(short, long, default_value_t = 42)]
    seed: u64,
}

fn main() -> anyhow::Result<()> {
    let env = Env::new().filter_or(ACQOPT_LOG, "info");
    let mut builder = Builder::from_env(env);
    let builder = builder.target(env_logger::Target::Stdout);
    builder.try_init().ok();

    let args = Args::parse();
    let xlimits = Array2::from_shape_fn((args.dim, 2), |(_, j)| if j == 0 { -600. } else { 600. });
    let space = SearchSpace::continuous(&xlimits)?.with_seed(args.seed);

    // CMA-ES starts from the best sample with a small step size
    let transfer: TransferFn = Box::new(|opt: &dyn Optimizer| {
        WarmStart::Cma(CmaWarmStart {
            x: opt.best().map(|(x, _)| x),
            sigma: Some(0.05),
            cov: None,
        })
    });

    let mut pipeline = OptimizerPipeline::new(Objective::new(griewank))
        .max_evals(args.max_evals)
        .verbose(true)
        .logger(Logger::new("pipeline"));
    pipeline.add(
        RandomSearch::new(&space)
            .sampling(Sampling::Lhs)
            .n_samples(args.n_samples),
        Some(transfer),
    )?;
    pipeline.add(OnePlusOneCma::from_space(&space).seed(args.seed), None)?;

    let res = pipeline.run()?;
    println!("Minimum found f(x) = {} at x = {}", res.y_opt, res.x_opt);
    for (stage, report) in pipeline.stages().iter().zip(&res.reports) {
        println!("{}: {:?}", stage.optimizer().name(), report);
    }
    Ok(())
}
