use acqopt::{Objective, OptimizerKind, RestartConfig, RestartController, ACQOPT_LOG};
use acqopt_space::SearchSpace;
use criterion::{criterion_group, criterion_main, Criterion};
use env_logger::{Builder, Env};
use ndarray::array;

/// Negated Ackley test function: max f(x)=0 at x=(0, 0, 0)
fn neg_ackley(x: &[f64]) -> f64 {
    -argmin_testfunctions::ackley(x)
}

fn criterion_restart(c: &mut Criterion) {
    let xlimits = array![[-32.768, 32.768], [-32.768, 32.768], [-32.768, 32.768]];
    let space = SearchSpace::continuous(&xlimits)
        .expect("valid space")
        .with_seed(42);
    let objective = Objective::new(neg_ackley);

    let mut group = c.benchmark_group("restart");
    group.sample_size(20);
    for kind in [
        OptimizerKind::GradientBox,
        OptimizerKind::CovarianceAdaptation,
        OptimizerKind::MixedInteger,
    ] {
        group.bench_function(format!("restart ackley {kind:?}"), |b| {
            let env = Env::new().filter_or(ACQOPT_LOG, "error");
            let mut builder = Builder::from_env(env);
            let builder = builder.target(env_logger::Target::Stdout);
            builder.try_init().ok();

            let controller = RestartController::new(
                RestartConfig::default().max_evals(500).optimizer(kind),
            );
            b.iter(|| {
                std::hint::black_box(
                    controller
                        .optimize(&objective, &space, None, None)
                        .expect("Maximization"),
                )
            });
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_restart);
criterion_main!(benches);
