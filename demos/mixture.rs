use std::time::Duration;

use faer::Mat;
use lognormal_mixture::{
    MixtureFitOptions, MixtureSamplerConfig, MultiChainOptions, SurvivalInput,
    fit_mixture_input, trace_column_labels,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let input = build_synthetic_input(400);
    println!(
        "Survival data: observations={}, covariates={}, censored={}",
        input.n_observations(),
        input.n_covariates(),
        input.censored_count()
    );

    let config = MixtureSamplerConfig {
        fit_options: MixtureFitOptions {
            iterations: 1_000,
            em_iterations: 100,
            components: 2,
            data_augmentation: false,
            show_output: true,
            ..MixtureFitOptions::default()
        },
        ..MixtureSamplerConfig::default()
    };
    let multi_chain = MultiChainOptions::from_stride(2_026, 1_000, 4)
        .with_stagger(Duration::from_millis(5));

    let chains = fit_mixture_input(&input, config, &multi_chain)?;
    let (iterations, columns, chain_count) = chains.dims();
    println!("Trace: iterations={iterations}, columns={columns}, chains={chain_count}");

    let labels = trace_column_labels(chains.components, chains.covariates);
    let burn_in = iterations / 2;
    for (chain, trace) in chains.chains.iter().enumerate() {
        let means = labels
            .iter()
            .enumerate()
            .map(|(col, label)| {
                let column = chains.column(chain, col);
                let kept = &column[burn_in..];
                let mean = kept.iter().sum::<f64>() / f64::from(u32::try_from(kept.len())?);
                Ok(format!("{label}={mean:.3}"))
            })
            .collect::<Result<Vec<_>, std::num::TryFromIntError>>()?;
        println!("Chain {} (seed {}): {}", chain + 1, trace.diagnostics.seed, means.join(", "));
        if let Some(rates) = trace.diagnostics.acceptance_rates {
            println!(
                "  acceptance: phi={:.2}, beta={:.2}; repaired components={}",
                rates.phi, rates.beta, trace.diagnostics.repaired_components
            );
        }
    }

    Ok(())
}

fn build_synthetic_input(n: usize) -> SurvivalInput {
    let to_f64 = |idx: usize| f64::from(u32::try_from(idx).unwrap_or(u32::MAX));
    let covariate = |i: usize| to_f64(i % 20) / 20.0;
    let times = Mat::from_fn(n, 1, |i, _| {
        let noise = 0.3 * (to_f64(i) * 2.3).sin();
        let log_time = if i % 3 == 0 {
            0.5 + covariate(i) + noise
        } else {
            (-0.5f64).mul_add(covariate(i), 2.5) + noise
        };
        log_time.exp()
    });
    let indicators = (0..n).map(|i| u8::from(i % 7 != 0)).collect();
    SurvivalInput::new(
        Mat::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { covariate(i) }),
        times,
        indicators,
    )
}
