use faer::Mat;
use lognormal_mixture::{
    EmOptions, EmOutput, EmOutputKind, SurvivalInput, em_trace_column_labels, fit_em_input,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let n = 300;
    let to_f64 = |idx: usize| f64::from(u32::try_from(idx).unwrap_or(u32::MAX));
    let input = SurvivalInput::new(
        Mat::from_fn(n, 1, |_, _| 1.0),
        Mat::from_fn(n, 1, |i, _| {
            let centre = if i % 4 == 0 { -1.0 } else { 1.5 };
            0.25f64.mul_add((to_f64(i) * 1.3).sin(), centre).exp()
        }),
        (0..n).map(|i| u8::from(i % 9 != 0)).collect(),
    );

    let options = EmOptions {
        iterations: 200,
        components: 2,
        better_initial_values: true,
        restarts: 10,
        restart_iterations: 30,
        seed: 7,
        show_output: true,
    };

    if let EmOutput::Trace(trace) = fit_em_input(&input, options, EmOutputKind::Trace)? {
        let last = trace.draws.nrows() - 1;
        let labels = em_trace_column_labels(options.components, input.n_covariates());
        let row = labels
            .iter()
            .enumerate()
            .map(|(col, label)| format!("{label}={:.3}", trace.draws[(last, col)]))
            .collect::<Vec<_>>();
        println!("Final EM iterate: {}", row.join(", "));
        println!("Log-likelihood: {:.3}", trace.log_likelihood);
    }

    if let EmOutput::Estimate(estimate) = fit_em_input(&input, options, EmOutputKind::Estimate)? {
        let imputed = estimate
            .expected_outcome
            .iter()
            .zip(input.event_indicator())
            .filter(|(_, indicator)| **indicator == 0)
            .count();
        println!(
            "Estimate: weights={:?}, precisions={:?}, imputed censored outcomes={imputed}",
            estimate.parameters.eta, estimate.parameters.phi
        );
    }

    Ok(())
}
