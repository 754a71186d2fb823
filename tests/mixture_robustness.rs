use std::time::Duration;

use faer::Mat;
use lognormal_mixture::{
    AbortSignal, AtomicAbortSignal, ChainTrace, InputError, MixtureError, MixtureFitOptions,
    MixtureSamplerConfig, MultiChainOptions, SurvivalInput, fit_mixture_chain_input,
    fit_mixture_input, fit_mixture_input_with_abort,
};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Two-component lognormal survival times with independent uniform censoring.
fn simulate_censored_survival(n: usize, seed: u64) -> SurvivalInput {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut covariate = Vec::with_capacity(n);
    let mut times = Vec::with_capacity(n);
    let mut indicators = Vec::with_capacity(n);
    for _ in 0..n {
        let x = rng.random::<f64>();
        let (intercept, slope, sd): (f64, f64, f64) = if rng.random::<f64>() < 0.4 {
            (0.5, 1.0, 0.3)
        } else {
            (2.5, -0.5, 0.5)
        };
        let event_time = sd
            .mul_add(sample_standard_normal(&mut rng), slope.mul_add(x, intercept))
            .exp();
        let censor_time = rng.random::<f64>() * 30.0;
        covariate.push(x);
        if event_time <= censor_time {
            times.push(event_time);
            indicators.push(1);
        } else {
            times.push(censor_time.max(1.0e-3));
            indicators.push(0);
        }
    }
    SurvivalInput::new(
        Mat::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { covariate[i] }),
        Mat::from_fn(n, 1, |i, _| times[i]),
        indicators,
    )
}

fn config(data_augmentation: bool, em_iterations: usize) -> MixtureSamplerConfig {
    MixtureSamplerConfig {
        fit_options: MixtureFitOptions {
            iterations: 60,
            em_iterations,
            components: 2,
            data_augmentation,
            ..MixtureFitOptions::default()
        },
        ..MixtureSamplerConfig::default()
    }
}

fn assert_identical(left: &ChainTrace, right: &ChainTrace) {
    assert_eq!(left.draws.nrows(), right.draws.nrows());
    assert_eq!(left.draws.ncols(), right.draws.ncols());
    for row in 0..left.draws.nrows() {
        for col in 0..left.draws.ncols() {
            assert_eq!(
                left.draws[(row, col)].to_bits(),
                right.draws[(row, col)].to_bits(),
                "draw ({row}, {col}) differs"
            );
        }
    }
}

#[test]
fn chains_are_bit_identical_per_seed() {
    let input = simulate_censored_survival(150, 20);
    for data_augmentation in [true, false] {
        let multi_chain = MultiChainOptions::from_stride(100, 7, 3);
        let first = fit_mixture_input(&input, config(data_augmentation, 10), &multi_chain)
            .expect("first fit should succeed");
        let second = fit_mixture_input(&input, config(data_augmentation, 10), &multi_chain)
            .expect("second fit should succeed");
        for (left, right) in first.chains.iter().zip(&second.chains) {
            assert_identical(left, right);
        }
    }
}

#[test]
fn multi_chain_matches_single_chain_runs() {
    let input = simulate_censored_survival(120, 21);
    let multi_chain =
        MultiChainOptions::with_seeds(vec![5, 55]).with_stagger(Duration::from_millis(2));
    let chains = fit_mixture_input(&input, config(false, 0), &multi_chain)
        .expect("multi-chain fit should succeed");
    for (chain, seed) in [5, 55].into_iter().enumerate() {
        let single =
            fit_mixture_chain_input(&input, config(false, 0), seed).expect("chain should run");
        assert_identical(&chains.chains[chain], &single);
        assert_eq!(chains.chains[chain].diagnostics.seed, seed);
    }
}

#[test]
fn censored_chains_report_diagnostics() {
    let input = simulate_censored_survival(200, 22);
    assert!(input.censored_count() > 0);

    let augmented = fit_mixture_chain_input(&input, config(true, 20), 8).expect("chain");
    assert_eq!(augmented.diagnostics.iterations_completed, 60);
    assert!(augmented.diagnostics.acceptance_rates.is_none());

    let adaptive = fit_mixture_chain_input(&input, config(false, 20), 8).expect("chain");
    let rates = adaptive
        .diagnostics
        .acceptance_rates
        .expect("adaptive chains record acceptance rates");
    assert!((0.0..=1.0).contains(&rates.phi));
    assert!((0.0..=1.0).contains(&rates.beta));
    let (phi_scales, beta_scales) = adaptive
        .diagnostics
        .final_proposal_scales
        .clone()
        .expect("adaptive chains record proposal scales");
    assert!(phi_scales.iter().chain(&beta_scales).all(|s| *s > 0.0));

    for chain in [&augmented, &adaptive] {
        for row in 0..chain.draws.nrows() {
            let eta_total = chain.draws[(row, 3)] + chain.draws[(row, 7)];
            assert!((eta_total - 1.0).abs() < 1.0e-9);
            assert!(chain.draws[(row, 2)] > 0.0 && chain.draws[(row, 6)] > 0.0);
        }
    }
}

#[test]
fn aborted_run_is_cancelled_before_sampling() {
    let input = simulate_censored_survival(50, 23);
    let signal = AtomicAbortSignal::new();
    signal.abort();
    let result = fit_mixture_input_with_abort(
        &input,
        config(true, 0),
        &MultiChainOptions::with_seeds(vec![1, 2]),
        &signal,
    );
    assert!(matches!(
        result,
        Err(MixtureError::Cancelled {
            chain: 0,
            completed: 0
        })
    ));

    signal.reset();
    assert!(!signal.is_aborted());
}

#[test]
fn invalid_configuration_fails_before_sampling() {
    let input = simulate_censored_survival(30, 24);
    let mismatched = MultiChainOptions {
        chains: 2,
        seeds: vec![1],
        stagger: Duration::ZERO,
    };
    assert!(matches!(
        fit_mixture_input(&input, config(true, 0), &mismatched),
        Err(MixtureError::SeedCountMismatch {
            chains: 2,
            seeds: 1
        })
    ));
    assert!(matches!(
        fit_mixture_input(&input, config(true, 0), &MultiChainOptions::with_seeds(Vec::new())),
        Err(MixtureError::InvalidChainCount { min: 1, found: 0 })
    ));

    let mut zero_iterations = config(true, 0);
    zero_iterations.fit_options.iterations = 0;
    assert!(matches!(
        fit_mixture_chain_input(&input, zero_iterations, 1),
        Err(MixtureError::InvalidIterations)
    ));
}

#[test]
fn invalid_survival_input_is_rejected() {
    let design = Mat::from_fn(3, 1, |_, _| 1.0);
    let non_positive = SurvivalInput::new(
        design.clone(),
        Mat::from_fn(3, 1, |i, _| if i == 1 { 0.0 } else { 1.0 }),
        vec![1, 1, 1],
    );
    assert!(matches!(
        fit_mixture_chain_input(&non_positive, config(true, 0), 1),
        Err(MixtureError::InvalidInput(InputError::NonPositiveTime { row: 1 }))
    ));

    let bad_indicator =
        SurvivalInput::new(design, Mat::from_fn(3, 1, |_, _| 1.0), vec![1, 2, 0]);
    assert!(matches!(
        fit_mixture_chain_input(&bad_indicator, config(false, 0), 1),
        Err(MixtureError::InvalidInput(InputError::InvalidIndicator {
            row: 1,
            value: 2
        }))
    ));
}
