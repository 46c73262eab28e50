//! Backward pass of SLQ on a scalar regulator with a closed-form Riccati
//! solution.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use ddp::hessian_correction::Strategy;
use ddp::problem::{LinearSystemDynamics, QuadraticStateInputCost};
use ddp::{GaussNewtonDdp, Matrix, OptimalControlProblem, Scalar, Settings, Slq, TargetTrajectories, Vector};

const FINAL_TIME: Scalar = 2.0;

/// `ẋ = u` with cost `½(x² + u²)` and no final cost: `Sm(t) = tanh(T - t)`.
fn regulator() -> Arc<OptimalControlProblem> {
    let dynamics = LinearSystemDynamics::new(Matrix::zeros(1, 1), Matrix::identity(1, 1));
    let target = TargetTrajectories::constant(Vector::zeros(1), Vector::zeros(1));
    let mut problem = OptimalControlProblem::new(Box::new(dynamics), target);
    problem
        .cost
        .add("quadratic", Box::new(QuadraticStateInputCost::new(Matrix::identity(1, 1), Matrix::identity(1, 1))))
        .unwrap();
    Arc::new(problem)
}

fn settings(use_nominal_time: bool, n_threads: usize) -> Settings {
    let mut settings = Settings {
        use_nominal_time_for_backward_pass: use_nominal_time,
        n_threads,
        ..Settings::default()
    };
    settings.line_search.hessian_correction_strategy = Strategy::EigenvalueModification;
    settings
}

fn solved(use_nominal_time: bool, n_threads: usize) -> Slq {
    let mut slq = Slq::new(settings(use_nominal_time, n_threads), regulator()).unwrap();
    slq.run(0.0, &Vector::from_element(1, 1.0), FINAL_TIME, &[1.0]).unwrap();
    slq
}

#[test]
fn test_nominal_time_matches_closed_form() {
    let slq = solved(true, 0);
    let core = slq.core();
    assert_eq!(core.num_partitions(), 2);

    for partition in 0..2 {
        let value_function = core.value_function(partition).unwrap();
        // one value per nominal sample
        assert_eq!(value_function.len(), 101);
        assert_eq!(value_function.time_trajectory[0], partition as Scalar);
        assert_eq!(*value_function.time_trajectory.last().unwrap(), partition as Scalar + 1.0);

        for (t, sm) in value_function.time_trajectory.iter().zip(&value_function.sm) {
            assert_abs_diff_eq!(sm[(0, 0)], (FINAL_TIME - t).tanh(), epsilon = 1e-5);
        }
    }
}

#[test]
fn test_adaptive_time_matches_closed_form() {
    let slq = solved(false, 0);
    let core = slq.core();
    for partition in 0..2 {
        let value_function = core.value_function(partition).unwrap();
        assert!(value_function.len() >= 2);
        assert!(value_function.time_trajectory.windows(2).all(|w| w[0] <= w[1]));
        for (t, sm) in value_function.time_trajectory.iter().zip(&value_function.sm) {
            assert_abs_diff_eq!(sm[(0, 0)], (FINAL_TIME - t).tanh(), epsilon = 1e-5);
        }
    }

    let nominal = solved(true, 0);
    let start = |slq: &Slq| slq.core().value_function(0).unwrap().start().unwrap();
    assert_abs_diff_eq!(start(&slq).0[(0, 0)], start(&nominal).0[(0, 0)], epsilon = 1e-6);
    assert_abs_diff_eq!(
        slq.performance_index().total_cost,
        nominal.performance_index().total_cost,
        epsilon = 1e-3
    );
}

#[test]
fn test_parallel_partitions_match_sequential() {
    let mut slq = solved(true, 3);
    slq.solve_sequential_riccati_equations(&Matrix::zeros(1, 1), &Vector::zeros(1), 0.0)
        .unwrap();
    let sequential: Vec<_> = (0..2).map(|p| slq.core().value_function(p).unwrap().clone()).collect();

    let finals = vec![
        sequential[1].start().unwrap(),
        (Matrix::zeros(1, 1), Vector::zeros(1), 0.0),
    ];
    slq.solve_riccati_equations_parallel(&finals).unwrap();

    for (partition, expected) in sequential.iter().enumerate() {
        let actual = slq.core().value_function(partition).unwrap();
        assert_eq!(actual.len(), expected.len());
        for k in 0..expected.len() {
            assert_abs_diff_eq!(actual.sm[k], expected.sm[k], epsilon = 1e-12);
            assert_abs_diff_eq!(actual.sv[k], expected.sv[k], epsilon = 1e-12);
            assert_abs_diff_eq!(actual.s[k], expected.s[k], epsilon = 1e-12);
        }
    }
}

#[test]
fn test_stationary_gain() {
    let slq = solved(true, 0);
    let solution = slq.primal_solution();
    // K = -Sm far from the final time
    let gain = solution.controllers[0].gain_array[0][(0, 0)];
    assert_abs_diff_eq!(gain, -FINAL_TIME.tanh(), epsilon = 1e-4);
    // V(0) = ½ Sm(0) x0²
    assert_abs_diff_eq!(slq.performance_index().total_cost, 0.5 * FINAL_TIME.tanh(), epsilon = 1e-3);
}
