//! Scalar regulator whose state is halved at a time-triggered event.

use std::sync::Arc;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use ddp::hessian_correction::Strategy;
use ddp::problem::{LinearSystemDynamics, QuadraticStateCost, QuadraticStateInputCost};
use ddp::{
    Algorithm, DdpError, GaussNewtonDdp, Ilqr, Matrix, ModeSchedule, OptimalControlProblem, Scalar, Settings, Slq,
    TargetTrajectories, Vector,
};

const EVENT_TIME: Scalar = 1.0;

fn problem() -> Arc<OptimalControlProblem> {
    let dynamics = LinearSystemDynamics::new(Matrix::zeros(1, 1), Matrix::identity(1, 1))
        .with_jump_map(Matrix::from_element(1, 1, 0.5), Matrix::zeros(1, 1));
    let target = TargetTrajectories::constant(Vector::zeros(1), Vector::zeros(1));
    let mut problem = OptimalControlProblem::new(Box::new(dynamics), target);
    problem
        .cost
        .add("quadratic", Box::new(QuadraticStateInputCost::new(Matrix::identity(1, 1), Matrix::identity(1, 1))))
        .unwrap();
    problem
        .pre_jump_cost
        .add("impact", Box::new(QuadraticStateCost::new(Matrix::from_element(1, 1, 2.0))))
        .unwrap();
    problem
        .final_cost
        .add("terminal", Box::new(QuadraticStateCost::new(Matrix::identity(1, 1))))
        .unwrap();
    Arc::new(problem)
}

fn settings(algorithm: Algorithm, use_nominal_time: bool) -> Settings {
    let mut settings = Settings {
        algorithm,
        n_threads: 2,
        use_nominal_time_for_backward_pass: use_nominal_time,
        ..Settings::default()
    };
    settings.line_search.hessian_correction_strategy = Strategy::EigenvalueModification;
    settings
}

fn mode_schedule() -> ModeSchedule {
    ModeSchedule::new(vec![EVENT_TIME], vec![0, 1]).unwrap()
}

fn solve(ddp: &mut dyn GaussNewtonDdp) {
    ddp.set_mode_schedule(mode_schedule());
    ddp.run(0.0, &Vector::from_element(1, 1.0), 2.0, &[]).unwrap();
}

fn check_jump(ddp: &dyn GaussNewtonDdp) {
    let solution = ddp.primal_solution();
    assert_eq!(solution.post_event_indices.len(), 1);
    let post = solution.post_event_indices[0];
    assert_eq!(solution.time_trajectory[post - 1], EVENT_TIME);
    assert_eq!(solution.time_trajectory[post], EVENT_TIME);
    assert_abs_diff_eq!(
        solution.state_trajectory[post][0],
        0.5 * solution.state_trajectory[post - 1][0],
        epsilon = 1e-12
    );

    let history = ddp.performance_index_history();
    assert!(ddp.performance_index().total_cost < history[0].total_cost);
}

#[test]
fn test_slq_nominal_time() {
    let mut slq = Slq::new(settings(Algorithm::Slq, true), problem()).unwrap();
    solve(&mut slq);
    check_jump(&slq);

    // the value function lives on the forward grid, event included
    let value_function = slq.core().value_function(0).unwrap();
    let solution = slq.primal_solution();
    assert_eq!(value_function.time_trajectory, solution.time_trajectory);
    assert_eq!(value_function.post_event_indices, solution.post_event_indices);
    assert_eq!(value_function.post_event_indices.len(), 1);
    let post = value_function.post_event_indices[0];
    assert_eq!(value_function.time_trajectory[post], EVENT_TIME);
    // Sm⁻ = q + G Sm⁺ G
    assert_abs_diff_eq!(
        value_function.sm[post - 1][(0, 0)],
        2.0 + 0.25 * value_function.sm[post][(0, 0)],
        epsilon = 1e-9
    );
}

#[test]
fn test_slq_adaptive_time_agrees_with_nominal_time() {
    let mut adaptive = Slq::new(settings(Algorithm::Slq, false), problem()).unwrap();
    let mut nominal = Slq::new(settings(Algorithm::Slq, true), problem()).unwrap();
    solve(&mut adaptive);
    solve(&mut nominal);
    check_jump(&adaptive);

    let value_function = adaptive.core().value_function(0).unwrap();
    assert_eq!(value_function.post_event_indices.len(), 1);
    let post = value_function.post_event_indices[0];
    assert_abs_diff_eq!(value_function.time_trajectory[post - 1], EVENT_TIME, epsilon = 1e-12);
    assert_abs_diff_eq!(value_function.time_trajectory[post], EVENT_TIME, epsilon = 1e-12);

    assert_relative_eq!(
        adaptive.performance_index().total_cost,
        nominal.performance_index().total_cost,
        max_relative = 1e-2
    );
}

#[test]
fn test_ilqr_agrees_with_slq() {
    let mut ilqr = Ilqr::new(settings(Algorithm::Ilqr, true), problem()).unwrap();
    let mut slq = Slq::new(settings(Algorithm::Slq, true), problem()).unwrap();
    solve(&mut ilqr);
    solve(&mut slq);
    check_jump(&ilqr);

    assert_relative_eq!(
        ilqr.performance_index().total_cost,
        slq.performance_index().total_cost,
        max_relative = 5e-2
    );
}

#[test]
fn test_event_on_partition_boundary_is_rejected() {
    let mut slq = Slq::new(settings(Algorithm::Slq, true), problem()).unwrap();
    slq.set_mode_schedule(mode_schedule());
    let result = slq.run(0.0, &Vector::from_element(1, 1.0), 2.0, &[EVENT_TIME]);
    assert!(matches!(result, Err(DdpError::InvalidPartitioning(_))));
}
