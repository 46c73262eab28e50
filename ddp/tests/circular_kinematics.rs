//! Point mass moving on the unit circle: `ẋ = u` with the velocity kept
//! tangent through `xᵀu = 0`.

use std::sync::Arc;

use ddp::autodiff::{AutoDiffConstraint, AutoDiffCost, AutoDiffDynamics, DifferentiableConstraint, DifferentiableCost, DifferentiableFlowMap};
use ddp::hessian_correction::Strategy;
use ddp::{Algorithm, GaussNewtonDdp, Ilqr, OptimalControlProblem, Scalar, Settings, Slq, TargetTrajectories, Vector};
use num_dual::DualNum;

const EXPECTED_COST: Scalar = 0.1;

struct Kinematics;

impl DifferentiableFlowMap for Kinematics {
    fn state_dim(&self) -> usize {
        2
    }
    fn input_dim(&self) -> usize {
        2
    }
    fn flow_map<T: DualNum<f64> + Copy>(&self, _time: Scalar, _state: &[T], input: &[T]) -> Vec<T> {
        input.to_vec()
    }
}

/// Unit angular velocity on the unit radius.
struct TangentialVelocityCost;

impl DifferentiableCost for TangentialVelocityCost {
    fn cost<T: DualNum<f64> + Copy>(&self, _: Scalar, x: &[T], u: &[T], _: &[Scalar], _: &[Scalar]) -> T {
        let ex = u[0] + x[1];
        let ey = u[1] - x[0];
        let radius = x[0] * x[0] + x[1] * x[1] - 1.0;
        (ex * ex + ey * ey + radius * radius) * 0.5
    }
}

struct TangentialVelocity;

impl DifferentiableConstraint for TangentialVelocity {
    fn num_constraints(&self, _time: Scalar) -> usize {
        1
    }
    fn constraint<T: DualNum<f64> + Copy>(&self, _time: Scalar, x: &[T], u: &[T]) -> Vec<T> {
        vec![x[0] * u[0] + x[1] * u[1]]
    }
}

fn problem() -> Arc<OptimalControlProblem> {
    let target = TargetTrajectories::constant(Vector::zeros(2), Vector::zeros(2));
    let mut problem = OptimalControlProblem::new(Box::new(AutoDiffDynamics::new(Kinematics)), target);
    problem
        .cost
        .add("tangential_velocity", Box::new(AutoDiffCost::new(TangentialVelocityCost)))
        .unwrap();
    problem
        .equality_constraint
        .add("tangential_velocity", Box::new(AutoDiffConstraint::new(TangentialVelocity)))
        .unwrap();
    Arc::new(problem)
}

fn settings(algorithm: Algorithm, n_threads: usize, use_nominal_time: bool) -> Settings {
    let mut settings = Settings {
        algorithm,
        n_threads,
        check_numerical_stability: false,
        pre_compute_riccati_terms: false,
        use_nominal_time_for_backward_pass: use_nominal_time,
        ..Settings::default()
    };
    settings.line_search.hessian_correction_strategy = Strategy::CholeskyModification;
    settings.line_search.hessian_correction_multiple = 1e-3;
    settings
}

fn solve(ddp: &mut dyn GaussNewtonDdp) {
    let init_state = Vector::from_vec(vec![1.0, 0.0]);
    ddp.run(0.0, &init_state, 10.0, &[0.0, 5.0, 10.0]).unwrap();
}

fn check_performance(ddp: &dyn GaussNewtonDdp) {
    let constraint_tolerance = ddp.core().settings().constraint_tolerance;
    let performance = ddp.performance_index();
    assert!(
        performance.total_cost < EXPECTED_COST,
        "total cost {} not below {EXPECTED_COST}",
        performance.total_cost
    );
    assert!(
        performance.state_input_eq_constraint_ise.abs() < 10.0 * constraint_tolerance,
        "state-input equality ISE {}",
        performance.state_input_eq_constraint_ise
    );

    let history = ddp.performance_index_history();
    assert!(history.len() >= 2);
    assert!(history.last().unwrap().total_cost < history[0].total_cost);
}

#[test]
fn test_slq_single_thread() {
    let mut slq = Slq::new(settings(Algorithm::Slq, 1, true), problem()).unwrap();
    solve(&mut slq);
    check_performance(&slq);
}

#[test]
fn test_slq_multi_thread() {
    let mut slq = Slq::new(settings(Algorithm::Slq, 3, true), problem()).unwrap();
    solve(&mut slq);
    check_performance(&slq);
}

#[test]
fn test_slq_adaptive_time() {
    let mut slq = Slq::new(settings(Algorithm::Slq, 3, false), problem()).unwrap();
    solve(&mut slq);
    check_performance(&slq);
}

#[test]
fn test_ilqr_single_thread() {
    let mut ilqr = Ilqr::new(settings(Algorithm::Ilqr, 1, true), problem()).unwrap();
    solve(&mut ilqr);
    check_performance(&ilqr);
}

#[test]
fn test_ilqr_multi_thread() {
    let mut ilqr = Ilqr::new(settings(Algorithm::Ilqr, 3, true), problem()).unwrap();
    solve(&mut ilqr);
    check_performance(&ilqr);
}

#[test]
fn test_thread_count_does_not_change_the_solution() {
    let mut single = Slq::new(settings(Algorithm::Slq, 1, true), problem()).unwrap();
    let mut multi = Slq::new(settings(Algorithm::Slq, 3, true), problem()).unwrap();
    solve(&mut single);
    solve(&mut multi);

    assert_eq!(single.num_iterations(), multi.num_iterations());
    approx::assert_relative_eq!(
        single.performance_index().total_cost,
        multi.performance_index().total_cost,
        max_relative = 1e-9
    );
}
