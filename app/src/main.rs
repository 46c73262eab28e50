use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use ddp::autodiff::{linearize_named, AutoDiffConstraint, AutoDiffCost, DifferentiableConstraint, DifferentiableCost};
use ddp::problem::SystemDynamics;
use ddp::{
    Algorithm, DdpResult, GaussNewtonDdp, Ilqr, OptimalControlProblem, Scalar, Settings, Slq, TargetTrajectories,
    Vector, VectorFunctionLinearApproximation,
};
use named_vec_ops::NamedVecOps;
use named_vec_ops_derive::NamedVecOps;
use num_dual::{Dual64, DualNum};

#[derive(Debug, Copy, Clone, NamedVecOps)]
struct State<T> {
    x: T,
    y: T,
}

type State64 = State<f64>;
type StateDual = State<Dual64>;

#[derive(Debug, Copy, Clone, NamedVecOps)]
struct Velocity<T> {
    vx: T,
    vy: T,
}

type Velocity64 = Velocity<f64>;
type VelocityDual = Velocity<Dual64>;

fn kinematics<T: DualNum<f64> + Copy>(_state: &State<T>, velocity: &Velocity<T>, _params: &()) -> State<T> {
    State {
        x: velocity.vx,
        y: velocity.vy,
    }
}

/// Point mass driven directly by its velocity.
struct CircularKinematics;

impl SystemDynamics for CircularKinematics {
    fn state_dim(&self) -> usize {
        State64::SIZE
    }

    fn input_dim(&self) -> usize {
        Velocity64::SIZE
    }

    fn flow_map(&self, _time: Scalar, state: &Vector, input: &Vector) -> Vector {
        kinematics(&State64::from_dvector(state), &Velocity64::from_dvector(input), &()).to_dvector()
    }

    fn linear_approximation(&self, _time: Scalar, state: &Vector, input: &Vector) -> VectorFunctionLinearApproximation {
        linearize_named::<_, StateDual, VelocityDual, _, _, _, 2, 2>(
            kinematics::<Dual64>,
            &State64::from_dvector(state),
            &Velocity64::from_dvector(input),
            &(),
        )
    }
}

/// Track unit angular velocity and stay on the unit circle.
struct CircleCost;

impl DifferentiableCost for CircleCost {
    fn cost<T: DualNum<f64> + Copy>(&self, _: Scalar, x: &[T], u: &[T], _: &[Scalar], _: &[Scalar]) -> T {
        let ex = u[0] + x[1];
        let ey = u[1] - x[0];
        let radius = x[0] * x[0] + x[1] * x[1] - 1.0;
        (ex * ex + ey * ey + radius * radius) * 0.5
    }
}

/// Velocity tangent to the circle, `xᵀu = 0`.
struct Tangency;

impl DifferentiableConstraint for Tangency {
    fn num_constraints(&self, _time: Scalar) -> usize {
        1
    }

    fn constraint<T: DualNum<f64> + Copy>(&self, _time: Scalar, x: &[T], u: &[T]) -> Vec<T> {
        vec![x[0] * u[0] + x[1] * u[1]]
    }
}

fn problem() -> DdpResult<OptimalControlProblem> {
    let target = TargetTrajectories::constant(Vector::zeros(2), Vector::zeros(2));
    let mut problem = OptimalControlProblem::new(Box::new(CircularKinematics), target);
    problem.cost.add("circle", Box::new(AutoDiffCost::new(CircleCost)))?;
    problem
        .equality_constraint
        .add("tangency", Box::new(AutoDiffConstraint::new(Tangency)))?;
    Ok(problem)
}

fn solve(settings: Settings) -> DdpResult<()> {
    let problem = Arc::new(problem()?);
    let mut solver: Box<dyn GaussNewtonDdp> = match settings.algorithm {
        Algorithm::Slq => Box::new(Slq::new(settings, problem)?),
        Algorithm::Ilqr => Box::new(Ilqr::new(settings, problem)?),
    };

    let init_state = State64 { x: 1.0, y: 0.0 }.to_dvector();
    solver.run(0.0, &init_state, 10.0, &[0.0, 5.0, 10.0])?;

    println!(
        "{} finished after {} iterations",
        solver.core().settings().algorithm,
        solver.num_iterations()
    );
    println!("{}", solver.performance_index());

    let solution = solver.primal_solution();
    if let (Some(&time), Some(state)) = (solution.time_trajectory.last(), solution.state_trajectory.last()) {
        let state = State64::from_dvector(state);
        let radius = (state.x * state.x + state.y * state.y).sqrt();
        println!("t = {time:.2}: {state:?}, radius {radius:.4}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let settings = match env::args().nth(1) {
        Some(path) => match Settings::from_file(&path) {
            Ok(settings) => settings,
            Err(err) => {
                eprintln!("failed to load settings from {path}: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => Settings::default(),
    };

    match solve(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
