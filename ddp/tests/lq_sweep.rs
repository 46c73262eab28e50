//! LQ approximation over a trajectory with the worker pool.

use std::sync::Arc;

use ddp::autodiff::{AutoDiffCost, AutoDiffDynamics, DifferentiableCost, DifferentiableFlowMap};
use ddp::problem::LinearStateInputConstraint;
use ddp::{LinearQuadraticApproximator, Matrix, ModelData, OptimalControlProblem, Scalar, TargetTrajectories, ThreadPool, Vector};
use num_dual::DualNum;

struct Unicycle;

impl DifferentiableFlowMap for Unicycle {
    fn state_dim(&self) -> usize {
        3
    }
    fn input_dim(&self) -> usize {
        2
    }
    fn flow_map<T: DualNum<f64> + Copy>(&self, _time: Scalar, state: &[T], input: &[T]) -> Vec<T> {
        vec![state[2].cos() * input[0], state[2].sin() * input[0], input[1]]
    }
}

struct Tracking;

impl DifferentiableCost for Tracking {
    fn cost<T: DualNum<f64> + Copy>(&self, _: Scalar, x: &[T], u: &[T], xd: &[Scalar], ud: &[Scalar]) -> T {
        let ex = x[0] - xd[0];
        let ey = x[1] - xd[1];
        let eh = x[2] - xd[2];
        let ev = u[0] - ud[0];
        let ew = u[1] - ud[1];
        (ex * ex + ey * ey + eh * eh + (ev * ev + ew * ew) * 0.1) * 0.5
    }
}

fn approximator() -> LinearQuadraticApproximator {
    let target = TargetTrajectories::constant(Vector::from_vec(vec![1.0, 1.0, 0.0]), Vector::zeros(2));
    let mut problem = OptimalControlProblem::new(Box::new(AutoDiffDynamics::new(Unicycle)), target);
    problem.cost.add("tracking", Box::new(AutoDiffCost::new(Tracking))).unwrap();
    problem
        .equality_constraint
        .add(
            "forward_speed",
            Box::new(LinearStateInputConstraint::new(
                Vector::from_element(1, -0.5),
                Matrix::zeros(1, 3),
                Matrix::from_row_slice(1, 2, &[1.0, 0.0]),
            )),
        )
        .unwrap();
    LinearQuadraticApproximator::new(Arc::new(problem), true)
}

fn sweep(num_threads: usize, approximator: &LinearQuadraticApproximator) -> Vec<ModelData> {
    let pool = ThreadPool::new(num_threads).unwrap();
    let workers = vec![approximator.clone(); pool.num_workers()];
    pool.sweep(200, |worker, k| {
        let t = k as Scalar * 0.01;
        let state = Vector::from_vec(vec![t, t.sin(), 0.3 * t]);
        let input = Vector::from_vec(vec![0.5, t.cos()]);
        Ok(workers[worker].approximate_lq_problem(t, &state, &input)?.value)
    })
    .unwrap()
}

#[test]
fn test_parallel_sweep_matches_sequential() {
    let approximator = approximator();
    let sequential = sweep(0, &approximator);
    let parallel = sweep(4, &approximator);

    assert_eq!(sequential.len(), 200);
    assert_eq!(sequential, parallel);
    for (k, model) in parallel.iter().enumerate() {
        assert_eq!(model.time, k as Scalar * 0.01);
        assert_eq!(model.state_input_eq_constr.f.len(), 1);
    }
}
