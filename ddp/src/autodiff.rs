//! Forward-mode automatic differentiation of user models with `num-dual`.
//!
//! Models are written once, generic over `T: DualNum<f64>`, and the
//! wrappers here turn them into problem terms: [`Dual64`] seeds give
//! Jacobians, [`HyperDual64`] seeds give exact Hessians.

use named_vec_ops::NamedVecOps;
use num_dual::{Dual64, DualNum, HyperDual64};
use nalgebra::SVector;

use crate::approximation::{ScalarFunctionQuadraticApproximation, VectorFunctionLinearApproximation};
use crate::problem::{StateInputConstraint, StateInputCost, SystemDynamics, TargetTrajectories};
use crate::{Matrix, Scalar, Vector};

/// `ẋ = f(t, x, u)` written for any dual number type.
pub trait DifferentiableFlowMap: Send + Sync {
    fn state_dim(&self) -> usize;
    fn input_dim(&self) -> usize;
    fn flow_map<T: DualNum<f64> + Copy>(&self, time: Scalar, state: &[T], input: &[T]) -> Vec<T>;
}

/// `L(t, x, u)` with the target state and input passed in.
pub trait DifferentiableCost: Send + Sync {
    fn cost<T: DualNum<f64> + Copy>(
        &self,
        time: Scalar,
        state: &[T],
        input: &[T],
        desired_state: &[Scalar],
        desired_input: &[Scalar],
    ) -> T;
}

/// `g(t, x, u)` written for any dual number type.
pub trait DifferentiableConstraint: Send + Sync {
    fn num_constraints(&self, time: Scalar) -> usize;
    fn constraint<T: DualNum<f64> + Copy>(&self, time: Scalar, state: &[T], input: &[T]) -> Vec<T>;
}

fn to_dual(values: &[Scalar]) -> Vec<Dual64> {
    values.iter().map(|&v| Dual64::from(v)).collect()
}

/// Value and Jacobians of `f` at `(x, u)`, one directional pass per variable.
pub fn jacobians<F>(f: F, x: &[Scalar], u: &[Scalar]) -> VectorFunctionLinearApproximation
where
    F: Fn(&[Dual64], &[Dual64]) -> Vec<Dual64>,
{
    let x_dual = to_dual(x);
    let u_dual = to_dual(u);

    let value: Vec<Scalar> = f(&x_dual, &u_dual).iter().map(|v| v.re).collect();
    let rows = value.len();
    let mut dfdx = Matrix::zeros(rows, x.len());
    let mut dfdu = Matrix::zeros(rows, u.len());

    for i in 0..x.len() {
        let mut perturbed = x_dual.clone();
        perturbed[i].eps = 1.0;
        for (j, d) in f(&perturbed, &u_dual).iter().enumerate() {
            dfdx[(j, i)] = d.eps;
        }
    }

    for i in 0..u.len() {
        let mut perturbed = u_dual.clone();
        perturbed[i].eps = 1.0;
        for (j, d) in f(&x_dual, &perturbed).iter().enumerate() {
            dfdu[(j, i)] = d.eps;
        }
    }

    VectorFunctionLinearApproximation {
        f: Vector::from_vec(value),
        dfdx,
        dfdu,
    }
}

/// Value, gradient and Hessian of the scalar function `f` at `(x, u)`.
pub fn quadratic_approximation<F>(f: F, x: &[Scalar], u: &[Scalar]) -> ScalarFunctionQuadraticApproximation
where
    F: Fn(&[HyperDual64], &[HyperDual64]) -> HyperDual64,
{
    let n = x.len();
    let m = u.len();
    let z: Vec<Scalar> = x.iter().chain(u.iter()).copied().collect();
    let dim = n + m;

    let eval = |i: usize, j: usize| {
        let seeded: Vec<HyperDual64> = z
            .iter()
            .enumerate()
            .map(|(k, &v)| {
                let eps1 = if k == i { 1.0 } else { 0.0 };
                let eps2 = if k == j { 1.0 } else { 0.0 };
                HyperDual64::new(v, eps1, eps2, 0.0)
            })
            .collect();
        f(&seeded[..n], &seeded[n..])
    };

    let mut value = 0.0;
    let mut gradient = Vector::zeros(dim);
    let mut hessian = Matrix::zeros(dim, dim);
    for i in 0..dim {
        for j in i..dim {
            let result = eval(i, j);
            hessian[(i, j)] = result.eps1eps2;
            hessian[(j, i)] = result.eps1eps2;
            if i == j {
                gradient[i] = result.eps1;
                value = result.re;
            }
        }
    }
    if dim == 0 {
        value = eval(usize::MAX, usize::MAX).re;
    }

    ScalarFunctionQuadraticApproximation {
        f: value,
        dfdx: gradient.rows(0, n).into_owned(),
        dfdu: gradient.rows(n, m).into_owned(),
        dfdxx: hessian.view((0, 0), (n, n)).into_owned(),
        dfduu: hessian.view((n, n), (m, m)).into_owned(),
        dfdux: hessian.view((n, 0), (m, n)).into_owned(),
    }
}

/// System dynamics differentiated automatically.
pub struct AutoDiffDynamics<F> {
    model: F,
}

impl<F: DifferentiableFlowMap> AutoDiffDynamics<F> {
    pub fn new(model: F) -> Self {
        Self { model }
    }
}

impl<F: DifferentiableFlowMap> SystemDynamics for AutoDiffDynamics<F> {
    fn state_dim(&self) -> usize {
        self.model.state_dim()
    }

    fn input_dim(&self) -> usize {
        self.model.input_dim()
    }

    fn flow_map(&self, time: Scalar, state: &Vector, input: &Vector) -> Vector {
        Vector::from_vec(self.model.flow_map(time, state.as_slice(), input.as_slice()))
    }

    fn linear_approximation(&self, time: Scalar, state: &Vector, input: &Vector) -> VectorFunctionLinearApproximation {
        jacobians(|x, u| self.model.flow_map(time, x, u), state.as_slice(), input.as_slice())
    }
}

/// Running cost with exact Hessians.
pub struct AutoDiffCost<C> {
    model: C,
}

impl<C: DifferentiableCost> AutoDiffCost<C> {
    pub fn new(model: C) -> Self {
        Self { model }
    }
}

impl<C: DifferentiableCost> StateInputCost for AutoDiffCost<C> {
    fn value(&self, time: Scalar, state: &Vector, input: &Vector, target: &TargetTrajectories) -> Scalar {
        let xd = target.desired_state(time);
        let ud = target.desired_input(time);
        self.model
            .cost(time, state.as_slice(), input.as_slice(), xd.as_slice(), ud.as_slice())
    }

    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        target: &TargetTrajectories,
    ) -> ScalarFunctionQuadraticApproximation {
        let xd = target.desired_state(time);
        let ud = target.desired_input(time);
        quadratic_approximation(
            |x, u| self.model.cost(time, x, u, xd.as_slice(), ud.as_slice()),
            state.as_slice(),
            input.as_slice(),
        )
    }
}

/// State-input constraint differentiated automatically.
pub struct AutoDiffConstraint<G> {
    model: G,
}

impl<G: DifferentiableConstraint> AutoDiffConstraint<G> {
    pub fn new(model: G) -> Self {
        Self { model }
    }
}

impl<G: DifferentiableConstraint> StateInputConstraint for AutoDiffConstraint<G> {
    fn num_constraints(&self, time: Scalar) -> usize {
        self.model.num_constraints(time)
    }

    fn value(&self, time: Scalar, state: &Vector, input: &Vector) -> Vector {
        Vector::from_vec(self.model.constraint(time, state.as_slice(), input.as_slice()))
    }

    fn linear_approximation(&self, time: Scalar, state: &Vector, input: &Vector) -> VectorFunctionLinearApproximation {
        jacobians(|x, u| self.model.constraint(time, x, u), state.as_slice(), input.as_slice())
    }
}

/// Linearizes a model written on named state and input structs.
///
/// `dynamics_f` is evaluated on the dual number versions `XDT`/`UDT` of the
/// state and input types; `params` is passed through untouched.
pub fn linearize_named<F, XDT, UDT, XT, UT, PT, const XN: usize, const UN: usize>(
    dynamics_f: F,
    x: &XT,
    u: &UT,
    params: &PT,
) -> VectorFunctionLinearApproximation
where
    XDT: NamedVecOps<Dual64, XN>,
    UDT: NamedVecOps<Dual64, UN>,
    XT: NamedVecOps<f64, XN>,
    UT: NamedVecOps<f64, UN>,
    F: Fn(&XDT, &UDT, &PT) -> XDT,
{
    let x_dual_svec: SVector<Dual64, XN> = x.to_svector().map(Dual64::from);
    let u_dual_svec: SVector<Dual64, UN> = u.to_svector().map(Dual64::from);

    let x_dual = XDT::from_svector(&x_dual_svec);
    let u_dual = UDT::from_svector(&u_dual_svec);

    let make_perturbed_dual_x = |i: usize| {
        let mut perturbed = x_dual_svec;
        perturbed[i].eps = 1.0;
        XDT::from_svector(&perturbed)
    };

    let make_perturbed_dual_u = |i: usize| {
        let mut perturbed = u_dual_svec;
        perturbed[i].eps = 1.0;
        UDT::from_svector(&perturbed)
    };

    let value = dynamics_f(&x_dual, &u_dual, params).to_svector();
    let mut a = Matrix::zeros(XN, XN);
    let mut b = Matrix::zeros(XN, UN);

    for i in 0..XN {
        let dfds = dynamics_f(&make_perturbed_dual_x(i), &u_dual, params).to_svector();
        for j in 0..XN {
            a[(j, i)] = dfds[j].eps;
        }
    }

    for i in 0..UN {
        let dfdc = dynamics_f(&x_dual, &make_perturbed_dual_u(i), params).to_svector();
        for j in 0..XN {
            b[(j, i)] = dfdc[j].eps;
        }
    }

    VectorFunctionLinearApproximation {
        f: Vector::from_iterator(XN, value.iter().map(|v| v.re)),
        dfdx: a,
        dfdu: b,
    }
}
