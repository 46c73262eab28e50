use std::collections::BTreeMap;

use crate::approximation::ScalarFunctionQuadraticApproximation;
use crate::error::{DdpError, DdpResult};
use crate::problem::target::TargetTrajectories;
use crate::{Matrix, Scalar, Vector};

/// Running cost `L(t, x, u)`.
pub trait StateInputCost: Send + Sync {
    fn is_active(&self) -> bool {
        true
    }

    fn value(&self, time: Scalar, state: &Vector, input: &Vector, target: &TargetTrajectories) -> Scalar;

    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        target: &TargetTrajectories,
    ) -> ScalarFunctionQuadraticApproximation;
}

/// State-only cost `Φ(t, x)`, used as running, pre-jump and final cost.
///
/// The quadratic approximation carries empty input derivatives.
pub trait StateCost: Send + Sync {
    fn is_active(&self) -> bool {
        true
    }

    fn value(&self, time: Scalar, state: &Vector, target: &TargetTrajectories) -> Scalar;

    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        target: &TargetTrajectories,
    ) -> ScalarFunctionQuadraticApproximation;
}

/// Named cost terms, evaluated in name order.
pub struct CostCollection<C: ?Sized> {
    terms: BTreeMap<String, Box<C>>,
}

pub type StateInputCostCollection = CostCollection<dyn StateInputCost>;
pub type StateCostCollection = CostCollection<dyn StateCost>;

impl<C: ?Sized> Default for CostCollection<C> {
    fn default() -> Self {
        Self {
            terms: BTreeMap::new(),
        }
    }
}

impl<C: ?Sized> CostCollection<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a term. Names must be unique.
    pub fn add(&mut self, name: impl Into<String>, term: Box<C>) -> DdpResult<()> {
        let name = name.into();
        if self.terms.contains_key(&name) {
            return Err(DdpError::DuplicateTerm(name));
        }
        self.terms.insert(name, term);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&C> {
        self.terms.get(name).map(|t| t.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut C> {
        self.terms.get_mut(name).map(|t| t.as_mut())
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl CostCollection<dyn StateInputCost> {
    pub fn value(&self, time: Scalar, state: &Vector, input: &Vector, target: &TargetTrajectories) -> Scalar {
        self.terms
            .values()
            .filter(|term| term.is_active())
            .map(|term| term.value(time, state, input, target))
            .sum()
    }

    pub fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        target: &TargetTrajectories,
    ) -> ScalarFunctionQuadraticApproximation {
        let mut cost = ScalarFunctionQuadraticApproximation::zero(state.len(), input.len());
        for term in self.terms.values().filter(|term| term.is_active()) {
            cost += &term.quadratic_approximation(time, state, input, target);
        }
        cost
    }
}

impl CostCollection<dyn StateCost> {
    pub fn value(&self, time: Scalar, state: &Vector, target: &TargetTrajectories) -> Scalar {
        self.terms
            .values()
            .filter(|term| term.is_active())
            .map(|term| term.value(time, state, target))
            .sum()
    }

    pub fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        target: &TargetTrajectories,
    ) -> ScalarFunctionQuadraticApproximation {
        let mut cost = ScalarFunctionQuadraticApproximation::zero(state.len(), 0);
        for term in self.terms.values().filter(|term| term.is_active()) {
            let approx = term.quadratic_approximation(time, state, target);
            cost.f += approx.f;
            cost.dfdx += &approx.dfdx;
            cost.dfdxx += &approx.dfdxx;
        }
        cost
    }
}

/// Adds the state derivatives of `state_cost` to `cost`.
pub fn add_state_cost(
    cost: &mut ScalarFunctionQuadraticApproximation,
    state_cost: &ScalarFunctionQuadraticApproximation,
) {
    cost.f += state_cost.f;
    cost.dfdx += &state_cost.dfdx;
    cost.dfdxx += &state_cost.dfdxx;
}

/// `½ δxᵀ Q δx + ½ δuᵀ R δu + δuᵀ P δx` around the target trajectories.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticStateInputCost {
    q: Matrix,
    r: Matrix,
    p: Matrix,
}

impl QuadraticStateInputCost {
    pub fn new(q: Matrix, r: Matrix) -> Self {
        let p = Matrix::zeros(r.nrows(), q.nrows());
        Self { q, r, p }
    }

    pub fn with_cross_term(mut self, p: Matrix) -> Self {
        self.p = p;
        self
    }

    fn deviations(&self, time: Scalar, state: &Vector, input: &Vector, target: &TargetTrajectories) -> (Vector, Vector) {
        (state - target.desired_state(time), input - target.desired_input(time))
    }
}

impl StateInputCost for QuadraticStateInputCost {
    fn value(&self, time: Scalar, state: &Vector, input: &Vector, target: &TargetTrajectories) -> Scalar {
        let (dx, du) = self.deviations(time, state, input, target);
        0.5 * dx.dot(&(&self.q * &dx)) + 0.5 * du.dot(&(&self.r * &du)) + du.dot(&(&self.p * &dx))
    }

    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
        target: &TargetTrajectories,
    ) -> ScalarFunctionQuadraticApproximation {
        let (dx, du) = self.deviations(time, state, input, target);
        ScalarFunctionQuadraticApproximation {
            f: self.value(time, state, input, target),
            dfdx: &self.q * &dx + self.p.transpose() * &du,
            dfdu: &self.r * &du + &self.p * &dx,
            dfdxx: self.q.clone(),
            dfduu: self.r.clone(),
            dfdux: self.p.clone(),
        }
    }
}

/// `½ δxᵀ Q δx` around the target state.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticStateCost {
    q: Matrix,
}

impl QuadraticStateCost {
    pub fn new(q: Matrix) -> Self {
        Self { q }
    }
}

impl StateCost for QuadraticStateCost {
    fn value(&self, time: Scalar, state: &Vector, target: &TargetTrajectories) -> Scalar {
        let dx = state - target.desired_state(time);
        0.5 * dx.dot(&(&self.q * &dx))
    }

    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        target: &TargetTrajectories,
    ) -> ScalarFunctionQuadraticApproximation {
        let dx = state - target.desired_state(time);
        let n = state.len();
        ScalarFunctionQuadraticApproximation {
            f: 0.5 * dx.dot(&(&self.q * &dx)),
            dfdx: &self.q * &dx,
            dfdu: Vector::zeros(0),
            dfdxx: self.q.clone(),
            dfduu: Matrix::zeros(0, 0),
            dfdux: Matrix::zeros(0, n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Inactive;

    impl StateInputCost for Inactive {
        fn is_active(&self) -> bool {
            false
        }
        fn value(&self, _: Scalar, _: &Vector, _: &Vector, _: &TargetTrajectories) -> Scalar {
            100.0
        }
        fn quadratic_approximation(
            &self,
            _: Scalar,
            state: &Vector,
            input: &Vector,
            _: &TargetTrajectories,
        ) -> ScalarFunctionQuadraticApproximation {
            let mut approx = ScalarFunctionQuadraticApproximation::zero(state.len(), input.len());
            approx.f = 100.0;
            approx
        }
    }

    fn target() -> TargetTrajectories {
        TargetTrajectories::constant(Vector::from_vec(vec![1.0, 0.0]), Vector::zeros(1))
    }

    #[test]
    fn test_collection_sums_active_terms() {
        let mut collection = StateInputCostCollection::new();
        collection
            .add("quadratic", Box::new(QuadraticStateInputCost::new(Matrix::identity(2, 2), Matrix::identity(1, 1))))
            .unwrap();
        collection.add("inactive", Box::new(Inactive)).unwrap();

        let x = Vector::from_vec(vec![2.0, 1.0]);
        let u = Vector::from_vec(vec![2.0]);
        assert_relative_eq!(collection.value(0.0, &x, &u, &target()), 3.0);

        let approx = collection.quadratic_approximation(0.0, &x, &u, &target());
        assert_relative_eq!(approx.f, 3.0);
        assert_relative_eq!(approx.dfdx, Vector::from_vec(vec![1.0, 1.0]));
        assert_relative_eq!(approx.dfdu, Vector::from_vec(vec![2.0]));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut collection = StateCostCollection::new();
        collection.add("q", Box::new(QuadraticStateCost::new(Matrix::identity(2, 2)))).unwrap();
        let err = collection.add("q", Box::new(QuadraticStateCost::new(Matrix::identity(2, 2))));
        assert!(matches!(err, Err(DdpError::DuplicateTerm(name)) if name == "q"));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_state_cost_approximation() {
        let mut collection = StateCostCollection::new();
        collection.add("q", Box::new(QuadraticStateCost::new(Matrix::identity(2, 2) * 2.0))).unwrap();
        let approx = collection.quadratic_approximation(0.0, &Vector::from_vec(vec![2.0, 0.0]), &target());
        assert_relative_eq!(approx.f, 1.0);
        assert_relative_eq!(approx.dfdx[0], 2.0);
        assert_eq!(approx.dfdu.len(), 0);
    }
}
