use std::collections::BTreeMap;

use crate::approximation::{VectorFunctionLinearApproximation, VectorFunctionQuadraticApproximation};
use crate::error::{DdpError, DdpResult};
use crate::{Matrix, Scalar, Vector};

/// Constraint `g(t, x, u) = 0` (or `≥ 0` when used as inequality).
pub trait StateInputConstraint: Send + Sync {
    fn is_active(&self, _time: Scalar) -> bool {
        true
    }

    fn num_constraints(&self, time: Scalar) -> usize;

    fn value(&self, time: Scalar, state: &Vector, input: &Vector) -> Vector;

    fn linear_approximation(&self, time: Scalar, state: &Vector, input: &Vector) -> VectorFunctionLinearApproximation;

    /// Defaults to the linear approximation with zero curvature.
    fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
    ) -> VectorFunctionQuadraticApproximation {
        with_zero_curvature(self.linear_approximation(time, state, input))
    }
}

/// Constraint `h(t, x) = 0`. Approximations carry an empty input Jacobian.
pub trait StateConstraint: Send + Sync {
    fn is_active(&self, _time: Scalar) -> bool {
        true
    }

    fn num_constraints(&self, time: Scalar) -> usize;

    fn value(&self, time: Scalar, state: &Vector) -> Vector;

    fn linear_approximation(&self, time: Scalar, state: &Vector) -> VectorFunctionLinearApproximation;
}

fn with_zero_curvature(linear: VectorFunctionLinearApproximation) -> VectorFunctionQuadraticApproximation {
    let rows = linear.rows();
    let n = linear.dfdx.ncols();
    let m = linear.dfdu.ncols();
    VectorFunctionQuadraticApproximation {
        f: linear.f,
        dfdx: linear.dfdx,
        dfdu: linear.dfdu,
        dfdxx: vec![Matrix::zeros(n, n); rows],
        dfduu: vec![Matrix::zeros(m, m); rows],
        dfdux: vec![Matrix::zeros(m, n); rows],
    }
}

/// Named constraint terms whose active rows are stacked in name order.
pub struct ConstraintCollection<C: ?Sized> {
    terms: BTreeMap<String, Box<C>>,
}

pub type StateInputConstraintCollection = ConstraintCollection<dyn StateInputConstraint>;
pub type StateConstraintCollection = ConstraintCollection<dyn StateConstraint>;

impl<C: ?Sized> Default for ConstraintCollection<C> {
    fn default() -> Self {
        Self {
            terms: BTreeMap::new(),
        }
    }
}

impl<C: ?Sized> ConstraintCollection<C> {
    pub fn new() -> Self {
        Self::default()
    }

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

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl ConstraintCollection<dyn StateInputConstraint> {
    pub fn num_constraints(&self, time: Scalar) -> usize {
        self.active(time).map(|term| term.num_constraints(time)).sum()
    }

    fn active(&self, time: Scalar) -> impl Iterator<Item = &dyn StateInputConstraint> {
        self.terms
            .values()
            .filter(move |term| term.is_active(time))
            .map(|term| term.as_ref())
    }

    pub fn value(&self, time: Scalar, state: &Vector, input: &Vector) -> Vector {
        let values: Vec<Scalar> = self
            .active(time)
            .flat_map(|term| term.value(time, state, input).iter().copied().collect::<Vec<_>>())
            .collect();
        Vector::from_vec(values)
    }

    pub fn linear_approximation(&self, time: Scalar, state: &Vector, input: &Vector) -> VectorFunctionLinearApproximation {
        self.active(time).fold(
            VectorFunctionLinearApproximation::zero(0, state.len(), input.len()),
            |stacked, term| stacked.stack(&term.linear_approximation(time, state, input)),
        )
    }

    pub fn quadratic_approximation(
        &self,
        time: Scalar,
        state: &Vector,
        input: &Vector,
    ) -> VectorFunctionQuadraticApproximation {
        let mut stacked = VectorFunctionQuadraticApproximation::zero(0, state.len(), input.len());
        for term in self.active(time) {
            let approx = term.quadratic_approximation(time, state, input);
            let linear = stacked.linear_part().stack(&approx.linear_part());
            stacked.f = linear.f;
            stacked.dfdx = linear.dfdx;
            stacked.dfdu = linear.dfdu;
            stacked.dfdxx.extend(approx.dfdxx);
            stacked.dfduu.extend(approx.dfduu);
            stacked.dfdux.extend(approx.dfdux);
        }
        stacked
    }
}

impl ConstraintCollection<dyn StateConstraint> {
    pub fn num_constraints(&self, time: Scalar) -> usize {
        self.active(time).map(|term| term.num_constraints(time)).sum()
    }

    fn active(&self, time: Scalar) -> impl Iterator<Item = &dyn StateConstraint> {
        self.terms
            .values()
            .filter(move |term| term.is_active(time))
            .map(|term| term.as_ref())
    }

    pub fn value(&self, time: Scalar, state: &Vector) -> Vector {
        let values: Vec<Scalar> = self
            .active(time)
            .flat_map(|term| term.value(time, state).iter().copied().collect::<Vec<_>>())
            .collect();
        Vector::from_vec(values)
    }

    pub fn linear_approximation(&self, time: Scalar, state: &Vector) -> VectorFunctionLinearApproximation {
        self.active(time).fold(
            VectorFunctionLinearApproximation::zero(0, state.len(), 0),
            |stacked, term| stacked.stack(&term.linear_approximation(time, state)),
        )
    }
}

/// `g = e + C x + D u`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearStateInputConstraint {
    e: Vector,
    c: Matrix,
    d: Matrix,
}

impl LinearStateInputConstraint {
    pub fn new(e: Vector, c: Matrix, d: Matrix) -> Self {
        Self { e, c, d }
    }
}

impl StateInputConstraint for LinearStateInputConstraint {
    fn num_constraints(&self, _time: Scalar) -> usize {
        self.e.len()
    }

    fn value(&self, _time: Scalar, state: &Vector, input: &Vector) -> Vector {
        &self.e + &self.c * state + &self.d * input
    }

    fn linear_approximation(&self, time: Scalar, state: &Vector, input: &Vector) -> VectorFunctionLinearApproximation {
        VectorFunctionLinearApproximation {
            f: self.value(time, state, input),
            dfdx: self.c.clone(),
            dfdu: self.d.clone(),
        }
    }
}

/// `h = e + F x`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearStateConstraint {
    e: Vector,
    f: Matrix,
}

impl LinearStateConstraint {
    pub fn new(e: Vector, f: Matrix) -> Self {
        Self { e, f }
    }
}

impl StateConstraint for LinearStateConstraint {
    fn num_constraints(&self, _time: Scalar) -> usize {
        self.e.len()
    }

    fn value(&self, _time: Scalar, state: &Vector) -> Vector {
        &self.e + &self.f * state
    }

    fn linear_approximation(&self, time: Scalar, state: &Vector) -> VectorFunctionLinearApproximation {
        VectorFunctionLinearApproximation {
            f: self.value(time, state),
            dfdx: self.f.clone(),
            dfdu: Matrix::zeros(self.e.len(), 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ActiveAfter(Scalar);

    impl StateInputConstraint for ActiveAfter {
        fn is_active(&self, time: Scalar) -> bool {
            time >= self.0
        }
        fn num_constraints(&self, _: Scalar) -> usize {
            1
        }
        fn value(&self, _: Scalar, state: &Vector, _: &Vector) -> Vector {
            Vector::from_element(1, state[0])
        }
        fn linear_approximation(&self, time: Scalar, state: &Vector, input: &Vector) -> VectorFunctionLinearApproximation {
            let mut lin = VectorFunctionLinearApproximation::zero(1, state.len(), input.len());
            lin.f = self.value(time, state, input);
            lin.dfdx[(0, 0)] = 1.0;
            lin
        }
    }

    #[test]
    fn test_stacking_active_rows() {
        let mut collection = StateInputConstraintCollection::new();
        collection
            .add(
                "a_linear",
                Box::new(LinearStateInputConstraint::new(
                    Vector::from_vec(vec![1.0]),
                    Matrix::zeros(1, 2),
                    Matrix::from_row_slice(1, 2, &[1.0, 1.0]),
                )),
            )
            .unwrap();
        collection.add("b_late", Box::new(ActiveAfter(1.0))).unwrap();

        let x = Vector::from_vec(vec![3.0, 0.0]);
        let u = Vector::from_vec(vec![1.0, 2.0]);

        assert_eq!(collection.num_constraints(0.0), 1);
        assert_eq!(collection.value(0.0, &x, &u), Vector::from_vec(vec![4.0]));

        let lin = collection.linear_approximation(2.0, &x, &u);
        assert_eq!(lin.rows(), 2);
        assert_eq!(lin.f, Vector::from_vec(vec![4.0, 3.0]));
        assert_eq!(lin.dfdx[(1, 0)], 1.0);

        let quad = collection.quadratic_approximation(2.0, &x, &u);
        assert_eq!(quad.rows(), 2);
        assert_eq!(quad.dfdxx.len(), 2);
    }

    #[test]
    fn test_empty_collection() {
        let collection = StateConstraintCollection::new();
        let lin = collection.linear_approximation(0.0, &Vector::zeros(3));
        assert_eq!(lin.rows(), 0);
        assert_eq!(lin.dfdx.shape(), (0, 3));
        assert!(collection.is_empty());
    }
}
