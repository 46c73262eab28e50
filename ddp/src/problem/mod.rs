//! Optimal control problem definition: dynamics, costs and constraints.

pub mod constraint;
pub mod cost;
pub mod dynamics;
pub mod mode_schedule;
pub mod soft_constraint;
pub mod target;

pub use constraint::{
    ConstraintCollection, LinearStateConstraint, LinearStateInputConstraint, StateConstraint,
    StateConstraintCollection, StateInputConstraint, StateInputConstraintCollection,
};
pub use cost::{
    CostCollection, QuadraticStateCost, QuadraticStateInputCost, StateCost, StateCostCollection,
    StateInputCost, StateInputCostCollection,
};
pub use dynamics::{LinearSystemDynamics, SystemDynamics};
pub use mode_schedule::ModeSchedule;
pub use soft_constraint::{
    PenaltyFunction, QuadraticPenalty, RelaxedBarrierPenalty, SoftConstraintPenalty,
    StateInputSoftConstraint, StateSoftConstraint,
};
pub use target::TargetTrajectories;

/// Everything the solver needs to know about the problem.
///
/// Collections start empty; terms are added by name.
pub struct OptimalControlProblem {
    pub dynamics: Box<dyn SystemDynamics>,

    pub cost: StateInputCostCollection,
    pub state_cost: StateCostCollection,
    pub pre_jump_cost: StateCostCollection,
    pub final_cost: StateCostCollection,

    pub equality_constraint: StateInputConstraintCollection,
    pub state_equality_constraint: StateConstraintCollection,
    pub inequality_constraint: StateInputConstraintCollection,
    pub pre_jump_equality_constraint: StateConstraintCollection,
    pub final_equality_constraint: StateConstraintCollection,

    pub target_trajectories: TargetTrajectories,
}

impl OptimalControlProblem {
    pub fn new(dynamics: Box<dyn SystemDynamics>, target_trajectories: TargetTrajectories) -> Self {
        Self {
            dynamics,
            cost: CostCollection::new(),
            state_cost: CostCollection::new(),
            pre_jump_cost: CostCollection::new(),
            final_cost: CostCollection::new(),
            equality_constraint: ConstraintCollection::new(),
            state_equality_constraint: ConstraintCollection::new(),
            inequality_constraint: ConstraintCollection::new(),
            pre_jump_equality_constraint: ConstraintCollection::new(),
            final_equality_constraint: ConstraintCollection::new(),
            target_trajectories,
        }
    }

    pub fn state_dim(&self) -> usize {
        self.dynamics.state_dim()
    }

    pub fn input_dim(&self) -> usize {
        self.dynamics.input_dim()
    }
}
