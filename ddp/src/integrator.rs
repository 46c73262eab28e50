//! Explicit ODE integrators with fixed and adaptive step size.

use crate::error::IntegrationError;
use crate::settings::IntegratorType;
use crate::{Scalar, Vector};

/// Right-hand side `ẋ = f(t, x)`.
pub trait OdeSystem {
    fn derivative(&mut self, time: Scalar, state: &Vector) -> Vector;
}

impl<F> OdeSystem for F
where
    F: FnMut(Scalar, &Vector) -> Vector,
{
    fn derivative(&mut self, time: Scalar, state: &Vector) -> Vector {
        self(time, state)
    }
}

/// Records the (time, state) pairs emitted during integration.
#[derive(Debug, Clone, Default)]
pub struct Observer {
    times: Vec<Scalar>,
    states: Vec<Vector>,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, time: Scalar, state: &Vector) {
        self.times.push(time);
        self.states.push(state.clone());
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn times(&self) -> &[Scalar] {
        &self.times
    }

    pub fn states(&self) -> &[Vector] {
        &self.states
    }

    pub fn into_parts(self) -> (Vec<Scalar>, Vec<Vector>) {
        (self.times, self.states)
    }
}

/// Common interface of the integrators.
pub trait Integrator: Send + Sync {
    /// Integrates from `start_time` to `final_time`, observing the initial
    /// state and every accepted step.
    #[allow(clippy::too_many_arguments)]
    fn integrate_adaptive(
        &self,
        system: &mut dyn OdeSystem,
        observer: &mut Observer,
        initial_state: &Vector,
        start_time: Scalar,
        final_time: Scalar,
        dt_initial: Scalar,
        abs_tol: Scalar,
        rel_tol: Scalar,
        max_num_steps: usize,
    ) -> Result<Vector, IntegrationError>;

    /// Integrates through the non-decreasing `times`, observing the state
    /// exactly once per entry.
    #[allow(clippy::too_many_arguments)]
    fn integrate_times(
        &self,
        system: &mut dyn OdeSystem,
        observer: &mut Observer,
        initial_state: &Vector,
        times: &[Scalar],
        dt_initial: Scalar,
        abs_tol: Scalar,
        rel_tol: Scalar,
        max_num_steps: usize,
    ) -> Result<Vector, IntegrationError>;
}

pub fn new_integrator(integrator_type: IntegratorType) -> Box<dyn Integrator> {
    match integrator_type {
        IntegratorType::Euler => Box::new(Euler),
        IntegratorType::RungeKutta4 => Box::new(RungeKutta4),
        IntegratorType::Ode45 => Box::new(Ode45::default()),
    }
}

fn check_finite(time: Scalar, state: &Vector) -> Result<(), IntegrationError> {
    if state.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(IntegrationError::NonFinite { time })
    }
}

/// Single-step scheme with a fixed step size.
trait FixedStepper {
    fn step(&self, system: &mut dyn OdeSystem, time: Scalar, state: &Vector, dt: Scalar) -> Vector;
}

/// Advances from `t0` to `t1` in equal substeps no longer than `dt`.
fn fixed_steps_between(
    stepper: &dyn FixedStepper,
    system: &mut dyn OdeSystem,
    state: Vector,
    t0: Scalar,
    t1: Scalar,
    dt: Scalar,
    steps_taken: &mut usize,
    max_num_steps: usize,
) -> Result<Vector, IntegrationError> {
    let span = t1 - t0;
    if span <= 0.0 {
        return Ok(state);
    }
    let n = (span / dt).ceil().max(1.0) as usize;
    let h = span / n as Scalar;
    let mut x = state;
    for k in 0..n {
        *steps_taken += 1;
        if *steps_taken > max_num_steps {
            return Err(IntegrationError::MaxStepsExceeded {
                max_steps: max_num_steps,
                time: t0 + k as Scalar * h,
            });
        }
        x = stepper.step(system, t0 + k as Scalar * h, &x, h);
        check_finite(t0 + (k + 1) as Scalar * h, &x)?;
    }
    Ok(x)
}

fn fixed_integrate_adaptive(
    stepper: &dyn FixedStepper,
    system: &mut dyn OdeSystem,
    observer: &mut Observer,
    initial_state: &Vector,
    start_time: Scalar,
    final_time: Scalar,
    dt: Scalar,
    max_num_steps: usize,
) -> Result<Vector, IntegrationError> {
    let mut x = initial_state.clone();
    observer.observe(start_time, &x);
    let span = final_time - start_time;
    if span <= 0.0 {
        return Ok(x);
    }
    let n = (span / dt).ceil().max(1.0) as usize;
    if n > max_num_steps {
        return Err(IntegrationError::MaxStepsExceeded {
            max_steps: max_num_steps,
            time: start_time,
        });
    }
    let h = span / n as Scalar;
    for k in 0..n {
        let t = start_time + k as Scalar * h;
        x = stepper.step(system, t, &x, h);
        let t_next = if k + 1 == n { final_time } else { t + h };
        check_finite(t_next, &x)?;
        observer.observe(t_next, &x);
    }
    Ok(x)
}

fn fixed_integrate_times(
    stepper: &dyn FixedStepper,
    system: &mut dyn OdeSystem,
    observer: &mut Observer,
    initial_state: &Vector,
    times: &[Scalar],
    dt: Scalar,
    max_num_steps: usize,
) -> Result<Vector, IntegrationError> {
    let mut x = initial_state.clone();
    let Some(&first) = times.first() else {
        return Ok(x);
    };
    observer.observe(first, &x);
    let mut steps_taken = 0;
    for window in times.windows(2) {
        x = fixed_steps_between(stepper, system, x, window[0], window[1], dt, &mut steps_taken, max_num_steps)?;
        observer.observe(window[1], &x);
    }
    Ok(x)
}

/// Explicit Euler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euler;

impl FixedStepper for Euler {
    fn step(&self, system: &mut dyn OdeSystem, time: Scalar, state: &Vector, dt: Scalar) -> Vector {
        state + system.derivative(time, state) * dt
    }
}

/// Classic fourth order Runge-Kutta.
#[derive(Debug, Clone, Copy, Default)]
pub struct RungeKutta4;

impl FixedStepper for RungeKutta4 {
    fn step(&self, system: &mut dyn OdeSystem, time: Scalar, state: &Vector, dt: Scalar) -> Vector {
        let half = 0.5 * dt;
        let k1 = system.derivative(time, state);
        let k2 = system.derivative(time + half, &(state + &k1 * half));
        let k3 = system.derivative(time + half, &(state + &k2 * half));
        let k4 = system.derivative(time + dt, &(state + &k3 * dt));
        state + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
    }
}

macro_rules! impl_fixed_integrator {
    ($stepper:ty) => {
        impl Integrator for $stepper {
            fn integrate_adaptive(
                &self,
                system: &mut dyn OdeSystem,
                observer: &mut Observer,
                initial_state: &Vector,
                start_time: Scalar,
                final_time: Scalar,
                dt_initial: Scalar,
                _abs_tol: Scalar,
                _rel_tol: Scalar,
                max_num_steps: usize,
            ) -> Result<Vector, IntegrationError> {
                fixed_integrate_adaptive(
                    self,
                    system,
                    observer,
                    initial_state,
                    start_time,
                    final_time,
                    dt_initial,
                    max_num_steps,
                )
            }

            fn integrate_times(
                &self,
                system: &mut dyn OdeSystem,
                observer: &mut Observer,
                initial_state: &Vector,
                times: &[Scalar],
                dt_initial: Scalar,
                _abs_tol: Scalar,
                _rel_tol: Scalar,
                max_num_steps: usize,
            ) -> Result<Vector, IntegrationError> {
                fixed_integrate_times(self, system, observer, initial_state, times, dt_initial, max_num_steps)
            }
        }
    };
}

impl_fixed_integrator!(Euler);
impl_fixed_integrator!(RungeKutta4);

// Dormand-Prince 5(4) tableau
const C2: Scalar = 1.0 / 5.0;
const C3: Scalar = 3.0 / 10.0;
const C4: Scalar = 4.0 / 5.0;
const C5: Scalar = 8.0 / 9.0;

const A21: Scalar = 1.0 / 5.0;
const A31: Scalar = 3.0 / 40.0;
const A32: Scalar = 9.0 / 40.0;
const A41: Scalar = 44.0 / 45.0;
const A42: Scalar = -56.0 / 15.0;
const A43: Scalar = 32.0 / 9.0;
const A51: Scalar = 19372.0 / 6561.0;
const A52: Scalar = -25360.0 / 2187.0;
const A53: Scalar = 64448.0 / 6561.0;
const A54: Scalar = -212.0 / 729.0;
const A61: Scalar = 9017.0 / 3168.0;
const A62: Scalar = -355.0 / 33.0;
const A63: Scalar = 46732.0 / 5247.0;
const A64: Scalar = 49.0 / 176.0;
const A65: Scalar = -5103.0 / 18656.0;

const B1: Scalar = 35.0 / 384.0;
const B3: Scalar = 500.0 / 1113.0;
const B4: Scalar = 125.0 / 192.0;
const B5: Scalar = -2187.0 / 6784.0;
const B6: Scalar = 11.0 / 84.0;

const E1: Scalar = 71.0 / 57600.0;
const E3: Scalar = -71.0 / 16695.0;
const E4: Scalar = 71.0 / 1920.0;
const E5: Scalar = -17253.0 / 339200.0;
const E6: Scalar = 22.0 / 525.0;
const E7: Scalar = -1.0 / 40.0;

/// Dormand-Prince 5(4) with first-same-as-last reuse and max-norm error
/// control.
#[derive(Debug, Clone, Copy)]
pub struct Ode45 {
    pub safety: Scalar,
    pub min_factor: Scalar,
    pub max_factor: Scalar,
}

impl Default for Ode45 {
    fn default() -> Self {
        Self {
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 5.0,
        }
    }
}

struct Ode45State {
    time: Scalar,
    state: Vector,
    derivative: Vector,
    dt: Scalar,
    steps_taken: usize,
}

impl Ode45 {
    /// One trial step. Returns the new state, its derivative and the scaled
    /// error norm.
    fn try_step(
        &self,
        system: &mut dyn OdeSystem,
        t: Scalar,
        x: &Vector,
        k1: &Vector,
        h: Scalar,
        abs_tol: Scalar,
        rel_tol: Scalar,
    ) -> (Vector, Vector, Scalar) {
        let k2 = system.derivative(t + C2 * h, &(x + k1 * (A21 * h)));
        let k3 = system.derivative(t + C3 * h, &(x + (k1 * A31 + &k2 * A32) * h));
        let k4 = system.derivative(t + C4 * h, &(x + (k1 * A41 + &k2 * A42 + &k3 * A43) * h));
        let k5 = system.derivative(
            t + C5 * h,
            &(x + (k1 * A51 + &k2 * A52 + &k3 * A53 + &k4 * A54) * h),
        );
        let k6 = system.derivative(
            t + h,
            &(x + (k1 * A61 + &k2 * A62 + &k3 * A63 + &k4 * A64 + &k5 * A65) * h),
        );
        let x_new = x + (k1 * B1 + &k3 * B3 + &k4 * B4 + &k5 * B5 + &k6 * B6) * h;
        let k7 = system.derivative(t + h, &x_new);

        let err = (k1 * E1 + &k3 * E3 + &k4 * E4 + &k5 * E5 + &k6 * E6 + &k7 * E7) * h;
        let mut norm: Scalar = 0.0;
        for i in 0..x.len() {
            let scale = abs_tol + rel_tol * x[i].abs().max(x_new[i].abs());
            norm = norm.max(err[i].abs() / scale);
        }
        if err.iter().any(|e| !e.is_finite()) {
            norm = Scalar::NAN;
        }
        (x_new, k7, norm)
    }

    /// Advances `s` to exactly `t_end`, observing accepted steps if requested.
    #[allow(clippy::too_many_arguments)]
    fn advance(
        &self,
        system: &mut dyn OdeSystem,
        s: &mut Ode45State,
        t_end: Scalar,
        abs_tol: Scalar,
        rel_tol: Scalar,
        max_num_steps: usize,
        mut observer: Option<&mut Observer>,
    ) -> Result<(), IntegrationError> {
        while s.time < t_end {
            let remaining = t_end - s.time;
            let last = s.dt >= remaining;
            let h = if last { remaining } else { s.dt };

            s.steps_taken += 1;
            if s.steps_taken > max_num_steps {
                return Err(IntegrationError::MaxStepsExceeded {
                    max_steps: max_num_steps,
                    time: s.time,
                });
            }

            let (x_new, k7, err) = self.try_step(system, s.time, &s.state, &s.derivative, h, abs_tol, rel_tol);
            if err.is_nan() {
                return Err(IntegrationError::NonFinite { time: s.time });
            }

            if err <= 1.0 {
                s.time = if last { t_end } else { s.time + h };
                s.state = x_new;
                s.derivative = k7;
                check_finite(s.time, &s.state)?;
                if let Some(observer) = observer.as_deref_mut() {
                    observer.observe(s.time, &s.state);
                }
                let factor = if err == 0.0 {
                    self.max_factor
                } else {
                    (self.safety * err.powf(-0.2)).clamp(self.min_factor, self.max_factor)
                };
                // a step shortened to hit `t_end` does not shrink the next one
                if !last || h >= s.dt {
                    s.dt = h * factor;
                }
            } else {
                let factor = (self.safety * err.powf(-0.2)).max(self.min_factor);
                s.dt = h * factor;
                if s.dt < Scalar::EPSILON * s.time.abs().max(1.0) {
                    return Err(IntegrationError::StepSizeUnderflow {
                        step: s.dt,
                        time: s.time,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Integrator for Ode45 {
    fn integrate_adaptive(
        &self,
        system: &mut dyn OdeSystem,
        observer: &mut Observer,
        initial_state: &Vector,
        start_time: Scalar,
        final_time: Scalar,
        dt_initial: Scalar,
        abs_tol: Scalar,
        rel_tol: Scalar,
        max_num_steps: usize,
    ) -> Result<Vector, IntegrationError> {
        observer.observe(start_time, initial_state);
        let mut s = Ode45State {
            time: start_time,
            derivative: system.derivative(start_time, initial_state),
            state: initial_state.clone(),
            dt: dt_initial,
            steps_taken: 0,
        };
        self.advance(system, &mut s, final_time, abs_tol, rel_tol, max_num_steps, Some(observer))?;
        Ok(s.state)
    }

    fn integrate_times(
        &self,
        system: &mut dyn OdeSystem,
        observer: &mut Observer,
        initial_state: &Vector,
        times: &[Scalar],
        dt_initial: Scalar,
        abs_tol: Scalar,
        rel_tol: Scalar,
        max_num_steps: usize,
    ) -> Result<Vector, IntegrationError> {
        let Some(&first) = times.first() else {
            return Ok(initial_state.clone());
        };
        observer.observe(first, initial_state);
        let mut s = Ode45State {
            time: first,
            derivative: system.derivative(first, initial_state),
            state: initial_state.clone(),
            dt: dt_initial,
            steps_taken: 0,
        };
        for &t in &times[1..] {
            self.advance(system, &mut s, t, abs_tol, rel_tol, max_num_steps, None)?;
            observer.observe(t, &s.state);
        }
        Ok(s.state)
    }
}
