//! Damped least-squares inverse kinematics.
//!
//! The solver drives the end-effector of a differentiable kinematic model towards a target
//! position, or a target pose, by repeatedly solving the damped normal equations
//!
//! ```text
//! dq = J^T (J J^T + damping^2 I)^-1 e
//! ```
//!
//! where `J` is the task Jacobian and `e` the task error. Every iterate is clamped to the
//! joint limits. When the residual stays above the tolerance the solver restarts from
//! randomly sampled joint positions and keeps the best solution it found. It never fails,
//! callers inspect the [InverseKinematicsReport] when they need a convergence guarantee.

extern crate nalgebra as na;

use na::{DMatrix, DVector, Isometry3, Point3};
use rand::{rngs::StdRng, Rng};
use tracing::{debug, trace, warn};

use crate::model_elements::frame_elements::{JointKind, JointLimits};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "inverse_kinematics_tests.rs"]
mod inverse_kinematics_tests;

/// Defines the numerical settings of the inverse kinematics solver.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InverseKinematicsConfig {
    /// The maximum number of iterations for a single attempt.
    max_iterations: usize,

    /// The largest acceptable distance between the end-effector and the target, in meters.
    position_tolerance: f64,

    /// The largest acceptable orientation error, in radians. Only used for pose targets.
    orientation_tolerance: f64,

    /// The damping factor of the least-squares step.
    damping: f64,

    /// The largest norm of a single step in joint space.
    max_step: f64,

    /// Indicates if the solver restarts from random joint positions when an attempt does
    /// not converge.
    random_restarts: bool,

    /// The maximum number of random restarts.
    max_restarts: usize,

    /// The seed for the random restarts. Chains seed from entropy when no seed is given.
    seed: Option<u64>,
}

impl InverseKinematicsConfig {
    /// Returns the damping factor of the least-squares step.
    pub fn damping(&self) -> f64 {
        self.damping
    }

    /// Returns the maximum number of iterations for a single attempt.
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Returns the maximum number of random restarts.
    pub fn max_restarts(&self) -> usize {
        self.max_restarts
    }

    /// Returns the largest norm of a single step in joint space.
    pub fn max_step(&self) -> f64 {
        self.max_step
    }

    /// Creates a new [InverseKinematicsConfig] with the default settings.
    pub fn new() -> Self {
        Self {
            max_iterations: 100,
            position_tolerance: 1e-6,
            orientation_tolerance: 1e-6,
            damping: 1e-2,
            max_step: 0.5,
            random_restarts: true,
            max_restarts: 10,
            seed: None,
        }
    }

    /// Returns the largest acceptable orientation error, in radians.
    pub fn orientation_tolerance(&self) -> f64 {
        self.orientation_tolerance
    }

    /// Returns the largest acceptable position error, in meters.
    pub fn position_tolerance(&self) -> f64 {
        self.position_tolerance
    }

    /// Returns a value indicating if random restarts are enabled.
    pub fn random_restarts(&self) -> bool {
        self.random_restarts
    }

    /// Returns the seed for the random restarts, if any.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Sets the damping factor of the least-squares step.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    /// Sets the maximum number of iterations for a single attempt.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the maximum number of random restarts.
    pub fn with_max_restarts(mut self, max_restarts: usize) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    /// Sets the largest norm of a single step in joint space.
    pub fn with_max_step(mut self, max_step: f64) -> Self {
        self.max_step = max_step;
        self
    }

    /// Sets the largest acceptable orientation error, in radians.
    pub fn with_orientation_tolerance(mut self, tolerance: f64) -> Self {
        self.orientation_tolerance = tolerance;
        self
    }

    /// Sets the largest acceptable position error, in meters.
    pub fn with_position_tolerance(mut self, tolerance: f64) -> Self {
        self.position_tolerance = tolerance;
        self
    }

    /// Enables or disables random restarts.
    pub fn with_random_restarts(mut self, random_restarts: bool) -> Self {
        self.random_restarts = random_restarts;
        self
    }

    /// Sets the seed for the random restarts.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Default for InverseKinematicsConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Describes the outcome of an inverse kinematics solve.
#[derive(Clone, Debug, PartialEq)]
pub struct InverseKinematicsReport {
    joint_angles: DVector<f64>,
    position_residual: f64,
    orientation_residual: f64,
    iterations: usize,
    restarts: usize,
    converged: bool,
}

impl InverseKinematicsReport {
    /// Returns a value indicating if the residual is within the tolerances.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Returns the joint angles of the best solution.
    pub fn joint_angles(&self) -> &DVector<f64> {
        &self.joint_angles
    }

    /// Returns the joint angles of the best solution, consuming the report.
    pub fn into_joint_angles(self) -> DVector<f64> {
        self.joint_angles
    }

    /// Returns the total number of iterations over all attempts.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Returns the orientation error of the best solution in radians. Always zero for
    /// position targets.
    pub fn orientation_residual(&self) -> f64 {
        self.orientation_residual
    }

    /// Returns the distance between the end-effector and the target for the best solution.
    pub fn position_residual(&self) -> f64 {
        self.position_residual
    }

    /// Returns the number of random restarts that were used.
    pub fn restarts(&self) -> usize {
        self.restarts
    }
}

/// The goal of an inverse kinematics solve.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Target {
    /// Only the end-effector origin is constrained.
    Position(Point3<f64>),
    /// Both the end-effector origin and orientation are constrained.
    Pose(Isometry3<f64>),
}

impl Target {
    fn task_rows(&self) -> usize {
        match self {
            Target::Position(_) => 3,
            Target::Pose(_) => 6,
        }
    }
}

/// Describes the admissible values of a single coordinate of a kinematic model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct CoordinateBounds {
    pub(crate) kind: JointKind,
    pub(crate) limits: JointLimits,
    /// The value the coordinate is held at, if the coordinate is locked.
    pub(crate) locked: Option<f64>,
}

impl CoordinateBounds {
    fn apply(&self, value: f64) -> f64 {
        match self.locked {
            Some(v) => v,
            None => self.limits.clamp(value),
        }
    }
}

/// A kinematic model that can report the end-effector pose and the geometric Jacobian
/// for a vector of coordinates.
pub(crate) trait DifferentiableKinematics {
    /// Returns the bounds of every coordinate.
    fn bounds(&self) -> &[CoordinateBounds];

    /// Returns the end-effector pose in the base frame and the 6xN geometric Jacobian. The
    /// first three rows are linear velocity and the last three angular velocity, both in
    /// the base frame.
    fn pose_and_jacobian(&self, coordinates: &DVector<f64>) -> (Isometry3<f64>, DMatrix<f64>);
}

/// The result of a single attempt.
struct Attempt {
    coordinates: DVector<f64>,
    position_residual: f64,
    orientation_residual: f64,
    iterations: usize,
}

impl Attempt {
    fn cost(&self) -> f64 {
        self.position_residual + self.orientation_residual
    }

    fn is_converged(&self, config: &InverseKinematicsConfig) -> bool {
        self.position_residual <= config.position_tolerance
            && self.orientation_residual <= config.orientation_tolerance
    }
}

/// Solves the inverse kinematics for the given model and target.
///
/// ## Parameters
///
/// * 'model' - The kinematic model
/// * 'target' - The target position or pose in the base frame of the model
/// * 'initial_guess' - The starting coordinates. A random sample is used when absent.
/// * 'config' - The numerical settings
/// * 'rng' - The random number generator for restarts
pub(crate) fn solve(
    model: &impl DifferentiableKinematics,
    target: &Target,
    initial_guess: Option<&DVector<f64>>,
    config: &InverseKinematicsConfig,
    rng: &mut StdRng,
) -> InverseKinematicsReport {
    let bounds = model.bounds();

    let start = match initial_guess {
        Some(q) => q.clone(),
        None => sample_coordinates(bounds, rng),
    };
    let mut best = refine(model, target, start, config);
    let mut iterations = best.iterations;
    let mut restarts = 0;

    // A cold start counts as the first random sample, so the budget is the same with and
    // without an initial guess.
    while config.random_restarts && !best.is_converged(config) && restarts < config.max_restarts
    {
        restarts += 1;
        let attempt = refine(model, target, sample_coordinates(bounds, rng), config);
        iterations += attempt.iterations;
        trace!(
            restart = restarts,
            residual = attempt.cost(),
            "Finished random restart"
        );

        if attempt.cost() < best.cost() {
            best = attempt;
        }
    }

    let converged = best.is_converged(config);
    if converged {
        debug!(
            iterations,
            restarts,
            position_residual = best.position_residual,
            orientation_residual = best.orientation_residual,
            "Inverse kinematics converged"
        );
    } else {
        warn!(
            iterations,
            restarts,
            position_residual = best.position_residual,
            orientation_residual = best.orientation_residual,
            "Inverse kinematics did not reach the tolerance, returning the best solution"
        );
    }

    InverseKinematicsReport {
        joint_angles: best.coordinates,
        position_residual: best.position_residual,
        orientation_residual: best.orientation_residual,
        iterations,
        restarts,
        converged,
    }
}

/// Clamps every coordinate to its bounds, holding locked coordinates at their value.
pub(crate) fn apply_bounds(bounds: &[CoordinateBounds], coordinates: &mut DVector<f64>) {
    for (value, bound) in coordinates.iter_mut().zip(bounds) {
        *value = bound.apply(*value);
    }
}

/// Runs damped least-squares iterations from a single starting point.
fn refine(
    model: &impl DifferentiableKinematics,
    target: &Target,
    start: DVector<f64>,
    config: &InverseKinematicsConfig,
) -> Attempt {
    let bounds = model.bounds();
    let rows = target.task_rows();
    let damping_squared = config.damping * config.damping;

    let mut q = start;
    apply_bounds(bounds, &mut q);

    let (pose, jacobian) = model.pose_and_jacobian(&q);
    let (mut error, mut position_residual, mut orientation_residual) =
        task_error(target, &pose);
    let mut jacobian = jacobian;

    let mut iterations = 0;
    while iterations < config.max_iterations {
        if position_residual <= config.position_tolerance
            && orientation_residual <= config.orientation_tolerance
        {
            break;
        }

        let mut task_jacobian = jacobian.rows(0, rows).into_owned();
        for (index, bound) in bounds.iter().enumerate() {
            if bound.locked.is_some() || !bound.kind.is_movable() {
                task_jacobian.column_mut(index).fill(0.0);
            }
        }

        let mut normal = &task_jacobian * task_jacobian.transpose();
        for i in 0..rows {
            normal[(i, i)] += damping_squared;
        }

        let Some(multipliers) = solve_system(normal, &error) else {
            break;
        };
        let mut step = task_jacobian.transpose() * multipliers;

        let step_norm = step.norm();
        if step_norm > config.max_step {
            step *= config.max_step / step_norm;
        }

        q += step;
        apply_bounds(bounds, &mut q);
        iterations += 1;

        let (pose, next_jacobian) = model.pose_and_jacobian(&q);
        (error, position_residual, orientation_residual) = task_error(target, &pose);
        jacobian = next_jacobian;

        trace!(
            iteration = iterations,
            position_residual,
            orientation_residual,
            "Inverse kinematics iteration"
        );
    }

    Attempt {
        coordinates: q,
        position_residual,
        orientation_residual,
        iterations,
    }
}

/// Returns the task error and the position and orientation residuals.
fn task_error(target: &Target, pose: &Isometry3<f64>) -> (DVector<f64>, f64, f64) {
    match target {
        Target::Position(p) => {
            let position_error = p.coords - pose.translation.vector;
            let residual = position_error.norm();
            (
                DVector::from_column_slice(position_error.as_slice()),
                residual,
                0.0,
            )
        }
        Target::Pose(goal) => {
            let position_error = goal.translation.vector - pose.translation.vector;
            let orientation_error = (goal.rotation * pose.rotation.inverse()).scaled_axis();

            let mut error = DVector::zeros(6);
            error.rows_mut(0, 3).copy_from(&position_error);
            error.rows_mut(3, 3).copy_from(&orientation_error);

            (error, position_error.norm(), orientation_error.norm())
        }
    }
}

/// Solves the symmetric system, falling back to LU when it is not positive definite.
fn solve_system(matrix: DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    match matrix.clone().cholesky() {
        Some(cholesky) => Some(cholesky.solve(rhs)),
        None => matrix.lu().solve(rhs),
    }
}

/// Draws coordinates uniformly from the sampling interval of every coordinate.
#[cfg_attr(test, mutants::skip)] // Random sampling has no deterministic outcome to test.
fn sample_coordinates(bounds: &[CoordinateBounds], rng: &mut StdRng) -> DVector<f64> {
    DVector::from_iterator(
        bounds.len(),
        bounds.iter().map(|bound| match bound.locked {
            Some(v) => v,
            None => {
                let (minimum, maximum) = bound.limits.sampling_interval(bound.kind);
                rng.gen_range(minimum..=maximum)
            }
        }),
    )
}
