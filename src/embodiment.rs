//! Defines the solver that maps source fingertip positions onto robot hand joint angles.
//!
//! The [EmbodimentSolver] keeps one kinematic chain per finger of the robot hand. For every
//! call to [EmbodimentSolver::solve] the fingertip positions of the source hand are mapped
//! into the base frame of the robot hand and each chain is solved for its fingertip,
//! starting from the solution of the previous call.
//!
//! The fingertip positions are passed in explicitly as a [SourceSnapshot]. A snapshot can
//! be computed from any source hand model that implements [HandStateOracle].

extern crate nalgebra as na;

use std::collections::{BTreeMap, HashSet};

use na::{DVector, Isometry3, Point3};
use tracing::{debug, info};

use crate::{
    inverse_kinematics::InverseKinematicsConfig,
    model_elements::{chain::Chain, kinematic_model::KinematicModel},
    target_configurations::TargetConfiguration,
    Error,
};

#[cfg(test)]
#[path = "embodiment_tests.rs"]
mod embodiment_tests;

/// The fingers that are solved for when no fingers are given.
pub const DEFAULT_FINGERS: [&str; 3] = ["thumb", "index", "middle"];

/// The frame that the base frame of the robot hand is placed in.
pub const WORLD_FRAME: &str = "world";

/// A source hand model that computes fingertip positions from pose parameters.
pub trait HandStateOracle {
    /// Returns the indices of the global pose parameters that belong to the finger, or
    /// `None` if the model does not know the finger.
    fn finger_pose_parameter_indices(&self, finger: &str) -> Option<&[usize]>;

    /// Returns the fingertip position in the base frame of the source hand.
    ///
    /// ## Parameters
    ///
    /// * 'finger' - The name of the finger
    /// * 'parameters' - The pose parameters of the finger, in the order given by
    ///   [HandStateOracle::finger_pose_parameter_indices]
    ///
    /// ## Errors
    ///
    /// * [Error::Configuration] - Returned when the finger is unknown.
    fn fingertip_position(&self, finger: &str, parameters: &[f64]) -> Result<Point3<f64>, Error>;
}

/// The fingertip positions of the source hand at one point in time, expressed in the base
/// frame of the source hand.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceSnapshot {
    fingertips: BTreeMap<String, Point3<f64>>,
}

impl SourceSnapshot {
    /// Returns the fingertip position of the given finger.
    pub fn fingertip(&self, finger: &str) -> Option<&Point3<f64>> {
        self.fingertips.get(finger)
    }

    /// Computes a snapshot from the current pose of a source hand model.
    ///
    /// ## Parameters
    ///
    /// * 'oracle' - The source hand model
    /// * 'pose' - The global pose parameters of the source hand
    /// * 'fingers' - The fingers to compute the fingertip positions for
    ///
    /// ## Errors
    ///
    /// * [Error::Configuration] - Returned when the model does not know a finger, or when
    ///   a pose parameter index is out of range.
    pub fn from_hand_state(
        oracle: &impl HandStateOracle,
        pose: &[f64],
        fingers: &[&str],
    ) -> Result<Self, Error> {
        let mut snapshot = Self::new();
        for finger in fingers {
            let indices = oracle.finger_pose_parameter_indices(finger).ok_or_else(|| {
                Error::Configuration {
                    reason: format!("the source hand does not have the finger {}", finger),
                }
            })?;

            let parameters = indices
                .iter()
                .map(|i| {
                    pose.get(*i).copied().ok_or_else(|| Error::Configuration {
                        reason: format!(
                            "the pose parameter {} of the finger {} is out of range",
                            i, finger
                        ),
                    })
                })
                .collect::<Result<Vec<f64>, Error>>()?;

            let position = oracle.fingertip_position(finger, &parameters)?;
            snapshot.fingertips.insert(finger.to_string(), position);
        }

        Ok(snapshot)
    }

    /// Creates a new, empty, [SourceSnapshot].
    pub fn new() -> Self {
        Self {
            fingertips: BTreeMap::new(),
        }
    }

    /// Adds the fingertip position of a finger.
    pub fn with_fingertip(mut self, finger: impl Into<String>, position: Point3<f64>) -> Self {
        self.fingertips.insert(finger.into(), position);
        self
    }
}

/// The result of a single embodiment solve.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmbodimentSolution {
    joint_angles: BTreeMap<String, DVector<f64>>,
    desired_positions: BTreeMap<String, Point3<f64>>,
}

impl EmbodimentSolution {
    /// Returns the fingertip position each finger was solved for, in the base frame of the
    /// robot hand.
    pub fn desired_position(&self, finger: &str) -> Option<&Point3<f64>> {
        self.desired_positions.get(finger)
    }

    /// Returns the desired fingertip positions of all fingers.
    pub fn desired_positions(&self) -> &BTreeMap<String, Point3<f64>> {
        &self.desired_positions
    }

    /// Returns the joint angles of the given finger, in the order of the finger's joints.
    pub fn finger_joint_angles(&self, finger: &str) -> Option<&DVector<f64>> {
        self.joint_angles.get(finger)
    }

    /// Returns the joint angles of all fingers.
    pub fn joint_angles(&self) -> &BTreeMap<String, DVector<f64>> {
        &self.joint_angles
    }
}

/// The mapping of one finger of the source hand onto a chain of the robot hand.
#[derive(Clone, Debug)]
struct FingerMapping {
    finger: String,
    chain: Chain,
    warm_start: DVector<f64>,
}

/// Maps the fingertips of a source hand onto the fingers of a robot hand.
#[derive(Clone, Debug)]
pub struct EmbodimentSolver {
    model: KinematicModel,
    fingers: Vec<FingerMapping>,
    base_frame: String,
    base_to_base: Isometry3<f64>,
    constant_joints: BTreeMap<String, f64>,
    config: InverseKinematicsConfig,
}

impl EmbodimentSolver {
    /// Writes the joint values of a solution into the frame graph of the robot hand, so
    /// that the frames can be queried for rendering.
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownJoint] - Returned when a joint is not part of the model.
    pub fn apply_to_graph(&mut self, solution: &EmbodimentSolution) -> Result<(), Error> {
        for (name, value) in self.joint_values(solution) {
            self.model.graph_mut().set_joint(&name, value)?;
        }

        Ok(())
    }

    /// Returns the inverse kinematics settings.
    pub fn config(&self) -> &InverseKinematicsConfig {
        &self.config
    }

    /// Returns the names of the fingers that are solved for.
    pub fn fingers(&self) -> impl Iterator<Item = &str> {
        self.fingers.iter().map(|f| f.finger.as_str())
    }

    /// Returns the chain of the given finger.
    pub fn finger_chain(&self, finger: &str) -> Option<&Chain> {
        self.fingers
            .iter()
            .find(|f| f.finger == finger)
            .map(|f| &f.chain)
    }

    /// Returns the value of every real joint for a solution, plus the constant joints.
    ///
    /// Virtual joints are expanded into the real joints they drive.
    pub fn joint_values(&self, solution: &EmbodimentSolution) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();

        for (name, value) in &self.constant_joints {
            self.expand_into(name, *value, &mut values);
        }

        for mapping in &self.fingers {
            if let Some(angles) = solution.finger_joint_angles(&mapping.finger) {
                for (name, value) in mapping.chain.joint_names().iter().zip(angles.iter()) {
                    self.expand_into(name, *value, &mut values);
                }
            }
        }

        values
    }

    /// Returns the kinematic model of the robot hand.
    pub fn model(&self) -> &KinematicModel {
        &self.model
    }

    /// Creates a new [EmbodimentSolver].
    ///
    /// ## Parameters
    ///
    /// * 'source' - The source hand model
    /// * 'target' - The configuration of the robot hand
    /// * 'fingers' - The fingers to solve for, e.g. [DEFAULT_FINGERS]
    ///
    /// ## Errors
    ///
    /// * [Error::Configuration] - Returned when a finger is listed twice, or is missing from
    ///   the source hand or from the target configuration.
    /// * Any error from loading the mechanism or creating the finger chains.
    pub fn new(
        source: &impl HandStateOracle,
        target: &TargetConfiguration,
        fingers: &[&str],
    ) -> Result<Self, Error> {
        for finger in fingers {
            if source.finger_pose_parameter_indices(finger).is_none() {
                return Err(Error::Configuration {
                    reason: format!("the source hand does not have the finger {}", finger),
                });
            }
        }

        let mut unique = HashSet::with_capacity(fingers.len());
        for finger in fingers {
            if !unique.insert(*finger) {
                return Err(Error::Configuration {
                    reason: format!("the finger {} is listed more than once", finger),
                });
            }
        }

        let model = target.load_kinematic_model()?;

        let mut mappings = Vec::with_capacity(fingers.len());
        for finger in fingers {
            let missing = || Error::Configuration {
                reason: format!(
                    "the target {} does not have the finger {}",
                    target.name(),
                    finger
                ),
            };

            let joint_names = target.joint_names(finger).ok_or_else(missing)?;
            let end_effector_frame = target.end_effector_frame(finger).ok_or_else(missing)?;

            let names: Vec<&str> = joint_names.iter().map(|n| n.as_str()).collect();
            let chain = model.create_chain(&names, target.base_frame(), end_effector_frame)?;
            let warm_start = DVector::zeros(chain.number_of_joints());

            mappings.push(FingerMapping {
                finger: finger.to_string(),
                chain,
                warm_start,
            });
        }

        info!(
            target = target.name(),
            fingers = fingers.len(),
            "Created embodiment solver"
        );

        Ok(Self {
            model,
            fingers: mappings,
            base_frame: target.base_frame().to_string(),
            base_to_base: *target.base_to_base(),
            constant_joints: BTreeMap::new(),
            config: InverseKinematicsConfig::default(),
        })
    }

    /// Holds a joint at a constant value for all following solves.
    ///
    /// Finger chains that control the joint keep it at the value. Real joints, including
    /// those driven by a virtual joint, are written to the frame graph and held by every
    /// chain whose path passes through them.
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownJoint] - Returned when the joint is not part of the model.
    pub fn set_constant_joint(&mut self, name: &str, value: f64) -> Result<(), Error> {
        let real_values: Vec<(String, f64)> = match self.model.virtual_joint(name) {
            Some(virtual_joint) => virtual_joint.resolve(value),
            None => {
                self.model.graph().joint_id(name)?;
                vec![(name.to_string(), value)]
            }
        };

        for mapping in &mut self.fingers {
            if let Some(index) = mapping.chain.joint_names().iter().position(|n| n == name) {
                mapping.chain.lock_joint(name, value)?;
                mapping.warm_start[index] = value;
            }
        }

        for (real, real_value) in &real_values {
            self.model.graph_mut().set_joint(real, *real_value)?;
            for mapping in &mut self.fingers {
                let is_chain_joint = mapping.chain.joint_names().iter().any(|n| n == real);
                if !is_chain_joint && mapping.chain.contains_joint(real) {
                    mapping.chain.lock_joint(real, *real_value)?;
                }
            }
        }

        debug!(joint = name, value, "Set constant joint");
        self.constant_joints.insert(name.to_string(), value);

        Ok(())
    }

    /// Solves every finger chain for the fingertip positions of the source hand.
    ///
    /// Each chain is seeded with the solution of the previous call, or zeros on the first
    /// call. The inverse kinematics never fails, so a solution is always produced for
    /// every finger. The pose of the robot hand base in the world frame is set to
    /// 'base_pose_override' or to identity.
    ///
    /// ## Parameters
    ///
    /// * 'source' - The fingertip positions in the base frame of the source hand
    /// * 'base_pose_override' - The pose of the robot hand base in the world frame
    ///
    /// ## Errors
    ///
    /// * [Error::Configuration] - Returned when the snapshot does not contain a finger.
    pub fn solve(
        &mut self,
        source: &SourceSnapshot,
        base_pose_override: Option<Isometry3<f64>>,
    ) -> Result<EmbodimentSolution, Error> {
        let mut desired_positions = Vec::with_capacity(self.fingers.len());
        for mapping in &self.fingers {
            let fingertip =
                source
                    .fingertip(&mapping.finger)
                    .ok_or_else(|| Error::Configuration {
                        reason: format!(
                            "the source snapshot does not contain the finger {}",
                            mapping.finger
                        ),
                    })?;
            desired_positions.push(self.base_to_base.transform_point(fingertip));
        }

        let mut solved = Vec::with_capacity(self.fingers.len());
        for (mapping, desired) in self.fingers.iter_mut().zip(&desired_positions) {
            let q = mapping
                .chain
                .inverse_position(desired, Some(&mapping.warm_start), &self.config)?;
            solved.push(q);
        }

        // Warm starts only move once every finger has a solution.
        let mut solution = EmbodimentSolution::default();
        for ((mapping, desired), q) in self.fingers.iter_mut().zip(desired_positions).zip(solved) {
            mapping.warm_start = q.clone();
            solution.joint_angles.insert(mapping.finger.clone(), q);
            solution
                .desired_positions
                .insert(mapping.finger.clone(), desired);
        }

        let base_pose = base_pose_override.unwrap_or_else(Isometry3::identity);
        self.model
            .graph_mut()
            .add_transform(&self.base_frame, WORLD_FRAME, base_pose);

        Ok(solution)
    }

    /// Returns the warm start of the given finger, i.e. the most recent solution.
    pub fn warm_start(&self, finger: &str) -> Option<&DVector<f64>> {
        self.fingers
            .iter()
            .find(|f| f.finger == finger)
            .map(|f| &f.warm_start)
    }

    /// Sets the inverse kinematics settings.
    pub fn with_config(mut self, config: InverseKinematicsConfig) -> Self {
        self.config = config;
        self
    }

    fn expand_into(&self, name: &str, value: f64, values: &mut BTreeMap<String, f64>) {
        match self.model.virtual_joint(name) {
            Some(virtual_joint) => {
                for (real, real_value) in virtual_joint.resolve(value) {
                    values.insert(real, real_value);
                }
            }
            None => {
                values.insert(name.to_string(), value);
            }
        }
    }
}
