//! Defines joints that are exposed externally but map onto one or more real joints.
//!
//! Some robot hands have joints that do not map 1:1 to an actuated degree of freedom,
//! e.g. a thumb that is either opposed or not, or two finger joints in series that are
//! driven by the same tendon. A [VirtualJoint] turns a single externally visible value
//! into values for the real joints it stands for.
//!
//! Virtual joints do not validate their input. Values outside the range of the virtual
//! joint are passed through and are limited by the clamping of the real joints.

extern crate nalgebra as na;

use na::{Isometry3, Vector3};

use crate::{
    model_elements::{
        frame_elements::{JointKind, JointLimits},
        frame_graph::FrameGraph,
        mechanism::JointDescription,
    },
    Error,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "virtual_joints_tests.rs"]
mod virtual_joints_tests;

/// A joint that maps a single value onto one or more real joints.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VirtualJoint {
    /// A two position joint. Values at or above the midpoint between 'minimum' and
    /// 'maximum' move the real joint to 'maximum', all other values move it to 'minimum'.
    Threshold {
        /// The name of the real joint.
        real_joint: String,
        /// The position of the real joint for values below the threshold.
        minimum: f64,
        /// The position of the real joint for values at or above the threshold.
        maximum: f64,
    },

    /// Two real joints in series driven by a single actuator. The first joint absorbs the
    /// value up to 'first_maximum', the remainder is assigned to the second joint.
    SequentialCoupling {
        /// The name of the joint that moves first.
        first_joint: String,
        /// The name of the joint that moves once the first joint reaches its maximum.
        second_joint: String,
        /// The position at which the first joint stops and the second joint starts moving.
        first_maximum: f64,
    },
}

impl VirtualJoint {
    /// Returns the limits of the virtual joint, derived from the limits of the real joints.
    ///
    /// A threshold joint uses the limits of its real joint. A sequentially coupled joint
    /// ranges from zero to the sum of the ranges of both real joints.
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownJoint] - Returned when a real joint is not in the graph.
    pub fn limits(&self, graph: &FrameGraph) -> Result<JointLimits, Error> {
        match self {
            VirtualJoint::Threshold { real_joint, .. } => graph.get_joint_limits(real_joint),
            VirtualJoint::SequentialCoupling {
                first_joint,
                second_joint,
                ..
            } => {
                let first = graph.get_joint_limits(first_joint)?;
                let second = graph.get_joint_limits(second_joint)?;
                Ok(JointLimits::new(0.0, first.range() + second.range()))
            }
        }
    }

    /// Returns the declaration of the placeholder joint that represents the virtual joint
    /// in a [FrameGraph].
    ///
    /// The placeholder connects the frames `<name>_from` and `<name>_to` with an identity
    /// origin and a zero axis, so it has no geometric effect. Its limits are the derived
    /// limits of the virtual joint.
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownJoint] - Returned when a real joint is not in the graph.
    pub fn make_virtual_joint(
        &self,
        name: &str,
        graph: &FrameGraph,
    ) -> Result<JointDescription, Error> {
        let limits = self.limits(graph)?;

        Ok(JointDescription::new(
            name,
            JointKind::Revolute,
            format!("{}_from", name),
            format!("{}_to", name),
        )
        .with_origin(Isometry3::identity())
        .with_axis(Vector3::zeros())
        .with_limits(limits))
    }

    /// Returns the names of the real joints driven by the virtual joint.
    pub fn real_joints(&self) -> Vec<&str> {
        match self {
            VirtualJoint::Threshold { real_joint, .. } => vec![real_joint.as_str()],
            VirtualJoint::SequentialCoupling {
                first_joint,
                second_joint,
                ..
            } => vec![first_joint.as_str(), second_joint.as_str()],
        }
    }

    /// Returns the positions of the real joints for the given value of the virtual joint.
    pub fn resolve(&self, value: f64) -> Vec<(String, f64)> {
        match self {
            VirtualJoint::Threshold {
                real_joint,
                minimum,
                maximum,
            } => {
                let position = if value >= self.threshold() {
                    *maximum
                } else {
                    *minimum
                };
                vec![(real_joint.clone(), position)]
            }
            VirtualJoint::SequentialCoupling {
                first_joint,
                second_joint,
                first_maximum,
            } => {
                let (first, second) = if value > *first_maximum {
                    (*first_maximum, value - first_maximum)
                } else {
                    (value, 0.0)
                };
                vec![(first_joint.clone(), first), (second_joint.clone(), second)]
            }
        }
    }

    /// Returns the derivative of every real joint position with respect to the value of
    /// the virtual joint, evaluated at the given value.
    pub fn sensitivities(&self, value: f64) -> Vec<(String, f64)> {
        match self {
            VirtualJoint::Threshold { real_joint, .. } => vec![(real_joint.clone(), 0.0)],
            VirtualJoint::SequentialCoupling {
                first_joint,
                second_joint,
                first_maximum,
            } => {
                if value > *first_maximum {
                    vec![(first_joint.clone(), 0.0), (second_joint.clone(), 1.0)]
                } else {
                    vec![(first_joint.clone(), 1.0), (second_joint.clone(), 0.0)]
                }
            }
        }
    }

    /// Creates a new sequentially coupled virtual joint.
    pub fn sequential_coupling(
        first_joint: impl Into<String>,
        second_joint: impl Into<String>,
        first_maximum: f64,
    ) -> Self {
        VirtualJoint::SequentialCoupling {
            first_joint: first_joint.into(),
            second_joint: second_joint.into(),
            first_maximum,
        }
    }

    /// Returns the value at which the virtual joint switches behaviour. For a threshold
    /// joint this is the midpoint, for a sequentially coupled joint the maximum of the
    /// first joint.
    pub fn threshold(&self) -> f64 {
        match self {
            VirtualJoint::Threshold {
                minimum, maximum, ..
            } => 0.5 * (minimum + maximum),
            VirtualJoint::SequentialCoupling { first_maximum, .. } => *first_maximum,
        }
    }

    /// Creates a new two position virtual joint.
    pub fn threshold_joint(real_joint: impl Into<String>, minimum: f64, maximum: f64) -> Self {
        VirtualJoint::Threshold {
            real_joint: real_joint.into(),
            minimum,
            maximum,
        }
    }
}
