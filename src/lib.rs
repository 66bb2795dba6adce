#![warn(missing_docs)]

//! Embodiment mapping from a human hand model onto the joints of a robotic hand.
//!
//! Provides a kinematic description of articulated mechanisms (frames, joints, chains),
//! a registry of rigid transforms between named frames, damped least-squares inverse
//! kinematics and the embodiment solver that moves the fingertips of a robotic hand to
//! the fingertip positions of an observed human hand.

use thiserror::Error;

/// Defines the frames, joints, transform registry and kinematic chains that make up a
/// mechanism.
pub mod model_elements;

/// Defines the configuration and the numerical core of the inverse kinematics solver.
pub mod inverse_kinematics;

/// Defines joints that are exposed externally but map onto one or more real joints.
pub mod virtual_joints;

/// Defines the solver that maps source fingertip positions onto robot hand joint angles.
pub mod embodiment;

/// Defines the static per-robot-hand configuration records.
pub mod target_configurations;

/// Defines the different errors for the hand embodiment crate.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The mechanism description could not be read or does not describe a single
    /// connected tree of links.
    #[error("The mechanism description is malformed: {reason}")]
    MalformedMechanism {
        /// A description of the problem with the mechanism description.
        reason: String,
    },

    /// A joint name was used that is not known to the mechanism.
    #[error("The joint {name} is not known")]
    UnknownJoint {
        /// The name of the joint.
        name: String,
    },

    /// A frame name was used that is not known to the frame graph.
    #[error("The frame {name} is not known")]
    UnknownFrame {
        /// The name of the frame.
        name: String,
    },

    /// The joints of a chain do not form a single path from the base frame to the
    /// end-effector frame.
    #[error("The joints do not form a chain from {base} to {end_effector}: {reason}")]
    DisconnectedChain {
        /// The name of the base frame of the chain.
        base: String,
        /// The name of the end-effector frame of the chain.
        end_effector: String,
        /// A description of why the chain is not connected.
        reason: String,
    },

    /// There is no path of transforms between two frames.
    #[error("There is no path between the frames {from} and {to}")]
    NoPath {
        /// The name of the starting frame.
        from: String,
        /// The name of the destination frame.
        to: String,
    },

    /// The embodiment or target configuration is inconsistent.
    #[error("Invalid configuration: {reason}")]
    Configuration {
        /// A description of the configuration problem.
        reason: String,
    },

    /// A joint vector was provided with a length that does not match the number of
    /// joints in the chain.
    #[error("Expected a joint vector with {expected} values but got {actual} values")]
    InvalidJointVector {
        /// The number of joints in the chain.
        expected: usize,
        /// The number of values provided.
        actual: usize,
    },

    /// A transform between two frames could not be computed.
    #[error("Failed to compute the transform from {from} to {to}")]
    FailedToComputeTransform {
        /// The name of the starting frame.
        from: String,
        /// The name of the destination frame.
        to: String,
    },
}
