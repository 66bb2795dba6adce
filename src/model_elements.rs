/// Defines the different frame elements that are used to create a mechanism model
pub mod frame_elements;

/// Defines the registry of rigid transforms between named frames.
pub mod frame_graph;

/// Defines the mechanism description and the reader for the URDF format.
pub mod mechanism;

/// Defines the kinematic model that is loaded from a mechanism description.
pub mod kinematic_model;

/// Defines the kinematic chains used for forward and inverse kinematics.
pub mod chain;
