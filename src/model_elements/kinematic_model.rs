//! Defines the kinematic model that is loaded from a mechanism description.

extern crate nalgebra as na;

use std::{collections::BTreeMap, path::Path};

use na::Isometry3;
use tracing::{info, warn};

use crate::{virtual_joints::VirtualJoint, Error};

use super::{chain::Chain, frame_graph::FrameGraph, mechanism::MechanismDescription};

#[cfg(test)]
#[path = "kinematic_model_tests.rs"]
mod kinematic_model_tests;

/// An articulated mechanism, stored as a [FrameGraph], from which kinematic chains are
/// created.
///
/// Loading a description adds one frame per link and one joint edge per joint. The name
/// of the mechanism is added as an alias of the root link, so chains can use either as
/// their base frame.
#[derive(Clone, Debug)]
pub struct KinematicModel {
    name: String,
    root: String,
    graph: FrameGraph,
    virtual_joints: BTreeMap<String, VirtualJoint>,
}

impl KinematicModel {
    /// Registers a virtual joint.
    ///
    /// A placeholder joint without geometric effect is added to the graph so that the
    /// limits of the virtual joint can be queried like those of any other joint.
    ///
    /// ## Parameters
    ///
    /// * 'name' - The name of the virtual joint
    /// * 'virtual_joint' - The mapping onto the real joints
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownJoint] - Returned when a real joint is not part of the model.
    /// * [Error::MalformedMechanism] - Returned when a joint with the same name exists.
    pub fn add_virtual_joint(
        &mut self,
        name: &str,
        virtual_joint: VirtualJoint,
    ) -> Result<(), Error> {
        let placeholder = virtual_joint.make_virtual_joint(name, &self.graph)?;
        self.graph.add_joint(&placeholder)?;
        self.virtual_joints.insert(name.to_string(), virtual_joint);

        Ok(())
    }

    /// Creates a chain between two frames.
    ///
    /// ## Parameters
    ///
    /// * 'joint_names' - The joints that the chain controls, ordered from base to
    ///   end-effector. May include virtual joints.
    /// * 'base_frame' - The name of the base frame
    /// * 'end_effector_frame' - The name of the end-effector frame
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownFrame] - Returned when either frame is unknown.
    /// * [Error::UnknownJoint] - Returned when a joint is unknown.
    /// * [Error::DisconnectedChain] - Returned when the real joints do not lie on the path
    ///   from the base frame to the end-effector frame in the given order.
    pub fn create_chain(
        &self,
        joint_names: &[&str],
        base_frame: &str,
        end_effector_frame: &str,
    ) -> Result<Chain, Error> {
        Chain::new(
            &self.graph,
            &self.virtual_joints,
            joint_names,
            base_frame,
            end_effector_frame,
        )
    }

    /// Loads a model from a URDF file.
    ///
    /// ## Errors
    ///
    /// * [Error::MalformedMechanism] - Returned when the file cannot be read or does not
    ///   describe a single tree of links.
    pub fn from_urdf_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::load(&MechanismDescription::from_urdf_file(path)?)
    }

    /// Loads a model from URDF text.
    ///
    /// ## Errors
    ///
    /// * [Error::MalformedMechanism] - Returned when the text does not describe a single
    ///   tree of links.
    pub fn from_urdf_str(urdf: &str) -> Result<Self, Error> {
        Self::load(&MechanismDescription::from_urdf_str(urdf)?)
    }

    /// Returns the frame graph of the model.
    pub fn graph(&self) -> &FrameGraph {
        &self.graph
    }

    /// Returns the frame graph of the model for modification, e.g. to attach extra frames.
    pub fn graph_mut(&mut self) -> &mut FrameGraph {
        &mut self.graph
    }

    /// Loads a model from a mechanism description.
    ///
    /// ## Errors
    ///
    /// * [Error::MalformedMechanism] - Returned when the description does not describe a
    ///   single tree of links.
    pub fn load(description: &MechanismDescription) -> Result<Self, Error> {
        let root = description.root_link()?.to_string();

        let mut graph = FrameGraph::new();
        for link in description.links() {
            graph.add_frame(link.name());
        }

        for joint in description.joints() {
            graph.add_joint(joint)?;
        }

        let name = description.name().to_string();
        if !name.is_empty() && name != root {
            if graph.has_frame(&name) {
                warn!(
                    name = name.as_str(),
                    "The mechanism name is also a link name, not adding it as an alias of the root"
                );
            } else {
                graph.add_static_transform(&root, &name, Isometry3::identity());
            }
        }

        info!(
            name = name.as_str(),
            root = root.as_str(),
            links = description.links().len(),
            joints = description.joints().len(),
            "Loaded kinematic model"
        );

        Ok(Self {
            name,
            root,
            graph,
            virtual_joints: BTreeMap::new(),
        })
    }

    /// Returns the name of the mechanism.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Returns the name of the root link.
    pub fn root(&self) -> &str {
        self.root.as_ref()
    }

    /// Returns the virtual joint with the given name, if it is registered.
    pub fn virtual_joint(&self, name: &str) -> Option<&VirtualJoint> {
        self.virtual_joints.get(name)
    }

    /// Returns the registered virtual joints, keyed by name.
    pub fn virtual_joints(&self) -> &BTreeMap<String, VirtualJoint> {
        &self.virtual_joints
    }
}
