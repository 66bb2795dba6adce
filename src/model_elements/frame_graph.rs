//! Defines the registry of rigid transforms between named frames.
//!
//! The [FrameGraph] stores directed edges between frames. Each edge carries the rigid
//! transform that maps coordinates expressed in the source frame into coordinates expressed
//! in the destination frame. The inverse direction is implied, so for each pair of adjacent
//! frames there is exactly one stored edge.
//!
//! Edges are one of
//! - static: fixed geometric offsets loaded from a mechanism description
//! - dynamic: transforms that callers may overwrite at any time, e.g. world to robot base
//! - joint: the transform from a joint's child frame to its parent frame, parameterized by
//!   the current joint position.
//!
//! Outside the crate frames and joints are looked up by name. Handles index the graph
//! storage directly and cannot be resolved through the public API:
//!
//! ```compile_fail
//! use hand_embodiment::model_elements::frame_graph::FrameGraph;
//!
//! let mut graph = FrameGraph::new();
//! let palm = graph.add_frame("palm");
//! graph.frame(palm);
//! ```

extern crate nalgebra as na;

use std::collections::{BTreeSet, HashMap, VecDeque};

use na::{Isometry3, Matrix4};
use tracing::{debug, trace};

use crate::Error;

use super::frame_elements::{FrameID, Joint, JointID, JointLimits, ReferenceFrame};
use super::mechanism::JointDescription;

#[cfg(test)]
#[path = "frame_graph_tests.rs"]
mod frame_graph_tests;

/// Defines how the transform of an edge came to be.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EdgeKind {
    /// A fixed geometric offset from the mechanism description.
    Static,
    /// A transform that is expected to be overwritten over time.
    Dynamic,
    /// The transform from a joint's child frame to its parent frame.
    Joint,
}

/// The transform data carried by an edge.
#[derive(Clone, Debug)]
pub(crate) enum EdgeTransform {
    /// A transform that does not depend on a joint position.
    Rigid(Isometry3<f64>),
    /// The transform is computed from the joint with the given handle.
    Joint(JointID),
}

/// A directed edge in the [FrameGraph].
#[derive(Clone, Debug)]
pub(crate) struct Edge {
    pub(crate) kind: EdgeKind,
    pub(crate) transform: EdgeTransform,
}

/// A single step along a path between two frames.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PathStep {
    /// The frame the step starts in.
    pub(crate) from: FrameID,
    /// The frame the step ends in.
    pub(crate) to: FrameID,
}

impl PathStep {
    /// Returns a value indicating whether the step runs against the stored edge direction.
    pub(crate) fn is_inverted(&self, graph: &FrameGraph) -> bool {
        !graph.edges.contains_key(&(self.from, self.to))
    }

    /// Returns the key under which the edge of this step is stored.
    pub(crate) fn key(&self, graph: &FrameGraph) -> (FrameID, FrameID) {
        if self.is_inverted(graph) {
            (self.to, self.from)
        } else {
            (self.from, self.to)
        }
    }
}

/// A mutable registry of named frames, joints and the rigid transforms between them.
///
/// ## Notes
///
/// * Frames and joints are stored in arenas and referred to by [FrameID] and [JointID]
///   handles. Names are only resolved at the API boundary.
/// * It is assumed that the edges form a forest, i.e. that there is exactly one path
///   between two connected frames. Callers that add auxiliary edges are responsible for
///   keeping it that way.
#[derive(Clone, Debug)]
pub struct FrameGraph {
    /// The frames, indexed by [FrameID].
    frames: Vec<ReferenceFrame>,

    /// The mapping from frame names to frame handles.
    frame_lookup: HashMap<String, FrameID>,

    /// The joints, indexed by [JointID].
    joints: Vec<Joint>,

    /// The mapping from joint names to joint handles.
    joint_lookup: HashMap<String, JointID>,

    /// The directed edges, keyed by (source frame, destination frame).
    edges: HashMap<(FrameID, FrameID), Edge>,

    /// The frames that are directly connected to a frame, in either direction.
    neighbours: HashMap<FrameID, BTreeSet<FrameID>>,
}

impl FrameGraph {
    /// Returns the [FrameID] for the frame with the given name, creating the frame if it
    /// does not exist yet.
    ///
    /// ## Parameters
    ///
    /// * 'name' - The name of the frame
    pub fn add_frame(&mut self, name: &str) -> FrameID {
        if let Some(id) = self.frame_lookup.get(name) {
            return *id;
        }

        let id = FrameID::new(self.frames.len());
        self.frames.push(ReferenceFrame::new(name.to_string(), id));
        self.frame_lookup.insert(name.to_string(), id);
        id
    }

    /// Adds a joint and the joint edge from its child frame to its parent frame.
    ///
    /// Frames that do not exist yet are created. The joint position starts at zero,
    /// clamped to the joint limits.
    ///
    /// ## Parameters
    ///
    /// * 'description' - The description of the joint
    ///
    /// ## Errors
    ///
    /// * [Error::MalformedMechanism] - Returned when a joint with the same name already exists.
    pub fn add_joint(&mut self, description: &JointDescription) -> Result<JointID, Error> {
        if self.joint_lookup.contains_key(description.name()) {
            return Err(Error::MalformedMechanism {
                reason: format!("the joint {} is declared more than once", description.name()),
            });
        }

        let parent = self.add_frame(description.parent());
        let child = self.add_frame(description.child());

        let id = JointID::new(self.joints.len());
        let mut joint = Joint::new(
            description.name().to_string(),
            id,
            description.kind(),
            *description.axis(),
            parent,
            child,
            *description.origin(),
            *description.limits(),
        );
        joint.set_position(0.0);

        self.joints.push(joint);
        self.joint_lookup.insert(description.name().to_string(), id);
        self.insert_edge(
            child,
            parent,
            Edge {
                kind: EdgeKind::Joint,
                transform: EdgeTransform::Joint(id),
            },
        );

        Ok(id)
    }

    /// Inserts or overwrites the dynamic edge from one frame to another.
    ///
    /// Frames that do not exist yet are created. An existing edge between the two frames,
    /// in either direction, is replaced.
    ///
    /// ## Parameters
    ///
    /// * 'from' - The name of the source frame
    /// * 'to' - The name of the destination frame
    /// * 'transform' - The transform that maps coordinates in 'from' into coordinates in 'to'
    pub fn add_transform(&mut self, from: &str, to: &str, transform: Isometry3<f64>) {
        let from_id = self.add_frame(from);
        let to_id = self.add_frame(to);
        trace!(from, to, "Updating dynamic transform");

        self.insert_edge(
            from_id,
            to_id,
            Edge {
                kind: EdgeKind::Dynamic,
                transform: EdgeTransform::Rigid(transform),
            },
        );
    }

    /// Inserts the static edge from one frame to another.
    ///
    /// Used when loading a mechanism description and by hooks that attach extra frames,
    /// e.g. fingertips, to the links of a mechanism. Frames that do not exist yet are
    /// created.
    ///
    /// ## Parameters
    ///
    /// * 'from' - The name of the source frame
    /// * 'to' - The name of the destination frame
    /// * 'transform' - The transform that maps coordinates in 'from' into coordinates in 'to'
    pub fn add_static_transform(&mut self, from: &str, to: &str, transform: Isometry3<f64>) {
        let from_id = self.add_frame(from);
        let to_id = self.add_frame(to);

        self.insert_edge(
            from_id,
            to_id,
            Edge {
                kind: EdgeKind::Static,
                transform: EdgeTransform::Rigid(transform),
            },
        );
    }

    /// Returns the stored edge for the given key, if any.
    pub(crate) fn edge(&self, key: &(FrameID, FrameID)) -> Option<&Edge> {
        self.edges.get(key)
    }

    /// Returns the kind of the edge between two frames, if the frames are adjacent.
    ///
    /// ## Parameters
    ///
    /// * 'from' - The name of the first frame
    /// * 'to' - The name of the second frame
    pub fn edge_kind(&self, from: &str, to: &str) -> Option<EdgeKind> {
        let from_id = self.frame_lookup.get(from)?;
        let to_id = self.frame_lookup.get(to)?;

        self.edges
            .get(&(*from_id, *to_id))
            .or_else(|| self.edges.get(&(*to_id, *from_id)))
            .map(|e| e.kind)
    }

    /// Returns the transform carried by a single edge for the current joint positions.
    pub(crate) fn edge_transform(&self, edge: &Edge) -> Isometry3<f64> {
        match &edge.transform {
            EdgeTransform::Rigid(t) => *t,
            EdgeTransform::Joint(id) => {
                let joint = self.joint_unchecked(*id);
                joint.transform_for_position(joint.position())
            }
        }
    }

    /// Returns the frame with the given handle.
    ///
    /// This function will panic if the handle does not belong to this graph.
    pub(crate) fn frame(&self, id: FrameID) -> &ReferenceFrame {
        &self.frames[id.index()]
    }

    /// Returns the [FrameID] of the frame with the given name.
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownFrame] - Returned when there is no frame with the given name.
    pub fn frame_id(&self, name: &str) -> Result<FrameID, Error> {
        self.frame_lookup
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownFrame {
                name: name.to_string(),
            })
    }

    /// Returns an iterator over all the frames in the graph, in creation order.
    pub fn frames(&self) -> impl Iterator<Item = &ReferenceFrame> {
        self.frames.iter()
    }

    /// Returns the homogeneous transform that maps coordinates in the 'from' frame into
    /// coordinates in the 'to' frame.
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownFrame] - Returned when either frame is unknown.
    /// * [Error::NoPath] - Returned when the frames are not connected.
    pub fn get_homogeneous_transform(&self, from: &str, to: &str) -> Result<Matrix4<f64>, Error> {
        Ok(self.get_transform(from, to)?.to_homogeneous())
    }

    /// Returns the limits of the joint with the given name.
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownJoint] - Returned when there is no joint with the given name.
    pub fn get_joint_limits(&self, name: &str) -> Result<JointLimits, Error> {
        Ok(*self.joint(name)?.limits())
    }

    /// Returns the rigid transform that maps coordinates in the 'from' frame into
    /// coordinates in the 'to' frame by composing the edges on the path between them.
    ///
    /// ## Parameters
    ///
    /// * 'from' - The name of the source frame
    /// * 'to' - The name of the destination frame
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownFrame] - Returned when either frame is unknown.
    /// * [Error::NoPath] - Returned when the frames are not connected.
    pub fn get_transform(&self, from: &str, to: &str) -> Result<Isometry3<f64>, Error> {
        let from_id = self.frame_id(from)?;
        let to_id = self.frame_id(to)?;

        let path = self.path(from_id, to_id)?;
        Ok(self.compose(&path))
    }

    /// Returns a value indicating whether a frame with the given name exists.
    pub fn has_frame(&self, name: &str) -> bool {
        self.frame_lookup.contains_key(name)
    }

    /// Returns a value indicating whether a joint with the given name exists.
    pub fn has_joint(&self, name: &str) -> bool {
        self.joint_lookup.contains_key(name)
    }

    /// Returns the joint with the given name.
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownJoint] - Returned when there is no joint with the given name.
    pub fn joint(&self, name: &str) -> Result<&Joint, Error> {
        let id = self.joint_id(name)?;
        Ok(self.joint_unchecked(id))
    }

    /// Returns the [JointID] of the joint with the given name.
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownJoint] - Returned when there is no joint with the given name.
    pub fn joint_id(&self, name: &str) -> Result<JointID, Error> {
        self.joint_lookup
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownJoint {
                name: name.to_string(),
            })
    }

    /// Returns the joint for the given handle.
    ///
    /// This function will panic if the handle does not belong to this graph.
    pub(crate) fn joint_unchecked(&self, id: JointID) -> &Joint {
        &self.joints[id.index()]
    }

    /// Returns an iterator over all the joints in the graph, in creation order.
    pub fn joints(&self) -> impl Iterator<Item = &Joint> {
        self.joints.iter()
    }

    /// Creates a new, empty, [FrameGraph].
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            frame_lookup: HashMap::new(),
            joints: Vec::new(),
            joint_lookup: HashMap::new(),
            edges: HashMap::new(),
            neighbours: HashMap::new(),
        }
    }

    /// Returns the number of frames in the graph.
    pub fn number_of_frames(&self) -> usize {
        self.frames.len()
    }

    /// Sets the position of the joint with the given name. The position is clamped to the
    /// joint limits.
    ///
    /// ## Errors
    ///
    /// * [Error::UnknownJoint] - Returned when there is no joint with the given name.
    pub fn set_joint(&mut self, name: &str, position: f64) -> Result<(), Error> {
        let id = self.joint_id(name)?;
        self.joints[id.index()].set_position(position);
        Ok(())
    }

    /// Composes the transforms along a path. The result maps coordinates in the first
    /// frame of the path into coordinates in the last frame of the path.
    pub(crate) fn compose(&self, path: &[PathStep]) -> Isometry3<f64> {
        let mut transform = Isometry3::identity();
        for step in path {
            transform = self.step_transform(step) * transform;
        }

        transform
    }

    /// Inserts an edge, replacing any edge between the two frames.
    fn insert_edge(&mut self, from: FrameID, to: FrameID, edge: Edge) {
        if self.edges.remove(&(to, from)).is_some() {
            debug!(
                from = self.frame(from).name(),
                to = self.frame(to).name(),
                "Replacing the reverse edge"
            );
        }

        self.edges.insert((from, to), edge);
        self.neighbours.entry(from).or_default().insert(to);
        self.neighbours.entry(to).or_default().insert(from);
    }

    /// Returns the sequence of steps that leads from the 'from' frame to the 'to' frame.
    ///
    /// ## Errors
    ///
    /// * [Error::NoPath] - Returned when the frames are not connected.
    pub(crate) fn path(&self, from: FrameID, to: FrameID) -> Result<Vec<PathStep>, Error> {
        if from == to {
            return Ok(vec![]);
        }

        // Breadth first search, remembering how each frame was reached.
        let mut reached_from: HashMap<FrameID, FrameID> = HashMap::new();
        let mut queue = VecDeque::new();
        queue.push_back(from);
        reached_from.insert(from, from);

        while let Some(current) = queue.pop_front() {
            if current == to {
                break;
            }

            if let Some(neighbours) = self.neighbours.get(&current) {
                for next in neighbours {
                    if !reached_from.contains_key(next) {
                        reached_from.insert(*next, current);
                        queue.push_back(*next);
                    }
                }
            }
        }

        if !reached_from.contains_key(&to) {
            return Err(Error::NoPath {
                from: self.frame(from).name().to_string(),
                to: self.frame(to).name().to_string(),
            });
        }

        let mut steps = Vec::new();
        let mut current = to;
        while current != from {
            let previous = reached_from[&current];
            steps.push(PathStep {
                from: previous,
                to: current,
            });
            current = previous;
        }

        steps.reverse();
        Ok(steps)
    }

    /// Returns the transform that maps coordinates in the step's source frame into the
    /// step's destination frame.
    pub(crate) fn step_transform(&self, step: &PathStep) -> Isometry3<f64> {
        match self.edges.get(&(step.from, step.to)) {
            Some(edge) => self.edge_transform(edge),
            None => match self.edges.get(&(step.to, step.from)) {
                Some(edge) => self.edge_transform(edge).inverse(),
                None => Isometry3::identity(),
            },
        }
    }
}

impl Default for FrameGraph {
    fn default() -> Self {
        Self::new()
    }
}
