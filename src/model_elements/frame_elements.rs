//! Defines the different frame elements that are used to create a mechanism model

extern crate nalgebra as na;

use std::{f64::consts::PI, fmt::Display};

use na::{Isometry3, Translation3, Unit, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "frame_elements_tests.rs"]
mod frame_elements_tests;

/// Axes shorter than this are considered to be degenerate.
pub(crate) const MINIMUM_AXIS_LENGTH: f64 = 1e-10;

/// Defines the degree-of-freedom for a joint relative to the parent frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JointKind {
    /// The child frame is static relative to the parent frame.
    Fixed,
    /// The child frame rotates around the joint axis, expressed in the joint origin frame.
    Revolute,
    /// The child frame translates along the joint axis, expressed in the joint origin frame.
    Prismatic,
}

impl JointKind {
    /// Returns a value indicating if a joint of this kind has a degree of freedom.
    pub fn is_movable(&self) -> bool {
        !matches!(self, JointKind::Fixed)
    }
}

/// Defines a unique handle for a [ReferenceFrame] in a
/// [FrameGraph](crate::model_elements::frame_graph::FrameGraph).
///
/// The handle is an index into the frame arena of the graph that created it. Handles are
/// resolved once from frame names and are only meaningful for the graph they came from.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FrameID {
    index: usize,
}

impl FrameID {
    /// Returns the position of the frame in the frame arena.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn new(index: usize) -> Self {
        Self { index }
    }
}

impl Display for FrameID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrameID [{}]", self.index)
    }
}

/// Defines a unique handle for a [Joint] in a
/// [FrameGraph](crate::model_elements::frame_graph::FrameGraph).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct JointID {
    index: usize,
}

impl JointID {
    /// Returns the position of the joint in the joint arena.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn new(index: usize) -> Self {
        Self { index }
    }
}

impl Display for JointID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JointID [{}]", self.index)
    }
}

/// Stores the minimum and maximum position of a joint.
///
/// Unlimited joints use infinite bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointLimits {
    minimum: f64,
    maximum: f64,
}

impl JointLimits {
    /// Clamps the value to the interval [minimum, maximum].
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.minimum).min(self.maximum)
    }

    /// Returns a value indicating if the given value lies inside the limits.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.minimum && value <= self.maximum
    }

    /// Returns a value indicating whether both bounds are finite.
    pub fn is_bounded(&self) -> bool {
        self.minimum.is_finite() && self.maximum.is_finite()
    }

    /// Returns the maximum position.
    pub fn maximum(&self) -> f64 {
        self.maximum
    }

    /// Returns the value half way between the minimum and the maximum.
    pub fn midpoint(&self) -> f64 {
        0.5 * (self.minimum + self.maximum)
    }

    /// Returns the minimum position.
    pub fn minimum(&self) -> f64 {
        self.minimum
    }

    /// Creates a new [JointLimits] instance.
    ///
    /// ## Parameters
    ///
    /// * 'minimum' - The smallest position the joint can take
    /// * 'maximum' - The largest position the joint can take
    pub fn new(minimum: f64, maximum: f64) -> Self {
        Self { minimum, maximum }
    }

    /// Returns the size of the interval between the minimum and the maximum.
    pub fn range(&self) -> f64 {
        self.maximum - self.minimum
    }

    /// Returns the finite interval from which random joint positions are drawn.
    ///
    /// Unbounded revolute joints are sampled from [-PI, PI] and unbounded prismatic
    /// joints from [-1, 1].
    pub fn sampling_interval(&self, kind: JointKind) -> (f64, f64) {
        let fallback = match kind {
            JointKind::Revolute => PI,
            JointKind::Prismatic => 1.0,
            JointKind::Fixed => 0.0,
        };

        let minimum = if self.minimum.is_finite() {
            self.minimum
        } else {
            -fallback
        };
        let maximum = if self.maximum.is_finite() {
            self.maximum
        } else {
            fallback
        };

        (minimum, maximum.max(minimum))
    }

    /// Returns limits that allow any position.
    pub fn unbounded() -> Self {
        Self {
            minimum: f64::NEG_INFINITY,
            maximum: f64::INFINITY,
        }
    }
}

impl Default for JointLimits {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Defines a single named coordinate frame in a mechanism.
///
/// The frame has a cartesian right-handed coordinate system. Frames have no lifecycle of
/// their own, they are created when a mechanism description is loaded or when a transform
/// between two previously unknown frames is registered.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceFrame {
    /// The human readable name for the frame. Unique within a frame graph.
    name: String,

    /// The handle of the frame.
    id: FrameID,
}

impl ReferenceFrame {
    /// Returns a reference to the [FrameID] of the frame.
    pub fn id(&self) -> &FrameID {
        &self.id
    }

    /// Returns the name of the frame.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    pub(crate) fn new(name: String, id: FrameID) -> Self {
        Self { name, id }
    }
}

/// Defines a named scalar degree of freedom that connects a parent frame to a child frame.
///
/// The transform from the child frame to the parent frame is the fixed joint origin
/// followed by the motion of the joint, i.e. `origin * motion(position)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Joint {
    name: String,
    id: JointID,
    kind: JointKind,

    /// The axis of motion, expressed in the joint origin frame. A zero axis turns the
    /// joint into a placeholder without geometric effect.
    axis: Vector3<f64>,

    parent: FrameID,
    child: FrameID,

    /// The pose of the child frame in the parent frame when the joint position is zero.
    origin: Isometry3<f64>,

    limits: JointLimits,

    /// The current position of the joint. Always zero for fixed joints.
    position: f64,
}

impl Joint {
    /// Returns the axis of motion in the joint origin frame.
    pub fn axis(&self) -> &Vector3<f64> {
        &self.axis
    }

    /// Returns the [FrameID] of the child frame.
    pub fn child(&self) -> FrameID {
        self.child
    }

    /// Returns the handle of the joint.
    pub fn id(&self) -> JointID {
        self.id
    }

    /// Returns the kind of motion the joint allows.
    pub fn kind(&self) -> JointKind {
        self.kind
    }

    /// Returns the position limits of the joint.
    pub fn limits(&self) -> &JointLimits {
        &self.limits
    }

    /// Returns the motion of the joint for the given position, without the joint origin.
    ///
    /// ## Parameters
    ///
    /// * 'position' - The joint position in radians (revolute) or meters (prismatic)
    pub fn motion(&self, position: f64) -> Isometry3<f64> {
        match self.kind {
            JointKind::Fixed => Isometry3::identity(),
            JointKind::Revolute => {
                if self.axis.norm() < MINIMUM_AXIS_LENGTH {
                    return Isometry3::identity();
                }

                let rotation =
                    UnitQuaternion::from_axis_angle(&Unit::new_normalize(self.axis), position);
                Isometry3::from_parts(Translation3::identity(), rotation)
            }
            JointKind::Prismatic => Isometry3::from_parts(
                Translation3::from(self.axis * position),
                UnitQuaternion::identity(),
            ),
        }
    }

    /// Returns the name of the joint.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Creates a new [Joint].
    ///
    /// ## Parameters
    ///
    /// * 'name' - The name of the joint
    /// * 'id' - The handle of the joint
    /// * 'kind' - The degree of freedom of the joint
    /// * 'axis' - The axis of motion in the joint origin frame
    /// * 'parent' - The frame the joint is attached to
    /// * 'child' - The frame that is moved by the joint
    /// * 'origin' - The pose of the child frame in the parent frame at zero displacement
    /// * 'limits' - The position limits of the joint
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        id: JointID,
        kind: JointKind,
        axis: Vector3<f64>,
        parent: FrameID,
        child: FrameID,
        origin: Isometry3<f64>,
        limits: JointLimits,
    ) -> Self {
        Self {
            name,
            id,
            kind,
            axis,
            parent,
            child,
            origin,
            limits,
            position: 0.0,
        }
    }

    /// Returns the pose of the child frame in the parent frame at zero displacement.
    pub fn origin(&self) -> &Isometry3<f64> {
        &self.origin
    }

    /// Returns the [FrameID] of the parent frame.
    pub fn parent(&self) -> FrameID {
        self.parent
    }

    /// Returns the current position of the joint.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Sets the current position of the joint, clamped to the joint limits. Fixed joints
    /// ignore the new position.
    pub(crate) fn set_position(&mut self, position: f64) {
        if self.kind.is_movable() {
            self.position = self.limits.clamp(position);
        }
    }

    /// Returns the transform from the child frame to the parent frame for the given
    /// joint position.
    ///
    /// ## Parameters
    ///
    /// * 'position' - The joint position in radians (revolute) or meters (prismatic)
    pub fn transform_for_position(&self, position: f64) -> Isometry3<f64> {
        self.origin * self.motion(position)
    }
}
