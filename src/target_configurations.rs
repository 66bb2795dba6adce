//! Defines the static per-robot-hand configuration records.
//!
//! A [TargetConfiguration] tells the embodiment solver which joints make up each finger of
//! a robot hand, which frames are the base and the fingertips, how the base of the source
//! hand relates to the base of the robot hand and where the mechanism description is found.
//!
//! Configurations for the Mia hand and the Shadow dexterous hand are provided. Their
//! mechanism descriptions are not bundled, the caller supplies the URDF.

extern crate nalgebra as na;

use std::{collections::BTreeMap, f64::consts::PI, path::PathBuf};

use na::{Isometry3, Translation3, UnitQuaternion, Vector3};

use crate::{
    model_elements::{frame_graph::FrameGraph, kinematic_model::KinematicModel},
    virtual_joints::VirtualJoint,
    Error,
};

#[cfg(test)]
#[path = "target_configurations_tests.rs"]
mod target_configurations_tests;

/// A function that augments the frame graph of a freshly loaded mechanism, e.g. by
/// attaching fingertip frames to the distal links.
pub type KinematicModelHook = fn(&mut FrameGraph) -> Result<(), Error>;

/// Defines where the mechanism description of a robot hand is found.
#[derive(Clone, Debug, PartialEq)]
pub enum MechanismSource {
    /// The URDF text itself.
    Urdf(String),
    /// The path of a URDF file.
    UrdfFile(PathBuf),
}

/// Describes a robot hand for the embodiment solver.
#[derive(Clone, Debug)]
pub struct TargetConfiguration {
    name: String,

    /// The joints of each finger, ordered from the base to the fingertip.
    joint_names: BTreeMap<String, Vec<String>>,

    base_frame: String,

    /// The fingertip frame of each finger.
    end_effector_frames: BTreeMap<String, String>,

    /// The transform that maps coordinates in the source hand base into coordinates in the
    /// robot hand base frame.
    base_to_base: Isometry3<f64>,

    mechanism: MechanismSource,
    kinematic_model_hook: Option<KinematicModelHook>,
    virtual_joints: BTreeMap<String, VirtualJoint>,
}

impl TargetConfiguration {
    /// Returns the name of the base frame of the robot hand.
    pub fn base_frame(&self) -> &str {
        self.base_frame.as_ref()
    }

    /// Returns the transform that maps coordinates in the source hand base into coordinates
    /// in the robot hand base frame.
    pub fn base_to_base(&self) -> &Isometry3<f64> {
        &self.base_to_base
    }

    /// Returns the fingertip frame of the given finger.
    pub fn end_effector_frame(&self, finger: &str) -> Option<&str> {
        self.end_effector_frames.get(finger).map(|f| f.as_str())
    }

    /// Returns the names of the configured fingers in alphabetical order.
    pub fn fingers(&self) -> impl Iterator<Item = &str> {
        self.joint_names.keys().map(|f| f.as_str())
    }

    /// Returns the joints of the given finger, ordered from the base to the fingertip.
    pub fn joint_names(&self, finger: &str) -> Option<&[String]> {
        self.joint_names.get(finger).map(|j| j.as_slice())
    }

    /// Returns the hook that augments the loaded mechanism, if any.
    pub fn kinematic_model_hook(&self) -> Option<KinematicModelHook> {
        self.kinematic_model_hook
    }

    /// Loads the mechanism description, applies the hook and registers the virtual joints.
    ///
    /// ## Errors
    ///
    /// * [Error::MalformedMechanism] - Returned when the mechanism cannot be loaded.
    /// * [Error::UnknownJoint] - Returned when a virtual joint refers to an unknown joint.
    /// * Any error returned by the hook.
    pub fn load_kinematic_model(&self) -> Result<KinematicModel, Error> {
        let mut model = match &self.mechanism {
            MechanismSource::Urdf(urdf) => KinematicModel::from_urdf_str(urdf)?,
            MechanismSource::UrdfFile(path) => KinematicModel::from_urdf_file(path)?,
        };

        if let Some(hook) = self.kinematic_model_hook {
            hook(model.graph_mut())?;
        }

        for (name, virtual_joint) in &self.virtual_joints {
            model.add_virtual_joint(name, virtual_joint.clone())?;
        }

        Ok(model)
    }

    /// Returns the source of the mechanism description.
    pub fn mechanism(&self) -> &MechanismSource {
        &self.mechanism
    }

    /// Returns the name of the robot hand.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Creates a new [TargetConfiguration] without fingers and with an identity base to
    /// base transform.
    ///
    /// ## Parameters
    ///
    /// * 'name' - The name of the robot hand
    /// * 'base_frame' - The name of the base frame of the robot hand
    /// * 'mechanism' - Where the mechanism description is found
    pub fn new(
        name: impl Into<String>,
        base_frame: impl Into<String>,
        mechanism: MechanismSource,
    ) -> Self {
        Self {
            name: name.into(),
            joint_names: BTreeMap::new(),
            base_frame: base_frame.into(),
            end_effector_frames: BTreeMap::new(),
            base_to_base: Isometry3::identity(),
            mechanism,
            kinematic_model_hook: None,
            virtual_joints: BTreeMap::new(),
        }
    }

    /// Returns the virtual joints, keyed by name.
    pub fn virtual_joints(&self) -> &BTreeMap<String, VirtualJoint> {
        &self.virtual_joints
    }

    /// Sets the transform that maps coordinates in the source hand base into coordinates
    /// in the robot hand base frame.
    pub fn with_base_to_base(mut self, base_to_base: Isometry3<f64>) -> Self {
        self.base_to_base = base_to_base;
        self
    }

    /// Adds a finger, replacing an existing finger with the same name.
    ///
    /// ## Parameters
    ///
    /// * 'finger' - The name of the finger, e.g. "index"
    /// * 'joint_names' - The joints of the finger, ordered from the base to the fingertip
    /// * 'end_effector_frame' - The name of the fingertip frame
    pub fn with_finger(
        mut self,
        finger: impl Into<String>,
        joint_names: &[&str],
        end_effector_frame: impl Into<String>,
    ) -> Self {
        let finger = finger.into();
        self.joint_names.insert(
            finger.clone(),
            joint_names.iter().map(|j| j.to_string()).collect(),
        );
        self.end_effector_frames.insert(finger, end_effector_frame.into());
        self
    }

    /// Sets the hook that augments the loaded mechanism.
    pub fn with_kinematic_model_hook(mut self, hook: KinematicModelHook) -> Self {
        self.kinematic_model_hook = Some(hook);
        self
    }

    /// Adds a virtual joint.
    pub fn with_virtual_joint(mut self, name: impl Into<String>, joint: VirtualJoint) -> Self {
        self.virtual_joints.insert(name.into(), joint);
        self
    }
}

/// Returns the rotation for intrinsic rotations around x, then the new y, then the new z.
pub fn rotation_from_intrinsic_euler_xyz(
    alpha: f64,
    beta: f64,
    gamma: f64,
) -> UnitQuaternion<f64> {
    UnitQuaternion::from_axis_angle(&Vector3::x_axis(), alpha)
        * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), beta)
        * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), gamma)
}

/// Attaches the fingertip frames of the Mia hand to the flexion links of the fingers.
///
/// ## Errors
///
/// Never fails, the signature matches [KinematicModelHook].
pub fn kinematic_model_hook_mia(graph: &mut FrameGraph) -> Result<(), Error> {
    let fingertips = [
        ("thumb_tip", "thumb_fle", 0.025, 0.08),
        ("index_tip", "index_fle", -0.02, 0.09),
        ("middle_tip", "middle_fle", -0.02, 0.09),
        ("ring_tip", "ring_fle", -0.017, 0.083),
        ("little_tip", "little_fle", -0.015, 0.068),
    ];

    for (tip, link, x, y) in fingertips {
        graph.add_static_transform(
            tip,
            link,
            Isometry3::from_parts(Translation3::new(x, y, 0.0), UnitQuaternion::identity()),
        );
    }

    Ok(())
}

/// Returns the configuration of the Mia hand.
///
/// The thumb opposition of the Mia hand has two useful positions, so it is exposed as the
/// virtual joint `j_thumb_opp_binary`.
pub fn mia_hand(mechanism: MechanismSource) -> TargetConfiguration {
    let base_to_base = Isometry3::from_parts(
        Translation3::new(0.002, 0.131, -0.024),
        rotation_from_intrinsic_euler_xyz(-1.634, 1.662, -0.182),
    );

    TargetConfiguration::new("mia_hand", "palm", mechanism)
        .with_finger("thumb", &["j_thumb_fle", "j_thumb_opp_binary"], "thumb_tip")
        .with_finger("index", &["j_index_fle"], "index_tip")
        .with_finger("middle", &["j_mrl_fle"], "middle_tip")
        .with_finger("ring", &["j_ring_fle"], "ring_tip")
        .with_finger("little", &["j_little_fle"], "little_tip")
        .with_base_to_base(base_to_base)
        .with_kinematic_model_hook(kinematic_model_hook_mia)
        .with_virtual_joint(
            "j_thumb_opp_binary",
            VirtualJoint::threshold_joint("j_thumb_opp", -0.628, 0.0),
        )
}

/// Returns the configuration of the Shadow dexterous hand.
///
/// The two distal joints of the fingers are coupled and exposed as the virtual joints
/// `rh_FFJ0`, `rh_MFJ0`, `rh_RFJ0` and `rh_LFJ0`. The wrist joints are not part of any
/// finger and are held where they are.
pub fn shadow_hand(mechanism: MechanismSource) -> TargetConfiguration {
    let base_to_base = Isometry3::from_parts(
        Translation3::new(0.011, -0.014, 0.36),
        rotation_from_intrinsic_euler_xyz(-3.17, 1.427, 3.032),
    );

    let mut configuration = TargetConfiguration::new("shadow_hand", "rh_forearm", mechanism)
        .with_finger(
            "thumb",
            &["rh_THJ5", "rh_THJ4", "rh_THJ3", "rh_THJ2", "rh_THJ1"],
            "rh_thtip",
        )
        .with_finger("index", &["rh_FFJ4", "rh_FFJ3", "rh_FFJ0"], "rh_fftip")
        .with_finger("middle", &["rh_MFJ4", "rh_MFJ3", "rh_MFJ0"], "rh_mftip")
        .with_finger("ring", &["rh_RFJ4", "rh_RFJ3", "rh_RFJ0"], "rh_rftip")
        .with_finger(
            "little",
            &["rh_LFJ5", "rh_LFJ4", "rh_LFJ3", "rh_LFJ0"],
            "rh_lftip",
        )
        .with_base_to_base(base_to_base);

    for finger in ["FF", "MF", "RF", "LF"] {
        configuration = configuration.with_virtual_joint(
            format!("rh_{}J0", finger),
            VirtualJoint::sequential_coupling(
                format!("rh_{}J2", finger),
                format!("rh_{}J1", finger),
                0.5 * PI,
            ),
        );
    }

    configuration
}
