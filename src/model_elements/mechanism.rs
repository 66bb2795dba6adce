//! Defines the mechanism description and the reader for the URDF format.
//!
//! A mechanism description is a list of named links and a list of joints that connect a
//! parent link to a child link. Only the kinematic fields are kept: joint type, origin
//! offset, axis and position limits. Visual, collision and inertial elements are skipped.

extern crate nalgebra as na;

use std::{collections::HashSet, path::Path};

use na::{Isometry3, Translation3, UnitQuaternion, Vector3};
use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
use tracing::warn;

use crate::Error;

use super::frame_elements::{JointKind, JointLimits, MINIMUM_AXIS_LENGTH};

#[cfg(test)]
#[path = "mechanism_tests.rs"]
mod mechanism_tests;

/// Describes a single link of a mechanism.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkDescription {
    name: String,
}

impl LinkDescription {
    /// Returns the name of the link.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Creates a new [LinkDescription].
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Describes a joint that connects a parent frame to a child frame.
#[derive(Clone, Debug, PartialEq)]
pub struct JointDescription {
    name: String,
    kind: JointKind,
    parent: String,
    child: String,
    origin: Isometry3<f64>,
    axis: Vector3<f64>,
    limits: JointLimits,
}

impl JointDescription {
    /// Returns the axis of motion in the joint origin frame.
    pub fn axis(&self) -> &Vector3<f64> {
        &self.axis
    }

    /// Returns the name of the child frame.
    pub fn child(&self) -> &str {
        self.child.as_ref()
    }

    /// Returns the kind of the joint.
    pub fn kind(&self) -> JointKind {
        self.kind
    }

    /// Returns the position limits of the joint.
    pub fn limits(&self) -> &JointLimits {
        &self.limits
    }

    /// Returns the name of the joint.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Creates a new [JointDescription] with an identity origin, an x-axis and no limits.
    ///
    /// ## Parameters
    ///
    /// * 'name' - The name of the joint
    /// * 'kind' - The kind of the joint
    /// * 'parent' - The name of the parent frame
    /// * 'child' - The name of the child frame
    pub fn new(
        name: impl Into<String>,
        kind: JointKind,
        parent: impl Into<String>,
        child: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            parent: parent.into(),
            child: child.into(),
            origin: Isometry3::identity(),
            axis: Vector3::x(),
            limits: JointLimits::unbounded(),
        }
    }

    /// Returns the pose of the child frame in the parent frame at zero displacement.
    pub fn origin(&self) -> &Isometry3<f64> {
        &self.origin
    }

    /// Returns the name of the parent frame.
    pub fn parent(&self) -> &str {
        self.parent.as_ref()
    }

    /// Sets the axis of motion.
    pub fn with_axis(mut self, axis: Vector3<f64>) -> Self {
        self.axis = axis;
        self
    }

    /// Sets the position limits.
    pub fn with_limits(mut self, limits: JointLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the pose of the child frame in the parent frame at zero displacement.
    pub fn with_origin(mut self, origin: Isometry3<f64>) -> Self {
        self.origin = origin;
        self
    }
}

/// Describes a mechanism as a set of links connected by joints.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MechanismDescription {
    name: String,
    links: Vec<LinkDescription>,
    joints: Vec<JointDescription>,
}

impl MechanismDescription {
    /// Reads a mechanism description from a URDF file.
    ///
    /// ## Errors
    ///
    /// * [Error::MalformedMechanism] - Returned when the file cannot be read or parsed.
    pub fn from_urdf_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::MalformedMechanism {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        Self::from_urdf_str(&text)
    }

    /// Reads a mechanism description from URDF text.
    ///
    /// ## Errors
    ///
    /// * [Error::MalformedMechanism] - Returned when the XML is malformed, when there is no
    ///   `robot` element or when a required element or attribute is missing.
    pub fn from_urdf_str(xml: &str) -> Result<Self, Error> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) if e.name().as_ref() == b"robot" => {
                    return parse_robot(&mut reader, e);
                }
                Ok(Event::Empty(ref e)) if e.name().as_ref() == b"robot" => {
                    return Ok(Self::new(attribute(e, "name")?.unwrap_or_default()));
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(xml_error(e)),
            }
            buf.clear();
        }

        Err(Error::MalformedMechanism {
            reason: "the document does not contain a robot element".to_string(),
        })
    }

    /// Returns the joints of the mechanism in declaration order.
    pub fn joints(&self) -> &[JointDescription] {
        &self.joints
    }

    /// Returns the links of the mechanism in declaration order.
    pub fn links(&self) -> &[LinkDescription] {
        &self.links
    }

    /// Returns the name of the mechanism.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Creates a new, empty, [MechanismDescription].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: Vec::new(),
            joints: Vec::new(),
        }
    }

    /// Returns the name of the root link, i.e. the only link that is not the child of a
    /// joint.
    ///
    /// ## Errors
    ///
    /// * [Error::MalformedMechanism] - Returned when the description does not form a single
    ///   tree.
    pub fn root_link(&self) -> Result<&str, Error> {
        self.validate()?;

        let children: HashSet<&str> = self.joints.iter().map(|j| j.child()).collect();
        self.links
            .iter()
            .map(|l| l.name())
            .find(|name| !children.contains(name))
            .ok_or_else(|| Error::MalformedMechanism {
                reason: "there is no root link".to_string(),
            })
    }

    /// Checks that the description forms a single connected tree of links.
    ///
    /// It is expected that
    /// - link and joint names are unique
    /// - every joint references declared links
    /// - every movable joint has a non-degenerate axis
    /// - every link is the child of at most one joint
    /// - exactly one link has no parent and all links can be reached from it
    ///
    /// ## Errors
    ///
    /// * [Error::MalformedMechanism] - Returned when any of the conditions is violated.
    pub fn validate(&self) -> Result<(), Error> {
        let malformed = |reason: String| Err(Error::MalformedMechanism { reason });

        let mut link_names = HashSet::new();
        for link in &self.links {
            if !link_names.insert(link.name()) {
                return malformed(format!("the link {} is declared more than once", link.name()));
            }
        }

        let mut joint_names = HashSet::new();
        let mut children = HashSet::new();
        for joint in &self.joints {
            if !joint_names.insert(joint.name()) {
                return malformed(format!(
                    "the joint {} is declared more than once",
                    joint.name()
                ));
            }

            for link in [joint.parent(), joint.child()] {
                if !link_names.contains(link) {
                    return malformed(format!(
                        "the joint {} references the undeclared link {}",
                        joint.name(),
                        link
                    ));
                }
            }

            if joint.kind().is_movable() && joint.axis().norm() < MINIMUM_AXIS_LENGTH {
                return malformed(format!("the joint {} has a degenerate axis", joint.name()));
            }

            if !children.insert(joint.child()) {
                return malformed(format!(
                    "the link {} is the child of more than one joint",
                    joint.child()
                ));
            }
        }

        let roots: Vec<&str> = self
            .links
            .iter()
            .map(|l| l.name())
            .filter(|name| !children.contains(name))
            .collect();
        if roots.len() != 1 {
            return malformed(format!(
                "expected exactly one root link but found {}",
                roots.len()
            ));
        }

        // With one root and at most one parent per link, every link is reachable unless
        // there is a cycle. Walk up from every link to detect one.
        for link in &self.links {
            let mut current = link.name();
            let mut steps = 0;
            while let Some(joint) = self.joints.iter().find(|j| j.child() == current) {
                current = joint.parent();
                steps += 1;
                if steps > self.joints.len() {
                    return malformed(format!("the link {} is part of a cycle", link.name()));
                }
            }
        }

        Ok(())
    }

    /// Adds a joint to the description.
    pub fn with_joint(mut self, joint: JointDescription) -> Self {
        self.joints.push(joint);
        self
    }

    /// Adds a link to the description.
    pub fn with_link(mut self, link: LinkDescription) -> Self {
        self.links.push(link);
        self
    }
}

/// Parse the robot element and its children.
fn parse_robot(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<MechanismDescription, Error> {
    let name = attribute(start, "name")?.unwrap_or_default();
    let mut description = MechanismDescription::new(name);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let element_name = e.name().as_ref().to_vec();
                match element_name.as_slice() {
                    b"link" => {
                        description
                            .links
                            .push(LinkDescription::new(required_attribute(e, "name", "link")?));
                        skip_element(reader, &element_name)?;
                    }
                    b"joint" => {
                        let joint = parse_joint(reader, e)?;
                        description.joints.push(joint);
                    }
                    _ => skip_element(reader, &element_name)?,
                }
            }
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"link" => {
                    description
                        .links
                        .push(LinkDescription::new(required_attribute(e, "name", "link")?));
                }
                b"joint" => {
                    let name = required_attribute(e, "name", "joint")?;
                    return Err(Error::MalformedMechanism {
                        reason: format!("the joint {} has no parent and child links", name),
                    });
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"robot" => break,
            Ok(Event::Eof) => {
                return Err(Error::MalformedMechanism {
                    reason: "unexpected end of document in robot".to_string(),
                })
            }
            Ok(_) => {}
            Err(e) => return Err(xml_error(e)),
        }
        buf.clear();
    }

    Ok(description)
}

/// Parse a joint element and its children.
fn parse_joint(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<JointDescription, Error> {
    let name = required_attribute(start, "name", "joint")?;
    let joint_type = required_attribute(start, "type", "joint")?;

    let (kind, is_continuous) = match joint_type.as_str() {
        "revolute" => (JointKind::Revolute, false),
        "continuous" => (JointKind::Revolute, true),
        "prismatic" => (JointKind::Prismatic, false),
        "fixed" => (JointKind::Fixed, false),
        other => {
            return Err(Error::MalformedMechanism {
                reason: format!("the joint {} has the unsupported type {}", name, other),
            })
        }
    };

    let mut fields = JointFields::default();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                fields.read_element(e, &name, is_continuous)?;
                let element_name = e.name().as_ref().to_vec();
                skip_element(reader, &element_name)?;
            }
            Ok(Event::Empty(ref e)) => fields.read_element(e, &name, is_continuous)?,
            Ok(Event::End(ref e)) if e.name().as_ref() == b"joint" => break,
            Ok(Event::Eof) => {
                return Err(Error::MalformedMechanism {
                    reason: format!("unexpected end of document in joint {}", name),
                })
            }
            Ok(_) => {}
            Err(e) => return Err(xml_error(e)),
        }
        buf.clear();
    }

    let JointFields {
        parent,
        child,
        origin,
        axis,
        limits,
    } = fields;

    let parent = parent.ok_or_else(|| Error::MalformedMechanism {
        reason: format!("the joint {} has no parent link", name),
    })?;
    let child = child.ok_or_else(|| Error::MalformedMechanism {
        reason: format!("the joint {} has no child link", name),
    })?;

    let axis = match kind {
        JointKind::Fixed => axis,
        _ => {
            let length = axis.norm();
            if length < MINIMUM_AXIS_LENGTH {
                return Err(Error::MalformedMechanism {
                    reason: format!("the joint {} has a degenerate axis", name),
                });
            }
            axis / length
        }
    };

    Ok(JointDescription::new(name, kind, parent, child)
        .with_origin(origin)
        .with_axis(axis)
        .with_limits(limits))
}

/// The values collected from the child elements of a joint element.
struct JointFields {
    parent: Option<String>,
    child: Option<String>,
    origin: Isometry3<f64>,
    axis: Vector3<f64>,
    limits: JointLimits,
}

impl Default for JointFields {
    fn default() -> Self {
        Self {
            parent: None,
            child: None,
            origin: Isometry3::identity(),
            axis: Vector3::x(),
            limits: JointLimits::unbounded(),
        }
    }
}

impl JointFields {
    fn read_element(
        &mut self,
        e: &BytesStart,
        joint: &str,
        is_continuous: bool,
    ) -> Result<(), Error> {
        match e.name().as_ref() {
            b"parent" => self.parent = Some(required_attribute(e, "link", "parent")?),
            b"child" => self.child = Some(required_attribute(e, "link", "child")?),
            b"origin" => self.origin = parse_origin(e)?,
            b"axis" => {
                if let Some(xyz) = attribute(e, "xyz")? {
                    self.axis = parse_vector3(&xyz)?;
                }
            }
            // Continuous joints may carry effort and velocity limits but never position limits.
            b"limit" if !is_continuous => {
                let lower = parse_float_attribute(e, "lower")?.unwrap_or(0.0);
                let upper = parse_float_attribute(e, "upper")?.unwrap_or(0.0);
                self.limits = JointLimits::new(lower, upper);
            }
            b"mimic" => warn!(joint, "Ignoring the mimic element of a joint"),
            _ => {}
        }

        Ok(())
    }
}

/// Parse the origin element. URDF uses fixed-axis XYZ (roll, pitch, yaw) angles.
fn parse_origin(e: &BytesStart) -> Result<Isometry3<f64>, Error> {
    let xyz = match attribute(e, "xyz")? {
        Some(s) => parse_vector3(&s)?,
        None => Vector3::zeros(),
    };
    let rpy = match attribute(e, "rpy")? {
        Some(s) => parse_vector3(&s)?,
        None => Vector3::zeros(),
    };

    Ok(Isometry3::from_parts(
        Translation3::from(xyz),
        UnitQuaternion::from_euler_angles(rpy.x, rpy.y, rpy.z),
    ))
}

/// Get an unescaped attribute value, returning None if not present.
fn attribute(e: &BytesStart, name: &str) -> Result<Option<String>, Error> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| xml_error(err.into()))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr.unescape_value().map_err(xml_error)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Get an attribute that has to be present.
fn required_attribute(e: &BytesStart, name: &str, element: &str) -> Result<String, Error> {
    attribute(e, name)?.ok_or_else(|| Error::MalformedMechanism {
        reason: format!("missing attribute {} on {}", name, element),
    })
}

/// Parse a float attribute, returning None if not present.
fn parse_float_attribute(e: &BytesStart, name: &str) -> Result<Option<f64>, Error> {
    match attribute(e, name)? {
        Some(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| Error::MalformedMechanism {
                reason: format!("invalid float for {}: {}", name, s),
            }),
        None => Ok(None),
    }
}

/// Parse a space-separated vector3 string.
fn parse_vector3(s: &str) -> Result<Vector3<f64>, Error> {
    let parts = s
        .split_whitespace()
        .map(|p| {
            p.parse::<f64>().map_err(|_| Error::MalformedMechanism {
                reason: format!("invalid float: {}", p),
            })
        })
        .collect::<Result<Vec<f64>, Error>>()?;

    if parts.len() != 3 {
        return Err(Error::MalformedMechanism {
            reason: format!("expected 3 values in vector, got {}: {}", parts.len(), s),
        });
    }

    Ok(Vector3::new(parts[0], parts[1], parts[2]))
}

/// Consume events up to and including the end of the current element.
fn skip_element(reader: &mut Reader<&[u8]>, name: &[u8]) -> Result<(), Error> {
    let mut buf = Vec::new();
    let mut depth = 1;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == name => depth += 1,
            Ok(Event::End(ref e)) if e.name().as_ref() == name => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Ok(Event::Eof) => {
                return Err(Error::MalformedMechanism {
                    reason: format!(
                        "unexpected end of document in {}",
                        String::from_utf8_lossy(name)
                    ),
                })
            }
            Ok(_) => {}
            Err(e) => return Err(xml_error(e)),
        }
        buf.clear();
    }
}

fn xml_error(e: quick_xml::Error) -> Error {
    Error::MalformedMechanism {
        reason: format!("XML parse error: {}", e),
    }
}
