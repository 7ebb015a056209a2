//! URDF output: `<inertial>` snippets and in-place patching of a robot
//! description
//!
//! Aggregated properties live in the global CAD frame. Patching re-expresses
//! them in each link's own frame, computed from the joint chain with every
//! joint at its zero position. The CAD frame is taken to be the root link's
//! frame.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use glam::{DAffine3, DQuat, DVec3, EulerRot};

use crate::inertia::{Inertial, InertiaMatrix};
use crate::report::MassReport;

/// Errors reading, patching or writing a URDF
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrdfError {
    #[error("Failed to parse URDF: {0}")]
    Parse(String),

    #[error("Failed to serialize URDF: {0}")]
    Write(String),

    #[error("IO error writing {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Empty URDF: no links defined")]
    EmptyUrdf,

    #[error("No root link: every link is the child of a joint")]
    NoRootLink,
}

/// `<inertial>` element for one link
pub fn inertial_snippet(name: &str, inertial: &Inertial) -> String {
    let c = inertial.com;
    let i = &inertial.inertia;
    [
        format!("  <!-- {} -->", name),
        "  <inertial>".to_string(),
        format!(
            "    <origin xyz=\"{:.6} {:.6} {:.6}\" rpy=\"0 0 0\" />",
            c.x, c.y, c.z
        ),
        format!("    <mass value=\"{:.4}\" />", inertial.mass),
        format!(
            "    <inertia ixx=\"{:.5e}\" ixy=\"{:.5e}\" ixz=\"{:.5e}\" \
             iyy=\"{:.5e}\" iyz=\"{:.5e}\" izz=\"{:.5e}\" />",
            i.ixx, i.ixy, i.ixz, i.iyy, i.iyz, i.izz
        ),
        "  </inertial>".to_string(),
    ]
    .join("\n")
}

/// Snippets for every link with a defined centre of mass
pub fn inertial_snippets(report: &MassReport) -> String {
    report
        .links
        .iter()
        .filter_map(|l| l.inertial.as_ref().ok().map(|i| inertial_snippet(&l.name, i)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// URDF pose as a rigid transform (fixed-axis roll, pitch, yaw)
pub fn pose_to_affine(pose: &urdf_rs::Pose) -> DAffine3 {
    let [x, y, z] = pose.xyz.0;
    let [roll, pitch, yaw] = pose.rpy.0;
    DAffine3::from_rotation_translation(
        DQuat::from_euler(EulerRot::ZYX, yaw, pitch, roll),
        DVec3::new(x, y, z),
    )
}

/// Frame of every link reachable from the root, relative to the root
#[derive(Debug, Clone)]
pub struct LinkFrames {
    root: String,
    frames: HashMap<String, DAffine3>,
}

impl LinkFrames {
    pub fn from_robot(robot: &urdf_rs::Robot) -> Result<Self, UrdfError> {
        if robot.links.is_empty() {
            return Err(UrdfError::EmptyUrdf);
        }

        let child_links: HashSet<&str> =
            robot.joints.iter().map(|j| j.child.link.as_str()).collect();
        let root = robot
            .links
            .iter()
            .find(|l| !child_links.contains(l.name.as_str()))
            .ok_or(UrdfError::NoRootLink)?
            .name
            .clone();

        let mut children: HashMap<&str, Vec<&urdf_rs::Joint>> = HashMap::new();
        for joint in &robot.joints {
            children.entry(joint.parent.link.as_str()).or_default().push(joint);
        }

        let mut frames = HashMap::new();
        frames.insert(root.clone(), DAffine3::IDENTITY);
        let mut queue = VecDeque::from([(root.as_str(), DAffine3::IDENTITY)]);

        while let Some((link, frame)) = queue.pop_front() {
            for joint in children.get(link).into_iter().flatten() {
                let child = joint.child.link.as_str();
                if frames.contains_key(child) {
                    tracing::warn!(
                        "Link '{}' reached twice; joint '{}' ignored",
                        child,
                        joint.name
                    );
                    continue;
                }
                let child_frame = frame * pose_to_affine(&joint.origin);
                frames.insert(child.to_string(), child_frame);
                queue.push_back((child, child_frame));
            }
        }

        tracing::debug!("Computed {} link frames from root '{}'", frames.len(), root);
        Ok(Self { root, frames })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn get(&self, link: &str) -> Option<&DAffine3> {
        self.frames.get(link)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Re-express global-frame properties in a link frame: `c' = Rᵀ(c − t)`,
/// `I' = Rᵀ I R`
pub fn localize(inertial: &Inertial, frame: &DAffine3) -> Inertial {
    let to_local = frame.matrix3.transpose();
    let com = to_local * (inertial.com - frame.translation);
    let inertia = inertial.inertia.rotated(to_local);
    Inertial {
        mass: inertial.mass,
        com,
        inertia,
        inertia_origin: inertia.shifted(inertial.mass, com),
    }
}

fn to_urdf_inertial(inertial: &Inertial) -> urdf_rs::Inertial {
    let InertiaMatrix {
        ixx,
        ixy,
        ixz,
        iyy,
        iyz,
        izz,
    } = inertial.inertia;
    urdf_rs::Inertial {
        origin: urdf_rs::Pose {
            xyz: urdf_rs::Vec3(inertial.com.to_array()),
            rpy: urdf_rs::Vec3([0.0; 3]),
        },
        mass: urdf_rs::Mass {
            value: inertial.mass,
        },
        inertia: urdf_rs::Inertia {
            ixx,
            ixy,
            ixz,
            iyy,
            iyz,
            izz,
        },
    }
}

/// Outcome of patching a robot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchSummary {
    pub patched: Vec<String>,
    /// Links left untouched: absent from the URDF, unreachable from its
    /// root, or without mass
    pub skipped: Vec<String>,
}

/// Replace the `<inertial>` of every reported link found in `robot`
pub fn patch_robot(
    robot: &mut urdf_rs::Robot,
    report: &MassReport,
) -> Result<PatchSummary, UrdfError> {
    let frames = LinkFrames::from_robot(robot)?;
    let mut summary = PatchSummary::default();

    for link in &report.links {
        let Ok(inertial) = &link.inertial else {
            tracing::warn!("Link '{}' has no mass; URDF inertial left unchanged", link.name);
            summary.skipped.push(link.name.clone());
            continue;
        };
        let Some(frame) = frames.get(&link.name) else {
            tracing::warn!("Link '{}' not reachable in URDF; skipped", link.name);
            summary.skipped.push(link.name.clone());
            continue;
        };
        let Some(target) = robot.links.iter_mut().find(|l| l.name == link.name) else {
            summary.skipped.push(link.name.clone());
            continue;
        };

        target.inertial = to_urdf_inertial(&localize(inertial, frame));
        summary.patched.push(link.name.clone());
    }

    tracing::info!(
        "Patched {} links, skipped {}",
        summary.patched.len(),
        summary.skipped.len()
    );
    Ok(summary)
}

pub fn read_robot(path: impl AsRef<Path>) -> Result<urdf_rs::Robot, UrdfError> {
    let robot = urdf_rs::read_file(path.as_ref()).map_err(|e| UrdfError::Parse(e.to_string()))?;
    tracing::info!(
        "Loaded URDF '{}' ({} links, {} joints)",
        robot.name,
        robot.links.len(),
        robot.joints.len()
    );
    Ok(robot)
}

pub fn write_robot(robot: &urdf_rs::Robot, path: impl AsRef<Path>) -> Result<(), UrdfError> {
    let xml = urdf_rs::write_to_string(robot).map_err(|e| UrdfError::Write(e.to_string()))?;
    std::fs::write(path.as_ref(), xml).map_err(|e| UrdfError::Io {
        path: path.as_ref().display().to_string(),
        reason: e.to_string(),
    })?;
    tracing::info!("Wrote URDF to {:?}", path.as_ref());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inertia::MassProperties;
    use crate::report::LinkReport;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    const ARM: &str = r#"<?xml version="1.0"?>
<robot name="arm">
  <link name="base_link"/>
  <link name="upper"/>
  <link name="lower"/>
  <joint name="shoulder" type="revolute">
    <parent link="base_link"/>
    <child link="upper"/>
    <origin xyz="0 0 0.1" rpy="0 0 1.5707963267948966"/>
    <axis xyz="0 0 1"/>
    <limit lower="-1" upper="1" effort="1" velocity="1"/>
  </joint>
  <joint name="elbow" type="fixed">
    <parent link="upper"/>
    <child link="lower"/>
    <origin xyz="0.2 0 0" rpy="0 0 0"/>
  </joint>
</robot>"#;

    fn robot() -> urdf_rs::Robot {
        urdf_rs::read_from_string(ARM).unwrap()
    }

    fn body(mass: f64, com: DVec3, inertia: InertiaMatrix) -> Inertial {
        MassProperties::from_body(mass, com, inertia, 0.0, 1)
            .finalize()
            .unwrap()
    }

    fn report(links: Vec<(&str, MassProperties)>) -> MassReport {
        MassReport {
            links: links
                .into_iter()
                .map(|(name, total)| LinkReport {
                    name: name.to_string(),
                    parts: Vec::new(),
                    total,
                    inertial: total.finalize(),
                })
                .collect(),
            unmapped: Vec::new(),
            missing: Vec::new(),
            grand_total: MassProperties::default(),
        }
    }

    #[test]
    fn test_pose_rpy_convention() {
        // Yaw of 90° maps x onto y
        let pose = urdf_rs::Pose {
            xyz: urdf_rs::Vec3([0.0; 3]),
            rpy: urdf_rs::Vec3([0.0, 0.0, FRAC_PI_2]),
        };
        let p = pose_to_affine(&pose).transform_vector3(DVec3::X);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);

        // Roll first: y goes to z, which the yaw leaves alone
        let pose = urdf_rs::Pose {
            xyz: urdf_rs::Vec3([0.0; 3]),
            rpy: urdf_rs::Vec3([FRAC_PI_2, 0.0, FRAC_PI_2]),
        };
        let p = pose_to_affine(&pose).transform_vector3(DVec3::Y);
        assert_relative_eq!(p.z, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_link_frames() {
        let frames = LinkFrames::from_robot(&robot()).unwrap();
        assert_eq!(frames.root(), "base_link");
        assert_eq!(frames.len(), 3);

        // Elbow offset along the rotated x axis of `upper`
        let lower = frames.get("lower").unwrap();
        assert_relative_eq!(lower.translation.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(lower.translation.y, 0.2, epsilon = 1e-12);
        assert_relative_eq!(lower.translation.z, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_localize() {
        let frame = DAffine3::from_rotation_translation(
            DQuat::from_rotation_z(FRAC_PI_2),
            DVec3::new(0.0, 0.0, 0.1),
        );
        let global = body(2.0, DVec3::new(0.0, 0.3, 0.1), InertiaMatrix::diagonal(1.0, 2.0, 3.0));
        let local = localize(&global, &frame);

        // Global +y is the link's +x
        assert_relative_eq!(local.com.x, 0.3, epsilon = 1e-12);
        assert_relative_eq!(local.com.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(local.com.z, 0.0, epsilon = 1e-12);
        assert_relative_eq!(local.inertia.ixx, 2.0, epsilon = 1e-9);
        assert_relative_eq!(local.inertia.iyy, 1.0, epsilon = 1e-9);
        assert_relative_eq!(local.inertia.izz, 3.0, epsilon = 1e-9);
        assert_relative_eq!(local.mass, 2.0);
    }

    #[test]
    fn test_localize_identity_keeps_values() {
        let global = body(
            1.0,
            DVec3::new(0.1, 0.2, 0.3),
            InertiaMatrix {
                ixy: -0.1,
                ..InertiaMatrix::diagonal(1.0, 1.0, 1.0)
            },
        );
        let local = localize(&global, &DAffine3::IDENTITY);
        assert_relative_eq!(local.com.z, 0.3, epsilon = 1e-12);
        assert_relative_eq!(local.inertia.ixy, -0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_patch_robot() {
        let mut robot = robot();
        let at = |c: DVec3| MassProperties::from_body(0.5, c, InertiaMatrix::ZERO, 0.0, 1);
        let report = report(vec![
            ("lower", at(DVec3::new(0.0, 0.25, 0.1))),
            ("upper", MassProperties::default()),
            ("gripper", at(DVec3::ZERO)),
        ]);

        let summary = patch_robot(&mut robot, &report).unwrap();
        assert_eq!(summary.patched, vec!["lower"]);
        assert_eq!(summary.skipped, vec!["upper", "gripper"]);

        let lower = robot.links.iter().find(|l| l.name == "lower").unwrap();
        assert_relative_eq!(lower.inertial.mass.value, 0.5);
        assert_relative_eq!(lower.inertial.origin.xyz.0[0], 0.05, epsilon = 1e-12);
        assert_relative_eq!(lower.inertial.origin.xyz.0[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(lower.inertial.origin.xyz.0[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_write_and_read_back() {
        let mut robot = robot();
        let report = report(vec![(
            "base_link",
            MassProperties::from_body(
                1.5,
                DVec3::new(0.0, 0.0, 0.02),
                InertiaMatrix::diagonal(1e-3, 2e-3, 3e-3),
                0.0,
                1,
            ),
        )]);
        patch_robot(&mut robot, &report).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arm.urdf");
        write_robot(&robot, &path).unwrap();

        let back = read_robot(&path).unwrap();
        let base = back.links.iter().find(|l| l.name == "base_link").unwrap();
        assert_relative_eq!(base.inertial.mass.value, 1.5);
        assert_relative_eq!(base.inertial.inertia.izz, 3e-3, max_relative = 1e-9);
        assert_eq!(back.joints.len(), 2);
    }

    #[test]
    fn test_snippet() {
        let inertia = InertiaMatrix::diagonal(1e-4, 2e-4, 3e-4);
        let inertial = body(0.362, DVec3::new(0.01, -0.02, 0.5), inertia);
        let snippet = inertial_snippet("link1", &inertial);
        assert!(snippet.contains("<!-- link1 -->"));
        assert!(snippet.contains(r#"<origin xyz="0.010000 -0.020000 0.500000" rpy="0 0 0" />"#));
        assert!(snippet.contains(r#"<mass value="0.3620" />"#));
        assert!(snippet.contains(r#"izz="3.00000e-4""#));
    }
}
