//! Aggregation engine
//!
//! Folds a subtree into one [`MassProperties`]. Every node is classified by
//! its key: a fixed-mass node becomes a single rigid body and ends the
//! recursion, a density node contributes its own solids (leaves) or its
//! children (assemblies).

use std::borrow::Cow;
use std::collections::HashSet;

use crate::inertia::{InertiaMatrix, MM_TO_M, MassProperties};
use crate::material::{Classification, MassPolicy, MaterialClassifier};
use crate::tree::{AssemblyNode, Geometry, NodePath};

/// Grams to kilograms
pub const G_TO_KG: f64 = 1e-3;

/// Geometry problems. These abort the run: a silently zeroed part would
/// produce wrong totals.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("Part '{part}' has no geometry")]
    MissingGeometry { part: String },

    #[error("Fixed-mass part '{part}' has no solids to carry its mass")]
    NoSolids { part: String },

    #[error("Part '{part}' has non-finite geometric moments")]
    NonFinite { part: String },
}

/// A material that contributed to a subtree
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialUse {
    pub material: String,
    pub policy: MassPolicy,
}

/// Folded result of one subtree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtreeMass {
    pub props: MassProperties,
    /// Materials in order of first use
    pub materials: Vec<MaterialUse>,
}

impl SubtreeMass {
    fn single(props: MassProperties, class: Classification<'_>) -> Self {
        Self {
            props,
            materials: vec![MaterialUse {
                material: class.material.to_string(),
                policy: class.policy,
            }],
        }
    }

    /// Combine two disjoint contributions
    pub fn merge(mut self, other: SubtreeMass) -> Self {
        self.props += other.props;
        for used in other.materials {
            if !self.materials.iter().any(|m| m.material == used.material) {
                self.materials.push(used);
            }
        }
        self
    }
}

/// Depth-first subtree fold with optional excluded subtrees
#[derive(Debug, Clone, Copy)]
pub struct Aggregator<'a> {
    classifier: &'a MaterialClassifier,
    exclusions: Option<&'a HashSet<NodePath>>,
}

impl<'a> Aggregator<'a> {
    pub fn new(classifier: &'a MaterialClassifier) -> Self {
        Self {
            classifier,
            exclusions: None,
        }
    }

    /// Skip these subtrees (override children owned by other links)
    pub fn with_exclusions(mut self, exclusions: &'a HashSet<NodePath>) -> Self {
        self.exclusions = Some(exclusions);
        self
    }

    fn is_excluded(&self, path: &NodePath) -> bool {
        self.exclusions.is_some_and(|set| set.contains(path))
    }

    /// Fold the subtree rooted at `node`, located at `path` in the tree.
    ///
    /// The root itself is never excluded, so an override child can be
    /// aggregated under its own link.
    pub fn aggregate(
        &self,
        node: &AssemblyNode,
        path: &NodePath,
    ) -> Result<SubtreeMass, GeometryError> {
        let class = self.classifier.classify(node.key());

        match class.policy {
            MassPolicy::FixedMass { grams } => {
                tracing::debug!("{}: fixed mass {} g ({})", node.key(), grams, class.material);
                let body = rigid_body(node, grams * G_TO_KG)?;
                Ok(SubtreeMass::single(body, class))
            }
            MassPolicy::Density { kg_per_m3 } if node.is_leaf() => {
                let geometry = node
                    .geometry
                    .as_ref()
                    .ok_or_else(|| GeometryError::MissingGeometry {
                        part: node.key().to_string(),
                    })?;
                if !geometry.is_finite() {
                    return Err(GeometryError::NonFinite {
                        part: node.key().to_string(),
                    });
                }
                tracing::debug!(
                    "{}: {} solids at {} kg/m³ ({})",
                    node.key(),
                    geometry.solids.len(),
                    kg_per_m3,
                    class.material
                );
                let props = geometry
                    .solids
                    .iter()
                    .map(|s| MassProperties::from_solid(s, kg_per_m3))
                    .sum();
                Ok(SubtreeMass::single(props, class))
            }
            MassPolicy::Density { .. } => node
                .children
                .iter()
                .enumerate()
                .map(|(i, child)| (path.child(i), child))
                .filter(|(child_path, child)| {
                    let skip = self.is_excluded(child_path);
                    if skip {
                        tracing::debug!("{}: skipped, assigned to another link", child.key());
                    }
                    !skip
                })
                .try_fold(
                    SubtreeMass::default(),
                    |acc, (child_path, child)| -> Result<SubtreeMass, GeometryError> {
                        Ok(acc.merge(self.aggregate(child, &child_path)?))
                    },
                ),
        }
    }
}

/// Fold a subtree with no exclusions
pub fn aggregate(
    node: &AssemblyNode,
    classifier: &MaterialClassifier,
) -> Result<MassProperties, GeometryError> {
    Aggregator::new(classifier)
        .aggregate(node, &NodePath::root())
        .map(|m| m.props)
}

/// All solids of a subtree: the node's own cumulative geometry when present,
/// otherwise the solids of its leaves.
fn subtree_geometry(node: &AssemblyNode) -> Result<Cow<'_, Geometry>, GeometryError> {
    if let Some(geometry) = &node.geometry {
        return Ok(Cow::Borrowed(geometry));
    }
    if node.is_leaf() {
        return Err(GeometryError::MissingGeometry {
            part: node.key().to_string(),
        });
    }
    let mut solids = Vec::new();
    for child in &node.children {
        solids.extend_from_slice(&subtree_geometry(child)?.solids);
    }
    Ok(Cow::Owned(Geometry::new(solids)))
}

/// A fixed-mass node as one rigid body.
///
/// The CAD inertia is rescaled so that the body's total mass is `mass_kg`
/// (effective uniform density `m / V`). With zero CAD volume the body is a
/// point mass.
fn rigid_body(node: &AssemblyNode, mass_kg: f64) -> Result<MassProperties, GeometryError> {
    let geometry = subtree_geometry(node)?;
    if !geometry.is_finite() {
        return Err(GeometryError::NonFinite {
            part: node.key().to_string(),
        });
    }
    let body = geometry.combined().ok_or_else(|| GeometryError::NoSolids {
        part: node.key().to_string(),
    })?;

    let inertia = if body.volume_mm3 > 0.0 {
        body.inertia_mm5
            .scaled(mass_kg / body.volume_mm3 * MM_TO_M * MM_TO_M)
    } else {
        InertiaMatrix::ZERO
    };

    Ok(MassProperties::from_body(
        mass_kg,
        body.centroid_mm * MM_TO_M,
        inertia,
        body.volume_mm3,
        geometry.solids.len(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{MaterialMap, MaterialRule};
    use crate::tree::SolidMoments;
    use crate::tree::fixtures::{cc, cube};
    use approx::assert_relative_eq;
    use glam::DVec3;

    fn classifier(rules: Vec<MaterialRule>, default_density: f64) -> MaterialClassifier {
        MaterialClassifier::new(MaterialMap::new(rules), default_density).unwrap()
    }

    #[test]
    fn test_density_leaf() {
        let part = AssemblyNode::part("bracket", vec![cc(DVec3::new(0.0, 0.0, 20.0))]);
        let props = aggregate(&part, &classifier(vec![], 1000.0)).unwrap();
        assert_relative_eq!(props.mass, 1e-3, epsilon = 1e-15);
        let inertial = props.finalize().unwrap();
        assert_relative_eq!(inertial.com.z, 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_fixed_mass_does_not_recurse() {
        // Children carry heavy steel-like geometry that must not count
        let bearing = AssemblyNode::assembly(
            "6803ZZ v1:1",
            vec![
                AssemblyNode::part("ball", vec![cube(50.0, DVec3::new(100.0, 0.0, 0.0))]),
                AssemblyNode::part("race", vec![cube(50.0, DVec3::new(-100.0, 0.0, 0.0))]),
            ],
        )
        .with_geometry(Geometry::new(vec![cc(DVec3::new(0.0, 5.0, 0.0))]));

        let c = classifier(
            vec![
                MaterialRule::fixed_mass("6803ZZ", 7.0).unwrap(),
                MaterialRule::density("ball", 7800.0).unwrap(),
            ],
            7800.0,
        );
        let result = Aggregator::new(&c).aggregate(&bearing, &NodePath::root()).unwrap();

        assert_relative_eq!(result.props.mass, 0.007, epsilon = 1e-15);
        assert_eq!(result.props.solid_count, 1);
        let inertial = result.props.finalize().unwrap();
        assert_relative_eq!(inertial.com.y, 0.005, epsilon = 1e-12);
        assert_relative_eq!(inertial.com.x, 0.0, epsilon = 1e-12);
        assert_eq!(result.materials.len(), 1);
        assert_eq!(result.materials[0].material, "6803ZZ");
    }

    #[test]
    fn test_fixed_mass_rescales_cad_inertia() {
        // 20 mm cube, 100 g: I = m a² / 6
        let motor = AssemblyNode::part("motor", vec![cube(20.0, DVec3::ZERO)]);
        let c = classifier(vec![MaterialRule::fixed_mass("motor", 100.0).unwrap()], 1250.0);
        let inertial = aggregate(&motor, &c).unwrap().finalize().unwrap();
        assert_relative_eq!(inertial.mass, 0.1);
        assert_relative_eq!(inertial.inertia.izz, 0.1 * 0.02 * 0.02 / 6.0, max_relative = 1e-9);
    }

    #[test]
    fn test_fixed_mass_from_children_geometry() {
        // No cumulative geometry on the assembly: combine the leaves
        let motor = AssemblyNode::assembly(
            "motor",
            vec![
                AssemblyNode::part("rotor", vec![cc(DVec3::new(-10.0, 0.0, 0.0))]),
                AssemblyNode::part("stator", vec![cc(DVec3::new(10.0, 0.0, 0.0))]),
            ],
        );
        let c = classifier(vec![MaterialRule::fixed_mass("motor", 300.0).unwrap()], 1250.0);
        let props = aggregate(&motor, &c).unwrap();
        assert_eq!(props.solid_count, 2);
        let inertial = props.finalize().unwrap();
        assert_relative_eq!(inertial.mass, 0.3);
        assert_relative_eq!(inertial.com.x, 0.0, epsilon = 1e-12);
        // Two equal halves 20 mm apart dominate Izz
        assert!(inertial.inertia.izz > 0.3 * 0.01 * 0.01);
    }

    #[test]
    fn test_fixed_mass_zero_volume_is_point_mass() {
        let part = AssemblyNode::part(
            "label",
            vec![SolidMoments {
                volume_mm3: 0.0,
                centroid_mm: DVec3::new(0.0, 0.0, 30.0),
                inertia_mm5: InertiaMatrix::ZERO,
            }],
        );
        let c = classifier(vec![MaterialRule::fixed_mass("label", 2.0).unwrap()], 1250.0);
        let inertial = aggregate(&part, &c).unwrap().finalize().unwrap();
        assert_relative_eq!(inertial.com.z, 0.03, epsilon = 1e-12);
        assert_relative_eq!(inertial.inertia.trace(), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_fixed_mass_without_solids_fails() {
        let part = AssemblyNode::part("label", vec![]);
        let c = classifier(vec![MaterialRule::fixed_mass("label", 2.0).unwrap()], 1250.0);
        assert!(matches!(aggregate(&part, &c), Err(GeometryError::NoSolids { .. })));
    }

    #[test]
    fn test_missing_leaf_geometry_fails() {
        let asm = AssemblyNode::assembly(
            "arm",
            vec![
                AssemblyNode::part("ok", vec![cc(DVec3::ZERO)]),
                AssemblyNode {
                    name: "broken".into(),
                    ..AssemblyNode::default()
                },
            ],
        );
        assert_eq!(
            aggregate(&asm, &classifier(vec![], 1250.0)),
            Err(GeometryError::MissingGeometry {
                part: "broken".into()
            })
        );
    }

    #[test]
    fn test_non_finite_geometry_fails() {
        let mut solid = cc(DVec3::ZERO);
        solid.volume_mm3 = f64::NAN;
        let part = AssemblyNode::part("bad", vec![solid]);
        assert!(matches!(
            aggregate(&part, &classifier(vec![], 1250.0)),
            Err(GeometryError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_assembly_geometry_ignored_under_density() {
        // Cumulative geometry on an assembly must not be counted twice
        let asm = AssemblyNode::assembly(
            "arm",
            vec![AssemblyNode::part("a", vec![cc(DVec3::ZERO)])],
        )
        .with_geometry(Geometry::new(vec![cc(DVec3::ZERO)]));
        let props = aggregate(&asm, &classifier(vec![], 1000.0)).unwrap();
        assert_relative_eq!(props.mass, 1e-3, epsilon = 1e-15);
        assert_eq!(props.solid_count, 1);
    }

    #[test]
    fn test_exclusions_skip_subtrees() {
        let asm = AssemblyNode::assembly(
            "Parent",
            vec![
                AssemblyNode::part("A", vec![cc(DVec3::ZERO)]),
                AssemblyNode::part("B", vec![cc(DVec3::ZERO), cc(DVec3::X)]),
                AssemblyNode::part("C", vec![cc(DVec3::ZERO)]),
            ],
        );
        let c = classifier(vec![], 1000.0);
        let root = NodePath::root();
        let excluded: HashSet<NodePath> = [root.child(1)].into_iter().collect();
        let aggregator = Aggregator::new(&c).with_exclusions(&excluded);

        let parent = aggregator.aggregate(&asm, &root).unwrap();
        assert_relative_eq!(parent.props.mass, 2e-3, epsilon = 1e-15);

        // The excluded root itself is still folded when asked for directly
        let b = aggregator.aggregate(&asm.children[1], &root.child(1)).unwrap();
        assert_relative_eq!(b.props.mass, 2e-3, epsilon = 1e-15);
    }

    #[test]
    fn test_materials_recorded_once() {
        let asm = AssemblyNode::assembly(
            "arm",
            vec![
                AssemblyNode::part("M3 Screw", vec![cc(DVec3::ZERO)]),
                AssemblyNode::part("M4 Screw", vec![cc(DVec3::ZERO)]),
                AssemblyNode::part("shell", vec![cc(DVec3::ZERO)]),
            ],
        );
        let c = classifier(
            vec![MaterialRule::density("Screw", 7850.0).unwrap().with_material("steel")],
            1250.0,
        );
        let result = Aggregator::new(&c).aggregate(&asm, &NodePath::root()).unwrap();
        let names: Vec<&str> = result.materials.iter().map(|m| m.material.as_str()).collect();
        assert_eq!(names, vec!["steel", "default"]);
    }
}
