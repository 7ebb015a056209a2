//! Assembly tree as produced by the CAD reader
//!
//! The tree is built once from a geometry dump and then only borrowed.
//! Nodes are addressed by [`NodePath`], the child indices from the root.

use std::fmt;
use std::path::Path;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, load_document};
use crate::inertia::InertiaMatrix;

/// Geometric moments of one CAD solid, in the CAD file's units (mm)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolidMoments {
    pub volume_mm3: f64,
    /// Centroid in the global assembly frame
    pub centroid_mm: DVec3,
    /// Volume-weighted (unit density) tensor about the centroid
    pub inertia_mm5: InertiaMatrix,
}

impl SolidMoments {
    pub fn is_finite(&self) -> bool {
        self.volume_mm3.is_finite() && self.centroid_mm.is_finite() && self.inertia_mm5.is_finite()
    }
}

/// Solids attached to a node.
///
/// On a leaf these are the part's own solids; on an assembly they are the
/// cumulative solids of the whole subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Geometry {
    pub solids: Vec<SolidMoments>,
}

impl Geometry {
    pub fn new(solids: Vec<SolidMoments>) -> Self {
        Self { solids }
    }

    pub fn volume_mm3(&self) -> f64 {
        self.solids.iter().map(|s| s.volume_mm3).sum()
    }

    pub fn is_finite(&self) -> bool {
        self.solids.iter().all(SolidMoments::is_finite)
    }

    /// Merge all solids into a single body of uniform density.
    ///
    /// Returns `None` when there are no solids. With zero total volume the
    /// centroid is the plain mean of the solid centroids.
    pub fn combined(&self) -> Option<SolidMoments> {
        if self.solids.is_empty() {
            return None;
        }

        let volume = self.volume_mm3();
        let centroid = if volume > 0.0 {
            self.solids
                .iter()
                .map(|s| s.centroid_mm * s.volume_mm3)
                .sum::<DVec3>()
                / volume
        } else {
            self.solids.iter().map(|s| s.centroid_mm).sum::<DVec3>() / self.solids.len() as f64
        };

        let inertia = self
            .solids
            .iter()
            .fold(InertiaMatrix::ZERO, |acc, s| {
                acc + s.inertia_mm5.shifted(s.volume_mm3, s.centroid_mm - centroid)
            });

        Some(SolidMoments {
            volume_mm3: volume,
            centroid_mm: centroid,
            inertia_mm5: inertia,
        })
    }
}

/// One instance in the CAD hierarchy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyNode {
    pub name: String,
    /// Occurrence name when it differs from the referenced part name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    /// Distance from the root (root = 0), assigned by [`AssemblyTree::new`]
    #[serde(skip)]
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AssemblyNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
}

impl AssemblyNode {
    /// A part with its own solids
    pub fn part(name: impl Into<String>, solids: Vec<SolidMoments>) -> Self {
        Self {
            name: name.into(),
            geometry: Some(Geometry::new(solids)),
            ..Self::default()
        }
    }

    /// An assembly without pre-aggregated geometry
    pub fn assembly(name: impl Into<String>, children: Vec<AssemblyNode>) -> Self {
        Self {
            name: name.into(),
            children,
            ..Self::default()
        }
    }

    pub fn with_instance_name(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = Some(instance_name.into());
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Identifier used for rule matching and link mapping
    pub fn key(&self) -> &str {
        match self.instance_name.as_deref() {
            Some(instance) if !instance.is_empty() => instance,
            _ if !self.name.is_empty() => &self.name,
            _ => "(unnamed)",
        }
    }

    /// Path lookups accept either the key or the plain part name
    pub fn answers_to(&self, name: &str) -> bool {
        self.key() == name || self.name == name
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Solids in this subtree, preferring the node's own cumulative geometry
    pub fn solid_count(&self) -> usize {
        match &self.geometry {
            Some(g) => g.solids.len(),
            None => self.children.iter().map(AssemblyNode::solid_count).sum(),
        }
    }

    /// Sum of leaf solid volumes; leaves without geometry count as empty
    pub fn leaf_volume_mm3(&self) -> f64 {
        if self.is_leaf() {
            self.geometry.as_ref().map_or(0.0, Geometry::volume_mm3)
        } else {
            self.children.iter().map(AssemblyNode::leaf_volume_mm3).sum()
        }
    }

    fn assign_depth(&mut self, depth: usize) {
        self.depth = depth;
        for child in &mut self.children {
            child.assign_depth(depth + 1);
        }
    }
}

/// Child indices from the root to a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(usize::to_string).collect();
        write!(f, "/{}", parts.join("/"))
    }
}

/// One step of a `Parent > Child` lookup.
///
/// `occurrence` is a 1-based selector written as `Name[n]`, used when the
/// name is shared by several nodes in the searched scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub occurrence: Option<usize>,
}

impl PathSegment {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(stripped) = raw.strip_suffix(']')
            && let Some(open) = stripped.rfind('[')
            && let Ok(n) = stripped[open + 1..].parse::<usize>()
        {
            let name = stripped[..open].trim_end();
            if n == 0 || name.is_empty() {
                return None;
            }
            return Some(Self {
                name: name.to_string(),
                occurrence: Some(n),
            });
        }
        Some(Self {
            name: raw.to_string(),
            occurrence: None,
        })
    }

    fn select<'t>(
        &self,
        scope: &str,
        mut candidates: Vec<(NodePath, &'t AssemblyNode)>,
    ) -> Result<(NodePath, &'t AssemblyNode), LocateError> {
        let count = candidates.len();
        match self.occurrence {
            None if count == 1 => Ok(candidates.remove(0)),
            None if count > 1 => Err(LocateError::Ambiguous {
                scope: scope.to_string(),
                segment: self.name.clone(),
                count,
            }),
            Some(n) if n <= count => Ok(candidates.swap_remove(n - 1)),
            _ => Err(LocateError::NotFound {
                scope: scope.to_string(),
                segment: self.to_string(),
            }),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.occurrence {
            Some(n) => write!(f, "{}[{}]", self.name, n),
            None => f.write_str(&self.name),
        }
    }
}

/// Lookup failures, mapped to configuration errors by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    NotFound { scope: String, segment: String },
    Ambiguous { scope: String, segment: String, count: usize },
}

/// The full assembly, rooted at depth 0
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyTree {
    root: AssemblyNode,
}

impl AssemblyTree {
    pub fn new(mut root: AssemblyNode) -> Self {
        root.assign_depth(0);
        Self { root }
    }

    /// Load a geometry dump (`.ron` or JSON)
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root: AssemblyNode = load_document(path.as_ref())?;
        let tree = Self::new(root);
        tracing::info!(
            "Loaded assembly '{}' with {} top-level parts",
            tree.root.key(),
            tree.depth1().len()
        );
        Ok(tree)
    }

    pub fn root(&self) -> &AssemblyNode {
        &self.root
    }

    /// Top-level children of the root
    pub fn depth1(&self) -> &[AssemblyNode] {
        &self.root.children
    }

    pub fn node(&self, path: &NodePath) -> Option<&AssemblyNode> {
        path.indices()
            .iter()
            .try_fold(&self.root, |node, &i| node.children.get(i))
    }

    /// Nodes from the depth-1 ancestor down to (excluding) `path` itself
    pub fn ancestors(&self, path: &NodePath) -> Vec<&AssemblyNode> {
        let mut out = Vec::new();
        let mut node = &self.root;
        let indices = path.indices();
        for &i in indices.iter().take(indices.len().saturating_sub(1)) {
            match node.children.get(i) {
                Some(child) => {
                    out.push(child);
                    node = child;
                }
                None => break,
            }
        }
        out
    }

    /// Follow a lookup path: the first segment names a depth-1 part, each
    /// further segment is searched among all descendants of the previous
    /// match in depth-first pre-order.
    pub fn locate(
        &self,
        segments: &[PathSegment],
    ) -> Result<(NodePath, &AssemblyNode), LocateError> {
        let mut scope = self.root.key().to_string();
        let mut current: Option<(NodePath, &AssemblyNode)> = None;

        for segment in segments {
            let candidates = match &current {
                None => self
                    .depth1()
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| n.answers_to(&segment.name))
                    .map(|(i, n)| (NodePath::root().child(i), n))
                    .collect(),
                Some((path, node)) => {
                    let mut found = Vec::new();
                    collect_named(node, path, &segment.name, &mut found);
                    found
                }
            };
            let (path, node) = segment.select(&scope, candidates)?;
            scope = node.key().to_string();
            current = Some((path, node));
        }

        current.ok_or_else(|| LocateError::NotFound {
            scope,
            segment: String::new(),
        })
    }
}

impl From<AssemblyNode> for AssemblyTree {
    fn from(root: AssemblyNode) -> Self {
        Self::new(root)
    }
}

/// Pre-order search of the descendants of `node` (excluding `node`)
fn collect_named<'t>(
    node: &'t AssemblyNode,
    path: &NodePath,
    name: &str,
    out: &mut Vec<(NodePath, &'t AssemblyNode)>,
) {
    for (i, child) in node.children.iter().enumerate() {
        let child_path = path.child(i);
        if child.answers_to(name) {
            out.push((child_path.clone(), child));
        }
        collect_named(child, &child_path, name, out);
    }
}

/// Indented `ASM`/`PART` outline of the whole tree
impl fmt::Display for AssemblyTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_node(f: &mut fmt::Formatter<'_>, node: &AssemblyNode) -> fmt::Result {
            let kind = if node.is_leaf() { "PART" } else { "ASM" };
            let name = if node.name.is_empty() { "(unnamed)" } else { &node.name };
            write!(f, "{}{} {}", "  ".repeat(node.depth), kind, name)?;
            if let Some(instance) = node.instance_name.as_deref().filter(|i| !i.is_empty()) {
                write!(f, " [instance: {}]", instance)?;
            }
            writeln!(f, " ({} solids)", node.solid_count())?;
            node.children.iter().try_for_each(|c| write_node(f, c))
        }
        write_node(f, &self.root)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> AssemblyTree {
        AssemblyTree::new(AssemblyNode::assembly(
            "robot",
            vec![
                AssemblyNode::assembly(
                    "Gripper Assembly",
                    vec![
                        AssemblyNode::part("Rail", vec![cc(DVec3::ZERO)]),
                        AssemblyNode::assembly(
                            "Carriage",
                            vec![AssemblyNode::part("Block", vec![cc(DVec3::X)])],
                        ),
                        AssemblyNode::part("Block", vec![cc(DVec3::Y)]),
                    ],
                ),
                AssemblyNode::part("link1", vec![cc(DVec3::Z)]).with_instance_name("link1 v6:1"),
            ],
        ))
    }

    #[test]
    fn test_depths_assigned() {
        let tree = sample();
        assert_eq!(tree.root().depth, 0);
        assert_eq!(tree.depth1()[0].depth, 1);
        assert_eq!(tree.depth1()[0].children[1].children[0].depth, 3);
    }

    #[test]
    fn test_key_prefers_instance_name() {
        let tree = sample();
        assert_eq!(tree.depth1()[1].key(), "link1 v6:1");
        assert_eq!(tree.depth1()[0].key(), "Gripper Assembly");
        assert_eq!(AssemblyNode::default().key(), "(unnamed)");
    }

    #[test]
    fn test_locate_descends_any_depth() {
        let tree = sample();
        let segments = [
            PathSegment::parse("Gripper Assembly").unwrap(),
            PathSegment::parse("Carriage").unwrap(),
        ];
        let (path, node) = tree.locate(&segments).unwrap();
        assert_eq!(node.name, "Carriage");
        assert_eq!(path.indices(), &[0, 1]);
        assert_eq!(tree.node(&path).map(|n| n.name.as_str()), Some("Carriage"));
    }

    #[test]
    fn test_locate_rejects_duplicates_without_selector() {
        let tree = sample();
        let segments = [
            PathSegment::parse("Gripper Assembly").unwrap(),
            PathSegment::parse("Block").unwrap(),
        ];
        assert!(matches!(
            tree.locate(&segments),
            Err(LocateError::Ambiguous { count: 2, .. })
        ));

        // Pre-order: the nested carriage block comes first
        let segments = [
            PathSegment::parse("Gripper Assembly").unwrap(),
            PathSegment::parse("Block[2]").unwrap(),
        ];
        let (path, _) = tree.locate(&segments).unwrap();
        assert_eq!(path.indices(), &[0, 2]);
    }

    #[test]
    fn test_locate_by_part_name() {
        let tree = sample();

        // Top-level part by its name or its instance name
        for name in ["link1", "link1 v6:1"] {
            let (path, _) = tree.locate(&[PathSegment::parse(name).unwrap()]).unwrap();
            assert_eq!(path.indices(), &[1]);
        }

        // A descendant whose name and instance name both match counts once
        let tree = AssemblyTree::new(AssemblyNode::assembly(
            "robot",
            vec![AssemblyNode::assembly(
                "Gripper Assembly",
                vec![
                    AssemblyNode::part("MGN9 Rail 150mm", vec![cc(DVec3::ZERO)])
                        .with_instance_name("MGN9 Rail 150mm v1:1"),
                    AssemblyNode::part("Spacer", vec![cc(DVec3::X)]).with_instance_name("Spacer"),
                ],
            )],
        ));
        let gripper = PathSegment::parse("Gripper Assembly").unwrap();
        for child in ["MGN9 Rail 150mm", "MGN9 Rail 150mm v1:1"] {
            let segments = [gripper.clone(), PathSegment::parse(child).unwrap()];
            let (path, _) = tree.locate(&segments).unwrap();
            assert_eq!(path.indices(), &[0, 0]);
        }
        let segments = [gripper, PathSegment::parse("Spacer").unwrap()];
        assert!(tree.locate(&segments).is_ok());
    }

    #[test]
    fn test_locate_not_found() {
        let tree = sample();
        let segments = [PathSegment::parse("Nope").unwrap()];
        assert!(matches!(tree.locate(&segments), Err(LocateError::NotFound { .. })));
    }

    #[test]
    fn test_segment_parse() {
        assert_eq!(
            PathSegment::parse(" 6803ZZ v1:1 ").unwrap(),
            PathSegment {
                name: "6803ZZ v1:1".into(),
                occurrence: None
            }
        );
        let seg = PathSegment::parse("Block [3]").unwrap();
        assert_eq!(seg.name, "Block");
        assert_eq!(seg.occurrence, Some(3));
        assert!(PathSegment::parse("Block[0]").is_none());
        assert!(PathSegment::parse("  ").is_none());
        // Not a selector
        assert_eq!(PathSegment::parse("Rail [a]").unwrap().occurrence, None);
    }

    #[test]
    fn test_combined_geometry_parallel_axis() {
        let geometry = Geometry::new(vec![cc(DVec3::ZERO), cc(DVec3::new(10.0, 0.0, 0.0))]);
        let body = geometry.combined().unwrap();
        assert_relative_eq!(body.volume_mm3, 2000.0);
        assert_relative_eq!(body.centroid_mm.x, 5.0);
        let own = cc(DVec3::ZERO).inertia_mm5.izz;
        assert_relative_eq!(body.inertia_mm5.izz, 2.0 * own + 2000.0 * 25.0, epsilon = 1e-9);
        assert_relative_eq!(body.inertia_mm5.ixx, 2.0 * own, epsilon = 1e-9);
        assert!(Geometry::default().combined().is_none());
    }

    #[test]
    fn test_ancestors() {
        let tree = sample();
        let path = NodePath::root().child(0).child(1).child(0);
        let names: Vec<&str> = tree.ancestors(&path).iter().map(|n| n.key()).collect();
        assert_eq!(names, vec!["Gripper Assembly", "Carriage"]);
    }

    #[test]
    fn test_outline() {
        let outline = sample().to_string();
        assert!(outline.starts_with("ASM robot (4 solids)\n"));
        assert!(outline.contains("  PART link1 [instance: link1 v6:1] (1 solids)\n"));
        assert!(outline.contains("      PART Block (1 solids)\n"));
    }

    #[test]
    fn test_deserialize_json_dump() {
        let json = r#"{
            "name": "robot",
            "children": [
                { "name": "base", "geometry": [
                    { "volume_mm3": 1000.0, "centroid_mm": [0.0, 0.0, 5.0],
                      "inertia_mm5": { "ixx": 1.0, "iyy": 1.0, "izz": 1.0 } }
                ] }
            ]
        }"#;
        let root: AssemblyNode = serde_json::from_str(json).unwrap();
        let tree = AssemblyTree::new(root);
        let base = &tree.depth1()[0];
        assert_eq!(base.depth, 1);
        assert_eq!(base.solid_count(), 1);
        assert_relative_eq!(base.leaf_volume_mm3(), 1000.0);
        assert_eq!(base.geometry.as_ref().unwrap().solids[0].inertia_mm5.ixy, 0.0);
    }
}
