//! Link mapping: which parts of the assembly belong to which URDF link
//!
//! A link map is an ordered document of `link -> [entry, ...]`. An entry is
//! either a top-level part key or a path override `"Parent > Child"`. Keys
//! starting with `_` are comments.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::config::{ConfigError, load_document};
use crate::material::MaterialClassifier;
use crate::tree::{AssemblyNode, AssemblyTree, LocateError, NodePath, PathSegment};

/// Separator between path override segments
pub const PATH_SEPARATOR: char = '>';

/// Raw entries of one link, in document order
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSpec {
    pub name: String,
    pub entries: Vec<String>,
}

/// Link map document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkMap {
    links: Vec<LinkSpec>,
}

impl LinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let map: Self = load_document(path.as_ref())?;
        tracing::info!("Loaded link map {:?} ({} links)", path.as_ref(), map.len());
        Ok(map)
    }

    /// Append entries to a link, creating it on first use
    pub fn insert<I, S>(&mut self, link: impl Into<String>, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let link = link.into();
        let entries = entries.into_iter().map(Into::into);
        match self.links.iter_mut().find(|l| l.name == link) {
            Some(spec) => spec.entries.extend(entries),
            None => self.links.push(LinkSpec {
                name: link,
                entries: entries.collect(),
            }),
        }
    }

    /// Builder form of [`LinkMap::insert`]
    pub fn with<I, S>(mut self, link: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(link, entries);
        self
    }

    pub fn links(&self) -> &[LinkSpec] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl<'de> Deserialize<'de> for LinkMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LinkMapVisitor;

        impl<'de> Visitor<'de> for LinkMapVisitor {
            type Value = LinkMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of link names to lists of part names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<LinkMap, A::Error> {
                let mut map = LinkMap::new();
                while let Some(name) = access.next_key::<String>()? {
                    if name.starts_with('_') {
                        access.next_value::<IgnoredAny>()?;
                        continue;
                    }
                    let entries: Vec<String> = access.next_value()?;
                    map.insert(name, entries);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(LinkMapVisitor)
    }
}

/// A parsed link map entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEntry {
    /// A whole top-level part
    Part(PathSegment),
    /// A descendant of a top-level part, split off into its own link
    Override {
        parent: PathSegment,
        path: Vec<PathSegment>,
    },
}

impl LinkEntry {
    pub fn parse(raw: &str) -> Option<Self> {
        let mut segments = raw
            .split(PATH_SEPARATOR)
            .map(PathSegment::parse)
            .collect::<Option<Vec<_>>>()?;
        match segments.len() {
            0 => None,
            1 => segments.pop().map(LinkEntry::Part),
            _ => {
                let parent = segments.remove(0);
                Some(LinkEntry::Override {
                    parent,
                    path: segments,
                })
            }
        }
    }

    /// Full lookup path, starting at the top-level part
    pub fn segments(&self) -> Vec<PathSegment> {
        match self {
            LinkEntry::Part(segment) => vec![segment.clone()],
            LinkEntry::Override { parent, path } => {
                std::iter::once(parent.clone()).chain(path.iter().cloned()).collect()
            }
        }
    }
}

/// A subtree assigned to a link (or left unmapped)
#[derive(Debug, Clone)]
pub struct Subtree<'t> {
    /// Map entry or part key that selected the subtree
    pub label: String,
    pub path: NodePath,
    pub node: &'t AssemblyNode,
}

/// A link and the subtrees folded into it
#[derive(Debug, Clone)]
pub struct PlannedLink<'t> {
    pub name: String,
    pub sources: Vec<Subtree<'t>>,
}

/// A plain map entry naming a part that is not in the assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingPart {
    pub link: String,
    pub entry: String,
}

/// Output of link resolution.
///
/// Subtrees of different links are disjoint: every override child is in
/// `exclusions` and is skipped by every traversal except its own.
#[derive(Debug, Clone)]
pub struct LinkPlan<'t> {
    pub links: Vec<PlannedLink<'t>>,
    /// Top-level parts named by no plain entry
    pub unmapped: Vec<Subtree<'t>>,
    pub missing: Vec<MissingPart>,
    exclusions: HashSet<NodePath>,
}

impl LinkPlan<'_> {
    /// Roots of override subtrees
    pub fn exclusions(&self) -> &HashSet<NodePath> {
        &self.exclusions
    }
}

fn locate_error(link: &str, err: LocateError, top_level: bool) -> ConfigError {
    match err {
        LocateError::NotFound { segment, .. } if top_level => ConfigError::UnknownParent {
            link: link.to_string(),
            parent: segment,
        },
        LocateError::NotFound { scope, segment } => ConfigError::ChildNotFound {
            link: link.to_string(),
            scope,
            segment,
        },
        LocateError::Ambiguous {
            scope,
            segment,
            count,
        } => ConfigError::AmbiguousPath {
            link: link.to_string(),
            scope,
            segment,
            count,
        },
    }
}

/// Partition the assembly into links.
///
/// Fails fast on any configuration problem. Plain entries that name parts
/// absent from the assembly are only warned about and listed in
/// [`LinkPlan::missing`].
pub fn resolve<'t>(
    tree: &'t AssemblyTree,
    map: &LinkMap,
    classifier: &MaterialClassifier,
) -> Result<LinkPlan<'t>, ConfigError> {
    let mut assigned: HashMap<NodePath, String> = HashMap::new();
    let mut exclusions = HashSet::new();
    let mut links = Vec::with_capacity(map.len());
    let mut missing = Vec::new();

    for spec in map.links() {
        let mut sources = Vec::new();

        for raw in &spec.entries {
            let entry = LinkEntry::parse(raw).ok_or_else(|| ConfigError::MalformedEntry {
                link: spec.name.clone(),
                entry: raw.clone(),
            })?;

            let (path, node) = match &entry {
                LinkEntry::Part(segment) => match tree.locate(std::slice::from_ref(segment)) {
                    Ok(found) => found,
                    Err(LocateError::NotFound { .. }) => {
                        tracing::warn!(
                            "Link '{}': part '{}' not found in assembly",
                            spec.name,
                            raw
                        );
                        missing.push(MissingPart {
                            link: spec.name.clone(),
                            entry: raw.clone(),
                        });
                        continue;
                    }
                    Err(err) => return Err(locate_error(&spec.name, err, false)),
                },
                LinkEntry::Override { parent, .. } => {
                    tree.locate(std::slice::from_ref(parent))
                        .map_err(|e| locate_error(&spec.name, e, true))?;
                    let found = tree
                        .locate(&entry.segments())
                        .map_err(|e| locate_error(&spec.name, e, false))?;

                    if let Some(fixed) = tree
                        .ancestors(&found.0)
                        .into_iter()
                        .find(|n| classifier.classify(n.key()).policy.is_terminal())
                    {
                        return Err(ConfigError::OverrideInsideFixedMass {
                            link: spec.name.clone(),
                            entry: raw.clone(),
                            fixed: fixed.key().to_string(),
                        });
                    }
                    exclusions.insert(found.0.clone());
                    found
                }
            };

            if let Some(first) = assigned.insert(path.clone(), spec.name.clone()) {
                return Err(ConfigError::DuplicateAssignment {
                    entry: raw.clone(),
                    first,
                    second: spec.name.clone(),
                });
            }

            tracing::debug!("Link '{}' <- '{}' at {}", spec.name, raw, path);
            sources.push(Subtree {
                label: raw.clone(),
                path,
                node,
            });
        }

        links.push(PlannedLink {
            name: spec.name.clone(),
            sources,
        });
    }

    let unmapped = tree
        .depth1()
        .iter()
        .enumerate()
        .map(|(i, node)| (NodePath::root().child(i), node))
        .filter(|(path, _)| !assigned.contains_key(path))
        .map(|(path, node)| Subtree {
            label: node.key().to_string(),
            path,
            node,
        })
        .collect();

    Ok(LinkPlan {
        links,
        unmapped,
        missing,
        exclusions,
    })
}
