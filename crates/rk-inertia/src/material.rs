//! Material rules: ordered name patterns resolving to a density or a fixed mass

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, load_document};

/// How the mass of a part is obtained
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MassPolicy {
    /// Known mass in grams; the part is one rigid body and its children are
    /// never visited
    FixedMass { grams: f64 },
    /// Mass from CAD volume
    Density { kg_per_m3: f64 },
}

impl MassPolicy {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MassPolicy::FixedMass { .. })
    }
}

/// One pattern rule. Exactly one of `density` / `mass_g` is set in the
/// source document; the invariant is checked on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMaterialRule", into = "RawMaterialRule")]
pub struct MaterialRule {
    pattern: String,
    material: Option<String>,
    policy: MassPolicy,
}

impl MaterialRule {
    pub fn new(pattern: impl Into<String>, policy: MassPolicy) -> Result<Self, ConfigError> {
        let pattern = pattern.into();
        let (field, value) = match policy {
            MassPolicy::FixedMass { grams } => ("mass_g", grams),
            MassPolicy::Density { kg_per_m3 } => ("density", kg_per_m3),
        };
        if pattern.is_empty() {
            return Err(ConfigError::EmptyPattern);
        }
        if !(value.is_finite() && value > 0.0) {
            return Err(ConfigError::InvalidRuleValue {
                pattern,
                field,
                value,
            });
        }
        Ok(Self {
            pattern,
            material: None,
            policy,
        })
    }

    pub fn density(pattern: impl Into<String>, kg_per_m3: f64) -> Result<Self, ConfigError> {
        Self::new(pattern, MassPolicy::Density { kg_per_m3 })
    }

    pub fn fixed_mass(pattern: impl Into<String>, grams: f64) -> Result<Self, ConfigError> {
        Self::new(pattern, MassPolicy::FixedMass { grams })
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn policy(&self) -> MassPolicy {
        self.policy
    }

    /// Material label, falling back to the pattern
    pub fn material(&self) -> &str {
        self.material.as_deref().unwrap_or(&self.pattern)
    }
}

#[derive(Serialize, Deserialize)]
struct RawMaterialRule {
    pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    material: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    density: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mass_g: Option<f64>,
}

impl TryFrom<RawMaterialRule> for MaterialRule {
    type Error = ConfigError;

    fn try_from(raw: RawMaterialRule) -> Result<Self, ConfigError> {
        let policy = match (raw.density, raw.mass_g) {
            (Some(kg_per_m3), None) => MassPolicy::Density { kg_per_m3 },
            (None, Some(grams)) => MassPolicy::FixedMass { grams },
            _ => {
                return Err(ConfigError::AmbiguousRule {
                    pattern: raw.pattern,
                });
            }
        };
        let rule = Self::new(raw.pattern, policy)?;
        Ok(match raw.material {
            Some(material) => rule.with_material(material),
            None => rule,
        })
    }
}

impl From<MaterialRule> for RawMaterialRule {
    fn from(rule: MaterialRule) -> Self {
        let (density, mass_g) = match rule.policy {
            MassPolicy::Density { kg_per_m3 } => (Some(kg_per_m3), None),
            MassPolicy::FixedMass { grams } => (None, Some(grams)),
        };
        Self {
            pattern: rule.pattern,
            material: rule.material,
            density,
            mass_g,
        }
    }
}

/// Material map document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialMap {
    /// Whether patterns match case-sensitively
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub patterns: Vec<MaterialRule>,
}

fn default_case_sensitive() -> bool {
    true
}

impl Default for MaterialMap {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            patterns: Vec::new(),
        }
    }
}

impl MaterialMap {
    pub fn new(patterns: Vec<MaterialRule>) -> Self {
        Self {
            patterns,
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let map: Self = load_document(path.as_ref())?;
        tracing::info!(
            "Loaded material map {:?} ({} patterns)",
            path.as_ref(),
            map.patterns.len()
        );
        Ok(map)
    }
}

/// Result of classifying one part name
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification<'a> {
    pub policy: MassPolicy,
    /// Material label; `"default"` when no rule matched
    pub material: &'a str,
}

/// Resolves the mass policy of a part name through ordered rules.
///
/// First matching rule wins; unmatched names use the default density.
#[derive(Debug, Clone)]
pub struct MaterialClassifier {
    rules: Vec<MaterialRule>,
    /// Patterns as matched (lower-cased when case-insensitive)
    needles: Vec<String>,
    case_sensitive: bool,
    default_density: f64,
}

impl MaterialClassifier {
    pub fn new(map: MaterialMap, default_density: f64) -> Result<Self, ConfigError> {
        if !(default_density.is_finite() && default_density > 0.0) {
            return Err(ConfigError::InvalidDensity(default_density));
        }
        let needles = map
            .patterns
            .iter()
            .map(|r| {
                if map.case_sensitive {
                    r.pattern.clone()
                } else {
                    r.pattern.to_lowercase()
                }
            })
            .collect();
        Ok(Self {
            rules: map.patterns,
            needles,
            case_sensitive: map.case_sensitive,
            default_density,
        })
    }

    /// Uniform density, no rules
    pub fn uniform(default_density: f64) -> Result<Self, ConfigError> {
        Self::new(MaterialMap::default(), default_density)
    }

    pub fn rules(&self) -> &[MaterialRule] {
        &self.rules
    }

    pub fn default_density(&self) -> f64 {
        self.default_density
    }

    pub fn classify(&self, part_name: &str) -> Classification<'_> {
        let lowered;
        let haystack = if self.case_sensitive {
            part_name
        } else {
            lowered = part_name.to_lowercase();
            &lowered
        };

        self.rules
            .iter()
            .zip(&self.needles)
            .find(|(_, needle)| haystack.contains(needle.as_str()))
            .map(|(rule, _)| Classification {
                policy: rule.policy,
                material: rule.material(),
            })
            .unwrap_or(Classification {
                policy: MassPolicy::Density {
                    kg_per_m3: self.default_density,
                },
                material: "default",
            })
    }
}
