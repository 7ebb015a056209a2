//! Configuration documents: loading and validation errors
//!
//! Material maps, link maps, assembly dumps and calibration lists are read
//! through [`load_document`], which picks RON or JSON from the extension.

use std::path::Path;

use serde::de::DeserializeOwned;

/// Default material density in kg/m³ (PLA)
pub const DEFAULT_DENSITY: f64 = 1250.0;

/// Configuration errors. All of them are fatal and raised before any
/// aggregation starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Material rule with an empty pattern")]
    EmptyPattern,

    #[error("Material rule '{pattern}' must set exactly one of `density` or `mass_g`")]
    AmbiguousRule { pattern: String },

    #[error("Material rule '{pattern}' has invalid {field}: {value}")]
    InvalidRuleValue {
        pattern: String,
        field: &'static str,
        value: f64,
    },

    #[error("Default density must be positive and finite, got {0}")]
    InvalidDensity(f64),

    #[error("Link '{link}': malformed entry '{entry}'")]
    MalformedEntry { link: String, entry: String },

    #[error("Link '{link}': '{parent}' is not a top-level part")]
    UnknownParent { link: String, parent: String },

    #[error("Link '{link}': '{segment}' not found under '{scope}'")]
    ChildNotFound {
        link: String,
        scope: String,
        segment: String,
    },

    #[error(
        "Link '{link}': '{segment}' matches {count} parts under '{scope}'; \
         select one explicitly, e.g. '{segment}[1]'"
    )]
    AmbiguousPath {
        link: String,
        scope: String,
        segment: String,
        count: usize,
    },

    #[error("'{entry}' is assigned to both '{first}' and '{second}'")]
    DuplicateAssignment {
        entry: String,
        first: String,
        second: String,
    },

    #[error("Link '{link}': '{entry}' lies inside fixed-mass part '{fixed}'")]
    OverrideInsideFixedMass {
        link: String,
        entry: String,
        fixed: String,
    },
}

/// Serialization format of a configuration document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Ron,
}

impl DocumentFormat {
    /// Detect format from file path; anything that is not `.ron` is JSON
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .as_deref()
        {
            Some("ron") => DocumentFormat::Ron,
            _ => DocumentFormat::Json,
        }
    }
}

/// Parse a document from a string in the given format
pub fn parse_document<T: DeserializeOwned>(
    content: &str,
    format: DocumentFormat,
    origin: &str,
) -> Result<T, ConfigError> {
    let parse_error = |reason: String| ConfigError::Parse {
        path: origin.to_string(),
        reason,
    };
    match format {
        DocumentFormat::Json => {
            serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))
        }
        DocumentFormat::Ron => ron::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Read and parse a document from disk
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: display.clone(),
        reason: e.to_string(),
    })?;
    let doc = parse_document(&content, DocumentFormat::from_path(path), &display)?;
    tracing::debug!("Loaded {:?}", path);
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Doc {
        value: u32,
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(DocumentFormat::from_path(Path::new("a.RON")), DocumentFormat::Ron);
        assert_eq!(DocumentFormat::from_path(Path::new("a.json")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("a")), DocumentFormat::Json);
    }

    #[test]
    fn test_load_json_and_ron() {
        let dir = tempfile::tempdir().unwrap();

        let json = dir.path().join("doc.json");
        std::fs::File::create(&json)
            .unwrap()
            .write_all(br#"{ "value": 3 }"#)
            .unwrap();
        assert_eq!(load_document::<Doc>(&json).unwrap(), Doc { value: 3 });

        let ron = dir.path().join("doc.ron");
        std::fs::write(&ron, "(value: 4)").unwrap();
        assert_eq!(load_document::<Doc>(&ron).unwrap(), Doc { value: 4 });
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(load_document::<Doc>(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ value: }").unwrap();
        assert!(matches!(load_document::<Doc>(&bad), Err(ConfigError::Parse { .. })));
    }
}
