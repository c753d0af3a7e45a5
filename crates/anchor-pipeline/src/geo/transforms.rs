//! `out/transforms.json`: the chain of rigid/similarity steps already applied to a reconstruction.
//!
//! Two layouts exist: a `spaces` map from space name to a 4×4 matrix, and an
//! ordered list of `entries` each mapping into `to_space`. Unknown keys are
//! preserved on rewrite.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anchor_core::{mat4_from_rows, mat4_rows, Mat4, Real};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Named coordinate space of an exported reconstruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformSpace {
    Raw,
    Scaled,
    Centered,
    #[default]
    Anchored,
}

impl TransformSpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformSpace::Raw => "raw",
            TransformSpace::Scaled => "scaled",
            TransformSpace::Centered => "centered",
            TransformSpace::Anchored => "anchored",
        }
    }
}

impl fmt::Display for TransformSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransformSpace {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(TransformSpace::Raw),
            "scaled" => Ok(TransformSpace::Scaled),
            "centered" => Ok(TransformSpace::Centered),
            "anchored" => Ok(TransformSpace::Anchored),
            other => anyhow::bail!("unknown transform space '{other}' (raw|scaled|centered|anchored)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformEntry {
    pub name: String,
    pub matrix: [[Real; 4]; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_space: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransformEntry {
    pub fn new(name: impl Into<String>, matrix: &Mat4, to_space: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matrix: mat4_rows(matrix),
            to_space: Some(to_space.into()),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformChain {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub spaces: Map<String, Value>,
    #[serde(default)]
    pub entries: Vec<TransformEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for TransformChain {
    /// A reconstruction nobody has transformed yet.
    fn default() -> Self {
        let mut spaces = Map::new();
        spaces.insert(
            TransformSpace::Raw.as_str().to_string(),
            serde_json::json!(mat4_rows(&Mat4::identity())),
        );
        Self {
            spaces,
            entries: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl TransformChain {
    /// Load the chain, or the identity default when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Matrix taking raw reconstruction coordinates into `space`.
    ///
    /// A `spaces` entry wins. Otherwise entries are composed in order up to and
    /// including the first that lands in `space` (all of them if none does).
    pub fn space_matrix(&self, space: TransformSpace) -> Result<Mat4> {
        if let Some(value) = self.spaces.get(space.as_str()) {
            let rows: [[Real; 4]; 4] = serde_json::from_value(value.clone())
                .with_context(|| format!("space '{}' is not a 4x4 matrix", space))?;
            return Ok(mat4_from_rows(&rows));
        }
        let mut m = Mat4::identity();
        for entry in &self.entries {
            m = mat4_from_rows(&entry.matrix) * m;
            if entry.to_space.as_deref() == Some(space.as_str()) {
                break;
            }
        }
        Ok(m)
    }

    pub fn push(&mut self, entry: TransformEntry) {
        self.entries.push(entry);
    }
}
