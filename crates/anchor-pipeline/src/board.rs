//! Planar fiducial board geometry.
//!
//! Object points live in the board-center frame: x to the right, y up, z out of
//! the printed face. Markers are numbered row-major from the top-left, and each
//! marker's corners are ordered top-left, top-right, bottom-right, bottom-left.

use std::fmt;
use std::str::FromStr;

use anchor_core::{Pt3, Real};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerFamily {
    #[serde(rename = "aruco_4x4")]
    Aruco4x4,
    #[serde(rename = "aruco_5x5")]
    Aruco5x5,
    #[serde(rename = "apriltag")]
    AprilTag,
}

impl MarkerFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerFamily::Aruco4x4 => "aruco_4x4",
            MarkerFamily::Aruco5x5 => "aruco_5x5",
            MarkerFamily::AprilTag => "apriltag",
        }
    }

    /// Families a printed grid board can be made of.
    pub fn supports_board(&self) -> bool {
        matches!(self, MarkerFamily::Aruco4x4 | MarkerFamily::Aruco5x5)
    }
}

impl fmt::Display for MarkerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarkerFamily {
    type Err = BoardSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aruco_4x4" | "aruco4x4" => Ok(MarkerFamily::Aruco4x4),
            "aruco_5x5" | "aruco5x5" => Ok(MarkerFamily::Aruco5x5),
            "apriltag" => Ok(MarkerFamily::AprilTag),
            _ => Err(BoardSpecError::UnknownFamily(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginDefinition {
    #[default]
    BoardCenter,
}

impl OriginDefinition {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginDefinition::BoardCenter => "board_center",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BoardSpecError {
    #[error("unknown marker family '{0}'")]
    UnknownFamily(String),
    #[error("marker family {0} cannot form a grid board")]
    UnsupportedBoardFamily(MarkerFamily),
    #[error("board must have at least one row and one column (rows={rows}, cols={cols})")]
    EmptyGrid { rows: u32, cols: u32 },
    #[error("marker size must be finite and positive, got {0}")]
    InvalidMarkerSize(Real),
    #[error("marker spacing must be finite and non-negative, got {0}")]
    InvalidSpacing(Real),
}

/// Serialized form of a [`BoardSpec`]; the identifier is always re-derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BoardSpecRecord {
    family: MarkerFamily,
    rows: u32,
    cols: u32,
    marker_size_m: Real,
    marker_spacing_m: Real,
    #[serde(default)]
    origin_definition: OriginDefinition,
    #[serde(default)]
    first_marker_id: u32,
    #[serde(default)]
    board_id: Option<String>,
}

/// Immutable description of a printed marker grid board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BoardSpecRecord", into = "BoardSpecRecord")]
pub struct BoardSpec {
    family: MarkerFamily,
    rows: u32,
    cols: u32,
    marker_size_m: Real,
    marker_spacing_m: Real,
    origin_definition: OriginDefinition,
    first_marker_id: u32,
    board_id: String,
}

impl TryFrom<BoardSpecRecord> for BoardSpec {
    type Error = BoardSpecError;

    fn try_from(r: BoardSpecRecord) -> Result<Self, Self::Error> {
        BoardSpec::with_first_id(
            r.family,
            r.rows,
            r.cols,
            r.marker_size_m,
            r.marker_spacing_m,
            r.first_marker_id,
        )
    }
}

impl From<BoardSpec> for BoardSpecRecord {
    fn from(b: BoardSpec) -> Self {
        Self {
            family: b.family,
            rows: b.rows,
            cols: b.cols,
            marker_size_m: b.marker_size_m,
            marker_spacing_m: b.marker_spacing_m,
            origin_definition: b.origin_definition,
            first_marker_id: b.first_marker_id,
            board_id: Some(b.board_id),
        }
    }
}

/// 64-bit FNV-1a; stable across platforms and toolchains.
fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(PRIME))
}

impl BoardSpec {
    pub fn new(
        family: MarkerFamily,
        rows: u32,
        cols: u32,
        marker_size_m: Real,
        marker_spacing_m: Real,
    ) -> Result<Self, BoardSpecError> {
        Self::with_first_id(family, rows, cols, marker_size_m, marker_spacing_m, 0)
    }

    pub fn with_first_id(
        family: MarkerFamily,
        rows: u32,
        cols: u32,
        marker_size_m: Real,
        marker_spacing_m: Real,
        first_marker_id: u32,
    ) -> Result<Self, BoardSpecError> {
        if !family.supports_board() {
            return Err(BoardSpecError::UnsupportedBoardFamily(family));
        }
        if rows == 0 || cols == 0 {
            return Err(BoardSpecError::EmptyGrid { rows, cols });
        }
        if !marker_size_m.is_finite() || marker_size_m <= 0.0 {
            return Err(BoardSpecError::InvalidMarkerSize(marker_size_m));
        }
        if !marker_spacing_m.is_finite() || marker_spacing_m < 0.0 {
            return Err(BoardSpecError::InvalidSpacing(marker_spacing_m));
        }

        let origin_definition = OriginDefinition::BoardCenter;
        let canonical = format!(
            "{}|{}|{}|{:.9}|{:.9}|{}|{}",
            family.as_str(),
            rows,
            cols,
            marker_size_m,
            marker_spacing_m,
            origin_definition.as_str(),
            first_marker_id
        );
        let board_id = format!("board-{:016x}", fnv1a64(canonical.as_bytes()));

        Ok(Self {
            family,
            rows,
            cols,
            marker_size_m,
            marker_spacing_m,
            origin_definition,
            first_marker_id,
            board_id,
        })
    }

    pub fn family(&self) -> MarkerFamily {
        self.family
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn marker_size_m(&self) -> Real {
        self.marker_size_m
    }

    pub fn marker_spacing_m(&self) -> Real {
        self.marker_spacing_m
    }

    pub fn origin_definition(&self) -> OriginDefinition {
        self.origin_definition
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn marker_count(&self) -> u32 {
        self.rows * self.cols
    }

    pub fn width_m(&self) -> Real {
        let cols = self.cols as Real;
        cols * self.marker_size_m + (cols - 1.0) * self.marker_spacing_m
    }

    pub fn height_m(&self) -> Real {
        let rows = self.rows as Real;
        rows * self.marker_size_m + (rows - 1.0) * self.marker_spacing_m
    }

    /// Board center measured from the top-left corner of the printed grid.
    pub fn board_center_m(&self) -> [Real; 3] {
        [self.width_m() / 2.0, self.height_m() / 2.0, 0.0]
    }

    pub fn contains_id(&self, id: u32) -> bool {
        id >= self.first_marker_id && id - self.first_marker_id < self.marker_count()
    }

    /// Marker IDs on this board in row-major order.
    pub fn marker_ids(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.marker_count()).map(move |i| self.first_marker_id + i)
    }

    /// Board-frame corners of marker `id`, or `None` if the board has no such marker.
    pub fn marker_corners(&self, id: u32) -> Option<[Pt3; 4]> {
        if !self.contains_id(id) {
            return None;
        }
        let idx = id - self.first_marker_id;
        let (row, col) = ((idx / self.cols) as Real, (idx % self.cols) as Real);
        let pitch = self.marker_size_m + self.marker_spacing_m;
        let s = self.marker_size_m;

        let x0 = col * pitch - self.width_m() / 2.0;
        let y0 = self.height_m() / 2.0 - row * pitch;
        Some([
            Pt3::new(x0, y0, 0.0),
            Pt3::new(x0 + s, y0, 0.0),
            Pt3::new(x0 + s, y0 - s, 0.0),
            Pt3::new(x0, y0 - s, 0.0),
        ])
    }
}
