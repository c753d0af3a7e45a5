//! User intent for anchoring a run: which anchor kind, which scan regime.
//!
//! [`AnchorRequest`] is the raw, stringly configuration; [`parse_anchor_spec`]
//! validates it into the closed [`AnchorKind`] sum type.

use std::fmt;
use std::str::FromStr;

use anchor_core::{Geodetic, Real};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::board::{BoardSpec, BoardSpecError, MarkerFamily};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanRegime {
    #[default]
    SmallObject,
    RoomBuilding,
    Aerial,
}

impl ScanRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanRegime::SmallObject => "small_object",
            ScanRegime::RoomBuilding => "room_building",
            ScanRegime::Aerial => "aerial",
        }
    }

    /// Whether a bounding-box guess may stand in for a grounded origin.
    pub fn allows_heuristics_by_default(&self) -> bool {
        !matches!(self, ScanRegime::SmallObject)
    }
}

impl fmt::Display for ScanRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanRegime {
    type Err = AnchorSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small_object" => Ok(ScanRegime::SmallObject),
            "room_building" => Ok(ScanRegime::RoomBuilding),
            "aerial" => Ok(ScanRegime::Aerial),
            _ => Err(AnchorSpecError::UnknownRegime(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum AnchorSpecError {
    #[error("unknown anchor kind '{0}'")]
    UnknownKind(String),
    #[error("unknown scan regime '{0}'")]
    UnknownRegime(String),
    #[error("{kind} anchor requires {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("invalid marker id list '{0}'")]
    InvalidMarkerIds(String),
    #[error("marker pair needs exactly two distinct ids, got {0:?}")]
    InvalidMarkerPair(Vec<u32>),
    #[error("marker size must be finite and positive, got {0}")]
    InvalidMarkerSize(Real),
    #[error("geo anchor must be 'lat,lon,alt' with valid ranges, got '{0}'")]
    InvalidGeoAnchor(String),
    #[error(transparent)]
    Board(#[from] BoardSpecError),
}

/// Raw anchor configuration as written in a run config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorRequest {
    pub anchor: String,
    pub regime: String,
    pub marker_family: Option<String>,
    pub marker_ids: Option<String>,
    pub marker_size_m: Option<Real>,
    pub board_rows: Option<u32>,
    pub board_cols: Option<u32>,
    pub marker_spacing_m: Option<Real>,
    pub geo_anchor: Option<String>,
    pub time_anchor: Option<String>,
}

impl Default for AnchorRequest {
    fn default() -> Self {
        Self {
            anchor: "none".to_string(),
            regime: ScanRegime::SmallObject.as_str().to_string(),
            marker_family: None,
            marker_ids: None,
            marker_size_m: None,
            board_rows: None,
            board_cols: None,
            marker_spacing_m: None,
            geo_anchor: None,
            time_anchor: None,
        }
    }
}

/// One anchor kind and only the fields it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnchorKind {
    MarkerBoard {
        board: BoardSpec,
        /// Restrict detections to these IDs; all board IDs when `None`.
        marker_ids: Option<Vec<u32>>,
    },
    MarkerPair {
        family: MarkerFamily,
        marker_ids: [u32; 2],
        marker_size_m: Real,
    },
    GeoPoint {
        geodetic: Geodetic,
    },
    TimeAnchor {
        time_iso8601: String,
    },
}

impl AnchorKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            AnchorKind::MarkerBoard { .. } => "marker_board",
            AnchorKind::MarkerPair { .. } => "marker_pair",
            AnchorKind::GeoPoint { .. } => "geo_point",
            AnchorKind::TimeAnchor { .. } => "time_anchor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorSpec {
    pub regime: ScanRegime,
    pub kind: AnchorKind,
}

/// Parse `"0, 1,2"` into marker IDs.
pub fn parse_marker_ids(raw: &str) -> Result<Vec<u32>, AnchorSpecError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| AnchorSpecError::InvalidMarkerIds(raw.to_string()))
}

/// Parse `"lat,lon,alt"` (degrees, degrees, meters).
pub fn parse_geo_anchor(raw: &str) -> Result<Geodetic, AnchorSpecError> {
    let invalid = || AnchorSpecError::InvalidGeoAnchor(raw.to_string());
    let parts = raw
        .split(',')
        .map(|s| s.trim().parse::<Real>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    let [lat, lon, alt] = parts[..] else {
        return Err(invalid());
    };
    let geodetic = Geodetic::new(lat, lon, alt);
    if !geodetic.is_valid() {
        return Err(invalid());
    }
    Ok(geodetic)
}

fn marker_size(request: &AnchorRequest, kind: &'static str) -> Result<Real, AnchorSpecError> {
    let size = request.marker_size_m.ok_or(AnchorSpecError::MissingField {
        kind,
        field: "marker_size_m",
    })?;
    if !size.is_finite() || size <= 0.0 {
        return Err(AnchorSpecError::InvalidMarkerSize(size));
    }
    Ok(size)
}

fn marker_family(request: &AnchorRequest) -> Result<MarkerFamily, AnchorSpecError> {
    match &request.marker_family {
        Some(f) => Ok(f.parse()?),
        None => Ok(MarkerFamily::Aruco4x4),
    }
}

/// Validate a raw request. `Ok(None)` means no anchor was requested.
pub fn parse_anchor_spec(request: &AnchorRequest) -> Result<Option<AnchorSpec>, AnchorSpecError> {
    let regime: ScanRegime = request.regime.parse()?;
    let kind = match request.anchor.trim().to_ascii_lowercase().as_str() {
        "" | "none" => return Ok(None),
        "marker" | "marker_board" => {
            let size = marker_size(request, "marker_board")?;
            let family = marker_family(request)?;
            let board = BoardSpec::new(
                family,
                request.board_rows.unwrap_or(1),
                request.board_cols.unwrap_or(1),
                size,
                request.marker_spacing_m.unwrap_or(0.0),
            )?;
            let marker_ids = request
                .marker_ids
                .as_deref()
                .map(parse_marker_ids)
                .transpose()?
                .filter(|ids| !ids.is_empty());
            AnchorKind::MarkerBoard { board, marker_ids }
        }
        "marker_pair" => {
            let marker_size_m = marker_size(request, "marker_pair")?;
            let family = marker_family(request)?;
            let raw = request
                .marker_ids
                .as_deref()
                .ok_or(AnchorSpecError::MissingField {
                    kind: "marker_pair",
                    field: "marker_ids",
                })?;
            let ids = parse_marker_ids(raw)?;
            let marker_ids = match *ids.as_slice() {
                [a, b] if a != b => [a, b],
                _ => return Err(AnchorSpecError::InvalidMarkerPair(ids.clone())),
            };
            AnchorKind::MarkerPair {
                family,
                marker_ids,
                marker_size_m,
            }
        }
        "geo" | "geo_point" => {
            let raw = request
                .geo_anchor
                .as_deref()
                .ok_or(AnchorSpecError::MissingField {
                    kind: "geo_point",
                    field: "geo_anchor",
                })?;
            AnchorKind::GeoPoint {
                geodetic: parse_geo_anchor(raw)?,
            }
        }
        "time" | "time_anchor" => {
            let time = request
                .time_anchor
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or(AnchorSpecError::MissingField {
                    kind: "time_anchor",
                    field: "time_anchor",
                })?;
            AnchorKind::TimeAnchor {
                time_iso8601: time.to_string(),
            }
        }
        other => return Err(AnchorSpecError::UnknownKind(other.to_string())),
    };
    Ok(Some(AnchorSpec { regime, kind }))
}
