//! Ground control point files.
//!
//! CSV with a header row: `id, model_x, model_y, model_z` plus either
//! `world_x, world_y, world_z` (a local metric frame) or `lat, lon, alt_m`
//! (WGS84, converted to ENU about the first geodetic point). One file uses one
//! world frame.

use std::fmt;
use std::io::Read;
use std::path::Path;

use anchor_core::{EnuFrame, Geodetic, Pt3, Real};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GcpError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("GCP file is empty.")]
    Empty,
    #[error("GCP rows must include id, model_x, model_y, model_z. (row {row})")]
    MissingModel { row: usize },
    #[error("GCP rows must include either world_x/y/z or lat/lon/alt_m. (row {row})")]
    MissingWorld { row: usize },
    #[error("GCP rows mix world_x/y/z and lat/lon/alt_m; use a single world frame (row {row})")]
    MixedFrames { row: usize },
    #[error("GCP {id} has a geodetic position outside valid latitude/longitude ranges")]
    InvalidGeodetic { id: String },
    #[error("GCP {id} has non-finite coordinates")]
    NonFinite { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorldFrame {
    Local,
    Enu,
}

impl WorldFrame {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorldFrame::Local => "local",
            WorldFrame::Enu => "enu",
        }
    }
}

impl fmt::Display for WorldFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GcpRecord {
    pub id: String,
    pub model: Pt3,
    pub world: Pt3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GcpSet {
    pub records: Vec<GcpRecord>,
    pub world_frame: WorldFrame,
    /// Present iff `world_frame` is ENU.
    pub enu_origin: Option<Geodetic>,
}

impl GcpSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn model_points(&self) -> Vec<Pt3> {
        self.records.iter().map(|r| r.model).collect()
    }

    pub fn world_points(&self) -> Vec<Pt3> {
        self.records.iter().map(|r| r.world).collect()
    }
}

/// Raw row; empty cells and absent columns are both `None`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GcpRow {
    id: Option<String>,
    model_x: Option<Real>,
    model_y: Option<Real>,
    model_z: Option<Real>,
    world_x: Option<Real>,
    world_y: Option<Real>,
    world_z: Option<Real>,
    lat: Option<Real>,
    lon: Option<Real>,
    alt_m: Option<Real>,
}

enum RowWorld {
    Local(Pt3),
    Geodetic(Geodetic),
}

fn triple(a: Option<Real>, b: Option<Real>, c: Option<Real>) -> Option<[Real; 3]> {
    Some([a?, b?, c?])
}

impl GcpRow {
    fn split(self, row: usize) -> Result<(String, Pt3, RowWorld), GcpError> {
        let id = self
            .id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(GcpError::MissingModel { row })?;
        let [mx, my, mz] = triple(self.model_x, self.model_y, self.model_z)
            .ok_or(GcpError::MissingModel { row })?;

        let local = triple(self.world_x, self.world_y, self.world_z);
        let geodetic = triple(self.lat, self.lon, self.alt_m);
        let world = match (local, geodetic) {
            (Some(_), Some(_)) => return Err(GcpError::MixedFrames { row }),
            (Some([x, y, z]), None) => RowWorld::Local(Pt3::new(x, y, z)),
            (None, Some([lat, lon, alt])) => {
                let g = Geodetic::new(lat, lon, alt);
                if !g.is_valid() {
                    return Err(GcpError::InvalidGeodetic { id });
                }
                RowWorld::Geodetic(g)
            }
            (None, None) => return Err(GcpError::MissingWorld { row }),
        };
        Ok((id, Pt3::new(mx, my, mz), world))
    }
}

/// Parse GCPs from CSV text with a header row.
pub fn parse_gcps<R: Read>(reader: R) -> Result<GcpSet, GcpError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    let mut frame: Option<WorldFrame> = None;
    let mut enu: Option<EnuFrame> = None;

    for (i, row) in rdr.deserialize::<GcpRow>().enumerate() {
        // 1-based data row, header excluded.
        let row_no = i + 1;
        let (id, model, world) = row?.split(row_no)?;
        let (row_frame, world) = match world {
            RowWorld::Local(p) => (WorldFrame::Local, p),
            RowWorld::Geodetic(g) => {
                let origin = *enu.get_or_insert_with(|| EnuFrame::new(g));
                (WorldFrame::Enu, Pt3::from(origin.geodetic_to_enu(&g)))
            }
        };
        match frame {
            Some(f) if f != row_frame => return Err(GcpError::MixedFrames { row: row_no }),
            _ => frame = Some(row_frame),
        }
        if !(model.coords.iter().all(|v| v.is_finite()) && world.coords.iter().all(|v| v.is_finite())) {
            return Err(GcpError::NonFinite { id });
        }
        records.push(GcpRecord { id, model, world });
    }

    let world_frame = frame.ok_or(GcpError::Empty)?;
    Ok(GcpSet {
        records,
        world_frame,
        enu_origin: enu.map(|f| f.origin()),
    })
}

pub fn load_gcps(path: &Path) -> Result<GcpSet, GcpError> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    parse_gcps(file)
}
