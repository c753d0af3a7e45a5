//! Georegistration of a run directory against ground control points.
//!
//! Layout read and written, relative to the run directory:
//! - `out/transforms.json` (read, `T_georeg` appended)
//! - `out/reconstruction/{sparse.ply, dense.ply, mesh.obj}` (read; `*_georeg` copies written)
//! - `out/geo/geo_transform.json`, `out/geo/gcp_residuals.json`
//! - `stage_reports/georeg.json` (always written)

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anchor_core::stats::{mean, percentile, rms};
use anchor_core::{mat3_rows, mat4_rows, Geodetic, Real};
use anchor_linear::{solve_helmert, HelmertError, HelmertTransform};
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::abs_gate::{evaluate_absolute_accuracy, AbsoluteEligibility};
use super::gcp::{load_gcps, GcpError, GcpSet, WorldFrame};
use super::transforms::{TransformChain, TransformEntry, TransformSpace};
use crate::artifacts::write_json_pretty;
use crate::mesh_io::{transform_obj_file, transform_ply_file};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoregMode {
    #[default]
    Off,
    /// Degrade to `skipped` on solver failure.
    BestEffort,
    /// Solver failure aborts the run.
    Require,
}

impl FromStr for GeoregMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "off" => Ok(GeoregMode::Off),
            "best_effort" => Ok(GeoregMode::BestEffort),
            "require" => Ok(GeoregMode::Require),
            other => anyhow::bail!("unknown georegistration mode '{other}' (off|best_effort|require)"),
        }
    }
}

impl fmt::Display for GeoregMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GeoregMode::Off => "off",
            GeoregMode::BestEffort => "best_effort",
            GeoregMode::Require => "require",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoregConfig {
    pub mode: GeoregMode,
    pub gcp_file: Option<PathBuf>,
    /// Space the GCP model coordinates are expressed in.
    pub space: TransformSpace,
    pub max_rmse_m: Real,
    /// Relative-accuracy eligibility decided upstream.
    pub rel_eligible: bool,
}

impl Default for GeoregConfig {
    fn default() -> Self {
        Self {
            mode: GeoregMode::Off,
            gcp_file: None,
            space: TransformSpace::Anchored,
            max_rmse_m: 0.05,
            rel_eligible: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum GeoregError {
    #[error("GCP file is required when georegistration is enabled.")]
    MissingGcpFile,
    #[error("failed to load GCPs from {path}: {source}")]
    Gcp { path: PathBuf, source: GcpError },
    #[error(transparent)]
    Solve(#[from] HelmertError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualSummary {
    pub rmse_m: Option<Real>,
    pub mean_m: Option<Real>,
    pub p95_m: Option<Real>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualReport {
    pub per_point_m: BTreeMap<String, Real>,
    pub summary: ResidualSummary,
}

pub fn compute_residuals(transform: &HelmertTransform, gcps: &GcpSet) -> ResidualReport {
    let errors = transform.residuals(&gcps.model_points(), &gcps.world_points());
    ResidualReport {
        per_point_m: gcps
            .records
            .iter()
            .map(|r| r.id.clone())
            .zip(errors.iter().copied())
            .collect(),
        summary: ResidualSummary {
            rmse_m: rms(&errors),
            mean_m: mean(&errors),
            p95_m: percentile(&errors, 95.0),
        },
    }
}

/// `out/geo/geo_transform.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTransformRecord {
    pub scale: Real,
    pub rotation: [[Real; 3]; 3],
    pub translation: [Real; 3],
    pub matrix: [[Real; 4]; 4],
    /// Georegistration composed with the selected space's existing transform.
    pub combined_matrix: [[Real; 4]; 4],
    pub space: TransformSpace,
    pub world_frame: WorldFrame,
    pub enu_origin: Option<Geodetic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoregStatus {
    Solved,
    Skipped,
}

/// `stage_reports/georeg.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoregReport {
    pub status: GeoregStatus,
    pub reason: Option<String>,
    pub mode: GeoregMode,
    pub space: TransformSpace,
    pub gcp_count: Option<usize>,
    pub world_frame: Option<WorldFrame>,
    pub enu_origin: Option<Geodetic>,
    pub transform: Option<GeoTransformRecord>,
    pub residuals: Option<ResidualReport>,
    pub validation: AbsoluteEligibility,
    pub outputs: Vec<PathBuf>,
}

impl GeoregReport {
    fn skipped(config: &GeoregConfig, reason: impl Into<String>) -> Self {
        Self {
            status: GeoregStatus::Skipped,
            reason: Some(reason.into()),
            mode: config.mode,
            space: config.space,
            gcp_count: None,
            world_frame: None,
            enu_origin: None,
            transform: None,
            residuals: None,
            validation: evaluate_absolute_accuracy(config.rel_eligible, false, None, config.max_rmse_m),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeoregOutcome {
    pub solved: bool,
    pub report: GeoregReport,
    pub transform: Option<HelmertTransform>,
}

/// Run-relative artifact locations.
pub struct GeoregPaths {
    run_dir: PathBuf,
}

impl GeoregPaths {
    pub fn new(run_dir: &Path) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
        }
    }

    pub fn stage_report(&self) -> PathBuf {
        self.run_dir.join("stage_reports").join("georeg.json")
    }

    pub fn transforms(&self) -> PathBuf {
        self.run_dir.join("out").join("transforms.json")
    }

    pub fn geo_dir(&self) -> PathBuf {
        self.run_dir.join("out").join("geo")
    }

    pub fn reconstruction_dir(&self) -> PathBuf {
        self.run_dir.join("out").join("reconstruction")
    }
}

fn skip(paths: &GeoregPaths, report: GeoregReport) -> Result<GeoregOutcome> {
    write_json_pretty(&paths.stage_report(), &report)?;
    Ok(GeoregOutcome {
        solved: false,
        report,
        transform: None,
    })
}

/// Solve and apply georegistration for a run directory.
///
/// Expected failures come back as a `skipped` outcome unless the mode is `require`;
/// malformed GCP files are always an error.
pub fn run_georegistration(run_dir: &Path, config: &GeoregConfig) -> Result<GeoregOutcome> {
    let paths = GeoregPaths::new(run_dir);

    if config.mode == GeoregMode::Off {
        return skip(&paths, GeoregReport::skipped(config, "georeg disabled"));
    }

    let Some(gcp_path) = config.gcp_file.as_deref() else {
        if config.mode == GeoregMode::Require {
            return Err(GeoregError::MissingGcpFile.into());
        }
        warn!("{}", GeoregError::MissingGcpFile);
        return skip(
            &paths,
            GeoregReport::skipped(config, GeoregError::MissingGcpFile.to_string()),
        );
    };

    let gcps = load_gcps(gcp_path).map_err(|source| GeoregError::Gcp {
        path: gcp_path.to_path_buf(),
        source,
    })?;
    info!(
        "loaded {} GCPs ({} frame) from {}",
        gcps.len(),
        gcps.world_frame,
        gcp_path.display()
    );

    let transform = match solve_helmert(&gcps.model_points(), &gcps.world_points()) {
        Ok(t) => t,
        Err(e) if config.mode == GeoregMode::Require => {
            return Err(anyhow::Error::from(GeoregError::Solve(e)).context("georegistration required"))
        }
        Err(e) => {
            warn!("skipping georegistration: {}", e);
            let mut report = GeoregReport::skipped(config, e.to_string());
            report.gcp_count = Some(gcps.len());
            report.world_frame = Some(gcps.world_frame);
            return skip(&paths, report);
        }
    };

    let residuals = compute_residuals(&transform, &gcps);
    let mut chain = TransformChain::load_or_default(&paths.transforms())?;
    let space_matrix = chain.space_matrix(config.space)?;
    let georeg_matrix = transform.matrix();
    let combined = georeg_matrix * space_matrix;

    let record = GeoTransformRecord {
        scale: transform.scale,
        rotation: mat3_rows(&transform.rotation),
        translation: [transform.translation.x, transform.translation.y, transform.translation.z],
        matrix: mat4_rows(&georeg_matrix),
        combined_matrix: mat4_rows(&combined),
        space: config.space,
        world_frame: gcps.world_frame,
        enu_origin: gcps.enu_origin,
    };

    let mut outputs = Vec::new();
    let geo_dir = paths.geo_dir();
    for (name, value) in [
        ("geo_transform.json", serde_json::to_value(&record)?),
        ("gcp_residuals.json", serde_json::to_value(&residuals)?),
    ] {
        let path = geo_dir.join(name);
        write_json_pretty(&path, &value)?;
        outputs.push(path);
    }

    chain.push(TransformEntry::new("T_georeg", &georeg_matrix, "world"));
    write_json_pretty(&paths.transforms(), &chain)?;
    outputs.push(paths.transforms());

    let recon = paths.reconstruction_dir();
    for (src, dest) in [("sparse.ply", "sparse_georeg.ply"), ("dense.ply", "dense_georeg.ply")] {
        let src = recon.join(src);
        if src.is_file() {
            let dest = recon.join(dest);
            let n = transform_ply_file(&src, &dest, &combined)
                .with_context(|| format!("failed to georegister {}", src.display()))?;
            info!("wrote {} georegistered vertices to {}", n, dest.display());
            outputs.push(dest);
        }
    }
    let mesh = recon.join("mesh.obj");
    if mesh.is_file() {
        let dest = recon.join("mesh_georeg.obj");
        transform_obj_file(&mesh, &dest, &combined)
            .with_context(|| format!("failed to georegister {}", mesh.display()))?;
        outputs.push(dest);
    }

    let validation = evaluate_absolute_accuracy(
        config.rel_eligible,
        true,
        residuals.summary.rmse_m,
        config.max_rmse_m,
    );
    info!(
        "georegistration solved: scale {:.6}, RMSE {:?} m, claim {}",
        transform.scale, residuals.summary.rmse_m, validation.claim_level
    );

    let report = GeoregReport {
        status: GeoregStatus::Solved,
        reason: None,
        mode: config.mode,
        space: config.space,
        gcp_count: Some(gcps.len()),
        world_frame: Some(gcps.world_frame),
        enu_origin: gcps.enu_origin,
        transform: Some(record),
        residuals: Some(residuals),
        validation,
        outputs,
    };
    write_json_pretty(&paths.stage_report(), &report)?;
    Ok(GeoregOutcome {
        solved: true,
        report,
        transform: Some(transform),
    })
}
