//! Reconstruction collaborators: where the point cloud the reference frame centers comes from.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anchor_core::Pt3;
use anyhow::{bail, ensure, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::mesh_io::read_ply_points;

pub const SPARSE_PLY: &str = "sparse.ply";
pub const DENSE_PLY: &str = "dense.ply";
pub const MESH_OBJ: &str = "mesh.obj";

/// Files a reconstruction produced. At least one is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionOutput {
    pub sparse_ply: Option<PathBuf>,
    pub dense_ply: Option<PathBuf>,
    pub mesh_obj: Option<PathBuf>,
}

/// Which cloud was used for centering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudKind {
    Sparse,
    Dense,
}

impl CloudKind {
    /// File name of the centered copy written next to the run outputs.
    pub fn centered_file_name(&self) -> &'static str {
        match self {
            CloudKind::Sparse => "scene_sparse_centered.ply",
            CloudKind::Dense => "dense_centered.ply",
        }
    }
}

impl ReconstructionOutput {
    /// Collect the well-known file names present in `dir`.
    pub fn scan_dir(dir: &Path) -> Self {
        let pick = |name: &str| Some(dir.join(name)).filter(|p| p.is_file());
        Self {
            sparse_ply: pick(SPARSE_PLY),
            dense_ply: pick(DENSE_PLY),
            mesh_obj: pick(MESH_OBJ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sparse_ply.is_none() && self.dense_ply.is_none() && self.mesh_obj.is_none()
    }

    /// Dense cloud when available, otherwise sparse.
    pub fn point_cloud(&self) -> Option<(CloudKind, &Path)> {
        self.dense_ply
            .as_deref()
            .map(|p| (CloudKind::Dense, p))
            .or_else(|| self.sparse_ply.as_deref().map(|p| (CloudKind::Sparse, p)))
    }

    pub fn load_point_cloud(&self) -> Result<Option<(CloudKind, Vec<Pt3>)>> {
        match self.point_cloud() {
            Some((kind, path)) => Ok(Some((kind, read_ply_points(path)?))),
            None => Ok(None),
        }
    }
}

/// A source of reconstruction geometry for a frames directory.
pub trait ReconstructionBackend {
    fn name(&self) -> &str;

    /// Produce (or locate) reconstruction outputs; `workspace` is scratch space owned by the run.
    fn reconstruct(&self, frames_dir: &Path, workspace: &Path) -> Result<ReconstructionOutput>;
}

/// Geometry already reconstructed by an earlier stage.
#[derive(Debug, Clone)]
pub struct ExistingReconstruction {
    dir: PathBuf,
}

impl ExistingReconstruction {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ReconstructionBackend for ExistingReconstruction {
    fn name(&self) -> &str {
        "existing"
    }

    /// Copies the outputs into `<workspace>/reconstruction`, where later stages expect them.
    fn reconstruct(&self, _frames_dir: &Path, workspace: &Path) -> Result<ReconstructionOutput> {
        ensure!(self.dir.is_dir(), "reconstruction directory {} does not exist", self.dir.display());
        let found = ReconstructionOutput::scan_dir(&self.dir);
        ensure!(
            !found.is_empty(),
            "no {}, {} or {} in {}",
            SPARSE_PLY,
            DENSE_PLY,
            MESH_OBJ,
            self.dir.display()
        );

        let out_dir = workspace.join("reconstruction");
        if fs::canonicalize(&out_dir).ok() == fs::canonicalize(&self.dir).ok() {
            return Ok(found);
        }
        fs::create_dir_all(&out_dir).with_context(|| format!("failed to create {}", out_dir.display()))?;
        for (src, name) in [
            (&found.sparse_ply, SPARSE_PLY),
            (&found.dense_ply, DENSE_PLY),
            (&found.mesh_obj, MESH_OBJ),
        ] {
            if let Some(src) = src {
                let dest = out_dir.join(name);
                fs::copy(src, &dest)
                    .with_context(|| format!("failed to copy {} to {}", src.display(), dest.display()))?;
                debug!("copied {} to {}", src.display(), dest.display());
            }
        }
        Ok(ReconstructionOutput::scan_dir(&out_dir))
    }
}

/// Sparse reconstruction through the `colmap` command-line tool.
#[derive(Debug, Clone)]
pub struct ColmapBackend {
    binary: PathBuf,
}

impl ColmapBackend {
    pub const BINARY: &'static str = "colmap";
    pub const LOG_FILE: &'static str = "colmap.log";

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// Locate `colmap` on `PATH`.
    pub fn probe() -> Option<Self> {
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(Self::BINARY))
            .find(|candidate| candidate.is_file())
            .map(Self::with_binary)
    }

    fn run_step(&self, log: &File, step: &str, args: &[&dyn AsRef<std::ffi::OsStr>]) -> Result<()> {
        info!("colmap {}", step);
        let mut cmd = Command::new(&self.binary);
        cmd.arg(step);
        for a in args {
            cmd.arg(a);
        }
        debug!("running {:?}", cmd);
        let status = cmd
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log.try_clone()?))
            .status()
            .with_context(|| format!("failed to launch {}", self.binary.display()))?;
        if !status.success() {
            bail!("colmap {} exited with {}", step, status);
        }
        Ok(())
    }
}

impl ReconstructionBackend for ColmapBackend {
    fn name(&self) -> &str {
        "colmap"
    }

    fn reconstruct(&self, frames_dir: &Path, workspace: &Path) -> Result<ReconstructionOutput> {
        let root = workspace.join("colmap");
        let sparse_dir = root.join("sparse");
        fs::create_dir_all(&sparse_dir)
            .with_context(|| format!("failed to create {}", sparse_dir.display()))?;
        let log_path = root.join(Self::LOG_FILE);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open {}", log_path.display()))?;

        let database = root.join("database.db");
        let out_dir = workspace.join("reconstruction");
        fs::create_dir_all(&out_dir)?;
        let sparse_ply = out_dir.join(SPARSE_PLY);

        self.run_step(
            &log,
            "feature_extractor",
            &[&"--database_path", &database, &"--image_path", &frames_dir],
        )?;
        self.run_step(&log, "exhaustive_matcher", &[&"--database_path", &database])?;
        self.run_step(
            &log,
            "mapper",
            &[&"--database_path", &database, &"--image_path", &frames_dir, &"--output_path", &sparse_dir],
        )?;
        // The mapper writes one numbered sub-model per connected component; the first is the largest.
        let model = sparse_dir.join("0");
        ensure!(model.is_dir(), "colmap mapper produced no model (see {})", log_path.display());
        self.run_step(
            &log,
            "model_converter",
            &[&"--input_path", &model, &"--output_path", &sparse_ply, &"--output_type", &"PLY"],
        )?;

        let out = ReconstructionOutput::scan_dir(&out_dir);
        ensure!(out.sparse_ply.is_some(), "colmap did not export {}", sparse_ply.display());
        Ok(out)
    }
}

/// Reconstruction source selected by run configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconstructionSource {
    #[default]
    None,
    Existing {
        dir: PathBuf,
    },
    Colmap,
}

impl ReconstructionSource {
    /// Build the backend; `Ok(None)` when no reconstruction is configured.
    pub fn backend(&self) -> Result<Option<Box<dyn ReconstructionBackend>>> {
        match self {
            ReconstructionSource::None => Ok(None),
            ReconstructionSource::Existing { dir } => Ok(Some(Box::new(ExistingReconstruction::new(dir)))),
            ReconstructionSource::Colmap => match ColmapBackend::probe() {
                Some(backend) => Ok(Some(Box::new(backend))),
                None => bail!("colmap was requested but is not on PATH"),
            },
        }
    }
}
