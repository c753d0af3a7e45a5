//! ASCII PLY and OBJ vertex I/O.
//!
//! Only vertex positions are touched; every other property, element and line is
//! carried through verbatim. Transformed coordinates are written with 6 decimals.

use std::fmt::Write as _;
use std::path::Path;

use anchor_core::{Mat4, Pt3, Real};
use anyhow::{bail, ensure, Context, Result};

/// Parsed ASCII PLY: header lines, vertex rows as tokens, and the remainder.
#[derive(Debug, Clone, PartialEq)]
pub struct AsciiPly {
    header: Vec<String>,
    vertices: Vec<Vec<String>>,
    trailing: Vec<String>,
    xyz: [usize; 3],
}

impl AsciiPly {
    pub fn parse(text: &str) -> Result<Self> {
        let lines: Vec<&str> = text.lines().collect();
        ensure!(
            lines.first().is_some_and(|l| l.trim() == "ply"),
            "PLY file must start with a ply header"
        );
        match lines.get(1) {
            Some(l) if l.starts_with("format ascii") => {}
            Some(l) if l.starts_with("format") => bail!("only ASCII PLY files are supported ({})", l.trim()),
            _ => bail!("PLY header is missing its format line"),
        }

        let mut vertex_count = None;
        let mut properties = Vec::new();
        let mut in_vertex = false;
        let mut header_end = None;
        for (idx, line) in lines.iter().enumerate() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("element ") {
                let mut parts = rest.split_whitespace();
                in_vertex = parts.next() == Some("vertex");
                if in_vertex {
                    let count = parts
                        .next()
                        .context("PLY vertex element has no count")?
                        .parse::<usize>()
                        .context("PLY vertex count is not an integer")?;
                    vertex_count = Some(count);
                }
            } else if line.starts_with("property ") && in_vertex {
                if let Some(name) = line.split_whitespace().last() {
                    properties.push(name.to_string());
                }
            } else if line == "end_header" {
                header_end = Some(idx + 1);
                break;
            }
        }

        let header_end = header_end.context("PLY header has no end_header")?;
        let vertex_count = vertex_count.context("PLY header missing vertex count")?;
        let find = |axis: &str| {
            properties
                .iter()
                .position(|p| p == axis)
                .with_context(|| format!("PLY vertex properties must include x, y, z (missing {axis})"))
        };
        let xyz = [find("x")?, find("y")?, find("z")?];
        let width = properties.len();

        ensure!(
            lines.len() >= header_end + vertex_count,
            "PLY declares {} vertices but has {} data lines",
            vertex_count,
            lines.len() - header_end
        );
        let vertices = lines[header_end..header_end + vertex_count]
            .iter()
            .enumerate()
            .map(|(i, l)| {
                let tokens: Vec<String> = l.split_whitespace().map(str::to_string).collect();
                ensure!(
                    tokens.len() >= width,
                    "PLY vertex {} has {} values, expected {}",
                    i,
                    tokens.len(),
                    width
                );
                Ok(tokens)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            header: lines[..header_end].iter().map(|l| l.to_string()).collect(),
            vertices,
            trailing: lines[header_end + vertex_count..]
                .iter()
                .map(|l| l.to_string())
                .collect(),
            xyz,
        })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid PLY {}", path.display()))
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn points(&self) -> Result<Vec<Pt3>> {
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let coord = |k: usize| {
                    row[self.xyz[k]]
                        .parse::<Real>()
                        .with_context(|| format!("PLY vertex {i} has a non-numeric coordinate"))
                };
                Ok(Pt3::new(coord(0)?, coord(1)?, coord(2)?))
            })
            .collect()
    }

    pub fn set_points(&mut self, points: &[Pt3]) -> Result<()> {
        ensure!(
            points.len() == self.vertices.len(),
            "expected {} points, got {}",
            self.vertices.len(),
            points.len()
        );
        for (row, p) in self.vertices.iter_mut().zip(points) {
            for (k, v) in p.coords.iter().enumerate() {
                row[self.xyz[k]] = format!("{:.6}", v);
            }
        }
        Ok(())
    }

    pub fn transform(&mut self, m: &Mat4) -> Result<()> {
        let moved: Vec<Pt3> = self.points()?.iter().map(|p| apply_matrix(m, p)).collect();
        self.set_points(&moved)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str(line);
            out.push('\n');
        }
        for row in &self.vertices {
            out.push_str(&row.join(" "));
            out.push('\n');
        }
        for line in &self.trailing {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_text())
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Apply a homogeneous 4×4 to a point (affine part only).
pub fn apply_matrix(m: &Mat4, p: &Pt3) -> Pt3 {
    m.transform_point(p)
}

/// Write a transformed copy of an ASCII PLY; the source is left untouched.
pub fn transform_ply_file(src: &Path, dest: &Path, m: &Mat4) -> Result<usize> {
    let mut ply = AsciiPly::read(src)?;
    ply.transform(m)?;
    ply.write(dest)?;
    Ok(ply.vertex_count())
}

/// Transform the `v x y z` lines of an OBJ; other lines pass through.
pub fn transform_obj_text(text: &str, m: &Mat4) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    for (lineno, line) in text.lines().enumerate() {
        let mut parts = line.split_whitespace();
        if parts.next() == Some("v") {
            let rest: Vec<&str> = parts.collect();
            ensure!(rest.len() >= 3, "OBJ line {} has fewer than 3 vertex coordinates", lineno + 1);
            let mut xyz = [0.0; 3];
            for (slot, token) in xyz.iter_mut().zip(&rest) {
                *slot = token
                    .parse::<Real>()
                    .with_context(|| format!("OBJ line {} has a non-numeric coordinate", lineno + 1))?;
            }
            let p = apply_matrix(m, &Pt3::new(xyz[0], xyz[1], xyz[2]));
            let _ = write!(out, "v {:.6} {:.6} {:.6}", p.x, p.y, p.z);
            for extra in &rest[3..] {
                out.push(' ');
                out.push_str(extra);
            }
            out.push('\n');
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    Ok(out)
}

pub fn transform_obj_file(src: &Path, dest: &Path, m: &Mat4) -> Result<()> {
    let text = std::fs::read_to_string(src)
        .with_context(|| format!("failed to read {}", src.display()))?;
    let out = transform_obj_text(&text, m).with_context(|| format!("invalid OBJ {}", src.display()))?;
    std::fs::write(dest, out).with_context(|| format!("failed to write {}", dest.display()))
}

/// Minimal ASCII PLY holding only `x y z` float vertices.
pub fn write_ply_points(path: &Path, points: &[Pt3]) -> Result<()> {
    let mut out = String::new();
    let _ = write!(
        out,
        "ply\nformat ascii 1.0\nelement vertex {}\nproperty float x\nproperty float y\nproperty float z\nend_header\n",
        points.len()
    );
    for p in points {
        let _ = writeln!(out, "{:.6} {:.6} {:.6}", p.x, p.y, p.z);
    }
    std::fs::write(path, out).with_context(|| format!("failed to write {}", path.display()))
}

pub fn read_ply_points(path: &Path) -> Result<Vec<Pt3>> {
    AsciiPly::read(path)?.points()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_core::Vec3;

    const COLORED: &str = "ply\n\
format ascii 1.0\n\
comment exported\n\
element vertex 2\n\
property uchar red\n\
property float x\n\
property float y\n\
property float z\n\
element face 0\n\
property list uchar int vertex_indices\n\
end_header\n\
255 1 2 3\n\
0 -1 0 0.5\n";

    #[test]
    fn locates_xyz_after_other_properties() {
        let ply = AsciiPly::parse(COLORED).unwrap();
        assert_eq!(ply.vertex_count(), 2);
        assert_eq!(ply.points().unwrap()[0], Pt3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn transform_keeps_other_columns() {
        let mut ply = AsciiPly::parse(COLORED).unwrap();
        ply.transform(&Mat4::new_translation(&Vec3::new(10.0, 0.0, 0.0))).unwrap();
        let text = ply.to_text();
        assert!(text.contains("255 11.000000 2.000000 3.000000\n"), "{}", text);
        assert!(text.contains("0 9.000000 0.000000 0.500000\n"));
        assert!(text.contains("comment exported\n"));
    }

    #[test]
    fn binary_ply_is_rejected() {
        let err = AsciiPly::parse("ply\nformat binary_little_endian 1.0\nend_header\n").unwrap_err();
        assert!(err.to_string().contains("only ASCII"));
    }

    #[test]
    fn missing_z_is_rejected() {
        let text = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nend_header\n1 2\n";
        let err = AsciiPly::parse(text).unwrap_err();
        assert!(err.to_string().contains("x, y, z"));
    }

    #[test]
    fn obj_vertices_only() {
        let text = "# cube\nv 1 2 3\nvn 0 0 1\nv 0 0 0 1.0\nf 1 2 3\n";
        let out = transform_obj_text(text, &Mat4::new_scaling(2.0)).unwrap();
        assert_eq!(
            out,
            "# cube\nv 2.000000 4.000000 6.000000\nvn 0 0 1\nv 0.000000 0.000000 0.000000 1.0\nf 1 2 3\n"
        );
    }

    #[test]
    fn written_points_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.ply");
        let points = vec![Pt3::new(0.5, -1.25, 3.0), Pt3::new(1.0, 1.0, 1.0)];
        write_ply_points(&path, &points).unwrap();
        assert_eq!(read_ply_points(&path).unwrap(), points);
    }
}
