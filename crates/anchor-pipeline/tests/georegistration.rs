//! Georegistration of run directories against GCP files.

use std::fs;
use std::path::Path;

use anchor_core::{EnuFrame, Geodetic, Mat3, Pt3, Real, Vec3};
use anchor_linear::HelmertTransform;
use anchor_pipeline::artifacts::read_json_file;
use anchor_pipeline::geo::{
    run_georegistration, ClaimLevel, GeoregConfig, GeoregMode, GeoregStatus, TransformSpace, WorldFrame,
};
use anchor_pipeline::mesh_io::{read_ply_points, write_ply_points};
use anchor_pipeline::reconstruction::ReconstructionSource;
use anchor_pipeline::{AnchorPipeline, ReferenceSource, RunConfig};
use nalgebra::Rotation3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn truth() -> HelmertTransform {
    HelmertTransform {
        scale: 1.7,
        rotation: *Rotation3::from_euler_angles(0.1, -0.2, 0.9).matrix(),
        translation: Vec3::new(100.0, -50.0, 12.0),
    }
}

fn model_points() -> Vec<Pt3> {
    vec![
        Pt3::new(0.0, 0.0, 0.0),
        Pt3::new(1.0, 0.0, 0.1),
        Pt3::new(0.0, 1.0, -0.2),
        Pt3::new(1.0, 1.0, 0.3),
        Pt3::new(0.5, 0.2, 1.0),
        Pt3::new(-0.4, 0.7, 0.4),
    ]
}

fn write_local_gcps(path: &Path, model: &[Pt3], world: &[Pt3]) {
    let mut csv = String::from("id,model_x,model_y,model_z,world_x,world_y,world_z\n");
    for (i, (m, w)) in model.iter().zip(world).enumerate() {
        csv.push_str(&format!("g{i},{},{},{},{},{},{}\n", m.x, m.y, m.z, w.x, w.y, w.z));
    }
    fs::write(path, csv).unwrap();
}

fn run_dir_with_reconstruction(root: &Path) -> std::path::PathBuf {
    let run = root.join("run");
    let recon = run.join("out/reconstruction");
    fs::create_dir_all(&recon).unwrap();
    write_ply_points(&recon.join("sparse.ply"), &model_points()).unwrap();
    fs::write(recon.join("mesh.obj"), "o scan\nv 1 0 0.1\nv 0 1 -0.2\nf 1 2 1\n").unwrap();
    run
}

#[test]
fn solved_run_writes_every_artifact() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let run = run_dir_with_reconstruction(dir.path());
    let gcp_path = dir.path().join("gcps.csv");
    let t = truth();
    write_local_gcps(&gcp_path, &model_points(), &t.apply_all(&model_points()));

    let config = GeoregConfig {
        mode: GeoregMode::Require,
        gcp_file: Some(gcp_path),
        space: TransformSpace::Raw,
        max_rmse_m: 0.05,
        rel_eligible: true,
    };
    let outcome = run_georegistration(&run, &config).unwrap();
    assert!(outcome.solved);
    let solved = outcome.transform.unwrap();
    assert!((solved.scale - 1.7).abs() < 1e-9);
    assert!((solved.rotation - t.rotation).norm() < 1e-9);

    let report = &outcome.report;
    assert_eq!(report.status, GeoregStatus::Solved);
    assert_eq!(report.gcp_count, Some(6));
    assert_eq!(report.world_frame, Some(WorldFrame::Local));
    assert!(report.validation.abs_eligible);
    assert_eq!(report.validation.claim_level, ClaimLevel::Absolute);
    assert!(report.residuals.as_ref().unwrap().summary.rmse_m.unwrap() < 1e-9);

    // Georegistered sparse cloud lands on the world points.
    let moved = read_ply_points(&run.join("out/reconstruction/sparse_georeg.ply")).unwrap();
    for (p, w) in moved.iter().zip(t.apply_all(&model_points())) {
        assert!((p - w).norm() < 1e-5, "{} vs {}", p, w);
    }
    // Originals are untouched.
    assert_eq!(read_ply_points(&run.join("out/reconstruction/sparse.ply")).unwrap(), model_points());

    let mesh = fs::read_to_string(run.join("out/reconstruction/mesh_georeg.obj")).unwrap();
    assert!(mesh.starts_with("o scan\nv "));
    assert!(mesh.ends_with("f 1 2 1\n"));

    let residuals: Value = read_json_file(&run.join("out/geo/gcp_residuals.json")).unwrap();
    assert_eq!(residuals["per_point_m"].as_object().unwrap().len(), 6);
    assert!(residuals["summary"]["p95_m"].as_f64().unwrap() < 1e-9);

    let geo: Value = read_json_file(&run.join("out/geo/geo_transform.json")).unwrap();
    assert_eq!(geo["space"], "raw");
    assert_eq!(geo["world_frame"], "local");
    assert!(geo["enu_origin"].is_null());

    let transforms: Value = read_json_file(&run.join("out/transforms.json")).unwrap();
    let entries = transforms["entries"].as_array().unwrap();
    assert_eq!(entries.last().unwrap()["name"], "T_georeg");
    assert_eq!(entries.last().unwrap()["to_space"], "world");

    let stage: Value = read_json_file(&run.join("stage_reports/georeg.json")).unwrap();
    assert_eq!(stage["status"], "solved");
    assert_eq!(stage["validation"]["reason"], "georeg RMSE within threshold");
}

#[test]
fn existing_space_transform_is_composed() {
    let dir = tempfile::tempdir().unwrap();
    let run = run_dir_with_reconstruction(dir.path());
    // The exported cloud is in raw coordinates, GCP model coordinates in "scaled" ones.
    fs::write(
        run.join("out/transforms.json"),
        r#"{"spaces": {"scaled": [[2,0,0,0],[0,2,0,0],[0,0,2,0],[0,0,0,1]]}}"#,
    )
    .unwrap();
    let scaled: Vec<Pt3> = model_points().iter().map(|p| Pt3::from(p.coords * 2.0)).collect();
    let t = truth();
    let gcp_path = dir.path().join("gcps.csv");
    write_local_gcps(&gcp_path, &scaled, &t.apply_all(&scaled));

    let config = GeoregConfig {
        mode: GeoregMode::BestEffort,
        gcp_file: Some(gcp_path),
        space: TransformSpace::Scaled,
        ..GeoregConfig::default()
    };
    let outcome = run_georegistration(&run, &config).unwrap();
    assert!(outcome.solved);

    let moved = read_ply_points(&run.join("out/reconstruction/sparse_georeg.ply")).unwrap();
    for (p, w) in moved.iter().zip(t.apply_all(&scaled)) {
        assert!((p - w).norm() < 1e-5, "{} vs {}", p, w);
    }
    // Not eligible upstream, so no absolute claim.
    assert_eq!(outcome.report.validation.reason, "REL not eligible");
    assert_eq!(outcome.report.validation.claim_level, ClaimLevel::Unverified);
}

#[test]
fn geodetic_gcps_register_into_enu() {
    let dir = tempfile::tempdir().unwrap();
    let run = dir.path().join("run");
    let origin = Geodetic::new(47.3769, 8.5417, 408.0);
    let enu = EnuFrame::new(origin);
    let t = HelmertTransform {
        scale: 0.5,
        rotation: Mat3::identity(),
        translation: Vec3::new(3.0, 4.0, 0.0),
    };

    let offsets_deg = [(0.0, 0.0, 0.0), (0.0001, 0.0, 1.0), (0.0, 0.00015, 2.0), (0.0001, 0.0001, 0.5)];
    let mut csv = String::from("id,model_x,model_y,model_z,lat,lon,alt_m\n");
    let mut expected_world = Vec::new();
    for (i, (dlat, dlon, dalt)) in offsets_deg.iter().enumerate() {
        let g = Geodetic::new(origin.lat_deg + dlat, origin.lon_deg + dlon, origin.alt_m + dalt);
        let w = Pt3::from(enu.geodetic_to_enu(&g));
        let m = t.inverse().apply(&w);
        csv.push_str(&format!("p{i},{},{},{},{},{},{}\n", m.x, m.y, m.z, g.lat_deg, g.lon_deg, g.alt_m));
        expected_world.push(w);
    }
    let gcp_path = dir.path().join("gcps.csv");
    fs::write(&gcp_path, csv).unwrap();

    let config = GeoregConfig {
        mode: GeoregMode::Require,
        gcp_file: Some(gcp_path),
        rel_eligible: true,
        ..GeoregConfig::default()
    };
    let outcome = run_georegistration(&run, &config).unwrap();
    assert_eq!(outcome.report.world_frame, Some(WorldFrame::Enu));
    assert_eq!(outcome.report.enu_origin, Some(origin));
    let solved = outcome.transform.unwrap();
    assert!((solved.scale - 0.5).abs() < 1e-6, "scale {}", solved.scale);
    assert!(outcome.report.residuals.unwrap().summary.rmse_m.unwrap() < 1e-4);

    let geo: Value = read_json_file(&run.join("out/geo/geo_transform.json")).unwrap();
    assert_eq!(geo["world_frame"], "enu");
    assert_eq!(geo["enu_origin"]["lat_deg"], 47.3769);
}

#[test]
fn noisy_gcps_over_threshold_are_downgraded() {
    let dir = tempfile::tempdir().unwrap();
    let run = dir.path().join("run");
    let mut rng = StdRng::seed_from_u64(7);
    let t = truth();
    let world: Vec<Pt3> = t
        .apply_all(&model_points())
        .into_iter()
        .map(|w| w + Vec3::new(rng.random_range(-0.5..0.5), rng.random_range(-0.5..0.5), rng.random_range(-0.5..0.5)))
        .collect();
    let gcp_path = dir.path().join("gcps.csv");
    write_local_gcps(&gcp_path, &model_points(), &world);

    let config = GeoregConfig {
        mode: GeoregMode::BestEffort,
        gcp_file: Some(gcp_path),
        rel_eligible: true,
        max_rmse_m: 0.01,
        ..GeoregConfig::default()
    };
    let outcome = run_georegistration(&run, &config).unwrap();
    assert!(outcome.solved);
    let v = &outcome.report.validation;
    assert!(!v.abs_eligible);
    assert_eq!(v.claim_level, ClaimLevel::Relative);
    assert!(v.reason.starts_with("RMSE ") && v.reason.ends_with(" exceeds threshold"), "{}", v.reason);
    let rmse: Real = v.rmse_m.unwrap();
    assert!(rmse > 0.01);
}

#[test]
fn collinear_gcps_depend_on_mode() {
    let dir = tempfile::tempdir().unwrap();
    let run = dir.path().join("run");
    let gcp_path = dir.path().join("gcps.csv");
    fs::write(
        &gcp_path,
        "id,model_x,model_y,model_z,world_x,world_y,world_z\n\
         a,0,0,0,0,0,0\n\
         b,1,1,1,2,2,2\n\
         c,2,2,2,4,4,4\n",
    )
    .unwrap();

    let mut config = GeoregConfig {
        mode: GeoregMode::BestEffort,
        gcp_file: Some(gcp_path),
        ..GeoregConfig::default()
    };
    let outcome = run_georegistration(&run, &config).unwrap();
    assert!(!outcome.solved);
    assert_eq!(outcome.report.status, GeoregStatus::Skipped);
    assert!(outcome.report.reason.as_deref().unwrap().contains("collinear"));
    assert!(!run.join("out/geo/geo_transform.json").exists());

    config.mode = GeoregMode::Require;
    let err = run_georegistration(&run, &config).unwrap_err();
    assert!(format!("{:#}", err).contains("collinear"));
}

#[test]
fn too_few_gcps_skip_in_best_effort() {
    let dir = tempfile::tempdir().unwrap();
    let run = dir.path().join("run");
    let gcp_path = dir.path().join("gcps.csv");
    write_local_gcps(&gcp_path, &model_points()[..2], &model_points()[..2]);
    let config = GeoregConfig {
        mode: GeoregMode::BestEffort,
        gcp_file: Some(gcp_path),
        ..GeoregConfig::default()
    };
    let outcome = run_georegistration(&run, &config).unwrap();
    assert!(outcome.report.reason.as_deref().unwrap().contains("at least 3"));
}

#[test]
fn malformed_gcp_file_is_fatal_even_in_best_effort() {
    let dir = tempfile::tempdir().unwrap();
    let run = dir.path().join("run");
    let gcp_path = dir.path().join("gcps.csv");
    fs::write(&gcp_path, "id,model_x,model_y,model_z\na,0,0,0\n").unwrap();
    let config = GeoregConfig {
        mode: GeoregMode::BestEffort,
        gcp_file: Some(gcp_path),
        ..GeoregConfig::default()
    };
    let err = run_georegistration(&run, &config).unwrap_err();
    assert!(err.to_string().contains("either world_x/y/z or lat/lon/alt_m"), "{}", err);
}

#[test]
fn pipeline_georegisters_existing_reconstruction() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let recon = dir.path().join("recon");
    fs::create_dir_all(&recon).unwrap();
    write_ply_points(&recon.join("sparse.ply"), &model_points()).unwrap();
    fs::write(recon.join("mesh.obj"), "v 1 0 0.1\nv 0 1 -0.2\nf 1 2 1\n").unwrap();

    // Aerial runs center on the bounding box, and the GCPs were surveyed in that frame.
    let center = Vec3::new(0.3, 0.5, 0.4);
    let centered: Vec<Pt3> = model_points().iter().map(|p| p - center).collect();
    let t = truth();
    let gcp_path = dir.path().join("gcps.csv");
    write_local_gcps(&gcp_path, &centered[..4], &t.apply_all(&centered[..4]));

    let run = dir.path().join("run");
    let mut config = RunConfig::new(dir.path().join("frames"), &run);
    config.anchor.regime = "aerial".into();
    config.reconstruction = ReconstructionSource::Existing { dir: recon.clone() };
    config.georeg = GeoregConfig {
        mode: GeoregMode::BestEffort,
        gcp_file: Some(gcp_path),
        space: TransformSpace::Centered,
        ..GeoregConfig::default()
    };

    let report = AnchorPipeline::new().run(&config).unwrap();
    assert_eq!(report.reference_frame.as_ref().unwrap().source, ReferenceSource::BboxCenter);
    assert_eq!(report.georeg.status, GeoregStatus::Solved);
    assert_eq!(report.georeg.gcp_count, Some(4));

    let georeg_cloud = run.join("out/reconstruction/sparse_georeg.ply");
    assert!(report.artifacts.contains(&georeg_cloud));
    let moved = read_ply_points(&georeg_cloud).unwrap();
    for (p, w) in moved.iter().zip(t.apply_all(&centered)) {
        assert!((p - w).norm() < 1e-5, "{} vs {}", p, w);
    }
    assert!(run.join("out/reconstruction/mesh_georeg.obj").is_file());
    // The source reconstruction is left alone.
    assert!(!recon.join("sparse_georeg.ply").exists());
}
