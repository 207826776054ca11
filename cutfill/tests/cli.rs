use approx::assert_abs_diff_eq;
use earthwork::{
    optimize, Backend, ExecutionContext, ExecutorConfig, GridSource, OptimizationOutcome,
    ProjectSpec, ScenarioResult,
};
use elevation::GridMode;
use std::{
    fmt::Write as _,
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};
use tempfile::TempDir;

const PROJECT_JSON: &str = r#"{
    "external_material_thickness": 0.3,
    "surfaces": [
        { "kind": "platform",
          "footprint": "POLYGON((10 10,30 10,30 35,10 35,10 10))",
          "batter": { "slope_deg": 33.7, "width": 2.0 } },
        { "kind": "foundation",
          "footprint": "POLYGON((40 14,50 14,50 24,40 24,40 14))",
          "depth": 2.0 }
    ],
    "search": {
        "height_window": 1.0,
        "height_steps": { "coarse": 0.25, "fine": 0.05 }
    }
}"#;

fn cutfill() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cutfill"))
}

/// Tilted plane, 80 x 80 one metre cells, in ESRI ASCII.
fn write_inputs(dir: &Path) -> (PathBuf, PathBuf) {
    let (cols, rows) = (80, 80);
    let mut text = format!(
        "ncols {cols}\nnrows {rows}\nxllcorner 0\nyllcorner 0\ncellsize 1\nNODATA_value -9999\n"
    );
    for row in 0..rows {
        for col in 0..cols {
            let x = col as f64 + 0.5;
            let y = (rows - row) as f64 - 0.5;
            write!(text, "{:.4} ", 100.0 + 0.05 * x + 0.02 * y).unwrap();
        }
        text.push('\n');
    }
    let grid = dir.join("plane.asc");
    fs::write(&grid, text).unwrap();
    let project = dir.join("project.json");
    fs::write(&project, PROJECT_JSON).unwrap();
    (grid, project)
}

fn run(args: &[&str]) -> Output {
    let output = cutfill().args(args).output().unwrap();
    assert!(
        output.status.success(),
        "cutfill {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn optimize_with(dir: &TempDir, backend: Backend) -> OptimizationOutcome {
    let (grid, project) = write_inputs(dir.path());
    let ctx = ExecutionContext::new(
        ProjectSpec::load(project).unwrap(),
        GridSource {
            path: grid,
            mode: GridMode::InMem,
        },
    )
    .with_executor(ExecutorConfig {
        workers: 2,
        backend,
        ..ExecutorConfig::default()
    });
    optimize(&ctx).unwrap()
}

#[test]
fn process_pool_matches_sequential() {
    let dir = tempfile::tempdir().unwrap();
    let sequential = optimize_with(&dir, Backend::Sequential);
    let processes = optimize_with(
        &dir,
        Backend::Processes {
            program: env!("CARGO_BIN_EXE_cutfill").into(),
        },
    );
    assert_abs_diff_eq!(
        sequential.params.platform_height,
        processes.params.platform_height,
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(sequential.metric, processes.metric, epsilon = 1e-6);
    assert_eq!(sequential.evaluated, processes.evaluated);
    assert!(!processes.fallback_triggered);
    assert_eq!(processes.failed, 0);
}

#[test]
fn optimize_prints_json_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let (grid, project) = write_inputs(dir.path());
    let output = run(&[
        "optimize",
        "--grid",
        grid.to_str().unwrap(),
        "--project",
        project.to_str().unwrap(),
        "--backend",
        "processes",
        "--workers",
        "2",
        "--json",
    ]);
    let outcome: OptimizationOutcome = serde_json::from_slice(&output.stdout).unwrap();
    // Height only, so the fine range is scanned once: 2 m at 5 cm.
    assert_eq!(outcome.evaluated, 41);
    assert_eq!(outcome.full_fine_points, 41);
    assert!(outcome.coarse_best.is_none());
    assert!(outcome.best.net <= outcome.best.total);
}

#[test]
fn evaluate_matches_after_convert() {
    let dir = tempfile::tempdir().unwrap();
    let (grid, project) = write_inputs(dir.path());
    let binary = dir.path().join("plane.egrid");
    run(&["convert", grid.to_str().unwrap(), binary.to_str().unwrap()]);

    let evaluate = |grid: &Path, extra: &[&str]| -> ScenarioResult {
        let mut args = vec![
            "evaluate",
            "--grid",
            grid.to_str().unwrap(),
            "--project",
            project.to_str().unwrap(),
            "--height",
            "101.5",
            "--json",
        ];
        args.extend_from_slice(extra);
        serde_json::from_slice(&run(&args).stdout).unwrap()
    };
    let ascii = evaluate(&grid, &[]);
    let mapped = evaluate(&binary, &["--memmap"]);
    assert_abs_diff_eq!(ascii.cut, mapped.cut, epsilon = 1e-3);
    assert_abs_diff_eq!(ascii.fill, mapped.fill, epsilon = 1e-3);
    assert_abs_diff_eq!(ascii.net, (ascii.cut - ascii.fill).abs(), epsilon = 1e-9);
    // Platform is 20 x 25 m surfaced at 0.3 m.
    assert_abs_diff_eq!(ascii.external_volume, 150.0, epsilon = 1e-6);
    assert_eq!(ascii.surfaces.len(), 2);
}

#[test]
fn worker_rejects_malformed_request() {
    let mut child = cutfill()
        .arg("worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"{not json}\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}
