//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use walkdir::WalkDir;

use nfw_automation::config::RouteTarget;
use nfw_automation::{EnvironmentSettings, ReconcileOptions};

pub const STACK_ID: &str =
    "arn:aws:cloudformation:us-east-1:111111111111:stack/nfw/4e4e1a10-1d3c-11ec-9621-0a1ed2d8c2a1";
pub const SUFFIX: &str = "-0a1ed2d8c2a1";

pub fn fixtures_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Copies a fixture tree into a fresh temporary directory so a test can
/// modify it.
pub fn copy_fixture(name: &str) -> TempDir {
    let source = fixtures_path(name);
    let temp = TempDir::new().unwrap();
    for entry in WalkDir::new(&source).min_depth(1) {
        let entry = entry.unwrap();
        let relative = entry.path().strip_prefix(&source).unwrap();
        let target = temp.path().join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).unwrap();
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
    temp
}

pub fn write(dir: &Path, relative: &str, content: &str) {
    std::fs::write(dir.join(relative), content).unwrap();
}

pub fn settings() -> EnvironmentSettings {
    EnvironmentSettings {
        vpc_id: Some("vpc-0123456789".into()),
        subnet_ids: vec!["subnet-a".into(), "subnet-b".into()],
        stack_id: STACK_ID.into(),
        route_targets: vec![
            RouteTarget {
                availability_zone: "us-east-1a".into(),
                route_table_id: "rtb-a".into(),
            },
            RouteTarget {
                availability_zone: "us-east-1b".into(),
                route_table_id: "rtb-b".into(),
            },
        ],
        ..EnvironmentSettings::default()
    }
}

pub fn fast_options() -> ReconcileOptions {
    ReconcileOptions {
        poll_interval: Duration::ZERO,
        settle_delay: Duration::ZERO,
        convergence_timeout: Some(Duration::from_secs(30)),
    }
}

pub fn named(base: &str) -> String {
    format!("{}{}", base, SUFFIX)
}
