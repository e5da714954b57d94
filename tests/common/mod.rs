#![allow(dead_code)]

use specsync::model::Feature;
use std::fs;
use std::path::Path;
use std::sync::Once;
use std::time::Instant;
use tracing::info;

pub mod cli;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        specsync::logging::init_test_logging();
    });
}

pub struct TestLogGuard {
    name: String,
    start: Instant,
}

impl TestLogGuard {
    fn new(name: &str) -> Self {
        init_test_logging();
        info!("{name}: starting");
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }
}

impl Drop for TestLogGuard {
    fn drop(&mut self) {
        info!(
            "{}: assertions passed (elapsed {:?})",
            self.name,
            self.start.elapsed()
        );
    }
}

pub fn test_log(name: &str) -> TestLogGuard {
    TestLogGuard::new(name)
}

/// Write `content` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, content).expect("write file");
}

pub fn read_file(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).expect("read file")
}

/// Seed one internal feature under `.specfact/plan/features/`.
pub fn seed_feature(root: &Path, feature: &Feature) {
    let yaml = serde_yaml::to_string(feature).expect("feature yaml");
    write_file(
        root,
        &format!(".specfact/plan/features/{}.yaml", feature.key),
        &yaml,
    );
}

/// Seed a standalone bundle directory (as taken by `ssync compare`).
pub fn seed_bundle(dir: &Path, features: &[Feature]) {
    write_file(dir, "plan.yaml", "version: '1.0'\n");
    for feature in features {
        let yaml = serde_yaml::to_string(feature).expect("feature yaml");
        write_file(dir, &format!("features/{}.yaml", feature.key), &yaml);
    }
}

pub fn feature(key: &str, title: &str, acceptance: &[&str]) -> Feature {
    let mut feature = Feature::new(key, title);
    feature.acceptance = acceptance.iter().map(ToString::to_string).collect();
    feature
}
