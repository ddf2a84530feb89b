//! The shipped demo configuration stays loadable.

use std::path::PathBuf;
use std::time::Duration;

use morphpack_lib::config::{BuildConfig, SandboxSpec};
use morphpack_lib::target::TargetId;

fn demo_config() -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("..")
    .join("..")
    .join("demo")
    .join("morphpack.toml")
}

#[test]
fn demo_config_loads() {
  let config = BuildConfig::load(&demo_config()).unwrap();

  assert_eq!(config.artifact_name().unwrap(), "morph_gen");
  assert_eq!(config.bundler.timeout, Some(Duration::from_secs(45 * 60)));
  let ids: Vec<String> = config.targets.iter().map(|t| t.target.to_string()).collect();
  assert_eq!(ids, ["glibc-linux/x64", "musl-linux/x64", "windows/x64"]);
  assert!(matches!(config.targets[2].sandbox, SandboxSpec::Host(_)));
  assert!(!config.targets[2].required);
}

#[test]
fn demo_targets_have_the_documented_names() {
  let config = BuildConfig::load(&demo_config()).unwrap();

  let names: Vec<String> = config
    .targets
    .iter()
    .map(|t| t.environment().export_filename("morph_gen").unwrap())
    .collect();
  assert_eq!(names, [
    "morph_gen_linux_x64_glibc",
    "morph_gen_musl_x64",
    "morph_gen_windows_x64.exe"
  ]);
}

#[test]
fn demo_target_filter() {
  let config = BuildConfig::load(&demo_config()).unwrap();
  let windows: TargetId = "windows/x64".parse().unwrap();

  let selected = config.select(&[windows]).unwrap();
  assert_eq!(selected.len(), 1);
  assert_eq!(selected[0].target, windows);
}
