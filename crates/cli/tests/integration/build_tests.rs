//! Full build runs through the binary.

use predicates::prelude::*;

use super::common::{TestEnv, host_arch};

const FULL_REQUIREMENTS: &[&str] = &["nuitka", "pymorphy3", "pymorphy3-dicts-ru"];

#[test]
fn build_prints_one_path_per_target() {
  let env = TestEnv::new();
  env.write_config(FULL_REQUIREMENTS, &[("glibc-linux", true), ("musl-linux", true)]);
  let arch = host_arch();

  let output = env
    .morphpack_cmd()
    .arg("dist/morph_gen")
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let stdout = String::from_utf8(output).unwrap();
  let lines: Vec<&str> = stdout.lines().collect();
  assert_eq!(lines, [
    format!("dist/morph_gen_linux_{arch}_glibc"),
    format!("dist/morph_gen_musl_{arch}"),
  ]);
  assert_eq!(env.exported(), [
    format!("morph_gen_linux_{arch}_glibc"),
    format!("morph_gen_musl_{arch}"),
  ]);
}

#[test]
fn output_name_sets_the_artifact_base_name() {
  let env = TestEnv::new();
  env.write_config(FULL_REQUIREMENTS, &[("musl-linux", true)]);

  env
    .morphpack_cmd()
    .arg("dist/lemmatizer")
    .assert()
    .success()
    .stdout(predicate::str::contains(format!("lemmatizer_musl_{}", host_arch())));
}

#[test]
fn target_filter_builds_only_the_named_target() {
  let env = TestEnv::new();
  env.write_config(FULL_REQUIREMENTS, &[("glibc-linux", true), ("musl-linux", true)]);
  let arch = host_arch();

  env
    .morphpack_cmd()
    .args(["dist/morph_gen", "--target", &format!("musl-linux/{arch}")])
    .assert()
    .success();

  assert_eq!(env.exported(), [format!("morph_gen_musl_{arch}")]);
}

#[test]
fn unknown_target_filter_fails() {
  let env = TestEnv::new();
  env.write_config(FULL_REQUIREMENTS, &[("glibc-linux", true)]);

  env
    .morphpack_cmd()
    .args(["dist/morph_gen", "--target", &format!("musl-linux/{}", host_arch())])
    .assert()
    .code(1)
    .stderr(predicate::str::contains("not declared"));

  assert!(env.exported().is_empty());
}

#[test]
fn missing_dictionary_package_fails_the_run() {
  let env = TestEnv::new();
  env.write_config(&["nuitka", "pymorphy3"], &[("glibc-linux", true)]);

  env
    .morphpack_cmd()
    .arg("dist/morph_gen")
    .assert()
    .code(1)
    .stdout(predicate::str::is_empty())
    .stderr(predicate::str::contains(format!("glibc-linux/{}", host_arch())))
    .stderr(predicate::str::contains("[resolution]"))
    .stderr(predicate::str::contains("pymorphy3_dicts_ru"));

  assert!(env.exported().is_empty());
}

#[test]
fn failed_optional_target_still_exits_zero() {
  let env = TestEnv::new();
  env.write_config(&["nuitka", "pymorphy3", "pymorphy3-dicts-ru", "broken-package"], &[
    ("glibc-linux", false),
  ]);

  env
    .morphpack_cmd()
    .arg("dist/morph_gen")
    .assert()
    .success()
    .stderr(predicate::str::contains("(optional) failed [provisioning]"));
}

#[test]
fn json_report_lists_exported_artifacts() {
  let env = TestEnv::new();
  env.write_config(FULL_REQUIREMENTS, &[("glibc-linux", true)]);

  let output = env
    .morphpack_cmd()
    .args(["dist/morph_gen", "--output", "json"])
    .assert()
    .success()
    .get_output()
    .stdout
    .clone();

  let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
  let artifact = &report["manifest"]["artifacts"][0];
  assert_eq!(artifact["target"], format!("glibc-linux/{}", host_arch()).as_str());
  assert_eq!(artifact["sha256"].as_str().unwrap().len(), 64);
  assert_eq!(artifact["data"][0]["package"], "pymorphy3_dicts_ru");
  assert_eq!(artifact["data"][0]["mount"], "pymorphy_data");
  assert_eq!(artifact["data"][0]["sha256"].as_str().unwrap().len(), 64);
  assert_eq!(report["outcomes"][0]["status"], "exported");
  assert_eq!(report["aborted"], false);
}

#[test]
fn all_or_nothing_exports_nothing_when_a_target_fails() {
  let env = TestEnv::new();
  env.write_config(FULL_REQUIREMENTS, &[("glibc-linux", true), ("musl-linux", true)]);
  std::fs::write(
    env.path().join("morphpack.toml"),
    std::fs::read_to_string(env.path().join("morphpack.toml"))
      .unwrap()
      .replacen("python_version = \"3.12\"", "python_version = \"3.11\"", 1),
  )
  .unwrap();

  env
    .morphpack_cmd()
    .args(["dist/morph_gen", "--all-or-nothing"])
    .assert()
    .code(1)
    .stdout(predicate::str::is_empty())
    .stderr(predicate::str::contains("build aborted"));

  assert!(env.exported().is_empty());
}
