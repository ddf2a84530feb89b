//! Whole-pipeline runs through the orchestrator.

use morphpack_lib::orchestrate::{Orchestrator, TargetStatus};
use morphpack_lib::sandbox::SandboxState;
use tokio_util::sync::CancellationToken;

use super::common::{FULL_REQUIREMENTS, Project, TargetDecl, host_arch};

#[tokio::test]
async fn two_linux_targets_export_two_qualified_files() {
  let project = Project::new();
  let config = project.config(FULL_REQUIREMENTS, &[
    TargetDecl::new("glibc-linux"),
    TargetDecl::new("musl-linux"),
  ]);

  let report = Orchestrator::new(config, project.options())
    .run(CancellationToken::new())
    .await
    .unwrap();

  assert!(report.success());
  let arch = host_arch();
  assert_eq!(project.exported(), [
    format!("morph_gen_linux_{arch}_glibc"),
    format!("morph_gen_musl_{arch}"),
  ]);
  assert_eq!(report.manifest.len(), 2);
  for entry in &report.manifest.artifacts {
    assert!(entry.path.is_file());
    assert_eq!(entry.size, std::fs::metadata(&entry.path).unwrap().len());
    assert_eq!(entry.sha256.0.len(), 64);
    assert_eq!(entry.data.len(), 1);
    assert_eq!(entry.data[0].package, "pymorphy3_dicts_ru");
    assert_eq!(entry.data[0].mount, "pymorphy_data");
    assert_eq!(entry.data[0].sha256.0.len(), 64);
  }
  // Same installed dictionary in both sandboxes.
  assert_eq!(
    report.manifest.artifacts[0].data[0].sha256,
    report.manifest.artifacts[1].data[0].sha256
  );
  for outcome in &report.outcomes {
    assert_eq!(outcome.status, TargetStatus::Exported);
    assert_eq!(outcome.states.last(), Some(&SandboxState::Succeeded));
  }

  assert!(project.workspaces().is_empty(), "workspaces must be cleaned up");
}

#[tokio::test]
async fn missing_dictionary_package_fails_with_empty_export() {
  let project = Project::new();
  let config = project.config(&["nuitka", "pymorphy3", "pyyaml"], &[TargetDecl::new("glibc-linux")]);

  let report = Orchestrator::new(config, project.options())
    .run(CancellationToken::new())
    .await
    .unwrap();

  assert!(!report.success());
  assert!(project.exported().is_empty());

  let failure = report.outcomes[0].error.as_ref().unwrap();
  assert_eq!(failure.kind, "resolution");
  assert!(failure.message.contains("pymorphy3_dicts_ru"), "{}", failure.message);
  assert_eq!(report.outcomes[0].states.last(), Some(&SandboxState::Failed));
}

#[tokio::test]
async fn empty_dictionary_directory_fails_with_empty_export() {
  let project = Project::new();
  let mut config = project.config(&["nuitka", "pymorphy3", "empty-dicts-ru"], &[TargetDecl::new("glibc-linux")]);
  config.dependencies.data[0].package = "empty_dicts_ru".to_string();

  let report = Orchestrator::new(config, project.options())
    .run(CancellationToken::new())
    .await
    .unwrap();

  assert!(!report.success());
  assert!(report.manifest.is_empty());
  assert!(project.exported().is_empty());

  let outcome = &report.outcomes[0];
  assert_eq!(outcome.status, TargetStatus::Failed);
  assert_eq!(outcome.states, [
    SandboxState::Provisioning,
    SandboxState::DependenciesInstalled,
    SandboxState::Bundling,
    SandboxState::Failed
  ]);
  let failure = outcome.error.as_ref().unwrap();
  assert_eq!(failure.kind, "resolution");
  assert!(failure.message.contains("empty"), "{}", failure.message);
  assert!(project.workspaces().is_empty());
}

#[tokio::test]
async fn rebuild_replaces_the_previous_artifact() {
  let project = Project::new();
  let config = project.config(FULL_REQUIREMENTS, &[TargetDecl::new("musl-linux")]);

  let first = Orchestrator::new(config.clone(), project.options())
    .run(CancellationToken::new())
    .await
    .unwrap();
  let first_entry = first.manifest.artifacts[0].clone();
  let first_content = std::fs::read(&first_entry.path).unwrap();

  let second = Orchestrator::new(config, project.options())
    .run(CancellationToken::new())
    .await
    .unwrap();
  let second_entry = &second.manifest.artifacts[0];

  assert_eq!(second_entry.path, first_entry.path);
  assert_eq!(project.exported(), [format!("morph_gen_musl_{}", host_arch())]);
  assert_ne!(std::fs::read(&second_entry.path).unwrap(), first_content);
  assert_ne!(second_entry.sha256, first_entry.sha256);
}

#[tokio::test]
async fn failed_target_does_not_block_the_others() {
  let project = Project::new();
  let config = project.config(FULL_REQUIREMENTS, &[
    TargetDecl::new("glibc-linux"),
    TargetDecl::new("musl-linux").python_version("3.11").optional(),
  ]);

  let report = Orchestrator::new(config, project.options())
    .run(CancellationToken::new())
    .await
    .unwrap();

  // Only an optional target failed.
  assert!(report.success());
  assert_eq!(project.exported(), [format!("morph_gen_linux_{}_glibc", host_arch())]);

  let failed: Vec<_> = report.failures().collect();
  assert_eq!(failed.len(), 1);
  assert_eq!(failed[0].error.as_ref().unwrap().kind, "provisioning");
  assert_eq!(failed[0].states, [SandboxState::Provisioning, SandboxState::Failed]);
}

#[tokio::test]
async fn all_or_nothing_exports_nothing_on_failure() {
  let project = Project::new();
  let config = project.config(FULL_REQUIREMENTS, &[
    TargetDecl::new("glibc-linux"),
    TargetDecl::new("musl-linux").python_version("3.11").optional(),
  ]);
  let mut options = project.options();
  options.all_or_nothing = true;

  let report = Orchestrator::new(config, options)
    .run(CancellationToken::new())
    .await
    .unwrap();

  assert!(report.aborted);
  assert!(!report.success());
  assert!(report.manifest.is_empty());
  assert!(project.exported().is_empty());
  assert!(
    report
      .outcomes
      .iter()
      .all(|o| o.status != TargetStatus::Exported)
  );
  assert!(project.workspaces().is_empty());
}

#[tokio::test]
async fn cancelled_run_reports_cancellation() {
  let project = Project::new();
  let config = project.config(FULL_REQUIREMENTS, &[TargetDecl::new("glibc-linux")]);
  let cancel = CancellationToken::new();
  cancel.cancel();

  let report = Orchestrator::new(config, project.options()).run(cancel).await.unwrap();

  assert!(!report.success());
  assert_eq!(report.outcomes[0].error.as_ref().unwrap().kind, "cancelled");
  assert!(project.exported().is_empty());
}

#[tokio::test]
async fn report_serializes_to_json() {
  let project = Project::new();
  let config = project.config(FULL_REQUIREMENTS, &[TargetDecl::new("glibc-linux")]);

  let report = Orchestrator::new(config, project.options())
    .run(CancellationToken::new())
    .await
    .unwrap();
  let json = serde_json::to_value(&report).unwrap();

  let target = format!("glibc-linux/{}", host_arch());
  assert_eq!(json["manifest"]["artifacts"][0]["target"], target.as_str());
  assert_eq!(json["outcomes"][0]["status"], "exported");
  assert_eq!(json["outcomes"][0]["states"][0], "provisioning");
  assert!(json["outcomes"][0].get("error").is_none());
}
