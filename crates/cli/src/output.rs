//! Terminal rendering of a build report.
//!
//! Exported artifact paths and JSON reports go to stdout, one path per line,
//! so they can be piped. Status lines go to stderr.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use morphpack_lib::orchestrate::{BuildReport, TargetOutcome, TargetStatus};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
}

pub fn truncate_hash(hash: &str) -> &str {
  let len = hash.len().min(12);
  &hash[..len]
}

pub fn format_bytes(bytes: u64) -> String {
  const KB: u64 = 1024;
  const MB: u64 = KB * 1024;

  if bytes >= MB {
    format!("{:.1} MB", bytes as f64 / MB as f64)
  } else if bytes >= KB {
    format!("{:.1} KB", bytes as f64 / KB as f64)
  } else {
    format!("{} B", bytes)
  }
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

/// One line naming a target that did not export, with its error kind and cause.
fn outcome_line(outcome: &TargetOutcome) -> Option<String> {
  match (&outcome.status, &outcome.error) {
    (TargetStatus::Exported, _) => None,
    (TargetStatus::Discarded, _) => Some(format!("{}: built but not exported", outcome.target)),
    (TargetStatus::Failed, failure) => {
      let optional = if outcome.required { "" } else { " (optional)" };
      Some(match failure {
        Some(f) => format!("{}{optional} failed [{}]: {}", outcome.target, f.kind, f.message),
        None => format!("{}{optional} failed", outcome.target),
      })
    }
  }
}

fn summary_line(report: &BuildReport) -> String {
  let exported = report.manifest.len();
  let total = report.outcomes.len();
  let elapsed = format_duration(report.elapsed);
  if report.aborted {
    format!("build aborted: nothing exported ({total} targets) in {elapsed}")
  } else if report.success() {
    format!(
      "exported {exported} of {total} targets to {} in {elapsed}",
      report.manifest.export_dir.display()
    )
  } else {
    format!("required targets failed ({exported} of {total} exported) in {elapsed}")
  }
}

pub fn print_report(report: &BuildReport, verbose: bool) {
  for outcome in &report.outcomes {
    if let Some(entry) = report.manifest.get(&outcome.target) {
      println!("{}", entry.path.display());
      if verbose {
        print_success(&format!("{} in {}", outcome.target, format_duration(outcome.elapsed)));
        print_stat("size", &format_bytes(entry.size));
        print_stat("sha256", truncate_hash(&entry.sha256.0));
        for data in &entry.data {
          print_stat(&format!("data {}", data.mount), truncate_hash(&data.sha256.0));
        }
      }
      continue;
    }
    match (outcome_line(outcome), &outcome.status) {
      (Some(line), TargetStatus::Discarded) => print_warning(&line),
      (Some(line), _) => print_error(&line),
      (None, _) => {}
    }
  }

  let summary = summary_line(report);
  if report.success() {
    print_success(&summary);
  } else {
    print_error(&summary);
  }
}

pub fn print_success(message: &str) {
  eprintln!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stderr, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

fn print_stat(label: &str, value: &str) {
  eprintln!(
    "  {}: {}",
    label.if_supports_color(Stream::Stderr, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
