//! Exit classification and crash evidence.

use super::console::LogLine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const CRASH_REPORTS_DIR: &str = "crash-reports";
pub const LATEST_LOG: &str = "logs/latest.log";

/// The vanilla "server is up" line, e.g. `Done (3.214s)! For help, type "help"`.
static READY_BANNER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"Done \(\d+\.?\d*s\)!").ok());

/// Known crash signatures, most specific first.
static CRASH_SIGNATURES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"---- Minecraft Crash Report ----",
        r"A mod crashed on startup",
        r"Missing or unsatisfied dependencies",
        r"Unsatisfied dependency",
        r"net\.minecraftforge\.fml\.common\.MissingModsException",
        r"ModLoadingException",
        r"LoadingFailedException",
        r"Mixin apply.*failed",
        r"Error during.*initialization",
        r"Failed to start the minecraft server",
        r"Exception in thread",
        r"\[.*FATAL.*\]",
        r"Caused by:.*Exception",
        r"java\.lang\.\w*(Exception|Error)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

pub fn is_ready_banner(line: &str) -> bool {
    READY_BANNER.as_ref().map(|r| r.is_match(line)).unwrap_or(false)
}

/// The first line matching a known crash signature.
pub fn scan_for_crash<'a, I>(lines: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
    I::IntoIter: Clone,
{
    let lines = lines.into_iter();
    CRASH_SIGNATURES.iter().find_map(|sig| {
        lines
            .clone()
            .find(|line| sig.is_match(line))
            .map(|line| line.trim().to_string())
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashDetails {
    pub exit_code: Option<i32>,
    pub reached_ready: bool,
    /// Report written under `crash-reports/` during this run
    pub crash_report: Option<PathBuf>,
    pub latest_log: Option<PathBuf>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExitOutcome {
    Clean { exit_code: Option<i32> },
    Crashed(CrashDetails),
}

impl ExitOutcome {
    pub fn is_crash(&self) -> bool {
        matches!(self, ExitOutcome::Crashed(_))
    }
}

/// What `crash-reports/` looked like when a run started.
#[derive(Debug, Clone)]
pub struct RunBaseline {
    pub started_at: SystemTime,
    reports: HashSet<PathBuf>,
}

impl RunBaseline {
    pub fn capture(root: &Path) -> Self {
        let reports = std::fs::read_dir(root.join(CRASH_REPORTS_DIR))
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default();
        Self {
            started_at: SystemTime::now(),
            reports,
        }
    }
}

/// Newest report that appeared (or was rewritten) since `baseline`.
pub fn new_crash_report(root: &Path, baseline: &RunBaseline) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root.join(CRASH_REPORTS_DIR)).ok()?;
    entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let modified = e.metadata().ok()?.modified().ok()?;
            let path = e.path();
            (!baseline.reports.contains(&path) || modified >= baseline.started_at)
                .then_some((modified, path))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// Classify an exit that was not requested through `stop()`.
///
/// Any of a nonzero code, a fresh crash report or a missing ready banner
/// means the server crashed.
pub fn classify_exit(
    root: &Path,
    exit_code: Option<i32>,
    reached_ready: bool,
    baseline: &RunBaseline,
    recent: &[LogLine],
) -> ExitOutcome {
    let crash_report = new_crash_report(root, baseline);
    let crashed = exit_code != Some(0) || crash_report.is_some() || !reached_ready;
    if !crashed {
        return ExitOutcome::Clean { exit_code };
    }

    let latest_log = Some(root.join(LATEST_LOG)).filter(|p| p.is_file());
    let summary = crash_report
        .as_deref()
        .and_then(|p| std::fs::read_to_string(p).ok())
        .and_then(|report| {
            report
                .lines()
                .find(|l| l.starts_with("Description:"))
                .map(|l| l.trim().to_string())
        })
        .or_else(|| scan_for_crash(recent.iter().rev().take(200).map(|l| l.text.as_str())));

    ExitOutcome::Crashed(CrashDetails {
        exit_code,
        reached_ready,
        crash_report,
        latest_log,
        summary,
    })
}
