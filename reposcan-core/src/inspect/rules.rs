use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use reposcan_model::{Finding, FindingMetadata};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::{Result, ScanError};

/// One line-oriented detection rule.
pub trait DetectionRule: Send + Sync {
    /// Inspect one line of `path` (relative to the repository root).
    /// `line` is 1-based and has its line terminator stripped.
    fn check(&self, path: &str, line: u64, text: &str) -> Option<Finding>;
}

/// Flags lines that start with a private or public key marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMarkerRule;

impl KeyMarkerRule {
    pub const RULE_ID: &'static str = "G101";
    const MARKERS: [&'static str; 2] = ["private_key", "public_key"];
}

impl DetectionRule for KeyMarkerRule {
    fn check(&self, path: &str, line: u64, text: &str) -> Option<Finding> {
        if !Self::MARKERS.iter().any(|marker| text.starts_with(marker)) {
            return None;
        }
        Some(Finding::at_line(
            "sast",
            Self::RULE_ID,
            path,
            line,
            FindingMetadata {
                description: "Potential hardcoded credentials".to_string(),
                severity: "HIGH".to_string(),
            },
        ))
    }
}

pub fn default_rules() -> Vec<Arc<dyn DetectionRule>> {
    vec![Arc::new(KeyMarkerRule)]
}

/// Apply `rules` to every line of every regular file under `root`.
///
/// Files are visited in file-name order so results are reproducible;
/// findings keep walk order, then line order.
pub(crate) fn inspect_tree(
    root: &Path,
    rules: &[Arc<dyn DetectionRule>],
    cancel: &CancellationToken,
) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled("source inspection".to_string()));
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| {
                ScanError::Internal(format!("walk left the repository root: {e}"))
            })?
            .to_string_lossy()
            .replace('\\', "/");

        inspect_file(entry.path(), &relative, rules, &mut findings)?;
    }

    Ok(findings)
}

fn inspect_file(
    path: &Path,
    relative: &str,
    rules: &[Arc<dyn DetectionRule>],
    findings: &mut Vec<Finding>,
) -> Result<()> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    let mut line_no = 0u64;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;

        let mut bytes = buf.as_slice();
        if let Some(stripped) = bytes.strip_suffix(b"\n") {
            bytes = stripped;
        }
        if let Some(stripped) = bytes.strip_suffix(b"\r") {
            bytes = stripped;
        }
        let text = String::from_utf8_lossy(bytes);

        findings.extend(
            rules
                .iter()
                .filter_map(|rule| rule.check(relative, line_no, &text)),
        );
    }
    Ok(())
}
