use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{ParseError, UsageError};
use crate::models::{Counters, UsageSnapshot};

pub const DEFAULT_REPORT_PATH: &str = "/opt/hiddify-manager/other/wireguard/raw_wg_usage.json";

/// Produces the latest cumulative counters from the measurement side.
pub trait UsageSource {
    fn fetch(&self) -> Result<UsageSnapshot, UsageError>;
}

/// Asks the measurement agent to rewrite its report before it is read.
pub trait ReportRefresher {
    fn refresh(&self) -> anyhow::Result<()>;
}

/// Runs an external command, e.g. the manager's `update-wg-usage` hook.
#[derive(Debug, Clone)]
pub struct CommandRefresher {
    program: String,
    args: Vec<String>,
}

impl CommandRefresher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a whitespace separated command line. Returns `None` for a blank one.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl ReportRefresher for CommandRefresher {
    fn refresh(&self) -> anyhow::Result<()> {
        debug!("Refreshing usage report: {} {:?}", self.program, self.args);
        let output = Command::new(&self.program).args(&self.args).output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }
        Ok(())
    }
}

/// `None` leaves the report as it is; someone else keeps it fresh.
impl<R: ReportRefresher> ReportRefresher for Option<R> {
    fn refresh(&self) -> anyhow::Result<()> {
        match self {
            Some(refresher) => refresher.refresh(),
            None => Ok(()),
        }
    }
}

/// Reads the WireGuard usage report written by the manager scripts.
pub struct WgUsageSource<R> {
    report_path: PathBuf,
    refresher: R,
}

impl<R: ReportRefresher> WgUsageSource<R> {
    pub fn new(report_path: impl Into<PathBuf>, refresher: R) -> Self {
        Self {
            report_path: report_path.into(),
            refresher,
        }
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }
}

impl<R: ReportRefresher> UsageSource for WgUsageSource<R> {
    fn fetch(&self) -> Result<UsageSnapshot, UsageError> {
        // A stale report is still better than none.
        if let Err(e) = self.refresher.refresh() {
            warn!("Usage report refresh failed: {:#}", e);
        }

        let raw = match std::fs::read(&self.report_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    "Usage report {} not present, no usage update this cycle",
                    self.report_path.display()
                );
                return Ok(UsageSnapshot::new());
            }
            Err(source) => {
                return Err(UsageError::SourceIo {
                    path: self.report_path.clone(),
                    source,
                });
            }
        };

        let (snapshot, errors) = parse_report_bytes(&raw);
        for e in &errors {
            warn!("Skipping malformed usage line: {}", e);
        }
        debug!(
            "Read {} identities from {} ({} rejected lines)",
            snapshot.len(),
            self.report_path.display(),
            errors.len()
        );

        Ok(snapshot)
    }
}

/// Parses `identity down up` lines. Bad lines are reported, never zero-filled.
pub fn parse_report(raw: &str) -> (UsageSnapshot, Vec<ParseError>) {
    parse_report_bytes(raw.as_bytes())
}

/// Same as [`parse_report`], for a report read as raw bytes.
///
/// Lines that are not valid UTF-8 are rejected one by one.
pub fn parse_report_bytes(raw: &[u8]) -> (UsageSnapshot, Vec<ParseError>) {
    let mut snapshot = UsageSnapshot::new();
    let mut errors = Vec::new();

    for (idx, bytes) in raw.split(|b| *b == b'\n').enumerate() {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        let line = match std::str::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                errors.push(ParseError {
                    line: idx + 1,
                    content: String::from_utf8_lossy(bytes).into_owned(),
                    reason: format!("not valid UTF-8: {e}"),
                });
                continue;
            }
        };

        let mut fields = line.split_whitespace();
        let Some(identity) = fields.next() else {
            continue;
        };

        let reject = |reason: String| ParseError {
            line: idx + 1,
            content: line.to_string(),
            reason,
        };

        let down = match parse_counter(fields.next(), "down") {
            Ok(v) => v,
            Err(reason) => {
                errors.push(reject(reason));
                continue;
            }
        };
        let up = match parse_counter(fields.next(), "up") {
            Ok(v) => v,
            Err(reason) => {
                errors.push(reject(reason));
                continue;
            }
        };

        snapshot.insert(identity.to_string(), Counters::new(up, down));
    }

    (snapshot, errors)
}

fn parse_counter(field: Option<&str>, side: &str) -> Result<u64, String> {
    let raw = field.ok_or_else(|| format!("missing {side} counter"))?;
    raw.parse::<u64>()
        .map_err(|e| format!("invalid {side} counter '{raw}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingRefresher<'a> {
        calls: &'a Cell<u32>,
        fail: bool,
    }

    impl ReportRefresher for CountingRefresher<'_> {
        fn refresh(&self) -> anyhow::Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                anyhow::bail!("wg-quick not installed");
            }
            Ok(())
        }
    }

    #[test]
    fn parses_down_then_up() {
        let (snapshot, errors) = parse_report("abc 100 50\n\nxyz 7 3 extra\n");
        assert!(errors.is_empty());
        assert_eq!(snapshot["abc"], Counters::new(50, 100));
        assert_eq!(snapshot["xyz"], Counters::new(3, 7));
    }

    #[test]
    fn malformed_lines_are_reported_and_skipped() {
        let raw = "good 1 2\nshort 10\nbad x 2\nneg -5 1\n   \nalso-good 3 4";
        let (snapshot, errors) = parse_report(raw);

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("good"));
        assert!(snapshot.contains_key("also-good"));
        assert!(!snapshot.contains_key("short"));

        let lines: Vec<usize> = errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
        assert!(errors[0].reason.contains("missing up counter"));
        assert!(errors[1].reason.contains("invalid down counter"));
    }

    #[test]
    fn missing_report_is_an_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Cell::new(0);
        let source = WgUsageSource::new(
            dir.path().join("raw_wg_usage.json"),
            CountingRefresher { calls: &calls, fail: false },
        );

        assert!(source.fetch().unwrap().is_empty());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn refresh_failure_still_reads_the_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw_wg_usage.json");
        std::fs::write(&path, "peer 10 20\n").unwrap();

        let calls = Cell::new(0);
        let source = WgUsageSource::new(&path, CountingRefresher { calls: &calls, fail: true });

        let snapshot = source.fetch().unwrap();
        assert_eq!(snapshot["peer"], Counters::new(20, 10));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn non_utf8_line_does_not_hide_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw_wg_usage.json");
        std::fs::write(&path, b"good 100 50\n\xff\xfe 3 4\nalso 7 8\r\n").unwrap();

        let calls = Cell::new(0);
        let source = WgUsageSource::new(&path, CountingRefresher { calls: &calls, fail: false });
        let snapshot = source.fetch().unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["good"], Counters::new(50, 100));
        assert_eq!(snapshot["also"], Counters::new(8, 7));

        let (_, errors) = parse_report_bytes(b"good 1 2\n\xff\xfe 3 4\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 2);
        assert!(errors[0].reason.contains("UTF-8"));
    }

    #[test]
    fn command_line_splits_program_and_args() {
        let cmd = CommandRefresher::from_command_line("  /opt/manager/run.sh update-wg-usage ").unwrap();
        assert_eq!(cmd.program, "/opt/manager/run.sh");
        assert_eq!(cmd.args, vec!["update-wg-usage".to_string()]);
        assert!(CommandRefresher::from_command_line("   ").is_none());
    }
}
