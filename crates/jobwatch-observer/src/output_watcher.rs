use std::sync::Arc;

use jobwatch_core::{linear_backoff_delay, Job};
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::SessionCore;
use crate::signal::{FailureKind, SignalSource, TerminalSignal};

// Preset phrases must start the line, after optional `[..]` tags or a log
// level. Success phrases must also end it.
const LINE_PREFIX: &str = r"^\s*(?:(?:\[[^\]]*\]|(?:error|fatal|info|warn(?:ing)?)\s*:)\s*)*";
const SUCCESS_SUFFIX: &str = r"[.!]?\s*$";
const FAILURE_SUFFIX: &str = r"(?:\s*$|[\s:.,!(-].*$)";

const PROVISIONING_SUCCESS_PATTERNS: &[&str] = &[
    r"wordpress installation completed successfully",
    r"provisioning completed successfully",
    r"site is now live at \S+",
];
const PROVISIONING_FAILURE_PATTERNS: &[&str] = &[
    r"wordpress installation failed",
    r"provisioning failed",
    r"ssh connection (failed|refused|timed out)",
    r"installation aborted due to",
];
const GENERATION_SUCCESS_PATTERNS: &[&str] = &[
    r"bulk generation completed",
    r"all \d+ items have been processed",
    r"review generation completed successfully",
];
const GENERATION_FAILURE_PATTERNS: &[&str] = &[
    r"bulk generation (failed|aborted)",
    r"review generation failed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of matching one output line.
pub struct PatternMatch {
    pub kind: PatternKind,
    pub pattern: String,
}

/// Case-insensitive success/failure phrase sets matched against output lines.
///
/// Failure phrases are checked first so a line that matches both never reads
/// as success.
#[derive(Debug, Clone, Default)]
pub struct OutputPatternSet {
    success: Vec<Regex>,
    failure: Vec<Regex>,
}

impl OutputPatternSet {
    /// Compiles caller-provided phrase patterns.
    pub fn new(success: &[&str], failure: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            success: compile_all(success)?,
            failure: compile_all(failure)?,
        })
    }

    /// A set that never matches, leaving the watcher silent.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Phrases emitted by the remote WordPress provisioning script.
    pub fn provisioning() -> Self {
        Self::from_presets(PROVISIONING_SUCCESS_PATTERNS, PROVISIONING_FAILURE_PATTERNS)
    }

    /// Phrases emitted by the bulk review generation loop.
    pub fn generation() -> Self {
        Self::from_presets(GENERATION_SUCCESS_PATTERNS, GENERATION_FAILURE_PATTERNS)
    }

    /// Union of the provisioning and generation presets.
    pub fn standard() -> Self {
        let mut set = Self::provisioning();
        let generation = Self::generation();
        set.success.extend(generation.success);
        set.failure.extend(generation.failure);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.success.is_empty() && self.failure.is_empty()
    }

    pub fn match_line(&self, line: &str) -> Option<PatternMatch> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if let Some(regex) = self.failure.iter().find(|regex| regex.is_match(line)) {
            return Some(PatternMatch {
                kind: PatternKind::Failure,
                pattern: regex.as_str().to_string(),
            });
        }
        self.success
            .iter()
            .find(|regex| regex.is_match(line))
            .map(|regex| PatternMatch {
                kind: PatternKind::Success,
                pattern: regex.as_str().to_string(),
            })
    }

    fn from_presets(success: &[&str], failure: &[&str]) -> Self {
        Self {
            success: compile_presets(success, SUCCESS_SUFFIX),
            failure: compile_presets(failure, FAILURE_SUFFIX),
        }
    }
}

fn compile_all(patterns: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|pattern| Regex::new(&format!("(?i){pattern}")))
        .collect()
}

fn compile_presets(patterns: &[&str], suffix: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| {
            match Regex::new(&format!("(?i){LINE_PREFIX}(?:{pattern}){suffix}")) {
                Ok(regex) => Some(regex),
                Err(error) => {
                    tracing::warn!(
                        pattern = *pattern,
                        error = %error,
                        "skipping invalid output pattern"
                    );
                    None
                }
            }
        })
        .collect()
}

fn failure_signal(line: &str) -> TerminalSignal {
    TerminalSignal::Failure {
        source: SignalSource::OutputWatcher,
        kind: FailureKind::OutputPattern,
        message: line.trim().to_string(),
        record: None,
    }
}

/// What the record store said about a success phrase.
#[derive(Debug)]
enum Confirmation {
    Terminal(Job),
    Contradicted(Job),
    Unreachable,
}

/// Checks a success phrase against the record before it may claim the latch.
///
/// A record that is still queued or running on every attempt contradicts the
/// phrase. When no fetch succeeds the phrase is trusted.
async fn confirm_success(core: &SessionCore) -> Confirmation {
    let config = core.config();
    let max_attempts = config.reconcile_max_attempts.max(1);
    let mut last_seen = None;
    for attempt in 1..=max_attempts {
        match core.store().get_job(core.job_id()).await {
            Ok(job) if job.is_terminal() => return Confirmation::Terminal(job),
            Ok(job) => last_seen = Some(job),
            Err(error) => {
                tracing::warn!(
                    job_id = core.job_id(),
                    attempt,
                    max_attempts,
                    error = %error,
                    "success phrase confirmation fetch failed"
                );
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(linear_backoff_delay(config.reconcile_base_delay, attempt)).await;
        }
    }
    match last_seen {
        Some(job) => Confirmation::Contradicted(job),
        None => Confirmation::Unreachable,
    }
}

pub(crate) async fn run_output_watcher(
    core: Arc<SessionCore>,
    mut lines: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            tracing::debug!(job_id = core.job_id(), "output stream ended");
            return;
        };
        let Some(found) = core.config().patterns.match_line(&line) else {
            continue;
        };
        tracing::info!(
            job_id = core.job_id(),
            pattern = %found.pattern,
            kind = ?found.kind,
            "output line matched terminal phrase"
        );
        let signal = match found.kind {
            PatternKind::Failure => failure_signal(&line),
            PatternKind::Success => {
                let confirmation = tokio::select! {
                    _ = cancel.cancelled() => return,
                    confirmation = confirm_success(&core) => confirmation,
                };
                match confirmation {
                    Confirmation::Terminal(job) => {
                        match TerminalSignal::from_record(SignalSource::OutputWatcher, job) {
                            Some(signal) => signal,
                            None => continue,
                        }
                    }
                    Confirmation::Contradicted(job) => {
                        tracing::warn!(
                            job_id = core.job_id(),
                            status = job.status.as_str(),
                            "success phrase contradicted by record; still observing"
                        );
                        core.observe_record(SignalSource::OutputWatcher, job);
                        continue;
                    }
                    Confirmation::Unreachable => TerminalSignal::Success {
                        source: SignalSource::OutputWatcher,
                        payload: None,
                        record: None,
                    },
                }
            }
        };
        core.on_terminal_signal(signal);
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::{OutputPatternSet, PatternKind};

    #[test]
    fn functional_provisioning_phrases_match_case_insensitively() {
        let patterns = OutputPatternSet::provisioning();
        let found = patterns
            .match_line("[12:01:44] WordPress installation completed successfully")
            .expect("success phrase");
        assert_eq!(found.kind, PatternKind::Success);

        let found = patterns
            .match_line("ERROR: SSH connection timed out after 30s")
            .expect("failure phrase");
        assert_eq!(found.kind, PatternKind::Failure);
    }

    #[test]
    fn regression_single_common_words_do_not_match() {
        let patterns = OutputPatternSet::standard();
        for line in [
            "completed",
            "success",
            "Step 3 completed",
            "failed to resolve mirror, retrying",
            "Downloading wordpress-6.5.tar.gz",
            "apt-get install completed successfully for php-fpm",
            "Waiting until WordPress is ready at https://10.0.0.5",
            "Not all 48 items processed; retrying",
            "2 of all 48 items processed so far",
            "checking whether the site is now live at https://blog.example.com yet",
            "Retrying after ssh connection refused",
            "Bulk generation completed for 3 of 48 batches",
            "",
        ] {
            assert!(patterns.match_line(line).is_none(), "unexpected match: {line}");
        }
    }

    #[test]
    fn unit_failure_phrases_take_precedence() {
        let patterns = OutputPatternSet::new(
            &["deploy finished"],
            &["deploy finished with errors"],
        )
        .expect("patterns compile");
        let found = patterns
            .match_line("deploy finished with errors")
            .expect("match");
        assert_eq!(found.kind, PatternKind::Failure);
    }

    #[test]
    fn unit_generation_preset_matches_item_counts() {
        let patterns = OutputPatternSet::generation();
        assert_eq!(
            patterns
                .match_line("All 48 items have been processed")
                .map(|found| found.kind),
            Some(PatternKind::Success)
        );
        assert!(OutputPatternSet::empty().match_line("bulk generation completed").is_none());
        assert!(OutputPatternSet::new(&["("], &[]).is_err());
    }
}
