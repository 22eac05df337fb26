use std::io::Write;

use anyhow::{Context, Result};
use jobwatch_observer::{JobCompletion, JobFailure, ProgressUpdate};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum RenderedEvent<'a> {
    Progress(&'a ProgressUpdate),
    Completed(&'a JobCompletion),
    Failed(&'a JobFailure),
    Detached { job_id: &'a str, message: &'a str },
}

const DETACHED_MESSAGE: &str = "stopped watching; processing continues in the background";

/// Writes observer events either as human-readable lines or as JSON lines.
pub(crate) struct Renderer<W: Write> {
    out: W,
    json: bool,
}

impl<W: Write> Renderer<W> {
    pub(crate) fn new(out: W, json: bool) -> Self {
        Self { out, json }
    }

    pub(crate) fn progress(&mut self, update: &ProgressUpdate) -> Result<()> {
        if self.json {
            return self.write_json(&RenderedEvent::Progress(update));
        }
        let step = update
            .current_step
            .as_deref()
            .map(|step| format!(" - {step}"))
            .unwrap_or_default();
        let line = format!(
            "[{:>3}%] {} {}/{}{step} ({})",
            update.progress.percentage,
            update.status,
            update.progress.current,
            update.progress.total,
            update.source
        );
        self.write_line(&line)
    }

    pub(crate) fn completed(&mut self, completion: &JobCompletion) -> Result<()> {
        if self.json {
            return self.write_json(&RenderedEvent::Completed(completion));
        }
        self.write_line(&format!(
            "job {} completed (via {})",
            completion.job_id, completion.source
        ))?;
        if !completion.result.is_null() {
            let result = render_result(&completion.result)?;
            self.write_line(&result)?;
        }
        Ok(())
    }

    pub(crate) fn failed(&mut self, failure: &JobFailure) -> Result<()> {
        if self.json {
            return self.write_json(&RenderedEvent::Failed(failure));
        }
        self.write_line(&format!(
            "job {} failed ({}, via {}): {}",
            failure.job_id, failure.kind, failure.source, failure.message
        ))
    }

    pub(crate) fn detached(&mut self, job_id: &str) -> Result<()> {
        if self.json {
            return self.write_json(&RenderedEvent::Detached {
                job_id,
                message: DETACHED_MESSAGE,
            });
        }
        self.write_line(&format!("job {job_id}: {DETACHED_MESSAGE}"))
    }

    fn write_json(&mut self, event: &RenderedEvent<'_>) -> Result<()> {
        let line = serde_json::to_string(event).context("failed to encode event")?;
        self.write_line(&line)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{line}").context("failed to write output")?;
        self.out.flush().context("failed to flush output")
    }
}

fn render_result(result: &Value) -> Result<String> {
    match result {
        Value::String(text) => Ok(text.clone()),
        other => serde_json::to_string_pretty(other).context("failed to encode result"),
    }
}
