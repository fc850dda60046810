use super::collector::ContextReport;
use super::{io_error, DebugError};
use crate::shared::fs_atomic::write_json_atomic;
use crate::shared::process::{run_with_timeout, CommandSpec};
use crate::workspace::WorkflowDefinition;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub const REPORT_PATH_ENV: &str = "FLOWLOOP_REPORT_PATH";
pub const DEFINITION_PATH_ENV: &str = "FLOWLOOP_DEFINITION_PATH";
pub const WORKFLOW_ENV: &str = "FLOWLOOP_WORKFLOW";

#[derive(Debug, Clone, PartialEq)]
pub enum FixProposal {
    Updated(WorkflowDefinition),
    NoFix { reason: String },
}

/// Proposes a new definition from a failed iteration's report.
pub trait Fixer {
    fn propose(
        &self,
        report: &ContextReport,
        current: &WorkflowDefinition,
    ) -> Result<FixProposal, DebugError>;
}

/// Delegates to an external program. The program receives the report and a
/// writable copy of the current definition through environment variables and
/// edits the copy in place; exiting non-zero or leaving it untouched means no
/// fix.
#[derive(Debug, Clone)]
pub struct CommandFixer {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl CommandFixer {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            work_dir: work_dir.into(),
            timeout,
        }
    }

    /// Splits a shell-style command line on whitespace.
    pub fn from_command_line(
        command: &str,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Result<Self, DebugError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| DebugError::Fixer("fix command is empty".to_string()))?;
        Ok(Self::new(program, parts.collect(), work_dir, timeout))
    }
}

impl Fixer for CommandFixer {
    fn propose(
        &self,
        report: &ContextReport,
        current: &WorkflowDefinition,
    ) -> Result<FixProposal, DebugError> {
        let report_path = self.work_dir.join("fix_report.json");
        let definition_path = self
            .work_dir
            .join(format!("{}.json", current.name().as_str()));
        write_json_atomic(&report_path, report).map_err(|e| io_error(&report_path, e))?;
        crate::shared::fs_atomic::atomic_write_file(&definition_path, &current.canonical_bytes())
            .map_err(|e| io_error(&definition_path, e))?;

        let mut spec = CommandSpec::new(self.program.clone(), self.args.clone(), self.timeout);
        spec.cwd = Some(self.work_dir.clone());
        spec.env.insert(
            REPORT_PATH_ENV.to_string(),
            report_path.display().to_string(),
        );
        spec.env.insert(
            DEFINITION_PATH_ENV.to_string(),
            definition_path.display().to_string(),
        );
        spec.env
            .insert(WORKFLOW_ENV.to_string(), current.name().to_string());

        let output =
            run_with_timeout(&spec).map_err(|err| DebugError::Fixer(err.to_string()))?;
        if !output.success {
            return Ok(FixProposal::NoFix {
                reason: format!(
                    "fix command exited with {:?}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }
        reload_if_changed(&definition_path, current)
    }
}

/// Asks a human to edit the source file, then reloads it.
pub struct PromptFixer<R, W> {
    source_path: PathBuf,
    input: Mutex<R>,
    output: Mutex<W>,
}

impl<R: BufRead, W: Write> PromptFixer<R, W> {
    pub fn new(source_path: impl Into<PathBuf>, input: R, output: W) -> Self {
        Self {
            source_path: source_path.into(),
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }
}

impl<R: BufRead, W: Write> Fixer for PromptFixer<R, W> {
    fn propose(
        &self,
        report: &ContextReport,
        current: &WorkflowDefinition,
    ) -> Result<FixProposal, DebugError> {
        {
            let mut out = self
                .output
                .lock()
                .map_err(|_| DebugError::Fixer("prompt output lock poisoned".to_string()))?;
            let write = |out: &mut W| -> std::io::Result<()> {
                writeln!(out, "{}", report.summary)?;
                if let Some(path) = &report.evidence_path {
                    writeln!(out, "evidence: {}", path.display())?;
                }
                write!(
                    out,
                    "edit {} and press Enter to retry, or type q to stop: ",
                    self.source_path.display()
                )?;
                out.flush()
            };
            write(&mut out).map_err(|e| io_error(&self.source_path, e))?;
        }

        let mut line = String::new();
        let read = self
            .input
            .lock()
            .map_err(|_| DebugError::Fixer("prompt input lock poisoned".to_string()))?
            .read_line(&mut line)
            .map_err(|e| io_error(&self.source_path, e))?;
        let answer = line.trim();
        if read == 0 || answer.eq_ignore_ascii_case("q") || answer.eq_ignore_ascii_case("quit") {
            return Ok(FixProposal::NoFix {
                reason: "stopped at prompt".to_string(),
            });
        }
        reload_if_changed(&self.source_path, current)
    }
}

fn reload_if_changed(
    path: &Path,
    current: &WorkflowDefinition,
) -> Result<FixProposal, DebugError> {
    let raw = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let document = serde_json::from_str(&raw).map_err(|e| super::json_error(path, e))?;
    let candidate = WorkflowDefinition::new(current.name().clone(), document);
    if candidate.digest() == current.digest() {
        return Ok(FixProposal::NoFix {
            reason: "definition unchanged".to_string(),
        });
    }
    Ok(FixProposal::Updated(candidate))
}
