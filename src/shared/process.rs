use std::collections::BTreeMap;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: BTreeMap::new(),
            timeout,
        }
    }

    pub fn command_form(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        format!("{} {}", self.program, self.args.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("command `{program}` not found")]
    MissingBinary { program: String },
    #[error("command `{command}` timed out after {timeout_ms}ms")]
    Timeout {
        command: String,
        timeout_ms: u64,
        stdout: String,
        stderr: String,
    },
    #[error("command `{command}` failed to run: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

const OUTPUT_GRACE: Duration = Duration::from_millis(100);

/// Spawns `spec`, drains both pipes on reader threads and kills the child's
/// process group once `spec.timeout` elapses. Output still held open by an
/// orphaned descendant is abandoned after a short grace period.
pub fn run_with_timeout(spec: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
    let command_form = spec.command_form();
    let io_error = |source: std::io::Error| ProcessError::Io {
        command: command_form.clone(),
        source,
    };

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &spec.cwd {
        command.current_dir(cwd);
    }
    for (k, v) in &spec.env {
        command.env(k, v);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ProcessError::MissingBinary {
                program: spec.program.clone(),
            })
        }
        Err(err) => return Err(io_error(err)),
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io_error(std::io::Error::other("missing stdout pipe")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io_error(std::io::Error::other("missing stderr pipe")))?;

    let stdout_rx = spawn_reader(stdout);
    let stderr_rx = spawn_reader(stderr);

    let start = Instant::now();
    let exit_status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() > spec.timeout {
                    kill_process_group(child.id());
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProcessError::Timeout {
                        command: command_form.clone(),
                        timeout_ms: spec.timeout.as_millis() as u64,
                        stdout: collect(&stdout_rx, OUTPUT_GRACE),
                        stderr: collect(&stderr_rx, OUTPUT_GRACE),
                    });
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => return Err(io_error(err)),
        }
    };

    // A background descendant may keep the pipes open after the child exits.
    let stdout = collect(&stdout_rx, OUTPUT_GRACE);
    let stderr = collect(&stderr_rx, OUTPUT_GRACE);
    Ok(ProcessOutput {
        exit_code: exit_status.code(),
        success: exit_status.success(),
        stdout,
        stderr,
        elapsed: start.elapsed(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Gathers chunks until the pipe closes or `wait` runs out.
fn collect(rx: &Receiver<Vec<u8>>, wait: Duration) -> String {
    let deadline = Instant::now() + wait;
    let mut bytes = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(_) => break,
        }
    }
    while let Ok(chunk) = rx.try_recv() {
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn kill_process_group(pid: u32) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill")
            .arg("-KILL")
            .arg("--")
            .arg(format!("-{pid}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}
