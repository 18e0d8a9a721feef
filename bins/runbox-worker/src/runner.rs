/// Job Runner - compiles (if needed) and runs one submitted program
///
/// **Per job:**
/// 1. Fresh temp directory holding only the source file
/// 2. Optional compile step, then the run step, both under ONE deadline
/// 3. stdin gets the job input and is then closed (EOF), even when empty
/// 4. stdout/stderr captured independently, each bounded to the output cap
///
/// Each child is its own process group leader; on timeout the whole group
/// is killed so forked helpers cannot outlive the job. Output pipes get a
/// short grace past the deadline; a descendant still holding them after that
/// turns the job into a timeout.
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use runbox_common::protocol::{JobMessage, JobReply};
use runbox_common::types::Language;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// How long pipes may stay open after the group is killed
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// How to turn a source file into a running program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub source_file: String,
    /// Run in the job directory before `run`; non-zero exit is a compile error
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl Toolchain {
    pub fn for_language(language: Language) -> Self {
        let source_file = language.source_filename().to_string();
        match language {
            // -u: unbuffered, so output written before a timeout is still captured
            Language::Python => Self {
                run: argv(&["python3", "-u", source_file.as_str()]),
                source_file,
                compile: None,
            },
            Language::Javascript => Self {
                run: argv(&["node", source_file.as_str()]),
                source_file,
                compile: None,
            },
            Language::Cpp => Self {
                compile: Some(argv(&["g++", "-O2", "-o", "main", source_file.as_str()])),
                run: argv(&["./main"]),
                source_file,
            },
        }
    }
}

/// What one child process did
#[derive(Debug, Default)]
struct ProcessOutcome {
    status: Option<ExitStatus>,
    stdout: String,
    stderr: String,
    timed_out: bool,
}

impl ProcessOutcome {
    fn succeeded(&self) -> bool {
        self.status.map(|s| s.success()).unwrap_or(false)
    }

    /// Note for a child that died from a signal
    fn signal_note(&self) -> Option<&'static str> {
        match self.status?.signal()? {
            9 => Some("Process killed (possibly exceeded the memory limit)"),
            11 => Some("Segmentation fault"),
            6 => Some("Aborted"),
            8 => Some("Floating point exception"),
            _ => None,
        }
    }
}

pub struct JobRunner {
    toolchain: Toolchain,
    job_timeout: Duration,
    max_output_bytes: usize,
    permits: Semaphore,
}

impl JobRunner {
    pub fn new(toolchain: Toolchain, job_timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            toolchain,
            job_timeout,
            max_output_bytes,
            // one job at a time per worker
            permits: Semaphore::new(1),
        }
    }

    /// Always produces exactly one reply
    pub async fn run(&self, job: &JobMessage) -> JobReply {
        let Ok(_permit) = self.permits.acquire().await else {
            return JobReply::internal("Executor error: worker is shutting down");
        };

        let started = Instant::now();
        let reply = match self.execute(job, started + self.job_timeout).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Job could not be executed");
                JobReply::internal(format!("Executor error: {}", e))
            }
        };
        info!(
            status = ?reply.status,
            timed_out = reply.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        );
        reply
    }

    async fn execute(&self, job: &JobMessage, deadline: Instant) -> std::io::Result<JobReply> {
        let workdir = tempfile::Builder::new().prefix("job-").tempdir()?;
        tokio::fs::write(workdir.path().join(&self.toolchain.source_file), &job.code).await?;

        if let Some(compile) = &self.toolchain.compile {
            let outcome = self.spawn(workdir.path(), compile, "", deadline).await?;
            if outcome.timed_out {
                return Ok(JobReply::timeout(self.job_timeout.as_secs(), String::new()));
            }
            if !outcome.succeeded() {
                let diagnostics = if outcome.stderr.is_empty() {
                    outcome.stdout
                } else {
                    outcome.stderr
                };
                return Ok(JobReply::compile_error(diagnostics));
            }
            debug!("Compilation succeeded");
        }

        let mut outcome = self.spawn(workdir.path(), &self.toolchain.run, &job.input, deadline).await?;
        if outcome.timed_out {
            return Ok(JobReply::timeout(self.job_timeout.as_secs(), outcome.stdout));
        }
        if outcome.succeeded() {
            return Ok(JobReply::success(outcome.stdout, outcome.stderr));
        }
        if let Some(note) = outcome.signal_note() {
            if !outcome.stderr.is_empty() && !outcome.stderr.ends_with('\n') {
                outcome.stderr.push('\n');
            }
            outcome.stderr.push_str(note);
        }
        Ok(JobReply::failure(outcome.stdout, outcome.stderr))
    }

    async fn spawn(
        &self,
        dir: &Path,
        argv: &[String],
        input: &str,
        deadline: Instant,
    ) -> std::io::Result<ProcessOutcome> {
        let Some((program, args)) = argv.split_first() else {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"));
        };

        let mut child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;
        let pgid = child.id().map(|id| Pid::from_raw(id as i32));

        let stdin = child.stdin.take();
        let input = input.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // a program that never reads its input closes the pipe early
                let _ = stdin.write_all(&input).await;
            }
        });
        let stdout_buf = Arc::new(Mutex::new(Captured::default()));
        let stderr_buf = Arc::new(Mutex::new(Captured::default()));
        let mut stdout = tokio::spawn(read_bounded(child.stdout.take(), self.max_output_bytes, stdout_buf.clone()));
        let mut stderr = tokio::spawn(read_bounded(child.stderr.take(), self.max_output_bytes, stderr_buf.clone()));

        let (status, mut timed_out) = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => (Some(status?), false),
            Err(_) => {
                warn!(program = %program, "Job deadline reached, killing process group");
                (None, true)
            }
        };
        // also reaps background children the program left behind
        if let Some(pgid) = pgid {
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                if e != nix::errno::Errno::ESRCH {
                    warn!(error = %e, "Failed to kill process group");
                }
            }
        }
        if timed_out {
            let _ = child.wait().await;
        }
        writer.abort();

        // a descendant that left the group can hold the pipes open
        let drain_deadline = deadline.max(Instant::now()) + DRAIN_GRACE;
        let drained = tokio::time::timeout_at(drain_deadline, async {
            let _ = (&mut stdout).await;
            let _ = (&mut stderr).await;
        })
        .await;
        if drained.is_err() {
            warn!(program = %program, "Output pipes still open after the deadline");
            stdout.abort();
            stderr.abort();
            timed_out = true;
        }

        Ok(ProcessOutcome {
            status,
            stdout: render(&stdout_buf),
            stderr: render(&stderr_buf),
            timed_out,
        })
    }
}

/// Bytes read from one pipe so far
#[derive(Debug, Default)]
struct Captured {
    kept: Vec<u8>,
    truncated: bool,
}

fn render(captured: &Mutex<Captured>) -> String {
    let captured = match captured.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let mut text = String::from_utf8_lossy(&captured.kept).into_owned();
    if captured.truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

/// Keep at most `max_bytes`, but drain the rest so the child never blocks on a full pipe
async fn read_bounded<R: AsyncRead + Unpin>(reader: Option<R>, max_bytes: usize, into: Arc<Mutex<Captured>>) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let Ok(mut captured) = into.lock() else {
                    break;
                };
                let room = max_bytes.saturating_sub(captured.kept.len());
                if n > room {
                    captured.truncated = true;
                }
                captured.kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbox_common::protocol::ReplyStatus;

    fn shell() -> Toolchain {
        Toolchain {
            source_file: "main.sh".to_string(),
            compile: None,
            run: argv(&["sh", "main.sh"]),
        }
    }

    fn runner(toolchain: Toolchain, timeout: Duration) -> JobRunner {
        JobRunner::new(toolchain, timeout, 1024 * 1024)
    }

    fn job(code: &str, input: &str) -> JobMessage {
        JobMessage {
            code: code.to_string(),
            input: input.to_string(),
        }
    }

    #[tokio::test]
    async fn test_successful_program() {
        let reply = runner(shell(), Duration::from_secs(5)).run(&job("echo 'Hello, World!'", "")).await;
        assert_eq!(reply.status, ReplyStatus::Success);
        assert_eq!(reply.output, "Hello, World!\n");
        assert_eq!(reply.error, None);
    }

    #[tokio::test]
    async fn test_input_is_fed_to_stdin() {
        let reply = runner(shell(), Duration::from_secs(5))
            .run(&job("read x; echo $((x * 2))", "21\n"))
            .await;
        assert!(reply.is_success());
        assert_eq!(reply.output, "42\n");
    }

    #[tokio::test]
    async fn test_empty_input_reads_eof() {
        let reply = runner(shell(), Duration::from_secs(5))
            .run(&job("if read x; then echo got; else echo eof; fi", ""))
            .await;
        assert_eq!(reply.output, "eof\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let reply = runner(shell(), Duration::from_secs(5))
            .run(&job("echo 'ZeroDivisionError: division by zero' >&2; exit 1", ""))
            .await;
        assert_eq!(reply.status, ReplyStatus::Error);
        assert!(reply.output.contains("ZeroDivisionError"));
        assert!(reply.error.unwrap().contains("ZeroDivisionError"));
        assert!(!reply.timed_out);
    }

    #[tokio::test]
    async fn test_silent_program_gets_placeholder() {
        let reply = runner(shell(), Duration::from_secs(5)).run(&job("true", "")).await;
        assert!(reply.is_success());
        assert_eq!(reply.output, "Code executed successfully with no output");
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let started = std::time::Instant::now();
        let reply = runner(shell(), Duration::from_millis(300))
            .run(&job("echo partial; sleep 30", ""))
            .await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(reply.timed_out);
        assert_eq!(reply.status, ReplyStatus::Error);
        assert!(reply.output.starts_with("partial\n"));
        assert!(reply.output.contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let started = std::time::Instant::now();
        let reply = runner(shell(), Duration::from_millis(300))
            .run(&job("sleep 30 & sleep 30 & wait", ""))
            .await;
        // pipes only close once every process in the group is gone
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(reply.timed_out);
    }

    #[tokio::test]
    async fn test_escaped_descendant_cannot_outlast_deadline() {
        let started = std::time::Instant::now();
        let reply = runner(shell(), Duration::from_millis(300))
            .run(&job("setsid sleep 5 &\nsleep 0.1\necho done", ""))
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(reply.timed_out);
        assert!(reply.output.starts_with("done\n"));
    }

    #[tokio::test]
    async fn test_output_is_bounded() {
        let runner = JobRunner::new(shell(), Duration::from_secs(5), 16);
        let reply = runner
            .run(&job("i=0; while [ $i -lt 1000 ]; do echo line$i; i=$((i+1)); done", ""))
            .await;
        assert!(reply.is_success());
        assert!(reply.output.ends_with(TRUNCATION_MARKER));
        assert_eq!(reply.output.len(), 16 + TRUNCATION_MARKER.len());
    }

    #[tokio::test]
    async fn test_compile_failure_is_compile_error() {
        let toolchain = Toolchain {
            source_file: "main.c".to_string(),
            compile: Some(argv(&["sh", "-c", "echo 'main.c:1:1: error: expected declaration' >&2; exit 1"])),
            run: argv(&["sh", "-c", "echo should-not-run"]),
        };
        let reply = runner(toolchain, Duration::from_secs(5)).run(&job("garbage", "")).await;
        assert_eq!(reply.status, ReplyStatus::Error);
        assert!(reply.output.starts_with("Compilation error:\n"));
        assert!(reply.output.contains("expected declaration"));
    }

    #[tokio::test]
    async fn test_compile_then_run_share_the_workdir() {
        let toolchain = Toolchain {
            source_file: "main.txt".to_string(),
            compile: Some(argv(&["sh", "-c", "cp main.txt built.txt"])),
            run: argv(&["cat", "built.txt"]),
        };
        let reply = runner(toolchain, Duration::from_secs(5)).run(&job("compiled ok", "")).await;
        assert!(reply.is_success());
        assert_eq!(reply.output, "compiled ok");
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_internal_error() {
        let toolchain = Toolchain {
            source_file: "main.x".to_string(),
            compile: None,
            run: argv(&["definitely-not-an-interpreter-xyz"]),
        };
        let reply = runner(toolchain, Duration::from_secs(5)).run(&job("x", "")).await;
        assert_eq!(reply.status, ReplyStatus::Error);
        assert!(reply.error.unwrap().starts_with("Executor error:"));
    }

    #[test]
    fn test_cpp_toolchain_compiles_first() {
        let cpp = Toolchain::for_language(Language::Cpp);
        assert_eq!(cpp.source_file, "main.cpp");
        assert!(cpp.compile.is_some());
        assert!(Toolchain::for_language(Language::Python).compile.is_none());
        assert_eq!(Toolchain::for_language(Language::Javascript).run[0], "node");
    }

    #[tokio::test]
    #[ignore] // Requires python3 on PATH
    async fn test_python_toolchain() {
        let reply = runner(Toolchain::for_language(Language::Python), Duration::from_secs(5))
            .run(&job("x = int(input())\nprint(x * 2)", "21"))
            .await;
        assert_eq!(reply.output, "42\n");
    }
}
