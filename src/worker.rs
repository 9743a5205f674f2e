use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::config::{CommandSpec, WorkerConfig};
use crate::diagnostics::{self, Kind};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lines of worker stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Text,
    Image,
}

/// The single request a session may have outstanding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRequest {
    pub kind: RequestKind,
    /// User text for `Text`, image path for `Image`.
    pub payload: String,
    /// Text typed alongside an image.
    pub context: Option<String>,
}

impl WorkRequest {
    pub fn text(text: impl Into<String>) -> Self {
        WorkRequest {
            kind: RequestKind::Text,
            payload: text.into(),
            context: None,
        }
    }

    pub fn image(path: &Path, context: Option<String>) -> Self {
        WorkRequest {
            kind: RequestKind::Image,
            payload: path.display().to_string(),
            context,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReply {
    pub text: String,
    pub image: Option<PathBuf>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("could not start `{program}`: {reason}")]
    Spawn { program: String, reason: String },
    #[error("worker exited with {}", describe_exit(.code, .signal))]
    Exit {
        code: Option<i32>,
        signal: Option<i32>,
        stderr: String,
    },
    #[error("worker did not finish within {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("lost contact with worker: {0}")]
    Io(String),
}

fn describe_exit(code: &Option<i32>, signal: &Option<i32>) -> String {
    match (code, signal) {
        (Some(code), _) => format!("code {}", code),
        (None, Some(signal)) => format!("signal {}", signal),
        (None, None) => "an unknown status".to_string(),
    }
}

/// Out-of-process collaborator that answers one request per invocation.
pub trait ExternalWorker: Send + Sync {
    fn invoke(&self, request: WorkRequest) -> BoxFuture<'static, Result<WorkerReply, BridgeError>>;
}

/// Starts a fresh process for every request; nothing is pooled or reused.
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    config: Arc<WorkerConfig>,
}

impl ProcessWorker {
    pub fn new(config: WorkerConfig) -> Self {
        ProcessWorker {
            config: Arc::new(config),
        }
    }
}

impl ExternalWorker for ProcessWorker {
    fn invoke(&self, request: WorkRequest) -> BoxFuture<'static, Result<WorkerReply, BridgeError>> {
        let config = self.config.clone();
        Box::pin(async move { run(&config, request).await })
    }
}

async fn run(config: &WorkerConfig, request: WorkRequest) -> Result<WorkerReply, BridgeError> {
    let spec = match request.kind {
        RequestKind::Text => &config.text,
        RequestKind::Image => &config.image,
    };
    let mut cmd = build_command(spec, &request);
    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    tracing::debug!(program = %spec.program, kind = ?request.kind, "starting worker");
    let mut child = cmd.spawn().map_err(|e| BridgeError::Spawn {
        program: spec.program.clone(),
        reason: e.to_string(),
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BridgeError::Io("worker stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BridgeError::Io("worker stderr was not captured".to_string()))?;

    let finished = async {
        let (output, stderr_tail, status) =
            tokio::join!(read_all(stdout), drain_stderr(stderr), child.wait());
        Ok::<_, std::io::Error>((output?, stderr_tail, status?))
    };

    let waited = match config.timeout() {
        Some(limit) => tokio::time::timeout(limit, finished)
            .await
            .map_err(|_| BridgeError::TimedOut(limit))?,
        None => finished.await,
    };
    let (output, stderr_tail, status) = waited.map_err(|e| BridgeError::Io(e.to_string()))?;

    if !status.success() {
        let (code, signal) = exit_parts(&status);
        return Err(BridgeError::Exit {
            code,
            signal,
            stderr: stderr_tail,
        });
    }

    diagnostics::record(
        Kind::Worker,
        format!("`{}` answered with {} bytes", spec.program, output.len()),
    );
    Ok(interpret_output(config, request.kind, &output))
}

fn build_command(spec: &CommandSpec, request: &WorkRequest) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).arg(&request.payload);
    if let Some(context) = &request.context {
        cmd.arg(context);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

async fn read_all(mut stdout: tokio::process::ChildStdout) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    stdout.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Read stderr to EOF. Lines are decoded lossily so a stray non-UTF-8 byte
/// never stops the drain; closing the pipe early would kill the worker with
/// SIGPIPE on its next write.
async fn drain_stderr<R: AsyncRead + Unpin>(stderr: R) -> String {
    let mut reader = BufReader::new(stderr);
    let mut raw = Vec::new();
    let mut tail: Vec<String> = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("stderr read failed: {}", e);
                break;
            }
        }
        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
        if line.trim().is_empty() {
            continue;
        }
        tracing::debug!(target: "landmark_chat::worker::stderr", "{}", line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.remove(0);
        }
        tail.push(line);
    }
    tail.join("\n")
}

#[cfg(unix)]
fn exit_parts(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

#[cfg(not(unix))]
fn exit_parts(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}

/// Turn raw stdout into a reply. Output is decoded as UTF-8, the encoding
/// the worker scripts reconfigure their stdout to.
fn interpret_output(config: &WorkerConfig, kind: RequestKind, output: &[u8]) -> WorkerReply {
    let decoded = String::from_utf8_lossy(output);

    let mut reported = None;
    let text = match config.image_marker.as_deref().filter(|m| !m.is_empty()) {
        Some(marker) => {
            let mut kept = Vec::new();
            for line in decoded.lines() {
                match line.trim_start().strip_prefix(marker) {
                    Some(path) if !path.trim().is_empty() => {
                        reported = Some(PathBuf::from(path.trim()));
                    }
                    Some(_) => {}
                    None => kept.push(line),
                }
            }
            kept.join("\n")
        }
        None => decoded.into_owned(),
    };

    let image = reported.or_else(|| match kind {
        RequestKind::Text => config.generated_image.clone(),
        RequestKind::Image => None,
    });

    WorkerReply {
        text: text.trim_end().to_string(),
        image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(marker: Option<&str>, generated: Option<&str>) -> WorkerConfig {
        WorkerConfig {
            image_marker: marker.map(str::to_string),
            generated_image: generated.map(PathBuf::from),
            ..WorkerConfig::default()
        }
    }

    #[test]
    fn test_output_is_trimmed_and_decoded() {
        let reply = interpret_output(&config_with(None, None), RequestKind::Text, "### Park Güell\nNice.\n\n".as_bytes());
        assert_eq!(reply.text, "### Park Güell\nNice.");
        assert_eq!(reply.image, None);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let reply = interpret_output(&config_with(None, None), RequestKind::Text, b"caf\xff");
        assert_eq!(reply.text, "caf\u{fffd}");
    }

    #[test]
    fn test_static_image_only_on_text_requests() {
        let config = config_with(None, Some("../data/generatedmap.png"));
        let text = interpret_output(&config, RequestKind::Text, b"map ready");
        assert_eq!(text.image, Some(PathBuf::from("../data/generatedmap.png")));

        let image = interpret_output(&config, RequestKind::Image, b"The landmark from the image is X");
        assert_eq!(image.image, None);
    }

    #[test]
    fn test_marker_line_names_image() {
        let config = config_with(Some("IMAGE:"), Some("/static.png"));
        let reply = interpret_output(&config, RequestKind::Text, b"Here is a cat\nIMAGE: /tmp/cat.png\n");
        assert_eq!(reply.text, "Here is a cat");
        assert_eq!(reply.image, Some(PathBuf::from("/tmp/cat.png")));
    }

    #[tokio::test]
    async fn test_stderr_tail_decodes_lossily() {
        let input: &[u8] = b"first\n\xff bad\n\nlast";
        assert_eq!(drain_stderr(input).await, "first\n\u{fffd} bad\nlast");
    }

    #[test]
    fn test_exit_error_message() {
        let err = BridgeError::Exit {
            code: Some(2),
            signal: None,
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "worker exited with code 2");

        let err = BridgeError::Exit {
            code: None,
            signal: Some(9),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "worker exited with signal 9");
    }

    #[test]
    fn test_image_request_carries_context() {
        let request = WorkRequest::image(Path::new("/img/x.png"), Some("what is this".into()));
        assert_eq!(request.kind, RequestKind::Image);
        assert_eq!(request.payload, "/img/x.png");
        assert_eq!(request.context.as_deref(), Some("what is this"));
    }

    #[cfg(unix)]
    mod process {
        use super::*;

        fn sh(script: &str) -> CommandSpec {
            CommandSpec::new("sh", &["-c", script])
        }

        fn worker(text: CommandSpec, timeout_secs: u64) -> ProcessWorker {
            ProcessWorker::new(WorkerConfig {
                text: text.clone(),
                image: text,
                timeout_secs,
                ..WorkerConfig::default()
            })
        }

        #[tokio::test]
        async fn test_payload_is_passed_as_argument() {
            // With `sh -c`, the first trailing argument becomes $0.
            let worker = worker(sh(r#"printf 'Here is %s' "$0""#), 10);
            let reply = worker.invoke(WorkRequest::text("a cat")).await.unwrap();
            assert_eq!(reply.text, "Here is a cat");
        }

        #[tokio::test]
        async fn test_chunks_are_coalesced() {
            let worker = worker(sh("echo one; sleep 0.1; echo two"), 10);
            let reply = worker.invoke(WorkRequest::text("x")).await.unwrap();
            assert_eq!(reply.text, "one\ntwo");
        }

        #[tokio::test]
        async fn test_empty_output_is_success() {
            let worker = worker(sh("true"), 10);
            let reply = worker.invoke(WorkRequest::text("x")).await.unwrap();
            assert_eq!(reply, WorkerReply::default());
        }

        #[tokio::test]
        async fn test_context_follows_image_path() {
            let worker = worker(sh(r#"printf '%s|%s' "$0" "$1""#), 10);
            let request = WorkRequest::image(Path::new("/img/x.png"), Some("hint".into()));
            let reply = worker.invoke(request).await.unwrap();
            assert_eq!(reply.text, "/img/x.png|hint");
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_error() {
            let worker = worker(sh("echo boom >&2; exit 3"), 10);
            let err = worker.invoke(WorkRequest::text("x")).await.unwrap_err();
            assert_eq!(
                err,
                BridgeError::Exit {
                    code: Some(3),
                    signal: None,
                    stderr: "boom".to_string(),
                }
            );
        }

        #[tokio::test]
        async fn test_invalid_utf8_on_stderr_keeps_draining() {
            let worker = worker(
                sh(r#"printf '\377\n' >&2; sleep 0.3; echo warn >&2; echo warn >&2; echo warn >&2; echo ok"#),
                10,
            );
            let reply = worker.invoke(WorkRequest::text("x")).await.unwrap();
            assert_eq!(reply.text, "ok");
        }

        #[tokio::test]
        async fn test_success_is_recorded_as_worker_diagnostic() {
            let worker = worker(sh("echo fine"), 10);
            worker.invoke(WorkRequest::text("x")).await.unwrap();
            assert!(diagnostics::recent(50)
                .iter()
                .any(|e| e.kind == Kind::Worker && e.text.contains("answered")));
        }

        #[tokio::test]
        async fn test_killed_by_signal() {
            let worker = worker(sh("kill -9 $$"), 10);
            let err = worker.invoke(WorkRequest::text("x")).await.unwrap_err();
            assert!(matches!(err, BridgeError::Exit { code: None, signal: Some(9), .. }));
        }

        #[tokio::test]
        async fn test_missing_program_is_spawn_error() {
            let worker = worker(CommandSpec::new("/nonexistent/landmark-worker", &[]), 10);
            let err = worker.invoke(WorkRequest::text("x")).await.unwrap_err();
            assert!(matches!(err, BridgeError::Spawn { .. }));
        }

        #[tokio::test]
        async fn test_timeout() {
            let worker = worker(sh("sleep 5"), 1);
            let err = worker.invoke(WorkRequest::text("x")).await.unwrap_err();
            assert_eq!(err, BridgeError::TimedOut(Duration::from_secs(1)));
        }

        #[tokio::test]
        async fn test_working_dir() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("answer.txt"), "from the data dir").unwrap();
            let worker = ProcessWorker::new(WorkerConfig {
                text: sh("cat answer.txt"),
                working_dir: Some(dir.path().to_path_buf()),
                ..WorkerConfig::default()
            });
            let reply = worker.invoke(WorkRequest::text("x")).await.unwrap();
            assert_eq!(reply.text, "from the data dir");
        }
    }
}
