//! Subprocess spawn and stdout fan-in for one converse call.
//!
//! Every call spawns a fresh agent process — no pooling. The caller gets
//! a channel of [`Chunk`]s; cancelling the token kills the subprocess
//! and ends the stream without further chunks.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rd_domain::chunk::{Chunk, ConverseOptions, ConverseResult};
use rd_domain::config::{Config, AGENT_CONFIG_DIR_ENV};

use crate::event::translate_line;

/// Environment marker the agent sets inside its own sessions. Spawning
/// with it present makes the child believe it is nested.
const IN_SESSION_MARKER: &str = "CLAUDECODE";

/// Bridge to the agent CLI.
#[derive(Debug, Clone)]
pub struct AgentBridge {
    binary: PathBuf,
    config_dir: Option<PathBuf>,
}

impl AgentBridge {
    pub fn new(binary: impl Into<PathBuf>, config_dir: Option<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_dir,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.agent.binary.clone(), config.agent.config_dir.clone())
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    /// Stream one agent invocation.
    ///
    /// Chunks arrive in subprocess order. Unless the token is cancelled
    /// first, the final chunk is always a single `Result` — synthesized
    /// when the process dies without reporting one.
    pub fn converse(
        &self,
        instruction: &str,
        opts: ConverseOptions,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Chunk> {
        let (tx, rx) = mpsc::channel::<Chunk>(64);

        // The agent rewrites its own config dir; running a session from
        // inside it corrupts the log layout.
        if let Some(ref dir) = self.config_dir {
            if opts.cwd.starts_with(dir) {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _ = tx
                        .send(Chunk::Result(ConverseResult::error(
                            "refusing to run inside the agent config directory",
                        )))
                        .await;
                });
                return rx;
            }
        }

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(build_args(instruction, &opts))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_remove(IN_SESSION_MARKER)
            .kill_on_drop(true);
        if !opts.cwd.as_os_str().is_empty() {
            cmd.current_dir(&opts.cwd);
        }
        if let Some(ref dir) = self.config_dir {
            cmd.env(AGENT_CONFIG_DIR_ENV, dir);
        }

        let binary = self.binary.clone();
        tokio::spawn(async move {
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    tracing::error!(binary = %binary.display(), error = %e, "agent spawn failed");
                    let _ = tx
                        .send(Chunk::Result(ConverseResult::error(format!(
                            "spawning {}: {e}",
                            binary.display()
                        ))))
                        .await;
                    return;
                }
            };

            // stderr is drained concurrently so the child never blocks
            // on a full pipe.
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        if !line.trim().is_empty() {
                            tracing::debug!(stream = "agent-stderr", "{line}");
                        }
                    }
                });
            }

            let Some(stdout) = child.stdout.take() else {
                let _ = tx
                    .send(Chunk::Result(ConverseResult::error(
                        "failed to capture agent stdout",
                    )))
                    .await;
                return;
            };
            let mut lines = BufReader::new(stdout).lines();
            let mut result_sent = false;

            loop {
                let line = tokio::select! {
                    line = lines.next_line() => line,
                    _ = cancel.cancelled() => {
                        tracing::debug!("converse cancelled, killing agent");
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        return;
                    }
                };

                match line {
                    Ok(Some(line)) => {
                        for chunk in translate_line(&line) {
                            let is_result = matches!(chunk, Chunk::Result(_));
                            if tx.send(chunk).await.is_err() {
                                // Receiver gone: tear the child down.
                                let _ = child.start_kill();
                                let _ = child.wait().await;
                                return;
                            }
                            if is_result {
                                result_sent = true;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "reading agent stdout failed");
                        break;
                    }
                }
            }

            let status = child.wait().await;
            if !result_sent {
                let detail = match status {
                    Ok(status) => format!("agent exited without a result ({status})"),
                    Err(e) => format!("agent exited without a result: {e}"),
                };
                let _ = tx.send(Chunk::Result(ConverseResult::error(detail))).await;
            }
        });

        rx
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// CLI arguments for one invocation. The instruction is always last.
pub fn build_args(instruction: &str, opts: &ConverseOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--print".into(),
        "--verbose".into(),
        "--output-format".into(),
        "stream-json".into(),
        "--include-partial-messages".into(),
    ];

    if let Some(ref model) = opts.model {
        args.push("--model".into());
        args.push(model.clone());
    }
    if let Some(ref prompt) = opts.system_prompt {
        args.push("--append-system-prompt".into());
        args.push(prompt.clone());
    }
    if let Some(mode) = opts.permission_mode {
        args.push("--permission-mode".into());
        args.push(mode.as_str().into());
    }
    if let Some(ref session) = opts.session_id {
        args.push("--resume".into());
        args.push(session.clone());
        if opts.fork {
            args.push("--fork-session".into());
        }
    }
    if !opts.allowed_tools.is_empty() {
        args.push("--allowed-tools".into());
        args.push(opts.allowed_tools.join(","));
    }
    if !opts.disallowed_tools.is_empty() {
        args.push("--disallowed-tools".into());
        args.push(opts.disallowed_tools.join(","));
    }

    args.push(instruction.to_owned());
    args
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use rd_domain::chunk::PermissionMode;

    #[test]
    fn args_minimal() {
        let args = build_args("say hi", &ConverseOptions::default());
        assert_eq!(args.last().unwrap(), "say hi");
        assert!(args.contains(&"--include-partial-messages".to_owned()));
        assert!(!args.contains(&"--resume".to_owned()));
    }

    #[test]
    fn args_full() {
        let opts = ConverseOptions {
            model: Some("m1".into()),
            system_prompt: Some("be brief".into()),
            session_id: Some("S1".into()),
            permission_mode: Some(PermissionMode::AcceptEdits),
            fork: true,
            allowed_tools: vec!["Bash".into(), "Edit".into()],
            disallowed_tools: vec!["WebSearch".into()],
            ..Default::default()
        };
        let args = build_args("do it", &opts);
        let joined = args.join(" ");
        assert!(joined.contains("--model m1"));
        assert!(joined.contains("--permission-mode acceptEdits"));
        assert!(joined.contains("--resume S1 --fork-session"));
        assert!(joined.contains("--allowed-tools Bash,Edit"));
        assert!(joined.contains("--disallowed-tools WebSearch"));
        assert_eq!(args.last().unwrap(), "do it");
    }

    #[test]
    fn fork_flag_requires_session() {
        let opts = ConverseOptions {
            fork: true,
            ..Default::default()
        };
        let args = build_args("x", &opts);
        assert!(!args.contains(&"--fork-session".to_owned()));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        /// Write a fake agent script that prints the given lines.
        fn fake_agent(dir: &std::path::Path, body: &str) -> PathBuf {
            let path = dir.join("agent.sh");
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "#!/bin/sh").unwrap();
            writeln!(file, "{body}").unwrap();
            let mut perms = file.metadata().unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        async fn drain(mut rx: mpsc::Receiver<Chunk>) -> Vec<Chunk> {
            let mut chunks = Vec::new();
            while let Some(chunk) = rx.recv().await {
                chunks.push(chunk);
            }
            chunks
        }

        #[tokio::test]
        async fn streams_chunks_in_order_with_single_result() {
            let dir = tempfile::tempdir().unwrap();
            let script = fake_agent(
                dir.path(),
                concat!(
                    r#"echo '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}}'"#,
                    "\n",
                    r#"echo '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":" there"}}}'"#,
                    "\n",
                    r#"echo '{"type":"result","session_id":"S1","is_error":false,"duration_ms":5,"total_cost_usd":0.001}'"#,
                ),
            );

            let bridge = AgentBridge::new(script, None);
            let rx = bridge.converse("hi", ConverseOptions::default(), CancellationToken::new());
            let chunks = drain(rx).await;

            assert_eq!(chunks.len(), 3);
            assert_eq!(chunks[0], Chunk::TextDelta { text: "Hi".into() });
            assert_eq!(chunks[1], Chunk::TextDelta { text: " there".into() });
            match &chunks[2] {
                Chunk::Result(result) => assert_eq!(result.session_id.as_deref(), Some("S1")),
                other => panic!("expected terminal result, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn synthesizes_result_when_agent_dies_silently() {
            let dir = tempfile::tempdir().unwrap();
            let script = fake_agent(
                dir.path(),
                concat!(
                    r#"echo '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"par"}}}'"#,
                    "\n",
                    "exit 3",
                ),
            );

            let bridge = AgentBridge::new(script, None);
            let rx = bridge.converse("hi", ConverseOptions::default(), CancellationToken::new());
            let chunks = drain(rx).await;

            assert_eq!(chunks.len(), 2);
            match &chunks[1] {
                Chunk::Result(result) => {
                    assert!(result.error.as_deref().unwrap().contains("without a result"));
                }
                other => panic!("expected synthetic result, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn spawn_failure_yields_error_result() {
            let bridge = AgentBridge::new("/nonexistent/agent-bin", None);
            let rx = bridge.converse("hi", ConverseOptions::default(), CancellationToken::new());
            let chunks = drain(rx).await;
            assert_eq!(chunks.len(), 1);
            match &chunks[0] {
                Chunk::Result(result) => assert!(result.error.is_some()),
                other => panic!("expected error result, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn cancellation_stops_the_stream_without_result() {
            let dir = tempfile::tempdir().unwrap();
            let script = fake_agent(
                dir.path(),
                concat!(
                    r#"echo '{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"x"}}}'"#,
                    "\n",
                    "sleep 30",
                ),
            );

            let bridge = AgentBridge::new(script, None);
            let cancel = CancellationToken::new();
            let mut rx = bridge.converse("hi", ConverseOptions::default(), cancel.clone());

            let first = rx.recv().await.unwrap();
            assert_eq!(first, Chunk::TextDelta { text: "x".into() });

            cancel.cancel();
            // The channel closes without a terminal result.
            assert!(rx.recv().await.is_none());
        }

        #[tokio::test]
        async fn refuses_cwd_inside_config_dir() {
            let dir = tempfile::tempdir().unwrap();
            let bridge = AgentBridge::new("claude", Some(dir.path().to_path_buf()));
            let opts = ConverseOptions {
                cwd: dir.path().join("projects/x"),
                ..Default::default()
            };
            let rx = bridge.converse("hi", opts, CancellationToken::new());
            let chunks = drain(rx).await;
            assert_eq!(chunks.len(), 1);
            match &chunks[0] {
                Chunk::Result(result) => {
                    assert!(result.error.as_deref().unwrap().contains("config directory"));
                }
                other => panic!("expected refusal, got {other:?}"),
            }
        }
    }
}
