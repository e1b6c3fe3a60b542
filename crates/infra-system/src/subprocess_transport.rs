// Subprocess transport
// Runs the payload through a command template (local shell, ssh, ...) per target
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use fleet_core::domain::{CommandPayload, Target};
use fleet_core::port::{ExecutionHandle, RemoteState, RemoteStatus, Transport, TransportError};

pub const TARGET_PLACEHOLDER: &str = "{target}";
pub const SCRIPT_PLACEHOLDER: &str = "{script}";

/// Exit code reported when the child was killed by a signal
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// Subprocess transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessTransportConfig {
    /// argv template; `{target}` and `{script}` are substituted per target
    pub command: Vec<String>,
    /// Variables passed through from the parent environment (all others are cleared)
    pub env_allowlist: Vec<String>,
    /// At most this many bytes of stdout and of stderr are kept; the rest is discarded
    pub max_output_bytes: usize,
    /// Hard limit on a child's runtime; the child is killed when it expires
    pub max_runtime_ms: u64,
}

impl Default for SubprocessTransportConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                SCRIPT_PLACEHOLDER.to_string(),
            ],
            env_allowlist: vec!["PATH".to_string(), "HOME".to_string(), "USER".to_string()],
            max_output_bytes: 64 * 1024,
            max_runtime_ms: 10 * 60 * 1000,
        }
    }
}

enum Invocation {
    /// Child still running; dropping or firing the sender kills it
    Running(oneshot::Sender<()>),
    Exited(RemoteStatus),
}

type InvocationTable = HashMap<String, Invocation>;
type Invocations = Arc<Mutex<InvocationTable>>;

/// Subprocess transport
///
/// `send` spawns the child and returns at once; the exit is collected by a
/// background task and handed out by the next `poll`. An abandoned
/// invocation is killed and forgotten.
pub struct SubprocessTransport {
    config: SubprocessTransportConfig,
    invocations: Invocations,
}

impl SubprocessTransport {
    pub fn new(config: SubprocessTransportConfig) -> Self {
        Self {
            config,
            invocations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Invocations still tracked (running, or exited and not yet polled)
    pub fn tracked_invocations(&self) -> usize {
        self.invocations.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Render the argv for one target
    fn render(&self, target: &Target, script: &str) -> Result<Vec<String>, TransportError> {
        if self.config.command.is_empty() {
            return Err(TransportError::Rejected(
                "command template is empty".to_string(),
            ));
        }
        Ok(self
            .config
            .command
            .iter()
            .map(|arg| {
                arg.replace(TARGET_PLACEHOLDER, &target.id)
                    .replace(SCRIPT_PLACEHOLDER, script)
            })
            .collect())
    }

    /// Parent environment restricted to the allowlist
    fn filter_env(&self) -> HashMap<String, String> {
        std::env::vars()
            .filter(|(k, _)| self.config.env_allowlist.contains(k))
            .collect()
    }

    fn lock(&self) -> Result<MutexGuard<'_, InvocationTable>, TransportError> {
        self.invocations
            .lock()
            .map_err(|_| TransportError::Io("invocation table poisoned".to_string()))
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn send(
        &self,
        target: &Target,
        payload: &CommandPayload,
    ) -> Result<ExecutionHandle, TransportError> {
        let argv = self.render(target, &payload.script())?;

        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .env_clear()
            .envs(self.filter_env())
            .env("FLEET_TARGET_ID", &target.id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", argv[0], e)))?;

        let handle = ExecutionHandle {
            id: uuid::Uuid::new_v4().to_string(),
            target_id: target.id.clone(),
        };
        let (kill_tx, kill_rx) = oneshot::channel();
        self.lock()?
            .insert(handle.id.clone(), Invocation::Running(kill_tx));

        info!(
            target_id = %target.id,
            handle = %handle.id,
            program = %argv[0],
            pid = ?child.id(),
            "Subprocess started"
        );

        let invocations = Arc::clone(&self.invocations);
        let handle_id = handle.id.clone();
        let max_output = self.config.max_output_bytes;
        let max_runtime = Duration::from_millis(self.config.max_runtime_ms);
        tokio::spawn(async move {
            // Dropping `collect` drops the child, which kills it
            let status = tokio::select! {
                collected = timeout(max_runtime, collect(child, max_output)) => match collected {
                    Ok(Ok((exit, stdout, stderr))) => RemoteStatus::exited(
                        exit.code().unwrap_or(SIGNAL_EXIT_CODE),
                        lossy(&stdout),
                        lossy(&stderr),
                    ),
                    Ok(Err(e)) => RemoteStatus {
                        state: RemoteState::Failed,
                        stderr: format!("wait failed: {}", e),
                        ..RemoteStatus::in_progress()
                    },
                    Err(_) => {
                        warn!(
                            handle = %handle_id,
                            max_runtime_ms = max_runtime.as_millis() as u64,
                            "Subprocess killed after max runtime"
                        );
                        RemoteStatus {
                            state: RemoteState::TimedOut,
                            ..RemoteStatus::in_progress()
                        }
                    }
                },
                _ = kill_rx => {
                    info!(handle = %handle_id, "Subprocess killed, invocation abandoned");
                    return;
                }
            };
            debug!(
                handle = %handle_id,
                state = ?status.state,
                code = ?status.response_code,
                "Subprocess exited"
            );
            if let Ok(mut table) = invocations.lock() {
                // Abandoned while exiting: nobody will poll it
                if let Some(entry) = table.get_mut(&handle_id) {
                    *entry = Invocation::Exited(status);
                }
            }
        });

        Ok(handle)
    }

    async fn poll(&self, handle: &ExecutionHandle) -> Result<RemoteStatus, TransportError> {
        let mut table = self.lock()?;
        match table.get(&handle.id) {
            None => return Err(TransportError::UnknownHandle(handle.id.clone())),
            Some(Invocation::Running(_)) => return Ok(RemoteStatus::in_progress()),
            Some(Invocation::Exited(_)) => {}
        }
        // Terminal status is handed out once
        match table.remove(&handle.id) {
            Some(Invocation::Exited(status)) => Ok(status),
            _ => Err(TransportError::UnknownHandle(handle.id.clone())),
        }
    }

    async fn abandon(&self, handle: &ExecutionHandle) {
        let entry = match self.lock() {
            Ok(mut table) => table.remove(&handle.id),
            Err(e) => {
                warn!(handle = %handle.id, error = %e, "Cannot abandon invocation");
                return;
            }
        };
        if let Some(Invocation::Running(kill)) = entry {
            debug!(handle = %handle.id, target_id = %handle.target_id, "Killing abandoned subprocess");
            let _ = kill.send(());
        }
    }
}

/// Capture stdout/stderr (each capped at `max` bytes, the rest discarded) and wait
async fn collect(mut child: Child, max: usize) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr) = tokio::try_join!(read_capped(stdout, max), read_capped(stderr, max))?;
    let exit = child.wait().await?;
    Ok((exit, stdout, stderr))
}

/// Read at most `max` bytes, then drain the stream so the writer never blocks
async fn read_capped<R>(reader: Option<R>, max: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::with_capacity(max.min(8 * 1024));
    (&mut reader).take(max as u64).read_to_end(&mut buf).await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(buf)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn transport(command: &[&str]) -> SubprocessTransport {
        SubprocessTransport::new(SubprocessTransportConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            ..SubprocessTransportConfig::default()
        })
    }

    async fn run(transport: &SubprocessTransport, target: &str, commands: &[&str]) -> RemoteStatus {
        let payload = CommandPayload::new(commands.iter().copied()).unwrap();
        let handle = transport
            .send(&Target::new(target, true), &payload)
            .await
            .unwrap();
        loop {
            let status = transport.poll(&handle).await.unwrap();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_script_runs_every_command() {
        let t = SubprocessTransport::new(SubprocessTransportConfig::default());
        let status = run(&t, "local", &["echo one", "echo two"]).await;

        assert_eq!(status.state, RemoteState::Success);
        assert_eq!(status.response_code, Some(0));
        assert_eq!(status.stdout, "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let t = SubprocessTransport::new(SubprocessTransportConfig::default());
        let status = run(&t, "local", &["echo oops >&2", "exit 3"]).await;

        assert_eq!(status.state, RemoteState::Failed);
        assert_eq!(status.response_code, Some(3));
        assert_eq!(status.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_template_substitutes_target() {
        let t = transport(&["sh", "-c", "echo {target}; {script}"]);
        let status = run(&t, "i-0abc", &["echo $FLEET_TARGET_ID"]).await;

        assert_eq!(status.stdout, "i-0abc\ni-0abc\n");
    }

    #[tokio::test]
    async fn test_env_is_allowlisted() {
        std::env::set_var("FLEET_TEST_SECRET", "hunter2");
        let t = SubprocessTransport::new(SubprocessTransportConfig::default());
        let status = run(&t, "local", &["echo ${FLEET_TEST_SECRET:-unset}"]).await;

        assert_eq!(status.stdout, "unset\n");
    }

    #[tokio::test]
    async fn test_output_is_truncated() {
        let t = SubprocessTransport::new(SubprocessTransportConfig {
            max_output_bytes: 4,
            ..SubprocessTransportConfig::default()
        });
        let status = run(&t, "local", &["echo abcdefgh"]).await;
        assert_eq!(status.stdout, "abcd");
    }

    #[tokio::test]
    async fn test_max_runtime_kills_child() {
        let t = SubprocessTransport::new(SubprocessTransportConfig {
            max_runtime_ms: 100,
            ..SubprocessTransportConfig::default()
        });
        let status = run(&t, "local", &["sleep 10"]).await;
        assert_eq!(status.state, RemoteState::TimedOut);
    }

    #[tokio::test]
    async fn test_missing_program_is_unreachable() {
        let t = transport(&["/nonexistent/fleet-agent", "{script}"]);
        let payload = CommandPayload::new(["true"]).unwrap();

        let err = t.send(&Target::new("i-1", true), &payload).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_empty_template_is_rejected() {
        let t = transport(&[]);
        let payload = CommandPayload::new(["true"]).unwrap();

        let err = t.send(&Target::new("i-1", true), &payload).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let t = SubprocessTransport::new(SubprocessTransportConfig::default());
        let handle = ExecutionHandle {
            id: "nope".to_string(),
            target_id: "i-1".to_string(),
        };
        assert!(matches!(
            t.poll(&handle).await,
            Err(TransportError::UnknownHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_large_output_is_capped_while_reading() {
        let t = SubprocessTransport::new(SubprocessTransportConfig {
            max_output_bytes: 1024,
            ..SubprocessTransportConfig::default()
        });
        // ~8 MiB on stdout, well past the pipe buffer
        let status = run(&t, "local", &["head -c 8388608 /dev/zero | tr '\\0' x", "echo tail >&2"]).await;

        assert_eq!(status.state, RemoteState::Success);
        assert_eq!(status.stdout.len(), 1024);
        assert!(status.stdout.bytes().all(|b| b == b'x'));
        assert_eq!(status.stderr, "tail\n");
    }

    #[tokio::test]
    async fn test_read_capped_is_lossy_safe() {
        // Cutting inside a multi-byte char must not panic
        let cut = read_capped(Some("é".as_bytes()), 1).await.unwrap();
        assert_eq!(lossy(&cut), "\u{FFFD}");
        let whole = read_capped(Some(&b"abc"[..]), 10).await.unwrap();
        assert_eq!(lossy(&whole), "abc");
        assert!(read_capped(None::<&[u8]>, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abandon_kills_child_and_forgets_handle() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let t = SubprocessTransport::new(SubprocessTransportConfig::default());
        let payload = CommandPayload::new([format!("sleep 0.3; touch {}", marker.display())]).unwrap();
        let handle = t.send(&Target::new("i-1", true), &payload).await.unwrap();

        assert_eq!(t.tracked_invocations(), 1);
        t.abandon(&handle).await;
        assert_eq!(t.tracked_invocations(), 0);
        assert!(matches!(
            t.poll(&handle).await,
            Err(TransportError::UnknownHandle(_))
        ));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!marker.exists(), "abandoned command ran to completion");
        assert_eq!(t.tracked_invocations(), 0);
    }

    #[tokio::test]
    async fn test_polled_invocation_is_forgotten() {
        let t = SubprocessTransport::new(SubprocessTransportConfig::default());
        run(&t, "local", &["true"]).await;
        assert_eq!(t.tracked_invocations(), 0);
    }
}
