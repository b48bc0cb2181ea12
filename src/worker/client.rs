use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{WorkerError, WorkerResult};
use super::protocol::{Call, Envelope, Reply};
use crate::config::Settings;

type Waiters = Arc<Mutex<HashMap<String, oneshot::Sender<Reply>>>>;

/// Handle to a running database worker.
///
/// Calls are multiplexed over one pipe pair; a reader task hands each reply
/// to whichever caller registered its id.
pub struct WorkerClient {
    writer: Mutex<BufWriter<ChildStdin>>,
    waiters: Waiters,
    reader: JoinHandle<()>,
    call_timeout: Duration,
    _process: Child,
}

impl WorkerClient {
    pub async fn launch(settings: &Settings) -> WorkerResult<Self> {
        let path = settings.worker_path().ok_or(WorkerError::Missing)?;
        Self::launch_at(
            &path,
            &settings.worker.pool.to_worker_args(),
            Duration::from_secs(settings.worker.request_timeout_secs),
        )
        .await
    }

    pub async fn launch_at(
        path: &Path,
        args: &[String],
        call_timeout: Duration,
    ) -> WorkerResult<Self> {
        let mut process = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        let stdin = process.stdin.take();
        let stdout = process.stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            return Err(WorkerError::Spawn(std::io::Error::other("stdio not piped")));
        };

        let waiters = Waiters::default();
        let reader = tokio::spawn(route_replies(stdout, waiters.clone()));
        debug!(path = %path.display(), "database worker started");

        Ok(Self {
            writer: Mutex::new(BufWriter::new(stdin)),
            waiters,
            reader,
            call_timeout,
            _process: process,
        })
    }

    pub fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }

    pub async fn call<C: Call>(&self, params: &C) -> WorkerResult<C::Output> {
        let id = Uuid::new_v4().to_string();
        let mut line = serde_json::to_vec(&Envelope {
            id: &id,
            method: C::METHOD,
            params,
        })?;
        line.push(b'\n');

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(id.clone(), tx);

        if let Err(err) = self.write_line(&line).await {
            self.waiters.lock().await.remove(&id);
            return Err(err);
        }
        debug!(method = C::METHOD, %id, "worker call sent");

        let reply = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(WorkerError::Exited),
            Err(_) => {
                self.waiters.lock().await.remove(&id);
                return Err(WorkerError::Timeout {
                    seconds: self.call_timeout.as_secs(),
                });
            }
        };

        match (reply.success, reply.error) {
            (true, _) => Ok(serde_json::from_value(
                reply.result.unwrap_or(serde_json::Value::Null),
            )?),
            (false, Some(fault)) => Err(fault.into()),
            (false, None) => Err(WorkerError::Rejected {
                code: "UNKNOWN".into(),
                message: format!("{} failed without a reason", C::METHOD),
            }),
        }
    }

    async fn write_line(&self, line: &[u8]) -> WorkerResult<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line).await.map_err(WorkerError::Pipe)?;
        writer.flush().await.map_err(WorkerError::Pipe)
    }
}

async fn route_replies(stdout: ChildStdout, waiters: Waiters) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<Reply>(&line) {
                Ok(reply) => {
                    if let Some(tx) = waiters.lock().await.remove(&reply.id) {
                        let _ = tx.send(reply);
                    }
                }
                Err(e) => warn!(error = %e, "unparseable worker reply"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "worker stdout closed");
                break;
            }
        }
    }

    for (id, tx) in waiters.lock().await.drain() {
        let _ = tx.send(Reply::exited(id));
    }
}
