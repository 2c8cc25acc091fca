//! Identity oracle boundary
//!
//! Frame grabbing and face classification live outside this crate. The
//! gateway talks to a helper process (camera + detector + recognizer) over
//! newline-delimited JSON on its stdin/stdout:
//!
//! - startup: helper loads the model and opens the camera, then prints
//!   `{"ready":true}` or `{"ready":false,"error":"..."}`
//! - `{"op":"classify","seq":N}` -> `{"seq":N,"ok":true,"regions":[...],"stop":false}`
//!   or `{"seq":N,"ok":false,"error":"..."}` when the grab failed
//! - `{"op":"idle"}` when the session ends (helper hides its preview)
//! - `{"op":"shutdown"}` before the gateway exits
//!
//! A classify reply only counts for the request carrying the same `seq`.
//! Replies that arrive after their request timed out are read and dropped,
//! so a late match can never be folded into a later frame or session.

use crate::domain::types::{IdentityObservation, Observations};
use crate::infra::config::Config;
use crate::infra::error::GatewayError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// One classified frame
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub observations: Observations,
    /// Operator asked to stop (e.g. pressed `q` in the preview window)
    pub stop_requested: bool,
}

#[async_trait]
pub trait IdentityOracle: Send {
    /// Grab one frame and classify every detected face region
    async fn classify(&mut self) -> Result<Classification, GatewayError>;

    /// Recognition paused (no active session)
    async fn idle(&mut self) {}

    /// Release the camera
    async fn shutdown(&mut self) {}
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum OracleRequest {
    Classify { seq: u64 },
    Idle,
    Shutdown,
}

#[derive(Debug, Deserialize)]
struct ReadyReply {
    ready: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClassifyReply {
    #[serde(default)]
    seq: Option<u64>,
    ok: bool,
    #[serde(default)]
    regions: Vec<IdentityObservation>,
    #[serde(default)]
    stop: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Request/reply framing over the helper's pipes
struct HelperPipe<W, R> {
    writer: W,
    lines: Lines<BufReader<R>>,
    next_seq: u64,
    frame_timeout: Duration,
}

impl<W, R> HelperPipe<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    fn new(writer: W, reader: R, frame_timeout: Duration) -> Self {
        Self { writer, lines: BufReader::new(reader).lines(), next_seq: 0, frame_timeout }
    }

    async fn send(&mut self, request: &OracleRequest) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await
    }

    /// Wait for the handshake line
    async fn ready(&mut self, startup: Duration) -> Result<(), GatewayError> {
        let line = match tokio::time::timeout(startup, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return Err(GatewayError::ModelLoad("helper exited".to_string())),
            Ok(Err(e)) => return Err(GatewayError::ModelLoad(e.to_string())),
            Err(_) => return Err(GatewayError::ModelLoad("helper startup timed out".to_string())),
        };

        let reply: ReadyReply = serde_json::from_str(&line)
            .map_err(|e| GatewayError::ModelLoad(format!("bad handshake {line:?}: {e}")))?;
        if reply.ready {
            return Ok(());
        }
        let reason = reply.error.unwrap_or_else(|| "not ready".to_string());
        Err(if reason.contains("camera") {
            GatewayError::CameraRead(reason)
        } else {
            GatewayError::ModelLoad(reason)
        })
    }

    async fn classify(&mut self) -> Result<Classification, GatewayError> {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.send(&OracleRequest::Classify { seq })
            .await
            .map_err(|e| GatewayError::CameraRead(format!("helper write: {e}")))?;

        let deadline = tokio::time::Instant::now() + self.frame_timeout;
        loop {
            let line = match tokio::time::timeout_at(deadline, self.lines.next_line()).await {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => return Err(GatewayError::CameraRead("helper exited".to_string())),
                Ok(Err(e)) => return Err(GatewayError::CameraRead(e.to_string())),
                Err(_) => return Err(GatewayError::CameraRead("frame timed out".to_string())),
            };

            let reply: ClassifyReply = serde_json::from_str(&line)
                .map_err(|e| GatewayError::CameraRead(format!("bad reply: {e}")))?;
            if reply.seq != Some(seq) {
                debug!(expected = seq, got = ?reply.seq, "oracle_stale_reply_dropped");
                continue;
            }
            if !reply.ok {
                return Err(GatewayError::CameraRead(
                    reply.error.unwrap_or_else(|| "frame grab failed".to_string()),
                ));
            }

            return Ok(Classification {
                observations: reply.regions.into_iter().collect(),
                stop_requested: reply.stop,
            });
        }
    }
}

/// Oracle backed by a helper child process
pub struct SidecarOracle {
    child: Child,
    pipe: HelperPipe<ChildStdin, ChildStdout>,
}

impl SidecarOracle {
    /// Spawn the helper and wait for it to load the model and open the camera.
    ///
    /// A missing model file or a failed handshake is a `ModelLoad` error;
    /// a helper that reports a camera problem is a `CameraRead` error.
    pub async fn spawn(config: &Config) -> Result<Self, GatewayError> {
        let model = Path::new(config.model_path());
        match std::fs::metadata(model) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {}
            Ok(_) => {
                return Err(GatewayError::ModelLoad(format!("{} is empty", model.display())));
            }
            Err(e) => return Err(GatewayError::ModelLoad(format!("{}: {}", model.display(), e))),
        }

        let mut child = Command::new(config.oracle_program())
            .args(config.oracle_args())
            .arg("--model")
            .arg(model)
            .arg("--camera-index")
            .arg(config.camera_index().to_string())
            .arg("--camera-backend")
            .arg(config.camera_backend())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GatewayError::ModelLoad(format!("spawn {}: {}", config.oracle_program(), e))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(GatewayError::ModelLoad("helper stdio unavailable".to_string()));
        };
        let mut pipe =
            HelperPipe::new(stdin, stdout, Duration::from_millis(config.oracle_frame_timeout_ms()));
        pipe.ready(Duration::from_millis(config.oracle_startup_timeout_ms())).await?;

        info!(
            program = %config.oracle_program(),
            model = %model.display(),
            camera_index = %config.camera_index(),
            "oracle_ready"
        );

        Ok(Self { child, pipe })
    }
}

#[async_trait]
impl IdentityOracle for SidecarOracle {
    async fn classify(&mut self) -> Result<Classification, GatewayError> {
        self.pipe.classify().await
    }

    async fn idle(&mut self) {
        if let Err(e) = self.pipe.send(&OracleRequest::Idle).await {
            debug!(error = %e, "oracle_idle_failed");
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.pipe.send(&OracleRequest::Shutdown).await {
            debug!(error = %e, "oracle_shutdown_request_failed");
        }
        match tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(Ok(status)) => info!(status = %status, "oracle_stopped"),
            _ => {
                warn!("oracle_kill");
                let _ = self.child.kill().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    #[test]
    fn test_request_encoding() {
        assert_eq!(
            serde_json::to_string(&OracleRequest::Classify { seq: 7 }).unwrap(),
            r#"{"op":"classify","seq":7}"#
        );
        assert_eq!(serde_json::to_string(&OracleRequest::Idle).unwrap(), r#"{"op":"idle"}"#);
    }

    #[test]
    fn test_classify_reply_decoding() {
        let reply: ClassifyReply = serde_json::from_str(
            r#"{"seq":3,"ok":true,"regions":[{"region":{"x":10,"y":20,"w":80,"h":80},"label":1,"confidence":41.5}]}"#,
        )
        .unwrap();
        assert!(reply.ok);
        assert!(!reply.stop);
        assert_eq!(reply.seq, Some(3));
        assert_eq!(reply.regions.len(), 1);
        assert_eq!(reply.regions[0].label, Some(1));

        let reply: ClassifyReply =
            serde_json::from_str(r#"{"ok":false,"error":"no frame"}"#).unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.seq, None);
        assert_eq!(reply.error.as_deref(), Some("no frame"));
    }

    #[tokio::test]
    async fn test_missing_model_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yml");
        let config = Config::default().with_model_path(missing.to_str().unwrap());

        let err = SidecarOracle::spawn(&config).await.err().unwrap();
        assert!(matches!(err, GatewayError::ModelLoad(_)));
    }

    type TestPipe = HelperPipe<WriteHalf<DuplexStream>, ReadHalf<DuplexStream>>;

    /// Pipe wired to an in-process helper running `helper` on the far end
    fn pipe_with_helper<F, Fut>(frame_timeout: Duration, helper: F) -> (TestPipe, tokio::task::JoinHandle<()>)
    where
        F: FnOnce(Lines<BufReader<ReadHalf<DuplexStream>>>, WriteHalf<DuplexStream>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (ours, theirs) = tokio::io::duplex(4096);
        let (our_read, our_write) = tokio::io::split(ours);
        let (their_read, their_write) = tokio::io::split(theirs);
        let handle = tokio::spawn(helper(BufReader::new(their_read).lines(), their_write));
        (HelperPipe::new(our_write, our_read, frame_timeout), handle)
    }

    fn request(line: &str) -> (String, Option<u64>) {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        (value["op"].as_str().unwrap().to_string(), value["seq"].as_u64())
    }

    #[tokio::test]
    async fn test_late_reply_is_not_used_for_next_frame() {
        let (mut pipe, helper) = pipe_with_helper(Duration::from_millis(200), |mut lines, mut out| async move {
            let mut classified = 0;
            while let Ok(Some(line)) = lines.next_line().await {
                let (op, seq) = request(&line);
                if op != "classify" {
                    continue;
                }
                let seq = seq.unwrap();
                classified += 1;
                let reply = if classified == 1 {
                    // owner match, but well past the frame timeout
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    format!(
                        r#"{{"seq":{seq},"ok":true,"regions":[{{"region":{{"x":0,"y":0,"w":50,"h":50}},"label":1,"confidence":10.0}}]}}"#
                    )
                } else {
                    format!(r#"{{"seq":{seq},"ok":true,"regions":[]}}"#)
                };
                out.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
                out.flush().await.unwrap();
            }
        });

        let err = pipe.classify().await.unwrap_err();
        assert!(matches!(err, GatewayError::CameraRead(_)));

        // session ends and a new one starts before the late reply lands
        pipe.send(&OracleRequest::Idle).await.unwrap();
        let next = pipe.classify().await.unwrap();
        assert!(next.observations.is_empty());

        drop(pipe);
        helper.await.unwrap();
    }

    #[tokio::test]
    async fn test_reply_without_matching_seq_times_out() {
        let (mut pipe, _helper) = pipe_with_helper(Duration::from_millis(100), |mut lines, mut out| async move {
            while let Ok(Some(_)) = lines.next_line().await {
                out.write_all(b"{\"ok\":true,\"regions\":[]}\n").await.unwrap();
                out.flush().await.unwrap();
            }
        });

        let err = pipe.classify().await.unwrap_err();
        assert!(matches!(err, GatewayError::CameraRead(ref msg) if msg == "frame timed out"));
    }

    #[tokio::test]
    async fn test_handshake_reports_camera_problem() {
        let (mut pipe, _helper) = pipe_with_helper(Duration::from_millis(100), |_lines, mut out| async move {
            out.write_all(b"{\"ready\":false,\"error\":\"camera 0 not found\"}\n").await.unwrap();
            out.flush().await.unwrap();
        });

        let err = pipe.ready(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, GatewayError::CameraRead(_)));
    }
}
