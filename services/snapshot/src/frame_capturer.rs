//! Single-frame capture through an external ffmpeg process.
//!
//! Every capture spawns ffmpeg against the RTSP stream, asks it for exactly
//! one frame encoded as JPEG on stdout and waits for it to exit. The wait is
//! bounded: when the deadline passes the process is killed and the capture
//! fails. On unix the transcoder runs in its own process group and the whole
//! group is killed, so helpers it forked cannot outlive the capture. Output
//! is passed through as-is, no attempt is made to check that the bytes form a
//! valid image.

use async_trait::async_trait;
use bytes::Bytes;
use std::ffi::OsString;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Errors that can occur while capturing a frame.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read transcoder output: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcoder exited with {}: {stderr}", exit_description(.code))]
    Failed { code: Option<i32>, stderr: String },

    #[error("transcoder timed out after {after:?}: {stderr}")]
    Timeout { after: Duration, stderr: String },
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "no exit status (terminated by signal)".to_string(),
    }
}

/// One captured frame. Opaque bytes, normally a JPEG image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePayload {
    data: Bytes,
}

impl FramePayload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for FramePayload {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Anything that can produce one frame within a deadline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self, deadline: Duration) -> Result<FramePayload, CaptureError>;
}

/// Program and argument list of the transcoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl TranscoderCommand {
    /// ffmpeg reading `rtsp_url` over TCP and writing one JPEG frame to stdout.
    pub fn ffmpeg(ffmpeg_path: impl Into<OsString>, rtsp_url: &str) -> Self {
        let args = [
            "-rtsp_transport",
            "tcp",
            "-i",
            rtsp_url,
            "-frames:v",
            "1",
            "-f",
            "image2pipe",
            "-vcodec",
            "mjpeg",
            "pipe:1",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        Self {
            program: ffmpeg_path.into(),
            args,
        }
    }

    pub fn new<I, A>(program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

/// Frame source backed by a transcoder subprocess.
#[derive(Debug, Clone)]
pub struct FfmpegCapturer {
    command: TranscoderCommand,
}

impl FfmpegCapturer {
    pub fn new(ffmpeg_path: impl Into<OsString>, rtsp_url: &str) -> Self {
        Self::with_command(TranscoderCommand::ffmpeg(ffmpeg_path, rtsp_url))
    }

    pub fn with_command(command: TranscoderCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &TranscoderCommand {
        &self.command
    }
}

#[async_trait]
impl FrameSource for FfmpegCapturer {
    async fn capture(&self, deadline: Duration) -> Result<FramePayload, CaptureError> {
        let started = Instant::now();
        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| CaptureError::Spawn {
            program: self.command.program_name(),
            source,
        })?;
        // The id is gone once the child is reaped; the group may outlive it.
        let group = child.id();

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let finished = tokio::time::timeout(deadline, async {
            let read_stdout = async {
                if let Some(pipe) = stdout_pipe.as_mut() {
                    pipe.read_to_end(&mut stdout).await?;
                }
                Ok::<_, std::io::Error>(())
            };
            let read_stderr = async {
                if let Some(pipe) = stderr_pipe.as_mut() {
                    pipe.read_to_end(&mut stderr).await?;
                }
                Ok::<_, std::io::Error>(())
            };
            let (status, _, _) = tokio::try_join!(child.wait(), read_stdout, read_stderr)?;
            Ok::<_, std::io::Error>(status)
        })
        .await;

        let status = match finished {
            Ok(status) => status?,
            Err(_) => {
                terminate(&mut child, group).await;
                return Err(CaptureError::Timeout {
                    after: deadline,
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                });
            }
        };

        if !status.success() {
            return Err(CaptureError::Failed {
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }

        debug!(
            size_bytes = stdout.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transcoder produced frame"
        );

        Ok(FramePayload::from(stdout))
    }
}

/// Kill the transcoder's process group and the transcoder itself.
async fn terminate(child: &mut Child, group: Option<u32>) {
    if let Some(group) = group {
        kill_process_group(group);
    }

    match child.try_wait() {
        Ok(Some(_)) => {}
        _ => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill timed out transcoder");
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(group: u32) {
    let Ok(pgid) = libc::pid_t::try_from(group) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid signals every member of the group.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        let e = std::io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::ESRCH) {
            warn!(error = %e, pgid, "Failed to kill transcoder process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_group: u32) {}
