use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{ConversionJob, ConversionOutcome};

/// One-shot completion signal for a conversion.
///
/// The first call to `complete` delivers the outcome; any later call is
/// dropped, so a job can never produce a second response.
pub struct CompletionSignal {
    job_id: Uuid,
    sender: Option<oneshot::Sender<ConversionOutcome>>,
}

impl CompletionSignal {
    pub fn channel(job_id: Uuid) -> (Self, oneshot::Receiver<ConversionOutcome>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                job_id,
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Record the terminal outcome. Returns `false` if one was already recorded.
    pub fn complete(&mut self, outcome: ConversionOutcome) -> bool {
        match self.sender.take() {
            Some(sender) => {
                if sender.send(outcome).is_err() {
                    debug!(job_id = %self.job_id, "Requester went away before completion");
                }
                true
            }
            None => {
                warn!(
                    job_id = %self.job_id,
                    outcome = ?outcome,
                    "Ignoring completion for already completed job"
                );
                false
            }
        }
    }
}

/// Spawn the converter and wait for it to exit.
///
/// stdout and stderr are forwarded to the log line by line while the process
/// runs. There is no timeout.
pub async fn run(job: &ConversionJob) -> ConversionOutcome {
    info!(
        job_id = %job.id,
        executable = %job.executable_path.display(),
        input = %job.input_path.display(),
        output = %job.output_path.display(),
        "Starting conversion process"
    );

    let mut child = match Command::new(&job.executable_path)
        .args(&job.arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!(
                job_id = %job.id,
                executable = %job.executable_path.display(),
                error = %e,
                "Failed to start conversion process"
            );
            return ConversionOutcome::StartupError {
                message: e.to_string(),
            };
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (status, _, _) = tokio::join!(
        child.wait(),
        forward_lines(stdout, job.id, OutputStream::Stdout),
        forward_lines(stderr, job.id, OutputStream::Stderr),
    );

    match status {
        Ok(status) if status.success() => {
            info!(job_id = %job.id, "Conversion process exited with code 0");
            ConversionOutcome::Succeeded
        }
        Ok(status) => {
            error!(job_id = %job.id, code = ?status.code(), "Conversion process failed");
            ConversionOutcome::Failed {
                code: status.code(),
            }
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Lost track of conversion process");
            ConversionOutcome::Failed { code: None }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

async fn forward_lines<R>(reader: Option<R>, job_id: Uuid, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };

    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match stream {
                OutputStream::Stdout => info!(job_id = %job_id, "stdout: {}", line),
                OutputStream::Stderr => warn!(job_id = %job_id, "stderr: {}", line),
            },
            Ok(None) => break,
            Err(e) => {
                debug!(job_id = %job_id, stream = ?stream, error = %e, "Stopped reading process output");
                break;
            }
        }
    }
}
