//! Control channel: JSON-line requests on stdin, responses and
//! notifications on stdout

use libpartsync_core::{OrchestratorHandle, RepositoryId, StatusEvent};
use libpartsync_ipc::error::codes;
use libpartsync_ipc::messages::OutboundMessage;
use libpartsync_ipc::{ControlCommand, ControlRequest, ControlResponse, IpcError, WireNotification};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Answer one request. Returns whether the client asked for shutdown.
pub async fn handle_request(
    request: ControlRequest,
    handle: &OrchestratorHandle,
) -> (ControlResponse, bool) {
    let id = request.request_id;
    debug!(request_id = %id, command = request.command.name(), "control request");

    let response = match request.command {
        ControlCommand::Retry { repository } => {
            match handle.retry(RepositoryId::new(repository)).await {
                Ok(job_id) => {
                    ControlResponse::success(id, Some(serde_json::json!({ "job_id": job_id })))
                }
                Err(e) => ControlResponse::error(id, e.error_code(), e.to_string()),
            }
        }
        ControlCommand::Pause => ack(id, handle.pause().await),
        ControlCommand::Resume => ack(id, handle.resume().await),
        ControlCommand::Status => match handle.status().await {
            Ok(status) => match serde_json::to_value(&status) {
                Ok(data) => ControlResponse::success(id, Some(data)),
                Err(e) => ControlResponse::error(id, codes::INTERNAL, e.to_string()),
            },
            Err(e) => ControlResponse::error(id, e.error_code(), e.to_string()),
        },
        ControlCommand::Shutdown => return (ControlResponse::success(id, None), true),
    };
    (response, false)
}

fn ack(id: String, result: Result<(), libpartsync_core::PartsyncError>) -> ControlResponse {
    match result {
        Ok(()) => ControlResponse::success(id, None),
        Err(e) => ControlResponse::error(id, e.error_code(), e.to_string()),
    }
}

/// Best-effort request id from a line that failed to parse
fn salvage_request_id(line: &str) -> String {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("request_id")?.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Read requests until input ends or shutdown. A `shutdown` request is
/// forwarded on `stop`.
pub async fn serve_requests<R: AsyncBufRead + Unpin>(
    input: R,
    handle: OrchestratorHandle,
    out: mpsc::Sender<OutboundMessage>,
    stop: mpsc::Sender<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.recv() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("control input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "control input failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let (response, stop_requested) = match ControlRequest::parse(&line) {
            Ok(request) => handle_request(request, &handle).await,
            Err(e) => {
                warn!(error = %e, "rejected control line");
                let response = ControlResponse::error(salvage_request_id(&line), e.code(), e.to_string());
                (response, false)
            }
        };
        if out.send(response.into()).await.is_err() {
            break;
        }
        if stop_requested {
            info!("shutdown requested over control channel");
            let _ = stop.send(()).await;
            break;
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &OutboundMessage,
) -> Result<(), IpcError> {
    let mut line = message.to_line()?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Write responses and status notifications until both sources close
pub async fn write_output<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut responses: mpsc::Receiver<OutboundMessage>,
    mut events: broadcast::Receiver<StatusEvent>,
) {
    let mut responses_open = true;
    let mut events_open = true;

    while responses_open || events_open {
        let message = tokio::select! {
            response = responses.recv(), if responses_open => match response {
                Some(message) => message,
                None => {
                    responses_open = false;
                    continue;
                }
            },
            event = events.recv(), if events_open => match event {
                Ok(event) => WireNotification::new(event).into(),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification consumer lagging, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => {
                    events_open = false;
                    continue;
                }
            },
        };

        if let Err(e) = write_line(&mut writer, &message).await {
            warn!(error = %e, "cannot write control output");
            return;
        }
    }
}
