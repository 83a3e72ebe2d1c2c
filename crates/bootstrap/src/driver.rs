// Issue one run request and follow its event stream to the final event.

use std::sync::Arc;

use pear_bootstrap_common::protocol::{
    decode_line, encode_line, EventFrame, FinalPayload, RequestFrame, RunRequest, StreamEvent,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::error::BootstrapError;

/// Receives the status events of a run, in arrival order.
pub type StatusObserver = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Send `request` as frame `id` and resolve with the payload of its final event.
///
/// Frames carrying another id are ignored. The stream ending before a final
/// event, or an undecodable frame, is a protocol error.
pub async fn run_request<S>(
    stream: &mut S,
    id: u64,
    request: &RunRequest,
    on_status: Option<&StatusObserver>,
) -> Result<FinalPayload, BootstrapError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let frame = RequestFrame::run(id, request.clone());
    let encoded = encode_line(&frame)
        .map_err(|error| BootstrapError::Internal(format!("failed to encode run request: {error}")))?;
    stream.write_all(&encoded).await.map_err(BootstrapError::Channel)?;
    stream.flush().await.map_err(BootstrapError::Channel)?;
    debug!(id, link = %request.link, "run request sent");

    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).await.map_err(BootstrapError::Channel)?;
        if read == 0 {
            return Err(BootstrapError::Protocol(format!(
                "stream for request {id} ended before a final event"
            )));
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let frame: EventFrame = decode_line(&line)
            .map_err(|error| BootstrapError::Protocol(format!("malformed event frame: {error}")))?;
        if frame.id != id {
            warn!(
                expected = id,
                received = frame.id,
                tag = frame.event.tag(),
                "ignoring event for another request"
            );
            continue;
        }

        match frame.event {
            StreamEvent::Final(payload) => {
                debug!(id, bail = ?payload.bail.as_ref().map(|bail| &bail.code), "final event received");
                return Ok(payload);
            }
            event @ StreamEvent::Status(_) => {
                debug!(id, "status event");
                if let Some(observer) = on_status {
                    observer(&event);
                }
            }
        }
    }
}
