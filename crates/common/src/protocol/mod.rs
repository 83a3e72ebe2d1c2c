// Newline-delimited JSON protocol spoken between the launcher and a sidecar.
//
// Client -> sidecar: one `RequestFrame` per line.
// Sidecar -> client: `EventFrame` lines carrying the id of the request they
// answer; each request ends with exactly one `final` event.

pub mod event;
pub mod frame;

pub use event::{Bail, FinalPayload, ProtocolError, StreamEvent, PREFLIGHT_CODE};
pub use frame::{decode_line, encode_line, EventFrame, RequestFrame, RunFlags, RunRequest, RUN_METHOD};
