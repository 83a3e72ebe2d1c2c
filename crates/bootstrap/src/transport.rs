// Client side of the local sidecar channel.

use std::io;

use async_trait::async_trait;
use pear_bootstrap_common::endpoint::ChannelAddress;
use tokio::io::{AsyncRead, AsyncWrite};

/// Duplex byte stream to a sidecar.
pub trait ChannelIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ChannelIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type Channel = Box<dyn ChannelIo>;

/// Opens channels to local sidecars.
///
/// A missing sidecar must surface as `NotFound` or `ConnectionRefused`; the
/// connector only spawns a runtime for those two kinds.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, address: &ChannelAddress) -> io::Result<Channel>;
}

/// Unix domain sockets, or named pipes on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self, address: &ChannelAddress) -> io::Result<Channel> {
        match address {
            ChannelAddress::Socket { path, .. } => connect_socket(path).await,
            ChannelAddress::NamedPipe { name, .. } => connect_pipe(name).await,
        }
    }
}

#[cfg(unix)]
async fn connect_socket(path: &std::path::Path) -> io::Result<Channel> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn connect_socket(path: &std::path::Path) -> io::Result<Channel> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("unix sockets are unavailable on this platform ({})", path.display()),
    ))
}

#[cfg(windows)]
async fn connect_pipe(name: &str) -> io::Result<Channel> {
    use std::time::Duration;
    use tokio::net::windows::named_pipe::ClientOptions;
    use tokio::time::Instant;

    const ERROR_PIPE_BUSY: i32 = 231;
    const BUSY_BUDGET: Duration = Duration::from_secs(2);

    let deadline = Instant::now() + BUSY_BUDGET;
    loop {
        match ClientOptions::new().open(name) {
            Ok(client) => return Ok(Box::new(client)),
            // Every server instance is taken; one is recreated right after accept.
            Err(error) if error.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("pipe {name} stayed busy for {}ms", BUSY_BUDGET.as_millis()),
                    ));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(not(windows))]
async fn connect_pipe(name: &str) -> io::Result<Channel> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("named pipes are unavailable on this platform ({name})"),
    ))
}
