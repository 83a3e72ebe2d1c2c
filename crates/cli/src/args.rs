// Command-line surface of `pear-bootstrap`.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use pear_bootstrap_common::key::PeerKey;

#[derive(Debug, Parser)]
#[command(
    name = "pear-bootstrap",
    version,
    about = "Start the pear runtime sidecar for a root directory and hand it an app link"
)]
pub struct Cli {
    /// Platform key the runtime build is staged from (64 hex characters)
    #[arg(long, value_name = "HEX")]
    pub key: PeerKey,

    /// Runtime root directory
    #[arg(long, value_name = "DIR")]
    pub dir: PathBuf,

    /// Application link to hand off (pear://...)
    #[arg(long, value_name = "LINK")]
    pub link: String,

    /// Hold the platform lock while staging the runtime
    #[arg(long)]
    pub lock: bool,

    /// DHT bootstrap peers, comma separated host:port
    #[arg(long = "dht-bootstrap", value_name = "PEERS")]
    pub dht_bootstrap: Option<String>,

    /// Force JSON output
    #[arg(long)]
    pub json: bool,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Config file (default: ~/.pear-bootstrap/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// `--dir` made absolute; the channel address is derived from this exact path.
    pub fn root_dir(&self) -> io::Result<PathBuf> {
        if self.dir.is_absolute() {
            Ok(self.dir.clone())
        } else {
            Ok(std::env::current_dir()?.join(&self.dir))
        }
    }
}
