// pear-bootstrap-common: wire types and pure helpers shared by the launcher crates.

pub mod endpoint;
pub mod key;
pub mod peers;
pub mod protocol;
