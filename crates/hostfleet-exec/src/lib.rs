//! hostfleet-exec: Remote execution core
//!
//! Host identities, SSH sessions, buffered and streaming command execution,
//! privilege elevation and file transfer over the command channel. The local
//! executor implements the same trait on top of `tokio::process`.

pub mod disk;
pub mod elevation;
pub mod error;
pub mod host;
pub mod keys;
pub mod local;
pub mod records;
pub mod result;
pub mod session;
pub mod ssh;
pub mod stream;
pub mod system;
pub mod traits;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use disk::{DiskExtend, Filesystem, LogicalVolume};
pub use elevation::{ElevationStrategy, Elevator, Invocation};
pub use error::{ErrorKind, ExecError, TransferStage};
pub use host::{AuthMethod, ElevationMode, HostIdentity, Transport};
pub use keys::{KeyError, KeySource};
pub use local::LocalExecutor;
pub use records::Record;
pub use result::CommandResult;
pub use session::SessionOptions;
pub use ssh::SshExecutor;
pub use stream::{LogEntry, LogEvent, LogSink, LogStream, PromptResponder, StreamSummary, log_channel};
pub use system::{HostFacts, MemoryInfo, OsRelease, SystemOps, SystemctlAction};
pub use traits::RemoteExecutor;
pub use transfer::FileTransfer;
