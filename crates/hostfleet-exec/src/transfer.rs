//! File transfer over the command channel
//!
//! There is no dedicated file-transfer subsystem. Content is written to a
//! staging file with a single-quoted `printf`, then copied into place with
//! elevation and the staging file removed. Copied files containing single
//! quotes are rejected instead of being silently mangled; files the crate
//! rewrites itself go through [`write_content`], which escapes them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::elevation::shell_quote;
use crate::error::{ExecError, TransferStage};
use crate::traits::RemoteExecutor;

/// Remote directory for staging files unless configured otherwise
pub const DEFAULT_STAGING_DIR: &str = "/tmp";

/// One local file and where it should end up on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransfer {
    /// Local source path
    pub src: PathBuf,
    /// Absolute destination path on the host
    pub dest: String,
}

impl FileTransfer {
    /// Describe a transfer
    pub fn new(src: impl Into<PathBuf>, dest: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
        }
    }
}

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Staging path for `dest`: `<staging_dir>/.<basename(dest)>.<pid>-<seq>`
///
/// Every call yields a fresh name, so concurrent transfers whose
/// destinations share a basename never share a staging file.
///
/// # Errors
/// Returns `ExecError::InvalidInput` if `dest` has no file name
pub fn staging_path(staging_dir: &str, dest: &str) -> Result<String, ExecError> {
    let name = Path::new(dest)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ExecError::InvalidInput(format!("destination has no file name: {dest}")))?;
    let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
    Ok(format!(
        "{}/.{name}.{}-{seq}",
        staging_dir.trim_end_matches('/'),
        std::process::id()
    ))
}

/// Check that bytes can be written through the quoted shell write
///
/// # Errors
/// Returns a `TransferStage::UnsupportedContent` error for invalid UTF-8,
/// NUL bytes or single quotes
pub fn check_content(bytes: Vec<u8>) -> Result<String, ExecError> {
    let content = String::from_utf8(bytes).map_err(|e| {
        ExecError::transfer(
            TransferStage::UnsupportedContent,
            format!("content is not valid UTF-8: {e}"),
        )
    })?;

    if let Some(offset) = content.find(['\'', '\0']) {
        return Err(ExecError::transfer(
            TransferStage::UnsupportedContent,
            format!("content contains a single quote or NUL byte at offset {offset}"),
        ));
    }

    Ok(content)
}

/// Read a local file and install it on the host
#[instrument(skip(executor, file), fields(host = %executor.target(), dest = %file.dest))]
pub(crate) async fn copy_file<E>(executor: &E, file: &FileTransfer) -> Result<(), ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    let bytes = tokio::fs::read(&file.src).await.map_err(|e| {
        ExecError::transfer(
            TransferStage::LocalRead,
            format!("{}: {e}", file.src.display()),
        )
    })?;
    let content = check_content(bytes)?;

    write_content(executor, &content, &file.dest).await?;
    info!(src = %file.src.display(), "file copied");
    Ok(())
}

/// Install `content` at `dest` through a staging file
///
/// Single quotes are escaped; only NUL bytes cannot be carried.
pub(crate) async fn write_content<E>(executor: &E, content: &str, dest: &str) -> Result<(), ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    if content.contains('\0') {
        return Err(ExecError::transfer(
            TransferStage::UnsupportedContent,
            "content contains a NUL byte",
        ));
    }

    let staging = staging_path(executor.staging_dir(), dest)?;
    let quoted_staging = shell_quote(&staging);
    debug!(staging = %staging, bytes = content.len(), "writing staging file");

    let write = format!("printf '%s' {} > {quoted_staging}", shell_quote(content));
    executor
        .run(&write)
        .await
        .and_then(|r| r.into_checked())
        .map_err(|e| ExecError::transfer(TransferStage::RemoteWrite, e.to_string()))?;

    let install = format!("cp -f {quoted_staging} {}", shell_quote(dest));
    let installed = executor
        .run_elevated(&install)
        .await
        .and_then(|r| r.into_checked());

    if let Err(e) = installed {
        if let Err(cleanup) = remove_staging(executor, &quoted_staging).await {
            warn!(staging = %staging, error = %cleanup, "failed to remove staging file");
        }
        return Err(ExecError::transfer(TransferStage::RemoteMove, e.to_string()));
    }

    remove_staging(executor, &quoted_staging)
        .await
        .map_err(|e| ExecError::transfer(TransferStage::Cleanup, e.to_string()))
}

async fn remove_staging<E>(executor: &E, quoted_staging: &str) -> Result<(), ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    executor
        .run(&format!("rm -f {quoted_staging}"))
        .await?
        .into_checked()
        .map(|_| ())
}
