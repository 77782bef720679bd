use crate::error::ArchiveError;
use crate::tree::ProjectTree;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_ARCHIVE_NAME: &str = "project-files";

/// Serializes every file of `tree` into an in-memory zip.
///
/// Entries follow a depth-first pre-order walk in stored child order, named by
/// their relative path. Directories get no entry of their own.
pub fn write_archive(tree: &ProjectTree) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (path, content) in tree.files() {
        writer.start_file(path, options)?;
        writer.write_all(content.as_bytes())?;
    }

    Ok(writer.finish()?.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExportToken(u64);

/// Hands out export jobs tagged with increasing tokens so that the owner can
/// drop results that finish after a newer request was issued.
///
/// Clones share the token counter and the delivery lock, so a spawned
/// delivery sees requests issued after it started.
#[derive(Debug, Clone, Default)]
pub struct ArchiveExporter {
    latest: Arc<AtomicU64>,
    delivering: Arc<Mutex<()>>,
}

pub struct PendingExport {
    pub token: ExportToken,
    handle: JoinHandle<Result<Vec<u8>, ArchiveError>>,
}

impl PendingExport {
    pub async fn wait(self) -> (ExportToken, Result<Vec<u8>, ArchiveError>) {
        let result = match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        };
        (self.token, result)
    }
}

impl ArchiveExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts compressing a snapshot of `tree` on the blocking pool.
    pub fn start(&self, tree: ProjectTree) -> PendingExport {
        let token = ExportToken(self.latest.fetch_add(1, Ordering::SeqCst) + 1);
        tracing::debug!(token = token.0, files = tree.files().len(), "export started");
        let handle = tokio::task::spawn_blocking(move || write_archive(&tree));
        PendingExport { token, handle }
    }

    pub fn is_current(&self, token: ExportToken) -> bool {
        token.0 == self.latest.load(Ordering::SeqCst)
    }

    /// Delivers `bytes` unless a newer export was requested first.
    ///
    /// Deliveries run one at a time; the currency check happens once the
    /// previous delivery has finished, so an older archive never replaces a
    /// newer one. Returns `None` when the token was superseded.
    pub async fn deliver_current(
        &self,
        token: ExportToken,
        bytes: Vec<u8>,
        dir: &Path,
        name: &str,
    ) -> Option<Result<PathBuf, ArchiveError>> {
        let _turn = self.delivering.lock().await;
        if !self.is_current(token) {
            tracing::debug!(token = token.0, "skipping superseded delivery");
            return None;
        }
        Some(deliver(bytes, dir, name).await)
    }
}

/// Writes `<dir>/<name>.zip`.
///
/// The bytes go to a uniquely named temporary file in `dir` that is persisted
/// over the target, so a failed write never leaves a truncated archive under
/// the final name. The temporary file is removed on every failure path.
pub async fn deliver(bytes: Vec<u8>, dir: &Path, name: &str) -> Result<PathBuf, ArchiveError> {
    let target = dir.join(format!("{name}.zip"));
    let staging_dir = dir.to_path_buf();
    let prefix = format!(".{name}.");
    let len = bytes.len();

    let persisted = target.clone();
    tokio::task::spawn_blocking(move || -> Result<(), ArchiveError> {
        let mut staged = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".zip.part")
            .tempfile_in(&staging_dir)?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_all()?;
        staged.persist(&persisted).map_err(|err| err.error)?;
        Ok(())
    })
    .await??;

    tracing::info!(path = %target.display(), bytes = len, "archive written");
    Ok(target)
}

/// Compresses and delivers in one step.
pub async fn export(tree: &ProjectTree, dir: &Path, name: &str) -> Result<PathBuf, ArchiveError> {
    let exporter = ArchiveExporter::new();
    let (_, bytes) = exporter.start(tree.clone()).wait().await;
    deliver(bytes?, dir, name).await
}
