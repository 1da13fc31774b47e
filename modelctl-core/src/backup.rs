//! # Backup and Restore
//!
//! Both workflows are driven by `BackupOperation` models. The server does the actual work once
//! the operation has been synchronized; the client creates the operation, waits for it with the
//! [`RetryPoller`] and moves the backup file with [`crate::transfer::ChunkedTransfer`].
//!
//! * **Create**: create `BackupOperation{operation=create}`, wait until it is found and
//!   enacted, then download the `BackupFile` it produced and verify its checksum.
//! * **Restore**: upload the local file, register it as a `BackupFile`, create
//!   `BackupOperation{operation=restore}` and wait until the server reports a status for it.
use crate::config::SessionContext;
use crate::error::Error;
use crate::grpc::channel::CallChannel;
use crate::model::{FieldVisibility, ModelResourceClient};
use crate::retry::{Connector, Convergence, FindModel, GetModel, PollObserver, RetryPoller};
use crate::schema::{SchemaCatalog, SchemaSource};
use crate::transfer::{TransferStatus, verify_checksum};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub const BACKUP_OPERATION: &str = "BackupOperation";
pub const BACKUP_FILE: &str = "BackupFile";

/// Directory of the server where uploaded backups are stored.
pub const RESTORE_DIRECTORY: &str = "file:///var/run/xos/backup/local/";

const RESTORE_NAME_PREFIX: &str = "modelctl";

/// Result of a backup workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    /// `SUCCESS` or `ERROR` for a backup, `SUCCESS` or `FAILURE` for a restore.
    pub status: String,
    pub checksum: String,
    pub chunks: u64,
    pub bytes: u64,
}

/// Where a restored file is uploaded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTarget {
    pub name: String,
    pub uri: String,
}

impl RestoreTarget {
    /// A target named after the current time, e.g. `modelctl-restore-20191104T153000Z`.
    pub fn at(now: DateTime<Utc>) -> Self {
        let name = format!(
            "{RESTORE_NAME_PREFIX}-restore-{}",
            now.format("%Y%m%dT%H%M%SZ")
        );
        let uri = format!("{RESTORE_DIRECTORY}{name}");
        Self { name, uri }
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }
}

pub struct BackupWorkflow<K: Connector, O, Src> {
    poller: RetryPoller<K, O>,
    catalog: Arc<SchemaCatalog<Src>>,
    session: Arc<SessionContext>,
}

impl<K, O, Src> BackupWorkflow<K, O, Src>
where
    K: Connector,
    K::Connection: CallChannel,
    O: PollObserver,
    Src: SchemaSource,
{
    pub fn new(
        poller: RetryPoller<K, O>,
        catalog: Arc<SchemaCatalog<Src>>,
        session: Arc<SessionContext>,
    ) -> Self {
        Self {
            poller,
            catalog,
            session,
        }
    }

    pub fn into_poller(self) -> RetryPoller<K, O> {
        self.poller
    }

    async fn client(&mut self) -> Result<ModelResourceClient<&mut K::Connection, Src>, Error> {
        let connection = self.poller.connection().await?;
        Ok(ModelResourceClient::new(
            connection,
            self.catalog.clone(),
            self.session.clone(),
        ))
    }

    /// Asks the server for a backup and downloads it to `local`.
    ///
    /// # Returns
    ///
    /// * `Ok(BackupReport)` - The downloaded file, whose checksum matched the server's.
    /// * `Err(Error)` - If the operation failed, the download was incomplete or the checksums
    ///   differ.
    pub async fn create(&mut self, local: &Path) -> Result<BackupReport, Error> {
        let created = self
            .client()
            .await?
            .create(BACKUP_OPERATION, &fields([("operation", "create")]))
            .await?;
        tracing::info!(id = created.id, uuid = ?created.uuid, "created backup operation");

        let mut wait = GetModel::new(
            self.catalog.clone(),
            self.session.clone(),
            BACKUP_OPERATION,
            created.id,
        );
        let convergence = Convergence {
            until_found: true,
            until_enacted: true,
            until_status: false,
        };
        let operation = self.poller.poll(&mut wait, convergence).await?;

        let status = operation.get_str("status").unwrap_or_default();
        tracing::info!(id = created.id, %status, "backup operation completed");
        if status != "created" {
            return Err(Error::internal(format!("BackupOp status is {status}")));
        }

        let file_id = operation
            .get_i32("file_id")
            .filter(|id| *id != 0)
            .ok_or_else(|| Error::internal("BackupOp.file_id is not set"))?;

        let mut client = self.client().await?;
        let file = client
            .get(BACKUP_FILE, file_id, FieldVisibility::all())
            .await?;
        let uri = file.get_str("uri").unwrap_or_default();
        let expected = file.get_str("checksum").unwrap_or_default();

        tracing::info!(%uri, local = %local.display(), "downloading backup");
        let download = client.transfer().download_file(&uri, local).await?;

        if download.status != TransferStatus::Success {
            return Err(Error::internal(format!(
                "Download of {uri} ended with status {}",
                download.status
            )));
        }
        verify_checksum(None, &expected, &download.checksum)?;

        Ok(BackupReport {
            status: download.status.to_string(),
            checksum: download.checksum,
            chunks: download.chunks,
            bytes: download.bytes,
        })
    }

    /// Restores the backup stored in `local`, uploading it under a name derived from the
    /// current time.
    pub async fn restore(&mut self, local: &Path) -> Result<BackupReport, Error> {
        self.restore_to(local, RestoreTarget::now()).await
    }

    /// Restores the backup stored in `local`, uploading it to `target`.
    ///
    /// # Returns
    ///
    /// * `Ok(BackupReport)` - What the server received. The status is `SUCCESS` when the server
    ///   restored the backup, `FAILURE` when it reported any other outcome.
    /// * `Err(Error)` - If the upload failed, or one of the models could not be created.
    pub async fn restore_to(
        &mut self,
        local: &Path,
        target: RestoreTarget,
    ) -> Result<BackupReport, Error> {
        let chunk_size = self.session.chunk_size;
        let mut client = self.client().await?;

        tracing::info!(local = %local.display(), uri = %target.uri, "uploading backup");
        let upload = client
            .transfer()
            .upload_file(local, &target.uri, chunk_size)
            .await?;

        if upload.remote.status != TransferStatus::Success.as_str() {
            return Err(Error::internal(format!(
                "Upload status was {}",
                upload.remote.status
            )));
        }
        verify_checksum(None, &upload.checksum, &upload.remote.checksum)?;

        let file = client
            .create(
                BACKUP_FILE,
                &fields([
                    ("name", target.name.as_str()),
                    ("uri", target.uri.as_str()),
                    ("checksum", upload.checksum.as_str()),
                ]),
            )
            .await?;
        tracing::info!(id = file.id, "created backup file");

        let file_id = file.id.to_string();
        let created = client
            .create(
                BACKUP_OPERATION,
                &fields([("operation", "restore"), ("file_id", file_id.as_str())]),
            )
            .await?;
        tracing::info!(id = created.id, uuid = ?created.uuid, "created restore operation");

        let uuid = created.uuid.ok_or_else(|| {
            Error::internal(format!("{BACKUP_OPERATION} {} has no uuid", created.id))
        })?;

        let mut wait = FindModel::new(
            self.catalog.clone(),
            self.session.clone(),
            BACKUP_OPERATION,
            fields([("uuid", uuid.as_str())]),
        );
        let convergence = Convergence {
            until_found: true,
            until_enacted: true,
            until_status: true,
        };
        let operation = self.poller.poll(&mut wait, convergence).await?;

        let status = operation.get_str("status").unwrap_or_default();
        tracing::info!(id = created.id, %status, "restore operation completed");

        Ok(BackupReport {
            status: if status == "restored" { "SUCCESS" } else { "FAILURE" }.to_string(),
            checksum: upload.remote.checksum,
            chunks: u64::try_from(upload.remote.chunks_received).unwrap_or_default(),
            bytes: u64::try_from(upload.remote.bytes_received).unwrap_or_default(),
        })
    }
}

fn fields<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
