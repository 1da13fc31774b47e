use common::server::{BACKUP_PAYLOAD, FakeConnector, FakeXos, sha256};
use modelctl_core::Error;
use modelctl_core::backup::{BackupWorkflow, RestoreTarget};
use modelctl_core::prost_reflect::DescriptorPool;
use modelctl_core::retry::{Deadline, RetryPoller, TracingObserver};
use std::time::Duration;

mod common;

fn workflow(server: &FakeXos) -> BackupWorkflow<FakeConnector, TracingObserver, DescriptorPool> {
    let poller = RetryPoller::new(
        FakeConnector::new(server.clone()),
        Deadline::after(Duration::from_secs(30)),
    );
    BackupWorkflow::new(poller, common::catalog(), common::session())
}

fn target() -> RestoreTarget {
    RestoreTarget {
        name: "restore-test".to_string(),
        uri: "file:///var/run/xos/backup/local/restore-test".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_backup_create_downloads_the_backup() {
    let server = FakeXos::new();
    server.state().sync_delay = 2;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("backup.sql");

    let report = workflow(&server).create(&local).await.unwrap();

    assert_eq!(report.status, "SUCCESS");
    assert_eq!(report.checksum, sha256(BACKUP_PAYLOAD));
    assert_eq!(report.bytes, BACKUP_PAYLOAD.len() as u64);
    assert_eq!(std::fs::read(&local).unwrap(), BACKUP_PAYLOAD);

    let calls = server.state().calls.clone();
    assert_eq!(calls.first().map(String::as_str), Some("CreateBackupOperation"));
    assert_eq!(
        calls.iter().filter(|c| *c == "GetBackupOperation").count(),
        3
    );
    assert_eq!(calls.last().map(String::as_str), Some("Download"));
}

#[tokio::test(start_paused = true)]
async fn test_backup_restore_succeeds() {
    let server = FakeXos::new();
    server.state().sync_delay = 1;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("backup.sql");
    std::fs::write(&local, BACKUP_PAYLOAD).unwrap();

    let report = workflow(&server)
        .restore_to(&local, target())
        .await
        .unwrap();

    assert_eq!(report.status, "SUCCESS");
    assert_eq!(report.checksum, sha256(BACKUP_PAYLOAD));
    assert_eq!(report.bytes, BACKUP_PAYLOAD.len() as u64);
    assert_eq!(
        server.state().files["file:///var/run/xos/backup/local/restore-test"],
        BACKUP_PAYLOAD
    );

    let calls = server.state().calls.clone();
    assert_eq!(
        calls[..3],
        ["Upload", "CreateBackupFile", "CreateBackupOperation"]
    );
    assert!(calls[3..].iter().all(|c| c == "FilterBackupOperation"));
}

#[tokio::test(start_paused = true)]
async fn test_backup_restore_rejects_a_corrupted_upload() {
    let server = FakeXos::new();
    server.state().corrupt_uploads = true;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("backup.sql");
    std::fs::write(&local, BACKUP_PAYLOAD).unwrap();

    let err = workflow(&server)
        .restore_to(&local, target())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ChecksumMismatch { .. }));
    // Nothing is registered for a file that didn't arrive intact.
    assert_eq!(server.state().calls, vec!["Upload"]);
}
