use limbo_storage::*;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::task::Poll;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

async fn storage_in(temp: &TempDir) -> FileStorage {
    FileStorage::builder()
        .directory(temp.path().join("storage"))
        .max_store_time(Duration::from_secs(60))
        .build()
        .await
        .unwrap()
}

fn backdate(path: &Path, age: Duration) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

async fn fast_sweeping_storage_in(temp: &TempDir) -> FileStorage {
    FileStorage::builder()
        .directory(temp.path().join("storage"))
        .max_store_time(Duration::from_secs(60))
        .retention(
            RetentionPolicy::default()
                .with_scan_interval(Duration::from_millis(10))
                .with_poll_interval(Duration::from_millis(20)),
        )
        .build()
        .await
        .unwrap()
}

#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLog {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn temp_entries(storage: &FileStorage) -> Vec<String> {
    std::fs::read_dir(storage.temp_directory())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect()
}

#[tokio::test]
async fn test_empty_upload_enumerate_and_remove() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    let stored = storage.open_file_writer("a").await.unwrap().commit().await.unwrap();
    assert_eq!(stored.size, 0);

    let files = storage.enumerate_files().await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].url_name, "a");
    assert_eq!(files[0].display_name, "a");
    assert_eq!(files[0].disk_path, storage.storage_directory().join("a"));
    assert_eq!(files[0].size, 0);

    storage.remove_file("a").await.unwrap();
    assert!(storage.enumerate_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_all_files_clears_both_directories() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    for name in ["file1.zip", "file2.txt"] {
        let mut upload = storage.open_file_writer(name).await.unwrap();
        upload.write(name.as_bytes()).await.unwrap();
        upload.commit().await.unwrap();
    }
    let abandoned = storage.open_file_writer("partial.bin").await.unwrap();
    drop(abandoned);

    let names: Vec<_> =
        storage.enumerate_files().await.unwrap().into_iter().map(|f| f.url_name).collect();
    assert_eq!(names, ["file1.zip", "file2.txt"]);

    assert_eq!(storage.remove_all_files().await.unwrap(), 3);
    assert!(storage.enumerate_files().await.unwrap().is_empty());
    assert!(temp_entries(&storage).is_empty());
    assert!(storage.temp_directory().is_dir(), "directories survive remove_all_files");
}

#[tokio::test]
async fn test_remove_all_files_logs_each_removal() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    let mut upload = storage.open_file_writer("kept.bin").await.unwrap();
    upload.write(b"12345").await.unwrap();
    upload.commit().await.unwrap();
    drop(storage.open_file_writer("partial.bin").await.unwrap());

    let log = CapturedLog::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(log.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    assert_eq!(storage.remove_all_files().await.unwrap(), 2);

    let text = log.text();
    let removals: Vec<_> = text.lines().filter(|line| line.contains("Removed file")).collect();
    assert_eq!(removals.len(), 2, "log was: {text}");
    assert!(removals.iter().all(|line| line.contains("size=")), "log was: {text}");
    assert!(removals.iter().any(|line| line.contains("size=5")), "log was: {text}");
    assert!(removals.iter().any(|line| line.contains("temp file")), "log was: {text}");
}

#[tokio::test]
async fn test_existing_destination_is_never_touched() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    let mut upload = storage.open_file_writer("dup.txt").await.unwrap();
    upload.write(b"first").await.unwrap();
    let stored = upload.commit().await.unwrap();

    let err = storage.open_file_writer("dup.txt").await.expect_err("name is taken");
    assert!(err.is_conflict(), "unexpected error: {err:?}");

    // Different raw names that canonicalize to the same disk name collide as well.
    let err = storage.open_file_writer("dup.txt. ").await.expect_err("name is taken");
    assert!(err.is_conflict(), "unexpected error: {err:?}");

    assert_eq!(std::fs::read(&stored.disk_path).unwrap(), b"first");
    assert!(temp_entries(&storage).is_empty(), "a rejected upload creates no temp file");
}

#[tokio::test]
async fn test_commit_loses_race_without_overwriting() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    let mut slow = storage.open_file_writer("race.txt").await.unwrap();
    let mut fast = storage.open_file_writer("race.txt").await.unwrap();
    assert_ne!(slow.temp_path(), fast.temp_path());

    fast.write(b"fast").await.unwrap();
    fast.commit().await.unwrap();

    slow.write(b"slow").await.unwrap();
    let err = slow.commit().await.expect_err("destination was claimed");
    match err {
        StorageError::DestinationExists { .. } => {},
        other => panic!("unexpected error: {other:?}"),
    }

    let target = storage.resolve_for_read("race.txt").unwrap();
    assert_eq!(std::fs::read(target.path()).unwrap(), b"fast");
}

#[tokio::test]
async fn test_commit_never_replaces_a_file_created_behind_its_back() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    let mut upload = storage.open_file_writer("ext.txt").await.unwrap();
    upload.write(b"upload").await.unwrap();
    let temp_path = upload.temp_path().to_path_buf();

    let destination = storage.storage_directory().join("ext.txt");
    std::fs::write(&destination, b"external").unwrap();

    let err = upload.commit().await.expect_err("destination appeared before commit");
    assert!(err.is_conflict(), "unexpected error: {err:?}");
    assert_eq!(std::fs::read(&destination).unwrap(), b"external");
    assert!(temp_path.exists(), "rejected upload stays for the retention sweep");
}

#[tokio::test]
async fn test_commit_leaves_no_temp_file_behind() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    let mut upload = storage.open_file_writer("clean.txt").await.unwrap();
    upload.write(b"body").await.unwrap();
    let stored = upload.commit().await.unwrap();

    assert_eq!(std::fs::read(&stored.disk_path).unwrap(), b"body");
    assert!(temp_entries(&storage).is_empty());
}

#[tokio::test]
async fn test_upload_is_invisible_until_commit() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    let mut upload = storage.open_file_writer("report?.pdf").await.unwrap();
    upload.write(b"half of the ").await.unwrap();

    assert!(storage.enumerate_files().await.unwrap().is_empty());
    assert!(!upload.final_path().exists());
    assert_eq!(upload.final_path(), storage.storage_directory().join("report_.pdf"));

    let temp_name = upload.temp_path().file_name().unwrap().to_str().unwrap().to_owned();
    let (prefix, rest) = temp_name.split_once('.').unwrap();
    assert_eq!(prefix.len(), 32);
    assert!(prefix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    assert_eq!(rest, "report_.pdf");
    assert_eq!(upload.temp_path().parent().unwrap(), storage.temp_directory());

    upload.write(b"payload").await.unwrap();
    assert_eq!(upload.written(), 19);
    let stored = upload.commit().await.unwrap();

    assert_eq!(stored.size, 19);
    assert!(temp_entries(&storage).is_empty());
    assert_eq!(std::fs::read(&stored.disk_path).unwrap(), b"half of the payload");
}

#[tokio::test]
async fn test_stream_upload_and_read_back() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    let mut upload = storage.open_file_writer("blob.bin").await.unwrap();
    let copied = upload.write_from(&mut payload.as_slice()).await.unwrap();
    assert_eq!(copied, payload.len() as u64);
    upload.commit().await.unwrap();

    let (target, mut file) = storage.open_file_reader("blob.bin").await.unwrap();
    assert_eq!(target.display_name, "blob.bin");
    let mut read = Vec::new();
    file.read_to_end(&mut read).await.unwrap();
    assert_eq!(read, payload);
}

#[tokio::test]
async fn test_missing_files_report_not_found() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    assert!(storage.remove_file("ghost.txt").await.unwrap_err().is_not_found());
    assert!(storage.open_file_reader("ghost.txt").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_resolve_for_read_canonicalizes_without_io() {
    let temp = TempDir::new().unwrap();
    let storage = FileStorage::builder()
        .directory(temp.path().join("never-created"))
        .create(false)
        .build()
        .await
        .unwrap();

    let target = storage.resolve_for_read("con").unwrap();
    assert_eq!(target.disk_name.as_str(), "DEV");
    assert_eq!(target.display_name, "DEV");
    assert_eq!(target.path(), storage.storage_directory().join("DEV"));
    assert!(!storage.storage_directory().exists());
}

#[tokio::test]
async fn test_lazy_directories_are_created_on_first_upload() {
    let temp = TempDir::new().unwrap();
    let storage = FileStorage::builder()
        .directory(temp.path().join("lazy"))
        .create(false)
        .build()
        .await
        .unwrap();

    assert!(storage.storage_directory().is_absolute());
    assert!(storage.enumerate_files().await.unwrap().is_empty());
    assert_eq!(storage.remove_all_files().await.unwrap(), 0);
    assert_eq!(storage.check_retention().await.unwrap(), SweepReport::default());

    storage.open_file_writer("x").await.unwrap().commit().await.unwrap();
    assert!(storage.temp_directory().is_dir());
    assert_eq!(storage.enumerate_files().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_enumeration_skips_foreign_entries() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    std::fs::write(storage.storage_directory().join("aux"), b"not canonical").unwrap();
    std::fs::write(storage.storage_directory().join("trailing."), b"not canonical").unwrap();
    std::fs::create_dir(storage.storage_directory().join("folder")).unwrap();
    std::fs::write(storage.storage_directory().join("b.txt"), b"bb").unwrap();
    std::fs::write(storage.storage_directory().join("a.txt"), b"a").unwrap();

    let files = storage.enumerate_files().await.unwrap();
    let summary: Vec<_> = files.iter().map(|f| (f.url_name.as_str(), f.size)).collect();
    assert_eq!(summary, [("a.txt", 1), ("b.txt", 2)]);
}

#[tokio::test]
async fn test_retention_removes_outdated_files_and_abandoned_uploads() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    for name in ["old.txt", "new.txt"] {
        storage.open_file_writer(name).await.unwrap().commit().await.unwrap();
    }
    let old = storage.resolve_for_read("old.txt").unwrap().path();
    backdate(&old, Duration::from_secs(120));

    let mut stale = storage.open_file_writer("stale.bin").await.unwrap();
    stale.write(b"never finished").await.unwrap();
    let stale_path = stale.temp_path().to_path_buf();
    drop(stale);
    backdate(&stale_path, Duration::from_secs(16 * 60));

    let recent = storage.open_file_writer("recent.bin").await.unwrap();
    let recent_path = recent.temp_path().to_path_buf();
    drop(recent);

    let report = storage.check_retention().await.unwrap();
    assert_eq!(report, SweepReport { removed: 2, failed: 0 });

    assert!(!old.exists());
    assert!(!stale_path.exists());
    assert!(recent_path.exists(), "temp files younger than the temp max age stay");
    let names: Vec<_> =
        storage.enumerate_files().await.unwrap().into_iter().map(|f| f.url_name).collect();
    assert_eq!(names, ["new.txt"]);
}

#[tokio::test]
async fn test_background_sweep_removes_outdated_files() {
    let temp = TempDir::new().unwrap();
    let storage = fast_sweeping_storage_in(&temp).await;

    let stored = storage.open_file_writer("expired.log").await.unwrap().commit().await.unwrap();
    backdate(&stored.disk_path, Duration::from_secs(3600));

    storage.start().unwrap();
    assert_eq!(storage.state(), LifecycleState::Started);

    let gone = tokio::time::timeout(Duration::from_secs(10), async {
        while stored.disk_path.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(gone.is_ok(), "sweep did not remove the outdated file");

    storage.stop().await.unwrap();
    assert_eq!(storage.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_stop_interrupts_the_wait() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;

    storage.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The default poll interval is a minute; stop must not wait it out.
    tokio::time::timeout(Duration::from_secs(5), storage.stop())
        .await
        .expect("stop waited for the poll interval")
        .unwrap();
    assert_eq!(storage.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_lifecycle_transitions() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;
    assert_eq!(storage.state(), LifecycleState::Created);

    storage.stop().await.unwrap();
    assert_eq!(storage.state(), LifecycleState::Created, "stop before start is a no-op");

    storage.start().unwrap();
    let err = storage.clone().start().expect_err("already started");
    assert!(matches!(err, StorageError::InvalidState { .. }));

    storage.stop().await.unwrap();
    storage.stop().await.unwrap();
    assert_eq!(storage.state(), LifecycleState::Stopped);

    storage.start().unwrap();
    assert_eq!(storage.state(), LifecycleState::Started);
    storage.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_sweep_runs_after_stop() {
    let temp = TempDir::new().unwrap();
    let storage = fast_sweeping_storage_in(&temp).await;

    storage.start().unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    storage.stop().await.unwrap();

    let stored = storage.open_file_writer("late.log").await.unwrap().commit().await.unwrap();
    backdate(&stored.disk_path, Duration::from_secs(3600));

    // Several poll intervals pass with nothing running.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(stored.disk_path.exists(), "a stopped manager swept a file");
    assert_eq!(storage.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_cancelled_stop_allows_restart() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;
    storage.start().unwrap();

    let mut stopping = Box::pin(storage.stop());
    let first = std::future::poll_fn(|cx| Poll::Ready(stopping.as_mut().poll(cx))).await;
    assert!(first.is_pending(), "the sweep task has not had a chance to exit yet");
    drop(stopping);

    tokio::time::sleep(Duration::from_millis(200)).await;

    storage.start().unwrap();
    assert_eq!(storage.state(), LifecycleState::Started);
    storage.stop().await.unwrap();
    assert_eq!(storage.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_cancelled_stop_can_be_finished() {
    let temp = TempDir::new().unwrap();
    let storage = storage_in(&temp).await;
    storage.start().unwrap();

    let mut stopping = Box::pin(storage.stop());
    let first = std::future::poll_fn(|cx| Poll::Ready(stopping.as_mut().poll(cx))).await;
    assert!(first.is_pending());
    drop(stopping);
    assert_eq!(storage.state(), LifecycleState::Stopping);

    tokio::time::timeout(Duration::from_secs(5), storage.stop())
        .await
        .expect("second stop hung")
        .unwrap();
    assert_eq!(storage.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_zero_waits_are_rejected_at_build() {
    let temp = TempDir::new().unwrap();

    for policy in [
        RetentionPolicy::default().with_poll_interval(Duration::ZERO),
        RetentionPolicy::default().with_error_backoff(Duration::ZERO),
    ] {
        let err = FileStorage::builder()
            .directory(temp.path().join("storage"))
            .retention(policy)
            .build()
            .await
            .expect_err("zero wait accepted");
        assert!(matches!(err, StorageError::InvalidConfiguration { .. }), "unexpected: {err:?}");
    }
    assert!(!temp.path().join("storage").exists(), "nothing is created for a rejected policy");
}
