use art_slideshow::error::IndexError;
use art_slideshow::image_index::ImageIndex;
use art_slideshow::index_watcher::IndexService;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

async fn wait_for_entries(index: &ImageIndex, expected: &[&str]) {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        let snapshot = index.snapshot().await;
        if snapshot.iter().map(String::as_str).eq(expected.iter().copied()) {
            return;
        }
        if Instant::now() > deadline {
            panic!("index never settled on {:?}, last saw {:?}", expected, snapshot);
        }
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn picks_up_added_and_removed_images() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.png"), b"a").unwrap();

    let service = IndexService::start(dir.path()).await.unwrap();
    let index = service.index();
    assert_eq!(index.len().await, 1);

    std::fs::write(dir.path().join("b.jpg"), b"b").unwrap();
    wait_for_entries(&index, &["a.png", "b.jpg"]).await;

    std::fs::remove_file(dir.path().join("a.png")).unwrap();
    wait_for_entries(&index, &["b.jpg"]).await;
    assert_eq!(index.pick_random().await.unwrap().image, "b.jpg");

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn picks_up_moved_in_directories_and_ignores_hidden_files() {
    let dir = tempfile::tempdir().unwrap();
    let service = IndexService::start(dir.path()).await.unwrap();
    let index = service.index();
    assert!(index.is_empty().await);

    // staged under a dot-directory, then moved into view in one rename
    let staging = dir.path().join(".staging").join("2024");
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("snow.gif"), b"gif").unwrap();
    std::fs::write(dir.path().join(".upload.png"), b"tmp").unwrap();
    sleep(Duration::from_millis(200)).await;
    assert!(index.is_empty().await);

    std::fs::rename(&staging, dir.path().join("2024")).unwrap();
    wait_for_entries(&index, &["2024/snow.gif"]).await;

    std::fs::rename(dir.path().join(".upload.png"), dir.path().join("upload.png")).unwrap();
    wait_for_entries(&index, &["2024/snow.gif", "upload.png"]).await;

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn keeps_watching_after_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let service = IndexService::start(dir.path()).await.unwrap();
    let index = service.index();

    service.restart_watcher();
    std::fs::write(dir.path().join("after.webp"), b"w").unwrap();
    wait_for_entries(&index, &["after.webp"]).await;

    std::fs::write(dir.path().join("later.bmp"), b"b").unwrap();
    wait_for_entries(&index, &["after.webp", "later.bmp"]).await;

    service.shutdown().await;
}

#[tokio::test]
async fn refuses_to_start_without_a_directory() {
    let dir = tempfile::tempdir().unwrap();

    let err = IndexService::start(dir.path().join("missing")).await.err().unwrap();
    assert!(matches!(err, IndexError::MissingRoot(_)));
    assert!(err.is_startup_misconfiguration());

    let file = dir.path().join("file.png");
    std::fs::write(&file, b"x").unwrap();
    let err = IndexService::start(&file).await.err().unwrap();
    assert!(matches!(err, IndexError::NotADirectory(_)));
}
