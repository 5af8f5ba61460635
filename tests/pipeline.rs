//! Tailer-to-queue integration over real files.

use std::{sync::Arc, time::Duration};

use mes_sensor::{config::AppConfig, queue::EventBatchQueue, tailer::FileTailer};
use tokio_util::sync::CancellationToken;

fn alert_line(sid: i64, timestamp: &str) -> String {
    format!(
        r#"{{"timestamp":"{timestamp}","seconds":1543675989,"action":"allow","class":"none","dir":"C2S","iface":"eth0","msg":"(stream_ip) fragmentation overlap","priority":3,"proto":"IP","gid":123,"rev":1,"sid":{sid},"rule":"123:{sid}:1","ttl":111}}"#
    )
}

fn config_for(path: &std::path::Path, testing_mode: bool) -> AppConfig {
    AppConfig { file: path.display().to_string(), testing_mode, ..Default::default() }
}

async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

#[tokio::test]
async fn read_once_mode_drains_file_and_tolerates_bad_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("alert_json.txt");
    let contents =
        format!("{}\n{{not json}}\n{}\n", alert_line(100, "t1"), alert_line(100, "t2"));
    std::fs::write(&path, contents).expect("write alert file");

    let queue = Arc::new(EventBatchQueue::new(1));
    let tailer = Arc::new(FileTailer::new(&config_for(&path, true)));

    tailer
        .run(CancellationToken::new(), Arc::clone(&queue))
        .await
        .expect("read-once run must succeed");

    // The malformed middle line is dropped; the two valid lines share an
    // identity and coalesce into one event.
    let drained = queue.drain();
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].event_metrics_count, 2);
}

#[tokio::test]
async fn read_once_mode_processes_final_unterminated_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("alert_json.txt");
    // No trailing newline on the last line.
    let contents = format!("{}\n{}", alert_line(100, "t1"), alert_line(101, "t1"));
    std::fs::write(&path, contents).expect("write alert file");

    let queue = Arc::new(EventBatchQueue::new(1));
    let tailer = Arc::new(FileTailer::new(&config_for(&path, true)));
    tailer
        .run(CancellationToken::new(), Arc::clone(&queue))
        .await
        .expect("read-once run must succeed");

    assert_eq!(queue.size(), 2);
}

#[tokio::test]
async fn missing_file_is_a_startup_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("does_not_exist.txt");

    let queue = Arc::new(EventBatchQueue::new(1));
    let tailer = Arc::new(FileTailer::new(&config_for(&path, true)));
    let result = tailer.run(CancellationToken::new(), queue).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn follow_mode_picks_up_appended_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("alert_json.txt");
    std::fs::write(&path, format!("{}\n", alert_line(100, "t1"))).expect("write alert file");

    let queue = Arc::new(EventBatchQueue::new(60));
    let tailer = Arc::new(FileTailer::new(&config_for(&path, false)));
    let token = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&tailer).run(token.clone(), Arc::clone(&queue)));

    {
        let queue = Arc::clone(&queue);
        assert!(
            wait_until(move || queue.event_size() == 1, Duration::from_secs(5)).await,
            "initial line must be picked up"
        );
    }

    {
        use std::io::Write;
        let mut file =
            std::fs::OpenOptions::new().append(true).open(&path).expect("open for append");
        writeln!(file, "{}", alert_line(100, "t2")).expect("append alert line");
    }

    {
        let queue = Arc::clone(&queue);
        assert!(
            wait_until(move || queue.event_size() == 2, Duration::from_secs(5)).await,
            "appended line must be picked up"
        );
    }

    token.cancel();
    handle.await.expect("tailer task").expect("tailer run");
}

#[tokio::test]
async fn truncated_file_is_reread_from_the_start() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("alert_json.txt");
    std::fs::write(&path, format!("{}\n{}\n", alert_line(100, "t1"), alert_line(100, "t2")))
        .expect("write alert file");

    let queue = Arc::new(EventBatchQueue::new(60));
    let tailer = Arc::new(FileTailer::new(&config_for(&path, false)));
    let token = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&tailer).run(token.clone(), Arc::clone(&queue)));

    {
        let queue = Arc::clone(&queue);
        assert!(wait_until(move || queue.event_size() == 2, Duration::from_secs(5)).await);
    }

    // Shrink in place, give the poller a chance to notice, then write the
    // replacement content.
    std::fs::write(&path, "").expect("truncate alert file");
    tokio::time::sleep(Duration::from_millis(600)).await;
    std::fs::write(&path, format!("{}\n", alert_line(101, "t3"))).expect("write new content");

    {
        let queue = Arc::clone(&queue);
        assert!(
            wait_until(move || queue.size() == 2, Duration::from_secs(5)).await,
            "content written after truncation must be picked up"
        );
    }

    token.cancel();
    handle.await.expect("tailer task").expect("tailer run");
}

#[tokio::test]
async fn rotated_file_is_followed_to_the_new_inode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("alert_json.txt");
    std::fs::write(&path, format!("{}\n", alert_line(100, "t1"))).expect("write alert file");

    let queue = Arc::new(EventBatchQueue::new(60));
    let tailer = Arc::new(FileTailer::new(&config_for(&path, false)));
    let token = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&tailer).run(token.clone(), Arc::clone(&queue)));

    {
        let queue = Arc::clone(&queue);
        assert!(wait_until(move || queue.event_size() == 1, Duration::from_secs(5)).await);
    }

    std::fs::rename(&path, dir.path().join("alert_json.txt.1")).expect("rotate alert file");
    std::fs::write(&path, format!("{}\n", alert_line(101, "t2"))).expect("write new alert file");

    {
        let queue = Arc::clone(&queue);
        assert!(
            wait_until(move || queue.size() == 2, Duration::from_secs(5)).await,
            "lines in the rotated-in file must be picked up"
        );
    }

    token.cancel();
    handle.await.expect("tailer task").expect("tailer run");
}

#[tokio::test]
async fn stop_is_idempotent_and_terminates_follow_mode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("alert_json.txt");
    std::fs::write(&path, "").expect("write alert file");

    let queue = Arc::new(EventBatchQueue::new(1));
    let tailer = Arc::new(FileTailer::new(&config_for(&path, false)));
    let handle = tokio::spawn(Arc::clone(&tailer).run(CancellationToken::new(), queue));

    tokio::time::sleep(Duration::from_millis(100)).await;
    tailer.stop();
    tailer.stop();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("tailer must stop after stop()");
    result.expect("tailer task").expect("tailer run");
    assert_eq!(tailer.read_per_second(), 0, "counters are zeroed on shutdown");
}

#[tokio::test]
async fn truncate_on_exit_empties_the_alert_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("alert_json.txt");
    std::fs::write(&path, format!("{}\n", alert_line(100, "t1"))).expect("write alert file");

    let mut config = config_for(&path, true);
    config.truncate_on_exit = true;

    let queue = Arc::new(EventBatchQueue::new(1));
    let tailer = Arc::new(FileTailer::new(&config));
    tailer.run(CancellationToken::new(), Arc::clone(&queue)).await.expect("run");

    assert_eq!(queue.size(), 1);
    let metadata = std::fs::metadata(&path).expect("stat alert file");
    assert_eq!(metadata.len(), 0);
}
