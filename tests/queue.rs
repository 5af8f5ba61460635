//! Coalescing behavior of the batch queue across timed scenarios.

use mes_sensor::{
    models::decode_alert,
    pb::{Metric, SensorEvent},
    processor::build_event,
    queue::EventBatchQueue,
};

fn alert_event(sid: i64, timestamp: &str) -> (SensorEvent, Metric) {
    let line = format!(
        r#"{{"timestamp":"{timestamp}","seconds":1543675989,"action":"allow","class":"none","dir":"C2S","iface":"eth0","msg":"(stream_ip) fragmentation overlap","priority":3,"proto":"IP","gid":123,"rev":1,"sid":{sid},"rule":"123:{sid}:1","src_addr":"172.16.0.5","dst_addr":"192.168.50.1","ttl":111}}"#
    );
    let alert = decode_alert(&line).expect("fixture line must decode");
    build_event(&alert, "sensor1", chrono::Utc::now().timestamp_micros())
}

#[test]
fn single_alert_flushes_as_single_event() {
    let queue = EventBatchQueue::new(1);
    let t0 = chrono::Utc::now().timestamp();
    let (event, metric) = alert_event(100, "t0");
    let expected_fingerprint = event.event_hash_sha256.clone();
    queue.add(event, metric);

    let flushed = queue.flush(t0 + 3);
    assert_eq!(flushed.len(), 1);
    assert_eq!(queue.size(), 0);

    let event = &flushed[0];
    assert_eq!(event.event_metrics_count, 1);
    assert_eq!(event.event_hash_sha256, expected_fingerprint);
    assert_eq!(event.sensor_id, "sensor1");
    assert_eq!(event.snort_rule_sid, 100);
    assert!(event.event_read_at > 0);
}

#[test]
fn three_occurrences_coalesce_into_one_event() {
    let queue = EventBatchQueue::new(1);
    let t0 = chrono::Utc::now().timestamp();
    for timestamp in ["t1", "t2", "t3"] {
        let (event, metric) = alert_event(100, timestamp);
        queue.add(event, metric);
    }

    let flushed = queue.flush(t0 + 3);
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].event_metrics_count, 3);

    let stamps: Vec<&str> = flushed[0].metrics.iter().map(|m| m.snort_timestamp.as_str()).collect();
    assert_eq!(stamps, ["t1", "t2", "t3"], "metric order must follow append order");
}

#[test]
fn alerts_differing_only_in_sid_flush_separately() {
    let queue = EventBatchQueue::new(1);
    let t0 = chrono::Utc::now().timestamp();
    let (event_a, metric_a) = alert_event(100, "t");
    let (event_b, metric_b) = alert_event(101, "t");
    assert_ne!(event_a.event_hash_sha256, event_b.event_hash_sha256);

    queue.add(event_a, metric_a);
    queue.add(event_b, metric_b);

    let flushed = queue.flush(t0 + 3);
    assert_eq!(flushed.len(), 2);
    assert!(flushed.iter().all(|e| e.event_metrics_count == 1));
}

#[test]
fn late_straggler_resets_the_window() {
    // A two-second window lets a one-second-late straggler land inside it.
    let queue = EventBatchQueue::new(2);

    let first_add = chrono::Utc::now().timestamp();
    let (event, metric) = alert_event(100, "t1");
    queue.add(event, metric);

    std::thread::sleep(std::time::Duration::from_millis(1100));
    let (event, metric) = alert_event(100, "t2");
    queue.add(event, metric);
    let second_add = chrono::Utc::now().timestamp();

    // Stale relative to the first add alone, but the straggler refreshed
    // `updated_at`, so the entry must survive this flush.
    assert!(queue.flush(first_add + 3).is_empty());
    assert_eq!(queue.size(), 1);

    let flushed = queue.flush(second_add + 3);
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].event_metrics_count, 2);
}

#[test]
fn repeated_adds_within_window_are_idempotent_per_fingerprint() {
    let queue = EventBatchQueue::new(1);
    let t0 = chrono::Utc::now().timestamp();
    const REPEATS: i64 = 25;
    for i in 0..REPEATS {
        let (event, metric) = alert_event(100, &format!("t{i}"));
        queue.add(event, metric);
    }

    assert_eq!(queue.size(), 1);
    assert_eq!(queue.event_size(), REPEATS);

    let flushed = queue.flush(t0 + 3);
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].event_metrics_count, REPEATS);
    assert_eq!(flushed[0].metrics.len(), REPEATS as usize);
}

#[test]
fn flush_boundary_is_strict() {
    let queue = EventBatchQueue::new(1);
    let t0 = chrono::Utc::now().timestamp();
    let (event, metric) = alert_event(100, "t");
    queue.add(event, metric);

    // `updated_at` is at most one second past t0, so at t0+1 the window
    // cannot have elapsed, and by t0+3 it must have.
    assert!(queue.flush(t0 + 1).is_empty());
    assert_eq!(queue.flush(t0 + 3).len(), 1);
    assert_eq!(queue.size(), 0);
}
