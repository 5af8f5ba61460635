//! Conversion of decoded alerts into wire events.
//!
//! [`build_event`] splits one alert into the identity part (stable across
//! repetitions of the same alert) and the per-occurrence metric part, and
//! stamps the identity fingerprint that the batch queue coalesces on.

use sha2::{Digest, Sha256};

use crate::{
    models::SnortAlert,
    pb::{Metric, SensorEvent},
};

/// Version string stamped into every event's `sensor_version`.
pub const SENSOR_VERSION: &str = env!("CARGO_PKG_VERSION");

fn hash_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn hash_opt_str(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1]);
            hash_str(hasher, v);
        }
        None => hasher.update([0]),
    }
}

fn hash_i64(hasher: &mut Sha256, value: i64) {
    hasher.update(value.to_be_bytes());
}

fn hash_opt_i64(hasher: &mut Sha256, value: Option<i64>) {
    match value {
        Some(v) => {
            hasher.update([1]);
            hash_i64(hasher, v);
        }
        None => hasher.update([0]),
    }
}

/// Hex-encoded SHA-256 over the canonical identity projection of `event`.
///
/// Only identity fields participate. The metrics array, the three
/// timestamps and the stored fingerprint itself are never visited, so the
/// value is stable while an entry coalesces and two alerts agree on it
/// exactly when every identity field matches. Strings are length-prefixed
/// and options tagged, so adjacent fields cannot run into each other.
pub fn identity_fingerprint(event: &SensorEvent) -> String {
    let mut hasher = Sha256::new();
    hash_str(&mut hasher, &event.sensor_id);
    hash_str(&mut hasher, &event.sensor_version);
    hash_opt_str(&mut hasher, event.snort_action.as_deref());
    hash_opt_str(&mut hasher, event.snort_classification.as_deref());
    hash_opt_str(&mut hasher, event.snort_direction.as_deref());
    hash_str(&mut hasher, &event.snort_interface);
    hash_str(&mut hasher, &event.snort_message);
    hash_i64(&mut hasher, event.snort_priority);
    hash_str(&mut hasher, &event.snort_protocol);
    hash_i64(&mut hasher, event.snort_rule_gid);
    hash_i64(&mut hasher, event.snort_rule_rev);
    hash_i64(&mut hasher, event.snort_rule_sid);
    hash_str(&mut hasher, &event.snort_rule);
    hash_i64(&mut hasher, event.snort_seconds);
    hash_opt_str(&mut hasher, event.snort_service.as_deref());
    hash_opt_i64(&mut hasher, event.snort_type_of_service);
    hex::encode(hasher.finalize())
}

/// Builds the wire event skeleton and the per-occurrence metric for one
/// decoded alert.
///
/// The returned event carries the filled identity fields, a metrics array
/// holding exactly the returned metric, `event_metrics_count == 1` and
/// `event_read_at == read_at`. The fingerprint is computed after the
/// identity fields are set and before the timestamps or the metrics array
/// are populated.
pub fn build_event(alert: &SnortAlert, sensor_id: &str, read_at: i64) -> (SensorEvent, Metric) {
    let metric = Metric {
        snort_timestamp: alert.timestamp.clone(),
        snort_base64_data: alert.base64_data.clone(),
        snort_client_bytes: alert.client_bytes,
        snort_client_pkts: alert.client_pkts,
        snort_server_bytes: alert.server_bytes,
        snort_server_pkts: alert.server_pkts,
        snort_src_address: alert.src_addr.clone(),
        snort_src_port: alert.src_port,
        snort_src_ap: alert.src_ap.clone(),
        snort_dst_address: alert.dst_addr.clone(),
        snort_dst_port: alert.dst_port,
        snort_dst_ap: alert.dst_ap.clone(),
        snort_eth_src: alert.eth_src.clone(),
        snort_eth_dst: alert.eth_dst.clone(),
        snort_eth_type: alert.eth_type.clone(),
        snort_eth_len: alert.eth_len,
        snort_flowstart_time: alert.flowstart_time,
        snort_geneve_vni: alert.geneve_vni,
        snort_icmp_code: alert.icmp_code,
        snort_icmp_id: alert.icmp_id,
        snort_icmp_seq: alert.icmp_seq,
        snort_icmp_type: alert.icmp_type,
        snort_ip_id: alert.ip_id,
        snort_ip_length: alert.ip_length,
        snort_mpls: alert.mpls,
        snort_pkt_gen: alert.pkt_gen.clone(),
        snort_pkt_length: alert.pkt_length,
        snort_pkt_number: alert.pkt_number,
        snort_sgt: alert.sgt,
        snort_target: alert.target.clone(),
        snort_tcp_ack: alert.tcp_ack,
        snort_tcp_flags: alert.tcp_flags.clone(),
        snort_tcp_len: alert.tcp_len,
        snort_tcp_seq: alert.tcp_seq,
        snort_tcp_win: alert.tcp_win,
        snort_time_to_live: alert.time_to_live,
        snort_udp_length: alert.udp_length,
        snort_vlan: alert.vlan,
    };

    let mut event = SensorEvent {
        sensor_id: sensor_id.to_owned(),
        sensor_version: SENSOR_VERSION.to_owned(),
        event_hash_sha256: String::new(),
        event_read_at: 0,
        event_sent_at: 0,
        event_received_at: 0,
        event_metrics_count: 1,
        snort_action: alert.action.clone(),
        snort_classification: alert.classification.clone(),
        snort_direction: alert.direction.clone(),
        snort_interface: alert.interface.clone(),
        snort_message: alert.message.clone(),
        snort_priority: alert.priority,
        snort_protocol: alert.protocol.clone(),
        snort_rule_gid: alert.gid,
        snort_rule_rev: alert.revision,
        snort_rule_sid: alert.sid,
        snort_rule: alert.rule.clone(),
        snort_seconds: alert.seconds,
        snort_service: alert.service.clone(),
        snort_type_of_service: alert.type_of_service,
        metrics: Vec::new(),
    };

    event.event_hash_sha256 = identity_fingerprint(&event);
    event.event_read_at = read_at;
    event.metrics.push(metric.clone());

    (event, metric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::decode_alert;

    fn sample_alert(timestamp: &str, sid: i64) -> SnortAlert {
        let line = format!(
            r#"{{"timestamp":"{timestamp}","seconds":1543675989,"action":"allow","class":"none","dir":"C2S","iface":"eth0","msg":"(stream_ip) fragmentation overlap","priority":3,"proto":"IP","gid":123,"rev":1,"sid":{sid},"rule":"123:{sid}:1","ttl":111,"src_addr":"172.16.0.5","dst_addr":"192.168.50.1"}}"#
        );
        decode_alert(&line).expect("sample line must decode")
    }

    #[test]
    fn builds_event_skeleton_with_single_metric() {
        let alert = sample_alert("18/12/01-14:53:09.797526", 8);
        let (event, metric) = build_event(&alert, "sensor1", 1_732_161_973_907_043);

        assert_eq!(event.event_metrics_count, 1);
        assert_eq!(event.metrics.len(), 1);
        assert_eq!(event.metrics[0], metric);
        assert_eq!(event.event_read_at, 1_732_161_973_907_043);
        assert_eq!(event.event_sent_at, 0);
        assert_eq!(event.event_received_at, 0);
        assert_eq!(event.sensor_id, "sensor1");
        assert_eq!(metric.snort_timestamp, "18/12/01-14:53:09.797526");
    }

    #[test]
    fn identical_identity_yields_identical_fingerprint() {
        // Same identity, different per-occurrence timestamp.
        let (a, _) = build_event(&sample_alert("18/12/01-14:53:09.797526", 8), "s1", 1);
        let (b, _) = build_event(&sample_alert("18/12/01-14:53:09.797527", 8), "s1", 2);
        assert_eq!(a.event_hash_sha256, b.event_hash_sha256);
    }

    #[test]
    fn any_identity_difference_changes_the_fingerprint() {
        let (a, _) = build_event(&sample_alert("t", 8), "s1", 1);
        let (b, _) = build_event(&sample_alert("t", 9), "s1", 1);
        let (c, _) = build_event(&sample_alert("t", 8), "s2", 1);
        assert_ne!(a.event_hash_sha256, b.event_hash_sha256);
        assert_ne!(a.event_hash_sha256, c.event_hash_sha256);
    }

    #[test]
    fn fingerprint_is_stable_across_coalescing() {
        let alert = sample_alert("t", 8);
        let (mut event, metric) = build_event(&alert, "s1", 1);

        // Growing the metrics array and stamping timestamps must not move
        // the fingerprint.
        event.metrics.push(metric.clone());
        event.metrics.push(metric);
        event.event_metrics_count = 3;
        event.event_sent_at = 42;

        assert_eq!(event.event_hash_sha256, identity_fingerprint(&event));
    }

    #[test]
    fn none_and_empty_string_hash_differently() {
        let mut alert = sample_alert("t", 8);
        alert.service = None;
        let (a, _) = build_event(&alert, "s1", 1);
        alert.service = Some(String::new());
        let (b, _) = build_event(&alert, "s1", 1);
        assert_ne!(a.event_hash_sha256, b.event_hash_sha256);
    }
}
