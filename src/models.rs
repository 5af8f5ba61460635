//! Decoded representation of one Snort3 `alert_json` line.

use serde::Deserialize;
use thiserror::Error;

/// Failure to decode one line of the alert file.
///
/// Per-line failures never stop the pipeline: the tailer logs the error at
/// debug level, drops the line and moves on.
#[derive(Debug, Error)]
#[error("malformed alert line: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// One alert as emitted by Snort3's `alert_json` logger.
///
/// The required fields are the ones Snort always writes; everything that
/// depends on the triggering packet is optional. Unknown fields are ignored
/// so that newer Snort builds do not break the sensor.
#[allow(missing_docs)]
#[derive(Debug, Clone, Deserialize)]
pub struct SnortAlert {
    /// Raw alert timestamp string, e.g. `"24/10/10-05:32:11.000107"`.
    pub timestamp: String,
    /// Alert timestamp truncated to the second.
    pub seconds: i64,
    /// Rule action, e.g. `"allow"` or `"block"`.
    pub action: Option<String>,
    #[serde(rename = "b64_data")]
    pub base64_data: Option<String>,
    #[serde(rename = "class")]
    pub classification: Option<String>,
    pub client_bytes: Option<i64>,
    pub client_pkts: Option<i64>,
    /// Flow direction relative to the rule, e.g. `"C2S"`.
    #[serde(rename = "dir")]
    pub direction: Option<String>,
    pub dst_addr: Option<String>,
    pub dst_ap: Option<String>,
    pub dst_port: Option<i64>,
    pub eth_dst: Option<String>,
    pub eth_len: Option<i64>,
    pub eth_src: Option<String>,
    pub eth_type: Option<String>,
    pub flowstart_time: Option<i64>,
    pub geneve_vni: Option<i64>,
    /// Rule generator id.
    pub gid: i64,
    pub icmp_code: Option<i64>,
    pub icmp_id: Option<i64>,
    pub icmp_seq: Option<i64>,
    pub icmp_type: Option<i64>,
    /// Capture interface (or pcap path in offline runs).
    #[serde(rename = "iface")]
    pub interface: String,
    pub ip_id: Option<i64>,
    #[serde(rename = "ip_len")]
    pub ip_length: Option<i64>,
    pub mpls: Option<i64>,
    /// Rule message.
    #[serde(rename = "msg")]
    pub message: String,
    pub pkt_gen: Option<String>,
    #[serde(rename = "pkt_len")]
    pub pkt_length: Option<i64>,
    #[serde(rename = "pkt_num")]
    pub pkt_number: Option<i64>,
    pub priority: i64,
    #[serde(rename = "proto")]
    pub protocol: String,
    /// Rule revision.
    #[serde(rename = "rev")]
    pub revision: i64,
    /// Composite rule string, e.g. `"1:54307:1"`.
    pub rule: String,
    pub server_bytes: Option<i64>,
    pub server_pkts: Option<i64>,
    pub service: Option<String>,
    pub sgt: Option<i64>,
    /// Rule signature id.
    pub sid: i64,
    pub src_addr: Option<String>,
    pub src_ap: Option<String>,
    pub src_port: Option<i64>,
    pub target: Option<String>,
    pub tcp_ack: Option<i64>,
    pub tcp_flags: Option<String>,
    pub tcp_len: Option<i64>,
    pub tcp_seq: Option<i64>,
    pub tcp_win: Option<i64>,
    #[serde(rename = "tos")]
    pub type_of_service: Option<i64>,
    #[serde(rename = "ttl")]
    pub time_to_live: Option<i64>,
    #[serde(rename = "udp_len")]
    pub udp_length: Option<i64>,
    pub vlan: Option<i64>,
}

/// Decodes one line of the alert file.
pub fn decode_alert(line: &str) -> Result<SnortAlert, DecodeError> {
    Ok(serde_json::from_str(line)?)
}
