// record.rs — Parsed shape of one appliance audit-log entry.
//
// The struct mirrors the appliance's JSON item layout field for field.
// Every field carries a default so partially filled entries (the appliance
// omits whole sections depending on event type) still decode.
//
// A record's identity for deduplication is its fingerprint: a SHA-256
// digest over the record's canonical JSON form, hex-encoded. Because the
// digest is computed from the parsed struct and not the raw wire bytes,
// two records with identical field values fingerprint identically no
// matter how the transport ordered their fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Digests shorter than this are not trusted as a dedup identity.
const MIN_FINGERPRINT_LEN: usize = 3;

/// One audit-log entry as returned by the journal fetch step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    pub id: i64,
    /// Event time, unix seconds.
    pub time: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub result: String,
    pub person: String,
    pub description: String,
    #[serde(rename = "eventName")]
    pub event_name: String,
    pub details: Details,

    /// Content digest, empty until [`Record::compute_fingerprint`] runs.
    #[serde(skip)]
    pub fingerprint: String,
}

/// Nested detail block: message metadata, per-engine scan verdicts,
/// per-part results, and sender-authentication verdicts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Details {
    pub message_info: MessageInfo,
    pub rules: Vec<i64>,
    pub av_status: String,
    pub doc_with_macro_detected: bool,
    pub av_not_scanned_reason: String,
    pub as_status: String,
    pub as_not_scanned_reason: String,
    pub ma_status: String,
    pub ma_not_scanned_reason: String,
    pub ap_status: String,
    pub ap_not_scanned_reason: String,
    pub cf_status: String,
    pub cf_not_scanned_reason: String,
    pub kt_status: String,
    pub kt_not_scanned_reason: String,
    pub kt_skip_reason: String,
    pub av_message_size_limit: String,
    pub as_message_size_limit: String,
    pub as_method: String,
    pub kt_proceeded_by: String,
    pub apu_method: String,
    pub wmuf_method: String,
    pub part_results: Vec<PartResult>,
    pub ma_info: MaInfo,
    pub action: String,
    pub backup_reason: String,
    pub unsafe_notification_recipients: Vec<String>,
}

/// Envelope and addressing metadata of the scanned message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageInfo {
    pub message_id: String,
    pub size: String,
    pub smtp_message_id: String,
    pub client_address: String,
    pub client_host_name: String,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
}

/// Scan outcome for one message part (attachment or body).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PartResult {
    pub file_name: String,
    pub file_size: String,
    pub av_info: AvInfo,
    pub cf_info: CfInfo,
    pub action: String,
}

/// Anti-virus verdicts for one part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AvInfo {
    pub statuses: Vec<AvStatus>,
    pub doc_with_macro_detected: bool,
    pub skip_reason: String,
    pub skip_description: String,
    pub threats: Vec<String>,
    pub disinfected_objects: Vec<String>,
    pub deleted_objects: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AvStatus {
    pub av_status: String,
}

/// Content-filter verdicts for one part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CfInfo {
    pub statuses: Vec<String>,
    pub banned_file_name: String,
    pub banned_file_format: String,
}

/// Sender-authentication verdicts (DMARC / SPF / DKIM).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MaInfo {
    pub dmarc_verdict: String,
    pub spf_verdict: String,
    pub dkim_verdicts: Vec<String>,
}

impl Record {
    /// Event time as a UTC timestamp.
    ///
    /// An out-of-range `time` maps to the unix epoch, which the retention
    /// window then treats as stale, so the record is suppressed rather
    /// than emitted with a bogus clock.
    pub fn event_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.time, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Compute and store the content fingerprint.
    ///
    /// SHA-256 over the record's canonical JSON serialization, lowercase
    /// hex. Deterministic: identical field content always produces an
    /// identical digest. The `fingerprint` field itself is excluded from
    /// serialization, so recomputing is idempotent.
    pub fn compute_fingerprint(&mut self) -> Result<(), Error> {
        let canonical = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        // `format!("{:x}", ...)` produces lowercase hex
        let digest = format!("{:x}", hasher.finalize());
        if digest.len() < MIN_FINGERPRINT_LEN {
            return Err(Error::DegenerateFingerprint { digest });
        }
        self.fingerprint = digest;
        Ok(())
    }
}
