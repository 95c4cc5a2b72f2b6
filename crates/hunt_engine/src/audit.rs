//! Append-only audit journal used for abuse detection and debugging.
//!
//! Events are sealed with a SHA-256 digest chained over the previous event,
//! so a rewritten or dropped entry breaks [`AuditLog::verify_chain`]. The
//! journal doubles as an outbox: [`AuditLog::flush_to`] publishes events in
//! order to a remote sink and remembers how far it got.

use std::cell::{Cell, RefCell};
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::model::OwnerId;

const GENESIS_DIGEST: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditKind {
    #[serde(rename = "generation_attempt")]
    GenerationAttempt,
    #[serde(rename = "generation_success")]
    GenerationSuccess,
    #[serde(rename = "generation_failure")]
    GenerationFailure,
    #[serde(rename = "payment_denied")]
    PaymentDenied,
    #[serde(rename = "abuse:payment_required")]
    PaymentRequired,
    #[serde(rename = "abuse:duplicate_submission")]
    DuplicateSubmission,
    #[serde(rename = "bypass_used")]
    BypassUsed,
    #[serde(rename = "connection_error")]
    ConnectionError,
    #[serde(rename = "malformed_response")]
    MalformedResponse,
    #[serde(rename = "search_area_deleted")]
    SearchAreaDeleted,
    #[serde(rename = "map_point_deleted")]
    MapPointDeleted,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerationAttempt => "generation_attempt",
            Self::GenerationSuccess => "generation_success",
            Self::GenerationFailure => "generation_failure",
            Self::PaymentDenied => "payment_denied",
            Self::PaymentRequired => "abuse:payment_required",
            Self::DuplicateSubmission => "abuse:duplicate_submission",
            Self::BypassUsed => "bypass_used",
            Self::ConnectionError => "connection_error",
            Self::MalformedResponse => "malformed_response",
            Self::SearchAreaDeleted => "search_area_deleted",
            Self::MapPointDeleted => "map_point_deleted",
        }
    }

    pub fn channel(self) -> AuditChannel {
        match self {
            Self::PaymentRequired | Self::DuplicateSubmission | Self::BypassUsed => {
                AuditChannel::Abuse
            }
            _ => AuditChannel::Generation,
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote collection an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditChannel {
    Abuse,
    Generation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub owner_id: OwnerId,
    pub kind: AuditKind,
    pub detail: String,
    pub at: DateTime<Utc>,
    pub prev_digest: String,
    pub digest: String,
}

impl AuditEvent {
    pub fn channel(&self) -> AuditChannel {
        self.kind.channel()
    }

    fn compute_digest(
        prev_digest: &str,
        seq: u64,
        owner_id: &OwnerId,
        kind: AuditKind,
        detail: &str,
        at: DateTime<Utc>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prev_digest.as_bytes());
        hasher.update([0u8]);
        hasher.update(seq.to_le_bytes());
        hasher.update(owner_id.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(detail.as_bytes());
        hasher.update([0u8]);
        hasher.update(at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
        to_hex_lower(&hasher.finalize())
    }

    fn expected_digest(&self) -> String {
        Self::compute_digest(
            &self.prev_digest,
            self.seq,
            &self.owner_id,
            self.kind,
            &self.detail,
            self.at,
        )
    }
}

#[allow(async_fn_in_trait)]
pub trait AuditSink {
    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), RemoteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBreak {
    pub seq: u64,
}

#[derive(Debug, Default)]
pub struct AuditLog {
    events: RefCell<Vec<AuditEvent>>,
    published: Cell<usize>,
    flushing: Cell<bool>,
}

struct FlushingFlag<'a>(&'a Cell<bool>);

impl Drop for FlushingFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        owner_id: &OwnerId,
        kind: AuditKind,
        detail: impl Into<String>,
        at: DateTime<Utc>,
    ) -> AuditEvent {
        let detail = detail.into();
        let mut events = self.events.borrow_mut();
        let seq = events.len() as u64;
        let prev_digest = events
            .last()
            .map(|event| event.digest.clone())
            .unwrap_or_else(|| GENESIS_DIGEST.to_string());
        let digest = AuditEvent::compute_digest(&prev_digest, seq, owner_id, kind, &detail, at);
        let event = AuditEvent {
            seq,
            owner_id: owner_id.clone(),
            kind,
            detail,
            at,
            prev_digest,
            digest,
        };
        debug!(owner = %owner_id, kind = %kind, seq, "audit_event_recorded");
        events.push(event.clone());
        event
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.events.borrow().clone()
    }

    pub fn kinds(&self) -> Vec<AuditKind> {
        self.events.borrow().iter().map(|event| event.kind).collect()
    }

    pub fn count_of(&self, kind: AuditKind) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }

    pub fn unpublished_len(&self) -> usize {
        self.len().saturating_sub(self.published.get())
    }

    pub fn verify_chain(&self) -> Result<(), ChainBreak> {
        verify_events(&self.events.borrow())
    }

    /// Publishes unpublished events in order. Stops at the first failure and
    /// leaves the rest queued; returns how many were published. A flush that
    /// starts while another is suspended returns 0 immediately.
    pub async fn flush_to<S: AuditSink>(&self, sink: &S) -> usize {
        if self.flushing.replace(true) {
            return 0;
        }
        let _flag = FlushingFlag(&self.flushing);
        let mut flushed = 0;
        loop {
            let next = {
                let events = self.events.borrow();
                events.get(self.published.get()).cloned()
            };
            let Some(event) = next else {
                break;
            };
            match sink.append_audit_event(&event).await {
                Ok(()) => {
                    self.published.set(self.published.get() + 1);
                    flushed += 1;
                }
                Err(error) => {
                    warn!(
                        seq = event.seq,
                        kind = %event.kind,
                        error = %error,
                        "audit_publish_failed"
                    );
                    break;
                }
            }
        }
        flushed
    }
}

pub fn verify_events(events: &[AuditEvent]) -> Result<(), ChainBreak> {
    let mut expected_prev = GENESIS_DIGEST.to_string();
    for (index, event) in events.iter().enumerate() {
        if event.seq != index as u64
            || event.prev_digest != expected_prev
            || event.digest != event.expected_digest()
        {
            return Err(ChainBreak { seq: index as u64 });
        }
        expected_prev = event.digest.clone();
    }
    Ok(())
}

fn to_hex_lower(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write as _;
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use chrono::TimeZone;

    use super::*;

    struct RecordingSink {
        accepted: RefCell<Vec<u64>>,
        fail_on_seq: Option<u64>,
    }

    impl AuditSink for RecordingSink {
        async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), RemoteError> {
            if self.fail_on_seq == Some(event.seq) {
                return Err(RemoteError::Network("offline".to_string()));
            }
            self.accepted.borrow_mut().push(event.seq);
            Ok(())
        }
    }

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, second).unwrap()
    }

    #[test]
    fn kinds_map_to_expected_channels_and_names() {
        assert_eq!(AuditKind::PaymentRequired.as_str(), "abuse:payment_required");
        assert_eq!(AuditKind::PaymentRequired.channel(), AuditChannel::Abuse);
        assert_eq!(AuditKind::BypassUsed.channel(), AuditChannel::Abuse);
        assert_eq!(AuditKind::ConnectionError.channel(), AuditChannel::Generation);
        assert_eq!(
            serde_json::to_string(&AuditKind::DuplicateSubmission).expect("encode"),
            "\"abuse:duplicate_submission\""
        );
    }

    #[test]
    fn chain_links_each_event_to_its_predecessor() {
        let log = AuditLog::new();
        let owner = OwnerId::new("owner-1");
        let first = log.record(&owner, AuditKind::GenerationAttempt, "gen 1", at(0));
        let second = log.record(&owner, AuditKind::GenerationSuccess, "gen 1", at(1));

        assert_eq!(first.prev_digest, GENESIS_DIGEST);
        assert_eq!(second.prev_digest, first.digest);
        assert_eq!(log.len(), 2);
        assert!(log.verify_chain().is_ok());
    }

    #[test]
    fn tampered_detail_breaks_the_chain() {
        let log = AuditLog::new();
        let owner = OwnerId::new("owner-1");
        log.record(&owner, AuditKind::GenerationAttempt, "gen 1", at(0));
        log.record(&owner, AuditKind::PaymentDenied, "declined", at(1));
        log.record(&owner, AuditKind::GenerationAttempt, "gen 1", at(2));

        let mut events = log.snapshot();
        events[1].detail = "approved".to_string();
        assert_eq!(verify_events(&events), Err(ChainBreak { seq: 1 }));

        let mut dropped = log.snapshot();
        dropped.remove(1);
        assert_eq!(verify_events(&dropped), Err(ChainBreak { seq: 1 }));
    }

    #[tokio::test]
    async fn flush_publishes_in_order_and_resumes_after_failure() {
        let log = AuditLog::new();
        let owner = OwnerId::new("owner-1");
        for second in 0..3 {
            log.record(&owner, AuditKind::GenerationAttempt, "attempt", at(second));
        }

        let flaky = RecordingSink {
            accepted: RefCell::new(Vec::new()),
            fail_on_seq: Some(1),
        };
        assert_eq!(log.flush_to(&flaky).await, 1);
        assert_eq!(log.unpublished_len(), 2);
        assert_eq!(*flaky.accepted.borrow(), vec![0]);

        let healthy = RecordingSink {
            accepted: RefCell::new(Vec::new()),
            fail_on_seq: None,
        };
        assert_eq!(log.flush_to(&healthy).await, 2);
        assert_eq!(*healthy.accepted.borrow(), vec![1, 2]);
        assert_eq!(log.unpublished_len(), 0);
        assert_eq!(log.flush_to(&healthy).await, 0);
    }
}
