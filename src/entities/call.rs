use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Calling,
    Ringing,
    Answered,
    Failed,
    Cancelled,
    Ended,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Calling => "calling",
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Failed => "failed",
            CallStatus::Cancelled => "cancelled",
            CallStatus::Ended => "ended",
        }
    }

    /// Terminal statuses close the record: end time set, duration derived.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Failed | CallStatus::Cancelled | CallStatus::Ended
        )
    }
}

/// Per-call summary persisted through the session store (one per inbound
/// INVITE that completed its handshake).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub from_user: String,
    pub from_uri: String,
    pub from_ip: String,
    pub to_user: String,
    pub to_uri: String,
    pub local_rtp_addr: String,
    pub remote_rtp_addr: String,
    pub start_time: DateTime<Utc>,
    pub answer_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: i64,
    pub error_message: Option<String>,
    pub recording_url: Option<String>,
    pub transcription: Option<String>,
}

impl CallRecord {
    pub fn inbound(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            direction: CallDirection::Inbound,
            status: CallStatus::Ringing,
            from_user: String::new(),
            from_uri: String::new(),
            from_ip: String::new(),
            to_user: String::new(),
            to_uri: String::new(),
            local_rtp_addr: String::new(),
            remote_rtp_addr: String::new(),
            start_time: Utc::now(),
            answer_time: None,
            end_time: None,
            duration_secs: 0,
            error_message: None,
            recording_url: None,
            transcription: None,
        }
    }

    /// Close the record at `now`, deriving the duration from answer (or
    /// start, when the call never connected).
    pub fn seal(&mut self, status: CallStatus, now: DateTime<Utc>) {
        self.status = status;
        self.end_time = Some(now);
        let from = self.answer_time.unwrap_or(self.start_time);
        self.duration_secs = (now - from).num_seconds().max(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn seal_derives_duration_from_answer_time() {
        let mut rec = CallRecord::inbound("abc");
        let t0 = rec.start_time;
        rec.answer_time = Some(t0 + Duration::seconds(2));
        rec.seal(CallStatus::Ended, t0 + Duration::seconds(12));
        assert_eq!(rec.duration_secs, 10);
        assert!(rec.status.is_terminal());
    }

    #[test]
    fn seal_of_unanswered_call_uses_start_time() {
        let mut rec = CallRecord::inbound("abc");
        let t0 = rec.start_time;
        rec.seal(CallStatus::Cancelled, t0 + Duration::seconds(3));
        assert_eq!(rec.duration_secs, 3);
    }
}
