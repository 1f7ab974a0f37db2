//! Matches asynchronous AI responses to the prompts that caused them.
//!
//! Requests get a generated [`RequestId`] at submission. Backends that echo
//! the id back are matched by exact lookup. Events without an id fall back to
//! the first pending request with identical prompt text, so two identical
//! prompts in flight at once are settled in submission order; which logical
//! request a response "belongs" to is not knowable in that case.
//!
//! The result list keeps at most [`MAX_ENTRIES`] entries: once full, each
//! submission drops the oldest settled entry. Pending requests are never
//! dropped.

use crate::model::ValidationError;
use chrono::{DateTime, Local};
use log::{debug, warn};
use rand::{distributions::Alphanumeric, Rng};
use std::fmt;

const PREVIEW_CHARS: usize = 20;
pub const MAX_ENTRIES: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    fn generate() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        RequestId(format!("req-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn for_tests(id: &str) -> Self {
        RequestId(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a request's placeholder in the result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Resolved,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: RequestId,
    pub prompt: String,
    pub preview: String,
    pub submitted_at: DateTime<Local>,
    pub status: RequestStatus,
    pub response: Option<String>,
}

impl PendingRequest {
    pub fn is_terminal(&self) -> bool {
        self.status != RequestStatus::Pending
    }

    pub fn label(&self) -> String {
        match self.status {
            RequestStatus::Pending => format!(
                "🤖 {} ⏳ processing ({})",
                self.preview,
                self.submitted_at.format("%H:%M:%S")
            ),
            RequestStatus::Resolved => format!("🤖 {} ✅", self.preview),
            RequestStatus::Errored => format!("🤖 {} ❌", self.preview),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(RequestHandle),
    Errored(RequestHandle),
    Duplicate(RequestHandle),
    Miss,
}

enum Outcome {
    Response(String),
    Failure(String),
}

#[derive(Debug, Default)]
pub struct RequestCorrelator {
    entries: Vec<PendingRequest>,
    misses: usize,
    duplicates: usize,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        RequestCorrelator::default()
    }

    pub fn submit(&mut self, prompt: &str) -> Result<RequestHandle, ValidationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        let mut id = RequestId::generate();
        while self.entries.iter().any(|r| r.id == id) {
            id = RequestId::generate();
        }
        self.prune_settled();
        self.entries.push(PendingRequest {
            id,
            prompt: prompt.to_string(),
            preview: preview(prompt),
            submitted_at: Local::now(),
            status: RequestStatus::Pending,
            response: None,
        });
        Ok(RequestHandle(self.entries.len() - 1))
    }

    pub fn resolve(&mut self, prompt: &str, response: &str) -> Resolution {
        self.settle(
            |r| r.prompt == prompt,
            Outcome::Response(response.to_string()),
            prompt,
        )
    }

    pub fn error(&mut self, prompt: &str, message: &str) -> Resolution {
        self.settle(
            |r| r.prompt == prompt,
            Outcome::Failure(message.to_string()),
            prompt,
        )
    }

    pub fn resolve_id(&mut self, id: &RequestId, response: &str) -> Resolution {
        self.settle(
            |r| &r.id == id,
            Outcome::Response(response.to_string()),
            id.as_str(),
        )
    }

    pub fn error_id(&mut self, id: &RequestId, message: &str) -> Resolution {
        self.settle(
            |r| &r.id == id,
            Outcome::Failure(message.to_string()),
            id.as_str(),
        )
    }

    pub fn get(&self, handle: RequestHandle) -> Option<&PendingRequest> {
        self.entries.get(handle.0)
    }

    pub fn entries(&self) -> &[PendingRequest] {
        &self.entries
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|r| !r.is_terminal()).count()
    }

    pub fn miss_count(&self) -> usize {
        self.misses
    }

    pub fn duplicate_count(&self) -> usize {
        self.duplicates
    }

    /// Drops settled entries. Pending ones are kept so late responses still
    /// correlate; handles issued before this call are invalidated.
    pub fn clear_finished(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|r| !r.is_terminal());
        before - self.entries.len()
    }

    fn prune_settled(&mut self) {
        while self.entries.len() >= MAX_ENTRIES {
            let Some(idx) = self.entries.iter().position(|r| r.is_terminal()) else {
                break;
            };
            let dropped = self.entries.remove(idx);
            debug!("event=request_pruned request={}", dropped.id);
        }
    }

    fn settle<F>(&mut self, matches: F, outcome: Outcome, key: &str) -> Resolution
    where
        F: Fn(&PendingRequest) -> bool,
    {
        if let Some(idx) = self
            .entries
            .iter()
            .position(|r| r.status == RequestStatus::Pending && matches(r))
        {
            let entry = &mut self.entries[idx];
            let handle = RequestHandle(idx);
            debug!("event=request_settled request={} handle={}", entry.id, idx);
            return match outcome {
                Outcome::Response(response) => {
                    entry.status = RequestStatus::Resolved;
                    entry.response = Some(response);
                    Resolution::Resolved(handle)
                }
                Outcome::Failure(message) => {
                    entry.status = RequestStatus::Errored;
                    entry.response = Some(format!("AI service error: {message}"));
                    Resolution::Errored(handle)
                }
            };
        }

        if let Some(idx) = self.entries.iter().rposition(|r| matches(r)) {
            self.duplicates += 1;
            warn!(
                "event=duplicate_resolution request={} key={}",
                self.entries[idx].id,
                truncate_key(key)
            );
            return Resolution::Duplicate(RequestHandle(idx));
        }

        self.misses += 1;
        warn!("event=correlation_miss key={}", truncate_key(key));
        Resolution::Miss
    }
}

fn preview(prompt: &str) -> String {
    if prompt.chars().count() > PREVIEW_CHARS {
        let head: String = prompt.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        prompt.to_string()
    }
}

fn truncate_key(key: &str) -> String {
    key.chars().take(50).collect::<String>().replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prompt_is_rejected() {
        let mut c = RequestCorrelator::new();
        assert_eq!(c.submit("  \t"), Err(ValidationError::EmptyPrompt));
        assert!(c.entries().is_empty());
    }

    #[test]
    fn submit_then_resolve_touches_only_matching_entry() {
        let mut c = RequestCorrelator::new();
        let other = c.submit("other").unwrap();
        let handle = c.submit("X").unwrap();
        assert_eq!(c.resolve("X", "R"), Resolution::Resolved(handle));

        let entry = c.get(handle).unwrap();
        assert_eq!(entry.status, RequestStatus::Resolved);
        assert_eq!(entry.response.as_deref(), Some("R"));
        let untouched = c.get(other).unwrap();
        assert_eq!(untouched.status, RequestStatus::Pending);
        assert_eq!(untouched.response, None);
    }

    #[test]
    fn unmatched_response_records_miss_without_changes() {
        let mut c = RequestCorrelator::new();
        c.submit("X").unwrap();
        let before = c.entries().to_vec();
        assert_eq!(c.resolve("Y", "R"), Resolution::Miss);
        assert_eq!(c.entries(), &before[..]);
        assert_eq!(c.miss_count(), 1);
    }

    #[test]
    fn duplicate_resolution_never_overwrites() {
        let mut c = RequestCorrelator::new();
        let handle = c.submit("X").unwrap();
        c.resolve("X", "first");
        assert_eq!(c.resolve("X", "second"), Resolution::Duplicate(handle));
        assert_eq!(c.error("X", "boom"), Resolution::Duplicate(handle));
        let entry = c.get(handle).unwrap();
        assert_eq!(entry.response.as_deref(), Some("first"));
        assert_eq!(entry.status, RequestStatus::Resolved);
        assert_eq!(c.duplicate_count(), 2);
        assert_eq!(c.miss_count(), 0);
    }

    #[test]
    fn error_formats_message() {
        let mut c = RequestCorrelator::new();
        let handle = c.submit("X").unwrap();
        assert_eq!(c.error("X", "offline"), Resolution::Errored(handle));
        let entry = c.get(handle).unwrap();
        assert_eq!(entry.status, RequestStatus::Errored);
        assert_eq!(entry.response.as_deref(), Some("AI service error: offline"));
    }

    #[test]
    fn identical_prompts_settle_in_submission_order() {
        let mut c = RequestCorrelator::new();
        let first = c.submit("same").unwrap();
        let second = c.submit("same").unwrap();
        assert_eq!(c.resolve("same", "a"), Resolution::Resolved(first));
        assert_eq!(c.resolve("same", "b"), Resolution::Resolved(second));
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn request_id_matches_exactly_despite_identical_prompts() {
        let mut c = RequestCorrelator::new();
        let first = c.submit("same").unwrap();
        let second = c.submit("same").unwrap();
        let second_id = c.get(second).unwrap().id.clone();
        assert_eq!(c.resolve_id(&second_id, "b"), Resolution::Resolved(second));
        assert_eq!(c.get(first).unwrap().status, RequestStatus::Pending);
        assert_eq!(c.error_id(&second_id, "late"), Resolution::Duplicate(second));

        let unknown = RequestId("req-unknown".into());
        assert_eq!(c.resolve_id(&unknown, "x"), Resolution::Miss);
    }

    #[test]
    fn preview_truncates_long_prompts() {
        let mut c = RequestCorrelator::new();
        let handle = c.submit("abcdefghijklmnopqrstuvwxyz").unwrap();
        let entry = c.get(handle).unwrap();
        assert_eq!(entry.preview, "abcdefghijklmnopqrst...");
        assert!(entry.label().contains("processing"));
    }

    #[test]
    fn clear_finished_keeps_pending() {
        let mut c = RequestCorrelator::new();
        c.submit("a").unwrap();
        c.submit("b").unwrap();
        c.resolve("a", "done");
        assert_eq!(c.clear_finished(), 1);
        assert_eq!(c.entries().len(), 1);
        assert!(matches!(c.resolve("b", "late"), Resolution::Resolved(_)));
    }

    #[test]
    fn full_list_drops_oldest_settled_entry() {
        let mut c = RequestCorrelator::new();
        c.submit("still waiting").unwrap();
        for i in 1..MAX_ENTRIES {
            let prompt = format!("p{i}");
            c.submit(&prompt).unwrap();
            c.resolve(&prompt, "ok");
        }
        assert_eq!(c.entries().len(), MAX_ENTRIES);

        let handle = c.submit("next").unwrap();
        assert_eq!(c.entries().len(), MAX_ENTRIES);
        assert_eq!(c.entries()[0].prompt, "still waiting");
        assert_eq!(c.entries()[1].prompt, "p2");
        assert_eq!(c.get(handle).unwrap().prompt, "next");
        assert!(matches!(c.resolve("still waiting", "late"), Resolution::Resolved(_)));
    }

    #[test]
    fn all_pending_list_is_never_pruned() {
        let mut c = RequestCorrelator::new();
        for i in 0..=MAX_ENTRIES {
            c.submit(&format!("p{i}")).unwrap();
        }
        assert_eq!(c.entries().len(), MAX_ENTRIES + 1);
        assert_eq!(c.pending_count(), MAX_ENTRIES + 1);
    }
}
