// ABOUTME: Query, response, and session aggregate types with the completion rules.
// ABOUTME: Sessions transition to a terminal state exactly once and never mutate after.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One user submission, fanned out to a set of providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: String,
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub target_providers: BTreeSet<String>,
}

impl Query {
    pub fn new(text: impl Into<String>, providers: impl IntoIterator<Item = String>) -> Self {
        Self {
            id: generate_query_id(),
            text: text.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            target_providers: providers.into_iter().collect(),
        }
    }
}

/// Globally unique query id: millisecond timestamp plus a random suffix
pub fn generate_query_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("q{}-{}", millis, &suffix[..8])
}

/// One provider's reply (or failure) for a query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub query_id: String,
    pub provider_id: String,
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Wall-clock elapsed between forwarding and reply, stamped by the leg's far side
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn success(
        query_id: impl Into<String>,
        provider_id: impl Into<String>,
        text: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            provider_id: provider_id.into(),
            text: text.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            duration_ms,
            error: None,
        }
    }

    pub fn failure(
        query_id: impl Into<String>,
        provider_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            provider_id: provider_id.into(),
            text: String::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            duration_ms: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// Reserved pre-dispatch phase; sessions are constructed straight into InProgress
    Pending,
    InProgress,
    Completed,
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Aggregate tracking one query's responses across all target providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuerySession {
    pub query: Query,
    pub responses: BTreeMap<String, QueryResponse>,
    pub status: SessionStatus,
}

impl QuerySession {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            responses: BTreeMap::new(),
            status: SessionStatus::InProgress,
        }
    }

    /// True once the session reached Completed or Error
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Completed | SessionStatus::Error)
    }

    /// Record a response, last-write-wins per provider.
    ///
    /// Silently a no-op once the session is terminal; a stray late message
    /// must not mutate a settled aggregate. Returns whether the response
    /// was recorded.
    pub fn upsert_response(&mut self, response: QueryResponse) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.responses
            .insert(response.provider_id.clone(), response);
        true
    }

    /// Transition to a terminal status once every target provider has
    /// responded: Error if any response carries an error, else Completed.
    /// Idempotent and safe to re-run after every arrival. Returns whether a
    /// transition happened.
    pub fn check_completion(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        let all_in = self
            .query
            .target_providers
            .iter()
            .all(|provider| self.responses.contains_key(provider));
        if !all_in {
            return false;
        }
        self.status = if self.responses.values().any(QueryResponse::is_error) {
            SessionStatus::Error
        } else {
            SessionStatus::Completed
        };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(providers: &[&str]) -> QuerySession {
        QuerySession::new(Query::new(
            "hello",
            providers.iter().map(|p| p.to_string()),
        ))
    }

    #[test]
    fn test_query_ids_are_unique() {
        let ids: std::collections::HashSet<String> =
            (0..1000).map(|_| generate_query_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_session_starts_in_progress() {
        let s = session(&["a", "b"]);
        assert_eq!(s.status, SessionStatus::InProgress);
        assert!(!s.is_terminal());
    }

    #[test]
    fn test_all_success_completes() {
        let mut s = session(&["a", "b"]);
        let qid = s.query.id.clone();

        s.upsert_response(QueryResponse::success(&qid, "a", "one", 10));
        assert!(!s.check_completion());
        assert_eq!(s.status, SessionStatus::InProgress);

        s.upsert_response(QueryResponse::success(&qid, "b", "two", 20));
        assert!(s.check_completion());
        assert_eq!(s.status, SessionStatus::Completed);
    }

    #[test]
    fn test_any_error_yields_error_status() {
        let mut s = session(&["a", "b"]);
        let qid = s.query.id.clone();

        s.upsert_response(QueryResponse::success(&qid, "a", "one", 10));
        s.upsert_response(QueryResponse::failure(&qid, "b", "timeout"));
        assert!(s.check_completion());
        assert_eq!(s.status, SessionStatus::Error);
    }

    #[test]
    fn test_terminal_sessions_reject_mutation() {
        let mut s = session(&["a"]);
        let qid = s.query.id.clone();

        s.upsert_response(QueryResponse::success(&qid, "a", "one", 10));
        s.check_completion();
        assert_eq!(s.status, SessionStatus::Completed);

        assert!(!s.upsert_response(QueryResponse::failure(&qid, "a", "late")));
        assert!(!s.check_completion());
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.responses["a"].text, "one");
    }

    #[test]
    fn test_last_write_wins_before_terminal() {
        let mut s = session(&["a", "b"]);
        let qid = s.query.id.clone();

        s.upsert_response(QueryResponse::success(&qid, "a", "first", 10));
        s.upsert_response(QueryResponse::success(&qid, "a", "second", 12));
        assert_eq!(s.responses["a"].text, "second");
        assert_eq!(s.status, SessionStatus::InProgress);
    }

    #[test]
    fn test_session_serializes_camel_case() {
        let s = session(&["a"]);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["status"], "in-progress");
        assert!(json["query"]["targetProviders"].is_array());
    }
}
