/// Queries fed to the resolution pipeline

use chrono::{DateTime, Duration, Local};
use std::fmt;

/// Where a query came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Typed at the prompt or passed on the command line
    User,
    /// Returned by a plugin with the delegation marker
    Delegated,
    /// Queued by a timer for later execution
    Scheduled,
    /// Right-hand side of a multi-command line
    Chained,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub content: String,
    pub created_at: DateTime<Local>,
    pub exec_at: Option<DateTime<Local>>,
    pub provenance: Provenance,
}

impl Query {
    pub fn new(content: impl Into<String>) -> Self {
        Self::with_provenance(content, Provenance::User)
    }

    pub fn with_provenance(content: impl Into<String>, provenance: Provenance) -> Self {
        Self {
            content: content.into().trim().to_string(),
            created_at: Local::now(),
            exec_at: None,
            provenance,
        }
    }

    /// A query that should not run before `delay` has passed
    pub fn delayed(content: impl Into<String>, delay: Duration) -> Self {
        let mut query = Self::with_provenance(content, Provenance::Scheduled);
        query.exec_at = Some(query.created_at + delay);
        query
    }

    /// True once the scheduled time (if any) has been reached
    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        self.exec_at.map_or(true, |at| at <= now)
    }

    /// Lower-cased first whitespace-delimited token, empty for a blank query
    pub fn first_token(&self) -> String {
        self.content
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }

    /// Everything after the first token, trimmed
    pub fn rest(&self) -> &str {
        let trimmed = self.content.trim_start();
        match trimmed.find(char::is_whitespace) {
            Some(index) => trimmed[index..].trim(),
            None => "",
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.content)
    }
}

impl From<&str> for Query {
    fn from(content: &str) -> Self {
        Query::new(content)
    }
}
