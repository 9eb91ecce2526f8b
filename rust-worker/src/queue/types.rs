//! Job type stored in the queues.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One unit of work: the address a verification email is dispatched to.
///
/// The worker never parses or validates the identifier; it is stored in the
/// queues verbatim and compared by value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Job(String);

impl Job {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Job {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for Job {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_serializes_as_plain_string() {
        let job = Job::new("user@example.com");
        assert_eq!(serde_json::to_string(&job).unwrap(), "\"user@example.com\"");
    }

    #[test]
    fn test_job_identity_is_value_equality() {
        assert_eq!(Job::from("a@example.com"), Job::new(String::from("a@example.com")));
        assert_ne!(Job::from("a@example.com"), Job::from("b@example.com"));
    }
}
