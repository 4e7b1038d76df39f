use std::fmt;

use uuid::Uuid;

/// Correlation key for one visit: the progress channel and both endpoint
/// calls carry it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        let id = SessionId(Uuid::new_v4());
        tracing::info!("Created session {}", id);
        id
    }

    pub fn as_string(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
