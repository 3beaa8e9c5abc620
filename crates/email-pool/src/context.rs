//! Per-call context
//!
//! Built by the transport after its authorization check passed. The engine
//! never authenticates; it only carries the context into the audit trail.

use serde::{Deserialize, Serialize};

/// Which surface the call came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// External lease API
    Api,
    /// Administrative API
    Admin,
}

#[derive(Debug, Clone)]
pub struct CallContext {
    pub scope: Scope,
    /// Caller address, if the transport knows it.
    pub client: Option<String>,
    pub request_id: String,
}

impl CallContext {
    pub fn new(scope: Scope, request_id: impl Into<String>) -> Self {
        Self {
            scope,
            client: None,
            request_id: request_id.into(),
        }
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }
}
