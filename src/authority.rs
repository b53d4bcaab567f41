//! Authorization gate and the external authority wire schema.
//!
//! Privileged operations consult an external authority service before
//! touching the registry. The gate is fail-closed: an explicit "no", an
//! unreachable authority, a timeout, and a malformed reply all collapse into
//! the same [`AuthorizationError::Denied`] — callers cannot tell authority
//! health apart from policy, by design. Decisions are computed fresh per
//! call and never cached.
//!
//! This is the single canonical copy of the authority schema; the daemon it
//! replaces carried two divergent ones (see `DESIGN.md`).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Subject kind naming a caller by its bus identity.
pub const SUBJECT_KIND_SYSTEM_BUS_NAME: &str = "system-bus-name";

/// Flag bit permitting the authority to prompt the user for credentials.
pub const FLAG_ALLOW_USER_INTERACTION: u32 = 0x01;

// ---------------------------------------------------------------------------
// Wire schema
// ---------------------------------------------------------------------------

/// The principal on whose behalf an action is being checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritySubject {
    /// Subject kind discriminator; always
    /// [`SUBJECT_KIND_SYSTEM_BUS_NAME`] for this daemon.
    pub kind: String,
    /// Kind-specific details; bus-name subjects carry a single `name` entry.
    pub details: BTreeMap<String, String>,
}

/// One authorization check request, reproduced field-for-field from the
/// authority's published schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRequest {
    /// Who is asking.
    pub subject: AuthoritySubject,
    /// The privileged action being attempted.
    pub action_id: String,
    /// Action details; always empty for this daemon.
    pub details: BTreeMap<String, String>,
    /// Bit flags; bit 1 permits interactive credential prompts.
    pub flags: u32,
    /// Cancellation handle; always empty — the check runs to completion.
    pub cancellation_id: String,
}

impl AuthorityRequest {
    /// Build the canonical request for a caller/action pair: bus-name
    /// subject, empty details, interactive prompts allowed, no cancellation.
    pub fn for_caller(caller: &str, action_id: &str) -> Self {
        let mut subject_details = BTreeMap::new();
        subject_details.insert("name".to_owned(), caller.to_owned());
        Self {
            subject: AuthoritySubject {
                kind: SUBJECT_KIND_SYSTEM_BUS_NAME.to_owned(),
                details: subject_details,
            },
            action_id: action_id.to_owned(),
            details: BTreeMap::new(),
            flags: FLAG_ALLOW_USER_INTERACTION,
            cancellation_id: String::new(),
        }
    }
}

/// The authority's verdict.
///
/// Only `is_authorized` carries policy weight; the challenge flag and the
/// details map are ignored by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityReply {
    /// Whether the subject may perform the action.
    pub is_authorized: bool,
    /// Whether authorization could be obtained after a challenge; ignored.
    pub is_challenge: bool,
    /// Authority-specific details; ignored.
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Authority transport
// ---------------------------------------------------------------------------

/// Transport-level failure while consulting the authority.
///
/// Internal to the gate; never surfaces to IPC callers (see
/// [`AuthorizationError`]).
#[derive(Debug, thiserror::Error)]
pub enum AuthorityTransportError {
    /// Connection or read/write failure.
    #[error("authority connection failed: {0}")]
    Io(#[from] std::io::Error),
    /// The reply (or our request) did not match the schema.
    #[error("authority reply malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The authority closed the connection without replying.
    #[error("authority closed the connection without replying")]
    NoReply,
    /// The round-trip exceeded the configured bound.
    #[error("authority check timed out after {0:?}")]
    TimedOut(Duration),
}

/// Seam for the external authority service.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Issue one authorization check and return the raw verdict.
    async fn check_authorization(
        &self,
        request: &AuthorityRequest,
    ) -> Result<AuthorityReply, AuthorityTransportError>;
}

/// Authority client speaking newline-delimited JSON over a Unix socket.
///
/// One connection, one request line, one reply line per check, bounded by a
/// timeout so a wedged authority cannot stall privileged calls forever.
#[derive(Debug, Clone)]
pub struct SocketAuthority {
    socket_path: PathBuf,
    timeout: Duration,
}

impl SocketAuthority {
    /// Create a client for the authority listening at `socket_path`.
    pub fn new(socket_path: PathBuf, timeout: Duration) -> Self {
        Self {
            socket_path,
            timeout,
        }
    }

    async fn exchange(
        &self,
        request: &AuthorityRequest,
    ) -> Result<AuthorityReply, AuthorityTransportError> {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let mut stream = tokio::net::UnixStream::connect(&self.socket_path).await?;
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        stream.write_all(line.as_bytes()).await?;

        let mut reply_line = String::new();
        let read = BufReader::new(stream).read_line(&mut reply_line).await?;
        if read == 0 {
            return Err(AuthorityTransportError::NoReply);
        }
        Ok(serde_json::from_str(&reply_line)?)
    }
}

#[async_trait]
impl Authority for SocketAuthority {
    async fn check_authorization(
        &self,
        request: &AuthorityRequest,
    ) -> Result<AuthorityReply, AuthorityTransportError> {
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(AuthorityTransportError::TimedOut(self.timeout)),
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Externally-visible authorization failure.
///
/// A single kind on purpose: explicit denial and every authority failure
/// mode are indistinguishable, so callers learn nothing about authority
/// health from a refusal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthorizationError {
    /// The caller is not authorized for the action.
    #[error("not authorized for {action}")]
    Denied {
        /// The action that was refused.
        action: String,
    },
}

/// Fail-closed gate in front of privileged Manager operations.
pub struct AuthorizationGate {
    authority: Arc<dyn Authority>,
}

impl AuthorizationGate {
    /// Create a gate backed by `authority`.
    pub fn new(authority: Arc<dyn Authority>) -> Self {
        Self { authority }
    }

    /// Check whether `caller` may perform `action_id`.
    ///
    /// Issues exactly one authority round-trip, no retries. The outcome is
    /// logged per branch (allow, explicit deny, transport failure), but the
    /// returned error kind is the same regardless of which branch fired.
    pub async fn authorize(&self, caller: &str, action_id: &str) -> Result<(), AuthorizationError> {
        let request = AuthorityRequest::for_caller(caller, action_id);
        let denied = AuthorizationError::Denied {
            action: action_id.to_owned(),
        };

        match self.authority.check_authorization(&request).await {
            Ok(reply) if reply.is_authorized => {
                info!(caller, action = action_id, "authority allowed action");
                Ok(())
            }
            Ok(_) => {
                warn!(caller, action = action_id, "authority denied action");
                Err(denied)
            }
            Err(e) => {
                error!(
                    caller,
                    action = action_id,
                    error = %e,
                    "authority check failed, denying"
                );
                Err(denied)
            }
        }
    }
}
