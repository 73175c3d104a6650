use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use concierge_core::capability::CapabilityError;
use concierge_core::ids::SessionId;

pub const DEFAULT_PEER_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_DELEGATION_TIMEOUT: Duration = Duration::from_secs(600);

/// One isolated conversation opened on a peer agent. Never reused.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DelegationSession {
    pub peer: String,
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
}

/// Terminal response of a peer, returned verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct DelegationReply {
    pub session: DelegationSession,
    pub payload: Value,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum DelegationError {
    #[error("delegation to '{peer}' timed out after {after:?}")]
    Timeout { peer: String, after: Duration },
    #[error("peer '{peer}' unreachable: {reason}")]
    Unreachable { peer: String, reason: String },
    #[error("peer '{peer}' protocol error: {reason}")]
    Protocol { peer: String, reason: String },
}

impl From<DelegationError> for CapabilityError {
    fn from(err: DelegationError) -> Self {
        match err {
            DelegationError::Timeout { after, .. } => CapabilityError::timeout(after),
            DelegationError::Unreachable { peer, reason } => {
                CapabilityError::PeerUnreachable { peer, reason }
            }
            DelegationError::Protocol { peer, reason } => {
                CapabilityError::PeerProtocolError { peer, reason }
            }
        }
    }
}

/// Forwards one request document to a peer agent and awaits its terminal response.
#[async_trait]
pub trait DelegationClient: Send + Sync {
    async fn delegate(
        &self,
        peer: &str,
        payload: &Map<String, Value>,
    ) -> Result<DelegationReply, DelegationError>;
}

/// Where a peer agent lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub base_url: String,
    pub assistant_id: String,
}

/// Peer name → endpoint. Unlisted peers resolve to the default base URL with
/// the peer name as assistant id.
#[derive(Clone, Debug)]
pub struct PeerDirectory {
    default_base_url: String,
    peers: HashMap<String, PeerEndpoint>,
}

impl PeerDirectory {
    pub fn new(default_base_url: impl Into<String>) -> Self {
        Self {
            default_base_url: default_base_url.into(),
            peers: HashMap::new(),
        }
    }

    pub fn with_peer(mut self, peer: impl Into<String>, endpoint: PeerEndpoint) -> Self {
        self.peers.insert(peer.into(), endpoint);
        self
    }

    pub fn resolve(&self, peer: &str) -> PeerEndpoint {
        self.peers.get(peer).cloned().unwrap_or_else(|| PeerEndpoint {
            base_url: self.default_base_url.clone(),
            assistant_id: peer.to_string(),
        })
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_PEER_BASE_URL)
    }
}

#[derive(Deserialize)]
struct ThreadCreated {
    thread_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

/// Delegation over the peer server's thread/run HTTP protocol.
pub struct HttpDelegationClient {
    http: reqwest::Client,
    directory: PeerDirectory,
    timeout: Duration,
}

impl HttpDelegationClient {
    pub fn new(directory: PeerDirectory) -> Self {
        let http = match reqwest::Client::builder().user_agent("concierge/0.1").build() {
            Ok(http) => http,
            Err(e) => {
                warn!(error = %e, "custom HTTP client unavailable, using reqwest defaults");
                reqwest::Client::new()
            }
        };
        Self {
            http,
            directory,
            timeout: DEFAULT_DELEGATION_TIMEOUT,
        }
    }

    /// Deadline covering session open and run. Session release runs after it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    async fn submit(
        &self,
        session: &DelegationSession,
        endpoint: &PeerEndpoint,
        payload: &Map<String, Value>,
    ) -> Result<Value, DelegationError> {
        let peer = session.peer.as_str();
        let text = serde_json::to_string(payload)
            .map_err(|e| protocol(peer, format!("unencodable request: {e}")))?;
        let body = serde_json::json!({
            "assistant_id": endpoint.assistant_id,
            "input": {
                "messages": [{
                    "type": "human",
                    "content": [{"type": "text", "text": text}],
                }],
            },
        });

        let url = format!("{}/runs/wait", session_url(endpoint, session));
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;
        check_status(peer, response.status())?;

        response
            .json()
            .await
            .map_err(|e| protocol(peer, format!("undecodable run response: {e}")))
    }

    fn timed_out(&self, peer: &str) -> DelegationError {
        warn!(peer, timeout_secs = self.timeout.as_secs_f64(), "delegation timed out");
        DelegationError::Timeout {
            peer: peer.to_string(),
            after: self.timeout,
        }
    }
}

#[async_trait]
impl DelegationClient for HttpDelegationClient {
    #[instrument(skip(self, payload))]
    async fn delegate(
        &self,
        peer: &str,
        payload: &Map<String, Value>,
    ) -> Result<DelegationReply, DelegationError> {
        let deadline = Instant::now() + self.timeout;
        let endpoint = self.directory.resolve(peer);

        let opening = PendingSession::spawn(self.http.clone(), peer, endpoint.clone());
        let session = match opening.join(deadline).await {
            Some(opened) => opened?,
            None => return Err(self.timed_out(peer)),
        };
        debug!(peer, session_id = %session.session_id, "delegation session opened");

        let mut lease = SessionLease::new(self.http.clone(), &endpoint, &session);
        let submitting = self.submit(&session, &endpoint, payload);
        let outcome = match tokio::time::timeout_at(deadline, submitting).await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.timed_out(peer)),
        };
        lease.release().await;

        outcome.map(|payload| DelegationReply { session, payload })
    }
}

async fn open_session(
    http: reqwest::Client,
    peer: String,
    endpoint: PeerEndpoint,
) -> Result<DelegationSession, DelegationError> {
    let url = format!("{}/threads", endpoint.base_url.trim_end_matches('/'));
    let response = http
        .post(&url)
        .json(&serde_json::json!({}))
        .send()
        .await
        .map_err(|e| unreachable(&peer, e))?;
    check_status(&peer, response.status())?;

    let created: ThreadCreated = response
        .json()
        .await
        .map_err(|e| protocol(&peer, format!("undecodable session response: {e}")))?;
    let thread_id = created
        .thread_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| protocol(&peer, "session response missing thread_id"))?;

    Ok(DelegationSession {
        peer,
        session_id: SessionId::from_raw(thread_id),
        created_at: created.created_at.unwrap_or_else(Utc::now),
    })
}

type OpenTask = JoinHandle<Result<DelegationSession, DelegationError>>;

/// A session open running in its own task. If abandoned (deadline, cancellation)
/// the open is left to finish and whatever session it yields is released.
struct PendingSession {
    task: Option<OpenTask>,
    http: reqwest::Client,
    endpoint: PeerEndpoint,
    peer: String,
}

impl PendingSession {
    fn spawn(http: reqwest::Client, peer: &str, endpoint: PeerEndpoint) -> Self {
        let task = tokio::spawn(open_session(http.clone(), peer.to_string(), endpoint.clone()));
        Self {
            task: Some(task),
            http,
            endpoint,
            peer: peer.to_string(),
        }
    }

    /// `None` when the deadline passes first.
    async fn join(
        mut self,
        deadline: Instant,
    ) -> Option<Result<DelegationSession, DelegationError>> {
        let task = self.task.as_mut()?;
        let joined = tokio::time::timeout_at(deadline, task).await.ok()?;
        self.task = None;
        Some(joined.unwrap_or_else(|e| {
            Err(protocol(&self.peer, format!("session open task failed: {e}")))
        }))
    }
}

impl Drop for PendingSession {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            task.abort();
            return;
        };
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        handle.spawn(async move {
            if let Ok(Ok(session)) = task.await {
                debug!(
                    peer = %session.peer,
                    session_id = %session.session_id,
                    "releasing late session"
                );
                release_session(&http, &session_url(&endpoint, &session), &session.peer).await;
            }
        });
    }
}

/// Releases the peer session. If dropped before [`SessionLease::release`]
/// completes (timeout, cancellation) the release runs in a detached task.
struct SessionLease {
    http: reqwest::Client,
    url: String,
    peer: String,
    released: bool,
}

impl SessionLease {
    fn new(http: reqwest::Client, endpoint: &PeerEndpoint, session: &DelegationSession) -> Self {
        Self {
            http,
            url: session_url(endpoint, session),
            peer: session.peer.clone(),
            released: false,
        }
    }

    async fn release(&mut self) {
        release_session(&self.http, &self.url, &self.peer).await;
        self.released = true;
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(peer = %self.peer, url = %self.url, "no runtime to release delegation session");
            return;
        };
        let http = self.http.clone();
        let url = std::mem::take(&mut self.url);
        let peer = std::mem::take(&mut self.peer);
        handle.spawn(async move {
            release_session(&http, &url, &peer).await;
        });
    }
}

fn session_url(endpoint: &PeerEndpoint, session: &DelegationSession) -> String {
    format!(
        "{}/threads/{}",
        endpoint.base_url.trim_end_matches('/'),
        session.session_id
    )
}

async fn release_session(http: &reqwest::Client, url: &str, peer: &str) {
    match http.delete(url).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(peer, url, "delegation session released");
        }
        Ok(response) => {
            warn!(peer, url, status = response.status().as_u16(), "session release rejected");
        }
        Err(e) => {
            warn!(peer, url, error = %e, "session release failed");
        }
    }
}

fn check_status(peer: &str, status: reqwest::StatusCode) -> Result<(), DelegationError> {
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        502..=504 => Err(DelegationError::Unreachable {
            peer: peer.to_string(),
            reason: format!("HTTP {status}"),
        }),
        _ => Err(protocol(peer, format!("HTTP {status}"))),
    }
}

fn unreachable(peer: &str, err: reqwest::Error) -> DelegationError {
    DelegationError::Unreachable {
        peer: peer.to_string(),
        reason: err.to_string(),
    }
}

fn protocol(peer: &str, reason: impl Into<String>) -> DelegationError {
    DelegationError::Protocol {
        peer: peer.to_string(),
        reason: reason.into(),
    }
}
