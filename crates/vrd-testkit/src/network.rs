use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use vrd_core::{DuplicationResponse, FederationMessage, Host};
use vrd_engine::{DuplicationHandler, FederationError, FederationTransport};

/// One message that went over a [`LoopbackNetwork`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub from: Host,
    pub to: Host,
    pub message: FederationMessage,
}

impl SentMessage {
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self.message, FederationMessage::Duplicate(_))
    }

    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self.message, FederationMessage::StopDuplicating { .. })
    }
}

#[derive(Default)]
struct NetworkInner {
    handlers: RwLock<HashMap<Host, Arc<dyn DuplicationHandler>>>,
    silent: RwLock<HashSet<Host>>,
    lossy: RwLock<HashSet<Host>>,
    unreachable: RwLock<HashSet<Host>>,
    sent: Mutex<Vec<SentMessage>>,
}

/// In-process federation: every host registered on the network can reach
/// every other one.
///
/// A *silent* host accepts messages but never answers; a *lossy* host
/// handles every message but its answer never arrives; an *unreachable*
/// host fails delivery immediately.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("hosts", &self.inner.handlers.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for an engine running as `local`.
    #[must_use]
    pub fn transport(&self, local: Host) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            local,
            network: self.clone(),
        })
    }

    /// Answer messages to `host` with `handler`.
    pub fn register(&self, host: Host, handler: Arc<dyn DuplicationHandler>) {
        self.inner.handlers.write().insert(host, handler);
    }

    pub fn silence(&self, host: &Host) {
        self.inner.silent.write().insert(host.clone());
    }

    /// Deliver messages to `host` but drop its replies.
    pub fn lose_replies(&self, host: &Host) {
        self.inner.lossy.write().insert(host.clone());
    }

    pub fn cut(&self, host: &Host) {
        self.inner.unreachable.write().insert(host.clone());
    }

    pub fn restore(&self, host: &Host) {
        self.inner.silent.write().remove(host);
        self.inner.lossy.write().remove(host);
        self.inner.unreachable.write().remove(host);
    }

    /// Every message sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.inner.sent.lock().clone()
    }

    #[must_use]
    pub fn sent_to(&self, host: &Host) -> Vec<SentMessage> {
        self.inner
            .sent
            .lock()
            .iter()
            .filter(|m| &m.to == host)
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        self.inner.sent.lock().clear();
    }

    async fn deliver(
        &self,
        from: &Host,
        to: &Host,
        message: FederationMessage,
    ) -> Result<DuplicationResponse, FederationError> {
        self.inner.sent.lock().push(SentMessage {
            from: from.clone(),
            to: to.clone(),
            message: message.clone(),
        });

        if self.inner.unreachable.read().contains(to) {
            return Err(FederationError::Unreachable {
                host: to.clone(),
                reason: "connection refused".to_string(),
            });
        }
        let silent = self.inner.silent.read().contains(to);
        if silent {
            return std::future::pending().await;
        }

        let handler = self
            .inner
            .handlers
            .read()
            .get(to)
            .cloned()
            .ok_or_else(|| FederationError::NoHandler(to.clone()))?;
        let response = handler.handle(message).await;
        if self.inner.lossy.read().contains(to) {
            return std::future::pending().await;
        }
        Ok(response)
    }
}

/// One host's view of a [`LoopbackNetwork`].
#[derive(Debug)]
pub struct LoopbackTransport {
    local: Host,
    network: LoopbackNetwork,
}

impl LoopbackTransport {
    #[must_use]
    pub const fn local_host(&self) -> &Host {
        &self.local
    }
}

#[async_trait]
impl FederationTransport for LoopbackTransport {
    async fn send(
        &self,
        host: &Host,
        message: FederationMessage,
    ) -> Result<DuplicationResponse, FederationError> {
        self.network.deliver(&self.local, host, message).await
    }

    fn on_duplication_request(&self, handler: Arc<dyn DuplicationHandler>) {
        self.network.register(self.local.clone(), handler);
    }
}

/// Handler that answers every message the same way and remembers it.
#[derive(Debug)]
pub struct RecordingHandler {
    response: Mutex<DuplicationResponse>,
    received: Mutex<Vec<FederationMessage>>,
}

impl RecordingHandler {
    #[must_use]
    pub const fn new(response: DuplicationResponse) -> Self {
        Self {
            response: Mutex::new(response),
            received: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn accepting() -> Self {
        Self::new(DuplicationResponse::Accepted)
    }

    pub fn set_response(&self, response: DuplicationResponse) {
        *self.response.lock() = response;
    }

    #[must_use]
    pub fn received(&self) -> Vec<FederationMessage> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl DuplicationHandler for RecordingHandler {
    async fn handle(&self, message: FederationMessage) -> DuplicationResponse {
        self.received.lock().push(message);
        *self.response.lock()
    }
}
