//! Gateway: the event loop between the protocol session, history, and the
//! webhook endpoints.
//!
//! Inbound messages are handled one at a time, in delivery order. The
//! automated send path lives here too so that echo markers and history
//! writes share one guard and one store.

mod outbound;
mod pipeline;
mod recorder;


pub use outbound::{Origin, Upload};

use crate::dispatch::Forward;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use wabridge_channels::{MessageClassifier, SupervisorHandle};
use wabridge_core::session::InboundMessage;
use wabridge_memory::{ChatHistoryStore, DedupGuard};

/// Display name recorded for messages the operator typed on the phone.
pub const OPERATOR_NAME: &str = "Me";
/// Display name recorded for automated sends without an explicit pushname.
pub const ASSISTANT_NAME: &str = "AI Assistant";

pub struct Gateway {
    pub(crate) supervisor: SupervisorHandle,
    pub(crate) classifier: MessageClassifier,
    pub(crate) history: Arc<ChatHistoryStore>,
    pub(crate) dedup: Arc<DedupGuard>,
    pub(crate) forward: Arc<dyn Forward>,
    pub(crate) http: reqwest::Client,
}

impl Gateway {
    pub fn new(
        supervisor: SupervisorHandle,
        classifier: MessageClassifier,
        history: Arc<ChatHistoryStore>,
        dedup: Arc<DedupGuard>,
        forward: Arc<dyn Forward>,
    ) -> Self {
        Self {
            supervisor,
            classifier,
            history,
            dedup,
            forward,
            http: reqwest::Client::new(),
        }
    }

    pub fn supervisor(&self) -> &SupervisorHandle {
        &self.supervisor
    }

    pub fn history(&self) -> &ChatHistoryStore {
        &self.history
    }

    /// Consume protocol messages until the supervisor drops its sender.
    pub async fn run(self: Arc<Self>, mut messages: mpsc::Receiver<InboundMessage>) {
        info!("gateway running");
        while let Some(msg) = messages.recv().await {
            self.handle_message(msg).await;
        }
        info!("gateway stopped: message stream closed");
    }
}
