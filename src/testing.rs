//! Fakes shared by the gateway and HTTP API tests.

use crate::dispatch::{Forward, Webhook};
use crate::gateway::Gateway;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wabridge_channels::{
    ConnectionSupervisor, MediaMaterializer, MessageClassifier, SupervisorConfig,
};
use wabridge_core::{
    error::BridgeError,
    message::{ChatEntry, ConversationId, MediaKind},
    session::{EventSink, InboundMessage, MediaPayload, RawContent, SessionEvent},
    traits::{CredentialStore, MediaSource, Session, SessionFactory},
};
use wabridge_memory::{ChatHistoryStore, DedupGuard};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct FakeSession {
    pub(crate) sent: Mutex<Vec<(String, String)>>,
    pub(crate) typing: Mutex<Vec<bool>>,
    pub(crate) reads: Mutex<Vec<String>>,
    /// Number of upcoming send calls that fail.
    pub(crate) failing_sends: AtomicUsize,
    pub(crate) send_calls: AtomicUsize,
}

impl FakeSession {
    pub(crate) fn failing(sends: usize) -> Self {
        Self {
            failing_sends: AtomicUsize::new(sends),
            ..Default::default()
        }
    }

    fn push(&self, to: &ConversationId, what: String) -> Result<String, BridgeError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(BridgeError::Session("socket closed".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), what));
        Ok(format!("MSG{}", sent.len()))
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn send_text(&self, to: &ConversationId, text: &str) -> Result<String, BridgeError> {
        self.push(to, format!("text:{text}"))
    }
    async fn send_image(
        &self,
        to: &ConversationId,
        bytes: Vec<u8>,
        mimetype: &str,
        caption: Option<&str>,
    ) -> Result<String, BridgeError> {
        self.push(
            to,
            format!("image:{}:{mimetype}:{}", bytes.len(), caption.unwrap_or("")),
        )
    }
    async fn send_document(
        &self,
        to: &ConversationId,
        bytes: Vec<u8>,
        file_name: &str,
        mimetype: &str,
        _: Option<&str>,
    ) -> Result<String, BridgeError> {
        self.push(to, format!("document:{}:{file_name}:{mimetype}", bytes.len()))
    }
    async fn set_typing(&self, _: &ConversationId, typing: bool) -> Result<(), BridgeError> {
        self.typing.lock().unwrap().push(typing);
        Ok(())
    }
    async fn mark_read(&self, _: &ConversationId, ids: &[String]) -> Result<(), BridgeError> {
        self.reads.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }
    async fn logout(&self) -> Result<(), BridgeError> {
        Ok(())
    }
    async fn shutdown(&self) {}
}

pub(crate) struct FakeFactory {
    pub(crate) session: Arc<FakeSession>,
    connect: bool,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn start(&self, sink: EventSink) -> Result<Arc<dyn Session>, BridgeError> {
        if self.connect {
            sink.emit(SessionEvent::Connected {
                identity: Some("628999".into()),
            })
            .await;
        } else {
            sink.emit(SessionEvent::Qr("2@pairing".into())).await;
        }
        Ok(self.session.clone())
    }
}

pub(crate) struct NoCredentials;

#[async_trait]
impl CredentialStore for NoCredentials {
    async fn exists(&self) -> Result<bool, BridgeError> {
        Ok(false)
    }
    async fn erase(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeForward {
    pub(crate) hooks: Mutex<Vec<Webhook>>,
    pub(crate) fail: bool,
}

#[async_trait]
impl Forward for FakeForward {
    async fn forward(&self, hook: Webhook) -> Result<(), BridgeError> {
        self.hooks.lock().unwrap().push(hook);
        if self.fail {
            Err(BridgeError::Webhook("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

pub(crate) struct BrokenMedia {
    pub(crate) calls: AtomicUsize,
}

#[async_trait]
impl MediaSource for BrokenMedia {
    async fn download(&self, _: MediaKind) -> Result<Vec<u8>, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BridgeError::Media("media key expired".into()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub(crate) struct Harness {
    pub(crate) gateway: Arc<Gateway>,
    pub(crate) session: Arc<FakeSession>,
    pub(crate) forward: Arc<FakeForward>,
    pub(crate) media_dir: PathBuf,
    _tmp: tempfile::TempDir,
}

impl Harness {
    pub(crate) async fn connected() -> Self {
        Self::build(true, FakeSession::default(), FakeForward::default()).await
    }

    pub(crate) async fn build(connect: bool, session: FakeSession, forward: FakeForward) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let session = Arc::new(session);
        let forward = Arc::new(forward);
        let factory = Arc::new(FakeFactory {
            session: session.clone(),
            connect,
        });
        let (supervisor, _messages, _task) = ConnectionSupervisor::spawn(
            factory,
            Arc::new(NoCredentials),
            SupervisorConfig {
                reconnect_delay: Duration::from_millis(20),
                logout_restart_delay: Duration::from_millis(20),
            },
        );
        let materializer = Arc::new(
            MediaMaterializer::new(
                tmp.path().join("media"),
                "http://localhost:3001/media",
                1024,
                60,
            )
            .unwrap(),
        );
        let history = Arc::new(ChatHistoryStore::new(tmp.path().join("chats"), 100).unwrap());
        let gateway = Arc::new(Gateway::new(
            supervisor,
            MessageClassifier::new(materializer),
            history,
            Arc::new(DedupGuard::new(Duration::from_secs(2))),
            forward.clone(),
        ));

        let mut state = gateway.supervisor().subscribe();
        let want = if connect { "connected" } else { "connecting" };
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let current = state.borrow_and_update();
                    if current.phase() == want && (connect || current.qr().is_some()) {
                        break;
                    }
                }
                state.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        Self {
            gateway,
            session,
            forward,
            media_dir: tmp.path().join("media"),
            _tmp: tmp,
        }
    }

    pub(crate) async fn history(&self, number: &str) -> Vec<ChatEntry> {
        self.gateway
            .history()
            .read(&ConversationId::parse(number).unwrap())
            .await
            .unwrap()
    }

    pub(crate) fn hooks(&self) -> Vec<Webhook> {
        self.forward.hooks.lock().unwrap().clone()
    }
}

pub(crate) fn text_message(from_me: bool, text: &str, id: &str) -> InboundMessage {
    InboundMessage {
        chat: "628111@s.whatsapp.net".into(),
        message_id: id.into(),
        from_me,
        push_name: Some("Budi".into()),
        content: RawContent {
            tag: "conversation".into(),
            conversation: Some(text.into()),
            ..Default::default()
        },
        media: None,
    }
}

pub(crate) fn image_message(
    from_me: bool,
    caption: Option<&str>,
    media: Arc<BrokenMedia>,
) -> InboundMessage {
    InboundMessage {
        chat: "628111@s.whatsapp.net".into(),
        message_id: "IMG1".into(),
        from_me,
        push_name: Some("Budi".into()),
        content: RawContent {
            tag: "imageMessage".into(),
            image: Some(MediaPayload {
                caption: caption.map(str::to_string),
                mimetype: Some("image/jpeg".into()),
                ..Default::default()
            }),
            ..Default::default()
        },
        media: Some(media),
    }
}

