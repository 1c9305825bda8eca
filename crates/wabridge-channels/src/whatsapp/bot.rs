//! Bot lifecycle: build a bot for one session attempt and translate its
//! events into [`SessionEvent`]s.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use wacore::types::events::Event;
use whatsapp_rust::bot::Bot;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

use wabridge_core::{
    error::BridgeError,
    session::{EventSink, SessionEvent},
    traits::{Session, SessionFactory},
};

use super::events::{closure_reason, inbound_message};
use super::session::WhatsAppSession;
use super::WhatsAppFactory;

#[async_trait]
impl SessionFactory for WhatsAppFactory {
    async fn start(&self, sink: EventSink) -> Result<Arc<dyn Session>, BridgeError> {
        let generation = sink.generation();
        info!("WhatsApp bot building (generation {generation})...");

        let mut bot = Bot::builder()
            .with_backend(Arc::new(self.store.clone()))
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .with_device_props(
                Some(self.device_name.clone()),
                None,
                Some(waproto::whatsapp::device_props::PlatformType::Desktop),
            )
            .on_event(move |event, client| {
                let sink = sink.clone();
                async move {
                    let forwarded = match event {
                        Event::PairingQrCode { code, .. } => {
                            debug!("QR data: {code}");
                            sink.emit(SessionEvent::Qr(code)).await
                        }
                        Event::PairSuccess(_) => {
                            info!("WhatsApp pairing successful");
                            true
                        }
                        Event::Connected(_) => {
                            let identity = client.get_pn().await.map(|jid| jid.user);
                            sink.emit(SessionEvent::Connected { identity }).await
                        }
                        Event::Message(msg, info) => {
                            let msg = inbound_message(*msg, info, client);
                            sink.emit(SessionEvent::Message(msg)).await
                        }
                        other => match closure_reason(&other) {
                            Some(reason) => {
                                warn!("whatsapp session ended: {reason}");
                                sink.emit(SessionEvent::Closed(reason)).await
                            }
                            None => true,
                        },
                    };
                    if !forwarded {
                        debug!(
                            "supervisor gone, dropping whatsapp event (generation {generation})"
                        );
                    }
                }
            })
            .build()
            .await
            .map_err(|e| BridgeError::Session(format!("whatsapp bot build failed: {e}")))?;

        let client = bot.client();
        let task = bot
            .run()
            .await
            .map_err(|e| BridgeError::Session(format!("whatsapp bot run failed: {e}")))?;

        info!("WhatsApp bot started");
        Ok(Arc::new(WhatsAppSession::new(client, task)))
    }
}
