//! Outgoing message plumbing.

use tracing::warn;
use wabridge_core::{error::BridgeError, message::ConversationId};
use wacore_binary::jid::Jid;
use whatsapp_rust::client::Client;

/// Parse a conversation id into a one-to-one chat JID.
pub(super) fn chat_jid(to: &ConversationId) -> Result<Jid, BridgeError> {
    let address = to.to_address();
    address.parse().map_err(|e| {
        BridgeError::InvalidRequest(format!("invalid whatsapp JID '{address}': {e}"))
    })
}

/// Send one message with a single protocol call. Returns the protocol message id.
///
/// No retry: a failed attempt may still have reached the recipient.
pub(super) async fn send_once(
    client: &Client,
    jid: &Jid,
    msg: waproto::whatsapp::Message,
) -> Result<String, BridgeError> {
    client.send_message(jid.clone(), msg).await.map_err(|e| {
        warn!("whatsapp send to {jid} failed: {e}");
        BridgeError::Session(format!("whatsapp send failed: {e}"))
    })
}
