//! WhatsApp adapter, pure Rust via `whatsapp-rust`.
//!
//! Speaks the WhatsApp Web protocol (Noise handshake + Signal encryption).
//! Pairing is done by scanning a QR code. Credentials are persisted to
//! `{data_dir}/whatsapp_session/whatsapp.db` through [`SessionStore`].

mod bot;
mod events;
mod qr;
mod send;
mod session;


pub use qr::{generate_qr_image, generate_qr_terminal};
pub use session::WhatsAppSession;

use crate::whatsapp_store::SessionStore;

/// Builds one `whatsapp-rust` bot per session attempt.
pub struct WhatsAppFactory {
    pub(super) store: SessionStore,
    pub(super) device_name: String,
}

impl WhatsAppFactory {
    pub fn new(store: SessionStore, device_name: &str) -> Self {
        Self {
            store,
            device_name: device_name.to_string(),
        }
    }
}
