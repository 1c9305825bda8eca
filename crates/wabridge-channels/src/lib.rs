//! # wabridge-channels
//!
//! Session supervision, message classification, media materialization, and
//! the WhatsApp Web adapter.

pub mod classify;
pub mod media;
pub mod supervisor;
pub mod whatsapp;
pub mod whatsapp_store;

pub use classify::MessageClassifier;
pub use media::MediaMaterializer;
pub use supervisor::{ConnectionSupervisor, SupervisorConfig, SupervisorHandle};
pub use whatsapp::{generate_qr_image, generate_qr_terminal, WhatsAppFactory};
pub use whatsapp_store::SessionStore;
