//! Default values for serde `#[serde(default = "...")]` attributes.

pub(super) fn default_name() -> String {
    "wabridge".to_string()
}
pub(super) fn default_data_dir() -> String {
    "~/.wabridge".to_string()
}
pub(super) fn default_log_level() -> String {
    "info".to_string()
}
pub(super) fn default_device_name() -> String {
    "WABRIDGE".to_string()
}
pub(super) fn default_reconnect_delay_ms() -> u64 {
    1000
}
pub(super) fn default_logout_restart_delay_ms() -> u64 {
    1000
}
pub(super) fn default_public_url() -> String {
    "http://localhost:3001/media".to_string()
}
pub(super) fn default_max_width() -> u32 {
    1024
}
pub(super) fn default_jpeg_quality() -> u8 {
    60
}
pub(super) fn default_max_entries() -> usize {
    super::MAX_HISTORY_ENTRIES
}
pub(super) fn default_dedup_window_ms() -> u64 {
    2000
}
pub(super) fn default_webhook_timeout() -> u64 {
    15
}
pub(super) fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
pub(super) fn default_api_port() -> u16 {
    3001
}
