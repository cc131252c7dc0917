//! Pairing links for the DG-LAB app.

/// Prefix the app's QR scanner recognises as a socket pairing link.
pub const APP_LINK_PREFIX: &str = "https://www.dungeon-lab.com/app-download.php#DGLAB-SOCKET#";

/// Build the link a controller app scans to bind to `client_id` on
/// `server` (a `ws://` or `wss://` relay URL).
pub fn bind_url(server: &str, client_id: &str) -> String {
    format!("{APP_LINK_PREFIX}{}/{client_id}", server.trim_end_matches('/'))
}
