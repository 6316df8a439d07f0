//! Converting binary data to a `data:` URL.

use base64::{Engine as _, prelude::BASE64_STANDARD};

/// Convert binary data to a `data:` URL, for embedding pages and documents in
/// cloud recognition requests.
pub fn data_url(mime_type: &str, data: &[u8]) -> String {
    // Some sources indicate that the Base64 data should be percent-encoded, but
    // in practice this breaks Gemini-backed gateways.
    format!("data:{};base64,{}", mime_type, BASE64_STANDARD.encode(data))
}
