//! Text encoding for thermal printers
//!
//! Most of the printers this service drives expect GBK. The charset is a
//! WHATWG label, so "gbk", "gb2312", "shift_jis", "windows-1252" all work.

use encoding_rs::Encoding;
use tracing::{instrument, warn};

/// Look up an encoding by label
pub fn resolve_charset(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Encode `text` in `charset`
///
/// Unknown labels fall back to the UTF-8 bytes of the text. Characters the
/// target charset cannot represent come out as numeric character references.
#[instrument(skip(text), fields(len = text.len()))]
pub fn encode_text(text: &str, charset: &str) -> Vec<u8> {
    match resolve_charset(charset) {
        Some(encoding) => {
            let (bytes, _, unmappable) = encoding.encode(text);
            if unmappable {
                warn!(charset = encoding.name(), "Text has characters the charset cannot encode");
            }
            bytes.into_owned()
        }
        None => {
            warn!("Unknown charset, sending UTF-8");
            text.as_bytes().to_vec()
        }
    }
}
