//! # Encoding Module
//!
//! Renders raw serial bytes for log output. Text lines are shown as text with
//! control characters escaped; anything that is not UTF-8 is shown as hex.

/// Renders `data` for a log line.
///
/// # Examples
///
/// ```
/// use serial_bridge::serial::encoding::printable;
///
/// assert_eq!(printable(b"{\"angle\":30}\r\n"), "{\"angle\":30}\\r\\n");
/// assert_eq!(printable(&[0x48, 0xFF]), "hex:48ff");
/// ```
#[must_use]
pub fn printable(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => {
            let mut out = String::with_capacity(text.len());
            for c in text.chars() {
                if c.is_control() {
                    out.extend(c.escape_default());
                } else {
                    out.push(c);
                }
            }
            out
        }
        Err(_) => format!("hex:{}", hex::encode(data)),
    }
}
