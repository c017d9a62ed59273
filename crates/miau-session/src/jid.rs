//! Recipient addressing helpers.

use crate::session_error::SessionError;

/// Broadcast address that publishes to the account's status feed.
pub const STATUS_BROADCAST_JID: &str = "status@broadcast";
const USER_SERVER: &str = "s.whatsapp.net";
const DEFAULT_STATUS_BACKGROUND_ARGB: u32 = 0xFFFF_FFFF;

/// Converts a caller-supplied number into a protocol address.
///
/// Full addresses (including `@g.us` groups) pass through; anything else is
/// reduced to its digits and addressed as a user.
pub fn number_to_jid(number: &str) -> Result<String, SessionError> {
    let trimmed = number.trim();
    if trimmed.contains('@') {
        return Ok(trimmed.to_string());
    }
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(SessionError::InvalidRecipient(number.to_string()));
    }
    Ok(format!("{digits}@{USER_SERVER}"))
}

/// Parses `#RRGGBB` or `AARRGGBB` into ARGB, defaulting to opaque white.
pub fn parse_background_color(raw: &str) -> u32 {
    let hex = raw.trim().trim_start_matches('#');
    if hex.is_empty() {
        return DEFAULT_STATUS_BACKGROUND_ARGB;
    }
    let argb = if hex.len() == 6 {
        format!("FF{hex}")
    } else {
        hex.to_string()
    };
    u32::from_str_radix(&argb, 16).unwrap_or(DEFAULT_STATUS_BACKGROUND_ARGB)
}
