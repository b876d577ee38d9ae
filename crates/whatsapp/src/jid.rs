//! Recipient address normalization.

use bulkwa_common::SendError;

/// Server part of a personal-chat JID.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Normalize a recipient address into a JID.
///
/// Addresses that already contain `@` pass through untouched. Anything else
/// is read as a phone number: formatting characters are dropped and the
/// remaining digits get the personal-chat server appended.
pub fn to_jid(address: &str) -> Result<String, SendError> {
    let address = address.trim();
    if let Some((user, server)) = address.split_once('@') {
        if user.is_empty() || server.is_empty() {
            return Err(SendError::InvalidAddress(address.to_string()));
        }
        return Ok(address.to_string());
    }

    let mut digits = String::with_capacity(address.len());
    for c in address.chars() {
        match c {
            '0'..='9' => digits.push(c),
            '+' | ' ' | '-' | '(' | ')' | '.' => {},
            _ => return Err(SendError::InvalidAddress(address.to_string())),
        }
    }
    if digits.is_empty() {
        return Err(SendError::InvalidAddress(address.to_string()));
    }
    Ok(format!("{digits}@{USER_SERVER}"))
}

/// Bare phone identity of a connected JID.
///
/// `15551234567:12@s.whatsapp.net` becomes `15551234567`.
pub fn identity_from_jid(jid: &str) -> String {
    let user = jid.split('@').next().unwrap_or(jid);
    user.split(':').next().unwrap_or(user).to_string()
}
