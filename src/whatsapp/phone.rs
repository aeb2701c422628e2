//! Recipient addressing.

/// Domain suffix of a WhatsApp user id
pub const USER_SUFFIX: &str = "@c.us";

/// Normalize a phone number into a WhatsApp user id: keep digits only and
/// append `@c.us`. Idempotent, so already formatted ids pass through.
pub fn format_phone_number(raw: &str) -> String {
    let number = raw.strip_suffix(USER_SUFFIX).unwrap_or(raw);
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    format!("{}{}", digits, USER_SUFFIX)
}
