//! Byte-level filtering applied to usernames and chat message bodies before
//! they are relayed to other clients.

/// Usernames: printable ASCII, excluding space. Forbidden bytes are dropped,
/// not escaped. Sanitizing to the empty string is itself a REGISTER failure
/// (enforced by the caller, not here).
pub fn sanitize_username(raw: &[u8]) -> Vec<u8> {
    raw.iter().copied().filter(|&b| (0x21..=0x7e).contains(&b)).collect()
}

/// Messages and system notices: printable ASCII plus tab, newline, and space.
pub fn sanitize_message(raw: &[u8]) -> Vec<u8> {
    raw.iter()
        .copied()
        .filter(|&b| (0x20..=0x7e).contains(&b) || matches!(b, b'\t' | b'\n'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_drops_space_and_control_bytes() {
        assert_eq!(sanitize_username(b"al ice\x01\x02"), b"alice");
    }

    #[test]
    fn username_all_forbidden_yields_empty() {
        assert!(sanitize_username(&[0x01, 0x02, 0x03, 0x04]).is_empty());
    }

    #[test]
    fn message_keeps_space_tab_and_newline() {
        assert_eq!(sanitize_message(b"hi\tthere\nworld \x07"), b"hi\tthere\nworld ");
    }
}
