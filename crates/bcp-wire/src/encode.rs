use crate::frame::{Frame, MAX_STR};

fn put_string(buf: &mut Vec<u8>, s: &[u8]) {
    debug_assert!(s.len() <= MAX_STR, "caller must pre-sanitize/truncate to MAX_STR");
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s);
}

/// Serializes `frame` into `buf`, appending to whatever is already there, and
/// returns the number of bytes written.
pub fn encode_into(frame: &Frame, buf: &mut Vec<u8>) -> usize {
    let start = buf.len();
    buf.push(frame.opcode().as_byte());
    match frame {
        Frame::Register { username } => put_string(buf, username),
        Frame::Send { message } => put_string(buf, message),
        Frame::Deliver { from, message } => {
            put_string(buf, from);
            put_string(buf, message);
        }
        Frame::Status { code, message } => {
            buf.push(*code);
            put_string(buf, message);
        }
    }
    buf.len() - start
}

/// Serializes `frame` into a freshly allocated buffer.
pub fn encode(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(frame, &mut buf);
    buf
}
