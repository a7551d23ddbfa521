use std::io::{self, Read};

use crate::frame::{Frame, Opcode, WireError, MAX_STR};

/// What a successful `read_from` call produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A complete frame was assembled.
    Ready(Frame),
    /// The socket would block; the reader holds onto partial progress and
    /// should be called again once the fd is readable again.
    WouldBlock,
}

#[derive(Debug)]
enum Pending {
    Register,
    Send,
    DeliverFrom,
    DeliverMessage { from: Vec<u8> },
    Status { code: u8 },
}

#[derive(Debug)]
enum Step {
    Opcode { have: usize, buf: [u8; 1] },
    StatusCode { have: usize, buf: [u8; 1] },
    Len { pending: Pending, have: usize, buf: [u8; 2] },
    Body { pending: Pending, have: usize, len: usize, buf: Vec<u8> },
}

impl Default for Step {
    fn default() -> Self {
        Step::Opcode { have: 0, buf: [0] }
    }
}

/// Incremental BCP frame decoder.
///
/// Frames may arrive split across multiple non-blocking reads; a `FrameReader`
/// buffers partial progress between calls to [`FrameReader::read_from`] so a
/// short read is never itself a protocol error — only a length prefix over
/// [`MAX_STR`] or an unrecognized opcode is.
#[derive(Debug, Default)]
pub struct FrameReader {
    step: Step,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads from `src` until a frame is fully assembled, the socket would
    /// block, or an error/EOF occurs. On `WouldBlock` the reader can be
    /// called again later and will resume exactly where it left off.
    pub fn read_from<R: Read>(&mut self, src: &mut R) -> Result<Outcome, WireError> {
        loop {
            match &mut self.step {
                Step::Opcode { have, buf } => {
                    if !fill(src, buf, have)? {
                        return Ok(Outcome::WouldBlock);
                    }
                    let opcode = Opcode::from_byte(buf[0]).ok_or(WireError::UnknownOpcode(buf[0]))?;
                    self.step = match opcode {
                        Opcode::Register => Step::Len { pending: Pending::Register, have: 0, buf: [0; 2] },
                        Opcode::Send => Step::Len { pending: Pending::Send, have: 0, buf: [0; 2] },
                        Opcode::Deliver => Step::Len { pending: Pending::DeliverFrom, have: 0, buf: [0; 2] },
                        Opcode::Status => Step::StatusCode { have: 0, buf: [0] },
                    };
                }
                Step::StatusCode { have, buf } => {
                    if !fill(src, buf, have)? {
                        return Ok(Outcome::WouldBlock);
                    }
                    let code = buf[0];
                    self.step = Step::Len { pending: Pending::Status { code }, have: 0, buf: [0; 2] };
                }
                Step::Len { have, buf, .. } => {
                    if !fill(src, buf, have)? {
                        return Ok(Outcome::WouldBlock);
                    }
                    let len = u16::from_be_bytes(*buf) as usize;
                    if len > MAX_STR {
                        return Err(WireError::StringTooLong(len));
                    }
                    let Step::Len { pending, .. } = std::mem::take(&mut self.step) else {
                        unreachable!()
                    };
                    self.step = Step::Body { pending, have: 0, len, buf: vec![0; len] };
                }
                Step::Body { have, len, buf, .. } => {
                    if !fill(src, &mut buf[..*len], have)? {
                        return Ok(Outcome::WouldBlock);
                    }
                    let Step::Body { pending, buf, .. } = std::mem::take(&mut self.step) else {
                        unreachable!()
                    };
                    match pending {
                        Pending::Register => {
                            self.step = Step::default();
                            return Ok(Outcome::Ready(Frame::Register { username: buf }));
                        }
                        Pending::Send => {
                            self.step = Step::default();
                            return Ok(Outcome::Ready(Frame::Send { message: buf }));
                        }
                        Pending::DeliverFrom => {
                            self.step = Step::Len {
                                pending: Pending::DeliverMessage { from: buf },
                                have: 0,
                                buf: [0; 2],
                            };
                        }
                        Pending::DeliverMessage { from } => {
                            self.step = Step::default();
                            return Ok(Outcome::Ready(Frame::Deliver { from, message: buf }));
                        }
                        Pending::Status { code } => {
                            self.step = Step::default();
                            return Ok(Outcome::Ready(Frame::Status { code, message: buf }));
                        }
                    }
                }
            }
        }
    }
}

/// Fills `buf[*have..]` from `src`, updating `have`. Returns `Ok(true)` once
/// `buf` is fully populated, `Ok(false)` on `WouldBlock`.
fn fill<R: Read>(src: &mut R, buf: &mut [u8], have: &mut usize) -> Result<bool, WireError> {
    while *have < buf.len() {
        match src.read(&mut buf[*have..]) {
            Ok(0) => return Err(WireError::Eof),
            Ok(n) => *have += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_to_wire(e)),
        }
    }
    Ok(true)
}

fn io_to_wire(e: io::Error) -> WireError {
    // Any other I/O error is treated the same as an ungraceful EOF: the
    // caller has no partial frame it could trust.
    let _ = e;
    WireError::Eof
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use std::io::Cursor;

    fn roundtrip(frame: Frame) {
        let bytes = encode(&frame);
        let mut cursor = Cursor::new(bytes);
        let mut reader = FrameReader::new();
        match reader.read_from(&mut cursor).unwrap() {
            Outcome::Ready(got) => assert_eq!(got, frame),
            Outcome::WouldBlock => panic!("expected a complete frame"),
        }
    }

    #[test]
    fn decodes_each_frame_kind() {
        roundtrip(Frame::Register { username: b"alice".to_vec() });
        roundtrip(Frame::Send { message: b"hello".to_vec() });
        roundtrip(Frame::Deliver { from: b"bob".to_vec(), message: b"hi".to_vec() });
        roundtrip(Frame::Status { code: 0, message: Vec::new() });
        roundtrip(Frame::Status { code: 1, message: b"nope".to_vec() });
    }

    #[test]
    fn resumes_across_short_reads() {
        let bytes = encode(&Frame::Register { username: b"alice".to_vec() });
        let mut reader = FrameReader::new();
        let mut outcome = None;
        for byte in bytes {
            let mut cursor = Cursor::new([byte]);
            match reader.read_from(&mut cursor).unwrap() {
                Outcome::Ready(frame) => {
                    outcome = Some(frame);
                    break;
                }
                Outcome::WouldBlock => continue,
            }
        }
        assert_eq!(outcome, Some(Frame::Register { username: b"alice".to_vec() }));
    }

    #[test]
    fn rejects_oversized_length() {
        let mut bytes = vec![Opcode::Send.as_byte()];
        bytes.extend_from_slice(&((MAX_STR + 1) as u16).to_be_bytes());
        let mut cursor = Cursor::new(bytes);
        let mut reader = FrameReader::new();
        assert_eq!(reader.read_from(&mut cursor), Err(WireError::StringTooLong(MAX_STR + 1)));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut cursor = Cursor::new([9u8]);
        let mut reader = FrameReader::new();
        assert_eq!(reader.read_from(&mut cursor), Err(WireError::UnknownOpcode(9)));
    }
}
