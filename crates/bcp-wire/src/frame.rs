use thiserror::Error;

/// Upper bound on the byte length of any length-prefixed string on the wire.
pub const MAX_STR: usize = 4095;

/// One-byte opcode tag that always leads a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Register = 1,
    Send = 2,
    Deliver = 3,
    Status = 4,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Register),
            2 => Some(Self::Send),
            3 => Some(Self::Deliver),
            4 => Some(Self::Status),
            _ => None,
        }
    }

    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A fully assembled Basic Chat Protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Register { username: Vec<u8> },
    Send { message: Vec<u8> },
    Deliver { from: Vec<u8>, message: Vec<u8> },
    Status { code: u8, message: Vec<u8> },
}

impl Frame {
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Register { .. } => Opcode::Register,
            Self::Send { .. } => Opcode::Send,
            Self::Deliver { .. } => Opcode::Deliver,
            Self::Status { .. } => Opcode::Status,
        }
    }

    pub fn status_ok() -> Self {
        Self::Status { code: 0, message: Vec::new() }
    }

    pub fn status_error(message: impl Into<Vec<u8>>) -> Self {
        Self::Status { code: 1, message: message.into() }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("string length {0} exceeds MAX_STR ({MAX_STR})")]
    StringTooLong(usize),
    #[error("peer closed the connection mid-frame")]
    Eof,
}
