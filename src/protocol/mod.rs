//! Protocol handling for the logon and world binary message formats
//!
//! Messages use little-endian byte order except for the world header size
//! fields. Strings are either NUL-terminated or length-prefixed.

pub mod guid;
mod messages;
mod opcodes;
mod reader;
pub mod world;
mod writer;

pub use guid::{HighGuid, ObjectGuid};
pub use messages::*;
pub use opcodes::{describe_opcode, AuthCmd, AuthResult, ResponseCode, WorldOpcode};
pub use reader::{MessageReader, ReadError, ReadResult};
pub use writer::{MessageWriter, WriteError};
