use std::fmt;

use thiserror::Error;

/// Errors from [`Command::parse`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
  #[error("Command frame too short: {0} bytes, need at least 8")]
  TooShort(usize),
}

/// A protocol frame: 4-byte little-endian command type, 4-byte little-endian
/// body length, then the body bytes.
///
/// The length field is derived from the body on encode, so a round trip
/// through [`to_bytes`](Command::to_bytes) and [`parse`](Command::parse)
/// always reproduces the original pair as long as the body fits in 32 bits.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
  cmd_type: u32,
  body: Vec<u8>,
}

impl Command {
  pub fn new(cmd_type: u32, body: impl Into<Vec<u8>>) -> Self {
    Self {
      cmd_type,
      body: body.into(),
    }
  }

  /// Decodes a frame. Everything past the 8-byte header is the body; a
  /// length field that disagrees with the payload is accepted as-is.
  pub fn parse(data: &[u8]) -> Result<Self, CommandError> {
    if data.len() < 8 {
      return Err(CommandError::TooShort(data.len()));
    }
    let cmd_type = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    Ok(Self {
      cmd_type,
      body: data[8..].to_vec(),
    })
  }

  pub fn cmd_type(&self) -> u32 {
    self.cmd_type
  }

  pub fn body_len(&self) -> u32 {
    self.body.len() as u32
  }

  pub fn body(&self) -> &[u8] {
    &self.body
  }

  pub fn to_bytes(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + self.body.len());
    out.extend_from_slice(&self.cmd_type.to_le_bytes());
    out.extend_from_slice(&self.body_len().to_le_bytes());
    out.extend_from_slice(&self.body);
    out
  }
}

impl fmt::Debug for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Command")
      .field("cmd_type", &self.cmd_type)
      .field("body_len", &self.body.len())
      .finish()
  }
}
