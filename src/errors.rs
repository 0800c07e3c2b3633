//! The `errors` module provides the error kinds exposed by the client-
//! and server-side halves of the protocol.

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FmtResult};

// MigpError encapsulates the failure cases of the MIGP protocol. Note
// that a bucket entry header that fails to authenticate is *not* an
// error: it is the expected outcome for every entry except (at most)
// one per query, and the scan simply skips it.
#[derive(Debug)]
pub enum MigpError {
  // Malformed configuration: bad field values or an unsupported OPRF
  // suite identifier.
  Config(String),
  // A primitive identifier that is not present in the registry.
  UnknownPrimitive(String),
  // Failure inside the OPRF engine (blind, evaluate or finalize).
  Oprf(voprf::Error),
  // AEAD or key-derivation failure on data that should have been
  // well-formed, e.g. a body that fails to decrypt after its header
  // authenticated. Indicates corruption.
  Crypto(String),
  // The protocol version of the peer does not match our configuration.
  VersionMismatch { expected: u32, got: u32 },
  // A truncated frame, or a bucket whose encoded lengths overrun its
  // bounds.
  Framing(String),
  // I/O failure reading or writing a bucket file.
  Storage(std::io::Error),
  // Connection failure or a non-200 response from the server.
  Transport(String),
}

impl Error for MigpError {}

impl Display for MigpError {
  fn fmt(&self, f: &mut Formatter) -> FmtResult {
    match self {
      MigpError::Config(s) => {
        write!(f, "Invalid configuration: {}.", s)
      }
      MigpError::UnknownPrimitive(id) => {
        write!(f, "Unknown primitive identifier: {}.", id)
      }
      MigpError::Oprf(e) => {
        write!(f, "Error occurred during operation of OPRF: {}.", e)
      }
      MigpError::Crypto(s) => {
        write!(f, "Cryptographic failure: {}.", s)
      }
      MigpError::VersionMismatch { expected, got } => {
        write!(
          f,
          "Protocol version mismatch: configured version is {}, peer sent {}.",
          expected, got
        )
      }
      MigpError::Framing(s) => {
        write!(f, "Framing error: {}.", s)
      }
      MigpError::Storage(e) => {
        write!(f, "Storage error: {}.", e)
      }
      MigpError::Transport(s) => {
        write!(f, "Transport error: {}.", s)
      }
    }
  }
}

impl From<std::io::Error> for MigpError {
  fn from(e: std::io::Error) -> Self {
    MigpError::Storage(e)
  }
}

impl From<voprf::Error> for MigpError {
  fn from(e: voprf::Error) -> Self {
    MigpError::Oprf(e)
  }
}
