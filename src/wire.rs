//! The `wire` module dictates the message formats exchanged between
//! client and server: a JSON request carrying the blinded element and
//! bucket identifier, and a compact binary response frame carrying the
//! evaluated element and the raw bucket contents.

use serde::{Deserialize, Serialize};

use crate::errors::MigpError;

/// The `ClientRequest` struct carries the information the server needs
/// to perform an evaluation. `blind_element` is base64 in the JSON
/// encoding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientRequest {
  pub version: u32,
  #[serde(rename = "bucketID")]
  pub bucket_id: String,
  #[serde(rename = "blindElement")]
  pub blind_element: String,
}

/// The `ServerResponse` struct is returned as a binary frame:
///
/// | field                   | width     | encoding       |
/// |-------------------------|-----------|----------------|
/// | `version`               | 2 bytes   | big-endian u16 |
/// | `evaluated_element` len | 2 bytes   | big-endian u16 |
/// | `evaluated_element`     | len bytes | raw            |
/// | `bucket_contents`       | remainder | raw            |
#[derive(Clone, Debug, PartialEq)]
pub struct ServerResponse {
  pub version: u16,
  pub evaluated_element: Vec<u8>,
  pub bucket_contents: Vec<u8>,
}

const FRAME_PREFIX_SIZE: usize = 4;

impl ServerResponse {
  pub fn to_bytes(&self) -> Result<Vec<u8>, MigpError> {
    if self.evaluated_element.len() > u16::MAX as usize {
      return Err(MigpError::Framing(format!(
        "evaluated element of {} bytes does not fit the frame",
        self.evaluated_element.len()
      )));
    }
    let mut out = Vec::with_capacity(
      FRAME_PREFIX_SIZE + self.evaluated_element.len() + self.bucket_contents.len(),
    );
    out.extend_from_slice(&self.version.to_be_bytes());
    out.extend_from_slice(&(self.evaluated_element.len() as u16).to_be_bytes());
    out.extend_from_slice(&self.evaluated_element);
    out.extend_from_slice(&self.bucket_contents);
    Ok(out)
  }

  pub fn from_bytes(data: &[u8]) -> Result<ServerResponse, MigpError> {
    if data.len() < FRAME_PREFIX_SIZE {
      return Err(MigpError::Framing(format!(
        "response frame of {} bytes is shorter than its prefix",
        data.len()
      )));
    }
    let version = u16::from_be_bytes([data[0], data[1]]);
    let element_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    if FRAME_PREFIX_SIZE + element_len > data.len() {
      return Err(MigpError::Framing(format!(
        "evaluated element length {} overruns a {} byte frame",
        element_len,
        data.len()
      )));
    }
    Ok(ServerResponse {
      version,
      evaluated_element: data[FRAME_PREFIX_SIZE..FRAME_PREFIX_SIZE + element_len].to_vec(),
      bucket_contents: data[FRAME_PREFIX_SIZE + element_len..].to_vec(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn request_json_field_names() {
    let request = ClientRequest {
      version: 1,
      bucket_id: "ab12".into(),
      blind_element: base64::encode([7u8; 33]),
    };
    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains("\"version\":1"));
    assert!(json.contains("\"bucketID\":\"ab12\""));
    assert!(json.contains("\"blindElement\""));
    let parsed: ClientRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.bucket_id, request.bucket_id);
    assert_eq!(parsed.blind_element, request.blind_element);
  }

  #[test]
  fn response_frame_round_trip() {
    let response = ServerResponse {
      version: 1,
      evaluated_element: vec![9u8; 33],
      bucket_contents: vec![1, 2, 3, 4],
    };
    let bytes = response.to_bytes().unwrap();
    assert_eq!(ServerResponse::from_bytes(&bytes).unwrap(), response);
  }

  #[test]
  fn empty_bucket_round_trip() {
    let response = ServerResponse {
      version: 7,
      evaluated_element: vec![2u8; 33],
      bucket_contents: Vec::new(),
    };
    let bytes = response.to_bytes().unwrap();
    let parsed = ServerResponse::from_bytes(&bytes).unwrap();
    assert_eq!(parsed.version, 7);
    assert!(parsed.bucket_contents.is_empty());
  }

  #[test]
  fn truncations_are_framing_errors() {
    let response = ServerResponse {
      version: 1,
      evaluated_element: vec![9u8; 33],
      bucket_contents: Vec::new(),
    };
    let bytes = response.to_bytes().unwrap();
    // anything shorter than the prefix plus the declared element is
    // rejected; shorter-than-prefix frames always are
    for cut in 0..bytes.len() {
      let res = ServerResponse::from_bytes(&bytes[..cut]);
      assert!(matches!(res, Err(MigpError::Framing(_))), "cut at {}", cut);
    }
  }

  #[test]
  fn oversized_element_is_rejected_on_encode() {
    let response = ServerResponse {
      version: 1,
      evaluated_element: vec![0u8; u16::MAX as usize + 1],
      bucket_contents: Vec::new(),
    };
    assert!(matches!(
      response.to_bytes(),
      Err(MigpError::Framing(_))
    ));
  }
}
