//! The `config` module provides the protocol configuration shared
//! between clients and the server. The client-visible [`Config`] is
//! distributed by the server's read-only `/config` endpoint; the
//! server-side [`ServerConfig`] extends it with the OPRF private key
//! and never leaves the server.

use p256::NistP256;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use voprf::OprfServer;

use crate::crypto::{
  new_bucket_encryptor, new_bucket_hasher, new_slow_hasher, OPRF_SUITE_P256_SHA256,
};
use crate::errors::MigpError;

/// The protocol version spoken by this library.
pub const DEFAULT_VERSION: u16 = 1;

/// Default number of high digest bits used to index buckets.
pub const DEFAULT_BUCKET_ID_BIT_SIZE: usize = 20;

/// The `Config` struct is the client-visible protocol configuration.
/// All fields are fixed at server setup time; clients must use an
/// identical configuration for queries to succeed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
  pub version: u16,
  #[serde(rename = "bucketIDBitSize")]
  pub bucket_id_bit_size: usize,
  #[serde(rename = "bucketHasherID")]
  pub bucket_hasher_id: String,
  #[serde(rename = "slowHasherID")]
  pub slow_hasher_id: String,
  #[serde(rename = "bucketEncryptorID")]
  pub bucket_encryptor_id: String,
  #[serde(rename = "oprfSuite")]
  pub oprf_suite: String,
}

impl Default for Config {
  fn default() -> Config {
    Config {
      version: DEFAULT_VERSION,
      bucket_id_bit_size: DEFAULT_BUCKET_ID_BIT_SIZE,
      bucket_hasher_id: "sha256".into(),
      slow_hasher_id: "scrypt".into(),
      bucket_encryptor_id: "hkdf-aes256gcm".into(),
      oprf_suite: OPRF_SUITE_P256_SHA256.into(),
    }
  }
}

impl Config {
  /// Checks that every primitive identifier resolves in the registry
  /// and that the remaining fields are usable.
  pub fn validate(&self) -> Result<(), MigpError> {
    if self.bucket_id_bit_size == 0 || self.bucket_id_bit_size > 32 {
      return Err(MigpError::Config(format!(
        "bucketIDBitSize must be in 1..=32, got {}",
        self.bucket_id_bit_size
      )));
    }
    if self.oprf_suite != OPRF_SUITE_P256_SHA256 {
      return Err(MigpError::Config(format!(
        "unsupported OPRF suite {}",
        self.oprf_suite
      )));
    }
    new_bucket_hasher(&self.bucket_hasher_id)?;
    new_slow_hasher(&self.slow_hasher_id)?;
    new_bucket_encryptor(&self.bucket_encryptor_id)?;
    Ok(())
  }

  /// Length in nibbles of the hex rendering of a bucket identifier
  /// under this configuration.
  pub fn bucket_id_hex_len(&self) -> usize {
    (self.bucket_id_bit_size + 3) / 4
  }
}

/// The `ServerConfig` struct extends [`Config`] with the OPRF private
/// key, carried as a base64 string in the JSON encoding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
  #[serde(flatten)]
  pub config: Config,
  #[serde(rename = "oprfKey")]
  pub oprf_key: String,
}

impl ServerConfig {
  /// Generates a server configuration with a fresh random OPRF key.
  /// Key candidates are rejection-sampled until the OPRF engine
  /// accepts one as a valid scalar.
  pub fn generate(config: Config) -> ServerConfig {
    let mut key = [0u8; 32];
    loop {
      OsRng.fill_bytes(&mut key);
      if OprfServer::<NistP256>::new_with_key(&key).is_ok() {
        break;
      }
    }
    ServerConfig {
      config,
      oprf_key: base64::encode(key),
    }
  }

  /// Decodes the OPRF private key from its base64 form.
  pub fn oprf_key_bytes(&self) -> Result<Vec<u8>, MigpError> {
    base64::decode(&self.oprf_key)
      .map_err(|e| MigpError::Config(format!("oprfKey is not valid base64: {}", e)))
  }

  pub fn validate(&self) -> Result<(), MigpError> {
    self.config.validate()?;
    let key = self.oprf_key_bytes()?;
    OprfServer::<NistP256>::new_with_key(&key)
      .map_err(|e| MigpError::Config(format!("oprfKey rejected by OPRF engine: {}", e)))?;
    Ok(())
  }
}

impl Default for ServerConfig {
  fn default() -> ServerConfig {
    ServerConfig::generate(Config::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_valid() {
    Config::default().validate().unwrap();
  }

  #[test]
  fn generated_server_config_is_valid() {
    ServerConfig::default().validate().unwrap();
  }

  #[test]
  fn rejects_unknown_primitive_ids() {
    let mut cfg = Config::default();
    cfg.slow_hasher_id = "md5".into();
    assert!(cfg.validate().is_err());
  }

  #[test]
  fn rejects_unsupported_oprf_suite() {
    let mut cfg = Config::default();
    cfg.oprf_suite = "P384-SHA384".into();
    assert!(matches!(cfg.validate(), Err(MigpError::Config(_))));
  }

  #[test]
  fn rejects_out_of_range_bucket_bit_size() {
    let mut cfg = Config::default();
    cfg.bucket_id_bit_size = 33;
    assert!(cfg.validate().is_err());
  }

  #[test]
  fn hex_len_tracks_bit_size() {
    let mut cfg = Config::default();
    cfg.bucket_id_bit_size = 16;
    assert_eq!(cfg.bucket_id_hex_len(), 4);
    cfg.bucket_id_bit_size = 20;
    assert_eq!(cfg.bucket_id_hex_len(), 5);
    cfg.bucket_id_bit_size = 17;
    assert_eq!(cfg.bucket_id_hex_len(), 5);
  }

  #[test]
  fn server_config_json_round_trip() {
    let cfg = ServerConfig::default();
    let json = serde_json::to_string(&cfg).unwrap();
    let parsed: ServerConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.config.version, cfg.config.version);
    assert_eq!(parsed.oprf_key, cfg.oprf_key);
    // the flattened client subset parses on its own
    let client: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(client.bucket_id_bit_size, cfg.config.bucket_id_bit_size);
  }
}
