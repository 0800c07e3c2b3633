//! The `server` module provides the server half of the protocol: OPRF
//! evaluation of client requests, bucket lookups, and the insertion
//! engine that expands breach credentials into encrypted bucket
//! entries.

use p256::NistP256;
use rand_core::OsRng;
use voprf::{BlindedElement, OprfClient, OprfServer};
use zeroize::Zeroize;

use crate::config::{Config, ServerConfig};
use crate::crypto::{
  bucket_hash_to_id, bucket_id_to_hex, derive_entry_secret, new_bucket_encryptor,
  new_bucket_hasher, new_slow_hasher, serialize_username_password, BucketEncryptor,
  BucketHasher, EntryFlag, SlowHasher,
};
use crate::errors::MigpError;
use crate::kv::BucketStore;
use crate::variants::password_variants;
use crate::wire::{ClientRequest, ServerResponse};

/// The `Server` struct wraps the primitive set and OPRF key needed to
/// answer evaluate requests and to encrypt new breach entries. It is
/// stateless across requests apart from the bucket store passed into
/// each call.
pub struct Server {
  config: Config,
  bucket_hasher: Box<dyn BucketHasher>,
  slow_hasher: Box<dyn SlowHasher>,
  bucket_encryptor: Box<dyn BucketEncryptor>,
  oprf_server: OprfServer<NistP256>,
}

impl Server {
  pub fn new(cfg: &ServerConfig) -> Result<Server, MigpError> {
    cfg.config.validate()?;
    let key = cfg.oprf_key_bytes()?;
    let oprf_server = OprfServer::new_with_key(&key).map_err(MigpError::Oprf)?;
    Ok(Server {
      config: cfg.config.clone(),
      bucket_hasher: new_bucket_hasher(&cfg.config.bucket_hasher_id)?,
      slow_hasher: new_slow_hasher(&cfg.config.slow_hasher_id)?,
      bucket_encryptor: new_bucket_encryptor(&cfg.config.bucket_encryptor_id)?,
      oprf_server,
    })
  }

  /// The client-visible subset of the configuration, served read-only.
  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Returns the bucket ID for the given username.
  pub fn bucket_id(&self, username: &[u8]) -> u32 {
    bucket_hash_to_id(
      &self.bucket_hasher.hash(username),
      self.config.bucket_id_bit_size,
    )
  }

  pub fn bucket_id_hex(&self, username: &[u8]) -> String {
    bucket_id_to_hex(self.bucket_id(username), self.config.bucket_id_bit_size)
  }

  /// Runs the OPRF over a serialized blinded element from a client.
  pub fn evaluate(&self, blinded_element: &[u8]) -> Result<Vec<u8>, MigpError> {
    let blinded =
      BlindedElement::<NistP256>::deserialize(blinded_element).map_err(MigpError::Oprf)?;
    let evaluated = self.oprf_server.blind_evaluate(&blinded);
    Ok(evaluated.serialize().as_slice().to_vec())
  }

  /// Answers an evaluate request: validates the version and bucket ID,
  /// evaluates the blinded element, and returns it together with the
  /// requested bucket's bytes (empty if the bucket does not exist).
  pub fn handle_evaluate(
    &self,
    request: &ClientRequest,
    store: &BucketStore,
  ) -> Result<ServerResponse, MigpError> {
    if request.version != u32::from(self.config.version) {
      return Err(MigpError::VersionMismatch {
        expected: u32::from(self.config.version),
        got: request.version,
      });
    }
    self.check_bucket_id(&request.bucket_id)?;
    let blinded = base64::decode(&request.blind_element)
      .map_err(|e| MigpError::Framing(format!("blindElement is not valid base64: {}", e)))?;
    let evaluated_element = self.evaluate(&blinded)?;
    let bucket_contents = store.get(&request.bucket_id)?;
    Ok(ServerResponse {
      version: self.config.version,
      evaluated_element,
      bucket_contents,
    })
  }

  /// Inserts a breach credential. The credential is expanded into the
  /// exact record, up to `num_variants` password variants, and an
  /// optional username-only record; one encrypted entry per record is
  /// appended to the bucket for `username`.
  pub fn insert(
    &self,
    store: &BucketStore,
    username: &[u8],
    password: &[u8],
    metadata: &[u8],
    num_variants: usize,
    include_username_variant: bool,
  ) -> Result<(), MigpError> {
    let mut records: Vec<(Vec<u8>, EntryFlag)> =
      vec![(password.to_vec(), EntryFlag::PasswordBreach)];
    for variant in password_variants(password, num_variants) {
      records.push((variant, EntryFlag::UsernamePasswordBreach));
    }
    if include_username_variant {
      records.push((Vec::new(), EntryFlag::UsernameBreach));
    }

    let bucket_id = self.bucket_id_hex(username);
    for (variant_password, flag) in records {
      let mut secret = self.entry_secret(username, &variant_password)?;
      let entry = self
        .bucket_encryptor
        .encrypt_entry(&secret, flag, metadata)?;
      secret.zeroize();
      store.append(&bucket_id, &entry)?;
    }
    Ok(())
  }

  // Derives the entry secret for one record by running the OPRF
  // locally over the slow-hashed canonical credential. Blinding and
  // unblinding against our own key yields exactly the function value a
  // querying client would obtain.
  fn entry_secret(&self, username: &[u8], password: &[u8]) -> Result<Vec<u8>, MigpError> {
    let mut input = self
      .slow_hasher
      .hash(&serialize_username_password(username, password))?;
    let blind_result =
      OprfClient::<NistP256>::blind(&input, &mut OsRng).map_err(MigpError::Oprf)?;
    let evaluated = self.oprf_server.blind_evaluate(&blind_result.message);
    let output = blind_result
      .state
      .finalize(&input, &evaluated)
      .map_err(MigpError::Oprf)?;
    input.zeroize();
    derive_entry_secret(output.as_slice())
  }

  // Bucket IDs index the filesystem-backed store, so anything other
  // than a lowercase hex string of the configured width is rejected
  // before it reaches a path.
  fn check_bucket_id(&self, bucket_id: &str) -> Result<(), MigpError> {
    let expected = self.config.bucket_id_hex_len();
    if bucket_id.len() != expected
      || !bucket_id
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    {
      return Err(MigpError::Framing(format!(
        "bucket ID must be {} lowercase hex characters",
        expected
      )));
    }
    Ok(())
  }
}
