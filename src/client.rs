//! The `client` module provides the client half of the protocol:
//! request generation, OPRF finalization, and the scan that decrypts
//! at most one entry of the returned bucket.

use p256::NistP256;
use rand_core::OsRng;
use voprf::{EvaluationElement, OprfClient};
use zeroize::Zeroize;

use crate::config::Config;
use crate::crypto::{
  bucket_hash_to_id, bucket_id_to_hex, derive_entry_secret, new_bucket_encryptor,
  new_bucket_hasher, new_slow_hasher, serialize_username_password, BreachStatus,
  BucketEncryptor, BucketHasher, SlowHasher, HEADER_SIZE,
};
use crate::errors::MigpError;
use crate::wire::{ClientRequest, ServerResponse};

/// The `Client` struct wraps the context needed to generate requests
/// and process responses.
pub struct Client {
  config: Config,
  bucket_hasher: Box<dyn BucketHasher>,
  slow_hasher: Box<dyn SlowHasher>,
  bucket_encryptor: Box<dyn BucketEncryptor>,
}

/// The `ClientRequestContext` struct holds the blinding state of an
/// in-flight query. [`ClientRequestContext::finalize`] takes the
/// context by value: a context is consumed exactly once.
pub struct ClientRequestContext<'a> {
  client: &'a Client,
  oprf_state: OprfClient<NistP256>,
  oprf_input: Vec<u8>,
}

impl Client {
  pub fn new(cfg: &Config) -> Result<Client, MigpError> {
    cfg.validate()?;
    Ok(Client {
      config: cfg.clone(),
      bucket_hasher: new_bucket_hasher(&cfg.bucket_hasher_id)?,
      slow_hasher: new_slow_hasher(&cfg.slow_hasher_id)?,
      bucket_encryptor: new_bucket_encryptor(&cfg.bucket_encryptor_id)?,
    })
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

  /// Builds the request for a credential pair, returning it together
  /// with the context needed to process the response.
  pub fn request(
    &self,
    username: &[u8],
    password: &[u8],
  ) -> Result<(ClientRequest, ClientRequestContext<'_>), MigpError> {
    let input = self
      .slow_hasher
      .hash(&serialize_username_password(username, password))?;
    let blind_result =
      OprfClient::<NistP256>::blind(&input, &mut OsRng).map_err(MigpError::Oprf)?;

    let request = ClientRequest {
      version: u32::from(self.config.version),
      bucket_id: self.bucket_id_hex(username),
      blind_element: base64::encode(blind_result.message.serialize()),
    };
    let context = ClientRequestContext {
      client: self,
      oprf_state: blind_result.state,
      oprf_input: input,
    };
    Ok((request, context))
  }
}

impl ClientRequestContext<'_> {
  /// Completes the OPRF with the server's evaluated element and scans
  /// the returned bucket for an entry sealed under the queried
  /// credential.
  pub fn finalize(
    mut self,
    response: &ServerResponse,
  ) -> Result<(BreachStatus, Vec<u8>), MigpError> {
    if response.version != self.client.config.version {
      return Err(MigpError::VersionMismatch {
        expected: u32::from(self.client.config.version),
        got: u32::from(response.version),
      });
    }
    let evaluated = EvaluationElement::<NistP256>::deserialize(&response.evaluated_element)
      .map_err(MigpError::Oprf)?;
    let output = self
      .oprf_state
      .finalize(&self.oprf_input, &evaluated)
      .map_err(MigpError::Oprf)?;
    self.oprf_input.zeroize();

    let mut secret = derive_entry_secret(output.as_slice())?;
    let result = scan_bucket(
      self.client.bucket_encryptor.as_ref(),
      &secret,
      &response.bucket_contents,
    );
    secret.zeroize();
    result
  }
}

/// Walks a bucket with a candidate secret, returning the status and
/// metadata of the first entry that authenticates. Entries sealed
/// under other secrets are skipped; a body length that overruns the
/// bucket is a framing error; running out of full headers ends the
/// scan with `NotInBreach`.
pub fn scan_bucket(
  encryptor: &dyn BucketEncryptor,
  secret: &[u8],
  bucket: &[u8],
) -> Result<(BreachStatus, Vec<u8>), MigpError> {
  let mut offset = 0usize;
  while offset + HEADER_SIZE <= bucket.len() {
    let (flag, body_length) = encryptor.decrypt_header(secret, &bucket[offset..])?;
    offset += HEADER_SIZE;
    if offset + body_length > bucket.len() {
      return Err(MigpError::Framing(
        "entry body length overruns the bucket".into(),
      ));
    }
    if let Some(flag) = flag {
      let metadata = encryptor.decrypt_body(secret, &bucket[offset..offset + body_length])?;
      return Ok((flag.to_breach_status(), metadata));
    }
    offset += body_length;
  }
  Ok((BreachStatus::NotInBreach, Vec::new()))
}

/// Runs a full query against a server reachable through `exchange`,
/// which submits one [`ClientRequest`] and returns the decoded
/// [`ServerResponse`].
///
/// When the credential itself is not found, a second exchange with an
/// empty password checks for a username-only record; any hit on that
/// pass is reported as [`BreachStatus::UsernameBreach`].
pub fn query<F>(
  client: &Client,
  username: &[u8],
  password: &[u8],
  mut exchange: F,
) -> Result<(BreachStatus, Vec<u8>), MigpError>
where
  F: FnMut(&ClientRequest) -> Result<ServerResponse, MigpError>,
{
  let (request, context) = client.request(username, password)?;
  let response = exchange(&request)?;
  let (status, metadata) = context.finalize(&response)?;
  if status != BreachStatus::NotInBreach || password.is_empty() {
    return Ok((status, metadata));
  }

  let (request, context) = client.request(username, b"")?;
  let response = exchange(&request)?;
  let (status, metadata) = context.finalize(&response)?;
  match status {
    BreachStatus::NotInBreach => Ok((BreachStatus::NotInBreach, metadata)),
    _ => Ok((BreachStatus::UsernameBreach, metadata)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::ServerConfig;
  use crate::kv::BucketStore;
  use crate::server::Server;
  use crate::variants::password_variants;

  fn test_setup() -> (Server, Client, BucketStore, tempfile::TempDir) {
    let mut config = Config::default();
    config.bucket_id_bit_size = 16;
    let server_config = ServerConfig::generate(config.clone());
    let server = Server::new(&server_config).unwrap();
    let client = Client::new(&config).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = BucketStore::new(dir.path());
    (server, client, store, dir)
  }

  fn run_query(
    server: &Server,
    client: &Client,
    store: &BucketStore,
    username: &[u8],
    password: &[u8],
  ) -> Result<(BreachStatus, Vec<u8>), MigpError> {
    query(client, username, password, |request| {
      server.handle_evaluate(request, store)
    })
  }

  #[test]
  fn exact_match_round_trip() {
    let (server, client, store, _dir) = test_setup();
    server
      .insert(&store, b"alice@example.com", b"hunter2", b"metadata-A", 0, false)
      .unwrap();

    let (status, metadata) =
      run_query(&server, &client, &store, b"alice@example.com", b"hunter2").unwrap();
    assert_eq!(status, BreachStatus::PasswordBreach);
    assert_eq!(metadata, b"metadata-A");
  }

  #[test]
  fn unpopulated_variant_misses() {
    let (server, client, store, _dir) = test_setup();
    server
      .insert(&store, b"alice@example.com", b"hunter2", b"metadata-A", 0, false)
      .unwrap();

    let (status, metadata) =
      run_query(&server, &client, &store, b"alice@example.com", b"Hunter2").unwrap();
    assert_eq!(status, BreachStatus::NotInBreach);
    assert!(metadata.is_empty());
  }

  #[test]
  fn populated_variant_matches() {
    let (server, client, store, _dir) = test_setup();
    server
      .insert(&store, b"alice@example.com", b"hunter2", b"metadata-A", 9, true)
      .unwrap();

    // "Hunter2" is the first candidate of the variant sequence
    assert!(password_variants(b"hunter2", 9).contains(&b"Hunter2".to_vec()));
    let (status, metadata) =
      run_query(&server, &client, &store, b"alice@example.com", b"Hunter2").unwrap();
    assert_eq!(status, BreachStatus::UsernamePasswordBreach);
    assert_eq!(metadata, b"metadata-A");
  }

  #[test]
  fn wrong_password_reports_username_breach() {
    let (server, client, store, _dir) = test_setup();
    server
      .insert(&store, b"alice@example.com", b"hunter2", b"metadata-A", 9, true)
      .unwrap();

    let (status, metadata) = run_query(
      &server,
      &client,
      &store,
      b"alice@example.com",
      b"anything-else",
    )
    .unwrap();
    assert_eq!(status, BreachStatus::UsernameBreach);
    assert_eq!(metadata, b"metadata-A");
  }

  #[test]
  fn other_username_misses() {
    let (server, client, store, _dir) = test_setup();
    server
      .insert(&store, b"alice@example.com", b"hunter2", b"metadata-A", 9, true)
      .unwrap();

    let (status, metadata) =
      run_query(&server, &client, &store, b"bob@example.com", b"hunter2").unwrap();
    assert_eq!(status, BreachStatus::NotInBreach);
    assert!(metadata.is_empty());
  }

  #[test]
  fn truncated_bucket_never_yields_a_spurious_positive() {
    let (server, client, store, _dir) = test_setup();
    server
      .insert(&store, b"alice@example.com", b"hunter2", b"metadata-A", 0, false)
      .unwrap();

    let bucket_id = server.bucket_id_hex(b"alice@example.com");
    let bucket = store.get(&bucket_id).unwrap();
    store.put(&bucket_id, &bucket[..bucket.len() - 1]).unwrap();

    match run_query(&server, &client, &store, b"alice@example.com", b"hunter2") {
      Ok((status, _)) => assert_eq!(status, BreachStatus::NotInBreach),
      Err(e) => assert!(matches!(e, MigpError::Framing(_)), "{}", e),
    }
  }

  #[test]
  fn scan_is_insensitive_to_insertion_order() {
    let (server, client, store_ab, _dir_ab) = test_setup();
    let dir_ba = tempfile::tempdir().unwrap();
    let store_ba = BucketStore::new(dir_ba.path());

    // same username, so both credentials land in the same bucket
    server
      .insert(&store_ab, b"alice@example.com", b"first-pw", b"meta-1", 0, false)
      .unwrap();
    server
      .insert(&store_ab, b"alice@example.com", b"second-pw", b"meta-2", 0, false)
      .unwrap();
    server
      .insert(&store_ba, b"alice@example.com", b"second-pw", b"meta-2", 0, false)
      .unwrap();
    server
      .insert(&store_ba, b"alice@example.com", b"first-pw", b"meta-1", 0, false)
      .unwrap();

    for store in [&store_ab, &store_ba] {
      let (status, metadata) =
        run_query(&server, &client, store, b"alice@example.com", b"first-pw").unwrap();
      assert_eq!(status, BreachStatus::PasswordBreach);
      assert_eq!(metadata, b"meta-1");
      let (status, metadata) =
        run_query(&server, &client, store, b"alice@example.com", b"second-pw").unwrap();
      assert_eq!(status, BreachStatus::PasswordBreach);
      assert_eq!(metadata, b"meta-2");
    }
  }

  #[test]
  fn version_mismatch_is_rejected() {
    let (server, client, store, _dir) = test_setup();
    let (request, context) = client.request(b"alice@example.com", b"hunter2").unwrap();
    let mut response = server.handle_evaluate(&request, &store).unwrap();
    response.version = 2;
    assert!(matches!(
      context.finalize(&response),
      Err(MigpError::VersionMismatch { .. })
    ));
  }

  #[test]
  fn query_survives_save_and_reload() {
    let (server, client, store, dir) = test_setup();
    server
      .insert(&store, b"alice@example.com", b"hunter2", b"metadata-A", 0, false)
      .unwrap();
    store.save().unwrap();

    let reloaded = BucketStore::new(dir.path());
    let (status, metadata) =
      run_query(&server, &client, &reloaded, b"alice@example.com", b"hunter2").unwrap();
    assert_eq!(status, BreachStatus::PasswordBreach);
    assert_eq!(metadata, b"metadata-A");
  }

  #[test]
  fn empty_password_query_matches_username_record_directly() {
    let (server, client, store, _dir) = test_setup();
    server
      .insert(&store, b"alice@example.com", b"hunter2", b"metadata-A", 0, true)
      .unwrap();

    let (status, metadata) =
      run_query(&server, &client, &store, b"alice@example.com", b"").unwrap();
    assert_eq!(status, BreachStatus::UsernameBreach);
    assert_eq!(metadata, b"metadata-A");
  }
}
