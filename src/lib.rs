//! The migp crate implements MIGP ("Might I Get Pwned"), a
//! privacy-preserving compromised-credential checking protocol. A
//! client holding a `(username, password)` pair learns whether that
//! credential — or a close typo variant of it — appears in a breach
//! database, without revealing the credential to the server and
//! without the server revealing its database: the server returns one
//! bucket of encrypted entries, and only the OPRF output for the
//! queried credential can decrypt (at most) one of them.
//!
//! # Example usage
//!
//! ```
//! use migp::{BreachStatus, BucketStore, Client, Config, Server, ServerConfig};
//!
//! // server setup: fresh OPRF key, default primitives
//! let server_config = ServerConfig::generate(Config::default());
//! let server = Server::new(&server_config).unwrap();
//! let dir = tempfile::tempdir().unwrap();
//! let store = BucketStore::new(dir.path());
//!
//! // encrypt a breach credential (and its variants) into its bucket
//! server
//!   .insert(&store, b"alice@example.com", b"hunter2", b"2017 dump", 9, true)
//!   .unwrap();
//!
//! // client-side query; the closure stands in for the HTTP transport
//! let client = Client::new(&server_config.config).unwrap();
//! let (status, metadata) = migp::query(&client, b"alice@example.com", b"hunter2", |request| {
//!   server.handle_evaluate(request, &store)
//! })
//! .unwrap();
//! assert_eq!(status, BreachStatus::PasswordBreach);
//! assert_eq!(metadata, b"2017 dump");
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod kv;
pub mod server;
pub mod variants;
pub mod wire;

pub use client::{query, scan_bucket, Client, ClientRequestContext};
pub use config::{Config, ServerConfig, DEFAULT_VERSION};
pub use crypto::{BreachStatus, EntryFlag, AEAD_OVERHEAD, HEADER_SIZE, OPRF_INFO};
pub use errors::MigpError;
pub use kv::BucketStore;
pub use server::Server;
pub use wire::{ClientRequest, ServerResponse};
