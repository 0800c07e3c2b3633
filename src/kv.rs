//! The `kv` module provides the key-value bucket store. Buckets are
//! held in an in-memory map guarded by a single-writer/multi-reader
//! lock and persisted to a nibble fan-out directory tree: bucket id
//! `ab12` lives at `<root>/a/b/1/ab12`, which bounds per-directory
//! entry counts when the bucket-id space is large.
//!
//! Reads are disk-backed with a write-through cache: `get` serves from
//! the map first and falls back to the bucket file, and an absent id
//! yields an empty byte string rather than an error. Genuine I/O
//! failures propagate.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::errors::MigpError;

pub struct BucketStore {
  root: PathBuf,
  cache: RwLock<HashMap<String, Vec<u8>>>,
}

impl BucketStore {
  pub fn new<P: Into<PathBuf>>(root: P) -> BucketStore {
    BucketStore {
      root: root.into(),
      cache: RwLock::new(HashMap::new()),
    }
  }

  /// Replaces the value at `id`.
  pub fn put(&self, id: &str, value: &[u8]) -> Result<(), MigpError> {
    let mut cache = self.cache.write().expect("bucket store lock poisoned");
    cache.insert(id.to_string(), value.to_vec());
    Ok(())
  }

  /// Appends `value` to the current contents of `id`, reading any
  /// previously saved bucket off disk first so the cached value always
  /// holds the complete bucket.
  pub fn append(&self, id: &str, value: &[u8]) -> Result<(), MigpError> {
    let mut cache = self.cache.write().expect("bucket store lock poisoned");
    if !cache.contains_key(id) {
      let existing = self.load_from_disk(id)?;
      cache.insert(id.to_string(), existing);
    }
    if let Some(bucket) = cache.get_mut(id) {
      bucket.extend_from_slice(value);
    }
    Ok(())
  }

  /// Returns the current contents of `id`, or an empty byte string if
  /// the bucket does not exist.
  pub fn get(&self, id: &str) -> Result<Vec<u8>, MigpError> {
    {
      let cache = self.cache.read().expect("bucket store lock poisoned");
      if let Some(bucket) = cache.get(id) {
        return Ok(bucket.clone());
      }
    }
    let bucket = self.load_from_disk(id)?;
    if bucket.is_empty() {
      // absent ids are not cached, so probing queries cannot grow the map
      return Ok(bucket);
    }
    let mut cache = self.cache.write().expect("bucket store lock poisoned");
    Ok(cache.entry(id.to_string()).or_insert(bucket).clone())
  }

  /// Flushes every cached bucket to its fan-out file, creating
  /// intermediate directories as needed. The read lock is held for the
  /// duration, which excludes writers from the snapshot.
  pub fn save(&self) -> Result<(), MigpError> {
    let cache = self.cache.read().expect("bucket store lock poisoned");
    for (id, bucket) in cache.iter() {
      let path = self.bucket_path(id);
      if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
      }
      fs::write(&path, bucket)?;
    }
    Ok(())
  }

  /// Iterates the ids and sizes of all cached buckets.
  pub fn bucket_sizes(&self) -> Vec<(String, usize)> {
    let cache = self.cache.read().expect("bucket store lock poisoned");
    let mut sizes: Vec<(String, usize)> = cache
      .iter()
      .map(|(id, bucket)| (id.clone(), bucket.len()))
      .collect();
    sizes.sort();
    sizes
  }

  fn bucket_path(&self, id: &str) -> PathBuf {
    let mut path = self.root.clone();
    let nibbles: Vec<char> = id.chars().collect();
    for nibble in nibbles.iter().take(nibbles.len().saturating_sub(1)) {
      path.push(nibble.to_string());
    }
    path.push(id);
    path
  }

  fn load_from_disk(&self, id: &str) -> Result<Vec<u8>, MigpError> {
    match fs::read(self.bucket_path(id)) {
      Ok(bucket) => Ok(bucket),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
      Err(e) => Err(MigpError::Storage(e)),
    }
  }
}
