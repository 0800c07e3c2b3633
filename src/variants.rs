//! The `variants` module generates the typo-tolerant neighborhood of a
//! password. The sequence is deterministic and prefix-stable: the
//! variants produced for `num_variants = n` are always the first `n`
//! survivors of a fixed candidate order, so changing `num_variants`
//! never reshuffles earlier entries. Duplicates and the exact
//! password are filtered out, which is why fewer than `num_variants`
//! results may be returned.

const LEET: &[(u8, u8)] = &[
  (b'a', b'@'),
  (b'e', b'3'),
  (b'i', b'1'),
  (b'o', b'0'),
  (b's', b'$'),
];

/// Produces up to `num_variants` typo variants of `password`, in a
/// fixed order, without duplicates and without the exact password.
pub fn password_variants(password: &[u8], num_variants: usize) -> Vec<Vec<u8>> {
  let candidates = [
    toggle_first_case(password),
    lowercase(password),
    uppercase(password),
    capitalize(password),
    drop_last(password),
    drop_first(password),
    append(password, b'1'),
    append(password, b'!'),
    leetspeak(password),
    swap_last_two(password),
  ];

  let mut variants: Vec<Vec<u8>> = Vec::with_capacity(num_variants);
  for candidate in candidates {
    if variants.len() == num_variants {
      break;
    }
    if candidate != password && !variants.contains(&candidate) {
      variants.push(candidate);
    }
  }
  variants
}

fn toggle_first_case(password: &[u8]) -> Vec<u8> {
  let mut out = password.to_vec();
  if let Some(first) = out.first_mut() {
    if first.is_ascii_lowercase() {
      *first = first.to_ascii_uppercase();
    } else if first.is_ascii_uppercase() {
      *first = first.to_ascii_lowercase();
    }
  }
  out
}

fn lowercase(password: &[u8]) -> Vec<u8> {
  password.to_ascii_lowercase()
}

fn uppercase(password: &[u8]) -> Vec<u8> {
  password.to_ascii_uppercase()
}

fn capitalize(password: &[u8]) -> Vec<u8> {
  let mut out = password.to_ascii_lowercase();
  if let Some(first) = out.first_mut() {
    *first = first.to_ascii_uppercase();
  }
  out
}

fn drop_last(password: &[u8]) -> Vec<u8> {
  match password.len() {
    0 => Vec::new(),
    n => password[..n - 1].to_vec(),
  }
}

fn drop_first(password: &[u8]) -> Vec<u8> {
  match password.len() {
    0 => Vec::new(),
    _ => password[1..].to_vec(),
  }
}

fn append(password: &[u8], suffix: u8) -> Vec<u8> {
  let mut out = password.to_vec();
  out.push(suffix);
  out
}

fn leetspeak(password: &[u8]) -> Vec<u8> {
  password
    .iter()
    .map(|&b| {
      let lower = b.to_ascii_lowercase();
      LEET
        .iter()
        .find(|(from, _)| *from == lower)
        .map(|(_, to)| *to)
        .unwrap_or(b)
    })
    .collect()
}

fn swap_last_two(password: &[u8]) -> Vec<u8> {
  let mut out = password.to_vec();
  let n = out.len();
  if n >= 2 {
    out.swap(n - 2, n - 1);
  }
  out
}
