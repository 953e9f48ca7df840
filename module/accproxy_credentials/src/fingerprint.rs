//! `SHA256(secret || salt)` fingerprinting. Non-reversible: the fingerprint is a lookup key
//! for a secret the client still holds and presents on every call, not a stored
//! password-equivalent — see the credential-fingerprint vs. secret-storage open question in
//! the grounding ledger.

use sha2::{ Digest, Sha256 };

/// Computes the hex fingerprint for a presented secret under the given salt.
pub fn fingerprint( secret: &str, salt: &str ) -> String
{
  let mut hasher = Sha256::new();
  hasher.update( secret.as_bytes() );
  hasher.update( salt.as_bytes() );
  hex::encode( hasher.finalize() )
}

mod hex
{
  /// Minimal lowercase-hex encoder, avoiding a dedicated `hex` crate dependency for one call site.
  pub fn encode( bytes: impl AsRef< [ u8 ] > ) -> String
  {
    bytes.as_ref().iter().map( |b| format!( "{b:02x}" ) ).collect()
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn same_secret_and_salt_produce_same_fingerprint()
  {
    assert_eq!( fingerprint( "sk-abc", "salt1" ), fingerprint( "sk-abc", "salt1" ) );
  }

  #[test]
  fn different_salts_produce_different_fingerprints()
  {
    assert_ne!( fingerprint( "sk-abc", "salt1" ), fingerprint( "sk-abc", "salt2" ) );
  }

  #[test]
  fn fingerprint_is_64_hex_chars()
  {
    let fp = fingerprint( "sk-abc", "salt1" );
    assert_eq!( fp.len(), 64 );
    assert!( fp.chars().all( |c| c.is_ascii_hexdigit() ) );
  }
}
