//! Shared key-value store abstraction backing rate limiting, budget caching, and runaway-loop
//! counters. A redis-backed implementation is the production default; an in-memory store is
//! used as a test double so other crates' tests never need a live redis instance.
//!
//! Key formats and semantics are carried over directly: `ratelimit:{fingerprint}:{window}`,
//! `budget:{tenant}:{budget_id|"global"}`, `spend:{tenant}:{budget_id|"global"}`.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
mod store
{
  use async_trait::async_trait;
  use std::time::Duration;

  /// Errors from the underlying store. Callers decide fail-open vs. fail-closed per operation.
  #[derive( Debug, thiserror::Error )]
  pub enum KvError
  {
    #[error( "kv backend unavailable: {0}" )]
    Unavailable( String ),
  }

  pub type Result< T > = std::result::Result< T, KvError >;

  /// Minimal async key-value surface the rate limiter and budget cache need.
  #[async_trait]
  pub trait KvStore: Send + Sync
  {
    /// Atomically increments `key` by 1 and returns the new value. Creates the key at 1 if absent.
    async fn incr( &self, key: &str ) -> Result< i64 >;

    /// Sets a TTL on `key`. A no-op if the key does not exist.
    async fn expire( &self, key: &str, ttl: Duration ) -> Result< () >;

    /// Fetches the raw string value for `key`, if present and unexpired.
    async fn get( &self, key: &str ) -> Result< Option< String > >;

    /// Sets `key` to `value` with the given TTL, replacing any existing value.
    async fn setex( &self, key: &str, ttl: Duration, value: &str ) -> Result< () >;

    /// Atomically increments a floating-point counter at `key` by `amount`.
    async fn incrbyfloat( &self, key: &str, amount: f64 ) -> Result< f64 >;
  }

  /// Builds the fixed-window rate-limit key.
  pub fn rate_limit_key( fingerprint: &str, window_seconds: u64 ) -> String
  {
    format!( "ratelimit:{fingerprint}:{window_seconds}" )
  }

  /// Builds the cached-budget-evaluation key. `budget_id` of `None` means the tenant-global slot.
  pub fn budget_cache_key( tenant: &str, budget_id: Option< &str > ) -> String
  {
    format!( "budget:{tenant}:{}", budget_id.unwrap_or( "global" ) )
  }

  /// Builds the cached-spend-counter key, mirroring `budget_cache_key`'s scoping.
  pub fn spend_cache_key( tenant: &str, budget_id: Option< &str > ) -> String
  {
    format!( "spend:{tenant}:{}", budget_id.unwrap_or( "global" ) )
  }

  /// Blanket impl so a type-erased, runtime-selected backend (redis in production, in-memory
  /// in tests) can still be handed directly to `RateLimiter<S>`, `BudgetEngine<K>`, and
  /// `RunawayDetector<K>`, all of which are generic over a concrete `KvStore`.
  #[async_trait]
  impl KvStore for std::sync::Arc< dyn KvStore >
  {
    async fn incr( &self, key: &str ) -> Result< i64 >
    {
      ( **self ).incr( key ).await
    }

    async fn expire( &self, key: &str, ttl: Duration ) -> Result< () >
    {
      ( **self ).expire( key, ttl ).await
    }

    async fn get( &self, key: &str ) -> Result< Option< String > >
    {
      ( **self ).get( key ).await
    }

    async fn setex( &self, key: &str, ttl: Duration, value: &str ) -> Result< () >
    {
      ( **self ).setex( key, ttl, value ).await
    }

    async fn incrbyfloat( &self, key: &str, amount: f64 ) -> Result< f64 >
    {
      ( **self ).incrbyfloat( key, amount ).await
    }
  }

  /// Type-erased handle to whichever concrete backend the running process selected.
  pub type SharedKvStore = std::sync::Arc< dyn KvStore >;
}

#[cfg(feature = "enabled")]
pub use store::{ budget_cache_key, rate_limit_key, spend_cache_key, KvError, KvStore, Result, SharedKvStore };

#[cfg(feature = "enabled")]
pub mod redis_store;
#[cfg(feature = "enabled")]
pub mod memory_store;

#[cfg(feature = "enabled")]
pub use redis_store::RedisKvStore;
#[cfg(feature = "enabled")]
pub use memory_store::InMemoryKvStore;

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn rate_limit_key_matches_expected_format()
  {
    assert_eq!( rate_limit_key( "abc123", 60 ), "ratelimit:abc123:60" );
  }

  #[test]
  fn budget_cache_key_falls_back_to_global()
  {
    assert_eq!( budget_cache_key( "tenant_1", None ), "budget:tenant_1:global" );
    assert_eq!( budget_cache_key( "tenant_1", Some( "budget_2" ) ), "budget:tenant_1:budget_2" );
  }

  #[tokio::test]
  async fn shared_kv_store_delegates_through_the_trait_object()
  {
    let shared: SharedKvStore = std::sync::Arc::new( InMemoryKvStore::new() );
    assert_eq!( shared.incr( "k" ).await.unwrap(), 1 );
    assert_eq!( shared.incr( "k" ).await.unwrap(), 2 );
  }

  #[test]
  fn spend_cache_key_mirrors_budget_cache_key_scoping()
  {
    assert_eq!( spend_cache_key( "tenant_1", None ), "spend:tenant_1:global" );
  }
}
