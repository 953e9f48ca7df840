//! Rate Limiter: a fixed-window counter per credential fingerprint, backed by the shared
//! key-value store.
//!
//! Per §4.2: key is `ratelimit:{fingerprint}:{window_seconds}`, incremented atomically; the
//! key receives a TTL equal to the window on its first increment in that window. Limiter
//! unavailability fails **open** — correctness (never over-charge a tenant) outweighs strict
//! admission control on this path, so a store outage is treated as "allow, remaining unknown".

use accproxy_kv::{ rate_limit_key, KvStore };
use std::time::Duration;

/// Default fixed-window budget per §4.2: 1000 requests per 60 seconds per fingerprint.
pub const DEFAULT_WINDOW_SECONDS: u64 = 60;
pub const DEFAULT_MAX_REQUESTS: u32 = 1000;

/// Outcome of a rate-limit check.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct RateLimitDecision
{
  pub allowed: bool,
  pub remaining: u32,
}

impl RateLimitDecision
{
  /// The fail-open decision used when the key-value store is unreachable.
  fn fail_open() -> Self
  {
    Self { allowed: true, remaining: 0 }
  }
}

/// Fixed-window rate limiter over a shared `KvStore`.
pub struct RateLimiter< S: KvStore >
{
  store: S,
  window: Duration,
  max_requests: u32,
}

impl< S: KvStore > RateLimiter< S >
{
  /// Builds a limiter with the default window and request budget.
  pub fn new( store: S ) -> Self
  {
    Self::with_limits( store, Duration::from_secs( DEFAULT_WINDOW_SECONDS ), DEFAULT_MAX_REQUESTS )
  }

  /// Builds a limiter with an explicit window and request budget, e.g. from loaded config.
  pub fn with_limits( store: S, window: Duration, max_requests: u32 ) -> Self
  {
    Self { store, window, max_requests }
  }

  /// Checks and increments the fixed-window counter for `fingerprint`. On store failure,
  /// fails open per §4.2 and §7.
  pub async fn check( &self, fingerprint: &str ) -> RateLimitDecision
  {
    let key = rate_limit_key( fingerprint, self.window.as_secs() );

    let current = match self.store.incr( &key ).await
    {
      Ok( value ) => value,
      Err( error ) =>
      {
        tracing::warn!( %error, fingerprint, "rate limiter store unavailable, failing open" );
        return RateLimitDecision::fail_open();
      }
    };

    if current == 1
    {
      if let Err( error ) = self.store.expire( &key, self.window ).await
      {
        tracing::warn!( %error, fingerprint, "failed to set rate-limit window TTL" );
      }
    }

    let remaining = self.max_requests.saturating_sub( current.max( 0 ) as u32 );
    RateLimitDecision { allowed: current as u32 <= self.max_requests, remaining }
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use accproxy_kv::InMemoryKvStore;

  fn limiter_with_limit( max_requests: u32 ) -> RateLimiter< InMemoryKvStore >
  {
    RateLimiter::with_limits( InMemoryKvStore::new(), Duration::from_secs( 60 ), max_requests )
  }

  #[tokio::test]
  async fn first_request_is_allowed_with_remaining_decremented()
  {
    let limiter = limiter_with_limit( 5 );
    let decision = limiter.check( "fp1" ).await;
    assert!( decision.allowed );
    assert_eq!( decision.remaining, 4 );
  }

  #[tokio::test]
  async fn exceeding_the_limit_is_denied_with_zero_remaining()
  {
    let limiter = limiter_with_limit( 2 );
    assert!( limiter.check( "fp1" ).await.allowed );
    assert!( limiter.check( "fp1" ).await.allowed );

    let third = limiter.check( "fp1" ).await;
    assert!( !third.allowed );
    assert_eq!( third.remaining, 0 );
  }

  #[tokio::test]
  async fn distinct_fingerprints_have_independent_windows()
  {
    let limiter = limiter_with_limit( 1 );
    assert!( limiter.check( "fp1" ).await.allowed );
    assert!( limiter.check( "fp2" ).await.allowed );
  }

  #[tokio::test]
  async fn the_1001st_request_in_the_window_is_rejected()
  {
    // Scenario 2 from the external interface scenarios.
    let limiter = limiter_with_limit( 1000 );
    for _ in 0..1000
    {
      assert!( limiter.check( "fp1" ).await.allowed );
    }
    let over_limit = limiter.check( "fp1" ).await;
    assert!( !over_limit.allowed );
    assert_eq!( over_limit.remaining, 0 );
  }
}
