//! Production `KvStore` backed by a `redis::aio::ConnectionManager`, which reconnects
//! transparently and is safe to clone/share across tasks. Every operation is gated behind a
//! circuit breaker (§4.14) keyed on the store as a whole, so once redis is down every call
//! fails fast instead of waiting out its own connection timeout on every request.

use crate::{ KvError, KvStore, Result };
use accproxy_reliability::CircuitBreaker;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// §4.14: tripped after this many consecutive failures, cooling down before probing again.
const BREAKER_FAILURE_THRESHOLD: u32 = 5;
const BREAKER_COOLDOWN_SECS: u64 = 30;
const BREAKER_SERVICE_KEY: &str = "kv_store";

#[derive( Clone )]
pub struct RedisKvStore
{
  connection: ConnectionManager,
  breaker: std::sync::Arc< CircuitBreaker >,
}

impl std::fmt::Debug for RedisKvStore
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "RedisKvStore" ).finish_non_exhaustive()
  }
}

impl RedisKvStore
{
  /// Connects to `redis_url` (e.g. `redis://127.0.0.1:6379`), establishing a managed
  /// connection that reconnects on its own if the server drops.
  pub async fn connect( redis_url: &str ) -> Result< Self >
  {
    let client = redis::Client::open( redis_url )
      .map_err( |e| KvError::Unavailable( e.to_string() ) )?;
    let connection = client.get_connection_manager().await
      .map_err( |e| KvError::Unavailable( e.to_string() ) )?;
    Ok( Self { connection, breaker: std::sync::Arc::new( CircuitBreaker::new( BREAKER_FAILURE_THRESHOLD, BREAKER_COOLDOWN_SECS ) ) } )
  }

  fn check_breaker( &self ) -> Result< () >
  {
    if self.breaker.is_open( BREAKER_SERVICE_KEY )
    {
      tracing::warn!( "kv store circuit breaker open, failing fast without hitting redis" );
      return Err( KvError::Unavailable( "circuit breaker open".to_string() ) );
    }
    Ok( () )
  }

  fn record< T >( &self, result: Result< T > ) -> Result< T >
  {
    match result
    {
      Ok( value ) =>
      {
        self.breaker.record_success( BREAKER_SERVICE_KEY );
        Ok( value )
      }
      Err( error ) =>
      {
        self.breaker.record_failure( BREAKER_SERVICE_KEY );
        Err( error )
      }
    }
  }
}

#[async_trait]
impl KvStore for RedisKvStore
{
  async fn incr( &self, key: &str ) -> Result< i64 >
  {
    self.check_breaker()?;
    let mut conn = self.connection.clone();
    let result = conn.incr( key, 1 ).await.map_err( |e| KvError::Unavailable( e.to_string() ) );
    self.record( result )
  }

  async fn expire( &self, key: &str, ttl: Duration ) -> Result< () >
  {
    self.check_breaker()?;
    let mut conn = self.connection.clone();
    let result = conn.expire( key, ttl.as_secs() as i64 ).await
      .map_err( |e| KvError::Unavailable( e.to_string() ) );
    self.record( result )
  }

  async fn get( &self, key: &str ) -> Result< Option< String > >
  {
    self.check_breaker()?;
    let mut conn = self.connection.clone();
    let result = conn.get( key ).await.map_err( |e| KvError::Unavailable( e.to_string() ) );
    self.record( result )
  }

  async fn setex( &self, key: &str, ttl: Duration, value: &str ) -> Result< () >
  {
    self.check_breaker()?;
    let mut conn = self.connection.clone();
    let result = conn.set_ex( key, value, ttl.as_secs() ).await
      .map_err( |e| KvError::Unavailable( e.to_string() ) );
    self.record( result )
  }

  async fn incrbyfloat( &self, key: &str, amount: f64 ) -> Result< f64 >
  {
    self.check_breaker()?;
    let mut conn = self.connection.clone();
    let result = conn.incr( key, amount ).await.map_err( |e| KvError::Unavailable( e.to_string() ) );
    self.record( result )
  }
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn breaker_opens_after_repeated_failures()
  {
    let breaker = CircuitBreaker::new( BREAKER_FAILURE_THRESHOLD, BREAKER_COOLDOWN_SECS );
    for _ in 0..BREAKER_FAILURE_THRESHOLD
    {
      breaker.record_failure( BREAKER_SERVICE_KEY );
    }
    assert!( breaker.is_open( BREAKER_SERVICE_KEY ) );
  }
}
