//! In-memory `KvStore` test double: no network, no TTL sweeper thread. Expiry is checked
//! lazily on access rather than via a background task, which is sufficient for tests that
//! run in well under the TTLs involved.

use crate::{ KvStore, Result };
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{ Duration, Instant };

struct Entry
{
  value: String,
  expires_at: Option< Instant >,
}

/// Thread-safe in-memory store, used as a `KvStore` test double.
#[derive( Debug, Default )]
pub struct InMemoryKvStore
{
  entries: DashMap< String, Entry >,
}

impl InMemoryKvStore
{
  pub fn new() -> Self
  {
    Self::default()
  }

  fn is_live( entry: &Entry ) -> bool
  {
    entry.expires_at.map_or( true, |at| at > Instant::now() )
  }
}

#[async_trait]
impl KvStore for InMemoryKvStore
{
  async fn incr( &self, key: &str ) -> Result< i64 >
  {
    let mut entry = self.entries.entry( key.to_string() ).or_insert_with( || Entry { value: "0".to_string(), expires_at: None } );
    if !Self::is_live( &entry )
    {
      entry.value = "0".to_string();
      entry.expires_at = None;
    }
    let current: i64 = entry.value.parse().unwrap_or( 0 ) + 1;
    entry.value = current.to_string();
    Ok( current )
  }

  async fn expire( &self, key: &str, ttl: Duration ) -> Result< () >
  {
    if let Some( mut entry ) = self.entries.get_mut( key )
    {
      entry.expires_at = Some( Instant::now() + ttl );
    }
    Ok( () )
  }

  async fn get( &self, key: &str ) -> Result< Option< String > >
  {
    Ok( self.entries.get( key ).filter( |e| Self::is_live( e ) ).map( |e| e.value.clone() ) )
  }

  async fn setex( &self, key: &str, ttl: Duration, value: &str ) -> Result< () >
  {
    self.entries.insert( key.to_string(), Entry { value: value.to_string(), expires_at: Some( Instant::now() + ttl ) } );
    Ok( () )
  }

  async fn incrbyfloat( &self, key: &str, amount: f64 ) -> Result< f64 >
  {
    let mut entry = self.entries.entry( key.to_string() ).or_insert_with( || Entry { value: "0".to_string(), expires_at: None } );
    if !Self::is_live( &entry )
    {
      entry.value = "0".to_string();
      entry.expires_at = None;
    }
    let current: f64 = entry.value.parse().unwrap_or( 0.0 ) + amount;
    entry.value = current.to_string();
    Ok( current )
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[tokio::test]
  async fn incr_creates_key_at_one_and_increments()
  {
    let store = InMemoryKvStore::new();
    assert_eq!( store.incr( "k" ).await.unwrap(), 1 );
    assert_eq!( store.incr( "k" ).await.unwrap(), 2 );
  }

  #[tokio::test]
  async fn expire_makes_key_disappear_after_ttl()
  {
    let store = InMemoryKvStore::new();
    store.incr( "k" ).await.unwrap();
    store.expire( "k", Duration::from_millis( 10 ) ).await.unwrap();
    tokio::time::sleep( Duration::from_millis( 30 ) ).await;
    assert_eq!( store.get( "k" ).await.unwrap(), None );
  }

  #[tokio::test]
  async fn setex_then_get_round_trips()
  {
    let store = InMemoryKvStore::new();
    store.setex( "k", Duration::from_secs( 30 ), "hello" ).await.unwrap();
    assert_eq!( store.get( "k" ).await.unwrap(), Some( "hello".to_string() ) );
  }

  #[tokio::test]
  async fn incrbyfloat_accumulates()
  {
    let store = InMemoryKvStore::new();
    store.incrbyfloat( "spend", 1.5 ).await.unwrap();
    let total = store.incrbyfloat( "spend", 2.25 ).await.unwrap();
    assert!( ( total - 3.75 ).abs() < 1e-9 );
  }

  #[tokio::test]
  async fn incr_after_expiry_restarts_from_zero()
  {
    let store = InMemoryKvStore::new();
    store.incr( "k" ).await.unwrap();
    store.expire( "k", Duration::from_millis( 5 ) ).await.unwrap();
    tokio::time::sleep( Duration::from_millis( 20 ) ).await;
    assert_eq!( store.incr( "k" ).await.unwrap(), 1 );
  }
}
