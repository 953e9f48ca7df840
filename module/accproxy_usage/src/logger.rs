//! Usage Logger: fire-and-forget append to the durable store, backpressure-bounded so a slow
//! or unavailable store never blocks the request path. Per §4.11: on overflow the oldest
//! pending record is dropped and a counter incremented; logging failure never fails the
//! request, with a stderr line as the last-resort record of what was lost.

use crate::model::UsageRecord;
use crate::store::UsageStore;
use std::collections::VecDeque;
use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::Arc;
use tokio::sync::{ Mutex, Notify };

/// Default bound on pending, not-yet-persisted usage records per process.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

struct Inner
{
  queue: Mutex< VecDeque< UsageRecord > >,
  notify: Notify,
  dropped: AtomicU64,
  capacity: usize,
}

/// Handle for submitting usage records; cheap to clone, shares one background writer task.
#[derive( Clone )]
pub struct UsageLogger
{
  inner: Arc< Inner >,
}

impl UsageLogger
{
  /// Spawns the background writer task and returns a handle. The task runs until the process
  /// exits; there is no graceful-shutdown drain, matching the "fire-and-forget" contract.
  pub fn spawn( store: Arc< UsageStore > ) -> Self
  {
    Self::spawn_with_capacity( store, DEFAULT_QUEUE_CAPACITY )
  }

  pub fn spawn_with_capacity( store: Arc< UsageStore >, capacity: usize ) -> Self
  {
    let inner = Arc::new( Inner
    {
      queue: Mutex::new( VecDeque::with_capacity( capacity.min( 1024 ) ) ),
      notify: Notify::new(),
      dropped: AtomicU64::new( 0 ),
      capacity,
    } );

    let worker_inner = inner.clone();
    tokio::spawn( async move { Self::run( worker_inner, store ).await } );

    Self { inner }
  }

  /// Enqueues a record for durable persistence. Never blocks the caller on I/O; if the queue
  /// is at capacity, the oldest pending record is dropped to make room.
  pub async fn log( &self, record: UsageRecord )
  {
    let mut queue = self.inner.queue.lock().await;
    if push_bounded( &mut queue, self.inner.capacity, record ).is_some()
    {
      self.inner.dropped.fetch_add( 1, Ordering::Relaxed );
      tracing::warn!( dropped_total = self.inner.dropped.load( Ordering::Relaxed ), "usage logger queue overflow, oldest record dropped" );
    }
    drop( queue );
    self.inner.notify.notify_one();
  }

  /// Total records dropped to overflow since process start.
  pub fn dropped_count( &self ) -> u64
  {
    self.inner.dropped.load( Ordering::Relaxed )
  }

  async fn run( inner: Arc< Inner >, store: Arc< UsageStore > )
  {
    loop
    {
      let record = loop
      {
        let mut queue = inner.queue.lock().await;
        if let Some( record ) = queue.pop_front()
        {
          break record;
        }
        drop( queue );
        inner.notify.notified().await;
      };

      if let Err( error ) = store.append( &record ).await
      {
        tracing::error!( %error, record_id = %record.id, "usage record persist failed" );
        eprintln!( "usage-logger: dropped record after persist failure: {record:?}" );
      }
    }
  }
}

/// Pushes `record` onto a bounded queue, evicting and returning the oldest entry first if the
/// queue is already full. Factored out of `log` so the overflow rule is testable without
/// racing the background writer task.
fn push_bounded( queue: &mut VecDeque< UsageRecord >, capacity: usize, record: UsageRecord ) -> Option< UsageRecord >
{
  let evicted = if queue.len() >= capacity { queue.pop_front() } else { None };
  queue.push_back( record );
  evicted
}

#[cfg( test )]
mod tests
{
  use super::*;
  use accproxy_types::TenantId;
  use sqlx::sqlite::SqlitePoolOptions;
  use std::time::Duration;

  fn record_fixture( tenant_id: &TenantId, n: u32 ) -> UsageRecord
  {
    UsageRecord::zeroed(
      format!( "req_{n}" ),
      tenant_id.clone(),
      None,
      0,
      "anthropic".to_string(),
      "claude-sonnet-4-20250514".to_string(),
      "/v1/messages".to_string(),
      200,
      None,
    )
  }

  async fn test_store() -> Arc< UsageStore >
  {
    let pool = SqlitePoolOptions::new().max_connections( 1 ).connect( "sqlite::memory:" ).await.unwrap();
    sqlx::raw_sql( include_str!( "../migrations/001_usage_records.sql" ) ).execute( &pool ).await.unwrap();
    Arc::new( UsageStore::from_pool( pool ) )
  }

  #[tokio::test]
  async fn logged_records_are_eventually_persisted()
  {
    let store = test_store().await;
    let tenant_id = TenantId::generate();
    let logger = UsageLogger::spawn( store.clone() );

    logger.log( record_fixture( &tenant_id, 1 ) ).await;
    logger.log( record_fixture( &tenant_id, 2 ) ).await;

    tokio::time::sleep( Duration::from_millis( 100 ) ).await;
    assert_eq!( store.count_for_tenant( tenant_id.as_str() ).await.unwrap(), 2 );
  }

  #[test]
  fn push_bounded_evicts_oldest_entry_once_full()
  {
    let tenant_id = TenantId::generate();
    let mut queue = VecDeque::new();

    assert!( push_bounded( &mut queue, 2, record_fixture( &tenant_id, 1 ) ).is_none() );
    assert!( push_bounded( &mut queue, 2, record_fixture( &tenant_id, 2 ) ).is_none() );
    let evicted = push_bounded( &mut queue, 2, record_fixture( &tenant_id, 3 ) ).unwrap();

    assert_eq!( evicted.id, "req_1" );
    assert_eq!( queue.len(), 2 );
    assert_eq!( queue.front().unwrap().id, "req_2" );
    assert_eq!( queue.back().unwrap().id, "req_3" );
  }
}
