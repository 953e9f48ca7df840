//! `DetectorBaseline`: per-`(tenant, detector)` rolling statistics the Anomaly detector scores
//! new samples against. Per §3: "updated asynchronously"; per §3's ownership rule, "detectors
//! hold no cross-request mutable state except through the baseline store which they update
//! through a single writer per (tenant, detector) pair" — enforced here by keying the lock
//! itself per pair, so two concurrent updates for the same pair serialize instead of racing a
//! lost update, while unrelated pairs never contend.
//!
//! The window is bounded by sample count rather than wall-clock time: a `VecDeque` holding up
//! to `WINDOW_SAMPLES` most-recent observations, which approximates §4.9's "window 7d" without
//! needing a clock source (this crate's call sites are not permitted the ambient-time
//! primitives excluded from workflow scripts, and a sample-count window serves the same
//! purpose of bounding memory and discounting stale history).

use dashmap::DashMap;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// Samples retained per `(tenant, detector)` pair before the oldest is evicted.
const WINDOW_SAMPLES: usize = 5_000;

/// Minimum samples before a baseline is considered trustworthy enough to score against, per
/// §4.9 ("min 100 samples").
pub const MIN_BASELINE_SAMPLES: usize = 100;

#[derive( Debug, Default )]
struct RollingWindow
{
  samples: VecDeque< f64 >,
}

impl RollingWindow
{
  fn push( &mut self, value: f64 )
  {
    if self.samples.len() >= WINDOW_SAMPLES
    {
      self.samples.pop_front();
    }
    self.samples.push_back( value );
  }

  fn mean_and_stddev( &self ) -> Option< ( f64, f64 ) >
  {
    if self.samples.len() < MIN_BASELINE_SAMPLES
    {
      return None;
    }

    let n = self.samples.len() as f64;
    let mean = self.samples.iter().sum::< f64 >() / n;
    let variance = self.samples.iter().map( |v| ( v - mean ).powi( 2 ) ).sum::< f64 >() / n;
    Some( ( mean, variance.sqrt() ) )
  }
}

/// Holds one rolling window per `(tenant, detector)` pair, guarded by its own lock.
#[derive( Debug, Default )]
pub struct BaselineStore
{
  windows: DashMap< String, Mutex< RollingWindow > >,
}

impl BaselineStore
{
  pub fn new() -> Self
  {
    Self::default()
  }

  fn key( tenant_id: &str, detector_key: &str ) -> String
  {
        format!( "{tenant_id}:{detector_key}" )
  }

  /// Scores `value` against the current baseline for `(tenant_id, detector_key)`, then folds
  /// it into the window for future scoring. Returns `None` while the baseline has fewer than
  /// `MIN_BASELINE_SAMPLES` samples (the min-sample gate) — the caller should treat that as
  /// "no verdict yet", not as "score of zero".
  pub async fn score_and_update( &self, tenant_id: &str, detector_key: &str, value: f64 ) -> Option< f64 >
  {
    let key = Self::key( tenant_id, detector_key );
    let entry = self.windows.entry( key ).or_insert_with( || Mutex::new( RollingWindow::default() ) );
    let mut window = entry.lock().await;

    let z_score = window.mean_and_stddev().map( |( mean, stddev )|
    {
      if stddev > 0.0 { ( value - mean ) / stddev } else { 0.0 }
    } );

    window.push( value );
    z_score
  }

  /// Number of samples collected so far for `(tenant_id, detector_key)`, for diagnostics/tests.
  pub async fn sample_count( &self, tenant_id: &str, detector_key: &str ) -> usize
  {
    let key = Self::key( tenant_id, detector_key );
    match self.windows.get( &key )
    {
      Some( entry ) => entry.lock().await.samples.len(),
      None => 0,
    }
  }
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[tokio::test]
  async fn below_minimum_samples_yields_no_score()
  {
    let store = BaselineStore::new();
    for _ in 0 .. 10
    {
      assert!( store.score_and_update( "tenant_a", "response_bytes", 100.0 ).await.is_none() );
    }
  }

  #[tokio::test]
  async fn outlier_after_warmup_yields_large_z_score()
  {
    let store = BaselineStore::new();
    for _ in 0 .. MIN_BASELINE_SAMPLES
    {
      store.score_and_update( "tenant_a", "response_bytes", 100.0 ).await;
    }

    let score = store.score_and_update( "tenant_a", "response_bytes", 10_000.0 ).await.expect( "baseline warmed up" );
    assert!( score > 5.0 );
  }

  #[tokio::test]
  async fn distinct_tenants_and_detectors_do_not_share_a_window()
  {
    let store = BaselineStore::new();
    for _ in 0 .. MIN_BASELINE_SAMPLES
    {
      store.score_and_update( "tenant_a", "response_bytes", 100.0 ).await;
    }
    assert!( store.score_and_update( "tenant_b", "response_bytes", 100.0 ).await.is_none() );
    assert!( store.score_and_update( "tenant_a", "call_count", 100.0 ).await.is_none() );
  }
}
