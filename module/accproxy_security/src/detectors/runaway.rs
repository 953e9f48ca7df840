//! Runaway Loop detector: per-(tenant, agent) call-rate ceilings and a repeated-payload
//! counter, both backed by the shared key-value store. Async — each check is a KV round
//! trip, too slow for the sync latency ceiling. Per §4.9.

use crate::detector::{ AsyncDetector, Detector, DetectionContext };
use crate::model::{ DetectionResult, DetectionSource };
use crate::policy::DetectionThresholds;
use accproxy_kv::KvStore;
use accproxy_types::{ Severity, ThreatType };
use async_trait::async_trait;
use serde_json::Value;
use std::hash::{ Hash, Hasher };
use std::time::Duration;

/// Flags an agent calling far more often than expected, or repeating the same payload.
pub struct RunawayDetector< K: KvStore >
{
  kv: K,
  thresholds: DetectionThresholds,
}

impl< K: KvStore > RunawayDetector< K >
{
  pub fn new( kv: K ) -> Self
  {
    Self { kv, thresholds: DetectionThresholds::default() }
  }

  pub fn with_thresholds( kv: K, thresholds: DetectionThresholds ) -> Self
  {
    Self { kv, thresholds }
  }

  async fn check_call_rate( &self, context: &DetectionContext ) -> Vec< DetectionResult >
  {
    let agent = context.agent_id.as_deref().unwrap_or( "unscoped" );
    let minute_key = format!( "runaway:rate:{}:{}:60", context.tenant_id, agent );
    let hour_key = format!( "runaway:rate:{}:{}:3600", context.tenant_id, agent );

    let per_minute = self.incr_with_ttl( &minute_key, Duration::from_secs( 60 ) ).await;
    let per_hour = self.incr_with_ttl( &hour_key, Duration::from_secs( 3600 ) ).await;

    if per_minute > u64::from( self.thresholds.max_calls_per_minute ) || per_hour > u64::from( self.thresholds.max_calls_per_hour )
    {
      let mut evidence = std::collections::HashMap::new();
      evidence.insert( "calls_per_minute".to_string(), Value::from( per_minute ) );
      evidence.insert( "calls_per_hour".to_string(), Value::from( per_hour ) );
      return vec![ DetectionResult
      {
        detected: true,
        threat_type: ThreatType::RunawayLoop,
        severity: Severity::High,
        confidence: 0.85,
        source: DetectionSource::Heuristic,
        description: "call rate exceeds configured ceiling".to_string(),
        evidence,
        rule_id: Some( "runaway.call_rate".to_string() ),
      } ];
    }

    Vec::new()
  }

  async fn check_repeated_payload( &self, request: &Value, context: &DetectionContext ) -> Vec< DetectionResult >
  {
    let agent = context.agent_id.as_deref().unwrap_or( "unscoped" );
    let content_hash = hash_value( request );
    let key = format!( "runaway:content:{}:{}:{:x}", context.tenant_id, agent, content_hash );

    let count = self.incr_with_ttl( &key, Duration::from_secs( 300 ) ).await;

    if count >= u64::from( self.thresholds.similar_request_threshold )
    {
      let mut evidence = std::collections::HashMap::new();
      evidence.insert( "repeat_count".to_string(), Value::from( count ) );
      return vec![ DetectionResult
      {
        detected: true,
        threat_type: ThreatType::RunawayLoop,
        severity: Severity::Medium,
        confidence: 0.7,
        source: DetectionSource::Heuristic,
        description: format!( "identical request content seen {count} times in window" ),
        evidence,
        rule_id: Some( "runaway.repeated_payload".to_string() ),
      } ];
    }

    Vec::new()
  }

  async fn incr_with_ttl( &self, key: &str, ttl: Duration ) -> u64
  {
    match self.kv.incr( key ).await
    {
      Ok( value ) =>
      {
        if value == 1
        {
          let _ = self.kv.expire( key, ttl ).await;
        }
        value.max( 0 ) as u64
      }
      Err( error ) =>
      {
        tracing::warn!( %error, key, "runaway detector store unavailable, treating as zero" );
        0
      }
    }
  }
}

fn hash_value( value: &Value ) -> u64
{
  let mut hasher = std::collections::hash_map::DefaultHasher::new();
  value.to_string().hash( &mut hasher );
  hasher.finish()
}

impl< K: KvStore > Detector for RunawayDetector< K >
{
  fn name( &self ) -> &str { "runaway_loop" }
  fn threat_type( &self ) -> ThreatType { ThreatType::RunawayLoop }
  fn priority( &self ) -> i32 { 40 }
}

#[async_trait]
impl< K: KvStore > AsyncDetector for RunawayDetector< K >
{
  async fn detect_request( &self, request: &Value, context: &DetectionContext ) -> Vec< DetectionResult >
  {
    let mut results = self.check_call_rate( context ).await;
    results.extend( self.check_repeated_payload( request, context ).await );
    if results.is_empty() { vec![ DetectionResult::clean( ThreatType::RunawayLoop ) ] } else { results }
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use accproxy_kv::InMemoryKvStore;
  use serde_json::json;

  fn context() -> DetectionContext
  {
    DetectionContext { tenant_id: "tenant_x".to_string(), agent_id: Some( "agent_1".to_string() ), extra: Default::default() }
  }

  #[tokio::test]
  async fn first_calls_are_clean()
  {
    let detector = RunawayDetector::new( InMemoryKvStore::new() );
    let request = json!({ "messages": [ "hi" ] });
    let results = detector.detect_request( &request, &context() ).await;
    assert!( !results.iter().any( |r| r.detected ) );
  }

  #[tokio::test]
  async fn exceeding_call_rate_is_flagged()
  {
    let thresholds = DetectionThresholds { max_calls_per_minute: 2, ..Default::default() };
    let detector = RunawayDetector::with_thresholds( InMemoryKvStore::new(), thresholds );

    for n in 0 .. 3
    {
      let request = json!({ "messages": [ format!( "distinct payload {n}" ) ] });
      detector.detect_request( &request, &context() ).await;
    }

    let request = json!({ "messages": [ "final distinct payload" ] });
    let results = detector.detect_request( &request, &context() ).await;
    assert!( results.iter().any( |r| r.detected && r.rule_id.as_deref() == Some( "runaway.call_rate" ) ) );
  }

  #[tokio::test]
  async fn repeated_identical_payload_is_flagged()
  {
    let thresholds = DetectionThresholds { similar_request_threshold: 3, ..Default::default() };
    let detector = RunawayDetector::with_thresholds( InMemoryKvStore::new(), thresholds );
    let request = json!({ "messages": [ "same payload every time" ] });

    detector.detect_request( &request, &context() ).await;
    detector.detect_request( &request, &context() ).await;
    let results = detector.detect_request( &request, &context() ).await;

    assert!( results.iter().any( |r| r.detected && r.rule_id.as_deref() == Some( "runaway.repeated_payload" ) ) );
  }
}
