//! Anomaly detector: z-scores a response's byte size against a rolling per-tenant baseline.
//! Async-only — per §4.9, the window (7 days of samples) and the min-sample gate (100) make
//! this meaningfully slower than the sync ceiling, and it has nothing useful to say until the
//! baseline has warmed up.

use crate::baseline::BaselineStore;
use crate::detector::{ AsyncDetector, Detector, DetectionContext };
use crate::model::{ DetectionResult, DetectionSource };
use crate::policy::DetectionThresholds;
use accproxy_types::{ Severity, ThreatType };
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Key under which this detector's samples are tracked in the baseline store.
const DETECTOR_KEY: &str = "response_bytes";

/// Flags a response whose serialized size is a statistical outlier against this tenant's
/// recent history. Can ask the engine to kill a live stream once confidence clears the
/// auto-kill threshold (§4.9's kill switch applies uniformly across detectors).
pub struct AnomalyDetector
{
  baseline: Arc< BaselineStore >,
  thresholds: DetectionThresholds,
}

impl AnomalyDetector
{
  pub fn new( baseline: Arc< BaselineStore > ) -> Self
  {
    Self { baseline, thresholds: DetectionThresholds::default() }
  }

  pub fn with_thresholds( baseline: Arc< BaselineStore >, thresholds: DetectionThresholds ) -> Self
  {
    Self { baseline, thresholds }
  }

  fn severity_for( &self, z_score: f64 ) -> Severity
  {
    let ratio = z_score / self.thresholds.anomaly_z_score_threshold;
    if ratio >= 3.0 { Severity::Critical }
    else if ratio >= 2.0 { Severity::High }
    else { Severity::Medium }
  }
}

impl Detector for AnomalyDetector
{
  fn name( &self ) -> &str { "anomaly" }
  fn threat_type( &self ) -> ThreatType { ThreatType::Anomaly }
  fn priority( &self ) -> i32 { 90 }
}

#[async_trait]
impl AsyncDetector for AnomalyDetector
{
  fn can_kill_stream( &self ) -> bool { true }

  async fn detect_response( &self, response: &Value, context: &DetectionContext ) -> Vec< DetectionResult >
  {
    let size = response.to_string().len() as f64;
    let Some( z_score ) = self.baseline.score_and_update( &context.tenant_id, DETECTOR_KEY, size ).await else
    {
      return vec![ DetectionResult::clean( ThreatType::Anomaly ) ];
    };

    if z_score.abs() < self.thresholds.anomaly_z_score_threshold
    {
      return vec![ DetectionResult::clean( ThreatType::Anomaly ) ];
    }

    let confidence = ( z_score.abs() / ( self.thresholds.anomaly_z_score_threshold * 3.0 ) ).min( 1.0 );
    let mut evidence = HashMap::new();
    evidence.insert( "z_score".to_string(), Value::from( z_score ) );
    evidence.insert( "response_bytes".to_string(), Value::from( size ) );

    vec![ DetectionResult
    {
      detected: true,
      threat_type: ThreatType::Anomaly,
      severity: self.severity_for( z_score.abs() ),
      confidence,
      source: DetectionSource::Model,
      description: format!( "response size is a statistical outlier (z={z_score:.2})" ),
      evidence,
      rule_id: Some( "anomaly.response_size_zscore".to_string() ),
    } ]
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use serde_json::json;

  fn context() -> DetectionContext
  {
    DetectionContext { tenant_id: "tenant_x".to_string(), agent_id: None, extra: Default::default() }
  }

  #[tokio::test]
  async fn cold_baseline_reports_clean()
  {
    let detector = AnomalyDetector::new( Arc::new( BaselineStore::new() ) );
    let results = detector.detect_response( &json!({ "text": "short" }), &context() ).await;
    assert!( !results.iter().any( |r| r.detected ) );
  }

  #[tokio::test]
  async fn outlier_after_warmup_is_flagged_and_can_kill()
  {
    let baseline = Arc::new( BaselineStore::new() );
    let detector = AnomalyDetector::new( baseline.clone() );
    assert!( detector.can_kill_stream() );

    let normal = json!({ "text": "x".repeat( 100 ) });
    for _ in 0 .. 150
    {
      detector.detect_response( &normal, &context() ).await;
    }

    let huge = json!({ "text": "x".repeat( 1_000_000 ) });
    let results = detector.detect_response( &huge, &context() ).await;
    assert!( results.iter().any( |r| r.detected ) );
  }
}
