//! Detector contract: every concrete detector is either `sync` (hot path, latency-bounded) or
//! `async` (background, can race a live stream and signal a kill). Grounded in the shared
//! `name`/`threat_type`/`priority` identity plus enable/disable used across both. Per §4.9.

use crate::model::DetectionResult;
use accproxy_types::ThreatType;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Request- or response-scoped facts available to a detector beyond the raw JSON body.
#[derive( Debug, Clone, Default )]
pub struct DetectionContext
{
  pub tenant_id: String,
  pub agent_id: Option< String >,
  pub extra: HashMap< String, String >,
}

/// Identity and scheduling properties shared by every detector, sync or async.
pub trait Detector: Send + Sync
{
  fn name( &self ) -> &str;
  fn threat_type( &self ) -> ThreatType;

  /// Lower runs first. Matches the original ordering convention.
  fn priority( &self ) -> i32
  {
    100
  }
}

/// A detector that must complete within the sync-detection latency ceiling (§4.9: 10ms per
/// phase, 50ms total). Invoked directly in the request/response path.
pub trait SyncDetector: Detector
{
  fn detect_request_sync( &self, request: &Value, context: &DetectionContext ) -> Vec< DetectionResult >;
  fn detect_response_sync( &self, response: &Value, context: &DetectionContext ) -> Vec< DetectionResult >;
}

/// A detector that runs off the request path. May take longer than the sync ceiling and, if
/// `can_kill_stream` is true, may ask the engine to abort an in-flight stream after the fact.
#[async_trait]
pub trait AsyncDetector: Detector
{
  fn can_kill_stream( &self ) -> bool
  {
    false
  }

  async fn detect_request( &self, _request: &Value, _context: &DetectionContext ) -> Vec< DetectionResult >
  {
    Vec::new()
  }

  async fn detect_response( &self, _response: &Value, _context: &DetectionContext ) -> Vec< DetectionResult >
  {
    Vec::new()
  }
}
