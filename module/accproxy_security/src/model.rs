//! The `DetectionResult` a detector returns and the `SecurityEvent` persisted from it, per §3.

use accproxy_types::{ ResponseAction, Severity, ThreatType };
use serde_json::Value;
use std::collections::HashMap;

/// Where a detection came from: a fixed rule, a heuristic computation, or a model call.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum DetectionSource
{
  Rule,
  Heuristic,
  Model,
}

impl DetectionSource
{
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Rule => "rule",
      Self::Heuristic => "heuristic",
      Self::Model => "model",
    }
  }
}

/// What a single detector found for a single request or response.
#[derive( Debug, Clone )]
pub struct DetectionResult
{
  pub detected: bool,
  pub threat_type: ThreatType,
  pub severity: Severity,
  pub confidence: f64,
  pub source: DetectionSource,
  pub description: String,
  pub evidence: HashMap< String, Value >,
  pub rule_id: Option< String >,
}

impl DetectionResult
{
  pub fn clean( threat_type: ThreatType ) -> Self
  {
    Self
    {
      detected: false,
      threat_type,
      severity: Severity::Info,
      confidence: 0.0,
      source: DetectionSource::Heuristic,
      description: String::new(),
      evidence: HashMap::new(),
      rule_id: None,
    }
  }
}

/// Which side of the exchange a detector inspected.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Direction
{
  Request,
  Response,
}

impl Direction
{
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Request => "request",
      Self::Response => "response",
    }
  }
}

/// A durable record of a detection and the action actually taken, per §3's `SecurityEvent`.
#[derive( Debug, Clone )]
pub struct SecurityEvent
{
  pub id: String,
  pub tenant_id: String,
  pub agent_id: Option< String >,
  pub direction: Direction,
  pub threat_type: ThreatType,
  pub severity: Severity,
  pub confidence: f64,
  pub source: DetectionSource,
  pub evidence: HashMap< String, Value >,
  pub action_taken: ResponseAction,
  pub occurred_at_unix: i64,
}
