//! Response policy: maps a detection's `(threat_type, severity, detection_level)` to a
//! concrete action, with per-detection-level degradation. Directly grounded in the original
//! `SecurityConfig.get_action_for_detection`. Per §4.9.

use accproxy_types::{ DetectionLevel, ResponseAction, Severity, ThreatType };
use std::collections::HashMap;

/// Tunable thresholds consulted by individual detectors, not by the policy engine itself.
/// Collected here so they're configured and reasoned about in one place, per the original
/// `DetectionThresholds` dataclass.
#[derive( Debug, Clone )]
pub struct DetectionThresholds
{
  pub injection_confidence_high: f64,
  pub injection_confidence_medium: f64,
  pub injection_confidence_low: f64,
  pub max_data_volume_kb: u64,
  pub entropy_threshold: f64,
  pub max_calls_per_minute: u32,
  pub max_calls_per_hour: u32,
  pub similar_request_threshold: u32,
  pub anomaly_z_score_threshold: f64,
  pub min_baseline_samples: u32,
  pub min_entropy_for_secrets: f64,
  pub max_secret_length: usize,
}

impl Default for DetectionThresholds
{
  fn default() -> Self
  {
    Self
    {
      injection_confidence_high: 0.8,
      injection_confidence_medium: 0.5,
      injection_confidence_low: 0.2,
      max_data_volume_kb: 100,
      entropy_threshold: 4.5,
      max_calls_per_minute: 60,
      max_calls_per_hour: 500,
      similar_request_threshold: 5,
      anomaly_z_score_threshold: 2.0,
      min_baseline_samples: 100,
      min_entropy_for_secrets: 4.0,
      max_secret_length: 256,
    }
  }
}

/// Maps severities and specific threat types to a baseline action, before detection-level
/// degradation is applied.
#[derive( Debug, Clone )]
pub struct ResponsePolicy
{
  pub critical_action: ResponseAction,
  pub high_action: ResponseAction,
  pub medium_action: ResponseAction,
  pub low_action: ResponseAction,
  pub info_action: ResponseAction,
  pub threat_actions: HashMap< ThreatType, ResponseAction >,
}

impl Default for ResponsePolicy
{
  fn default() -> Self
  {
    let mut threat_actions = HashMap::new();
    threat_actions.insert( ThreatType::PromptInjection, ResponseAction::Block );
    threat_actions.insert( ThreatType::CredentialExposure, ResponseAction::Redact );
    threat_actions.insert( ThreatType::DataExfiltration, ResponseAction::Block );
    threat_actions.insert( ThreatType::RunawayLoop, ResponseAction::Throttle );

    Self
    {
      critical_action: ResponseAction::Block,
      high_action: ResponseAction::Alert,
      medium_action: ResponseAction::Log,
      low_action: ResponseAction::Log,
      info_action: ResponseAction::Log,
      threat_actions,
    }
  }
}

impl ResponsePolicy
{
  /// Resolves the action for one detection at a given enforcement level. `monitor` always
  /// logs; `warn` downgrades any of block/quarantine/kill to alert; only `enforce` lets the
  /// full action through.
  pub fn action_for( &self, threat_type: ThreatType, severity: Severity, level: DetectionLevel ) -> ResponseAction
  {
    if level <= DetectionLevel::Monitor
    {
      return ResponseAction::Log;
    }

    let base_action = self.threat_actions.get( &threat_type ).copied().unwrap_or_else( || self.severity_action( severity ) );

    if level == DetectionLevel::Warn && is_blocking( base_action )
    {
      return ResponseAction::Alert;
    }

    base_action
  }

  fn severity_action( &self, severity: Severity ) -> ResponseAction
  {
    match severity
    {
      Severity::Critical => self.critical_action,
      Severity::High => self.high_action,
      Severity::Medium => self.medium_action,
      Severity::Low => self.low_action,
      Severity::Info => self.info_action,
    }
  }
}

fn is_blocking( action: ResponseAction ) -> bool
{
  matches!( action, ResponseAction::Block | ResponseAction::Quarantine | ResponseAction::Kill )
}

/// Folds several simultaneous detections down to the single most restrictive action, per
/// §4.9's precedence `kill > block > quarantine > throttle > redact > alert > log`.
pub fn most_restrictive( actions: impl IntoIterator< Item = ResponseAction > ) -> ResponseAction
{
  actions.into_iter().max().unwrap_or( ResponseAction::Log )
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn monitor_level_always_logs_regardless_of_severity()
  {
    let policy = ResponsePolicy::default();
    let action = policy.action_for( ThreatType::PromptInjection, Severity::Critical, DetectionLevel::Monitor );
    assert_eq!( action, ResponseAction::Log );
  }

  #[test]
  fn warn_level_downgrades_block_to_alert()
  {
    let policy = ResponsePolicy::default();
    let action = policy.action_for( ThreatType::PromptInjection, Severity::Critical, DetectionLevel::Warn );
    assert_eq!( action, ResponseAction::Alert );
  }

  #[test]
  fn enforce_level_lets_threat_specific_action_through()
  {
    let policy = ResponsePolicy::default();
    assert_eq!( policy.action_for( ThreatType::PromptInjection, Severity::Critical, DetectionLevel::Enforce ), ResponseAction::Block );
    assert_eq!( policy.action_for( ThreatType::CredentialExposure, Severity::Low, DetectionLevel::Enforce ), ResponseAction::Redact );
  }

  #[test]
  fn warn_level_does_not_downgrade_non_blocking_actions()
  {
    let policy = ResponsePolicy::default();
    assert_eq!( policy.action_for( ThreatType::CredentialExposure, Severity::Low, DetectionLevel::Warn ), ResponseAction::Redact );
  }

  #[test]
  fn severity_fallback_applies_when_no_threat_override_exists()
  {
    let policy = ResponsePolicy::default();
    assert_eq!( policy.action_for( ThreatType::Anomaly, Severity::High, DetectionLevel::Enforce ), ResponseAction::Alert );
    assert_eq!( policy.action_for( ThreatType::Anomaly, Severity::Info, DetectionLevel::Enforce ), ResponseAction::Log );
  }

  #[test]
  fn most_restrictive_picks_kill_over_everything_else()
  {
    let actions = [ ResponseAction::Log, ResponseAction::Alert, ResponseAction::Kill, ResponseAction::Block ];
    assert_eq!( most_restrictive( actions ), ResponseAction::Kill );
  }

  #[test]
  fn most_restrictive_of_empty_set_is_log()
  {
    assert_eq!( most_restrictive( [] ), ResponseAction::Log );
  }
}
