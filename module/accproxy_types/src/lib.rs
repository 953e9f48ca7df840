//! Shared types used across the accproxy request pipeline: entity ids, the
//! provider/plan/budget vocabulary, and the top-level error kind the HTTP surface maps to
//! a stable status code and `type` string.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
mod types
{
  use serde::{ Deserialize, Serialize };
  use thiserror::Error;

  /// Upstream LLM provider.
  #[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize )]
  #[serde( rename_all = "lowercase" )]
  pub enum Provider
  {
    Anthropic,
    Openai,
    Google,
  }

  impl Provider
  {
    /// Short name used in pricing table keys and log fields.
    pub fn as_str( self ) -> &'static str
    {
      match self
      {
        Self::Anthropic => "anthropic",
        Self::Openai => "openai",
        Self::Google => "google",
      }
    }

    /// Parses the short name back into a `Provider`, the inverse of `as_str`. Used when a
    /// routing rule's `target_provider` string needs to become the dispatch target.
    pub fn parse( s: &str ) -> Option< Self >
    {
      match s
      {
        "anthropic" => Some( Self::Anthropic ),
        "openai" => Some( Self::Openai ),
        "google" => Some( Self::Google ),
        _ => None,
      }
    }
  }

  /// Tenant plan tier. Currently informational only (rate/budget limits are configured per
  /// tenant rather than derived from plan), kept because the data model names it explicitly.
  #[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
  #[serde( rename_all = "lowercase" )]
  pub enum PlanTier
  {
    Free,
    Pro,
    Team,
    Enterprise,
  }

  /// Budget scope: which requests a budget applies to.
  #[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
  #[serde( tag = "scope", rename_all = "snake_case" )]
  pub enum BudgetScope
  {
    Global,
    PerAgent { agent_id: String },
    PerModel { model: String },
    PerWorkflow { workflow_id: String },
  }

  /// Budget reset cadence.
  #[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
  #[serde( rename_all = "lowercase" )]
  pub enum BudgetPeriod
  {
    Daily,
    Weekly,
    Monthly,
  }

  /// What a budget does once its limit is reached.
  #[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
  #[serde( tag = "action", rename_all = "snake_case" )]
  pub enum BudgetAction
  {
    Alert,
    Block,
    Downgrade { target_model: String },
  }

  /// Per-tenant/agent security enforcement level.
  #[derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default )]
  #[serde( rename_all = "lowercase" )]
  pub enum DetectionLevel
  {
    Disabled,
    #[default]
    Monitor,
    Warn,
    Enforce,
  }

  /// Severity of a detected threat.
  #[derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize )]
  #[serde( rename_all = "lowercase" )]
  pub enum Severity
  {
    Info,
    Low,
    Medium,
    High,
    Critical,
  }

  /// Threat category a detector reports.
  #[derive( Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize )]
  #[serde( rename_all = "snake_case" )]
  pub enum ThreatType
  {
    PromptInjection,
    CredentialExposure,
    DataExfiltration,
    RunawayLoop,
    ToolAbuse,
    Anomaly,
    DetectorError,
  }

  impl ThreatType
  {
    /// Stable wire name, also used as the threat-action override lookup key.
    pub fn as_str( self ) -> &'static str
    {
      match self
      {
        Self::PromptInjection => "prompt_injection",
        Self::CredentialExposure => "credential_exposure",
        Self::DataExfiltration => "data_exfiltration",
        Self::RunawayLoop => "runaway_loop",
        Self::ToolAbuse => "tool_abuse",
        Self::Anomaly => "anomaly",
        Self::DetectorError => "detector_error",
      }
    }
  }

  /// Action taken (or about to be taken) in response to a detection. Declaration order is
  /// load-bearing: derived `Ord` ranks variants by restrictiveness so `most_restrictive()` can
  /// just take a `max()`, per §4.9's total order `kill > block > quarantine > throttle >
  /// redact > alert > log`.
  #[derive( Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize )]
  #[serde( rename_all = "lowercase" )]
  pub enum ResponseAction
  {
    Log,
    Alert,
    Redact,
    Throttle,
    Quarantine,
    Block,
    Kill,
  }

  /// Stable error kind surfaced to clients; each maps to exactly one HTTP status and `type`
  /// string (see `accproxy_proxy`'s error-response mapping — the one place that owns it).
  #[derive( Debug, Error )]
  pub enum Error
  {
    #[error( "unauthenticated" )]
    Unauthenticated,

    #[error( "authentication store unavailable" )]
    AuthUnavailable,

    #[error( "rate limited" )]
    RateLimited { remaining: u32 },

    #[error( "bad request: {0}" )]
    BadRequest( String ),

    #[error( "budget exceeded: {budget_name}" )]
    BudgetExceeded { budget_name: String },

    #[error( "security blocked: {threat}" )]
    SecurityBlocked { threat: String },

    #[error( "upstream timeout" )]
    UpstreamTimeout,

    #[error( "upstream error: {0}" )]
    UpstreamError( String ),

    #[error( "internal error: {0}" )]
    Internal( String ),
  }

  /// Crate-wide result alias.
  pub type Result< T > = std::result::Result< T, Error >;
}

#[cfg(feature = "enabled")]
pub use types::*;

pub mod ids;
#[cfg(feature = "enabled")]
pub use ids::{ AgentId, BudgetId, IdError, RequestId, RoutingRuleId, SecurityEventId, TenantId };

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn provider_as_str_matches_pricing_table_keys()
  {
    assert_eq!( Provider::Anthropic.as_str(), "anthropic" );
    assert_eq!( Provider::Openai.as_str(), "openai" );
    assert_eq!( Provider::Google.as_str(), "google" );
  }

  #[test]
  fn provider_parse_is_the_inverse_of_as_str()
  {
    assert_eq!( Provider::parse( "anthropic" ), Some( Provider::Anthropic ) );
    assert_eq!( Provider::parse( "openai" ), Some( Provider::Openai ) );
    assert_eq!( Provider::parse( "google" ), Some( Provider::Google ) );
    assert_eq!( Provider::parse( "unknown" ), None );
  }

  #[test]
  fn detection_level_defaults_to_monitor()
  {
    assert_eq!( DetectionLevel::default(), DetectionLevel::Monitor );
  }

  #[test]
  fn detection_level_ordering_follows_enforcement_strictness()
  {
    assert!( DetectionLevel::Monitor < DetectionLevel::Warn );
    assert!( DetectionLevel::Warn < DetectionLevel::Enforce );
  }

  #[test]
  fn response_action_ordering_follows_restrictiveness()
  {
    assert!( ResponseAction::Log < ResponseAction::Block );
    assert!( ResponseAction::Block < ResponseAction::Kill );
    assert!( ResponseAction::Redact < ResponseAction::Throttle );
    assert!( ResponseAction::Quarantine < ResponseAction::Block );
    assert!( ResponseAction::Throttle < ResponseAction::Quarantine );
  }
}
