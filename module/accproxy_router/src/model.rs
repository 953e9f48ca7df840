//! The `RoutingRule` record and its condition schema, per §3 and §4.4.

use accproxy_types::{ RoutingRuleId, TenantId };
use serde::{ Deserialize, Serialize };

/// Condition schema a routing rule is matched against. Every populated field must match for
/// the rule as a whole to match; an absent field is vacuously satisfied.
#[derive( Debug, Clone, Default, Serialize, Deserialize, PartialEq )]
pub struct RoutingCondition
{
  /// Regex the request's current model must match (anchored like Python `re.match`: tested
  /// against the start of the string).
  #[serde( default, skip_serializing_if = "Option::is_none" )]
  pub source_model_regex: Option< String >,

  /// Minimum number of messages in the conversation.
  #[serde( default, skip_serializing_if = "Option::is_none" )]
  pub min_messages: Option< usize >,

  /// Matches if any keyword appears anywhere in the concatenated message content.
  #[serde( default, skip_serializing_if = "Option::is_none" )]
  pub content_keywords: Option< Vec< String > >,

  /// Matches only when the pre-flight token estimate is at or below this ceiling.
  #[serde( default, skip_serializing_if = "Option::is_none" )]
  pub token_estimate_max: Option< u64 >,

  /// Matches only within this UTC hour-of-day range, e.g. `(22, 6)` for an overnight window
  /// that wraps past midnight.
  #[serde( default, skip_serializing_if = "Option::is_none" )]
  pub time_of_day_range: Option< ( u8, u8 ) >,

  /// Matches only for this exact agent id.
  #[serde( default, skip_serializing_if = "Option::is_none" )]
  pub agent_id: Option< String >,
}

/// The facts of a single request, as presented to the router for rule matching.
#[derive( Debug, Clone )]
pub struct RouteRequest< 'a >
{
  pub model: &'a str,
  pub message_count: usize,
  pub concatenated_content: &'a str,
  pub token_estimate: u64,
  pub agent_id: Option< &'a str >,
  pub hour_of_day_utc: u8,
}

/// A routing rule as loaded from the authoritative store.
#[derive( Debug, Clone )]
pub struct RoutingRule
{
  pub id: RoutingRuleId,
  pub tenant_id: TenantId,
  pub name: String,
  pub priority: i64,
  pub condition: RoutingCondition,
  pub target_provider: String,
  pub target_model: String,
  pub fallback_provider: Option< String >,
  pub fallback_model: Option< String >,
  pub reason: Option< String >,
  pub is_active: bool,
  pub times_applied: u64,
  pub estimated_savings_micros: u64,
}

impl RoutingRule
{
  /// Does this rule's condition set match the given request?
  pub fn matches( &self, request: &RouteRequest< '_ > ) -> bool
  {
    if let Some( pattern ) = &self.condition.source_model_regex
    {
      match regex::Regex::new( pattern )
      {
        Ok( re ) => if re.find( request.model ).map_or( true, |m| m.start() != 0 ) { return false; },
        Err( error ) =>
        {
          tracing::warn!( %error, rule = %self.name, "invalid source_model_regex, rule never matches" );
          return false;
        }
      }
    }

    if let Some( min_messages ) = self.condition.min_messages
    {
      if request.message_count < min_messages
      {
        return false;
      }
    }

    if let Some( keywords ) = &self.condition.content_keywords
    {
      if !keywords.iter().any( |kw| request.concatenated_content.contains( kw.as_str() ) )
      {
        return false;
      }
    }

    if let Some( max ) = self.condition.token_estimate_max
    {
      if request.token_estimate > max
      {
        return false;
      }
    }

    if let Some( ( start, end ) ) = self.condition.time_of_day_range
    {
      if !hour_in_range( request.hour_of_day_utc, start, end )
      {
        return false;
      }
    }

    if let Some( agent_id ) = &self.condition.agent_id
    {
      if request.agent_id != Some( agent_id.as_str() )
      {
        return false;
      }
    }

    true
  }
}

/// Is `hour` within `[start, end)`, wrapping past midnight when `end <= start`?
fn hour_in_range( hour: u8, start: u8, end: u8 ) -> bool
{
  if start <= end
  {
    hour >= start && hour < end
  }
  else
  {
    hour >= start || hour < end
  }
}

#[cfg( test )]
mod tests
{
  use super::*;

  fn rule_with( condition: RoutingCondition ) -> RoutingRule
  {
    RoutingRule
    {
      id: RoutingRuleId::generate(),
      tenant_id: TenantId::generate(),
      name: "test-rule".to_string(),
      priority: 100,
      condition,
      target_provider: "anthropic".to_string(),
      target_model: "claude-haiku".to_string(),
      fallback_provider: None,
      fallback_model: None,
      reason: None,
      is_active: true,
      times_applied: 0,
      estimated_savings_micros: 0,
    }
  }

  fn request<'a>() -> RouteRequest< 'a >
  {
    RouteRequest
    {
      model: "claude-sonnet-4-20250514",
      message_count: 3,
      concatenated_content: "please summarize this document",
      token_estimate: 500,
      agent_id: Some( "agent_123" ),
      hour_of_day_utc: 14,
    }
  }

  #[test]
  fn regex_matches_anchored_at_start()
  {
    let rule = rule_with( RoutingCondition { source_model_regex: Some( "claude-sonnet".to_string() ), ..Default::default() } );
    assert!( rule.matches( &request() ) );

    let rule = rule_with( RoutingCondition { source_model_regex: Some( "sonnet".to_string() ), ..Default::default() } );
    assert!( !rule.matches( &request() ) );
  }

  #[test]
  fn min_messages_rejects_short_conversations()
  {
    let rule = rule_with( RoutingCondition { min_messages: Some( 5 ), ..Default::default() } );
    assert!( !rule.matches( &request() ) );
  }

  #[test]
  fn content_keywords_matches_any()
  {
    let rule = rule_with( RoutingCondition { content_keywords: Some( vec![ "summarize".to_string(), "translate".to_string() ] ), ..Default::default() } );
    assert!( rule.matches( &request() ) );

    let rule = rule_with( RoutingCondition { content_keywords: Some( vec![ "translate".to_string() ] ), ..Default::default() } );
    assert!( !rule.matches( &request() ) );
  }

  #[test]
  fn token_estimate_ceiling_is_exclusive_above()
  {
    let rule = rule_with( RoutingCondition { token_estimate_max: Some( 100 ), ..Default::default() } );
    assert!( !rule.matches( &request() ) );
  }

  #[test]
  fn time_of_day_range_wraps_past_midnight()
  {
    let rule = rule_with( RoutingCondition { time_of_day_range: Some( ( 22, 6 ) ), ..Default::default() } );
    assert!( !rule.matches( &request() ) ); // 14:00 is outside [22, 6)

    let rule = rule_with( RoutingCondition { time_of_day_range: Some( ( 8, 18 ) ), ..Default::default() } );
    assert!( rule.matches( &request() ) ); // 14:00 is inside [8, 18)
  }

  #[test]
  fn agent_id_must_match_exactly()
  {
    let rule = rule_with( RoutingCondition { agent_id: Some( "agent_999".to_string() ), ..Default::default() } );
    assert!( !rule.matches( &request() ) );

    let rule = rule_with( RoutingCondition { agent_id: Some( "agent_123".to_string() ), ..Default::default() } );
    assert!( rule.matches( &request() ) );
  }

  #[test]
  fn no_conditions_always_matches()
  {
    let rule = rule_with( RoutingCondition::default() );
    assert!( rule.matches( &request() ) );
  }
}
