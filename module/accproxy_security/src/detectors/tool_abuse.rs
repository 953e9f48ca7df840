//! Tool Abuse detector: flags `tool_use` blocks (and OpenAI `tool_calls`) invoking a tool name
//! outside the calling agent's allow-list. Sync, request-path only — the abuse is in what the
//! agent asked to call, not in what came back. Per §4.9.

use crate::detector::{ Detector, DetectionContext, SyncDetector };
use crate::model::{ DetectionResult, DetectionSource };
use accproxy_types::{ Severity, ThreatType };
use serde_json::Value;
use std::collections::HashMap;

/// Per-agent (or tenant-wide default) set of disallowed tool names, read from `AgentPolicy`.
#[derive( Debug, Clone, Default )]
pub struct ToolAllowlist
{
  /// Tool names a request may never invoke, regardless of agent.
  pub disallowed_tenant_wide: Vec< String >,
  /// Per-agent overrides, additive with the tenant-wide list.
  pub disallowed_per_agent: HashMap< String, Vec< String > >,
}

impl ToolAllowlist
{
  fn disallowed_for( &self, agent_id: Option< &str > ) -> Vec< &str >
  {
    let mut names: Vec< &str > = self.disallowed_tenant_wide.iter().map( String::as_str ).collect();
    if let Some( agent_id ) = agent_id
    {
      if let Some( extra ) = self.disallowed_per_agent.get( agent_id )
      {
        names.extend( extra.iter().map( String::as_str ) );
      }
    }
    names
  }
}

/// Flags tool invocations naming a tool outside the calling agent's policy.
pub struct ToolAbuseDetector
{
  allowlist: ToolAllowlist,
}

impl ToolAbuseDetector
{
  pub fn new( allowlist: ToolAllowlist ) -> Self
  {
    Self { allowlist }
  }

  fn scan( &self, body: &Value, context: &DetectionContext ) -> Vec< DetectionResult >
  {
    let disallowed = self.allowlist.disallowed_for( context.agent_id.as_deref() );
    if disallowed.is_empty()
    {
      return vec![ DetectionResult::clean( ThreatType::ToolAbuse ) ];
    }

    let mut hits = Vec::new();
    for name in tool_names( body )
    {
      if disallowed.contains( &name.as_str() )
      {
        let mut evidence = HashMap::new();
        evidence.insert( "tool_name".to_string(), Value::String( name.clone() ) );
        hits.push( DetectionResult
        {
          detected: true,
          threat_type: ThreatType::ToolAbuse,
          severity: Severity::High,
          confidence: 1.0,
          source: DetectionSource::Rule,
          description: format!( "invocation of disallowed tool '{name}'" ),
          evidence,
          rule_id: Some( "tool_abuse.disallowed_tool".to_string() ),
        } );
      }
    }

    if hits.is_empty() { vec![ DetectionResult::clean( ThreatType::ToolAbuse ) ] } else { hits }
  }
}

/// Collects tool names from Anthropic `tool_use` content blocks and OpenAI `tool_calls`.
fn tool_names( body: &Value ) -> Vec< String >
{
  let mut names = Vec::new();
  collect_anthropic_tool_use( body, &mut names );
  collect_openai_tool_calls( body, &mut names );
  names
}

fn collect_anthropic_tool_use( value: &Value, names: &mut Vec< String > )
{
  match value
  {
    Value::Object( map ) =>
    {
      if map.get( "type" ).and_then( Value::as_str ) == Some( "tool_use" )
      {
        if let Some( name ) = map.get( "name" ).and_then( Value::as_str )
        {
          names.push( name.to_string() );
        }
      }
      for v in map.values()
      {
        collect_anthropic_tool_use( v, names );
      }
    }
    Value::Array( items ) =>
    {
      for item in items
      {
        collect_anthropic_tool_use( item, names );
      }
    }
    _ => {}
  }
}

fn collect_openai_tool_calls( value: &Value, names: &mut Vec< String > )
{
  let Some( tool_calls ) = value.get( "tool_calls" ).or_else( || value.get( "message" ).and_then( |m| m.get( "tool_calls" ) ) ) else { return };
  let Some( calls ) = tool_calls.as_array() else { return };
  for call in calls
  {
    if let Some( name ) = call.get( "function" ).and_then( |f| f.get( "name" ) ).and_then( Value::as_str )
    {
      names.push( name.to_string() );
    }
  }

  if let Some( choices ) = value.get( "choices" ).and_then( Value::as_array )
  {
    for choice in choices
    {
      if let Some( message ) = choice.get( "message" )
      {
        collect_openai_tool_calls( message, names );
      }
    }
  }
}

impl Detector for ToolAbuseDetector
{
  fn name( &self ) -> &str { "tool_abuse" }
  fn threat_type( &self ) -> ThreatType { ThreatType::ToolAbuse }
  fn priority( &self ) -> i32 { 30 }
}

impl SyncDetector for ToolAbuseDetector
{
  fn detect_request_sync( &self, request: &Value, context: &DetectionContext ) -> Vec< DetectionResult >
  {
    self.scan( request, context )
  }

  fn detect_response_sync( &self, response: &Value, context: &DetectionContext ) -> Vec< DetectionResult >
  {
    self.scan( response, context )
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use serde_json::json;

  fn context() -> DetectionContext
  {
    DetectionContext { tenant_id: "tenant_x".to_string(), agent_id: Some( "agent_1".to_string() ), extra: Default::default() }
  }

  #[test]
  fn no_policy_configured_is_clean()
  {
    let detector = ToolAbuseDetector::new( ToolAllowlist::default() );
    let body = json!({ "content": [ { "type": "tool_use", "name": "shell_exec" } ] });
    assert!( !detector.scan( &body, &context() ).iter().any( |r| r.detected ) );
  }

  #[test]
  fn disallowed_anthropic_tool_use_is_flagged()
  {
    let allowlist = ToolAllowlist { disallowed_tenant_wide: vec![ "shell_exec".to_string() ], ..Default::default() };
    let detector = ToolAbuseDetector::new( allowlist );
    let body = json!({ "content": [ { "type": "tool_use", "name": "shell_exec", "input": {} } ] });
    let results = detector.scan( &body, &context() );
    assert!( results.iter().any( |r| r.detected && r.rule_id.as_deref() == Some( "tool_abuse.disallowed_tool" ) ) );
  }

  #[test]
  fn allowed_tool_is_not_flagged()
  {
    let allowlist = ToolAllowlist { disallowed_tenant_wide: vec![ "shell_exec".to_string() ], ..Default::default() };
    let detector = ToolAbuseDetector::new( allowlist );
    let body = json!({ "content": [ { "type": "tool_use", "name": "web_search" } ] });
    assert!( !detector.scan( &body, &context() ).iter().any( |r| r.detected ) );
  }

  #[test]
  fn disallowed_openai_tool_call_is_flagged()
  {
    let allowlist = ToolAllowlist { disallowed_tenant_wide: vec![ "delete_database".to_string() ], ..Default::default() };
    let detector = ToolAbuseDetector::new( allowlist );
    let body = json!({ "tool_calls": [ { "function": { "name": "delete_database" } } ] });
    let results = detector.scan( &body, &context() );
    assert!( results.iter().any( |r| r.detected ) );
  }

  #[test]
  fn per_agent_override_is_additive_with_tenant_wide()
  {
    let mut per_agent = HashMap::new();
    per_agent.insert( "agent_1".to_string(), vec![ "risky_tool".to_string() ] );
    let allowlist = ToolAllowlist { disallowed_tenant_wide: Vec::new(), disallowed_per_agent: per_agent };
    let detector = ToolAbuseDetector::new( allowlist );
    let body = json!({ "content": [ { "type": "tool_use", "name": "risky_tool" } ] });
    assert!( detector.scan( &body, &context() ).iter().any( |r| r.detected ) );

    let other_context = DetectionContext { tenant_id: "tenant_x".to_string(), agent_id: Some( "agent_2".to_string() ), extra: Default::default() };
    assert!( !detector.scan( &body, &other_context ).iter().any( |r| r.detected ) );
  }
}
