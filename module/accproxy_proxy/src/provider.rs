//! Per-provider wiring: upstream endpoint, auth headers, and the body shape each provider
//! uses for its model field and message list. Per §9's provider-abstraction design note —
//! adding a provider means adding one such profile plus a pricing-table entry.

use accproxy_cost::EstimatorMessage;
use accproxy_types::{ Error, Provider };
use serde_json::Value;

/// Everything the pipeline needs to dispatch one request to a specific upstream.
pub struct UpstreamTarget
{
  pub provider: Provider,
  pub url: String,
  pub headers: Vec< ( &'static str, String ) >,
}

/// Builds the Anthropic Messages upstream target. The provider's own auth header is injected
/// fresh from the process environment — the client's presented key never reaches the
/// upstream call. `base_url_override` lets tests point dispatch at a local mock server instead
/// of the real host, mirroring the original's per-key `base_url` override.
pub fn anthropic_target( api_key: &str, base_url_override: Option< &str > ) -> UpstreamTarget
{
  let base_url = base_url_override.unwrap_or( "https://api.anthropic.com" );
  UpstreamTarget
  {
    provider: Provider::Anthropic,
    url: format!( "{base_url}/v1/messages" ),
    headers: vec!
    [
      ( "x-api-key", api_key.to_string() ),
      ( "anthropic-version", "2023-06-01".to_string() ),
      ( "content-type", "application/json".to_string() ),
    ],
  }
}

/// Builds the OpenAI Chat Completions upstream target.
pub fn openai_target( api_key: &str, base_url_override: Option< &str > ) -> UpstreamTarget
{
  let base_url = base_url_override.unwrap_or( "https://api.openai.com" );
  UpstreamTarget
  {
    provider: Provider::Openai,
    url: format!( "{base_url}/v1/chat/completions" ),
    headers: vec!
    [
      ( "authorization", format!( "Bearer {api_key}" ) ),
      ( "content-type", "application/json".to_string() ),
    ],
  }
}

/// Builds the Google Generative Language upstream target for `models/{model}:{method}`,
/// where `method` is `streamGenerateContent` or `generateContent` depending on the request.
/// Google authenticates via an API-key query parameter rather than a header.
pub fn google_target( api_key: &str, model: &str, streaming: bool, base_url_override: Option< &str > ) -> UpstreamTarget
{
  let base_url = base_url_override.unwrap_or( "https://generativelanguage.googleapis.com" );
  let method = if streaming { "streamGenerateContent" } else { "generateContent" };
  let alt = if streaming { "&alt=sse" } else { "" };

  UpstreamTarget
  {
    provider: Provider::Google,
    url: format!( "{base_url}/v1beta/models/{model}:{method}?key={api_key}{alt}" ),
    headers: vec![ ( "content-type", "application/json".to_string() ) ],
  }
}

/// Reads the `model` field every provider's body shape carries, erroring with `bad_request`
/// if it is missing or not a string.
pub fn model_from_body( body: &Value ) -> Result< String, Error >
{
  body.get( "model" )
    .and_then( Value::as_str )
    .map( str::to_string )
    .ok_or_else( || Error::BadRequest( "missing or non-string 'model' field".to_string() ) )
}

/// Whether the client asked for a streaming response, per each provider's own `stream` flag.
pub fn stream_requested( body: &Value ) -> bool
{
  body.get( "stream" ).and_then( Value::as_bool ).unwrap_or( false )
}

/// Extracts `(role, content)` pairs from an Anthropic- or OpenAI-shaped `messages` array, and
/// Anthropic's separate top-level `system` field when present, for the token estimator and
/// the router's condition evaluation.
pub fn estimator_messages( body: &Value ) -> ( Vec< EstimatorMessage >, Option< String > )
{
  let messages = body.get( "messages" )
    .and_then( Value::as_array )
    .map( |items| items.iter().map( to_estimator_message ).collect() )
    .unwrap_or_default();

  let system_prompt = body.get( "system" ).and_then( Value::as_str ).map( str::to_string );

  ( messages, system_prompt )
}

fn to_estimator_message( message: &Value ) -> EstimatorMessage
{
  EstimatorMessage
  {
    role: message.get( "role" ).and_then( Value::as_str ).unwrap_or( "user" ).to_string(),
    content: concatenated_content( message.get( "content" ).unwrap_or( &Value::Null ) ),
  }
}

/// Flattens an Anthropic- or OpenAI-shaped message `content` field (a bare string, or a list
/// of content blocks) into a single string for estimation and routing keyword matching.
pub fn concatenated_content( value: &Value ) -> String
{
  match value
  {
    Value::String( s ) => s.clone(),
    Value::Array( items ) => items.iter().map( |item|
    {
      item.get( "text" ).and_then( Value::as_str ).map( str::to_string ).unwrap_or_else( || concatenated_content( item ) )
    } ).collect::< Vec< _ > >().join( " " ),
    _ => String::new(),
  }
}

/// Concatenates every message's content, for the router's `content_keywords` condition.
pub fn concatenated_messages( body: &Value ) -> String
{
  body.get( "messages" )
    .and_then( Value::as_array )
    .map( |items| items.iter().map( |m| concatenated_content( m.get( "content" ).unwrap_or( &Value::Null ) ) ).collect::< Vec< _ > >().join( " " ) )
    .unwrap_or_default()
}

/// Rewrites the body's `model` field in place, the common shape Anthropic and OpenAI share.
pub fn set_model( body: &mut Value, model: &str )
{
  if let Value::Object( map ) = body
  {
    map.insert( "model".to_string(), Value::String( model.to_string() ) );
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use serde_json::json;

  #[test]
  fn model_from_body_reads_the_model_field()
  {
    let body = json!({ "model": "claude-sonnet-4-20250514" });
    assert_eq!( model_from_body( &body ).unwrap(), "claude-sonnet-4-20250514" );
  }

  #[test]
  fn model_from_body_errors_when_missing()
  {
    let body = json!({ "messages": [] });
    assert!( model_from_body( &body ).is_err() );
  }

  #[test]
  fn concatenated_content_flattens_anthropic_blocks()
  {
    let content = json!([ { "type": "text", "text": "hello" }, { "type": "text", "text": "world" } ]);
    assert_eq!( concatenated_content( &content ), "hello world" );
  }

  #[test]
  fn estimator_messages_reads_role_and_content()
  {
    let body = json!({ "messages": [ { "role": "user", "content": "hi there" } ], "system": "be terse" });
    let ( messages, system ) = estimator_messages( &body );
    assert_eq!( messages.len(), 1 );
    assert_eq!( messages[ 0 ].role, "user" );
    assert_eq!( messages[ 0 ].content, "hi there" );
    assert_eq!( system.as_deref(), Some( "be terse" ) );
  }

  #[test]
  fn set_model_rewrites_in_place()
  {
    let mut body = json!({ "model": "claude-sonnet-4-20250514" });
    set_model( &mut body, "claude-haiku" );
    assert_eq!( body[ "model" ], "claude-haiku" );
  }
}
