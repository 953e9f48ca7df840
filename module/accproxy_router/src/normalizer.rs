//! Cross-provider request body normalization, per §4.4: "Request bodies are normalized
//! across providers before the rule engine or upstream dispatch see them — a
//! `request_normalizer` translates OpenAI-shaped chat payloads into the Anthropic Messages
//! shape ... when the routing decision crosses providers, matching the existing translator's
//! behavior." Grounded on the teacher's
//! `iron_runtime::llm_router::translator::request::translate_openai_to_anthropic`, adapted to
//! operate on an already-parsed `serde_json::Value` rather than raw bytes, matching the rest
//! of this workspace's JSON-`Value`-based request handling.

use serde_json::{ json, Value };

/// Translates an OpenAI `/v1/chat/completions`-shaped body into the Anthropic `/v1/messages`
/// shape: extracts `system`-role messages into a top-level `system` field, maps `stop` to
/// `stop_sequences`, and ensures `max_tokens` is present (required by Anthropic but optional
/// for OpenAI).
pub fn translate_openai_to_anthropic( openai_body: &Value ) -> Value
{
  let messages = openai_body.get( "messages" ).and_then( Value::as_array ).cloned().unwrap_or_default();

  let mut system_prompt: Option< String > = None;
  let mut user_messages: Vec< Value > = Vec::new();

  for message in messages
  {
    let role = message.get( "role" ).and_then( Value::as_str ).unwrap_or( "" );
    if role == "system"
    {
      let content = message.get( "content" ).and_then( Value::as_str ).unwrap_or( "" );
      system_prompt = Some( match system_prompt
      {
        Some( existing ) => format!( "{existing}\n{content}" ),
        None => content.to_string(),
      } );
    }
    else
    {
      user_messages.push( message );
    }
  }

  let mut anthropic = json!({
    "model": openai_body.get( "model" ).cloned().unwrap_or( Value::Null ),
    "messages": user_messages,
    "max_tokens": openai_body.get( "max_tokens" )
      .or_else( || openai_body.get( "max_completion_tokens" ) )
      .cloned()
      .unwrap_or( json!( 4096 ) ),
  });

  if let Some( system ) = system_prompt
  {
    anthropic[ "system" ] = json!( system );
  }

  if let Some( temperature ) = openai_body.get( "temperature" )
  {
    anthropic[ "temperature" ] = temperature.clone();
  }

  if let Some( top_p ) = openai_body.get( "top_p" )
  {
    anthropic[ "top_p" ] = top_p.clone();
  }

  if let Some( stop ) = openai_body.get( "stop" )
  {
    if stop.is_array()
    {
      anthropic[ "stop_sequences" ] = stop.clone();
    }
    else if stop.is_string()
    {
      anthropic[ "stop_sequences" ] = json!( [ stop ] );
    }
  }

  if let Some( stream ) = openai_body.get( "stream" )
  {
    anthropic[ "stream" ] = stream.clone();
  }

  anthropic
}

/// Normalizes `body` (shaped for `origin_provider`) into whatever shape `target_provider`
/// expects, when a routing decision sends a request to a different provider than the one it
/// arrived on. Anthropic and Google both already use a `messages` + system-prompt shape close
/// enough that only the OpenAI -> Anthropic direction needs translation, matching the
/// teacher's own translator scope; any other combination is passed through unchanged (the
/// caller still applies the target model via `set_model`).
pub fn normalize_for_target( origin_provider: &str, target_provider: &str, body: &Value ) -> Value
{
  if origin_provider == "openai" && target_provider != "openai"
  {
    return translate_openai_to_anthropic( body );
  }

  body.clone()
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn basic_translation_keeps_model_and_max_tokens()
  {
    let openai = json!({
      "model": "claude-sonnet-4-20250514",
      "messages": [ { "role": "user", "content": "Hello" } ],
      "max_tokens": 100,
    });

    let anthropic = translate_openai_to_anthropic( &openai );

    assert_eq!( anthropic[ "model" ], "claude-sonnet-4-20250514" );
    assert_eq!( anthropic[ "max_tokens" ], 100 );
    assert_eq!( anthropic[ "messages" ][ 0 ][ "role" ], "user" );
    assert!( anthropic.get( "system" ).is_none() );
  }

  #[test]
  fn system_role_message_is_extracted_to_top_level_field()
  {
    let openai = json!({
      "model": "claude-sonnet-4-20250514",
      "messages": [
        { "role": "system", "content": "You are helpful" },
        { "role": "user", "content": "Hello" },
      ],
      "max_tokens": 100,
    });

    let anthropic = translate_openai_to_anthropic( &openai );

    assert_eq!( anthropic[ "system" ], "You are helpful" );
    assert_eq!( anthropic[ "messages" ].as_array().unwrap().len(), 1 );
    assert_eq!( anthropic[ "messages" ][ 0 ][ "role" ], "user" );
  }

  #[test]
  fn stop_array_maps_to_stop_sequences()
  {
    let openai = json!({
      "model": "claude-sonnet-4-20250514",
      "messages": [ { "role": "user", "content": "Hi" } ],
      "stop": [ "END", "STOP" ],
    });

    let anthropic = translate_openai_to_anthropic( &openai );
    assert_eq!( anthropic[ "stop_sequences" ], json!( [ "END", "STOP" ] ) );
  }

  #[test]
  fn stop_string_is_wrapped_in_an_array()
  {
    let openai = json!({
      "model": "claude-sonnet-4-20250514",
      "messages": [ { "role": "user", "content": "Hi" } ],
      "stop": "END",
    });

    let anthropic = translate_openai_to_anthropic( &openai );
    assert_eq!( anthropic[ "stop_sequences" ], json!( [ "END" ] ) );
  }

  #[test]
  fn missing_max_tokens_defaults_to_4096()
  {
    let openai = json!({
      "model": "claude-sonnet-4-20250514",
      "messages": [ { "role": "user", "content": "Hi" } ],
    });

    let anthropic = translate_openai_to_anthropic( &openai );
    assert_eq!( anthropic[ "max_tokens" ], 4096 );
  }

  #[test]
  fn normalize_for_target_passes_through_same_provider_family()
  {
    let body = json!({ "model": "gpt-4o", "messages": [] });
    let out = normalize_for_target( "openai", "openai", &body );
    assert_eq!( out, body );
  }

  #[test]
  fn normalize_for_target_translates_when_crossing_from_openai()
  {
    let body = json!({ "model": "gpt-4o", "messages": [ { "role": "user", "content": "hi" } ] });
    let out = normalize_for_target( "openai", "anthropic", &body );
    assert_eq!( out[ "max_tokens" ], 4096 );
    assert_eq!( out[ "messages" ][ 0 ][ "role" ], "user" );
  }

  #[test]
  fn normalize_for_target_leaves_non_openai_origin_untouched()
  {
    let body = json!({ "model": "claude-sonnet-4-20250514", "messages": [] });
    let out = normalize_for_target( "anthropic", "google", &body );
    assert_eq!( out, body );
  }
}
