//! Usage Extractor: pulls authoritative token counts from a buffered response body or from an
//! in-flight SSE stream, per §4.7.

use accproxy_cost::TokenUsage;
use serde_json::Value;

/// Extracts token usage from a fully-buffered (non-streaming) response body.
pub fn extract_buffered( provider: &str, body: &Value ) -> Option< TokenUsage >
{
  match provider
  {
    "anthropic" => extract_anthropic_buffered( body ),
    "openai" => extract_openai_buffered( body ),
    "google" => extract_google_buffered( body ),
    _ => None,
  }
}

fn extract_anthropic_buffered( body: &Value ) -> Option< TokenUsage >
{
  let usage = body.get( "usage" )?;
  Some( TokenUsage
  {
    input_tokens: as_u64( usage, "input_tokens" ),
    output_tokens: as_u64( usage, "output_tokens" ),
    cache_creation_tokens: as_u64( usage, "cache_creation_input_tokens" ),
    cache_read_tokens: as_u64( usage, "cache_read_input_tokens" ),
  } )
}

fn extract_openai_buffered( body: &Value ) -> Option< TokenUsage >
{
  let usage = body.get( "usage" )?;
  let cache_read = usage.get( "prompt_tokens_details" ).and_then( |d| d.get( "cached_tokens" ) ).and_then( Value::as_u64 ).unwrap_or( 0 );
  Some( TokenUsage
  {
    input_tokens: as_u64( usage, "prompt_tokens" ),
    output_tokens: as_u64( usage, "completion_tokens" ),
    cache_creation_tokens: 0,
    cache_read_tokens: cache_read,
  } )
}

fn extract_google_buffered( body: &Value ) -> Option< TokenUsage >
{
  let usage = body.get( "usageMetadata" )?;
  Some( TokenUsage
  {
    input_tokens: as_u64( usage, "promptTokenCount" ),
    output_tokens: as_u64( usage, "candidatesTokenCount" ),
    cache_creation_tokens: 0,
    cache_read_tokens: as_u64( usage, "cachedContentTokenCount" ),
  } )
}

fn as_u64( value: &Value, field: &str ) -> u64
{
  value.get( field ).and_then( Value::as_u64 ).unwrap_or( 0 )
}

/// Incremental usage extraction from a single already-parsed SSE event chunk. Per §4.7,
/// Anthropic splits usage across two events that MUST be summed rather than overwritten;
/// other providers report the whole thing in one terminal chunk. Returns the delta to add to
/// the running total, and whether this chunk counts as having seen a terminal usage event.
pub fn extract_stream_chunk( provider: &str, chunk: &Value ) -> Option< ( TokenUsage, bool ) >
{
  match provider
  {
    "anthropic" => extract_anthropic_stream_chunk( chunk ),
    "openai" => extract_openai_stream_chunk( chunk ),
    "google" => extract_google_stream_chunk( chunk ),
    _ => None,
  }
}

fn extract_anthropic_stream_chunk( chunk: &Value ) -> Option< ( TokenUsage, bool ) >
{
  match chunk.get( "type" ).and_then( Value::as_str )?
  {
    "message_start" =>
    {
      let usage = chunk.get( "message" )?.get( "usage" )?;
      Some( ( TokenUsage
      {
        input_tokens: as_u64( usage, "input_tokens" ),
        output_tokens: 0,
        cache_creation_tokens: as_u64( usage, "cache_creation_input_tokens" ),
        cache_read_tokens: as_u64( usage, "cache_read_input_tokens" ),
      }, false ) )
    }
    "message_delta" =>
    {
      let usage = chunk.get( "usage" )?;
      Some( ( TokenUsage
      {
        input_tokens: 0,
        output_tokens: as_u64( usage, "output_tokens" ),
        cache_creation_tokens: 0,
        cache_read_tokens: 0,
      }, true ) )
    }
    _ => None,
  }
}

fn extract_openai_stream_chunk( chunk: &Value ) -> Option< ( TokenUsage, bool ) >
{
  extract_openai_buffered( chunk ).map( |usage| ( usage, true ) )
}

fn extract_google_stream_chunk( chunk: &Value ) -> Option< ( TokenUsage, bool ) >
{
  extract_google_buffered( chunk ).map( |usage| ( usage, true ) )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use serde_json::json;

  #[test]
  fn anthropic_buffered_reads_all_four_classes()
  {
    let body = json!({ "usage": { "input_tokens": 100, "output_tokens": 50, "cache_creation_input_tokens": 10, "cache_read_input_tokens": 20 } });
    let usage = extract_buffered( "anthropic", &body ).unwrap();
    assert_eq!( usage.input_tokens, 100 );
    assert_eq!( usage.output_tokens, 50 );
    assert_eq!( usage.cache_creation_tokens, 10 );
    assert_eq!( usage.cache_read_tokens, 20 );
  }

  #[test]
  fn openai_buffered_maps_cached_tokens_to_cache_read()
  {
    let body = json!({ "usage": { "prompt_tokens": 30, "completion_tokens": 15, "prompt_tokens_details": { "cached_tokens": 5 } } });
    let usage = extract_buffered( "openai", &body ).unwrap();
    assert_eq!( usage.input_tokens, 30 );
    assert_eq!( usage.output_tokens, 15 );
    assert_eq!( usage.cache_read_tokens, 5 );
  }

  #[test]
  fn google_buffered_reads_usage_metadata()
  {
    let body = json!({ "usageMetadata": { "promptTokenCount": 40, "candidatesTokenCount": 22, "cachedContentTokenCount": 8 } });
    let usage = extract_buffered( "google", &body ).unwrap();
    assert_eq!( usage.input_tokens, 40 );
    assert_eq!( usage.output_tokens, 22 );
    assert_eq!( usage.cache_read_tokens, 8 );
  }

  #[test]
  fn missing_usage_field_returns_none()
  {
    assert!( extract_buffered( "anthropic", &json!({}) ).is_none() );
  }

  #[test]
  fn anthropic_stream_message_start_carries_input_only()
  {
    let chunk = json!({ "type": "message_start", "message": { "usage": { "input_tokens": 100, "cache_creation_input_tokens": 5, "cache_read_input_tokens": 2 } } });
    let ( usage, terminal ) = extract_stream_chunk( "anthropic", &chunk ).unwrap();
    assert_eq!( usage.input_tokens, 100 );
    assert_eq!( usage.output_tokens, 0 );
    assert!( !terminal );
  }

  #[test]
  fn anthropic_stream_message_delta_carries_output_only()
  {
    let chunk = json!({ "type": "message_delta", "usage": { "output_tokens": 42 } });
    let ( usage, terminal ) = extract_stream_chunk( "anthropic", &chunk ).unwrap();
    assert_eq!( usage.input_tokens, 0 );
    assert_eq!( usage.output_tokens, 42 );
    assert!( terminal );
  }

  #[test]
  fn anthropic_summing_message_start_and_delta_yields_full_usage()
  {
    let start = json!({ "type": "message_start", "message": { "usage": { "input_tokens": 100 } } });
    let delta = json!({ "type": "message_delta", "usage": { "output_tokens": 42 } });
    let ( start_usage, _ ) = extract_stream_chunk( "anthropic", &start ).unwrap();
    let ( delta_usage, _ ) = extract_stream_chunk( "anthropic", &delta ).unwrap();
    assert_eq!( start_usage.input_tokens + delta_usage.input_tokens, 100 );
    assert_eq!( start_usage.output_tokens + delta_usage.output_tokens, 42 );
  }

  #[test]
  fn openai_stream_chunk_without_usage_is_none()
  {
    let chunk = json!({ "choices": [ { "finish_reason": "stop" } ] });
    assert!( extract_stream_chunk( "openai", &chunk ).is_none() );
  }
}
