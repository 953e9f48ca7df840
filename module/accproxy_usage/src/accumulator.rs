//! Accumulates usage across an SSE stream's lifetime, summing Anthropic's split usage events
//! and falling back to a byte-count estimate when no terminal usage event ever arrives.

use crate::extractor::extract_stream_chunk;
use accproxy_cost::TokenUsage;

const DONE_SENTINEL: &str = "[DONE]";
const DATA_PREFIX: &str = "data: ";

/// Running usage state for one in-flight stream. The Stream Pump feeds it one raw SSE line at
/// a time; `finish` is called once the stream ends (normally, on error, or on kill).
#[derive( Debug, Default )]
pub struct StreamUsageAccumulator
{
  usage: TokenUsage,
  saw_terminal_usage: bool,
  bytes_seen: u64,
}

/// The final usage figure for a terminated stream, plus whether it is an authoritative count
/// or a byte-count estimate (per §4.7: "tokens are estimated from byte count ... flagged
/// `usage_estimated: true`").
#[derive( Debug, Clone, Copy )]
pub struct StreamUsageResult
{
  pub usage: TokenUsage,
  pub usage_estimated: bool,
}

impl StreamUsageAccumulator
{
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Feeds one raw line from the upstream body. Lines that aren't `data: ` frames, or that
  /// are the `[DONE]` sentinel, are counted toward the byte fallback but not parsed.
  pub fn record_line( &mut self, provider: &str, raw_line: &str )
  {
    self.bytes_seen += raw_line.len() as u64;

    let Some( data ) = raw_line.strip_prefix( DATA_PREFIX ) else { return };
    if data.trim() == DONE_SENTINEL
    {
      return;
    }

    let Ok( chunk ) = serde_json::from_str::< serde_json::Value >( data ) else { return };
    let Some( ( delta, terminal ) ) = extract_stream_chunk( provider, &chunk ) else { return };

    self.usage.input_tokens += delta.input_tokens;
    self.usage.output_tokens += delta.output_tokens;
    self.usage.cache_creation_tokens += delta.cache_creation_tokens;
    self.usage.cache_read_tokens += delta.cache_read_tokens;
    self.saw_terminal_usage |= terminal;
  }

  /// Finalizes the accumulated usage. If no terminal usage event was ever observed, estimates
  /// total tokens from the bytes relayed so far (`bytes/4`) and reports them as output tokens,
  /// since the input side is already known from `message_start` (Anthropic) or simply absent.
  pub fn finish( self ) -> StreamUsageResult
  {
    if self.saw_terminal_usage
    {
      return StreamUsageResult { usage: self.usage, usage_estimated: false };
    }

    let estimated_total = self.bytes_seen / 4;
    StreamUsageResult
    {
      usage: TokenUsage
      {
        input_tokens: self.usage.input_tokens,
        output_tokens: self.usage.output_tokens + estimated_total,
        cache_creation_tokens: self.usage.cache_creation_tokens,
        cache_read_tokens: self.usage.cache_read_tokens,
      },
      usage_estimated: true,
    }
  }
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn anthropic_stream_sums_start_and_delta_events()
  {
    let mut accumulator = StreamUsageAccumulator::new();
    accumulator.record_line( "anthropic", r#"data: {"type":"message_start","message":{"usage":{"input_tokens":100,"cache_creation_input_tokens":0,"cache_read_input_tokens":0}}}"# );
    accumulator.record_line( "anthropic", r#"data: {"type":"content_block_delta","delta":{"text":"hi"}}"# );
    accumulator.record_line( "anthropic", r#"data: {"type":"message_delta","usage":{"output_tokens":42}}"# );
    accumulator.record_line( "anthropic", "data: [DONE]" );

    let result = accumulator.finish();
    assert!( !result.usage_estimated );
    assert_eq!( result.usage.input_tokens, 100 );
    assert_eq!( result.usage.output_tokens, 42 );
  }

  #[test]
  fn openai_stream_reads_final_usage_chunk()
  {
    let mut accumulator = StreamUsageAccumulator::new();
    accumulator.record_line( "openai", r#"data: {"choices":[{"delta":{"content":"hi"}}]}"# );
    accumulator.record_line( "openai", r#"data: {"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5}}"# );
    accumulator.record_line( "openai", "data: [DONE]" );

    let result = accumulator.finish();
    assert!( !result.usage_estimated );
    assert_eq!( result.usage.input_tokens, 10 );
    assert_eq!( result.usage.output_tokens, 5 );
  }

  #[test]
  fn stream_without_terminal_usage_falls_back_to_byte_estimate()
  {
    let mut accumulator = StreamUsageAccumulator::new();
    accumulator.record_line( "openai", r#"data: {"choices":[{"delta":{"content":"some partial text that never gets a usage field"}}]}"# );

    let result = accumulator.finish();
    assert!( result.usage_estimated );
    assert!( result.usage.output_tokens > 0 );
  }

  #[test]
  fn malformed_json_line_is_ignored_without_panicking()
  {
    let mut accumulator = StreamUsageAccumulator::new();
    accumulator.record_line( "anthropic", "data: {not valid json" );
    let result = accumulator.finish();
    assert!( result.usage_estimated );
  }
}
