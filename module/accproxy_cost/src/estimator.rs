//! Pluggable, pre-flight token estimation used by the budget engine's `evaluate` path, before
//! a request has actually been sent upstream. Estimates are conservative upper bounds; the
//! usage extractor's authoritative counts are what settlement actually debits against.

/// A single chat message as the estimator sees it: just enough to approximate serialized size.
#[derive( Debug, Clone )]
pub struct EstimatorMessage
{
  pub role: String,
  pub content: String,
}

/// Produces a conservative input-token estimate for a not-yet-sent request.
pub trait TokenEstimator: Send + Sync
{
  fn estimate_input_tokens( &self, provider: &str, model: &str, messages: &[ EstimatorMessage ], system_prompt: Option< &str > ) -> u64;
}

/// Falls back to `len(serialized_content) / 4` when no provider-specific tokenizer is wired
/// in, per §4.5. Serialized content is role + content for every message, plus the system
/// prompt if present.
#[derive( Debug, Clone, Copy, Default )]
pub struct ByteLengthEstimator;

impl TokenEstimator for ByteLengthEstimator
{
  fn estimate_input_tokens( &self, _provider: &str, _model: &str, messages: &[ EstimatorMessage ], system_prompt: Option< &str > ) -> u64
  {
    let mut total_bytes = system_prompt.map( str::len ).unwrap_or( 0 );
    for message in messages
    {
      total_bytes += message.role.len() + message.content.len();
    }
    // Round up so the estimate stays conservative rather than under-counting a partial token.
    ( total_bytes as u64 ).div_ceil( 4 )
  }
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn empty_request_estimates_zero()
  {
    let estimator = ByteLengthEstimator;
    assert_eq!( estimator.estimate_input_tokens( "anthropic", "claude-sonnet-4-20250514", &[], None ), 0 );
  }

  #[test]
  fn estimate_rounds_up_partial_token()
  {
    let estimator = ByteLengthEstimator;
    let messages = [ EstimatorMessage { role: "user".into(), content: "hi".into() } ];
    // "user" (4) + "hi" (2) = 6 bytes -> ceil(6/4) = 2 tokens.
    assert_eq!( estimator.estimate_input_tokens( "anthropic", "claude-sonnet-4-20250514", &messages, None ), 2 );
  }

  #[test]
  fn system_prompt_counts_toward_estimate()
  {
    let estimator = ByteLengthEstimator;
    let with_system = estimator.estimate_input_tokens( "openai", "gpt-4o", &[], Some( "be helpful" ) );
    let without_system = estimator.estimate_input_tokens( "openai", "gpt-4o", &[], None );
    assert!( with_system > without_system );
  }
}
