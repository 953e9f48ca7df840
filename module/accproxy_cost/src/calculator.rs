//! Cost Calculator: fixed-point USD arithmetic over the four token classes, per §4.6.
//!
//! Grounded in the original `calculate_cost`: `regular_input = max(0, input - cache_creation -
//! cache_read)` because providers report `input_tokens`/`usage.input_tokens` as the grand
//! total including any cache-class tokens, not as a disjoint "regular" count.

use crate::converter::{ micros_to_usd, usd_to_micros, MICROS_PER_USD };
use crate::pricing::{ Model, PricingTable };

/// Token counts observed for a single request, across the four priced classes.
#[derive( Debug, Clone, Copy, Default )]
pub struct TokenUsage
{
  pub input_tokens: u64,
  pub output_tokens: u64,
  pub cache_creation_tokens: u64,
  pub cache_read_tokens: u64,
}

impl TokenUsage
{
  /// Total input + output, the figure reported on `x-acc-tokens`.
  pub fn total( &self ) -> u64
  {
    self.input_tokens + self.output_tokens
  }
}

/// Where the prices used for a cost computation came from.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum PricingSource
{
  Known,
  Estimated,
}

impl PricingSource
{
  pub fn as_str( self ) -> &'static str
  {
    match self
    {
      Self::Known => "known",
      Self::Estimated => "estimated",
    }
  }
}

/// Result of a cost computation: the rounded USD amount plus the provenance of the prices
/// used, so the caller can record `pricing_source` and emit a `pricing_missing` warning.
#[derive( Debug, Clone, Copy )]
pub struct CostResult
{
  pub cost_usd_micros: u64,
  pub source: PricingSource,
}

impl CostResult
{
  pub fn cost_usd( &self ) -> f64
  {
    micros_to_usd( self.cost_usd_micros )
  }
}

/// Computes cost for observed usage against a pricing table, falling back to the conservative
/// default model (and `PricingSource::Estimated`) for an unknown `(provider, model)`.
pub fn calculate_cost( table: &PricingTable, provider: &str, model: &str, usage: TokenUsage ) -> CostResult
{
  let ( priced_model, source ) = match table.get( provider, model )
  {
    Some( m ) => ( m, PricingSource::Known ),
    None =>
    {
      tracing::warn!( provider, model, "pricing_missing: using conservative default rates" );
      ( Model::fallback(), PricingSource::Estimated )
    }
  };

  CostResult { cost_usd_micros: cost_micros_for_model( &priced_model, usage ), source }
}

/// Cost for a request's usage given an already-resolved `Model`; used by the budget engine
/// when comparing downgrade targets, where the pricing lookup has already happened.
pub fn cost_micros_for_model( model: &Model, usage: TokenUsage ) -> u64
{
  let regular_input = usage.input_tokens
    .saturating_sub( usage.cache_creation_tokens )
    .saturating_sub( usage.cache_read_tokens );

  // Each component computed in micros directly (tokens * price_per_token * 1e6) and summed
  // before a single final rounding step, so intermediate components never round independently.
  let micros =
    regular_input as f64 * model.input_cost_per_token() * MICROS_PER_USD as f64
    + usage.output_tokens as f64 * model.output_cost_per_token() * MICROS_PER_USD as f64
    + usage.cache_creation_tokens as f64 * model.cache_creation_cost_per_token() * MICROS_PER_USD as f64
    + usage.cache_read_tokens as f64 * model.cache_read_cost_per_token() * MICROS_PER_USD as f64;

  usd_to_micros( micros / MICROS_PER_USD as f64 )
}

/// Pre-flight cost estimate for the budget engine's `evaluate` path, given only an estimated
/// input-token count and an assumed output length (the extractor has not run yet).
pub fn estimate_request_cost( table: &PricingTable, provider: &str, model: &str, estimated_input_tokens: u64, assumed_output_tokens: u64 ) -> CostResult
{
  calculate_cost( table, provider, model, TokenUsage
  {
    input_tokens: estimated_input_tokens,
    output_tokens: assumed_output_tokens,
    cache_creation_tokens: 0,
    cache_read_tokens: 0,
  } )
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn happy_buffered_scenario_matches_expected_cost()
  {
    // Scenario 1 from the external interface scenarios: unknown model, 10 input + 20 output
    // tokens at $3/$15 per MTok yields 0.000030 + 0.000300 = 0.000330 USD.
    let table = PricingTable::new().unwrap();
    let result = calculate_cost( &table, "anthropic", "made-up-model", TokenUsage
    {
      input_tokens: 10,
      output_tokens: 20,
      cache_creation_tokens: 0,
      cache_read_tokens: 0,
    } );

    assert_eq!( result.source, PricingSource::Estimated );
    assert!( ( result.cost_usd() - 0.000_330 ).abs() < 1e-9 );
  }

  #[test]
  fn regular_input_excludes_cache_classes()
  {
    let table = PricingTable::new().unwrap();
    // input_tokens is the grand total (12 = 8 cache-read + 4 regular), per §4.6.
    let with_cache = calculate_cost( &table, "anthropic", "claude-sonnet-4-20250514", TokenUsage
    {
      input_tokens: 12,
      output_tokens: 0,
      cache_creation_tokens: 0,
      cache_read_tokens: 8,
    } );
    let regular_only = calculate_cost( &table, "anthropic", "claude-sonnet-4-20250514", TokenUsage
    {
      input_tokens: 4,
      output_tokens: 0,
      cache_creation_tokens: 0,
      cache_read_tokens: 0,
    } );

    // 4 regular-priced tokens plus 8 cache-read-priced tokens, not 12 regular-priced tokens.
    assert!( with_cache.cost_usd_micros < regular_only.cost_usd_micros * 3 );
    assert!( with_cache.cost_usd_micros > 0 );
  }

  #[test]
  fn known_model_reports_known_source()
  {
    let table = PricingTable::new().unwrap();
    let result = calculate_cost( &table, "anthropic", "claude-sonnet-4-20250514", TokenUsage
    {
      input_tokens: 100,
      output_tokens: 100,
      cache_creation_tokens: 0,
      cache_read_tokens: 0,
    } );
    assert_eq!( result.source, PricingSource::Known );
  }

  #[test]
  fn total_tokens_sums_input_and_output_only()
  {
    let usage = TokenUsage { input_tokens: 12, output_tokens: 40, cache_creation_tokens: 0, cache_read_tokens: 8 };
    assert_eq!( usage.total(), 52 );
  }
}
