//! Static `(provider, model) -> per-million-token prices` lookup.
//!
//! Pricing data is loaded from an embedded JSON asset at construction and held behind an
//! `ArcSwap` so reads never block a writer reloading the table (e.g. an operator pushing
//! updated prices) and a reload never blocks concurrent readers mid-request.

use arc_swap::ArcSwap;
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const PRICING_JSON: &str = include_str!( "../asset/pricing.json" );

/// Conservative fallback prices for an unknown `(provider, model)`, per §4.6: $3/MTok input,
/// $15/MTok output. Cache classes fall back to the same rate as their nearest neighbor.
pub const FALLBACK_INPUT_COST_PER_TOKEN: f64 = 0.000_003;
pub const FALLBACK_OUTPUT_COST_PER_TOKEN: f64 = 0.000_015;

/// Per-token prices for the four token classes a provider may report.
#[derive( Debug, Clone, Serialize, Deserialize, Default )]
pub struct Model
{
  #[serde( default )]
  input_cost_per_token: f64,
  #[serde( default )]
  output_cost_per_token: f64,
  #[serde( default )]
  cache_creation_cost_per_token: f64,
  #[serde( default )]
  cache_read_cost_per_token: f64,
  #[serde( default )]
  max_output_tokens: Option< u32 >,
}

impl Model
{
  pub fn input_cost_per_token( &self ) -> f64 { self.input_cost_per_token }
  pub fn output_cost_per_token( &self ) -> f64 { self.output_cost_per_token }
  pub fn cache_creation_cost_per_token( &self ) -> f64 { self.cache_creation_cost_per_token }
  pub fn cache_read_cost_per_token( &self ) -> f64 { self.cache_read_cost_per_token }
  pub fn max_output_tokens( &self ) -> Option< u32 > { self.max_output_tokens }

  fn has_valid_pricing( &self ) -> bool
  {
    self.input_cost_per_token > 0.0 || self.output_cost_per_token > 0.0
  }

  /// The conservative default model used for an unknown `(provider, model)` pair.
  pub fn fallback() -> Self
  {
    Self
    {
      input_cost_per_token: FALLBACK_INPUT_COST_PER_TOKEN,
      output_cost_per_token: FALLBACK_OUTPUT_COST_PER_TOKEN,
      cache_creation_cost_per_token: FALLBACK_INPUT_COST_PER_TOKEN,
      cache_read_cost_per_token: FALLBACK_INPUT_COST_PER_TOKEN,
      max_output_tokens: None,
    }
  }
}

/// Builds the `(provider, model)` lookup key used throughout the pricing table.
pub fn pricing_key( provider: &str, model: &str ) -> String
{
  format!( "{provider}/{model}" )
}

/// Thread-safe, hot-swappable pricing table.
pub struct PricingTable
{
  models: ArcSwap< HashMap< String, Model > >,
}

impl std::fmt::Debug for PricingTable
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "PricingTable" ).field( "models", &self.models.load().len() ).finish()
  }
}

impl Default for PricingTable
{
  fn default() -> Self
  {
    Self::new().expect( "embedded pricing.json must parse" )
  }
}

impl PricingTable
{
  /// Load the embedded pricing table.
  pub fn new() -> Result< Self, String >
  {
    let table = Self { models: ArcSwap::from_pointee( HashMap::new() ) };
    table.load_from_str( PRICING_JSON )?;
    Ok( table )
  }

  /// Replace the pricing table from a JSON string, e.g. for hot-reload or tests.
  pub fn load_from_str( &self, json_str: &str ) -> Result< (), String >
  {
    let raw: HashMap< String, Value > = serde_json::from_str( json_str )
      .map_err( |e| format!( "failed to parse pricing json: {e}" ) )?;

    let mut parsed = HashMap::with_capacity( raw.len() );
    for ( key, value ) in raw
    {
      if let Ok( model ) = serde_json::from_value::< Model >( value )
      {
        if model.has_valid_pricing()
        {
          parsed.insert( key, model );
        }
      }
    }

    self.models.store( Arc::new( parsed ) );
    Ok( () )
  }

  /// Look up pricing for `provider/model`. Returns `None` when unknown — callers apply the
  /// `Model::fallback()` default and record `pricing_source = "estimated"` themselves, per §4.6.
  pub fn get( &self, provider: &str, model: &str ) -> Option< Model >
  {
    self.models.load().get( &pricing_key( provider, model ) ).cloned()
  }
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn known_model_has_four_token_classes_priced()
  {
    let table = PricingTable::new().unwrap();
    let model = table.get( "anthropic", "claude-sonnet-4-20250514" ).unwrap();
    assert!( model.input_cost_per_token() > 0.0 );
    assert!( model.output_cost_per_token() > 0.0 );
    assert!( model.cache_creation_cost_per_token() > 0.0 );
    assert!( model.cache_read_cost_per_token() > 0.0 );
  }

  #[test]
  fn unknown_model_is_absent_and_falls_back()
  {
    let table = PricingTable::new().unwrap();
    assert!( table.get( "anthropic", "made-up-model" ).is_none() );
    let fallback = Model::fallback();
    assert_eq!( fallback.input_cost_per_token(), FALLBACK_INPUT_COST_PER_TOKEN );
  }

  #[test]
  fn reload_replaces_existing_entries()
  {
    let table = PricingTable::new().unwrap();
    table.load_from_str( r#"{"anthropic/custom": {"input_cost_per_token": 0.000001, "output_cost_per_token": 0.000002}}"# ).unwrap();
    assert!( table.get( "anthropic", "claude-sonnet-4-20250514" ).is_none() );
    assert!( table.get( "anthropic", "custom" ).is_some() );
  }
}
