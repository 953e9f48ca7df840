//! Fixed-point microdollar arithmetic.
//!
//! 1 USD = 1,000,000 microdollars. Budget state is carried in microdollars (`u64`) rather
//! than `f64` so concurrent settlement via `fetch_add` cannot drift from floating-point
//! rounding error accumulating across thousands of requests.

/// Microdollars per USD.
pub const MICROS_PER_USD: u64 = 1_000_000;

/// Convert USD (f64) to microdollars (u64), rounding half away from zero — equivalent to
/// `ROUND_HALF_UP` for the non-negative amounts a cost can produce.
///
/// ```
/// use accproxy_cost::converter::usd_to_micros;
/// assert_eq!(usd_to_micros(1.50), 1_500_000);
/// assert_eq!(usd_to_micros(0.000001), 1);
/// ```
pub fn usd_to_micros( usd: f64 ) -> u64
{
  ( usd * MICROS_PER_USD as f64 ).round().max( 0.0 ) as u64
}

/// Convert microdollars (u64) back to USD (f64) for display/response headers.
///
/// ```
/// use accproxy_cost::converter::micros_to_usd;
/// assert_eq!(micros_to_usd(1_500_000), 1.5);
/// assert_eq!(micros_to_usd(1), 0.000001);
/// ```
pub fn micros_to_usd( micros: u64 ) -> f64
{
  micros as f64 / MICROS_PER_USD as f64
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn round_trip_is_stable_for_whole_cents()
  {
    let usd = 0.33;
    assert_eq!( micros_to_usd( usd_to_micros( usd ) ), 0.33 );
  }

  #[test]
  fn zero_is_zero()
  {
    assert_eq!( usd_to_micros( 0.0 ), 0 );
    assert_eq!( micros_to_usd( 0 ), 0.0 );
  }
}
