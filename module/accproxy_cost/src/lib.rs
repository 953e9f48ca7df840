//! Pricing table, fixed-point USD conversion, and the cost calculator: the three pieces that
//! turn observed token usage into a microdollar amount the budget engine can settle against.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

pub mod pricing;
pub mod converter;

#[cfg(feature = "enabled")]
pub mod calculator;
#[cfg(feature = "enabled")]
pub mod estimator;

#[cfg(feature = "enabled")]
pub use calculator::{ calculate_cost, estimate_request_cost, CostResult, PricingSource, TokenUsage };
#[cfg(feature = "enabled")]
pub use estimator::{ ByteLengthEstimator, EstimatorMessage, TokenEstimator };
#[cfg(feature = "enabled")]
pub use pricing::PricingTable;
