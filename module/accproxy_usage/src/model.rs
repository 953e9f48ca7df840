//! The `UsageRecord` entity, per §3: one row emitted per completed request, regardless of
//! where in the pipeline it terminated.

use accproxy_cost::TokenUsage;
use accproxy_types::TenantId;
use serde_json::Value;
use std::collections::HashMap;

/// A single request's accounting record. Every terminal pipeline state — success, budget
/// block, security block, upstream failure — produces exactly one of these (invariant iii).
#[derive( Debug, Clone )]
pub struct UsageRecord
{
  pub id: String,
  pub tenant_id: TenantId,
  pub agent_id: Option< String >,
  pub occurred_at_unix: i64,
  pub provider: String,
  pub requested_model: String,
  pub effective_model: String,
  pub endpoint: String,
  pub usage: TokenUsage,
  pub cost_usd_micros: u64,
  pub usage_estimated: bool,
  pub latency_ms: u64,
  pub status_code: u16,
  pub error_text: Option< String >,
  pub streaming: bool,
  pub metadata: HashMap< String, Value >,
}

impl UsageRecord
{
  /// A record with every token/cost field zeroed, for a request that failed before usage
  /// could be observed (e.g. rejected at auth, rate limit, or budget). Per §4.10: "every
  /// terminal state ... emits a UsageRecord (with zeros where unknown)".
  pub fn zeroed(
    id: String,
    tenant_id: TenantId,
    agent_id: Option< String >,
    occurred_at_unix: i64,
    provider: String,
    requested_model: String,
    endpoint: String,
    status_code: u16,
    error_text: Option< String >,
  ) -> Self
  {
    Self
    {
      id,
      tenant_id,
      agent_id,
      occurred_at_unix,
      provider,
      effective_model: requested_model.clone(),
      requested_model,
      endpoint,
      usage: TokenUsage::default(),
      cost_usd_micros: 0,
      usage_estimated: false,
      latency_ms: 0,
      status_code,
      error_text,
      streaming: false,
      metadata: HashMap::new(),
    }
  }
}
