//! Pipeline Orchestrator: the shared phase sequence every provider handler drives through, per
//! §4.10. Order is fixed: rate limit -> request-phase security -> budget evaluate (against the
//! originally requested model) -> smart routing (against the possibly-downgraded model) ->
//! dispatch (in `handlers.rs`) -> response-phase security -> settlement -> usage logging.

use crate::state::AppState;
use accproxy_budget::{ Decision, MatchedBudget };
use accproxy_cost::{ calculate_cost, estimate_request_cost, PricingSource, TokenUsage };
use accproxy_router::{ RouteRequest, RoutingMetadata };
use accproxy_security::detector::DetectionContext;
use accproxy_security::model::Direction;
use accproxy_types::{ DetectionLevel, Error, Provider, RequestId, Result, TenantId };
use accproxy_usage::UsageRecord;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Assumed output length used only for the budget engine's pre-flight cost estimate; the real
/// cost is settled later from the usage extractor's actual counts. Kept distinct from the
/// router's own savings-estimate constant since the two phases could reasonably diverge.
const ASSUMED_OUTPUT_TOKENS_FOR_BUDGET_ESTIMATE: u64 = 500;

/// Everything that identifies one in-flight request across every pipeline phase.
pub struct PipelineContext
{
  pub request_id: RequestId,
  pub tenant_id: TenantId,
  pub agent_id: Option< String >,
  pub fingerprint: String,
  pub provider: Provider,
  pub endpoint: &'static str,
  pub detection_level: DetectionLevel,
  pub started: Instant,
}

impl PipelineContext
{
  pub fn new( tenant_id: TenantId, agent_id: Option< String >, fingerprint: String, provider: Provider, endpoint: &'static str, detection_level: DetectionLevel ) -> Self
  {
    Self { request_id: RequestId::generate(), tenant_id, agent_id, fingerprint, provider, endpoint, detection_level, started: Instant::now() }
  }

  pub fn detection_context( &self ) -> DetectionContext
  {
    DetectionContext { tenant_id: self.tenant_id.as_str().to_string(), agent_id: self.agent_id.clone(), extra: HashMap::new() }
  }

  pub fn elapsed_ms( &self ) -> u64
  {
    self.started.elapsed().as_millis() as u64
  }
}

/// Checks the fixed-window rate limit for this request's credential fingerprint.
pub async fn enforce_rate_limit( state: &AppState, fingerprint: &str ) -> Result< u32 >
{
  let decision = state.rate_limiter.check( fingerprint ).await;
  if !decision.allowed
  {
    return Err( Error::RateLimited { remaining: decision.remaining } );
  }
  Ok( decision.remaining )
}

/// Runs request-phase security: sync detectors inline, then async detectors awaited in place
/// (per §5, a kill verdict on the request path must short-circuit before upstream dispatch,
/// unlike the streaming-response path where `submit_async` races the live pump instead).
pub async fn scan_request( state: &AppState, body: &Value, context: &DetectionContext, level: DetectionLevel ) -> Result< () >
{
  let sync_outcome = state.security.scan_request_sync( body, context, level );
  if sync_outcome.is_blocking()
  {
    return Err( blocking_error( &sync_outcome ) );
  }

  let async_outcome = state.security.scan_async( body, context, level, Direction::Request ).await;
  if async_outcome.is_blocking()
  {
    return Err( blocking_error( &async_outcome ) );
  }

  Ok( () )
}

fn blocking_error( outcome: &accproxy_security::ScanOutcome ) -> Error
{
  let threat = outcome.events.iter()
    .max_by_key( |e| e.action_taken )
    .map( |e| e.threat_type.as_str().to_string() )
    .unwrap_or_else( || "unknown".to_string() );
  Error::SecurityBlocked { threat }
}

/// Result of evaluating budgets and running the smart router against the (possibly
/// budget-downgraded) model.
pub struct RoutedRequest
{
  pub matched_budgets: Vec< MatchedBudget >,
  pub effective_provider: String,
  pub effective_model: String,
  pub routing_metadata: RoutingMetadata,
}

/// Evaluates every budget matching `(tenant, agent, original_model)`, applies a downgrade or
/// block per the engine's precedence, then runs the smart router against whichever model
/// survived budget evaluation. Per §4.10, budget evaluation always runs against the originally
/// requested model; the router is the second and final place the model can change.
#[allow(clippy::too_many_arguments)]
pub async fn evaluate_budget_and_route(
  state: &AppState,
  tenant_id: &TenantId,
  agent_id: Option< &str >,
  provider: Provider,
  original_model: &str,
  estimated_input_tokens: u64,
  now_unix: i64,
  route_request: &RouteRequest< '_ >,
) -> Result< RoutedRequest >
{
  let estimate = estimate_request_cost( &state.pricing, provider.as_str(), original_model, estimated_input_tokens, ASSUMED_OUTPUT_TOKENS_FOR_BUDGET_ESTIMATE );

  let evaluation = state.budget_engine.evaluate( tenant_id, agent_id, provider.as_str(), original_model, estimate.cost_usd_micros, now_unix ).await;

  let model_after_budget = match &evaluation.decision
  {
    Decision::Block { budget_name } => return Err( Error::BudgetExceeded { budget_name: budget_name.clone() } ),
    Decision::AllowWithDowngrade { target_model } => target_model.clone(),
    Decision::Allow => original_model.to_string(),
  };

  let mut routed_request = route_request.clone();
  routed_request.model = &model_after_budget;

  let outcome = state.router.route( tenant_id, provider.as_str(), &routed_request ).await;

  Ok( RoutedRequest
  {
    matched_budgets: evaluation.matched,
    effective_provider: outcome.effective_provider,
    effective_model: outcome.effective_model,
    routing_metadata: outcome.metadata,
  } )
}

/// Settles actual spend against every budget matched during evaluation. A no-op when nothing
/// matched, so callers can call this unconditionally.
pub async fn settle( state: &AppState, request_id: &str, tenant_id: &TenantId, matched: &[ MatchedBudget ], actual_cost_micros: u64 )
{
  if matched.is_empty()
  {
    return;
  }
  state.budget_engine.settle( request_id, tenant_id, matched, actual_cost_micros ).await;
}

/// Computes the actual cost for observed usage, warning if pricing fell back to the
/// conservative default rates (per §4.6's `pricing_missing` diagnostic).
pub fn cost_for_usage( state: &AppState, provider: &str, model: &str, usage: TokenUsage ) -> ( u64, PricingSource )
{
  let result = calculate_cost( &state.pricing, provider, model, usage );
  ( result.cost_usd_micros, result.source )
}

/// Builds the terminal `UsageRecord` for a completed request, success or failure alike (§3
/// invariant iii: exactly one record per completed request).
#[allow(clippy::too_many_arguments)]
pub fn build_usage_record(
  context: &PipelineContext,
  requested_model: &str,
  effective_model: &str,
  usage: TokenUsage,
  cost_usd_micros: u64,
  usage_estimated: bool,
  status_code: u16,
  error_text: Option< String >,
  streaming: bool,
) -> UsageRecord
{
  UsageRecord
  {
    id: context.request_id.as_str().to_string(),
    tenant_id: context.tenant_id.clone(),
    agent_id: context.agent_id.clone(),
    occurred_at_unix: now_unix(),
    provider: context.provider.as_str().to_string(),
    requested_model: requested_model.to_string(),
    effective_model: effective_model.to_string(),
    endpoint: context.endpoint.to_string(),
    usage,
    cost_usd_micros,
    usage_estimated,
    latency_ms: context.elapsed_ms(),
    status_code,
    error_text,
    streaming,
    metadata: HashMap::new(),
  }
}

/// Builds a zeroed usage record for a request that never reached the provider (rejected at
/// auth, rate limit, security, or budget).
pub fn build_rejected_usage_record( context: &PipelineContext, requested_model: &str, status_code: u16, error_text: String ) -> UsageRecord
{
  UsageRecord::zeroed(
    context.request_id.as_str().to_string(),
    context.tenant_id.clone(),
    context.agent_id.clone(),
    now_unix(),
    context.provider.as_str().to_string(),
    requested_model.to_string(),
    context.endpoint.to_string(),
    status_code,
    Some( error_text ),
  )
}

pub fn now_unix() -> i64
{
  std::time::SystemTime::now()
    .duration_since( std::time::UNIX_EPOCH )
    .expect( "system clock before unix epoch" )
    .as_secs() as i64
}

pub fn hour_of_day_utc() -> u8
{
  ( ( now_unix() / 3600 ) % 24 ) as u8
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn hour_of_day_is_within_range()
  {
    assert!( hour_of_day_utc() < 24 );
  }
}
