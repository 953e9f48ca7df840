//! Smart Router: first-matching-rule evaluation, routing metadata, and application bookkeeping.

use crate::model::{ RouteRequest, RoutingRule };
use crate::store::RoutingRuleStore;
use accproxy_cost::{ estimate_request_cost, PricingTable };
use accproxy_types::{ RoutingRuleId, TenantId };

/// Assumed output length used only for the router's own savings estimate; the real cost is
/// settled later from the usage extractor's actual counts.
const ASSUMED_OUTPUT_TOKENS_FOR_SAVINGS_ESTIMATE: u64 = 500;

/// What the router decided, and why, per §4.4's `routing_metadata` contract.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct RoutingMetadata
{
  pub original_model: String,
  pub routed: bool,
  pub rule_id: Option< String >,
  pub reason: Option< String >,
}

/// The router's verdict: the provider/model to actually send upstream, plus metadata.
#[derive( Debug, Clone )]
pub struct RoutingOutcome
{
  pub effective_provider: String,
  pub effective_model: String,
  pub metadata: RoutingMetadata,
}

/// Evaluates routing rules against requests and records application statistics.
pub struct SmartRouter
{
  store: RoutingRuleStore,
  pricing: PricingTable,
}

impl SmartRouter
{
  pub fn new( store: RoutingRuleStore, pricing: PricingTable ) -> Self
  {
    Self { store, pricing }
  }

  /// Evaluates every active rule for `tenant_id` in priority order and applies the first
  /// match. Leaves the request untouched (and `routed: false`) when nothing matches or every
  /// matching rule targets the same model it already requested.
  pub async fn route( &self, tenant_id: &TenantId, original_provider: &str, request: &RouteRequest< '_ > ) -> RoutingOutcome
  {
    let rules = match self.store.active_rules_for_tenant( tenant_id ).await
    {
      Ok( rules ) => rules,
      Err( error ) =>
      {
        tracing::warn!( %error, tenant = %tenant_id, "routing rule lookup failed, request proceeds unrouted" );
        return self.unrouted_outcome( original_provider, request );
      }
    };

    for rule in &rules
    {
      if rule.matches( request ) && rule.target_model != request.model
      {
        self.record_application( rule, original_provider, request ).await;

        return RoutingOutcome
        {
          effective_provider: rule.target_provider.clone(),
          effective_model: rule.target_model.clone(),
          metadata: RoutingMetadata
          {
            original_model: request.model.to_string(),
            routed: true,
            rule_id: Some( rule.id.as_str().to_string() ),
            reason: rule.reason.clone(),
          },
        };
      }
    }

    self.unrouted_outcome( original_provider, request )
  }

  fn unrouted_outcome( &self, original_provider: &str, request: &RouteRequest< '_ > ) -> RoutingOutcome
  {
    RoutingOutcome
    {
      effective_provider: original_provider.to_string(),
      effective_model: request.model.to_string(),
      metadata: RoutingMetadata
      {
        original_model: request.model.to_string(),
        routed: false,
        rule_id: None,
        reason: None,
      },
    }
  }

  async fn record_application( &self, rule: &RoutingRule, original_provider: &str, request: &RouteRequest< '_ > )
  {
    let savings_micros = self.estimate_savings( original_provider, request.model, &rule.target_provider, &rule.target_model, request.token_estimate );

    if let Err( error ) = self.store.record_application( &rule.id, savings_micros ).await
    {
      tracing::warn!( %error, rule_id = %rule.id, "failed to record routing rule application stats" );
    }
  }

  fn estimate_savings( &self, original_provider: &str, original_model: &str, target_provider: &str, target_model: &str, estimated_input_tokens: u64 ) -> u64
  {
    let original_cost = estimate_request_cost( &self.pricing, original_provider, original_model, estimated_input_tokens, ASSUMED_OUTPUT_TOKENS_FOR_SAVINGS_ESTIMATE );
    let target_cost = estimate_request_cost( &self.pricing, target_provider, target_model, estimated_input_tokens, ASSUMED_OUTPUT_TOKENS_FOR_SAVINGS_ESTIMATE );
    original_cost.cost_usd_micros.saturating_sub( target_cost.cost_usd_micros )
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use crate::model::RoutingCondition;
  use sqlx::sqlite::SqlitePoolOptions;

  async fn test_router() -> SmartRouter
  {
    let pool = SqlitePoolOptions::new().max_connections( 1 ).connect( "sqlite::memory:" ).await.unwrap();
    sqlx::raw_sql( include_str!( "../migrations/001_routing_rules.sql" ) ).execute( &pool ).await.unwrap();
    let store = RoutingRuleStore::from_pool( pool );
    let pricing = PricingTable::new().unwrap();
    SmartRouter::new( store, pricing )
  }

  fn simple_request<'a>() -> RouteRequest< 'a >
  {
    RouteRequest
    {
      model: "claude-sonnet-4-20250514",
      message_count: 3,
      concatenated_content: "summarize please",
      token_estimate: 200,
      agent_id: None,
      hour_of_day_utc: 12,
    }
  }

  #[tokio::test]
  async fn matching_rule_rewrites_provider_and_model()
  {
    let router = test_router().await;
    let tenant_id = TenantId::generate();
    let rule = RoutingRule
    {
      id: RoutingRuleId::generate(),
      tenant_id: tenant_id.clone(),
      name: "cost-saver".to_string(),
      priority: 1,
      condition: RoutingCondition { content_keywords: Some( vec![ "summarize".to_string() ] ), ..Default::default() },
      target_provider: "anthropic".to_string(),
      target_model: "claude-haiku".to_string(),
      fallback_provider: None,
      fallback_model: None,
      reason: Some( "short summarization tasks route to a cheaper model".to_string() ),
      is_active: true,
      times_applied: 0,
      estimated_savings_micros: 0,
    };
    router.store.upsert( &rule, 1 ).await.unwrap();

    let outcome = router.route( &tenant_id, "anthropic", &simple_request() ).await;
    assert_eq!( outcome.effective_model, "claude-haiku" );
    assert!( outcome.metadata.routed );
    assert_eq!( outcome.metadata.original_model, "claude-sonnet-4-20250514" );
    assert_eq!( outcome.metadata.rule_id, Some( rule.id.as_str().to_string() ) );

    let rules = router.store.active_rules_for_tenant( &tenant_id ).await.unwrap();
    assert_eq!( rules[ 0 ].times_applied, 1 );
  }

  #[tokio::test]
  async fn no_matching_rule_leaves_request_unrouted()
  {
    let router = test_router().await;
    let tenant_id = TenantId::generate();
    let outcome = router.route( &tenant_id, "anthropic", &simple_request() ).await;
    assert!( !outcome.metadata.routed );
    assert_eq!( outcome.effective_model, "claude-sonnet-4-20250514" );
  }

  #[tokio::test]
  async fn rule_targeting_the_same_model_does_not_count_as_routed()
  {
    let router = test_router().await;
    let tenant_id = TenantId::generate();
    let rule = RoutingRule
    {
      id: RoutingRuleId::generate(),
      tenant_id: tenant_id.clone(),
      name: "noop".to_string(),
      priority: 1,
      condition: RoutingCondition::default(),
      target_provider: "anthropic".to_string(),
      target_model: "claude-sonnet-4-20250514".to_string(),
      fallback_provider: None,
      fallback_model: None,
      reason: None,
      is_active: true,
      times_applied: 0,
      estimated_savings_micros: 0,
    };
    router.store.upsert( &rule, 1 ).await.unwrap();

    let outcome = router.route( &tenant_id, "anthropic", &simple_request() ).await;
    assert!( !outcome.metadata.routed );
  }

  #[tokio::test]
  async fn matching_rule_can_rewrite_the_target_provider()
  {
    let router = test_router().await;
    let tenant_id = TenantId::generate();
    let rule = RoutingRule
    {
      id: RoutingRuleId::generate(),
      tenant_id: tenant_id.clone(),
      name: "cross-provider".to_string(),
      priority: 1,
      condition: RoutingCondition { content_keywords: Some( vec![ "summarize".to_string() ] ), ..Default::default() },
      target_provider: "openai".to_string(),
      target_model: "gpt-4o-mini".to_string(),
      fallback_provider: None,
      fallback_model: None,
      reason: Some( "route cheap summarization to a different provider".to_string() ),
      is_active: true,
      times_applied: 0,
      estimated_savings_micros: 0,
    };
    router.store.upsert( &rule, 1 ).await.unwrap();

    let outcome = router.route( &tenant_id, "anthropic", &simple_request() ).await;
    assert_eq!( outcome.effective_provider, "openai" );
    assert_eq!( outcome.effective_model, "gpt-4o-mini" );
    assert!( outcome.metadata.routed );
  }
}
