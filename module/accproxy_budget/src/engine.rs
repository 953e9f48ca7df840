//! Budget Engine: `evaluate` (cached, hot-path) and `settle` (authoritative, idempotent), per §4.3.

use crate::model::Budget;
use crate::store::BudgetStore;
use accproxy_cost::PricingTable;
use accproxy_kv::{ budget_cache_key, KvStore };
use accproxy_types::{ BudgetAction, BudgetId, TenantId };
use std::sync::Arc;
use std::time::Duration;

/// Snapshot TTL per §4.3: short enough that over-commit windows stay bounded, long enough
/// that the hot path doesn't hit the authoritative store on every request.
const SNAPSHOT_CACHE_TTL: Duration = Duration::from_secs( 30 );

/// Bounded number of settlement retries before a persistent failure escalates to a critical
/// alert, per §4.3 and §7.
const SETTLEMENT_MAX_RETRIES: u32 = 5;

/// The outcome of evaluating a request against every budget that applies to it.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum Decision
{
  Allow,
  AllowWithDowngrade { target_model: String },
  Block { budget_name: String },
}

/// A single matched budget, carried alongside the overall `Decision` so `settle` knows
/// exactly which budgets to debit without re-evaluating scope matches from scratch.
#[derive( Debug, Clone )]
pub struct MatchedBudget
{
  pub budget_id: BudgetId,
  pub name: String,
}

/// Result of `evaluate`: the decision plus every budget that matched (for settlement).
#[derive( Debug, Clone )]
pub struct Evaluation
{
  pub decision: Decision,
  pub matched: Vec< MatchedBudget >,
}

#[derive( Debug, serde::Serialize, serde::Deserialize )]
struct BudgetSnapshot
{
  budget_id: String,
  name: String,
  limit_micros: u64,
  current_spend_micros: u64,
  warn_micros: u64,
  critical_micros: u64,
  action: SnapshotAction,
}

#[derive( Debug, Clone, serde::Serialize, serde::Deserialize )]
enum SnapshotAction
{
  Alert,
  Block,
  Downgrade { target_model: String },
}

impl From< &BudgetAction > for SnapshotAction
{
  fn from( action: &BudgetAction ) -> Self
  {
    match action
    {
      BudgetAction::Alert => Self::Alert,
      BudgetAction::Block => Self::Block,
      BudgetAction::Downgrade { target_model } => Self::Downgrade { target_model: target_model.clone() },
    }
  }
}

/// Evaluates budgets and settles actual spend after the fact. Holds no per-request state;
/// safe to share behind an `Arc` across the whole pipeline.
pub struct BudgetEngine< K: KvStore >
{
  store: Arc< BudgetStore >,
  kv: Arc< K >,
  pricing: Arc< PricingTable >,
}

impl< K: KvStore > BudgetEngine< K >
{
  pub fn new( store: Arc< BudgetStore >, kv: Arc< K >, pricing: Arc< PricingTable > ) -> Self
  {
    Self { store, kv, pricing }
  }

  /// Evaluates every active budget matching `(tenant, agent, model)` against a pre-flight
  /// cost estimate. Falls back to the authoritative store on a cache miss, refreshing the
  /// cache entry for subsequent calls within the TTL.
  pub async fn evaluate(
    &self,
    tenant_id: &TenantId,
    agent_id: Option< &str >,
    provider: &str,
    model: &str,
    estimated_cost_micros: u64,
    now_unix: i64,
  ) -> Evaluation
  {
    let budgets = match self.load_matching_budgets( tenant_id, model, agent_id, now_unix ).await
    {
      Ok( budgets ) => budgets,
      Err( error ) =>
      {
        // §4.3 / §7: evaluation failure fails open, recorded as a warning, never a black hole.
        tracing::warn!( %error, tenant = %tenant_id, "budget_unknown: evaluation store unreachable, failing open" );
        return Evaluation { decision: Decision::Allow, matched: Vec::new() };
      }
    };

    let mut matched = Vec::with_capacity( budgets.len() );
    let mut downgrade_candidates: Vec< String > = Vec::new();
    let mut blocked: Option< String > = None;

    for snapshot in &budgets
    {
      matched.push( MatchedBudget { budget_id: BudgetId::parse( &snapshot.budget_id ).expect( "cached budget id is well-formed" ), name: snapshot.name.clone() } );

      let projected = snapshot.current_spend_micros + estimated_cost_micros;

      if projected > snapshot.warn_micros && projected <= snapshot.critical_micros
      {
        let spent_usd = projected as f64 / 1_000_000.0;
        let limit_usd = snapshot.critical_micros as f64 / 1_000_000.0;
        accproxy_telemetry::log_budget_warning( agent_id.unwrap_or( tenant_id.as_str() ), spent_usd, limit_usd );
      }

      if projected > snapshot.critical_micros
      {
        match &snapshot.action
        {
          SnapshotAction::Block if blocked.is_none() => blocked = Some( snapshot.name.clone() ),
          SnapshotAction::Downgrade { target_model } => downgrade_candidates.push( target_model.clone() ),
          SnapshotAction::Alert | SnapshotAction::Block => {}
        }
      }
    }

    // Precedence: block > downgrade > allow.
    let decision = if let Some( budget_name ) = blocked
    {
      Decision::Block { budget_name }
    }
    else if !downgrade_candidates.is_empty()
    {
      Decision::AllowWithDowngrade { target_model: self.cheapest_target( provider, &downgrade_candidates ) }
    }
    else
    {
      Decision::Allow
    };

    Evaluation { decision, matched }
  }

  /// Picks the cheapest downgrade target (by input-token price) among candidates requested
  /// by different matched budgets. See the grounding ledger's open-question resolution.
  fn cheapest_target( &self, provider: &str, candidates: &[ String ] ) -> String
  {
    candidates.iter()
      .min_by( |a, b|
      {
        let price_a = self.pricing.get( provider, a ).map_or( f64::MAX, |m| m.input_cost_per_token() );
        let price_b = self.pricing.get( provider, b ).map_or( f64::MAX, |m| m.input_cost_per_token() );
        price_a.partial_cmp( &price_b ).unwrap_or( std::cmp::Ordering::Equal )
      } )
      .cloned()
      .unwrap_or_else( || candidates[ 0 ].clone() )
  }

  async fn load_matching_budgets( &self, tenant_id: &TenantId, model: &str, agent_id: Option< &str >, now_unix: i64 ) -> accproxy_types::Result< Vec< BudgetSnapshot > >
  {
    let mut snapshots = Vec::new();
    let all = self.store.active_budgets_for_tenant( tenant_id, now_unix ).await?;

    for budget in all.into_iter().filter( |b| b.matches( model, agent_id, None ) )
    {
      snapshots.push( self.cached_snapshot( tenant_id, &budget ).await );
    }

    Ok( snapshots )
  }

  async fn cached_snapshot( &self, tenant_id: &TenantId, budget: &Budget ) -> BudgetSnapshot
  {
    let key = budget_cache_key( tenant_id.as_str(), Some( budget.id.as_str() ) );

    if let Ok( Some( raw ) ) = self.kv.get( &key ).await
    {
      if let Ok( cached ) = serde_json::from_str::< BudgetSnapshot >( &raw )
      {
        return cached;
      }
    }

    let snapshot = BudgetSnapshot
    {
      budget_id: budget.id.as_str().to_string(),
      name: budget.name.clone(),
      limit_micros: budget.limit_micros,
      current_spend_micros: budget.current_spend_micros,
      warn_micros: budget.warn_threshold_micros(),
      critical_micros: budget.critical_threshold_micros(),
      action: SnapshotAction::from( &budget.action ),
    };

    if let Ok( serialized ) = serde_json::to_string( &snapshot )
    {
      let _ = self.kv.setex( &key, SNAPSHOT_CACHE_TTL, &serialized ).await;
    }

    snapshot
  }

  /// Debits `actual_cost_micros` from every matched budget, idempotent per `(request_id,
  /// budget_id)`. On authoritative-store failure, retries with exponential backoff up to a
  /// bounded number of attempts before escalating to a critical alert (§4.3, §7).
  pub async fn settle( &self, request_id: &str, tenant_id: &TenantId, matched: &[ MatchedBudget ], actual_cost_micros: u64 )
  {
    for budget in matched
    {
      let mut attempt = 0;
      loop
      {
        match self.store.settle_one( request_id, &budget.budget_id, actual_cost_micros ).await
        {
          Ok( _applied ) =>
          {
            self.invalidate_cache_if_threshold_crossed( tenant_id, &budget.budget_id ).await;
            break;
          }
          Err( error ) =>
          {
            attempt += 1;
            if attempt >= SETTLEMENT_MAX_RETRIES
            {
              tracing::error!( %error, request_id, budget = %budget.name, "settlement failed after bounded retries — critical alert: budget spend may be understated" );
              break;
            }
            let backoff = Duration::from_millis( 50 * 2u64.pow( attempt ) );
            tracing::warn!( %error, request_id, budget = %budget.name, attempt, "settlement failed, retrying with backoff" );
            tokio::time::sleep( backoff ).await;
          }
        }
      }
    }
  }

  /// Per §4.3: "cache is invalidated on settlement when the snapshot's `current_spend`
  /// crosses a warn/crit threshold" — rather than tracking exact crossings, the simplest
  /// correct implementation is to always drop the cache entry after a successful debit, so
  /// the next evaluation re-reads the authoritative spend.
  async fn invalidate_cache_if_threshold_crossed( &self, tenant_id: &TenantId, budget_id: &BudgetId )
  {
    let key = budget_cache_key( tenant_id.as_str(), Some( budget_id.as_str() ) );
    let _ = self.kv.setex( &key, Duration::from_secs( 0 ), "" ).await;
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use crate::model::Budget;
  use accproxy_kv::InMemoryKvStore;
  use accproxy_types::{ BudgetPeriod, BudgetScope };
  use sqlx::sqlite::SqlitePoolOptions;

  async fn test_engine() -> ( BudgetEngine< InMemoryKvStore >, Arc< BudgetStore > )
  {
    let pool = SqlitePoolOptions::new().max_connections( 1 ).connect( "sqlite::memory:" ).await.unwrap();
    sqlx::raw_sql( include_str!( "../migrations/001_budgets.sql" ) ).execute( &pool ).await.unwrap();
    let store = Arc::new( BudgetStore::from_pool( pool ) );
    let kv = Arc::new( InMemoryKvStore::new() );
    let pricing = Arc::new( PricingTable::new().unwrap() );
    ( BudgetEngine::new( store.clone(), kv, pricing ), store )
  }

  fn budget_fixture( tenant_id: &TenantId, limit_usd: f64, spend_usd: f64, action: BudgetAction ) -> Budget
  {
    Budget
    {
      id: BudgetId::generate(),
      tenant_id: tenant_id.clone(),
      name: "Monthly".to_string(),
      scope: BudgetScope::Global,
      period: BudgetPeriod::Monthly,
      limit_micros: ( limit_usd * 1_000_000.0 ) as u64,
      current_spend_micros: ( spend_usd * 1_000_000.0 ) as u64,
      reset_at_unix: i64::MAX,
      action,
      warn_percent: 80,
      critical_percent: 100,
      is_active: true,
    }
  }

  #[tokio::test]
  async fn downgrade_scenario_rewrites_effective_model()
  {
    // Scenario 3: limit=$1.00, spend=$0.95, action=downgrade to claude-haiku.
    let ( engine, store ) = test_engine().await;
    let tenant_id = TenantId::generate();
    let budget = budget_fixture( &tenant_id, 1.00, 0.95, BudgetAction::Downgrade { target_model: "claude-haiku".to_string() } );
    store.upsert( &budget ).await.unwrap();

    let evaluation = engine.evaluate( &tenant_id, None, "anthropic", "claude-sonnet-4-20250514", 100_000, 0 ).await;
    assert_eq!( evaluation.decision, Decision::AllowWithDowngrade { target_model: "claude-haiku".to_string() } );
  }

  #[tokio::test]
  async fn block_scenario_denies_the_request()
  {
    // Scenario 4: limit=$1.00, spend=$1.00, action=block.
    let ( engine, store ) = test_engine().await;
    let tenant_id = TenantId::generate();
    let budget = budget_fixture( &tenant_id, 1.00, 1.00, BudgetAction::Block );
    store.upsert( &budget ).await.unwrap();

    let evaluation = engine.evaluate( &tenant_id, None, "anthropic", "claude-sonnet-4-20250514", 1, 0 ).await;
    assert_eq!( evaluation.decision, Decision::Block { budget_name: "Monthly".to_string() } );
  }

  #[tokio::test]
  async fn under_limit_allows_without_downgrade()
  {
    let ( engine, store ) = test_engine().await;
    let tenant_id = TenantId::generate();
    let budget = budget_fixture( &tenant_id, 100.00, 0.0, BudgetAction::Block );
    store.upsert( &budget ).await.unwrap();

    let evaluation = engine.evaluate( &tenant_id, None, "anthropic", "claude-sonnet-4-20250514", 330, 0 ).await;
    assert_eq!( evaluation.decision, Decision::Allow );
  }

  #[tokio::test]
  async fn settlement_is_idempotent_per_request_id()
  {
    let ( engine, store ) = test_engine().await;
    let tenant_id = TenantId::generate();
    let budget = budget_fixture( &tenant_id, 100.00, 0.0, BudgetAction::Block );
    store.upsert( &budget ).await.unwrap();

    let matched = vec![ MatchedBudget { budget_id: budget.id.clone(), name: budget.name.clone() } ];
    engine.settle( "req_1", &tenant_id, &matched, 500_000 ).await;
    engine.settle( "req_1", &tenant_id, &matched, 500_000 ).await;

    assert_eq!( store.current_spend_micros( &budget.id ).await.unwrap(), 500_000 );
  }

  #[tokio::test]
  async fn settlement_accumulates_across_distinct_requests()
  {
    let ( engine, store ) = test_engine().await;
    let tenant_id = TenantId::generate();
    let budget = budget_fixture( &tenant_id, 100.00, 0.0, BudgetAction::Block );
    store.upsert( &budget ).await.unwrap();

    let matched = vec![ MatchedBudget { budget_id: budget.id.clone(), name: budget.name.clone() } ];
    engine.settle( "req_1", &tenant_id, &matched, 500_000 ).await;
    engine.settle( "req_2", &tenant_id, &matched, 250_000 ).await;

    assert_eq!( store.current_spend_micros( &budget.id ).await.unwrap(), 750_000 );
  }

  #[tokio::test]
  async fn unmatched_tenant_has_no_matched_budgets()
  {
    let ( engine, _store ) = test_engine().await;
    let evaluation = engine.evaluate( &TenantId::generate(), None, "anthropic", "claude-sonnet-4-20250514", 100, 0 ).await;
    assert!( evaluation.matched.is_empty() );
    assert_eq!( evaluation.decision, Decision::Allow );
  }
}
