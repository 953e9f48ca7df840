//! SQLite-backed routing rule store: ordered lookup by `(priority asc, created_at asc)` and
//! atomic statistics increments on application.

use crate::model::{ RoutingCondition, RoutingRule };
use accproxy_types::{ Error, Result, RoutingRuleId, TenantId };
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{ Row, SqlitePool };

const MIGRATION_SQL: &str = include_str!( "../migrations/001_routing_rules.sql" );

/// Authoritative routing-rule table.
pub struct RoutingRuleStore
{
  pool: SqlitePool,
}

impl std::fmt::Debug for RoutingRuleStore
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "RoutingRuleStore" ).finish_non_exhaustive()
  }
}

impl RoutingRuleStore
{
  pub async fn connect( database_url: &str ) -> Result< Self >
  {
    let pool = SqlitePoolOptions::new()
      .max_connections( 5 )
      .connect( database_url )
      .await
      .map_err( |e| Error::Internal( format!( "routing rule store connect failed: {e}" ) ) )?;

    sqlx::raw_sql( MIGRATION_SQL )
      .execute( &pool )
      .await
      .map_err( |e| Error::Internal( format!( "routing rule store migration failed: {e}" ) ) )?;

    Ok( Self { pool } )
  }

  pub fn from_pool( pool: SqlitePool ) -> Self
  {
    Self { pool }
  }

  /// Every active rule for `tenant_id`, ordered `(priority asc, created_at asc)` per §4.4.
  pub async fn active_rules_for_tenant( &self, tenant_id: &TenantId ) -> Result< Vec< RoutingRule > >
  {
    let rows = sqlx::query(
      "SELECT id, tenant_id, name, priority, condition_json, target_provider, target_model, \
              fallback_provider, fallback_model, reason, is_active, times_applied, estimated_savings_micros \
       FROM routing_rules WHERE tenant_id = $1 AND is_active = 1 ORDER BY priority ASC, created_at ASC"
    )
    .bind( tenant_id.as_str() )
    .fetch_all( &self.pool )
    .await
    .map_err( |e| Error::Internal( format!( "routing rule lookup failed: {e}" ) ) )?;

    rows.iter().map( row_to_rule ).collect()
  }

  /// Inserts or replaces a routing rule; used by provisioning flows and tests.
  pub async fn upsert( &self, rule: &RoutingRule, created_at_unix: i64 ) -> Result< () >
  {
    let condition_json = serde_json::to_string( &rule.condition )
      .map_err( |e| Error::Internal( format!( "condition serialization failed: {e}" ) ) )?;

    sqlx::query(
      "INSERT INTO routing_rules (id, tenant_id, name, priority, condition_json, target_provider, \
         target_model, fallback_provider, fallback_model, reason, is_active, times_applied, \
         estimated_savings_micros, created_at) \
       VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14) \
       ON CONFLICT(id) DO UPDATE SET name=excluded.name, priority=excluded.priority, \
         condition_json=excluded.condition_json, target_provider=excluded.target_provider, \
         target_model=excluded.target_model, fallback_provider=excluded.fallback_provider, \
         fallback_model=excluded.fallback_model, reason=excluded.reason, is_active=excluded.is_active"
    )
    .bind( rule.id.as_str() )
    .bind( rule.tenant_id.as_str() )
    .bind( &rule.name )
    .bind( rule.priority )
    .bind( condition_json )
    .bind( &rule.target_provider )
    .bind( &rule.target_model )
    .bind( &rule.fallback_provider )
    .bind( &rule.fallback_model )
    .bind( &rule.reason )
    .bind( i64::from( rule.is_active ) )
    .bind( rule.times_applied as i64 )
    .bind( rule.estimated_savings_micros as i64 )
    .bind( created_at_unix )
    .execute( &self.pool )
    .await
    .map_err( |e| Error::Internal( format!( "routing rule upsert failed: {e}" ) ) )?;

    Ok( () )
  }

  /// Atomically increments a rule's application counter and its running savings estimate.
  pub async fn record_application( &self, rule_id: &RoutingRuleId, savings_micros: u64 ) -> Result< () >
  {
    sqlx::query(
      "UPDATE routing_rules SET times_applied = times_applied + 1, \
         estimated_savings_micros = estimated_savings_micros + $1 WHERE id = $2"
    )
    .bind( savings_micros as i64 )
    .bind( rule_id.as_str() )
    .execute( &self.pool )
    .await
    .map_err( |e| Error::Internal( format!( "routing rule stats update failed: {e}" ) ) )?;

    Ok( () )
  }
}

fn row_to_rule( row: &sqlx::sqlite::SqliteRow ) -> Result< RoutingRule >
{
  let id = RoutingRuleId::parse( row.get::< String, _ >( "id" ) ).map_err( |e| Error::Internal( e.to_string() ) )?;
  let tenant_id = TenantId::parse( row.get::< String, _ >( "tenant_id" ) ).map_err( |e| Error::Internal( e.to_string() ) )?;
  let condition_json: String = row.get( "condition_json" );
  let condition: RoutingCondition = serde_json::from_str( &condition_json )
    .map_err( |e| Error::Internal( format!( "condition deserialization failed: {e}" ) ) )?;

  Ok( RoutingRule
  {
    id,
    tenant_id,
    name: row.get( "name" ),
    priority: row.get( "priority" ),
    condition,
    target_provider: row.get( "target_provider" ),
    target_model: row.get( "target_model" ),
    fallback_provider: row.get( "fallback_provider" ),
    fallback_model: row.get( "fallback_model" ),
    reason: row.get( "reason" ),
    is_active: row.get::< i64, _ >( "is_active" ) != 0,
    times_applied: row.get::< i64, _ >( "times_applied" ) as u64,
    estimated_savings_micros: row.get::< i64, _ >( "estimated_savings_micros" ) as u64,
  } )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use sqlx::sqlite::SqlitePoolOptions;

  async fn test_store() -> RoutingRuleStore
  {
    let pool = SqlitePoolOptions::new().max_connections( 1 ).connect( "sqlite::memory:" ).await.unwrap();
    sqlx::raw_sql( MIGRATION_SQL ).execute( &pool ).await.unwrap();
    RoutingRuleStore::from_pool( pool )
  }

  fn rule_fixture( tenant_id: &TenantId, priority: i64 ) -> RoutingRule
  {
    RoutingRule
    {
      id: RoutingRuleId::generate(),
      tenant_id: tenant_id.clone(),
      name: format!( "rule-{priority}" ),
      priority,
      condition: RoutingCondition::default(),
      target_provider: "anthropic".to_string(),
      target_model: "claude-haiku".to_string(),
      fallback_provider: None,
      fallback_model: None,
      reason: Some( "cost savings".to_string() ),
      is_active: true,
      times_applied: 0,
      estimated_savings_micros: 0,
    }
  }

  #[tokio::test]
  async fn rules_are_ordered_by_priority_then_created_at()
  {
    let store = test_store().await;
    let tenant_id = TenantId::generate();
    let low = rule_fixture( &tenant_id, 10 );
    let high = rule_fixture( &tenant_id, 5 );
    store.upsert( &low, 100 ).await.unwrap();
    store.upsert( &high, 200 ).await.unwrap();

    let rules = store.active_rules_for_tenant( &tenant_id ).await.unwrap();
    assert_eq!( rules[ 0 ].name, "rule-5" );
    assert_eq!( rules[ 1 ].name, "rule-10" );
  }

  #[tokio::test]
  async fn inactive_rules_are_excluded()
  {
    let store = test_store().await;
    let tenant_id = TenantId::generate();
    let mut rule = rule_fixture( &tenant_id, 10 );
    rule.is_active = false;
    store.upsert( &rule, 100 ).await.unwrap();

    assert!( store.active_rules_for_tenant( &tenant_id ).await.unwrap().is_empty() );
  }

  #[tokio::test]
  async fn record_application_increments_counters()
  {
    let store = test_store().await;
    let tenant_id = TenantId::generate();
    let rule = rule_fixture( &tenant_id, 10 );
    store.upsert( &rule, 100 ).await.unwrap();

    store.record_application( &rule.id, 50_000 ).await.unwrap();
    store.record_application( &rule.id, 25_000 ).await.unwrap();

    let rules = store.active_rules_for_tenant( &tenant_id ).await.unwrap();
    assert_eq!( rules[ 0 ].times_applied, 2 );
    assert_eq!( rules[ 0 ].estimated_savings_micros, 75_000 );
  }
}
