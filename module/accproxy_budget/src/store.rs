//! SQLite-backed authoritative budget store: CRUD, period rollover, and the atomic
//! increment used by settlement.

use crate::model::Budget;
use accproxy_reliability::CircuitBreaker;
use accproxy_types::{ BudgetAction, BudgetId, BudgetPeriod, BudgetScope, Error, Result, TenantId };
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{ Row, SqlitePool };

const MIGRATION_SQL: &str = include_str!( "../migrations/001_budgets.sql" );

/// §4.14: one breaker per authoritative store, tripped after this many consecutive failures.
const BREAKER_FAILURE_THRESHOLD: u32 = 5;
const BREAKER_COOLDOWN_SECS: u64 = 30;
const BREAKER_SERVICE_KEY: &str = "budget_store";

/// Authoritative budget table, plus the settlement idempotency ledger.
pub struct BudgetStore
{
  pool: SqlitePool,
  breaker: CircuitBreaker,
}

impl std::fmt::Debug for BudgetStore
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "BudgetStore" ).finish_non_exhaustive()
  }
}

impl BudgetStore
{
  pub async fn connect( database_url: &str ) -> Result< Self >
  {
    let pool = SqlitePoolOptions::new()
      .max_connections( 5 )
      .connect( database_url )
      .await
      .map_err( |e| Error::Internal( format!( "budget store connect failed: {e}" ) ) )?;

    sqlx::raw_sql( MIGRATION_SQL )
      .execute( &pool )
      .await
      .map_err( |e| Error::Internal( format!( "budget store migration failed: {e}" ) ) )?;

    Ok( Self { pool, breaker: CircuitBreaker::new( BREAKER_FAILURE_THRESHOLD, BREAKER_COOLDOWN_SECS ) } )
  }

  pub fn from_pool( pool: SqlitePool ) -> Self
  {
    Self { pool, breaker: CircuitBreaker::new( BREAKER_FAILURE_THRESHOLD, BREAKER_COOLDOWN_SECS ) }
  }

  fn check_breaker( &self ) -> Result< () >
  {
    if self.breaker.is_open( BREAKER_SERVICE_KEY )
    {
      tracing::warn!( "budget store circuit breaker open, failing fast without hitting sqlite" );
      return Err( Error::Internal( "budget store circuit breaker open".to_string() ) );
    }
    Ok( () )
  }

  /// Every active budget belonging to `tenant_id`, rolling over any budget whose reset
  /// instant has passed before returning it — per §4.3, rollover happens as part of
  /// evaluation, not as a separate background job.
  pub async fn active_budgets_for_tenant( &self, tenant_id: &TenantId, now_unix: i64 ) -> Result< Vec< Budget > >
  {
    self.check_breaker()?;

    let query_result = sqlx::query(
      "SELECT id, tenant_id, name, scope_type, scope_key, period, limit_micros, current_spend_micros, \
              reset_at, action, downgrade_model, warn_percent, critical_percent, is_active \
       FROM budgets WHERE tenant_id = $1 AND is_active = 1"
    )
    .bind( tenant_id.as_str() )
    .fetch_all( &self.pool )
    .await;

    let rows = match query_result
    {
      Ok( rows ) =>
      {
        self.breaker.record_success( BREAKER_SERVICE_KEY );
        rows
      }
      Err( error ) =>
      {
        self.breaker.record_failure( BREAKER_SERVICE_KEY );
        return Err( Error::Internal( format!( "budget lookup failed: {error}" ) ) );
      }
    };

    let mut budgets = Vec::with_capacity( rows.len() );
    for row in rows
    {
      let mut budget = row_to_budget( &row )?;
      if budget.needs_rollover( now_unix )
      {
        let periods_elapsed = ( ( now_unix - budget.reset_at_unix ) / budget.period_seconds() ) + 1;
        let new_reset_at = budget.reset_at_unix + periods_elapsed * budget.period_seconds();
        self.rollover( &budget.id, new_reset_at ).await?;
        budget.current_spend_micros = 0;
        budget.reset_at_unix = new_reset_at;
      }
      budgets.push( budget );
    }
    Ok( budgets )
  }

  async fn rollover( &self, id: &BudgetId, new_reset_at: i64 ) -> Result< () >
  {
    sqlx::query( "UPDATE budgets SET current_spend_micros = 0, reset_at = $1 WHERE id = $2" )
      .bind( new_reset_at )
      .bind( id.as_str() )
      .execute( &self.pool )
      .await
      .map_err( |e| Error::Internal( format!( "budget rollover failed: {e}" ) ) )?;
    Ok( () )
  }

  /// Inserts or replaces a budget record; used by provisioning flows and tests.
  pub async fn upsert( &self, budget: &Budget ) -> Result< () >
  {
    let ( scope_type, scope_key ) = scope_to_columns( &budget.scope );
    let ( action, downgrade_model ) = action_to_columns( &budget.action );

    sqlx::query(
      "INSERT INTO budgets (id, tenant_id, name, scope_type, scope_key, period, limit_micros, \
         current_spend_micros, reset_at, action, downgrade_model, warn_percent, critical_percent, is_active) \
       VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14) \
       ON CONFLICT(id) DO UPDATE SET name=excluded.name, scope_type=excluded.scope_type, \
         scope_key=excluded.scope_key, period=excluded.period, limit_micros=excluded.limit_micros, \
         current_spend_micros=excluded.current_spend_micros, reset_at=excluded.reset_at, \
         action=excluded.action, downgrade_model=excluded.downgrade_model, \
         warn_percent=excluded.warn_percent, critical_percent=excluded.critical_percent, \
         is_active=excluded.is_active"
    )
    .bind( budget.id.as_str() )
    .bind( budget.tenant_id.as_str() )
    .bind( &budget.name )
    .bind( scope_type )
    .bind( scope_key )
    .bind( period_to_str( budget.period ) )
    .bind( budget.limit_micros as i64 )
    .bind( budget.current_spend_micros as i64 )
    .bind( budget.reset_at_unix )
    .bind( action )
    .bind( downgrade_model )
    .bind( i64::from( budget.warn_percent ) )
    .bind( i64::from( budget.critical_percent ) )
    .bind( i64::from( budget.is_active ) )
    .execute( &self.pool )
    .await
    .map_err( |e| Error::Internal( format!( "budget upsert failed: {e}" ) ) )?;

    Ok( () )
  }

  /// Atomically debits `amount_micros` from `budget_id`'s spend, recording the settlement
  /// against `request_id` so a retried settle() for the same request is a no-op. Returns
  /// `true` if this call actually applied the debit (as opposed to finding it already applied).
  pub async fn settle_one( &self, request_id: &str, budget_id: &BudgetId, amount_micros: u64 ) -> Result< bool >
  {
    self.check_breaker()?;

    let result = self.settle_one_inner( request_id, budget_id, amount_micros ).await;
    match &result
    {
      Ok( _ ) => self.breaker.record_success( BREAKER_SERVICE_KEY ),
      Err( _ ) => self.breaker.record_failure( BREAKER_SERVICE_KEY ),
    }
    result
  }

  async fn settle_one_inner( &self, request_id: &str, budget_id: &BudgetId, amount_micros: u64 ) -> Result< bool >
  {
    let mut tx = self.pool.begin().await
      .map_err( |e| Error::Internal( format!( "settlement transaction failed to start: {e}" ) ) )?;

    let insert_result = sqlx::query(
      "INSERT INTO budget_settlements (request_id, budget_id, applied_micros) VALUES ($1, $2, $3) \
       ON CONFLICT(request_id, budget_id) DO NOTHING"
    )
    .bind( request_id )
    .bind( budget_id.as_str() )
    .bind( amount_micros as i64 )
    .execute( &mut *tx )
    .await
    .map_err( |e| Error::Internal( format!( "settlement ledger insert failed: {e}" ) ) )?;

    if insert_result.rows_affected() == 0
    {
      // Already settled for this (request_id, budget_id) pair; idempotent no-op.
      tx.commit().await.map_err( |e| Error::Internal( format!( "settlement commit failed: {e}" ) ) )?;
      return Ok( false );
    }

    sqlx::query( "UPDATE budgets SET current_spend_micros = current_spend_micros + $1 WHERE id = $2" )
      .bind( amount_micros as i64 )
      .bind( budget_id.as_str() )
      .execute( &mut *tx )
      .await
      .map_err( |e| Error::Internal( format!( "settlement debit failed: {e}" ) ) )?;

    tx.commit().await.map_err( |e| Error::Internal( format!( "settlement commit failed: {e}" ) ) )?;
    Ok( true )
  }

  /// Current spend for a single budget, used by tests and diagnostics.
  pub async fn current_spend_micros( &self, budget_id: &BudgetId ) -> Result< u64 >
  {
    let row = sqlx::query( "SELECT current_spend_micros FROM budgets WHERE id = $1" )
      .bind( budget_id.as_str() )
      .fetch_one( &self.pool )
      .await
      .map_err( |e| Error::Internal( format!( "spend lookup failed: {e}" ) ) )?;
    Ok( row.get::< i64, _ >( "current_spend_micros" ) as u64 )
  }
}

fn row_to_budget( row: &sqlx::sqlite::SqliteRow ) -> Result< Budget >
{
  let id = BudgetId::parse( row.get::< String, _ >( "id" ) ).map_err( |e| Error::Internal( e.to_string() ) )?;
  let tenant_id = TenantId::parse( row.get::< String, _ >( "tenant_id" ) ).map_err( |e| Error::Internal( e.to_string() ) )?;
  let scope_type: String = row.get( "scope_type" );
  let scope_key: Option< String > = row.get( "scope_key" );
  let period: String = row.get( "period" );
  let action: String = row.get( "action" );
  let downgrade_model: Option< String > = row.get( "downgrade_model" );

  Ok( Budget
  {
    id,
    tenant_id,
    name: row.get( "name" ),
    scope: columns_to_scope( &scope_type, scope_key )?,
    period: str_to_period( &period )?,
    limit_micros: row.get::< i64, _ >( "limit_micros" ) as u64,
    current_spend_micros: row.get::< i64, _ >( "current_spend_micros" ) as u64,
    reset_at_unix: row.get( "reset_at" ),
    action: columns_to_action( &action, downgrade_model )?,
    warn_percent: row.get::< i64, _ >( "warn_percent" ) as u8,
    critical_percent: row.get::< i64, _ >( "critical_percent" ) as u8,
    is_active: row.get::< i64, _ >( "is_active" ) != 0,
  } )
}

fn scope_to_columns( scope: &BudgetScope ) -> ( &'static str, Option< String > )
{
  match scope
  {
    BudgetScope::Global => ( "global", None ),
    BudgetScope::PerAgent { agent_id } => ( "per_agent", Some( agent_id.clone() ) ),
    BudgetScope::PerModel { model } => ( "per_model", Some( model.clone() ) ),
    BudgetScope::PerWorkflow { workflow_id } => ( "per_workflow", Some( workflow_id.clone() ) ),
  }
}

fn columns_to_scope( scope_type: &str, scope_key: Option< String > ) -> Result< BudgetScope >
{
  Ok( match scope_type
  {
    "global" => BudgetScope::Global,
    "per_agent" => BudgetScope::PerAgent { agent_id: scope_key.ok_or_else( || Error::Internal( "per_agent budget missing scope_key".into() ) )? },
    "per_model" => BudgetScope::PerModel { model: scope_key.ok_or_else( || Error::Internal( "per_model budget missing scope_key".into() ) )? },
    "per_workflow" => BudgetScope::PerWorkflow { workflow_id: scope_key.ok_or_else( || Error::Internal( "per_workflow budget missing scope_key".into() ) )? },
    other => return Err( Error::Internal( format!( "unknown budget scope_type: {other}" ) ) ),
  } )
}

fn period_to_str( period: BudgetPeriod ) -> &'static str
{
  match period
  {
    BudgetPeriod::Daily => "daily",
    BudgetPeriod::Weekly => "weekly",
    BudgetPeriod::Monthly => "monthly",
  }
}

fn str_to_period( s: &str ) -> Result< BudgetPeriod >
{
  Ok( match s
  {
    "daily" => BudgetPeriod::Daily,
    "weekly" => BudgetPeriod::Weekly,
    "monthly" => BudgetPeriod::Monthly,
    other => return Err( Error::Internal( format!( "unknown budget period: {other}" ) ) ),
  } )
}

fn action_to_columns( action: &BudgetAction ) -> ( &'static str, Option< String > )
{
  match action
  {
    BudgetAction::Alert => ( "alert", None ),
    BudgetAction::Block => ( "block", None ),
    BudgetAction::Downgrade { target_model } => ( "downgrade", Some( target_model.clone() ) ),
  }
}

fn columns_to_action( action: &str, downgrade_model: Option< String > ) -> Result< BudgetAction >
{
  Ok( match action
  {
    "alert" => BudgetAction::Alert,
    "block" => BudgetAction::Block,
    "downgrade" => BudgetAction::Downgrade
    {
      target_model: downgrade_model.ok_or_else( || Error::Internal( "downgrade budget missing downgrade_model".into() ) )?,
    },
    other => return Err( Error::Internal( format!( "unknown budget action: {other}" ) ) ),
  } )
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[tokio::test]
  async fn breaker_opens_after_repeated_failures_and_fails_fast()
  {
    let store = BudgetStore::connect( "sqlite::memory:" ).await.unwrap();
    for _ in 0..BREAKER_FAILURE_THRESHOLD
    {
      store.breaker.record_failure( BREAKER_SERVICE_KEY );
    }

    let tenant_id = TenantId::generate();
    let result = store.active_budgets_for_tenant( &tenant_id, 0 ).await;
    assert!( matches!( result, Err( Error::Internal( _ ) ) ) );
  }
}
