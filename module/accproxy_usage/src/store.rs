//! SQLite-backed durable append-only usage log.

use crate::model::UsageRecord;
use accproxy_types::{ Error, Result };
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{ Row, SqlitePool };

const MIGRATION_SQL: &str = include_str!( "../migrations/001_usage_records.sql" );

/// Append-only usage record store.
pub struct UsageStore
{
  pool: SqlitePool,
}

impl std::fmt::Debug for UsageStore
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "UsageStore" ).finish_non_exhaustive()
  }
}

impl UsageStore
{
  pub async fn connect( database_url: &str ) -> Result< Self >
  {
    let pool = SqlitePoolOptions::new()
      .max_connections( 5 )
      .connect( database_url )
      .await
      .map_err( |e| Error::Internal( format!( "usage store connect failed: {e}" ) ) )?;

    sqlx::raw_sql( MIGRATION_SQL )
      .execute( &pool )
      .await
      .map_err( |e| Error::Internal( format!( "usage store migration failed: {e}" ) ) )?;

    Ok( Self { pool } )
  }

  pub fn from_pool( pool: SqlitePool ) -> Self
  {
    Self { pool }
  }

  /// Appends one usage record. Per invariant (iii) this is called exactly once per completed
  /// request, including requests that failed before reaching the provider.
  pub async fn append( &self, record: &UsageRecord ) -> Result< () >
  {
    let metadata_json = serde_json::to_string( &record.metadata )
      .map_err( |e| Error::Internal( format!( "usage metadata serialization failed: {e}" ) ) )?;

    sqlx::query(
      "INSERT INTO usage_records (id, tenant_id, agent_id, occurred_at, provider, requested_model, \
         effective_model, endpoint, input_tokens, output_tokens, cache_creation_tokens, \
         cache_read_tokens, cost_usd_micros, usage_estimated, latency_ms, status_code, error_text, \
         streaming, metadata_json) \
       VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)"
    )
    .bind( &record.id )
    .bind( record.tenant_id.as_str() )
    .bind( &record.agent_id )
    .bind( record.occurred_at_unix )
    .bind( &record.provider )
    .bind( &record.requested_model )
    .bind( &record.effective_model )
    .bind( &record.endpoint )
    .bind( record.usage.input_tokens as i64 )
    .bind( record.usage.output_tokens as i64 )
    .bind( record.usage.cache_creation_tokens as i64 )
    .bind( record.usage.cache_read_tokens as i64 )
    .bind( record.cost_usd_micros as i64 )
    .bind( i64::from( record.usage_estimated ) )
    .bind( record.latency_ms as i64 )
    .bind( i64::from( record.status_code ) )
    .bind( &record.error_text )
    .bind( i64::from( record.streaming ) )
    .bind( metadata_json )
    .execute( &self.pool )
    .await
    .map_err( |e| Error::Internal( format!( "usage record insert failed: {e}" ) ) )?;

    Ok( () )
  }

  /// Count of rows for a tenant, used by tests.
  pub async fn count_for_tenant( &self, tenant_id: &str ) -> Result< i64 >
  {
    let row = sqlx::query( "SELECT COUNT(*) as n FROM usage_records WHERE tenant_id = $1" )
      .bind( tenant_id )
      .fetch_one( &self.pool )
      .await
      .map_err( |e| Error::Internal( format!( "usage count query failed: {e}" ) ) )?;
    Ok( row.get( "n" ) )
  }
}
