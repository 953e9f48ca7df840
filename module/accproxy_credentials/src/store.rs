//! SQLite-backed credential store with a short-TTL in-memory cache in front of it. A negative
//! lookup (fingerprint not found) is never cached, so a just-created credential is visible on
//! the very next request instead of waiting out a cache TTL.

use accproxy_reliability::CircuitBreaker;
use accproxy_types::{ Error, PlanTier, Result, TenantId };
use dashmap::DashMap;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{ Row, SqlitePool };
use std::time::{ Duration, Instant };

const MIGRATION_SQL: &str = include_str!( "../migrations/001_initial_schema.sql" );
const CACHE_TTL: Duration = Duration::from_secs( 30 );

/// §4.14: one breaker per authoritative store, tripped after this many consecutive failures.
const BREAKER_FAILURE_THRESHOLD: u32 = 5;
/// Cooldown window before the breaker allows another call through to probe recovery.
const BREAKER_COOLDOWN_SECS: u64 = 30;
const BREAKER_SERVICE_KEY: &str = "credential_store";

/// A resolved credential: which tenant presented this fingerprint, and at what plan tier.
/// Carries the fingerprint itself back to the caller so the orchestrator can key the rate
/// limiter on it without recomputing `SHA256(secret || salt)` a second time.
#[derive( Debug, Clone )]
pub struct ResolvedCredential
{
  pub tenant_id: TenantId,
  pub plan_tier: PlanTier,
  pub fingerprint: String,
}

struct CachedCredential
{
  credential: ResolvedCredential,
  expires_at: Instant,
}

/// Presented-secret-fingerprint to `(tenant, plan)` lookup, cached in front of SQLite.
pub struct CredentialStore
{
  pool: SqlitePool,
  cache: DashMap< String, CachedCredential >,
  breaker: CircuitBreaker,
}

impl std::fmt::Debug for CredentialStore
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "CredentialStore" ).field( "cached_entries", &self.cache.len() ).finish()
  }
}

impl CredentialStore
{
  /// Connects to `database_url` and applies the embedded migration.
  pub async fn connect( database_url: &str ) -> Result< Self >
  {
    let pool = SqlitePoolOptions::new()
      .max_connections( 5 )
      .connect( database_url )
      .await
      .map_err( |e| Error::Internal( format!( "credential store connect failed: {e}" ) ) )?;

    sqlx::raw_sql( MIGRATION_SQL )
      .execute( &pool )
      .await
      .map_err( |e| Error::Internal( format!( "credential store migration failed: {e}" ) ) )?;

    Ok( Self { pool, cache: DashMap::new(), breaker: CircuitBreaker::new( BREAKER_FAILURE_THRESHOLD, BREAKER_COOLDOWN_SECS ) } )
  }

  /// Builds a store from an already-migrated pool, for tests sharing a pool across crates.
  pub fn from_pool( pool: SqlitePool ) -> Self
  {
    Self { pool, cache: DashMap::new(), breaker: CircuitBreaker::new( BREAKER_FAILURE_THRESHOLD, BREAKER_COOLDOWN_SECS ) }
  }

  /// Resolves a fingerprint to its credential, consulting the cache first. `Ok(None)` means
  /// the fingerprint is unknown or inactive — never cached, so a fresh write is visible
  /// immediately. An `Err` here means the authoritative store was unreachable, which the
  /// caller maps to `auth_unavailable`, never to an outright deny.
  pub async fn resolve( &self, fingerprint: &str ) -> Result< Option< ResolvedCredential > >
  {
    if let Some( entry ) = self.cache.get( fingerprint )
    {
      if entry.expires_at > Instant::now()
      {
        return Ok( Some( entry.credential.clone() ) );
      }
    }

    if self.breaker.is_open( BREAKER_SERVICE_KEY )
    {
      tracing::warn!( "credential store circuit breaker open, failing fast without hitting sqlite" );
      return Err( Error::AuthUnavailable );
    }

    let query_result = sqlx::query(
      "SELECT tenant_id, plan_tier FROM credentials WHERE fingerprint = $1 AND is_active = 1"
    )
    .bind( fingerprint )
    .fetch_optional( &self.pool )
    .await;

    let row = match query_result
    {
      Ok( row ) =>
      {
        self.breaker.record_success( BREAKER_SERVICE_KEY );
        row
      }
      Err( error ) =>
      {
        self.breaker.record_failure( BREAKER_SERVICE_KEY );
        return Err( Error::AuthUnavailable.tap_log( &error ) );
      }
    };

    let Some( row ) = row else { return Ok( None ) };

    let tenant_id: String = row.get( "tenant_id" );
    let plan_tier_str: String = row.get( "plan_tier" );

    let credential = ResolvedCredential
    {
      tenant_id: TenantId::parse( &tenant_id ).map_err( |e| Error::Internal( e.to_string() ) )?,
      plan_tier: parse_plan_tier( &plan_tier_str ),
      fingerprint: fingerprint.to_string(),
    };

    self.cache.insert( fingerprint.to_string(), CachedCredential { credential: credential.clone(), expires_at: Instant::now() + CACHE_TTL } );

    Ok( Some( credential ) )
  }

  /// Inserts or reactivates a credential record; used by provisioning flows and tests.
  pub async fn upsert( &self, fingerprint: &str, tenant_id: &TenantId, plan_tier: PlanTier ) -> Result< () >
  {
    let now = current_time_unix();
    sqlx::query(
      "INSERT INTO credentials (fingerprint, tenant_id, plan_tier, is_active, created_at, updated_at) \
       VALUES ($1, $2, $3, 1, $4, $4) \
       ON CONFLICT(fingerprint) DO UPDATE SET tenant_id = excluded.tenant_id, plan_tier = excluded.plan_tier, is_active = 1, updated_at = excluded.updated_at"
    )
    .bind( fingerprint )
    .bind( tenant_id.as_str() )
    .bind( plan_tier_str( plan_tier ) )
    .bind( now )
    .execute( &self.pool )
    .await
    .map_err( |e| Error::Internal( format!( "credential upsert failed: {e}" ) ) )?;

    self.cache.remove( fingerprint );
    Ok( () )
  }
}

fn parse_plan_tier( s: &str ) -> PlanTier
{
  match s
  {
    "pro" => PlanTier::Pro,
    "team" => PlanTier::Team,
    "enterprise" => PlanTier::Enterprise,
    _ => PlanTier::Free,
  }
}

fn plan_tier_str( tier: PlanTier ) -> &'static str
{
  match tier
  {
    PlanTier::Free => "free",
    PlanTier::Pro => "pro",
    PlanTier::Team => "team",
    PlanTier::Enterprise => "enterprise",
  }
}

fn current_time_unix() -> i64
{
  std::time::SystemTime::now()
    .duration_since( std::time::UNIX_EPOCH )
    .expect( "system clock before unix epoch" )
    .as_secs() as i64
}

trait TapLog
{
  fn tap_log( self, source: &sqlx::Error ) -> Self;
}

impl TapLog for Error
{
  fn tap_log( self, source: &sqlx::Error ) -> Self
  {
    tracing::warn!( error = %source, "credential store unreachable" );
    self
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  async fn test_store() -> CredentialStore
  {
    CredentialStore::connect( "sqlite::memory:" ).await.unwrap()
  }

  #[tokio::test]
  async fn unknown_fingerprint_resolves_to_none()
  {
    let store = test_store().await;
    assert!( store.resolve( "nonexistent" ).await.unwrap().is_none() );
  }

  #[tokio::test]
  async fn upserted_credential_resolves()
  {
    let store = test_store().await;
    let tenant_id = TenantId::generate();
    store.upsert( "fp1", &tenant_id, PlanTier::Pro ).await.unwrap();

    let resolved = store.resolve( "fp1" ).await.unwrap().expect( "should resolve" );
    assert_eq!( resolved.tenant_id, tenant_id );
    assert_eq!( resolved.plan_tier, PlanTier::Pro );
  }

  #[tokio::test]
  async fn upsert_overwrites_existing_fingerprint()
  {
    let store = test_store().await;
    let tenant_a = TenantId::generate();
    let tenant_b = TenantId::generate();
    store.upsert( "fp1", &tenant_a, PlanTier::Free ).await.unwrap();
    store.upsert( "fp1", &tenant_b, PlanTier::Enterprise ).await.unwrap();

    let resolved = store.resolve( "fp1" ).await.unwrap().expect( "should resolve" );
    assert_eq!( resolved.tenant_id, tenant_b );
    assert_eq!( resolved.plan_tier, PlanTier::Enterprise );
  }
}
