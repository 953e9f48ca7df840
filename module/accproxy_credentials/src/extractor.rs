//! Axum extractor turning a presented credential header into a resolved credential. Per §6,
//! any of three header styles is accepted: `x-acc-api-key`, `x-api-key` (Anthropic-style), or
//! `Authorization: Bearer <key>` (OpenAI-style).

use crate::fingerprint::fingerprint;
use crate::store::{ CredentialStore, ResolvedCredential };
use accproxy_types::{ PlanTier, TenantId };
use axum::extract::FromRef;
use axum::http::{ header, request::Parts, StatusCode };
use axum::Json;
use std::sync::Arc;

/// Shared state required to authenticate a request; wired into the axum router's state type.
#[derive( Clone )]
pub struct CredentialAuthState
{
  pub store: Arc< CredentialStore >,
  pub salt: Arc< str >,
}

impl std::fmt::Debug for CredentialAuthState
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "CredentialAuthState" ).finish_non_exhaustive()
  }
}

/// The authenticated identity attached to a request after the credential store resolves it.
/// Carries the credential fingerprint alongside the resolved tenant so downstream pipeline
/// phases (rate limiting, runaway-loop detection) can key on it without re-hashing the
/// presented secret.
#[derive( Debug, Clone )]
pub struct AuthenticatedTenant
{
  pub tenant_id: TenantId,
  pub plan_tier: PlanTier,
  pub fingerprint: String,
}

impl From< ResolvedCredential > for AuthenticatedTenant
{
  fn from( credential: ResolvedCredential ) -> Self
  {
    Self { tenant_id: credential.tenant_id, plan_tier: credential.plan_tier, fingerprint: credential.fingerprint }
  }
}

#[axum::async_trait]
impl< S > axum::extract::FromRequestParts< S > for AuthenticatedTenant
where
  S: Send + Sync,
  CredentialAuthState: FromRef< S >,
{
  type Rejection = ( StatusCode, Json< serde_json::Value > );

  async fn from_request_parts( parts: &mut Parts, state: &S ) -> Result< Self, Self::Rejection >
  {
    let auth_state = CredentialAuthState::from_ref( state );

    let secret = presented_secret( parts )
      .ok_or_else( || unauthenticated( "missing x-acc-api-key, x-api-key, or Authorization header" ) )?;

    let fp = fingerprint( &secret, &auth_state.salt );

    let resolved = auth_state.store.resolve( &fp ).await
      .map_err( |_| ( StatusCode::SERVICE_UNAVAILABLE, Json( serde_json::json!({ "error": { "type": "auth_unavailable", "message": "authentication store unavailable" } }) ) ) )?;

    resolved
      .map( AuthenticatedTenant::from )
      .ok_or_else( || unauthenticated( "invalid credential" ) )
  }
}

/// Checks, in order, `x-acc-api-key`, `x-api-key`, then `Authorization: Bearer <key>`.
fn presented_secret( parts: &Parts ) -> Option< String >
{
  if let Some( key ) = parts.headers.get( "x-acc-api-key" ).and_then( |h| h.to_str().ok() )
  {
    return Some( key.to_string() );
  }

  if let Some( key ) = parts.headers.get( "x-api-key" ).and_then( |h| h.to_str().ok() )
  {
    return Some( key.to_string() );
  }

  parts.headers.get( header::AUTHORIZATION )
    .and_then( |h| h.to_str().ok() )
    .and_then( |h| h.strip_prefix( "Bearer " ) )
    .map( str::to_string )
}

fn unauthenticated( message: &str ) -> ( StatusCode, Json< serde_json::Value > )
{
  ( StatusCode::UNAUTHORIZED, Json( serde_json::json!({ "error": { "type": "unauthenticated", "message": message } }) ) )
}
