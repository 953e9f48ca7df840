//! Error-to-HTTP mapping: the one place `accproxy_types::Error` becomes a status code and the
//! `{"error": {"type": ..., "message": ...}}` body shape fixed by §6/§7.

use accproxy_types::Error;
use axum::http::{ HeaderValue, StatusCode };
use axum::response::{ IntoResponse, Response };
use axum::Json;
use serde_json::json;

/// Newtype so `accproxy_types::Error` can be returned directly from a handler via `?`.
pub struct ApiError( pub Error );

impl From< Error > for ApiError
{
  fn from( error: Error ) -> Self
  {
    Self( error )
  }
}

impl IntoResponse for ApiError
{
  fn into_response( self ) -> Response
  {
    let ( status, kind ) = status_and_kind( &self.0 );
    let mut body = json!({ "error": { "type": kind, "message": self.0.to_string() } });

    if let Error::BudgetExceeded { budget_name } = &self.0
    {
      body[ "error" ][ "budget_name" ] = json!( budget_name );
    }

    let mut response = ( status, Json( body ) ).into_response();

    if let Error::RateLimited { remaining } = &self.0
    {
      if let Ok( value ) = HeaderValue::from_str( &remaining.to_string() )
      {
        response.headers_mut().insert( "x-ratelimit-remaining", value );
      }
    }

    response
  }
}

/// Maps each error kind to its stable HTTP status and wire `type` string, per §7.
fn status_and_kind( error: &Error ) -> ( StatusCode, &'static str )
{
  match error
  {
    Error::Unauthenticated => ( StatusCode::UNAUTHORIZED, "unauthenticated" ),
    Error::AuthUnavailable => ( StatusCode::SERVICE_UNAVAILABLE, "auth_unavailable" ),
    Error::RateLimited { .. } => ( StatusCode::TOO_MANY_REQUESTS, "rate_limited" ),
    Error::BadRequest( _ ) => ( StatusCode::BAD_REQUEST, "bad_request" ),
    Error::BudgetExceeded { .. } => ( StatusCode::FORBIDDEN, "budget_exceeded" ),
    Error::SecurityBlocked { .. } => ( StatusCode::FORBIDDEN, "security_blocked" ),
    Error::UpstreamTimeout => ( StatusCode::GATEWAY_TIMEOUT, "upstream_timeout" ),
    Error::UpstreamError( _ ) => ( StatusCode::BAD_GATEWAY, "upstream_error" ),
    Error::Internal( _ ) => ( StatusCode::INTERNAL_SERVER_ERROR, "internal_error" ),
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use axum::body::to_bytes;

  #[tokio::test]
  async fn budget_exceeded_carries_budget_name_in_body()
  {
    let error = ApiError( Error::BudgetExceeded { budget_name: "Monthly".to_string() } );
    let response = error.into_response();
    assert_eq!( response.status(), StatusCode::FORBIDDEN );

    let bytes = to_bytes( response.into_body(), usize::MAX ).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice( &bytes ).unwrap();
    assert_eq!( body[ "error" ][ "type" ], "budget_exceeded" );
    assert_eq!( body[ "error" ][ "budget_name" ], "Monthly" );
  }

  #[test]
  fn rate_limited_maps_to_429()
  {
    let ( status, kind ) = status_and_kind( &Error::RateLimited { remaining: 0 } );
    assert_eq!( status, StatusCode::TOO_MANY_REQUESTS );
    assert_eq!( kind, "rate_limited" );
  }
}
