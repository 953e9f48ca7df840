//! Axum route handlers: one per upstream provider, plus liveness/readiness. Each provider
//! handler drives the same fixed phase sequence (`pipeline.rs`) against that provider's own
//! body shape and upstream target (`provider.rs`), grounded in the original's per-provider
//! handler files (`anthropic.py`, `openai.py`) rather than a single generalized dispatcher.

use crate::error::ApiError;
use crate::pipeline::{ self, PipelineContext };
use crate::provider;
use crate::state::AppState;
use crate::stream;
use accproxy_cost::{ calculate_cost, converter::micros_to_usd, TokenEstimator };
use accproxy_credentials::AuthenticatedTenant;
use accproxy_router::RouteRequest;
use accproxy_security::model::Direction;
use accproxy_types::{ Error, Provider, Result };
use axum::body::Body;
use axum::extract::{ Path, State };
use axum::http::{ HeaderMap, StatusCode };
use axum::response::{ IntoResponse, Response };
use axum::Json;
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

const UPSTREAM_BUFFERED_TIMEOUT: Duration = Duration::from_secs( 120 );
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// `POST /v1/messages` — Anthropic Messages passthrough.
pub async fn anthropic_messages( State( state ): State< AppState >, tenant: AuthenticatedTenant, headers: HeaderMap, Json( body ): Json< Value > ) -> Response
{
  dispatch( &state, tenant, headers, Provider::Anthropic, "/v1/messages", body ).await
}

/// `POST /v1/chat/completions` — OpenAI Chat Completions passthrough.
pub async fn openai_chat_completions( State( state ): State< AppState >, tenant: AuthenticatedTenant, headers: HeaderMap, Json( body ): Json< Value > ) -> Response
{
  dispatch( &state, tenant, headers, Provider::Openai, "/v1/chat/completions", body ).await
}

/// `POST /v1/google/*rest` — Google Generative Language passthrough. The model is carried in
/// the path (`models/{model}:{method}`) rather than the body, per Google's own API shape; the
/// body's `model` field is filled in from the path so the rest of the pipeline can treat all
/// three providers uniformly.
pub async fn google_passthrough( State( state ): State< AppState >, tenant: AuthenticatedTenant, headers: HeaderMap, Path( rest ): Path< String >, Json( body ): Json< Value > ) -> Response
{
  let Some( model ) = model_from_google_path( &rest ) else
  {
    return ApiError::from( Error::BadRequest( "could not determine model from path".to_string() ) ).into_response();
  };

  let mut body = body;
  provider::set_model( &mut body, &model );
  dispatch( &state, tenant, headers, Provider::Google, "/v1/google", body ).await
}

/// Pulls `{model}` out of a Google-style `models/{model}:{method}` path segment.
fn model_from_google_path( rest: &str ) -> Option< String >
{
  let after_models = rest.strip_prefix( "models/" ).unwrap_or( rest );
  after_models.split( ':' ).next().map( str::to_string ).filter( |s| !s.is_empty() )
}

/// `GET /health` — liveness. Always 200 once the process is accepting connections.
pub async fn health() -> Response
{
  ( StatusCode::OK, Json( serde_json::json!({ "status": "healthy", "timestamp": pipeline::now_unix(), "version": env!( "CARGO_PKG_VERSION" ) }) ) ).into_response()
}

/// `GET /health/ready` — readiness: confirms the credential store answers. The rate limiter's
/// key-value store fails open by design (`accproxy_ratelimit`), so an unreachable store never
/// surfaces here as a hard failure — only the credential store check is load-bearing.
pub async fn health_ready( State( state ): State< AppState > ) -> Response
{
  let auth_ok = state.credential_auth.store.resolve( "__readiness_probe__" ).await.is_ok();
  let status = if auth_ok { "ready" } else { "degraded" };
  let code = if auth_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

  ( code, Json( serde_json::json!({ "status": status, "checks": { "credential_store": auth_ok } }) ) ).into_response()
}

/// Drives the full pipeline for one provider request: rate limit, request security, budget
/// evaluation against the originally requested model, routing, upstream dispatch (buffered or
/// streaming), response security, settlement, and usage logging.
async fn dispatch( state: &AppState, tenant: AuthenticatedTenant, headers: HeaderMap, provider: Provider, endpoint: &'static str, mut body: Value ) -> Response
{
  let agent_id = agent_id_from_headers( &headers );
  let context = PipelineContext::new( tenant.tenant_id.clone(), agent_id, tenant.fingerprint.clone(), provider, endpoint, state.default_detection_level );

  if let Some( agent_id ) = context.agent_id.as_deref()
  {
    accproxy_telemetry::log_agent_event( agent_id, &format!( "request_started:{endpoint}" ) );
  }

  match run( state, &context, provider, &mut body ).await
  {
    Ok( response ) => response,
    Err( error ) =>
    {
      if let Some( agent_id ) = context.agent_id.as_deref()
      {
        accproxy_telemetry::log_agent_event( agent_id, &format!( "request_failed:{error}" ) );
      }
      let requested_model = crate::provider::model_from_body( &body ).unwrap_or_default();
      let record = pipeline::build_rejected_usage_record( &context, &requested_model, status_code_for( &error ), error.to_string() );
      state.usage_logger.log( record ).await;
      ApiError::from( error ).into_response()
    }
  }
}

fn status_code_for( error: &Error ) -> u16
{
  match error
  {
    Error::Unauthenticated => 401,
    Error::AuthUnavailable => 503,
    Error::RateLimited { .. } => 429,
    Error::BadRequest( _ ) => 400,
    Error::BudgetExceeded { .. } => 403,
    Error::SecurityBlocked { .. } => 403,
    Error::UpstreamTimeout => 504,
    Error::UpstreamError( _ ) => 502,
    Error::Internal( _ ) => 500,
  }
}

fn agent_id_from_headers( headers: &HeaderMap ) -> Option< String >
{
  headers.get( "x-acc-agent-id" ).and_then( |v| v.to_str().ok() ).map( str::to_string )
}

async fn run( state: &AppState, context: &PipelineContext, provider: Provider, body: &mut Value ) -> Result< Response >
{
  let remaining = pipeline::enforce_rate_limit( state, &context.fingerprint ).await?;

  let detection_context = context.detection_context();
  pipeline::scan_request( state, body, &detection_context, context.detection_level ).await?;

  let original_model = crate::provider::model_from_body( body )?;
  let ( messages, system_prompt ) = crate::provider::estimator_messages( body );
  let estimated_input_tokens = state.estimator.estimate_input_tokens( provider.as_str(), &original_model, &messages, system_prompt.as_deref() );
  let concatenated = crate::provider::concatenated_messages( body );

  let route_request = RouteRequest
  {
    model: &original_model,
    message_count: messages.len(),
    concatenated_content: &concatenated,
    token_estimate: estimated_input_tokens,
    agent_id: context.agent_id.as_deref(),
    hour_of_day_utc: pipeline::hour_of_day_utc(),
  };

  let routed = pipeline::evaluate_budget_and_route(
    state,
    &context.tenant_id,
    context.agent_id.as_deref(),
    provider,
    &original_model,
    estimated_input_tokens,
    pipeline::now_unix(),
    &route_request,
  ).await?;

  // §4.4: a routing rule can rewrite the target provider, not just the model. When it does,
  // the request body must be translated into the target provider's own shape *before*
  // dispatch — otherwise an OpenAI-shaped body would be sent straight to the Anthropic
  // endpoint with only the `model` field swapped.
  let effective_provider = Provider::parse( &routed.effective_provider ).unwrap_or( provider );
  if effective_provider != provider
  {
    *body = accproxy_router::normalize_for_target( provider.as_str(), effective_provider.as_str(), body );
  }

  crate::provider::set_model( body, &routed.effective_model );
  let streaming = crate::provider::stream_requested( body );

  let target = upstream_target( state, effective_provider, &routed.effective_model, streaming )?;

  let mut response = if streaming
  {
    dispatch_streaming( state, context, &original_model, &routed, target, body.clone() ).await?
  }
  else
  {
    dispatch_buffered( state, context, &original_model, &routed, target, body.clone() ).await?
  };

  insert_header( response.headers_mut(), "x-ratelimit-remaining", remaining.to_string() );
  Ok( response )
}

fn upstream_target( state: &AppState, provider: Provider, effective_model: &str, streaming: bool ) -> Result< crate::provider::UpstreamTarget >
{
  match provider
  {
    Provider::Anthropic => state.upstream_keys.anthropic.as_deref()
      .map( |key| crate::provider::anthropic_target( key, state.upstream_base_urls.anthropic.as_deref() ) )
      .ok_or_else( missing_key_error ),
    Provider::Openai => state.upstream_keys.openai.as_deref()
      .map( |key| crate::provider::openai_target( key, state.upstream_base_urls.openai.as_deref() ) )
      .ok_or_else( missing_key_error ),
    Provider::Google => state.upstream_keys.google.as_deref()
      .map( |key| crate::provider::google_target( key, effective_model, streaming, state.upstream_base_urls.google.as_deref() ) )
      .ok_or_else( missing_key_error ),
  }
}

fn missing_key_error() -> Error
{
  Error::UpstreamError( "no upstream API key configured for this provider".to_string() )
}

async fn dispatch_buffered( state: &AppState, context: &PipelineContext, original_model: &str, routed: &pipeline::RoutedRequest, target: crate::provider::UpstreamTarget, body: Value ) -> Result< Response >
{
  let mut request = state.http_client.post( &target.url ).timeout( UPSTREAM_BUFFERED_TIMEOUT ).json( &body );
  for ( name, value ) in &target.headers
  {
    request = request.header( *name, value.as_str() );
  }

  let response = send_upstream( state, target.provider.as_str(), request ).await?;
  let status = response.status();
  let bytes = response.bytes().await.map_err( map_reqwest_error )?;
  let mut response_body: Value = serde_json::from_slice( &bytes ).unwrap_or( Value::Null );

  let detection_context = context.detection_context();
  let scan_outcome = state.security.scan_response_sync( &response_body, &detection_context, context.detection_level );
  if scan_outcome.is_blocking()
  {
    return Err( Error::SecurityBlocked { threat: most_severe_threat( &scan_outcome ) } );
  }
  if scan_outcome.action == accproxy_types::ResponseAction::Redact
  {
    let agent_id = context.agent_id.as_deref().unwrap_or( "unknown" );
    for event in &scan_outcome.events
    {
      accproxy_telemetry::log_pii_detection( agent_id, event.threat_type.as_str(), 0 );
    }
    redact_strings( &mut response_body, &state.credential_redactor );
  }

  let usage = accproxy_usage::extract_buffered( target.provider.as_str(), &response_body ).unwrap_or_default();
  let cost_result = calculate_cost( &state.pricing, target.provider.as_str(), &routed.effective_model, usage );

  pipeline::settle( state, context.request_id.as_str(), &context.tenant_id, &routed.matched_budgets, cost_result.cost_usd_micros ).await;

  let record = pipeline::build_usage_record( context, original_model, &routed.effective_model, usage, cost_result.cost_usd_micros, false, status.as_u16(), None, false );
  state.usage_logger.log( record ).await;

  Ok( success_response( status, &response_body, cost_result.cost_usd_micros, usage.total(), &routed.effective_model ) )
}

fn most_severe_threat( outcome: &accproxy_security::ScanOutcome ) -> String
{
  outcome.events.iter().max_by_key( |e| e.action_taken ).map( |e| e.threat_type.as_str().to_string() ).unwrap_or_else( || "unknown".to_string() )
}

async fn dispatch_streaming( state: &AppState, context: &PipelineContext, original_model: &str, routed: &pipeline::RoutedRequest, target: crate::provider::UpstreamTarget, body: Value ) -> Result< Response >
{
  let mut request = state.http_client.post( &target.url ).json( &body );
  for ( name, value ) in &target.headers
  {
    request = request.header( *name, value.as_str() );
  }

  let response = send_upstream( state, target.provider.as_str(), request ).await?;
  let status = response.status();

  let ( out_tx, out_rx ) = mpsc::channel::< bytes::Bytes >( STREAM_CHANNEL_CAPACITY );
  let ( kill_tx, kill_rx ) = mpsc::channel( 1 );

  let detection_context = context.detection_context();

  // Response bodies aren't available as a complete JSON value until the stream finishes, so
  // async response-phase detectors (currently just `AnomalyDetector`, sized on response bytes)
  // run against an empty placeholder for streaming requests; the stream pump's own per-chunk
  // sync scan is what actually redacts or kills a streaming reply in flight.
  state.security.submit_async( context.request_id.as_str().to_string(), Value::Null, detection_context.clone(), context.detection_level, Direction::Response, kill_tx );

  let upstream_provider = target.provider.as_str().to_string();
  let security = std::sync::Arc::clone( &state.security );
  let redactor = std::sync::Arc::clone( &state.credential_redactor );
  let level = context.detection_level;
  let request_id = context.request_id.as_str().to_string();
  let tenant_id = context.tenant_id.clone();
  let matched_budgets = routed.matched_budgets.clone();
  let original_model = original_model.to_string();
  let effective_model = routed.effective_model.clone();
  let agent_id = context.agent_id.clone();
  let endpoint = context.endpoint;
  let pricing = std::sync::Arc::clone( &state.pricing );
  let budget_engine = std::sync::Arc::clone( &state.budget_engine );
  let usage_logger = state.usage_logger.clone();
  let started = context.started;

  tokio::spawn( async move
  {
    let upstream_stream = Box::pin( response.bytes_stream() );
    let pump_result = stream::pump( &upstream_provider, upstream_stream, out_tx, kill_rx, security, redactor, detection_context, level ).await;

    let cost_result = calculate_cost( &pricing, &upstream_provider, &effective_model, pump_result.usage.usage );

    if !matched_budgets.is_empty()
    {
      budget_engine.settle( &request_id, &tenant_id, &matched_budgets, cost_result.cost_usd_micros ).await;
    }

    let record = accproxy_usage::UsageRecord
    {
      id: request_id,
      tenant_id,
      agent_id,
      occurred_at_unix: pipeline::now_unix(),
      provider: upstream_provider,
      requested_model: original_model,
      effective_model,
      endpoint: endpoint.to_string(),
      usage: pump_result.usage.usage,
      cost_usd_micros: cost_result.cost_usd_micros,
      usage_estimated: pump_result.usage.usage_estimated,
      latency_ms: started.elapsed().as_millis() as u64,
      status_code: if pump_result.killed { 499 } else { status.as_u16() },
      error_text: if pump_result.killed { Some( "stream terminated by security kill switch".to_string() ) } else { None },
      streaming: true,
      metadata: std::collections::HashMap::new(),
    };

    usage_logger.log( record ).await;
  } );

  let body_stream = tokio_stream::wrappers::ReceiverStream::new( out_rx ).map( Ok::< _, std::io::Error > );

  let mut http_response = Response::builder()
    .status( status.as_u16() )
    .header( "content-type", "text/event-stream" )
    .body( Body::from_stream( body_stream ) )
    .map_err( |e| Error::Internal( format!( "failed to build streaming response: {e}" ) ) )?;

  insert_header( http_response.headers_mut(), "x-acc-model", routed.effective_model.clone() );

  Ok( http_response )
}

/// Sends an upstream request behind the per-provider circuit breaker (§4.14): once a provider
/// trips its breaker, further requests fail fast with `upstream_error` instead of queueing
/// behind a dead connection.
async fn send_upstream( state: &AppState, provider: &str, request: reqwest::RequestBuilder ) -> Result< reqwest::Response >
{
  if state.upstream_breaker.is_open( provider )
  {
    tracing::warn!( provider, "upstream circuit breaker open, failing fast without dispatching" );
    return Err( Error::UpstreamError( format!( "{provider} upstream circuit breaker open" ) ) );
  }

  match request.send().await
  {
    Ok( response ) =>
    {
      state.upstream_breaker.record_success( provider );
      Ok( response )
    }
    Err( error ) =>
    {
      state.upstream_breaker.record_failure( provider );
      Err( map_reqwest_error( error ) )
    }
  }
}

fn map_reqwest_error( error: reqwest::Error ) -> Error
{
  if error.is_timeout()
  {
    Error::UpstreamTimeout
  }
  else
  {
    Error::UpstreamError( error.to_string() )
  }
}

fn success_response( status: reqwest::StatusCode, body: &Value, cost_usd_micros: u64, total_tokens: u64, effective_model: &str ) -> Response
{
  let mut response = ( StatusCode::from_u16( status.as_u16() ).unwrap_or( StatusCode::OK ), Json( body.clone() ) ).into_response();

  let headers = response.headers_mut();
  insert_header( headers, "x-acc-cost", format!( "{:.6}", micros_to_usd( cost_usd_micros ) ) );
  insert_header( headers, "x-acc-tokens", total_tokens.to_string() );
  insert_header( headers, "x-acc-model", effective_model.to_string() );

  response
}

fn insert_header( headers: &mut axum::http::HeaderMap, name: &'static str, value: String )
{
  if let Ok( header_value ) = axum::http::HeaderValue::from_str( &value )
  {
    headers.insert( name, header_value );
  }
}

/// Recursively replaces every string leaf in a JSON value with its redacted form.
fn redact_strings( value: &mut Value, redactor: &accproxy_security::detectors::credential::CredentialDetector )
{
  match value
  {
    Value::String( s ) => *s = redactor.redact( s ),
    Value::Array( items ) => items.iter_mut().for_each( |item| redact_strings( item, redactor ) ),
    Value::Object( map ) => map.values_mut().for_each( |item| redact_strings( item, redactor ) ),
    _ => {}
  }
}

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn model_from_google_path_reads_generate_content_method()
  {
    assert_eq!( model_from_google_path( "models/gemini-1.5-pro:generateContent" ).as_deref(), Some( "gemini-1.5-pro" ) );
  }

  #[test]
  fn model_from_google_path_handles_missing_models_prefix()
  {
    assert_eq!( model_from_google_path( "gemini-1.5-pro:streamGenerateContent" ).as_deref(), Some( "gemini-1.5-pro" ) );
  }

  #[test]
  fn redact_strings_scrubs_nested_string_leaves()
  {
    let redactor = accproxy_security::detectors::credential::CredentialDetector::new();
    let mut value = serde_json::json!({ "content": [ { "text": "key is sk-ant-REDACTED" } ] });
    redact_strings( &mut value, &redactor );
    assert!( value[ "content" ][ 0 ][ "text" ].as_str().unwrap().contains( "REDACTED" ) );
  }
}
