//! End-to-end exercise of the full pipeline against a mocked upstream: auth -> rate limit ->
//! budget -> route -> upstream dispatch -> response security -> settlement -> usage logging.
//! `wiremock` stands in for the Anthropic API so the test never makes a real network call;
//! `tempfile` gives every authoritative store a shared, file-backed SQLite database the way
//! `main.rs` wires one database URL across all four stores.

use accproxy_budget::{ Budget, BudgetEngine, BudgetStore };
use accproxy_cost::PricingTable;
use accproxy_credentials::fingerprint::fingerprint;
use accproxy_credentials::{ CredentialAuthState, CredentialStore };
use accproxy_kv::{ InMemoryKvStore, SharedKvStore };
use accproxy_proxy::build_router;
use accproxy_proxy::state::{ AppState, UpstreamBaseUrls, UpstreamKeys };
use accproxy_ratelimit::RateLimiter;
use accproxy_router::{ RoutingRuleStore, SmartRouter };
use accproxy_security::detectors::credential::CredentialDetector;
use accproxy_security::policy::ResponsePolicy;
use accproxy_security::{ KillSwitchConfig, SecurityEngine };
use accproxy_types::{ BudgetAction, BudgetId, BudgetPeriod, BudgetScope, DetectionLevel, PlanTier, TenantId };
use accproxy_usage::{ UsageLogger, UsageStore };
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{ method, path };
use wiremock::{ Mock, MockServer, ResponseTemplate };

async fn build_test_state( database_url: &str, anthropic_base_url: &str ) -> ( AppState, TenantId, String )
{
  let credential_store = Arc::new( CredentialStore::connect( database_url ).await.unwrap() );
  let budget_store = Arc::new( BudgetStore::connect( database_url ).await.unwrap() );
  let routing_store = RoutingRuleStore::connect( database_url ).await.unwrap();
  let usage_store = Arc::new( UsageStore::connect( database_url ).await.unwrap() );

  let kv_store: SharedKvStore = Arc::new( InMemoryKvStore::new() );

  let rate_limiter = Arc::new( RateLimiter::with_limits( kv_store.clone(), Duration::from_secs( 60 ), 1000 ) );

  let pricing = Arc::new( PricingTable::new().unwrap() );
  let budget_engine = Arc::new( BudgetEngine::new( budget_store.clone(), Arc::new( kv_store.clone() ), pricing.clone() ) );

  let router_pricing = PricingTable::new().unwrap();
  let router = Arc::new( SmartRouter::new( routing_store, router_pricing ) );

  let security = Arc::new( SecurityEngine::new(
    vec![ Box::new( CredentialDetector::new() ) ],
    vec![],
    ResponsePolicy::default(),
    KillSwitchConfig::default(),
  ) );

  let secret = "sk-test-secret".to_string();
  let salt: Arc< str > = Arc::from( "test-salt" );
  let fp = fingerprint( &secret, &salt );

  let tenant_id = TenantId::generate();
  credential_store.upsert( &fp, &tenant_id, PlanTier::Pro ).await.unwrap();

  let budget = Budget
  {
    id: BudgetId::generate(),
    tenant_id: tenant_id.clone(),
    name: "tenant-global".to_string(),
    scope: BudgetScope::Global,
    period: BudgetPeriod::Daily,
    limit_micros: 1_000_000_000,
    current_spend_micros: 0,
    reset_at_unix: chrono::Utc::now().timestamp() + chrono::Duration::days( 1 ).num_seconds(),
    action: BudgetAction::Block,
    warn_percent: 80,
    critical_percent: 100,
    is_active: true,
  };
  budget_store.upsert( &budget ).await.unwrap();

  let credential_auth = CredentialAuthState { store: credential_store, salt };

  let upstream_keys = UpstreamKeys { anthropic: Some( "upstream-anthropic-key".to_string() ), openai: None, google: None };
  let upstream_base_urls = UpstreamBaseUrls { anthropic: Some( anthropic_base_url.to_string() ), openai: None, google: None };

  let state = AppState
  {
    credential_auth,
    rate_limiter,
    budget_engine,
    router,
    security,
    credential_redactor: Arc::new( CredentialDetector::new() ),
    usage_logger: UsageLogger::spawn( usage_store ),
    pricing,
    estimator: accproxy_cost::ByteLengthEstimator,
    http_client: reqwest::Client::new(),
    upstream_keys,
    upstream_base_urls,
    default_detection_level: DetectionLevel::Enforce,
    upstream_breaker: Arc::new( accproxy_reliability::CircuitBreaker::new( 5, 30 ) ),
  };

  ( state, tenant_id, secret )
}

async fn spawn_server( state: AppState ) -> String
{
  let app = build_router( state );
  let listener = tokio::net::TcpListener::bind( "127.0.0.1:0" ).await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn( async move { axum::serve( listener, app ).await.unwrap(); } );
  format!( "http://{addr}" )
}

#[tokio::test]
async fn buffered_anthropic_request_is_authenticated_routed_and_dispatched_to_upstream()
{
  let db_file = tempfile::NamedTempFile::new().unwrap();
  let database_url = format!( "sqlite://{}?mode=rwc", db_file.path().display() );

  let mock_server = MockServer::start().await;
  Mock::given( method( "POST" ) )
    .and( path( "/v1/messages" ) )
    .respond_with( ResponseTemplate::new( 200 ).set_body_json( serde_json::json!({
      "id": "msg_test",
      "content": [ { "type": "text", "text": "hello back" } ],
      "usage": { "input_tokens": 12, "output_tokens": 8 },
    } ) ) )
    .mount( &mock_server )
    .await;

  let ( state, _tenant_id, secret ) = build_test_state( &database_url, &mock_server.uri() ).await;
  let base_url = spawn_server( state ).await;

  let client = reqwest::Client::new();
  let response = client
    .post( format!( "{base_url}/v1/messages" ) )
    .header( "x-acc-api-key", &secret )
    .json( &serde_json::json!({
      "model": "claude-3-haiku-test",
      "max_tokens": 100,
      "messages": [ { "role": "user", "content": "hi there" } ],
    } ) )
    .send()
    .await
    .unwrap();

  assert_eq!( response.status(), reqwest::StatusCode::OK );
  assert!( response.headers().contains_key( "x-acc-cost" ) );
  assert!( response.headers().contains_key( "x-acc-tokens" ) );
  assert_eq!( response.headers().get( "x-acc-tokens" ).unwrap(), "20" );

  let body: serde_json::Value = response.json().await.unwrap();
  assert_eq!( body[ "content" ][ 0 ][ "text" ], "hello back" );
}

#[tokio::test]
async fn missing_credential_is_rejected_before_reaching_upstream()
{
  let db_file = tempfile::NamedTempFile::new().unwrap();
  let database_url = format!( "sqlite://{}?mode=rwc", db_file.path().display() );

  let mock_server = MockServer::start().await;
  // No mock registered: if the pipeline dispatched upstream despite the bad credential, this
  // would fail the request with a wiremock "unexpected request" panic instead of a clean 401.

  let ( state, _tenant_id, _secret ) = build_test_state( &database_url, &mock_server.uri() ).await;
  let base_url = spawn_server( state ).await;

  let client = reqwest::Client::new();
  let response = client
    .post( format!( "{base_url}/v1/messages" ) )
    .header( "x-acc-api-key", "not-the-right-secret" )
    .json( &serde_json::json!({ "model": "claude-3-haiku-test", "max_tokens": 100, "messages": [] }) )
    .send()
    .await
    .unwrap();

  assert_eq!( response.status(), reqwest::StatusCode::UNAUTHORIZED );
}
