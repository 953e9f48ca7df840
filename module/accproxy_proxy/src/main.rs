//! Process entry point: load configuration, wire every store and engine into `AppState`,
//! build the router, and serve with graceful shutdown on ctrl-c.

use accproxy_budget::{ BudgetEngine, BudgetStore };
use accproxy_config::Config;
use accproxy_cost::{ ByteLengthEstimator, PricingTable };
use accproxy_credentials::{ CredentialAuthState, CredentialStore };
use accproxy_kv::{ InMemoryKvStore, RedisKvStore, SharedKvStore };
use accproxy_proxy::state::{ AppState, UpstreamKeys };
use accproxy_proxy::build_router;
use accproxy_ratelimit::RateLimiter;
use accproxy_reliability::CircuitBreaker;
use accproxy_router::{ RoutingRuleStore, SmartRouter };
use accproxy_security::baseline::BaselineStore;
use accproxy_security::detectors::anomaly::AnomalyDetector;
use accproxy_security::detectors::credential::CredentialDetector;
use accproxy_security::detectors::data_exfiltration::DataExfiltrationDetector;
use accproxy_security::detectors::prompt_injection::PromptInjectionDetector;
use accproxy_security::detectors::runaway::RunawayDetector;
use accproxy_security::detectors::tool_abuse::{ ToolAbuseDetector, ToolAllowlist };
use accproxy_security::policy::ResponsePolicy;
use accproxy_security::{ KillSwitchConfig, SecurityEngine };
use accproxy_usage::{ UsageLogger, UsageStore };
use std::sync::Arc;
use std::time::Duration;

/// §4.14: one breaker shared across upstream providers, keyed per-provider at the call site.
const UPSTREAM_BREAKER_FAILURE_THRESHOLD: u32 = 5;
const UPSTREAM_BREAKER_COOLDOWN_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result< (), Box< dyn std::error::Error > >
{
  let _ = dotenvy::dotenv();
  accproxy_telemetry::init_logging( accproxy_telemetry::LogLevel::Info )?;

  let config = Config::load()?;
  tracing::info!( bind_address = %config.server.bind_address, "starting accproxy" );

  let credential_store = Arc::new( CredentialStore::connect( &config.database.url ).await? );
  let budget_store = Arc::new( BudgetStore::connect( &config.database.url ).await? );
  let routing_store = RoutingRuleStore::connect( &config.database.url ).await?;
  let usage_store = Arc::new( UsageStore::connect( &config.database.url ).await? );

  let kv_store: SharedKvStore = match RedisKvStore::connect( &config.kv_store.url ).await
  {
    Ok( store ) => Arc::new( store ),
    Err( error ) =>
    {
      tracing::warn!( %error, "redis unavailable at startup, falling back to in-memory kv store" );
      Arc::new( InMemoryKvStore::new() )
    }
  };

  let rate_limiter = Arc::new( RateLimiter::with_limits(
    kv_store.clone(),
    Duration::from_secs( config.rate_limit.window_seconds ),
    config.rate_limit.max_requests,
  ) );

  let budget_pricing = Arc::new( PricingTable::new().map_err( std::io::Error::other )? );
  let budget_engine = Arc::new( BudgetEngine::new( budget_store, Arc::new( kv_store.clone() ), budget_pricing.clone() ) );

  let router_pricing = PricingTable::new().map_err( |e| std::io::Error::new( std::io::ErrorKind::Other, e ) )?;
  let router = Arc::new( SmartRouter::new( routing_store, router_pricing ) );

  let baseline = Arc::new( BaselineStore::new() );
  let security = Arc::new( SecurityEngine::new(
    vec!
    [
      Box::new( CredentialDetector::new() ),
      Box::new( DataExfiltrationDetector::new() ),
      Box::new( PromptInjectionDetector::new() ),
      Box::new( ToolAbuseDetector::new( ToolAllowlist::default() ) ),
    ],
    vec!
    [
      Arc::new( RunawayDetector::new( kv_store.clone() ) ) as Arc< dyn accproxy_security::detector::AsyncDetector >,
      Arc::new( AnomalyDetector::new( baseline ) ),
    ],
    ResponsePolicy::default(),
    KillSwitchConfig { auto_kill_enabled: config.security.auto_kill_enabled, auto_kill_threshold: config.security.auto_kill_threshold },
  ) );

  let credential_auth = CredentialAuthState
  {
    store: credential_store,
    salt: Arc::from( std::env::var( "ACCPROXY_CREDENTIAL_SALT" ).unwrap_or_else( |_| "accproxy-dev-salt".to_string() ).as_str() ),
  };

  let upstream_keys = UpstreamKeys
  {
    anthropic: std::env::var( "ANTHROPIC_API_KEY" ).ok(),
    openai: std::env::var( "OPENAI_API_KEY" ).ok(),
    google: std::env::var( "GOOGLE_API_KEY" ).ok(),
  };

  let state = AppState
  {
    credential_auth,
    rate_limiter,
    budget_engine,
    router,
    security,
    credential_redactor: Arc::new( CredentialDetector::new() ),
    usage_logger: UsageLogger::spawn( usage_store ),
    pricing: budget_pricing,
    estimator: ByteLengthEstimator,
    http_client: reqwest::Client::new(),
    upstream_keys,
    upstream_base_urls: accproxy_proxy::state::UpstreamBaseUrls::default(),
    default_detection_level: config.security.default_detection_level,
    upstream_breaker: Arc::new( CircuitBreaker::new( UPSTREAM_BREAKER_FAILURE_THRESHOLD, UPSTREAM_BREAKER_COOLDOWN_SECS ) ),
  };

  let app = build_router( state );

  let listener = tokio::net::TcpListener::bind( &config.server.bind_address ).await?;
  tracing::info!( local_addr = ?listener.local_addr()?, "accproxy listening" );

  axum::serve( listener, app )
    .with_graceful_shutdown( shutdown_signal() )
    .await?;

  Ok( () )
}

async fn shutdown_signal()
{
  let _ = tokio::signal::ctrl_c().await;
  tracing::info!( "shutdown signal received" );
}
