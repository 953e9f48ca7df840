//! Shared process state: every injected handle the pipeline needs, wired once at startup and
//! cloned cheaply per request. Per §9's "global singletons -> explicit context" design note —
//! there is no module-level static anywhere in this crate.

use accproxy_budget::BudgetEngine;
use accproxy_cost::{ ByteLengthEstimator, PricingTable };
use accproxy_credentials::CredentialAuthState;
use accproxy_kv::SharedKvStore;
use accproxy_ratelimit::RateLimiter;
use accproxy_reliability::CircuitBreaker;
use accproxy_router::SmartRouter;
use accproxy_security::detectors::credential::CredentialDetector;
use accproxy_security::SecurityEngine;
use accproxy_usage::UsageLogger;
use accproxy_types::DetectionLevel;
use axum::extract::FromRef;
use std::sync::Arc;

/// Upstream provider API keys, read once from the environment at startup. `None` means that
/// provider's route will reject every request with `upstream_error` rather than dispatching
/// with no credential.
#[derive( Clone, Default )]
pub struct UpstreamKeys
{
  pub anthropic: Option< String >,
  pub openai: Option< String >,
  pub google: Option< String >,
}

/// Per-provider base URL overrides, defaulting to the real upstream hosts. Exists so
/// integration tests can redirect dispatch at a local mock server without touching the
/// dispatch logic itself, mirroring the original's per-key `base_url` override.
#[derive( Clone, Default )]
pub struct UpstreamBaseUrls
{
  pub anthropic: Option< String >,
  pub openai: Option< String >,
  pub google: Option< String >,
}

/// Everything a request handler needs, injected once at process startup.
#[derive( Clone )]
pub struct AppState
{
  pub credential_auth: CredentialAuthState,
  pub rate_limiter: Arc< RateLimiter< SharedKvStore > >,
  pub budget_engine: Arc< BudgetEngine< SharedKvStore > >,
  pub router: Arc< SmartRouter >,
  pub security: Arc< SecurityEngine >,
  /// Standalone instance used to redact credential-shaped content out of a response body
  /// once the engine's policy resolves to `redact` — the engine itself only classifies.
  pub credential_redactor: Arc< CredentialDetector >,
  pub usage_logger: UsageLogger,
  pub pricing: Arc< PricingTable >,
  pub estimator: ByteLengthEstimator,
  pub http_client: reqwest::Client,
  pub upstream_keys: UpstreamKeys,
  pub upstream_base_urls: UpstreamBaseUrls,
  pub default_detection_level: DetectionLevel,
  /// §4.14: one breaker per upstream provider, keyed by `Provider::as_str()` at call sites.
  pub upstream_breaker: Arc< CircuitBreaker >,
}

impl FromRef< AppState > for CredentialAuthState
{
  fn from_ref( state: &AppState ) -> Self
  {
    state.credential_auth.clone()
  }
}

impl std::fmt::Debug for AppState
{
  fn fmt( &self, f: &mut std::fmt::Formatter< '_ > ) -> std::fmt::Result
  {
    f.debug_struct( "AppState" ).finish_non_exhaustive()
  }
}
