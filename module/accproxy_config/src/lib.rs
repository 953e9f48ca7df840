//! Two-tier configuration: a TOML file selected by `ACCPROXY_ENV` (`development` by default,
//! also `test`/`production`), then environment-variable overrides applied on top.

use accproxy_types::DetectionLevel;
use serde::{ Deserialize, Serialize };
use std::path::Path;
use thiserror::Error;

#[derive( Debug, Error )]
pub enum ConfigError
{
  #[error( "config file not found: {0}" )]
  FileNotFound( String ),

  #[error( "failed to read config file {path}: {source}" )]
  ReadFailed { path: String, source: std::io::Error },

  #[error( "failed to parse config file {path}: {source}" )]
  ParseFailed { path: String, source: toml::de::Error },
}

pub type Result< T > = std::result::Result< T, ConfigError >;

/// Top-level configuration.
#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct Config
{
  pub server: ServerConfig,
  pub database: DatabaseConfig,
  pub kv_store: KvStoreConfig,
  pub security: SecurityConfig,
  pub rate_limit: RateLimitConfig,
}

#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct ServerConfig
{
  #[serde( default = "default_bind_address" )]
  pub bind_address: String,
}

#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct DatabaseConfig
{
  pub url: String,

  #[serde( default = "default_max_connections" )]
  pub max_connections: u32,
}

#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct KvStoreConfig
{
  pub url: String,
}

#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct SecurityConfig
{
  #[serde( default )]
  pub default_detection_level: DetectionLevel,

  #[serde( default )]
  pub auto_kill_enabled: bool,

  #[serde( default = "default_auto_kill_threshold" )]
  pub auto_kill_threshold: f64,
}

#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct RateLimitConfig
{
  #[serde( default = "default_rate_limit_window_seconds" )]
  pub window_seconds: u64,

  #[serde( default = "default_rate_limit_max_requests" )]
  pub max_requests: u32,
}

fn default_bind_address() -> String { "0.0.0.0:8080".to_string() }
fn default_max_connections() -> u32 { 5 }
fn default_auto_kill_threshold() -> f64 { 0.95 }
fn default_rate_limit_window_seconds() -> u64 { 60 }
fn default_rate_limit_max_requests() -> u32 { 1000 }

impl Config
{
  /// Loads from `ACCPROXY_ENV` (default `development`), then applies env overrides.
  pub fn load() -> Result< Self >
  {
    let env = std::env::var( "ACCPROXY_ENV" ).unwrap_or_else( |_| "development".to_string() );
    Self::from_env( &env )
  }

  pub fn from_env( env: &str ) -> Result< Self >
  {
    Self::from_file( &format!( "config.{env}.toml" ) )
  }

  pub fn from_file( path: &str ) -> Result< Self >
  {
    let config_path = Path::new( path );
    if !config_path.exists()
    {
      return Err( ConfigError::FileNotFound( path.to_string() ) );
    }

    let contents = std::fs::read_to_string( config_path )
      .map_err( |source| ConfigError::ReadFailed { path: path.to_string(), source } )?;

    let mut config: Config = toml::from_str( &contents )
      .map_err( |source| ConfigError::ParseFailed { path: path.to_string(), source } )?;

    config.apply_env_overrides();
    Ok( config )
  }

  /// Overrides matching §4.12: `DATABASE_URL`, `REDIS_URL`, `ACCPROXY_API_KEY_SALT` (read
  /// directly by `accproxy_credentials`, not stored here), `ACCPROXY_DETECTION_LEVEL`,
  /// `ACCPROXY_AUTO_KILL_ENABLED`, `ACCPROXY_AUTO_KILL_THRESHOLD`,
  /// `ACCPROXY_RATE_LIMIT_WINDOW_SECONDS`, `ACCPROXY_RATE_LIMIT_MAX_REQUESTS`.
  fn apply_env_overrides( &mut self )
  {
    if let Ok( url ) = std::env::var( "DATABASE_URL" )
    {
      self.database.url = url;
    }

    if let Ok( url ) = std::env::var( "REDIS_URL" )
    {
      self.kv_store.url = url;
    }

    if let Ok( level ) = std::env::var( "ACCPROXY_DETECTION_LEVEL" )
    {
      if let Ok( parsed ) = serde_plain_detection_level( &level )
      {
        self.security.default_detection_level = parsed;
      }
    }

    if let Ok( enabled ) = std::env::var( "ACCPROXY_AUTO_KILL_ENABLED" )
    {
      if let Ok( value ) = enabled.parse::< bool >()
      {
        self.security.auto_kill_enabled = value;
      }
    }

    if let Ok( threshold ) = std::env::var( "ACCPROXY_AUTO_KILL_THRESHOLD" )
    {
      if let Ok( value ) = threshold.parse::< f64 >()
      {
        self.security.auto_kill_threshold = value;
      }
    }

    if let Ok( window ) = std::env::var( "ACCPROXY_RATE_LIMIT_WINDOW_SECONDS" )
    {
      if let Ok( value ) = window.parse::< u64 >()
      {
        self.rate_limit.window_seconds = value;
      }
    }

    if let Ok( max_requests ) = std::env::var( "ACCPROXY_RATE_LIMIT_MAX_REQUESTS" )
    {
      if let Ok( value ) = max_requests.parse::< u32 >()
      {
        self.rate_limit.max_requests = value;
      }
    }
  }

  /// A development-shaped fixture, used by tests and as a template for `config.development.toml`.
  pub fn default_dev() -> Self
  {
    Self
    {
      server: ServerConfig { bind_address: default_bind_address() },
      database: DatabaseConfig { url: "sqlite://./dev_accproxy.db?mode=rwc".to_string(), max_connections: default_max_connections() },
      kv_store: KvStoreConfig { url: "redis://127.0.0.1:6379".to_string() },
      security: SecurityConfig { default_detection_level: DetectionLevel::Monitor, auto_kill_enabled: false, auto_kill_threshold: default_auto_kill_threshold() },
      rate_limit: RateLimitConfig { window_seconds: default_rate_limit_window_seconds(), max_requests: default_rate_limit_max_requests() },
    }
  }

  /// An in-memory-friendly fixture used by the test suite.
  pub fn default_test() -> Self
  {
    Self
    {
      server: ServerConfig { bind_address: "127.0.0.1:0".to_string() },
      database: DatabaseConfig { url: "sqlite://:memory:".to_string(), max_connections: 5 },
      kv_store: KvStoreConfig { url: "redis://127.0.0.1:6379/1".to_string() },
      security: SecurityConfig { default_detection_level: DetectionLevel::Enforce, auto_kill_enabled: false, auto_kill_threshold: default_auto_kill_threshold() },
      rate_limit: RateLimitConfig { window_seconds: 60, max_requests: 1000 },
    }
  }
}

fn serde_plain_detection_level( s: &str ) -> std::result::Result< DetectionLevel, () >
{
  match s.to_lowercase().as_str()
  {
    "disabled" => Ok( DetectionLevel::Disabled ),
    "monitor" => Ok( DetectionLevel::Monitor ),
    "warn" => Ok( DetectionLevel::Warn ),
    "enforce" => Ok( DetectionLevel::Enforce ),
    _ => Err( () ),
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn default_dev_has_expected_shape()
  {
    let config = Config::default_dev();
    assert_eq!( config.server.bind_address, "0.0.0.0:8080" );
    assert_eq!( config.rate_limit.max_requests, 1000 );
  }

  #[test]
  fn missing_config_file_errors()
  {
    let result = Config::from_file( "definitely-does-not-exist.toml" );
    assert!( matches!( result, Err( ConfigError::FileNotFound( _ ) ) ) );
  }

  #[test]
  fn env_override_replaces_detection_level()
  {
    std::env::set_var( "ACCPROXY_DETECTION_LEVEL", "enforce" );
    let mut config = Config::default_dev();
    config.apply_env_overrides();
    assert_eq!( config.security.default_detection_level, DetectionLevel::Enforce );
    std::env::remove_var( "ACCPROXY_DETECTION_LEVEL" );
  }
}
