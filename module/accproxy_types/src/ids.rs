//! Type-safe entity identifiers with runtime format validation.
//!
//! All IDs use the `prefix_uuid` format, e.g. `tenant_550e8400-e29b-41d4-a716-446655440000`.
//! The prefix is fixed per entity type so two different ID types can never be confused at
//! compile time, and `parse` rejects anything that isn't a well-formed UUID body — this is
//! the first line of defense against a malformed or hostile id showing up in a SQL query or
//! key-value store key built by string interpolation.

use serde::{ Deserialize, Serialize };
use std::fmt;

/// Entity ID prefixes.
pub mod prefix
{
  pub const TENANT: &str = "tenant_";
  pub const BUDGET: &str = "budget_";
  pub const ROUTING_RULE: &str = "rule_";
  pub const REQUEST: &str = "req_";
  pub const AGENT: &str = "agent_";
  pub const SECURITY_EVENT: &str = "sec_";
}

/// Errors that can occur while parsing an entity id.
#[derive( Debug, Clone, PartialEq, Eq, thiserror::Error )]
pub enum IdError
{
  #[error( "invalid id prefix: expected '{expected}', found '{found}'" )]
  InvalidPrefix
  {
    expected: &'static str,
    found: String,
  },

  #[error( "missing uuid component after prefix" )]
  MissingUuid,

  #[error( "invalid uuid format: '{0}'" )]
  InvalidUuid( String ),

  #[error( "empty id string" )]
  EmptyId,
}

/// Validates that a string is a lowercase-hex, hyphenated UUID body (8-4-4-4-12).
fn is_valid_uuid( s: &str ) -> bool
{
  if s.len() != 36
  {
    return false;
  }

  let parts: Vec< &str > = s.split( '-' ).collect();
  if parts.len() != 5
  {
    return false;
  }

  let expected_lens = [ 8, 4, 4, 4, 12 ];
  for ( part, &expected_len ) in parts.iter().zip( expected_lens.iter() )
  {
    if part.len() != expected_len || !part.chars().all( |c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase() )
    {
      return false;
    }
  }

  true
}

/// Defines a validated, prefixed entity id type.
macro_rules! define_id
{
  ( $name:ident, $prefix:expr, $doc:expr ) =>
  {
    #[ doc = $doc ]
    #[ derive( Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize ) ]
    #[ serde( try_from = "String", into = "String" ) ]
    pub struct $name( String );

    impl $name
    {
      /// Parse an id from a string, validating the prefix and uuid body.
      pub fn parse( s: impl AsRef< str > ) -> Result< Self, IdError >
      {
        let s = s.as_ref();

        if s.is_empty()
        {
          return Err( IdError::EmptyId );
        }

        if !s.starts_with( $prefix )
        {
          return Err( IdError::InvalidPrefix
          {
            expected: $prefix,
            found: s.chars().take( $prefix.len() + 1 ).collect(),
          } );
        }

        let uuid_part = &s[ $prefix.len().. ];
        if uuid_part.is_empty()
        {
          return Err( IdError::MissingUuid );
        }

        if !is_valid_uuid( uuid_part )
        {
          return Err( IdError::InvalidUuid( uuid_part.to_string() ) );
        }

        Ok( Self( s.to_string() ) )
      }

      /// Generate a new random id.
      pub fn generate() -> Self
      {
        Self( format!( "{}{}", $prefix, uuid::Uuid::new_v4() ) )
      }

      /// Borrow the id as a string slice.
      pub fn as_str( &self ) -> &str
      {
        &self.0
      }

      /// The fixed prefix for this id type.
      pub fn prefix() -> &'static str
      {
        $prefix
      }
    }

    impl fmt::Display for $name
    {
      fn fmt( &self, f: &mut fmt::Formatter< '_ > ) -> fmt::Result
      {
        write!( f, "{}", self.0 )
      }
    }

    impl TryFrom< String > for $name
    {
      type Error = IdError;

      fn try_from( value: String ) -> Result< Self, Self::Error >
      {
        Self::parse( value )
      }
    }

    impl From< $name > for String
    {
      fn from( id: $name ) -> Self
      {
        id.0
      }
    }

    impl AsRef< str > for $name
    {
      fn as_ref( &self ) -> &str
      {
        &self.0
      }
    }

    impl std::str::FromStr for $name
    {
      type Err = IdError;

      fn from_str( s: &str ) -> Result< Self, Self::Err >
      {
        Self::parse( s )
      }
    }

    #[cfg( feature = "test-helpers" )]
    impl $name
    {
      /// Deterministic fixture id for tests (`prefix` + zero-padded index as a uuid-shaped body).
      pub fn test_fixture( n: u32 ) -> Self
      {
        Self( format!( "{}00000000-0000-0000-0000-{:012}", $prefix, n ) )
      }
    }
  };
}

define_id!( TenantId, prefix::TENANT, "Identifies a tenant (billing/plan owner)." );
define_id!( BudgetId, prefix::BUDGET, "Identifies a budget record." );
define_id!( RoutingRuleId, prefix::ROUTING_RULE, "Identifies a smart-router rule." );
define_id!( RequestId, prefix::REQUEST, "Identifies a single proxied request, end to end." );
define_id!( AgentId, prefix::AGENT, "Identifies the calling agent within a tenant, when known." );
define_id!( SecurityEventId, prefix::SECURITY_EVENT, "Identifies a persisted security event." );

#[cfg( test )]
mod tests
{
  use super::*;

  #[test]
  fn generate_has_expected_prefix()
  {
    let id = TenantId::generate();
    assert!( id.as_str().starts_with( "tenant_" ) );
  }

  #[test]
  fn parse_round_trips_generated_id()
  {
    let id = BudgetId::generate();
    let parsed = BudgetId::parse( id.as_str() ).unwrap();
    assert_eq!( id, parsed );
  }

  #[test]
  fn parse_rejects_wrong_prefix()
  {
    let err = TenantId::parse( "budget_550e8400-e29b-41d4-a716-446655440000" ).unwrap_err();
    assert!( matches!( err, IdError::InvalidPrefix { .. } ) );
  }

  #[test]
  fn parse_rejects_malformed_uuid()
  {
    let err = RequestId::parse( "req_not-a-uuid" ).unwrap_err();
    assert!( matches!( err, IdError::InvalidUuid( .. ) ) );
  }

  #[test]
  fn parse_rejects_empty_string()
  {
    assert_eq!( AgentId::parse( "" ).unwrap_err(), IdError::EmptyId );
  }

  #[test]
  fn distinct_id_types_do_not_share_prefixes()
  {
    assert_ne!( TenantId::prefix(), BudgetId::prefix() );
    assert_ne!( RoutingRuleId::prefix(), RequestId::prefix() );
  }
}
