//! Stream Pump: relays an upstream SSE body to the client byte-for-byte while incrementally
//! extracting usage and running response-phase security, with a kill channel that can abort
//! the relay mid-stream. Per §4.8 and §8 scenario 6.

use accproxy_security::detectors::credential::CredentialDetector;
use accproxy_security::{ KillSignal, SecurityEngine };
use accproxy_types::DetectionLevel;
use accproxy_usage::{ StreamUsageAccumulator, StreamUsageResult };
use bytes::Bytes;
use futures::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

/// A synthetic SSE `error` event emitted to the client in place of whatever upstream bytes
/// were still in flight when a kill signal lands.
fn kill_event( signal: &KillSignal ) -> Bytes
{
  let payload = serde_json::json!({ "type": "error", "error": { "type": "security_blocked", "message": signal.reason.clone() } });
  Bytes::from( format!( "data: {payload}\n\n" ) )
}

/// Outcome of pumping one stream to completion: the final usage figure and whether the relay
/// was cut short by a kill signal.
pub struct PumpResult
{
  pub usage: StreamUsageResult,
  pub killed: bool,
}

/// Relays `upstream` line-by-line to a channel the caller turns into the client response body,
/// accumulating usage as it goes and racing `kill_rx` between chunks. `security` and
/// `credential_redactor` run response-phase detection on each parsed SSE data frame; a
/// `redact`-resolved frame has credential-shaped substrings scrubbed before being forwarded.
pub async fn pump(
  provider: &str,
  mut upstream: Pin< Box< dyn Stream< Item = reqwest::Result< Bytes > > + Send > >,
  out_tx: mpsc::Sender< Bytes >,
  mut kill_rx: mpsc::Receiver< KillSignal >,
  security: Arc< SecurityEngine >,
  credential_redactor: Arc< CredentialDetector >,
  context: accproxy_security::detector::DetectionContext,
  level: DetectionLevel,
) -> PumpResult
{
  let mut accumulator = StreamUsageAccumulator::new();
  let mut buffer = String::new();
  let mut killed = false;

  loop
  {
    tokio::select!
    {
      biased;

      signal = kill_rx.recv() =>
      {
        if let Some( signal ) = signal
        {
          let _ = out_tx.send( kill_event( &signal ) ).await;
          killed = true;
        }
        break;
      }

      chunk = upstream.next() =>
      {
        let Some( chunk ) = chunk else { break };
        let Ok( bytes ) = chunk else { break };

        buffer.push_str( &String::from_utf8_lossy( &bytes ) );
        let mut chunk_killed = false;

        while let Some( newline_at ) = buffer.find( '\n' )
        {
          let line: String = buffer.drain( ..= newline_at ).collect();
          let trimmed = line.trim_end_matches( [ '\r', '\n' ] );

          accumulator.record_line( provider, trimmed );

          match scan_line( trimmed, &security, &credential_redactor, &context, level )
          {
            LineOutcome::Forward( forwarded ) =>
            {
              if out_tx.send( Bytes::from( format!( "{forwarded}\n" ) ) ).await.is_err()
              {
                break;
              }
            }
            LineOutcome::Kill( reason ) =>
            {
              let signal = KillSignal { request_id: String::new(), threat_type: accproxy_types::ThreatType::CredentialExposure, reason };
              let _ = out_tx.send( kill_event( &signal ) ).await;
              chunk_killed = true;
              break;
            }
          }
        }

        if chunk_killed
        {
          killed = true;
          break;
        }
      }
    }
  }

  PumpResult { usage: accumulator.finish(), killed }
}

/// The result of running response-phase sync security against one parsed `data: ...` frame.
enum LineOutcome
{
  /// Forward this line to the client, possibly with credential-shaped substrings redacted.
  Forward( String ),
  /// A sync detector's finding escalated to `kill` (per the kill-switch confidence gate);
  /// the pump stops relaying and closes the stream after a synthetic error event.
  Kill( String ),
}

/// Runs response-phase sync security against one parsed `data: ...` frame. Frames that aren't
/// `data: ` lines, or that don't parse as JSON, are forwarded unchanged — the accumulator
/// already recorded their bytes.
fn scan_line( line: &str, security: &SecurityEngine, credential_redactor: &CredentialDetector, context: &accproxy_security::detector::DetectionContext, level: DetectionLevel ) -> LineOutcome
{
  let Some( data ) = line.strip_prefix( "data: " ) else { return LineOutcome::Forward( line.to_string() ) };
  if data.trim() == "[DONE]"
  {
    return LineOutcome::Forward( line.to_string() );
  }

  let Ok( chunk ) = serde_json::from_str::< serde_json::Value >( data ) else { return LineOutcome::Forward( line.to_string() ) };

  let outcome = security.scan_response_sync( &chunk, context, level );
  if outcome.is_kill()
  {
    let reason = outcome.events.iter().max_by_key( |e| e.action_taken ).map( |e| e.threat_type.as_str().to_string() ).unwrap_or_else( || "security kill".to_string() );
    return LineOutcome::Kill( reason );
  }
  if outcome.action == accproxy_types::ResponseAction::Redact
  {
    return LineOutcome::Forward( format!( "data: {}", credential_redactor.redact( data ) ) );
  }

  LineOutcome::Forward( line.to_string() )
}

#[cfg( test )]
mod tests
{
  use super::*;
  use accproxy_types::ThreatType;

  #[test]
  fn kill_event_carries_the_threat_reason()
  {
    let signal = KillSignal { request_id: "req_1".to_string(), threat_type: ThreatType::RunawayLoop, reason: "too many calls".to_string() };
    let bytes = kill_event( &signal );
    let text = String::from_utf8( bytes.to_vec() ).unwrap();
    assert!( text.contains( "too many calls" ) );
    assert!( text.starts_with( "data: " ) );
  }

  #[test]
  fn non_data_line_is_forwarded_unchanged()
  {
    let security = SecurityEngine::new( Vec::new(), Vec::new(), accproxy_security::policy::ResponsePolicy::default(), accproxy_security::KillSwitchConfig::default() );
    let redactor = CredentialDetector::new();
    let context = accproxy_security::detector::DetectionContext::default();
    match scan_line( "event: ping", &security, &redactor, &context, DetectionLevel::Enforce )
    {
      LineOutcome::Forward( line ) => assert_eq!( line, "event: ping" ),
      LineOutcome::Kill( _ ) => panic!( "expected forward" ),
    }
  }

  #[test]
  fn credential_exposure_with_kill_switch_armed_terminates_the_line()
  {
    // Scenario 6 from §8: a confident credential-exposure detection with auto-kill armed
    // escalates from the detector's default `redact` action to `kill`.
    let sync: Vec< Box< dyn accproxy_security::detector::SyncDetector > > = vec![ Box::new( CredentialDetector::new() ) ];
    let kill_switch = accproxy_security::KillSwitchConfig { auto_kill_enabled: true, auto_kill_threshold: 0.5 };
    let security = SecurityEngine::new( sync, Vec::new(), accproxy_security::policy::ResponsePolicy::default(), kill_switch );
    let redactor = CredentialDetector::new();
    let context = accproxy_security::detector::DetectionContext::default();

    let line = r#"data: {"content":"here is my key sk-ant-REDACTED"}"#;
    match scan_line( line, &security, &redactor, &context, DetectionLevel::Enforce )
    {
      LineOutcome::Kill( _ ) => {}
      LineOutcome::Forward( forwarded ) => panic!( "expected kill, got forward: {forwarded}" ),
    }
  }
}
