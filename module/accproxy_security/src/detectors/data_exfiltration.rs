//! Data Exfiltration detector: flags responses that are unusually large, or that carry a
//! base64-looking blob past a size threshold — a cheap proxy for bulk-encoded payloads riding
//! out in an otherwise ordinary-looking response. Sync, response-path only. Per §4.9.

use crate::detector::{ Detector, DetectionContext, SyncDetector };
use crate::model::{ DetectionResult, DetectionSource };
use crate::policy::DetectionThresholds;
use accproxy_types::{ Severity, ThreatType };
use serde_json::Value;

const MIN_BASE64_BLOB_LEN: usize = 512;

/// Flags large responses and large embedded base64 blobs.
pub struct DataExfiltrationDetector
{
  thresholds: DetectionThresholds,
}

impl Default for DataExfiltrationDetector
{
  fn default() -> Self
  {
    Self { thresholds: DetectionThresholds::default() }
  }
}

impl DataExfiltrationDetector
{
  pub fn new() -> Self
  {
    Self::default()
  }

  pub fn with_thresholds( thresholds: DetectionThresholds ) -> Self
  {
    Self { thresholds }
  }

  fn scan( &self, text: &str ) -> Vec< DetectionResult >
  {
    let size_kb = text.len() as u64 / 1024;
    if size_kb > self.thresholds.max_data_volume_kb
    {
      let mut evidence = std::collections::HashMap::new();
      evidence.insert( "size_kb".to_string(), Value::from( size_kb ) );
      return vec![ DetectionResult
      {
        detected: true,
        threat_type: ThreatType::DataExfiltration,
        severity: Severity::High,
        confidence: 0.7,
        source: DetectionSource::Heuristic,
        description: format!( "response volume {size_kb}KB exceeds {}KB threshold", self.thresholds.max_data_volume_kb ),
        evidence,
        rule_id: Some( "data_exfiltration.volume".to_string() ),
      } ];
    }

    if let Some( blob_len ) = largest_base64_blob_len( text )
    {
      if blob_len >= MIN_BASE64_BLOB_LEN
      {
        let mut evidence = std::collections::HashMap::new();
        evidence.insert( "blob_length".to_string(), Value::from( blob_len as u64 ) );
        return vec![ DetectionResult
        {
          detected: true,
          threat_type: ThreatType::DataExfiltration,
          severity: Severity::Medium,
          confidence: 0.5,
          source: DetectionSource::Heuristic,
          description: format!( "response contains a {blob_len}-byte base64-shaped blob" ),
          evidence,
          rule_id: Some( "data_exfiltration.base64_blob".to_string() ),
        } ];
      }
    }

    vec![ DetectionResult::clean( ThreatType::DataExfiltration ) ]
  }
}

/// Length of the longest contiguous run of base64-alphabet characters, as a cheap proxy for
/// an embedded encoded blob.
fn largest_base64_blob_len( text: &str ) -> Option< usize >
{
  let is_base64_char = |c: char| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=';
  text.split( |c: char| !is_base64_char( c ) ).map( str::len ).max()
}

fn extract_text( value: &Value ) -> String
{
  match value
  {
    Value::String( s ) => s.clone(),
    Value::Array( items ) => items.iter().map( extract_text ).collect::< Vec< _ > >().join( " " ),
    Value::Object( map ) => map.values().map( extract_text ).collect::< Vec< _ > >().join( " " ),
    _ => String::new(),
  }
}

impl Detector for DataExfiltrationDetector
{
  fn name( &self ) -> &str { "data_exfiltration" }
  fn threat_type( &self ) -> ThreatType { ThreatType::DataExfiltration }
  fn priority( &self ) -> i32 { 30 }
}

impl SyncDetector for DataExfiltrationDetector
{
  fn detect_request_sync( &self, _request: &Value, _context: &DetectionContext ) -> Vec< DetectionResult >
  {
    vec![ DetectionResult::clean( ThreatType::DataExfiltration ) ]
  }

  fn detect_response_sync( &self, response: &Value, _context: &DetectionContext ) -> Vec< DetectionResult >
  {
    self.scan( &extract_text( response ) )
  }
}

#[cfg( test )]
mod tests
{
  use super::*;
  use serde_json::json;

  #[test]
  fn small_response_is_clean()
  {
    let detector = DataExfiltrationDetector::new();
    let response = json!({ "content": "a short, ordinary reply" });
    let results = detector.detect_response_sync( &response, &DetectionContext::default() );
    assert!( !results[ 0 ].detected );
  }

  #[test]
  fn oversized_response_is_flagged()
  {
    let detector = DataExfiltrationDetector::with_thresholds( DetectionThresholds { max_data_volume_kb: 1, ..Default::default() } );
    let response = json!({ "content": "x".repeat( 2048 ) });
    let results = detector.detect_response_sync( &response, &DetectionContext::default() );
    assert!( results[ 0 ].detected );
    assert_eq!( results[ 0 ].severity, Severity::High );
  }

  #[test]
  fn large_base64_blob_is_flagged()
  {
    let detector = DataExfiltrationDetector::new();
    let blob = "QUJDREVGR0hJSktMTU5PUFFSU1RVVldYWVo=".repeat( 20 );
    let response = json!({ "content": format!( "here's your file: {blob}" ) });
    let results = detector.detect_response_sync( &response, &DetectionContext::default() );
    assert!( results[ 0 ].detected );
  }
}
