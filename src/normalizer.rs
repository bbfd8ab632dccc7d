//! Raw verdict -> [`VerificationResult`], plus evidence-photo URL resolution.
//!
//! Nothing here touches the network; both are pure over their inputs.

use chrono::Utc;
use log::warn;

use crate::error::VerificationError;
use crate::models::{EvidenceRef, PpeItem, RawVerdict, VerificationResult};

/// Normalizes an inference payload.
///
/// `missing_items` follows [`PpeItem::ALL`] order no matter how the backend
/// orders its keys. Labels outside the known set are kept in
/// `raw_detections` only. A category the backend did not report at all is
/// not treated as missing, but a verdict that reports none of them is
/// rejected as malformed.
///
/// The result is non-compliant if either the detections or the backend's own
/// flag say so; a worker is never passed on a disagreement.
pub fn normalize(raw: RawVerdict) -> Result<VerificationResult, VerificationError> {
    let mut absent = Vec::new();
    let mut recognized = 0usize;
    for (label, present) in &raw.detections {
        match PpeItem::from_label(label) {
            Some(item) => {
                recognized += 1;
                if !present {
                    absent.push(item);
                }
            }
            None => warn!("ignoring unknown PPE label '{label}' in verdict"),
        }
    }
    if recognized == 0 {
        return Err(VerificationError::Payload {
            message: format!(
                "verdict reports none of the known PPE categories ({} label(s) received)",
                raw.detections.len()
            ),
        });
    }

    let missing_items: Vec<PpeItem> = PpeItem::ALL
        .iter()
        .copied()
        .filter(|item| absent.contains(item))
        .collect();
    let detected_ok = missing_items.is_empty();

    let compliant = match raw.compliant {
        Some(reported) if reported != detected_ok => {
            warn!(
                "backend compliance flag ({reported}) disagrees with detections ({detected_ok}); treating as non-compliant"
            );
            false
        }
        _ => detected_ok,
    };

    let evidence_ref = if compliant {
        None
    } else {
        raw.evidence_ref
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(EvidenceRef)
    };

    Ok(VerificationResult {
        compliant,
        missing_items,
        raw_detections: raw.detections,
        evidence_ref,
        verified_at: Utc::now(),
    })
}

/// Turns evidence references into fetchable URLs.
#[derive(Debug, Clone)]
pub struct EvidenceResolver {
    base_url: String,
}

impl EvidenceResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }

    pub fn url_for(&self, evidence: &EvidenceRef) -> String {
        let reference = evidence.as_str().trim();
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return reference.to_string();
        }
        format!("{}/{}", self.base_url, reference.trim_start_matches('/'))
    }

    pub fn url_for_result(&self, result: &VerificationResult) -> Option<String> {
        result.evidence_ref.as_ref().map(|evidence| self.url_for(evidence))
    }
}
