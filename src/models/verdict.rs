use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Known PPE categories. Declaration order is the order `missingItems` is reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PpeItem {
    Helmet,
    Vest,
    Gloves,
    Boots,
    Glasses,
    Mask,
}

impl PpeItem {
    pub const ALL: [PpeItem; 6] = [
        PpeItem::Helmet,
        PpeItem::Vest,
        PpeItem::Gloves,
        PpeItem::Boots,
        PpeItem::Glasses,
        PpeItem::Mask,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PpeItem::Helmet => "helmet",
            PpeItem::Vest => "vest",
            PpeItem::Gloves => "gloves",
            PpeItem::Boots => "boots",
            PpeItem::Glasses => "glasses",
            PpeItem::Mask => "mask",
        }
    }

    /// Maps a backend label onto a known category. Case and separators are ignored.
    pub fn from_label(label: &str) -> Option<PpeItem> {
        let normalized: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "helmet" | "hardhat" | "casco" => Some(PpeItem::Helmet),
            "vest" | "hivis" | "chaleco" => Some(PpeItem::Vest),
            "gloves" | "glove" | "guantes" => Some(PpeItem::Gloves),
            "boots" | "boot" | "botas" => Some(PpeItem::Boots),
            "glasses" | "goggles" | "lentes" | "gafas" => Some(PpeItem::Glasses),
            "mask" | "facemask" | "mascarilla" => Some(PpeItem::Mask),
            _ => None,
        }
    }
}

impl fmt::Display for PpeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque evidence reference (usually a photo id) issued by the inference service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceRef(pub String);

impl EvidenceRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Verdict as it comes off the wire, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVerdict {
    #[serde(default, alias = "ppe", alias = "epp")]
    pub detections: BTreeMap<String, bool>,
    #[serde(default)]
    pub compliant: Option<bool>,
    #[serde(default, alias = "photo", alias = "photoId", alias = "evidence")]
    pub evidence_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub compliant: bool,
    pub missing_items: Vec<PpeItem>,
    pub raw_detections: BTreeMap<String, bool>,
    pub evidence_ref: Option<EvidenceRef>,
    pub verified_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_map_onto_categories() {
        assert_eq!(PpeItem::from_label("Helmet"), Some(PpeItem::Helmet));
        assert_eq!(PpeItem::from_label("hard_hat"), Some(PpeItem::Helmet));
        assert_eq!(PpeItem::from_label("HI-VIS"), Some(PpeItem::Vest));
        assert_eq!(PpeItem::from_label("ear_muffs"), None);
    }

    #[test]
    fn raw_verdict_accepts_photo_alias() {
        let raw: RawVerdict =
            serde_json::from_str(r#"{"ppe": {"helmet": false}, "photo": "abc.jpg"}"#).unwrap();
        assert_eq!(raw.detections.get("helmet"), Some(&false));
        assert_eq!(raw.evidence_ref.as_deref(), Some("abc.jpg"));
        assert_eq!(raw.compliant, None);
    }

    #[test]
    fn ppe_items_serialize_lowercase() {
        let json = serde_json::to_string(&vec![PpeItem::Helmet, PpeItem::Glasses]).unwrap();
        assert_eq!(json, r#"["helmet","glasses"]"#);
    }
}
