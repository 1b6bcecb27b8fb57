//! Per-tooth chart (odontograma) using FDI two-digit numbering.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{Audit, UnknownVariant};

/// Clinical state of a single tooth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToothState {
    #[serde(rename = "SANO")]
    Sound,
    #[serde(rename = "CARIES")]
    Caries,
    #[serde(rename = "RESTAURADO")]
    Restored,
    #[serde(rename = "ENDODONCIA")]
    RootCanal,
    #[serde(rename = "CORONA")]
    Crown,
    #[serde(rename = "EXTRACCION")]
    Extraction,
    #[serde(rename = "IMPLANTE")]
    Implant,
    #[serde(rename = "AUSENTE")]
    Missing,
    #[serde(rename = "FRACTURADO")]
    Fractured,
}

impl ToothState {
    pub const ALL: [ToothState; 9] = [
        ToothState::Sound,
        ToothState::Caries,
        ToothState::Restored,
        ToothState::RootCanal,
        ToothState::Crown,
        ToothState::Extraction,
        ToothState::Implant,
        ToothState::Missing,
        ToothState::Fractured,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToothState::Sound => "SANO",
            ToothState::Caries => "CARIES",
            ToothState::Restored => "RESTAURADO",
            ToothState::RootCanal => "ENDODONCIA",
            ToothState::Crown => "CORONA",
            ToothState::Extraction => "EXTRACCION",
            ToothState::Implant => "IMPLANTE",
            ToothState::Missing => "AUSENTE",
            ToothState::Fractured => "FRACTURADO",
        }
    }
}

impl fmt::Display for ToothState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToothState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToothState::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| UnknownVariant::new("tooth state", s))
    }
}

/// Current state of one tooth for one patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToothRecord {
    pub id: String,
    pub patient_id: String,
    /// FDI number, 11..=48
    pub tooth: u8,
    pub state: ToothState,
    /// Affected surfaces, e.g. "O,M"
    pub surfaces: Option<String>,
    pub notes: Option<String>,
    pub audit: Audit,
}

impl ToothRecord {
    pub fn new(patient_id: String, tooth: u8) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            tooth,
            state: ToothState::Sound,
            surfaces: None,
            notes: None,
            audit: Audit::now(),
        }
    }
}

/// A recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToothHistoryEntry {
    pub id: String,
    pub patient_id: String,
    pub tooth: u8,
    pub previous_state: Option<ToothState>,
    pub new_state: ToothState,
    pub notes: Option<String>,
    pub changed_at: String,
    pub changed_by: Option<String>,
    pub performed_treatment_id: Option<String>,
}

/// The 32 permanent teeth, quadrants 1-4 by positions 1-8.
pub fn permanent_teeth() -> Vec<u8> {
    (1..=4u8)
        .flat_map(|q| (1..=8u8).map(move |p| q * 10 + p))
        .collect()
}

pub fn is_permanent_tooth(tooth: u8) -> bool {
    matches!(tooth / 10, 1..=4) && matches!(tooth % 10, 1..=8)
}

/// Spanish anatomical name, e.g. 16 -> "Primer Molar Superior Derecho".
pub fn tooth_name(tooth: u8) -> Option<String> {
    if !is_permanent_tooth(tooth) {
        return None;
    }

    let kind = match tooth % 10 {
        1 => "Incisivo Central",
        2 => "Incisivo Lateral",
        3 => "Canino",
        4 => "Primer Premolar",
        5 => "Segundo Premolar",
        6 => "Primer Molar",
        7 => "Segundo Molar",
        _ => "Tercer Molar",
    };
    let side = match tooth / 10 {
        1 => "Superior Derecho",
        2 => "Superior Izquierdo",
        3 => "Inferior Izquierdo",
        _ => "Inferior Derecho",
    };

    Some(format!("{} {}", kind, side))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_teeth() {
        let teeth = permanent_teeth();
        assert_eq!(teeth.len(), 32);
        assert_eq!(teeth.first(), Some(&11));
        assert_eq!(teeth.last(), Some(&48));
        assert!(teeth.iter().all(|t| is_permanent_tooth(*t)));
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(!is_permanent_tooth(10));
        assert!(!is_permanent_tooth(19));
        assert!(!is_permanent_tooth(51));
        assert!(!is_permanent_tooth(8));
    }

    #[test]
    fn test_tooth_name() {
        assert_eq!(tooth_name(11).unwrap(), "Incisivo Central Superior Derecho");
        assert_eq!(tooth_name(36).unwrap(), "Primer Molar Inferior Izquierdo");
        assert_eq!(tooth_name(48).unwrap(), "Tercer Molar Inferior Derecho");
        assert!(tooth_name(55).is_none());
    }

    #[test]
    fn test_state_codes() {
        for state in ToothState::ALL {
            assert_eq!(state.as_str().parse::<ToothState>().unwrap(), state);
        }
    }
}
