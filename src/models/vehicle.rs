//! Vehicle metadata derived from plate analysis.

use serde::{Deserialize, Serialize};

/// Broad vehicle class. Plate formats that both cars and motorcycles share
/// map to `AutoOrMoto`, which serializes to the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Auto,
    Moto,
    #[default]
    #[serde(rename = "")]
    AutoOrMoto,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Moto => "moto",
            Self::AutoOrMoto => "",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "auto" => Self::Auto,
            "moto" => Self::Moto,
            _ => Self::AutoOrMoto,
        }
    }
}

/// What the plate alone tells us about a vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VehicleInfo {
    /// ISO 3166-1 alpha-2 country code, empty when unknown.
    pub country: String,
    pub vehicle_type: VehicleType,
    /// Administrative subdivision code (ISO 3166-2 suffix), empty when the
    /// plate format does not encode one.
    pub adm_division: String,
    /// Special plate category (Oficial, Taxi, ...), empty for ordinary
    /// plates.
    pub category: String,
    /// True for the standardized Mercosur plate layout.
    pub mercosur_format: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_type_round_trip() {
        for t in [VehicleType::Auto, VehicleType::Moto, VehicleType::AutoOrMoto] {
            assert_eq!(VehicleType::from_str(t.as_str()), t);
        }
    }

    #[test]
    fn test_auto_or_moto_is_empty_string() {
        assert_eq!(VehicleType::AutoOrMoto.as_str(), "");
        assert_eq!(VehicleType::default(), VehicleType::AutoOrMoto);
    }
}
