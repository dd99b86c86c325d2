//! Air-quality index from gas resistance and humidity
//!
//! The score is 0..=100, higher is cleaner air: up to 25 points for humidity
//! near a comfortable reference and up to 75 points for gas resistance
//! (clean air reads as high resistance on a metal-oxide sensor). For the
//! familiar 0..=500 scale where higher is worse, use [`iaq_index`].

use serde::{Deserialize, Serialize};

use crate::sensors::SensorReadings;

/// Humidity points at the reference humidity.
const HUMIDITY_MAX_SCORE: f32 = 25.0;
/// Gas points at or above the upper resistance bound.
const GAS_MAX_SCORE: f32 = 75.0;
/// Humidity within this many points of the reference scores the maximum.
const HUMIDITY_TOLERANCE: f32 = 2.0;

/// Tuning for [`IaqParams::score`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IaqParams {
    /// Humidity that scores full marks, in %RH.
    pub reference_humidity: f32,
    /// Resistance that scores zero gas points, in Ω.
    pub gas_lower_ohms: u32,
    /// Resistance that scores full gas points, in Ω.
    pub gas_upper_ohms: u32,
}

impl Default for IaqParams {
    fn default() -> Self {
        Self {
            reference_humidity: 40.0,
            gas_lower_ohms: 5_000,
            gas_upper_ohms: 50_000,
        }
    }
}

impl IaqParams {
    /// Air-quality score in 0..=100 for any input.
    pub fn score(&self, gas_resistance_ohms: u32, humidity_percent: i32) -> u8 {
        let total = self.humidity_score(humidity_percent) + self.gas_score(gas_resistance_ohms);
        // Non-negative, so adding a half rounds to nearest
        (total.clamp(0.0, 100.0) + 0.5) as u8
    }

    fn humidity_score(&self, humidity_percent: i32) -> f32 {
        let reference = self.reference_humidity;
        let humidity = humidity_percent as f32;

        let score = if (humidity - reference).abs() <= HUMIDITY_TOLERANCE {
            HUMIDITY_MAX_SCORE
        } else if humidity < reference {
            0.25 / reference.max(1.0) * humidity * 100.0
        } else {
            0.25 * (100.0 - humidity) / (100.0 - reference).max(1.0) * 100.0
        };
        score.clamp(0.0, HUMIDITY_MAX_SCORE)
    }

    fn gas_score(&self, gas_resistance_ohms: u32) -> f32 {
        let lower = self.gas_lower_ohms.min(self.gas_upper_ohms);
        let upper = self.gas_upper_ohms;
        if upper == lower {
            return if gas_resistance_ohms >= upper { GAS_MAX_SCORE } else { 0.0 };
        }

        let gas = gas_resistance_ohms.clamp(lower, upper);
        (gas - lower) as f32 / (upper - lower) as f32 * GAS_MAX_SCORE
    }
}

/// Air-quality score with the default reference humidity and gas bounds.
pub fn calculate_iaq(gas_resistance_ohms: u32, humidity_percent: i32) -> u8 {
    IaqParams::default().score(gas_resistance_ohms, humidity_percent)
}

/// Map a 0..=100 score onto the 0..=500 index, where higher is worse.
pub fn iaq_index(score: u8) -> u16 {
    u16::from(100 - score.min(100)) * 5
}

/// Category label for an index on the 0..=500 scale.
pub fn iaq_to_text(index: i32) -> &'static str {
    IaqCategory::from_index(index).label()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IaqCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl IaqCategory {
    pub const fn from_index(index: i32) -> Self {
        match index {
            i32::MIN..=50 => Self::Good,
            51..=150 => Self::Moderate,
            151..=175 => Self::UnhealthyForSensitiveGroups,
            176..=200 => Self::Unhealthy,
            201..=300 => Self::VeryUnhealthy,
            301.. => Self::Hazardous,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very Unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }

    /// Label that fits a 21-column OLED line next to the index.
    pub const fn short_label(self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthyForSensitiveGroups => "Sensitive",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "V.Unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }
}

/// Score, index and category derived from one gas/humidity pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AirQuality {
    pub score: u8,
    pub index: u16,
    pub category: IaqCategory,
}

impl AirQuality {
    pub fn assess(params: &IaqParams, gas_resistance_ohms: u32, humidity_percent: i32) -> Self {
        let score = params.score(gas_resistance_ohms, humidity_percent);
        let index = iaq_index(score);
        Self {
            score,
            index,
            category: IaqCategory::from_index(i32::from(index)),
        }
    }
}

impl SensorReadings<1> for AirQuality {
    fn to_array(self) -> [i32; 1] {
        [i32::from(self.index) * 1000]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUMIDITIES: [i32; 11] = [i32::MIN, -1, 0, 20, 38, 40, 42, 60, 100, 101, i32::MAX];
    const GASES: [u32; 7] = [0, 1, 5_000, 27_500, 50_000, 50_001, u32::MAX];

    #[test]
    fn test_score_always_in_range() {
        for gas in GASES {
            for humidity in HUMIDITIES {
                let score = calculate_iaq(gas, humidity);
                assert!(score <= 100, "gas {gas}, humidity {humidity}: {score}");
            }
        }
    }

    #[test]
    fn test_best_case_is_full_score() {
        assert_eq!(calculate_iaq(50_000, 40), 100);
        assert_eq!(calculate_iaq(u32::MAX, 41), 100);
    }

    #[test]
    fn test_humidity_band_is_flat_around_reference() {
        for humidity in 38..=42 {
            assert_eq!(calculate_iaq(5_000, humidity), 25, "humidity {humidity}");
        }
        assert!(calculate_iaq(5_000, 37) < 25);
        assert!(calculate_iaq(5_000, 43) < 25);
    }

    #[test]
    fn test_humidity_ramps() {
        // 0.25 / 40 * 20 * 100
        assert_eq!(calculate_iaq(5_000, 20), 13);
        // 0.25 * 30 / 60 * 100
        assert_eq!(calculate_iaq(5_000, 70), 13);
        assert_eq!(calculate_iaq(5_000, 0), 0);
        assert_eq!(calculate_iaq(5_000, 100), 0);
    }

    #[test]
    fn test_gas_scales_linearly_between_bounds() {
        assert_eq!(calculate_iaq(0, 0), 0);
        assert_eq!(calculate_iaq(5_000, 0), 0);
        assert_eq!(calculate_iaq(27_500, 0), 38);
        assert_eq!(calculate_iaq(50_000, 0), 75);
        assert_eq!(calculate_iaq(u32::MAX, 0), 75);
    }

    #[test]
    fn test_degenerate_params_stay_in_range() {
        let params = IaqParams {
            reference_humidity: 100.0,
            gas_lower_ohms: 10_000,
            gas_upper_ohms: 10_000,
        };

        for gas in GASES {
            for humidity in HUMIDITIES {
                assert!(params.score(gas, humidity) <= 100);
            }
        }
        assert_eq!(params.score(10_000, 100), 100);
    }

    #[test]
    fn test_index_scale() {
        assert_eq!(iaq_index(100), 0);
        assert_eq!(iaq_index(90), 50);
        assert_eq!(iaq_index(0), 500);
    }

    #[test]
    fn test_category_boundaries() {
        let cases = [
            (50, "Good"),
            (51, "Moderate"),
            (150, "Moderate"),
            (151, "Unhealthy for Sensitive Groups"),
            (175, "Unhealthy for Sensitive Groups"),
            (176, "Unhealthy"),
            (200, "Unhealthy"),
            (201, "Very Unhealthy"),
            (300, "Very Unhealthy"),
            (301, "Hazardous"),
            (-5, "Good"),
        ];
        for (index, label) in cases {
            assert_eq!(iaq_to_text(index), label, "index {index}");
        }
    }

    #[test]
    fn test_categories_are_monotonic_over_index_range() {
        let order = |c: IaqCategory| c as u8;
        let mut previous = IaqCategory::from_index(0);
        let mut transitions = 0;

        for index in 1..=1000 {
            let current = IaqCategory::from_index(index);
            assert!(order(current) >= order(previous), "index {index}");
            if current != previous {
                transitions += 1;
            }
            previous = current;
        }

        assert_eq!(transitions, 5);
        assert_eq!(previous, IaqCategory::Hazardous);
    }

    #[test]
    fn test_assess_combines_score_and_category() {
        let quality = AirQuality::assess(&IaqParams::default(), 50_000, 40);

        assert_eq!(quality.score, 100);
        assert_eq!(quality.index, 0);
        assert_eq!(quality.category, IaqCategory::Good);

        let poor = AirQuality::assess(&IaqParams::default(), 5_000, 0);
        assert_eq!(poor.index, 500);
        assert_eq!(poor.category, IaqCategory::Hazardous);
    }
}
