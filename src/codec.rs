//! ==============================================================================
//! codec.rs - register values to engineering units
//! ==============================================================================
//!
//! purpose:
//!     the soil sensor reports moisture (register 0) and temperature (register 1)
//!     as unsigned tenths. this module turns a raw pair into a classified Reading.
//!
//! relationships:
//!     - used by: acquisition.rs (after every successful read pair)
//!     - produces: domain::Reading
//!
//! ==============================================================================

use crate::domain::{MoistureStatus, Reading, TemperatureStatus};
use chrono::{DateTime, Utc};

/// decode a raw register pair captured at `captured_at`
pub fn decode(raw_moisture: u16, raw_temperature: u16, captured_at: DateTime<Utc>) -> Reading {
    let moisture = tenths(raw_moisture);
    let temperature = tenths(raw_temperature);

    Reading {
        moisture,
        temperature,
        moisture_status: MoistureStatus::classify(moisture),
        temp_status: TemperatureStatus::classify(temperature),
        captured_at,
    }
}

// an integer count of tenths is already exact to one decimal
fn tenths(raw: u16) -> f64 {
    f64::from(raw) / 10.0
}

impl MoistureStatus {
    /// good band is closed on both ends: 30..=60 percent
    pub fn classify(moisture: f64) -> Self {
        if moisture < 30.0 {
            Self::TooDry
        } else if moisture <= 60.0 {
            Self::Good
        } else {
            Self::TooWet
        }
    }

    /// text shown next to the value on the dashboard and in remote documents
    pub fn label(self) -> &'static str {
        match self {
            Self::TooDry => "Too Dry - Irrigation Needed",
            Self::Good => "Moisture Good",
            Self::TooWet => "Too Wet - Check Drainage",
        }
    }
}

impl TemperatureStatus {
    /// good band is closed on both ends: 10..=35 celsius
    pub fn classify(temperature: f64) -> Self {
        if temperature < 10.0 {
            Self::TooCold
        } else if temperature <= 35.0 {
            Self::Good
        } else {
            Self::TooHot
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TooCold => "Too Cold - Poor Growth",
            Self::Good => "Temperature Good",
            Self::TooHot => "Too Hot - Stress Risk",
        }
    }
}
