//! Session configuration
//!
//! The values a host application supplies when constructing a session.
//! There is no runtime reconfiguration surface beyond the driver-initiated
//! baud-rate callback.

use serde::{Deserialize, Serialize};

/// Receiver session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Port identifier (e.g. `/dev/ttyACM0`, `COM4`)
    pub port: String,
    /// Line rate
    pub baud: u32,
    /// Survey-in acceptance accuracy, meters
    pub survey_accuracy: f32,
    /// Survey-in minimum duration, seconds
    pub survey_duration: f32,
}

impl SessionConfig {
    /// Create a configuration with default survey-in thresholds.
    #[must_use]
    pub fn new(port: &str, baud: u32) -> Self {
        Self {
            port: port.to_string(),
            baud,
            survey_accuracy: 1.0,
            survey_duration: 90.0,
        }
    }

    /// Set the survey-in acceptance accuracy in meters
    #[must_use]
    pub fn survey_accuracy(mut self, accuracy: f32) -> Self {
        self.survey_accuracy = accuracy;
        self
    }

    /// Set the survey-in minimum duration in seconds
    #[must_use]
    pub fn survey_duration(mut self, duration: f32) -> Self {
        self.survey_duration = duration;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("/dev/ttyACM0", 38_400)
    }
}
