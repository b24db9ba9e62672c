use foundation::color::Color;
use foundation::math::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("retry.max_attempts must be at least 1")]
    NoAttempts,
    #[error("{field} must be a finite, non-negative number (got {value})")]
    Negative { field: &'static str, value: f64 },
    #[error("eye_offset.step_m must be positive (got {0})")]
    ZeroStep(f64),
}

/// Bounded polling for drawables whose upload has not completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay between two attempts.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Total attempts per drawable, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_delay_ms() -> u64 {
    100
}

fn default_max_attempts() -> u32 {
    20
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Camera-distance driven depth bias for billboards and labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeOffsetConfig {
    #[serde(default = "default_billboard_scale")]
    pub billboard_scale: f64,
    #[serde(default = "default_label_scale")]
    pub label_scale: f64,
    /// Offsets are rounded to this step so small camera moves change nothing.
    #[serde(default = "default_step_m")]
    pub step_m: f64,
}

fn default_billboard_scale() -> f64 {
    0.001
}

fn default_label_scale() -> f64 {
    0.002
}

fn default_step_m() -> f64 {
    10.0
}

impl Default for EyeOffsetConfig {
    fn default() -> Self {
        Self {
            billboard_scale: default_billboard_scale(),
            label_scale: default_label_scale(),
            step_m: default_step_m(),
        }
    }
}

impl EyeOffsetConfig {
    /// Billboard offset for a camera `distance_m` away (negative z, toward the eye).
    pub fn billboard_offset(&self, distance_m: f64) -> Vec3 {
        self.offset(distance_m, self.billboard_scale)
    }

    pub fn label_offset(&self, distance_m: f64) -> Vec3 {
        self.offset(distance_m, self.label_scale)
    }

    fn offset(&self, distance_m: f64, scale: f64) -> Vec3 {
        let raw = distance_m.max(0.0) * scale;
        let z = (raw / self.step_m).round() * self.step_m;
        if z == 0.0 {
            return Vec3::ZERO;
        }
        Vec3::new(0.0, 0.0, -z)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub eye_offset: EyeOffsetConfig,
    /// RGBA in `0..=1`.
    #[serde(default = "default_highlight_color")]
    pub highlight_color: [f32; 4],
}

fn default_highlight_color() -> [f32; 4] {
    [1.0, 1.0, 0.0, 1.0]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            eye_offset: EyeOffsetConfig::default(),
            highlight_color: default_highlight_color(),
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        for (field, value) in [
            ("eye_offset.billboard_scale", self.eye_offset.billboard_scale),
            ("eye_offset.label_scale", self.eye_offset.label_scale),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Negative { field, value });
            }
        }
        let step = self.eye_offset.step_m;
        if !step.is_finite() || step <= 0.0 {
            return Err(ConfigError::ZeroStep(step));
        }
        Ok(())
    }

    pub fn highlight(&self) -> Color {
        Color::from_array(self.highlight_color)
    }
}
