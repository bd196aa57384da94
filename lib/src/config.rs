use crate::consts::*;
use crate::errors::*;
use crate::util::*;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::Deserializer;
use smart_default::SmartDefault;

make_log_macro!(debug, "config");

/// Platform brightness constants.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, SmartDefault)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct BrightnessLimits {
    #[default(BRIGHTNESS_MIN)]
    pub min: u32,
    #[default(BRIGHTNESS_MAX)]
    pub max: u32,
    #[default(BRIGHTNESS_DEFAULT)]
    pub default: u32,
}

impl BrightnessLimits {
    /// `value = max(MIN, min(MAX, value))`
    pub fn clamp(&self, value: u32) -> u32 {
        value.clamp(self.min, self.max)
    }

    /// Same as [`BrightnessLimits::clamp`] for signed or out of range input.
    pub fn clamp_i64(&self, value: i64) -> u32 {
        value.clamp(i64::from(self.min), i64::from(self.max)) as u32
    }

    fn validate(&self) -> Result<()> {
        if self.max == 0 || self.min > self.max {
            return Err(LumenError::InvalidConfig(format!(
                "brightness range {}..={} is empty",
                self.min, self.max
            )));
        }
        if !(self.min..=self.max).contains(&self.default) {
            return Err(LumenError::InvalidConfig(format!(
                "default brightness {} is outside of {}..={}",
                self.default, self.min, self.max
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize, Clone, Debug, SmartDefault)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct AnimationConfig {
    #[default(DEFAULT_ANIMATION_STEP_MS)]
    pub step_interval_ms: u64,
}

impl AnimationConfig {
    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms.max(1))
    }
}

#[derive(Deserialize, Clone, Debug, SmartDefault)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct AutoBrightnessConfig {
    /// (lux, brightness) breakpoints
    #[default(DEFAULT_CURVE.to_vec())]
    #[serde(deserialize_with = "deserialize_curve")]
    pub curve: Vec<(f32, u32)>,

    #[default(AUTO_ADJUST_BRIGHTNESS_STRIDE)]
    #[serde(deserialize_with = "deserialize_positive")]
    pub adjust_stride: f64,

    #[default(BRIGHTNESS_CHANGE_MIN)]
    pub change_min: u32,

    #[default(DEFAULT_SAMPLING_INTERVAL_MS)]
    pub sampling_interval_ms: u64,
}

fn deserialize_curve<'de, D>(deserializer: D) -> Result<Vec<(f32, u32)>, D::Error>
where
    D: Deserializer<'de>,
{
    let curve: Vec<(f32, u32)> = Deserialize::deserialize(deserializer)?;
    debug!("{:?}", curve);

    if curve.is_empty() {
        return Err(serde::de::Error::invalid_length(0, &"at least one breakpoint"));
    }
    for pair in curve.windows(2) {
        let ((lux0, b0), (lux1, b1)) = (pair[0], pair[1]);
        if lux1 <= lux0 || b1 < b0 {
            return Err(serde::de::Error::invalid_value(
                serde::de::Unexpected::Other(format!("{pair:?}").as_str()),
                &"breakpoints increasing in lux and non-decreasing in brightness",
            ));
        }
    }

    Ok(curve)
}

#[derive(Deserialize, Clone, Debug, SmartDefault)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct LuxFilterConfig {
    #[default(LUX_CHANGE_RATE_THRESHOLD)]
    #[serde(deserialize_with = "deserialize_positive")]
    pub rate_threshold: f32,

    #[default(LUX_CHANGE_STABLE_MIN)]
    pub stable_min: f32,

    #[default(LUX_STABLE_TIME_MS)]
    pub stable_time_ms: u64,
}

#[derive(Deserialize, Clone, Debug, SmartDefault)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    #[default(1.0)]
    #[serde(deserialize_with = "deserialize_root_scaling")]
    pub root_scaling: f64,

    /// Calibration values are given as 0-100 in the config, but mapped to 0-1
    #[default([0.0, 1.0])]
    #[serde(deserialize_with = "deserialize_calibration")]
    pub calibration: [f64; 2],
}

/// Divisors must be finite and above zero.
fn deserialize_positive<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Into<f64> + Copy + std::fmt::Debug,
{
    let value: T = Deserialize::deserialize(deserializer)?;
    debug!("{:?}", value);

    let float: f64 = value.into();
    if !(float.is_finite() && float > 0.0) {
        return Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Float(float),
            &"a finite number greater than 0",
        ));
    }

    Ok(value)
}

fn deserialize_root_scaling<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let root_scaling = Deserialize::deserialize(deserializer)?;
    debug!("{:?}", root_scaling);

    if !ROOT_SCALING_RANGE.contains(&root_scaling) {
        return Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Float(root_scaling),
            &"number in the range of 0.1 to 10.",
        ));
    }

    Ok(root_scaling)
}

fn deserialize_calibration<'de, D>(deserializer: D) -> Result<[f64; 2], D::Error>
where
    D: Deserializer<'de>,
{
    let calibration: [f64; 2] = Deserialize::deserialize(deserializer)?;
    debug!("{:?}", calibration);
    if calibration[0] > calibration[1] {
        return Err(serde::de::Error::invalid_value(
            serde::de::Unexpected::Other(format!("{calibration:?}").as_str()),
            &format!(
                "Invalid scale parameters: {} > {}",
                calibration[0], calibration[1]
            )
            .as_str(),
        ));
    }

    for val in calibration {
        if !CALIBRATION_RANGE.contains(&val) {
            return Err(serde::de::Error::invalid_value(
                serde::de::Unexpected::Float(val),
                &"number in the range of 0.0 to 100.0",
            ));
        }
    }
    Ok(calibration.map(|val| val / 100.0))
}

#[derive(Deserialize, Clone, Debug, SmartDefault)]
#[serde(default)]
pub struct BacklightConfig {
    #[default(String::from("."))]
    pub device_regex: String,
    global: DeviceConfig,
    #[serde(flatten)]
    overrides: HashMap<String, DeviceConfig>,
}

impl BacklightConfig {
    pub(crate) fn get_device_config(&self, device_name: &str) -> DeviceConfig {
        debug!("{}", device_name);
        if let Some(device_config) = self.overrides.get(device_name) {
            debug!("{:?}", device_config);
            device_config.clone()
        } else {
            debug!("using global config");
            self.global.clone()
        }
    }
}

#[derive(Deserialize, Clone, Debug, SmartDefault)]
#[serde(default)]
#[serde(deny_unknown_fields)]
pub struct LumenConfig {
    pub brightness: BrightnessLimits,
    pub animation: AnimationConfig,
    pub auto_brightness: AutoBrightnessConfig,
    pub lux_filter: LuxFilterConfig,
    pub backlight: BacklightConfig,
    /// Where the brightness settings are persisted, defaults to the user's data dir.
    pub settings_path: Option<PathBuf>,
}

impl LumenConfig {
    /// Loads `path`, or `lumen/config.toml` from the user's config dir when no path
    /// is given. A missing default file yields the default configuration.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = match path {
            Some(path) => deserialize_toml_file(path).await?,
            None => match find_file("config", "toml") {
                Some(config_path) => deserialize_toml_file(config_path).await?,
                None => LumenConfig::default(),
            },
        };
        config.brightness.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = deserialize_toml(Path::new("<inline>"), contents)?;
        config.brightness.validate()?;
        Ok(config)
    }
}
