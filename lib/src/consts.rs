use std::ops::RangeInclusive;

/// Location of backlight devices
pub const DEVICES_PATH: &str = "/sys/class/backlight";

/// Filename for device's max brightness
pub const FILE_MAX_BRIGHTNESS: &str = "max_brightness";

/// set the requested brightness level
pub const FILE_BRIGHTNESS_WRITE: &str = "brightness";

/// Backlight power control, uses the FB_BLANK_* values
pub const FILE_BL_POWER: &str = "bl_power";

/// `FB_BLANK_UNBLANK`
pub const BL_POWER_ON: u32 = 0;

/// `FB_BLANK_POWERDOWN`
pub const BL_POWER_OFF: u32 = 4;

/// Location of industrial I/O devices, where ambient light sensors live
pub const IIO_DEVICES_PATH: &str = "/sys/bus/iio/devices";

/// Processed illuminance in lux
pub const FILE_ILLUMINANCE_INPUT: &str = "in_illuminance_input";

/// Raw illuminance, needs to be multiplied by [`FILE_ILLUMINANCE_SCALE`]
pub const FILE_ILLUMINANCE_RAW: &str = "in_illuminance_raw";

pub const FILE_ILLUMINANCE_SCALE: &str = "in_illuminance_scale";

/// Reported for displays that don't exist
pub const BRIGHTNESS_OFF: u32 = 0;

pub const BRIGHTNESS_MIN: u32 = 5;

pub const BRIGHTNESS_MAX: u32 = 255;

pub const BRIGHTNESS_DEFAULT: u32 = 102;

pub const DISCOUNT_MIN: f64 = 0.01;

pub const DISCOUNT_MAX: f64 = 1.00;

/// Time between two steps of a gradual brightness change
pub const DEFAULT_ANIMATION_STEP_MS: u64 = 30;

/// Auto brightness changes smaller than this are ignored
pub const BRIGHTNESS_CHANGE_MIN: u32 = 2;

/// Brightness moved per animation step when auto adjusting, before discount
pub const AUTO_ADJUST_BRIGHTNESS_STRIDE: f64 = 1.0;

pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 100;

/// A lux change has to exceed `last_lux / LUX_CHANGE_RATE_THRESHOLD + 1`
pub const LUX_CHANGE_RATE_THRESHOLD: f32 = 10.0;

/// Floor of the change threshold while waiting for the lux value to settle
pub const LUX_CHANGE_STABLE_MIN: f32 = 10.0;

pub const LUX_STABLE_TIME_MS: u64 = 1000;

/// Default (lux, brightness) breakpoints of the auto brightness curve
pub const DEFAULT_CURVE: [(f32, u32); 4] = [
    (0.0, BRIGHTNESS_MIN),
    (100.0, 120),
    (500.0, 220),
    (10000.0, BRIGHTNESS_MAX),
];

pub const SETTING_BRIGHTNESS_KEY: &str = "settings.display.screen_brightness_status";

pub const SETTING_AUTO_ADJUST_BRIGHTNESS_KEY: &str = "settings.display.auto_screen_brightness";

pub const AUTO_BRIGHTNESS_DISABLE: i64 = 0;

pub const AUTO_BRIGHTNESS_ENABLE: i64 = 1;

/// Directory below the user's config/data dirs
pub const APP_DIR: &str = "lumen";

/// Range of valid values for `root_scaling`
pub const ROOT_SCALING_RANGE: RangeInclusive<f64> = 0.1..=10.;

/// Range of valid values for `calibration`
pub const CALIBRATION_RANGE: RangeInclusive<f64> = 0.0..=100.;
