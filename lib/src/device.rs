use crate::config::{BacklightConfig, BrightnessLimits, DeviceConfig};
use crate::consts::*;
use crate::errors::*;
use crate::screen::{DisplayId, DisplayState, PowerAck, ScreenAction};
use crate::util::*;

use std::cmp::max;
use std::path::{Path, PathBuf};

use regex::Regex;
use tokio::fs::{OpenOptions, read_dir};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use zbus::Connection;

make_log_macro!(debug, "device");
make_log_macro!(warn, "device");

#[zbus::dbus_proxy(
    interface = "org.freedesktop.login1.Session",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1/session/auto"
)]
trait Session {
    fn set_brightness(&self, subsystem: &str, name: &str, brightness: u32) -> zbus::Result<()>;
}

enum DeviceRequest {
    Brightness(u32),
    Power { on: bool, ack: Option<PowerAck> },
}

/// Maps a brightness in `0..=level_max` onto the device's raw range.
fn raw_brightness(
    value: u32,
    level_max: u32,
    max_brightness: u32,
    config: &DeviceConfig,
) -> Result<u32> {
    let ratio = f64::from(value) / f64::from(level_max.max(1));
    let ratio = scale_to_clamped_relative(ratio, config.calibration[0], config.calibration[1])?;
    let ratio = ratio.powf(config.root_scaling);
    Ok(max(1, (ratio * f64::from(max_brightness)).round() as u32))
}

/// A sysfs backlight device.
struct Backlight {
    device_name: String,
    write_brightness_file: PathBuf,
    bl_power_file: PathBuf,
    max_brightness: u32,
    level_max: u32,
    dbus_proxy: Option<SessionProxy<'static>>,
    config: DeviceConfig,
}

impl Backlight {
    async fn new(
        device_path: PathBuf,
        device_name: String,
        config: DeviceConfig,
        limits: BrightnessLimits,
        dbus_conn: Option<&Connection>,
    ) -> Result<Self> {
        let max_brightness = read_file(device_path.join(FILE_MAX_BRIGHTNESS))
            .await?
            .parse::<u32>()?;
        let dbus_proxy = match dbus_conn {
            Some(conn) => Some(SessionProxy::new(conn).await?),
            None => None,
        };
        debug!("{device_name}: max brightness {max_brightness}");
        Ok(Self {
            write_brightness_file: device_path.join(FILE_BRIGHTNESS_WRITE),
            bl_power_file: device_path.join(FILE_BL_POWER),
            device_name,
            max_brightness,
            level_max: limits.max,
            dbus_proxy,
            config,
        })
    }

    async fn write_sysfs(path: &Path, value: u32) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .await?;
        file.write_all(value.to_string().as_bytes()).await?;
        Ok(())
    }

    async fn set_brightness(&self, value: u32) -> Result<()> {
        let raw = raw_brightness(value, self.level_max, self.max_brightness, &self.config)?;
        if let Some(proxy) = &self.dbus_proxy {
            match proxy
                .set_brightness("backlight", &self.device_name, raw)
                .await
            {
                Ok(()) => return Ok(()),
                // Fall back to writing to sysfs brightness file
                Err(e) => debug!("{e}"),
            }
        }
        Self::write_sysfs(&self.write_brightness_file, raw).await
    }

    async fn set_power(&self, on: bool) -> Result<()> {
        let value = if on { BL_POWER_ON } else { BL_POWER_OFF };
        Self::write_sysfs(&self.bl_power_file, value).await
    }

    async fn serve(self, mut rx: UnboundedReceiver<DeviceRequest>) {
        while let Some(request) = rx.recv().await {
            match request {
                DeviceRequest::Brightness(value) => {
                    if let Err(e) = self.set_brightness(value).await {
                        warn!("{}: could not set brightness {value}: {e}", self.device_name);
                    }
                }
                DeviceRequest::Power { on, ack } => {
                    let result = self.set_power(on).await;
                    if let Err(e) = &result {
                        warn!("{}: could not set power: {e}", self.device_name);
                    }
                    if let Some(ack) = ack {
                        ack.complete(result.is_ok());
                    }
                }
            }
        }
        debug!("{}: released", self.device_name);
    }
}

/// Drives the backlights below `/sys/class/backlight`.
///
/// Displays are numbered in the order of their sorted device names. Requests
/// are handed to one writer task per device, so calls never wait for the
/// hardware; failures of brightness writes are only logged.
pub struct BacklightScreen {
    devices: Vec<(String, UnboundedSender<DeviceRequest>)>,
}

impl BacklightScreen {
    pub async fn discover(config: &BacklightConfig, limits: BrightnessLimits) -> Result<Self> {
        let dbus_conn = match Connection::system().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                debug!("no system bus, writing sysfs directly: {e}");
                None
            }
        };
        Self::discover_in(Path::new(DEVICES_PATH), config, limits, dbus_conn.as_ref()).await
    }

    async fn discover_in(
        devices_path: &Path,
        config: &BacklightConfig,
        limits: BrightnessLimits,
        dbus_conn: Option<&Connection>,
    ) -> Result<Self> {
        let device_regex = Regex::new(&config.device_regex)?;
        let mut sysfs_paths = read_dir(devices_path).await?;

        let mut device_names = Vec::new();
        while let Some(sysfs_path) = sysfs_paths.next_entry().await? {
            let device_name = sysfs_path.file_name().to_string_lossy().to_string();
            if device_regex.is_match(&device_name) {
                debug!("{device_name:?} matched {}", device_regex.as_str());
                device_names.push(device_name);
            }
        }
        device_names.sort();

        let backlights = join_all_accept_single_ok(device_names.into_iter().map(|device_name| {
            Backlight::new(
                devices_path.join(&device_name),
                device_name.clone(),
                config.get_device_config(&device_name),
                limits,
                dbus_conn,
            )
        }))
        .await?;

        let devices = backlights
            .into_iter()
            .map(|backlight| {
                let (tx, rx) = unbounded_channel();
                let name = backlight.device_name.clone();
                tokio::spawn(backlight.serve(rx));
                (name, tx)
            })
            .collect();
        Ok(Self { devices })
    }

    pub fn device_name(&self, display_id: DisplayId) -> Option<&str> {
        self.devices
            .get(display_id as usize)
            .map(|(name, _)| name.as_str())
    }

    fn send(&self, display_id: DisplayId, request: DeviceRequest) -> bool {
        match self.devices.get(display_id as usize) {
            Some((_, tx)) => tx.send(request).is_ok(),
            None => false,
        }
    }
}

impl ScreenAction for BacklightScreen {
    fn display_ids(&self) -> Vec<DisplayId> {
        (0..self.devices.len() as DisplayId).collect()
    }

    fn default_display_id(&self) -> DisplayId {
        0
    }

    fn set_brightness(&self, display_id: DisplayId, value: u32) -> bool {
        self.send(display_id, DeviceRequest::Brightness(value))
    }

    fn set_display_power(&self, display_id: DisplayId, state: DisplayState, _reason: u32) -> bool {
        match state {
            // backlights have no dim level of their own
            DisplayState::Dim => self.devices.get(display_id as usize).is_some(),
            DisplayState::Suspend | DisplayState::Off => self.send(
                display_id,
                DeviceRequest::Power {
                    on: false,
                    ack: None,
                },
            ),
            DisplayState::On => self.send(display_id, DeviceRequest::Power { on: true, ack: None }),
            DisplayState::Unknown => false,
        }
    }

    fn set_display_state(&self, display_id: DisplayId, state: DisplayState, ack: PowerAck) -> bool {
        let on = match state {
            DisplayState::On => true,
            DisplayState::Off => false,
            _ => return false,
        };
        self.send(display_id, DeviceRequest::Power { on, ack: Some(ack) })
    }
}
