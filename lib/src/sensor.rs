//! Ambient light input.

use tokio::sync::mpsc::UnboundedSender;

use crate::scheduler::Event;

#[cfg(feature = "ambient")]
pub use self::iio::IioLightSensor;

make_log_macro!(debug, "sensor");

/// Where a sensor delivers its lux readings, straight onto the service queue.
#[derive(Clone)]
pub struct LuxSink {
    tx: UnboundedSender<Event>,
}

impl LuxSink {
    pub(crate) fn new(tx: UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the service has stopped.
    pub fn deliver(&self, lux: f32) -> bool {
        self.tx.send(Event::AmbientLux(lux)).is_ok()
    }
}

pub trait AmbientSensor: Send {
    fn is_supported(&self) -> bool;

    /// Starts sampling into `sink`. Returns whether sampling started.
    fn activate(&mut self, sink: LuxSink) -> bool;

    fn deactivate(&mut self);
}

/// Used when the device has no ambient light sensor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSensor;

impl AmbientSensor for NoSensor {
    fn is_supported(&self) -> bool {
        false
    }

    fn activate(&mut self, _sink: LuxSink) -> bool {
        debug!("no ambient light sensor to activate");
        false
    }

    fn deactivate(&mut self) {}
}

#[cfg(feature = "ambient")]
mod iio {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use tokio::fs::read_dir;

    use super::{AmbientSensor, LuxSink};
    use crate::consts::*;
    use crate::errors::*;
    use crate::util::read_file;
    use crate::watcher::{PollWatcher, pseudo_fs_watcher};

    make_log_macro!(info, "sensor");
    make_log_macro!(warn, "sensor");

    /// The attribute holding the illuminance and the factor turning it into lux.
    #[derive(Debug, Clone)]
    struct LuxSource {
        file: PathBuf,
        scale: f64,
    }

    impl LuxSource {
        async fn probe(device_dir: &Path) -> Option<Self> {
            let input = device_dir.join(FILE_ILLUMINANCE_INPUT);
            if input.exists() {
                return Some(Self {
                    file: input,
                    scale: 1.0,
                });
            }
            let raw = device_dir.join(FILE_ILLUMINANCE_RAW);
            if !raw.exists() {
                return None;
            }
            let scale = match read_file(device_dir.join(FILE_ILLUMINANCE_SCALE)).await {
                Ok(scale) => scale.parse::<f64>().unwrap_or_else(|e| {
                    warn!("invalid illuminance scale {scale:?}: {e}");
                    1.0
                }),
                Err(_) => 1.0,
            };
            Some(Self { file: raw, scale })
        }

        fn read(&self) -> Result<f32> {
            let value: f64 = std::fs::read_to_string(&self.file)?.trim().parse()?;
            Ok((value * self.scale).max(0.0) as f32)
        }

        fn sample_into(&self, sink: &LuxSink) {
            match self.read() {
                Ok(lux) => {
                    sink.deliver(lux);
                }
                Err(e) => debug!("reading {} failed: {e}", self.file.display()),
            }
        }
    }

    /// Ambient light sensor exposed through the industrial I/O subsystem.
    pub struct IioLightSensor {
        source: LuxSource,
        poll_interval: Duration,
        watcher: Option<PollWatcher>,
    }

    impl IioLightSensor {
        /// Uses the first device below `/sys/bus/iio/devices` that reports illuminance.
        pub async fn discover(poll_interval: Duration) -> Result<Self> {
            Self::discover_in(Path::new(IIO_DEVICES_PATH), poll_interval).await
        }

        pub async fn discover_in(devices_path: &Path, poll_interval: Duration) -> Result<Self> {
            let mut entries = read_dir(devices_path).await?;
            let mut device_dirs = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                device_dirs.push(entry.path());
            }
            device_dirs.sort();

            for device_dir in device_dirs {
                if let Some(source) = LuxSource::probe(&device_dir).await {
                    info!("using {}", source.file.display());
                    return Ok(Self {
                        source,
                        poll_interval,
                        watcher: None,
                    });
                }
            }
            Err(LumenError::NoDevices)
        }
    }

    impl AmbientSensor for IioLightSensor {
        fn is_supported(&self) -> bool {
            true
        }

        fn activate(&mut self, sink: LuxSink) -> bool {
            if self.watcher.is_some() {
                return true;
            }
            let source = self.source.clone();
            let watcher_sink = sink.clone();
            match pseudo_fs_watcher(&self.source.file, self.poll_interval, move || {
                source.sample_into(&watcher_sink);
            }) {
                Ok(watcher) => {
                    self.watcher = Some(watcher);
                    // the watcher only reports changes
                    self.source.sample_into(&sink);
                    true
                }
                Err(e) => {
                    warn!("cannot watch {}: {e}", self.source.file.display());
                    false
                }
            }
        }

        fn deactivate(&mut self) {
            if self.watcher.take().is_some() {
                debug!("stopped watching {}", self.source.file.display());
            }
        }
    }

}
