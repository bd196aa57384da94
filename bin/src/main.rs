use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lumen::{DisplayState, LumenBuilder, LumenConfig, LumenError, VirtualScreen};

use clap::error::ErrorKind;
use clap::{ArgGroup, CommandFactory, Parser, ValueEnum};

/// How long to wait for the device to confirm the display is on.
const POWER_ON_TIMEOUT: Duration = Duration::from_secs(2);

/// Control display brightness and power
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(
            ArgGroup::new("action")
                .args(["get", "set", "adjust", "override_value", "boost", "discount", "auto", "state", "dump"]),
        ))]
struct Args {
    /// Display to act on, defaults to the main display
    #[arg(long, value_name = "id")]
    display: Option<u32>,

    /// Configuration file, defaults to lumen/config.toml in the user's config dir
    #[arg(long, value_name = "path")]
    config: Option<PathBuf>,

    /// Use an in-memory screen instead of the backlight devices
    #[arg(long = "virtual")]
    virtual_screen: bool,

    /// Print the persisted and the applied brightness.
    #[arg(long)]
    get: bool,

    /// Sets and persists the brightness.
    #[arg(long, value_name = "value")]
    set: Option<i64>,

    /// Moves the brightness to the given value over --duration.
    #[arg(long, value_name = "value", requires = "duration")]
    adjust: Option<i64>,

    /// Length of an --adjust transition.
    #[arg(long, value_name = "ms")]
    duration: Option<u32>,

    /// Replaces the brightness while --daemon runs, restored on exit.
    #[arg(long = "override", value_name = "value", requires = "daemon")]
    override_value: Option<i64>,

    /// Full brightness for the given time, cut short if --daemon exits first.
    #[arg(long, value_name = "ms")]
    boost: Option<i64>,

    /// Scales every applied brightness, 0.01 to 1.0.
    #[arg(long, value_name = "ratio")]
    discount: Option<f64>,

    /// Adjusts the brightness to the ambient light.
    #[arg(long, value_name = "mode")]
    auto: Option<Toggle>,

    /// Changes the display power state.
    #[arg(long, value_name = "state")]
    state: Option<DisplayState>,

    /// Print the state of every display.
    #[arg(long)]
    dump: bool,

    /// Keep running after the action, following setting changes and the ambient light, until interrupted.
    #[arg(long)]
    daemon: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

impl Args {
    fn has_action(&self) -> bool {
        self.get
            || self.set.is_some()
            || self.adjust.is_some()
            || self.override_value.is_some()
            || self.boost.is_some()
            || self.discount.is_some()
            || self.auto.is_some()
            || self.state.is_some()
            || self.dump
    }
}

#[tokio::main]
async fn main() -> Result<(), LumenError> {
    env_logger::init();
    let args = Args::parse();
    if !args.has_action() && !args.daemon {
        Args::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "an action or --daemon is required",
            )
            .exit();
    }

    let config = LumenConfig::load(args.config.as_deref()).await?;
    let mut builder = LumenBuilder::new().with_config(config);
    if args.virtual_screen {
        builder = builder.with_screen_action(Arc::new(VirtualScreen::new(1)));
    }
    let lumen = builder.build().await?;
    let display = args.display.unwrap_or_else(|| lumen.main_display_id());

    // brightness requests are rejected until the device confirmed the display is on
    match tokio::time::timeout(
        POWER_ON_TIMEOUT,
        lumen.apply_display_state(display, DisplayState::On, 0),
    )
    .await
    {
        Ok(true) => {}
        Ok(false) => log::warn!("could not power on display {display}"),
        Err(_) => log::warn!("display {display} did not power on within {POWER_ON_TIMEOUT:?}"),
    }
    lumen.boot_completed().await;

    let mut wait = Duration::ZERO;
    let ok = if args.get {
        println!(
            "{} {}",
            lumen.get_brightness(display),
            lumen.get_device_brightness(display)
        );
        true
    } else if let Some(value) = args.set {
        lumen.set_brightness(display, value).await
    } else if let Some(value) = args.adjust {
        let duration = args.duration.unwrap_or_default();
        wait = Duration::from_millis(u64::from(duration));
        lumen.adjust_brightness(display, value, duration).await
    } else if let Some(value) = args.override_value {
        lumen.override_brightness(display, value).await
    } else if let Some(timeout) = args.boost {
        wait = Duration::from_millis(timeout.max(0) as u64);
        lumen.boost_brightness(display, timeout).await
    } else if let Some(discount) = args.discount {
        lumen.discount_brightness(display, discount).await
    } else if let Some(mode) = args.auto {
        lumen
            .auto_adjust_brightness(matches!(mode, Toggle::On))
            .await
    } else if let Some(state) = args.state {
        lumen.apply_display_state(display, state, 0).await
    } else if args.dump {
        print!("{}", lumen.dump().await);
        true
    } else {
        true
    };

    if args.daemon && ok {
        tokio::signal::ctrl_c().await?;
        if args.override_value.is_some() {
            lumen.restore_brightness(display).await;
        }
        if args.boost.is_some() {
            lumen.cancel_boost_brightness(display).await;
        }
    } else {
        // let animations and boosts play out before the service stops
        tokio::time::sleep(wait).await;
    }
    lumen.shutdown().await;

    if ok {
        Ok(())
    } else {
        Err(LumenError::Other("request rejected".into()))
    }
}
