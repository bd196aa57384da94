use notify::{Config, Event, EventKind, RecursiveMode, Result};
pub(crate) use notify::{PollWatcher, Watcher};

use std::path::Path;
use std::time::Duration;

make_log_macro!(debug, "watcher");

/// Polls a single sysfs attribute and calls `on_change` whenever its content
/// differs from the previous poll.
pub(crate) fn pseudo_fs_watcher<P, F>(
    path: P,
    poll_interval: Duration,
    mut on_change: F,
) -> Result<PollWatcher>
where
    P: AsRef<Path>,
    F: FnMut() + Send + 'static,
{
    let config = Config::default()
        .with_compare_contents(true) // crucial part for pseudo filesystems
        .with_poll_interval(poll_interval);

    let mut poll_watcher = PollWatcher::new(
        move |res: Result<Event>| match res {
            Ok(event) if matches!(event.kind, EventKind::Modify(_)) => on_change(),
            Ok(_) => {}
            Err(e) => debug!("{e}"),
        },
        config,
    )?;

    poll_watcher.watch(path.as_ref(), RecursiveMode::NonRecursive)?;

    Ok(poll_watcher)
}
