//! Filesystem-change-triggered restarts.
//!
//! Each watching record owns a debounced recursive watcher over its working
//! directory (or an explicit path set). Relevant changes are reported to the
//! control loop as a name-scoped trigger; concurrent triggers for one name
//! collapse into a single in-flight restart.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use drover_daemon_types::AppDescriptor;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::SupervisorError;
use super::control::ControlEvent;

pub(crate) const WATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::watch");

/// Lower bound of the debounce window.
const MIN_DEBOUNCE: Duration = Duration::from_millis(100);

/// Housekeeping and dependency directories never worth a restart.
const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".drover",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
];

/// Decides whether a changed path is relevant to a watch.
#[derive(Debug, Clone, Default)]
pub(crate) struct IgnoreRules {
    patterns: Vec<glob::Pattern>,
}

impl IgnoreRules {
    pub(crate) fn new(patterns: &[String]) -> Self {
        let compiled = patterns
            .iter()
            .filter_map(|pattern| match glob::Pattern::new(pattern) {
                Ok(compiled) => Some(compiled),
                Err(error) => {
                    warn!(target: WATCH_TARGET, pattern, %error, "skipping invalid ignore pattern");
                    None
                }
            })
            .collect();
        Self { patterns: compiled }
    }

    pub(crate) fn ignores(&self, path: &Path) -> bool {
        let in_ignored_dir = path.components().any(|component| match component {
            Component::Normal(name) => name
                .to_str()
                .is_some_and(|name| IGNORED_DIRS.contains(&name)),
            _ => false,
        });
        if in_ignored_dir {
            return true;
        }
        let file_name = path.file_name().and_then(|name| name.to_str());
        self.patterns.iter().any(|pattern| {
            pattern.matches_path(path) || file_name.is_some_and(|name| pattern.matches(name))
        })
    }
}

/// Directories watched for `descriptor`.
pub(crate) fn watch_roots(descriptor: &AppDescriptor) -> Vec<PathBuf> {
    let base = descriptor
        .cwd
        .clone()
        .or_else(|| {
            Path::new(&descriptor.script)
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
        })
        .unwrap_or_else(|| PathBuf::from("."));
    if descriptor.watch.paths.is_empty() {
        return vec![base];
    }
    descriptor
        .watch
        .paths
        .iter()
        .map(|path| {
            if path.is_absolute() {
                path.clone()
            } else {
                base.join(path)
            }
        })
        .collect()
}

/// Active watchers keyed by process identifier.
pub(crate) struct WatchRegistry {
    watchers: Mutex<HashMap<u32, Debouncer<RecommendedWatcher>>>,
    in_flight: Mutex<HashSet<String>>,
    control: UnboundedSender<ControlEvent>,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WatchRegistry")
            .field("watching", &self.ids())
            .finish_non_exhaustive()
    }
}

impl WatchRegistry {
    pub(crate) fn new(control: UnboundedSender<ControlEvent>) -> Self {
        Self {
            watchers: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            control,
        }
    }

    /// Starts watching for process `id`, replacing any previous watcher.
    pub(crate) fn enable(&self, id: u32, descriptor: &AppDescriptor) -> Result<(), SupervisorError> {
        let name = descriptor.name.clone();
        let rules = IgnoreRules::new(&descriptor.watch.ignore);
        let control = self.control.clone();
        let window = Duration::from_millis(descriptor.watch.delay_ms).max(MIN_DEBOUNCE);
        let mut debouncer = new_debouncer(window, move |result: DebounceEventResult| {
            on_events(&name, &rules, &control, result);
        })
        .map_err(|source| SupervisorError::Watch {
            path: PathBuf::new(),
            source,
        })?;

        for root in watch_roots(descriptor) {
            debouncer
                .watcher()
                .watch(&root, RecursiveMode::Recursive)
                .map_err(|source| SupervisorError::Watch {
                    path: root.clone(),
                    source,
                })?;
            info!(
                target: WATCH_TARGET,
                id,
                app = %descriptor.name,
                root = %root.display(),
                debounce_ms = window.as_millis(),
                "watching for changes"
            );
        }
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, debouncer);
        Ok(())
    }

    /// Stops the watcher of process `id`; returns whether one was active.
    pub(crate) fn disable(&self, id: u32) -> bool {
        let removed = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            debug!(target: WATCH_TARGET, id, "stopped watching");
        }
        removed
    }

    pub(crate) fn disable_all(&self) {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        if !watchers.is_empty() {
            info!(target: WATCH_TARGET, count = watchers.len(), "stopping all watchers");
        }
        watchers.clear();
    }

    pub(crate) fn is_watching(&self, id: u32) -> bool {
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    fn ids(&self) -> Vec<u32> {
        let watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<u32> = watchers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Claims the restart slot for `name`; `false` if one is in flight.
    pub(crate) fn try_begin(&self, name: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned())
    }

    pub(crate) fn finish(&self, name: &str) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }
}

fn on_events(
    name: &str,
    rules: &IgnoreRules,
    control: &UnboundedSender<ControlEvent>,
    result: DebounceEventResult,
) {
    match result {
        Ok(events) => {
            let Some(changed) = events.iter().find(|event| !rules.ignores(&event.path)) else {
                return;
            };
            debug!(
                target: WATCH_TARGET,
                app = name,
                path = %changed.path.display(),
                "change detected"
            );
            let trigger = ControlEvent::WatchTriggered {
                name: name.to_owned(),
            };
            if control.send(trigger).is_err() {
                debug!(target: WATCH_TARGET, app = name, "control loop gone");
            }
        }
        Err(error) => {
            warn!(target: WATCH_TARGET, app = name, %error, "watcher error");
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::sync::mpsc;

    use super::*;

    #[rstest]
    #[case("/srv/app/node_modules/lib/index.js", true)]
    #[case("/srv/app/.git/HEAD", true)]
    #[case("/srv/app/logs/app-out.log", true)]
    #[case("/srv/app/src/main.js", false)]
    #[case("/srv/app/tmp/cache.bin", true)]
    fn ignores_housekeeping_and_patterns(#[case] path: &str, #[case] expected: bool) {
        let rules = IgnoreRules::new(&["*.log".to_owned(), "/srv/app/tmp/*".to_owned()]);
        assert_eq!(rules.ignores(Path::new(path)), expected);
    }

    #[rstest]
    #[case(Some("/srv/app"), "server.js", vec![], vec!["/srv/app"])]
    #[case(None, "/opt/api/bin/server", vec![], vec!["/opt/api/bin"])]
    #[case(None, "server", vec![], vec!["."])]
    #[case(Some("/srv/app"), "server.js", vec!["src", "/etc/app"], vec!["/srv/app/src", "/etc/app"])]
    fn resolves_watch_roots(
        #[case] cwd: Option<&str>,
        #[case] script: &str,
        #[case] paths: Vec<&str>,
        #[case] expected: Vec<&str>,
    ) {
        let mut descriptor = AppDescriptor::new("api", script);
        descriptor.cwd = cwd.map(PathBuf::from);
        descriptor.watch.paths = paths.into_iter().map(PathBuf::from).collect();
        let expected: Vec<PathBuf> = expected.into_iter().map(PathBuf::from).collect();
        assert_eq!(watch_roots(&descriptor), expected);
    }

    #[test]
    fn concurrent_triggers_collapse() {
        let (sender, _receiver) = mpsc::unbounded_channel();
        let registry = WatchRegistry::new(sender);
        assert!(registry.try_begin("api"));
        assert!(!registry.try_begin("api"));
        assert!(registry.try_begin("worker"));
        registry.finish("api");
        assert!(registry.try_begin("api"));
    }

    #[test]
    fn watches_and_unwatches_a_directory() {
        let dir = tempfile::tempdir().unwrap_or_else(|error| panic!("tempdir: {error}"));
        let (sender, _receiver) = mpsc::unbounded_channel();
        let registry = WatchRegistry::new(sender);
        let mut descriptor = AppDescriptor::new("api", "server");
        descriptor.cwd = Some(dir.path().to_path_buf());

        registry
            .enable(3, &descriptor)
            .unwrap_or_else(|error| panic!("enable: {error}"));
        assert!(registry.is_watching(3));
        assert!(registry.disable(3));
        assert!(!registry.is_watching(3));
    }
}
