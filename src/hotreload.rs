//! Hot-reload watcher
//!
//! We watch **directories** (not individual files) because file replacement on save is often implemented as:
//! write temp → rename/replace → delete old. Directory watching is the most reliable cross-platform approach.
//!
//! The watcher sends lightweight signals to the render thread, which then:
//! - re-loads a changed library pair into its Glib (appended, consumers keep their index)
//! - routes a changed lab file into the Glab editor
//!
//! Any heavy work (file reads, shader compiles) remains on the render thread.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use glrack_engine::assets::{FRAGMENT_EXT, VERTEX_EXT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotEvent {
    /// A `.vert` or `.frag` file changed; the path is always the `.vert` sibling.
    PairChanged(PathBuf),
    /// One of the lab files was saved.
    LabChanged(PathBuf),
}

pub struct HotReload {
    _watcher: RecommendedWatcher,
    rx: Receiver<HotEvent>,
}

impl HotReload {
    /// Watch every library directory plus the folders holding the lab files.
    pub fn new(library_dirs: &[PathBuf], lab_files: &[PathBuf]) -> anyhow::Result<Self> {
        let (tx, rx) = unbounded::<HotEvent>();
        let lab: Vec<PathBuf> = lab_files.to_vec();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let Ok(ev) = res else {
                    return;
                };
                // Access events fire on every read; only writes matter.
                if matches!(ev.kind, EventKind::Access(_)) {
                    return;
                }
                for p in ev.paths {
                    if let Some(hot) = classify(&p, &lab) {
                        let _ = tx.send(hot);
                    }
                }
            },
            Config::default()
                // debounce-ish: notify 6 doesn’t do classic debounce, but polling less noisy helps
                .with_poll_interval(Duration::from_millis(250)),
        )?;

        let mut dirs = BTreeSet::new();
        dirs.extend(library_dirs.iter().cloned());
        dirs.extend(lab_files.iter().map(|f| parent_of(f)));
        for dir in dirs {
            if dir.is_dir() {
                watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            }
        }

        Ok(Self { _watcher: watcher, rx })
    }

    /// Drain pending events, dropping repeats of the same path.
    pub fn drain(&self) -> Vec<HotEvent> {
        let mut out: Vec<HotEvent> = Vec::new();
        for ev in self.rx.try_iter() {
            if !out.contains(&ev) {
                out.push(ev);
            }
        }
        out
    }
}

fn parent_of(file: &Path) -> PathBuf {
    file.parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Map a changed path to the event it stands for. Lab files win over pairs
/// so a lab kept inside a library folder is still routed to the editor.
pub fn classify(path: &Path, lab_files: &[PathBuf]) -> Option<HotEvent> {
    if lab_files.iter().any(|f| same_file(f, path)) {
        return Some(HotEvent::LabChanged(path.to_path_buf()));
    }
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) if ext == VERTEX_EXT => Some(HotEvent::PairChanged(path.to_path_buf())),
        Some(ext) if ext == FRAGMENT_EXT => Some(HotEvent::PairChanged(path.with_extension(VERTEX_EXT))),
        _ => None,
    }
}

// Watchers report absolute paths; config paths may not be canonical.
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}
