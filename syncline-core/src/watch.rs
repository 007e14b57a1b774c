//! Kernel watch registration and descriptor → sync bindings.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::clock::Timestamp;
use crate::event::EventKind;
use crate::registry::SyncId;

/// Kernel watch descriptor, as assigned by the host backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Wd(pub i32);

/// Host primitive for registering kernel watches.
pub trait WatchBackend {
    /// Register a watch on `path`; `None` when registration failed.
    /// Registering the same directory twice must return the same descriptor.
    fn add_watch(&mut self, path: &Path) -> Option<Wd>;

    /// Basenames of the immediate subdirectories of `path`.
    fn sub_dirs(&mut self, path: &Path) -> Vec<OsString>;
}

/// A kernel notification localized to one watch descriptor.
#[derive(Debug, Clone)]
pub struct KernelEvent {
    pub kind: EventKind,
    pub wd: Wd,
    pub isdir: bool,
    /// Arrival timestamp; absent means "dispatch as soon as possible".
    pub time: Option<Timestamp>,
    pub name: String,
    /// Destination name for same-directory moves.
    pub name2: Option<String>,
}

/// One (sync, root, prefix) bound to a watch descriptor.
#[derive(Debug, Clone)]
pub struct Binding {
    pub sync: SyncId,
    pub root: PathBuf,
    /// Watched directory relative to `root`: "" for the root itself,
    /// otherwise slash-terminated.
    pub prefix: String,
}

/// Live mapping from kernel watch descriptors to sync bindings. Descriptors
/// are shared when several syncs observe the same directory.
#[derive(Debug, Default)]
pub struct WatchManager {
    wdlist: BTreeMap<Wd, Vec<Binding>>,
}

impl WatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `root/prefix` for `sync` and, when `recurse` is set, every
    /// subdirectory below it.
    ///
    /// Registration failures are logged and swallowed; the subtree is
    /// simply not observed.
    pub fn add(
        &mut self,
        backend: &mut dyn WatchBackend,
        root: &Path,
        sync: SyncId,
        prefix: &str,
        recurse: bool,
    ) {
        let dir = root.join(prefix);
        let Some(wd) = backend.add_watch(&dir) else {
            error!(path = %dir.display(), "watch registration failed, subtree not observed");
            return;
        };

        let bindings = self.wdlist.entry(wd).or_default();
        let known = bindings
            .iter()
            .any(|b| b.sync == sync && b.root == root && b.prefix == prefix);
        if known {
            // Already bound (a moved-back directory, say); the subtree below
            // it is bound too.
            return;
        }
        debug!(wd = wd.0, path = %dir.display(), "watching directory");
        bindings.push(Binding {
            sync,
            root: root.to_path_buf(),
            prefix: prefix.to_string(),
        });

        if recurse {
            for name in backend.sub_dirs(&dir) {
                let sub = format!("{prefix}{}/", name.to_string_lossy());
                self.add(backend, root, sync, &sub, true);
            }
        }
    }

    pub fn bindings(&self, wd: Wd) -> Option<&[Binding]> {
        self.wdlist.get(&wd).map(Vec::as_slice)
    }

    pub fn watch_count(&self) -> usize {
        self.wdlist.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Wd, &[Binding])> {
        self.wdlist.iter().map(|(wd, b)| (*wd, b.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct FakeBackend {
        next_wd: i32,
        registered: Vec<PathBuf>,
        by_dir: HashMap<PathBuf, Wd>,
        tree: HashMap<PathBuf, Vec<OsString>>,
        fail: Vec<PathBuf>,
    }

    impl WatchBackend for FakeBackend {
        fn add_watch(&mut self, path: &Path) -> Option<Wd> {
            if self.fail.iter().any(|f| f == path) {
                return None;
            }
            if let Some(wd) = self.by_dir.get(path) {
                return Some(*wd);
            }
            self.next_wd += 1;
            let wd = Wd(self.next_wd);
            self.registered.push(path.to_path_buf());
            self.by_dir.insert(path.to_path_buf(), wd);
            Some(wd)
        }

        fn sub_dirs(&mut self, path: &Path) -> Vec<OsString> {
            self.tree.get(path).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn add_recurses_into_subdirectories() {
        let mut backend = FakeBackend::default();
        backend.tree.insert(
            PathBuf::from("/root"),
            vec![OsString::from("a"), OsString::from("b")],
        );
        backend
            .tree
            .insert(PathBuf::from("/root/a"), vec![OsString::from("deep")]);

        let mut watches = WatchManager::new();
        watches.add(&mut backend, Path::new("/root"), SyncId(0), "", true);

        assert_eq!(watches.watch_count(), 4);
        assert_eq!(
            backend.registered,
            vec![
                PathBuf::from("/root"),
                PathBuf::from("/root/a"),
                PathBuf::from("/root/a/deep"),
                PathBuf::from("/root/b"),
            ]
        );
        // Prefixes are slash-terminated and relative to the root.
        let prefixes: Vec<String> = watches
            .iter()
            .flat_map(|(_, bindings)| bindings.iter().map(|b| b.prefix.clone()))
            .collect();
        assert!(prefixes.contains(&String::new()));
        assert!(prefixes.contains(&"a/".to_string()));
        assert!(prefixes.contains(&"a/deep/".to_string()));
        assert!(prefixes.contains(&"b/".to_string()));
    }

    #[test]
    fn registration_failure_skips_only_that_subtree() {
        let mut backend = FakeBackend::default();
        backend.tree.insert(
            PathBuf::from("/root"),
            vec![OsString::from("bad"), OsString::from("good")],
        );
        backend
            .tree
            .insert(PathBuf::from("/root/bad"), vec![OsString::from("below")]);
        backend.fail.push(PathBuf::from("/root/bad"));

        let mut watches = WatchManager::new();
        watches.add(&mut backend, Path::new("/root"), SyncId(0), "", true);

        assert_eq!(watches.watch_count(), 2, "root and good/, not bad/ or below it");
    }

    #[test]
    fn overlapping_syncs_share_a_descriptor() {
        let mut backend = FakeBackend::default();
        let mut watches = WatchManager::new();
        watches.add(&mut backend, Path::new("/root"), SyncId(0), "", false);
        watches.add(&mut backend, Path::new("/root"), SyncId(1), "", false);

        assert_eq!(watches.watch_count(), 1);
        let (_, bindings) = watches.iter().next().expect("one descriptor");
        assert_eq!(bindings.len(), 2);
    }

    #[test]
    fn re_adding_the_same_binding_is_a_no_op() {
        let mut backend = FakeBackend::default();
        let mut watches = WatchManager::new();
        watches.add(&mut backend, Path::new("/root"), SyncId(0), "", false);
        watches.add(&mut backend, Path::new("/root"), SyncId(0), "", false);

        let (_, bindings) = watches.iter().next().expect("one descriptor");
        assert_eq!(bindings.len(), 1);
    }
}
