//! Translation from notify's event model to the engine's kernel events.
//!
//! notify reports absolute paths; the engine wants (descriptor, basename).
//! Each notify event is split into per-directory events here, and the
//! runtime resolves the directory to its descriptor.

use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::EventKind as NotifyKind;

use syncline_core::EventKind;

/// One event localized to a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DirEvent {
    pub kind: EventKind,
    pub dir: PathBuf,
    pub name: String,
    pub name2: Option<String>,
    pub isdir: bool,
}

/// Outcome of translating one notify event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Translation {
    Deliver(Vec<DirEvent>),
    /// The kernel event queue overflowed; observed state is stale.
    Overflow,
    Ignore,
}

pub(crate) fn translate(event: &notify::Event) -> Translation {
    if event.need_rescan() {
        return Translation::Overflow;
    }
    match &event.kind {
        NotifyKind::Create(kind) => {
            let folder = match kind {
                CreateKind::Folder => Some(true),
                CreateKind::File => Some(false),
                _ => None,
            };
            deliver_each(event, EventKind::Create, folder)
        }
        NotifyKind::Remove(kind) => {
            // The path is gone; only the kind hint can tell files from dirs.
            deliver_each(event, EventKind::Delete, Some(matches!(kind, RemoveKind::Folder)))
        }
        NotifyKind::Modify(ModifyKind::Metadata(_)) => {
            deliver_each(event, EventKind::Attrib, Some(false))
        }
        NotifyKind::Modify(ModifyKind::Name(mode)) => translate_rename(event, *mode),
        NotifyKind::Modify(_) | NotifyKind::Any => deliver_each(event, EventKind::Modify, Some(false)),
        NotifyKind::Access(_) | NotifyKind::Other => Translation::Ignore,
    }
}

fn split(path: &Path) -> Option<(PathBuf, String)> {
    let dir = path.parent()?.to_path_buf();
    let name = path.file_name()?.to_string_lossy().into_owned();
    Some((dir, name))
}

fn deliver_each(event: &notify::Event, kind: EventKind, folder: Option<bool>) -> Translation {
    let mut out = Vec::new();
    for path in &event.paths {
        let Some((dir, name)) = split(path) else { continue };
        let isdir = folder.unwrap_or_else(|| path.is_dir());
        out.push(DirEvent {
            kind,
            dir,
            name,
            name2: None,
            isdir,
        });
    }
    if out.is_empty() {
        Translation::Ignore
    } else {
        Translation::Deliver(out)
    }
}

fn translate_rename(event: &notify::Event, mode: RenameMode) -> Translation {
    match mode {
        RenameMode::Both if event.paths.len() >= 2 => {
            let from = &event.paths[0];
            let to = &event.paths[1];
            let (Some((from_dir, from_name)), Some((to_dir, to_name))) = (split(from), split(to))
            else {
                return Translation::Ignore;
            };
            let isdir = to.is_dir();
            if from_dir == to_dir {
                Translation::Deliver(vec![DirEvent {
                    kind: EventKind::Move,
                    dir: from_dir,
                    name: from_name,
                    name2: Some(to_name),
                    isdir,
                }])
            } else {
                // Cross-directory rename: deliver each half where it happened.
                Translation::Deliver(vec![
                    DirEvent {
                        kind: EventKind::MoveFrom,
                        dir: from_dir,
                        name: from_name,
                        name2: None,
                        isdir,
                    },
                    DirEvent {
                        kind: EventKind::MoveTo,
                        dir: to_dir,
                        name: to_name,
                        name2: None,
                        isdir,
                    },
                ])
            }
        }
        RenameMode::From => deliver_each(event, EventKind::MoveFrom, Some(false)),
        RenameMode::To => {
            let isdir = event.paths.first().map(|p| p.is_dir());
            deliver_each(event, EventKind::MoveTo, isdir)
        }
        _ => {
            // Unpaired or unclassified rename; judge each path by presence.
            let mut out = Vec::new();
            for path in &event.paths {
                let Some((dir, name)) = split(path) else { continue };
                let (kind, isdir) = if path.exists() {
                    (EventKind::MoveTo, path.is_dir())
                } else {
                    (EventKind::MoveFrom, false)
                };
                out.push(DirEvent {
                    kind,
                    dir,
                    name,
                    name2: None,
                    isdir,
                });
            }
            if out.is_empty() {
                Translation::Ignore
            } else {
                Translation::Deliver(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use notify::event::{DataChange, Flag, MetadataKind};

    use super::*;

    #[test]
    fn create_file_translates() {
        let event = notify::Event::new(NotifyKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/watched/a.txt"));
        let Translation::Deliver(events) = translate(&event) else {
            panic!("expected delivery");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Create);
        assert_eq!(events[0].dir, PathBuf::from("/watched"));
        assert_eq!(events[0].name, "a.txt");
        assert!(!events[0].isdir);
    }

    #[test]
    fn folder_create_is_a_directory_event() {
        let event = notify::Event::new(NotifyKind::Create(CreateKind::Folder))
            .add_path(PathBuf::from("/watched/sub"));
        let Translation::Deliver(events) = translate(&event) else {
            panic!("expected delivery");
        };
        assert!(events[0].isdir);
    }

    #[test]
    fn data_change_is_modify_and_metadata_is_attrib() {
        let modify = notify::Event::new(NotifyKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/watched/a.txt"));
        let Translation::Deliver(events) = translate(&modify) else {
            panic!("expected delivery");
        };
        assert_eq!(events[0].kind, EventKind::Modify);

        let attrib =
            notify::Event::new(NotifyKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)))
                .add_path(PathBuf::from("/watched/a.txt"));
        let Translation::Deliver(events) = translate(&attrib) else {
            panic!("expected delivery");
        };
        assert_eq!(events[0].kind, EventKind::Attrib);
    }

    #[test]
    fn same_directory_rename_pairs_into_a_move() {
        let event = notify::Event::new(NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/watched/old.txt"))
            .add_path(PathBuf::from("/watched/new.txt"));
        let Translation::Deliver(events) = translate(&event) else {
            panic!("expected delivery");
        };
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Move);
        assert_eq!(events[0].name, "old.txt");
        assert_eq!(events[0].name2.as_deref(), Some("new.txt"));
    }

    #[test]
    fn cross_directory_rename_splits_into_halves() {
        let event = notify::Event::new(NotifyKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/watched/a/x"))
            .add_path(PathBuf::from("/watched/b/x"));
        let Translation::Deliver(events) = translate(&event) else {
            panic!("expected delivery");
        };
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::MoveFrom);
        assert_eq!(events[0].dir, PathBuf::from("/watched/a"));
        assert_eq!(events[1].kind, EventKind::MoveTo);
        assert_eq!(events[1].dir, PathBuf::from("/watched/b"));
    }

    #[test]
    fn rescan_flag_is_an_overflow() {
        let event = notify::Event::new(NotifyKind::Other).set_flag(Flag::Rescan);
        assert_eq!(translate(&event), Translation::Overflow);
    }

    #[test]
    fn access_events_are_ignored() {
        let event = notify::Event::new(NotifyKind::Access(notify::event::AccessKind::Read))
            .add_path(PathBuf::from("/watched/a.txt"));
        assert_eq!(translate(&event), Translation::Ignore);
    }
}
