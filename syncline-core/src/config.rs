//! Sync policy model and YAML configuration loading.
//!
//! `load()` reads, parses and validates in one step; validation
//! canonicalizes every source directory so the canonical path becomes the
//! sync's source. All errors carry enough context to be printed as the
//! daemon's dying words.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::collapse::CollapseOverrides;
use crate::command::CommandTemplate;
use crate::error::EngineError;
use crate::event::EventKind;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Root of the syncline configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub syncs: Vec<SyncDecl>,
}

/// One (source, target, policy) declaration.
///
/// `source` must be an existing directory; `target` is an opaque string
/// handed to the transfer commands. At least one of the per-kind handlers
/// or the `action` catch-all must be present.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncDecl {
    pub source: PathBuf,
    pub target: String,

    /// Seconds an event is buffered before dispatch.
    #[serde(default = "default_delay")]
    pub delay: u64,

    /// Upper bound on concurrently running transfer commands.
    #[serde(default = "default_max_processes")]
    pub max_processes: usize,

    /// Run once before normal operation; any nonzero exit is fatal.
    #[serde(default)]
    pub startup: Option<CommandTemplate>,

    /// Catch-all handler for kinds without a specific one.
    #[serde(default)]
    pub action: Option<CommandTemplate>,

    #[serde(default)]
    pub attrib: Option<CommandTemplate>,
    #[serde(default)]
    pub create: Option<CommandTemplate>,
    #[serde(default)]
    pub modify: Option<CommandTemplate>,
    #[serde(default)]
    pub delete: Option<CommandTemplate>,

    /// Move handler. Without one, moves degrade to delete/create pairs.
    #[serde(default, rename = "move")]
    pub move_: Option<CommandTemplate>,

    /// Sparse overrides of the collapse table.
    #[serde(default)]
    pub collapse: CollapseOverrides,
}

fn default_version() -> u32 {
    1
}

fn default_delay() -> u64 {
    5
}

fn default_max_processes() -> usize {
    1
}

impl SyncDecl {
    /// Command template servicing an event kind: the specific handler when
    /// declared, otherwise the `action` catch-all. Move kinds are serviced
    /// only by the `move` handler.
    pub fn template_for(&self, kind: EventKind) -> Option<&CommandTemplate> {
        match kind {
            EventKind::Attrib => self.attrib.as_ref().or(self.action.as_ref()),
            EventKind::Modify => self.modify.as_ref().or(self.action.as_ref()),
            EventKind::Create => self.create.as_ref().or(self.action.as_ref()),
            EventKind::Delete => self.delete.as_ref().or(self.action.as_ref()),
            EventKind::Move | EventKind::MoveFrom | EventKind::MoveTo => self.move_.as_ref(),
            EventKind::None => None,
        }
    }

    /// Whether any event handler is declared at all.
    pub fn has_handler(&self) -> bool {
        self.action.is_some()
            || self.attrib.is_some()
            || self.create.is_some()
            || self.modify.is_some()
            || self.delete.is_some()
            || self.move_.is_some()
    }

    fn templates(&self) -> impl Iterator<Item = (&'static str, &CommandTemplate)> {
        [
            ("startup", self.startup.as_ref()),
            ("action", self.action.as_ref()),
            ("attrib", self.attrib.as_ref()),
            ("create", self.create.as_ref()),
            ("modify", self.modify.as_ref()),
            ("delete", self.delete.as_ref()),
            ("move", self.move_.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, template)| template.map(|t| (name, t)))
    }
}

// ---------------------------------------------------------------------------
// Load + validate
// ---------------------------------------------------------------------------

/// Load and validate a configuration file.
pub fn load(path: &Path) -> Result<Config, EngineError> {
    let contents = fs::read_to_string(path).map_err(|e| EngineError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut config: Config = serde_yaml::from_str(&contents).map_err(|e| EngineError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    validate(&mut config)?;
    Ok(config)
}

/// Validate a parsed configuration, canonicalizing source directories.
pub fn validate(config: &mut Config) -> Result<(), EngineError> {
    if config.syncs.is_empty() {
        return Err(EngineError::InvalidConfig("no syncs declared".to_string()));
    }

    for decl in &mut config.syncs {
        let canonical = fs::canonicalize(&decl.source).map_err(|_| EngineError::SourceMissing {
            path: decl.source.clone(),
        })?;
        if !canonical.is_dir() {
            return Err(EngineError::InvalidSync {
                path: decl.source.clone(),
                reason: "source is not a directory".to_string(),
            });
        }
        decl.source = canonical;

        if !decl.has_handler() {
            return Err(EngineError::InvalidSync {
                path: decl.source.clone(),
                reason: "at least one of action, attrib, create, modify, delete, move must be set"
                    .to_string(),
            });
        }
        if decl.max_processes == 0 {
            return Err(EngineError::InvalidSync {
                path: decl.source.clone(),
                reason: "max_processes must be at least 1".to_string(),
            });
        }

        for (name, template) in decl.templates() {
            template.validate().map_err(|reason| EngineError::InvalidSync {
                path: decl.source.clone(),
                reason: format!("{name}: {reason}"),
            })?;
        }

        for (old, columns) in &decl.collapse {
            if old.collapse_index().is_none() {
                return Err(EngineError::InvalidSync {
                    path: decl.source.clone(),
                    reason: format!("collapse override row '{old}' is not a collapsible kind"),
                });
            }
            for new in columns.keys() {
                if new.collapse_index().is_none() {
                    return Err(EngineError::InvalidSync {
                        path: decl.source.clone(),
                        reason: format!(
                            "collapse override column '{new}' is not a collapsible kind"
                        ),
                    });
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.yaml");
        fs::write(&path, contents).expect("write config");
        path
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");
        let yaml = format!(
            "syncs:\n  - source: {}\n    target: /mnt/mirror\n    action: [\"rsync\", \"-a\", \"{{spath}}\", \"{{tpath}}\"]\n",
            source.display()
        );
        let path = write_config(&dir, &yaml);

        let config = load(&path).expect("load");
        assert_eq!(config.version, 1);
        assert_eq!(config.syncs.len(), 1);
        let decl = &config.syncs[0];
        assert_eq!(decl.delay, 5, "delay should default to 5 seconds");
        assert_eq!(decl.max_processes, 1, "max_processes should default to 1");
        assert_eq!(decl.source, fs::canonicalize(&source).expect("canonical"));
    }

    #[test]
    fn missing_source_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let yaml = "syncs:\n  - source: /definitely/not/here\n    target: t\n    action: [\"true\"]\n";
        let path = write_config(&dir, yaml);
        assert!(matches!(load(&path), Err(EngineError::SourceMissing { .. })));
    }

    #[test]
    fn sync_without_handlers_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");
        let yaml = format!("syncs:\n  - source: {}\n    target: t\n", source.display());
        let path = write_config(&dir, &yaml);
        assert!(matches!(load(&path), Err(EngineError::InvalidSync { .. })));
    }

    #[test]
    fn unknown_setting_is_a_parse_error() {
        let dir = TempDir::new().expect("tempdir");
        let yaml = "syncs:\n  - source: /tmp\n    target: t\n    action: [\"true\"]\n    frobnicate: 1\n";
        let path = write_config(&dir, yaml);
        assert!(matches!(load(&path), Err(EngineError::Parse { .. })));
    }

    #[test]
    fn zero_max_processes_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");
        let yaml = format!(
            "syncs:\n  - source: {}\n    target: t\n    max_processes: 0\n    action: [\"true\"]\n",
            source.display()
        );
        let path = write_config(&dir, &yaml);
        assert!(matches!(load(&path), Err(EngineError::InvalidSync { .. })));
    }

    #[test]
    fn bad_placeholder_is_rejected_at_load() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");
        let yaml = format!(
            "syncs:\n  - source: {}\n    target: t\n    action: [\"cp\", \"{{nope}}\"]\n",
            source.display()
        );
        let path = write_config(&dir, &yaml);
        match load(&path) {
            Err(EngineError::InvalidSync { reason, .. }) => {
                assert!(reason.contains("nope"), "reason should name the placeholder: {reason}")
            }
            other => panic!("expected InvalidSync, got {other:?}"),
        }
    }

    #[test]
    fn collapse_override_keys_must_be_collapsible() {
        let dir = TempDir::new().expect("tempdir");
        let source = dir.path().join("src");
        fs::create_dir(&source).expect("mkdir");
        let yaml = format!(
            "syncs:\n  - source: {}\n    target: t\n    action: [\"true\"]\n    collapse:\n      move:\n        create: cancel\n",
            source.display()
        );
        let path = write_config(&dir, &yaml);
        assert!(matches!(load(&path), Err(EngineError::InvalidSync { .. })));
    }

    #[test]
    fn move_kinds_resolve_only_to_move_handler() {
        let decl = SyncDecl {
            source: PathBuf::from("/s"),
            target: "t".to_string(),
            delay: 0,
            max_processes: 1,
            startup: None,
            action: Some(CommandTemplate(vec!["cp".into()])),
            attrib: None,
            create: None,
            modify: None,
            delete: None,
            move_: None,
            collapse: Default::default(),
        };
        assert!(decl.template_for(EventKind::Modify).is_some());
        assert!(decl.template_for(EventKind::Move).is_none());
        assert!(decl.template_for(EventKind::None).is_none());
    }
}
