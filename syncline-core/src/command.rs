//! Transfer command templates and the inlet handed to actions at dispatch.

use serde::{Deserialize, Serialize};

use crate::config::SyncDecl;
use crate::error::EngineError;
use crate::event::EventKind;
use crate::process::CommandLine;

/// Placeholders a template argument may embed.
const PLACEHOLDERS: &[&str] = &["source", "target", "event", "spath", "tpath", "spath2", "tpath2"];

/// Argv template for a transfer command.
///
/// The first element is the program; every element may embed `{source}`,
/// `{target}`, `{event}`, `{spath}`, `{tpath}`, `{spath2}` or `{tpath2}`,
/// expanded against the event being serviced. Startup templates only have
/// `{source}` and `{target}` available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(pub Vec<String>);

impl CommandTemplate {
    /// Check shape and placeholder names without an event at hand.
    pub fn validate(&self) -> Result<(), String> {
        if self.0.is_empty() {
            return Err("command template is empty".to_string());
        }
        for arg in &self.0 {
            for key in placeholder_names(arg) {
                if !PLACEHOLDERS.contains(&key) {
                    return Err(format!("unknown placeholder {{{key}}}"));
                }
            }
        }
        Ok(())
    }

    /// Expand against an inlet into a spawnable command line.
    pub fn render(&self, inlet: &Inlet<'_>) -> Result<CommandLine, EngineError> {
        let mut rendered = Vec::with_capacity(self.0.len());
        for arg in &self.0 {
            rendered.push(expand(arg, inlet)?);
        }
        let mut parts = rendered.into_iter();
        let program = parts.next().ok_or_else(|| EngineError::Placeholder {
            placeholder: "program".to_string(),
        })?;
        Ok(CommandLine {
            program,
            args: parts.collect(),
        })
    }
}

fn placeholder_names(arg: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = arg;
    while let Some(start) = rest.find('{') {
        rest = &rest[start + 1..];
        let Some(end) = rest.find('}') else { break };
        names.push(&rest[..end]);
        rest = &rest[end + 1..];
    }
    names
}

fn expand(arg: &str, inlet: &Inlet<'_>) -> Result<String, EngineError> {
    let mut out = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            // Unmatched brace; pass it through literally.
            out.push('{');
            rest = after;
            continue;
        };
        let key = &after[..end];
        match inlet.placeholder(key) {
            Some(value) => out.push_str(&value),
            None => {
                return Err(EngineError::Placeholder {
                    placeholder: key.to_string(),
                })
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// The event record an action services: source-side and target-side
/// absolute paths, plus the destination pair for moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub kind: EventKind,
    pub spath: String,
    pub tpath: String,
    pub spath2: Option<String>,
    pub tpath2: Option<String>,
}

/// Handle an action receives when invoked: the owning sync's policy plus
/// the next event to service (absent for startup commands).
pub struct Inlet<'a> {
    decl: &'a SyncDecl,
    event: Option<EventRecord>,
}

impl<'a> Inlet<'a> {
    pub fn new(decl: &'a SyncDecl, event: Option<EventRecord>) -> Self {
        Self { decl, event }
    }

    pub fn config(&self) -> &SyncDecl {
        self.decl
    }

    pub fn next_event(&self) -> Option<&EventRecord> {
        self.event.as_ref()
    }

    fn placeholder(&self, key: &str) -> Option<String> {
        match key {
            "source" => Some(self.decl.source.display().to_string()),
            "target" => Some(self.decl.target.clone()),
            "event" => self.event.as_ref().map(|e| e.kind.to_string()),
            "spath" => self.event.as_ref().map(|e| e.spath.clone()),
            "tpath" => self.event.as_ref().map(|e| e.tpath.clone()),
            "spath2" => self.event.as_ref().and_then(|e| e.spath2.clone()),
            "tpath2" => self.event.as_ref().and_then(|e| e.tpath2.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn decl() -> SyncDecl {
        SyncDecl {
            source: PathBuf::from("/srv/data"),
            target: "backup:/srv/data".to_string(),
            delay: 5,
            max_processes: 1,
            startup: None,
            action: None,
            attrib: None,
            create: None,
            modify: None,
            delete: None,
            move_: None,
            collapse: Default::default(),
        }
    }

    fn record() -> EventRecord {
        EventRecord {
            kind: EventKind::Modify,
            spath: "/srv/data/a.txt".to_string(),
            tpath: "backup:/srv/data/a.txt".to_string(),
            spath2: None,
            tpath2: None,
        }
    }

    #[test]
    fn renders_event_placeholders() {
        let decl = decl();
        let inlet = Inlet::new(&decl, Some(record()));
        let template = CommandTemplate(vec![
            "rsync".to_string(),
            "-a".to_string(),
            "{spath}".to_string(),
            "{tpath}".to_string(),
        ]);
        let cmd = template.render(&inlet).expect("render");
        assert_eq!(cmd.program, "rsync");
        assert_eq!(cmd.args, vec!["-a", "/srv/data/a.txt", "backup:/srv/data/a.txt"]);
    }

    #[test]
    fn renders_embedded_placeholders() {
        let decl = decl();
        let inlet = Inlet::new(&decl, Some(record()));
        let template = CommandTemplate(vec!["log".to_string(), "{event}:{spath}".to_string()]);
        let cmd = template.render(&inlet).expect("render");
        assert_eq!(cmd.args, vec!["modify:/srv/data/a.txt"]);
    }

    #[test]
    fn startup_inlet_has_no_event_paths() {
        let decl = decl();
        let inlet = Inlet::new(&decl, None);
        let ok = CommandTemplate(vec!["rsync".into(), "{source}/".into(), "{target}/".into()]);
        let cmd = ok.render(&inlet).expect("render");
        assert_eq!(cmd.args, vec!["/srv/data/", "backup:/srv/data/"]);

        let bad = CommandTemplate(vec!["rsync".into(), "{spath}".into()]);
        assert!(matches!(
            bad.render(&inlet),
            Err(EngineError::Placeholder { placeholder }) if placeholder == "spath"
        ));
    }

    #[test]
    fn validate_rejects_unknown_placeholder_and_empty() {
        let template = CommandTemplate(vec!["x".into(), "{bogus}".into()]);
        assert!(template.validate().is_err());
        assert!(CommandTemplate(vec![]).validate().is_err());
        let ok = CommandTemplate(vec!["rsync".into(), "{spath2}".into()]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn unmatched_brace_passes_through() {
        let decl = decl();
        let inlet = Inlet::new(&decl, Some(record()));
        let template = CommandTemplate(vec!["echo".into(), "a{b".into()]);
        let cmd = template.render(&inlet).expect("render");
        assert_eq!(cmd.args, vec!["a{b"]);
    }
}
