//! Control protocol over the daemon's Unix socket.
//!
//! One JSON value per line in each direction. The daemon understands
//! exactly two verbs, so the request is a closed enum rather than a
//! free-form command string; replies are typed per verb.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// Everything the control socket can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonCommand {
    /// Fetch the watch status report.
    Status,
    /// Shut the daemon down gracefully.
    Stop,
}

/// One reply per request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "lowercase")]
pub enum DaemonReply {
    /// Answer to [`DaemonCommand::Status`].
    Status { report: String },
    /// Answer to [`DaemonCommand::Stop`]; the daemon exits after sending it.
    Stopping,
    /// The request could not be served.
    Error { message: String },
}

/// Send one command and read back its reply.
pub fn send_command(home: &Path, command: DaemonCommand) -> Result<DaemonReply, DaemonError> {
    let socket = socket_path(home);
    let mut stream = connect(&socket)?;

    let mut payload = serde_json::to_string(&command)?;
    payload.push('\n');
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;

    let mut line = String::new();
    let read = BufReader::new(stream)
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed the connection without replying".to_string(),
        ));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

fn connect(socket: &Path) -> Result<UnixStream, DaemonError> {
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning {
            socket: socket.to_path_buf(),
        });
    }
    UnixStream::connect(socket).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound
        | std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset => DaemonError::DaemonNotRunning {
            socket: socket.to_path_buf(),
        },
        _ => io_err(socket, err),
    })
}

/// Fetch the status report, retrying briefly while the socket comes up.
pub fn request_status(home: &Path) -> Result<String, DaemonError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match send_command(home, DaemonCommand::Status) {
            Ok(DaemonReply::Status { report }) => return Ok(report),
            Ok(DaemonReply::Stopping) => {
                return Err(DaemonError::Protocol("daemon is shutting down".to_string()))
            }
            Ok(DaemonReply::Error { message }) => return Err(DaemonError::Protocol(message)),
            Err(err @ DaemonError::DaemonNotRunning { .. }) if attempts >= 5 => return Err(err),
            Err(DaemonError::DaemonNotRunning { .. }) => sleep(Duration::from_millis(100)),
            Err(err) => return Err(err),
        }
    }
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    match send_command(home, DaemonCommand::Stop)? {
        DaemonReply::Stopping => Ok(()),
        DaemonReply::Error { message } => Err(DaemonError::Protocol(message)),
        DaemonReply::Status { .. } => Err(DaemonError::Protocol(
            "unexpected status reply to a stop request".to_string(),
        )),
    }
}
