//! Open a chapter PDF in the system's default viewer and delete it once the reader is done.
//! Also opens chapter pages in the web browser when no PDF can be shown.

use crate::tempfiles::TempPdf;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("Could not start {program}: {source}. Is a PDF viewer installed?")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited unsuccessfully (code {code:?}).")]
    Status { program: String, code: Option<i32> },

    #[error("Failed while waiting for the viewer: {source}")]
    Wait {
        #[source]
        source: io::Error,
    },
}

/// How a launcher returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opened {
    /// The viewer has been closed.
    Closed,
    /// The launcher handed off to a viewer that may still be running.
    Detached,
}

pub trait Viewer {
    /// Show `path`, blocking until the viewer exits where the platform allows it.
    fn open(&mut self, path: &Path) -> Result<Opened, ViewerError>;

    /// Open `url` in the default web browser without waiting for it.
    fn open_url(&mut self, url: &str) -> Result<(), ViewerError>;
}

/// Launches the OS default PDF handler.
#[derive(Debug, Default)]
pub struct SystemViewer;

#[derive(Debug, PartialEq, Eq)]
struct LaunchCommand {
    program: &'static str,
    args: Vec<OsString>,
    opened: Opened,
}

/// Launcher for `os` (as in `std::env::consts::OS`). macOS and Windows can wait for the viewer;
/// `xdg-open` returns as soon as it has handed the file off.
fn launch_command(os: &str, path: &Path) -> LaunchCommand {
    let path = path.as_os_str().to_os_string();
    match os {
        "macos" => LaunchCommand {
            program: "open",
            args: vec!["-W".into(), path],
            opened: Opened::Closed,
        },
        "windows" => LaunchCommand {
            program: "cmd",
            args: vec![
                "/C".into(),
                "start".into(),
                "".into(),
                "/WAIT".into(),
                path,
            ],
            opened: Opened::Closed,
        },
        _ => LaunchCommand {
            program: "xdg-open",
            args: vec![path],
            opened: Opened::Detached,
        },
    }
}

/// Browser launcher for `os`. `start` needs the empty window title so a quoted URL is not taken
/// for one.
fn browser_command(os: &str, url: &str) -> LaunchCommand {
    let url = OsString::from(url);
    let (program, args) = match os {
        "macos" => ("open", vec![url]),
        "windows" => ("cmd", vec!["/C".into(), "start".into(), "".into(), url]),
        _ => ("xdg-open", vec![url]),
    };
    LaunchCommand {
        program,
        args,
        opened: Opened::Detached,
    }
}

fn run_launcher(cmd: &LaunchCommand) -> Result<(), ViewerError> {
    debug!("launching {} {:?}", cmd.program, cmd.args);
    let status = Command::new(cmd.program)
        .args(&cmd.args)
        .status()
        .map_err(|source| ViewerError::Launch {
            program: cmd.program.to_string(),
            source,
        })?;
    if !status.success() {
        return Err(ViewerError::Status {
            program: cmd.program.to_string(),
            code: status.code(),
        });
    }
    Ok(())
}

impl Viewer for SystemViewer {
    fn open(&mut self, path: &Path) -> Result<Opened, ViewerError> {
        let cmd = launch_command(std::env::consts::OS, path);
        run_launcher(&cmd)?;
        Ok(cmd.opened)
    }

    fn open_url(&mut self, url: &str) -> Result<(), ViewerError> {
        run_launcher(&browser_command(std::env::consts::OS, url))
    }
}

/// Show `pdf` with `viewer`, then delete it.
///
/// If the viewer detached, `wait_for_reader` is called before deleting (typically a "press Enter"
/// prompt). The file is deleted whether or not viewing succeeded; a failed delete is only logged.
pub fn view_and_discard(
    viewer: &mut dyn Viewer,
    pdf: TempPdf,
    wait_for_reader: &mut dyn FnMut() -> io::Result<()>,
) -> Result<(), ViewerError> {
    let result = viewer.open(pdf.path()).and_then(|opened| match opened {
        Opened::Closed => Ok(()),
        Opened::Detached => wait_for_reader().map_err(|source| ViewerError::Wait { source }),
    });
    let path = pdf.path().to_path_buf();
    match pdf.close() {
        Ok(()) => debug!("deleted {}", path.display()),
        Err(e) => warn!("could not delete {}: {}", path.display(), e),
    }
    result
}
