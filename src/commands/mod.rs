//! External command execution
//!
//! Everything that shells out goes through [`CommandRunner`] so tests can
//! substitute a fake that records invocations and simulates failures.

pub mod qemu_img;

use std::ffi::{OsStr, OsString};
use std::io;
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Run a program to completion and capture its output
pub trait CommandRunner {
    fn output(&self, program: &OsStr, args: &[OsString]) -> io::Result<Output>;
}

/// Spawns real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn output(&self, program: &OsStr, args: &[OsString]) -> io::Result<Output> {
        debug!("exec: {} {}", program.to_string_lossy(), render_args(args));
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
    }
}

fn render_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
