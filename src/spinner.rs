//! Progress spinner shown on stderr while an import runs

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    execute,
    style::Print,
    terminal::{Clear, ClearType},
};
use std::io::{stderr, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::vm::{ImportError, ImportResult};

const FRAMES: [char; 4] = ['/', '-', '\\', '|'];
const PERIOD: Duration = Duration::from_millis(100);

/// Running spinner thread; stopped and joined by [`Spinner::finish`] or on drop
pub struct Spinner {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Spinner {
    /// Start spinning, or return an inert guard if `enabled` is false
    pub fn start(enabled: bool) -> ImportResult<Self> {
        let running = Arc::new(AtomicBool::new(enabled));
        if !enabled {
            return Ok(Self {
                running,
                handle: None,
            });
        }

        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("spinner".to_string())
            .spawn(move || spin(&flag))
            .map_err(|_| ImportError::Thread("start"))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it
    pub fn finish(mut self) -> ImportResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> ImportResult<()> {
        self.running.store(false, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ImportError::Thread("join")),
            None => Ok(()),
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn spin(running: &AtomicBool) {
    let mut err = stderr();
    let _ = execute!(err, Hide);
    for frame in FRAMES.iter().cycle() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let _ = execute!(err, MoveToColumn(0), Print(frame));
        thread::sleep(PERIOD);
    }
    let _ = execute!(err, MoveToColumn(0), Clear(ClearType::CurrentLine), Show);
    let _ = err.flush();
}
