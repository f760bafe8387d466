pub mod stub;
pub mod native;
pub mod process;
pub mod failsafe;

use std::path::Path;

use image::RgbImage;

use crate::error::{CaptureError, ExecutionError};
use crate::keys::Key;
use crate::logger;
use crate::types::*;

/// Read access to the display.
pub trait Display {
    /// Bounds of the capturable display in screen coordinates.
    fn bounds(&mut self) -> Result<Rect, CaptureError>;
    /// Grab `rect` (already inside `bounds`) as tightly packed RGB.
    fn grab(&mut self, rect: Rect) -> Result<RgbImage, CaptureError>;
}

/// OS-level pointer and keyboard injection.
pub trait InputDevice {
    fn cursor(&mut self) -> Result<(i32, i32), ExecutionError>;
    fn move_to(&mut self, x: i32, y: i32) -> Result<(), ExecutionError>;
    fn button(&mut self, button: MouseButton, direction: Direction) -> Result<(), ExecutionError>;
    /// Positive scrolls up, negative scrolls down.
    fn scroll(&mut self, amount: i32) -> Result<(), ExecutionError>;
    fn key(&mut self, key: Key, direction: Direction) -> Result<(), ExecutionError>;
    fn text(&mut self, text: &str) -> Result<(), ExecutionError>;
}

/// Spawning and terminating OS processes.
pub trait ProcessControl {
    /// Spawn `path` and return its PID.
    fn spawn(&mut self, path: &Path) -> Result<u32, ExecutionError>;
    fn kill(&mut self, pid: u32) -> Result<(), ExecutionError>;
    /// Force-kill every process named `name`; returns how many were killed.
    fn kill_by_name(&mut self, name: &str) -> Result<usize, ExecutionError>;
}

/// Platform-level factory for the handles above.
pub trait Platform: Send {
    fn create_display(&self) -> Result<Box<dyn Display>, CaptureError>;
    fn create_input(&self) -> Result<Box<dyn InputDevice>, ExecutionError>;
    fn create_processes(&self) -> Box<dyn ProcessControl>;
}

/// Create the platform appropriate for the current OS.
pub fn create_platform(force_stub: bool) -> Box<dyn Platform> {
    logger::register_prefix("exec", logger::COLOR_GRAY);
    logger::register_prefix("screen", logger::COLOR_GRAY);
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Box::new(stub::StubPlatform::new());
    }
    logger::register_prefix("native", logger::COLOR_GRAY);
    Box::new(native::NativePlatform)
}
