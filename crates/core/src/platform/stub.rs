use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use image::{Rgb, RgbImage};

use crate::error::{CaptureError, ExecutionError};
use crate::keys::Key;
use crate::logger;
use crate::types::*;
use super::{Display, InputDevice, Platform, ProcessControl};

/// Everything the stub recorded, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StubEvent {
    Move(i32, i32),
    Button(MouseButton, Direction),
    Scroll(i32),
    Key(Key, Direction),
    Text(String),
    Spawn(PathBuf),
    Kill(u32),
    KillByName(String),
}

pub struct StubState {
    pub screen: RgbImage,
    pub cursor: (i32, i32),
    pub events: Vec<StubEvent>,
    /// (pid, process name)
    pub processes: Vec<(u32, String)>,
    pub deny_capture: bool,
    /// Fail the Nth following `move_to` (1 = next one).
    pub fail_move_after: Option<u32>,
    next_pid: u32,
}

/// In-memory desktop: a repaintable framebuffer, a cursor and a process table.
#[derive(Clone)]
pub struct StubPlatform {
    state: Arc<Mutex<StubState>>,
}

impl Default for StubPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl StubPlatform {
    pub fn new() -> Self {
        Self::with_size(1920, 1080)
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        let screen = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x / 256 + y / 256) * 40 % 256) as u8])
        });
        Self {
            state: Arc::new(Mutex::new(StubState {
                screen,
                cursor: (width as i32 / 2, height as i32 / 2),
                events: Vec::new(),
                processes: Vec::new(),
                deny_capture: false,
                fail_move_after: None,
                next_pid: 4000,
            })),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn events(&self) -> Vec<StubEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    /// Fill `rect` of the framebuffer with `color`.
    pub fn paint(&self, rect: Rect, color: [u8; 3]) {
        let mut s = self.lock();
        let (w, h) = s.screen.dimensions();
        for y in rect.top.max(0) as u32..(rect.bottom().min(h as i64).max(0) as u32) {
            for x in rect.left.max(0) as u32..(rect.right().min(w as i64).max(0) as u32) {
                s.screen.put_pixel(x, y, Rgb(color));
            }
        }
    }

    /// Pretend an unrelated process with `name` is running.
    pub fn add_process(&self, name: &str) -> u32 {
        let mut s = self.lock();
        let pid = s.next_pid;
        s.next_pid += 1;
        s.processes.push((pid, name.to_string()));
        pid
    }
}

impl Platform for StubPlatform {
    fn create_display(&self) -> Result<Box<dyn Display>, CaptureError> {
        Ok(Box::new(self.clone()))
    }

    fn create_input(&self) -> Result<Box<dyn InputDevice>, ExecutionError> {
        Ok(Box::new(self.clone()))
    }

    fn create_processes(&self) -> Box<dyn ProcessControl> {
        Box::new(self.clone())
    }
}

impl Display for StubPlatform {
    fn bounds(&mut self) -> Result<Rect, CaptureError> {
        let s = self.lock();
        if s.deny_capture {
            return Err(CaptureError::AccessDenied("stub display locked".into()));
        }
        Ok(Rect::new(0, 0, s.screen.width(), s.screen.height()))
    }

    fn grab(&mut self, rect: Rect) -> Result<RgbImage, CaptureError> {
        let s = self.lock();
        if s.deny_capture {
            return Err(CaptureError::AccessDenied("stub display locked".into()));
        }
        let view = image::imageops::crop_imm(
            &s.screen,
            rect.left.max(0) as u32,
            rect.top.max(0) as u32,
            rect.width,
            rect.height,
        );
        Ok(view.to_image())
    }
}

impl InputDevice for StubPlatform {
    fn cursor(&mut self) -> Result<(i32, i32), ExecutionError> {
        Ok(self.lock().cursor)
    }

    fn move_to(&mut self, x: i32, y: i32) -> Result<(), ExecutionError> {
        let mut s = self.lock();
        if let Some(n) = s.fail_move_after {
            if n <= 1 {
                s.fail_move_after = None;
                return Err(ExecutionError::Backend("stub move failure".into()));
            }
            s.fail_move_after = Some(n - 1);
        }
        s.cursor = (x, y);
        s.events.push(StubEvent::Move(x, y));
        Ok(())
    }

    fn button(&mut self, button: MouseButton, direction: Direction) -> Result<(), ExecutionError> {
        self.lock().events.push(StubEvent::Button(button, direction));
        Ok(())
    }

    fn scroll(&mut self, amount: i32) -> Result<(), ExecutionError> {
        self.lock().events.push(StubEvent::Scroll(amount));
        Ok(())
    }

    fn key(&mut self, key: Key, direction: Direction) -> Result<(), ExecutionError> {
        self.lock().events.push(StubEvent::Key(key, direction));
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<(), ExecutionError> {
        self.lock().events.push(StubEvent::Text(text.to_string()));
        Ok(())
    }
}

impl ProcessControl for StubPlatform {
    fn spawn(&mut self, path: &Path) -> Result<u32, ExecutionError> {
        logger::info_p("stub", &format!("spawn(\"{}\")", path.display()));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let pid = self.add_process(&name);
        self.lock().events.push(StubEvent::Spawn(path.to_path_buf()));
        Ok(pid)
    }

    fn kill(&mut self, pid: u32) -> Result<(), ExecutionError> {
        let mut s = self.lock();
        let before = s.processes.len();
        s.processes.retain(|(p, _)| *p != pid);
        if s.processes.len() == before {
            return Err(ExecutionError::ProcessNotFound(pid.to_string()));
        }
        s.events.push(StubEvent::Kill(pid));
        Ok(())
    }

    fn kill_by_name(&mut self, name: &str) -> Result<usize, ExecutionError> {
        logger::info_p("stub", &format!("kill_by_name(\"{}\")", name));
        let mut s = self.lock();
        let before = s.processes.len();
        s.processes.retain(|(_, n)| !super::process::name_matches(n, name));
        let killed = before - s.processes.len();
        if killed == 0 {
            return Err(ExecutionError::ProcessNotFound(name.to_string()));
        }
        s.events.push(StubEvent::KillByName(name.to_string()));
        Ok(killed)
    }
}
