use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{SystemTime, UNIX_EPOCH};

use deskhand_core::types::{Activity, AgentStatus, Command, ModelState};

use crate::confirm::ConfirmDialog;

/// Log lines kept for the panel.
const LOG_CAPACITY: usize = 2000;

pub struct App {
    pub status: Arc<Mutex<AgentStatus>>,
    pub abort: Arc<AtomicBool>,
    pub task: String,
    pub editing: bool,
    pub confirm: Option<ConfirmDialog>,
    pub screenshot_dir: PathBuf,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub should_quit: bool,
    was_aborted: bool,
}

impl App {
    pub fn new(
        status: Arc<Mutex<AgentStatus>>,
        abort: Arc<AtomicBool>,
        task: String,
        screenshot_dir: PathBuf,
        log_rx: mpsc::Receiver<String>,
        cmd_tx: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            status,
            abort,
            task,
            editing: false,
            confirm: None,
            screenshot_dir,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            cmd_tx,
            should_quit: false,
            was_aborted: false,
        }
    }

    /// Copy of the agent status (brief lock).
    pub fn snapshot(&self) -> AgentStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
        if self.log_messages.len() > LOG_CAPACITY {
            let excess = self.log_messages.len() - LOG_CAPACITY;
            self.log_messages.drain(..excess);
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    // -- task editor --

    pub fn start_edit(&mut self) {
        self.editing = true;
    }

    pub fn edit_push(&mut self, c: char) {
        self.task.push(c);
    }

    pub fn edit_pop(&mut self) {
        self.task.pop();
    }

    pub fn finish_edit(&mut self) {
        self.editing = false;
        self.task = self.task.trim().to_string();
    }

    // -- agent commands --

    pub fn toggle_model(&mut self) {
        let cmd = match self.snapshot().model {
            ModelState::Loaded => Command::UnloadModel,
            ModelState::Unloaded => Command::LoadModel,
        };
        self.cmd_tx.send(cmd).ok();
    }

    pub fn plan(&mut self) {
        if !self.task.is_empty() {
            self.cmd_tx.send(Command::Plan(self.task.clone())).ok();
        }
    }

    pub fn step(&mut self) {
        if !self.task.is_empty() {
            self.cmd_tx.send(Command::Step(self.task.clone())).ok();
        }
    }

    /// Ask before executing the current plan.
    pub fn request_execute(&mut self) {
        let n = self.snapshot().plan.len();
        if n > 0 {
            self.confirm = Some(ConfirmDialog::new(format!("Execute {} planned action(s)?", n)));
        }
    }

    pub fn confirm_toggle(&mut self) {
        if let Some(c) = &mut self.confirm {
            c.toggle();
        }
    }

    /// Close the dialog; executes when Yes is selected.
    pub fn confirm_close(&mut self) {
        if let Some(c) = self.confirm.take() {
            if c.selected {
                self.cmd_tx.send(Command::ExecutePlan).ok();
            }
        }
    }

    pub fn capture(&mut self) {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = self.screenshot_dir.join(format!("capture-{}.png", secs));
        self.cmd_tx.send(Command::Capture(path)).ok();
    }

    pub fn toggle_watch(&mut self) {
        let on = !self.snapshot().watching;
        self.cmd_tx.send(Command::Watch(on)).ok();
    }

    /// Raise the shared abort flag, same as the fail-safe hotkey.
    pub fn stop(&mut self) {
        self.abort.store(true, Ordering::Release);
    }

    /// True once per transition into the aborted state.
    pub fn take_abort_edge(&mut self) -> bool {
        let aborted = self.snapshot().activity == Activity::Aborted;
        let edge = aborted && !self.was_aborted;
        self.was_aborted = aborted;
        edge
    }

    pub fn quit(&mut self) {
        self.stop();
        self.cmd_tx.send(Command::Quit).ok();
        self.should_quit = true;
    }
}
