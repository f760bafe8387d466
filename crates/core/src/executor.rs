use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::ExecutionError;
use crate::keys::{self, Key};
use crate::logger;
use crate::platform::{InputDevice, ProcessControl};
use crate::sleep;
use crate::types::*;

/// Glides shorter than this jump straight to the target.
const MIN_GLIDE_SECS: f64 = 0.1;
const GLIDE_STEP_SECS: f64 = 0.01;
const DEFAULT_PAUSE: Duration = Duration::from_millis(100);

struct Launched {
    pid: u32,
    path: PathBuf,
}

/// Executes intended actions against an input device and process table.
///
/// Every public operation returns `bool` and logs failures; [`Executor::execute`]
/// returns the typed error instead.
pub struct Executor {
    input: Box<dyn InputDevice>,
    processes: Box<dyn ProcessControl>,
    abort: Arc<AtomicBool>,
    pause: Duration,
    corner_failsafe: bool,
    launched: Vec<Launched>,
}

impl Executor {
    pub fn new(input: Box<dyn InputDevice>, processes: Box<dyn ProcessControl>) -> Self {
        Self {
            input,
            processes,
            abort: Arc::new(AtomicBool::new(false)),
            pause: DEFAULT_PAUSE,
            corner_failsafe: true,
            launched: Vec::new(),
        }
    }

    /// Pause inserted after every primitive.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Share an abort flag (fail-safe hotkey, TUI stop key).
    pub fn with_abort_flag(mut self, abort: Arc<AtomicBool>) -> Self {
        self.abort = abort;
        self
    }

    /// Abort when the cursor sits at (0,0) before a primitive.
    pub fn with_corner_failsafe(mut self, enabled: bool) -> Self {
        self.corner_failsafe = enabled;
        self
    }

    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn position(&mut self) -> Option<(i32, i32)> {
        self.input.cursor().ok()
    }

    // -- boolean facade, one per action kind --

    pub fn move_mouse(&mut self, x: i32, y: i32, duration: f64) -> bool {
        self.dispatch(&IntendedAction::Move { x, y, duration })
    }

    pub fn click(&mut self, x: Option<i32>, y: Option<i32>, button: MouseButton, clicks: u32, interval: f64) -> bool {
        self.dispatch(&IntendedAction::Click { x, y, button, clicks, interval })
    }

    pub fn double_click(&mut self, x: Option<i32>, y: Option<i32>, button: MouseButton) -> bool {
        self.dispatch(&IntendedAction::DoubleClick { x, y, button })
    }

    pub fn right_click(&mut self, x: Option<i32>, y: Option<i32>) -> bool {
        self.dispatch(&IntendedAction::RightClick { x, y })
    }

    pub fn drag(&mut self, start_x: i32, start_y: i32, end_x: i32, end_y: i32, duration: f64, button: MouseButton) -> bool {
        self.dispatch(&IntendedAction::Drag { start_x, start_y, end_x, end_y, duration, button })
    }

    pub fn scroll(&mut self, amount: i32, x: Option<i32>, y: Option<i32>) -> bool {
        self.dispatch(&IntendedAction::Scroll { amount, x, y })
    }

    pub fn press_key(&mut self, key: &str, presses: u32, interval: f64) -> bool {
        self.dispatch(&IntendedAction::PressKey { key: key.to_string(), presses, interval })
    }

    pub fn type_text(&mut self, text: &str, interval: f64) -> bool {
        self.dispatch(&IntendedAction::TypeText { text: text.to_string(), interval })
    }

    pub fn hotkey(&mut self, keys: &[&str]) -> bool {
        self.dispatch(&IntendedAction::Hotkey { keys: keys.iter().map(|k| k.to_string()).collect() })
    }

    pub fn launch_application(&mut self, path: &Path) -> bool {
        self.dispatch(&IntendedAction::LaunchApplication { path: path.to_path_buf() })
    }

    pub fn close_application(&mut self, name: &str) -> bool {
        self.dispatch(&IntendedAction::CloseApplication { name: name.to_string() })
    }

    /// Execute `action`; failures are logged and reported as `false`.
    pub fn dispatch(&mut self, action: &IntendedAction) -> bool {
        match self.execute(action) {
            Ok(()) => true,
            Err(e) => {
                logger::error_p("exec", &format!("{} failed [{}]: {}", action.kind(), e.code(), e));
                false
            }
        }
    }

    /// String-keyed entry point. Unknown kinds and malformed parameters are
    /// rejected before anything touches the input device.
    pub fn dispatch_raw(&mut self, kind: &str, params: serde_json::Value) -> bool {
        match IntendedAction::from_parts(kind, params) {
            Ok(action) => self.dispatch(&action),
            Err(e) => {
                logger::error_p("exec", &format!("rejected '{}' [{}]: {}", kind, e.code(), e));
                false
            }
        }
    }

    pub fn execute(&mut self, action: &IntendedAction) -> Result<(), ExecutionError> {
        action.validate()?;
        self.check_failsafe()?;
        logger::info_p("exec", &action.describe());

        match action {
            IntendedAction::Move { x, y, duration } => self.glide(*x, *y, *duration)?,
            IntendedAction::Click { x, y, button, clicks, interval } => {
                self.do_click(*x, *y, *button, *clicks, *interval)?
            }
            IntendedAction::DoubleClick { x, y, button } => self.do_click(*x, *y, *button, 2, 0.1)?,
            IntendedAction::RightClick { x, y } => self.do_click(*x, *y, MouseButton::Right, 1, 0.0)?,
            IntendedAction::Drag { start_x, start_y, end_x, end_y, duration, button } => {
                self.do_drag((*start_x, *start_y), (*end_x, *end_y), *duration, *button)?
            }
            IntendedAction::Scroll { amount, x, y } => {
                if let (Some(x), Some(y)) = (x, y) {
                    self.input.move_to(*x, *y)?;
                }
                self.input.scroll(*amount)?;
            }
            IntendedAction::PressKey { key, presses, interval } => {
                let key = Key::parse(key)?;
                for i in 0..*presses {
                    if i > 0 {
                        sleep::sleep_secs(*interval);
                    }
                    self.input.key(key, Direction::Click)?;
                }
            }
            IntendedAction::TypeText { text, interval } => self.do_type(text, *interval)?,
            IntendedAction::Hotkey { keys } => self.do_hotkey(&keys::parse_all(keys)?)?,
            IntendedAction::LaunchApplication { path } => self.do_launch(path)?,
            IntendedAction::CloseApplication { name } => self.do_close(name)?,
        }

        std::thread::sleep(self.pause);
        Ok(())
    }

    fn check_failsafe(&mut self) -> Result<(), ExecutionError> {
        if self.abort.load(Ordering::Acquire) {
            return Err(ExecutionError::Failsafe);
        }
        if self.corner_failsafe && self.input.cursor().ok() == Some((0, 0)) {
            self.abort.store(true, Ordering::Release);
            return Err(ExecutionError::Failsafe);
        }
        Ok(())
    }

    /// Linear cursor motion to (x, y) over `duration` seconds.
    fn glide(&mut self, x: i32, y: i32, duration: f64) -> Result<(), ExecutionError> {
        if duration < MIN_GLIDE_SECS {
            return self.input.move_to(x, y);
        }
        let (sx, sy) = self.input.cursor()?;
        let steps = (duration / GLIDE_STEP_SECS).ceil().max(1.0) as u32;
        let step_pause = Duration::try_from_secs_f64(duration / steps as f64)
            .map_err(|e| ExecutionError::InvalidParameters(format!("duration {}: {}", duration, e)))?;
        // interpolate in f64; the `as` cast saturates back into i32
        let lerp = |from: i32, to: i32, t: f64| (from as f64 + (to as f64 - from as f64) * t).round() as i32;
        for i in 1..=steps {
            let t = i as f64 / steps as f64;
            self.input.move_to(lerp(sx, x, t), lerp(sy, y, t))?;
            std::thread::sleep(step_pause);
        }
        Ok(())
    }

    fn do_click(&mut self, x: Option<i32>, y: Option<i32>, button: MouseButton, clicks: u32, interval: f64) -> Result<(), ExecutionError> {
        if let (Some(x), Some(y)) = (x, y) {
            self.input.move_to(x, y)?;
        }
        for i in 0..clicks {
            if i > 0 {
                sleep::sleep_secs(interval);
            }
            self.input.button(button, Direction::Click)?;
        }
        Ok(())
    }

    fn do_drag(&mut self, start: (i32, i32), end: (i32, i32), duration: f64, button: MouseButton) -> Result<(), ExecutionError> {
        self.input.move_to(start.0, start.1)?;
        self.input.button(button, Direction::Down)?;
        if let Err(e) = self.glide(end.0, end.1, duration) {
            // don't leave the button held down
            if let Err(release) = self.input.button(button, Direction::Up) {
                logger::error_p("exec", &format!("{:?} button may still be pressed: {}", button, release));
            }
            return Err(e);
        }
        self.input.button(button, Direction::Up)
    }

    fn do_type(&mut self, text: &str, interval: f64) -> Result<(), ExecutionError> {
        if interval <= 0.0 {
            return self.input.text(text);
        }
        let mut buf = [0u8; 4];
        for (i, ch) in text.chars().enumerate() {
            if i > 0 {
                sleep::sleep_secs(interval);
            }
            self.input.text(ch.encode_utf8(&mut buf))?;
        }
        Ok(())
    }

    /// Press `keys` in order, release in reverse.
    fn do_hotkey(&mut self, keys: &[Key]) -> Result<(), ExecutionError> {
        let mut pressed = Vec::with_capacity(keys.len());
        let mut result = Ok(());
        for key in keys {
            if let Err(e) = self.input.key(*key, Direction::Down) {
                result = Err(e);
                break;
            }
            pressed.push(*key);
        }
        for key in pressed.iter().rev() {
            let released = self.input.key(*key, Direction::Up);
            if result.is_ok() {
                result = released;
            }
        }
        result
    }

    fn do_launch(&mut self, path: &Path) -> Result<(), ExecutionError> {
        if !path.exists() {
            return Err(ExecutionError::MissingPath(path.to_path_buf()));
        }
        let pid = self.processes.spawn(path)?;
        logger::info_p("exec", &format!("launched {} (pid {})", path.display(), pid));
        self.launched.push(Launched { pid, path: path.to_path_buf() });
        Ok(())
    }

    /// Kill what we launched under `name` by PID; otherwise fall back to a
    /// force-kill of every process with that name.
    fn do_close(&mut self, name: &str) -> Result<(), ExecutionError> {
        let (ours, rest): (Vec<Launched>, Vec<Launched>) = std::mem::take(&mut self.launched)
            .into_iter()
            .partition(|l| launched_as(&l.path, name));
        self.launched = rest;

        let mut killed = 0;
        for l in &ours {
            match self.processes.kill(l.pid) {
                Ok(()) => killed += 1,
                Err(e) => logger::warn_p("exec", &format!("pid {} ({}): {}", l.pid, l.path.display(), e)),
            }
        }
        if killed > 0 {
            logger::info_p("exec", &format!("closed {} launched instance(s) of {}", killed, name));
            return Ok(());
        }

        logger::warn_p("exec", &format!("closing '{}' by name; unrelated processes with that name are killed too", name));
        let n = self.processes.kill_by_name(name)?;
        logger::info_p("exec", &format!("killed {} process(es) named {}", n, name));
        Ok(())
    }
}

fn launched_as(path: &Path, name: &str) -> bool {
    let by = |s: Option<&std::ffi::OsStr>| {
        s.map(|s| crate::platform::process::name_matches(&s.to_string_lossy(), name))
            .unwrap_or(false)
    };
    by(path.file_name()) || by(path.file_stem())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::stub::{StubEvent, StubPlatform};
    use crate::platform::Platform;
    use serde_json::json;

    fn executor(stub: &StubPlatform) -> Executor {
        Executor::new(stub.create_input().unwrap(), stub.create_processes()).with_pause(Duration::ZERO)
    }

    fn one_of_each() -> Vec<IntendedAction> {
        let exe = std::env::current_exe().unwrap();
        vec![
            IntendedAction::Move { x: 10, y: 20, duration: 0.0 },
            IntendedAction::Click { x: Some(5), y: Some(6), button: MouseButton::Left, clicks: 1, interval: 0.0 },
            IntendedAction::DoubleClick { x: None, y: None, button: MouseButton::Left },
            IntendedAction::RightClick { x: None, y: None },
            IntendedAction::Drag { start_x: 1, start_y: 1, end_x: 9, end_y: 9, duration: 0.0, button: MouseButton::Left },
            IntendedAction::Scroll { amount: 3, x: None, y: None },
            IntendedAction::PressKey { key: "enter".into(), presses: 1, interval: 0.0 },
            IntendedAction::TypeText { text: "hi".into(), interval: 0.0 },
            IntendedAction::Hotkey { keys: vec!["ctrl".into(), "a".into()] },
            IntendedAction::LaunchApplication { path: exe.clone() },
            IntendedAction::CloseApplication { name: exe.file_name().unwrap().to_string_lossy().into_owned() },
        ]
    }

    #[test]
    fn test_every_kind_dispatches() {
        let actions = one_of_each();
        let kinds: Vec<ActionKind> = actions.iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, ActionKind::ALL.to_vec());

        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        for action in &actions {
            stub.clear_events();
            assert!(exec.dispatch(action), "{:?}", action);
            assert!(!stub.events().is_empty(), "{:?} had no effect", action);
        }

        stub.clear_events();
        assert!(exec.double_click(None, None, MouseButton::Left));
        assert_eq!(stub.events(), vec![StubEvent::Button(MouseButton::Left, Direction::Click); 2]);
    }

    #[test]
    fn test_unknown_kind_has_no_side_effect() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(!exec.dispatch_raw("teleport", json!({"x": 1, "y": 2})));
        assert!(!exec.dispatch_raw("", json!({})));
        assert!(stub.events().is_empty());
    }

    #[test]
    fn test_dispatch_raw_routes_by_kind() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(exec.dispatch_raw("move_mouse", json!({"x": 40, "y": 50, "duration": 0})));
        assert!(exec.dispatch_raw("right_click", json!({})));
        assert_eq!(
            stub.events(),
            vec![StubEvent::Move(40, 50), StubEvent::Button(MouseButton::Right, Direction::Click)]
        );
    }

    #[test]
    fn test_dispatch_raw_rejects_missing_fields() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(!exec.dispatch_raw("drag", json!({"start_x": 1})));
        assert!(!exec.dispatch_raw("type_text", json!("hello")));
        assert!(!exec.dispatch_raw("click", json!({"x": 3})));
        assert!(stub.events().is_empty());
    }

    #[test]
    fn test_click_at_current_position() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(exec.click(None, None, MouseButton::Middle, 3, 0.0));
        assert_eq!(stub.events(), vec![StubEvent::Button(MouseButton::Middle, Direction::Click); 3]);
    }

    #[test]
    fn test_glide_ends_on_target() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        stub.lock().cursor = (100, 100);
        assert!(exec.move_mouse(200, 300, 0.1));
        let events = stub.events();
        assert!(events.len() >= 10);
        assert_eq!(events.last(), Some(&StubEvent::Move(200, 300)));
        assert_eq!(exec.position(), Some((200, 300)));
    }

    #[test]
    fn test_drag_sequence() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(exec.drag(10, 10, 50, 60, 0.0, MouseButton::Left));
        assert_eq!(
            stub.events(),
            vec![
                StubEvent::Move(10, 10),
                StubEvent::Button(MouseButton::Left, Direction::Down),
                StubEvent::Move(50, 60),
                StubEvent::Button(MouseButton::Left, Direction::Up),
            ]
        );
    }

    #[test]
    fn test_failed_drag_releases_button() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        stub.lock().fail_move_after = Some(2);
        assert!(!exec.drag(10, 10, 50, 60, 0.0, MouseButton::Left));
        assert_eq!(
            stub.events().last(),
            Some(&StubEvent::Button(MouseButton::Left, Direction::Up))
        );
    }

    #[test]
    fn test_scroll_sign_and_reposition() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(exec.scroll(-5, Some(7), Some(8)));
        assert_eq!(stub.events(), vec![StubEvent::Move(7, 8), StubEvent::Scroll(-5)]);
    }

    #[test]
    fn test_hotkey_releases_in_reverse() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(exec.hotkey(&["ctrl", "shift", "t"]));
        assert_eq!(
            stub.events(),
            vec![
                StubEvent::Key(Key::Ctrl, Direction::Down),
                StubEvent::Key(Key::Shift, Direction::Down),
                StubEvent::Key(Key::Char('t'), Direction::Down),
                StubEvent::Key(Key::Char('t'), Direction::Up),
                StubEvent::Key(Key::Shift, Direction::Up),
                StubEvent::Key(Key::Ctrl, Direction::Up),
            ]
        );
    }

    #[test]
    fn test_invalid_key_injects_nothing() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(!exec.press_key("hyperspace", 1, 0.0));
        assert!(!exec.hotkey(&["ctrl", "warp"]));
        assert!(!exec.hotkey(&[]));
        assert!(stub.events().is_empty());
        let err = exec.execute(&IntendedAction::PressKey { key: "nope".into(), presses: 1, interval: 0.0 });
        assert_eq!(err.unwrap_err().code(), "invalid_key");
    }

    #[test]
    fn test_press_and_type() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(exec.press_key("tab", 2, 0.0));
        assert!(exec.type_text("ab", 0.001));
        assert_eq!(
            stub.events(),
            vec![
                StubEvent::Key(Key::Tab, Direction::Click),
                StubEvent::Key(Key::Tab, Direction::Click),
                StubEvent::Text("a".into()),
                StubEvent::Text("b".into()),
            ]
        );
    }

    #[test]
    fn test_launch_requires_existing_path() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(!exec.launch_application(Path::new("/definitely/not/here/app")));
        assert!(stub.events().is_empty());
        let err = exec.execute(&IntendedAction::LaunchApplication { path: "/nope/app".into() });
        assert_eq!(err.unwrap_err().code(), "missing_path");
    }

    #[test]
    fn test_close_prefers_launched_pids() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("editor");
        std::fs::write(&app, b"").unwrap();

        let stub = StubPlatform::new();
        let other = stub.add_process("editor");
        let mut exec = executor(&stub);
        assert!(exec.launch_application(&app));
        assert!(exec.close_application("editor"));

        let events = stub.events();
        assert!(matches!(events.last(), Some(StubEvent::Kill(_))));
        assert!(!events.iter().any(|e| matches!(e, StubEvent::KillByName(_))));
        // the unrelated process with the same name survives
        assert!(stub.lock().processes.iter().any(|(pid, _)| *pid == other));
    }

    #[test]
    fn test_close_falls_back_to_name() {
        let stub = StubPlatform::new();
        stub.add_process("notepad.exe");
        stub.add_process("notepad.exe");
        let mut exec = executor(&stub);
        assert!(exec.close_application("notepad.exe"));
        assert!(stub.lock().processes.is_empty());
        assert!(!exec.close_application("notepad.exe"));
        let err = exec.execute(&IntendedAction::CloseApplication { name: "ghost".into() });
        assert_eq!(err.unwrap_err().code(), "process_not_found");
    }

    #[test]
    fn test_abort_flag_blocks_actions() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        exec.abort_handle().store(true, Ordering::Release);
        assert!(!exec.move_mouse(1, 1, 0.0));
        assert!(stub.events().is_empty());
        exec.abort_handle().store(false, Ordering::Release);
        assert!(exec.move_mouse(1, 1, 0.0));
    }

    #[test]
    fn test_corner_failsafe() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(exec.move_mouse(0, 0, 0.0));
        let err = exec.execute(&IntendedAction::RightClick { x: None, y: None }).unwrap_err();
        assert!(matches!(err, ExecutionError::Failsafe));
        assert!(exec.abort_handle().load(Ordering::Acquire));

        let stub = StubPlatform::new();
        let mut exec = executor(&stub).with_corner_failsafe(false);
        assert!(exec.move_mouse(0, 0, 0.0));
        assert!(exec.right_click(None, None));
    }

    #[test]
    fn test_invalid_parameters() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        assert!(!exec.click(None, None, MouseButton::Left, 0, 0.0));
        assert!(!exec.click(Some(1), None, MouseButton::Left, 1, 0.0));
        assert!(!exec.move_mouse(1, 1, -1.0));
        assert!(!exec.type_text("x", f64::NAN));
        assert!(stub.events().is_empty());
    }

    #[test]
    fn test_huge_durations_are_rejected() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        let action = IntendedAction::PressKey { key: "a".into(), presses: 2, interval: 1e20 };
        assert_eq!(action.validate().unwrap_err().code(), "invalid_parameters");
        assert!(!exec.dispatch(&action));
        assert!(!exec.move_mouse(5, 5, 1e20));
        assert!(!exec.drag(1, 1, 2, 2, f64::MAX, MouseButton::Left));
        assert!(!exec.dispatch_raw("type_text", json!({"text": "x", "interval": 1e300})));
        assert!(stub.events().is_empty());
    }

    #[test]
    fn test_glide_to_far_negative_target() {
        let stub = StubPlatform::new();
        let mut exec = executor(&stub);
        stub.lock().cursor = (960, 540);
        let target = i32::MIN + 10;
        assert!(exec.move_mouse(target, 0, 0.2));
        let events = stub.events();
        assert_eq!(events.last(), Some(&StubEvent::Move(target, 0)));
        // every step heads left, never wrapping past the start
        assert!(events.iter().all(|e| matches!(e, StubEvent::Move(x, y) if *x <= 960 && (0..=540).contains(y))));
    }
}
