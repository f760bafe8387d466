use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, ExecutionError};
use crate::keys::Key;
use crate::sleep;

/// Screen-coordinate rectangle (left, top, width, height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self { left, top, width, height }
    }

    pub fn right(&self) -> i64 {
        self.left as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.top as i64 + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection with `bounds`, or None when nothing is left.
    pub fn clamp_to(&self, bounds: &Rect) -> Option<Rect> {
        let l = (self.left as i64).max(bounds.left as i64);
        let t = (self.top as i64).max(bounds.top as i64);
        let r = self.right().min(bounds.right());
        let b = self.bottom().min(bounds.bottom());
        if r <= l || b <= t {
            return None;
        }
        Some(Rect {
            left: l as i32,
            top: t as i32,
            width: (r - l) as u32,
            height: (b - t) as u32,
        })
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        let (x, y) = (x as i64, y as i64);
        x >= self.left as i64 && x < self.right() && y >= self.top as i64 && y < self.bottom()
    }
}

/// One immutable capture of the display.
///
/// The pixel buffer is `height x width x 3` RGB, shared behind an `Arc` so
/// keeping a history of states is cheap.
#[derive(Debug, Clone)]
pub struct ScreenState {
    image: Arc<RgbImage>,
    region: Option<Rect>,
    captured_at: DateTime<Local>,
}

impl ScreenState {
    pub fn new(image: RgbImage, region: Option<Rect>) -> Self {
        Self {
            image: Arc::new(image),
            region,
            captured_at: Local::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// `(height, width, channels)`
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height() as usize, self.width() as usize, 3)
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        Some(self.image.get_pixel(x, y).0)
    }

    pub fn region(&self) -> Option<Rect> {
        self.region
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    /// Write the capture to `path`. Only lossless formats (PNG, BMP) are accepted.
    pub fn save(&self, path: &Path) -> Result<(), CaptureError> {
        lossless_format(path)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        self.image
            .save(path)
            .map_err(|e| CaptureError::Encode(e.to_string()))
    }

    /// Read a previously saved capture back. The timestamp is the load time.
    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        lossless_format(path)?;
        let img = image::open(path).map_err(|e| CaptureError::Encode(e.to_string()))?;
        Ok(Self::new(img.to_rgb8(), None))
    }
}

fn lossless_format(path: &Path) -> Result<image::ImageFormat, CaptureError> {
    match image::ImageFormat::from_path(path) {
        Ok(f @ (image::ImageFormat::Png | image::ImageFormat::Bmp)) => Ok(f),
        _ => Err(CaptureError::UnsupportedFormat(path.to_path_buf())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl FromStr for MouseButton {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(ExecutionError::InvalidParameters(format!("unknown button '{}'", other))),
        }
    }
}

/// Press state for buttons and keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Down,
    Up,
    Click,
}

fn default_move_duration() -> f64 { 0.2 }
fn default_click_interval() -> f64 { 0.2 }
fn default_drag_duration() -> f64 { 0.5 }
fn default_key_interval() -> f64 { 0.1 }
fn default_type_interval() -> f64 { 0.05 }
fn one() -> u32 { 1 }

/// A structured description of one input operation, prior to execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntendedAction {
    #[serde(alias = "move_mouse")]
    Move {
        x: i32,
        y: i32,
        #[serde(default = "default_move_duration")]
        duration: f64,
    },
    Click {
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "one")]
        clicks: u32,
        #[serde(default = "default_click_interval")]
        interval: f64,
    },
    DoubleClick {
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
        #[serde(default)]
        button: MouseButton,
    },
    RightClick {
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
    },
    Drag {
        start_x: i32,
        start_y: i32,
        end_x: i32,
        end_y: i32,
        #[serde(default = "default_drag_duration")]
        duration: f64,
        #[serde(default)]
        button: MouseButton,
    },
    Scroll {
        amount: i32,
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
    },
    PressKey {
        key: String,
        #[serde(default = "one")]
        presses: u32,
        #[serde(default = "default_key_interval")]
        interval: f64,
    },
    TypeText {
        text: String,
        #[serde(default = "default_type_interval")]
        interval: f64,
    },
    Hotkey {
        keys: Vec<String>,
    },
    LaunchApplication {
        path: PathBuf,
    },
    CloseApplication {
        name: String,
    },
}

/// Closed set of action kinds, the string face of [`IntendedAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Move,
    Click,
    DoubleClick,
    RightClick,
    Drag,
    Scroll,
    PressKey,
    TypeText,
    Hotkey,
    LaunchApplication,
    CloseApplication,
}

impl ActionKind {
    pub const ALL: [ActionKind; 11] = [
        ActionKind::Move,
        ActionKind::Click,
        ActionKind::DoubleClick,
        ActionKind::RightClick,
        ActionKind::Drag,
        ActionKind::Scroll,
        ActionKind::PressKey,
        ActionKind::TypeText,
        ActionKind::Hotkey,
        ActionKind::LaunchApplication,
        ActionKind::CloseApplication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Move => "move",
            ActionKind::Click => "click",
            ActionKind::DoubleClick => "double_click",
            ActionKind::RightClick => "right_click",
            ActionKind::Drag => "drag",
            ActionKind::Scroll => "scroll",
            ActionKind::PressKey => "press_key",
            ActionKind::TypeText => "type_text",
            ActionKind::Hotkey => "hotkey",
            ActionKind::LaunchApplication => "launch_application",
            ActionKind::CloseApplication => "close_application",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "move_mouse" {
            return Ok(ActionKind::Move);
        }
        ActionKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ExecutionError::UnknownActionKind(s.to_string()))
    }
}

impl IntendedAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            IntendedAction::Move { .. } => ActionKind::Move,
            IntendedAction::Click { .. } => ActionKind::Click,
            IntendedAction::DoubleClick { .. } => ActionKind::DoubleClick,
            IntendedAction::RightClick { .. } => ActionKind::RightClick,
            IntendedAction::Drag { .. } => ActionKind::Drag,
            IntendedAction::Scroll { .. } => ActionKind::Scroll,
            IntendedAction::PressKey { .. } => ActionKind::PressKey,
            IntendedAction::TypeText { .. } => ActionKind::TypeText,
            IntendedAction::Hotkey { .. } => ActionKind::Hotkey,
            IntendedAction::LaunchApplication { .. } => ActionKind::LaunchApplication,
            IntendedAction::CloseApplication { .. } => ActionKind::CloseApplication,
        }
    }

    /// Build an action from a kind name and a JSON parameter object.
    pub fn from_parts(kind: &str, params: serde_json::Value) -> Result<Self, ExecutionError> {
        let kind: ActionKind = kind.parse()?;
        let mut map = match params {
            serde_json::Value::Object(m) => m,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(ExecutionError::InvalidParameters(format!(
                    "{} parameters must be an object, got {}",
                    kind, other
                )))
            }
        };
        map.insert("kind".into(), serde_json::Value::String(kind.as_str().into()));
        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| ExecutionError::InvalidParameters(format!("{}: {}", kind, e)))
    }

    /// Check value-level constraints the type system can't express.
    pub fn validate(&self) -> Result<(), ExecutionError> {
        match self {
            IntendedAction::Move { duration, .. } => check_secs("duration", *duration),
            IntendedAction::Click { x, y, clicks, interval, .. } => {
                check_point(*x, *y)?;
                check_count("clicks", *clicks)?;
                check_secs("interval", *interval)
            }
            IntendedAction::DoubleClick { x, y, .. } | IntendedAction::RightClick { x, y } => {
                check_point(*x, *y)
            }
            IntendedAction::Drag { duration, .. } => check_secs("duration", *duration),
            IntendedAction::Scroll { x, y, .. } => check_point(*x, *y),
            IntendedAction::PressKey { key, presses, interval } => {
                Key::parse(key)?;
                check_count("presses", *presses)?;
                check_secs("interval", *interval)
            }
            IntendedAction::TypeText { interval, .. } => check_secs("interval", *interval),
            IntendedAction::Hotkey { keys } => {
                if keys.is_empty() {
                    return Err(ExecutionError::InvalidParameters("hotkey needs at least one key".into()));
                }
                keys.iter().try_for_each(|k| Key::parse(k).map(|_| ()))
            }
            IntendedAction::LaunchApplication { path } => {
                if path.as_os_str().is_empty() {
                    return Err(ExecutionError::InvalidParameters("empty application path".into()));
                }
                Ok(())
            }
            IntendedAction::CloseApplication { name } => {
                if name.trim().is_empty() {
                    return Err(ExecutionError::InvalidParameters("empty application name".into()));
                }
                Ok(())
            }
        }
    }

    /// Short human-readable form for logs and the TUI.
    pub fn describe(&self) -> String {
        let at = |x: &Option<i32>, y: &Option<i32>| match (x, y) {
            (Some(x), Some(y)) => format!(" at ({}, {})", x, y),
            _ => String::new(),
        };
        match self {
            IntendedAction::Move { x, y, .. } => format!("move to ({}, {})", x, y),
            IntendedAction::Click { x, y, button, clicks, .. } => {
                format!("click {:?} x{}{}", button, clicks, at(x, y))
            }
            IntendedAction::DoubleClick { x, y, .. } => format!("double click{}", at(x, y)),
            IntendedAction::RightClick { x, y } => format!("right click{}", at(x, y)),
            IntendedAction::Drag { start_x, start_y, end_x, end_y, .. } => {
                format!("drag ({}, {}) -> ({}, {})", start_x, start_y, end_x, end_y)
            }
            IntendedAction::Scroll { amount, x, y } => format!("scroll {}{}", amount, at(x, y)),
            IntendedAction::PressKey { key, presses, .. } => format!("press {} x{}", key, presses),
            IntendedAction::TypeText { text, .. } => format!("type {:?}", text),
            IntendedAction::Hotkey { keys } => format!("hotkey {}", keys.join("+")),
            IntendedAction::LaunchApplication { path } => format!("launch {}", path.display()),
            IntendedAction::CloseApplication { name } => format!("close {}", name),
        }
    }
}

fn check_secs(field: &str, secs: f64) -> Result<(), ExecutionError> {
    if !(0.0..=sleep::MAX_SECS).contains(&secs) {
        return Err(ExecutionError::InvalidParameters(format!(
            "{} must be between 0 and {} seconds, got {}",
            field,
            sleep::MAX_SECS,
            secs
        )));
    }
    Ok(())
}

fn check_count(field: &str, n: u32) -> Result<(), ExecutionError> {
    if n == 0 {
        return Err(ExecutionError::InvalidParameters(format!("{} must be at least 1", field)));
    }
    Ok(())
}

fn check_point(x: Option<i32>, y: Option<i32>) -> Result<(), ExecutionError> {
    if x.is_some() != y.is_some() {
        return Err(ExecutionError::InvalidParameters("x and y must be given together".into()));
    }
    Ok(())
}

/// Bounding box of the element a decision points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetElement {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub name: String,
}

/// A single decided action with the model's self-reported certainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(flatten)]
    pub action: IntendedAction,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub target: Option<TargetElement>,
}

/// One step of an [`ActionSequence`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    #[serde(flatten)]
    pub action: IntendedAction,
    pub confidence: f64,
}

/// Ordered plan; execution order is list order.
pub type ActionSequence = Vec<PlannedAction>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelState {
    #[default]
    Unloaded,
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Navigation,
    TextEntry,
    ApplicationControl,
    Interaction,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Pointer,
    Keyboard,
    Process,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub task_type: TaskType,
    pub subtasks: Vec<Subtask>,
    pub required_capabilities: Vec<Capability>,
    pub estimated_steps: usize,
}

/// What the agent thread is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Activity {
    #[default]
    Idle,
    Busy(String),
    Aborted,
}

/// Snapshot of the agent published for the TUI.
#[derive(Debug, Clone, Default)]
pub struct AgentStatus {
    pub activity: Activity,
    pub model: ModelState,
    pub analysis: Option<TaskAnalysis>,
    pub plan: ActionSequence,
    pub executed: usize,
    pub decision: Option<Decision>,
    pub watching: bool,
    pub changes: u64,
    pub last_error: Option<String>,
    pub last_capture: Option<PathBuf>,
}

/// Command from TUI to agent
pub enum Command {
    LoadModel,
    UnloadModel,
    Plan(String),
    ExecutePlan,
    Step(String),
    Capture(PathBuf),
    Watch(bool),
    Quit,
}
