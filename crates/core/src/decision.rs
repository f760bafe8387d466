use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis;
use crate::config::{ConfigPatch, EngineConfig};
use crate::error::DecisionError;
use crate::logger;
use crate::types::*;

/// A pluggable decision backend.
///
/// Implementations may block for as long as inference takes. They are owned
/// by one thread and need not be `Send`.
pub trait Model {
    fn name(&self) -> &str;
    fn load(&mut self, path: Option<&Path>, config: &EngineConfig) -> anyhow::Result<()>;
    fn unload(&mut self);
    fn decide(&mut self, screen: Option<&ScreenState>, task: &str, config: &EngineConfig) -> anyhow::Result<Decision>;
    fn plan(&mut self, task: &str, history: &[ScreenState], config: &EngineConfig) -> anyhow::Result<ActionSequence>;
}

/// Stand-in model with fixed outputs and configurable inference delays.
pub struct SimulatedModel {
    load_delay: Duration,
    unload_delay: Duration,
    decide_delay: Duration,
    plan_delay: Duration,
}

impl Default for SimulatedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedModel {
    pub fn new() -> Self {
        Self {
            load_delay: Duration::from_secs(2),
            unload_delay: Duration::from_secs(1),
            decide_delay: Duration::from_secs(1),
            plan_delay: Duration::from_secs(1),
        }
    }

    /// No delays.
    pub fn instant() -> Self {
        Self {
            load_delay: Duration::ZERO,
            unload_delay: Duration::ZERO,
            decide_delay: Duration::ZERO,
            plan_delay: Duration::ZERO,
        }
    }
}

impl Model for SimulatedModel {
    fn name(&self) -> &str {
        "simulated"
    }

    fn load(&mut self, _path: Option<&Path>, config: &EngineConfig) -> anyhow::Result<()> {
        logger::info_p("model", &format!("loading {} on {:?}", config.model_type, config.device));
        std::thread::sleep(self.load_delay);
        Ok(())
    }

    fn unload(&mut self) {
        std::thread::sleep(self.unload_delay);
    }

    fn decide(&mut self, _screen: Option<&ScreenState>, _task: &str, _config: &EngineConfig) -> anyhow::Result<Decision> {
        std::thread::sleep(self.decide_delay);
        Ok(Decision {
            action: IntendedAction::Click {
                x: Some(125),
                y: Some(125),
                button: MouseButton::Left,
                clicks: 1,
                interval: 0.0,
            },
            confidence: 0.95,
            rationale: "the button matches the task description".into(),
            target: Some(TargetElement { x: 100, y: 100, width: 50, height: 50, name: "button".into() }),
        })
    }

    fn plan(&mut self, _task: &str, _history: &[ScreenState], _config: &EngineConfig) -> anyhow::Result<ActionSequence> {
        std::thread::sleep(self.plan_delay);
        let step = |action| PlannedAction { action, confidence: 0.95 };
        Ok(vec![
            step(IntendedAction::Click {
                x: Some(100),
                y: Some(100),
                button: MouseButton::Left,
                clicks: 1,
                interval: 0.0,
            }),
            step(IntendedAction::TypeText { text: "Hello, World!".into(), interval: 0.05 }),
            step(IntendedAction::Hotkey { keys: vec!["ctrl".into(), "enter".into()] }),
        ])
    }
}

/// Loadable decision maker wrapping a [`Model`].
///
/// Unloaded --load--> Loaded --unload--> Unloaded. The engine config
/// survives both transitions.
pub struct DecisionSource {
    model: Box<dyn Model>,
    state: ModelState,
    model_path: Option<PathBuf>,
    config: EngineConfig,
}

impl DecisionSource {
    pub fn new(model: Box<dyn Model>) -> Self {
        logger::register_prefix("model", logger::COLOR_MAGENTA);
        Self {
            model,
            state: ModelState::Unloaded,
            model_path: None,
            config: EngineConfig::default(),
        }
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == ModelState::Loaded
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Merge `patch` into the current config. Unset fields keep their value.
    pub fn set_config(&mut self, patch: &ConfigPatch) -> bool {
        self.config.merge(patch);
        logger::info_p("model", &format!("config updated: {:?}", patch));
        true
    }

    /// Load (or reload) the model. On failure the source is left Unloaded.
    pub fn try_load(&mut self, path: Option<&Path>) -> Result<(), DecisionError> {
        if self.is_loaded() {
            logger::info_p("model", "reloading");
            self.model.unload();
            self.state = ModelState::Unloaded;
            self.model_path = None;
        }
        self.model
            .load(path, &self.config)
            .map_err(|e| DecisionError::LoadFailed(format!("{:#}", e)))?;
        self.state = ModelState::Loaded;
        self.model_path = path.map(Path::to_path_buf);
        logger::info_p("model", &format!("{} loaded", self.model.name()));
        Ok(())
    }

    pub fn load(&mut self, path: Option<&Path>) -> bool {
        match self.try_load(path) {
            Ok(()) => true,
            Err(e) => {
                logger::error_p("model", &format!("load failed [{}]: {}", e.code(), e));
                false
            }
        }
    }

    /// Unloading an unloaded source is a successful no-op.
    pub fn unload(&mut self) -> bool {
        if self.is_loaded() {
            self.model.unload();
            self.state = ModelState::Unloaded;
            self.model_path = None;
            logger::info_p("model", &format!("{} unloaded", self.model.name()));
        }
        true
    }

    pub fn analyze_task(&self, description: &str) -> TaskAnalysis {
        let analysis = analysis::analyze(description);
        logger::info_p(
            "model",
            &format!("task {:?}: {} subtask(s), ~{} step(s)", analysis.task_type, analysis.subtasks.len(), analysis.estimated_steps),
        );
        analysis
    }

    pub fn try_decide(&mut self, screen: Option<&ScreenState>, description: &str) -> Result<Decision, DecisionError> {
        if !self.is_loaded() {
            return Err(DecisionError::ModelUnavailable);
        }
        let decision = self
            .model
            .decide(screen, description, &self.config)
            .map_err(|e| DecisionError::Model(format!("{:#}", e)))?;
        check_output(&decision.action, decision.confidence).map_err(DecisionError::InvalidOutput)?;
        logger::info_p(
            "model",
            &format!("decided {} ({:.2}): {}", decision.action.describe(), decision.confidence, decision.rationale),
        );
        Ok(decision)
    }

    pub fn decide(&mut self, screen: Option<&ScreenState>, description: &str) -> Option<Decision> {
        self.try_decide(screen, description)
            .map_err(|e| logger::error_p("model", &format!("no decision [{}]: {}", e.code(), e)))
            .ok()
    }

    pub fn try_plan_sequence(&mut self, description: &str, history: Option<&[ScreenState]>) -> Result<ActionSequence, DecisionError> {
        if !self.is_loaded() {
            return Err(DecisionError::ModelUnavailable);
        }
        let plan = self
            .model
            .plan(description, history.unwrap_or_default(), &self.config)
            .map_err(|e| DecisionError::Model(format!("{:#}", e)))?;
        for (i, step) in plan.iter().enumerate() {
            check_output(&step.action, step.confidence)
                .map_err(|e| DecisionError::InvalidOutput(format!("step {}: {}", i + 1, e)))?;
        }
        logger::info_p("model", &format!("planned {} action(s)", plan.len()));
        Ok(plan)
    }

    pub fn plan_sequence(&mut self, description: &str, history: Option<&[ScreenState]>) -> Option<ActionSequence> {
        self.try_plan_sequence(description, history)
            .map_err(|e| logger::error_p("model", &format!("no plan [{}]: {}", e.code(), e)))
            .ok()
    }
}

fn check_output(action: &IntendedAction, confidence: f64) -> Result<(), String> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(format!("confidence {} outside [0, 1]", confidence));
    }
    action.validate().map_err(|e| e.to_string())
}
