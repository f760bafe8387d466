use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::decision::{DecisionSource, Model, SimulatedModel};
use crate::executor::Executor;
use crate::logger;
use crate::platform::Platform;
use crate::screen::ScreenSource;
use crate::script::ScriptModel;
use crate::settings::Settings;
use crate::sleep;
use crate::types::*;

/// Captures kept for `plan_sequence`.
const HISTORY_LEN: usize = 5;
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Owns the three components and serves commands from the TUI.
pub struct Agent {
    screen: ScreenSource,
    decision: DecisionSource,
    executor: Executor,
    settings: Settings,
    status: Arc<Mutex<AgentStatus>>,
    abort: Arc<AtomicBool>,
    history: VecDeque<ScreenState>,
    next_watch: Option<Instant>,
}

/// Build the agent on its own thread (models need not be `Send`) and start
/// serving commands. Returns the command sender and the thread handle.
pub fn spawn(
    platform: Box<dyn Platform>,
    settings: Settings,
    status: Arc<Mutex<AgentStatus>>,
    abort: Arc<AtomicBool>,
) -> (mpsc::Sender<Command>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let handle = std::thread::spawn(move || {
        let model: Box<dyn Model> = match &settings.script {
            Some(path) => Box::new(ScriptModel::new(Some(path.clone()))),
            None => Box::new(SimulatedModel::new()),
        };
        match build(platform.as_ref(), model, settings, Arc::clone(&status), abort) {
            Ok(agent) => agent.run(rx),
            Err(e) => {
                logger::error_p("agent", &format!("agent failed to start: {:#}", e));
                lock(&status).last_error = Some(format!("{:#}", e));
            }
        }
    });
    (tx, handle)
}

fn build(
    platform: &dyn Platform,
    model: Box<dyn Model>,
    settings: Settings,
    status: Arc<Mutex<AgentStatus>>,
    abort: Arc<AtomicBool>,
) -> Result<Agent> {
    let screen = ScreenSource::new(platform.create_display()?);
    let executor = Executor::new(platform.create_input()?, platform.create_processes());
    let decision = DecisionSource::new(model);
    Ok(Agent::new(screen, decision, executor, settings, status, abort))
}

fn lock(status: &Mutex<AgentStatus>) -> std::sync::MutexGuard<'_, AgentStatus> {
    status.lock().unwrap_or_else(|e| e.into_inner())
}

impl Agent {
    pub fn new(
        screen: ScreenSource,
        mut decision: DecisionSource,
        executor: Executor,
        settings: Settings,
        status: Arc<Mutex<AgentStatus>>,
        abort: Arc<AtomicBool>,
    ) -> Self {
        logger::register_prefix("agent", logger::COLOR_BLUE);
        if !settings.engine.is_empty() {
            decision.set_config(&settings.engine);
        }
        Self {
            screen,
            decision,
            executor: executor.with_abort_flag(Arc::clone(&abort)),
            settings,
            status,
            abort,
            history: VecDeque::with_capacity(HISTORY_LEN),
            next_watch: None,
        }
    }

    fn publish(&self, f: impl FnOnce(&mut AgentStatus)) {
        f(&mut lock(&self.status));
    }

    fn busy(&self, what: &str) {
        let what = what.to_string();
        self.publish(|s| s.activity = Activity::Busy(what));
    }

    fn idle(&self) {
        self.publish(|s| {
            if s.activity != Activity::Aborted {
                s.activity = Activity::Idle;
            }
        });
    }

    fn fail(&self, msg: String) {
        logger::error_p("agent", &msg);
        self.publish(|s| s.last_error = Some(msg));
    }

    fn remember(&mut self, state: ScreenState) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(state);
    }

    /// A fresh user command clears a previous fail-safe stop.
    fn arm(&self) {
        self.abort.store(false, Ordering::Release);
        self.publish(|s| {
            s.last_error = None;
            if s.activity == Activity::Aborted {
                s.activity = Activity::Idle;
            }
        });
    }

    /// Serve commands until Quit or the sender is dropped.
    pub fn run(mut self, cmd_rx: mpsc::Receiver<Command>) {
        logger::info_p("agent", "ready");
        loop {
            match cmd_rx.try_recv() {
                Ok(Command::Quit) | Err(mpsc::TryRecvError::Disconnected) => break,
                Ok(cmd) => {
                    self.handle(cmd);
                    continue;
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }

            if let Some(due) = self.next_watch {
                if Instant::now() >= due {
                    self.watch_tick();
                    self.next_watch = Some(Instant::now() + Duration::from_millis(self.settings.watch_interval_ms));
                }
            }
            std::thread::sleep(IDLE_TICK);
        }

        self.decision.unload();
        logger::info_p("agent", "stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::LoadModel => {
                self.busy("loading model");
                if !self.decision.load(None) {
                    self.fail(format!("{} model failed to load", self.decision.model_name()));
                }
                let state = self.decision.state();
                self.publish(|s| s.model = state);
            }
            Command::UnloadModel => {
                self.busy("unloading model");
                self.decision.unload();
                let state = self.decision.state();
                self.publish(|s| s.model = state);
            }
            Command::Plan(task) => self.plan(&task),
            Command::ExecutePlan => {
                self.arm();
                let plan = lock(&self.status).plan.clone();
                if plan.is_empty() {
                    self.fail("nothing to execute; plan a task first".into());
                } else {
                    self.run_sequence(&plan);
                }
            }
            Command::Step(task) => {
                self.arm();
                self.step(&task);
            }
            Command::Capture(path) => self.capture(path),
            Command::Watch(on) => {
                self.next_watch = on.then(Instant::now);
                self.publish(|s| s.watching = on);
                logger::info_p("agent", if on { "watching for screen changes" } else { "stopped watching" });
            }
            Command::Quit => {}
        }
        self.idle();
    }

    fn plan(&mut self, task: &str) {
        self.busy("planning");
        let analysis = self.decision.analyze_task(task);
        self.publish(|s| {
            s.analysis = Some(analysis);
            s.plan.clear();
            s.executed = 0;
        });

        match self.screen.capture_full() {
            Ok(state) => self.remember(state),
            Err(e) => logger::warn_p("agent", &format!("planning without a fresh capture: {}", e)),
        }
        let history: Vec<ScreenState> = self.history.iter().cloned().collect();
        match self.decision.plan_sequence(task, Some(&history)) {
            Some(plan) => self.publish(|s| s.plan = plan),
            None => self.fail("planning failed".into()),
        }
    }

    /// Execute `plan` in order with a jittered pause between actions. Stops
    /// at the first failure or when the abort flag is raised.
    fn run_sequence(&mut self, plan: &[PlannedAction]) {
        for (i, step) in plan.iter().enumerate() {
            if self.aborted() {
                return;
            }
            self.busy(&format!("{}/{}: {}", i + 1, plan.len(), step.action.describe()));
            if !self.executor.dispatch(&step.action) {
                if !self.aborted() {
                    self.fail(format!("step {} ({}) failed; run stopped", i + 1, step.action.kind()));
                }
                return;
            }
            self.publish(|s| s.executed = i + 1);
            if i + 1 < plan.len() {
                sleep::sleep_jitter(self.settings.action_pause);
            }
        }
        logger::info_p("agent", &format!("plan finished ({} actions)", plan.len()));
    }

    fn aborted(&self) -> bool {
        if !self.abort.load(Ordering::Acquire) {
            return false;
        }
        logger::warn_p("agent", "fail-safe triggered; run aborted");
        self.publish(|s| {
            s.activity = Activity::Aborted;
            s.last_error = Some("aborted by fail-safe".into());
        });
        true
    }

    fn step(&mut self, task: &str) {
        self.busy("deciding");
        let screen = match self.screen.capture_full() {
            Ok(state) => {
                self.remember(state.clone());
                Some(state)
            }
            Err(e) => {
                logger::warn_p("agent", &format!("deciding without a capture: {}", e));
                None
            }
        };
        let Some(decision) = self.decision.decide(screen.as_ref(), task) else {
            self.fail("no decision".into());
            return;
        };
        self.publish(|s| s.decision = Some(decision.clone()));
        if self.aborted() {
            return;
        }
        self.busy(&decision.action.describe());
        if !self.executor.dispatch(&decision.action) && !self.aborted() {
            self.fail(format!("{} failed", decision.action.kind()));
        }
    }

    fn capture(&mut self, path: PathBuf) {
        self.busy("capturing");
        if self.screen.capture_to_file(&path, None) {
            logger::info_p("agent", &format!("saved {}", path.display()));
            if let Some(state) = self.screen.last_capture().cloned() {
                self.remember(state);
            }
            self.publish(|s| s.last_capture = Some(path));
        } else {
            self.fail(format!("could not save {}", path.display()));
        }
    }

    fn watch_tick(&mut self) {
        if !self.screen.detect_change(self.settings.change_threshold) {
            return;
        }
        if let Some(state) = self.screen.last_capture().cloned() {
            self.remember(state);
        }
        self.publish(|s| s.changes += 1);
    }
}
