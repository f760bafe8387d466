use std::io;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, mpsc};

use anyhow::{Context, Result};
use crossterm::{
    execute,
    event::{EnableMouseCapture, DisableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use deskhand_core::{agent, logger, settings::Settings};
use deskhand_core::platform::{create_platform, failsafe};
use deskhand_core::types::{AgentStatus, Command};

struct Args {
    stub: bool,
    script: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args { stub: false, script: None };
    let mut it = std::env::args().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--stub" => args.stub = true,
            "--script" => args.script = Some(it.next().context("--script needs a path")?.into()),
            other => anyhow::bail!("unknown argument '{}' (usage: deskhand [--stub] [--script <file.lua>])", other),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    let args = parse_args()?;

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    logger::init(&cwd.join("logs")).context("cannot open logs/app.log")?;

    let settings_path = cwd.join("settings.json");
    let mut settings = Settings::load(&settings_path);
    if args.script.is_some() {
        settings.script = args.script;
    }

    // Shared state
    let status = Arc::new(Mutex::new(AgentStatus::default()));
    let abort = Arc::new(AtomicBool::new(false));

    // Wire logger to TUI
    let (log_tx, log_rx) = mpsc::channel::<String>();
    logger::set_tui_sender(log_tx);
    logger::info(&format!(
        "deskhand started ({} platform, {} model)",
        if args.stub { "stub" } else { "native" },
        settings.script.as_ref().map_or("simulated".to_string(), |p| p.display().to_string()),
    ));

    // Agent thread owns screen, executor and decision source
    let platform = create_platform(args.stub);
    let (cmd_tx, agent_handle) = agent::spawn(platform, settings.clone(), Arc::clone(&status), Arc::clone(&abort));

    failsafe::start_failsafe_listener(Arc::clone(&abort));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = deskhand_tui::App::new(
        Arc::clone(&status),
        Arc::clone(&abort),
        settings.task.clone(),
        settings.screenshot_dir.clone(),
        log_rx,
        cmd_tx.clone(),
    );

    // Run TUI event loop on main thread
    let result = deskhand_tui::event::run(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    cmd_tx.send(Command::Quit).ok();
    agent_handle.join().ok();

    settings.task = app.task.clone();
    settings.save(&settings_path);

    result
}
