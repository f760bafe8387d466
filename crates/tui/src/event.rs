use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, MouseEventKind};
use ratatui::{Terminal, backend::CrosstermBackend};

use deskhand_core::platform::failsafe;

use crate::App;
use crate::ui;

pub fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> anyhow::Result<()> {
    loop {
        if app.should_quit {
            return Ok(());
        }

        app.drain_logs();

        // fail-safe fired while another window had focus
        if app.take_abort_edge() {
            failsafe::activate_terminal();
        }

        terminal.draw(|f| ui::draw(f, app))?;

        // Poll for events with 100ms timeout (keeps TUI responsive)
        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if app.confirm.is_some() {
                        on_confirm_key(app, key);
                    } else if app.editing {
                        on_edit_key(app, key);
                    } else {
                        on_key(app, key);
                    }
                }
                Event::Mouse(mouse) => match mouse.kind {
                    MouseEventKind::ScrollUp => app.scroll_log_up(3),
                    MouseEventKind::ScrollDown => app.scroll_log_down(3),
                    _ => {}
                },
                _ => {}
            }
        }
    }
}

fn on_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') => app.quit(),
        KeyCode::Char('e') | KeyCode::Char('E') => app.start_edit(),
        KeyCode::Char('m') | KeyCode::Char('M') => app.toggle_model(),
        KeyCode::Char('p') | KeyCode::Char('P') => app.plan(),
        KeyCode::Char('x') | KeyCode::Char('X') => app.request_execute(),
        KeyCode::Char('d') | KeyCode::Char('D') => app.step(),
        KeyCode::Char('c') | KeyCode::Char('C') => app.capture(),
        KeyCode::Char('w') | KeyCode::Char('W') => app.toggle_watch(),
        KeyCode::Char('s') | KeyCode::Char('S') | KeyCode::Esc => app.stop(),
        KeyCode::Char('l') | KeyCode::Char('L') => app.toggle_log(),
        KeyCode::Up | KeyCode::Char('k') => app.scroll_log_up(1),
        KeyCode::Down | KeyCode::Char('j') => app.scroll_log_down(1),
        _ => {}
    }
}

fn on_edit_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter | KeyCode::Esc => app.finish_edit(),
        KeyCode::Backspace => app.edit_pop(),
        KeyCode::Char(c) => app.edit_push(c),
        _ => {}
    }
}

fn on_confirm_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Left | KeyCode::Right | KeyCode::Tab | KeyCode::Char('h') | KeyCode::Char('l') => {
            app.confirm_toggle()
        }
        KeyCode::Enter => app.confirm_close(),
        KeyCode::Char('y') | KeyCode::Char('Y') => {
            if let Some(c) = &mut app.confirm {
                c.selected = true;
            }
            app.confirm_close();
        }
        KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
            if let Some(c) = &mut app.confirm {
                c.selected = false;
            }
            app.confirm_close();
        }
        _ => {}
    }
}
