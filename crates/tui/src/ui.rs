use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use deskhand_core::platform::failsafe::FAILSAFE_HOTKEY;
use deskhand_core::types::{Activity, AgentStatus, ModelState};

use crate::App;

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    let status = app.snapshot();

    // -- Left panel: banner, status, task, plan --
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(9), Constraint::Length(3), Constraint::Min(0)])
        .split(chunks[0]);

    draw_banner(f, left[0], &status.activity);
    draw_status(f, left[1], &status);
    draw_task(f, left[2], app);
    draw_plan(f, left[3], &status);

    if app.log_visible && chunks.len() > 1 {
        draw_logs(f, chunks[1], app);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

fn key(k: &str) -> Span<'_> {
    Span::styled(k, Style::default().fg(Color::Yellow))
}

fn draw_banner(f: &mut Frame, area: Rect, activity: &Activity) {
    let (label, bg) = match activity {
        Activity::Idle => ("IDLE".to_string(), Color::Green),
        Activity::Busy(what) => (format!("BUSY: {} (S to stop)", what), Color::Yellow),
        Activity::Aborted => ("ABORTED BY FAIL-SAFE".to_string(), Color::Red),
    };

    // Full-width centered banner
    let width = area.width as usize;
    let pad_total = width.saturating_sub(label.chars().count());
    let pad_left = pad_total / 2;
    let centered = format!("{}{}{}", " ".repeat(pad_left), label, " ".repeat(pad_total - pad_left));
    let banner = Paragraph::new(Line::from(Span::styled(
        centered,
        Style::default().fg(Color::Black).bg(bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, area);
}

fn draw_status(f: &mut Frame, area: Rect, status: &AgentStatus) {
    let dim = Style::default().fg(Color::DarkGray);
    let (model, model_color) = match status.model {
        ModelState::Loaded => ("loaded", Color::Green),
        ModelState::Unloaded => ("unloaded", Color::Red),
    };

    let mut lines = vec![
        Line::from(vec![
            Span::raw(" "),
            key("e"),
            Span::raw(" task  "),
            key("m"),
            Span::raw(" model  "),
            key("p"),
            Span::raw(" plan  "),
            key("x"),
            Span::raw(" execute  "),
            key("d"),
            Span::raw(" step  "),
            key("c"),
            Span::raw(" capture  "),
            key("w"),
            Span::raw(" watch  "),
            key("s"),
            Span::raw(" stop"),
        ]),
        Line::from(Span::styled(format!(" fail-safe: {} or cursor to (0,0)", FAILSAFE_HOTKEY), dim)),
        Line::from(vec![Span::raw(" model    "), Span::styled(model, Style::default().fg(model_color))]),
        Line::from(vec![
            Span::raw(" watch    "),
            Span::styled(
                if status.watching { "on" } else { "off" },
                Style::default().fg(if status.watching { Color::Cyan } else { Color::DarkGray }),
            ),
            Span::styled(format!("  {} change(s)", status.changes), dim),
        ]),
    ];

    if let Some(a) = &status.analysis {
        let names: Vec<&str> = a.subtasks.iter().map(|s| s.name.as_str()).collect();
        lines.push(Line::from(vec![
            Span::raw(" task     "),
            Span::styled(format!("{:?}", a.task_type), Style::default().fg(Color::Cyan)),
            Span::styled(format!("  ~{} step(s): {}", a.estimated_steps, names.join(", ")), dim),
        ]));
    }
    if let Some(d) = &status.decision {
        lines.push(Line::from(vec![
            Span::raw(" decision "),
            Span::styled(d.action.describe(), Style::default().fg(Color::White)),
            Span::styled(format!("  {:.0}%", d.confidence * 100.0), dim),
        ]));
    }
    if let Some(p) = &status.last_capture {
        lines.push(Line::from(vec![Span::raw(" capture  "), Span::styled(p.display().to_string(), dim)]));
    }
    if let Some(e) = &status.last_error {
        lines.push(Line::from(vec![
            Span::raw(" error    "),
            Span::styled(e.as_str(), Style::default().fg(Color::Red)),
        ]));
    }

    let panel = Paragraph::new(lines)
        .block(Block::default().borders(Borders::LEFT | Borders::RIGHT).border_style(Style::default().fg(Color::Cyan)));
    f.render_widget(panel, area);
}

fn draw_task(f: &mut Frame, area: Rect, app: &App) {
    let (text, style) = if app.editing {
        (format!("{}_", app.task), Style::default().fg(Color::White))
    } else if app.task.is_empty() {
        ("press e to describe a task".to_string(), Style::default().fg(Color::DarkGray))
    } else {
        (app.task.clone(), Style::default().fg(Color::White))
    };
    let border = if app.editing { Color::Yellow } else { Color::Cyan };
    let title = if app.editing { " Task (enter to finish) " } else { " Task " };
    let panel = Paragraph::new(Line::from(Span::styled(text, style)))
        .block(Block::default().borders(Borders::ALL).title(title).border_style(Style::default().fg(border)));
    f.render_widget(panel, area);
}

fn draw_plan(f: &mut Frame, area: Rect, status: &AgentStatus) {
    let lines: Vec<Line> = if status.plan.is_empty() {
        vec![Line::from(Span::styled(" no plan", Style::default().fg(Color::DarkGray)))]
    } else {
        status
            .plan
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let done = i < status.executed;
                let (mark, color) = if done { ("[x]", Color::Green) } else { ("[ ]", Color::White) };
                Line::from(vec![
                    Span::styled(format!(" {} ", mark), Style::default().fg(color)),
                    Span::styled(format!("{}. ", i + 1), Style::default().fg(Color::DarkGray)),
                    Span::styled(step.action.describe(), Style::default().fg(color)),
                    Span::styled(format!("  {:.0}%", step.confidence * 100.0), Style::default().fg(Color::DarkGray)),
                ])
            })
            .collect()
    };
    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Plan ")
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(panel, area);
}

fn draw_logs(f: &mut Frame, area: Rect, app: &App) {
    let visible_height = area.height.saturating_sub(2) as usize;
    let total = app.log_messages.len();
    let max_scroll = total.saturating_sub(visible_height);
    let scroll = app.log_scroll.min(max_scroll);
    let start = total.saturating_sub(visible_height + scroll);
    let end = total.saturating_sub(scroll);
    let log_lines: Vec<Line> = app.log_messages[start..end]
        .iter()
        .map(|m| parse_log_line(m))
        .collect();

    let log_panel = Paragraph::new(log_lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Logs ")
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(log_panel, area);
}

/// Parse a structured log line (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage)
/// into a colored Line for TUI rendering.
pub fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    let [level, prefix, color_idx, timestamp, message] = parts[..] else {
        return Line::from(raw);
    };

    let color = match color_idx.parse::<u8>().unwrap_or(0) {
        1 => Color::DarkGray,  // COLOR_GRAY
        2 => Color::LightBlue, // COLOR_BLUE
        3 => Color::Magenta,   // COLOR_MAGENTA
        _ => Color::White,
    };

    let mut spans = vec![
        Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ];

    // Level tag only for warn/error
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }

    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(color)));

    Line::from(spans)
}
