//! UI thread: terminal setup, draw loop, input handling

use std::io::stdout;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Terminal;

use super::{PlanStatus, TuiState};
use crate::error::Result;
use crate::util::constants::SPINNER_PERIOD;

pub(crate) fn run_ui(state: Arc<TuiState>) -> Result<()> {
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let started = Instant::now();
    let result = ui_loop(&mut terminal, &state, started);

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;
    result
}

fn ui_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &Arc<TuiState>,
    started: Instant,
) -> Result<()> {
    loop {
        if state.stop.load(Ordering::SeqCst) {
            return Ok(());
        }
        let spinner_frame =
            (started.elapsed().as_millis() / SPINNER_PERIOD.as_millis()) as usize;

        terminal.draw(|frame| {
            let [left, right] =
                Layout::horizontal([Constraint::Percentage(30), Constraint::Percentage(70)])
                    .areas(frame.area());

            let rows = state.rows.lock().unwrap();
            let selected = state.selected.load(Ordering::SeqCst).min(rows.len().saturating_sub(1));

            let items: Vec<ListItem> = rows
                .iter()
                .map(|row| {
                    let style = match row.status {
                        PlanStatus::Succeeded => Style::default().fg(Color::Green),
                        PlanStatus::Failed => Style::default().fg(Color::Red),
                        PlanStatus::Running => Style::default().fg(Color::White),
                        PlanStatus::Pending | PlanStatus::Deferred => {
                            Style::default().fg(Color::Yellow)
                        }
                    };
                    ListItem::new(Line::styled(
                        format!("{} {}", row.status.icon(spinner_frame), row.id),
                        style,
                    ))
                })
                .collect();
            let mut list_state = ListState::default();
            if !rows.is_empty() {
                list_state.select(Some(selected));
            }
            frame.render_stateful_widget(
                List::new(items)
                    .block(Block::bordered().title("Actions"))
                    .highlight_style(Style::default().bg(Color::DarkGray)),
                left,
                &mut list_state,
            );

            let (title, log) = rows
                .get(selected)
                .map(|row| (format!("{} Logs", row.id), row.log.join("\n")))
                .unwrap_or_else(|| ("Logs".to_string(), String::new()));
            frame.render_widget(
                Paragraph::new(log)
                    .wrap(Wrap { trim: false })
                    .block(Block::bordered().title(title)),
                right,
            );
        })?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                match (key.code, key.modifiers) {
                    (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                        // Forward the interrupt to the root context
                        state.cancel.cancel();
                    }
                    (KeyCode::Up, _) => {
                        state.user_selected.store(true, Ordering::SeqCst);
                        let current = state.selected.load(Ordering::SeqCst);
                        state
                            .selected
                            .store(current.saturating_sub(1), Ordering::SeqCst);
                    }
                    (KeyCode::Down, _) => {
                        state.user_selected.store(true, Ordering::SeqCst);
                        let count = state.rows.lock().unwrap().len();
                        let current = state.selected.load(Ordering::SeqCst);
                        state
                            .selected
                            .store((current + 1).min(count.saturating_sub(1)), Ordering::SeqCst);
                    }
                    _ => {}
                }
            }
        }
    }
}
