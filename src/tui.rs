use anyhow::{Result, anyhow};
use crossterm::{
    ExecutableCommand,
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;

use crate::db::Database;
use crate::models::StoredJob;

struct AppState {
    all_jobs: Vec<StoredJob>,
    jobs: Vec<StoredJob>,
    selected: usize,
    scroll_offset: u16,
    picks_only: bool,
}

impl AppState {
    fn new(jobs: Vec<StoredJob>) -> Self {
        Self {
            all_jobs: jobs.clone(),
            jobs,
            selected: 0,
            scroll_offset: 0,
            picks_only: false,
        }
    }

    fn current_job(&self) -> Option<&StoredJob> {
        self.jobs.get(self.selected)
    }

    fn next(&mut self) {
        if !self.jobs.is_empty() && self.selected < self.jobs.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }

    fn toggle_picks_only(&mut self) {
        self.picks_only = !self.picks_only;
        self.jobs = if self.picks_only {
            self.all_jobs.iter().filter(|j| j.is_top_pick).cloned().collect()
        } else {
            self.all_jobs.clone()
        };
        self.selected = 0;
        self.scroll_offset = 0;
    }
}

/// Browse the latest session's scored jobs.
pub fn run_browse(db: &Database) -> Result<()> {
    let session = db
        .latest_session()?
        .ok_or_else(|| anyhow!("No sessions yet. Run 'jobscout run' first."))?;
    let jobs = db.session_jobs(session.id)?;
    if jobs.is_empty() {
        println!("Session #{} has no jobs.", session.id);
        return Ok(());
    }

    let mut state = AppState::new(jobs);

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state);

    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(0));

    loop {
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Char('p') => state.toggle_picks_only(),
                _ => {}
            }
            list_state.select(Some(state.selected));
        }
    }
    Ok(())
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(frame.area());

    let items: Vec<ListItem> = state
        .jobs
        .iter()
        .map(|stored| {
            let pick = if stored.is_top_pick { "*" } else { " " };
            let title = if stored.job.title.len() > 32 {
                format!("{}...", &stored.job.title[..29])
            } else {
                stored.job.title.clone()
            };
            ListItem::new(format!(
                "{} {:>4.0}% {} | {}",
                pick,
                stored.score * 100.0,
                title,
                stored.job.company
            ))
        })
        .collect();

    let filter_label = if state.picks_only { " Top Picks " } else { " Jobs " };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            "{}({}) ",
            filter_label,
            state.jobs.len()
        )))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    let detail = build_detail(state);
    let detail_widget = Paragraph::new(detail)
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));

    frame.render_widget(detail_widget, chunks[1]);

    let help_area = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let help = Paragraph::new(" j/k:navigate  J/K:scroll  p:top picks  q:quit")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, help_area[1]);
}

fn build_detail(state: &AppState) -> Text<'_> {
    let Some(stored) = state.current_job() else {
        return Text::raw("No job selected");
    };
    let job = &stored.job;

    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(Span::styled(
        job.title.as_str(),
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("at {}", job.company)));

    let score_style = if stored.score > 0.8 {
        Style::default().fg(Color::Green)
    } else if stored.score > 0.6 {
        Style::default().fg(Color::Cyan)
    } else if stored.score > 0.4 {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Red)
    };
    lines.push(Line::from(Span::styled(
        format!("Score: {:.0}%", stored.score * 100.0),
        score_style,
    )));

    if stored.is_top_pick {
        lines.push(Line::from(Span::styled(
            "Top pick",
            Style::default().fg(Color::Green),
        )));
    }

    lines.push(Line::from(format!("URL: {}", job.job_url)));
    if let Some(location) = &job.location {
        lines.push(Line::from(format!("Location: {}", location)));
    }
    if let Some(salary) = &job.salary_range {
        lines.push(Line::from(format!("Salary: {}", salary)));
    }
    if let Some(posted) = &job.posted_date {
        lines.push(Line::from(format!("Posted: {}", posted)));
    }

    lines.push(Line::from(""));

    if !stored.match_reasons.is_empty() {
        lines.push(Line::from(Span::styled(
            "Why it matched",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for reason in &stored.match_reasons {
            lines.push(Line::from(format!("  - {}", reason)));
        }
        lines.push(Line::from(""));
    }

    if !job.tech_stack.is_empty() {
        lines.push(Line::from(Span::styled(
            "Tech",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(format!("  {}", job.tech_stack.join(", "))));
        lines.push(Line::from(""));
    }

    if !job.requirements.is_empty() {
        lines.push(Line::from(Span::styled(
            "Requirements",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for line in textwrap::fill(&job.requirements, 70).lines() {
            lines.push(Line::from(format!("  {}", line)));
        }
        lines.push(Line::from(""));
    }

    if !job.description.is_empty() {
        lines.push(Line::from(Span::styled(
            "Description",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for line in textwrap::fill(&job.description, 70).lines() {
            lines.push(Line::from(line.to_string()));
        }
    }

    Text::from(lines)
}
