use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;

use crate::app::App;
use crate::board::ApplicationBoard;
use crate::favorites::FavoriteSet;
use crate::models::{ApplicationStatus, Job, TrackedApplication, NOT_AVAILABLE};
use crate::pager::{PageCursor, PageLabel};
use crate::session::{Actor, SessionState};

struct BrowseState {
    jobs: Vec<Job>,
    favorites: FavoriteSet,
    board: ApplicationBoard,
    cursor: PageCursor,
    selected: usize,
    scroll_offset: u16,
    message: Option<String>,
}

impl BrowseState {
    fn page(&self) -> &[Job] {
        self.cursor.window(&self.jobs)
    }

    fn current_job(&self) -> Option<&Job> {
        self.page().get(self.selected)
    }

    fn application_for(&self, job_id: &str) -> Option<&TrackedApplication> {
        self.board.find_by_job(job_id)
    }

    fn next(&mut self) {
        if self.selected + 1 < self.page().len() {
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

    fn next_page(&mut self) {
        if self.cursor.next() {
            self.selected = 0;
            self.scroll_offset = 0;
        }
    }

    fn prev_page(&mut self) {
        if self.cursor.prev() {
            self.selected = 0;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }
}

pub async fn run_browse(app: &App) -> Result<()> {
    let jobs = app.catalog.list_active().await?;
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    let actor = app.session.actor();
    let (favorites, board) = load_actor_views(app, &actor).await;

    let mut state = BrowseState {
        cursor: PageCursor::new(app.config.listing.page_size, jobs.len()),
        jobs,
        favorites,
        board,
        selected: 0,
        scroll_offset: 0,
        message: None,
    };

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, app, actor).await;

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut BrowseState,
    app: &App,
    mut actor: Actor,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(0));
    let mut session = app.session.subscribe();

    loop {
        match session.has_changed() {
            Ok(false) => {}
            Ok(true) => {
                let next = session.borrow_and_update().clone();
                if next == SessionState::Disposed {
                    break;
                }
                actor = app.session.actor();
                (state.favorites, state.board) = load_actor_views(app, &actor).await;
                state.message = Some("Session changed; reloaded favorites".to_string());
            }
            Err(_) => break,
        }

        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            state.message = None;
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Right | KeyCode::Char('n') => state.next_page(),
                KeyCode::Left | KeyCode::Char('p') => state.prev_page(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Char('f') => toggle_favorite(state, app, &actor).await,
                KeyCode::Char('s') => set_status(state, app, &actor, ApplicationStatus::Saved).await,
                KeyCode::Char('a') => set_status(state, app, &actor, ApplicationStatus::Applied).await,
                KeyCode::Char('i') => {
                    set_status(state, app, &actor, ApplicationStatus::Interview).await
                }
                KeyCode::Char('o') => set_status(state, app, &actor, ApplicationStatus::Offer).await,
                KeyCode::Char('x') => {
                    set_status(state, app, &actor, ApplicationStatus::Rejected).await
                }
                _ => {}
            }
            list_state.select(Some(state.selected));
        }
    }
    Ok(())
}

/// Favorites and applications as seen by `actor`. Read failures leave the
/// view empty rather than closing it.
async fn load_actor_views(app: &App, actor: &Actor) -> (FavoriteSet, ApplicationBoard) {
    let favorites = match app.favorites.get_favorites(actor).await {
        Ok(set) => set,
        Err(e) => {
            log::warn!("could not load favorites: {}", e);
            FavoriteSet::new()
        }
    };
    let mut board = ApplicationBoard::new();
    if let Actor::User(user_id) = actor {
        if let Err(e) = board.reload(&app.tracker, user_id).await {
            log::warn!("could not load applications: {}", e);
        }
    }
    (favorites, board)
}

async fn toggle_favorite(state: &mut BrowseState, app: &App, actor: &Actor) {
    let Some(job) = state.current_job() else { return };
    let job_id = job.id.clone();
    let title = job.title.clone();
    state.message = Some(
        match app
            .favorites
            .toggle_optimistic(actor, &mut state.favorites, &job_id)
            .await
        {
            Ok(true) => format!("Added '{}' to favorites", title),
            Ok(false) => format!("Removed '{}' from favorites", title),
            Err(e) => format!("Favorite not saved: {}", e),
        },
    );
}

async fn set_status(state: &mut BrowseState, app: &App, actor: &Actor, status: ApplicationStatus) {
    let Actor::User(user_id) = actor else {
        state.message = Some("Sign in with 'coopscout login' to track applications".to_string());
        return;
    };
    let Some(job) = state.current_job().cloned() else { return };

    let tracked = state.application_for(&job.id).map(|a| a.application.id.clone());
    let result = match tracked {
        Some(application_id) => {
            state
                .board
                .change_status(&app.tracker, &application_id, status)
                .await
        }
        None if matches!(status, ApplicationStatus::Saved | ApplicationStatus::Applied) => {
            state.board.track(&app.tracker, user_id, job.clone(), status).await
        }
        None => {
            state.message = Some("Track the job first with s or a".to_string());
            return;
        }
    };
    state.message = Some(match result {
        Ok(()) => format!("'{}' is now {}", job.title, status),
        Err(e) => format!("Update failed: {}", e),
    });
}

fn status_icon(status: Option<ApplicationStatus>) -> &'static str {
    match status {
        None => " ",
        Some(ApplicationStatus::Saved) => "s",
        Some(ApplicationStatus::Applied) => "+",
        Some(ApplicationStatus::Interview) => "i",
        Some(ApplicationStatus::Offer) => "$",
        Some(ApplicationStatus::Rejected) => "x",
    }
}

fn status_style(status: ApplicationStatus) -> Style {
    match status {
        ApplicationStatus::Saved => Style::default().fg(Color::Yellow),
        ApplicationStatus::Applied => Style::default().fg(Color::Cyan),
        ApplicationStatus::Interview => Style::default().fg(Color::Magenta),
        ApplicationStatus::Offer => Style::default().fg(Color::Green),
        ApplicationStatus::Rejected => Style::default().fg(Color::Red),
    }
}

fn page_strip(state: &BrowseState) -> String {
    let labels: Vec<String> = state
        .cursor
        .labels()
        .into_iter()
        .map(|label| match label {
            PageLabel::Page(n) if n == state.cursor.current() => format!("[{}]", n),
            other => other.to_string(),
        })
        .collect();
    let (first, last) = state.cursor.range();
    format!(
        " Page {}  ({}-{} of {}) ",
        labels.join(" "),
        first,
        last,
        state.jobs.len()
    )
}

fn draw(frame: &mut Frame, state: &BrowseState, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1), Constraint::Length(1)])
        .split(frame.area());

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(rows[0]);

    // Left panel: current page of jobs
    let items: Vec<ListItem> = state
        .page()
        .iter()
        .map(|job| {
            let star = if state.favorites.contains(&job.id) { "*" } else { " " };
            let status = state.application_for(&job.id).map(|a| a.application.status);
            let company = job.company.as_deref().unwrap_or("?");
            let title = if job.title.chars().count() > 35 {
                format!("{}...", job.title.chars().take(32).collect::<String>())
            } else {
                job.title.clone()
            };
            ListItem::new(format!("{}{} {} | {}", star, status_icon(status), title, company))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(page_strip(state)))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: job detail
    let detail_widget = Paragraph::new(build_detail(state))
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));

    frame.render_widget(detail_widget, chunks[1]);

    let message = Paragraph::new(state.message.clone().unwrap_or_default())
        .style(Style::default().fg(Color::Yellow));
    frame.render_widget(message, rows[1]);

    let help = Paragraph::new(
        " j/k:navigate  n/p:page  J/K:scroll  f:favorite  s:save a:applied i:interview o:offer x:rejected  q:quit",
    )
    .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, rows[2]);
}

fn field<'a>(label: &str, value: Option<&'a str>) -> Line<'a> {
    Line::from(vec![
        Span::styled(format!("{}: ", label), Style::default().fg(Color::DarkGray)),
        Span::raw(value.filter(|v| !v.is_empty()).unwrap_or(NOT_AVAILABLE)),
    ])
}

fn build_detail(state: &BrowseState) -> Text<'_> {
    let Some(job) = state.current_job() else {
        return Text::raw("No job selected");
    };

    let mut lines: Vec<Line> = Vec::new();

    // Header
    lines.push(Line::from(Span::styled(
        &job.title,
        Style::default().add_modifier(Modifier::BOLD),
    )));
    if let Some(company) = &job.company {
        lines.push(Line::from(format!("at {}", company)));
    }
    if state.favorites.contains(&job.id) {
        lines.push(Line::from(Span::styled(
            "* Favorite",
            Style::default().fg(Color::Yellow),
        )));
    }

    if let Some(tracked) = state.application_for(&job.id) {
        let app = &tracked.application;
        lines.push(Line::from(Span::styled(
            format!("Application: {}", app.status),
            status_style(app.status),
        )));
        if let Some(at) = app.interview_date {
            lines.push(Line::from(format!("Interview: {}", at.format("%Y-%m-%d %H:%M"))));
        }
        if let Some(notes) = &app.notes {
            lines.push(Line::from(format!("Notes: {}", notes)));
        }
    }

    lines.push(Line::from(""));
    lines.push(field("Location", job.location.as_deref()));
    lines.push(field("Deadline", job.deadline.as_deref()));
    lines.push(field("Compensation", job.compensation.as_deref()));
    lines.push(field("Targeted major", job.targeted_major.as_deref()));
    lines.push(field("Minimum GPA", job.minimum_gpa.as_deref()));
    if let Some(link) = &job.job_link {
        lines.push(Line::from(format!("Link: {}", link)));
    }
    lines.push(Line::from(""));

    match job.description.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(description) => {
            lines.push(Line::from(Span::styled(
                "Description",
                Style::default().add_modifier(Modifier::BOLD),
            )));
            for line in textwrap::fill(description, 70).lines() {
                lines.push(Line::from(format!("  {}", line)));
            }
        }
        None => lines.push(Line::from(Span::styled(
            "(No description provided)",
            Style::default().fg(Color::DarkGray),
        ))),
    }

    Text::from(lines)
}
