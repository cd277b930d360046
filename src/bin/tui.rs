mod tui_app;

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use tui_app::{
    format_duration_minutes, format_price, format_rate, format_time_ms, truncate, AppState, ConnectionStatus,
};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut search_table_state = TableState::default();
    search_table_state.select(None);

    let result = run_loop(&mut terminal, &mut app, &client, &mut search_table_state).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    search_state: &mut TableState,
) -> io::Result<()> {
    let refresh_interval = Duration::from_secs(5);
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app, search_state))?;

        let timeout = refresh_interval
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.refresh(client).await;
                            last_tick = std::time::Instant::now();
                        }
                        KeyCode::Down | KeyCode::Char('j') => {
                            let max = app.searches.len().saturating_sub(1);
                            let next = search_state.selected().map_or(0, |i| (i + 1).min(max));
                            search_state.select(Some(next));
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            let prev = search_state
                                .selected()
                                .map_or(0, |i| i.saturating_sub(1));
                            search_state.select(Some(prev));
                        }
                        KeyCode::Enter => {
                            let id = search_state
                                .selected()
                                .and_then(|i| app.searches.get(i))
                                .map(|s| s.id);
                            if let Some(id) = id {
                                app.fetch_prices(client, id).await;
                            }
                        }
                        KeyCode::Esc => app.clear_prices(),
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= refresh_interval {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, search_state: &mut TableState) {
    let area = f.area();

    // Outer vertical split: header | body | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_body(f, app, search_state, chunks[1]);
    render_footer(f, chunks[2]);
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (status_text, status_color) = match &app.status {
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };
    let s = &app.summary;
    let scheduler = if s.scheduler_running { "scheduler up" } else { "scheduler down" };
    let p95 = app
        .latency
        .p95_ms
        .map_or("—".to_string(), |v| format!("{:.1}s p95", v as f64 / 1000.0));

    let title_spans = vec![
        Span::styled(" Fare Sentinel  ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(scheduler, Style::default().fg(Color::White)),
        Span::raw("  │  "),
        Span::styled(format!("{} healthy", s.searches_healthy), Style::default().fg(Color::Green)),
        Span::raw(" / "),
        Span::styled(format!("{} degraded", s.searches_degraded), Style::default().fg(Color::Yellow)),
        Span::raw(" / "),
        Span::styled(format!("{} open", s.searches_circuit_open), Style::default().fg(Color::Red)),
        Span::raw("  │  "),
        Span::styled(format!("{} in flight", s.attempts_in_flight), Style::default().fg(Color::White)),
        Span::raw("  │  "),
        Span::styled(p95, Style::default().fg(Color::White)),
    ];

    let paragraph = Paragraph::new(Line::from(title_spans)).block(frame_block());
    f.render_widget(paragraph, area);
}

fn frame_block() -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
}

fn panel(title: String) -> Block<'static> {
    frame_block().title(Span::styled(
        title,
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    ))
}

fn header_row(labels: &[&'static str]) -> Row<'static> {
    let bold_yellow = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    Row::new(labels.iter().map(|l| Cell::from(*l).style(bold_yellow))).height(1)
}

fn render_body(f: &mut Frame, app: &AppState, search_state: &mut TableState, area: Rect) {
    // Horizontal split: searches (50%) | price history (50%)
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    render_searches_table(f, app, search_state, halves[0]);
    render_prices_table(f, app, halves[1]);
}

fn status_color(status: &str) -> Color {
    match status {
        "healthy" => Color::Green,
        "degraded" => Color::Yellow,
        "circuit_open" => Color::Red,
        _ => Color::White,
    }
}

fn render_searches_table(f: &mut Frame, app: &AppState, state: &mut TableState, area: Rect) {

    let rows: Vec<Row> = app
        .searches
        .iter()
        .map(|s| {
            Row::new(vec![
                Cell::from(s.id.to_string()).style(Style::default().fg(Color::DarkGray)),
                Cell::from(truncate(&s.label(), 24)),
                Cell::from(s.status.replace('_', " ")).style(Style::default().fg(status_color(&s.status))),
                Cell::from(s.consecutive_failures.to_string()),
                Cell::from(format_rate(s.success_rate)),
                Cell::from(format_price(s.latest_price, &s.currency)).style(Style::default().fg(Color::Cyan)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Min(12),
            Constraint::Length(12),
            Constraint::Length(5),
            Constraint::Length(5),
            Constraint::Length(10),
        ],
    )
    .header(header_row(&["#", "Search", "Status", "Fails", "Rate", "Latest"]))
    .block(panel(" SEARCHES ".to_string()))
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));

    f.render_stateful_widget(table, area, state);
}

fn render_prices_table(f: &mut Frame, app: &AppState, area: Rect) {

    let rows: Vec<Row> = app
        .selected_prices
        .prices
        .iter()
        .map(|p| {
            let conf_color = if p.confidence >= 0.8 {
                Color::Green
            } else if p.confidence >= 0.6 {
                Color::Yellow
            } else {
                Color::Red
            };
            let flag = if p.is_suspicious { "⚠ suspect" } else { "" };
            let price_style = if p.is_suspicious {
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::CROSSED_OUT)
            } else {
                Style::default().fg(Color::White)
            };

            Row::new(vec![
                Cell::from(format_time_ms(p.scraped_at)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(format_price(Some(p.price), &p.currency)).style(price_style),
                Cell::from(truncate(p.airline.as_deref().unwrap_or("—"), 14)),
                Cell::from(p.stops.map_or("—".to_string(), |s| s.to_string())),
                Cell::from(format_duration_minutes(p.duration_minutes)),
                Cell::from(format!("{:.2}", p.confidence)).style(Style::default().fg(conf_color)),
                Cell::from(flag).style(Style::default().fg(Color::Red)),
            ])
        })
        .collect();

    let title = match &app.selected_prices.label {
        Some(label) => format!(" PRICES · {} ", truncate(label, 30)),
        None if app.showing_prices() => " PRICES ".to_string(),
        None => " PRICES (select a search, Enter) ".to_string(),
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Length(10),
            Constraint::Min(8),
            Constraint::Length(5),
            Constraint::Length(6),
            Constraint::Length(5),
            Constraint::Length(9),
        ],
    )
    .header(header_row(&["Time", "Price", "Airline", "Stops", "Dur", "Conf", ""]))
    .block(panel(title));

    f.render_widget(table, area);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("select  "),
        Span::styled("[enter/esc] ", Style::default().fg(Color::Yellow)),
        Span::raw("prices  "),
        Span::styled("auto-refresh: 5s", Style::default().fg(Color::DarkGray)),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
