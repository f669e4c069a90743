use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState},
};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::comfy_table::format_timestamp;
use crate::error::{FetchError, RegistryError};
use crate::pipeline::CorrelationResult;
use crate::registry::{self, AssetRegistry};

// --- Background updates ---

enum Update {
    Refreshed {
        generation: u64,
        result: Result<Vec<CorrelationResult>, FetchError>,
    },
    Added(Result<CorrelationResult, RegistryError>),
}

// --- App State ---

struct App {
    registry: AssetRegistry,
    /// Bumped on every refresh; results tagged with an older value are stale.
    generation: u64,
    refreshing: bool,
    adding: bool,
    input: Option<String>,
    status: String,
    error: Option<String>,
    last_updated: i64,
    table_state: TableState,
}

impl App {
    fn new(registry: AssetRegistry) -> Self {
        Self {
            registry,
            generation: 0,
            refreshing: false,
            adding: false,
            input: None,
            status: String::new(),
            error: None,
            last_updated: 0,
            table_state: TableState::default(),
        }
    }

    fn busy(&self) -> bool {
        self.refreshing || self.adding
    }

    fn selected_symbol(&self) -> Option<String> {
        let idx = self.table_state.selected()?;
        self.registry.rows().get(idx).map(|r| r.symbol.clone())
    }

    fn move_selection(&mut self, down: bool) {
        let len = self.registry.rows().len();
        if len == 0 {
            self.table_state.select(None);
            return;
        }
        let next = match self.table_state.selected() {
            None => 0,
            Some(i) if down => (i + 1) % len,
            Some(i) => i.checked_sub(1).unwrap_or(len - 1),
        };
        self.table_state.select(Some(next));
    }

    fn clamp_selection(&mut self) {
        let len = self.registry.rows().len();
        match self.table_state.selected() {
            Some(_) if len == 0 => self.table_state.select(None),
            Some(i) if i >= len => self.table_state.select(Some(len - 1)),
            _ => {}
        }
    }

    /// Starts a refresh, superseding any refresh still in flight.
    fn start_refresh(&mut self, tx: &mpsc::Sender<Update>) {
        self.generation += 1;
        self.refreshing = true;
        self.error = None;
        self.status = "Loading top assets...".to_string();

        let generation = self.generation;
        let market = self.registry.market();
        let config = self.registry.config().clone();
        let custom = self.registry.custom_symbols().clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = registry::build_rows(market.as_ref(), &config, &custom).await;
            let _ = tx.send(Update::Refreshed { generation, result }).await;
        });
    }

    fn start_add(&mut self, raw: String, tx: &mpsc::Sender<Update>) {
        self.adding = true;
        self.error = None;
        self.status = format!("Adding {}...", raw.trim().to_uppercase());

        let market = self.registry.market();
        let config = self.registry.config().clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = registry::correlate_symbol(market.as_ref(), &config, &raw).await;
            let _ = tx.send(Update::Added(result)).await;
        });
    }

    async fn apply(&mut self, update: Update) {
        match update {
            Update::Refreshed { generation, .. } if generation != self.generation => {
                tracing::debug!(generation, current = self.generation, "discarding stale refresh");
            }
            Update::Refreshed { result, .. } => {
                self.refreshing = false;
                match result {
                    Ok(rows) => {
                        self.registry.replace_rows(rows);
                        self.last_updated = chrono::Utc::now().timestamp_millis();
                        self.status = "Done".to_string();
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "refresh failed");
                        self.error = Some(format!("Error: {e}"));
                        self.status.clear();
                    }
                }
                self.clamp_selection();
            }
            Update::Added(result) => {
                self.adding = false;
                let outcome = match result {
                    Ok(row) => self.registry.accept(row).await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                match outcome {
                    Ok(_) => self.status = "Done".to_string(),
                    Err(msg) => {
                        self.error = Some(format!("Error: {msg}"));
                        self.status.clear();
                    }
                }
            }
        }
    }
}

// --- TUI ---

/// **Interactive screen**
/// Owns the terminal until the user quits, restoring it even when the app
/// loop fails.
pub async fn run_tui(registry: AssetRegistry) -> Result<()> {
    // 1. Raw mode and alternate screen
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // 2. Run until quit
    let res = run_app(&mut terminal, App::new(registry)).await;

    // 3. Restore the terminal before reporting any error
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, mut app: App) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<Update>(8);
    app.start_refresh(&tx);

    loop {
        // 1. Draw
        terminal.draw(|f| ui(f, &mut app))?;

        // 2. Apply whatever the background tasks finished
        while let Ok(update) = rx.try_recv() {
            app.apply(update).await;
        }

        // 3. Keyboard input, without blocking the redraw
        if event::poll(Duration::from_millis(50))? {
            // Resize needs no handling: the next draw picks up the new size.
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && !handle_key_event(key, &mut app, &tx).await? {
                    return Ok(());
                }
            }
        }
    }
}

/// Returns `false` when the user asked to quit.
async fn handle_key_event(key: KeyEvent, app: &mut App, tx: &mpsc::Sender<Update>) -> Result<bool> {
    if let Some(input) = app.input.as_mut() {
        match key.code {
            KeyCode::Esc => app.input = None,
            KeyCode::Enter => {
                let raw = input.clone();
                app.input = None;
                if !raw.trim().is_empty() {
                    app.start_add(raw, tx);
                }
            }
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Char(c) => input.push(c),
            _ => {}
        }
        return Ok(true);
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return Ok(false),
        KeyCode::F(5) | KeyCode::Char('r') if !app.adding => app.start_refresh(tx),
        KeyCode::Char('a') if !app.busy() => app.input = Some(String::new()),
        KeyCode::Char('d') | KeyCode::Delete if !app.busy() => {
            if let Some(symbol) = app.selected_symbol() {
                app.registry.remove(&symbol).await?;
                app.clamp_selection();
            }
        }
        KeyCode::Up => app.move_selection(false),
        KeyCode::Down => app.move_selection(true),
        _ => {}
    }
    Ok(true)
}

fn correlation_color(value: Option<f64>) -> Color {
    match value {
        Some(v) if v >= 0.0 => Color::Green,
        Some(_) => Color::Red,
        None => Color::DarkGray,
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(0),
        Constraint::Length(1),
        Constraint::Length(1),
    ])
    .split(f.size());

    let reference = app.registry.config().reference_symbol.clone();
    let params = app.registry.config().params();
    f.render_widget(
        Block::default()
            .borders(Borders::ALL)
            .title_alignment(Alignment::Center)
            .title(format!(
                "{} correlation | window {} | {} days | Last Updated: {} UTC",
                reference,
                params.window,
                params.days,
                format_timestamp(app.last_updated)
            )),
        chunks[0],
    );

    let header = Row::new([
        Cell::from("#"),
        Cell::from("Name"),
        Cell::from("Symbol"),
        Cell::from("Rank"),
        Cell::from(format!("Corr vs {}", reference)),
    ])
    .style(Style::default().bg(Color::DarkGray));

    let custom = app.registry.custom_symbols();
    let rows: Vec<Row> = app
        .registry
        .rows()
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let marker = if custom.contains(&row.symbol) { " *" } else { "" };
            Row::new([
                Cell::from(format!("{}", i + 1)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(row.name.clone()),
                Cell::from(format!("{}{}", row.symbol, marker))
                    .style(Style::default().fg(Color::Cyan)),
                Cell::from(row.rank.map_or_else(|| "-".to_string(), |r| r.to_string())),
                Cell::from(Line::from(row.correlation.to_string()))
                    .style(Style::default().fg(correlation_color(row.correlation.value()))),
            ])
            .height(1)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Percentage(38),
            Constraint::Percentage(20),
            Constraint::Percentage(14),
            Constraint::Percentage(20),
        ],
    )
    .header(header)
    .highlight_style(Style::default().fg(Color::Yellow).bg(Color::DarkGray))
    .block(Block::default().borders(Borders::ALL).title("Assets (* = saved)"));
    f.render_stateful_widget(table, chunks[1], &mut app.table_state);

    let status_line = match &app.error {
        Some(err) => Line::from(err.clone()).style(Style::default().fg(Color::Red)),
        None => Line::from(app.status.clone()),
    };
    f.render_widget(Paragraph::new(status_line), chunks[2]);
    f.render_widget(
        Paragraph::new("F5/r refresh  a add  d remove  ↑↓ select  q quit")
            .alignment(Alignment::Center),
        chunks[3],
    );

    if let Some(input) = &app.input {
        let area = centered_rect(50, 20, chunks[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new(format!("{}_", input))
                .block(Block::default().title("Add symbol (Enter / Esc)").borders(Borders::ALL)),
            area,
        );
    } else if app.refreshing && app.registry.rows().is_empty() {
        let area = centered_rect(60, 20, chunks[1]);
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new("Running correlation pipeline...\nPlease wait.")
                .block(Block::default().title("Refreshing").borders(Borders::ALL))
                .alignment(Alignment::Center),
            area,
        );
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}
