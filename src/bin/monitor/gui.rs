use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    style::{Color, Style},
    symbols,
    text::Span,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType},
    Frame, Terminal,
};
use std::{
    error::Error,
    io,
    time::{Duration, Instant},
};

use kinsei::Position;

/// One reading: where everybody is, and who has settled.
pub struct Sample {
    pub raw: Vec<Position>,
    pub settled: Vec<Position>,
    pub status: String,
}

pub type Sampler = Box<dyn FnMut() -> Sample>;

struct App {
    sampler: Sampler,
    bounds: (f64, f64),
    raw: Vec<(f64, f64)>,
    settled: Vec<(f64, f64)>,
    status: String,
}

fn plot_points(positions: &[Position]) -> Vec<(f64, f64)> {
    positions
        .iter()
        .filter(|p| !p.is_absent())
        .map(|p| (p.x as f64, p.y as f64))
        .collect()
}

impl App {
    fn new(sampler: Sampler, bounds: (f64, f64)) -> App {
        App {
            sampler,
            bounds,
            raw: vec![],
            settled: vec![],
            status: String::new(),
        }
    }

    fn on_tick(&mut self) {
        let sample = (self.sampler)();
        self.raw = plot_points(&sample.raw);
        self.settled = plot_points(&sample.settled);
        self.status = sample.status;
    }
}

/// Plots the room until a key is pressed, sampling every `tick_rate`.
/// `bounds` is the room's width and height in millimeters.
pub fn engage_gui(
    sampler: Sampler,
    bounds: (f64, f64),
    tick_rate: Duration,
) -> Result<(), Box<dyn Error>> {
    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // create app and run it
    let app = App::new(sampler, bounds);
    let res = run_app(&mut terminal, app, tick_rate);

    // restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    Ok(res?)
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    tick_rate: Duration,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    app.on_tick();
    loop {
        terminal.draw(|f| ui(f, &app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(());
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            app.on_tick();
            last_tick = Instant::now();
        }
    }
}

fn axis_labels(max: f64) -> Vec<Span<'static>> {
    [0.0, max / 2.0, max]
        .iter()
        .map(|v| Span::from(format!("{:.0}", v)))
        .collect()
}

fn ui(f: &mut Frame, app: &App) {
    let (width, height) = app.bounds;
    let chart = Chart::new(vec![
        Dataset::default()
            .name("Tracked")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Cyan))
            .data(&app.raw),
        Dataset::default()
            .name("Settled")
            .marker(symbols::Marker::Block)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Red))
            .data(&app.settled),
    ])
    .block(
        Block::default()
            .title(format!(" {} | any key to stop ", app.status))
            .borders(Borders::ALL),
    )
    .x_axis(
        Axis::default()
            .title(Span::styled("x (mm)", Style::default().fg(Color::Red)))
            .style(Style::default().fg(Color::White))
            .bounds([0.0, width])
            .labels(axis_labels(width)),
    )
    .y_axis(
        Axis::default()
            .title(Span::styled("y (mm)", Style::default().fg(Color::Red)))
            .style(Style::default().fg(Color::White))
            .bounds([0.0, height])
            .labels(axis_labels(height)),
    );

    f.render_widget(chart, f.size());
}
