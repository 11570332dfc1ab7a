use std::{io::stdout, sync::mpsc, thread::spawn, time::Duration};

use crate::gui::error::MonitorGuiError;

use crossterm::{
    event::{self, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};

use ratatui::{
    prelude::*,
    widgets::{block::Title, *},
    Terminal,
};

enum ThreadMessage {
    Stop,
}

/// Runs a function over and over until the user presses a key, showing the
/// lines it produces each time.
///
/// The function can be thought of as a recursive fold. `init` contains the
/// inital state of the loop, then `f` is called on the inital state to produce
/// a new state and the lines to show, and then `f` is called on that new
/// state, and so on until the user indicates that this should stop. The last
/// state is returned.
pub fn fold_until_stop<F, T>(title: &str, init: T, f: F) -> Result<T, MonitorGuiError>
where
    F: Fn(T) -> (T, Vec<String>) + Send + 'static,
    T: Send + 'static,
{
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let (stop_tx, stop_rx) = mpsc::channel();
    let (lines_tx, lines_rx) = mpsc::channel();
    let (res_tx, res_rx) = mpsc::channel();

    let th = spawn(move || {
        let mut val = init;

        loop {
            let (next, lines) = f(val);
            val = next;
            // the view only ever wants the newest lines, and may be gone
            let _ = lines_tx.send(lines);
            if let Ok(ThreadMessage::Stop) = stop_rx.try_recv() {
                let _ = res_tx.send(val);
                break;
            }
        }
    });

    let drawn = draw_until_key(&mut terminal, title, &lines_rx);

    let stopped = stop_tx
        .send(ThreadMessage::Stop)
        .map_err(MonitorGuiError::from)
        .and_then(|_| Ok(res_rx.recv()?));
    let joined = th.join().map_err(|_| MonitorGuiError::PollerPanicked);
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    drawn?;
    joined?;
    stopped
}

fn draw_until_key<B: Backend>(
    terminal: &mut Terminal<B>,
    title: &str,
    lines_rx: &mpsc::Receiver<Vec<String>>,
) -> Result<(), MonitorGuiError> {
    let mut lines = vec![" Waiting for the device... ".to_owned()];

    loop {
        while let Ok(latest) = lines_rx.try_recv() {
            lines = latest;
        }

        let title = Title::from(Span::styled(
            format!(" {} ", title),
            Style::default()
                .fg(Color::Magenta)
                .add_modifier(Modifier::BOLD),
        ));
        let mut shown: Vec<Line> = lines.iter().map(|l| Line::from(l.as_str())).collect();
        shown.push(Line::from(""));
        shown.push(Line::from(" Press any key to stop "));
        let text = Paragraph::new(shown);
        let block = Block::default()
            .title(title.alignment(Alignment::Center))
            .borders(Borders::ALL);
        terminal.draw(|frame| {
            let area = frame.size();
            frame.render_widget(text.block(block), area);
        })?;
        if event::poll(Duration::from_millis(16))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(());
                }
            }
        }
    }
}
