use std::collections::HashMap;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use image::imageops::FilterType;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use tracing::warn;
use unicode_width::UnicodeWidthStr;

use crate::acquisition;
use crate::engine::Engine;
use crate::playback::{Carousel, Transition};
use crate::story::{Story, EXPIRED_MESSAGE};

const CELL_WIDTH: u16 = 12;
const CELL_HEIGHT: u16 = 6;
const STRIP_HEIGHT: u16 = CELL_HEIGHT + 2;
const HALF_BLOCK: &str = "▀";

#[derive(Debug, Clone, Copy)]
struct Palette {
    bg: Color,
    panel_bg: Color,
    status_bg: Color,
    text_primary: Color,
    text_secondary: Color,
    accent: Color,
    seen: Color,
    error: Color,
}

impl Palette {
    fn named(theme: &str) -> Self {
        match theme {
            "mono" => Self {
                bg: Color::Reset,
                panel_bg: Color::Reset,
                status_bg: Color::DarkGray,
                text_primary: Color::White,
                text_secondary: Color::Gray,
                accent: Color::White,
                seen: Color::DarkGray,
                error: Color::White,
            },
            _ => Self {
                bg: Color::Rgb(30, 30, 46),
                panel_bg: Color::Rgb(24, 24, 36),
                status_bg: Color::Rgb(49, 50, 68),
                text_primary: Color::Rgb(205, 214, 244),
                text_secondary: Color::Rgb(166, 173, 200),
                accent: Color::Rgb(137, 180, 250),
                seen: Color::Rgb(88, 91, 112),
                error: Color::Rgb(243, 139, 168),
            },
        }
    }
}

/// Carousel backing the player overlay: a row of slides, one visible.
#[derive(Debug, Default)]
pub struct SlideDeck {
    len: usize,
    position: usize,
}

impl Carousel for SlideDeck {
    fn mount(&mut self, slides: usize) {
        self.len = slides;
        self.position = 0;
    }

    fn selected_snap(&self) -> usize {
        self.position
    }

    fn scroll_next(&mut self) {
        if self.position + 1 < self.len {
            self.position += 1;
        }
    }

    fn scroll_to(&mut self, index: usize) {
        self.position = index.min(self.len.saturating_sub(1));
    }
}

enum Mode {
    Browse,
    AddPrompt { buffer: String },
}

pub struct Options {
    pub engine: Engine<SlideDeck>,
    pub theme: String,
    pub tick_rate: Duration,
    pub max_size_bytes: u64,
    pub status_message: String,
}

pub struct Model {
    engine: Engine<SlideDeck>,
    palette: Palette,
    tick_rate: Duration,
    max_size_bytes: u64,
    status_message: String,
    status_is_error: bool,
    mode: Mode,
    cursor: usize,
    needs_redraw: bool,
    pictures: HashMap<(String, u16, u16), Text<'static>>,
}

impl Model {
    pub fn new(options: Options) -> Self {
        Self {
            engine: options.engine,
            palette: Palette::named(&options.theme),
            tick_rate: options.tick_rate,
            max_size_bytes: options.max_size_bytes,
            status_message: options.status_message,
            status_is_error: false,
            mode: Mode::Browse,
            cursor: 0,
            needs_redraw: true,
            pictures: HashMap::new(),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        // The player must not outlive the screen it draws on.
        self.engine.exit_playback();
        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            self.pump(Instant::now());

            if self.needs_redraw || self.engine.is_playing() {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            if event::poll(self.tick_rate)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match self.handle_key(key.code) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => self.report_error(err),
                        }
                        self.mark_dirty();
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Applies sync notifications and drives the playback timer.
    fn pump(&mut self, now: Instant) {
        if self.engine.poll_sync() {
            self.clamp_cursor();
            self.mark_dirty();
        }
        match self.engine.tick(now) {
            Ok(Some(Transition::Exited)) => {
                self.status_message = "Finished watching.".to_string();
                self.status_is_error = false;
                self.mark_dirty();
            }
            Ok(Some(_)) => self.mark_dirty(),
            Ok(None) => {}
            Err(err) => self.report_error(err),
        }
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.engine.is_playing() {
            if matches!(code, KeyCode::Esc | KeyCode::Char('q') | KeyCode::Backspace) {
                self.engine.exit_playback();
                self.status_message = "Closed story.".to_string();
                self.status_is_error = false;
            }
            return Ok(false);
        }

        if let Mode::AddPrompt { buffer } = &mut self.mode {
            match code {
                KeyCode::Esc => self.mode = Mode::Browse,
                KeyCode::Backspace => {
                    buffer.pop();
                }
                KeyCode::Char(ch) => buffer.push(ch),
                KeyCode::Enter => {
                    let path = expand_home(buffer.trim());
                    self.mode = Mode::Browse;
                    self.add_from_path(path)?;
                }
                _ => {}
            }
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Left | KeyCode::Char('h') => {
                self.cursor = self.cursor.saturating_sub(1);
            }
            KeyCode::Right | KeyCode::Char('l') => {
                if self.cursor + 1 < self.engine.stories().len() {
                    self.cursor += 1;
                }
            }
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = self.engine.stories().len().saturating_sub(1),
            KeyCode::Char('a') | KeyCode::Char('+') => {
                self.mode = Mode::AddPrompt {
                    buffer: String::new(),
                };
            }
            KeyCode::Enter | KeyCode::Char(' ') => self.open_selected()?,
            _ => {}
        }
        Ok(false)
    }

    fn add_from_path(&mut self, path: PathBuf) -> Result<()> {
        let src = acquisition::encode_file(&path, self.max_size_bytes)?;
        self.engine.add_story(src)?;
        self.status_message = format!("Added {}.", path.display());
        self.status_is_error = false;
        Ok(())
    }

    fn open_selected(&mut self) -> Result<()> {
        let Some(id) = self.engine.stories().get(self.cursor).map(|s| s.id.clone()) else {
            self.status_message = "No stories yet. Press a to add one.".to_string();
            return Ok(());
        };
        if self.engine.select_story(&id, Instant::now())? {
            self.status_message = "Watching stories. Esc to close.".to_string();
            self.status_is_error = false;
        }
        Ok(())
    }

    fn report_error(&mut self, err: anyhow::Error) {
        warn!("ui: {err:#}");
        self.status_message = format!("Error: {err:#}");
        self.status_is_error = true;
        self.mark_dirty();
    }

    fn clamp_cursor(&mut self) {
        let len = self.engine.stories().len();
        if self.cursor >= len {
            self.cursor = len.saturating_sub(1);
        }
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(
            Block::default().style(Style::default().bg(self.palette.bg)),
            full,
        );

        if self.engine.is_playing() {
            self.draw_player(frame, full);
            return;
        }

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(STRIP_HEIGHT),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        let status_fg = if self.status_is_error {
            self.palette.error
        } else {
            self.palette.text_primary
        };
        let status = Paragraph::new(self.status_message.clone()).style(
            Style::default()
                .fg(status_fg)
                .bg(self.palette.status_bg)
                .add_modifier(Modifier::BOLD),
        );
        frame.render_widget(status, layout[0]);

        self.draw_strip(frame, layout[1]);
        self.draw_details(frame, layout[2]);

        let footer = Paragraph::new(self.footer_text())
            .style(
                Style::default()
                    .fg(self.palette.text_secondary)
                    .bg(self.palette.panel_bg)
                    .add_modifier(Modifier::ITALIC),
            )
            .alignment(Alignment::Center);
        frame.render_widget(footer, layout[3]);

        if let Mode::AddPrompt { buffer } = &self.mode {
            let prompt = buffer.clone();
            self.draw_prompt(frame, full, &prompt);
        }
    }

    fn draw_strip(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .title(" Stories ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.palette.status_bg))
            .style(Style::default().bg(self.palette.panel_bg));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        if self.engine.stories().is_empty() {
            let empty = Paragraph::new("No stories. Press a to add an image.")
                .style(Style::default().fg(self.palette.text_secondary))
                .alignment(Alignment::Center);
            frame.render_widget(empty, inner);
            return;
        }

        let per_row = (inner.width / (CELL_WIDTH + 1)).max(1) as usize;
        let first = (self.cursor / per_row) * per_row;
        let visible: Vec<(usize, Story)> = self
            .engine
            .stories()
            .iter()
            .cloned()
            .enumerate()
            .skip(first)
            .take(per_row)
            .collect();

        for (slot, (index, story)) in visible.into_iter().enumerate() {
            let x = inner.x + slot as u16 * (CELL_WIDTH + 1);
            if x + CELL_WIDTH > inner.x + inner.width {
                break;
            }
            let cell = Rect::new(x, inner.y, CELL_WIDTH, CELL_HEIGHT.min(inner.height));
            let border = if story.is_viewed {
                self.palette.seen
            } else {
                self.palette.accent
            };
            let mut border_style = Style::default().fg(border);
            if index == self.cursor {
                border_style = border_style.add_modifier(Modifier::BOLD | Modifier::REVERSED);
            }
            let cell_block = Block::default()
                .borders(Borders::ALL)
                .border_style(border_style);
            let thumb_area = cell_block.inner(cell);
            frame.render_widget(cell_block, cell);
            let thumb = self.picture(&story, thumb_area.width, thumb_area.height);
            frame.render_widget(Paragraph::new(thumb), thumb_area);
        }
    }

    fn draw_details(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.palette.status_bg))
            .style(Style::default().bg(self.palette.panel_bg));
        let Some(story) = self.engine.stories().get(self.cursor) else {
            frame.render_widget(block, area);
            return;
        };

        let now = self.engine.repository().now();
        let label = |name: &str| {
            Span::styled(
                format!("{name:<10}"),
                Style::default().fg(self.palette.text_secondary),
            )
        };
        let value = |text: String| Span::styled(text, Style::default().fg(self.palette.text_primary));
        let lines = vec![
            Line::from(vec![label("Story"), value(story.id.clone())]),
            Line::from(vec![
                label("State"),
                value(if story.is_viewed { "seen" } else { "new" }.to_string()),
            ]),
            Line::from(vec![label("Created"), value(format_instant(story.created_at))]),
            Line::from(vec![label("Expires"), value(expires_label(story, now))]),
            Line::from(vec![
                label("Type"),
                value(acquisition::mime_of(&story.src).unwrap_or("unknown").to_string()),
            ]),
        ];
        let details = Paragraph::new(lines)
            .block(block.title(format!(" {} of {} ", self.cursor + 1, self.engine.stories().len())))
            .wrap(Wrap { trim: true });
        frame.render_widget(details, area);
    }

    fn draw_prompt(&self, frame: &mut Frame<'_>, area: Rect, buffer: &str) {
        let popup = centered_rect(70, 20, area);
        frame.render_widget(Clear, popup);
        let width = popup.width.saturating_sub(4) as usize;
        let text = format!("{}_", tail_to_width(buffer, width.saturating_sub(1)));
        let prompt = Paragraph::new(text)
            .style(Style::default().fg(self.palette.text_primary))
            .block(
                Block::default()
                    .title(Span::styled(
                        " Add story: image path ",
                        Style::default()
                            .fg(self.palette.accent)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.palette.accent))
                    .style(Style::default().bg(self.palette.panel_bg)),
            );
        frame.render_widget(prompt, popup);
    }

    fn draw_player(&mut self, frame: &mut Frame<'_>, area: Rect) {
        frame.render_widget(Clear, area);
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(1), Constraint::Min(0)])
            .split(area);

        let controller = self.engine.controller();
        let current = controller.current_index().unwrap_or(0);
        let fraction = controller.timer().progress(Instant::now());
        let progress = progress_line(
            controller.queue().len(),
            current,
            fraction,
            layout[0].width as usize,
            self.palette,
        );
        frame.render_widget(Paragraph::new(progress), layout[0]);

        let Some(story) = controller.current().cloned() else {
            return;
        };
        let body = layout[1];
        if story.is_placeholder() {
            let mut lines = vec![Line::default(); (body.height / 2) as usize];
            lines.push(Line::from(Span::styled(
                EXPIRED_MESSAGE,
                Style::default()
                    .fg(self.palette.text_primary)
                    .add_modifier(Modifier::BOLD),
            )));
            frame.render_widget(Paragraph::new(lines).alignment(Alignment::Center), body);
            return;
        }
        let picture = self.picture(&story, body.width, body.height);
        frame.render_widget(Paragraph::new(picture).alignment(Alignment::Center), body);
    }

    fn picture(&mut self, story: &Story, width: u16, height: u16) -> Text<'static> {
        let key = (story.id.clone(), width, height);
        if let Some(cached) = self.pictures.get(&key) {
            return cached.clone();
        }
        let text = render_half_blocks(&story.src, width, height)
            .unwrap_or_else(|| Text::from(Span::styled("?", Style::default().fg(self.palette.seen))));
        if self.pictures.len() > 64 {
            self.pictures.clear();
        }
        self.pictures.insert(key, text.clone());
        text
    }

    fn footer_text(&self) -> String {
        match self.mode {
            Mode::AddPrompt { .. } => "Enter add · Esc cancel".to_string(),
            Mode::Browse => "←/→ move · Enter watch · a add story · q quit".to_string(),
        }
    }
}

/// One segment per slide: watched ones full, the current one filling up.
fn progress_line(
    slides: usize,
    current: usize,
    fraction: f64,
    width: usize,
    palette: Palette,
) -> Line<'static> {
    if slides == 0 || width == 0 {
        return Line::default();
    }
    let gaps = slides - 1;
    let segment = width.saturating_sub(gaps) / slides;
    let mut spans = Vec::with_capacity(slides * 3);
    for index in 0..slides {
        let filled = match index.cmp(&current) {
            std::cmp::Ordering::Less => segment,
            std::cmp::Ordering::Equal => {
                ((segment as f64) * fraction.clamp(0.0, 1.0)).round() as usize
            }
            std::cmp::Ordering::Greater => 0,
        };
        spans.push(Span::styled(
            "━".repeat(filled),
            Style::default().fg(palette.text_primary),
        ));
        spans.push(Span::styled(
            "─".repeat(segment - filled),
            Style::default().fg(palette.seen),
        ));
        if index + 1 < slides {
            spans.push(Span::raw(" "));
        }
    }
    Line::from(spans)
}

fn render_half_blocks(src: &str, width: u16, height: u16) -> Option<Text<'static>> {
    if width == 0 || height == 0 {
        return None;
    }
    let bytes = acquisition::decode_data_url(src)?;
    let img = image::load_from_memory(&bytes)
        .ok()?
        .resize(width as u32, height as u32 * 2, FilterType::Triangle)
        .to_rgb8();

    let mut lines = Vec::with_capacity(height as usize);
    for row in (0..img.height()).step_by(2) {
        let mut spans = Vec::with_capacity(img.width() as usize);
        for col in 0..img.width() {
            let top = img.get_pixel(col, row);
            let bottom = if row + 1 < img.height() {
                *img.get_pixel(col, row + 1)
            } else {
                *top
            };
            spans.push(Span::styled(
                HALF_BLOCK,
                Style::default()
                    .fg(Color::Rgb(top[0], top[1], top[2]))
                    .bg(Color::Rgb(bottom[0], bottom[1], bottom[2])),
            ));
        }
        lines.push(Line::from(spans));
    }
    Some(Text::from(lines))
}

fn format_instant(instant: Option<DateTime<Utc>>) -> String {
    instant
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn expires_label(story: &Story, now: DateTime<Utc>) -> String {
    match story.expires_at {
        Some(expires_at) if expires_at > now => {
            let left = (expires_at - now).to_std().unwrap_or_default();
            let rounded = Duration::from_secs(left.as_secs() / 60 * 60);
            format!("in {}", humantime::format_duration(rounded))
        }
        Some(_) => "expired".to_string(),
        None => "-".to_string(),
    }
}

/// Keeps the end of `text` that fits in `width` columns.
fn tail_to_width(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut kept: Vec<char> = Vec::new();
    let mut used = 0;
    for ch in text.chars().rev() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        used += w;
        kept.push(ch);
    }
    let tail: String = kept.into_iter().rev().collect();
    format!("…{tail}")
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn line_width(line: &Line<'_>) -> usize {
        line.spans
            .iter()
            .map(|span| UnicodeWidthStr::width(span.content.as_ref()))
            .sum()
    }

    #[test]
    fn slide_deck_stops_at_last_slide() {
        let mut deck = SlideDeck::default();
        deck.mount(2);
        deck.scroll_next();
        deck.scroll_next();
        assert_eq!(deck.selected_snap(), 1);
        deck.mount(3);
        assert_eq!(deck.selected_snap(), 0);
    }

    #[test]
    fn progress_line_fits_width() {
        let palette = Palette::named("default");
        let line = progress_line(3, 1, 0.5, 32, palette);
        assert!(line_width(&line) <= 32);
        // Past segment full, current half, next empty.
        assert_eq!(line.spans[0].content.chars().count(), 10);
        assert_eq!(line.spans[1].content.chars().count(), 0);
        assert_eq!(line.spans[3].content.chars().count(), 5);
        assert_eq!(line.spans[6].content.chars().count(), 0);
    }

    #[test]
    fn progress_line_empty_queue_is_blank() {
        let line = progress_line(0, 0, 0.0, 40, Palette::named("mono"));
        assert!(line.spans.is_empty());
    }

    #[test]
    fn tail_keeps_end_of_long_paths() {
        assert_eq!(tail_to_width("short", 10), "short");
        let tail = tail_to_width("/very/long/path/to/picture.png", 12);
        assert!(tail.starts_with('…'));
        assert!(tail.ends_with("picture.png"));
        assert!(UnicodeWidthStr::width(tail.as_str()) <= 12);
    }

    #[test]
    fn expiry_label_counts_down() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let story = Story::new("x".into(), now);
        assert_eq!(expires_label(&story, now), "in 1day");
        assert_eq!(
            expires_label(&story, now + chrono::Duration::hours(24)),
            "expired"
        );
        assert_eq!(expires_label(&Story::expired_placeholder(), now), "-");
    }

    #[test]
    fn undecodable_source_renders_nothing() {
        assert!(render_half_blocks("", 4, 4).is_none());
        assert!(render_half_blocks("data:image/png;base64,AAAA", 4, 4).is_none());
    }
}
