use std::cell::Cell;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{
    self, DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture, Event,
    KeyCode, KeyEventKind, MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;
use url::Url;

use crate::blob;
use crate::feed::{Post, GUEST_AUTHOR};
use crate::session::SessionError;
use crate::state::{Actions, AppState};
use crate::video;
use crate::visibility::{self, Bounds, Cooldown};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_BORDER_IDLE: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const CAPTION_LINES: usize = 2;
// Borders plus author, caption, video and actions rows.
const CARD_HEIGHT: usize = 4 + CAPTION_LINES + 1;
const CARD_GAP: usize = 1;
const CARD_STEP: usize = CARD_HEIGHT + CARD_GAP;
const RENDER_SETTLE: Duration = Duration::from_millis(150);
const MOUSE_SCROLL_LINES: usize = 3;
const SAMPLE_TAG: &str = "Learning (sample)";
const UPLOAD_LABEL: &str = "Local upload (this session)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Engagement {
    likes: u32,
    comments: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardStatus {
    Playing,
    InView,
    Paused,
}

#[derive(Debug, Clone)]
struct FormField {
    label: &'static str,
    value: String,
}

#[derive(Debug, Clone)]
struct Form {
    title: &'static str,
    fields: Vec<FormField>,
    active: usize,
}

impl Form {
    fn new(title: &'static str, labels: &[&'static str]) -> Self {
        Self {
            title,
            fields: labels
                .iter()
                .map(|&label| FormField {
                    label,
                    value: String::new(),
                })
                .collect(),
            active: 0,
        }
    }

    fn value(&self, index: usize) -> &str {
        self.fields
            .get(index)
            .map(|field| field.value.as_str())
            .unwrap_or("")
    }

    fn on_last_field(&self) -> bool {
        self.active + 1 >= self.fields.len()
    }

    fn next(&mut self) {
        if !self.fields.is_empty() {
            self.active = (self.active + 1) % self.fields.len();
        }
    }

    fn previous(&mut self) {
        if !self.fields.is_empty() {
            self.active = (self.active + self.fields.len() - 1) % self.fields.len();
        }
    }

    fn insert_char(&mut self, ch: char) {
        if let Some(field) = self.fields.get_mut(self.active) {
            field.value.push(ch);
        }
    }

    fn backspace(&mut self) {
        if let Some(field) = self.fields.get_mut(self.active) {
            field.value.pop();
        }
    }

    fn clear_active(&mut self) {
        if let Some(field) = self.fields.get_mut(self.active) {
            field.value.clear();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    UploadAsGuest,
    SignOut,
    Clear,
    Remove(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormKind {
    SignIn,
    Upload,
    Comment(usize),
}

#[derive(Debug, Clone)]
enum Modal {
    Form { kind: FormKind, form: Form },
    Confirm { message: String, action: Pending },
}

pub struct Options {
    pub actions: Actions,
    pub state: AppState,
    pub controller: video::Controller,
    pub export_dir: PathBuf,
    pub cooldown: Duration,
    pub status_message: String,
}

pub struct Model {
    actions: Actions,
    state: AppState,
    controller: video::Controller,
    export_dir: PathBuf,
    engagement: Vec<Engagement>,
    scroll: usize,
    feed_view_height: Cell<u16>,
    selected: Option<usize>,
    cooldown: Cooldown,
    modal: Option<Modal>,
    alert: Option<String>,
    status_message: String,
    status_is_error: bool,
    needs_redraw: bool,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let mut model = Self {
            actions: opts.actions,
            state: opts.state,
            controller: opts.controller,
            export_dir: opts.export_dir,
            engagement: Vec::new(),
            scroll: 0,
            feed_view_height: Cell::new(0),
            selected: None,
            cooldown: Cooldown::new(opts.cooldown),
            modal: None,
            alert: None,
            status_message: opts.status_message,
            status_is_error: false,
            needs_redraw: true,
        };
        model.render_feed(Instant::now());
        model
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        stdout.execute(EnableFocusChange)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        self.controller.stop();
        disable_raw_mode()?;
        terminal.backend_mut().execute(DisableFocusChange)?;
        terminal.backend_mut().execute(DisableMouseCapture)?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            if self.cooldown.fire(Instant::now()) {
                self.refresh_playback();
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                let outcome = match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key.code),
                    Event::Mouse(mouse) => self.handle_mouse(mouse).map(|_| false),
                    Event::Resize(_, _) | Event::FocusGained => {
                        self.on_viewport_change(Instant::now());
                        Ok(false)
                    }
                    _ => Ok(false),
                };
                match outcome {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(err) => self.set_error(format!("Error: {err:#}")),
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                let was_playing = self.controller.active_index();
                self.controller.poll();
                if was_playing != self.controller.active_index() {
                    self.mark_dirty();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn set_status<S: Into<String>>(&mut self, message: S) {
        self.status_message = message.into();
        self.status_is_error = false;
        self.mark_dirty();
    }

    fn set_error<S: Into<String>>(&mut self, message: S) {
        self.status_message = message.into();
        self.status_is_error = true;
        self.mark_dirty();
    }

    /// Resets per-card counters and re-plans playback after the feed changed.
    fn render_feed(&mut self, now: Instant) {
        self.engagement = vec![Engagement::default(); self.state.feed.len()];
        self.controller.sync_posts(&self.state.feed);
        self.scroll = self.scroll.min(self.max_scroll());
        self.selected = None;
        self.cooldown.schedule(now, RENDER_SETTLE);
        self.mark_dirty();
    }

    /// Geometry is only known after the next draw, so the selection is
    /// re-planned on the following tick and the scroll re-clamped then too.
    fn on_viewport_change(&mut self, now: Instant) {
        self.clamp_scroll();
        self.cooldown.schedule(now, Duration::ZERO);
        self.mark_dirty();
    }

    fn clamp_scroll(&mut self) {
        let max = self.max_scroll();
        if self.scroll > max {
            self.scroll = max;
            self.mark_dirty();
        }
    }

    fn apply_state(&mut self, state: AppState) {
        let feed_changed = state.feed != self.state.feed;
        self.state = state;
        if feed_changed {
            self.render_feed(Instant::now());
        } else {
            self.mark_dirty();
        }
    }

    fn card_bounds(&self) -> Vec<Bounds> {
        (0..self.state.feed.len())
            .map(|index| {
                let top = (index * CARD_STEP) as f64 - self.scroll as f64;
                Bounds::new(top, CARD_HEIGHT as f64)
            })
            .collect()
    }

    fn most_visible(&self) -> Option<usize> {
        visibility::select_most_visible(
            &self.card_bounds(),
            f64::from(self.feed_view_height.get()),
        )
    }

    fn refresh_playback(&mut self) {
        self.clamp_scroll();
        let selected = self.most_visible();
        self.selected = selected;
        visibility::apply_selection(selected, self.state.feed.len(), &mut self.controller);
        if let Some(err) = self.controller.take_error() {
            self.set_error(format!("Playback failed: {err}"));
        }
        self.mark_dirty();
    }

    fn content_height(&self) -> usize {
        match self.state.feed.len() {
            0 => 0,
            n => n * CARD_STEP - CARD_GAP,
        }
    }

    fn max_scroll(&self) -> usize {
        max_scroll(self.content_height(), usize::from(self.feed_view_height.get()))
    }

    fn scroll_by(&mut self, delta: isize) {
        let max = self.max_scroll();
        let next = if delta.is_negative() {
            self.scroll.saturating_sub(delta.unsigned_abs())
        } else {
            self.scroll.saturating_add(delta as usize).min(max)
        };
        if next != self.scroll {
            self.scroll = next;
            self.cooldown.trigger(Instant::now());
            self.mark_dirty();
        }
    }

    fn scroll_to(&mut self, position: usize) {
        let target = position.min(self.max_scroll());
        if target != self.scroll {
            self.scroll = target;
            self.cooldown.trigger(Instant::now());
            self.mark_dirty();
        }
    }

    fn target_post(&mut self) -> Option<usize> {
        let target = self.most_visible();
        if target.is_none() {
            self.set_status("No post in view.");
        }
        target
    }

    fn handle_mouse(&mut self, event: MouseEvent) -> Result<()> {
        if self.modal.is_some() || self.alert.is_some() {
            return Ok(());
        }
        match event.kind {
            MouseEventKind::ScrollDown => self.scroll_by(MOUSE_SCROLL_LINES as isize),
            MouseEventKind::ScrollUp => self.scroll_by(-(MOUSE_SCROLL_LINES as isize)),
            _ => {}
        }
        Ok(())
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        if self.alert.is_some() {
            if matches!(code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ')) {
                self.alert = None;
                self.mark_dirty();
            }
            return Ok(false);
        }

        if self.modal.is_some() {
            self.handle_modal_key(code)?;
            self.mark_dirty();
            return Ok(false);
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.scroll_by(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_by(-1),
            KeyCode::Char('J') | KeyCode::PageDown => self.scroll_by(CARD_STEP as isize),
            KeyCode::Char('K') | KeyCode::PageUp => self.scroll_by(-(CARD_STEP as isize)),
            KeyCode::Char('g') | KeyCode::Home => self.scroll_to(0),
            KeyCode::Char('G') | KeyCode::End => self.scroll_to(usize::MAX),
            KeyCode::Char('i') => {
                let signed_in = self.state.user.as_ref().map(|user| user.display_name.clone());
                match signed_in {
                    Some(name) => self.set_status(format!("Already signed in as {name}.")),
                    None => self.open_form(
                        FormKind::SignIn,
                        Form::new("Sign in", &["Username", "Display name (optional)"]),
                    ),
                }
            }
            KeyCode::Char('o') => {
                if self.state.is_guest() {
                    self.set_status("You are browsing as Guest.");
                } else {
                    self.confirm("Sign out?", Pending::SignOut);
                }
            }
            KeyCode::Char('u') => {
                if self.state.is_guest() {
                    self.confirm("You are not signed in. Upload as Guest?", Pending::UploadAsGuest);
                } else {
                    self.open_upload();
                }
            }
            KeyCode::Char('s') => {
                let state = self.actions.seed(&self.state)?;
                self.apply_state(state);
                self.set_status("Added the sample lessons to the top of the feed.");
            }
            KeyCode::Char('e') => {
                let path = self.actions.export(&self.state, &self.export_dir)?;
                let message = format!(
                    "Exported {} posts to {}",
                    self.state.feed.len(),
                    path.display()
                );
                self.set_status(message);
            }
            KeyCode::Char('X') => self.confirm(
                "Clear the feed (this removes persisted remote items too)?",
                Pending::Clear,
            ),
            KeyCode::Char('d') => {
                if let Some(index) = self.target_post() {
                    self.confirm("Remove this post from the feed?", Pending::Remove(index));
                }
            }
            KeyCode::Char('l') => {
                if let Some(index) = self.target_post() {
                    if let Some(entry) = self.engagement.get_mut(index) {
                        entry.likes += 1;
                    }
                    self.mark_dirty();
                }
            }
            KeyCode::Char('c') => {
                if let Some(index) = self.target_post() {
                    self.open_form(
                        FormKind::Comment(index),
                        Form::new("Add comment (demo-only)", &["Comment"]),
                    );
                }
            }
            KeyCode::Char('m') => {
                self.controller.toggle_mute()?;
                self.set_status("Toggled mute.");
            }
            _ => {}
        }
        Ok(false)
    }

    fn open_form(&mut self, kind: FormKind, form: Form) {
        self.modal = Some(Modal::Form { kind, form });
        self.mark_dirty();
    }

    fn open_upload(&mut self) {
        self.open_form(
            FormKind::Upload,
            Form::new("Upload video", &["Video file path", "Caption"]),
        );
    }

    fn confirm(&mut self, message: &str, action: Pending) {
        self.modal = Some(Modal::Confirm {
            message: message.to_string(),
            action,
        });
        self.mark_dirty();
    }

    fn handle_modal_key(&mut self, code: KeyCode) -> Result<()> {
        let Some(modal) = self.modal.take() else {
            return Ok(());
        };

        let (kind, mut form) = match modal {
            Modal::Confirm { message, action } => {
                return match code {
                    KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                        self.run_pending(action)
                    }
                    KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => Ok(()),
                    _ => {
                        self.modal = Some(Modal::Confirm { message, action });
                        Ok(())
                    }
                };
            }
            Modal::Form { kind, form } => (kind, form),
        };

        match code {
            KeyCode::Esc => return Ok(()),
            KeyCode::Tab | KeyCode::Down => form.next(),
            KeyCode::BackTab | KeyCode::Up => form.previous(),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Delete => form.clear_active(),
            KeyCode::Char(ch) => form.insert_char(ch),
            KeyCode::Enter if !form.on_last_field() => form.next(),
            KeyCode::Enter => return self.submit(kind, form),
            _ => {}
        }
        self.modal = Some(Modal::Form { kind, form });
        Ok(())
    }

    /// Rejected input reopens the form behind an alert, as the browser version did.
    fn submit(&mut self, kind: FormKind, form: Form) -> Result<()> {
        match kind {
            FormKind::SignIn => {
                match self
                    .actions
                    .sign_in(&self.state, form.value(0), form.value(1))
                {
                    Ok(state) => {
                        let greeting = state
                            .user
                            .as_ref()
                            .map(|user| user.greeting())
                            .unwrap_or_default();
                        self.apply_state(state);
                        self.set_status(greeting.clone());
                        self.alert = Some(greeting);
                    }
                    Err(SessionError::Invalid(err)) => {
                        self.alert = Some(err.to_string());
                        self.open_form(kind, form);
                    }
                    Err(SessionError::Storage(err)) => {
                        self.open_form(kind, form);
                        return Err(err);
                    }
                }
            }
            FormKind::Upload => {
                let path = expand_path(form.value(0));
                match self
                    .actions
                    .upload(&self.state, path.as_deref(), form.value(1))
                {
                    Ok(state) => {
                        self.scroll = 0;
                        self.apply_state(state);
                        self.set_status("Uploaded. Local uploads disappear when you quit.");
                    }
                    Err(err) => {
                        self.alert = Some(err.to_string());
                        self.open_form(kind, form);
                    }
                }
            }
            FormKind::Comment(index) => {
                if !form.value(0).trim().is_empty() {
                    if let Some(entry) = self.engagement.get_mut(index) {
                        entry.comments += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn run_pending(&mut self, action: Pending) -> Result<()> {
        match action {
            Pending::UploadAsGuest => self.open_upload(),
            Pending::SignOut => {
                let state = self.actions.sign_out(&self.state)?;
                self.apply_state(state);
                self.set_status("Signed out.");
            }
            Pending::Clear => {
                let state = self.actions.clear(&self.state)?;
                self.scroll = 0;
                self.apply_state(state);
                self.set_status("Feed cleared.");
            }
            Pending::Remove(index) => {
                let state = self.actions.remove(&self.state, index)?;
                self.apply_state(state);
                self.set_status("Post removed.");
            }
        }
        Ok(())
    }

    fn card_status(&self, index: usize) -> CardStatus {
        if self.controller.active_index() == Some(index) {
            CardStatus::Playing
        } else if self.selected == Some(index) {
            CardStatus::InView
        } else {
            CardStatus::Paused
        }
    }

    fn draw(&self, frame: &mut Frame<'_>) {
        let area = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), area);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(3),
                Constraint::Length(2),
            ])
            .split(area);

        self.draw_header(frame, layout[0]);
        self.draw_feed(frame, layout[1]);
        self.draw_footer(frame, layout[2]);

        if let Some(modal) = &self.modal {
            self.draw_modal(frame, modal, area);
        }
        if let Some(message) = &self.alert {
            draw_alert(frame, message, area);
        }
    }

    fn draw_header(&self, frame: &mut Frame<'_>, area: Rect) {
        let user = match &self.state.user {
            Some(user) => Span::styled(
                format!("Hi, {}", user.display_name),
                Style::default().fg(COLOR_SUCCESS),
            ),
            None => Span::styled(GUEST_AUTHOR, Style::default().fg(COLOR_TEXT_SECONDARY)),
        };
        let line = Line::from(vec![
            Span::styled(
                " SnapBridge ",
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled("· ", Style::default().fg(COLOR_TEXT_SECONDARY)),
            user,
        ]);
        frame.render_widget(Paragraph::new(line), area);
    }

    fn draw_feed(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .title(format!(" Feed ({}) ", self.state.feed.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .style(Style::default().bg(COLOR_PANEL_BG));
        let inner = block.inner(area);
        frame.render_widget(block, area);
        self.feed_view_height.set(inner.height);

        if self.state.feed.is_empty() {
            let empty = Paragraph::new(
                "The feed is empty.\n\nPress s to add the sample lessons or u to upload a video.",
            )
            .style(Style::default().fg(COLOR_TEXT_SECONDARY))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
            frame.render_widget(empty, inner);
            return;
        }

        let width = usize::from(inner.width);
        let mut lines: Vec<Line<'static>> = Vec::with_capacity(self.content_height());
        for (index, post) in self.state.feed.iter().enumerate() {
            if index > 0 {
                lines.push(Line::default());
            }
            let engagement = self.engagement.get(index).copied().unwrap_or_default();
            lines.extend(card_lines(post, engagement, self.card_status(index), width));
        }
        let scroll = self.scroll.min(self.max_scroll());
        let scroll = u16::try_from(scroll).unwrap_or(u16::MAX);
        frame.render_widget(Paragraph::new(Text::from(lines)).scroll((scroll, 0)), inner);
    }

    fn draw_footer(&self, frame: &mut Frame<'_>, area: Rect) {
        let status_style = if self.status_is_error {
            Style::default().fg(COLOR_ERROR)
        } else {
            Style::default().fg(COLOR_TEXT_PRIMARY)
        };
        let lines = vec![
            Line::from(Span::styled(self.status_message.clone(), status_style)),
            Line::from(Span::styled(
                self.footer_text(),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
        ];
        frame.render_widget(Paragraph::new(lines), area);
    }

    fn footer_text(&self) -> String {
        let session = if self.state.is_guest() {
            "i sign in"
        } else {
            "o sign out"
        };
        format!(
            "j/k scroll · J/K card · {session} · u upload · l like · c comment · m mute · s seed · e export · d remove · X clear · q quit"
        )
    }

    fn draw_modal(&self, frame: &mut Frame<'_>, modal: &Modal, area: Rect) {
        let popup = centered_rect(60, 40, area);
        frame.render_widget(Clear, popup);
        let (title, body) = match modal {
            Modal::Form { form, .. } => (form.title.to_string(), form_body(form)),
            Modal::Confirm { message, .. } => (
                "Confirm".to_string(),
                Text::from(vec![
                    Line::from(message.clone()),
                    Line::default(),
                    Line::from(Span::styled(
                        "y / Enter confirm · n / Esc cancel",
                        Style::default().fg(COLOR_TEXT_SECONDARY),
                    )),
                ]),
            ),
        };
        let block = Block::default()
            .title(format!(" {title} "))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .style(Style::default().bg(COLOR_PANEL_BG).fg(COLOR_TEXT_PRIMARY));
        frame.render_widget(
            Paragraph::new(body).block(block).wrap(Wrap { trim: false }),
            popup,
        );
    }
}

fn form_body(form: &Form) -> Text<'static> {
    let mut lines = Vec::new();
    for (index, field) in form.fields.iter().enumerate() {
        let active = index == form.active;
        let label_style = if active {
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(COLOR_TEXT_SECONDARY)
        };
        lines.push(Line::from(Span::styled(field.label, label_style)));
        let cursor = if active { "▏" } else { "" };
        lines.push(Line::from(format!("  {}{cursor}", field.value)));
        lines.push(Line::default());
    }
    lines.push(Line::from(Span::styled(
        "Tab next field · Enter submit · Esc cancel",
        Style::default().fg(COLOR_TEXT_SECONDARY),
    )));
    Text::from(lines)
}

fn draw_alert(frame: &mut Frame<'_>, message: &str, area: Rect) {
    let popup = centered_rect(50, 20, area);
    frame.render_widget(Clear, popup);
    let block = Block::default()
        .title(" SnapBridge ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(COLOR_ACCENT))
        .style(Style::default().bg(COLOR_PANEL_BG).fg(COLOR_TEXT_PRIMARY));
    let body = Text::from(vec![
        Line::from(message.to_string()),
        Line::default(),
        Line::from(Span::styled(
            "Enter to dismiss",
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )),
    ]);
    frame.render_widget(
        Paragraph::new(body)
            .block(block)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true }),
        popup,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

fn max_scroll(content_height: usize, view_height: usize) -> usize {
    content_height.saturating_sub(view_height)
}

fn expand_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return Some(home.join(rest));
        }
    }
    Some(PathBuf::from(trimmed))
}

fn avatar_initial(author: &str) -> char {
    author
        .chars()
        .next()
        .and_then(|ch| ch.to_uppercase().next())
        .unwrap_or('S')
}

fn source_label(post: &Post) -> String {
    if blob::is_reference(&post.source) {
        return UPLOAD_LABEL.to_string();
    }
    Url::parse(&post.source)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| post.source.clone())
}

fn truncate_to_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}

fn boxed_line(spans: Vec<Span<'static>>, inner: usize, border: Style) -> Line<'static> {
    let used: usize = spans.iter().map(|span| span.content.width()).sum();
    let mut all = Vec::with_capacity(spans.len() + 3);
    all.push(Span::styled("│ ", border));
    all.extend(spans);
    all.push(Span::raw(" ".repeat(inner.saturating_sub(used))));
    all.push(Span::styled(" │", border));
    Line::from(all)
}

fn caption_rows(caption: &str, inner: usize) -> Vec<String> {
    let width = inner.max(1);
    let wrapped: Vec<String> = wrap(caption, WrapOptions::new(width))
        .into_iter()
        .map(|line| line.into_owned())
        .collect();
    let mut rows: Vec<String> = wrapped.iter().take(CAPTION_LINES).cloned().collect();
    if wrapped.len() > CAPTION_LINES {
        if let Some(last) = rows.last_mut() {
            *last = truncate_to_width(&format!("{last}…"), width);
        }
    }
    rows.resize(CAPTION_LINES, String::new());
    rows
}

/// Always exactly `CARD_HEIGHT` lines so card geometry stays predictable.
fn card_lines(
    post: &Post,
    engagement: Engagement,
    status: CardStatus,
    width: usize,
) -> Vec<Line<'static>> {
    let width = width.max(8);
    let inner = width - 4;
    let border = match status {
        CardStatus::Playing | CardStatus::InView => Style::default().fg(COLOR_BORDER_FOCUSED),
        CardStatus::Paused => Style::default().fg(COLOR_BORDER_IDLE),
    };
    let author = if post.author.trim().is_empty() {
        GUEST_AUTHOR.to_string()
    } else {
        post.author.clone()
    };

    let mut lines = Vec::with_capacity(CARD_HEIGHT);
    lines.push(Line::from(Span::styled(
        format!("╭{}╮", "─".repeat(width - 2)),
        border,
    )));

    let header = truncate_to_width(&author, inner.saturating_sub(4));
    lines.push(boxed_line(
        vec![
            Span::styled(
                format!("({}) ", avatar_initial(&post.author)),
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                header,
                Style::default()
                    .fg(COLOR_TEXT_PRIMARY)
                    .add_modifier(Modifier::BOLD),
            ),
        ],
        inner,
        border,
    ));

    for row in caption_rows(&post.caption, inner) {
        lines.push(boxed_line(
            vec![Span::styled(row, Style::default().fg(COLOR_TEXT_PRIMARY))],
            inner,
            border,
        ));
    }

    let (marker, marker_style) = match status {
        CardStatus::Playing => ("▶ Playing", Style::default().fg(COLOR_SUCCESS)),
        CardStatus::InView => ("● In view", Style::default().fg(COLOR_ACCENT)),
        CardStatus::Paused => ("❚❚ Paused", Style::default().fg(COLOR_TEXT_SECONDARY)),
    };
    let source = truncate_to_width(
        &source_label(post),
        inner.saturating_sub(marker.width() + 3),
    );
    lines.push(boxed_line(
        vec![
            Span::styled(marker, marker_style),
            Span::styled(
                format!(" · {source}"),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ),
        ],
        inner,
        border,
    ));

    let counters = format!("♥ {}   ✎ {}", engagement.likes, engagement.comments);
    let tag = if post.persistent {
        SAMPLE_TAG.to_string()
    } else if post.author.is_empty() {
        "u".to_string()
    } else {
        post.author.clone()
    };
    let gap = inner.saturating_sub(counters.width() + tag.width());
    let tag = if gap == 0 {
        truncate_to_width(&tag, inner.saturating_sub(counters.width() + 1))
    } else {
        tag
    };
    lines.push(boxed_line(
        vec![
            Span::styled(counters, Style::default().fg(COLOR_ERROR)),
            Span::raw(" ".repeat(gap.max(1))),
            Span::styled(tag, Style::default().fg(COLOR_TEXT_SECONDARY)),
        ],
        inner,
        border,
    ));

    lines.push(Line::from(Span::styled(
        format!("╰{}╯", "─".repeat(width - 2)),
        border,
    )));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Registry;
    use crate::feed::seed_set;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn model() -> Model {
        let blobs = Arc::new(Registry::new());
        let actions = Actions::new(Arc::new(MemoryStore::new()), blobs.clone());
        let state = actions.load().unwrap();
        Model::new(Options {
            actions,
            state,
            controller: video::Controller::new(vec!["mpv".into()], false, blobs),
            export_dir: std::env::temp_dir(),
            cooldown: Duration::from_millis(120),
            status_message: String::new(),
        })
    }

    fn line_width(line: &Line<'_>) -> usize {
        line.spans.iter().map(|span| span.content.width()).sum()
    }

    fn type_text(model: &mut Model, text: &str) {
        for ch in text.chars() {
            model.handle_key(KeyCode::Char(ch)).unwrap();
        }
    }

    #[test]
    fn cards_have_fixed_height_and_width() {
        let post = Post::sample(
            "https://a.test/videos/lesson.mp4",
            "instructor",
            "A very long caption that keeps going well past the width of the card so it must wrap and then be cut short",
        );
        for status in [CardStatus::Playing, CardStatus::InView, CardStatus::Paused] {
            let lines = card_lines(&post, Engagement::default(), status, 40);
            assert_eq!(lines.len(), CARD_HEIGHT);
            for line in &lines {
                assert_eq!(line_width(line), 40);
            }
        }
    }

    #[test]
    fn avatar_defaults_to_s() {
        assert_eq!(avatar_initial("dana"), 'D');
        assert_eq!(avatar_initial(""), 'S');
    }

    #[test]
    fn source_label_uses_file_name() {
        let post = &seed_set()[0];
        assert_eq!(source_label(post), "BigBuckBunny.mp4");
        let upload = Post {
            source: "blob:snapbridge/abcdefghij".into(),
            author: String::new(),
            caption: String::new(),
            persistent: false,
        };
        assert_eq!(source_label(&upload), UPLOAD_LABEL);
    }

    #[test]
    fn max_scroll_never_underflows() {
        assert_eq!(max_scroll(10, 40), 0);
        assert_eq!(max_scroll(100, 40), 60);
    }

    #[test]
    fn first_card_is_most_visible_at_top() {
        let model = model();
        model.feed_view_height.set(20);
        assert_eq!(model.most_visible(), Some(0));
    }

    #[test]
    fn scrolling_moves_selection() {
        let mut model = model();
        model.feed_view_height.set(CARD_HEIGHT as u16);
        model.scroll_by(CARD_STEP as isize);
        assert_eq!(model.scroll, CARD_STEP);
        assert!(model.cooldown.is_pending());
        assert_eq!(model.most_visible(), Some(1));
    }

    #[test]
    fn resize_arms_immediate_replan_and_reclamps_scroll() {
        let mut model = model();
        model.feed_view_height.set(5);
        model.cooldown.fire(Instant::now() + Duration::from_secs(1));
        model.scroll_to(usize::MAX);
        assert_eq!(model.scroll, 3 * CARD_STEP - CARD_GAP - 5);
        model.cooldown.fire(Instant::now() + Duration::from_secs(1));

        model.feed_view_height.set(40);
        let now = Instant::now();
        model.on_viewport_change(now);
        assert_eq!(model.scroll, 0);
        assert!(model.cooldown.is_pending());
        assert!(model.cooldown.fire(now));
    }

    #[test]
    fn feed_change_clears_selection_and_arms_settle() {
        let mut model = model();
        model.feed_view_height.set(20);
        model.cooldown.fire(Instant::now() + Duration::from_secs(1));
        model.refresh_playback();
        assert_eq!(model.selected, Some(0));
        assert!(!model.cooldown.is_pending());

        let state = model.actions.clear(&model.state).unwrap();
        model.apply_state(state);
        assert_eq!(model.selected, None);
        assert!(model.cooldown.is_pending());
    }

    #[test]
    fn render_settle_fires_once_after_delay() {
        let mut model = model();
        model.cooldown.fire(Instant::now() + Duration::from_secs(1));

        let now = Instant::now();
        model.render_feed(now);
        assert!(!model.cooldown.fire(now + Duration::from_millis(149)));
        assert!(model.cooldown.fire(now + RENDER_SETTLE));
        assert!(!model.cooldown.fire(now + Duration::from_millis(400)));
    }

    #[test]
    fn clear_requires_confirmation() {
        let mut model = model();
        model.handle_key(KeyCode::Char('X')).unwrap();
        assert!(matches!(model.modal, Some(Modal::Confirm { .. })));
        model.handle_key(KeyCode::Char('n')).unwrap();
        assert_eq!(model.state.feed.len(), seed_set().len());

        model.handle_key(KeyCode::Char('X')).unwrap();
        model.handle_key(KeyCode::Char('y')).unwrap();
        assert!(model.state.feed.is_empty());
        assert!(model.modal.is_none());
    }

    #[test]
    fn sign_in_with_empty_username_alerts_and_keeps_form() {
        let mut model = model();
        model.handle_key(KeyCode::Char('i')).unwrap();
        model.handle_key(KeyCode::Enter).unwrap();
        model.handle_key(KeyCode::Enter).unwrap();
        assert_eq!(model.alert.as_deref(), Some("Enter a username"));
        assert!(matches!(
            model.modal,
            Some(Modal::Form {
                kind: FormKind::SignIn,
                ..
            })
        ));

        model.handle_key(KeyCode::Enter).unwrap();
        assert!(model.alert.is_none());
        model.handle_key(KeyCode::BackTab).unwrap();
        type_text(&mut model, "admin");
        model.handle_key(KeyCode::Enter).unwrap();
        model.handle_key(KeyCode::Enter).unwrap();
        assert_eq!(model.alert.as_deref(), Some("Signed in as admin (admin)"));
        assert!(!model.state.is_guest());
    }

    #[test]
    fn guest_upload_asks_first_and_rejects_missing_file() {
        let mut model = model();
        model.handle_key(KeyCode::Char('u')).unwrap();
        assert!(matches!(model.modal, Some(Modal::Confirm { .. })));
        model.handle_key(KeyCode::Enter).unwrap();
        assert!(matches!(
            model.modal,
            Some(Modal::Form {
                kind: FormKind::Upload,
                ..
            })
        ));
        model.handle_key(KeyCode::Enter).unwrap();
        model.handle_key(KeyCode::Enter).unwrap();
        assert_eq!(model.alert.as_deref(), Some("Please pick a video file"));
        assert_eq!(model.state.feed.len(), seed_set().len());
    }

    #[test]
    fn like_and_comment_count_on_card_in_view() {
        let mut model = model();
        model.feed_view_height.set(20);
        model.handle_key(KeyCode::Char('l')).unwrap();
        model.handle_key(KeyCode::Char('c')).unwrap();
        type_text(&mut model, "nice");
        model.handle_key(KeyCode::Enter).unwrap();
        assert_eq!(
            model.engagement[0],
            Engagement {
                likes: 1,
                comments: 1
            }
        );

        model.handle_key(KeyCode::Char('s')).unwrap();
        assert_eq!(model.engagement[0], Engagement::default());
    }
}
