use crate::backend::SpeechKind;
use crate::bus::{BusSender, Change, Command};
use crate::controller::Controller;
use crate::correlator::RequestStatus;
use crate::log_buffer::LogLevel;
use crate::model::{CollectionKind, Note, NoteId};
use crate::storage::ProjectSummary;
use crate::theme::{Palette, PALETTES};
use anyhow::Result;
use chrono::Local;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use log::{debug, info, warn};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::{Alignment, Color, Modifier, Rect, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Terminal;
use std::io::{stdout, Stdout};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

const LOG_PANEL_HEIGHT: u16 = 8;
const TICK: Duration = Duration::from_millis(200);

/// Runs the terminal UI until the user quits and hands the controller back
/// so the caller can persist settings from the final session.
pub fn run(controller: Controller) -> Result<Controller> {
    let mut terminal = setup_terminal()?;
    let mut app = App::new(controller);
    let result = app.event_loop(&mut terminal);
    teardown_terminal(&mut terminal)?;
    result.map(|_| app.controller)
}

struct App {
    controller: Controller,
    changes: Receiver<Change>,
    sender: BusSender,
    focus: Pane,
    selection: [usize; 3],
    status: String,
    status_error: bool,
    last_save: Option<Instant>,
    mode: Mode,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Pane {
    Inbox,
    Workspace,
    Results,
}

impl Pane {
    fn index(self) -> usize {
        match self {
            Pane::Inbox => 0,
            Pane::Workspace => 1,
            Pane::Results => 2,
        }
    }

    fn next(self) -> Pane {
        match self {
            Pane::Inbox => Pane::Workspace,
            Pane::Workspace => Pane::Results,
            Pane::Results => Pane::Inbox,
        }
    }

    fn prev(self) -> Pane {
        match self {
            Pane::Inbox => Pane::Results,
            Pane::Workspace => Pane::Inbox,
            Pane::Results => Pane::Workspace,
        }
    }

    fn collection(self) -> Option<CollectionKind> {
        match self {
            Pane::Inbox => Some(CollectionKind::Inbox),
            Pane::Workspace => Some(CollectionKind::Workspace),
            Pane::Results => None,
        }
    }

    fn of(kind: CollectionKind) -> Pane {
        match kind {
            CollectionKind::Inbox => Pane::Inbox,
            CollectionKind::Workspace => Pane::Workspace,
        }
    }
}

enum Mode {
    Normal,
    Input { target: InputTarget, field: FieldValue },
    PickProject {
        projects: Vec<ProjectSummary>,
        selected: usize,
    },
    ConfirmLoad { file_id: String },
    ConfirmClear(CollectionKind),
    ConfirmQuit,
}

enum InputTarget {
    NewNote(CollectionKind),
    EditNote {
        collection: CollectionKind,
        id: NoteId,
    },
    Prompt,
    SaveAs,
    Model,
}

impl InputTarget {
    fn title(&self) -> String {
        match self {
            InputTarget::NewNote(kind) => format!("New note in {kind}"),
            InputTarget::EditNote { collection, .. } => format!("Edit note in {collection}"),
            InputTarget::Prompt => "Ask the AI".to_string(),
            InputTarget::SaveAs => "Save project as".to_string(),
            InputTarget::Model => "AI model".to_string(),
        }
    }
}

/// Single-line text field with a byte cursor kept on char boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldValue {
    value: String,
    cursor: usize,
}

impl FieldValue {
    fn new(value: &str) -> Self {
        FieldValue {
            value: value.to_string(),
            cursor: value.len(),
        }
    }

    fn move_left(&mut self) {
        if let Some((idx, _)) = self.value[..self.cursor].char_indices().next_back() {
            self.cursor = idx;
        }
    }

    fn move_right(&mut self) {
        if let Some(ch) = self.value[self.cursor..].chars().next() {
            self.cursor += ch.len_utf8();
        }
    }

    fn backspace(&mut self) {
        if let Some((idx, _)) = self.value[..self.cursor].char_indices().next_back() {
            self.value.drain(idx..self.cursor);
            self.cursor = idx;
        }
    }

    fn insert_char(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    fn with_caret(&self) -> String {
        let mut text = self.value.clone();
        text.insert(self.cursor, '▌');
        text
    }
}

impl App {
    fn new(mut controller: Controller) -> Self {
        let changes = controller.subscribe();
        let sender = controller.sender();
        sender.intent(Command::RefreshModels);
        App {
            controller,
            changes,
            sender,
            focus: Pane::Inbox,
            selection: [0; 3],
            status: "Ready. Press n to capture a note, a to ask the AI".into(),
            status_error: false,
            last_save: None,
            mode: Mode::Normal,
        }
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            self.sync();
            terminal.draw(|f| self.draw(f))?;
            if event::poll(TICK)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.handle_key(key)? {
                        break;
                    }
                }
            }
        }
        info!("event=tui_exit dirty={}", self.controller.session().is_dirty());
        Ok(())
    }

    /// Applies queued messages and folds the published changes into the
    /// view state.
    fn sync(&mut self) {
        self.controller.pump();
        while let Ok(change) = self.changes.try_recv() {
            self.apply(change);
        }
        for pane in [Pane::Inbox, Pane::Workspace, Pane::Results] {
            let len = self.pane_len(pane);
            let slot = &mut self.selection[pane.index()];
            *slot = (*slot).min(len.saturating_sub(1));
        }
    }

    fn apply(&mut self, change: Change) {
        debug!("event=ui_change change={:?}", change);
        match change {
            Change::NoteAdded { collection, note } => {
                self.select_note(collection, &note.id);
                self.set_status(format!("Added to {collection}"));
            }
            Change::NoteRemoved { collection, .. } => {
                self.set_status(format!("Removed from {collection}"))
            }
            Change::NoteUpdated { .. } => self.set_status("Note updated"),
            Change::NoteMoved {
                collection,
                to_index,
                ..
            } => {
                self.selection[Pane::of(collection).index()] = to_index;
            }
            Change::NoteTransferred { to, note, .. } => {
                self.select_note(to, &note.id);
                self.set_status(format!("Moved to {to}"));
            }
            Change::CollectionCleared(kind) => self.set_status(format!("Cleared {kind}")),
            Change::RequestSubmitted { handle, .. } => {
                self.selection[Pane::Results.index()] = handle.0;
                let model = self.controller.session().selected_model().to_string();
                self.set_status(format!("Asking {model}..."));
            }
            Change::RequestResolved(handle) => {
                self.selection[Pane::Results.index()] = handle.0;
                self.set_status("AI response ready");
            }
            Change::RequestErrored(handle) => {
                let message = self
                    .controller
                    .session()
                    .requests()
                    .get(handle)
                    .and_then(|r| r.response.clone())
                    .unwrap_or_else(|| "AI request failed".into());
                self.set_error(message);
            }
            Change::RequestsPruned(count) => {
                self.selection[Pane::Results.index()] = 0;
                self.set_status(format!("{count} finished requests cleared"));
            }
            Change::CorrelationMiss => {
                self.set_status("Received an AI result with no pending request")
            }
            Change::DuplicateResolution(_) => self.set_status("Ignored a repeated AI result"),
            Change::BackendError(message) => self.set_error(format!("AI service error: {message}")),
            Change::ModelsLoaded(models) => {
                self.set_status(format!("{} models available", models.len()))
            }
            Change::ModelSelected(model) => self.set_status(format!("Model: {model}")),
            Change::BackendStatus(_) => {}
            Change::ThemeChanged(index) => {
                let name = PALETTES.get(index).map(|p| p.name).unwrap_or("?");
                self.set_status(format!("Theme: {name}"));
            }
            Change::LogPanelToggled(enabled) => {
                self.set_status(if enabled { "Log panel on" } else { "Log panel off" })
            }
            Change::LogCleared => self.set_status("Log cleared"),
            Change::ProjectSaved { file_id } => {
                self.last_save = Some(Instant::now());
                self.set_status(format!("Saved as {file_id}"));
            }
            Change::ProjectLoaded { name } => {
                self.selection = [0; 3];
                self.last_save = Some(Instant::now());
                self.set_status(format!("Loaded {name}"));
            }
            Change::InboxExported(path) => {
                self.set_status(format!("Inbox exported to {}", path.display()))
            }
            Change::SpeechStatus { kind, active } => {
                let message = match (kind, active) {
                    (SpeechKind::Synthesis, true) => "Reading aloud... (p to stop)",
                    (SpeechKind::Synthesis, false) => "Reading finished",
                    (SpeechKind::Recognition, true) => "Listening...",
                    (SpeechKind::Recognition, false) => "Stopped listening",
                };
                self.set_status(message);
            }
            Change::Rejected { reason } => self.set_error(reason),
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        match self.mode {
            Mode::Normal => self.handle_normal_key(key),
            Mode::Input { .. } => Ok(self.handle_input_key(key)),
            Mode::PickProject { .. } => Ok(self.handle_picker_key(key)),
            Mode::ConfirmLoad { .. } | Mode::ConfirmClear(_) | Mode::ConfirmQuit => {
                Ok(self.handle_confirm_key(key))
            }
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        let session = self.controller.session();
        match key.code {
            KeyCode::Char('q') => {
                if session.is_dirty() {
                    self.mode = Mode::ConfirmQuit;
                } else {
                    return Ok(true);
                }
            }
            KeyCode::Tab => self.focus = self.focus.next(),
            KeyCode::BackTab => self.focus = self.focus.prev(),
            KeyCode::Up | KeyCode::Char('k') => self.step_selection(-1),
            KeyCode::Down | KeyCode::Char('j') => self.step_selection(1),
            KeyCode::Char('K') => self.shift_selected(-1),
            KeyCode::Char('J') => self.shift_selected(1),
            KeyCode::Char('n') => {
                let kind = self.focus.collection().unwrap_or(CollectionKind::Inbox);
                self.open_input(InputTarget::NewNote(kind), "");
            }
            KeyCode::Char('e') => match self.current_note() {
                Some((collection, note)) => self.open_input(
                    InputTarget::EditNote {
                        collection,
                        id: note.id,
                    },
                    &note.text,
                ),
                None => self.set_status("No note selected to edit"),
            },
            KeyCode::Char('d') => match self.current_note() {
                Some((collection, note)) => self.send(Command::RemoveNote {
                    collection,
                    id: note.id,
                }),
                None => self.set_status("No note selected to delete"),
            },
            KeyCode::Delete | KeyCode::Backspace => {
                if let Some(collection) = self.focus.collection() {
                    let index = self.selection[self.focus.index()];
                    self.send(Command::RemoveAt { collection, index });
                }
            }
            KeyCode::Enter | KeyCode::Char('m') => {
                if let Some((from, note)) = self.current_note() {
                    self.send(Command::TransferNote { from, id: note.id });
                }
            }
            KeyCode::Char('a') => {
                let prefill = self.current_note().map(|(_, n)| n.text).unwrap_or_default();
                self.open_input(InputTarget::Prompt, &prefill);
            }
            KeyCode::Char('R') => match self.current_note() {
                Some((collection, note)) => self.send(Command::RephraseNote {
                    collection,
                    id: note.id,
                }),
                None => self.set_status("No note selected to rephrase"),
            },
            KeyCode::Char('s') => {
                let name = session.project_name().unwrap_or_default().to_string();
                self.open_input(InputTarget::SaveAs, &name);
            }
            KeyCode::Char('o') => self.open_picker(),
            KeyCode::Char('x') => self.send(Command::ExportInbox),
            KeyCode::Char('c') => match self.focus.collection() {
                Some(kind) => self.mode = Mode::ConfirmClear(kind),
                None => self.send(Command::ClearFinishedRequests),
            },
            KeyCode::Char('t') => self.send(Command::RandomTheme),
            KeyCode::Char('T') => self.send(Command::ResetTheme),
            KeyCode::Char(']') => {
                let next = (session.theme().index() + 1) % PALETTES.len();
                self.send(Command::SetTheme(next));
            }
            KeyCode::Char('[') => {
                let prev = (session.theme().index() + PALETTES.len() - 1) % PALETTES.len();
                self.send(Command::SetTheme(prev));
            }
            KeyCode::Char('l') => {
                let enabled = !session.log_enabled();
                self.send(Command::SetLogPanel(enabled));
            }
            KeyCode::Char('L') => self.send(Command::ClearLog),
            KeyCode::Char('r') => self.send(Command::RefreshModels),
            KeyCode::Char('M') => {
                let model = session.selected_model().to_string();
                self.open_input(InputTarget::Model, &model);
            }
            KeyCode::Char('p') => {
                let text = self.current_text();
                self.send(Command::ToggleSpeech {
                    kind: SpeechKind::Synthesis,
                    text,
                });
            }
            KeyCode::Char('v') => self.send(Command::ToggleSpeech {
                kind: SpeechKind::Recognition,
                text: None,
            }),
            _ => {}
        }
        Ok(false)
    }

    fn handle_input_key(&mut self, key: KeyEvent) -> bool {
        let mode = std::mem::replace(&mut self.mode, Mode::Normal);
        let (target, mut field) = match mode {
            Mode::Input { target, field } => (target, field),
            other => {
                self.mode = other;
                return false;
            }
        };
        match key.code {
            KeyCode::Esc => {
                self.set_status("Canceled");
                return false;
            }
            KeyCode::Enter => {
                self.submit_input(target, field.value);
                return false;
            }
            KeyCode::Left => field.move_left(),
            KeyCode::Right => field.move_right(),
            KeyCode::Backspace => field.backspace(),
            KeyCode::Char(c) => {
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT)
                {
                    field.insert_char(c);
                }
            }
            _ => {}
        }
        self.mode = Mode::Input { target, field };
        false
    }

    fn submit_input(&mut self, target: InputTarget, text: String) {
        let command = match target {
            InputTarget::NewNote(collection) => Command::AddNote { collection, text },
            InputTarget::EditNote { collection, id } => Command::UpdateNote {
                collection,
                id,
                text,
            },
            InputTarget::Prompt => {
                self.focus = Pane::Results;
                Command::SendPrompt(text)
            }
            InputTarget::SaveAs => Command::SaveProject { name: Some(text) },
            InputTarget::Model => Command::SelectModel(text),
        };
        self.send(command);
    }

    fn handle_picker_key(&mut self, key: KeyEvent) -> bool {
        let (projects, selected) = match &mut self.mode {
            Mode::PickProject { projects, selected } => (projects, selected),
            _ => return false,
        };
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => *selected = selected.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                *selected = (*selected + 1).min(projects.len().saturating_sub(1))
            }
            KeyCode::Enter => {
                let file_id = projects.get(*selected).map(|p| p.file_id.clone());
                self.mode = Mode::Normal;
                if let Some(file_id) = file_id {
                    if self.controller.session().is_dirty() {
                        self.mode = Mode::ConfirmLoad { file_id };
                    } else {
                        self.send(Command::LoadProject(file_id));
                    }
                }
            }
            KeyCode::Esc | KeyCode::Char('q') => {
                self.mode = Mode::Normal;
                self.set_status("Canceled");
            }
            _ => {}
        }
        false
    }

    fn handle_confirm_key(&mut self, key: KeyEvent) -> bool {
        let confirmed = match key.code {
            KeyCode::Char('y') | KeyCode::Enter => true,
            KeyCode::Char('n') | KeyCode::Esc => false,
            _ => return false,
        };
        let mode = std::mem::replace(&mut self.mode, Mode::Normal);
        if !confirmed {
            self.set_status("Canceled");
            return false;
        }
        match mode {
            Mode::ConfirmLoad { file_id } => self.send(Command::LoadProject(file_id)),
            Mode::ConfirmClear(kind) => self.send(Command::ClearCollection(kind)),
            Mode::ConfirmQuit => return true,
            _ => {}
        }
        false
    }

    fn open_input(&mut self, target: InputTarget, prefill: &str) {
        self.mode = Mode::Input {
            target,
            field: FieldValue::new(prefill),
        };
    }

    fn open_picker(&mut self) {
        match self.controller.store().list() {
            Ok(projects) if projects.is_empty() => self.set_status("No saved projects yet"),
            Ok(projects) => {
                self.mode = Mode::PickProject {
                    projects,
                    selected: 0,
                }
            }
            Err(err) => {
                warn!("event=project_list_failed error={}", err);
                self.set_error(format!("Could not list projects: {err}"));
            }
        }
    }

    fn send(&mut self, command: Command) {
        self.sender.intent(command);
        self.sync();
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
        self.status_error = false;
    }

    fn set_error(&mut self, message: impl Into<String>) {
        self.status = message.into();
        self.status_error = true;
    }

    fn pane_len(&self, pane: Pane) -> usize {
        let session = self.controller.session();
        match pane.collection() {
            Some(kind) => session.collection(kind).len(),
            None => session.requests().entries().len(),
        }
    }

    fn step_selection(&mut self, delta: isize) {
        let len = self.pane_len(self.focus);
        if len == 0 {
            return;
        }
        let slot = &mut self.selection[self.focus.index()];
        *slot = (*slot as isize + delta).clamp(0, len as isize - 1) as usize;
    }

    fn shift_selected(&mut self, delta: isize) {
        let Some((collection, note)) = self.current_note() else {
            return;
        };
        let len = self.pane_len(self.focus);
        let current = self.selection[self.focus.index()];
        let target = (current as isize + delta).clamp(0, len as isize - 1) as usize;
        if target != current {
            self.send(Command::MoveNote {
                collection,
                id: note.id,
                to_index: target,
            });
        }
    }

    fn select_note(&mut self, kind: CollectionKind, id: &str) {
        if let Some(idx) = self.controller.session().collection(kind).position(id) {
            self.selection[Pane::of(kind).index()] = idx;
        }
    }

    fn current_note(&self) -> Option<(CollectionKind, Note)> {
        let kind = self.focus.collection()?;
        self.controller
            .session()
            .collection(kind)
            .notes()
            .get(self.selection[self.focus.index()])
            .map(|note| (kind, note.clone()))
    }

    /// Text the speech engine should read: the selected note, or the
    /// selected AI response when the results pane has focus.
    fn current_text(&self) -> Option<String> {
        match self.focus.collection() {
            Some(_) => self.current_note().map(|(_, n)| n.text),
            None => self
                .controller
                .session()
                .requests()
                .entries()
                .get(self.selection[Pane::Results.index()])
                .and_then(|r| r.response.clone()),
        }
    }

    fn palette(&self) -> &'static Palette {
        self.controller.session().theme().palette()
    }

    fn draw(&mut self, f: &mut ratatui::Frame<'_>) {
        let palette = self.palette();
        f.render_widget(
            Block::default().style(
                Style::default()
                    .bg(palette.background.into())
                    .fg(palette.text.into()),
            ),
            f.size(),
        );

        let log_enabled = self.controller.session().log_enabled();
        let mut constraints = vec![Constraint::Length(3), Constraint::Min(8)];
        if log_enabled {
            constraints.push(Constraint::Length(LOG_PANEL_HEIGHT));
        }
        constraints.push(Constraint::Length(4));
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints(constraints)
            .split(f.size());

        self.draw_header(f, layout[0]);
        self.draw_body(f, layout[1]);
        if log_enabled {
            self.draw_log(f, layout[2]);
        }
        self.draw_footer(f, layout[layout.len() - 1]);

        match &self.mode {
            Mode::Normal => {}
            Mode::Input { target, field } => self.draw_input(f, &target.title(), field),
            Mode::PickProject { projects, selected } => self.draw_picker(f, projects, *selected),
            Mode::ConfirmLoad { file_id } => self.draw_confirm(
                f,
                "Unsaved changes",
                &format!("Discard current notes and load {file_id}?"),
            ),
            Mode::ConfirmClear(kind) => {
                let count = self.controller.session().collection(*kind).len();
                self.draw_confirm(f, "Clear", &format!("Remove all {count} notes from {kind}?"))
            }
            Mode::ConfirmQuit => {
                self.draw_confirm(f, "Unsaved changes", "Quit without saving?")
            }
        }
    }

    fn draw_header(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let palette = self.palette();
        let session = self.controller.session();
        let project = match session.project_name() {
            Some(name) => name.to_string(),
            None => "untitled".to_string(),
        };
        let dirty = if session.is_dirty() { " *" } else { "" };
        let saved = match self.last_save {
            Some(at) => format!("saved {}", format_elapsed(at)),
            None => "not saved".to_string(),
        };
        let title = Line::from(vec![
            Span::styled(
                "cogniflow ",
                Style::default()
                    .fg(palette.primary.into())
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("{project}{dirty}"),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw("  •  "),
            Span::styled(
                session.selected_model().to_string(),
                Style::default().fg(palette.secondary.into()),
            ),
            Span::raw("  •  "),
            Span::styled(
                session.backend_status().to_string(),
                Style::default().fg(Color::Gray),
            ),
            Span::raw("  •  "),
            Span::styled(saved, Style::default().fg(Color::Gray)),
            Span::raw("  •  "),
            Span::styled(
                format!("theme {}", palette.name),
                Style::default().fg(palette.primary.into()),
            ),
        ]);
        let block = Block::default()
            .borders(Borders::BOTTOM)
            .border_style(Style::default().fg(Color::DarkGray));
        f.render_widget(
            Paragraph::new(title).alignment(Alignment::Center).block(block),
            area,
        );
    }

    fn draw_body(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(30),
                Constraint::Percentage(30),
                Constraint::Percentage(40),
            ])
            .split(area);
        self.draw_collection(f, columns[0], CollectionKind::Inbox, "Pensierini");
        self.draw_collection(f, columns[1], CollectionKind::Workspace, "Workspace");
        self.draw_results(f, columns[2]);
    }

    fn pane_block(&self, title: String, pane: Pane) -> Block<'static> {
        let palette = self.palette();
        let border = if self.focus == pane {
            Color::from(palette.primary)
        } else {
            Color::DarkGray
        };
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .title(Span::styled(
                title,
                Style::default().fg(border).add_modifier(Modifier::BOLD),
            ))
    }

    fn draw_collection(
        &self,
        f: &mut ratatui::Frame<'_>,
        area: Rect,
        kind: CollectionKind,
        title: &str,
    ) {
        let palette = self.palette();
        let pane = Pane::of(kind);
        let notes = self.controller.session().collection(kind).notes();
        let width = area.width.saturating_sub(4) as usize;
        let items: Vec<ListItem> = if notes.is_empty() {
            vec![ListItem::new(Span::styled(
                "(empty)",
                Style::default().fg(Color::DarkGray),
            ))]
        } else {
            notes
                .iter()
                .map(|note| ListItem::new(truncate_text(&note.text, width)))
                .collect()
        };
        let list = List::new(items)
            .block(self.pane_block(format!(" {} ({}) ", title, notes.len()), pane))
            .highlight_style(
                Style::default()
                    .bg(palette.secondary.into())
                    .fg(palette.background.into())
                    .add_modifier(Modifier::BOLD),
            );
        let mut state = ListState::default();
        if self.focus == pane && !notes.is_empty() {
            state.select(Some(self.selection[pane.index()]));
        }
        f.render_stateful_widget(list, area, &mut state);
    }

    fn draw_results(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let palette = self.palette();
        let requests = self.controller.session().requests().entries();
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(area);

        let items: Vec<ListItem> = if requests.is_empty() {
            vec![ListItem::new(Span::styled(
                "No AI requests yet",
                Style::default().fg(Color::DarkGray),
            ))]
        } else {
            requests
                .iter()
                .map(|r| {
                    let color = match r.status {
                        RequestStatus::Pending => palette.secondary,
                        RequestStatus::Resolved => palette.success,
                        RequestStatus::Errored => palette.error,
                    };
                    ListItem::new(r.label()).style(Style::default().fg(color.into()))
                })
                .collect()
        };
        let correlator = self.controller.session().requests();
        let mut title = format!(" AI ({}) ", requests.len());
        let (misses, duplicates) = (correlator.miss_count(), correlator.duplicate_count());
        if misses + duplicates > 0 {
            title.push_str(&format!("· {misses} unmatched, {duplicates} repeated "));
        }
        let list = List::new(items)
            .block(self.pane_block(title, Pane::Results))
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        let mut state = ListState::default();
        if !requests.is_empty() {
            state.select(Some(self.selection[Pane::Results.index()]));
        }
        f.render_stateful_widget(list, rows[0], &mut state);

        let selected = requests.get(self.selection[Pane::Results.index()]);
        let lines: Vec<Line> = match selected {
            Some(r) => {
                let mut lines = vec![Line::from(Span::styled(
                    r.prompt.clone(),
                    Style::default()
                        .fg(palette.primary.into())
                        .add_modifier(Modifier::BOLD),
                ))];
                lines.push(Line::from(""));
                match &r.response {
                    Some(text) => lines.extend(text.lines().map(|l| Line::from(l.to_string()))),
                    None => lines.push(Line::from(Span::styled(
                        "Waiting for response...",
                        Style::default().fg(Color::Gray),
                    ))),
                }
                lines
            }
            None => vec![Line::from("Select a request to read its answer")],
        };
        let detail = Paragraph::new(lines).wrap(Wrap { trim: false }).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray))
                .title(" Response "),
        );
        f.render_widget(detail, rows[1]);
    }

    fn draw_log(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let palette = self.palette();
        let session = self.controller.session();
        let visible = area.height.saturating_sub(2) as usize;
        let lines: Vec<Line> = if session.log().is_empty() {
            vec![Line::from(Span::styled(
                session.log_snapshot(),
                Style::default().fg(Color::DarkGray),
            ))]
        } else {
            let skip = session.log().len().saturating_sub(visible);
            session
                .log()
                .entries()
                .skip(skip)
                .map(|entry| {
                    let color = match entry.level {
                        LogLevel::Debug => Color::DarkGray,
                        LogLevel::Info => Color::Gray,
                        LogLevel::Warn => Color::Yellow,
                        LogLevel::Error => palette.error.into(),
                    };
                    Line::from(Span::styled(entry.to_string(), Style::default().fg(color)))
                })
                .collect()
        };
        let block = Block::default()
            .borders(Borders::TOP)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(" Log ");
        f.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn draw_footer(&self, f: &mut ratatui::Frame<'_>, area: Rect) {
        let palette = self.palette();
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(2), Constraint::Length(2)])
            .split(area);

        let help = Paragraph::new(self.footer_help_line())
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray)),
            );
        f.render_widget(help, rows[0]);

        let color = if self.status_error {
            palette.error
        } else {
            palette.text
        };
        let status = Paragraph::new(Span::styled(
            format!("{}  [{}]", self.status, Local::now().format("%H:%M")),
            Style::default().fg(color.into()),
        ))
        .wrap(Wrap { trim: true });
        f.render_widget(status, rows[1]);
    }

    fn footer_help_line(&self) -> Line<'static> {
        let key = |k: &'static str| {
            Span::styled(k, Style::default().fg(Color::from(self.palette().primary)))
        };
        let mut spans = vec![
            key("Tab"),
            Span::raw(" pane  "),
            key("↑↓"),
            Span::raw(" select  "),
        ];
        match self.focus {
            Pane::Results => spans.extend([
                key("a"),
                Span::raw(" ask  "),
                key("p"),
                Span::raw(" read aloud  "),
                key("c"),
                Span::raw(" clear finished  "),
            ]),
            _ => spans.extend([
                key("n"),
                Span::raw(" new  "),
                key("e"),
                Span::raw(" edit  "),
                key("d"),
                Span::raw(" delete  "),
                key("m"),
                Span::raw(" move across  "),
                key("J/K"),
                Span::raw(" reorder  "),
                key("a"),
                Span::raw(" ask  "),
                key("R"),
                Span::raw(" rephrase  "),
            ]),
        }
        spans.extend([
            key("s"),
            Span::raw(" save  "),
            key("o"),
            Span::raw(" open  "),
            key("x"),
            Span::raw(" export  "),
            key("t"),
            Span::raw(" theme  "),
            key("l"),
            Span::raw(" log  "),
            key("q"),
            Span::raw(" quit"),
        ]);
        Line::from(spans)
    }

    fn draw_input(&self, f: &mut ratatui::Frame<'_>, title: &str, field: &FieldValue) {
        let palette = self.palette();
        let area = centered_rect(60, 20, f.size());
        let body = vec![
            Line::from(Span::styled(
                field.with_caret(),
                Style::default().fg(palette.text.into()),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Enter to confirm • Esc to cancel",
                Style::default().fg(Color::Gray),
            )),
        ];
        let dialog = Paragraph::new(body).wrap(Wrap { trim: false }).block(
            Block::default()
                .title(Span::styled(
                    title.to_string(),
                    Style::default()
                        .fg(palette.primary.into())
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(palette.primary.into()))
                .style(Style::default().bg(palette.background.into())),
        );
        f.render_widget(Clear, area);
        f.render_widget(dialog, area);
    }

    fn draw_picker(
        &self,
        f: &mut ratatui::Frame<'_>,
        projects: &[ProjectSummary],
        selected: usize,
    ) {
        let palette = self.palette();
        let area = centered_rect(70, 60, f.size());
        let items: Vec<ListItem> = projects
            .iter()
            .map(|p| {
                let modified = p.modified_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
                ListItem::new(vec![
                    Line::from(Span::styled(
                        p.name.clone(),
                        Style::default().add_modifier(Modifier::BOLD),
                    )),
                    Line::from(Span::styled(
                        format!(
                            "  {}  •  {} inbox, {} workspace  •  {}",
                            p.file_id, p.inbox_count, p.workspace_count, modified
                        ),
                        Style::default().fg(Color::Gray),
                    )),
                ])
            })
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .title(" Open project (Enter load, Esc cancel) ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(palette.primary.into()))
                    .style(Style::default().bg(palette.background.into())),
            )
            .highlight_style(
                Style::default()
                    .bg(palette.secondary.into())
                    .fg(palette.background.into()),
            );
        let mut state = ListState::default();
        state.select(Some(selected));
        f.render_widget(Clear, area);
        f.render_stateful_widget(list, area, &mut state);
    }

    fn draw_confirm(&self, f: &mut ratatui::Frame<'_>, title: &str, question: &str) {
        let palette = self.palette();
        let area = centered_rect(50, 25, f.size());
        let body = vec![
            Line::from(Span::styled(
                question.to_string(),
                Style::default()
                    .fg(palette.error.into())
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from("Press y to confirm, n or Esc to cancel"),
        ];
        let dialog = Paragraph::new(body)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(
                Block::default()
                    .title(Span::styled(
                        title.to_string(),
                        Style::default()
                            .fg(palette.error.into())
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(palette.error.into()))
                    .style(Style::default().bg(palette.background.into())),
            );
        f.render_widget(Clear, area);
        f.render_widget(dialog, area);
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut out = stdout();
    execute!(out, EnterAlternateScreen)?;
    Ok(Terminal::new(CrosstermBackend::new(out))?)
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

/// Flattens to one line and cuts to `max` chars, ending in `...` when cut.
fn truncate_text(text: &str, max: usize) -> String {
    let flat = text.replace(['\n', '\r'], " ");
    if flat.chars().count() <= max {
        return flat;
    }
    if max <= 3 {
        return flat.chars().take(max).collect();
    }
    let mut out: String = flat.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

fn format_elapsed(since: Instant) -> String {
    match since.elapsed().as_secs() {
        s if s < 60 => format!("{s}s ago"),
        s if s < 3600 => format!("{}m ago", s / 60),
        s => format!("{}h ago", s / 3600),
    }
}
