use crate::archive::{ArchiveExporter, ExportToken};
use crate::config::ExportArgs;
use crate::error::{ArchiveError, ForgeError};
use crate::tree::ProjectTree;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use ratatui::{Frame, Terminal};
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

const STATUS_HEIGHT: u16 = 6;
const STATUS_LINES: usize = 50;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug)]
pub enum UiEvent {
    ExportFinished {
        token: ExportToken,
        result: Result<Vec<u8>, ArchiveError>,
    },
    Delivered {
        token: ExportToken,
        result: Result<PathBuf, ArchiveError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Files,
    Editor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusLevel {
    Info,
    Error,
}

/// Multi-line text buffer for the file being edited.
///
/// The cursor column counts characters, not bytes.
struct EditorBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl EditorBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn from_text(text: &str) -> Self {
        // `split` always yields at least one (possibly empty) line.
        let lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        Self {
            lines,
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn line_len(&self, y: usize) -> usize {
        self.lines[y].chars().count()
    }

    fn byte_index(&self, y: usize, x: usize) -> usize {
        self.lines[y]
            .char_indices()
            .nth(x)
            .map(|(idx, _)| idx)
            .unwrap_or(self.lines[y].len())
    }

    fn insert_char(&mut self, c: char) {
        let idx = self.byte_index(self.cursor_y, self.cursor_x);
        self.lines[self.cursor_y].insert(idx, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            let idx = self.byte_index(self.cursor_y, self.cursor_x - 1);
            self.lines[self.cursor_y].remove(idx);
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            let current = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
            self.lines[self.cursor_y].push_str(&current);
        }
    }

    fn new_line(&mut self) {
        let idx = self.byte_index(self.cursor_y, self.cursor_x);
        let remaining = self.lines[self.cursor_y].split_off(idx);
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_len(self.cursor_y);
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_len(self.cursor_y) {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(self.line_len(self.cursor_y));
        }
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn render(&self) -> Text<'static> {
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

pub struct App {
    tree: ProjectTree,
    files: Vec<String>,
    list_state: ListState,
    editor: EditorBuffer,
    dirty: bool,
    focus: Focus,
    status: Vec<(StatusLevel, String)>,
    artifact: PathBuf,
    export: ExportArgs,
    exporter: ArchiveExporter,
    sender: mpsc::Sender<UiEvent>,
    receiver: mpsc::Receiver<UiEvent>,
    // Path being typed after Ctrl+O.
    prompt: Option<String>,
    should_quit: bool,
}

impl App {
    pub fn new(tree: ProjectTree, artifact: PathBuf, export: ExportArgs) -> Self {
        let (sender, receiver) = mpsc::channel(16);
        let files: Vec<String> = tree.files().into_iter().map(|(path, _)| path).collect();
        let mut app = Self {
            tree,
            files,
            list_state: ListState::default(),
            editor: EditorBuffer::new(),
            dirty: false,
            focus: Focus::Files,
            status: Vec::new(),
            artifact,
            export,
            exporter: ArchiveExporter::new(),
            sender,
            receiver,
            prompt: None,
            should_quit: false,
        };
        if !app.files.is_empty() {
            app.select(0);
        }
        app.info(format!("{} files loaded", app.files.len()));
        app
    }

    fn selected_path(&self) -> Option<&str> {
        self.list_state
            .selected()
            .and_then(|i| self.files.get(i))
            .map(String::as_str)
    }

    fn select(&mut self, index: usize) {
        if self.dirty {
            self.info("unsaved changes discarded");
        }
        self.list_state.select(Some(index));
        self.reload();
    }

    fn reload(&mut self) {
        let content = self
            .selected_path()
            .and_then(|path| self.tree.content(path))
            .unwrap_or_default()
            .to_string();
        self.editor = EditorBuffer::from_text(&content);
        self.dirty = false;
    }

    fn info(&mut self, message: impl Into<String>) {
        self.push_status(StatusLevel::Info, message.into());
    }

    fn error(&mut self, message: impl Into<String>) {
        self.push_status(StatusLevel::Error, message.into());
    }

    fn push_status(&mut self, level: StatusLevel, message: String) {
        self.status.push((level, message));
        if self.status.len() > STATUS_LINES {
            self.status.remove(0);
        }
    }

    /// Applies the buffer to the selected file and saves the artifact.
    fn save(&mut self) {
        let Some(path) = self.selected_path().map(str::to_string) else {
            return;
        };
        self.tree = self.tree.with_content(&path, self.editor.text());
        self.dirty = false;

        let result = serde_json::to_string_pretty(&self.tree.to_artifacts())
            .map_err(ForgeError::from)
            .and_then(|json| std::fs::write(&self.artifact, json).map_err(ForgeError::from));
        match result {
            Ok(()) => {
                tracing::info!(path = %path, "file updated");
                self.info(format!("saved {path}"));
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to save artifact");
                self.error(format!("save failed: {err}"));
            }
        }
    }

    /// Replaces the project with one parsed from `text`.
    ///
    /// On failure the current tree, file list and selection are kept.
    fn import(&mut self, text: &str) {
        match ProjectTree::import(text) {
            Ok(tree) => {
                self.files = tree.files().into_iter().map(|(path, _)| path).collect();
                self.tree = tree;
                self.dirty = false;
                if self.files.is_empty() {
                    self.list_state.select(None);
                    self.editor = EditorBuffer::new();
                } else {
                    self.select(0);
                }
                tracing::info!(files = self.files.len(), "project imported");
                self.info(format!("imported {} files", self.files.len()));
            }
            Err(err) => {
                tracing::warn!(error = %err, "import rejected");
                self.error(format!("import failed: {err}"));
            }
        }
    }

    fn import_file(&mut self, path: &str) {
        match std::fs::read_to_string(path) {
            Ok(text) => self.import(&text),
            Err(err) => self.error(format!("could not read {path}: {err}")),
        }
    }

    fn handle_prompt(&mut self, code: KeyCode) {
        let Some(input) = self.prompt.as_mut() else {
            return;
        };
        match code {
            KeyCode::Char(c) => input.push(c),
            KeyCode::Backspace => {
                input.pop();
            }
            KeyCode::Enter => {
                let path = input.trim().to_string();
                self.prompt = None;
                if !path.is_empty() {
                    self.import_file(&path);
                }
            }
            KeyCode::Esc => self.prompt = None,
            _ => {}
        }
    }

    fn start_export(&mut self) {
        let pending = self.exporter.start(self.tree.clone());
        let sender = self.sender.clone();
        self.info(format!("exporting {}.zip ...", self.export.name));
        tokio::spawn(async move {
            let (token, result) = pending.wait().await;
            let _ = sender.send(UiEvent::ExportFinished { token, result }).await;
        });
    }

    fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::ExportFinished { token, result } => {
                if !self.exporter.is_current(token) {
                    tracing::debug!(?token, "dropping superseded export");
                    return;
                }
                match result {
                    Ok(bytes) => {
                        let exporter = self.exporter.clone();
                        let sender = self.sender.clone();
                        let dir = self.export.out_dir.clone();
                        let name = self.export.name.clone();
                        tokio::spawn(async move {
                            if let Some(result) =
                                exporter.deliver_current(token, bytes, &dir, &name).await
                            {
                                let _ = sender.send(UiEvent::Delivered { token, result }).await;
                            }
                        });
                    }
                    Err(err) => self.error(format!("export failed: {err}")),
                }
            }
            UiEvent::Delivered { token, .. } if !self.exporter.is_current(token) => {
                tracing::debug!(?token, "dropping superseded delivery report");
            }
            UiEvent::Delivered { result: Ok(path), .. } => {
                self.info(format!("wrote {}", path.display()))
            }
            UiEvent::Delivered { result: Err(err), .. } => {
                self.error(format!("export failed: {err}"))
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if self.prompt.is_some() {
            self.handle_prompt(key.code);
            return;
        }

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') => self.should_quit = true,
                KeyCode::Char('s') => self.save(),
                KeyCode::Char('e') => self.start_export(),
                KeyCode::Char('o') => self.prompt = Some(String::new()),
                KeyCode::Char('r') => {
                    self.reload();
                    self.info("buffer reset");
                }
                _ => {}
            }
            return;
        }

        match (self.focus, key.code) {
            (_, KeyCode::Esc) => self.should_quit = true,
            (Focus::Files, KeyCode::Tab) => self.focus = Focus::Editor,
            (Focus::Editor, KeyCode::Tab) => self.focus = Focus::Files,
            (Focus::Files, KeyCode::Up) => {
                if let Some(i) = self.list_state.selected().filter(|i| *i > 0) {
                    self.select(i - 1);
                }
            }
            (Focus::Files, KeyCode::Down) => {
                if let Some(i) = self.list_state.selected().filter(|i| i + 1 < self.files.len()) {
                    self.select(i + 1);
                }
            }
            (Focus::Files, KeyCode::Enter) => self.focus = Focus::Editor,
            (Focus::Files, _) => {}
            (Focus::Editor, code) => self.edit(code),
        }
    }

    fn edit(&mut self, code: KeyCode) {
        if self.selected_path().is_none() {
            return;
        }
        match code {
            KeyCode::Char(c) => {
                self.editor.insert_char(c);
                self.dirty = true;
            }
            KeyCode::Enter => {
                self.editor.new_line();
                self.dirty = true;
            }
            KeyCode::Backspace => {
                self.editor.delete_char();
                self.dirty = true;
            }
            KeyCode::Left => self.editor.move_left(),
            KeyCode::Right => self.editor.move_right(),
            KeyCode::Up => self.editor.move_up(),
            KeyCode::Down => self.editor.move_down(),
            KeyCode::Home => self.editor.cursor_x = 0,
            KeyCode::End => self.editor.cursor_x = self.editor.line_len(self.editor.cursor_y),
            _ => {}
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let [main, status_area] =
            Layout::vertical([Constraint::Min(3), Constraint::Length(STATUS_HEIGHT)])
                .areas(f.area());
        let [files_area, editor_area] =
            Layout::horizontal([Constraint::Percentage(30), Constraint::Percentage(70)])
                .areas(main);

        let border = |focused: bool| {
            if focused {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::DarkGray)
            }
        };

        let items: Vec<ListItem> = self
            .files
            .iter()
            .map(|path| ListItem::new(path.clone()))
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Files (Tab to switch) ")
                    .border_style(border(self.focus == Focus::Files)),
            )
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_symbol("> ");
        f.render_stateful_widget(list, files_area, &mut self.list_state);

        let title = match self.selected_path() {
            Some(path) if self.dirty => format!(" {path} [modified] "),
            Some(path) => format!(" {path} "),
            None => " (no files) ".to_string(),
        };
        let visible = editor_area.height.saturating_sub(2) as usize;
        let scroll = self.editor.cursor_y.saturating_sub(visible.saturating_sub(1));
        let editor = Paragraph::new(self.editor.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(border(self.focus == Focus::Editor)),
            )
            .scroll((scroll as u16, 0));
        f.render_widget(editor, editor_area);

        let mut tail = self
            .status
            .iter()
            .rev()
            .take(STATUS_HEIGHT.saturating_sub(2) as usize)
            .rev()
            .map(|(level, message)| {
                let style = match level {
                    StatusLevel::Info => Style::default().fg(Color::Gray),
                    StatusLevel::Error => Style::default().fg(Color::Red),
                };
                Line::from(Span::styled(message.clone(), style))
            })
            .collect::<Vec<_>>();
        let help = match &self.prompt {
            Some(input) => {
                tail.push(Line::from(format!("import: {input}")));
                " Enter import  Esc cancel "
            }
            None => " Ctrl+S save  Ctrl+E export  Ctrl+O import  Ctrl+R reset  Esc quit ",
        };
        let skip = tail.len().saturating_sub(STATUS_HEIGHT.saturating_sub(2) as usize);
        let status = Paragraph::new(Text::from(tail.split_off(skip))).block(
            Block::default()
                .borders(Borders::ALL)
                .title(help)
                .border_style(Style::default().fg(Color::DarkGray)),
        );
        f.render_widget(status, status_area);

        if self.focus == Focus::Editor && self.prompt.is_none() {
            let column = u16::try_from(self.editor.cursor_x).unwrap_or(u16::MAX);
            let row = u16::try_from(self.editor.cursor_y - scroll).unwrap_or(u16::MAX);
            let x = editor_area.x.saturating_add(1).saturating_add(column);
            let y = editor_area.y.saturating_add(1).saturating_add(row);
            f.set_cursor_position((
                x.min(editor_area.x + editor_area.width.saturating_sub(2)),
                y.min(editor_area.y + editor_area.height.saturating_sub(2)),
            ));
        }
    }

    fn handle_events(&mut self) -> io::Result<()> {
        while let Ok(event) = self.receiver.try_recv() {
            self.apply(event);
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                self.handle_key(key);
            }
        }
        Ok(())
    }
}

pub fn run_editor(
    tree: ProjectTree,
    artifact: PathBuf,
    export: ExportArgs,
) -> Result<(), ForgeError> {
    enable_raw_mode()?;
    let _guard = TerminalGuard::new();
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut app = App::new(tree, artifact, export);

    while !app.should_quit {
        terminal.draw(|f| app.draw(f))?;
        app.handle_events()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn app_in(dir: &std::path::Path) -> App {
        let tree = ProjectTree::import(r#"{"a.txt": "old", "dir/b.txt": "keep"}"#).unwrap();
        App::new(
            tree,
            dir.join("artifact.json"),
            ExportArgs {
                name: "project-files".to_string(),
                out_dir: dir.to_path_buf(),
            },
        )
    }

    #[test]
    fn editor_buffer_handles_multibyte_text() {
        let mut buffer = EditorBuffer::from_text("héllo");
        for _ in 0..2 {
            buffer.move_right();
        }
        buffer.insert_char('✓');
        assert_eq!(buffer.text(), "hé✓llo");
        buffer.new_line();
        assert_eq!(buffer.text(), "hé✓\nllo");
        assert_eq!((buffer.cursor_x, buffer.cursor_y), (0, 1));
        buffer.delete_char();
        assert_eq!(buffer.text(), "hé✓llo");
        assert_eq!((buffer.cursor_x, buffer.cursor_y), (3, 0));
        buffer.delete_char();
        assert_eq!(buffer.text(), "héllo");
    }

    #[test]
    fn save_updates_only_the_selected_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(dir.path());
        assert_eq!(app.selected_path(), Some("a.txt"));

        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::End));
        app.handle_key(key(KeyCode::Char('!')));
        assert!(app.dirty);
        app.handle_key(ctrl('s'));

        assert!(!app.dirty);
        assert_eq!(app.tree.content("a.txt"), Some("old!"));
        assert_eq!(app.tree.content("dir/b.txt"), Some("keep"));

        let saved = std::fs::read_to_string(dir.path().join("artifact.json")).unwrap();
        let reloaded = ProjectTree::import(&saved).unwrap();
        assert_eq!(reloaded, app.tree);
    }

    #[test]
    fn switching_files_discards_unsaved_edits() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(dir.path());

        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Char('x')));
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Down));

        assert_eq!(app.selected_path(), Some("dir/b.txt"));
        assert_eq!(app.editor.text(), "keep");
        assert_eq!(app.tree.content("a.txt"), Some("old"));

        app.handle_key(key(KeyCode::Down));
        assert_eq!(app.selected_path(), Some("dir/b.txt"));
        app.handle_key(key(KeyCode::Esc));
        assert!(app.should_quit);
    }

    #[tokio::test]
    async fn only_the_latest_export_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(dir.path());

        app.handle_key(ctrl('e'));
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::Char('1')));
        app.handle_key(ctrl('s'));
        app.handle_key(ctrl('e'));

        let mut finished = 0;
        let delivered = loop {
            match app.receiver.recv().await.unwrap() {
                UiEvent::Delivered { result, .. } => break result.unwrap(),
                event => {
                    finished += 1;
                    app.apply(event);
                }
            }
        };
        assert!(finished >= 1);
        assert_eq!(delivered, dir.path().join("project-files.zip"));

        let bytes = std::fs::read(&delivered).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut content = String::new();
        archive
            .by_name("a.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "1old");
    }

    #[test]
    fn malformed_import_keeps_the_current_project() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app_in(dir.path());
        let tree = app.tree.clone();
        let files = app.files.clone();

        app.import("not json");

        assert_eq!(app.tree, tree);
        assert_eq!(app.files, files);
        assert_eq!(app.selected_path(), Some("a.txt"));
        assert_eq!(app.editor.text(), "old");
        let (level, message) = app.status.last().unwrap();
        assert_eq!(*level, StatusLevel::Error);
        assert!(message.starts_with("import failed"));
    }

    #[test]
    fn import_prompt_replaces_the_project() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("next.json");
        std::fs::write(&source, r#"{"Main/src/app.js": "x", "Main/README.md": "y"}"#).unwrap();
        let mut app = app_in(dir.path());

        app.handle_key(ctrl('o'));
        for c in source.to_str().unwrap().chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
        app.handle_key(key(KeyCode::Enter));

        assert!(app.prompt.is_none());
        assert_eq!(app.files, vec!["src/app.js", "README.md"]);
        assert_eq!(app.selected_path(), Some("src/app.js"));
        assert_eq!(app.editor.text(), "x");
        assert!(!app.tree.contains_file("a.txt"));

        app.handle_key(ctrl('o'));
        for c in "missing.json".chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.files, vec!["src/app.js", "README.md"]);
        assert_eq!(app.status.last().unwrap().0, StatusLevel::Error);
    }

    #[test]
    fn drawing_a_very_long_line_does_not_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let long = "x".repeat(70_000);
        let tree = ProjectTree::import(&format!(r#"{{"long.txt": "{long}"}}"#)).unwrap();
        let mut app = App::new(
            tree,
            dir.path().join("artifact.json"),
            ExportArgs {
                name: "project-files".to_string(),
                out_dir: dir.path().to_path_buf(),
            },
        );
        app.handle_key(key(KeyCode::Tab));
        app.handle_key(key(KeyCode::End));
        assert_eq!(app.editor.cursor_x, 70_000);

        let mut terminal = Terminal::new(ratatui::backend::TestBackend::new(40, 12)).unwrap();
        terminal.draw(|f| app.draw(f)).unwrap();
    }
}
