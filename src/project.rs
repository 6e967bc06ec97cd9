use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::canvas::CanvasState;
use crate::components::history::HistoryManager;
use crate::components::hotkeys::{HotkeyAction, KeyBindings, KeyCombo};
use crate::components::tools::{PointerEvent, Tool, ToolController, ToolOutcome};
use crate::error::ProjectResult;
use crate::io;
use crate::ops::selection::{self, Clipboard};
use crate::settings::EditorSettings;

/// What a key press did, for the host to react to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CommandOutcome {
    /// No binding for the combo.
    Unbound,
    /// Bound, but there was nothing to do.
    Ignored,
    Applied(ToolOutcome),
    /// Saving needs a path or dialog the session does not own.
    SaveRequested,
    ExportRequested,
}

/// Single open document: canvas, undo stack, tools, clipboard and the file
/// it came from. Everything a session needs is owned here; settings are
/// injected at construction.
pub struct Project {
    pub id: Uuid,
    pub canvas_state: CanvasState,
    pub history: HistoryManager,
    pub tools: ToolController,
    pub clipboard: Clipboard,
    pub keybindings: KeyBindings,
    pub settings: EditorSettings,
    /// `None` for unsaved/untitled files.
    pub path: Option<PathBuf>,

    /// Display name (derived from path or "Untitled-X")
    pub name: String,

    /// `canvas_state.dirty_generation` at the last save or load.
    saved_generation: u64,
}

impl Project {
    pub fn new_untitled(untitled_counter: usize, settings: EditorSettings) -> Self {
        let mut canvas_state = CanvasState::new(settings.default_width, settings.default_height);
        canvas_state.fps = settings.default_fps.max(1);
        for frame in &mut canvas_state.frames {
            frame.delay = settings.default_frame_delay_ms;
        }
        Self::with_state(canvas_state, None, format!("Untitled-{}", untitled_counter), settings)
    }

    pub fn from_file(path: &Path, settings: EditorSettings) -> ProjectResult<Self> {
        let canvas_state = io::load_project(path)?;
        Ok(Self::with_state(canvas_state, Some(path.to_path_buf()), name_from_path(path), settings))
    }

    fn with_state(canvas_state: CanvasState, path: Option<PathBuf>, name: String, settings: EditorSettings) -> Self {
        let saved_generation = canvas_state.dirty_generation;
        Self {
            id: Uuid::new_v4(),
            canvas_state,
            history: HistoryManager::new(settings.history_limit),
            tools: ToolController::new(&settings),
            clipboard: Clipboard::new(),
            keybindings: KeyBindings::default(),
            settings,
            path,
            name,
            saved_generation,
        }
    }

    /// Replaces the session with a blank canvas. When there are unsaved
    /// changes, `confirm` is asked first; returning `false` leaves the
    /// session untouched.
    pub fn new_project_with_confirm(&mut self, width: u32, height: u32, confirm: impl FnOnce(&Project) -> bool) -> bool {
        if self.is_dirty() && !confirm(self) {
            return false;
        }
        let settings = EditorSettings { default_width: width, default_height: height, ..self.settings.clone() };
        let mut fresh = Self::new_untitled(1, settings);
        fresh.settings = self.settings.clone();
        fresh.keybindings = std::mem::take(&mut self.keybindings);
        *self = fresh;
        tracing::info!("new {}x{} project", width, height);
        true
    }

    /// Loads `path` into this session. On error the session is unchanged.
    pub fn open(&mut self, path: &Path) -> ProjectResult<()> {
        let state = io::load_project(path)?;
        self.canvas_state = state;
        self.history.clear();
        self.tools = ToolController::new(&self.settings);
        self.tools.sync_history(&self.history);
        self.path = Some(path.to_path_buf());
        self.name = name_from_path(path);
        self.mark_clean();
        Ok(())
    }

    /// Commits any floating edit, then writes to `path` (or the current path).
    pub fn save(&mut self, path: Option<&Path>) -> ProjectResult<()> {
        let target = match (path, &self.path) {
            (Some(p), _) => p.to_path_buf(),
            (None, Some(p)) => p.clone(),
            (None, None) => {
                return Err(crate::error::ProjectError::UnsupportedFormat("project has no file path".into()));
            }
        };
        self.tools.commit_pending(&mut self.canvas_state);
        io::save_project(&self.canvas_state, &target)?;
        self.path = Some(target);
        self.update_name_from_path();
        self.mark_clean();
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.canvas_state.dirty_generation != self.saved_generation
    }

    pub fn mark_clean(&mut self) {
        self.saved_generation = self.canvas_state.dirty_generation;
    }

    pub fn update_name_from_path(&mut self) {
        if let Some(ref path) = self.path {
            self.name = name_from_path(path);
        }
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty() {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    // ------------------------------------------------------------------
    //  Editing
    // ------------------------------------------------------------------

    pub fn handle_pointer(&mut self, event: PointerEvent) -> ToolOutcome {
        self.tools.handle_pointer(&mut self.canvas_state, &mut self.history, event)
    }

    pub fn set_tool(&mut self, tool: Tool) -> ToolOutcome {
        self.tools.set_tool(tool, &mut self.canvas_state, &mut self.history)
    }

    pub fn undo(&mut self) -> bool {
        self.tools.commit_pending(&mut self.canvas_state);
        let undone = self.history.undo(&mut self.canvas_state);
        self.tools.sync_history(&self.history);
        if let Some(desc) = &undone {
            tracing::debug!("undo: {}", desc);
        }
        undone.is_some()
    }

    pub fn redo(&mut self) -> bool {
        self.tools.commit_pending(&mut self.canvas_state);
        let redone = self.history.redo(&mut self.canvas_state);
        self.tools.sync_history(&self.history);
        if let Some(desc) = &redone {
            tracing::debug!("redo: {}", desc);
        }
        redone.is_some()
    }

    pub fn copy(&mut self) -> bool {
        self.tools.commit_pending(&mut self.canvas_state);
        self.clipboard.copy(&self.canvas_state)
    }

    pub fn cut(&mut self) -> bool {
        self.tools.commit_pending(&mut self.canvas_state);
        self.clipboard.cut(&mut self.canvas_state, &mut self.history)
    }

    /// Pastes and switches to the Move tool so the pasted cells can be
    /// dragged straight away.
    pub fn paste(&mut self) -> bool {
        self.tools.commit_pending(&mut self.canvas_state);
        if !self.clipboard.paste(&mut self.canvas_state, &mut self.history) {
            return false;
        }
        self.tools
            .set_tool_keep_selection(Tool::Move, &mut self.canvas_state, &mut self.history);
        true
    }

    /// Runs a menu-style command against the canvas after committing
    /// whatever the tools have floating.
    pub fn run_command<R>(&mut self, f: impl FnOnce(&mut CanvasState, &mut HistoryManager) -> R) -> R {
        self.tools.commit_pending(&mut self.canvas_state);
        f(&mut self.canvas_state, &mut self.history)
    }

    pub fn handle_hotkey(&mut self, combo: &KeyCombo) -> CommandOutcome {
        let Some(action) = self.keybindings.action_for(combo) else {
            return CommandOutcome::Unbound;
        };
        self.apply_action(action)
    }

    pub fn apply_action(&mut self, action: HotkeyAction) -> CommandOutcome {
        use HotkeyAction::*;

        if let Some(tool) = action.tool() {
            return CommandOutcome::Applied(self.set_tool(tool));
        }
        let changed = |ok: bool, outcome: ToolOutcome| {
            if ok { CommandOutcome::Applied(outcome) } else { CommandOutcome::Ignored }
        };
        match action {
            Save => CommandOutcome::SaveRequested,
            Export => CommandOutcome::ExportRequested,
            Undo => {
                let ok = self.undo();
                changed(ok, ToolOutcome::PixelsChanged)
            }
            Redo => {
                let ok = self.redo();
                changed(ok, ToolOutcome::PixelsChanged)
            }
            Copy => {
                let ok = self.copy();
                changed(ok, ToolOutcome::None)
            }
            Cut => {
                let ok = self.cut();
                changed(ok, ToolOutcome::PixelsChanged)
            }
            Paste => {
                let ok = self.paste();
                changed(ok, ToolOutcome::PixelsChanged)
            }
            SelectAll => {
                let ok = self.run_command(selection::select_all);
                changed(ok, ToolOutcome::SelectionChanged)
            }
            Deselect => {
                let ok = self.run_command(selection::deselect);
                changed(ok, ToolOutcome::SelectionChanged)
            }
            InvertSelection => {
                let ok = self.run_command(selection::invert_selection);
                changed(ok, ToolOutcome::SelectionChanged)
            }
            DeleteSelection => {
                let ok = self.run_command(selection::delete_selected);
                changed(ok, ToolOutcome::PixelsChanged)
            }
            ToggleGrid => {
                self.tools.viewport.show_grid = !self.tools.viewport.show_grid;
                CommandOutcome::Applied(ToolOutcome::ViewChanged)
            }
            ZoomIn => {
                self.tools.viewport.zoom_in();
                CommandOutcome::Applied(ToolOutcome::ViewChanged)
            }
            ZoomOut => {
                self.tools.viewport.zoom_out();
                CommandOutcome::Applied(ToolOutcome::ViewChanged)
            }
            ToolPencil | ToolEraser | ToolBucket | ToolPicker | ToolSelect | ToolWand | ToolLasso | ToolMove
            | ToolTransform | ToolHand => CommandOutcome::Ignored,
        }
    }
}

fn name_from_path(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Color;

    fn project() -> Project {
        let settings = EditorSettings { default_width: 4, default_height: 4, default_zoom: 10.0, ..Default::default() };
        Project::new_untitled(1, settings)
    }

    fn click(p: &mut Project, cx: i32, cy: i32) {
        let (x, y) = (cx as f32 * 10.0 + 5.0, cy as f32 * 10.0 + 5.0);
        p.handle_pointer(PointerEvent::down(x, y));
        p.handle_pointer(PointerEvent::up(x, y));
    }

    #[test]
    fn test_new_untitled_uses_settings() {
        let p = project();
        assert_eq!((p.canvas_state.width, p.canvas_state.height), (4, 4));
        assert_eq!(p.name, "Untitled-1");
        assert!(!p.is_dirty());
        assert_eq!(p.display_title(), "Untitled-1");
    }

    #[test]
    fn test_paint_undo_redo_via_hotkeys() {
        let mut p = project();
        click(&mut p, 1, 1);
        assert!(p.is_dirty());
        assert_eq!(p.display_title(), "Untitled-1*");
        assert_eq!(p.canvas_state.active_grid().unwrap().get(1, 1), Some(Some(Color::WHITE)));

        let undo = KeyCombo::ctrl_key("z");
        assert_eq!(p.handle_hotkey(&undo), CommandOutcome::Applied(ToolOutcome::PixelsChanged));
        assert_eq!(p.canvas_state.active_grid().unwrap().get(1, 1), Some(None));
        assert_eq!(p.handle_hotkey(&undo), CommandOutcome::Ignored);

        assert_eq!(p.handle_hotkey(&KeyCombo::ctrl_key("y")), CommandOutcome::Applied(ToolOutcome::PixelsChanged));
        assert_eq!(p.canvas_state.active_grid().unwrap().get(1, 1), Some(Some(Color::WHITE)));
    }

    #[test]
    fn test_host_actions_are_returned() {
        let mut p = project();
        assert_eq!(p.handle_hotkey(&KeyCombo::ctrl_key("s")), CommandOutcome::SaveRequested);
        assert_eq!(p.handle_hotkey(&KeyCombo::ctrl_key("e")), CommandOutcome::ExportRequested);
        assert_eq!(p.handle_hotkey(&KeyCombo::key("q")), CommandOutcome::Unbound);
    }

    #[test]
    fn test_tool_hotkey_and_grid_toggle() {
        let mut p = project();
        p.handle_hotkey(&KeyCombo::key("w"));
        assert_eq!(p.tools.active_tool(), Tool::MagicWand);
        let before = p.tools.viewport.show_grid;
        p.handle_hotkey(&KeyCombo::ctrl_key("'"));
        assert_eq!(p.tools.viewport.show_grid, !before);
    }

    #[test]
    fn test_paste_selects_and_switches_to_move() {
        let mut p = project();
        click(&mut p, 0, 0);
        assert!(p.apply_action(HotkeyAction::SelectAll) != CommandOutcome::Ignored);
        assert!(p.copy());
        assert!(p.paste());
        assert_eq!(p.tools.active_tool(), Tool::Move);
        assert!(p.canvas_state.has_selection());
    }

    #[test]
    fn test_paste_from_magic_wand_keeps_pasted_selection() {
        let mut p = project();
        click(&mut p, 1, 1);
        p.apply_action(HotkeyAction::SelectAll);
        assert!(p.copy());
        p.tools.set_tool_keep_selection(Tool::MagicWand, &mut p.canvas_state, &mut p.history);
        let steps = p.history.undo_count();

        assert!(p.paste());
        assert_eq!(p.tools.active_tool(), Tool::Move);
        assert!(p.canvas_state.has_selection());
        assert_eq!(p.history.undo_count(), steps + 1);
    }

    #[test]
    fn test_new_project_confirmation_gate() {
        let mut p = project();
        click(&mut p, 0, 0);
        let id = p.id;
        assert!(!p.new_project_with_confirm(8, 8, |_| false));
        assert_eq!(p.id, id);
        assert_eq!(p.canvas_state.width, 4);

        assert!(p.new_project_with_confirm(8, 8, |proj| proj.is_dirty()));
        assert_eq!(p.canvas_state.width, 8);
        assert!(!p.is_dirty());
        assert_eq!(p.history.undo_count(), 0);
    }

    #[test]
    fn test_save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sprite.json");
        let mut p = project();
        assert!(p.save(None).is_err());
        click(&mut p, 2, 3);
        p.save(Some(&path)).unwrap();
        assert!(!p.is_dirty());
        assert_eq!(p.name, "sprite.json");

        let mut other = project();
        click(&mut other, 0, 0);
        other.open(&path).unwrap();
        assert_eq!(other.canvas_state.active_grid().unwrap().get(2, 3), Some(Some(Color::WHITE)));
        assert_eq!(other.history.undo_count(), 0);
        assert!(!other.is_dirty());

        let before = other.canvas_state.frames.clone();
        assert!(other.open(&dir.path().join("missing.json")).is_err());
        assert_eq!(other.canvas_state.frames, before);
    }
}
