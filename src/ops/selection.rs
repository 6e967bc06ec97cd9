// ============================================================================
// SELECTION OPERATIONS — menu commands, saved selections, in-app clipboard
// ============================================================================

use crate::canvas::{CanvasState, PixelGrid, SelectionMask, SelectionMode};
use crate::components::history::HistoryManager;

/// Applies `shape` to the current selection with `mode`. An absent selection
/// counts as all-false, so `Add` and `Replace` behave alike there.
pub fn combine_selection(current: Option<&SelectionMask>, shape: SelectionMask, mode: SelectionMode) -> SelectionMask {
    match (current, mode) {
        (_, SelectionMode::Replace) | (None, SelectionMode::Add) => shape,
        (None, SelectionMode::Subtract | SelectionMode::Intersect) => SelectionMask::new(shape.width(), shape.height()),
        (Some(cur), _) => cur.combine(&shape, mode),
    }
}

/// Installs `mask` as one history step, unless it equals the current one.
fn replace_selection(
    state: &mut CanvasState,
    history: &mut HistoryManager,
    description: &str,
    mask: Option<SelectionMask>,
) -> bool {
    let normalized = mask.filter(|m| !m.is_empty());
    if normalized == state.selection_mask {
        return false;
    }
    history.record(description, state);
    state.set_selection(normalized);
    true
}

// ---------------------------------------------------------------------------
//  Menu commands
// ---------------------------------------------------------------------------

pub fn select_all(state: &mut CanvasState, history: &mut HistoryManager) -> bool {
    let full = SelectionMask::full(state.width, state.height);
    replace_selection(state, history, "Select All", Some(full))
}

pub fn deselect(state: &mut CanvasState, history: &mut HistoryManager) -> bool {
    replace_selection(state, history, "Deselect", None)
}

/// With no selection, inverting selects everything.
pub fn invert_selection(state: &mut CanvasState, history: &mut HistoryManager) -> bool {
    let inverted = match &state.selection_mask {
        Some(mask) => mask.inverted(),
        None => SelectionMask::full(state.width, state.height),
    };
    replace_selection(state, history, "Invert Selection", Some(inverted))
}

pub fn expand_selection(state: &mut CanvasState, history: &mut HistoryManager) -> bool {
    let Some(mask) = &state.selection_mask else { return false };
    let grown = mask.expanded();
    replace_selection(state, history, "Expand Selection", Some(grown))
}

pub fn contract_selection(state: &mut CanvasState, history: &mut HistoryManager) -> bool {
    let Some(mask) = &state.selection_mask else { return false };
    let shrunk = mask.contracted();
    replace_selection(state, history, "Contract Selection", Some(shrunk))
}

/// Empties the selected cells of the active layer in the current frame. The
/// selection itself stays.
pub fn delete_selected(state: &mut CanvasState, history: &mut HistoryManager) -> bool {
    if !state.is_active_layer_editable() {
        return false;
    }
    let Some(mask) = state.selection_mask.clone() else { return false };
    let Some(grid) = state.active_grid() else { return false };
    let (cut, floating) = grid.extract_selected(&mask);
    if floating.is_blank() {
        return false;
    }
    history.record("Delete Selection", state);
    if let Some(grid) = state.active_grid_mut() {
        *grid = cut;
    }
    state.mark_dirty();
    true
}

// ---------------------------------------------------------------------------
//  Saved selections
// ---------------------------------------------------------------------------

/// Stores the current selection under `name`, overwriting any previous slot.
/// Not an undoable step.
pub fn save_selection(state: &mut CanvasState, name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return false;
    }
    let Some(mask) = state.selection_mask.clone() else { return false };
    state.saved_selections.insert(name.to_string(), mask);
    state.mark_dirty();
    true
}

pub fn load_selection(state: &mut CanvasState, history: &mut HistoryManager, name: &str) -> bool {
    let Some(mask) = state.saved_selections.get(name).cloned() else { return false };
    if mask.width() != state.width || mask.height() != state.height {
        tracing::warn!("saved selection '{}' no longer matches the canvas size", name);
        return false;
    }
    replace_selection(state, history, "Load Selection", Some(mask))
}

pub fn delete_saved_selection(state: &mut CanvasState, name: &str) -> bool {
    let removed = state.saved_selections.remove(name).is_some();
    if removed {
        state.mark_dirty();
    }
    removed
}

// ---------------------------------------------------------------------------
//  Clipboard
// ---------------------------------------------------------------------------

/// Copied cells, cropped to the selection bounds, and where they came from.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipboardContents {
    pub pixels: PixelGrid,
    pub mask: SelectionMask,
    pub origin: (u32, u32),
}

/// Session-owned clipboard. Holds at most one copied region.
#[derive(Clone, Debug, Default)]
pub struct Clipboard {
    contents: Option<ClipboardContents>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<&ClipboardContents> {
        self.contents.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_none()
    }

    pub fn clear(&mut self) {
        self.contents = None;
    }

    /// Copies the selected cells of the active grid, or the whole grid when
    /// nothing is selected.
    pub fn copy(&mut self, state: &CanvasState) -> bool {
        let Some(grid) = state.active_grid() else { return false };
        let mask = state
            .selection_mask
            .clone()
            .unwrap_or_else(|| SelectionMask::full(state.width, state.height));
        let Some(bounds) = mask.bounds() else { return false };
        let (_, floating) = grid.extract_selected(&mask);
        self.contents = Some(ClipboardContents {
            pixels: floating.crop(bounds),
            mask: mask.crop(bounds),
            origin: (bounds.x, bounds.y),
        });
        tracing::debug!("copied {}x{} region at {:?}", bounds.width, bounds.height, (bounds.x, bounds.y));
        true
    }

    /// Copy, then empty the copied cells. One history step.
    pub fn cut(&mut self, state: &mut CanvasState, history: &mut HistoryManager) -> bool {
        if !state.is_active_layer_editable() || !self.copy(state) {
            return false;
        }
        let Some(contents) = &self.contents else { return false };
        let Some(grid) = state.active_grid() else { return false };
        let mask = placed_mask(contents, state.width, state.height);
        let (cut, _) = grid.extract_selected(&mask);
        if &cut == grid {
            return true;
        }
        history.record("Cut", state);
        if let Some(grid) = state.active_grid_mut() {
            *grid = cut;
        }
        state.mark_dirty();
        true
    }

    /// Merges the copied cells back at their original position and selects
    /// them. One history step.
    pub fn paste(&self, state: &mut CanvasState, history: &mut HistoryManager) -> bool {
        let Some(contents) = &self.contents else { return false };
        if !state.is_active_layer_editable() || state.active_grid().is_none() {
            return false;
        }
        history.record("Paste", state);
        let (ox, oy) = contents.origin;
        if let Some(grid) = state.active_grid_mut() {
            grid.merge(&contents.pixels, ox as i32, oy as i32);
        }
        let mask = placed_mask(contents, state.width, state.height);
        state.set_selection(Some(mask));
        state.mark_dirty();
        true
    }
}

/// The clipboard mask positioned on a `width × height` canvas.
fn placed_mask(contents: &ClipboardContents, width: u32, height: u32) -> SelectionMask {
    let mut out = SelectionMask::new(width, height);
    let (ox, oy) = contents.origin;
    for y in 0..contents.mask.height() as i32 {
        for x in 0..contents.mask.width() as i32 {
            if contents.mask.get(x, y) {
                out.set(x + ox as i32, y + oy as i32, true);
            }
        }
    }
    out
}
