// ============================================================================
// CANVAS-LEVEL OPERATIONS — layers, frames, resize, colour replace
// ============================================================================
//
// Every mutating function records one history step before it mutates, and
// returns `false` without recording when the request is rejected (last layer,
// index out of range, size below 1x1, nothing would change).

use crate::canvas::{CanvasState, Cell, Frame, Layer, LayerId, MAX_CANVAS_DIM, PixelGrid};
use crate::components::history::HistoryManager;

// ---------------------------------------------------------------------------
//  Layers
// ---------------------------------------------------------------------------

/// Append a new empty layer on top and make it active. Every frame gets an
/// empty grid for it.
pub fn add_layer(state: &mut CanvasState, history: &mut HistoryManager) -> LayerId {
    history.record("Add Layer", state);
    let layer = Layer::new(format!("Layer {}", state.layers.len() + 1));
    let id = layer.id.clone();
    let (w, h) = (state.width, state.height);
    for frame in &mut state.frames {
        frame.layers.insert(id.clone(), PixelGrid::new(w, h));
    }
    state.layers.push(layer);
    state.active_layer_id = id.clone();
    state.mark_dirty();
    id
}

/// Duplicate the active layer directly above itself, in every frame.
pub fn duplicate_layer(state: &mut CanvasState, history: &mut HistoryManager) -> Option<LayerId> {
    let idx = state.active_layer_index()?;
    history.record("Duplicate Layer", state);

    let src = &state.layers[idx];
    let mut dup = Layer::new(format!("{} Copy", src.name));
    dup.visible = src.visible;
    dup.locked = src.locked;
    dup.opacity = src.opacity;
    let src_id = src.id.clone();
    let new_id = dup.id.clone();
    let (w, h) = (state.width, state.height);

    for frame in &mut state.frames {
        let grid = frame.grid(&src_id).cloned().unwrap_or_else(|| PixelGrid::new(w, h));
        frame.layers.insert(new_id.clone(), grid);
    }
    state.layers.insert(idx + 1, dup);
    state.active_layer_id = new_id.clone();
    state.mark_dirty();
    Some(new_id)
}

/// Delete a layer and its grid in every frame (must keep at least one layer).
/// If the active layer goes, the top-most remaining layer becomes active.
pub fn remove_layer(state: &mut CanvasState, history: &mut HistoryManager, id: &LayerId) -> bool {
    if state.layers.len() <= 1 {
        return false;
    }
    let Some(idx) = state.layer_index(id) else { return false };
    history.record("Delete Layer", state);

    state.layers.remove(idx);
    for frame in &mut state.frames {
        frame.layers.remove(id);
    }
    if &state.active_layer_id == id
        && let Some(top) = state.layers.last()
    {
        state.active_layer_id = top.id.clone();
    }
    state.mark_dirty();
    true
}

/// Move the layer at `from` to position `to` (0 = bottom).
pub fn move_layer(state: &mut CanvasState, history: &mut HistoryManager, from: usize, to: usize) -> bool {
    let len = state.layers.len();
    if from >= len || to >= len || from == to {
        return false;
    }
    history.record("Move Layer", state);
    let layer = state.layers.remove(from);
    state.layers.insert(to, layer);
    state.mark_dirty();
    true
}

/// Metadata edits that each count as one undoable step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerUpdate {
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub locked: Option<bool>,
}

pub fn update_layer(state: &mut CanvasState, history: &mut HistoryManager, id: &LayerId, update: LayerUpdate) -> bool {
    let Some(idx) = state.layer_index(id) else { return false };
    let current = &state.layers[idx];
    let changes = update.name.as_ref().is_some_and(|n| *n != current.name)
        || update.visible.is_some_and(|v| v != current.visible)
        || update.locked.is_some_and(|l| l != current.locked);
    if !changes {
        return false;
    }
    history.record("Layer Properties", state);
    let layer = &mut state.layers[idx];
    if let Some(name) = update.name {
        layer.name = name;
    }
    if let Some(visible) = update.visible {
        layer.visible = visible;
    }
    if let Some(locked) = update.locked {
        layer.locked = locked;
    }
    state.mark_dirty();
    true
}

/// Opacity is adjusted continuously from a slider and is not recorded.
pub fn set_layer_opacity(state: &mut CanvasState, id: &LayerId, opacity: f32) -> bool {
    let Some(idx) = state.layer_index(id) else { return false };
    state.layers[idx].opacity = opacity.clamp(0.0, 1.0);
    state.mark_dirty();
    true
}

pub fn set_active_layer(state: &mut CanvasState, id: &LayerId) -> bool {
    if state.layer_index(id).is_none() {
        return false;
    }
    state.active_layer_id = id.clone();
    true
}

/// Paint the layer onto the one below it in every frame (empty cells never
/// erase), then delete it. The lower layer becomes active.
pub fn merge_down(state: &mut CanvasState, history: &mut HistoryManager, id: &LayerId) -> bool {
    let Some(idx) = state.layer_index(id) else { return false };
    if idx == 0 {
        return false;
    }
    history.record("Merge Down", state);

    let lower_id = state.layers[idx - 1].id.clone();
    for frame in &mut state.frames {
        let Some(upper) = frame.layers.remove(id) else {
            tracing::warn!("merge down: frame {} has no grid for {}", frame.id.0, id);
            continue;
        };
        match frame.grid_mut(&lower_id) {
            Some(lower) => lower.merge(&upper, 0, 0),
            None => {
                tracing::warn!("merge down: frame {} has no grid for {}", frame.id.0, lower_id);
                frame.layers.insert(lower_id.clone(), upper);
            }
        }
    }
    state.layers.remove(idx);
    state.active_layer_id = lower_id;
    state.mark_dirty();
    true
}

// ---------------------------------------------------------------------------
//  Frames
// ---------------------------------------------------------------------------

/// Append an empty frame and make it current. Returns its index.
pub fn add_frame(state: &mut CanvasState, history: &mut HistoryManager) -> usize {
    history.record("Add Frame", state);
    let frame = Frame::new(&state.layers, state.width, state.height);
    state.frames.push(frame);
    state.current_frame_index = state.frames.len() - 1;
    state.mark_dirty();
    state.current_frame_index
}

/// Insert a copy of frame `index` right after it and make the copy current.
pub fn duplicate_frame(state: &mut CanvasState, history: &mut HistoryManager, index: usize) -> bool {
    let Some(source) = state.frames.get(index) else { return false };
    let copy = source.duplicate();
    history.record("Duplicate Frame", state);
    state.frames.insert(index + 1, copy);
    state.current_frame_index = index + 1;
    state.mark_dirty();
    true
}

/// Delete frame `index` (never the last one). The frame before it becomes
/// current.
pub fn delete_frame(state: &mut CanvasState, history: &mut HistoryManager, index: usize) -> bool {
    if state.frames.len() <= 1 || index >= state.frames.len() {
        return false;
    }
    history.record("Delete Frame", state);
    state.frames.remove(index);
    state.current_frame_index = index.saturating_sub(1).min(state.frames.len() - 1);
    state.mark_dirty();
    true
}

pub fn select_frame(state: &mut CanvasState, index: usize) -> bool {
    if index >= state.frames.len() {
        return false;
    }
    state.current_frame_index = index;
    true
}

pub fn set_frame_delay(state: &mut CanvasState, history: &mut HistoryManager, index: usize, delay_ms: u32) -> bool {
    match state.frames.get(index) {
        Some(f) if f.delay != delay_ms => {}
        _ => return false,
    }
    history.record("Frame Delay", state);
    state.frames[index].delay = delay_ms;
    true
}

/// Step playback to the next frame, wrapping to the first.
pub fn advance_frame(state: &mut CanvasState) -> usize {
    if !state.frames.is_empty() {
        state.current_frame_index = (state.current_frame_index + 1) % state.frames.len();
    }
    state.current_frame_index
}

pub fn set_fps(state: &mut CanvasState, fps: u32) -> bool {
    if fps == 0 {
        return false;
    }
    state.fps = fps;
    true
}

// ---------------------------------------------------------------------------
//  Canvas
// ---------------------------------------------------------------------------

/// Resize every grid, keeping the top-left overlap. The active selection is
/// dropped since its shape no longer fits.
pub fn resize_canvas(state: &mut CanvasState, history: &mut HistoryManager, new_w: u32, new_h: u32) -> bool {
    if new_w < 1 || new_h < 1 || new_w > MAX_CANVAS_DIM || new_h > MAX_CANVAS_DIM {
        tracing::warn!("rejecting canvas resize to {}x{}", new_w, new_h);
        return false;
    }
    if new_w == state.width && new_h == state.height {
        return false;
    }
    history.record("Resize Canvas", state);
    for frame in &mut state.frames {
        for grid in frame.layers.values_mut() {
            *grid = grid.resized(new_w, new_h);
        }
    }
    state.width = new_w;
    state.height = new_h;
    state.clear_selection();
    state.mark_dirty();
    true
}

/// Swap every `from` cell of the active layer (current frame) for `to`.
pub fn replace_color(state: &mut CanvasState, history: &mut HistoryManager, from: Cell, to: Cell) -> bool {
    let Some(grid) = state.active_grid() else { return false };
    if from == to || !grid.cells().contains(&from) {
        return false;
    }
    history.record("Replace Color", state);
    if let Some(grid) = state.active_grid_mut() {
        grid.replace_color(from, to);
    }
    state.mark_dirty();
    true
}
