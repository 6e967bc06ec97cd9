use std::collections::VecDeque;

use crate::canvas::{CanvasState, Frame, Layer, LayerId, SelectionMask};

/// Default number of undo steps kept.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

// ============================================================================
// CANVAS SNAPSHOT — full editing state at one point in time
// ============================================================================

/// Everything undo restores. Palettes, saved selections and playback rate
/// are document settings and deliberately left out.
///
/// Grids are copy-on-write, so capturing a snapshot shares pixel buffers
/// with the live state until one side is edited.
#[derive(Clone, Debug)]
pub struct CanvasSnapshot {
    pub frames: Vec<Frame>,
    pub layers: Vec<Layer>,
    pub width: u32,
    pub height: u32,
    pub active_layer_id: LayerId,
    pub current_frame_index: usize,
    pub selection_mask: Option<SelectionMask>,
}

impl CanvasSnapshot {
    pub fn capture(state: &CanvasState) -> Self {
        Self {
            frames: state.frames.clone(),
            layers: state.layers.clone(),
            width: state.width,
            height: state.height,
            active_layer_id: state.active_layer_id.clone(),
            current_frame_index: state.current_frame_index,
            selection_mask: state.selection_mask.clone(),
        }
    }

    pub fn restore_into(self, state: &mut CanvasState) {
        state.frames = self.frames;
        state.layers = self.layers;
        state.width = self.width;
        state.height = self.height;
        state.active_layer_id = self.active_layer_id;
        state.current_frame_index = self.current_frame_index;
        state.selection_mask = self.selection_mask;
        state.mark_dirty();
    }

    /// Rough upper bound; shared grids are counted once per snapshot.
    fn memory_bytes(&self) -> usize {
        let grids: usize = self
            .frames
            .iter()
            .flat_map(|f| f.layers.values())
            .map(|g| g.cells().len() * std::mem::size_of::<crate::canvas::Cell>())
            .sum();
        let mask = self.selection_mask.as_ref().map_or(0, |m| m.bits().len());
        grids + mask
    }
}

struct HistoryEntry {
    description: String,
    snapshot: CanvasSnapshot,
}

// ============================================================================
// HISTORY MANAGER — linear past / future stacks
// ============================================================================

/// Bounded linear undo/redo over full-state snapshots.
///
/// `past` runs oldest to newest; `future` runs newest to oldest, so its front
/// is the next redo. Recording clears `future`. Undo and redo bump
/// [`HistoryManager::version`] so the tool controller can drop any gesture
/// that was in flight.
pub struct HistoryManager {
    past: VecDeque<HistoryEntry>,
    future: VecDeque<HistoryEntry>,
    max_history_size: usize,
    version: u64,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            past: VecDeque::new(),
            future: VecDeque::new(),
            max_history_size: max_history_size.max(1),
            version: 0,
        }
    }

    /// Snapshot `state` as it is now, before the caller mutates it.
    pub fn record(&mut self, description: impl Into<String>, state: &CanvasState) {
        let description = description.into();
        tracing::debug!("history: record '{}'", description);
        self.future.clear();
        self.past.push_back(HistoryEntry {
            description,
            snapshot: CanvasSnapshot::capture(state),
        });
        while self.past.len() > self.max_history_size {
            self.past.pop_front();
        }
    }

    /// Restores the newest past entry. The live state moves to the front of
    /// `future`. Returns the undone step's description.
    pub fn undo(&mut self, state: &mut CanvasState) -> Option<String> {
        let entry = self.past.pop_back()?;
        let description = entry.description.clone();
        self.future.push_front(HistoryEntry {
            description: entry.description,
            snapshot: CanvasSnapshot::capture(state),
        });
        entry.snapshot.restore_into(state);
        self.version += 1;
        tracing::debug!("history: undo '{}'", description);
        Some(description)
    }

    /// Re-applies the front of `future`. The live state goes back on `past`.
    pub fn redo(&mut self, state: &mut CanvasState) -> Option<String> {
        let entry = self.future.pop_front()?;
        let description = entry.description.clone();
        self.past.push_back(HistoryEntry {
            description: entry.description,
            snapshot: CanvasSnapshot::capture(state),
        });
        while self.past.len() > self.max_history_size {
            self.past.pop_front();
        }
        entry.snapshot.restore_into(state);
        self.version += 1;
        tracing::debug!("history: redo '{}'", description);
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.past.back().map(|e| e.description.as_str())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.future.front().map(|e| e.description.as_str())
    }

    /// All undo descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<&str> {
        self.past.iter().rev().map(|e| e.description.as_str()).collect()
    }

    /// Undo `steps` times, stopping early when history runs out.
    pub fn undo_to(&mut self, steps: usize, state: &mut CanvasState) {
        for _ in 0..steps {
            if self.undo(state).is_none() {
                break;
            }
        }
    }

    /// Counter bumped by every undo, redo and clear.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn memory_usage(&self) -> usize {
        self.past
            .iter()
            .chain(self.future.iter())
            .map(|e| e.snapshot.memory_bytes())
            .sum()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
        self.version += 1;
    }

    pub fn undo_count(&self) -> usize {
        self.past.len()
    }

    pub fn redo_count(&self) -> usize {
        self.future.len()
    }

    pub fn max_history_size(&self) -> usize {
        self.max_history_size
    }
}
