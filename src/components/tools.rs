use crate::canvas::{CanvasState, CellPoint, Color, LayerId, PixelGrid, ScreenPos, SelectionMask, SelectionMode, Viewport};
use crate::components::history::HistoryManager;
use crate::ops::selection::combine_selection;
use crate::ops::transform::{TransformHandle, TransformParams, TransformState, drag_params};
use crate::settings::EditorSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Tool {
    #[default]
    Pencil,
    Eraser,
    Bucket,
    Picker,
    Select,
    MagicWand,
    Lasso,
    Move,
    Transform,
    Hand,
}

impl Tool {
    pub fn label(&self) -> &'static str {
        match self {
            Tool::Pencil => "Pencil",
            Tool::Eraser => "Eraser",
            Tool::Bucket => "Bucket",
            Tool::Picker => "Picker",
            Tool::Select => "Select",
            Tool::MagicWand => "Magic Wand",
            Tool::Lasso => "Lasso",
            Tool::Move => "Move",
            Tool::Transform => "Transform",
            Tool::Hand => "Hand",
        }
    }

    pub fn all() -> &'static [Tool] {
        &[
            Tool::Pencil,
            Tool::Eraser,
            Tool::Bucket,
            Tool::Picker,
            Tool::Select,
            Tool::MagicWand,
            Tool::Lasso,
            Tool::Move,
            Tool::Transform,
            Tool::Hand,
        ]
    }
}

/// Sub-mode of the Select tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SelectMode {
    /// Drag an axis-aligned rectangle.
    #[default]
    Box,
    /// Paint the mask with a round brush.
    Brush,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolProperties {
    pub primary_color: Color,
    pub secondary_color: Color,
    /// Raw RGB distance for the magic wand.
    pub wand_tolerance: f64,
    /// Radius of the selection brush, in cells.
    pub brush_radius: u32,
    pub select_mode: SelectMode,
}

impl Default for ToolProperties {
    fn default() -> Self {
        Self::from_settings(&EditorSettings::default())
    }
}

impl ToolProperties {
    pub fn from_settings(settings: &EditorSettings) -> Self {
        Self {
            primary_color: settings.primary_color,
            secondary_color: settings.secondary_color,
            wand_tolerance: settings.magic_wand_tolerance,
            brush_radius: settings.brush_select_radius,
            select_mode: SelectMode::Box,
        }
    }

    pub fn swap_colors(&mut self) {
        std::mem::swap(&mut self.primary_color, &mut self.secondary_color);
    }
}

// ---------------------------------------------------------------------------
//  Pointer input
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub alt: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers { shift: false, alt: false };

    /// shift = add, alt = subtract, both = intersect.
    pub fn selection_mode(&self) -> SelectionMode {
        match (self.shift, self.alt) {
            (true, true) => SelectionMode::Intersect,
            (true, false) => SelectionMode::Add,
            (false, true) => SelectionMode::Subtract,
            (false, false) => SelectionMode::Replace,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
}

/// One pointer event in screen space (relative to the canvas widget).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub phase: PointerPhase,
    pub pos: ScreenPos,
    pub modifiers: Modifiers,
}

impl PointerEvent {
    pub fn down(x: f32, y: f32) -> Self {
        Self { phase: PointerPhase::Down, pos: ScreenPos::new(x, y), modifiers: Modifiers::NONE }
    }

    pub fn moved(x: f32, y: f32) -> Self {
        Self { phase: PointerPhase::Move, ..Self::down(x, y) }
    }

    pub fn up(x: f32, y: f32) -> Self {
        Self { phase: PointerPhase::Up, ..Self::down(x, y) }
    }

    pub fn with_modifiers(self, modifiers: Modifiers) -> Self {
        Self { modifiers, ..self }
    }
}

/// What a handled event changed, so the host knows what to redraw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ToolOutcome {
    None,
    PixelsChanged,
    SelectionChanged,
    /// Only the in-progress overlay (box, lasso, floating pixels) moved.
    PreviewChanged,
    ColorPicked(Color),
    ViewChanged,
    TransformCommitted,
}

// ---------------------------------------------------------------------------
//  Gesture state
// ---------------------------------------------------------------------------

/// Phase of the current pointer gesture. Each event maps the current value
/// to the next one; nothing else holds gesture data.
#[derive(Clone, Debug, Default)]
enum Gesture {
    #[default]
    Idle,
    Painting {
        last_cell: CellPoint,
        value: Option<Color>,
        recorded: bool,
    },
    BoxSelect {
        start: CellPoint,
        end: CellPoint,
        mode: SelectionMode,
    },
    BrushSelect {
        last_cell: CellPoint,
        value: bool,
        recorded: bool,
    },
    Lasso {
        points: Vec<CellPoint>,
        mode: SelectionMode,
    },
    Moving {
        start: CellPoint,
        offset: (i32, i32),
        floating: PixelGrid,
        mask: SelectionMask,
        target: GridTarget,
    },
    Panning {
        last: ScreenPos,
    },
    TransformDrag {
        handle: TransformHandle,
        start_pointer: ScreenPos,
        start_params: TransformParams,
    },
}

/// The (frame, layer) grid a lifted buffer belongs to.
#[derive(Clone, Debug, PartialEq)]
struct GridTarget {
    frame: usize,
    layer: LayerId,
}

impl GridTarget {
    fn active(state: &CanvasState) -> Self {
        Self { frame: state.current_frame_index, layer: state.active_layer_id.clone() }
    }

    fn grid<'a>(&self, state: &'a CanvasState) -> Option<&'a PixelGrid> {
        state.frames.get(self.frame)?.grid(&self.layer)
    }

    fn grid_mut<'a>(&self, state: &'a mut CanvasState) -> Option<&'a mut PixelGrid> {
        state.frames.get_mut(self.frame)?.grid_mut(&self.layer)
    }
}

#[derive(Clone, Debug)]
struct TransformSession {
    transform: TransformState,
    target: GridTarget,
}

// ---------------------------------------------------------------------------
//  Controller
// ---------------------------------------------------------------------------

/// Pointer-driven editing state machine.
///
/// Every mutating gesture records exactly one history step, right before its
/// first real change. Whenever the history version moves (undo, redo,
/// clear), all transient state is dropped so no gesture outlives the pixels
/// it was lifted from.
#[derive(Clone, Debug)]
pub struct ToolController {
    active_tool: Tool,
    pub properties: ToolProperties,
    pub viewport: Viewport,
    gesture: Gesture,
    transform: Option<TransformSession>,
    seen_version: u64,
    handle_hit_radius: f64,
    rotate_handle_offset: f64,
    clear_selection_on_wand_exit: bool,
}

impl Default for ToolController {
    fn default() -> Self {
        Self::new(&EditorSettings::default())
    }
}

impl ToolController {
    pub fn new(settings: &EditorSettings) -> Self {
        Self {
            active_tool: Tool::default(),
            properties: ToolProperties::from_settings(settings),
            viewport: Viewport::with_zoom(settings.default_zoom),
            gesture: Gesture::Idle,
            transform: None,
            seen_version: 0,
            handle_hit_radius: settings.handle_hit_radius as f64,
            rotate_handle_offset: settings.rotate_handle_offset as f64,
            clear_selection_on_wand_exit: settings.clear_selection_on_wand_exit,
        }
    }

    pub fn active_tool(&self) -> Tool {
        self.active_tool
    }

    /// True while a pointer gesture is in progress.
    pub fn is_dragging(&self) -> bool {
        !matches!(self.gesture, Gesture::Idle)
    }

    /// The floating transform, if one is open.
    pub fn transform_state(&self) -> Option<&TransformState> {
        self.transform.as_ref().map(|s| &s.transform)
    }

    /// Drops every gesture and floating buffer when the history has moved
    /// since the last call. Returns whether anything was reset.
    pub fn sync_history(&mut self, history: &HistoryManager) -> bool {
        if history.version() == self.seen_version {
            return false;
        }
        self.seen_version = history.version();
        let had_transient = self.is_dragging() || self.transform.is_some();
        self.gesture = Gesture::Idle;
        self.transform = None;
        if had_transient {
            tracing::debug!("history moved to version {}, transient tool state dropped", self.seen_version);
        }
        had_transient
    }

    /// Switches tools. Leaving Transform commits the floating region, a
    /// pending move is merged where it is, and leaving the magic wand clears
    /// the selection when configured to.
    pub fn set_tool(&mut self, tool: Tool, state: &mut CanvasState, history: &mut HistoryManager) -> ToolOutcome {
        self.switch_tool(tool, state, history, self.clear_selection_on_wand_exit)
    }

    /// Like [`ToolController::set_tool`], but the current selection always
    /// survives the switch. Used after paste, where the pasted cells are the
    /// selection the next tool works on.
    pub fn set_tool_keep_selection(
        &mut self,
        tool: Tool,
        state: &mut CanvasState,
        history: &mut HistoryManager,
    ) -> ToolOutcome {
        self.switch_tool(tool, state, history, false)
    }

    fn switch_tool(
        &mut self,
        tool: Tool,
        state: &mut CanvasState,
        history: &mut HistoryManager,
        clear_wand_selection: bool,
    ) -> ToolOutcome {
        self.sync_history(history);
        if tool == self.active_tool {
            return ToolOutcome::None;
        }
        let mut outcome = self.commit_pending(state);

        if self.active_tool == Tool::MagicWand && clear_wand_selection && state.has_selection() {
            history.record("Deselect", state);
            state.clear_selection();
            if outcome == ToolOutcome::None {
                outcome = ToolOutcome::SelectionChanged;
            }
        }
        tracing::debug!("tool {} -> {}", self.active_tool.label(), tool.label());
        self.active_tool = tool;
        outcome
    }

    /// Finishes whatever is floating: merges a move at its current offset
    /// and rasterizes an open transform. Unfinished box and lasso drags are
    /// discarded. Called before any command that edits the canvas outside
    /// the tool flow.
    pub fn commit_pending(&mut self, state: &mut CanvasState) -> ToolOutcome {
        let mut outcome = ToolOutcome::None;
        if let Gesture::Moving { offset, floating, mask, target, .. } = std::mem::take(&mut self.gesture) {
            finish_move(state, &floating, &mask, offset, &target);
            outcome = ToolOutcome::PixelsChanged;
        }
        if self.commit_transform(state) {
            outcome = ToolOutcome::TransformCommitted;
        }
        outcome
    }

    /// Feeds one pointer event through the state machine.
    pub fn handle_pointer(
        &mut self,
        state: &mut CanvasState,
        history: &mut HistoryManager,
        event: PointerEvent,
    ) -> ToolOutcome {
        self.sync_history(history);
        let gesture = std::mem::take(&mut self.gesture);
        let (next, outcome) = match event.phase {
            PointerPhase::Down => self.pointer_down(gesture, state, history, event),
            PointerPhase::Move => self.pointer_move(gesture, state, history, event),
            PointerPhase::Up => self.pointer_up(gesture, state, history, event),
        };
        self.gesture = next;
        outcome
    }

    fn pointer_down(
        &mut self,
        gesture: Gesture,
        state: &mut CanvasState,
        history: &mut HistoryManager,
        event: PointerEvent,
    ) -> (Gesture, ToolOutcome) {
        // A down while another gesture is still open (lost pointer-up) ends it first.
        let (_, mut outcome) = self.pointer_up(gesture, state, history, event);
        let cell = self.viewport.screen_to_cell(event.pos);
        let mode = event.modifiers.selection_mode();

        let next = match self.active_tool {
            Tool::Pencil | Tool::Eraser => {
                if !state.is_active_layer_editable() {
                    return (Gesture::Idle, outcome);
                }
                let value = match self.active_tool {
                    Tool::Eraser => None,
                    _ => Some(self.properties.primary_color),
                };
                let mut recorded = false;
                if paint_cell(state, history, cell, value, &mut recorded, self.active_tool.label()) {
                    outcome = ToolOutcome::PixelsChanged;
                }
                Gesture::Painting { last_cell: cell, value, recorded }
            }
            Tool::Bucket => {
                if bucket_fill(state, history, cell, Some(self.properties.primary_color)) {
                    outcome = ToolOutcome::PixelsChanged;
                }
                Gesture::Idle
            }
            Tool::Picker => {
                if let Some(Some(color)) = state.active_grid().and_then(|g| g.get(cell.x, cell.y)) {
                    self.properties.primary_color = color;
                    outcome = ToolOutcome::ColorPicked(color);
                }
                Gesture::Idle
            }
            Tool::Select => {
                if !in_canvas(state, cell) {
                    return (Gesture::Idle, outcome);
                }
                let outside = state.selection_mask.as_ref().is_some_and(|m| !m.get(cell.x, cell.y));
                if outside && mode == SelectionMode::Replace {
                    history.record("Deselect", state);
                    state.clear_selection();
                    return (Gesture::Idle, ToolOutcome::SelectionChanged);
                }
                match self.properties.select_mode {
                    SelectMode::Box => {
                        outcome = ToolOutcome::PreviewChanged;
                        Gesture::BoxSelect { start: cell, end: cell, mode }
                    }
                    SelectMode::Brush => {
                        let value = mode != SelectionMode::Subtract;
                        let mut recorded = false;
                        if self.brush_select(state, history, cell, value, &mut recorded) {
                            outcome = ToolOutcome::SelectionChanged;
                        }
                        Gesture::BrushSelect { last_cell: cell, value, recorded }
                    }
                }
            }
            Tool::Lasso => {
                outcome = ToolOutcome::PreviewChanged;
                Gesture::Lasso { points: vec![cell], mode }
            }
            Tool::MagicWand => {
                let Some(grid) = state.active_grid() else { return (Gesture::Idle, outcome) };
                if !grid.contains(cell.x, cell.y) {
                    return (Gesture::Idle, outcome);
                }
                let shape = SelectionMask::magic_wand(grid, cell.x, cell.y, self.properties.wand_tolerance);
                let combined = combine_selection(state.selection_mask.as_ref(), shape, mode);
                if apply_selection(state, history, "Magic Wand", combined) {
                    outcome = ToolOutcome::SelectionChanged;
                }
                Gesture::Idle
            }
            Tool::Move => match lift_selection(state, history) {
                Some((floating, mask, target)) => {
                    outcome = ToolOutcome::PixelsChanged;
                    Gesture::Moving { start: cell, offset: (0, 0), floating, mask, target }
                }
                None => Gesture::Idle,
            },
            Tool::Hand => Gesture::Panning { last: event.pos },
            Tool::Transform => {
                let (next, o) = self.transform_down(state, history, event);
                if o != ToolOutcome::None {
                    outcome = o;
                }
                next
            }
        };
        (next, outcome)
    }

    fn pointer_move(
        &mut self,
        gesture: Gesture,
        state: &mut CanvasState,
        history: &mut HistoryManager,
        event: PointerEvent,
    ) -> (Gesture, ToolOutcome) {
        let cell = self.viewport.screen_to_cell(event.pos);
        match gesture {
            Gesture::Idle => (Gesture::Idle, ToolOutcome::None),
            Gesture::Painting { last_cell, value, mut recorded } => {
                if cell == last_cell {
                    return (Gesture::Painting { last_cell, value, recorded }, ToolOutcome::None);
                }
                let mut changed = false;
                for c in line_cells(last_cell, cell).into_iter().skip(1) {
                    changed |= paint_cell(state, history, c, value, &mut recorded, self.active_tool.label());
                }
                let outcome = if changed { ToolOutcome::PixelsChanged } else { ToolOutcome::None };
                (Gesture::Painting { last_cell: cell, value, recorded }, outcome)
            }
            Gesture::BoxSelect { start, end, mode } => {
                let clamped = clamp_to_canvas(state, cell);
                let outcome = if clamped != end { ToolOutcome::PreviewChanged } else { ToolOutcome::None };
                (Gesture::BoxSelect { start, end: clamped, mode }, outcome)
            }
            Gesture::BrushSelect { last_cell, value, mut recorded } => {
                if cell == last_cell {
                    return (Gesture::BrushSelect { last_cell, value, recorded }, ToolOutcome::None);
                }
                let mut changed = false;
                for c in line_cells(last_cell, cell).into_iter().skip(1) {
                    changed |= self.brush_select(state, history, c, value, &mut recorded);
                }
                let outcome = if changed { ToolOutcome::SelectionChanged } else { ToolOutcome::None };
                (Gesture::BrushSelect { last_cell: cell, value, recorded }, outcome)
            }
            Gesture::Lasso { mut points, mode } => {
                let outcome = if points.last() != Some(&cell) {
                    points.push(cell);
                    ToolOutcome::PreviewChanged
                } else {
                    ToolOutcome::None
                };
                (Gesture::Lasso { points, mode }, outcome)
            }
            Gesture::Moving { start, offset, floating, mask, target } => {
                let next_offset = (cell.x - start.x, cell.y - start.y);
                let outcome = if next_offset != offset { ToolOutcome::PreviewChanged } else { ToolOutcome::None };
                (Gesture::Moving { start, offset: next_offset, floating, mask, target }, outcome)
            }
            Gesture::Panning { last } => {
                self.viewport.pan_by(event.pos.x - last.x, event.pos.y - last.y);
                (Gesture::Panning { last: event.pos }, ToolOutcome::ViewChanged)
            }
            Gesture::TransformDrag { handle, start_pointer, start_params } => {
                if let Some(session) = self.transform.as_mut() {
                    let params = drag_params(handle, &start_params, start_pointer, event.pos, &self.viewport);
                    session.transform = session.transform.with_params(params);
                }
                (Gesture::TransformDrag { handle, start_pointer, start_params }, ToolOutcome::PreviewChanged)
            }
        }
    }

    fn pointer_up(
        &mut self,
        gesture: Gesture,
        state: &mut CanvasState,
        history: &mut HistoryManager,
        event: PointerEvent,
    ) -> (Gesture, ToolOutcome) {
        let outcome = match gesture {
            Gesture::Idle
            | Gesture::Painting { .. }
            | Gesture::BrushSelect { .. }
            | Gesture::Panning { .. }
            | Gesture::TransformDrag { .. } => ToolOutcome::None,
            Gesture::BoxSelect { start, end, mode } => {
                let shape = SelectionMask::from_rect(state.width, state.height, start, end);
                let combined = combine_selection(state.selection_mask.as_ref(), shape, mode);
                if apply_selection(state, history, "Box Select", combined) {
                    ToolOutcome::SelectionChanged
                } else {
                    ToolOutcome::PreviewChanged
                }
            }
            Gesture::Lasso { mut points, mode } => {
                let cell = self.viewport.screen_to_cell(event.pos);
                if event.phase == PointerPhase::Up && points.last() != Some(&cell) {
                    points.push(cell);
                }
                if points.len() < 3 {
                    ToolOutcome::PreviewChanged
                } else {
                    let shape = SelectionMask::from_polygon(&points, state.width, state.height);
                    let combined = combine_selection(state.selection_mask.as_ref(), shape, mode);
                    if apply_selection(state, history, "Lasso Select", combined) {
                        ToolOutcome::SelectionChanged
                    } else {
                        ToolOutcome::PreviewChanged
                    }
                }
            }
            Gesture::Moving { offset, floating, mask, target, .. } => {
                finish_move(state, &floating, &mask, offset, &target);
                ToolOutcome::PixelsChanged
            }
        };
        (Gesture::Idle, outcome)
    }

    // -- Transform --------------------------------------------------------

    fn transform_down(
        &mut self,
        state: &mut CanvasState,
        history: &mut HistoryManager,
        event: PointerEvent,
    ) -> (Gesture, ToolOutcome) {
        let Some(session) = &self.transform else {
            return (Gesture::Idle, self.begin_transform(state, history));
        };
        let hit = session.transform.hit_test(
            event.pos,
            &self.viewport,
            self.handle_hit_radius,
            self.rotate_handle_offset,
        );
        match hit {
            Some(handle) => {
                let start_params = session.transform.params;
                (Gesture::TransformDrag { handle, start_pointer: event.pos, start_params }, ToolOutcome::None)
            }
            None => {
                self.commit_transform(state);
                (Gesture::Idle, ToolOutcome::TransformCommitted)
            }
        }
    }

    /// Lifts the selection (or the whole layer) into a floating transform.
    fn begin_transform(&mut self, state: &mut CanvasState, history: &mut HistoryManager) -> ToolOutcome {
        if !state.is_active_layer_editable() {
            return ToolOutcome::None;
        }
        let Some(grid) = state.active_grid() else { return ToolOutcome::None };
        let Some((transform, cut)) = TransformState::lift(grid, state.selection_mask.as_ref()) else {
            tracing::debug!("transform: nothing to lift");
            return ToolOutcome::None;
        };
        history.record("Transform", state);
        if let Some(grid) = state.active_grid_mut() {
            *grid = cut;
        }
        state.clear_selection();
        state.mark_dirty();
        tracing::debug!(
            "transform: lifted {}x{} at ({}, {})",
            transform.source_width(),
            transform.source_height(),
            transform.params.x,
            transform.params.y
        );
        self.transform = Some(TransformSession { transform, target: GridTarget::active(state) });
        ToolOutcome::PixelsChanged
    }

    /// Rasterizes the open transform into its grid and rebuilds the
    /// selection from the transformed source mask. Part of the history step
    /// recorded at lift time.
    fn commit_transform(&mut self, state: &mut CanvasState) -> bool {
        let Some(session) = self.transform.take() else { return false };
        if let Gesture::TransformDrag { .. } = self.gesture {
            self.gesture = Gesture::Idle;
        }
        let Some(grid) = session.target.grid(state) else {
            tracing::warn!("transform target grid for layer {} is gone", session.target.layer);
            return false;
        };
        let result = session.transform.rasterize(grid);
        if let Some(grid) = session.target.grid_mut(state) {
            *grid = result;
        }
        let mask = session.transform.rasterize_mask(state.width, state.height);
        state.set_selection(Some(mask));
        state.mark_dirty();
        true
    }

    fn brush_select(
        &self,
        state: &mut CanvasState,
        history: &mut HistoryManager,
        cell: CellPoint,
        value: bool,
        recorded: &mut bool,
    ) -> bool {
        let mask = SelectionMask::with_brush(
            state.selection_mask.as_ref(),
            state.width,
            state.height,
            cell.x,
            cell.y,
            self.properties.brush_radius,
            value,
        );
        let normalized = Some(mask).filter(|m| !m.is_empty());
        if normalized == state.selection_mask {
            return false;
        }
        if !*recorded {
            history.record("Brush Select", state);
            *recorded = true;
        }
        state.set_selection(normalized);
        true
    }

    // -- Preview ----------------------------------------------------------

    /// The active grid as it should be displayed mid-gesture: floating move
    /// or transform pixels drawn over it. `None` when nothing floats above
    /// the active grid.
    pub fn preview_grid(&self, state: &CanvasState) -> Option<PixelGrid> {
        let active = GridTarget::active(state);
        if let Gesture::Moving { offset, floating, target, .. } = &self.gesture
            && *target == active
        {
            let mut grid = target.grid(state)?.clone();
            grid.merge(floating, offset.0, offset.1);
            return Some(grid);
        }
        let session = self.transform.as_ref().filter(|s| s.target == active)?;
        Some(session.transform.rasterize(session.target.grid(state)?))
    }

    /// The selection as it should be displayed mid-gesture.
    pub fn preview_selection(&self, state: &CanvasState) -> Option<SelectionMask> {
        let current = state.selection_mask.as_ref();
        let preview = match &self.gesture {
            Gesture::BoxSelect { start, end, mode } => {
                let shape = SelectionMask::from_rect(state.width, state.height, *start, *end);
                Some(combine_selection(current, shape, *mode))
            }
            Gesture::Lasso { points, mode } if points.len() >= 3 => {
                let shape = SelectionMask::from_polygon(points, state.width, state.height);
                Some(combine_selection(current, shape, *mode))
            }
            Gesture::Moving { offset, mask, .. } => Some(mask.shifted(offset.0, offset.1)),
            _ => match &self.transform {
                Some(session) => Some(session.transform.rasterize_mask(state.width, state.height)),
                None => current.cloned(),
            },
        };
        preview.filter(|m| !m.is_empty())
    }

    /// Points of the lasso being drawn.
    pub fn lasso_points(&self) -> &[CellPoint] {
        match &self.gesture {
            Gesture::Lasso { points, .. } => points,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
//  Gesture helpers
// ---------------------------------------------------------------------------

fn in_canvas(state: &CanvasState, cell: CellPoint) -> bool {
    cell.x >= 0 && cell.y >= 0 && (cell.x as u32) < state.width && (cell.y as u32) < state.height
}

fn clamp_to_canvas(state: &CanvasState, cell: CellPoint) -> CellPoint {
    CellPoint::new(
        cell.x.clamp(0, state.width as i32 - 1),
        cell.y.clamp(0, state.height as i32 - 1),
    )
}

/// Writes one cell of the active grid when it is inside the canvas and the
/// selection, and differs from `value`. Records history on the first write.
fn paint_cell(
    state: &mut CanvasState,
    history: &mut HistoryManager,
    cell: CellPoint,
    value: Option<Color>,
    recorded: &mut bool,
    description: &str,
) -> bool {
    if state.selection_mask.as_ref().is_some_and(|m| !m.get(cell.x, cell.y)) {
        return false;
    }
    let Some(current) = state.active_grid().and_then(|g| g.get(cell.x, cell.y)) else {
        return false;
    };
    if current == value {
        return false;
    }
    if !*recorded {
        history.record(description, state);
        *recorded = true;
    }
    if let Some(grid) = state.active_grid_mut() {
        grid.set(cell.x, cell.y, value);
    }
    state.mark_dirty();
    true
}

fn bucket_fill(state: &mut CanvasState, history: &mut HistoryManager, cell: CellPoint, fill: Option<Color>) -> bool {
    if !state.is_active_layer_editable() {
        return false;
    }
    let mask = state.selection_mask.as_ref();
    if mask.is_some_and(|m| !m.get(cell.x, cell.y)) {
        return false;
    }
    let Some(grid) = state.active_grid() else { return false };
    let mut filled = grid.clone();
    if !filled.flood_fill(cell.x, cell.y, fill, mask) {
        return false;
    }
    history.record("Bucket Fill", state);
    if let Some(grid) = state.active_grid_mut() {
        *grid = filled;
    }
    state.mark_dirty();
    true
}

/// Installs a selection produced by a tool as one history step, skipping
/// results equal to the current selection.
fn apply_selection(state: &mut CanvasState, history: &mut HistoryManager, description: &str, mask: SelectionMask) -> bool {
    let normalized = Some(mask).filter(|m| !m.is_empty());
    if normalized == state.selection_mask {
        return false;
    }
    history.record(description, state);
    state.set_selection(normalized);
    true
}

/// Cuts the selected cells out of the active grid for the Move tool.
fn lift_selection(
    state: &mut CanvasState,
    history: &mut HistoryManager,
) -> Option<(PixelGrid, SelectionMask, GridTarget)> {
    if !state.is_active_layer_editable() {
        return None;
    }
    let mask = state.selection_mask.clone()?;
    let (cut, floating) = state.active_grid()?.extract_selected(&mask);
    history.record("Move Pixels", state);
    if let Some(grid) = state.active_grid_mut() {
        *grid = cut;
    }
    state.mark_dirty();
    Some((floating, mask, GridTarget::active(state)))
}

fn finish_move(state: &mut CanvasState, floating: &PixelGrid, mask: &SelectionMask, offset: (i32, i32), target: &GridTarget) {
    match target.grid_mut(state) {
        Some(grid) => grid.merge(floating, offset.0, offset.1),
        None => tracing::warn!("move target grid for layer {} is gone", target.layer),
    }
    state.set_selection(Some(mask.shifted(offset.0, offset.1)));
    state.mark_dirty();
}

/// Cells on the Bresenham line from `a` to `b`, both ends included.
fn line_cells(a: CellPoint, b: CellPoint) -> Vec<CellPoint> {
    let dx = (b.x - a.x).abs();
    let dy = -(b.y - a.y).abs();
    let sx = if a.x < b.x { 1 } else { -1 };
    let sy = if a.y < b.y { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (a.x, a.y);
    let mut out = Vec::with_capacity((dx - dy) as usize + 1);
    loop {
        out.push(CellPoint::new(x, y));
        if x == b.x && y == b.y {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
    out
}
