// ============================================================================
// TRANSFORM OPERATIONS — free transform of a lifted region, whole-layer rotate/scale
// ============================================================================

use rayon::prelude::*;

use crate::canvas::{CanvasState, PixelGrid, ScreenPos, SelectionMask, Viewport};
use crate::components::history::HistoryManager;

/// Scales below this are treated as degenerate and draw nothing.
const MIN_SCALE: f64 = 1e-6;

/// Rounds half-way values toward positive infinity, so `-0.5` maps to cell 0.
#[inline]
fn round_half_up(v: f64) -> i32 {
    (v + 0.5).floor() as i32
}

// ---------------------------------------------------------------------------
//  Interactive transform state
// ---------------------------------------------------------------------------

/// Affine parameters of the floating region. `x`/`y` is the top-left of the
/// scaled box in canvas cells; `width`/`height` are the source size and never
/// change during a transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransformParams {
    pub x: f64,
    pub y: f64,
    pub width: u32,
    pub height: u32,
    /// Radians, clockwise on screen.
    pub rotation: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl TransformParams {
    /// Box centre in canvas cells.
    pub fn center(&self) -> (f64, f64) {
        (
            self.x + self.width as f64 * self.scale_x / 2.0,
            self.y + self.height as f64 * self.scale_y / 2.0,
        )
    }
}

/// Lifted pixels plus the parameters that place them. Treated as an
/// immutable value: every gesture step builds a new one via `with_params`.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformState {
    pub params: TransformParams,
    pub source_pixels: PixelGrid,
    pub source_mask: SelectionMask,
}

/// Which part of the transform box the pointer grabbed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformHandle {
    Move,
    Rotate,
    /// 0 = top-left, 1 = top-right, 2 = bottom-right, 3 = bottom-left.
    Corner(usize),
}

/// Screen-space handle positions for hit-testing and overlay drawing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HandleLayout {
    pub center: (f64, f64),
    pub rotate: (f64, f64),
    pub corners: [(f64, f64); 4],
}

impl TransformState {
    /// Lifts the content to transform out of `grid`.
    ///
    /// The region is the selection, or the whole canvas when there is none.
    /// The source box is the tight bounds of non-empty cells inside that
    /// region. Returns the new state and the grid with the lifted cells
    /// cleared, or `None` when the region holds no pixels.
    pub fn lift(grid: &PixelGrid, selection: Option<&SelectionMask>) -> Option<(TransformState, PixelGrid)> {
        let bounds = grid.content_bounds(selection)?;
        let (w, h) = (grid.width(), grid.height());

        let mut lift_mask = SelectionMask::new(w, h);
        for y in bounds.y..bounds.y + bounds.height {
            for x in bounds.x..bounds.x + bounds.width {
                let inside = selection.is_none_or(|m| m.get(x as i32, y as i32));
                lift_mask.set(x as i32, y as i32, inside);
            }
        }

        let (cut, floating) = grid.extract_selected(&lift_mask);
        let state = TransformState {
            params: TransformParams {
                x: bounds.x as f64,
                y: bounds.y as f64,
                width: bounds.width,
                height: bounds.height,
                rotation: 0.0,
                scale_x: 1.0,
                scale_y: 1.0,
            },
            source_pixels: floating.crop(bounds),
            source_mask: lift_mask.crop(bounds),
        };
        Some((state, cut))
    }

    pub fn source_width(&self) -> u32 {
        self.source_pixels.width()
    }

    pub fn source_height(&self) -> u32 {
        self.source_pixels.height()
    }

    pub fn with_params(&self, params: TransformParams) -> Self {
        Self {
            params,
            source_pixels: self.source_pixels.clone(),
            source_mask: self.source_mask.clone(),
        }
    }

    fn inverse_map(&self) -> Option<InverseMap> {
        let p = &self.params;
        if p.scale_x.abs() < MIN_SCALE || p.scale_y.abs() < MIN_SCALE {
            return None;
        }
        let (cx, cy) = p.center();
        Some(InverseMap {
            cos: p.rotation.cos(),
            sin: p.rotation.sin(),
            cx,
            cy,
            scale_x: p.scale_x,
            scale_y: p.scale_y,
            src_w: self.source_width() as i32,
            src_h: self.source_height() as i32,
        })
    }

    /// Draws the transformed source over `base`. Every destination cell is
    /// mapped back into the source with nearest-neighbour sampling; only
    /// non-empty source cells are written.
    pub fn rasterize(&self, base: &PixelGrid) -> PixelGrid {
        let Some(map) = self.inverse_map() else {
            return base.clone();
        };
        let src = &self.source_pixels;
        PixelGrid::from_fn_par(base.width(), base.height(), |x, y| {
            let sampled = map
                .source_cell(x, y)
                .and_then(|(sx, sy)| src.get(sx, sy).flatten());
            sampled.or_else(|| base.get(x as i32, y as i32).flatten())
        })
    }

    /// The source mask pushed through the same mapping onto an empty mask.
    pub fn rasterize_mask(&self, width: u32, height: u32) -> SelectionMask {
        let Some(map) = self.inverse_map() else {
            return SelectionMask::new(width, height);
        };
        let mut bits = vec![false; width as usize * height as usize];
        bits.par_chunks_mut(width.max(1) as usize).enumerate().for_each(|(y, row)| {
            for (x, bit) in row.iter_mut().enumerate() {
                *bit = map
                    .source_cell(x as u32, y as u32)
                    .is_some_and(|(sx, sy)| self.source_mask.get(sx, sy));
            }
        });
        SelectionMask::from_bits(width, height, bits)
    }

    pub fn handle_layout(&self, viewport: &Viewport, rotate_offset: f64) -> HandleLayout {
        let p = &self.params;
        let zoom = viewport.zoom as f64;
        let (ccx, ccy) = p.center();
        let center = viewport.canvas_to_screen(ccx, ccy);
        let (sin, cos) = p.rotation.sin_cos();
        let place = |lx: f64, ly: f64| (lx * cos - ly * sin + center.0, lx * sin + ly * cos + center.1);

        let hw = p.width as f64 * p.scale_x * zoom / 2.0;
        let hh = p.height as f64 * p.scale_y * zoom / 2.0;
        let top = -(p.height as f64 / 2.0 + rotate_offset) * p.scale_y * zoom;

        HandleLayout {
            center,
            rotate: place(0.0, top),
            corners: [place(-hw, -hh), place(hw, -hh), place(hw, hh), place(-hw, hh)],
        }
    }

    /// Rotate handle first, then corners, then the box body.
    pub fn hit_test(
        &self,
        pos: ScreenPos,
        viewport: &Viewport,
        radius: f64,
        rotate_offset: f64,
    ) -> Option<TransformHandle> {
        let layout = self.handle_layout(viewport, rotate_offset);
        let (px, py) = (pos.x as f64, pos.y as f64);
        let near = |(hx, hy): (f64, f64)| ((px - hx).powi(2) + (py - hy).powi(2)).sqrt() <= radius;

        if near(layout.rotate) {
            return Some(TransformHandle::Rotate);
        }
        if let Some(i) = layout.corners.iter().position(|c| near(*c)) {
            return Some(TransformHandle::Corner(i));
        }

        let p = &self.params;
        let zoom = viewport.zoom as f64;
        let (dx, dy) = (px - layout.center.0, py - layout.center.1);
        let (sin, cos) = p.rotation.sin_cos();
        let lx = dx * cos + dy * sin;
        let ly = -dx * sin + dy * cos;
        let hw = (p.width as f64 * p.scale_x * zoom / 2.0).abs();
        let hh = (p.height as f64 * p.scale_y * zoom / 2.0).abs();
        if lx.abs() <= hw && ly.abs() <= hh {
            return Some(TransformHandle::Move);
        }
        None
    }
}

#[derive(Clone, Copy)]
struct InverseMap {
    cos: f64,
    sin: f64,
    cx: f64,
    cy: f64,
    scale_x: f64,
    scale_y: f64,
    src_w: i32,
    src_h: i32,
}

impl InverseMap {
    #[inline]
    fn source_cell(&self, x: u32, y: u32) -> Option<(i32, i32)> {
        let dx = x as f64 - self.cx;
        let dy = y as f64 - self.cy;
        let rx = dx * self.cos + dy * self.sin;
        let ry = -dx * self.sin + dy * self.cos;
        let sx = round_half_up(rx / self.scale_x + self.src_w as f64 / 2.0);
        let sy = round_half_up(ry / self.scale_y + self.src_h as f64 / 2.0);
        (sx >= 0 && sy >= 0 && sx < self.src_w && sy < self.src_h).then_some((sx, sy))
    }
}

/// Parameters after dragging `handle` from `start_pointer` to `pointer`.
/// Always derived from the parameters captured at gesture start, so
/// repeated move events never accumulate rounding drift.
pub fn drag_params(
    handle: TransformHandle,
    start: &TransformParams,
    start_pointer: ScreenPos,
    pointer: ScreenPos,
    viewport: &Viewport,
) -> TransformParams {
    let zoom = viewport.zoom as f64;
    let (ccx, ccy) = start.center();
    let (cx, cy) = viewport.canvas_to_screen(ccx, ccy);
    let (sx, sy) = (start_pointer.x as f64, start_pointer.y as f64);
    let (px, py) = (pointer.x as f64, pointer.y as f64);

    match handle {
        TransformHandle::Move => TransformParams {
            x: start.x + (px - sx) / zoom,
            y: start.y + (py - sy) / zoom,
            ..*start
        },
        TransformHandle::Rotate => {
            let a0 = (sy - cy).atan2(sx - cx);
            let a1 = (py - cy).atan2(px - cx);
            TransformParams { rotation: start.rotation + a1 - a0, ..*start }
        }
        TransformHandle::Corner(_) => {
            let d0 = ((sx - cx).powi(2) + (sy - cy).powi(2)).sqrt();
            if d0 < 1e-9 {
                return *start;
            }
            let d1 = ((px - cx).powi(2) + (py - cy).powi(2)).sqrt();
            let ratio = d1 / d0;
            TransformParams {
                scale_x: start.scale_x * ratio,
                scale_y: start.scale_y * ratio,
                ..*start
            }
        }
    }
}

// ---------------------------------------------------------------------------
//  Whole-layer transforms
// ---------------------------------------------------------------------------

/// Rotation and scale about the canvas centre, as entered in a dialog.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerTransform {
    pub rotation_degrees: f64,
    /// 100 = unchanged.
    pub scale_x_percent: f64,
    pub scale_y_percent: f64,
}

impl Default for LayerTransform {
    fn default() -> Self {
        Self { rotation_degrees: 0.0, scale_x_percent: 100.0, scale_y_percent: 100.0 }
    }
}

impl LayerTransform {
    fn is_degenerate(&self) -> bool {
        (self.scale_x_percent / 100.0).abs() < MIN_SCALE || (self.scale_y_percent / 100.0).abs() < MIN_SCALE
    }
}

/// Nearest-neighbour inverse mapping of a whole grid. Cells that map outside
/// the source come out empty.
pub fn transform_grid(grid: &PixelGrid, t: &LayerTransform) -> PixelGrid {
    let (w, h) = (grid.width(), grid.height());
    let cx = w as f64 / 2.0;
    let cy = h as f64 / 2.0;
    let (sin, cos) = (-t.rotation_degrees.to_radians()).sin_cos();
    let sx = t.scale_x_percent / 100.0;
    let sy = t.scale_y_percent / 100.0;

    PixelGrid::from_fn_par(w, h, |x, y| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let rx = cos * dx - sin * dy;
        let ry = sin * dx + cos * dy;
        let src_x = round_half_up(rx / sx + cx);
        let src_y = round_half_up(ry / sy + cy);
        grid.get(src_x, src_y).flatten()
    })
}

/// Applies `t` to one layer of the current frame. One history step, none
/// when the layer is hidden, locked or comes out unchanged.
pub fn transform_layer(
    state: &mut CanvasState,
    history: &mut HistoryManager,
    layer_id: &crate::canvas::LayerId,
    t: &LayerTransform,
) -> bool {
    if t.is_degenerate() {
        tracing::warn!("rejecting degenerate layer transform {:?}", t);
        return false;
    }
    if !layer_editable(state, layer_id) {
        return false;
    }
    let Some(grid) = state.current_frame().and_then(|f| f.grid(layer_id)) else {
        return false;
    };
    let result = transform_grid(grid, t);
    if &result == grid {
        return false;
    }
    history.record("Transform Layer", state);
    if let Some(g) = state.current_frame_mut().and_then(|f| f.grid_mut(layer_id)) {
        *g = result;
    }
    state.mark_dirty();
    true
}

fn layer_editable(state: &CanvasState, id: &crate::canvas::LayerId) -> bool {
    state.layers.iter().any(|l| &l.id == id && l.is_editable())
}

/// Applies `t` to every visible, unlocked layer of the current frame. One
/// history step, none when no layer changes.
pub fn transform_frame(state: &mut CanvasState, history: &mut HistoryManager, t: &LayerTransform) -> bool {
    if t.is_degenerate() {
        tracing::warn!("rejecting degenerate frame transform {:?}", t);
        return false;
    }
    let Some(frame) = state.current_frame() else {
        return false;
    };
    let results: Vec<_> = frame
        .layers
        .iter()
        .filter(|(id, _)| layer_editable(state, id))
        .filter_map(|(id, grid)| {
            let out = transform_grid(grid, t);
            (&out != grid).then(|| (id.clone(), out))
        })
        .collect();
    if results.is_empty() {
        return false;
    }
    history.record("Transform Frame", state);
    if let Some(frame) = state.current_frame_mut() {
        for (id, grid) in results {
            frame.layers.insert(id, grid);
        }
    }
    state.mark_dirty();
    true
}
