use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::RgbaImage;
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::components::colors::PaletteSet;

/// Frame delay used when a frame is created without an explicit one.
pub const DEFAULT_FRAME_DELAY_MS: u32 = 100;
/// Playback rate used when a document does not carry one.
pub const DEFAULT_FPS: u32 = 12;

/// Largest accepted canvas edge, in cells.
pub const MAX_CANVAS_DIM: u32 = 32_768;

/// Largest possible Euclidean RGB distance, `sqrt(255² × 3)`.
pub const MAX_COLOR_DISTANCE: f64 = 441.672_955_930_063_7;

// ============================================================================
// COLOR
// ============================================================================

/// Opaque 24-bit RGB colour. Transparency is expressed by an empty cell
/// (`None`), never by an alpha channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid colour {0:?}, expected #rrggbb")]
pub struct ParseColorError(pub String);

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb`, `rrggbb` or the short `#rgb` form, case-insensitively.
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.trim().trim_start_matches('#');
        if !hex.is_ascii() {
            return None;
        }
        match hex.len() {
            6 => {
                let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
                let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
                let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
                Some(Self::rgb(r, g, b))
            }
            3 => {
                let mut c = [0u8; 3];
                for (i, ch) in hex.chars().enumerate() {
                    let v = ch.to_digit(16)? as u8;
                    c[i] = v * 16 + v;
                }
                Some(Self::rgb(c[0], c[1], c[2]))
            }
            _ => None,
        }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Euclidean distance in RGB space, in the range `0..=MAX_COLOR_DISTANCE`.
    pub fn distance(&self, other: &Color) -> f64 {
        let dr = self.r as f64 - other.r as f64;
        let dg = self.g as f64 - other.g as f64;
        let db = self.b as f64 - other.b as f64;
        (dr * dr + dg * dg + db * db).sqrt()
    }

    pub fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, 255])
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Color::from_hex(s).ok_or_else(|| ParseColorError(s.to_string()))
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One grid cell: a colour, or `None` for transparent.
pub type Cell = Option<Color>;

// ============================================================================
// GEOMETRY HELPERS
// ============================================================================

/// Signed cell coordinate. Pointer positions may land outside the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct CellPoint {
    pub x: i32,
    pub y: i32,
}

impl CellPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle of cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CellRect {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridShapeError {
    #[error("grid has no rows")]
    Empty,
    #[error("row {row} has {found} cells, expected {expected}")]
    Jagged {
        row: usize,
        found: usize,
        expected: usize,
    },
}

fn check_rows<T>(rows: &[Vec<T>]) -> Result<(u32, u32), GridShapeError> {
    let expected = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.is_empty() || expected == 0 {
        return Err(GridShapeError::Empty);
    }
    for (row, r) in rows.iter().enumerate() {
        if r.len() != expected {
            return Err(GridShapeError::Jagged { row, found: r.len(), expected });
        }
    }
    Ok((expected as u32, rows.len() as u32))
}

// ============================================================================
// PIXEL GRID
// ============================================================================

/// `height × width` matrix of optional colours, stored row-major.
///
/// Cells live behind an `Arc` for copy-on-write: cloning a grid (history
/// snapshots, frame duplication) only bumps a reference count, and the first
/// mutation through `cells_mut` clones the buffer if it is shared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<Cell>>", into = "Vec<Vec<Cell>>")]
pub struct PixelGrid {
    width: u32,
    height: u32,
    cells: Arc<Vec<Cell>>,
}

impl PixelGrid {
    /// All-empty grid.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, None)
    }

    pub fn filled(width: u32, height: u32, cell: Cell) -> Self {
        Self {
            width,
            height,
            cells: Arc::new(vec![cell; width as usize * height as usize]),
        }
    }

    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Result<Self, GridShapeError> {
        let (width, height) = check_rows(&rows)?;
        let cells: Vec<Cell> = rows.into_iter().flatten().collect();
        Ok(Self { width, height, cells: Arc::new(cells) })
    }

    pub fn to_rows(&self) -> Vec<Vec<Cell>> {
        self.rows().map(|r| r.to_vec()).collect()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn rows(&self) -> std::slice::Chunks<'_, Cell> {
        self.cells.chunks(self.width.max(1) as usize)
    }

    fn cells_mut(&mut self) -> &mut Vec<Cell> {
        Arc::make_mut(&mut self.cells)
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if self.contains(x, y) {
            Some(y as usize * self.width as usize + x as usize)
        } else {
            None
        }
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    /// Cell at `(x, y)`, or `None` when out of bounds.
    pub fn get(&self, x: i32, y: i32) -> Option<Cell> {
        self.index(x, y).map(|i| self.cells[i])
    }

    /// Writes one cell. Returns `true` only if the stored value changed.
    pub fn set(&mut self, x: i32, y: i32, cell: Cell) -> bool {
        match self.index(x, y) {
            Some(i) if self.cells[i] != cell => {
                self.cells_mut()[i] = cell;
                true
            }
            _ => false,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.is_none())
    }

    /// 4-connected fill from `(x, y)`. Cells are eligible when they match the
    /// seed's value and, if a mask is given, lie inside it. Returns `true` if
    /// anything changed; filling with the seed's own value is a no-op.
    pub fn flood_fill(&mut self, x: i32, y: i32, fill: Cell, mask: Option<&SelectionMask>) -> bool {
        let Some(target) = self.get(x, y) else {
            return false;
        };
        if target == fill {
            return false;
        }
        if let Some(m) = mask
            && !m.get(x, y)
        {
            return false;
        }

        let w = self.width as i32;
        let h = self.height as i32;
        let mut visited = vec![false; self.cells.len()];
        let mut stack: Vec<(i32, i32)> = vec![(x, y)];
        let mut changed = false;
        let cells = self.cells_mut();

        while let Some((cx, cy)) = stack.pop() {
            if cx < 0 || cy < 0 || cx >= w || cy >= h {
                continue;
            }
            let idx = (cy * w + cx) as usize;
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            if cells[idx] != target {
                continue;
            }
            if let Some(m) = mask
                && !m.get(cx, cy)
            {
                continue;
            }
            cells[idx] = fill;
            changed = true;
            stack.push((cx + 1, cy));
            stack.push((cx - 1, cy));
            stack.push((cx, cy + 1));
            stack.push((cx, cy - 1));
        }
        changed
    }

    /// Replaces every cell equal to `from` with `to`. Either side may be empty.
    pub fn replace_color(&mut self, from: Cell, to: Cell) -> bool {
        if from == to || !self.cells.iter().any(|c| *c == from) {
            return false;
        }
        for c in self.cells_mut().iter_mut() {
            if *c == from {
                *c = to;
            }
        }
        true
    }

    /// Paints every non-empty overlay cell onto `self` at `(x + dx, y + dy)`.
    /// Empty overlay cells never erase; writes outside the grid are dropped.
    pub fn merge(&mut self, overlay: &PixelGrid, dx: i32, dy: i32) {
        let (w, h) = (self.width as i32, self.height as i32);
        let ow = overlay.width.max(1) as usize;
        let cells = self.cells_mut();
        for (i, cell) in overlay.cells.iter().enumerate() {
            let Some(color) = cell else { continue };
            let tx = (i % ow) as i32 + dx;
            let ty = (i / ow) as i32 + dy;
            if tx >= 0 && ty >= 0 && tx < w && ty < h {
                cells[(ty * w + tx) as usize] = Some(*color);
            }
        }
    }

    /// Lifts the masked cells out of the grid. Returns `(cut, floating)`: the
    /// grid with masked cells emptied, and a same-sized grid holding only the
    /// masked cells.
    pub fn extract_selected(&self, mask: &SelectionMask) -> (PixelGrid, PixelGrid) {
        let mut cut = self.clone();
        let mut floating = PixelGrid::new(self.width, self.height);
        {
            let cut_cells = cut.cells_mut();
            let float_cells = floating.cells_mut();
            for y in 0..self.height as i32 {
                for x in 0..self.width as i32 {
                    if mask.get(x, y) {
                        let i = (y as u32 * self.width + x as u32) as usize;
                        float_cells[i] = self.cells[i];
                        cut_cells[i] = None;
                    }
                }
            }
        }
        (cut, floating)
    }

    /// New grid of the given size holding the top-left overlap of `self`.
    pub fn resized(&self, width: u32, height: u32) -> PixelGrid {
        let mut out = PixelGrid::new(width, height);
        let copy_w = self.width.min(width) as usize;
        let copy_h = self.height.min(height) as usize;
        {
            let dst = out.cells_mut();
            for y in 0..copy_h {
                let src_row = y * self.width as usize;
                let dst_row = y * width as usize;
                dst[dst_row..dst_row + copy_w].copy_from_slice(&self.cells[src_row..src_row + copy_w]);
            }
        }
        out
    }

    /// Tight bounds of non-empty cells, optionally limited to a mask.
    pub fn content_bounds(&self, region: Option<&SelectionMask>) -> Option<CellRect> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut found = false;
        for (y, row) in self.rows().enumerate() {
            for (x, cell) in row.iter().enumerate() {
                if cell.is_none() {
                    continue;
                }
                if let Some(m) = region
                    && !m.get(x as i32, y as i32)
                {
                    continue;
                }
                found = true;
                min_x = min_x.min(x as u32);
                min_y = min_y.min(y as u32);
                max_x = max_x.max(x as u32);
                max_y = max_y.max(y as u32);
            }
        }
        found.then(|| CellRect {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        })
    }

    /// Copies `rect` out into a grid of its own size. Cells beyond the source
    /// bounds come back empty.
    pub fn crop(&self, rect: CellRect) -> PixelGrid {
        let mut out = PixelGrid::new(rect.width, rect.height);
        {
            let dst = out.cells_mut();
            for y in 0..rect.height {
                for x in 0..rect.width {
                    if let Some(cell) = self.get((rect.x + x) as i32, (rect.y + y) as i32) {
                        dst[(y * rect.width + x) as usize] = cell;
                    }
                }
            }
        }
        out
    }

    /// Builds a grid by evaluating `sample` for every cell, rows in parallel.
    pub fn from_fn_par<F>(width: u32, height: u32, sample: F) -> PixelGrid
    where
        F: Fn(u32, u32) -> Cell + Sync,
    {
        let mut cells = vec![None; width as usize * height as usize];
        cells
            .par_chunks_mut(width.max(1) as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, cell) in row.iter_mut().enumerate() {
                    *cell = sample(x as u32, y as u32);
                }
            });
        PixelGrid { width, height, cells: Arc::new(cells) }
    }
}

impl TryFrom<Vec<Vec<Cell>>> for PixelGrid {
    type Error = GridShapeError;

    fn try_from(rows: Vec<Vec<Cell>>) -> Result<Self, Self::Error> {
        PixelGrid::from_rows(rows)
    }
}

impl From<PixelGrid> for Vec<Vec<Cell>> {
    fn from(grid: PixelGrid) -> Self {
        grid.to_rows()
    }
}

// ============================================================================
// SELECTION SYSTEM
// ============================================================================

/// How a new selection shape interacts with the existing mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Discard the existing mask and use the new shape.
    #[default]
    Replace,
    /// Union with the existing mask.
    Add,
    /// Remove the new shape from the existing mask.
    Subtract,
    /// Keep only cells present in both.
    Intersect,
}

/// Boolean `height × width` matrix marking the selected cells.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<bool>>", into = "Vec<Vec<bool>>")]
pub struct SelectionMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl SelectionMask {
    /// All-false mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, bits: vec![false; width as usize * height as usize] }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self { width, height, bits: vec![true; width as usize * height as usize] }
    }

    pub fn from_rows(rows: Vec<Vec<bool>>) -> Result<Self, GridShapeError> {
        let (width, height) = check_rows(&rows)?;
        Ok(Self { width, height, bits: rows.into_iter().flatten().collect() })
    }

    pub fn to_rows(&self) -> Vec<Vec<bool>> {
        self.bits.chunks(self.width.max(1) as usize).map(|r| r.to_vec()).collect()
    }

    /// Inclusive rectangle between two corners given in any order, clipped to
    /// the canvas.
    pub fn from_rect(width: u32, height: u32, a: CellPoint, b: CellPoint) -> Self {
        let mut mask = Self::new(width, height);
        let x0 = a.x.min(b.x).max(0);
        let y0 = a.y.min(b.y).max(0);
        let x1 = a.x.max(b.x).min(width as i32 - 1);
        let y1 = a.y.max(b.y).min(height as i32 - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                mask.set(x, y, true);
            }
        }
        mask
    }

    /// Even-odd rasterization of a closed polygon. Only the polygon's
    /// bounding box (clipped to the canvas) is scanned. Fewer than three
    /// points yield an empty mask.
    pub fn from_polygon(points: &[CellPoint], width: u32, height: u32) -> Self {
        let mut mask = Self::new(width, height);
        if points.len() < 3 {
            return mask;
        }
        let min_x = points.iter().map(|p| p.x).min().unwrap_or(0).max(0);
        let max_x = points.iter().map(|p| p.x).max().unwrap_or(0).min(width as i32 - 1);
        let min_y = points.iter().map(|p| p.y).min().unwrap_or(0).max(0);
        let max_y = points.iter().map(|p| p.y).max().unwrap_or(0).min(height as i32 - 1);

        for y in min_y..=max_y {
            for x in min_x..=max_x {
                if point_in_polygon(x as f64, y as f64, points) {
                    mask.set(x, y, true);
                }
            }
        }
        mask
    }

    /// Copy of `base` (or an empty mask) with a disc of `radius` around
    /// `(cx, cy)` set to `value`.
    pub fn with_brush(
        base: Option<&SelectionMask>,
        width: u32,
        height: u32,
        cx: i32,
        cy: i32,
        radius: u32,
        value: bool,
    ) -> Self {
        let mut mask = match base {
            Some(m) if m.width == width && m.height == height => m.clone(),
            _ => Self::new(width, height),
        };
        // No disc needs to reach further than the canvas diagonal.
        let r = radius.min(width.saturating_add(height)) as i64;
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy <= r * r
                    && let (Ok(x), Ok(y)) = (i32::try_from(cx as i64 + dx), i32::try_from(cy as i64 + dy))
                {
                    mask.set(x, y, value);
                }
            }
        }
        mask
    }

    /// Connected region grown from the seed cell.
    ///
    /// An empty seed spreads across empty cells only. A coloured seed spreads
    /// across cells whose RGB distance to it is at most `tolerance` (a raw
    /// distance up to [`MAX_COLOR_DISTANCE`]); exact matches always qualify.
    pub fn magic_wand(grid: &PixelGrid, x: i32, y: i32, tolerance: f64) -> Self {
        let mut mask = Self::new(grid.width, grid.height);
        let Some(seed) = grid.get(x, y) else {
            return mask;
        };

        let w = grid.width as i32;
        let h = grid.height as i32;
        let mut visited = vec![false; grid.cells.len()];
        let mut stack = vec![(x, y)];

        while let Some((cx, cy)) = stack.pop() {
            if cx < 0 || cy < 0 || cx >= w || cy >= h {
                continue;
            }
            let idx = (cy * w + cx) as usize;
            if visited[idx] {
                continue;
            }
            visited[idx] = true;

            let matches = match (seed, grid.cells[idx]) {
                (None, None) => true,
                (Some(s), Some(c)) => c == s || s.distance(&c) <= tolerance,
                _ => false,
            };
            if !matches {
                continue;
            }
            mask.bits[idx] = true;
            stack.push((cx + 1, cy));
            stack.push((cx - 1, cy));
            stack.push((cx, cy + 1));
            stack.push((cx, cy - 1));
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    /// `false` for any coordinate outside the mask.
    #[inline]
    pub fn get(&self, x: i32, y: i32) -> bool {
        x >= 0
            && y >= 0
            && (x as u32) < self.width
            && (y as u32) < self.height
            && self.bits[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: i32, y: i32, value: bool) {
        if x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height {
            self.bits[y as usize * self.width as usize + x as usize] = value;
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|b| *b)
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    pub fn bounds(&self) -> Option<CellRect> {
        let w = self.width.max(1) as usize;
        let mut iter = self.bits.iter().enumerate().filter(|(_, b)| **b).map(|(i, _)| ((i % w) as u32, (i / w) as u32));
        let (fx, fy) = iter.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (fx, fy, fx, fy);
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Some(CellRect { x: min_x, y: min_y, width: max_x - min_x + 1, height: max_y - min_y + 1 })
    }

    pub fn inverted(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            bits: self.bits.iter().map(|b| !b).collect(),
        }
    }

    /// One step of 4-neighbour dilation.
    pub fn expanded(&self) -> Self {
        let mut out = self.clone();
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                if self.get(x, y) {
                    out.set(x + 1, y, true);
                    out.set(x - 1, y, true);
                    out.set(x, y + 1, true);
                    out.set(x, y - 1, true);
                }
            }
        }
        out
    }

    /// One step of 4-neighbour erosion. Out-of-bounds neighbours count as
    /// unselected, so selections touching the canvas edge shrink there too.
    pub fn contracted(&self) -> Self {
        let mut out = Self::new(self.width, self.height);
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                if self.get(x, y)
                    && self.get(x + 1, y)
                    && self.get(x - 1, y)
                    && self.get(x, y + 1)
                    && self.get(x, y - 1)
                {
                    out.set(x, y, true);
                }
            }
        }
        out
    }

    /// Translates the selected cells, dropping any that leave the canvas.
    pub fn shifted(&self, dx: i32, dy: i32) -> Self {
        let mut out = Self::new(self.width, self.height);
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                if self.get(x, y) {
                    out.set(x + dx, y + dy, true);
                }
            }
        }
        out
    }

    /// Merges `shape` into `self` according to `mode`.
    pub fn combine(&self, shape: &SelectionMask, mode: SelectionMode) -> Self {
        let mut out = Self::new(self.width, self.height);
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let a = self.get(x, y);
                let b = shape.get(x, y);
                let v = match mode {
                    SelectionMode::Replace => b,
                    SelectionMode::Add => a || b,
                    SelectionMode::Subtract => a && !b,
                    SelectionMode::Intersect => a && b,
                };
                out.set(x, y, v);
            }
        }
        out
    }

    pub fn crop(&self, rect: CellRect) -> Self {
        let mut out = Self::new(rect.width, rect.height);
        for y in 0..rect.height {
            for x in 0..rect.width {
                out.set(x as i32, y as i32, self.get((rect.x + x) as i32, (rect.y + y) as i32));
            }
        }
        out
    }

    pub(crate) fn from_bits(width: u32, height: u32, bits: Vec<bool>) -> Self {
        debug_assert_eq!(bits.len(), width as usize * height as usize);
        Self { width, height, bits }
    }
}

impl TryFrom<Vec<Vec<bool>>> for SelectionMask {
    type Error = GridShapeError;

    fn try_from(rows: Vec<Vec<bool>>) -> Result<Self, Self::Error> {
        SelectionMask::from_rows(rows)
    }
}

impl From<SelectionMask> for Vec<Vec<bool>> {
    fn from(mask: SelectionMask) -> Self {
        mask.to_rows()
    }
}

/// Ray casting against the polygon edges.
fn point_in_polygon(x: f64, y: f64, points: &[CellPoint]) -> bool {
    let mut inside = false;
    let mut j = points.len() - 1;
    for i in 0..points.len() {
        let (xi, yi) = (points[i].x as f64, points[i].y as f64);
        let (xj, yj) = (points[j].x as f64, points[j].y as f64);
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

// ============================================================================
// LAYERS & FRAMES
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub String);

impl LayerId {
    pub fn generate() -> Self {
        Self(format!("layer-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub String);

impl FrameId {
    pub fn generate() -> Self {
        Self(format!("frame-{}", Uuid::new_v4().simple()))
    }
}

impl From<&str> for FrameId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Layer metadata. Pixels live per frame in [`Frame::layers`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: LayerId::generate(),
            name: name.into(),
            visible: true,
            locked: false,
            opacity: 1.0,
        }
    }

    /// Drawing tools only touch layers that are visible and unlocked.
    pub fn is_editable(&self) -> bool {
        self.visible && !self.locked
    }
}

fn default_frame_delay() -> u32 {
    DEFAULT_FRAME_DELAY_MS
}

/// One animation frame: a grid for every layer id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: FrameId,
    pub layers: BTreeMap<LayerId, PixelGrid>,
    /// Milliseconds.
    #[serde(default = "default_frame_delay")]
    pub delay: u32,
}

impl Frame {
    /// Frame with an empty grid for every given layer.
    pub fn new(layers: &[Layer], width: u32, height: u32) -> Self {
        Self {
            id: FrameId::generate(),
            layers: layers.iter().map(|l| (l.id.clone(), PixelGrid::new(width, height))).collect(),
            delay: DEFAULT_FRAME_DELAY_MS,
        }
    }

    /// Copy with fresh id. Grids are shared copy-on-write, so later edits to
    /// either frame never show up in the other.
    pub fn duplicate(&self) -> Self {
        Self {
            id: FrameId::generate(),
            layers: self.layers.clone(),
            delay: self.delay,
        }
    }

    pub fn grid(&self, layer: &LayerId) -> Option<&PixelGrid> {
        self.layers.get(layer)
    }

    pub fn grid_mut(&mut self, layer: &LayerId) -> Option<&mut PixelGrid> {
        self.layers.get_mut(layer)
    }
}

// ============================================================================
// CANVAS STATE
// ============================================================================

/// Everything the editor edits: layer metadata, frames of pixel grids, the
/// active selection and the document-level extras persisted with a project.
#[derive(Clone, Debug)]
pub struct CanvasState {
    pub width: u32,
    pub height: u32,
    /// Bottom to top.
    pub layers: Vec<Layer>,
    pub frames: Vec<Frame>,
    pub active_layer_id: LayerId,
    pub current_frame_index: usize,
    /// Never holds an empty mask; see [`CanvasState::set_selection`].
    pub selection_mask: Option<SelectionMask>,
    pub saved_selections: BTreeMap<String, SelectionMask>,
    pub palettes: PaletteSet,
    pub fps: u32,
    /// Monotonically increasing counter, bumped on each mark_dirty call
    pub dirty_generation: u64,
}

impl CanvasState {
    pub fn new(width: u32, height: u32) -> Self {
        let layer = Layer::new("Layer 1");
        let frame = Frame::new(std::slice::from_ref(&layer), width, height);
        Self {
            width,
            height,
            active_layer_id: layer.id.clone(),
            layers: vec![layer],
            frames: vec![frame],
            current_frame_index: 0,
            selection_mask: None,
            saved_selections: BTreeMap::new(),
            palettes: PaletteSet::default(),
            fps: DEFAULT_FPS,
            dirty_generation: 0,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty_generation = self.dirty_generation.wrapping_add(1);
    }

    pub fn layer_index(&self, id: &LayerId) -> Option<usize> {
        self.layers.iter().position(|l| &l.id == id)
    }

    pub fn active_layer_index(&self) -> Option<usize> {
        self.layer_index(&self.active_layer_id)
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == self.active_layer_id)
    }

    pub fn is_active_layer_editable(&self) -> bool {
        self.active_layer().is_some_and(Layer::is_editable)
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frames.get(self.current_frame_index)
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.get_mut(self.current_frame_index)
    }

    /// Grid of the active layer in the current frame.
    pub fn active_grid(&self) -> Option<&PixelGrid> {
        self.current_frame()?.grid(&self.active_layer_id)
    }

    pub fn active_grid_mut(&mut self) -> Option<&mut PixelGrid> {
        let id = self.active_layer_id.clone();
        self.current_frame_mut()?.grid_mut(&id)
    }

    pub fn has_selection(&self) -> bool {
        self.selection_mask.is_some()
    }

    /// Installs a selection. Empty masks and masks of the wrong size are
    /// stored as "no selection".
    pub fn set_selection(&mut self, mask: Option<SelectionMask>) {
        self.selection_mask = mask.filter(|m| {
            if m.width() != self.width || m.height() != self.height {
                tracing::warn!(
                    "ignoring {}x{} selection on a {}x{} canvas",
                    m.width(),
                    m.height(),
                    self.width,
                    self.height
                );
                return false;
            }
            !m.is_empty()
        });
    }

    pub fn clear_selection(&mut self) {
        self.selection_mask = None;
    }

    /// Flattened image of one frame; see [`composite`].
    pub fn composite_frame(&self, index: usize, scale: u32) -> Option<RgbaImage> {
        let frame = self.frames.get(index)?;
        Some(composite(frame, &self.layers, self.width, self.height, scale))
    }
}

// ============================================================================
// COMPOSITING
// ============================================================================

/// Flattens a frame bottom to top. Hidden layers are skipped, each layer's
/// opacity applies uniformly, and every cell becomes a `scale × scale` block
/// (nearest neighbour, never smoothed).
pub fn composite(frame: &Frame, layers: &[Layer], width: u32, height: u32, scale: u32) -> RgbaImage {
    let scale = scale.max(1);
    let out_w = width * scale;
    let out_h = height * scale;

    let stack: Vec<(&PixelGrid, f32)> = layers
        .iter()
        .filter(|l| l.visible)
        .filter_map(|l| match frame.grid(&l.id) {
            Some(grid) => Some((grid, l.opacity.clamp(0.0, 1.0))),
            None => {
                tracing::warn!("frame {} has no grid for layer {}, skipping", frame.id.0, l.id);
                None
            }
        })
        .collect();

    let row_bytes = out_w as usize * 4;
    let mut buf = vec![0u8; row_bytes * out_h as usize];
    if row_bytes == 0 {
        return RgbaImage::new(out_w, out_h);
    }

    buf.par_chunks_mut(row_bytes).enumerate().for_each(|(oy, row)| {
        let y = (oy as u32 / scale) as i32;
        for ox in 0..out_w as usize {
            let x = (ox as u32 / scale) as i32;
            let mut px = [0.0f32; 4];
            for (grid, opacity) in &stack {
                if let Some(Some(color)) = grid.get(x, y) {
                    blend_over(&mut px, color, *opacity);
                }
            }
            let o = ox * 4;
            row[o] = px[0].round().clamp(0.0, 255.0) as u8;
            row[o + 1] = px[1].round().clamp(0.0, 255.0) as u8;
            row[o + 2] = px[2].round().clamp(0.0, 255.0) as u8;
            row[o + 3] = (px[3] * 255.0).round().clamp(0.0, 255.0) as u8;
        }
    });

    RgbaImage::from_raw(out_w, out_h, buf).unwrap_or_else(|| RgbaImage::new(out_w, out_h))
}

/// Straight-alpha source-over. Channels are 0..255, alpha is 0..1.
#[inline]
fn blend_over(dst: &mut [f32; 4], src: Color, alpha: f32) {
    if alpha <= 0.0 {
        return;
    }
    let out_a = alpha + dst[3] * (1.0 - alpha);
    let keep = dst[3] * (1.0 - alpha);
    dst[0] = (src.r as f32 * alpha + dst[0] * keep) / out_a;
    dst[1] = (src.g as f32 * alpha + dst[1] * keep) / out_a;
    dst[2] = (src.b as f32 * alpha + dst[2] * keep) / out_a;
    dst[3] = out_a;
}

// ============================================================================
// VIEWPORT
// ============================================================================

pub const MIN_ZOOM: f32 = 1.0;
pub const MAX_ZOOM: f32 = 64.0;
const ZOOM_STEP: f32 = 1.25;

/// Pointer position in screen pixels, relative to the canvas widget origin.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ScreenPos {
    pub x: f32,
    pub y: f32,
}

impl ScreenPos {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Maps screen pixels to canvas cells: `screen = cell * zoom + pan`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    /// Screen pixels per cell.
    pub zoom: f32,
    pub pan_x: f32,
    pub pan_y: f32,
    pub show_grid: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { zoom: 15.0, pan_x: 0.0, pan_y: 0.0, show_grid: true }
    }
}

impl Viewport {
    pub fn with_zoom(zoom: f32) -> Self {
        Self { zoom: zoom.clamp(MIN_ZOOM, MAX_ZOOM), ..Default::default() }
    }

    /// Continuous canvas coordinates (cell units).
    pub fn screen_to_canvas(&self, pos: ScreenPos) -> (f64, f64) {
        (
            (pos.x as f64 - self.pan_x as f64) / self.zoom as f64,
            (pos.y as f64 - self.pan_y as f64) / self.zoom as f64,
        )
    }

    /// Cell under the pointer; may lie outside the canvas.
    pub fn screen_to_cell(&self, pos: ScreenPos) -> CellPoint {
        let (x, y) = self.screen_to_canvas(pos);
        CellPoint::new(x.floor() as i32, y.floor() as i32)
    }

    pub fn canvas_to_screen(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.zoom as f64 + self.pan_x as f64, y * self.zoom as f64 + self.pan_y as f64)
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.pan_x += dx;
        self.pan_y += dy;
    }

    pub fn zoom_in(&mut self) {
        self.zoom = (self.zoom * ZOOM_STEP).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn zoom_out(&mut self) {
        self.zoom = (self.zoom / ZOOM_STEP).clamp(MIN_ZOOM, MAX_ZOOM);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::rgb(0xff, 0, 0);
    const GREEN: Color = Color::rgb(0, 0xff, 0);
    const BLUE: Color = Color::rgb(0, 0, 0xff);

    fn checker(w: u32, h: u32) -> PixelGrid {
        let mut g = PixelGrid::new(w, h);
        for y in 0..h as i32 {
            for x in 0..w as i32 {
                if (x + y) % 2 == 0 {
                    g.set(x, y, Some(RED));
                }
            }
        }
        g
    }

    #[test]
    fn test_color_hex_parsing() {
        assert_eq!(Color::from_hex("#FF004D"), Some(Color::rgb(0xff, 0x00, 0x4d)));
        assert_eq!(Color::from_hex("1d2b53"), Some(Color::rgb(0x1d, 0x2b, 0x53)));
        assert_eq!(Color::from_hex("#fff"), Some(Color::WHITE));
        assert_eq!(Color::from_hex("#12345"), None);
        assert_eq!(Color::from_hex("#gg0000"), None);
        assert_eq!(Color::rgb(0xab, 0x52, 0x36).to_hex(), "#ab5236");
        assert!("nope".parse::<Color>().is_err());
    }

    #[test]
    fn test_color_distance() {
        assert_eq!(Color::BLACK.distance(&Color::BLACK), 0.0);
        let d = Color::BLACK.distance(&Color::rgb(1, 1, 1));
        assert!((d - 3f64.sqrt()).abs() < 1e-9);
        assert!((Color::BLACK.distance(&Color::WHITE) - MAX_COLOR_DISTANCE).abs() < 1e-9);
    }

    #[test]
    fn test_flood_fill_whole_empty_grid() {
        let mut g = PixelGrid::new(4, 4);
        assert!(g.flood_fill(0, 0, Some(RED), None));
        assert!(g.cells().iter().all(|c| *c == Some(RED)));

        assert!(g.flood_fill(2, 2, Some(GREEN), None));
        assert!(g.cells().iter().all(|c| *c == Some(GREEN)));
    }

    #[test]
    fn test_flood_fill_same_color_is_noop() {
        let mut g = checker(5, 5);
        let before = g.clone();
        assert!(!g.flood_fill(0, 0, Some(RED), None));
        assert_eq!(g, before);
    }

    #[test]
    fn test_flood_fill_stays_in_component() {
        // Vertical wall at x = 2 splits the grid.
        let mut g = PixelGrid::new(5, 3);
        for y in 0..3 {
            g.set(2, y, Some(BLUE));
        }
        g.flood_fill(0, 0, Some(RED), None);
        for y in 0..3 {
            assert_eq!(g.get(0, y), Some(Some(RED)));
            assert_eq!(g.get(1, y), Some(Some(RED)));
            assert_eq!(g.get(2, y), Some(Some(BLUE)));
            assert_eq!(g.get(3, y), Some(None));
            assert_eq!(g.get(4, y), Some(None));
        }
    }

    #[test]
    fn test_flood_fill_respects_mask() {
        let mut g = PixelGrid::new(4, 4);
        let mask = SelectionMask::from_rect(4, 4, CellPoint::new(0, 0), CellPoint::new(1, 1));
        g.flood_fill(0, 0, Some(RED), Some(&mask));
        assert_eq!(g.cells().iter().filter(|c| c.is_some()).count(), 4);

        // Seed outside the mask does nothing.
        let mut g = PixelGrid::new(4, 4);
        assert!(!g.flood_fill(3, 3, Some(RED), Some(&mask)));
        assert!(g.is_blank());
    }

    #[test]
    fn test_flood_fill_out_of_bounds_ignored() {
        let mut g = PixelGrid::new(2, 2);
        assert!(!g.flood_fill(-1, 0, Some(RED), None));
        assert!(!g.flood_fill(0, 2, Some(RED), None));
        assert!(g.is_blank());
    }

    #[test]
    fn test_replace_color_handles_empty() {
        let mut g = checker(3, 3);
        assert!(g.replace_color(None, Some(BLUE)));
        assert!(g.cells().iter().all(|c| c.is_some()));
        assert!(g.replace_color(Some(RED), None));
        assert_eq!(g.cells().iter().filter(|c| c.is_none()).count(), 5);
        assert!(!g.replace_color(Some(GREEN), Some(RED)));
    }

    #[test]
    fn test_merge_does_not_erase() {
        let mut base = PixelGrid::filled(3, 3, Some(BLUE));
        let mut overlay = PixelGrid::new(3, 3);
        overlay.set(0, 0, Some(RED));
        base.merge(&overlay, 1, 1);
        assert_eq!(base.get(1, 1), Some(Some(RED)));
        assert_eq!(base.cells().iter().filter(|c| **c == Some(BLUE)).count(), 8);

        // Writes past the edge are dropped.
        base.merge(&overlay, 5, 5);
        assert_eq!(base.cells().iter().filter(|c| **c == Some(RED)).count(), 1);
    }

    #[test]
    fn test_extract_then_merge_round_trip() {
        let grid = checker(6, 5);
        let mask = SelectionMask::from_rect(6, 5, CellPoint::new(1, 1), CellPoint::new(4, 3));
        let (mut cut, floating) = grid.extract_selected(&mask);
        for y in 1..=3 {
            for x in 1..=4 {
                assert_eq!(cut.get(x, y), Some(None));
                assert_eq!(floating.get(x, y), grid.get(x, y));
            }
        }
        assert_eq!(floating.get(0, 0), Some(None));
        cut.merge(&floating, 0, 0);
        assert_eq!(cut, grid);
    }

    #[test]
    fn test_resized_copies_top_left() {
        let g = checker(4, 4);
        let bigger = g.resized(6, 2);
        assert_eq!((bigger.width(), bigger.height()), (6, 2));
        assert_eq!(bigger.get(0, 0), Some(Some(RED)));
        assert_eq!(bigger.get(3, 1), Some(Some(RED)));
        assert_eq!(bigger.get(5, 1), Some(None));
    }

    #[test]
    fn test_content_bounds_and_crop() {
        let mut g = PixelGrid::new(8, 8);
        g.set(2, 3, Some(RED));
        g.set(5, 4, Some(GREEN));
        let rect = g.content_bounds(None).unwrap();
        assert_eq!(rect, CellRect { x: 2, y: 3, width: 4, height: 2 });
        let cropped = g.crop(rect);
        assert_eq!(cropped.get(0, 0), Some(Some(RED)));
        assert_eq!(cropped.get(3, 1), Some(Some(GREEN)));

        let region = SelectionMask::from_rect(8, 8, CellPoint::new(4, 4), CellPoint::new(7, 7));
        assert_eq!(g.content_bounds(Some(&region)), Some(CellRect { x: 5, y: 4, width: 1, height: 1 }));
        assert_eq!(PixelGrid::new(3, 3).content_bounds(None), None);
    }

    #[test]
    fn test_grid_rejects_jagged_rows() {
        let rows = vec![vec![None, None], vec![None]];
        assert_eq!(
            PixelGrid::from_rows(rows),
            Err(GridShapeError::Jagged { row: 1, found: 1, expected: 2 })
        );
        assert_eq!(PixelGrid::from_rows(vec![]), Err(GridShapeError::Empty));
    }

    #[test]
    fn test_grid_serializes_as_rows() {
        let mut g = PixelGrid::new(2, 1);
        g.set(1, 0, Some(Color::rgb(0x29, 0xad, 0xff)));
        let json = serde_json::to_string(&g).unwrap();
        assert_eq!(json, r##"[[null,"#29adff"]]"##);
        let back: PixelGrid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, g);
        assert!(serde_json::from_str::<PixelGrid>(r#"[[null],[null,null]]"#).is_err());
    }

    #[test]
    fn test_box_selection_is_inclusive() {
        let mask = SelectionMask::from_rect(8, 8, CellPoint::new(1, 1), CellPoint::new(3, 3));
        assert_eq!(mask.count(), 9);
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(mask.get(x, y), (1..=3).contains(&x) && (1..=3).contains(&y));
            }
        }
        // Corners in reverse order give the same rectangle.
        let rev = SelectionMask::from_rect(8, 8, CellPoint::new(3, 3), CellPoint::new(1, 1));
        assert_eq!(rev, mask);
    }

    #[test]
    fn test_invert_twice_is_identity() {
        let mask = SelectionMask::from_rect(5, 4, CellPoint::new(1, 0), CellPoint::new(2, 2));
        assert_eq!(mask.inverted().inverted(), mask);
        assert_eq!(mask.inverted().count(), 20 - mask.count());
    }

    #[test]
    fn test_expand_is_monotonic() {
        let mut mask = SelectionMask::new(5, 5);
        mask.set(2, 2, true);
        mask.set(0, 4, true);
        let grown = mask.expanded();
        for y in 0..5 {
            for x in 0..5 {
                if mask.get(x, y) {
                    assert!(grown.get(x, y));
                }
            }
        }
        assert!(grown.get(2, 1) && grown.get(1, 2) && grown.get(3, 2) && grown.get(2, 3));
        assert!(!grown.get(1, 1));
        assert_eq!(grown.count(), 5 + 3);
    }

    #[test]
    fn test_contract_treats_edges_as_unselected() {
        let full = SelectionMask::full(4, 4);
        let shrunk = full.contracted();
        assert_eq!(shrunk.count(), 4);
        assert!(shrunk.get(1, 1) && shrunk.get(2, 2));
        assert!(!shrunk.get(0, 0));

        let mut single = SelectionMask::new(3, 3);
        single.set(1, 1, true);
        assert!(single.contracted().is_empty());
    }

    #[test]
    fn test_polygon_rasterization() {
        let square = [
            CellPoint::new(0, 0),
            CellPoint::new(4, 0),
            CellPoint::new(4, 4),
            CellPoint::new(0, 4),
        ];
        let mask = SelectionMask::from_polygon(&square, 8, 8);
        assert!(mask.get(1, 1) && mask.get(3, 3));
        assert!(!mask.get(5, 5));
        assert!(!mask.get(6, 1));

        let two = [CellPoint::new(0, 0), CellPoint::new(3, 3)];
        assert!(SelectionMask::from_polygon(&two, 8, 8).is_empty());
    }

    #[test]
    fn test_polygon_clipped_to_canvas() {
        let tri = [CellPoint::new(-10, -10), CellPoint::new(20, -10), CellPoint::new(-10, 20)];
        let mask = SelectionMask::from_polygon(&tri, 4, 4);
        assert!(mask.get(0, 0));
        assert_eq!(mask.width(), 4);
    }

    #[test]
    fn test_brush_disc() {
        let mask = SelectionMask::with_brush(None, 7, 7, 3, 3, 1, true);
        assert_eq!(mask.count(), 5);
        let mask = SelectionMask::with_brush(Some(&mask), 7, 7, 3, 3, 0, false);
        assert_eq!(mask.count(), 4);
        assert!(!mask.get(3, 3));
        let big = SelectionMask::with_brush(None, 7, 7, 3, 3, 2, true);
        assert_eq!(big.count(), 13);
    }

    #[test]
    fn test_brush_huge_radius_covers_canvas() {
        let mask = SelectionMask::with_brush(None, 4, 4, 1, 1, u32::MAX, true);
        assert_eq!(mask.count(), 16);
        let mask = SelectionMask::with_brush(None, 4, 4, i32::MAX, i32::MIN, u32::MAX, true);
        assert_eq!(mask.count(), 0);
    }

    #[test]
    fn test_magic_wand_exact_only_with_zero_tolerance() {
        let near = Color::rgb(1, 1, 1);
        let mut g = PixelGrid::filled(3, 3, Some(near));
        g.set(0, 0, Some(Color::BLACK));
        let mask = SelectionMask::magic_wand(&g, 0, 0, 0.0);
        assert_eq!(mask.count(), 1);

        let mask = SelectionMask::magic_wand(&g, 0, 0, 5.0);
        assert_eq!(mask.count(), 9);
    }

    #[test]
    fn test_magic_wand_empty_seed_only_grows_through_empty() {
        let mut g = PixelGrid::new(4, 1);
        g.set(2, 0, Some(RED));
        let mask = SelectionMask::magic_wand(&g, 0, 0, MAX_COLOR_DISTANCE);
        assert_eq!(mask.count(), 2);
        assert!(!mask.get(3, 0));
    }

    #[test]
    fn test_magic_wand_is_connected() {
        let mut g = PixelGrid::new(3, 3);
        g.set(0, 0, Some(RED));
        g.set(2, 2, Some(RED));
        let mask = SelectionMask::magic_wand(&g, 0, 0, 0.0);
        assert_eq!(mask.count(), 1);
        assert!(SelectionMask::magic_wand(&g, 9, 9, 0.0).is_empty());
    }

    #[test]
    fn test_shift_drops_outside() {
        let mask = SelectionMask::from_rect(4, 4, CellPoint::new(2, 2), CellPoint::new(3, 3));
        let moved = mask.shifted(1, -1);
        assert_eq!(moved.count(), 2);
        assert!(moved.get(3, 1) && moved.get(3, 2));
    }

    #[test]
    fn test_combine_modes() {
        let a = SelectionMask::from_rect(4, 1, CellPoint::new(0, 0), CellPoint::new(1, 0));
        let b = SelectionMask::from_rect(4, 1, CellPoint::new(1, 0), CellPoint::new(2, 0));
        assert_eq!(a.combine(&b, SelectionMode::Replace), b);
        assert_eq!(a.combine(&b, SelectionMode::Add).count(), 3);
        let sub = a.combine(&b, SelectionMode::Subtract);
        assert!(sub.get(0, 0) && !sub.get(1, 0));
        let and = a.combine(&b, SelectionMode::Intersect);
        assert_eq!(and.count(), 1);
        assert!(and.get(1, 0));
    }

    #[test]
    fn test_set_selection_normalizes_empty() {
        let mut state = CanvasState::new(4, 4);
        state.set_selection(Some(SelectionMask::new(4, 4)));
        assert!(!state.has_selection());
        state.set_selection(Some(SelectionMask::full(2, 2)));
        assert!(!state.has_selection());
        state.set_selection(Some(SelectionMask::full(4, 4)));
        assert!(state.has_selection());
    }

    #[test]
    fn test_composite_order_visibility_and_scale() {
        let mut state = CanvasState::new(2, 1);
        let top = Layer::new("Top");
        let top_id = top.id.clone();
        state.layers.push(top);
        let base_id = state.layers[0].id.clone();
        let frame = &mut state.frames[0];
        frame.layers.insert(top_id.clone(), PixelGrid::new(2, 1));
        frame.grid_mut(&base_id).unwrap().set(0, 0, Some(RED));
        frame.grid_mut(&base_id).unwrap().set(1, 0, Some(RED));
        frame.grid_mut(&top_id).unwrap().set(0, 0, Some(BLUE));

        let img = state.composite_frame(0, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 0, 0, 255]);

        state.layers[1].visible = false;
        let img = state.composite_frame(0, 3).unwrap();
        assert_eq!(img.dimensions(), (6, 3));
        assert_eq!(img.get_pixel(2, 2).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_composite_opacity_and_missing_grid() {
        let mut state = CanvasState::new(1, 1);
        let id = state.layers[0].id.clone();
        state.frames[0].grid_mut(&id).unwrap().set(0, 0, Some(Color::WHITE));
        state.layers[0].opacity = 0.5;
        let img = state.composite_frame(0, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255, 128]);

        // Layer without a grid in this frame is skipped, not fatal.
        state.layers.push(Layer::new("Ghost"));
        let img = state.composite_frame(0, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255, 128]);
        assert!(state.composite_frame(4, 1).is_none());
    }

    #[test]
    fn test_viewport_mapping() {
        let mut view = Viewport::with_zoom(10.0);
        view.pan_by(5.0, -5.0);
        assert_eq!(view.screen_to_cell(ScreenPos::new(5.0, -5.0)), CellPoint::new(0, 0));
        assert_eq!(view.screen_to_cell(ScreenPos::new(34.0, 20.0)), CellPoint::new(2, 2));
        assert_eq!(view.screen_to_cell(ScreenPos::new(0.0, 0.0)), CellPoint::new(-1, 0));
        assert_eq!(view.canvas_to_screen(1.0, 1.0), (15.0, 5.0));
        for _ in 0..40 {
            view.zoom_in();
        }
        assert_eq!(view.zoom, MAX_ZOOM);
    }
}
