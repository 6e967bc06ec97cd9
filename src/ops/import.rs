// ============================================================================
// IMAGE INGESTION — raster images and spritesheets into pixel grids
// ============================================================================

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::canvas::{CanvasState, Color, Frame, PixelGrid};
use crate::components::history::HistoryManager;
use crate::error::{ImportError, ImportResult};

/// Samples `img` onto a `width × height` grid with nearest-neighbour
/// scaling. A cell keeps its colour only when the source alpha is strictly
/// above `alpha_threshold`; partially transparent colours are taken as-is,
/// without premultiplying.
pub fn grid_from_image(img: &RgbaImage, width: u32, height: u32, alpha_threshold: u8) -> PixelGrid {
    let scaled;
    let src = if img.width() == width && img.height() == height {
        img
    } else {
        scaled = imageops::resize(img, width, height, FilterType::Nearest);
        &scaled
    };
    PixelGrid::from_fn_par(width, height, |x, y| {
        let p = src.get_pixel(x, y);
        (p[3] > alpha_threshold).then(|| Color::rgb(p[0], p[1], p[2]))
    })
}

/// Replaces the active layer of the current frame with `img` scaled to the
/// canvas. One history step. Returns `false` on a hidden or locked layer.
pub fn import_image_to_active_layer(
    state: &mut CanvasState,
    history: &mut HistoryManager,
    img: &RgbaImage,
    alpha_threshold: u8,
) -> bool {
    if !state.is_active_layer_editable() || state.active_grid().is_none() {
        return false;
    }
    if img.width() == 0 || img.height() == 0 {
        tracing::warn!("ignoring empty {}x{} image", img.width(), img.height());
        return false;
    }
    let grid = grid_from_image(img, state.width, state.height, alpha_threshold);
    history.record("Import Image", state);
    if let Some(target) = state.active_grid_mut() {
        *target = grid;
    }
    state.mark_dirty();
    tracing::info!("imported {}x{} image into layer {}", img.width(), img.height(), state.active_layer_id);
    true
}

/// Cuts a sheet into `cell_w × cell_h` tiles, left to right then top to
/// bottom. Partial tiles at the right and bottom edges are ignored.
pub fn slice_sheet(img: &RgbaImage, cell_w: u32, cell_h: u32) -> ImportResult<Vec<RgbaImage>> {
    if cell_w == 0 || cell_h == 0 {
        return Err(ImportError::ZeroCellSize { width: cell_w, height: cell_h });
    }
    let cols = img.width() / cell_w;
    let rows = img.height() / cell_h;
    if cols == 0 || rows == 0 {
        return Err(ImportError::SheetTooSmall {
            sheet_width: img.width(),
            sheet_height: img.height(),
            cell_width: cell_w,
            cell_height: cell_h,
        });
    }
    let mut tiles = Vec::with_capacity((cols * rows) as usize);
    for r in 0..rows {
        for c in 0..cols {
            tiles.push(imageops::crop_imm(img, c * cell_w, r * cell_h, cell_w, cell_h).to_image());
        }
    }
    Ok(tiles)
}

/// Appends one frame per non-empty sheet tile, with the tile scaled into the
/// active layer. A 1×1 sheet always yields its frame even when blank. The
/// first appended frame becomes current. One history step when anything is
/// appended; returns the number of frames added.
pub fn import_spritesheet(
    state: &mut CanvasState,
    history: &mut HistoryManager,
    img: &RgbaImage,
    cell_w: u32,
    cell_h: u32,
    alpha_threshold: u8,
) -> ImportResult<usize> {
    let tiles = slice_sheet(img, cell_w, cell_h)?;
    let single = tiles.len() == 1;
    let (w, h) = (state.width, state.height);

    let grids: Vec<PixelGrid> = tiles
        .iter()
        .map(|tile| grid_from_image(tile, w, h, alpha_threshold))
        .filter(|grid| single || !grid.is_blank())
        .collect();
    if grids.is_empty() {
        tracing::info!("spritesheet has no opaque tiles, nothing imported");
        return Ok(0);
    }

    history.record("Import Spritesheet", state);
    let first_new = state.frames.len();
    let target = state.active_layer_id.clone();
    for grid in grids.iter() {
        let mut frame = Frame::new(&state.layers, w, h);
        frame.layers.insert(target.clone(), grid.clone());
        state.frames.push(frame);
    }
    state.current_frame_index = first_new;
    state.mark_dirty();
    tracing::info!("imported {} of {} spritesheet tiles", grids.len(), tiles.len());
    Ok(grids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn sheet(cols: u32, rows: u32, cell: u32, filled: &[(u32, u32)]) -> RgbaImage {
        let mut img = RgbaImage::new(cols * cell, rows * cell);
        for &(c, r) in filled {
            for y in 0..cell {
                for x in 0..cell {
                    img.put_pixel(c * cell + x, r * cell + y, Rgba([200, 10, 10, 255]));
                }
            }
        }
        img
    }

    #[test]
    fn test_alpha_threshold_is_strict() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([1, 2, 3, 50]));
        img.put_pixel(1, 0, Rgba([1, 2, 3, 51]));
        let grid = grid_from_image(&img, 2, 1, 50);
        assert_eq!(grid.get(0, 0), Some(None));
        assert_eq!(grid.get(1, 0), Some(Some(Color::rgb(1, 2, 3))));
    }

    #[test]
    fn test_downsample_is_nearest() {
        let mut img = RgbaImage::new(4, 4);
        for y in 0..2 {
            for x in 0..2 {
                img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
        let grid = grid_from_image(&img, 2, 2, 0);
        assert_eq!(grid.get(0, 0), Some(Some(Color::rgb(255, 0, 0))));
        assert_eq!(grid.get(1, 1), Some(None));
    }

    #[test]
    fn test_import_image_records_once() {
        let mut state = CanvasState::new(2, 2);
        let mut history = HistoryManager::default();
        let img = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255]));
        assert!(import_image_to_active_layer(&mut state, &mut history, &img, 50));
        assert_eq!(history.undo_count(), 1);
        assert!(state.active_grid().unwrap().cells().iter().all(|c| *c == Some(Color::rgb(0, 0, 255))));

        state.layers[0].visible = false;
        assert!(!import_image_to_active_layer(&mut state, &mut history, &img, 50));
    }

    #[test]
    fn test_slice_errors() {
        let img = RgbaImage::new(4, 4);
        assert!(matches!(slice_sheet(&img, 0, 2), Err(ImportError::ZeroCellSize { .. })));
        assert!(matches!(slice_sheet(&img, 5, 2), Err(ImportError::SheetTooSmall { .. })));
        assert_eq!(slice_sheet(&img, 3, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_spritesheet_skips_blank_tiles() {
        let mut state = CanvasState::new(4, 4);
        let mut history = HistoryManager::default();
        let img = sheet(3, 2, 4, &[(0, 0), (2, 1)]);
        let added = import_spritesheet(&mut state, &mut history, &img, 4, 4, 0).unwrap();
        assert_eq!(added, 2);
        assert_eq!(state.frames.len(), 3);
        assert_eq!(state.current_frame_index, 1);
        assert!(state.active_grid().unwrap().cells().iter().all(|c| c.is_some()));
        assert_eq!(history.undo_count(), 1);
    }

    #[test]
    fn test_single_blank_tile_still_imports() {
        let mut state = CanvasState::new(4, 4);
        let mut history = HistoryManager::default();
        let img = RgbaImage::new(4, 4);
        assert_eq!(import_spritesheet(&mut state, &mut history, &img, 4, 4, 0).unwrap(), 1);
        assert_eq!(state.frames.len(), 2);
    }

    #[test]
    fn test_blank_multi_tile_sheet_imports_nothing() {
        let mut state = CanvasState::new(4, 4);
        let mut history = HistoryManager::default();
        let img = RgbaImage::new(8, 4);
        assert_eq!(import_spritesheet(&mut state, &mut history, &img, 4, 4, 0).unwrap(), 0);
        assert_eq!(state.frames.len(), 1);
        assert_eq!(history.undo_count(), 0);
    }
}
