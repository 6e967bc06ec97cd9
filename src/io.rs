use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use image::{ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::{CanvasState, DEFAULT_FPS, Frame, Layer, LayerId, MAX_CANVAS_DIM, PixelGrid, SelectionMask};
use crate::components::colors::{Palette, PaletteSet};
use crate::error::{ExportError, ExportResult, ProjectError, ProjectResult};

/// Current document version written by `save_project`.
pub const PROJECT_VERSION: u32 = 1;
/// Maximum number of layers in a project file.
const MAX_LAYERS: usize = 256;
/// Largest exported image per axis (GIF's limit, and a sane cap for PNG).
pub const MAX_EXPORT_DIM: u32 = u16::MAX as u32;

// ============================================================================
// PROJECT DOCUMENT
// ============================================================================

fn default_version() -> u32 {
    PROJECT_VERSION
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}

/// On-disk shape of a project. Pixels are rows of `"#rrggbb"` or `null`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    pub layers: Vec<Layer>,
    pub frames: Vec<Frame>,
    #[serde(default)]
    pub active_layer_id: Option<LayerId>,
    #[serde(default)]
    pub saved_selections: BTreeMap<String, SelectionMask>,
    #[serde(default)]
    pub palettes: Vec<Palette>,
    #[serde(default)]
    pub active_palette_id: Option<String>,
}

impl ProjectDocument {
    pub fn from_state(state: &CanvasState) -> Self {
        Self {
            version: PROJECT_VERSION,
            width: state.width,
            height: state.height,
            fps: state.fps,
            layers: state.layers.clone(),
            frames: state.frames.clone(),
            active_layer_id: Some(state.active_layer_id.clone()),
            saved_selections: state.saved_selections.clone(),
            palettes: state.palettes.palettes().to_vec(),
            active_palette_id: Some(state.palettes.active_id().to_string()),
        }
    }

    /// Validates the document and builds a fresh canvas from it.
    ///
    /// Hard failures: size outside `1..=MAX_CANVAS_DIM`, no layers, too many
    /// layers, duplicate layer ids, no frames, a grid of the wrong size.
    /// Repaired with a warning: grids missing for a layer (backfilled empty),
    /// grids for unknown layers (dropped), saved selections of the wrong size
    /// (dropped), an unknown active layer (first layer), fps of 0.
    pub fn into_state(self) -> ProjectResult<CanvasState> {
        let (w, h) = (self.width, self.height);
        if w == 0 || h == 0 || w > MAX_CANVAS_DIM || h > MAX_CANVAS_DIM {
            return Err(ProjectError::InvalidDimensions { width: w, height: h });
        }
        if self.layers.is_empty() {
            return Err(ProjectError::InvalidFormat("project has no layers".into()));
        }
        if self.layers.len() > MAX_LAYERS {
            return Err(ProjectError::InvalidFormat(format!(
                "{} layers exceeds the limit of {}",
                self.layers.len(),
                MAX_LAYERS
            )));
        }
        if self.frames.is_empty() {
            return Err(ProjectError::InvalidFormat("project has no frames".into()));
        }
        let mut seen = HashSet::new();
        for layer in &self.layers {
            if !seen.insert(&layer.id) {
                return Err(ProjectError::InvalidFormat(format!("duplicate layer id {}", layer.id)));
            }
        }

        let mut frames = self.frames;
        for (i, frame) in frames.iter_mut().enumerate() {
            frame.layers.retain(|id, _| {
                let known = seen.contains(id);
                if !known {
                    tracing::warn!("frame {}: dropping grid for unknown layer {}", i, id);
                }
                known
            });
            for (id, grid) in &frame.layers {
                if grid.width() != w || grid.height() != h {
                    return Err(ProjectError::InvalidFormat(format!(
                        "frame {} layer {}: grid is {}x{}, canvas is {}x{}",
                        i,
                        id,
                        grid.width(),
                        grid.height(),
                        w,
                        h
                    )));
                }
            }
            for layer in &self.layers {
                if !frame.layers.contains_key(&layer.id) {
                    tracing::warn!("frame {}: backfilling missing grid for layer {}", i, layer.id);
                    frame.layers.insert(layer.id.clone(), PixelGrid::new(w, h));
                }
            }
        }

        let mut layers = self.layers;
        for layer in &mut layers {
            layer.opacity = layer.opacity.clamp(0.0, 1.0);
        }

        let saved_selections = self
            .saved_selections
            .into_iter()
            .filter(|(name, mask)| {
                let fits = mask.width() == w && mask.height() == h;
                if !fits {
                    tracing::warn!(
                        "dropping saved selection '{}' ({}x{} on a {}x{} canvas)",
                        name,
                        mask.width(),
                        mask.height(),
                        w,
                        h
                    );
                }
                fits
            })
            .collect();

        let active_layer_id = match self.active_layer_id {
            Some(id) if layers.iter().any(|l| l.id == id) => id,
            other => {
                if let Some(id) = other {
                    tracing::warn!("active layer {} not found, using the first layer", id);
                }
                layers[0].id.clone()
            }
        };

        let fps = if self.fps == 0 {
            tracing::warn!("fps of 0 in project, using {}", DEFAULT_FPS);
            DEFAULT_FPS
        } else {
            self.fps
        };

        let mut state = CanvasState::new(w, h);
        state.layers = layers;
        state.frames = frames;
        state.active_layer_id = active_layer_id;
        state.current_frame_index = 0;
        state.selection_mask = None;
        state.saved_selections = saved_selections;
        state.palettes = PaletteSet::from_parts(self.palettes, self.active_palette_id);
        state.fps = fps;
        Ok(state)
    }
}

// ============================================================================
// PROJECT FILES
// ============================================================================

/// Magic tag of the binary project format.
const PXF_MAGIC: &str = "PXF1";

#[derive(Serialize, Deserialize)]
struct BinaryProject {
    magic: String,
    document: ProjectDocument,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectFormat {
    /// Human-readable JSON (`.json`).
    Json,
    /// Compact bincode (`.pxf`).
    Binary,
}

impl ProjectFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "pxf" => Some(Self::Binary),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Binary => "pxf",
        }
    }
}

pub fn to_json(state: &CanvasState) -> ProjectResult<String> {
    Ok(serde_json::to_string_pretty(&ProjectDocument::from_state(state))?)
}

pub fn from_json(json: &str) -> ProjectResult<CanvasState> {
    let doc: ProjectDocument = serde_json::from_str(json)?;
    if doc.version > PROJECT_VERSION {
        return Err(ProjectError::UnsupportedFormat(format!("document version {}", doc.version)));
    }
    doc.into_state()
}

pub fn to_binary(state: &CanvasState) -> ProjectResult<Vec<u8>> {
    let file = BinaryProject { magic: PXF_MAGIC.to_string(), document: ProjectDocument::from_state(state) };
    Ok(bincode::serialize(&file)?)
}

pub fn from_binary(raw: &[u8]) -> ProjectResult<CanvasState> {
    // bincode writes a String as an 8-byte length prefix + UTF-8 data, so
    // bytes 8..12 hold the magic.
    let magic = raw.get(8..12).and_then(|b| std::str::from_utf8(b).ok()).unwrap_or("");
    if magic != PXF_MAGIC {
        return Err(ProjectError::UnsupportedFormat(format!("unknown magic '{}'", magic)));
    }
    let file: BinaryProject = bincode::deserialize(raw)?;
    file.document.into_state()
}

/// Writes the project in the format chosen by the file extension.
pub fn save_project(state: &CanvasState, path: &Path) -> ProjectResult<()> {
    let format = ProjectFormat::from_path(path)
        .ok_or_else(|| ProjectError::UnsupportedFormat(path.display().to_string()))?;
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    match format {
        ProjectFormat::Json => {
            serde_json::to_writer_pretty(writer, &ProjectDocument::from_state(state))?;
        }
        ProjectFormat::Binary => {
            let project = BinaryProject { magic: PXF_MAGIC.to_string(), document: ProjectDocument::from_state(state) };
            bincode::serialize_into(writer, &project)?;
        }
    }
    tracing::info!("saved project {} ({}x{}, {} frames)", path.display(), state.width, state.height, state.frames.len());
    Ok(())
}

/// Reads a project. The caller's session is untouched on error.
pub fn load_project(path: &Path) -> ProjectResult<CanvasState> {
    let format = ProjectFormat::from_path(path)
        .ok_or_else(|| ProjectError::UnsupportedFormat(path.display().to_string()))?;
    let mut raw = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut raw)?;
    let state = match format {
        ProjectFormat::Json => {
            let text = std::str::from_utf8(&raw)
                .map_err(|e| ProjectError::InvalidFormat(format!("not UTF-8: {}", e)))?;
            from_json(text)?
        }
        ProjectFormat::Binary => from_binary(&raw)?,
    };
    tracing::info!(
        "loaded project {} ({}x{}, {} layers, {} frames)",
        path.display(),
        state.width,
        state.height,
        state.layers.len(),
        state.frames.len()
    );
    Ok(state)
}

// ============================================================================
// EXPORT
// ============================================================================

fn check_export_size(width: u32, height: u32, scale: u32) -> ExportResult<(u32, u32)> {
    let scale = scale.max(1);
    match (width.checked_mul(scale), height.checked_mul(scale)) {
        (Some(w), Some(h)) if w <= MAX_EXPORT_DIM && h <= MAX_EXPORT_DIM => Ok((w, h)),
        _ => Err(ExportError::TooLarge {
            width: width.saturating_mul(scale),
            height: height.saturating_mul(scale),
        }),
    }
}

/// Every frame flattened at `scale`.
pub fn composite_frames(state: &CanvasState, scale: u32) -> ExportResult<Vec<RgbaImage>> {
    if state.frames.is_empty() {
        return Err(ExportError::NoFrames);
    }
    check_export_size(state.width, state.height, scale)?;
    Ok((0..state.frames.len())
        .filter_map(|i| state.composite_frame(i, scale))
        .collect())
}

pub fn export_png_frame(state: &CanvasState, index: usize, scale: u32, path: &Path) -> ExportResult<()> {
    check_export_size(state.width, state.height, scale)?;
    let img = state
        .composite_frame(index, scale)
        .ok_or(ExportError::FrameOutOfRange { index, count: state.frames.len() })?;
    img.save_with_format(path, ImageFormat::Png)?;
    tracing::info!("exported frame {} to {}", index, path.display());
    Ok(())
}

/// All frames laid out left to right, wrapping after `columns`, with
/// `padding` transparent pixels between cells.
pub fn spritesheet_image(state: &CanvasState, columns: u32, padding: u32, scale: u32) -> ExportResult<RgbaImage> {
    let frames = composite_frames(state, scale)?;
    let n = frames.len() as u32;
    let cols = columns.clamp(1, n);
    let rows = n.div_ceil(cols);
    let (cw, ch) = (frames[0].width(), frames[0].height());

    let sheet_w = cols as u64 * cw as u64 + (cols as u64 - 1) * padding as u64;
    let sheet_h = rows as u64 * ch as u64 + (rows as u64 - 1) * padding as u64;
    if sheet_w > MAX_EXPORT_DIM as u64 || sheet_h > MAX_EXPORT_DIM as u64 {
        return Err(ExportError::TooLarge {
            width: sheet_w.min(u32::MAX as u64) as u32,
            height: sheet_h.min(u32::MAX as u64) as u32,
        });
    }

    let mut sheet = RgbaImage::new(sheet_w as u32, sheet_h as u32);
    for (i, frame) in frames.iter().enumerate() {
        let i = i as u32;
        let x = (i % cols) * (cw + padding);
        let y = (i / cols) * (ch + padding);
        image::imageops::replace(&mut sheet, frame, x as i64, y as i64);
    }
    Ok(sheet)
}

pub fn export_spritesheet(state: &CanvasState, columns: u32, padding: u32, scale: u32, path: &Path) -> ExportResult<()> {
    let sheet = spritesheet_image(state, columns, padding, scale)?;
    sheet.save_with_format(path, ImageFormat::Png)?;
    tracing::info!("exported {}x{} spritesheet to {}", sheet.width(), sheet.height(), path.display());
    Ok(())
}

pub fn export_gif(state: &CanvasState, scale: u32, path: &Path) -> ExportResult<()> {
    let frames = composite_frames(state, scale)?;
    encode_animated_gif(&frames, state.fps, path)?;
    tracing::info!("exported {} frame GIF to {}", frames.len(), path.display());
    Ok(())
}

pub fn export_apng(state: &CanvasState, scale: u32, path: &Path) -> ExportResult<()> {
    let frames = composite_frames(state, scale)?;
    encode_animated_png(&frames, state.fps, path)?;
    tracing::info!("exported {} frame APNG to {}", frames.len(), path.display());
    Ok(())
}

/// Writes each frame as `<stem>_NNN.png` into `dir`, creating it if needed.
pub fn export_frames_dir(state: &CanvasState, scale: u32, dir: &Path, stem: &str) -> ExportResult<Vec<PathBuf>> {
    let frames = composite_frames(state, scale)?;
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(frames.len());
    for (i, img) in frames.iter().enumerate() {
        let path = dir.join(format!("{}_{:03}.png", stem, i));
        img.save_with_format(&path, ImageFormat::Png)?;
        written.push(path);
    }
    tracing::info!("exported {} frames to {}", written.len(), dir.display());
    Ok(written)
}

// ============================================================================
// ANIMATION ENCODING
// ============================================================================

/// Palette slot used for transparent pixels.
const GIF_TRANSPARENT_INDEX: u8 = 255;

/// GIF frame delay in centiseconds for `fps`.
pub fn gif_delay_cs(fps: u32) -> u16 {
    (100.0 / fps.max(1) as f64).round().clamp(1.0, u16::MAX as f64) as u16
}

/// Encode frames as an infinitely looping GIF. Each frame carries its own
/// palette; pixels with alpha below 128 map to a reserved transparent index.
pub fn encode_animated_gif(frames: &[RgbaImage], fps: u32, path: &Path) -> ExportResult<()> {
    let first = frames.first().ok_or(ExportError::NoFrames)?;
    let (w, h) = (first.width(), first.height());
    if w > MAX_EXPORT_DIM || h > MAX_EXPORT_DIM {
        return Err(ExportError::TooLarge { width: w, height: h });
    }
    let delay = gif_delay_cs(fps);

    let file = File::create(path)?;
    let mut encoder = gif::Encoder::new(BufWriter::new(file), w as u16, h as u16, &[])?;
    encoder.set_repeat(gif::Repeat::Infinite)?;

    for frame_img in frames {
        let (palette, indices) = quantize_rgba(frame_img);
        let frame = gif::Frame {
            width: w as u16,
            height: h as u16,
            delay,
            dispose: gif::DisposalMethod::Background,
            transparent: Some(GIF_TRANSPARENT_INDEX),
            palette: Some(palette),
            buffer: std::borrow::Cow::Owned(indices),
            ..Default::default()
        };
        encoder.write_frame(&frame)?;
    }
    Ok(())
}

/// Encode frames as a looping animated PNG.
pub fn encode_animated_png(frames: &[RgbaImage], fps: u32, path: &Path) -> ExportResult<()> {
    let first = frames.first().ok_or(ExportError::NoFrames)?;
    let (width, height) = (first.width(), first.height());
    let delay_ms = (1000.0 / fps.max(1) as f64).round().clamp(1.0, 65535.0) as u16;

    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_animated(frames.len() as u32, 0)?; // 0 = infinite loop

    let mut writer = encoder.write_header()?;
    for frame_img in frames {
        writer.set_frame_delay(delay_ms, 1000)?;
        writer.set_dispose_op(png::DisposeOp::Background)?;
        writer.write_image_data(frame_img.as_raw())?;
    }
    writer.finish()?;
    Ok(())
}

/// Quantize an RGBA image to a 256-entry palette + indices. Opaque colours
/// occupy slots 0..255, slot 255 is transparent. Images with at most 255
/// distinct colours keep them exactly; otherwise NeuQuant picks the palette
/// from the opaque pixels only.
/// Returns (flat_palette_rgb: Vec<u8>, indices: Vec<u8>).
fn quantize_rgba(image: &RgbaImage) -> (Vec<u8>, Vec<u8>) {
    const MAX_OPAQUE: usize = GIF_TRANSPARENT_INDEX as usize;
    let is_opaque = |p: &Rgba<u8>| p[3] >= 128;

    let mut exact: Vec<[u8; 3]> = Vec::new();
    let mut lookup: std::collections::HashMap<[u8; 3], u8> = std::collections::HashMap::new();
    let mut fits = true;
    for p in image.pixels().filter(|p| is_opaque(p)) {
        let rgb = [p[0], p[1], p[2]];
        if lookup.contains_key(&rgb) {
            continue;
        }
        if exact.len() == MAX_OPAQUE {
            fits = false;
            break;
        }
        lookup.insert(rgb, exact.len() as u8);
        exact.push(rgb);
    }

    let mut palette = vec![0u8; 256 * 3];
    let mut indices = Vec::with_capacity((image.width() * image.height()) as usize);

    if fits {
        for (i, rgb) in exact.iter().enumerate() {
            palette[i * 3..i * 3 + 3].copy_from_slice(rgb);
        }
        for p in image.pixels() {
            let idx = if is_opaque(p) {
                lookup.get(&[p[0], p[1], p[2]]).copied().unwrap_or(GIF_TRANSPARENT_INDEX)
            } else {
                GIF_TRANSPARENT_INDEX
            };
            indices.push(idx);
        }
        return (palette, indices);
    }

    let opaque: Vec<u8> = image
        .pixels()
        .filter(|p| is_opaque(p))
        .flat_map(|p| [p[0], p[1], p[2], 255])
        .collect();
    let nq = color_quant::NeuQuant::new(10, MAX_OPAQUE, &opaque);
    for i in 0..MAX_OPAQUE {
        if let Some(color) = nq.lookup(i) {
            palette[i * 3] = color[0];
            palette[i * 3 + 1] = color[1];
            palette[i * 3 + 2] = color[2];
        }
    }
    for p in image.pixels() {
        let idx = if is_opaque(p) {
            nq.index_of(&[p[0], p[1], p[2], 255]) as u8
        } else {
            GIF_TRANSPARENT_INDEX
        };
        indices.push(idx);
    }
    (palette, indices)
}
