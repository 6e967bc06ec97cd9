// ============================================================================
// PixelForge CLI — headless export and sheet ingestion
// ============================================================================
//
// Usage examples:
//   pixelforge -i walk.json -o walk.gif                  (format inferred from output ext)
//   pixelforge -i walk.pxf -f sheet --columns 4 --padding 1 -o sheet.png
//   pixelforge -i walk.json -f frames --output-dir frames/ --scale 8
//   pixelforge -i sheet.png --cell 16x16 -o walk.json     (slice a sheet into frames)
//   pixelforge -i "sprites/*.json" -f png --output-dir out/
//
// Everything runs synchronously on the current thread.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::canvas::{CanvasState, MAX_CANVAS_DIM};
use crate::components::history::HistoryManager;
use crate::io::{self, ProjectFormat};
use crate::ops::{canvas_ops, import};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// PixelForge headless exporter.
///
/// Export projects to PNG, spritesheets, GIF and APNG, or turn spritesheets
/// into projects, without opening an editor.
#[derive(Parser, Debug)]
#[command(
    name = "pixelforge",
    about = "PixelForge headless pixel-art exporter",
    long_about = "Export PixelForge projects (.json, .pxf) to PNG frames, spritesheets,\n\
                  animated GIF or APNG, and slice raster spritesheets into projects.\n\n\
                  Example:\n  \
                  pixelforge -i walk.json -o walk.gif --scale 4\n  \
                  pixelforge -i sheet.png --cell 16x16 -o walk.json"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.json", "sheets/*.png").
    /// Projects keep all layers and frames; images are sliced with --cell.
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    /// For batch input use --output-dir instead.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing and for `frames` output.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, sheet, gif, apng, frames, json, pxf.
    /// When omitted, the format is inferred from --output's extension, defaulting to png.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Integer upscale factor for raster output.
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub scale: u32,

    /// Frame to export for single-image png output.
    #[arg(long, default_value_t = 0, value_name = "N")]
    pub frame: usize,

    /// Spritesheet columns (default: all frames in one row).
    #[arg(long, value_name = "N")]
    pub columns: Option<u32>,

    /// Transparent pixels between spritesheet cells.
    #[arg(long, default_value_t = 0, value_name = "N")]
    pub padding: u32,

    /// Cell size when slicing an image input, e.g. 16x16 (default: whole image).
    #[arg(long, value_name = "WxH", value_parser = parse_cell)]
    pub cell: Option<(u32, u32)>,

    /// Print per-file timing and debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Sheet,
    Gif,
    Apng,
    Frames,
    Json,
    Pxf,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png | Self::Sheet | Self::Apng | Self::Frames => "png",
            Self::Gif => "gif",
            Self::Json => "json",
            Self::Pxf => "pxf",
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    // Resolve glob patterns / literal paths → concrete PathBufs
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    // Multiple inputs require --output-dir, not --output
    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let format = match parse_format(args.format.as_deref(), args.output.as_deref()) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }

        let file_start = Instant::now();

        let Some(output_path) = build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref(), format)
        else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        match run_one(input_path, &output_path, format, &args) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                tracing::error!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(input: &Path, output: &Path, format: OutputFormat, args: &CliArgs) -> Result<(), String> {
    // -- Step 1: Load ----------------------------------------------------
    let state = if ProjectFormat::from_path(input).is_some() {
        io::load_project(input).map_err(|e| format!("load failed: {}", e))?
    } else {
        load_sheet(input, args.cell)?
    };

    // -- Step 2: Write ---------------------------------------------------
    let scale = args.scale.max(1);
    match format {
        OutputFormat::Png => io::export_png_frame(&state, args.frame, scale, output).map_err(|e| e.to_string()),
        OutputFormat::Sheet => {
            let columns = args.columns.unwrap_or(state.frames.len() as u32);
            io::export_spritesheet(&state, columns, args.padding, scale, output).map_err(|e| e.to_string())
        }
        OutputFormat::Gif => io::export_gif(&state, scale, output).map_err(|e| e.to_string()),
        OutputFormat::Apng => io::export_apng(&state, scale, output).map_err(|e| e.to_string()),
        OutputFormat::Frames => {
            let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "frame".into());
            io::export_frames_dir(&state, scale, output, &stem)
                .map(|_| ())
                .map_err(|e| e.to_string())
        }
        OutputFormat::Json | OutputFormat::Pxf => {
            io::save_project(&state, output).map_err(|e| format!("save failed: {}", e))
        }
    }
}

/// Slices a raster sheet into a fresh project, one frame per non-empty cell.
fn load_sheet(input: &Path, cell: Option<(u32, u32)>) -> Result<CanvasState, String> {
    let img = image::open(input).map_err(|e| format!("load failed: {}", e))?.into_rgba8();
    let (cw, ch) = cell.unwrap_or((img.width(), img.height()));
    if cw == 0 || ch == 0 || cw > MAX_CANVAS_DIM || ch > MAX_CANVAS_DIM {
        return Err(format!("invalid cell size {}x{}", cw, ch));
    }

    let mut state = CanvasState::new(cw, ch);
    let mut history = HistoryManager::new(1);
    let added = import::import_spritesheet(&mut state, &mut history, &img, cw, ch, 0).map_err(|e| e.to_string())?;
    if added == 0 {
        return Err("sheet has no opaque cells".to_string());
    }
    // Drop the blank frame the new project started with.
    canvas_ops::delete_frame(&mut state, &mut history, 0);
    state.current_frame_index = 0;
    tracing::info!("sliced {} into {} frames of {}x{}", input.display(), added, cw, ch);
    Ok(state)
}

// ============================================================================
// Helpers
// ============================================================================

/// Parses `WxH` (also `W` alone for square cells).
fn parse_cell(s: &str) -> Result<(u32, u32), String> {
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|_| format!("invalid cell size '{}'", s));
    match s.to_ascii_lowercase().split_once('x') {
        Some((w, h)) => Ok((parse(w)?, parse(h)?)),
        None => {
            let n = parse(s)?;
            Ok((n, n))
        }
    }
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Choose the [`OutputFormat`] from the `--format` string or infer it from
/// the output file extension. Defaults to PNG when neither is given.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<OutputFormat, String> {
    if let Some(f) = format_arg {
        return match f.to_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "sheet" | "spritesheet" => Ok(OutputFormat::Sheet),
            "gif" => Ok(OutputFormat::Gif),
            "apng" => Ok(OutputFormat::Apng),
            "frames" => Ok(OutputFormat::Frames),
            "json" => Ok(OutputFormat::Json),
            "pxf" => Ok(OutputFormat::Pxf),
            other => Err(format!("unknown format '{}'", other)),
        };
    }

    let ext = output
        .and_then(|o| o.extension())
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    Ok(match ext.as_str() {
        "gif" => OutputFormat::Gif,
        "apng" => OutputFormat::Apng,
        "json" => OutputFormat::Json,
        "pxf" => OutputFormat::Pxf,
        _ => OutputFormat::Png,
    })
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem;
///    `frames` output goes into the directory itself)
/// 3. Fallback: same directory as input, same stem, new extension
///    (appends `_out` to stem if it would collide with the input path)
fn build_output_path(input: &Path, output: Option<&Path>, output_dir: Option<&Path>, format: OutputFormat) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        if format == OutputFormat::Frames {
            return Some(dir.to_path_buf());
        }
        return Some(dir.join(format!("{}.{}", stem, format.extension())));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    if format == OutputFormat::Frames {
        return Some(parent.join(format!("{}_frames", stem)));
    }
    let candidate = parent.join(format!("{}.{}", stem, format.extension()));

    // Avoid silent overwrite of the input
    if candidate == input {
        Some(parent.join(format!("{}_out.{}", stem, format.extension())))
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell("16x8"), Ok((16, 8)));
        assert_eq!(parse_cell("32"), Ok((32, 32)));
        assert!(parse_cell("axb").is_err());
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(parse_format(Some("SHEET"), None), Ok(OutputFormat::Sheet));
        assert_eq!(parse_format(None, Some(Path::new("a.gif"))), Ok(OutputFormat::Gif));
        assert_eq!(parse_format(None, Some(Path::new("a.pxf"))), Ok(OutputFormat::Pxf));
        assert_eq!(parse_format(None, None), Ok(OutputFormat::Png));
        assert!(parse_format(Some("tiff"), None).is_err());
    }

    #[test]
    fn test_output_path_avoids_overwriting_input() {
        let p = build_output_path(Path::new("dir/walk.json"), None, None, OutputFormat::Json).unwrap();
        assert_eq!(p, PathBuf::from("dir/walk_out.json"));
        let p = build_output_path(Path::new("dir/walk.json"), None, Some(Path::new("out")), OutputFormat::Gif).unwrap();
        assert_eq!(p, PathBuf::from("out/walk.gif"));
        let p = build_output_path(Path::new("walk.json"), None, Some(Path::new("out")), OutputFormat::Frames).unwrap();
        assert_eq!(p, PathBuf::from("out"));
    }

    #[test]
    fn test_sheet_to_project_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let sheet = dir.path().join("sheet.png");
        let mut img = RgbaImage::new(8, 4);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(5, 1, Rgba([0, 255, 0, 255]));
        img.save(&sheet).unwrap();

        let project = dir.path().join("walk.json");
        let args = CliArgs::parse_from([
            "pixelforge",
            "-i",
            sheet.to_str().unwrap(),
            "--cell",
            "4x4",
            "-o",
            project.to_str().unwrap(),
        ]);
        assert_eq!(run(args), ExitCode::SUCCESS);

        let state = io::load_project(&project).unwrap();
        assert_eq!((state.width, state.height), (4, 4));
        assert_eq!(state.frames.len(), 2);

        let gif = dir.path().join("walk.gif");
        let args = CliArgs::parse_from(["pixelforge", "-i", project.to_str().unwrap(), "-o", gif.to_str().unwrap()]);
        assert_eq!(run(args), ExitCode::SUCCESS);
        assert!(gif.exists());
    }

    #[test]
    fn test_missing_input_fails() {
        let args = CliArgs::parse_from(["pixelforge", "-i", "/nonexistent/nothing-*.json"]);
        assert_eq!(run(args), ExitCode::FAILURE);
    }
}
