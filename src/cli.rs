// ============================================================================
// paintfe-project — headless layer compositing via command-line arguments
// ============================================================================
//
// Usage examples:
//   paintfe-project --layer bg.png --layer fg.png@25,25:multiply:0.5 -o out.png
//   paintfe-project -l "frames/*.png" --size 640x480 --engine graph -o flat.png
//   paintfe-project -l a.png -l b.png:screen --rect 0,0,64,64 -o crop.png -v
//
// Layers stack in the order given: the first one is the bottom layer.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use image::DynamicImage;

use crate::buffer::{BaseType, Encoding, PixelBuffer, Rect};
use crate::error::{CompositeError, Result};
use crate::stack::Image;
use crate::item::Layer;
use crate::ops::blend::BlendMode;
use crate::settings::{Engine, ProjectionSettings};
use crate::{log_err, log_info, logger};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// PaintFE headless layer compositor.
#[derive(Parser, Debug)]
#[command(
    name = "paintfe-project",
    about = "Composite PNG layers into a flattened projection",
    long_about = "Stack PNG files as layers (bottom first), each with its own offset,\n\
                  blend mode and opacity, and write the flattened projection.\n\n\
                  Layer syntax:  PATH[@X,Y][:MODE][:OPACITY]\n  \
                  paintfe-project -l bg.png -l glow.png@10,10:screen:0.75 -o out.png"
)]
pub struct CliArgs {
    /// Layer input, bottom first: PATH[@X,Y][:MODE][:OPACITY]. Glob patterns
    /// in PATH expand to several layers sharing the same options.
    #[arg(short, long = "layer", required = true, value_name = "LAYER")]
    pub layers: Vec<String>,

    /// Canvas size as WxH. Defaults to the extent of all layers.
    #[arg(short, long, value_name = "WxH")]
    pub size: Option<String>,

    /// Projection engine: legacy or graph. Defaults to the saved setting.
    #[arg(short, long, value_name = "ENGINE")]
    pub engine: Option<String>,

    /// Only construct and write this rectangle: X,Y,W,H.
    #[arg(short, long, value_name = "X,Y,W,H")]
    pub rect: Option<String>,

    /// Composite in grayscale instead of RGB.
    #[arg(long)]
    pub gray: bool,

    /// Output PNG path.
    #[arg(short, long, value_name = "FILE", default_value = "projection.png")]
    pub output: PathBuf,

    /// Print per-layer details and timing.
    #[arg(short, long)]
    pub verbose: bool,

    /// Write a session log, to FILE or to the default log location.
    #[arg(long, value_name = "FILE")]
    pub log: Option<Option<PathBuf>>,
}

/// One parsed `--layer` argument.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerSpec {
    pub pattern: String,
    pub offset: (i32, i32),
    pub mode: BlendMode,
    pub opacity: f64,
}

impl LayerSpec {
    /// Parse `PATH[@X,Y][:MODE][:OPACITY]`. Suffixes are taken from the right
    /// so paths containing ':' still work when no suffix follows them.
    pub fn parse(arg: &str) -> Result<Self> {
        let mut rest = arg;
        let mut mode = BlendMode::Normal;
        let mut opacity = 1.0;

        for _ in 0..2 {
            let Some((head, tail)) = rest.rsplit_once(':') else {
                break;
            };
            if let Some(o) = parse_opacity(tail) {
                opacity = o;
            } else if let Some(m) = BlendMode::from_name(tail) {
                mode = m;
            } else {
                break;
            }
            rest = head;
        }

        let mut offset = (0, 0);
        if let Some((path, pos)) = rest.rsplit_once('@')
            && let Some((x, y)) = pos.split_once(',')
        {
            let parse = |v: &str| {
                v.trim()
                    .parse::<i32>()
                    .map_err(|_| CompositeError::Settings(format!("bad layer offset '{}' in '{}'", pos, arg)))
            };
            offset = (parse(x)?, parse(y)?);
            rest = path;
        }

        if rest.is_empty() {
            return Err(CompositeError::Settings(format!("layer '{}' has no path", arg)));
        }
        Ok(Self { pattern: rest.to_string(), offset, mode, opacity })
    }
}

/// `0.5` or `50%`.
fn parse_opacity(s: &str) -> Option<f64> {
    let s = s.trim();
    let value = match s.strip_suffix('%') {
        Some(p) => p.parse::<f64>().ok()? / 100.0,
        None => s.parse::<f64>().ok()?,
    };
    (0.0..=1.0).contains(&value).then_some(value)
}

/// `WxH`.
pub fn parse_size(s: &str) -> Result<(u32, u32)> {
    let bad = || CompositeError::Settings(format!("bad size '{}', expected WxH", s));
    let (w, h) = s.to_ascii_lowercase().split_once('x').map(|(w, h)| (w.to_string(), h.to_string())).ok_or_else(bad)?;
    let w: u32 = w.trim().parse().map_err(|_| bad())?;
    let h: u32 = h.trim().parse().map_err(|_| bad())?;
    if w == 0 || h == 0 {
        return Err(bad());
    }
    Ok((w, h))
}

/// `X,Y,W,H`.
pub fn parse_rect(s: &str) -> Result<Rect> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let bad = || CompositeError::Settings(format!("bad rect '{}', expected X,Y,W,H", s));
    if parts.len() != 4 {
        return Err(bad());
    }
    let mut v = [0i32; 4];
    for (slot, p) in v.iter_mut().zip(&parts) {
        *slot = p.parse().map_err(|_| bad())?;
    }
    Ok(Rect::new(v[0], v[1], v[2], v[3]))
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the compositor and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    match args.log.as_ref() {
        Some(Some(path)) => logger::init_at(path),
        Some(None) => logger::init(),
        None => {}
    }
    logger::set_echo(args.verbose);
    let start = Instant::now();
    match composite(&args) {
        Ok(rect) => {
            if args.verbose {
                println!(
                    "  → {} {} ({:.0}ms)",
                    args.output.display(),
                    rect,
                    start.elapsed().as_secs_f64() * 1000.0
                );
                if let Some(path) = logger::log_path() {
                    println!("  log: {}", path.display());
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log_err!("composite failed: {}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn composite(args: &CliArgs) -> Result<Rect> {
    let mut settings = ProjectionSettings::load();
    if let Some(name) = &args.engine {
        settings.engine =
            Engine::parse(name).ok_or_else(|| CompositeError::Settings(format!("unknown engine '{}'", name)))?;
    }
    let base = if args.gray { BaseType::Gray } else { BaseType::Rgb };

    let mut layers = Vec::new();
    for arg in &args.layers {
        let spec = LayerSpec::parse(arg)?;
        let paths = resolve_inputs(&spec.pattern);
        if paths.is_empty() {
            return Err(CompositeError::Settings(format!("no files matched '{}'", spec.pattern)));
        }
        for path in paths {
            let pixels = load_layer(&path, base)?;
            if args.verbose {
                println!(
                    "  layer {} {}x{} {} @{},{} {} {:.0}%",
                    path.display(),
                    pixels.width(),
                    pixels.height(),
                    pixels.encoding(),
                    spec.offset.0,
                    spec.offset.1,
                    spec.mode,
                    spec.opacity * 100.0
                );
            }
            let name = path.file_name().map_or_else(|| arg.clone(), |n| n.to_string_lossy().into_owned());
            layers.push(
                Layer::new(name, pixels, spec.offset)
                    .with_mode(spec.mode)
                    .with_opacity(spec.opacity),
            );
        }
    }

    let (width, height) = match &args.size {
        Some(s) => parse_size(s)?,
        None => extent(&layers),
    };
    log_info!("compositing {} layers on {}x{} ({})", layers.len(), width, height, settings.engine.as_str());

    let mut image = Image::new(base, width, height, &settings);
    for layer in layers {
        image.add_layer(layer, None)?;
    }
    let rect = match &args.rect {
        Some(r) => parse_rect(r)?.intersect(&image.bounds()),
        None => image.bounds(),
    };
    if rect.is_empty() {
        return Err(CompositeError::Settings("requested rect lies outside the canvas".into()));
    }
    let pixels = image.projection_pixels(rect);
    pixels.to_rgba_image(None).save(&args.output)?;
    Ok(rect)
}

/// Decode a layer file into the encoding family of `base`.
fn load_layer(path: &Path, base: BaseType) -> Result<PixelBuffer> {
    let img = image::open(path)?;
    let pixels = match base {
        BaseType::Gray => match img {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageLumaA8(_) => PixelBuffer::from_dynamic(&img),
            other => PixelBuffer::from_dynamic(&DynamicImage::ImageLumaA8(other.to_luma_alpha8())),
        },
        _ => {
            let buf = PixelBuffer::from_dynamic(&img);
            if buf.encoding().base_type() == BaseType::Rgb {
                buf
            } else {
                PixelBuffer::from_rgba_image(&img.to_rgba8())
            }
        }
    };
    debug_assert!(matches!(
        pixels.encoding(),
        Encoding::Rgb | Encoding::Rgba | Encoding::Gray | Encoding::GrayA
    ));
    Ok(pixels)
}

/// Smallest canvas anchored at the origin that holds every layer.
fn extent(layers: &[Layer]) -> (u32, u32) {
    let r = layers.iter().fold(Rect::default(), |acc, l| acc.union(&l.bounds()));
    (r.right().max(1) as u32, r.bottom().max(1) as u32)
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand a glob pattern or literal path into an ordered list.
fn resolve_inputs(pattern: &str) -> Vec<PathBuf> {
    let as_path = Path::new(pattern);
    if as_path.exists() {
        return vec![as_path.to_path_buf()];
    }
    match glob::glob(pattern) {
        Ok(entries) => {
            let mut result: Vec<PathBuf> = entries.flatten().collect();
            result.sort();
            result.dedup();
            result
        }
        Err(e) => {
            eprintln!("warning: invalid glob '{}': {}", pattern, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_spec_suffixes() {
        let spec = LayerSpec::parse("fg.png@25,-3:multiply:0.5").unwrap();
        assert_eq!(spec.pattern, "fg.png");
        assert_eq!(spec.offset, (25, -3));
        assert_eq!(spec.mode, BlendMode::Multiply);
        assert_eq!(spec.opacity, 0.5);

        let spec = LayerSpec::parse("dir/*.png:75%").unwrap();
        assert_eq!(spec.pattern, "dir/*.png");
        assert_eq!(spec.mode, BlendMode::Normal);
        assert_eq!(spec.opacity, 0.75);

        let spec = LayerSpec::parse("C:\\layers\\a.png").unwrap();
        assert_eq!(spec.pattern, "C:\\layers\\a.png");
    }

    #[test]
    fn layer_spec_errors() {
        assert!(LayerSpec::parse("a.png@x,1").is_err());
        assert!(LayerSpec::parse(":screen").is_err());
    }

    #[test]
    fn size_and_rect() {
        assert_eq!(parse_size("640x480").unwrap(), (640, 480));
        assert!(parse_size("640").is_err());
        assert!(parse_size("0x4").is_err());
        assert_eq!(parse_rect("1, 2,3,4").unwrap(), Rect::new(1, 2, 3, 4));
        assert!(parse_rect("1,2,3").is_err());
    }

    #[test]
    fn extent_covers_offsets() {
        let layers = vec![
            Layer::new("a", PixelBuffer::new(Encoding::Rgb, 10, 10), (0, 0)),
            Layer::new("b", PixelBuffer::new(Encoding::Rgba, 5, 5), (20, 3)),
        ];
        assert_eq!(extent(&layers), (25, 10));
    }
}
