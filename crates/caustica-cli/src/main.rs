//! Caustica CLI - compute a caustic lens surface from a target image

use anyhow::{Context, Result};
use caustica_core::prelude::*;
use clap::{Parser, ValueEnum};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "caustica")]
#[command(about = "Caustic lens surface computation from target images", long_about = None)]
#[command(version)]
struct Cli {
    /// Target image (decoded to grayscale)
    input: PathBuf,

    /// Output OBJ file for the solidified lens
    #[arg(short, long, default_value = "lens.obj")]
    output: PathBuf,

    /// Physical slab width (slab height follows the image aspect ratio)
    #[arg(long, default_value = "100.0")]
    width: f64,

    /// Distance from the lens to the projection screen
    #[arg(short, long, default_value = "200.0")]
    focal_length: f64,

    /// Slab thickness of the solidified lens
    #[arg(short, long, default_value = "5.0")]
    thickness: f64,

    /// Lens mesh resolution along x (y follows the aspect ratio)
    #[arg(short, long, default_value = "64")]
    resolution: usize,

    /// Worker threads for the Poisson solver (0 = all cores)
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Transport iteration cap
    #[arg(long, default_value = "100")]
    max_iterations: usize,

    /// Which lattice carries the solved surface
    #[arg(long, value_enum, default_value_t = SurfaceArg::Source)]
    surface: SurfaceArg,

    /// Directory for per-iteration diagnostic images and SVGs
    #[arg(long)]
    diagnostics: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SurfaceArg {
    /// Heights on the fixed source lattice
    Source,
    /// Heights on the deformed target lattice
    Target,
}

impl From<SurfaceArg> for HeightSurface {
    fn from(arg: SurfaceArg) -> Self {
        match arg {
            SurfaceArg::Source => HeightSurface::SourceSurface,
            SurfaceArg::Target => HeightSurface::TargetSurface,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("failed to size the worker pool")?;
    }

    let img = image::open(&cli.input)
        .with_context(|| format!("failed to open {}", cli.input.display()))?;
    let aspect_ratio = f64::from(img.width()) / f64::from(img.height());
    info!(
        image = %cli.input.display(),
        width = img.width(),
        height = img.height(),
        aspect_ratio,
        "loaded target image"
    );

    let mut config = Config::default()
        .with_width(cli.width)
        .with_aspect_ratio(aspect_ratio)
        .with_focal_length(cli.focal_length)
        .with_thickness(cli.thickness)
        .with_mesh_resolution(cli.resolution)
        .with_height_surface(cli.surface.into());
    config.max_transport_iterations = cli.max_iterations;

    let pixels = image_to_grid(&img, config.resolution_x(), config.resolution_y());
    let mut engine = Engine::new(config, &pixels)?;

    if let Some(dir) = &cli.diagnostics {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    info!("starting transport solver");
    for iteration in 0..cli.max_iterations {
        let step = engine.transport_iteration();
        info!(iteration, step, "transport iteration");

        if let Some(dir) = &cli.diagnostics {
            export_transport_diagnostics(&mut engine, dir)?;
        }
        if !step.is_nan() && step < engine.config().transport_tolerance {
            info!(iteration, "transport converged");
            break;
        }
    }

    info!("starting height solver");
    let height_iterations = engine.solve_height();
    info!(height_iterations, "height solver finished");

    if let Some(dir) = &cli.diagnostics {
        export_grid_png(engine.height_grid(), &dir.join("h.png"))?;
        export_grid_png(engine.divergence_grid(), &dir.join("div.png"))?;
    }

    let solid = engine.solidify();
    export_obj(&solid, &cli.output)?;
    info!(
        output = %cli.output.display(),
        vertices = solid.vertices.len(),
        triangles = solid.triangles.len(),
        "exported solidified lens"
    );
    Ok(())
}

/// Decode to a grayscale grid on `[0, 1]`, resampled to the raster size.
///
/// Uses the luminosity weighting `0.299 R + 0.587 G + 0.114 B` and
/// stretches the result to the full unit range.
fn image_to_grid(img: &image::DynamicImage, res_x: usize, res_y: usize) -> Grid {
    let resized = img
        .resize_exact(res_x as u32, res_y as u32, FilterType::Triangle)
        .to_rgb8();
    let grid = Grid::from_fn(res_x, res_y, |row, col| {
        let p = resized.get_pixel(col as u32, row as u32);
        let r = f64::from(p.0[0]) / 255.0;
        let g = f64::from(p.0[1]) / 255.0;
        let b = f64::from(p.0[2]) / 255.0;
        0.299 * r + 0.587 * g + 0.114 * b
    });
    grid.rescaled(0.0, 1.0)
}

/// Write the per-iteration transport diagnostics the solver exposes
fn export_transport_diagnostics(engine: &mut Engine, dir: &Path) -> Result<()> {
    let cell_values = rescale_unit(engine.errors());
    export_cells_svg(
        engine.target_cells(),
        &cell_values,
        engine.config().width,
        engine.config().height(),
        &dir.join("cells.svg"),
    )?;
    export_grid_png(engine.raster(), &dir.join("raster.png"))?;
    export_grid_png(engine.phi(), &dir.join("phi.png"))?;
    let (gx, gy) = engine.gradient();
    export_grid_png(gx, &dir.join("gradient_x.png"))?;
    export_grid_png(gy, &dir.join("gradient_y.png"))?;
    export_parameterization_svg(engine.mesh(), &dir.join("parameterization.svg"))?;
    export_inverted_map_svg(engine.mesh_mut(), &dir.join("inverted.svg"))?;
    Ok(())
}

/// Map a scalar slice onto `[0, 1]`; constant input collapses to zero
fn rescale_unit(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    if !span.is_finite() || span <= f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / span).collect()
}
