use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand, ValueEnum};
use spatial_rgb_core::{
    AppConfig, Assignment, CancelToken, DeviceBus, DeviceKind, DeviceReference, EffectId,
    EffectInstance, EffectKind, EffectManager, EffectSettings, EngineEvent, GridDimensions,
    GridPosition, LayoutFile, MemoryDevice, MemoryDevices, PatternTester, RgbColor, SharedGrid,
    SpatialGrid, TickLoop, TickRate,
};
use tracing_subscriber::EnvFilter;

fn main() -> spatial_rgb_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_or_default(path),
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Demo {
            effect,
            seconds,
            width,
            height,
            depth,
            power_save,
            save_layout,
        } => {
            let dimensions = GridDimensions::new(
                width.unwrap_or(config.grid.width),
                height.unwrap_or(config.grid.height),
                depth.unwrap_or(config.grid.depth),
            );
            let rate = if power_save {
                TickRate::PowerSave
            } else {
                config.engine.tick_rate
            };
            run_demo(&config, &effect, seconds, dimensions, rate, save_layout)
        }
        Commands::Inspect { layout } => run_inspect(&layout),
        Commands::Pattern { pattern, seconds } => run_pattern(&config, pattern, seconds),
    }
}

fn run_demo(
    config: &AppConfig,
    effect: &str,
    seconds: f32,
    dimensions: GridDimensions,
    rate: TickRate,
    save_layout: Option<PathBuf>,
) -> spatial_rgb_core::Result<()> {
    let kind: EffectKind = effect.parse()?;
    tracing::info!(%kind, %dimensions, ?rate, seconds, "starting demo");

    let (grid, devices) = build_rig(dimensions)?;
    if let Some(path) = &save_layout {
        LayoutFile::capture(&grid.read(), Some(&devices)).save(path)?;
        tracing::info!(path = %path.display(), "layout written");
    }

    let mut manager = EffectManager::new(Arc::clone(&grid), DeviceBus::new(devices.clone()));
    manager.configure(&config.engine);
    manager.set_tick_rate(rate);
    manager.subscribe(|event| match event {
        EngineEvent::Fault { id, reason } => tracing::error!(effect = %id, %reason, "effect fault"),
        EngineEvent::Rejected(err) => tracing::warn!(error = %err, "request rejected"),
        other => tracing::debug!(?other, "engine event"),
    });

    let id = EffectId::from(kind.as_str());
    let settings = EffectSettings {
        colors: vec![RgbColor::new(255, 64, 0), RgbColor::new(0, 64, 255)],
        ..EffectSettings::default()
    };
    let instance = EffectInstance::of_kind(kind, settings)
        .ok_or_else(|| format!("`{kind}` has no built-in implementation"))?;
    manager.register(id.clone(), instance)?;
    let everything: Vec<_> = grid.read().placements();
    manager.bind_devices(&id, everything)?;
    manager.set_preview_effect(Some(id.clone()))?;
    manager.start(&id)?;

    let total = Duration::from_secs_f32(seconds.max(0.0));
    let mut ticker = TickLoop::new(rate);
    let mut frames = 0u64;
    let mut writes = 0usize;
    while ticker.elapsed() < total && manager.is_running(&id) {
        let delta = ticker.wait();
        let summary = manager.tick(delta);
        frames += 1;
        writes += summary.writes;
        if frames % u64::from(rate.hz()) == 0 {
            let lit = manager
                .preview_colors()
                .values()
                .filter(|color| !color.is_black())
                .count();
            tracing::info!(frames, lit, elapsed = ?ticker.elapsed(), "demo running");
        }
    }
    manager.stop_all();

    tracing::info!(frames, writes, commits = devices.commits(0), "demo finished");
    print_layer(&grid, 0);
    Ok(())
}

fn run_inspect(path: &PathBuf) -> spatial_rgb_core::Result<()> {
    let file = LayoutFile::load_or_default(path);
    let mut grid = SpatialGrid::new();
    let report = file.restore(&mut grid, None)?;
    tracing::info!(?report, "layout loaded");

    println!("grid {}", grid.dimensions());
    match grid.user_position() {
        Some(position) => println!(
            "reference point {position} ({})",
            grid.position_label(position)
        ),
        None => println!("no reference point"),
    }
    for z in 0..grid.dimensions().depth {
        println!("{}", grid.layer_label(z));
        for position in grid.assigned_positions().into_iter().filter(|p| p.z == z as i32) {
            let devices: Vec<String> = grid
                .assignments(position)
                .iter()
                .map(|a| format!("{} {}", a.reference, a.color))
                .collect();
            println!("  {position} {:<14} {}", grid.position_label(position), devices.join(", "));
        }
    }
    Ok(())
}

fn run_pattern(
    config: &AppConfig,
    pattern: PatternChoice,
    seconds: f32,
) -> spatial_rgb_core::Result<()> {
    let (grid, devices) = build_rig(config.grid)?;
    let mut tester = PatternTester::new(
        Arc::clone(&grid),
        DeviceBus::new(devices.clone()),
        config.pattern.clone(),
    );

    match pattern {
        PatternChoice::All => {
            let written = tester.test_all_positions()?;
            tracing::info!(written, "all positions lit");
        }
        PatternChoice::Layers => {
            let delay = Duration::from_millis(config.pattern.layer_delay_ms);
            for z in 0..grid.read().dimensions().depth {
                let lit = tester.test_layer(z, delay, &CancelToken::new())?;
                tracing::info!(layer = z, lit, "layer swept");
            }
        }
        PatternChoice::Distance | PatternChoice::Wave => {
            let start = Instant::now();
            if pattern == PatternChoice::Distance {
                tester.start_distance_pattern(start)?;
            } else {
                tester.start_wave_pattern(start)?;
            }
            let total = Duration::from_secs_f32(seconds.max(0.0));
            let mut ticker = TickLoop::new(TickRate::Normal);
            while ticker.elapsed() < total {
                ticker.wait();
                tester.poll(Instant::now())?;
            }
        }
    }

    print_layer(&grid, 0);
    let reset = tester.stop()?;
    tracing::info!(reset, commits = devices.commits(0), "pattern stopped");
    Ok(())
}

/// One strip with an LED on every cell, reference point in the middle of
/// the bottom layer.
fn build_rig(dimensions: GridDimensions) -> spatial_rgb_core::Result<(SharedGrid, MemoryDevices)> {
    let mut grid = SpatialGrid::with_dimensions(dimensions)?;
    for (i, position) in dimensions.positions().enumerate() {
        let reference = DeviceReference::led(0, DeviceKind::Rgb, i);
        grid.add_assignment(position, Assignment::new(reference))?;
    }
    grid.set_user_position(GridPosition::new(
        (dimensions.width / 2) as i32,
        (dimensions.height / 2) as i32,
        0,
    ))?;
    let devices = MemoryDevices::new(vec![MemoryDevice::strip(
        "demo strip",
        dimensions.cell_count(),
    )]);
    Ok((grid.into_shared(), devices))
}

fn print_layer(grid: &SharedGrid, z: i32) {
    let grid = grid.read();
    let dimensions = grid.dimensions();
    println!("{}", grid.layer_label(z as u32));
    for y in 0..dimensions.height as i32 {
        let row: Vec<String> = (0..dimensions.width as i32)
            .map(|x| {
                grid.assignments(GridPosition::new(x, y, z))
                    .first()
                    .map_or_else(|| "-------".to_string(), |a| a.color.to_string())
            })
            .collect();
        println!("  {}", row.join(" "));
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Spatial RGB effect engine", long_about = None)]
struct Cli {
    /// Configuration file; defaults are used when missing or unreadable.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one effect against an in-memory LED grid.
    Demo {
        /// distance, wave or explosion.
        #[arg(short, long, default_value = "wave")]
        effect: String,
        #[arg(short, long, default_value_t = 3.0)]
        seconds: f32,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long)]
        depth: Option<u32>,
        /// Tick at the reduced power-save rate.
        #[arg(long)]
        power_save: bool,
        /// Also write the generated layout to this file.
        #[arg(long)]
        save_layout: Option<PathBuf>,
    },
    /// Print the contents of a saved layout.
    Inspect {
        layout: PathBuf,
    },
    /// Run a diagnostic pattern against an in-memory LED grid.
    Pattern {
        #[arg(value_enum)]
        pattern: PatternChoice,
        #[arg(short, long, default_value_t = 2.0)]
        seconds: f32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PatternChoice {
    Distance,
    Wave,
    All,
    Layers,
}
