/// Command line front end: load one binary STL and report what was loaded.
///
/// With `--output`, the decoded positions are written straight into a
/// memory-mapped file instead of a heap buffer.
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use memmap2::MmapMut;

use stl_loader::{panic_handler, GeometrySink, LoaderConfig, MeshLoader, BUILTIN_SPHERE};

#[derive(Parser)]
#[command(author, version, about = "Staged parallel loader for binary STL files", long_about = None)]
struct Args {
    #[arg(help = "STL file to load (defaults to the built-in sphere)")]
    file: Option<String>,
    #[arg(short = 'j', long = "workers", help = "Number of decode workers")]
    workers: Option<usize>,
    #[arg(short = 'c', long = "config", help = "TOML loader configuration")]
    config: Option<PathBuf>,
    #[arg(short = 'o', long = "output", help = "Write decoded positions to this file")]
    output: Option<PathBuf>,
    #[arg(long = "panic-log", help = "Append panic reports to this file")]
    panic_log: Option<PathBuf>,
    #[arg(short = 'v', action = clap::ArgAction::Count, help = "Sets the level of verbosity")]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
    panic_handler::install(args.panic_log.clone());

    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    };
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }

    let locator = args.file.as_deref().unwrap_or(BUILTIN_SPHERE);
    let result = match &args.output {
        Some(path) => load(locator, &config, |len| map_output(path, len)),
        None => load(locator, &config, |len| Ok(vec![0u8; len])),
    };

    let panics = panic_handler::panic_count();
    if panics > 0 {
        log::warn!("{} thread(s) panicked during the load", panics);
    }
    result
}

fn map_output(path: &Path, len: usize) -> Result<MmapMut> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.set_len(len as u64)
        .with_context(|| format!("Failed to size {}", path.display()))?;
    // SAFETY: the file was just created by us and is not shared with
    // another process while mapped.
    let map = unsafe { MmapMut::map_mut(&file) }
        .with_context(|| format!("Failed to map {}", path.display()))?;
    Ok(map)
}

fn load<B, F>(locator: &str, config: &LoaderConfig, allocate: F) -> Result<()>
where
    B: GeometrySink + Flush,
    F: FnOnce(usize) -> Result<B>,
{
    let loader = MeshLoader::<B>::spawn(locator, config)?;

    if let Ok(count) = loader.wait_triangle_count() {
        log::info!("{}: {} triangles", locator, count);
        let len = loader.destination_len().unwrap_or(0);
        let buffer = allocate(len)?;
        if let Err(rejected) = loader.publish_buffer(buffer) {
            log::warn!("{}", rejected);
        }
    }

    let mesh = match loader.finish() {
        Ok(mesh) => mesh,
        Err(failure) => bail!("failed to load {}: {}", locator, failure),
    };
    mesh.buffer.flush_to_backing()?;

    let stages: Vec<String> = mesh.history.iter().map(ToString::to_string).collect();
    println!("loaded {} triangles from {}", mesh.triangle_count, locator);
    println!("stages: {}", stages.join(" -> "));
    println!("normalization transform (columns):");
    for column in mesh.transform.to_cols_array_2d() {
        println!("  {:?}", column);
    }
    Ok(())
}

/// Persist a destination after loading; a no-op for heap buffers.
trait Flush {
    fn flush_to_backing(&self) -> Result<()>;
}

impl Flush for Vec<u8> {
    fn flush_to_backing(&self) -> Result<()> {
        Ok(())
    }
}

impl Flush for MmapMut {
    fn flush_to_backing(&self) -> Result<()> {
        self.flush().context("Failed to flush output mapping")
    }
}
