use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rendering::{AssetCache, SpriteCoords};
use spritedeck::assets::{self, AssetSet};
use spritedeck::logging;
use spritedeck::settings::Settings;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "spritedeck")]
#[command(about = "Inspect and exercise the sprite pipeline of a tile-map asset set")]
struct Cli {
    /// Settings file to use instead of the per-user one.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Asset directory, overriding the settings file.
    #[arg(long, global = true)]
    assets: Option<PathBuf>,

    #[arg(long, global = true)]
    client_version: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print counts and format of the asset set.
    Info,
    /// Decode one image to a PNG file.
    Dump {
        #[arg(long)]
        id: u32,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Run the preload, update and eviction loop over every sprite.
    Stress {
        #[arg(long, default_value_t = 60)]
        frames: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match cli.config.as_deref() {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    logging::init(&settings.logging.filter);

    if let Some(dir) = cli.assets {
        settings.assets.directory = Some(dir);
        settings.assets.otfi = None;
    }
    if let Some(version) = cli.client_version {
        settings.assets.client_version = version;
    }

    let asset_set = AssetSet::resolve(&settings.assets)?;
    let mut cache = AssetCache::new(settings.textures.clone())?;
    let report = assets::load_assets(&mut cache, &settings.assets, &asset_set)?;

    match cli.command {
        Commands::Info => print_info(&cache, &asset_set, report.warnings.len()),
        Commands::Dump { id, out } => dump(&mut cache, id, &out)?,
        Commands::Stress { frames } => stress(&mut cache, frames),
    }
    Ok(())
}

fn print_info(cache: &AssetCache, asset_set: &AssetSet, warnings: usize) {
    let db = cache.database();
    println!("metadata:      {}", asset_set.metadata.display());
    println!("sprites:       {}", asset_set.sprites.display());
    println!("format:        {:?}", db.format());
    println!("capabilities:  {:?}", db.capabilities());
    println!("items:         {}", db.item_count());
    println!("creatures:     {}", db.creature_count());
    println!("game sprites:  {}", db.sprite_count());
    println!("images:        {}", db.image_count());
    println!("editor:        {}", db.editor_sprite_count());
    println!("warnings:      {}", warnings);
}

fn dump(cache: &mut AssetCache, id: u32, out: &Path) -> Result<()> {
    let Some(pixels) = cache.image_rgba(id) else {
        bail!("image {} has no pixel data", id);
    };
    let side = formats::codec::SPRITE_PIXELS as u32;

    let file = File::create(out).with_context(|| format!("creating {}", out.display()))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), side, side);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&pixels)?;
    info!(id, out = %out.display(), "Wrote sprite");
    Ok(())
}

fn stress(cache: &mut AssetCache, frames: u32) {
    let first = formats::dat::MIN_ID;
    let last = cache.database().max_sprite_id();
    let mut queued = 0;
    let mut applied = 0;
    let mut evicted = 0;

    for frame in 0..frames {
        cache.update_time();
        for id in first..=last {
            queued += cache.preload(id, 0, 0, 0, frame as usize);
        }
        applied += cache.update();
        for id in first..=last {
            let coords = SpriteCoords {
                frame: frame as usize,
                ..Default::default()
            };
            cache.atlas_region(id, &coords);
        }
        evicted += cache.garbage_collection();
    }
    applied += cache.update();

    println!("frames:          {}", frames);
    println!("tasks queued:    {}", queued);
    println!("async interned:  {}", applied);
    println!("evicted:         {}", evicted);
    println!("loaded textures: {}", cache.gc().loaded_textures());
    println!("resident dumps:  {}", cache.gc().resident_dumps());
    println!("atlas layers:    {}", cache.atlas().layer_count());
    println!(
        "suspicious:      {} transparent, {} black",
        cache.diagnostics().transparent_count(),
        cache.diagnostics().black_count()
    );
}
