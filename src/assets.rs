use crate::settings_types::AssetSettings;
use anyhow::{Context, bail};
use formats::dat::{DatCapabilities, DatFormat};
use formats::otfi::Otfi;
use rendering::AssetCache;
use std::path::PathBuf;
use tracing::info;

/// Fully resolved description of one asset set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetSet {
    pub metadata: PathBuf,
    pub sprites: PathBuf,
    pub format: DatFormat,
    pub capabilities: DatCapabilities,
}

impl AssetSet {
    /// Format defaults, then the OTFI file, then explicit overrides.
    pub fn resolve(settings: &AssetSettings) -> anyhow::Result<Self> {
        let Some(directory) = settings.directory.as_deref() else {
            bail!("no asset directory configured");
        };
        let format = DatFormat::from_client_version(settings.client_version);
        let mut capabilities = DatCapabilities::for_format(format);

        let otfi_path = match &settings.otfi {
            Some(path) => Some(path.clone()),
            None => {
                let stem = settings
                    .metadata_file
                    .rsplit_once('.')
                    .map_or(settings.metadata_file.as_str(), |(stem, _)| stem);
                let candidate = directory.join(format!("{}.otfi", stem));
                candidate.exists().then_some(candidate)
            }
        };

        let (metadata, sprites) = match otfi_path {
            Some(path) => {
                let otfi = Otfi::load(&path)?;
                capabilities = otfi.apply(capabilities);
                let base = path.parent().unwrap_or(directory);
                otfi.resolve_files(base, &settings.metadata_file, &settings.sprites_file)
            }
            None => (
                directory.join(&settings.metadata_file),
                directory.join(&settings.sprites_file),
            ),
        };

        if let Some(v) = settings.extended {
            capabilities.extended = v;
        }
        if let Some(v) = settings.transparency {
            capabilities.transparency = v;
        }
        if let Some(v) = settings.frame_durations {
            capabilities.frame_durations = v;
        }
        if let Some(v) = settings.frame_groups {
            capabilities.frame_groups = v;
        }

        Ok(Self {
            metadata,
            sprites,
            format,
            capabilities,
        })
    }
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub warnings: Vec<String>,
    pub editor_sprites: usize,
}

/// Replaces whatever the cache holds with the given asset set. Metadata
/// failures abort the load and leave the cache empty.
pub fn load_assets(
    cache: &mut AssetCache,
    settings: &AssetSettings,
    assets: &AssetSet,
) -> anyhow::Result<LoadReport> {
    cache.clear();
    let mut report = LoadReport::default();

    if let Some(dir) = settings.editor_sprites_dir.as_deref() {
        if cache.database().editor_sprite_count() == 0 {
            report.editor_sprites = cache.load_editor_sprites(dir, &settings.editor_sprites);
        }
    }

    let mut warnings = cache
        .load_sprite_metadata(&assets.metadata, assets.format, assets.capabilities)
        .with_context(|| format!("loading {}", assets.metadata.display()))?;
    report.warnings.append(&mut warnings);

    match cache.load_sprite_data(&assets.sprites) {
        Ok(mut warnings) => report.warnings.append(&mut warnings),
        Err(e) => {
            cache.clear();
            return Err(e.context(format!("loading {}", assets.sprites.display())));
        }
    }

    info!(
        sprites = cache.database().sprite_count(),
        images = cache.database().image_count(),
        warnings = report.warnings.len(),
        "Asset set loaded"
    );
    Ok(report)
}
