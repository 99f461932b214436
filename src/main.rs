use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Parser, Subcommand};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rootcause::prelude::*;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use uassetkit::inject::inject_all;
use uassetkit::model::{AnimationData, MeshData, SkeletonData, TextureData, TrackCompression};
use uassetkit::objects::{AssetKind, DecodedExport};
use uassetkit::package::{AssetFile, AssetSources, SerializedAsset};
use uassetkit::version::{EngineVersion, ParseOptions};

/// Inspect, verify and edit cooked Unreal packages
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine release the packages were cooked with, such as 4.27, 5.0, ff7r or kh3
    #[arg(short, long, global = true, default_value = "4.27", value_parser = parse_engine)]
    engine: EngineVersion,

    /// Keep exports with unsupported layouts as generic properties instead of failing
    #[arg(long, global = true)]
    lenient: bool,

    /// Log more (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the summary, tables and per-export decode status
    Info {
        /// .uasset file; a sibling .uexp and .ubulk are picked up automatically
        path: PathBuf,
        /// Also list every name in the name table
        #[arg(long)]
        names: bool,
    },
    /// Print the decoded model of one export
    Dump {
        path: PathBuf,
        /// Export index
        #[arg(short = 'x', long, default_value_t = 0)]
        export: usize,
        /// Print the model as JSON
        #[cfg(feature = "json")]
        #[arg(long)]
        json: bool,
    },
    /// Parse and re-serialize packages, checking the output is byte-identical
    Verify {
        /// Files or glob patterns
        patterns: Vec<String>,
    },
    /// Read or embed the note stored after the export payloads
    Note {
        path: PathBuf,
        /// Replace the note with this text
        #[arg(long, requires = "output")]
        set: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Keep only the first LODs of every mesh export
    StripLods {
        path: PathBuf,
        /// Number of LODs to keep
        #[arg(short, long, default_value_t = 1)]
        keep: usize,
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn parse_engine(s: &str) -> Result<EngineVersion, String> {
    s.parse::<EngineVersion>().map_err(|e| e.to_string())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn read_optional(path: PathBuf) -> Result<Option<Vec<u8>>, Report> {
    if !path.is_file() {
        return Ok(None);
    }
    let data = std::fs::read(&path).context_with(|| format!("Failed to read {}", path.display()))?;
    debug!(path = %path.display(), bytes = data.len(), "loaded companion file");
    Ok(Some(data))
}

fn load(path: &Path, options: &ParseOptions) -> Result<AssetFile, Report> {
    let uasset = std::fs::read(path).context_with(|| format!("Failed to read {}", path.display()))?;
    let uexp = read_optional(path.with_extension("uexp"))?;
    let ubulk = read_optional(path.with_extension("ubulk"))?;
    let mut sources = AssetSources::new(&uasset);
    if let Some(uexp) = &uexp {
        sources = sources.with_uexp(uexp);
    }
    if let Some(ubulk) = &ubulk {
        sources = sources.with_ubulk(ubulk);
    }
    let asset = AssetFile::parse(sources, options).context_with(|| format!("Failed to parse {}", path.display()))?;
    Ok(asset)
}

fn write_output(path: &Path, output: &SerializedAsset) -> Result<(), Report> {
    std::fs::write(path, &output.uasset).context_with(|| format!("Failed to write {}", path.display()))?;
    for (ext, data) in [("uexp", &output.uexp), ("ubulk", &output.ubulk)] {
        if let Some(data) = data {
            let path = path.with_extension(ext);
            std::fs::write(&path, data).context_with(|| format!("Failed to write {}", path.display()))?;
        }
    }
    println!("wrote {}", path.display());
    Ok(())
}

fn info(asset: &AssetFile, list_names: bool) -> Result<(), Report> {
    let summary = asset.summary();
    println!("engine:      {}", asset.engine_version());
    println!("file version: {} (legacy {})", summary.file_version_ue4, summary.legacy_file_version);
    println!("split:       {}", asset.is_split());
    println!("header size: {}", summary.total_header_size);
    println!("names:       {}", asset.names().len());
    println!("imports:     {}", asset.imports().len());
    println!("exports:     {}", asset.exports().len());
    if let Some(bulk) = asset.bulk() {
        println!("ubulk:       {} bytes", bulk.len());
    }
    if let Some(note) = asset.tail().note() {
        println!("note:        {note}");
    }

    if list_names {
        println!();
        for (i, entry) in asset.names().entries().iter().enumerate() {
            println!("{i:>5} {}", entry.text.as_str());
        }
    }

    println!();
    for (i, import) in asset.imports().iter().enumerate() {
        println!("import {i:>3}: {} ({})", import.object_name, import.class_name);
    }

    println!();
    for (i, export) in asset.exports().iter().enumerate() {
        let class = asset.export_class(i).context("Failed to resolve export class")?;
        let status = match asset.decode_export(i) {
            Ok(DecodedExport::Generic(_)) => "generic".to_string(),
            Ok(_) => "decoded".to_string(),
            Err(e) => format!("error: {}", e.current_context()),
        };
        println!(
            "export {i:>3}: {} ({class}) offset {} size {} [{status}]",
            export.object_name, export.serial_offset, export.serial_size
        );
    }
    Ok(())
}

fn print_mesh(data: &MeshData) {
    for (i, material) in data.materials.iter().enumerate() {
        println!(
            "material {i}: {} -> {}",
            material.slot_name,
            material.material.as_deref().unwrap_or("<none>")
        );
    }
    for (i, lod) in data.lods.iter().enumerate() {
        println!(
            "lod {i}: {} vertices, {} triangles, {} uv channels, {} sections{}",
            lod.num_vertices(),
            lod.num_triangles(),
            lod.uvs.len(),
            lod.sections.len(),
            if lod.is_skinned() { ", skinned" } else { "" }
        );
    }
    if let Some(skeleton) = &data.skeleton {
        print_skeleton(skeleton);
    }
}

fn print_skeleton(data: &SkeletonData) {
    for (i, bone) in data.bones.iter().enumerate() {
        let parent = bone.parent.map_or("-".to_string(), |p| p.to_string());
        println!(
            "bone {i:>3}: {} parent {parent} translation {:?}",
            bone.name, bone.local.translation
        );
    }
}

fn print_texture(data: &TextureData) {
    println!(
        "{} {}x{} slices {} cubemap {} srgb {}",
        data.pixel_format, data.width, data.height, data.slices, data.cubemap, data.srgb
    );
    for (i, mip) in data.mips.iter().enumerate() {
        println!("mip {i}: {}x{} {} bytes", mip.width, mip.height, mip.data.len());
    }
}

fn print_animation(data: &AnimationData) {
    let compression = match &data.compression {
        TrackCompression::PerTrack { formats } => format!("per-track {}", formats.join("/")),
        TrackCompression::Acl => "ACL".to_string(),
        TrackCompression::Other(code) => format!("codec {code} (kept compressed)"),
    };
    println!(
        "{compression}, {} frames, {:.3}s at {} fps, rate scale {}",
        data.num_frames, data.length, data.frame_rate, data.rate_scale
    );
    for track in &data.tracks {
        println!(
            "track bone {}: {} translation, {} rotation, {} scale keys",
            track.bone,
            track.translation.as_ref().map_or(0, |k| k.len()),
            track.rotation.as_ref().map_or(0, |k| k.len()),
            track.scale.as_ref().map_or(0, |k| k.len()),
        );
    }
}

#[cfg(feature = "json")]
fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Report> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode JSON")?;
    println!("{text}");
    Ok(())
}

fn dump(asset: &AssetFile, index: usize, json: bool) -> Result<(), Report> {
    let class = asset.export_class(index).context("Failed to resolve export class")?;
    debug!(index, %class, json, "dumping export");
    macro_rules! show {
        ($value:expr, $print:ident) => {{
            let value = $value.context_with(|| format!("Failed to decode export {index} ({class})"))?;
            #[cfg(feature = "json")]
            if json {
                return print_json(&value);
            }
            $print(&value);
        }};
    }
    match AssetKind::from_class(&class) {
        Some(AssetKind::StaticMesh | AssetKind::SkeletalMesh) => show!(asset.mesh_data(index), print_mesh),
        Some(AssetKind::Skeleton) => show!(asset.skeleton_data(index), print_skeleton),
        Some(AssetKind::Texture2D | AssetKind::TextureCube) => show!(asset.texture_data(index), print_texture),
        Some(AssetKind::AnimSequence) => show!(asset.animation_data(index, None), print_animation),
        None => {
            let generic = asset.generic_export(index).context("Failed to read export properties")?;
            for property in generic.header.properties.iter() {
                println!("{}: {:?}", property.name(), property.value());
            }
            println!("{} trailing bytes", generic.trailing.len());
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Identical,
    Differs,
    Failed,
}

fn verify_one(path: &Path, options: &ParseOptions) -> Verdict {
    let asset = match load(path, options) {
        Ok(asset) => asset,
        Err(e) => {
            warn!(path = %path.display(), "{e}");
            return Verdict::Failed;
        }
    };
    let out = asset.serialize();
    let same = std::fs::read(path).is_ok_and(|data| data == out.uasset)
        && out
            .uexp
            .as_ref()
            .is_none_or(|uexp| std::fs::read(path.with_extension("uexp")).is_ok_and(|data| &data == uexp));
    if same {
        Verdict::Identical
    } else {
        warn!(path = %path.display(), "re-serialized bytes differ");
        Verdict::Differs
    }
}

fn verify(patterns: &[String], options: &ParseOptions) -> Result<(), Report> {
    let mut paths = Vec::new();
    for pattern in patterns {
        for entry in glob::glob(pattern).context_with(|| format!("Invalid pattern `{pattern}`"))? {
            let path = entry?;
            if path.is_file() {
                paths.push(path);
            }
        }
    }
    if paths.is_empty() {
        bail!("No files matched");
    }

    let progress = ProgressBar::new(paths.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {elapsed}").unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let differs = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    paths
        .par_iter()
        .progress_with(progress)
        .for_each(|path| match verify_one(path, options) {
            Verdict::Identical => {}
            Verdict::Differs => {
                differs.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Failed => {
                failed.fetch_add(1, Ordering::Relaxed);
            }
        });

    let (differs, failed) = (differs.into_inner(), failed.into_inner());
    println!(
        "{} files: {} identical, {differs} differ, {failed} failed",
        paths.len(),
        paths.len() - differs - failed
    );
    if differs + failed > 0 {
        bail!("{} files did not round-trip", differs + failed);
    }
    Ok(())
}

fn strip_lods(asset: &AssetFile, keep: usize) -> Result<SerializedAsset, Report> {
    let mut edits = Vec::new();
    for index in 0..asset.exports().len() {
        let class = asset.export_class(index).context("Failed to resolve export class")?;
        if !matches!(
            AssetKind::from_class(&class),
            Some(AssetKind::StaticMesh | AssetKind::SkeletalMesh)
        ) {
            continue;
        }
        let mut object = asset
            .decode_export(index)
            .context_with(|| format!("Failed to decode export {index}"))?;
        let removed = match &mut object {
            DecodedExport::StaticMesh(mesh) => mesh.remove_lods(keep),
            DecodedExport::SkeletalMesh(mesh) => mesh.remove_lods(keep).context("Failed to trim LODInfo")?,
            _ => continue,
        };
        println!("export {index}: removed {removed} LODs");
        if removed > 0 {
            edits.push((index, object));
        }
    }
    if edits.is_empty() {
        warn!("nothing to strip");
    }
    let output = inject_all(asset, edits).context("Failed to inject stripped meshes")?;
    Ok(output)
}

fn main() -> Result<(), Report> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let options = ParseOptions::builder()
        .engine_version(args.engine)
        .strict(!args.lenient)
        .build();

    match args.command {
        Command::Info { path, names } => info(&load(&path, &options)?, names),
        #[cfg(feature = "json")]
        Command::Dump { path, export, json } => dump(&load(&path, &options)?, export, json),
        #[cfg(not(feature = "json"))]
        Command::Dump { path, export } => dump(&load(&path, &options)?, export, false),
        Command::Verify { patterns } => verify(&patterns, &options),
        Command::Note { path, set, output } => {
            let mut asset = load(&path, &options)?;
            match (set, output) {
                (Some(text), Some(output)) => {
                    asset.tail_mut().set_note(&text);
                    write_output(&output, &asset.serialize())
                }
                _ => {
                    match asset.tail().note() {
                        Some(note) => println!("{note}"),
                        None => println!("no note"),
                    }
                    Ok(())
                }
            }
        }
        Command::StripLods { path, keep, output } => {
            let asset = load(&path, &options)?;
            write_output(&output, &strip_lods(&asset, keep)?)
        }
    }
}
