use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use gml_decompiler::{DecompileContext, DecompileSettings, GlobalFunctions, MacroRegistry, SimpleGameContext};
use gmvm::CodeEntry;

/// Code entries named like this declare global functions.
const GLOBAL_SCRIPT_PREFIX: &str = "gml_GlobalScript_";

#[derive(Parser)]
#[command(name = "gmldecomp", about = "Decompile GameMaker VM assembly listings to GML")]
struct Cli {
    /// Assembly listings to decompile. Each file's stem is its code entry name.
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Macro registry JSON (enums, constants, named arguments).
    #[arg(long)]
    registry: Option<PathBuf>,
    /// Decompiler settings JSON; missing fields keep their defaults.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Features to skip (e.g. "for-loops", "macro-resolution", "strict-stack").
    #[arg(long = "skip")]
    skip: Vec<String>,
    /// Games before GMS 2.3: legacy arrays, untyped booleans.
    #[arg(long)]
    legacy: bool,
    /// Games from 2023.8 on: assets are pushed as references.
    #[arg(long)]
    asset_references: bool,
    /// Games before 2024.6: finally bodies are laid out before catch bodies.
    #[arg(long)]
    older_exception_handling: bool,
    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn load_settings(cli: &Cli) -> Result<DecompileSettings> {
    let mut settings = match &cli.settings {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("failed to parse settings {}", path.display()))?
        }
        None => DecompileSettings::default(),
    };
    let skip: Vec<&str> = cli.skip.iter().map(String::as_str).collect();
    settings.apply_skip_list(&skip);
    Ok(settings)
}

fn load_registry(path: Option<&Path>) -> Result<MacroRegistry> {
    let Some(path) = path else {
        let mut registry = MacroRegistry::new();
        registry.register_basic();
        return Ok(registry);
    };
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    MacroRegistry::from_json(&text).with_context(|| format!("failed to load registry {}", path.display()))
}

fn load_listing(path: &Path) -> Result<CodeEntry> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("no code entry name in {}", path.display()))?;
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    gmvm::asm::assemble(name, &text).with_context(|| format!("failed to assemble {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();

    let settings = load_settings(&cli)?;
    let entries = cli
        .files
        .iter()
        .map(|path| load_listing(path))
        .collect::<Result<Vec<_>>>()?;

    let globals: Vec<CodeEntry> = entries
        .iter()
        .filter(|e| e.name.starts_with(GLOBAL_SCRIPT_PREFIX))
        .cloned()
        .collect();
    let game = SimpleGameContext {
        gmlv2: !cli.legacy,
        typed_booleans: !cli.legacy,
        asset_references: cli.asset_references,
        older_exception_handling: cli.older_exception_handling,
        global_functions: GlobalFunctions::prescan(&globals).context("global function prescan failed")?,
        macro_registry: load_registry(cli.registry.as_deref())?,
        ..SimpleGameContext::default()
    };
    log::debug!("{} global functions", game.global_functions.len());

    let many = entries.len() > 1;
    for entry in &entries {
        let mut ctx = DecompileContext::new(&game, entry, &settings);
        let text = ctx.decompile_to_string()?;
        log::debug!("{}: {} warnings", entry.name, ctx.warnings().len());
        if many {
            println!("// {}", entry.name);
        }
        print!("{text}");
    }
    Ok(())
}
