use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use colored::Colorize;
use dedup_crypto::ContentAddresser;
use dedup_server::{DedupServer, ListQuery, ObjectView, ServerConfig, UploadView};
use dedup_store::DedupStore;
use dedup_types::{Digest, StorageStats, UploadOutcome};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(cli.config.as_deref(), cli.data_dir)?;
    match cli.command {
        Command::Put(args) => cmd_put(&config, args, &cli.format),
        Command::Get(args) => cmd_get(&config, args),
        Command::Ls(args) => cmd_ls(&config, args, &cli.format),
        Command::Stats(_) => cmd_stats(&config, &cli.format),
        Command::Serve(args) => cmd_serve(config, args),
    }
}

/// Config file values, then command-line overrides.
fn resolve_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<ServerConfig> {
    let mut config = match path {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    Ok(config)
}

fn open_store(config: &ServerConfig) -> anyhow::Result<DedupStore> {
    DedupStore::open(&config.data_dir, config.store.clone())
        .with_context(|| format!("opening store at {}", config.data_dir.display()))
}

fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("txt" | "log") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Hash and submit each file. Stops at the first failure.
fn put_files(
    store: &DedupStore,
    paths: &[PathBuf],
    content_type: Option<&str>,
) -> anyhow::Result<Vec<UploadOutcome>> {
    let addresser = ContentAddresser::new();
    paths
        .iter()
        .map(|path| {
            let mut file =
                File::open(path).with_context(|| format!("opening {}", path.display()))?;
            let addressed = addresser
                .digest_seekable(&mut file)
                .with_context(|| format!("reading {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let content_type = content_type.unwrap_or_else(|| guess_content_type(path));
            store
                .submit(addressed.digest, addressed.size, &name, content_type, file)
                .with_context(|| format!("storing {}", path.display()))
        })
        .collect()
}

fn cmd_put(config: &ServerConfig, args: PutArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let outcomes = put_files(&store, &args.paths, args.content_type.as_deref())?;

    if let OutputFormat::Json = format {
        let views: Vec<UploadView> = outcomes.iter().map(UploadView::from).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }
    for (path, outcome) in args.paths.iter().zip(&outcomes) {
        let digest = outcome.object.digest.short_hex();
        if outcome.is_duplicate {
            println!(
                "  {} {} {} (saved {} bytes)",
                "dup".yellow(),
                digest.dimmed(),
                path.display(),
                outcome.bytes_saved.to_string().bold()
            );
        } else {
            println!(
                "  {} {} {} ({} bytes)",
                "new".green(),
                digest.dimmed(),
                path.display(),
                outcome.object.size
            );
        }
    }
    Ok(())
}

fn cmd_get(config: &ServerConfig, args: GetArgs) -> anyhow::Result<()> {
    let digest: Digest = args.digest.parse()?;
    let store = open_store(config)?;
    let (_, mut reader) = store.open_content(&digest)?;
    match args.output {
        Some(path) => {
            let mut file =
                File::create(&path).with_context(|| format!("creating {}", path.display()))?;
            let written = io::copy(&mut reader, &mut file)
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("{} Wrote {} bytes to {}", "✓".green(), written, path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            io::copy(&mut reader, &mut stdout)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn cmd_ls(config: &ServerConfig, args: LsArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let filter = ListQuery {
        search: args.search,
        file_type: args.file_type,
        size_min: args.size_min,
        size_max: args.size_max,
        uploaded_after: args.after,
        uploaded_before: args.before,
    }
    .into_filter()?;
    let store = open_store(config)?;
    let objects = store.list(&filter)?;

    if let OutputFormat::Json = format {
        let views: Vec<ObjectView> = objects.iter().map(ObjectView::from).collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }
    if objects.is_empty() {
        println!("No objects.");
        return Ok(());
    }
    for object in &objects {
        println!(
            "{}  {:>10}  {}  {}  {}",
            object.digest.short_hex().yellow(),
            object.size,
            object.stored_at.format("%Y-%m-%d %H:%M:%S"),
            object.content_type.cyan(),
            object.original_name
        );
    }
    Ok(())
}

fn cmd_stats(config: &ServerConfig, format: &OutputFormat) -> anyhow::Result<()> {
    let stats = open_store(config)?.compute_stats()?;
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    print_stats(&stats);
    Ok(())
}

fn print_stats(stats: &StorageStats) {
    println!("Objects:  {} ({} uploads)", stats.object_count.to_string().bold(), stats.upload_count);
    println!("Physical: {} bytes", stats.total_physical);
    println!("Logical:  {} bytes", stats.total_logical);
    println!(
        "Savings:  {} bytes ({:.1}%)",
        stats.total_savings.to_string().green().bold(),
        stats.savings_ratio() * 100.0
    );
}

fn cmd_serve(mut config: ServerConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    println!("dedup server on {} (data: {})", config.bind_addr.to_string().bold(), config.data_dir.display());
    let server = DedupServer::open(config)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.serve())?;
    Ok(())
}
