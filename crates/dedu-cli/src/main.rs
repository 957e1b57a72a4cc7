//! dedu: content-addressed deduplicating backup tool
//!
//! Commands:
//!   hash [FILE...]            - compute the dedu hash of files, or stdin
//!   quasihash FILE...         - compute the fast seek-sample quasi-hash
//!   findfile                  - locate a file by hash among candidate paths
//!   upload FILE...            - hash, chunk, pack, and upload files
//!   download CHUNK_ID...      - fetch chunks and write plaintext to stdout
//!   generate-secrets          - create fresh hashing and encryption keys
//!   q register [FILE...]      - register file(s) as entities
//!   q get-entity FILE         - entity ID for a file (registering if new)
//!   q get-file ID...          - path corresponding to an entity ID

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use dedu_backup::{download_chunk, upload_file};
use dedu_core::DeduError;
use dedu_entity::{
    find_file_among_paths, import_metadata_file, locate_entity_file, register_or_get_entity,
    LocateOpts, QmfsStore, RegisterOpts,
};
use dedu_hash::looks_like_deduhash;
use dedu_secrets::{discover, Dedu};
use dedu_storage::{build_operator, BlobStore, OpendalStore, StorageConfig};

#[derive(Parser, Debug)]
#[command(name = "dedu", version, about = "Content-addressed deduplicating backup tool")]
struct Cli {
    /// dedu secrets config (which may also embed the regular config)
    #[arg(long, env = "DEDU_SECRET_CONFIG")]
    secrets: Option<PathBuf>,

    /// dedu non-secret config
    #[arg(long, env = "DEDU_CONFIG")]
    config: Option<PathBuf>,

    /// qmfs root directory (overrides the config)
    #[arg(long)]
    qmfs: Option<PathBuf>,

    /// Verbose log output
    #[arg(long, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compute the dedu hash of files, or stdin
    Hash { files: Vec<PathBuf> },

    /// Compute a fast but collision-prone quasi-hash of files
    Quasihash { files: Vec<PathBuf> },

    /// Find a file from a list of paths by quasi-hash or dedu hash
    Findfile {
        /// Quasi-hash of the file to locate
        #[arg(long)]
        quasihash: Option<String>,
        /// deduhash of the file to locate (and verify)
        #[arg(long)]
        hash: Option<String>,
        /// File containing candidate paths, one per line
        #[arg(long)]
        paths_file: PathBuf,
    },

    /// Hash, chunk, pack, and upload files
    Upload { files: Vec<PathBuf> },

    /// Download chunks and write their plaintext to stdout
    Download { chunk_ids: Vec<String> },

    /// Generate hashing and encryption keys
    #[command(name = "generate-secrets")]
    GenerateSecrets {
        /// Filename of the secrets file to create
        #[arg(long)]
        output: PathBuf,
    },

    /// Commands to interact with a qmfs entity store
    Q {
        #[command(subcommand)]
        action: QAction,
    },
}

#[derive(Subcommand, Debug)]
enum QAction {
    /// Register file(s) as entities (reads filenames from stdin when empty)
    Register {
        files: Vec<PathBuf>,
        /// Verify every file by re-hashing
        #[arg(long)]
        verify: bool,
        /// Import entity metadata from adjacent YAML files with these
        /// suffixes (repeatable)
        #[arg(long = "metadata-yaml-suffix")]
        metadata_yaml_suffixes: Vec<String>,
    },

    /// Get the entity ID corresponding to a file, registering it if needed
    #[command(name = "get-entity")]
    GetEntity {
        file: PathBuf,
        /// Read-only mode; don't register the file if it can't be found
        #[arg(long)]
        readonly: bool,
        /// When to compute the full hash
        #[arg(long, value_parser = ["always", "never", "auto"], default_value = "auto")]
        full_hash: String,
        /// Print the full entity path, not just the ID
        #[arg(long)]
        path: bool,
    },

    /// Get a path corresponding to an entity ID
    #[command(name = "get-file")]
    GetFile {
        ids: Vec<String>,
        /// Verify every candidate by re-hashing
        #[arg(long)]
        verify: bool,
        /// Follow symlinks and accept targets if they match
        #[arg(long, default_value_t = true)]
        discover_symlinks: bool,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "error" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_dedu(cli: &Cli) -> Result<Dedu> {
    let (secrets, config) = discover::resolve(cli.secrets.clone(), cli.config.clone())?;
    Ok(Dedu::load(&secrets, config.as_deref())?)
}

fn open_qmfs(cli: &Cli, dedu: &Dedu) -> Result<QmfsStore> {
    let root = cli
        .qmfs
        .clone()
        .or_else(|| dedu.config.qmfs_root.clone())
        .context("no qmfs root provided")?;
    Ok(QmfsStore::open(&root)?)
}

fn build_store(dedu: &Dedu) -> Result<OpendalStore> {
    let creds = dedu
        .storage_creds
        .as_ref()
        .filter(|c| c.is_configured())
        .context("no storage_creds provided: no known storage")?;
    let op = build_operator(&StorageConfig {
        endpoint: creds.endpoint.clone(),
        region: creds.region.clone(),
        bucket: creds.bucket.clone(),
        access_key_id: creds.access_key_id.clone(),
        secret_access_key: creds.secret_access_key.clone(),
    })?;
    Ok(OpendalStore::new(op, &dedu.config.target_folder))
}

fn read_paths_from_stdin() -> Result<Vec<PathBuf>> {
    let lines = dedu_entity::lines::read(std::io::stdin().lock())
        .context("error reading filenames from stdin")?;
    Ok(lines.into_iter().map(PathBuf::from).collect())
}

fn cmd_hash(dedu: &Dedu, files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        let hash = dedu.hasher.compute_hash(std::io::stdin().lock())?;
        println!("{hash}\t-");
        return Ok(());
    }
    for file in files {
        let hash = dedu.hasher.compute_file_hash(file)?;
        println!("{hash}\t{}", file.display());
    }
    Ok(())
}

fn cmd_quasihash(dedu: &Dedu, files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        bail!("no filenames provided");
    }
    for file in files {
        match dedu.quasihasher.quasihash_file(file) {
            Ok(hash) => println!("{hash}\t{}", file.display()),
            Err(DeduError::IsDir(_)) => {
                tracing::warn!(path = %file.display(), "skipping directory");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn cmd_findfile(
    dedu: &Dedu,
    quasihash: Option<&str>,
    hash: Option<&str>,
    paths_file: &Path,
) -> Result<()> {
    if quasihash.is_none() && hash.is_none() {
        bail!("must provide either --quasihash or --hash");
    }

    let paths = dedu_entity::lines::read_file(paths_file)
        .with_context(|| format!("error reading {}", paths_file.display()))?;
    if paths.is_empty() {
        bail!("found no paths in {}", paths_file.display());
    }

    let found = find_file_among_paths(&dedu.hasher, &dedu.quasihasher, &paths, quasihash, hash)?;
    println!("{}", found.display());
    Ok(())
}

async fn cmd_upload(dedu: &Dedu, files: &[PathBuf]) -> Result<()> {
    let store = build_store(dedu)?;
    store.ping().await.context("storage ping failed")?;
    store
        .check_folder_exists()
        .await
        .context("target folder check failed")?;
    for file in files {
        let summary = upload_file(&dedu.chunker, &dedu.packer, &store, file).await?;
        println!(
            "{}\t{} ({} chunk(s), {} uploaded, {} already present{})",
            summary.file_hash,
            file.display(),
            summary.chunks.len(),
            summary.uploaded,
            summary.already_present,
            if summary.wrote_virtual { ", virtual" } else { "" },
        );
    }
    Ok(())
}

async fn cmd_download(dedu: &Dedu, chunk_ids: &[String]) -> Result<()> {
    let store = build_store(dedu)?;
    let mut stdout = std::io::stdout().lock();
    for chunk_id in chunk_ids {
        let content = download_chunk(&dedu.packer, &dedu.hasher, &store, chunk_id).await?;
        stdout.write_all(&content)?;
    }
    Ok(())
}

fn register_one(
    store: &QmfsStore,
    dedu: &Dedu,
    file: &Path,
    opts: &RegisterOpts,
    metadata_yaml_suffixes: &[String],
) -> Result<()> {
    let entity_id = register_or_get_entity(store, &dedu.hasher, &dedu.quasihasher, file, opts)?;
    println!("{entity_id}\t{}", file.display());

    for suffix in metadata_yaml_suffixes {
        let metafile = PathBuf::from(format!("{}{suffix}", file.display()));
        if !metafile.exists() {
            continue;
        }
        import_metadata_file(store, &entity_id, &metafile)
            .with_context(|| format!("error importing metadata from {}", metafile.display()))?;
    }
    Ok(())
}

fn cmd_register(
    cli: &Cli,
    dedu: &Dedu,
    files: &[PathBuf],
    verify: bool,
    metadata_yaml_suffixes: &[String],
) -> Result<()> {
    let store = open_qmfs(cli, dedu)?;

    let files = if files.is_empty() {
        read_paths_from_stdin()?
    } else {
        files.to_vec()
    };

    let opts = RegisterOpts {
        readonly: false,
        always_verify: verify,
        allow_hashing: true,
    };

    // A failure aborts the current file only; the rest of the batch still
    // runs, and the command exits non-zero at the end.
    let mut failures = 0usize;
    for file in &files {
        if !file.exists() {
            bail!("file {} does not exist", file.display());
        }
        if let Err(e) = register_one(&store, dedu, file, &opts, metadata_yaml_suffixes) {
            eprintln!("error registering {}: {e:#}", file.display());
            failures += 1;
        }
    }
    if failures > 0 {
        bail!("failed to register {failures} of {} file(s)", files.len());
    }
    Ok(())
}

fn cmd_get_entity(
    cli: &Cli,
    dedu: &Dedu,
    file: &Path,
    readonly: bool,
    full_hash: &str,
    print_path: bool,
) -> Result<()> {
    let store = open_qmfs(cli, dedu)?;

    let opts = RegisterOpts {
        readonly,
        always_verify: full_hash == "always",
        allow_hashing: full_hash != "never",
    };

    let entity_id = register_or_get_entity(&store, &dedu.hasher, &dedu.quasihasher, file, &opts)?;
    if print_path {
        println!("{}", store.entity_path(&entity_id).display());
    } else {
        println!("{entity_id}");
    }
    Ok(())
}

fn cmd_get_file(
    cli: &Cli,
    dedu: &Dedu,
    ids: &[String],
    verify: bool,
    discover_symlinks: bool,
) -> Result<()> {
    if ids.is_empty() {
        bail!("no entity IDs provided");
    }
    let store = open_qmfs(cli, dedu)?;
    let opts = LocateOpts {
        verify,
        discover_symlinks,
    };

    for id in ids {
        // Accept entity paths too, as long as the basename is a hash.
        let entity_id = if looks_like_deduhash(id) {
            id.clone()
        } else {
            match Path::new(id).file_name().map(|n| n.to_string_lossy()) {
                Some(base) if looks_like_deduhash(&base) => base.into_owned(),
                _ => bail!("argument {id:?} does not appear to be a hash"),
            }
        };

        let path =
            locate_entity_file(&store, &dedu.hasher, &dedu.quasihasher, &entity_id, &opts)?;
        println!("{}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::GenerateSecrets { output } => {
            dedu_secrets::generate(output)?;
            eprintln!("wrote secrets to {}", output.display());
            Ok(())
        }
        Commands::Hash { files } => cmd_hash(&load_dedu(&cli)?, files),
        Commands::Quasihash { files } => cmd_quasihash(&load_dedu(&cli)?, files),
        Commands::Findfile {
            quasihash,
            hash,
            paths_file,
        } => cmd_findfile(
            &load_dedu(&cli)?,
            quasihash.as_deref(),
            hash.as_deref(),
            paths_file,
        ),
        Commands::Upload { files } => cmd_upload(&load_dedu(&cli)?, files).await,
        Commands::Download { chunk_ids } => cmd_download(&load_dedu(&cli)?, chunk_ids).await,
        Commands::Q { action } => {
            let dedu = load_dedu(&cli)?;
            match action {
                QAction::Register {
                    files,
                    verify,
                    metadata_yaml_suffixes,
                } => cmd_register(&cli, &dedu, files, *verify, metadata_yaml_suffixes),
                QAction::GetEntity {
                    file,
                    readonly,
                    full_hash,
                    path,
                } => cmd_get_entity(&cli, &dedu, file, *readonly, full_hash, *path),
                QAction::GetFile {
                    ids,
                    verify,
                    discover_symlinks,
                } => cmd_get_file(&cli, &dedu, ids, *verify, *discover_symlinks),
            }
        }
    }
}
