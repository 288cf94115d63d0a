// src/main.rs

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use lihub::config::{DEFAULT_INSTANCE_DIR, Settings};
use lihub::db::models::{RepoFlag, Repository, User};
use lihub::maintain::Importer;
use lihub::signature::{GpgVerifier, normalize_fingerprint};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "lihub")]
#[command(author, version, about = "Software repository maintenance: signed upload ingestion and index generation", long_about = None)]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Instance locations, all derived from the instance directory unless overridden
#[derive(Args, Debug, Clone)]
struct PathArgs {
    /// Instance directory (default: /var/lib/lihub)
    #[arg(long, global = true, default_value = DEFAULT_INSTANCE_DIR)]
    instance_dir: PathBuf,

    /// Database path (default: <instance-dir>/db.sqlite)
    #[arg(short, long, global = true)]
    db_path: Option<PathBuf>,

    /// Directory holding repository storage roots
    #[arg(long, global = true)]
    repos_root: Option<PathBuf>,

    /// Directory holding per-user keyrings
    #[arg(long, global = true)]
    users_dir: Option<PathBuf>,

    /// Directory scanned for uploads
    #[arg(long, global = true)]
    incoming_dir: Option<PathBuf>,

    /// Directory rejected uploads are moved to
    #[arg(long, global = true)]
    morgue_dir: Option<PathBuf>,

    /// OpenPGP program used to verify signatures
    #[arg(long, global = true, default_value = "gpg")]
    gpg: PathBuf,
}

impl PathArgs {
    fn settings(&self) -> Settings {
        let mut settings = Settings::from_instance_dir(&self.instance_dir);
        if let Some(path) = &self.db_path {
            settings.db_path = path.clone();
        }
        if let Some(path) = &self.repos_root {
            settings.repos_root = path.clone();
        }
        if let Some(path) = &self.users_dir {
            settings.users_dir = path.clone();
        }
        if let Some(path) = &self.incoming_dir {
            settings.incoming_dir = path.clone();
        }
        if let Some(path) = &self.morgue_dir {
            settings.morgue_dir = path.clone();
        }
        settings.gpg_program = self.gpg.clone();
        settings
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and the default repositories
    Init,
    /// Manage uploaders
    #[command(subcommand)]
    User(UserCommands),
    /// Manage repositories
    #[command(subcommand)]
    Repo(RepoCommands),
    /// Import all uploads waiting in the incoming directory
    Import,
    /// Regenerate repository indices
    RebuildIndices {
        /// Only rebuild this repository
        #[arg(long)]
        repo: Option<String>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a new uploader
    Add {
        /// User name
        name: String,
        /// Email address used in the Uploader field
        email: String,
    },
    /// Fetch a user's OpenPGP key and register its fingerprint
    ImportKey {
        /// User name
        name: String,
        /// Fingerprint of the key to import
        fingerprint: String,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Add a new repository
    Add {
        /// Repository name
        name: String,
        /// Storage root (default: <repos-root>/<name>)
        #[arg(long)]
        root_dir: Option<PathBuf>,
        /// Mark the repository as non-free
        #[arg(long)]
        nonfree: bool,
        /// Show the repository at the top level
        #[arg(long)]
        toplevel: bool,
    },
    /// List repositories
    List,
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = cli.paths.settings();
    let db_path = settings.db_path_str();

    match cli.command {
        Some(Commands::Init) => {
            info!("Initializing LiHub database at: {}", db_path);
            lihub::db::init(&db_path)?;

            let conn = lihub::db::open(&db_path)?;
            let created = lihub::db::seed_default_repositories(&conn, &settings.repos_root)?;

            for dir in [&settings.users_dir, &settings.incoming_dir, &settings.morgue_dir] {
                std::fs::create_dir_all(dir)?;
            }

            println!("Database initialized successfully at: {}", db_path);
            for repo in created {
                println!("Created repository {} at {}", repo.name, repo.root_dir);
            }
            Ok(())
        }
        Some(Commands::User(UserCommands::Add { name, email })) => {
            let conn = lihub::db::open(&db_path)?;

            if User::find_by_email(&conn, &email)?.is_some() {
                return Err(anyhow::anyhow!("A user with email {} already exists", email));
            }

            let mut user = User::new(name, email);
            user.insert(&conn)?;
            std::fs::create_dir_all(user.gpghome(&settings.users_dir))?;

            println!("Added user {} <{}>", user.name, user.email);
            Ok(())
        }
        Some(Commands::User(UserCommands::ImportKey { name, fingerprint })) => {
            let conn = lihub::db::open(&db_path)?;

            let mut user = User::find_by_name(&conn, &name)?
                .ok_or_else(|| anyhow::anyhow!("User '{}' not found", name))?;

            let fingerprint = normalize_fingerprint(&fingerprint);
            let verifier = GpgVerifier::new(&settings.gpg_program);
            verifier.import_key(&user.gpghome(&settings.users_dir), &fingerprint)?;
            user.set_fingerprint(&conn, &fingerprint)?;

            println!("Imported key {} for {}", fingerprint, user.name);
            Ok(())
        }
        Some(Commands::Repo(RepoCommands::Add {
            name,
            root_dir,
            nonfree,
            toplevel,
        })) => {
            let conn = lihub::db::open(&db_path)?;

            if Repository::find_by_name(&conn, &name)?.is_some() {
                return Err(anyhow::anyhow!("Repository '{}' already exists", name));
            }

            let root_dir = root_dir.unwrap_or_else(|| settings.repos_root.join(&name));
            let mut repo = Repository::new(name, root_dir.to_string_lossy().into_owned());
            repo.toplevel = toplevel;
            if nonfree {
                repo.flag = RepoFlag::NonFree;
            }
            repo.insert(&conn)?;

            println!("Added repository {} at {}", repo.name, repo.root_dir);
            Ok(())
        }
        Some(Commands::Repo(RepoCommands::List)) => {
            let conn = lihub::db::open(&db_path)?;
            let repos = Repository::list_all(&conn)?;

            if repos.is_empty() {
                println!("No repositories configured");
                return Ok(());
            }

            for repo in repos {
                println!(
                    "{} [{}{}] {}",
                    repo.name,
                    repo.flag.as_str(),
                    if repo.toplevel { ", toplevel" } else { "" },
                    repo.root_dir
                );
            }
            Ok(())
        }
        Some(Commands::Import) => {
            let mut conn = lihub::db::open(&db_path)?;
            let verifier = GpgVerifier::new(&settings.gpg_program);

            let report = Importer::new(&settings, &verifier).import_incoming(&mut conn)?;

            for upload in &report.accepted {
                println!(
                    "Accepted {} ({} packages into {})",
                    upload.control_file.display(),
                    upload.packages.len(),
                    upload.repository
                );
            }
            for record in &report.rejected {
                println!("Rejected {}: {}", record.control_file.display(), record.reason);
            }
            println!(
                "{} accepted, {} rejected",
                report.accepted.len(),
                report.rejected.len()
            );
            Ok(())
        }
        Some(Commands::RebuildIndices { repo }) => {
            let conn = lihub::db::open(&db_path)?;
            let report = lihub::maintain::rebuild_indices(&conn, repo.as_deref())?;

            for outcome in &report.outcomes {
                match &outcome.result {
                    Ok(count) => println!(
                        "{}/{}: {} packages",
                        outcome.repository, outcome.architecture, count
                    ),
                    Err(e) => println!("{}/{}: FAILED: {}", outcome.repository, outcome.architecture, e),
                }
            }

            if !report.is_success() {
                return Err(anyhow::anyhow!(
                    "{} architectures could not be rebuilt",
                    report.failures().count()
                ));
            }
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "lihub", &mut std::io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("LiHub v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'lihub --help' for usage information");
            Ok(())
        }
    }
}
