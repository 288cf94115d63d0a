// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn path_args() -> Vec<Arg> {
    vec![
        Arg::new("instance_dir")
            .long("instance-dir")
            .value_name("DIR")
            .default_value("/var/lib/lihub")
            .global(true)
            .help("Instance directory"),
        Arg::new("db_path")
            .short('d')
            .long("db-path")
            .value_name("PATH")
            .global(true)
            .help("Database path (default: <instance-dir>/db.sqlite)"),
        Arg::new("repos_root")
            .long("repos-root")
            .value_name("DIR")
            .global(true)
            .help("Directory holding repository storage roots"),
        Arg::new("users_dir")
            .long("users-dir")
            .value_name("DIR")
            .global(true)
            .help("Directory holding per-user keyrings"),
        Arg::new("incoming_dir")
            .long("incoming-dir")
            .value_name("DIR")
            .global(true)
            .help("Directory scanned for uploads"),
        Arg::new("morgue_dir")
            .long("morgue-dir")
            .value_name("DIR")
            .global(true)
            .help("Directory rejected uploads are moved to"),
        Arg::new("gpg")
            .long("gpg")
            .value_name("PROGRAM")
            .default_value("gpg")
            .global(true)
            .help("OpenPGP program used to verify signatures"),
    ]
}

fn build_cli() -> Command {
    Command::new("lihub")
        .version(env!("CARGO_PKG_VERSION"))
        .author("LiHub Contributors")
        .about("Software repository maintenance: signed upload ingestion and index generation")
        .subcommand_required(false)
        .args(path_args())
        .subcommand(Command::new("init").about("Initialize the database and the default repositories"))
        .subcommand(
            Command::new("user")
                .about("Manage uploaders")
                .subcommand(
                    Command::new("add")
                        .about("Register a new uploader")
                        .arg(Arg::new("name").required(true).help("User name"))
                        .arg(
                            Arg::new("email")
                                .required(true)
                                .help("Email address used in the Uploader field"),
                        ),
                )
                .subcommand(
                    Command::new("import-key")
                        .about("Fetch a user's OpenPGP key and register its fingerprint")
                        .arg(Arg::new("name").required(true).help("User name"))
                        .arg(
                            Arg::new("fingerprint")
                                .required(true)
                                .help("Fingerprint of the key to import"),
                        ),
                ),
        )
        .subcommand(
            Command::new("repo")
                .about("Manage repositories")
                .subcommand(
                    Command::new("add")
                        .about("Add a new repository")
                        .arg(Arg::new("name").required(true).help("Repository name"))
                        .arg(
                            Arg::new("root_dir")
                                .long("root-dir")
                                .value_name("DIR")
                                .help("Storage root (default: <repos-root>/<name>)"),
                        )
                        .arg(
                            Arg::new("nonfree")
                                .long("nonfree")
                                .action(ArgAction::SetTrue)
                                .help("Mark the repository as non-free"),
                        )
                        .arg(
                            Arg::new("toplevel")
                                .long("toplevel")
                                .action(ArgAction::SetTrue)
                                .help("Show the repository at the top level"),
                        ),
                )
                .subcommand(Command::new("list").about("List repositories")),
        )
        .subcommand(Command::new("import").about("Import all uploads waiting in the incoming directory"))
        .subcommand(
            Command::new("rebuild-indices")
                .about("Regenerate repository indices")
                .arg(
                    Arg::new("repo")
                        .long("repo")
                        .value_name("NAME")
                        .help("Only rebuild this repository"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("lihub.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
