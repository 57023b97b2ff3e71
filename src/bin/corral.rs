use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use corral::server::{Server, UserStore};
use corral::{Registry, Verification};

#[derive(Parser)]
#[command(name = "corral", version, about = "Versioned, reviewed, annotated datasets")]
struct Cli {
    /// Storage root directory.
    #[arg(long, default_value = "root", global = true)]
    root: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize the storage root and create the first account.
    Init {
        #[arg(long)]
        username: String,
    },
    /// Manage API-key accounts.
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Serve the HTTP API.
    Serve {
        /// Listen address; defaults to the configured one.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Recompute every integrity token in a dataset's log.
    Verify { dataset: String },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Create an account and print its API key once.
    Add { username: String },
    /// List account names.
    List,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    corral::telemetry::init(cli.verbose);

    let result = match cli.command {
        Command::Init { username } => init(&cli.root, &username),
        Command::User { command } => user(&cli.root, command),
        Command::Serve { listen } => serve(&cli.root, listen),
        Command::Verify { dataset } => verify(&cli.root, &dataset),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init(root: &PathBuf, username: &str) -> Result<ExitCode, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(root)?;
    let registry = Registry::open(root)?;
    drop(registry);

    let users = UserStore::open(&users_db(root))?;
    let key = users.add_user(username)?;
    show_api_key(username, &key);
    Ok(ExitCode::SUCCESS)
}

fn user(root: &PathBuf, command: UserCommand) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let users_db = users_db(root);
    if !users_db.exists() {
        return Err("storage root is not initialized, run `corral init` first".into());
    }
    let users = UserStore::open(&users_db)?;
    match command {
        UserCommand::Add { username } => {
            let key = users.add_user(&username)?;
            show_api_key(&username, &key);
        }
        UserCommand::List => {
            for username in users.list()? {
                println!("{username}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn serve(root: &PathBuf, listen: Option<String>) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let registry = Arc::new(Registry::open(root)?);
    let users = Arc::new(UserStore::open(&users_db(root))?);
    let addr = listen.unwrap_or_else(|| registry.config().listen_addr.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(Server::new(registry, users).serve(&addr))?;
    Ok(ExitCode::SUCCESS)
}

fn verify(root: &PathBuf, dataset: &str) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let registry = Registry::open(root)?;
    let dataset = registry.dataset(dataset)?;
    match dataset.verify()? {
        Verification::Clean => {
            println!("ok");
            Ok(ExitCode::SUCCESS)
        }
        Verification::TamperedAt(seq) => {
            println!("tampered at seq {seq}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn users_db(root: &std::path::Path) -> PathBuf {
    root.join("users.db")
}

fn show_api_key(username: &str, key: &str) {
    println!("== THIS API KEY WILL ONLY BE SHOWN ONCE ==");
    println!("USER: {username}");
    println!("KEY: {key}");
}
