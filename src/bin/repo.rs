//! Schema Repository CLI
//!
//! Registers and looks up schemas in the repository described by the config.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use schema_repo::render;
use schema_repo::{RepoConfig, RepoError, Repository, SchemaEntry, Subject, SubjectConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schema-repo")]
#[command(about = "Register, validate and look up versioned schemas")]
struct Cli {
    /// Config file, layered over the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Plain)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a schema, creating the subject if needed
    Register {
        subject: String,
        /// Read the schema from this file instead of stdin
        #[arg(short, long)]
        schema_file: Option<PathBuf>,
        /// Comma separated validators for a new subject ("" for none)
        #[arg(long)]
        validators: Option<String>,
    },

    /// Register a schema only if the latest id is still the expected one
    RegisterIfLatest {
        subject: String,
        /// Expected latest id, or "none" for an empty subject
        #[arg(short, long)]
        expected_id: String,
        #[arg(short, long)]
        schema_file: Option<PathBuf>,
    },

    /// Print the schema registered under an id
    Id { subject: String, id: String },

    /// Print the id of a schema
    Schema {
        subject: String,
        #[arg(short, long)]
        schema_file: Option<PathBuf>,
    },

    /// Print the latest entry of a subject
    Latest { subject: String },

    /// List a subject's entries, newest first
    Entries { subject: String },

    /// List subject names
    Subjects,

    /// Show repository status
    Status,

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, thiserror::Error)]
enum Outcome {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(e: &anyhow::Error) -> i32 {
    match (e.downcast_ref::<RepoError>(), e.downcast_ref::<Outcome>()) {
        (Some(RepoError::Validation(_)), _) => 2,
        (Some(RepoError::WriteContention { .. }), _) | (_, Some(Outcome::Conflict(_))) => 3,
        (_, Some(Outcome::NotFound(_))) => 4,
        _ => 1,
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RepoConfig::load_from(cli.config.as_deref()).context("loading configuration")?;

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let repo = config.open_repository().context("opening repository")?;
    let result = execute(repo.as_ref(), cli.command, cli.format);
    repo.close()?;
    result
}

fn execute(repo: &dyn Repository, command: Commands, format: Format) -> anyhow::Result<()> {
    match command {
        Commands::Register {
            subject,
            schema_file,
            validators,
        } => {
            let schema = read_schema(schema_file)?;
            let subject_config = validators
                .map(|names| SubjectConfig::builder().set_validators_str(Some(names.as_str())).build());
            let entry = repo
                .register(&subject, subject_config.as_ref())?
                .register(&schema)?;
            print_id(&entry, format)
        }

        Commands::RegisterIfLatest {
            subject,
            expected_id,
            schema_file,
        } => {
            let schema = read_schema(schema_file)?;
            let subject = existing(repo, &subject)?;
            let expected = if expected_id == "none" {
                None
            } else {
                Some(subject.lookup_by_id(&expected_id)?.ok_or_else(|| {
                    Outcome::NotFound(format!("id {} in subject {}", expected_id, subject.name()))
                })?)
            };
            match subject.register_if_latest(&schema, expected.as_ref())? {
                Some(entry) => print_id(&entry, format),
                None => Err(Outcome::Conflict(format!(
                    "latest of {} is no longer {}",
                    subject.name(),
                    expected_id
                ))
                .into()),
            }
        }

        Commands::Id { subject, id } => {
            let subject = existing(repo, &subject)?;
            let entry = subject
                .lookup_by_id(&id)?
                .ok_or_else(|| Outcome::NotFound(format!("id {} in subject {}", id, subject.name())))?;
            match format {
                Format::Plain => println!("{}", entry.schema()),
                Format::Json => println!("{}", serde_json::to_string_pretty(&entry)?),
            }
            Ok(())
        }

        Commands::Schema {
            subject,
            schema_file,
        } => {
            let schema = read_schema(schema_file)?;
            let subject = existing(repo, &subject)?;
            let entry = subject
                .lookup_by_schema(&schema)?
                .ok_or_else(|| Outcome::NotFound(format!("schema in subject {}", subject.name())))?;
            print_id(&entry, format)
        }

        Commands::Latest { subject } => {
            let subject = existing(repo, &subject)?;
            let entry = subject
                .latest()?
                .ok_or_else(|| Outcome::NotFound(format!("subject {} has no schemas", subject.name())))?;
            match format {
                Format::Plain => print!("{}", render::entries_to_text(&[entry])),
                Format::Json => println!("{}", serde_json::to_string_pretty(&entry)?),
            }
            Ok(())
        }

        Commands::Entries { subject } => {
            let entries = existing(repo, &subject)?.all_entries()?;
            match format {
                Format::Plain => print!("{}", render::entries_to_text(&entries)),
                Format::Json => println!("{}", render::entries_to_json(&entries)?),
            }
            Ok(())
        }

        Commands::Subjects => {
            let names: Vec<String> = repo
                .subjects()?
                .iter()
                .map(|s| s.name().to_string())
                .collect();
            match format {
                Format::Plain => print!("{}", render::subject_names_to_text(&names)),
                Format::Json => println!("{}", render::subject_names_to_json(&names)?),
            }
            Ok(())
        }

        Commands::Status => {
            let status = repo.status();
            match format {
                Format::Plain => println!("{}", status),
                Format::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            }
            Ok(())
        }

        Commands::Config => Ok(()),
    }
}

fn existing(repo: &dyn Repository, name: &str) -> anyhow::Result<Arc<dyn Subject>> {
    repo.lookup(name)?
        .ok_or_else(|| Outcome::NotFound(format!("subject {}", name)).into())
}

/// Schema text from a file or stdin, without the final line break
fn read_schema(path: Option<PathBuf>) -> anyhow::Result<String> {
    let mut schema = match path {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading schema from stdin")?;
            buf
        }
    };
    if schema.ends_with('\n') {
        schema.pop();
        if schema.ends_with('\r') {
            schema.pop();
        }
    }
    Ok(schema)
}

fn print_id(entry: &SchemaEntry, format: Format) -> anyhow::Result<()> {
    match format {
        Format::Plain => println!("{}", entry.id()),
        Format::Json => println!("{}", serde_json::to_string_pretty(entry)?),
    }
    Ok(())
}
