// hmda-link - origination/purchase linkage over HMDA CSV partitions

mod exit_codes;
mod link;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use exit_codes::EXIT_SUCCESS;
use hmda_linkage::{EventId, FileType};

#[derive(Parser)]
#[command(name = "hmda-link")]
#[command(about = "Link HMDA originations to later purchase records")]
#[command(version)]
struct Cli {
    /// Only log warnings and errors
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run linkage over one or more CSV partitions
    #[command(after_help = "\
Examples:
  hmda-link run link.toml 2019_public_lar.csv 2020_public_lar.csv
  hmda-link run link.toml 2017_one_year.csv 2018_public_lar.csv --output results.json
  hmda-link run link.toml 2020_public_lar.csv --summary summary.json --json")]
    Run {
        /// Path to the linkage TOML config
        config: PathBuf,

        /// Input CSV files; year and file type are read from each file name
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Write result rows as JSON to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the run summary as JSON to file
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Print the full report as JSON to stdout
        #[arg(long)]
        json: bool,

        /// Exit non-zero when any origination ends ambiguous
        #[arg(long)]
        fail_on_ambiguous: bool,
    },

    /// Validate a linkage config without running
    #[command(after_help = "\
Examples:
  hmda-link validate link.toml")]
    Validate {
        /// Path to the linkage TOML config
        config: PathBuf,
    },

    /// Show the evidence behind one event's accepted or best rejected pairing
    #[command(after_help = "\
Examples:
  hmda-link explain link.toml 2020_public_lar.csv --event 2020c_000000002")]
    Explain {
        /// Path to the linkage TOML config
        config: PathBuf,

        /// Input CSV files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Event id to explain
        #[arg(long)]
        event: EventId,
    },

    /// Print the event id of a raw row
    #[command(after_help = "\
Examples:
  hmda-link id 2021 a 42        # 2021a_000000042")]
    Id {
        /// Source reporting year
        year: i32,

        /// File type code (a-e)
        file_type: FileType,

        /// Zero-based row index within the partition
        row_index: u64,
    },
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Run { config, inputs, output, summary, json, fail_on_ambiguous } => {
            let args = link::RunArgs { config, inputs, output, summary, json, fail_on_ambiguous };
            link::cmd_run(args)
        }
        Commands::Validate { config } => link::cmd_validate(config),
        Commands::Explain { config, inputs, event } => link::cmd_explain(config, inputs, event),
        Commands::Id { year, file_type, row_index } => {
            println!("{}", hmda_linkage::assign(year, file_type, row_index));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}
