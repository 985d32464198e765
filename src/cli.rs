use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::DistStyle;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load tabular data into warehouse tables",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve warehouse column types for a delimited or JSON file
    Infer(InferArgs),
    /// Dry-run an upload and print every statement it would execute
    Plan(PlanArgs),
    /// List captured view definitions waiting to be reinstantiated
    Views(ViewsArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input file (.csv, .tsv, .txt, .json, .jsonl, .ndjson) or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Field delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// YAML file of declared column types
    #[arg(long = "column-types")]
    pub column_types: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct InferArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Write the resolved column types to this YAML file
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TableArgs {
    /// Target schema
    #[arg(short = 's', long, default_value = "public")]
    pub schema: String,
    /// Target table
    #[arg(short = 't', long)]
    pub table: String,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub target: TableArgs,
    /// YAML upload options file; flags below override it
    #[arg(long)]
    pub options: Option<PathBuf>,
    /// Drop and recreate the table
    #[arg(long)]
    pub drop_table: bool,
    /// Truncate the table before loading
    #[arg(long)]
    pub truncate_table: bool,
    /// Users or groups granted SELECT after the load
    #[arg(long = "grant", value_delimiter = ',')]
    pub grant_access: Vec<String>,
    /// Distribution style of a created table
    #[arg(long, value_enum)]
    pub diststyle: Option<DistStyle>,
    #[arg(long)]
    pub distkey: Option<String>,
    #[arg(long)]
    pub sortkey: Option<String>,
    /// Number of staged chunks
    #[arg(long = "parallel")]
    pub load_in_parallel: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ViewsArgs {
    #[command(flatten)]
    pub target: TableArgs,
    /// Root directory of captured views
    #[arg(long = "view-store", default_value = crate::config::DEFAULT_VIEW_STORE)]
    pub view_store: PathBuf,
    /// Interface directory under the view store
    #[arg(long, default_value = crate::views::DEFAULT_INTERFACE)]
    pub interface: String,
}

fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\\t" => Ok(b'\t'),
        "comma" => Ok(b','),
        "pipe" => Ok(b'|'),
        "semicolon" => Ok(b';'),
        other if other.len() == 1 && other.is_ascii() => Ok(other.as_bytes()[0]),
        other => Err(format!(
            "Delimiter must be a single ASCII character or one of tab, comma, pipe, semicolon; got '{other}'"
        )),
    }
}
