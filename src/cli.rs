use clap::Parser;
use std::path::PathBuf;

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Convert a layered button definition to drawable elements
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Layer tree: JSON array of layer elements
    #[arg(value_name = "LAYERS")]
    pub layers: PathBuf,

    /// Variable values: JSON object of `connection:name` to value
    #[arg(long = "variables", value_name = "FILE")]
    pub variables: Option<PathBuf>,

    /// Composite definitions: JSON object of connection id to element id to definition
    #[arg(long = "composites", value_name = "FILE")]
    pub composites: Option<PathBuf>,

    /// Extra entity definitions: JSON array (internal definitions are always present)
    #[arg(long = "definitions", value_name = "FILE")]
    pub definitions: Option<PathBuf>,

    /// Button feedbacks: JSON array of entity models
    #[arg(long = "feedbacks", value_name = "FILE")]
    pub feedbacks: Option<PathBuf>,

    /// Feedback values: JSON object of connection id to entity id to value
    #[arg(long = "values", value_name = "FILE")]
    pub values: Option<PathBuf>,

    /// Include disabled elements in the output
    #[arg(short = 'a', long = "all")]
    pub all: bool,

    /// Pretty-print the JSON output
    #[arg(short = 'p', long = "pretty")]
    pub pretty: bool,

    /// Enable debug logging to file (default: buttonface.log)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}
