use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "runzim")]
#[command(version)]
#[command(about = "A Rust ZIM archive reader with HTTP URL support", long_about = None)]
#[command(after_help = "Examples:\n  \
  runzim wikipedia.zim -i                 show header and metadata\n  \
  runzim wikipedia.zim -p A/Ray_Charles   print an entry to stdout\n  \
  runzim wiki.zimaa -s \"ray ch\" -n 20     search titles in a split archive\n  \
  runzim -l https://example.com/wiki.zim  list entries of a remote archive")]
pub struct Cli {
    /// ZIM file path, any split part (.zimaa, .zimab, ...) or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// List entries (path and title)
    #[arg(short = 'l')]
    pub list: bool,

    /// Show header information and metadata
    #[arg(short = 'i')]
    pub info: bool,

    /// Print the main page's path
    #[arg(short = 'm')]
    pub main_page: bool,

    /// Print a random article's path
    #[arg(short = 'r')]
    pub random: bool,

    /// Write the content of PATH to stdout, following redirects
    #[arg(short = 'p', value_name = "PATH")]
    pub print: Option<String>,

    /// Search titles starting with QUERY (regex suffix allowed)
    #[arg(short = 's', value_name = "QUERY")]
    pub search: Option<String>,

    /// Maximum number of search results
    #[arg(short = 'n', value_name = "N", default_value_t = 25)]
    pub limit: usize,

    /// Also try lower, upper and title case variants when searching
    #[arg(long = "full")]
    pub full: bool,

    /// Verbose logging
    #[arg(short = 'v')]
    pub verbose: bool,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "warn" }
    }
}
