use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "logvault")]
#[command(about = "Catalog recording filesets and run analysis jobs on them", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the instance directory and its catalog
    Init,
    /// Scan directories for filesets and merge them into the catalog
    Scan(ScanArgs),
    /// Read every fileset that has not been read yet
    ReadPending,
    /// Run jobs on eligible filesets
    RunJobs(RunJobsArgs),
    /// List filesets in the catalog
    List(ListArgs),
    /// Delete outdated jobruns and their artifact directories
    PurgeJobruns,
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directories to scan; defaults to the configured root paths
    pub dirs: Vec<String>,
    /// Read new filesets after the scan
    #[arg(long)]
    pub read_pending: bool,
    /// Run all jobs after the scan; implies --read-pending
    #[arg(long)]
    pub run_all_jobs: bool,
}

#[derive(Debug, Args)]
pub struct RunJobsArgs {
    /// Run the jobs of the `[job] list` in job.toml, or every registered job
    /// if there is no such list
    #[arg(long)]
    pub all: bool,
    /// Run jobs again even if an equal or newer version already completed
    #[arg(long)]
    pub force: bool,
    /// Restrict to filesets by name or md5 prefix
    #[arg(long = "fileset", value_name = "NAME_OR_MD5")]
    pub fileset: Vec<String>,
    /// Job to run, as namespace.name; takes precedence over --all
    #[arg(long = "job", value_name = "KEY")]
    pub job: Vec<String>,
    /// Only show what would run
    #[arg(long)]
    pub list: bool,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only filesets with missing files
    #[arg(long, conflicts_with_all = ["pending", "all"])]
    pub broken: bool,
    /// Only filesets not read yet
    #[arg(long, conflicts_with = "all")]
    pub pending: bool,
    /// Include superseded filesets
    #[arg(long)]
    pub all: bool,
}
