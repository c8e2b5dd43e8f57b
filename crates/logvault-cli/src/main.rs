mod commands;
mod logging;
mod progress;

use std::fs;
use std::process;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, ListArgs, RunJobsArgs, ScanArgs};
use dotenv::dotenv;
use logvault_core::dispatch::purge_jobruns;
use logvault_core::storage::models::Fileset;
use logvault_core::{AppConfig, Database, DispatchOptions, Dispatcher, Plugins, Storage};
use progress::CliReporter;
use tracing::{error, info};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match logvault_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let plugins = match Plugins::builtin() {
        Ok(plugins) => plugins,
        Err(err) => {
            error!("Error registering plugins: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let outcome = match args.command {
        Some(Commands::Init) => run_init(&config),
        Some(Commands::Scan(scan)) => run_scan(&config, &plugins, scan),
        Some(Commands::ReadPending) => run_read_pending(&config, &plugins),
        Some(Commands::RunJobs(run)) => run_jobs(&config, &plugins, run),
        Some(Commands::List(list)) => run_list(&config, list),
        Some(Commands::PurgeJobruns) => run_purge(&config),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    // Failures are reported, not turned into an exit status.
    if let Err(err) = outcome {
        error!("Error: {:#}", err);
    }
}

fn open_catalog(config: &AppConfig) -> anyhow::Result<Database> {
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Database::open(&db_path).with_context(|| format!("opening {}", db_path.display()))
}

fn run_init(config: &AppConfig) -> anyhow::Result<()> {
    let instance_dir = config.instance_dir();
    fs::create_dir_all(config.jobruns_dir())?;
    let db = open_catalog(config)?;
    let storage = db.ensure_storage()?;
    info!("Initialized instance {}", instance_dir.display().to_string().cyan());
    println!("{}", storage.uuid.green());
    Ok(())
}

fn run_scan(config: &AppConfig, plugins: &Plugins, args: ScanArgs) -> anyhow::Result<()> {
    let dirs = if args.dirs.is_empty() {
        config.root_paths.clone()
    } else {
        args.dirs
    };
    if dirs.is_empty() {
        bail!("No directories given and no root_paths configured");
    }

    let db = open_catalog(config)?;
    let reporter = CliReporter::new();
    let storage = Storage::open(&db, plugins, config)?.with_reporter(&reporter);
    let result = storage.scan_all(&dirs)?;

    info!(
        "{} added, {} superseded, {} updated, {} unchanged",
        format!("{}", result.added).green(),
        format!("{}", result.superseded).yellow(),
        format!("{}", result.updated).cyan(),
        result.unchanged,
    );
    if result.duplicates + result.mismatched + result.errors > 0 {
        info!(
            "{} duplicates, {} checksum mismatches, {} errors",
            format!("{}", result.duplicates).yellow(),
            format!("{}", result.mismatched).red(),
            format!("{}", result.errors).red(),
        );
    }
    if result.lost_files + result.found_files > 0 {
        info!(
            "{} files lost, {} files found again",
            format!("{}", result.lost_files).red(),
            format!("{}", result.found_files).green(),
        );
    }

    if args.read_pending || args.run_all_jobs {
        storage.read_pending()?;
    }
    if args.run_all_jobs {
        let dispatcher = Dispatcher::new(&db, plugins, config)?.with_reporter(&reporter);
        let options = DispatchOptions {
            jobs: selected_jobs(&dispatcher, Vec::new()),
            ..DispatchOptions::default()
        };
        dispatcher.run(&options)?;
    }
    Ok(())
}

fn run_read_pending(config: &AppConfig, plugins: &Plugins) -> anyhow::Result<()> {
    let db = open_catalog(config)?;
    let reporter = CliReporter::new();
    let storage = Storage::open(&db, plugins, config)?.with_reporter(&reporter);
    let result = storage.read_pending()?;
    if result.failed > 0 {
        info!(
            "{} filesets could not be read, see `logvault list --all`",
            format!("{}", result.failed).red()
        );
    }
    Ok(())
}

fn run_jobs(config: &AppConfig, plugins: &Plugins, args: RunJobsArgs) -> anyhow::Result<()> {
    if !args.all && args.job.is_empty() {
        let mut cli = Cli::command();
        if let Some(command) = cli.find_subcommand_mut("run-jobs") {
            let _ = command.print_long_help();
        }
        return Ok(());
    }

    let db = open_catalog(config)?;
    let reporter = CliReporter::new();
    let dispatcher = Dispatcher::new(&db, plugins, config)?.with_reporter(&reporter);
    let options = DispatchOptions {
        force: args.force,
        jobs: selected_jobs(&dispatcher, args.job),
        filesets: args.fileset,
    };

    if args.list {
        let plan = dispatcher.plan(&options)?;
        if plan.is_empty() {
            println!("Nothing to run");
        }
        for entry in &plan {
            println!("{} {}", short_md5(&entry.fileset).dimmed(), entry.fileset.name.bold());
            for job in &entry.jobs {
                println!("    {} {}", job.key.cyan(), job.version);
            }
        }
        return Ok(());
    }

    let result = dispatcher.run(&options)?;
    for outcome in result.outcomes.iter().filter(|o| !o.succeeded) {
        println!(
            "{} {} (jobrun {}): {}",
            "failed".red(),
            outcome.job,
            outcome.jobrun_id,
            outcome.error.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

/// Explicit job keys win, then the `[job] list` of job.toml. `None` means
/// every registered job.
fn selected_jobs(dispatcher: &Dispatcher, explicit: Vec<String>) -> Option<Vec<String>> {
    if !explicit.is_empty() {
        return Some(explicit);
    }
    let configured = dispatcher.job_config().job_list();
    if configured.is_empty() {
        None
    } else {
        Some(configured)
    }
}

fn run_list(config: &AppConfig, args: ListArgs) -> anyhow::Result<()> {
    let db = open_catalog(config)?;
    let storage = db.ensure_storage()?;
    let filesets = if args.broken {
        db.broken_filesets(storage.id)?
    } else if args.pending {
        db.pending_filesets(storage.id)?
    } else if args.all {
        db.all_filesets(storage.id)?
    } else {
        db.active_filesets(storage.id)?
    };

    for fileset in &filesets {
        let status = if fileset.deleted {
            "superseded".dimmed()
        } else if fileset.is_broken() {
            "broken".red()
        } else if fileset.is_pending() {
            "pending".yellow()
        } else if fileset.read_succeeded == Some(true) {
            "ok".green()
        } else {
            "unreadable".red()
        };
        println!(
            "{:>6} {} {:<10} {:<8} {} ({} files)",
            fileset.id,
            short_md5(fileset).dimmed(),
            status,
            fileset.fileset_type,
            fileset.name.bold(),
            fileset.files.len()
        );
        if let Some(reason) = &fileset.read_error {
            println!("       read error: {}", reason.red());
        }
        let failed = db.failed_job_names(fileset.id)?;
        if !failed.is_empty() {
            println!("       failed jobs: {}", failed.join(", ").red());
        }
    }
    info!("{} fileset(s)", filesets.len());
    Ok(())
}

fn run_purge(config: &AppConfig) -> anyhow::Result<()> {
    let db = open_catalog(config)?;
    let result = purge_jobruns(&db, &config.jobruns_dir())?;
    println!(
        "Removed {} jobrun(s) and {} director(ies)",
        format!("{}", result.jobruns).green(),
        format!("{}", result.directories).green()
    );
    Ok(())
}

fn short_md5(fileset: &Fileset) -> &str {
    fileset.md5.get(..8).unwrap_or(&fileset.md5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logvault_core::jobs::JobConfigFile;

    #[test]
    fn test_selected_jobs_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::for_instance(dir.path());
        let db = Database::open_in_memory().unwrap();
        let plugins = Plugins::builtin().unwrap();

        let dispatcher = Dispatcher::new(&db, &plugins, &config).unwrap();
        assert_eq!(selected_jobs(&dispatcher, Vec::new()), None);

        let listed = dispatcher.with_job_config(
            JobConfigFile::parse("[job]\nlist = \"core.topic_stats\"\n").unwrap(),
        );
        assert_eq!(
            selected_jobs(&listed, Vec::new()),
            Some(vec!["core.topic_stats".to_string()])
        );
        assert_eq!(
            selected_jobs(&listed, vec!["core.fileset_info".to_string()]),
            Some(vec!["core.fileset_info".to_string()])
        );
    }

    #[test]
    fn test_run_jobs_accepts_all_together_with_job() {
        let argv = ["logvault", "run-jobs", "--all", "--job", "core.topic_stats"];
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Some(Commands::RunJobs(args)) => {
                assert!(args.all);
                assert_eq!(args.job, vec!["core.topic_stats".to_string()]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
