mod common;

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use common::{
    boxed, msglog, scan_and_read, write_set, write_with_sidecar, ArtifactJob, GatedJob,
    PanickingJob, RecordingJob,
};
use logvault_core::dispatch::purge_jobruns;
use logvault_core::jobs::{Job, JobConfigFile};
use logvault_core::registry::RegistryKey;
use logvault_core::scanner::IndexedDetector;
use logvault_core::{AppConfig, Database, DispatchOptions, Dispatcher, Error, JobOutcome, Plugins};
use crossbeam_channel::unbounded;
use serde_json::Value;
use tempfile::{tempdir, TempDir};

fn plugins_with(jobs: Vec<Box<dyn Job>>) -> Plugins {
    let mut plugins = Plugins::new();
    let detector = IndexedDetector::new("msglog", "msglog").unwrap();
    plugins
        .add_detector(RegistryKey::new("", "msglog"), Box::new(detector))
        .unwrap();
    plugins
        .add_format("msglog", Box::new(logvault_core::format::MsglogReader))
        .unwrap();
    for job in jobs {
        plugins.add_job(job).unwrap();
    }
    plugins
}

/// One fileset carrying topics /a, /b, /c and /d, scanned and read.
fn catalog(plugins: &Plugins) -> (TempDir, AppConfig, Database) {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    write_set(
        &data,
        "run",
        &[
            msglog(&[(1, "/a"), (2, "/b"), (3, "/c")]).as_str(),
            msglog(&[(4, "/d"), (5, "/a"), (6, "/c")]).as_str(),
        ],
    );
    let config = common::config_in(dir.path());
    let db = Database::open_in_memory().unwrap();
    scan_and_read(&db, plugins, &config, &data);
    (dir, config, db)
}

fn results(db: &Database, outcome: &JobOutcome) -> Vec<Value> {
    db.job_results(outcome.jobrun_id).unwrap()
}

fn topics_of(records: &[Value]) -> Vec<String> {
    records
        .iter()
        .map(|r| r["topic"].as_str().unwrap().to_string())
        .collect()
}

fn outcome<'r>(outcomes: &'r [JobOutcome], job: &str) -> &'r JobOutcome {
    outcomes.iter().find(|o| o.job == job).unwrap()
}

#[test]
fn test_fan_out_routes_only_wanted_topics() {
    let plugins = plugins_with(vec![
        boxed(RecordingJob::new("test.a", "1.0", &["/a"])),
        boxed(RecordingJob::new("test.bc", "1.0", &["/b", "/c"])),
        boxed(RecordingJob::new("test.d", "1.0", &["/d"])),
    ]);
    let (_dir, config, db) = catalog(&plugins);

    let result = Dispatcher::new(&db, &plugins, &config)
        .unwrap()
        .run(&DispatchOptions::default())
        .unwrap();
    assert_eq!(result.outcomes.len(), 3);
    assert_eq!(result.succeeded(), 3);

    let a = results(&db, outcome(&result.outcomes, "test.a"));
    assert_eq!(topics_of(&a), vec!["/a", "/a"]);
    let ts: Vec<i64> = a.iter().map(|r| r["ts"].as_i64().unwrap()).collect();
    assert_eq!(ts, vec![1, 5]);

    let bc = results(&db, outcome(&result.outcomes, "test.bc"));
    assert_eq!(topics_of(&bc), vec!["/b", "/c", "/c"]);

    let d = results(&db, outcome(&result.outcomes, "test.d"));
    assert_eq!(topics_of(&d), vec!["/d"]);
}

#[test]
fn test_failing_job_does_not_affect_siblings() {
    let plugins = plugins_with(vec![
        boxed(RecordingJob::new("test.a", "1.0", &["/a"])),
        boxed(RecordingJob::new("test.bc", "1.0", &["/b", "/c"]).failing_after(1)),
        boxed(PanickingJob::new("test.panic")),
    ]);
    let (_dir, config, db) = catalog(&plugins);

    let result = Dispatcher::new(&db, &plugins, &config)
        .unwrap()
        .run(&DispatchOptions::default())
        .unwrap();
    assert_eq!(result.succeeded(), 1);
    assert_eq!(result.failed(), 2);

    let good = outcome(&result.outcomes, "test.a");
    assert!(good.succeeded);
    assert_eq!(results(&db, good).len(), 2);
    let run = db.get_jobrun(good.jobrun_id).unwrap().unwrap();
    assert_eq!(run.succeeded, Some(true));
    assert_eq!(run.failed, Some(false));

    let failed = outcome(&result.outcomes, "test.bc");
    assert!(failed.error.as_deref().unwrap().contains("gave up after 1 records"));
    assert_eq!(results(&db, failed).len(), 1);
    let run = db.get_jobrun(failed.jobrun_id).unwrap().unwrap();
    assert_eq!(run.failed, Some(true));
    assert_eq!(run.succeeded, Some(false));

    let panicked = outcome(&result.outcomes, "test.panic");
    assert!(panicked.error.as_deref().unwrap().contains("cannot handle run"));

    let storage = db.ensure_storage().unwrap();
    let fileset = &db.readable_filesets(storage.id).unwrap()[0];
    assert_eq!(
        db.failed_job_names(fileset.id).unwrap(),
        vec!["test.bc".to_string(), "test.panic".to_string()]
    );
}

#[test]
fn test_completed_version_is_skipped_unless_forced() {
    let plugins = plugins_with(vec![boxed(RecordingJob::new("test.a", "1.0", &["/a"]))]);
    let (_dir, config, db) = catalog(&plugins);
    let dispatcher = Dispatcher::new(&db, &plugins, &config).unwrap();

    assert_eq!(dispatcher.run(&DispatchOptions::default()).unwrap().outcomes.len(), 1);
    assert!(dispatcher.plan(&DispatchOptions::default()).unwrap().is_empty());
    assert!(dispatcher.run(&DispatchOptions::default()).unwrap().outcomes.is_empty());

    let forced = DispatchOptions {
        force: true,
        ..DispatchOptions::default()
    };
    assert_eq!(dispatcher.run(&forced).unwrap().outcomes.len(), 1);

    // A newer version of the same job is eligible again without force.
    let bumped = plugins_with(vec![boxed(RecordingJob::new("test.a", "1.1", &["/a"]))]);
    let dispatcher = Dispatcher::new(&db, &bumped, &config).unwrap();
    let plan = dispatcher.plan(&DispatchOptions::default()).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].jobs[0].version.as_str(), "0001.0001");
}

#[test]
fn test_failed_run_counts_as_completed() {
    let plugins = plugins_with(vec![boxed(PanickingJob::new("test.panic"))]);
    let (_dir, config, db) = catalog(&plugins);
    let dispatcher = Dispatcher::new(&db, &plugins, &config).unwrap();

    assert_eq!(dispatcher.run(&DispatchOptions::default()).unwrap().failed(), 1);
    assert!(dispatcher.plan(&DispatchOptions::default()).unwrap().is_empty());
}

#[test]
fn test_jobruns_are_in_flight_with_config_before_jobs_emit() {
    let (started_tx, started_rx) = unbounded();
    let (go_tx, go_rx) = unbounded();
    let plugins = plugins_with(vec![
        boxed(GatedJob::new("test.first", started_tx.clone(), go_rx.clone())),
        boxed(GatedJob::new("test.second", started_tx, go_rx)),
    ]);

    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    write_with_sidecar(&data, "run.msglog", &msglog(&[(1, "/a")]));
    let mut config = common::config_in(dir.path());
    config.max_workers = Some(2);
    fs::create_dir_all(config.instance_dir()).unwrap();
    let db = Database::open(config.db_path()).unwrap();
    scan_and_read(&db, &plugins, &config, &data);
    let fileset_id = common::active(&db)[0].id;

    // Watch the catalog through a second connection while both jobs wait.
    let db_path = config.db_path();
    let observer = thread::spawn(move || {
        for _ in 0..2 {
            started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        }
        let reader = Database::open(&db_path).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        let runs = loop {
            let runs = reader.jobruns_for_fileset(fileset_id).unwrap();
            if runs.iter().all(|r| r.config.is_some()) || Instant::now() > deadline {
                break runs;
            }
            thread::sleep(Duration::from_millis(10));
        };
        let results: usize = runs
            .iter()
            .map(|r| reader.job_results(r.id).unwrap().len())
            .sum();
        for _ in 0..2 {
            go_tx.send(()).unwrap();
        }
        (runs, results)
    });

    let result = Dispatcher::new(&db, &plugins, &config)
        .unwrap()
        .run(&DispatchOptions::default())
        .unwrap();
    let (seen, results_while_waiting) = observer.join().unwrap();

    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|r| r.is_in_flight()));
    assert!(seen.iter().all(|r| r.config.as_deref() == Some("{}")));
    assert_eq!(results_while_waiting, 0);

    assert_eq!(result.succeeded(), 2);
    assert!(result.outcomes.iter().all(|o| o.results == 1));
}

#[test]
fn test_jobruns_created_before_a_failed_insert_are_failed() {
    let plugins = plugins_with(vec![
        boxed(RecordingJob::new("test.a", "1.0", &["/a"])),
        boxed(RecordingJob::new("test.b", "1.0", &["/b"])),
    ]);
    let (_dir, config, db) = catalog(&plugins);
    db.connection()
        .execute_batch(
            "CREATE TRIGGER single_jobrun BEFORE INSERT ON jobrun
             WHEN (SELECT COUNT(*) FROM jobrun) >= 1
             BEGIN SELECT RAISE(ABORT, 'jobrun limit reached'); END;",
        )
        .unwrap();

    let err = Dispatcher::new(&db, &plugins, &config)
        .unwrap()
        .run(&DispatchOptions::default())
        .unwrap_err();
    assert!(matches!(err, Error::Database(_)));

    let fileset_id = common::active(&db)[0].id;
    let runs = db.jobruns_for_fileset(fileset_id).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].failed, Some(true));
    assert_eq!(runs[0].succeeded, Some(false));
}

#[test]
fn test_topic_selection_decides_eligibility() {
    let plugins = plugins_with(vec![
        boxed(RecordingJob::new("test.all", "1.0", &[])),
        boxed(RecordingJob::new("test.absent", "1.0", &["/zzz"])),
        boxed(ArtifactJob::new("test.artifact")),
    ]);
    let (_dir, config, db) = catalog(&plugins);

    let plan = Dispatcher::new(&db, &plugins, &config)
        .unwrap()
        .plan(&DispatchOptions::default())
        .unwrap();
    assert_eq!(plan.len(), 1);
    let mut keys: Vec<&str> = plan[0].jobs.iter().map(|j| j.key.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["test.all", "test.artifact"]);
    assert_eq!(plan[0].topics().len(), 4);
}

#[test]
fn test_unread_and_broken_filesets_are_not_eligible() {
    let plugins = plugins_with(vec![boxed(ArtifactJob::new("test.artifact"))]);
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    let parts = write_set(&data, "run", &["1 /a t\n", "2 /a t\n"]);
    write_with_sidecar(&data, "bad.msglog", "garbage\n");
    let config = common::config_in(dir.path());
    let db = Database::open_in_memory().unwrap();

    // Scanned but not read yet.
    common::scan(&db, &plugins, &config, &data);
    let dispatcher = Dispatcher::new(&db, &plugins, &config).unwrap();
    assert!(dispatcher.plan(&DispatchOptions::default()).unwrap().is_empty());

    scan_and_read(&db, &plugins, &config, &data);
    let plan = dispatcher.plan(&DispatchOptions::default()).unwrap();
    let names: Vec<&str> = plan.iter().map(|e| e.fileset.name.as_str()).collect();
    assert_eq!(names, vec!["run"]);

    fs::remove_file(&parts[0]).unwrap();
    common::scan(&db, &plugins, &config, &data);
    assert!(dispatcher.plan(&DispatchOptions::default()).unwrap().is_empty());
}

#[test]
fn test_job_and_fileset_filters() {
    let plugins = plugins_with(vec![
        boxed(RecordingJob::new("test.a", "1.0", &["/a"])),
        boxed(ArtifactJob::new("test.artifact")),
    ]);
    let (_dir, config, db) = catalog(&plugins);
    let dispatcher = Dispatcher::new(&db, &plugins, &config).unwrap();

    let only_a = DispatchOptions {
        jobs: Some(vec!["test.a".to_string(), "test.a".to_string()]),
        ..DispatchOptions::default()
    };
    let plan = dispatcher.plan(&only_a).unwrap();
    assert_eq!(plan[0].jobs.len(), 1);

    let md5 = plan[0].fileset.md5.clone();
    let by_md5 = DispatchOptions {
        filesets: vec![md5[..6].to_string()],
        ..DispatchOptions::default()
    };
    assert_eq!(dispatcher.plan(&by_md5).unwrap().len(), 1);

    let by_name = DispatchOptions {
        filesets: vec!["nope".to_string()],
        ..DispatchOptions::default()
    };
    assert!(dispatcher.plan(&by_name).unwrap().is_empty());

    let unknown = DispatchOptions {
        jobs: Some(vec!["test.missing".to_string()]),
        ..DispatchOptions::default()
    };
    assert!(matches!(dispatcher.run(&unknown), Err(Error::UnknownJob(_))));
    let fileset = &plan[0].fileset;
    assert!(db.jobruns_for_fileset(fileset.id).unwrap().is_empty());
}

#[test]
fn test_job_config_overrides_are_recorded() {
    let plugins = plugins_with(vec![boxed(ArtifactJob::new("test.artifact"))]);
    let (_dir, config, db) = catalog(&plugins);
    let overrides = JobConfigFile::parse("[\"test.artifact\"]\nlabel = \"custom\"\n").unwrap();
    let dispatcher = Dispatcher::new(&db, &plugins, &config)
        .unwrap()
        .with_job_config(overrides);

    let result = dispatcher.run(&DispatchOptions::default()).unwrap();
    let done = outcome(&result.outcomes, "test.artifact");
    assert!(done.succeeded);
    assert_eq!(done.files, 1);

    let run = db.get_jobrun(done.jobrun_id).unwrap().unwrap();
    let recorded: Value = serde_json::from_str(run.config.as_deref().unwrap()).unwrap();
    assert_eq!(recorded["label"], "custom");
    assert_eq!(results(&db, done), vec![serde_json::json!({"label": "custom"})]);

    let jobfiles = db.jobfiles(done.jobrun_id).unwrap();
    assert_eq!(jobfiles.len(), 1);
    assert_eq!(jobfiles[0].name, "summary.txt");
    let artifact = config
        .jobruns_dir()
        .join("test")
        .join("artifact")
        .join(done.jobrun_id.to_string())
        .join("summary.txt");
    assert_eq!(fs::read_to_string(artifact).unwrap(), "run \"custom\"\n");
}

#[test]
fn test_bad_job_config_fails_before_any_jobrun() {
    let plugins = plugins_with(vec![boxed(ArtifactJob::new("test.artifact"))]);
    let (_dir, config, db) = catalog(&plugins);
    let overrides = JobConfigFile::parse("[\"test.artifact\"]\nunknown = 1\n").unwrap();
    let dispatcher = Dispatcher::new(&db, &plugins, &config)
        .unwrap()
        .with_job_config(overrides);

    assert!(matches!(
        dispatcher.run(&DispatchOptions::default()),
        Err(Error::JobConfig(_))
    ));
    assert!(db.jobrun_ids().unwrap().is_empty());
}

#[test]
fn test_job_config_is_loaded_from_instance() {
    let plugins = plugins_with(vec![boxed(ArtifactJob::new("test.artifact"))]);
    let (_dir, config, db) = catalog(&plugins);
    fs::create_dir_all(config.instance_dir()).unwrap();
    fs::write(
        config.job_config_path(),
        "[job]\nlist = [\"test.artifact\"]\n\n[test.artifact]\nlabel = \"from file\"\n",
    )
    .unwrap();

    let dispatcher = Dispatcher::new(&db, &plugins, &config).unwrap();
    assert_eq!(dispatcher.job_config().job_list(), vec!["test.artifact".to_string()]);
    let plan = dispatcher.plan(&DispatchOptions::default()).unwrap();
    assert_eq!(plan[0].jobs[0].config["label"], "from file");
}

#[test]
fn test_cancelled_dispatch_fails_running_jobs_and_skips_the_rest() {
    let plugins = plugins_with(vec![boxed(RecordingJob::new("test.a", "1.0", &["/a"]))]);
    let (_dir, config, db) = catalog(&plugins);
    let dispatcher = Dispatcher::new(&db, &plugins, &config).unwrap();
    let plan = dispatcher.plan(&DispatchOptions::default()).unwrap();

    dispatcher.cancel_token().cancel();
    let outcomes = dispatcher.run_entry(&plan[0]).unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].succeeded);
    let run = db.get_jobrun(outcomes[0].jobrun_id).unwrap().unwrap();
    assert!(!run.is_in_flight());
    assert_eq!(run.failed, Some(true));

    let result = dispatcher
        .run(&DispatchOptions {
            force: true,
            ..DispatchOptions::default()
        })
        .unwrap();
    assert!(result.cancelled);
    assert!(result.outcomes.is_empty());
}

#[test]
fn test_purge_keeps_latest_jobrun_and_its_directory() {
    let plugins = plugins_with(vec![boxed(ArtifactJob::new("test.artifact"))]);
    let (_dir, config, db) = catalog(&plugins);
    let dispatcher = Dispatcher::new(&db, &plugins, &config).unwrap();
    let forced = DispatchOptions {
        force: true,
        ..DispatchOptions::default()
    };

    let first = dispatcher.run(&forced).unwrap().outcomes.remove(0);
    let second = dispatcher.run(&forced).unwrap().outcomes.remove(0);
    let dir_of = |id: i64| -> std::path::PathBuf {
        config
            .jobruns_dir()
            .join("test")
            .join("artifact")
            .join(id.to_string())
    };
    assert!(dir_of(first.jobrun_id).is_dir());

    let purged = purge_jobruns(&db, &config.jobruns_dir()).unwrap();
    assert_eq!(purged.jobruns, 1);
    assert_eq!(purged.directories, 1);
    assert!(!dir_of(first.jobrun_id).exists());
    assert!(dir_of(second.jobrun_id).is_dir());
    assert!(db.get_jobrun(first.jobrun_id).unwrap().is_none());
    assert_eq!(db.jobfiles(second.jobrun_id).unwrap().len(), 1);

    // Nothing left to purge.
    let again = purge_jobruns(&db, &config.jobruns_dir()).unwrap();
    assert_eq!((again.jobruns, again.directories), (0, 0));
}

#[test]
fn test_purge_without_jobruns_dir() {
    let db = Database::open_in_memory().unwrap();
    let result = purge_jobruns(&db, Path::new("/nonexistent/jobruns")).unwrap();
    assert_eq!(result.jobruns, 0);
}
