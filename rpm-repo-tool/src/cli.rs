// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    log::{info, warn, LevelFilter},
    rpm_repo_sync::{
        publish::ProgressCallback, storage::filesystem::FilesystemStorage, ChecksumType,
        InfoDetail, NamingPolicy, PublishEvent, RepoConfig, Rpm, RpmRepositoryError,
        UpdateReport,
    },
    std::{path::Path, str::FromStr},
    thiserror::Error,
};

const UPDATE_ABOUT: &str = "\
Bring the metadata of a repository in line with its packages.

The repository is a local directory holding `.rpm` files and a `repodata`
directory. This command:

1. Takes a lease on `repodata` so concurrent updates of the same repository
   do not interleave. A stale lease left behind by a crashed process expires
   after a timeout.
2. Compares the packages listed in `repodata/primary.xml.gz` with the `.rpm`
   files present in the directory. Files nobody indexed are added. Indexed
   packages whose file disappeared are removed.
3. Adds packages staged under `.add/` and removes packages named by markers
   under `.remove/`.
4. Writes new `primary.xml.gz`, `other.xml.gz` and optionally
   `filelists.xml.gz`, then `repodata/repomd.xml` last.

Repository settings come from `--config`, a YAML document like:

    digest: sha256
    naming-policy: sha256
    filelists: true

Individual flags override values from the configuration file.
";

const ADD_ABOUT: &str = "\
Stage packages and add them to a repository.

Each package file is staged under `.add/` of the repository using its file
name as location and a batch update runs afterwards. Use `--location` to
place all packages in a sub-directory of the repository instead.

Repositories configured with `update: {on: {cron: ...}}` only stage the
packages. They are published by the next scheduled `rrt update`.
";

const REMOVE_ABOUT: &str = "\
Remove packages from a repository.

A removal marker is staged under `.remove/` for each location and a batch
update runs afterwards. The package file and its index entries are deleted.
Locations not present in the repository are ignored.

As with `add`, repositories updated on a cron schedule only get the markers.
";

#[derive(Debug, Error)]
pub enum RrtError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Rpm(#[from] RpmRepositoryError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, RrtError>;

fn add_repository_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .allow_invalid_utf8(true)
                .help("Path to a YAML file defining repository settings"),
        )
        .arg(
            Arg::new("digest")
                .long("digest")
                .takes_value(true)
                .possible_values(["sha1", "sha256"])
                .help("Digest algorithm for package and metadata checksums"),
        )
        .arg(
            Arg::new("naming-policy")
                .long("naming-policy")
                .takes_value(true)
                .help("How metadata files are named: plain, sha1 or sha256"),
        )
        .arg(
            Arg::new("filelists")
                .long("filelists")
                .conflicts_with("no-filelists")
                .help("Maintain filelists.xml.gz"),
        )
        .arg(
            Arg::new("no-filelists")
                .long("no-filelists")
                .help("Do not maintain filelists.xml.gz"),
        )
        .arg(
            Arg::new("print-info")
                .long("print-info")
                .help("Print the packages added to and removed from the index"),
        )
        .arg(
            Arg::new("path")
                .takes_value(true)
                .required(true)
                .allow_invalid_utf8(true)
                .help("Directory holding the repository"),
        )
}

pub async fn run_cli() -> Result<()> {
    let default_threads = format!("{}", num_cpus::get());

    let app = Command::new("RPM Repository Tool")
        .version("0.1")
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Maintain RPM repository metadata")
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("max-parallel-io")
                .long("--max-parallel-io")
                .takes_value(true)
                .default_value(&default_threads)
                .global(true)
                .help("Maximum number of parallel I/O operations to perform"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(add_repository_args(
        Command::new("update")
            .about("Reconcile repository metadata with stored packages")
            .long_about(UPDATE_ABOUT),
    ));

    let app = app.subcommand(
        add_repository_args(
            Command::new("add")
                .about("Add packages to a repository")
                .long_about(ADD_ABOUT),
        )
        .arg(
            Arg::new("location")
                .long("location")
                .takes_value(true)
                .help("Repository directory to place packages in"),
        )
        .arg(
            Arg::new("rpm")
                .takes_value(true)
                .multiple_values(true)
                .required(true)
                .allow_invalid_utf8(true)
                .help("Package files to add"),
        ),
    );

    let mut app = app.subcommand(
        add_repository_args(
            Command::new("remove")
                .about("Remove packages from a repository")
                .long_about(REMOVE_ABOUT),
        )
        .arg(
            Arg::new("location")
                .takes_value(true)
                .multiple_values(true)
                .required(true)
                .help("Repository relative locations of packages to remove"),
        ),
    );

    let matches = app.clone().get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("update", args)) => command_update(args).await,
        Some(("add", args)) => command_add(args).await,
        Some(("remove", args)) => command_remove(args).await,
        Some((command, _)) => Err(RrtError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

/// Resolve repository settings from `--config` and individual flags.
fn repo_config(args: &ArgMatches, path: &Path) -> Result<RepoConfig> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut config = if let Some(config_path) = args.value_of_os("config") {
        let yaml = std::fs::read_to_string(config_path)?;
        RepoConfig::from_yaml(name, &yaml)?
    } else {
        RepoConfig::new(
            name,
            ChecksumType::Sha256,
            NamingPolicy::HashPrefixed(ChecksumType::Sha256),
            true,
        )
    };

    if let Some(digest) = args.value_of("digest") {
        config.set_digest(ChecksumType::from_str(digest)?);
    }
    if let Some(naming) = args.value_of("naming-policy") {
        config.set_naming(NamingPolicy::from_str(naming)?);
    }
    if args.is_present("filelists") {
        config.set_filelists(true);
    }
    if args.is_present("no-filelists") {
        config.set_filelists(false);
    }

    Ok(config)
}

fn repository(args: &ArgMatches) -> Result<Rpm> {
    let max_parallel_io = args.value_of_t::<usize>("max-parallel-io")?;

    let path = Path::new(
        args.value_of_os("path")
            .expect("path argument is required"),
    );

    let config = repo_config(args, path)?;

    let detail = if args.is_present("print-info") {
        InfoDetail::Full
    } else {
        InfoDetail::None
    };

    Ok(Rpm::new(Box::new(FilesystemStorage::new(path)), config, max_parallel_io)
        .with_info_detail(detail))
}

async fn run_update(rpm: &Rpm, args: &ArgMatches) -> Result<()> {
    let cb: ProgressCallback = Some(Box::new(|event: PublishEvent| match event {
        PublishEvent::InvalidPackage(_, _) => warn!("{}", event),
        _ => info!("{}", event),
    }));

    let report = rpm.batch_update("", &cb).await?;

    if args.is_present("print-info") {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &UpdateReport) {
    for package in &report.added {
        println!("added {}", package);
    }
    for package in &report.removed {
        println!("removed {}", package);
    }
    println!(
        "{} packages indexed at revision {}",
        report.count, report.revision
    );
}

/// Publish staged changes, unless the repository is updated on a schedule.
async fn publish_staged(rpm: &Rpm, args: &ArgMatches) -> Result<()> {
    if rpm.config().update_on_stage() {
        return run_update(rpm, args).await;
    }

    info!(
        "{} is updated on schedule {}; staged changes are published by the next update",
        rpm.config().name(),
        rpm.config().cron().unwrap_or_default()
    );

    Ok(())
}

async fn command_update(args: &ArgMatches) -> Result<()> {
    let rpm = repository(args)?;

    run_update(&rpm, args).await
}

async fn command_add(args: &ArgMatches) -> Result<()> {
    let rpm = repository(args)?;
    let directory = args.value_of("location").unwrap_or_default();

    for path in args.values_of_os("rpm").expect("rpm argument is required") {
        let path = Path::new(path);
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                RpmRepositoryError::InvalidLocation(path.display().to_string())
            })?;

        let location = if directory.is_empty() {
            file_name
        } else {
            format!("{}/{}", directory.trim_matches('/'), file_name)
        };

        let data = std::fs::read(path)?;
        let key = rpm.stage_package("", &location, data).await?;
        info!("staged {} as {}", path.display(), key);
    }

    publish_staged(&rpm, args).await
}

async fn command_remove(args: &ArgMatches) -> Result<()> {
    let rpm = repository(args)?;

    for location in args
        .values_of("location")
        .expect("location argument is required")
    {
        let key = rpm.stage_removal("", location).await?;
        info!("staged removal of {} as {}", location, key);
    }

    publish_staged(&rpm, args).await
}
