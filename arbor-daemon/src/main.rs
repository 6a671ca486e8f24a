//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

use clap::{App, Arg};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

use arbor_backend::commit::{
    load_failsafe, startup_commit, startup_upgrade_inspect,
};
use arbor_backend::{Context, Error, Options};
use arbor_daemon::config::{self, Config, LoggingFmtStyle};
use arbor_daemon::northbound::Northbound;
use arbor_data::netconf::Validity;
use arbor_datastore::Db;
use arbor_yang::SchemaStore;

// Exit codes: 0 normal, 1 startup validation failure without a usable
// failsafe, 2 configuration parse error, 255 fatal internal error.
const EXIT_OK: i32 = 0;
const EXIT_STARTUP_FAILED: i32 = 1;
const EXIT_BAD_CONFIG: i32 = 2;
const EXIT_FATAL: i32 = 255;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum StartupMode {
    None,
    Running,
    Startup,
    Init,
}

fn init_tracing(config: &config::Logging, debug_level: u8) {
    let level = match debug_level {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let layer = tracing_subscriber::fmt::layer().with_target(false);
        let layer = match config.stdout.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(level)
    });

    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let path = std::path::Path::new(&config.file.path);
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let name = path
            .file_name()
            .map(std::ffi::OsStr::to_owned)
            .unwrap_or_else(|| "arbord.log".into());
        let file_appender = tracing_appender::rolling::never(dir, name);
        tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_ansi(false)
            .boxed()
            .with_filter(level)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("arbor=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout)
        .with(file)
        .init();
}

fn load_schema(config: &Config) -> Result<SchemaStore, arbor_yang::Error> {
    let mut schema = SchemaStore::new();
    for path in &config.yang.search_paths {
        schema.add_search_path(path);
    }
    for feature in &config.yang.features {
        if let Some((module, feature)) = feature.split_once(':') {
            schema.enable_feature(module, feature);
        } else {
            warn!(%feature, "ignoring feature without a module qualifier");
        }
    }
    for module in &config.yang.modules {
        schema.load_module(module, None)?;
    }
    Ok(schema)
}

// Seeds the running store according to the startup mode; a validation
// failure prefers the failsafe store to a non-validating running.
fn startup(ctx: &mut Context, mode: StartupMode) -> i32 {
    let result = match mode {
        StartupMode::None => Ok(Validity::Valid),
        StartupMode::Init => ctx
            .datastores
            .reset(Db::Running)
            .map(|_| Validity::Valid)
            .map_err(Error::Datastore),
        StartupMode::Running => {
            // Replay the previous running store through the plugins.
            ctx.datastores
                .copy(Db::Running, Db::Tmp)
                .map_err(Error::Datastore)
                .and_then(|_| startup_commit(ctx, Db::Tmp))
        }
        StartupMode::Startup => startup_commit(ctx, Db::Startup),
    };
    match result {
        Ok(Validity::Valid) => EXIT_OK,
        Ok(Validity::Invalid(invalid)) => {
            warn!(error = %invalid, "startup validation failed");
            match load_failsafe(ctx, "startup") {
                Ok(()) => EXIT_OK,
                Err(error) => {
                    error!(%error, "startup recovery failed");
                    EXIT_STARTUP_FAILED
                }
            }
        }
        Err(error) => {
            error!(%error, "startup failed");
            EXIT_FATAL
        }
    }
}

// ===== main =====

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    // Parse command-line parameters.
    let matches = App::new("Arbor configuration daemon")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("f")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .arg(
            Arg::with_name("debug")
                .short("D")
                .long("debug")
                .value_name("level")
                .help("Debug level (0-2)."),
        )
        .arg(
            Arg::with_name("log")
                .short("l")
                .long("log")
                .value_name("dest")
                .help("Log destination: stdout or file:<path>."),
        )
        .arg(
            Arg::with_name("option")
                .short("o")
                .long("option")
                .value_name("opt=val")
                .multiple(true)
                .number_of_values(1)
                .help("Override a configuration option."),
        )
        .arg(
            Arg::with_name("startup")
                .short("s")
                .long("startup")
                .value_name("mode")
                .help("Startup mode: none, running, startup or init."),
        )
        .arg(
            Arg::with_name("upgrade-quit")
                .short("q")
                .long("upgrade-quit")
                .help("Load and upgrade the startup store, print it, quit."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let mut config = match Config::load(config_file) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            return EXIT_BAD_CONFIG;
        }
    };

    // Apply -l before tracing comes up.
    match matches.value_of("log") {
        Some("stdout") => {
            config.logging.stdout.enabled = true;
            config.logging.file.enabled = false;
        }
        Some(dest) if dest.starts_with("file:") => {
            config.logging.stdout.enabled = false;
            config.logging.file.enabled = true;
            config.logging.file.path =
                dest.trim_start_matches("file:").to_owned();
        }
        Some(dest) => {
            eprintln!("unknown log destination \"{dest}\"");
            return EXIT_BAD_CONFIG;
        }
        None => (),
    }

    let debug_level = matches
        .value_of("debug")
        .and_then(|level| level.parse().ok())
        .unwrap_or(0u8);
    init_tracing(&config.logging, debug_level);

    let startup_mode = match matches.value_of("startup").unwrap_or("startup") {
        "none" => StartupMode::None,
        "running" => StartupMode::Running,
        "startup" => StartupMode::Startup,
        "init" => StartupMode::Init,
        mode => {
            eprintln!("unknown startup mode \"{mode}\"");
            return EXIT_BAD_CONFIG;
        }
    };

    // Build the schema store.
    let schema = match load_schema(&config) {
        Ok(schema) => schema,
        Err(error) => {
            error!(%error, "failed to load YANG modules");
            return EXIT_FATAL;
        }
    };

    // Assemble the backend context.
    let mut options = Options {
        datastore_dir: config.datastore.dir.clone().into(),
        record_modstate: config.datastore.record_modstate,
        changelog_file: config
            .datastore
            .changelog_file
            .as_ref()
            .map(Into::into),
        ..Default::default()
    };
    for option in matches.values_of("option").unwrap_or_default() {
        match option.split_once('=') {
            Some((key, value)) => {
                options.extra.insert(key.to_owned(), value.to_owned());
            }
            None => {
                eprintln!("bad -o option \"{option}\", expected opt=val");
                return EXIT_BAD_CONFIG;
            }
        }
    }
    let mut ctx = match Context::new(options, schema) {
        Ok(ctx) => ctx,
        Err(error) => {
            error!(%error, "failed to initialize backend");
            return EXIT_FATAL;
        }
    };
    if let Err(error) = ctx.create_base_datastores() {
        error!(%error, "failed to create datastores");
        return EXIT_FATAL;
    }

    // -q: print the upgraded startup store and stop before any
    // side-effects.
    if matches.is_present("upgrade-quit") {
        let mut stdout = std::io::stdout();
        return match startup_upgrade_inspect(&mut ctx, Db::Startup, &mut stdout)
        {
            Ok(Validity::Valid) => EXIT_OK,
            Ok(Validity::Invalid(invalid)) => {
                error!(error = %invalid, "startup store is invalid");
                EXIT_STARTUP_FAILED
            }
            Err(error) => {
                error!(%error, "upgrade inspection failed");
                EXIT_FATAL
            }
        };
    }

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(EXIT_FATAL);
    }));

    info!("starting up");

    // Single-threaded reactor: handlers run to completion one at a time.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(%error, "failed to create async runtime");
            return EXIT_FATAL;
        }
    };

    runtime.block_on(async {
        ctx.plugins.start_all();

        // Seed running per the startup mode (needs the runtime for
        // confirmed-commit timers armed by recovery commits).
        let startup_code = startup(&mut ctx, startup_mode);
        if startup_code != EXIT_OK {
            return startup_code;
        }

        // Shutdown on SIGINT/SIGTERM.
        let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            let _ = shutdown_tx.send(()).await;
        });

        let (northbound, _request_tx) = Northbound::new(ctx);
        northbound.run(shutdown_rx).await;
        EXIT_OK
    })
}
