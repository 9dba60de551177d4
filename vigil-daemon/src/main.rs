//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;

use std::path::PathBuf;

use clap::{App, Arg};
use config::{Config, LoggingFmtStyle};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;
use vigil_bfd::master::Master;
use vigil_bfd::notify::ConsumerKind;
use vigil_bfd::tasks::messages::control::ControlMsg;
use vigil_utils::bfd::SessionEvent;
use vigil_utils::{Sender, UnboundedReceiver};

fn init_tracing(config: &config::Logging) {
    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = tracing_appender::rolling::never(
            &config.file.dir,
            &config.file.name,
        );
        tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_ansi(false)
            .compact()
            .boxed()
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(config.stdout.colors);
        match config.stdout.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        }
    });

    // Configure the tracing fmt layer.
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("vigil=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file)
        .with(stdout)
        .init();
}

// Forwards session events to a consumer process over a UNIX stream socket.
//
// Events that occur while the consumer is unreachable are logged and
// discarded; consumers are expected to resynchronize when they reconnect.
async fn consumer_writer(
    kind: ConsumerKind,
    socket_path: String,
    mut events: UnboundedReceiver<SessionEvent>,
) {
    let mut stream: Option<UnixStream> = None;

    while let Some(event) = events.recv().await {
        if stream.is_none() && !socket_path.is_empty() {
            match UnixStream::connect(&socket_path).await {
                Ok(new_stream) => stream = Some(new_stream),
                Err(error) => {
                    warn!(consumer = %kind, %error,
                        "failed to connect to consumer socket");
                }
            }
        }

        match &mut stream {
            Some(active) => {
                let line = format!("{event}\n");
                if let Err(error) = active.write_all(line.as_bytes()).await {
                    warn!(consumer = %kind, %error,
                        "failed to deliver session event");
                    stream = None;
                }
            }
            None => {
                info!(consumer = %kind, %event, "session event");
            }
        }
    }
}

// Translates UNIX signals into engine control messages: SIGHUP reloads the
// configuration, SIGUSR1 dumps the diagnostics snapshot.
async fn signal_handler(
    control: Sender<ControlMsg>,
    config_file: Option<String>,
    dump_file: PathBuf,
) {
    let mut sighup =
        signal(SignalKind::hangup()).expect("failed to register SIGHUP");
    let mut sigusr1 = signal(SignalKind::user_defined1())
        .expect("failed to register SIGUSR1");
    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to register SIGINT");
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to register SIGTERM");

    loop {
        tokio::select! {
            _ = sighup.recv() => {
                let path = config_file.as_deref()
                    .unwrap_or(Config::DFLT_FILEPATH);
                match Config::try_load(path) {
                    Ok(config) => {
                        info!("reloading configuration");
                        let msg = ControlMsg::Reload(config.sessions);
                        let _ = control.send(msg).await;
                    }
                    Err(error) => {
                        error!(%error,
                            "reload failed, keeping previous configuration");
                    }
                }
            }
            _ = sigusr1.recv() => {
                let msg = ControlMsg::Dump(dump_file.clone());
                let _ = control.send(msg).await;
            }
            _ = sigint.recv() => {
                let _ = control.send(ControlMsg::Shutdown).await;
            }
            _ = sigterm.recv() => {
                let _ = control.send(ControlMsg::Shutdown).await;
            }
        }
    }
}

async fn run(config: Config, config_file: Option<String>) {
    let (mut master, rx) = Master::new();

    // Register consumer subscribers.
    for (kind, consumer) in [
        (ConsumerKind::Vrrp, &config.consumers.vrrp),
        (ConsumerKind::Checker, &config.consumers.checker),
    ] {
        if consumer.enabled {
            let events = master.notifier.register(kind);
            tokio::spawn(consumer_writer(
                kind,
                consumer.socket.clone(),
                events,
            ));
        }
    }

    // Handle reload/dump/shutdown signals.
    let dump_file = PathBuf::from(&config.dump_file);
    tokio::spawn(signal_handler(
        master.tx.control.clone(),
        config_file,
        dump_file,
    ));

    // Load the initial configuration and run the main loop.
    master.startup(config.sessions);
    master.run(rx).await;
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Vigil failover daemon")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config").map(str::to_owned);
    let config = Config::load(config_file.as_deref());

    // Initialize tracing.
    init_tracing(&config.logging);

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    // Main loop.
    //
    // The engine is strictly single-threaded: every session mutation happens
    // on this thread, with the child tasks multiplexed cooperatively.
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            run(config, config_file).await;
        });
}
