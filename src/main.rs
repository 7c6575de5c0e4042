use anyhow::{Context, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use wallcast::config::{PipelineConfig, app_name, version};
use wallcast::decoder::default_engine_factory;
use wallcast::fetch::default_source_factory;
use wallcast::pipeline::player::FadeOptions;
use wallcast::workers::{ControlMessage, PlayerWorker, WorkerEvent, WorkerHandle};

fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("uri")
                .value_name("URI")
                .help("WebM resource to play (http(s)://, file:// or a path)."),
        )
        .arg(
            Arg::new("paused")
                .long("paused")
                .help("Load with the gate closed; send {\"play\":true} to start.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("fade-in")
                .long("fade-in")
                .value_name("MS")
                .help("Fade-in length in milliseconds.")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("fade-out")
                .long("fade-out")
                .value_name("MS")
                .help("Fade-out length in milliseconds.")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("no-fade-in")
                .long("no-fade-in")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-fade-out")
                .long("no-fade-out")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("lookahead")
                .long("lookahead")
                .value_name("FRAMES")
                .help("Depth of the presentation-order queue.")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("chunk-size")
                .long("chunk-size")
                .value_name("BYTES")
                .help("Bytes per ranged request.")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON pipeline configuration."),
        )
        .arg(
            Arg::new("commands")
                .long("commands")
                .help("Read JSON control messages from stdin, one per line.")
                .action(ArgAction::SetTrue),
        )
}

fn pipeline_config(matches: &ArgMatches) -> anyhow::Result<PipelineConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(&lookahead) = matches.get_one::<usize>("lookahead") {
        config.lookahead = lookahead;
    }
    if let Some(&chunk_size) = matches.get_one::<u64>("chunk-size") {
        config.chunk_size = chunk_size;
    }
    config.validate()?;
    Ok(config)
}

fn fade_options(matches: &ArgMatches) -> FadeOptions {
    let mut fade = FadeOptions::default();
    if let Some(&ms) = matches.get_one::<u64>("fade-in") {
        fade.fade_in_micros = ms as i64 * 1000;
    }
    if let Some(&ms) = matches.get_one::<u64>("fade-out") {
        fade.fade_out_micros = ms as i64 * 1000;
    }
    fade.disable_in = matches.get_flag("no-fade-in");
    fade.disable_out = matches.get_flag("no-fade-out");
    fade
}

/// Forward stdin lines to the worker until EOF, then close it.
async fn read_commands(handle: WorkerHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match ControlMessage::from_json(&line) {
                Ok(Some(message)) => {
                    handle.send(message);
                }
                Ok(None) => {}
                Err(e) => warn!("ignoring command {:?}: {}", line, e),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("stdin: {}", e);
                break;
            }
        }
    }
    handle.close();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = cli().get_matches();
    let config = pipeline_config(&matches)?;
    let uri = matches.get_one::<String>("uri").cloned();
    let commands = matches.get_flag("commands");
    if uri.is_none() && !commands {
        return Err(anyhow!("nothing to play: pass a URI or --commands"));
    }

    let engines = default_engine_factory()
        .ok_or_else(|| anyhow!("built without a decode engine; rebuild with --features ffmpeg"))?;

    info!("{} {}", app_name(), version());
    let (handle, mut events, worker) =
        PlayerWorker::spawn(config, default_source_factory(), engines);

    let interrupt = handle.clone();
    ctrlc::set_handler(move || {
        interrupt.close();
    })
    .context("Error setting Ctrl-C handler")?;

    if let Some(uri) = uri {
        handle.start(uri, matches.get_flag("paused"), fade_options(&matches));
    }
    if commands {
        tokio::spawn(read_commands(handle.clone()));
    }
    drop(handle);

    let mut failure = None;
    while let Some(event) = events.recv().await {
        println!("{}", event.to_json());
        if let WorkerEvent::Error(e) = event {
            failure = Some(e);
        }
        // frames are released as each event goes out of scope
    }
    worker.await?;

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
