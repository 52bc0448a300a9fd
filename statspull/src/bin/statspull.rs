use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use netstats::Recorder;
use statspull::{
    clock::{Clock, RealClock},
    config::{self, Config, Telemetry},
    netdev::{self, Interfaces},
    output,
    puller::{PullResult, Puller},
};
use tokio::{
    runtime::Builder,
    signal,
    time::{self, Duration, Instant, sleep},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load statspull config: {0}")]
    Config(#[from] config::Error),
    #[error("Failed to write pulled rows: {0}")]
    Output(#[from] output::Error),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

fn default_config_path() -> String {
    "/etc/statspull/statspull.yaml".to_string()
}

#[derive(Parser)]
#[command(version, about = "Pulls cumulative network statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample interface counters and pull atoms until stopped
    Run(RunArgs),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckArgs),
}

#[derive(Args)]
struct RunArgs {
    /// path on disk to the configuration file
    #[arg(long, default_value_t = default_config_path())]
    config_path: String,
    /// path on disk to write pulled rows to, stdout if unset
    #[arg(long)]
    output_path: Option<PathBuf>,
    /// path to the interface counters file
    #[arg(long, default_value = netdev::PROC_NET_DEV)]
    netdev_path: PathBuf,
    /// the time in seconds to run for, forever if unset
    #[arg(long)]
    duration_seconds: Option<u64>,
}

#[derive(Args)]
struct ConfigCheckArgs {
    /// path on disk to the configuration file
    #[arg(long, default_value_t = default_config_path())]
    config_path: String,
}

fn validate_config(config_path: &str) -> Result<Config, Error> {
    match Config::from_path(Path::new(config_path)) {
        Ok(config) => {
            info!("Configuration file is valid");
            Ok(config)
        }
        Err(e) => {
            error!("Configuration validation failed: {e}");
            Err(e.into())
        }
    }
}

async fn inner_main(args: RunArgs, config: Config) -> Result<(), Error> {
    if let Some(Telemetry::Prometheus {
        addr,
        global_labels,
    }) = config.telemetry
    {
        let mut builder = PrometheusBuilder::new().with_http_listener(addr);
        for (k, v) in global_labels {
            builder = builder.add_global_label(k, v);
        }
        builder.install()?;
        info!("prometheus exporter listening on {addr}");
    }

    let out: Box<dyn Write + Send> = match &args.output_path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout()),
    };
    let run_id = Uuid::new_v4();
    let mut writer = output::Writer::new(run_id, out);
    info!(%run_id, atoms = config.atoms.len(), "statspull running");

    let clock = RealClock::default();
    let interfaces = Interfaces::new(config.interfaces);
    let recorder = Recorder::new(
        config.bucket_duration_milliseconds,
        config.retention_milliseconds,
    );
    let mut puller = Puller::new(
        recorder,
        config.bucket_duration_milliseconds,
        clock.now_millis(),
    );

    let mut sample_delay =
        time::interval(Duration::from_millis(config.sample_period_milliseconds.get()));
    let pull_period = Duration::from_millis(config.pull_period_milliseconds.get());
    let mut pull_delay = time::interval_at(Instant::now() + pull_period, pull_period);

    let run_duration = args
        .duration_seconds
        .map_or(Duration::MAX, Duration::from_secs);
    let deadline = sleep(run_duration);
    tokio::pin!(deadline);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = sample_delay.tick() => {
                let now = clock.now_millis();
                match netdev::poll(&args.netdev_path, &interfaces).await {
                    Ok(snapshot) => {
                        if let Err(err) = puller.sample(now, &snapshot) {
                            warn!("Failed to record interface counters: {err}");
                        }
                    }
                    Err(err) => warn!("Failed to sample interface counters: {err}"),
                }
            }
            _ = pull_delay.tick() => {
                let now = clock.now_millis();
                for atom in &config.atoms {
                    match puller.pull(*atom, now) {
                        PullResult::Success(rows) => {
                            for row in &rows {
                                writer.write_row(now, row)?;
                            }
                        }
                        PullResult::Skip => debug!(atom = atom.name(), "pull skipped"),
                    }
                }
                writer.flush()?;
            }
            res = &mut shutdown => {
                res?;
                info!("shutdown signal received");
                break;
            }
            () = &mut deadline => {
                info!("run duration elapsed");
                break;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(io::stderr)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting statspull {version} run.");

    let args = match Cli::parse().command {
        Commands::Run(args) => args,
        Commands::ConfigCheck(args) => match validate_config(&args.config_path) {
            Ok(_) => std::process::exit(0),
            Err(_) => std::process::exit(1),
        },
    };
    let config = validate_config(&args.config_path)?;

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(args, config));
    info!("Bye. :)");
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_and_config_check() {
        let cli = Cli::try_parse_from([
            "statspull",
            "run",
            "--config-path",
            "/tmp/statspull.yaml",
            "--duration-seconds",
            "5",
        ])
        .expect("valid arguments");
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config_path, "/tmp/statspull.yaml");
        assert_eq!(args.duration_seconds, Some(5));
        assert_eq!(args.netdev_path, PathBuf::from(netdev::PROC_NET_DEV));
        assert!(args.output_path.is_none());

        let cli = Cli::try_parse_from(["statspull", "config-check"]).expect("valid arguments");
        assert!(matches!(cli.command, Commands::ConfigCheck(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn inner_main_writes_rows() {
        let tmp_dir = tempfile::tempdir().expect("directory could not be created");
        let netdev_path = tmp_dir.path().join("dev");
        let output_path = tmp_dir.path().join("rows.jsonl");
        std::fs::write(
            &netdev_path,
            "h1\nh2\n wlan0: 100 1 0 0 0 0 0 0 100 1 0 0 0 0 0 0\n",
        )
        .expect("write netdev");

        let config = Config::from_yaml(
            "sample_period_milliseconds: 100\npull_period_milliseconds: 200\natoms: [wifi_bytes_transfer]\n",
        )
        .expect("valid config");
        let args = RunArgs {
            config_path: String::new(),
            output_path: Some(output_path.clone()),
            netdev_path: netdev_path.clone(),
            duration_seconds: Some(1),
        };
        // traffic appears after the baseline reading
        let bump = tokio::spawn(async move {
            sleep(Duration::from_millis(250)).await;
            std::fs::write(
                &netdev_path,
                "h1\nh2\n wlan0: 600 6 0 0 0 0 0 0 300 3 0 0 0 0 0 0\n",
            )
            .expect("rewrite netdev");
        });
        inner_main(args, config).await.expect("run succeeds");
        bump.await.expect("bump task");

        let output = std::fs::read_to_string(output_path).expect("output written");
        assert!(!output.is_empty(), "pulls should have produced rows");
        for line in output.lines() {
            let parsed: serde_json::Value = serde_json::from_str(line).expect("valid json");
            assert_eq!(parsed["atom"], "wifi_bytes_transfer");
        }
        let last: serde_json::Value =
            serde_json::from_str(output.lines().last().expect("a line")).expect("valid json");
        assert_eq!(last["rx_bytes"], 500);
    }
}
