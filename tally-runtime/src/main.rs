// a counter invocation must always end in a structured response, not a crash
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

use {
    std::process::exit,
    tracing::{Level, info, error},
    tracing_subscriber::FmtSubscriber,
    clap::{Parser, Subcommand},
    tally_core::Trigger,
    tally_runtime::{
        config::ServerConfig,
        server::{TallyServer, build_service},
        metrics::Metrics,
    },
};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// serve the counter over http
    Serve {
        config_file: String,
    },
    /// perform a single invocation and print the response envelope
    Run {
        config_file: String,
    },
}

#[tokio::main]
async fn main() {
    FmtSubscriber::builder().with_max_level(Level::INFO).init();
    let args = Args::parse();

    match args.command {
        Command::Serve { config_file } => {
            let config = load_config(&config_file);
            let server = match TallyServer::new(config) {
                Ok(v) => v,
                Err(err) => {
                    error!("failed to init server: {err:?}");
                    exit(-1);
                }
            };
            server.serve().await;
        },
        Command::Run { config_file } => {
            let config = load_config(&config_file);
            let metrics = Metrics::new();
            let service = match build_service(&config, &metrics) {
                Ok(v) => v,
                Err(err) => {
                    error!("failed to init counter service: {err:?}");
                    exit(-1);
                }
            };

            let envelope = service.handle(&Trigger::empty());
            match serde_json::to_string(&envelope) {
                Ok(v) => println!("{v}"),
                Err(err) => {
                    error!("failed to encode envelope: {err:?}");
                    exit(-1);
                }
            }
        },
    }
}

fn load_config(config_file: &str) -> ServerConfig {
    let config_path = match std::env::current_dir() {
        Ok(v) => v.join(config_file),
        Err(err) => {
            error!("failed to resolve current directory: {err:?}");
            exit(-1);
        }
    };

    info!("loading config from {config_path:?}");
    match ServerConfig::load(config_path) {
        Ok(v) => v,
        Err(err) => {
            error!("failed to load config: {err:?}");
            exit(-1);
        }
    }
}
