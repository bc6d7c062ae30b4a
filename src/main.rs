extern crate chrono;
extern crate log;
extern crate log4rs;
extern crate clap;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::exit;

use chrono::Utc;
use clap::{App, ArgMatches};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod generator;
mod record;
mod restamp;
mod sender;
mod storage;
mod stream;
mod transport;

use generator::{GenerationStrategy, GeneratorError};
use sender::SendMode;
use transport::HttpTransport;

static DEFAULT_CONFIG_PATH: &'static str = "resources/hrseed.yml";
static DEFAULT_LOG_CONFIG_PATH: &'static str = "resources/log.yml";

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Configuration {
    #[serde(default)]
    generator: generator::GeneratorParameters,
    #[serde(default)]
    sender: sender::SenderParameters,
    #[serde(default)]
    stream: stream::StreamParameters,
}

#[derive(Error, Debug)]
enum ConfigError {
    #[error("cannot read the configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot deserialize the configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] GeneratorError),
}

impl Configuration {
    fn validate(&self) -> Result<(), GeneratorError> {
        self.generator.validate()?;
        self.stream.walk.validate()?;
        Ok(())
    }
}

fn parse_configuration(configuration_string: &str) -> Result<Configuration, ConfigError> {
    let configuration = serde_yaml::from_str::<Configuration>(configuration_string)?;
    configuration.validate()?;
    Ok(configuration)
}

fn load_configuration(path: &Path) -> Result<Configuration, ConfigError> {
    let mut configuration_file = File::open(path)?;
    let mut configuration_string = String::new();
    configuration_file.read_to_string(&mut configuration_string)?;
    parse_configuration(configuration_string.as_str())
}

fn run_generate(configuration: &Configuration, strategy: GenerationStrategy) -> i32 {
    let mut rng = rand::thread_rng();
    match generator::generate_files(&configuration.generator, &strategy, &mut rng, Utc::now()) {
        Ok(paths) => {
            for path in paths {
                log::info!(target: "hrseed", "Wrote \'{}\'", path.display());
            }
            0
        }
        Err(err) => {
            log::error!(target: "hrseed", "Cannot generate heart rate data: \'{}\'", err);
            201
        }
    }
}

fn run_send(configuration: &Configuration, mode: SendMode, matches: &ArgMatches) -> i32 {
    let mut params = configuration.sender.clone();
    if matches.is_present("restamp") {
        params.restamp = true;
    }
    if let Some(endpoint) = matches.value_of("endpoint") {
        params.endpoint = endpoint.to_string();
    }

    let transport = match HttpTransport::new(&params.transport) {
        Ok(transport) => transport,
        Err(err) => {
            log::error!(target: "hrseed", "Cannot create the http transport: \'{}\'", err);
            return 202;
        }
    };

    let reports = sender::send_users(&transport, &params, mode, Utc::now());
    for report in &reports {
        if report.is_success() {
            log::info!(target: "hrseed", "{}", report.summary());
        } else {
            log::warn!(target: "hrseed", "{}", report.summary());
        }
    }
    let succeeded = reports.iter().filter(|report| report.is_success()).count();
    log::info!(target: "hrseed", "Sent data for {}/{} users without failures", succeeded, reports.len());
    0
}

fn run_stream(configuration: &Configuration, matches: &ArgMatches) -> i32 {
    let mut params = configuration.stream.clone();
    if let Some(endpoint) = matches.value_of("endpoint") {
        params.endpoint = endpoint.to_string();
    }

    let transport = match HttpTransport::new(&params.transport) {
        Ok(transport) => transport,
        Err(err) => {
            log::error!(target: "hrseed", "Cannot create the http transport: \'{}\'", err);
            return 202;
        }
    };

    let mut rng = rand::thread_rng();
    match stream::run_stream(&transport, &params, &mut rng, Utc::now()) {
        Ok(_) => 0,
        Err(err) => {
            log::error!(target: "hrseed", "Stream terminated: \'{}\'", err);
            301
        }
    }
}

fn main() {
    let cli_yaml = clap::load_yaml!("cli.yml");
    let matches = App::from(cli_yaml).get_matches();

    let log_config_path = matches.value_of("log-config").unwrap_or(DEFAULT_LOG_CONFIG_PATH);
    match log4rs::init_file(log_config_path, Default::default()) {
        Ok(_) => {},
        Err(err) => {
            eprintln!("Could not create logger from yaml configuration: {}", err);
            exit(-100);
        }
    };

    let config_path = matches.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH);
    let configuration = match load_configuration(Path::new(config_path)) {
        Ok(configuration) => configuration,
        Err(err) => {
            log::error!(target: "hrseed", "Cannot load the configuration \'{}\': \'{}\'", config_path, err);
            exit(101);
        }
    };

    let exit_code = match matches.subcommand() {
        ("zones", Some(_)) => match &configuration.generator.zones {
            Some(zones) => run_generate(&configuration, GenerationStrategy::ZoneWeighted(zones.clone())),
            None => {
                log::error!(target: "hrseed", "The configuration \'{}\' has no generator.zones section", config_path);
                101
            }
        },
        ("walk", Some(_)) => run_generate(&configuration, GenerationStrategy::RandomWalk(configuration.generator.walk.clone())),
        ("send", Some(sub_matches)) => run_send(&configuration, SendMode::PerRecord, sub_matches),
        ("send-batch", Some(sub_matches)) => run_send(&configuration, SendMode::Batch, sub_matches),
        ("stream", Some(sub_matches)) => run_stream(&configuration, sub_matches),
        _ => {
            log::error!(target: "hrseed", "No subcommand given, see --help");
            2
        }
    };

    log::info!(target: "hrseed", "Exiting");
    exit(exit_code);
}
