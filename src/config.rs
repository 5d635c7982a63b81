use crate::error::Error;
use crate::profiler::DEFAULT_FREQUENCY;
use clap::{crate_authors, crate_name, crate_version, App, Arg, ArgMatches};
use log::{debug, info, warn};
use serde_derive::Deserialize;
use std::env;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};

pub const DEFAULT_CONFIG: &str = "microservice.toml";
pub const DEFAULT_PORT: &str = "8080";

#[derive(Debug)]
pub struct Config {
    pub address: SocketAddr,
    pub frequency: i32,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    address: Option<SocketAddr>,
    frequency: Option<i32>,
}

impl Config {
    pub fn from_args() -> Result<Self, Error> {
        let matches = App::new(crate_name!())
            .version(crate_version!())
            .author(crate_authors!())
            .about("CPU load microservice with an on-demand profiler")
            .arg(Arg::with_name("config")
                 .short("c")
                 .long("config")
                 .value_name("FILE")
                 .help("Sets a custom config file")
                 .takes_value(true))
            .arg(Arg::with_name("address")
                 .short("a")
                 .long("address")
                 .value_name("ADDRESS")
                 .help("Sets an address")
                 .takes_value(true))
            .get_matches();
        let file = read_file_config(&matches)?;
        Config::resolve(
            matches.value_of("address"),
            env::var("ADDR").ok(),
            env::var("PORT").ok(),
            file,
        )
    }

    fn resolve(
        flag: Option<&str>,
        addr_var: Option<String>,
        port_var: Option<String>,
        file: FileConfig,
    ) -> Result<Self, Error> {
        // An empty variable counts as unset.
        let addr_var = addr_var.filter(|value| !value.is_empty());
        let port_var = port_var.filter(|value| !value.is_empty());
        let address = if let Some(flag) = flag {
            flag.parse::<SocketAddr>()
                .map_err(|err| Error::Config(format!("can't parse address {}: {}", flag, err)))?
        } else if addr_var.is_some() || port_var.is_some() {
            let port = port_var.unwrap_or_else(|| {
                info!("Defaulting to port {}", DEFAULT_PORT);
                DEFAULT_PORT.into()
            });
            bind_address(addr_var.as_deref().unwrap_or(""), &port)?
        } else if let Some(address) = file.address {
            address
        } else {
            info!("Defaulting to port {}", DEFAULT_PORT);
            bind_address("", DEFAULT_PORT)?
        };
        let frequency = file.frequency.unwrap_or(DEFAULT_FREQUENCY);
        if !(1..=1000).contains(&frequency) {
            return Err(Error::Config(format!(
                "sampling frequency {} is out of range 1..=1000",
                frequency
            )));
        }
        Ok(Config { address, frequency })
    }
}

/// Joins `addr` and `port` with a colon. An empty host listens on all
/// interfaces.
pub fn bind_address(addr: &str, port: &str) -> Result<SocketAddr, Error> {
    let port = port
        .parse::<u16>()
        .map_err(|err| Error::Config(format!("can't parse PORT {}: {}", port, err)))?;
    let host = addr.trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    debug!("Resolving {}:{}", host, port);
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Config(format!("{} doesn't resolve to an address", host)))
}

fn read_file_config(matches: &ArgMatches) -> Result<FileConfig, Error> {
    match matches.value_of("config") {
        Some(path) => parse_file(path),
        None => Ok(parse_file(DEFAULT_CONFIG)
            .map_err(|err| warn!("Can't read config file: {}", err))
            .unwrap_or_default()),
    }
}

fn parse_file(path: &str) -> Result<FileConfig, Error> {
    let buffer = fs::read_to_string(path)
        .map_err(|err| Error::Config(format!("can't read {}: {}", path, err)))?;
    toml::from_str(&buffer).map_err(|err| Error::Config(format!("can't parse {}: {}", path, err)))
}
