use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;
use runat::{Config, ConfigurationError};

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub(crate) struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))]
    pub(crate) listen: IpAddr,
    /// (TCP) port to listen on.
    #[arg(short, long, default_value_t = 11310)]
    pub(crate) port: u16,
    /// YAML file to read queue options from; flags below override it.
    #[arg(short, long)]
    pub(crate) config: Option<PathBuf>,
    /// Name of the queue served to every connection.
    #[arg(short, long)]
    pub(crate) queue_name: Option<String>,
    /// Milliseconds between two polls of a watching connection.
    #[arg(short = 'i', long)]
    pub(crate) poll_interval_ms: Option<u64>,
    /// Keeps the index in Redis instead of in process memory. Requires the
    /// `redis` feature.
    #[arg(short, long)]
    pub(crate) redis_url: Option<String>,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub(crate) debug: bool,
}

impl Args {
    /// Resolves the queue configuration: file (or defaults), then flags.
    pub(crate) fn queue_config(&self) -> Result<Config, ConfigurationError> {
        let mut config = match &self.config {
            Some(path) => Config::from_path(path)?,
            None => Config::default(),
        };

        if let Some(queue_name) = &self.queue_name {
            config.queue_name = queue_name.clone();
        }
        if let Some(poll_interval_ms) = self.poll_interval_ms {
            config.poll_interval_ms = poll_interval_ms;
        }

        config.validate()?;
        Ok(config)
    }
}
