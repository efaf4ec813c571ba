use clap::Parser;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "alertbot", about = "Trading-signal webhook router and bot engine")]
pub struct Arguments {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    pub config: String,

    /// Override the configured webserver port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Enable debug logging for a module (repeatable), e.g. --debug alerts.
    #[arg(long = "debug", value_name = "MODULE")]
    pub debug: Vec<String>,

    /// Enable debug logging for every module.
    #[arg(long)]
    pub verbose: bool,
}

pub fn parse() -> Arguments {
    Arguments::parse()
}
