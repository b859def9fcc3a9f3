//! weather-lookup - cached weather lookups for humans and tool-calling agents
//!
//! `serve` answers JSON tool requests on stdin; the other subcommands run one
//! lookup and print its JSON response.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{self, BufReader};
use tracing::{error, info};

use weather_lookup::cli::{Cli, Command, Config};
use weather_lookup::service::WeatherService;
use weather_lookup::tools::{self, ToolRequest};
use weather_lookup::{logging, server};

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(ExitCode::from(2));
        }
    };

    logging::init(config.log_level, config.log_format)?;
    info!(
        ttl_secs = config.cache_ttl.as_secs(),
        strategy = ?config.strategy,
        "starting weather-lookup"
    );

    let service = Arc::new(WeatherService::from_config(&config)?);

    let request = match cli.command {
        Command::Serve => {
            server::serve(Arc::clone(&service), BufReader::new(io::stdin()), io::stdout()).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Current { location } => ToolRequest::CurrentWeather { location },
        Command::Forecast { location, days } => ToolRequest::Forecast { location, days },
        Command::AirQuality { location } => ToolRequest::AirQuality { location },
    };

    let response = tools::handle(&service, request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if response.ok {
        Ok(ExitCode::SUCCESS)
    } else {
        if let Some(message) = &response.error {
            error!(%message, "lookup failed");
        }
        Ok(ExitCode::FAILURE)
    }
}
