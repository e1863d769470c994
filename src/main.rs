use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use authsync::config::{load_config, print_schema};
use authsync::startup::run;
use authsync::utils::logger::init_logging;

#[derive(Parser, Debug)]
#[command(name = "authsync", version, about = "Cross-context auth state synchronisation")]
struct Cli {
    /// YAML configuration file.
    #[arg(long, env = "AUTHSYNC_CONFIG", default_value = "./config.yaml")]
    config: PathBuf,

    /// Print the configuration JSON schema and exit.
    #[arg(long)]
    schema: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.schema {
        print_schema();
        return ExitCode::SUCCESS;
    }

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(Arc::new(config)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_and_flags() {
        let cli = Cli::try_parse_from(["authsync"]).unwrap();
        assert!(!cli.schema);

        let cli = Cli::try_parse_from(["authsync", "--config", "/etc/authsync.yaml", "--schema"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/authsync.yaml"));
        assert!(cli.schema);

        assert!(Cli::try_parse_from(["authsync", "--bogus"]).is_err());
    }
}
