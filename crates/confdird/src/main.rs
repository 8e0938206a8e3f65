//! confdird - entry point

use std::path::PathBuf;

use confdir::{ConfdirSettings, SettingsLoader, DEFAULT_ENV_PREFIX};
use tracing::{error, info};

use confdird::{telemetry_config, Daemon, DaemonResult};

/// Settings preset to start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Profile {
    Development,
    Production,
}

impl std::str::FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("Unknown profile: {other}")),
        }
    }
}

/// Command-line arguments.
#[derive(Debug, Default, PartialEq, Eq)]
struct Args {
    /// Preset applied before the settings file.
    profile: Option<Profile>,
    /// Path to the settings file.
    config: Option<PathBuf>,
    /// Extra configuration directories.
    dirs: Vec<PathBuf>,
}

enum Command {
    Run(Args),
    Help,
    Version,
}

impl Args {
    fn parse() -> Command {
        match Self::parse_from(std::env::args().skip(1)) {
            Ok(command) => command,
            Err(message) => {
                eprintln!("{message}");
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
        }
    }

    fn parse_from(args: impl IntoIterator<Item = String>) -> Result<Command, String> {
        let mut args = args.into_iter();
        let mut parsed = Self::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = args.next().ok_or("--config requires a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--profile" | "-p" => {
                    let name = args.next().ok_or("--profile requires a name")?;
                    parsed.profile = Some(name.parse()?);
                }
                "--dir" | "-d" => {
                    let path = args.next().ok_or("--dir requires a path")?;
                    parsed.dirs.push(PathBuf::from(path));
                }
                "--help" | "-h" => return Ok(Command::Help),
                "--version" | "-v" => return Ok(Command::Version),
                other => return Err(format!("Unknown argument: {other}")),
            }
        }

        Ok(Command::Run(parsed))
    }
}

fn print_help() {
    println!(
        r"confdird - keeps a configuration tree loaded and live

USAGE:
    confdird [OPTIONS]

OPTIONS:
    -p, --profile <NAME>   Start from the development or production preset
    -c, --config <PATH>    Settings file (TOML or JSON), replaces the preset
    -d, --dir <PATH>       Configuration directory, may be repeated
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    CONFDIR_PROPDIR                     Configuration directories when none are configured
    CONFDIR__DIRECTORIES                Configuration directories, PATH-style list
    CONFDIR__WATCH__ENABLED             Reload on file changes (default: true)
    CONFDIR__WATCH__DEBOUNCE_MS         File event debounce (default: 500)
    CONFDIR__PROVIDER__CAPABILITY_PREFIX
    CONFDIR__LOGGING__LEVEL             Log filter (default: info)
    CONFDIR__LOGGING__FORMAT            json or pretty (default: json)
    CONFDIR__METRICS__ENABLED           Export Prometheus metrics (default: false)
    CONFDIR__METRICS__ADDR              Metrics address (default: 127.0.0.1:9464)

SIGNALS:
    SIGHUP     Reload the configuration
    SIGINT     Shut down
"
    );
}

fn load_settings(args: Args) -> DaemonResult<ConfdirSettings> {
    let mut loader = match args.profile {
        Some(Profile::Development) => SettingsLoader::new().with_development(),
        Some(Profile::Production) => SettingsLoader::new().with_production(),
        None => SettingsLoader::new(),
    };
    if let Some(path) = &args.config {
        loader = loader.with_file(path)?;
    }
    let loader = args
        .dirs
        .into_iter()
        .fold(loader.with_dotenv().with_env_prefix(DEFAULT_ENV_PREFIX), |loader, dir| {
            loader.with_directory(dir)
        });
    Ok(loader.load()?)
}

async fn run(args: Args) -> DaemonResult<()> {
    let settings = load_settings(args)?;
    confdir_telemetry::init_telemetry(&telemetry_config(&settings))?;
    info!(
        version = confdird::VERSION,
        directories = ?settings.directories,
        "Starting confdird"
    );

    Daemon::new(settings)?.run().await
}

#[tokio::main]
async fn main() {
    let args = match Args::parse() {
        Command::Run(args) => args,
        Command::Help => {
            print_help();
            return;
        }
        Command::Version => {
            println!("confdird {}", confdird::VERSION);
            return;
        }
    };

    if let Err(e) = run(args).await {
        // Logging may not be initialized yet.
        eprintln!("confdird: {e}");
        error!(error = %e, "confdird failed");
        std::process::exit(e.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, String> {
        Args::parse_from(args.iter().map(ToString::to_string))
    }

    #[test]
    fn test_parse_run() {
        match parse(&["-c", "/etc/confdird.toml", "--dir", "/a", "-d", "/b"]) {
            Ok(Command::Run(args)) => {
                assert_eq!(args.config, Some(PathBuf::from("/etc/confdird.toml")));
                assert_eq!(args.dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_profile() {
        match parse(&["--profile", "development"]) {
            Ok(Command::Run(args)) => assert_eq!(args.profile, Some(Profile::Development)),
            _ => panic!("expected run command"),
        }
        match parse(&["-p", "prod"]) {
            Ok(Command::Run(args)) => assert_eq!(args.profile, Some(Profile::Production)),
            _ => panic!("expected run command"),
        }
        assert!(parse(&["--profile", "staging"]).is_err());
        assert!(parse(&["--profile"]).is_err());
    }

    #[test]
    fn test_profile_sets_settings_preset() {
        let dir = tempfile::TempDir::new().unwrap();
        let args = Args {
            profile: Some(Profile::Development),
            dirs: vec![dir.path().to_path_buf()],
            ..Args::default()
        };

        let settings = load_settings(args).unwrap();
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, confdir::LogFormat::Pretty);
        assert_eq!(settings.directories, vec![dir.path().to_path_buf()]);
    }

    #[test]
    fn test_parse_help_and_version() {
        assert!(matches!(parse(&["--help"]), Ok(Command::Help)));
        assert!(matches!(parse(&["-v"]), Ok(Command::Version)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }
}
