use std::env;
use std::process;

use tracing_subscriber::EnvFilter;

use fs_uae_wrapper::cli;
use fs_uae_wrapper::config;
use fs_uae_wrapper::options;
use fs_uae_wrapper::strategy::Strategy;
use fs_uae_wrapper::WRAPPER_KEY;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("fs-uae-wrapper");
    let invocation = cli::parse_args(args.get(1..).unwrap_or(&[]));

    if invocation.help {
        println!("{}", cli::usage(program));
        return;
    }

    let conf_file = match invocation.config_file {
        Some(path) => path,
        None => {
            eprintln!("Error: configuration file not found");
            eprintln!("See `{program} --help` for usage");
            process::exit(1);
        }
    };

    let configuration = match config::load_options(&conf_file) {
        Ok(configuration) => configuration,
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(2);
        }
    };

    let strategy = match invocation
        .wrapper_options
        .get(WRAPPER_KEY)
        .or_else(|| configuration.get(WRAPPER_KEY))
    {
        None => Strategy::Plain,
        Some(name) => match Strategy::from_name(name) {
            Some(strategy) => strategy,
            None => {
                eprintln!("Error: unknown wrapper strategy `{name}`");
                process::exit(3);
            }
        },
    };

    let all_options = options::merge(
        &options::merge(&configuration, &invocation.wrapper_options),
        &invocation.emulator_options,
    );

    if let Err(err) = strategy.run(&conf_file, invocation.emulator_options, all_options) {
        eprintln!("Error: {err:#}");
        process::exit(4);
    }
}
