mod cli;
mod scan;

use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // RUST_LOG wins; --verbose only widens the fallback filter.
    let default_level = if args.iter().any(|arg| arg == "--verbose") {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    if cli::handle_commands(&args)? {
        return Ok(());
    }

    eprintln!("{}", cli::USAGE);
    std::process::exit(2);
}
