use clap::Parser;
use reactord::Config;

fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = reactord::run(config) {
        tracing::error!(error = %err, "reactord exited");
        eprintln!("reactord: {err}");
        std::process::exit(1);
    }
}
