use std::error::Error;
use std::io;

use tracing_subscriber::EnvFilter;

use smallsh::config::Config;
use smallsh::input;
use smallsh::shell::Shell;
use smallsh::sig::install_handlers;

fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .init();

    install_handlers()?;

    let mut reader = input::open_stdin()?;
    let mut shell = Shell::new(config, io::stdout());
    shell.run(reader.as_mut())?;

    Ok(())
}
