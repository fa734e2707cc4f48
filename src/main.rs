use std::env::consts::{
    ARCH, DLL_EXTENSION, DLL_PREFIX, DLL_SUFFIX, EXE_EXTENSION, EXE_SUFFIX, FAMILY, OS,
};

use anyhow::Error;
use clap::Parser;
use tracing::trace;

use crate::program::Program;
use crate::scraper::{CliArgs, ConfigManager, init_logger};

mod program;
mod scraper;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = CliArgs::parse();
    let (config, origin) = ConfigManager::resolve(&args)?;

    // Held until exit so the file appender flushes
    let _guard = init_logger(&config)?;
    origin.log();
    log_system_information();

    let program = Program::new(config);
    program.run().await
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("DLL_EXTENSION:  \"{}\"", DLL_EXTENSION);
    trace!("DLL_PREFIX:     \"{}\"", DLL_PREFIX);
    trace!("DLL_SUFFIX:     \"{}\"", DLL_SUFFIX);
    trace!("EXE_EXTENSION:  \"{}\"", EXE_EXTENSION);
    trace!("EXE_SUFFIX:     \"{}\"", EXE_SUFFIX);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}
