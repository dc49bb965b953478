// Binary entry point for cogshell
// This is a thin wrapper that delegates to the library implementation

use anyhow::Result;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    match cogshell::shell::run().await {
        Ok(code) => Ok(code),
        Err(e) => {
            eprintln!("cogshell fatal error: {:#}", e);
            Err(e)
        }
    }
}
