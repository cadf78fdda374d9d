use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run the test suite
    Test,
    /// Run the simulator, optionally on a script
    Sim {
        /// Command script passed to the simulator
        script: Option<String>,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{what} failed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building workspace...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Test")?;
        }
        Commands::Sim { script } => {
            println!("Running simulator...");
            let mut args = vec!["run", "-p", "fbgadget-cli", "--"];
            if let Some(script) = script {
                args.extend(["--script", script.as_str()]);
            }
            cargo(&args, "Simulator")?;
        }
    }

    Ok(())
}
