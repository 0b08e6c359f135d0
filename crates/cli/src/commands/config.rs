//! Suite configuration file commands

use std::path::PathBuf;

use clap::{Args, Subcommand};

use coa_common::{ProductTarget, SuiteConfig};

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a configuration file with default settings
    Init(InitArgs),

    /// Print the effective configuration
    Show(ShowArgs),

    /// Check a configuration file without running anything
    Validate(ShowArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Destination file
    #[arg(default_value = "coa.toml")]
    pub path: PathBuf,

    /// Products to include, comma separated
    #[arg(short, long = "product", value_delimiter = ',')]
    pub products: Vec<String>,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Configuration file
    #[arg(default_value = "coa.toml")]
    pub path: PathBuf,
}

pub fn execute(cmd: ConfigCommands, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Init(args) => init(args),
        ConfigCommands::Show(args) => {
            let mut config = SuiteConfig::load(&args.path)?;
            if config.credentials.password.is_some() {
                config.credentials.password = Some("********".to_string());
            }
            output::print_document(&config, format)
        }
        ConfigCommands::Validate(args) => {
            let config = SuiteConfig::load(&args.path)?;
            config.validate()?;
            output::print_success(&format!(
                "{} is valid ({} product(s))",
                args.path.display(),
                config.products.len()
            ));
            if let Err(e) = config.require_credentials() {
                output::print_warning(&format!("{}; supply it through the environment", e));
            }
            Ok(())
        }
    }
}

fn init(args: InitArgs) -> anyhow::Result<()> {
    if args.path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            args.path.display()
        );
    }

    let mut config = SuiteConfig::default();
    if !args.products.is_empty() {
        config.products = args.products.iter().map(ProductTarget::new).collect();
    }
    config.validate()?;
    config.save(&args.path)?;

    output::print_success(&format!("Wrote {}", args.path.display()));
    Ok(())
}
