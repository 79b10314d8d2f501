//! Module for writing a starting [`Config`] file

use dialoguer::Confirm;

use super::*;

/// Options for [`Commands::Init`].
#[derive(Args, Clone)]
pub struct InitOptions {
  /// Directory that will hold the downloaded papers
  #[arg(long)]
  pub output_dir: Option<PathBuf>,
}

/// Function for the [`Commands::Init`] in the CLI.
pub fn init(cli: &Cli, options: &InitOptions) -> Result<()> {
  let path = cli.config_path();

  if path.exists()
    && !cli.accept_defaults
    && !Confirm::new()
      .with_prompt(format!("A configuration already exists at {}. Overwrite it?", path.display()))
      .default(false)
      .interact()?
  {
    println!("{} Keeping the existing configuration", style(INFO_PREFIX).cyan());
    return Ok(());
  }

  let mut config = Config::default();
  if let Some(dir) = &options.output_dir {
    config.archivist.base_dir = dir.clone();
  }
  config.save(&path)?;

  println!("{} Wrote default configuration to {}", style(SUCCESS_PREFIX).green(), path.display());
  println!(
    "{} Set {} before running with summaries, translations or the LLM filter",
    style(INFO_PREFIX).cyan(),
    style(&config.analyst.api_key_env).bold()
  );
  Ok(())
}
