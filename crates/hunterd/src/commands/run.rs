//! Module for running the pipeline once

use chrono::{NaiveDate, Utc};
use hunter::pipeline::{Pipeline, RunReport};

use super::*;

/// Options for [`Commands::Run`]. Every flag overrides the matching configuration value.
#[derive(Args, Clone, Default)]
pub struct RunOptions {
  /// Keyword phrases to search for
  #[arg(long, num_args = 1..)]
  pub keywords: Vec<String>,

  /// arXiv subject categories to include (e.g. cs.IR cs.LG)
  #[arg(long, num_args = 1..)]
  pub categories: Vec<String>,

  /// Search across all categories
  #[arg(long, conflicts_with = "categories")]
  pub no_category_filter: bool,

  /// Number of trailing days to look back, today included
  #[arg(long)]
  pub last_n_days: Option<u32>,

  /// Maximum number of papers to fetch
  #[arg(long)]
  pub max_results: Option<usize>,

  /// Drop papers whose title and abstract mention none of the keywords
  #[arg(long)]
  pub require_keyword_match: bool,

  /// Accept every harvested paper without company filtering
  #[arg(long)]
  pub skip_gatekeeper: bool,

  /// Ask the LLM when affiliations and e-mail domains are inconclusive
  #[arg(long)]
  pub use_llm_filter: bool,

  /// Maximum number of LLM admission votes in this run
  #[arg(long)]
  pub llm_call_limit: Option<usize>,

  /// Stop after this many archived papers
  #[arg(long)]
  pub limit: Option<usize>,

  /// Skip LLM summaries (PDFs are still downloaded)
  #[arg(long)]
  pub no_summary: bool,

  /// Translate each archived abstract and print it
  #[arg(long)]
  pub translate_abstracts: bool,

  /// Push translations to Telegram (implies --translate-abstracts)
  #[arg(long)]
  pub telegram: bool,

  /// Do not follow pushed translations with the paper's first-page picture
  #[arg(long)]
  pub no_cover_image: bool,

  /// Directory that receives the day directories
  #[arg(long)]
  pub output_dir: Option<PathBuf>,

  /// Day the search window ends on, defaults to the current UTC date
  #[arg(long, hide = true)]
  pub today: Option<NaiveDate>,
}

impl RunOptions {
  /// Applies the flags on top of a loaded configuration.
  pub fn apply(&self, config: &mut Config) {
    if !self.keywords.is_empty() {
      config.search.keywords = self.keywords.clone();
    }
    if self.no_category_filter {
      config.search.categories.clear();
    } else if !self.categories.is_empty() {
      config.search.categories = self.categories.clone();
    }
    if let Some(days) = self.last_n_days {
      config.search.last_n_days = days;
    }
    if let Some(max) = self.max_results {
      config.search.max_results = max;
    }
    config.search.require_keyword_match |= self.require_keyword_match;

    config.gatekeeper.skip |= self.skip_gatekeeper;
    config.gatekeeper.use_llm_filter |= self.use_llm_filter;
    if self.llm_call_limit.is_some() {
      config.gatekeeper.llm_call_limit = self.llm_call_limit;
    }

    if let Some(dir) = &self.output_dir {
      config.archivist.base_dir = dir.clone();
    }

    if self.limit.is_some() {
      config.run.limit = self.limit;
    }
    if self.no_summary {
      config.run.summarize = false;
    }
    config.run.telegram |= self.telegram;
    if self.no_cover_image {
      config.run.cover_image = false;
    }
    config.run.translate_abstracts |= self.translate_abstracts || config.run.telegram;
  }
}

/// Function for the [`Commands::Run`] in the CLI.
pub async fn run(cli: &Cli, options: &RunOptions) -> Result<()> {
  let mut config = Config::load_or_default(cli.config_path())?;
  options.apply(&mut config);
  let config = config.with_environment();
  config.validate()?;

  let today = options.today.unwrap_or_else(|| Utc::now().date_naive());
  println!(
    "{} Searching arXiv for {} over the last {} day(s)",
    style(INFO_PREFIX).cyan(),
    config.search.keywords.join(", "),
    config.search.last_n_days
  );

  let mut pipeline = Pipeline::from_config(&config, today)?;
  let report = pipeline.run().await?;
  print_report(&report);
  Ok(())
}

/// Prints translations, archived files and skipped records.
fn print_report(report: &RunReport) {
  for message in &report.messages {
    println!("\n=== Abstract Translation ===\n{message}\n============================");
  }

  println!(
    "\n{} Archived {} of {} admitted papers ({} candidates)",
    style(SUCCESS_PREFIX).green(),
    style(report.archived.len()).bold(),
    report.admitted(),
    report.candidates
  );
  for (i, artifact) in report.archived.iter().enumerate() {
    let prefix = if i + 1 == report.archived.len() { TREE_LEAF } else { TREE_BRANCH };
    let company = artifact.company.as_deref().unwrap_or("Unknown");
    println!(
      "   {} {} [{}, {}]",
      style(prefix).dim(),
      artifact.path.display(),
      style(company).cyan(),
      artifact.layer
    );
  }

  for skip in &report.skipped {
    println!(
      "{} {} skipped during {:?}: {}",
      style(WARNING_PREFIX).yellow(),
      skip.paper_id,
      skip.stage,
      skip.reason
    );
  }
}
