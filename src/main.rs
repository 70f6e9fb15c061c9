use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use twenty_percent::config::{select_device, GenerateConfig, TrainConfig, VISIBLE_DEVICES_ENV};
use twenty_percent::crawler::{load_dataset, CodeAnalyzer};
use twenty_percent::data::{default_texts, load_texts, TextDataset};
use twenty_percent::generate::generate;
use twenty_percent::github::{clone_repos, write_repo_list, RepoLister, GITHUB_API};
use twenty_percent::hub::Pretrained;
use twenty_percent::ollama::{complete_pairs, OllamaClient, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use twenty_percent::qa::{generate_qa_pairs, read_jsonl, write_jsonl};
use twenty_percent::train::Trainer;

#[derive(Parser)]
#[command(
    name = "twenty-percent",
    version,
    about = "Fine-tune a small pretrained causal language model on the CPU"
)]
struct Cli {
    /// Allow an accelerator to be used when one is available.
    #[arg(long, global = true)]
    allow_accelerator: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fine-tune a pretrained model, sample from it and save the result.
    Train(TrainArgs),
    /// Sample text from a saved checkpoint or a hub model.
    Generate(GenerateArgs),
    /// Extract the Python functions of a repository into a JSON dataset.
    Crawl(CrawlArgs),
    /// Turn a code dataset into question/answer pairs (JSONL).
    Qa(QaArgs),
    /// Fill placeholder answers of a QA file with an Ollama model.
    Complete(CompleteArgs),
    /// List the Python repositories of a GitHub owner and optionally clone them.
    Repos(ReposArgs),
}

#[derive(Args)]
struct SamplingArgs {
    /// Prompt to continue.
    #[arg(long, default_value = "The quick brown")]
    prompt: String,

    #[arg(long, default_value_t = 20)]
    max_new_tokens: usize,

    /// 0 selects greedy decoding.
    #[arg(long, default_value_t = 0.8)]
    temperature: f64,

    /// Nucleus sampling threshold; 0 or 1 disables it.
    #[arg(long, default_value_t = 0.95)]
    top_p: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

impl From<SamplingArgs> for GenerateConfig {
    fn from(a: SamplingArgs) -> Self {
        GenerateConfig {
            prompt: a.prompt,
            max_new_tokens: a.max_new_tokens,
            temperature: a.temperature,
            top_p: (a.top_p > 0. && a.top_p < 1.).then_some(a.top_p),
            seed: a.seed,
        }
    }
}

#[derive(Args)]
struct TrainArgs {
    /// JSON file with training settings; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hub model id or local checkpoint directory.
    #[arg(long)]
    model: Option<String>,

    /// Training texts (.txt, .txt.gz or .jsonl). Defaults to the built-in sentences.
    #[arg(long)]
    data: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    max_length: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[command(flatten)]
    sampling: SamplingArgs,
}

impl TrainArgs {
    fn apply(&self, cfg: &mut TrainConfig) {
        if let Some(model) = &self.model {
            cfg.model_name = model.clone();
        }
        if let Some(epochs) = self.epochs {
            cfg.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            cfg.batch_size = batch_size;
        }
        if let Some(max_length) = self.max_length {
            cfg.max_length = max_length;
        }
        if let Some(lr) = self.learning_rate {
            cfg.learning_rate = lr;
        }
        if let Some(dir) = &self.output_dir {
            cfg.output_dir = dir.clone();
        }
    }
}

#[derive(Args)]
struct GenerateArgs {
    /// Hub model id or local checkpoint directory.
    #[arg(long, default_value = "./fine_tuned_model")]
    model: String,

    #[command(flatten)]
    sampling: SamplingArgs,
}

#[derive(Args)]
struct CrawlArgs {
    /// Repository to analyze.
    repo_path: PathBuf,

    /// Name recorded in the dataset; defaults to the directory name.
    #[arg(long)]
    repo_name: Option<String>,

    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Args)]
struct QaArgs {
    /// Code dataset written by `crawl`.
    input: PathBuf,

    #[arg(long, default_value = "qa_data.jsonl")]
    output: PathBuf,
}

#[derive(Args)]
struct CompleteArgs {
    /// QA pairs written by `qa`.
    input: PathBuf,

    #[arg(long, default_value = "qa_data_with_answers.jsonl")]
    output: PathBuf,

    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Seconds to wait for each answer.
    #[arg(long, default_value_t = 300)]
    timeout: u64,
}

#[derive(Args)]
struct ReposArgs {
    #[arg(long, default_value = "ONSdigital")]
    owner: String,

    #[arg(long, default_value_t = 10)]
    max_repos: usize,

    #[arg(long, default_value = "ons_repos.txt")]
    output: PathBuf,

    /// Clone the repositories found into this directory.
    #[arg(long)]
    clone_dir: Option<PathBuf>,

    #[arg(long, default_value = GITHUB_API)]
    api_base: String,

    /// Milliseconds to wait between API pages.
    #[arg(long, default_value_t = 1300)]
    delay_ms: u64,
}

fn run_train(args: TrainArgs, use_cpu: bool) -> anyhow::Result<()> {
    let mut cfg = match &args.config {
        Some(path) => TrainConfig::from_json_file(path)?,
        None => TrainConfig::default(),
    };
    args.apply(&mut cfg);
    cfg.use_cpu = cfg.use_cpu && use_cpu;
    cfg.validate()?;

    let device = select_device(cfg.use_cpu)?;
    let texts = match &args.data {
        Some(path) => load_texts(path)?,
        None => default_texts(),
    };
    let dataset = TextDataset::new(texts);
    let pretrained = Pretrained::load(&cfg.model_name, &device)?;
    let examples = dataset.tokenize(&pretrained.tokenizer, cfg.max_length)?;
    info!(examples = examples.len(), max_length = cfg.max_length, "dataset tokenized");

    let output_dir = cfg.output_dir.clone();
    let mut trainer = Trainer::new(&pretrained.model, &pretrained.varmap, cfg, device.clone())?;
    let report = trainer.train(&examples)?;
    info!(steps = report.steps, final_loss = ?report.final_loss(), "training finished");

    let gen_cfg = GenerateConfig::from(args.sampling);
    let text = generate(&pretrained.model, &pretrained.tokenizer, &device, &gen_cfg)?;
    println!("{text}");

    pretrained.save(&output_dir)
}

fn run_generate(args: GenerateArgs, use_cpu: bool) -> anyhow::Result<()> {
    let device = select_device(use_cpu)?;
    let pretrained = Pretrained::load(&args.model, &device)?;
    let cfg = GenerateConfig::from(args.sampling);
    let text = generate(&pretrained.model, &pretrained.tokenizer, &device, &cfg)?;
    println!("{text}");
    Ok(())
}

fn run_crawl(args: CrawlArgs) -> anyhow::Result<()> {
    let repo_name = match args.repo_name {
        Some(name) => name,
        None => args
            .repo_path
            .canonicalize()
            .with_context(|| format!("resolving {}", args.repo_path.display()))?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("cannot derive a repository name; pass --repo-name")?,
    };
    let mut analyzer = CodeAnalyzer::new(&args.repo_path, repo_name)?;
    analyzer.analyze_repo()?;
    let path = analyzer.save_dataset(&args.output_dir)?;
    println!("Dataset saved to {}", path.display());
    Ok(())
}

fn run_qa(args: QaArgs) -> anyhow::Result<()> {
    let records = load_dataset(&args.input)?;
    let pairs = generate_qa_pairs(&records)?;
    let pending = pairs.iter().filter(|p| p.needs_completion()).count();
    write_jsonl(&args.output, &pairs)?;
    println!(
        "{} QA pairs written to {} ({pending} need an LLM answer)",
        pairs.len(),
        args.output.display()
    );
    Ok(())
}

fn run_complete(args: CompleteArgs) -> anyhow::Result<()> {
    let pairs = read_jsonl(&args.input)?;
    let client = OllamaClient::new(&args.endpoint, &args.model, Duration::from_secs(args.timeout))?;
    let (pairs, stats) = complete_pairs(&client, pairs);
    write_jsonl(&args.output, &pairs)?;
    println!(
        "{} answers filled, {} questions skipped; saved to {}",
        stats.completed,
        stats.skipped,
        args.output.display()
    );
    Ok(())
}

fn run_repos(args: ReposArgs) -> anyhow::Result<()> {
    let lister = RepoLister::new(&args.api_base, 10, Duration::from_millis(args.delay_ms))?;
    let repos = lister.python_repos(&args.owner, args.max_repos)?;
    write_repo_list(&args.output, &repos)?;
    println!("{} Python repositories written to {}", repos.len(), args.output.display());
    if let Some(dir) = &args.clone_dir {
        let cloned = clone_repos(&repos, dir)?;
        println!("{cloned} repositories cloned into {}", dir.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if !cli.allow_accelerator {
        // hide accelerators before any device gets created
        std::env::set_var(VISIBLE_DEVICES_ENV, "");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("twenty_percent=info")),
        )
        .init();

    let use_cpu = !cli.allow_accelerator;
    match cli.command {
        Command::Train(args) => run_train(args, use_cpu),
        Command::Generate(args) => run_generate(args, use_cpu),
        Command::Crawl(args) => run_crawl(args),
        Command::Qa(args) => run_qa(args),
        Command::Complete(args) => run_complete(args),
        Command::Repos(args) => run_repos(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampling(args: &[&str]) -> GenerateConfig {
        let argv: Vec<&str> = ["twenty-percent", "generate"]
            .into_iter()
            .chain(args.iter().copied())
            .collect();
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Generate(args) => GenerateConfig::from(args.sampling),
            _ => unreachable!(),
        }
    }

    #[test]
    fn top_p_defaults_to_nucleus_sampling() {
        assert_eq!(sampling(&[]).top_p, Some(0.95));
        assert_eq!(sampling(&["--top-p", "0.5"]).top_p, Some(0.5));
    }

    #[test]
    fn top_p_zero_or_one_disables_it() {
        assert_eq!(sampling(&["--top-p", "0"]).top_p, None);
        assert_eq!(sampling(&["--top-p", "1"]).top_p, None);
    }
}
