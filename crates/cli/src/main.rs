use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use switchboard_core::{ClassificationResult, Intent, RouterConfig, TemplateCatalog};
use switchboard_ml::{load_jsonl, TrainedClassifier, TrainingOptions};
use switchboard_observability::init_tracing;
use switchboard_router::IntentRouter;

#[derive(Debug, Parser)]
#[command(name = "switchboard")]
#[command(about = "Ensemble intent classification")]
struct Cli {
    /// Template catalog file or directory; defaults to the built-in catalog.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Pre-trained classifier to load instead of training at startup.
    #[arg(long)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Classify {
        text: String,
    },
    /// Classify stdin lines; `/ok` and `/wrong <intent>` report feedback on the last answer.
    Chat,
    Train {
        #[arg(long)]
        dataset: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    Stats,
    Catalog,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("switchboard_cli");
    let cli = Cli::parse();

    let mut config = RouterConfig::from_env();
    if cli.catalog.is_some() {
        config.catalog_path = cli.catalog;
    }
    if cli.model.is_some() {
        config.model_path = cli.model;
    }

    match cli.command {
        Command::Classify { text } => {
            let router = IntentRouter::build(config).await?;
            let result = router.classify(&text).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Chat => {
            let router = IntentRouter::build(config).await?;
            run_chat(&router).await?;
        }
        Command::Train { dataset, out } => train(&config, dataset, &out)?,
        Command::Stats => {
            let router = IntentRouter::build(config).await?;
            println!("{}", serde_json::to_string_pretty(&router.stats())?);
        }
        Command::Catalog => {
            let catalog = load_catalog(&config)?;
            println!("{}", serde_json::to_string_pretty(catalog.templates())?);
        }
    }

    Ok(())
}

fn load_catalog(config: &RouterConfig) -> Result<TemplateCatalog> {
    match &config.catalog_path {
        Some(path) => TemplateCatalog::from_path(path),
        None => TemplateCatalog::builtin(),
    }
}

fn train(config: &RouterConfig, dataset: Option<PathBuf>, out: &Path) -> Result<()> {
    let samples = match dataset.or_else(|| config.dataset_path.clone()) {
        Some(path) => load_jsonl(&path)?,
        None => load_catalog(config)?.labeled_examples(),
    };

    let classifier = TrainedClassifier::train(&samples, TrainingOptions::from(config))
        .context("training failed")?;
    classifier.save(out)?;

    let model = classifier.snapshot();
    println!(
        "trained {} samples -> {} (vocabulary {}, intents {})",
        samples.len(),
        out.display(),
        model.vocabulary.len(),
        model.intents.len()
    );
    Ok(())
}

async fn run_chat(router: &IntentRouter) -> Result<()> {
    let mut last: Option<(String, ClassificationResult)> = None;

    println!("switchboard chat mode. type 'exit' to quit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        if message.is_empty() {
            continue;
        }

        if let Some(verdict) = message.strip_prefix('/') {
            let Some((query, result)) = last.as_ref() else {
                println!("nothing to give feedback on yet");
                continue;
            };

            let (actual, correct) = match verdict.split_once(' ') {
                Some(("wrong", intent)) => (Intent::new(intent), false),
                _ if verdict == "ok" => (result.intent.clone(), true),
                _ => {
                    println!("usage: /ok | /wrong <intent>");
                    continue;
                }
            };

            let outcome = router
                .record_feedback(query, result.intent.clone(), actual, correct)
                .await?;
            match outcome.retrain {
                Some(report) => println!("retrained: {}", serde_json::to_string(&report)?),
                None => println!("feedback buffered ({}/{})", outcome.buffered, outcome.threshold),
            }
            continue;
        }

        let result = router.classify(message).await;
        println!(
            "\n{} ({:.2}, {})\n",
            result.intent, result.confidence, result.method
        );
        last = Some((message.to_string(), result));
    }

    Ok(())
}
