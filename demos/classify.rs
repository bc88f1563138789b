use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{bail, Context, Result};
use nlp_transformers::{
    utils::{setup_logging, LogConfig},
    FineTuneConfig, PredictConfig, SequenceClassifier,
};
use tracing::info;

/// Read `label<TAB>text` lines
fn read_tsv(path: &str) -> Result<(Vec<String>, Vec<u32>)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
    let mut texts = Vec::new();
    let mut labels = Vec::new();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Some((label, text)) = line.split_once('\t') else {
            bail!("{}:{}: expected label<TAB>text", path, line_no + 1);
        };
        labels.push(label.trim().parse().with_context(|| format!("{}:{}: bad label", path, line_no + 1))?);
        texts.push(text.to_string());
    }
    Ok((texts, labels))
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging(LogConfig::default()).map_err(anyhow::Error::msg)?;

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <model_name> <train.tsv> <test.tsv> [cache_dir]", args[0]);
        eprintln!("Supported models: {}", SequenceClassifier::list_supported_models().join(", "));
        std::process::exit(1);
    }
    let model_name = &args[1];
    let cache_dir = args.get(4).map(String::as_str).unwrap_or("./cache");

    let (train_texts, train_labels) = read_tsv(&args[2])?;
    let (test_texts, test_labels) = read_tsv(&args[3])?;
    let num_labels = train_labels.iter().copied().max().map_or(2, |m| m as usize + 1);

    info!(model = %model_name, num_labels, "Loading model");
    let mut classifier = SequenceClassifier::new(model_name, num_labels, cache_dir).await?;
    let processor = classifier.processor(model_name.contains("uncased")).await?;

    let train = processor.preprocess(&train_texts, Some(train_labels.as_slice()), 128)?;
    let config = FineTuneConfig {
        num_epochs: 3,
        batch_size: 16,
        learning_rate: 3e-5,
        warmup_steps: 10,
        weight_decay: 0.01,
        seed: Some(42),
        ..Default::default()
    };
    let report = classifier.fit(&train, &config)?;
    println!(
        "Trained {} steps, average loss {:.4} in {:.1?}",
        report.global_step, report.average_loss, report.elapsed
    );

    let test = processor.preprocess(&test_texts, None, 128)?;
    let predicted = classifier.predict(&test, &PredictConfig::default())?;
    let correct = predicted
        .iter()
        .zip(&test_labels)
        .filter(|(p, l)| p == l)
        .count();
    println!(
        "Accuracy: {:.2}% ({}/{})",
        100.0 * correct as f64 / test_labels.len().max(1) as f64,
        correct,
        test_labels.len()
    );

    let saved = classifier.save_model()?;
    println!("Saved fine-tuned model to {}", saved.display());
    Ok(())
}
