//! Evaluation run command.

use anyhow::{Context, Result};
use card_eval::config::EvalConfigBuilder;
use card_eval::{EvalConfig, Harness, ModelBackend, build_backend};

use crate::RunArgs;

pub fn run(args: RunArgs, verbose: bool) -> Result<()> {
    let config = resolve_config(args)?;
    config.validate()?;

    if verbose {
        eprintln!("Images: {}", config.images_dir.display());
        eprintln!("Questions: {} ({:?})", config.questions_path.display(), config.mode);
        eprintln!("Output: {}", config.output_path.display());
    }

    let mut backends = config
        .models
        .iter()
        .map(|spec| {
            build_backend(spec, &config.providers)
                .with_context(|| format!("Failed to set up model {spec}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let mut refs: Vec<&mut dyn ModelBackend> = backends
        .iter_mut()
        .map(|b| b.as_mut() as &mut dyn ModelBackend)
        .collect();

    let summary = Harness::new(&config)
        .run_to_csv(&mut refs)
        .context("Evaluation run failed")?;

    println!("Run finished in {:.1}s", summary.elapsed().num_milliseconds() as f64 / 1000.0);
    println!("  Models run: {}, skipped: {}", summary.models_run, summary.models_skipped);
    println!(
        "  Sessions completed: {}, failed: {}, skipped: {}",
        summary.sessions_completed, summary.sessions_failed, summary.items_skipped
    );
    println!("  Records written: {}", summary.records_written);
    println!("Results: {}", config.output_path.display());

    Ok(())
}

/// Merge the config file, CLI flags and environment into one config.
fn resolve_config(args: RunArgs) -> Result<EvalConfig> {
    let base = super::base_config(args.config.as_deref())?;
    let mut generation = base.generation.clone();
    let mut builder = EvalConfigBuilder::from_config(base);

    if let Some(path) = args.images {
        builder = builder.images_dir(path);
    }
    if let Some(path) = args.questions {
        builder = builder.questions_path(path);
    }
    if let Some(path) = args.output {
        builder = builder.output_path(path);
    }
    if let Some(mode) = args.mode {
        builder = builder.mode(mode);
    }
    if let Some(pairing) = args.pairing {
        builder = builder.pairing(pairing);
    }
    if let Some(path) = args.system_instruction_file {
        builder = builder.system_instruction(super::read_instruction(&path)?);
    }
    if args.record_failures {
        builder = builder.record_failures(true);
    }

    generation.temperature = args.temperature.or(generation.temperature);
    generation.top_p = args.top_p.or(generation.top_p);
    generation.top_k = args.top_k.or(generation.top_k);
    generation.max_tokens = args.max_tokens.or(generation.max_tokens);
    builder = builder.generation(generation);

    let mut config = builder.build();
    if !args.models.is_empty() {
        config.models = args.models;
    }
    config.providers.apply_env();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cli, Commands};
    use card_eval::{Pairing, TurnMode};
    use clap::Parser;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("eval.toml");
        std::fs::write(
            &config_path,
            r#"
images_dir = "cards"
questions = "questions.txt"
mode = "single"
models = ["dry-run:file-model"]

[generation]
temperature = 0.2
top_k = 32
"#,
        )
        .unwrap();

        let args = run_args(&[
            "card-eval",
            "run",
            "--config",
            config_path.to_str().unwrap(),
            "--mode",
            "multi-turn",
            "--pairing",
            "cross",
            "--temperature",
            "0.3",
            "--model",
            "dry-run:flag-model",
            "--record-failures",
        ]);
        let config = resolve_config(args).unwrap();

        assert_eq!(config.images_dir, dir.path().join("cards"));
        assert_eq!(config.mode, TurnMode::MultiTurn);
        assert_eq!(config.pairing, Pairing::Cross);
        assert_eq!(config.generation.temperature, Some(0.3));
        assert_eq!(config.generation.top_k, Some(32));
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].model, "flag-model");
        assert!(config.record_failures);
    }

    #[test]
    fn test_run_writes_results_with_dry_run_model() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        std::fs::write(images.join("image_1.png"), b"\x89PNG\r\n\x1a\n").unwrap();
        let questions = dir.path().join("questions.txt");
        std::fs::write(&questions, "What is the name?\n").unwrap();
        let output = dir.path().join("results.csv");

        let args = run_args(&[
            "card-eval",
            "run",
            "--images",
            images.to_str().unwrap(),
            "--questions",
            questions.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--model",
            "dry-run:echo",
        ]);
        run(args, false).unwrap();

        let records = card_eval::eval::read_results(&output).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model, "echo");
        assert_eq!(records[0].question, "What is the name?");
    }
}
