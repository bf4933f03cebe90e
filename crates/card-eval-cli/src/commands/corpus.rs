//! Corpus inspection commands.

use std::path::Path;

use anyhow::{Context, Result};
use card_eval::TurnMode;
use card_eval::corpus::{QuestionSpec, list_images, load_questions};

use crate::CorpusAction;

pub fn run(action: CorpusAction, verbose: bool) -> Result<()> {
    match action {
        CorpusAction::Images { path } => images(&path, verbose),
        CorpusAction::Questions { path, mode } => questions(&path, mode, verbose),
    }
}

fn images(path: &Path, verbose: bool) -> Result<()> {
    if verbose {
        eprintln!("Listing images in: {}", path.display());
    }

    let images = list_images(path)
        .with_context(|| format!("Failed to list images in {}", path.display()))?;

    println!("{:>5}  {:<40} {:>10}", "#", "Image", "Bytes");
    println!("{:-<60}", "");
    for (idx, image) in images.iter().enumerate() {
        println!("{:>5}  {:<40} {:>10}", idx + 1, image.name, image.file_size);
    }
    println!("{:-<60}", "");
    println!(
        "{} images, {} bytes",
        images.len(),
        images.iter().map(|img| img.file_size).sum::<u64>()
    );

    Ok(())
}

fn questions(path: &Path, mode: TurnMode, verbose: bool) -> Result<()> {
    if verbose {
        eprintln!("Parsing questions in: {} ({:?})", path.display(), mode);
    }

    let lines = load_questions(path)
        .with_context(|| format!("Failed to read questions from {}", path.display()))?;

    let mut invalid = 0;
    for (idx, line) in lines.iter().enumerate() {
        match QuestionSpec::parse(line, mode) {
            Ok(spec) => {
                println!("{:>4}. {}", idx + 1, spec.label());
                if spec.is_multi_turn() {
                    for (turn, text) in spec.turns().iter().enumerate() {
                        println!("        turn {}: {}", turn + 1, text);
                    }
                }
            }
            Err(err) => {
                invalid += 1;
                println!("{:>4}. INVALID: {}", idx + 1, err);
            }
        }
    }

    println!();
    println!("{} questions, {} valid, {} invalid", lines.len(), lines.len() - invalid, invalid);
    Ok(())
}
