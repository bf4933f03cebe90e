//! Interactive card chat command.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use card_eval::{ChatSession, build_backend};

use crate::ChatArgs;

const HELP: &str = "\
Commands:
  /upload <file>...   upload card images (attached to your next message)
  /select <name>...   send only these uploads with the next message
  /contact            show the latest extracted contact
  /save [file]        save the conversation as JSON
  /help               show this help
  /quit               leave the chat";

/// A parsed REPL line.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Message(&'a str),
    Upload(Vec<&'a str>),
    Select(Vec<&'a str>),
    Contact,
    Save(Option<&'a str>),
    Help,
    Quit,
    Unknown(&'a str),
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line);
    };

    let mut words = command.split_whitespace();
    let name = words.next().unwrap_or("");
    let rest: Vec<&str> = words.collect();
    match name {
        "upload" => Input::Upload(rest),
        "select" => Input::Select(rest),
        "contact" => Input::Contact,
        "save" => Input::Save(rest.first().copied()),
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        _ => Input::Unknown(name),
    }
}

/// Write the transcript. A failure is reported and the chat goes on.
fn save(chat: &ChatSession<'_>, path: &Path) -> std::result::Result<String, String> {
    match chat.save_transcript(path) {
        Ok(()) => Ok(format!("Saved conversation to {}", path.display())),
        Err(err) => Err(format!("Error: could not save to {}: {err}", path.display())),
    }
}

pub fn run(args: ChatArgs, verbose: bool) -> Result<()> {
    let mut config = super::base_config(args.config.as_deref())?;
    config.providers.apply_env();

    let mut backend = build_backend(&args.model, &config.providers)
        .with_context(|| format!("Failed to set up model {}", args.model))?;
    backend
        .initialize()
        .with_context(|| format!("Model {} is not available", args.model))?;

    let instruction = match &args.system_instruction_file {
        Some(path) => Some(super::read_instruction(path)?),
        None => None,
    };
    let mut chat = ChatSession::new(backend.as_ref());
    if instruction.is_some() {
        chat = chat.with_system_instruction(instruction);
    }
    if !args.uploads.is_empty() {
        let count = chat.upload_paths(&args.uploads)?;
        println!("Uploaded {count} image(s).");
    }

    println!("Chatting with {} (type /help for commands)", args.model);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        print!("> ");
        stdout.flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        match parse_input(&line) {
            Input::Empty => {}
            Input::Message(text) => match chat.send(text) {
                Ok(reply) => println!("{reply}\n"),
                Err(err) => eprintln!("Error: {err}"),
            },
            Input::Upload(paths) => {
                let paths: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();
                match chat.upload_paths(&paths) {
                    Ok(count) => println!("Uploaded {count} image(s)."),
                    Err(err) => eprintln!("Error: {err}"),
                }
            }
            Input::Select(names) => match chat.select(&names) {
                Ok(()) if names.is_empty() => println!("Selection cleared."),
                Ok(()) => println!("Selected {} image(s).", names.len()),
                Err(err) => eprintln!("Error: {err}"),
            },
            Input::Contact => match chat.last_contact() {
                Some(contact) => print!("{contact}"),
                None => println!("No contact extracted yet."),
            },
            Input::Save(path) => {
                let path = path.map_or(args.transcript.as_path(), Path::new);
                match save(&chat, path) {
                    Ok(message) => println!("{message}"),
                    Err(message) => eprintln!("{message}"),
                }
            }
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
            Input::Unknown(name) => eprintln!("Unknown command /{name} (type /help)"),
        }
    }

    if verbose {
        eprintln!("{} messages in conversation", chat.history().len());
    }
    drop(chat);
    backend.release();
    Ok(())
}
