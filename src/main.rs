//! xtalk main entry point
//!
//! Without a command the interactive phrase board starts: speech is
//! negotiated in the background while the user picks phrases, and `p`
//! plays the composed sentence. The other commands manage the phrase
//! store or speak a sentence once.

use log::{debug, error, info};
use std::io::{self, BufRead, Write};
use std::process;
use std::time::{Duration, Instant};
use unicode_width::UnicodeWidthStr;
use xtalk::speech::{BackendFactory, LanguageTag};
use xtalk::state::config::Config;
use xtalk::state::{SpeechStatus, State};
use xtalk::store::PhraseStore;
use xtalk::{Result, XtalkError};

/// How long one-shot commands wait for a speech backend
const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Phrases per row on the board
const GRID_COLUMNS: usize = 6;

fn main() {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let debug_mode = args.iter().any(|arg| arg == "--debug" || arg == "-d");

    // Initialize logger
    if debug_mode {
        // Debug mode: write to xtalk.log file
        use std::fs::OpenOptions;
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open("xtalk.log")
        {
            Ok(log_file) => {
                env_logger::Builder::new()
                    .filter_level(log::LevelFilter::Debug)
                    .target(env_logger::Target::Pipe(Box::new(log_file)))
                    .init();
            }
            Err(e) => {
                eprintln!("Warning: Failed to open xtalk.log for debug logging: {}", e);
                eprintln!("Continuing without file logging...");
                env_logger::Builder::new()
                    .filter_level(log::LevelFilter::Warn)
                    .init();
            }
        }

        info!(
            "xtalk version {} starting (debug mode, logging to xtalk.log)",
            xtalk::VERSION
        );
    } else {
        // Normal mode: minimal logging to stderr, only errors
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Error)
            .init();
    }

    if let Err(e) = run(&args[1..]) {
        error!("Fatal error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Parsed command line
struct Cli {
    language: Option<LanguageTag>,
    command: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Cli> {
    let mut language = None;
    let mut command = Vec::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--debug" | "-d" => {}
            "--lang" | "-l" => {
                let tag = iter
                    .next()
                    .ok_or_else(|| XtalkError::Config("--lang needs a language tag".to_string()))?;
                language = Some(
                    LanguageTag::parse(tag)
                        .ok_or_else(|| XtalkError::Config(format!("Invalid language tag: {}", tag)))?,
                );
            }
            _ => command.push(arg.clone()),
        }
    }

    Ok(Cli { language, command })
}

fn run(args: &[String]) -> Result<()> {
    let cli = parse_args(args)?;
    debug!("Command: {:?}", cli.command);

    let command = cli.command.first().map(String::as_str).unwrap_or("board");
    let rest = cli.command.get(1..).unwrap_or_default();

    match command {
        "board" => board(cli.language),
        "categories" => {
            let store = open_store()?;
            for category in store.list_categories() {
                println!("{}", category);
            }
            Ok(())
        }
        "phrases" => {
            let category = required(rest, 0, "phrases <category>")?;
            let store = open_store()?;
            print!("{}", format_grid(&store.list_phrases(category), GRID_COLUMNS));
            Ok(())
        }
        "add" => {
            let category = required(rest, 0, "add <category> <text>")?;
            let text = rest.get(1..).unwrap_or_default().join(" ");
            let mut store = open_store()?;
            let id = store.upsert_phrase(category, &text)?;
            println!("Added {} to {} (id {})", text, category, id);
            Ok(())
        }
        "delete" => {
            let category = required(rest, 0, "delete <category> <text>")?;
            let text = rest.get(1..).unwrap_or_default().join(" ");
            let mut store = open_store()?;
            let removed = store.delete_by_category_and_text(category, &text)?;
            println!("Removed {} phrase(s)", removed);
            Ok(())
        }
        "say" => {
            if rest.is_empty() {
                return Err(XtalkError::EmptySentence);
            }
            say(cli.language, rest)
        }
        "engines" => {
            let config = Config::load()?;
            let backends = State::host_enumerator(&config).list_backends();
            if backends.is_empty() {
                println!("No speech engines found");
            }
            for backend in backends {
                println!("{:<24} {:?}", backend.identifier, backend.source);
            }
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            Err(XtalkError::Other(format!("Unknown command: {}", other)))
        }
    }
}

fn print_usage() {
    println!("{} {}", xtalk::APP_NAME, xtalk::VERSION);
    println!("Usage: xtalk [--debug] [--lang <tag>] [command]");
    println!();
    println!("Commands:");
    println!("  board                    interactive phrase board (default)");
    println!("  categories               list categories");
    println!("  phrases <category>       list phrases in a category");
    println!("  add <category> <text>    add a phrase");
    println!("  delete <category> <text> delete a phrase");
    println!("  say <phrase>...          speak a sentence once");
    println!("  engines                  list speech engines found on this host");
}

fn required<'a>(rest: &'a [String], index: usize, usage: &str) -> Result<&'a str> {
    rest.get(index)
        .map(String::as_str)
        .ok_or_else(|| XtalkError::Other(format!("Usage: xtalk {}", usage)))
}

fn open_store() -> Result<PhraseStore> {
    let config = Config::load()?;
    PhraseStore::load(config.store_path())
}

/// Speak one sentence and exit
fn say(language: Option<LanguageTag>, phrases: &[String]) -> Result<()> {
    let mut state = State::new(language)?;
    for phrase in phrases {
        state.select_phrase(phrase);
    }

    state.start_speech()?;
    match state.wait_for_speech(NEGOTIATION_TIMEOUT).clone() {
        SpeechStatus::Ready(id) => {
            info!("Speaking through {}", id);
            let text = state.play()?;
            println!("{}", text);
            // Let the utterance finish before the backend is dropped
            std::thread::sleep(Duration::from_millis(300));
            while state.composer.is_speaking() {
                std::thread::sleep(Duration::from_millis(100));
            }
            Ok(())
        }
        SpeechStatus::Failed(reason) => {
            eprintln!("Speech unavailable: {}", reason);
            eprintln!("{}", reason.recovery_hint());
            Err(XtalkError::Speech(reason.to_string()))
        }
        SpeechStatus::Idle | SpeechStatus::Pending => {
            state.cancel_speech();
            Err(XtalkError::Speech("Timed out waiting for a speech engine".to_string()))
        }
    }
}

/// Interactive board
fn board(language: Option<LanguageTag>) -> Result<()> {
    let mut state = State::new(language)?;
    println!("{} {} - type h for help", xtalk::APP_NAME, xtalk::VERSION);

    if let Err(e) = state.start_speech() {
        eprintln!("Could not start speech: {}", e);
    }
    println!("Preparing speech for {}...", state.composer.language());
    report_status(state.wait_for_speech(NEGOTIATION_TIMEOUT));

    show_board(&state);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;

        // Pick up negotiation results that arrived while waiting for input
        let before = state.status().clone();
        let after = state.poll_speech(Instant::now()).clone();
        if after != before {
            report_status(&after);
        }

        match board_command(&mut state, line.trim()) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("{}", e),
        }
    }

    state.cancel_speech();
    info!("Board closed");
    Ok(())
}

/// Run one board command; false means quit
fn board_command<F: BackendFactory>(state: &mut State<F>, line: &str) -> Result<bool> {
    let (cmd, arg) = match line.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (line, ""),
    };

    match cmd {
        "" => {}
        "q" | "quit" => return Ok(false),
        "h" | "help" => print_board_help(),
        "c" if arg.is_empty() => {
            for (i, category) in state.store.list_categories().iter().enumerate() {
                println!("{:>3} {}", i + 1, category);
            }
        }
        "c" => {
            let categories = state.store.list_categories();
            let name = match arg.parse::<usize>() {
                Ok(n) if n >= 1 && n <= categories.len() => categories[n - 1].clone(),
                _ => arg.to_string(),
            };
            if state.show_category(&name) {
                show_board(state);
            } else {
                println!("No category {}", arg);
            }
        }
        "p" | "play" => {
            let text = state.play()?;
            println!("Speaking: {}", text);
        }
        "u" | "undo" => {
            state.composer.undo();
            show_sentence(state);
        }
        "x" | "clear" => {
            state.composer.clear();
            show_sentence(state);
        }
        "a" | "add" => {
            let category = current_category(state)?;
            state.store.upsert_phrase(&category, arg)?;
            show_board(state);
        }
        "d" | "delete" => {
            let (category, phrase) = visible_phrase(state, arg)?;
            state.store.delete_by_category_and_text(&category, &phrase)?;
            show_board(state);
        }
        "e" | "edit" => {
            let (index, text) = arg.split_once(char::is_whitespace).unwrap_or((arg, ""));
            let (category, phrase) = visible_phrase(state, index)?;
            state.store.replace_phrase(&category, &phrase, text)?;
            show_board(state);
        }
        "r" | "retry" => {
            state.start_speech()?;
            report_status(state.wait_for_speech(NEGOTIATION_TIMEOUT));
        }
        "l" | "lang" => {
            let tag = LanguageTag::parse(arg)
                .ok_or_else(|| XtalkError::Config(format!("Invalid language tag: {}", arg)))?;
            state.config.set("speech", "language", &tag.to_string());
            state.config.save()?;
            state.set_language(tag)?;
            report_status(state.wait_for_speech(NEGOTIATION_TIMEOUT));
        }
        "k" | "cancel" => {
            state.cancel_speech();
            report_status(state.status());
        }
        "s" | "status" => {
            report_status(state.status());
            if let Some(wait) = state.next_wakeup() {
                println!("  next attempt in {} ms", wait.as_millis());
            }
        }
        _ => {
            // A bare number picks a phrase
            let (_, phrase) = visible_phrase(state, cmd)?;
            state.select_phrase(&phrase);
            show_sentence(state);
        }
    }
    Ok(true)
}

fn print_board_help() {
    println!("  <n>          add phrase n to the sentence");
    println!("  p            play the sentence");
    println!("  u / x        undo last phrase / clear sentence");
    println!("  c [n|name]   list categories or switch category");
    println!("  a <text>     add a phrase to this category");
    println!("  d <n>        delete phrase n");
    println!("  e <n> <text> edit phrase n");
    println!("  l <tag>      change language, save it and renegotiate speech");
    println!("  r            retry speech setup");
    println!("  k            cancel speech setup");
    println!("  s            speech status");
    println!("  q            quit");
}

fn current_category<F: BackendFactory>(state: &State<F>) -> Result<String> {
    state
        .category
        .clone()
        .ok_or_else(|| XtalkError::Store("No category selected".to_string()))
}

fn visible_phrase<F: BackendFactory>(state: &State<F>, index: &str) -> Result<(String, String)> {
    let category = current_category(state)?;
    let phrases = state.visible_phrases();
    let n: usize = index
        .parse()
        .map_err(|_| XtalkError::Other(format!("Unknown command: {}", index)))?;
    let phrase = n
        .checked_sub(1)
        .and_then(|i| phrases.get(i))
        .ok_or_else(|| XtalkError::Other(format!("No phrase {}", n)))?;
    Ok((category, phrase.clone()))
}

fn show_board<F: BackendFactory>(state: &State<F>) {
    if let Some(category) = &state.category {
        println!("[{}]", category);
    }
    print!("{}", format_grid(&state.visible_phrases(), GRID_COLUMNS));
    show_sentence(state);
}

fn show_sentence<F: BackendFactory>(state: &State<F>) {
    println!("Sentence: {}", state.composer.display_text());
}

fn report_status(status: &SpeechStatus) {
    match status {
        SpeechStatus::Idle => println!("Speech not started"),
        SpeechStatus::Pending => println!("Speech still being prepared"),
        SpeechStatus::Ready(id) => println!("Speech ready ({})", id),
        SpeechStatus::Failed(reason) => {
            println!("Speech unavailable: {}", reason);
            println!("  {}", reason.recovery_hint());
        }
    }
}

/// Numbered phrases in aligned columns
///
/// Column width is measured in terminal cells so CJK phrases line up.
fn format_grid(phrases: &[String], columns: usize) -> String {
    let columns = columns.max(1);
    let cells: Vec<String> = phrases
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{:>3} {}", i + 1, p))
        .collect();
    let width = cells.iter().map(|c| c.width()).max().unwrap_or(0);

    let mut out = String::new();
    for row in cells.chunks(columns) {
        let mut line = String::new();
        for cell in row {
            line.push_str(cell);
            line.push_str(&" ".repeat(width - cell.width() + 2));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let cli = parse_args(&strings(&["-d", "--lang", "en-US", "say", "hi"])).unwrap();
        assert_eq!(cli.language.unwrap().to_string(), "en-US");
        assert_eq!(cli.command, vec!["say", "hi"]);

        assert!(parse_args(&strings(&["--lang"])).is_err());
        assert!(parse_args(&strings(&["--lang", "12"])).is_err());
    }

    #[test]
    fn test_format_grid_aligns_wide_characters() {
        let grid = format_grid(&strings(&["我", "ab", "医生"]), 2);
        let lines: Vec<&str> = grid.lines().collect();
        assert_eq!(lines.len(), 2);
        // Every cell is padded to the widest one ("  3 医生", 8 cells) plus a gap of 2
        assert_eq!(lines[0], format!("  1 我{}  2 ab", " ".repeat(4)));
        assert_eq!(lines[1], "  3 医生");
    }

    #[test]
    fn test_format_grid_empty() {
        assert_eq!(format_grid(&[], 4), "");
    }
}
