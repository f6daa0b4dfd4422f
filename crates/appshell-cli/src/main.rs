use std::{
    fs::File,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use appshell::Shell;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod history;
mod input;
mod interrupt;

use history::History;
use input::FragmentBuffer;
use interrupt::Interrupt;

/// Interactive scripting shell with a persistent, snapshotable session.
#[derive(Debug, Parser)]
#[command(name = "appshell", version, about)]
struct Args {
    /// Directory scripts may import `<name>.tengo` files from.
    #[arg(long, default_value = ".")]
    imports: PathBuf,
    /// Do not register the `jsonrpc` module.
    #[arg(long)]
    no_jsonrpc: bool,
    /// File written by `:snapshot` and read by `:reload`.
    #[arg(long, default_value = "snapshot.json")]
    snapshot: PathBuf,
    /// File the command history is kept in.
    #[arg(long, default_value = "history.json")]
    history: PathBuf,
}

const PROMPT: &str = ">> ";
const CONTINUATION_PROMPT: &str = ".. ";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut history = match History::load(&args.history) {
        Ok(history) => history,
        Err(err) => {
            eprintln!("error: cannot read history {}: {err}", args.history.display());
            return ExitCode::FAILURE;
        }
    };

    let mut shell = Shell::new();
    shell.allow_import_from(&args.imports);
    if !args.no_jsonrpc {
        shell.enable_jsonrpc_client();
    }

    let interrupt = match Interrupt::install() {
        Ok(interrupt) => interrupt,
        Err(err) => {
            eprintln!("error: cannot install the interrupt handler: {err}");
            return ExitCode::FAILURE;
        }
    };

    run(&mut shell, &mut history, &interrupt, &args.snapshot);

    if let Err(err) = history.save() {
        eprintln!("error: cannot save history {}: {err}", history.path().display());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Reads fragments from stdin until end of input or `:quit`.
fn run(shell: &mut Shell, history: &mut History, interrupt: &Interrupt, snapshot: &Path) {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut buffer = FragmentBuffer::default();

    loop {
        prompt(if buffer.is_empty() { PROMPT } else { CONTINUATION_PROMPT });
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                eprintln!("error: {err}");
                break;
            }
            None => {
                let rest = buffer.take();
                if !rest.trim().is_empty() {
                    evaluate(shell, history, interrupt, &rest);
                }
                break;
            }
        };

        if buffer.is_empty() {
            match line.trim() {
                ":quit" | ":q" => break,
                ":snapshot" => {
                    save_snapshot(shell, interrupt, snapshot);
                    continue;
                }
                ":reload" => {
                    reload_snapshot(shell, interrupt, snapshot);
                    continue;
                }
                ":history" => {
                    for (index, entry) in history.entries().iter().enumerate() {
                        println!("{:>4}  {entry}", index + 1);
                    }
                    continue;
                }
                _ => {}
            }
        }

        if let Some(fragment) = buffer.push_line(&line) {
            evaluate(shell, history, interrupt, &fragment);
        }
    }
}

fn prompt(text: &str) {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

/// Evaluates one fragment on a fresh, interruptible context. Only fragments
/// that run without error are added to the history.
fn evaluate(shell: &mut Shell, history: &mut History, interrupt: &Interrupt, fragment: &str) {
    let evaluation = interrupt.begin();
    let ctx = evaluation.context();
    let outcome = shell.parse(ctx, fragment);
    if let Some(err) = outcome.error {
        eprintln!("{err}");
        return;
    }
    if outcome.code.is_empty() {
        return;
    }
    tracing::debug!(fragment = %outcome.code, "evaluating");
    match shell.eval(ctx, io::stdout(), io::stderr(), &outcome.code, io::empty()) {
        Ok(()) => history.push(&outcome.code),
        Err(err) => eprintln!("{err}"),
    }
}

fn save_snapshot(shell: &Shell, interrupt: &Interrupt, path: &Path) {
    let evaluation = interrupt.begin();
    let result = File::create(path).and_then(|file| {
        let mut out = io::BufWriter::new(file);
        shell.snapshot(evaluation.context(), &mut out).map_err(io::Error::other)?;
        out.flush()
    });
    match result {
        Ok(()) => println!("snapshot written to {}", path.display()),
        Err(err) => eprintln!("error: cannot write snapshot {}: {err}", path.display()),
    }
}

fn reload_snapshot(shell: &mut Shell, interrupt: &Interrupt, path: &Path) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("error: cannot open snapshot {}: {err}", path.display());
            return;
        }
    };
    let evaluation = interrupt.begin();
    match shell.restore_snapshot(evaluation.context(), io::BufReader::new(file)) {
        Ok(()) => println!("snapshot restored from {}", path.display()),
        Err(err) => eprintln!("error: cannot restore snapshot {}: {err}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn only_successful_fragments_enter_the_history() {
        let mut shell = Shell::new();
        let mut history = History::default();
        let interrupt = Interrupt::default();

        evaluate(&mut shell, &mut history, &interrupt, "x := 1 / 0");
        evaluate(&mut shell, &mut history, &interrupt, "y + 1");
        evaluate(&mut shell, &mut history, &interrupt, "x := (");
        assert!(history.entries().is_empty());

        evaluate(&mut shell, &mut history, &interrupt, "  z := 2 ");
        assert_eq!(history.entries(), ["z := 2"]);
        assert!(!interrupt.cancel());
    }
}
