use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use hetu::{EvalOptions, Interpreter, InterpreterConfig};

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut debug = false;
    let mut script_path: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--debug" | "-d" => {
                debug = true;
            }
            "--help" | "-h" => {
                println!("Usage: hetu [--debug] [script.ht]");
                println!("Reads from stdin when no script is given.");
                return Ok(());
            }
            _ => {
                script_path = Some(PathBuf::from(arg));
                if args.next().is_some() {
                    bail!("Only one script file is supported");
                }
                break;
            }
        }
    }

    let working_directory = script_path
        .as_ref()
        .and_then(|path| path.parent())
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut interpreter = Interpreter::new(InterpreterConfig {
        working_directory,
        debug,
        ..InterpreterConfig::default()
    });

    match script_path {
        Some(path) => {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string());
            interpreter.eval_file(
                path.file_name().map(PathBuf::from).unwrap_or(path),
                EvalOptions {
                    file_name,
                    ..EvalOptions::default()
                },
            )?;
        }
        None => {
            let mut source = String::new();
            io::stdin()
                .read_to_string(&mut source)
                .context("Reading stdin")?;
            interpreter.eval(&source)?;
        }
    }

    // Scripts that define a `main` procedure get it run after loading.
    if interpreter.globals().borrow().contains("main") {
        interpreter.invoke("main", &[])?;
    }
    Ok(())
}
