//! File-based script cases: every directory under `tests/programs/` with a
//! `case.yaml` is evaluated through the public embedding API and checked
//! against its expected stdout or error fragment.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result, ensure};

use hetu::externs::external_fn;
use hetu::fixtures::{self, Case, CaseClass};
use hetu::{Interpreter, InterpreterConfig, Value};

fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim_end().to_string()
}

/// Interpreter whose `print` lands in a buffer instead of stdout.
fn capturing_interpreter(dir: &Path) -> (Interpreter, Rc<RefCell<Vec<String>>>) {
    let mut interpreter = Interpreter::new(InterpreterConfig {
        working_directory: dir.to_path_buf(),
        ..InterpreterConfig::default()
    });
    let printed = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&printed);
    interpreter.load_external_functions(HashMap::from([(
        "print".to_string(),
        external_fn(move |_, _, args: &[Value], _| {
            let line = args
                .iter()
                .map(Value::to_output)
                .collect::<Vec<_>>()
                .join(" ");
            sink.borrow_mut().push(line);
            Ok(Value::Null)
        }),
    )]));
    (interpreter, printed)
}

fn run_case_program(case: &Case) -> (Result<Value>, Vec<String>) {
    let source = fs::read_to_string(&case.program_path)
        .unwrap_or_else(|error| panic!("reading {}: {error}", case.name));
    let (mut interpreter, printed) = capturing_interpreter(&case.dir);
    let result = interpreter.eval(&source).and_then(|value| {
        if interpreter.globals().borrow().contains("main") {
            interpreter.invoke("main", &[])
        } else {
            Ok(value)
        }
    });
    let lines = printed.borrow().clone();
    (result, lines)
}

#[test]
fn runs_program_cases() -> Result<()> {
    let cases = fixtures::load_cases(Path::new("tests/programs"))?;

    for case in cases {
        let (result, printed) = run_case_program(&case);
        match case.spec.class {
            CaseClass::RuntimeSuccess => {
                let stdout_file = case
                    .spec
                    .expected
                    .stdout_file
                    .as_deref()
                    .with_context(|| format!("Missing stdout_file in {}", case.name))?;
                let expected = normalize_output(&case.read_text(stdout_file)?);
                result.with_context(|| format!("Case {} failed", case.name))?;
                let actual = normalize_output(&printed.join("\n"));
                assert_eq!(actual, expected, "Output mismatch for {}", case.name);
            }
            CaseClass::FrontendError | CaseClass::RuntimeError => {
                let expected_file = case
                    .spec
                    .expected
                    .stderr_contains_file
                    .as_deref()
                    .with_context(|| format!("Missing stderr expectation in {}", case.name))?;
                let expected_error = case.read_text(expected_file)?;
                let expected_error = expected_error.trim();
                ensure!(
                    result.is_err(),
                    "Expected error for {}, but evaluation succeeded",
                    case.name
                );
                let actual = format!("{:#}", result.expect_err("result checked as err"));
                ensure!(
                    actual.contains(expected_error),
                    "Expected error containing '{expected_error}' in {}, got '{actual}'",
                    case.name
                );
            }
        }
    }
    Ok(())
}
