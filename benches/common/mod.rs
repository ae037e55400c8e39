#![allow(dead_code)]
use std::collections::HashMap;
use std::fs;

use hetu::externs::external_fn;
use hetu::{Interpreter, InterpreterConfig, Value};

pub const WORKLOADS: [(&str, &str); 2] = [
    ("loop", "tests/programs/bench_loop/program.ht"),
    ("closures", "tests/programs/closures_counter/program.ht"),
];

pub fn load_source(path: &str) -> String {
    fs::read_to_string(path).unwrap_or_else(|err| panic!("read {path}: {err}"))
}

/// Interpreter whose `print` is swallowed, so benchmarks measure evaluation
/// rather than terminal I/O.
pub fn silent_interpreter() -> Interpreter {
    let mut interpreter = Interpreter::new(InterpreterConfig::default());
    interpreter.load_external_functions(HashMap::from([(
        "print".to_string(),
        external_fn(|_, _, _, _| Ok(Value::Null)),
    )]));
    interpreter
}
