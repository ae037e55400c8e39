//! Loader for the file-based script cases under `tests/programs/`.
//!
//! Each case directory holds a `program.ht`, a `case.yaml` describing the
//! expected outcome, and the referenced expectation files. The integration
//! harness and the benchmarks both read cases through this module.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    /// Evaluates cleanly; captured prints must match `stdout_file`.
    RuntimeSuccess,
    /// Fails in lexing, parsing, or resolution.
    FrontendError,
    /// Fails during evaluation.
    RuntimeError,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpectedOutcome {
    pub stdout_file: Option<String>,
    pub stderr_contains_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseSpec {
    pub class: CaseClass,
    pub expected: ExpectedOutcome,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub program_path: PathBuf,
    pub spec: CaseSpec,
}

impl Case {
    pub fn read_text(&self, relative_path: &str) -> Result<String> {
        fs::read_to_string(self.dir.join(relative_path))
            .with_context(|| format!("Reading {} fixture file {}", self.name, relative_path))
    }
}

pub fn load_cases(programs_dir: &Path) -> Result<Vec<Case>> {
    let mut cases = Vec::new();

    for entry in
        fs::read_dir(programs_dir).with_context(|| format!("Reading {}", programs_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }

        let case_path = path.join("case.yaml");
        if !case_path.exists() {
            continue;
        }

        let program_path = path.join("program.ht");
        ensure!(
            program_path.exists(),
            "Missing program.ht for case {}",
            path.display()
        );

        let case_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .with_context(|| format!("Invalid case directory name {}", path.display()))?;

        let case_raw = fs::read_to_string(&case_path)
            .with_context(|| format!("Reading {}", case_path.display()))?;
        let spec: CaseSpec = serde_yaml::from_str(&case_raw)
            .with_context(|| format!("Parsing {}", case_path.display()))?;

        match spec.class {
            CaseClass::RuntimeSuccess => ensure!(
                spec.expected.stdout_file.is_some(),
                "Case {case_name} is runtime_success but has no stdout_file"
            ),
            CaseClass::FrontendError | CaseClass::RuntimeError => ensure!(
                spec.expected.stderr_contains_file.is_some(),
                "Case {case_name} expects an error but has no stderr_contains_file"
            ),
        }

        cases.push(Case {
            name: case_name,
            dir: path,
            program_path,
            spec,
        });
    }

    cases.sort_by(|a, b| a.name.cmp(&b.name));
    ensure!(
        !cases.is_empty(),
        "No cases found under {}",
        programs_dir.display()
    );
    Ok(cases)
}
