//! Runs test-suite files (JSON-Schema-Test-Suite layout, plus JTD groups)
//! against the compiler and prints a coloured report.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use json_schemac::{Compiler, JtdCompiler, JtdOptions, Options, ParseOutcome};
use rayon::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// run schema test-suite files through the compiler
#[derive(Parser, Debug)]
struct CommandLineInterface {
    /// One or more suite files. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., default_value = "dev-test-runner/suites/*.json")]
    input: Vec<String>,

    /// collect every error instead of stopping at the first
    #[arg(long)]
    all_errors: bool,

    /// also run every JSON Schema group through a standalone module
    #[arg(long)]
    standalone: bool,

    /// print passing cases too
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
enum Kind {
    #[default]
    JsonSchema,
    Jtd,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Group {
    description: String,
    #[serde(default)]
    kind: Kind,
    schema: Value,
    /// compiler options in their JSON form
    #[serde(default)]
    options: Option<Value>,
    /// the schema itself must be rejected
    #[serde(default)]
    invalid_schema: bool,
    #[serde(default)]
    tests: Vec<Case>,
}

#[derive(Deserialize, Debug)]
struct Case {
    description: String,
    #[serde(default)]
    data: Value,
    /// JTD groups parse this text
    #[serde(default)]
    json: Option<String>,
    valid: bool,
    /// expected parse result of a JTD case
    #[serde(default)]
    value: Option<Value>,
}

struct Outcome {
    group: String,
    case: String,
    failure: Option<String>,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl CommandLineInterface {
    fn run(&self) -> Result<()> {
        let files = resolve_file_path_patterns(&self.input)?;
        let reports: Vec<(PathBuf, Result<Vec<Outcome>>)> =
            files.into_par_iter().map(|path| {
                let outcomes = self.run_file(&path);
                (path, outcomes)
            }).collect();

        let (mut passed, mut failed) = (0usize, 0usize);
        for (path, outcomes) in reports {
            let outcomes = match outcomes {
                Ok(xs) => xs,
                Err(error) => {
                    failed += 1;
                    println!("{} {}: {error:#}", "ERROR".red().bold(), path.display());
                    continue;
                }
            };
            for o in outcomes {
                match &o.failure {
                    None => {
                        passed += 1;
                        if self.verbose {
                            println!("{} {} / {} / {}", "PASS".green(), path.display(), o.group, o.case);
                        }
                    }
                    Some(why) => {
                        failed += 1;
                        println!("{} {} / {} / {}: {why}", "FAIL".red().bold(), path.display(), o.group, o.case);
                    }
                }
            }
        }
        let summary = format!("{passed} passed, {failed} failed");
        if failed > 0 {
            println!("{}", summary.red().bold());
            bail!("{failed} case(s) failed");
        }
        println!("{}", summary.green().bold());
        Ok(())
    }

    fn run_file(&self, path: &Path) -> Result<Vec<Outcome>> {
        let source = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let groups: Vec<Group> =
            serde_json::from_str(&source).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(file = %path.display(), groups = groups.len(), "running suite");
        let mut out = Vec::new();
        for group in &groups {
            match group.kind {
                Kind::JsonSchema => self.json_schema_group(group, &mut out),
                Kind::Jtd => jtd_group(group, &mut out),
            }
        }
        Ok(out)
    }

    fn options(&self, group: &Group) -> Result<Options> {
        let mut opts = match &group.options {
            Some(v) => Options::from_json_str(&v.to_string())?,
            None => Options::default(),
        };
        opts.all_errors |= self.all_errors;
        Ok(opts)
    }

    fn json_schema_group(&self, group: &Group, out: &mut Vec<Outcome>) {
        let compiled = self.options(group).and_then(|opts| {
            let mut compiler = Compiler::new(opts);
            let live = compiler.compile(&group.schema)?;
            let standalone =
                if self.standalone { Some(compiler.compile_standalone(&group.schema)?.load()?) } else { None };
            Ok((live, standalone))
        });
        let (live, standalone) = match (compiled, group.invalid_schema) {
            (Err(_), true) => return out.push(outcome(group, "schema is rejected", None)),
            (Ok(_), true) => return out.push(outcome(group, "schema is rejected", Some("compiled".into()))),
            (Err(error), false) => return out.push(outcome(group, "schema compiles", Some(format!("{error:#}")))),
            (Ok(pair), false) => pair,
        };
        for case in &group.tests {
            let failure = match live.validate(&case.data) {
                Err(error) => Some(format!("runtime fault: {error}")),
                Ok(v) if v.valid != case.valid => Some(format!("expected valid={}, got {:?}", case.valid, v.errors)),
                Ok(v) => match standalone.as_ref().map(|s| s.validate(&case.data)) {
                    Some(Ok(s)) if s != v => Some("standalone module disagrees".into()),
                    Some(Err(error)) => Some(format!("standalone fault: {error}")),
                    _ => None,
                },
            };
            out.push(outcome(group, &case.description, failure));
        }
    }
}

fn jtd_group(group: &Group, out: &mut Vec<Outcome>) {
    let compiled = group
        .options
        .as_ref()
        .map(|v| JtdOptions::from_json_str(&v.to_string()))
        .transpose()
        .map(Option::unwrap_or_default)
        .and_then(|opts| {
            let compiler = JtdCompiler::new(opts);
            Ok((compiler.parser(&group.schema)?, compiler.serializer(&group.schema)?))
        });
    let (parser, serializer) = match (compiled, group.invalid_schema) {
        (Err(_), true) => return out.push(outcome(group, "schema is rejected", None)),
        (Ok(_), true) => return out.push(outcome(group, "schema is rejected", Some("compiled".into()))),
        (Err(error), false) => return out.push(outcome(group, "schema compiles", Some(error.to_string()))),
        (Ok(pair), false) => pair,
    };
    for case in &group.tests {
        let Some(text) = &case.json else {
            out.push(outcome(group, &case.description, Some("JTD cases need \"json\" text".into())));
            continue;
        };
        let failure = match (parser.parse(text), case.valid) {
            (ParseOutcome::Parsed { value, .. }, true) => match &case.value {
                Some(expected) if expected != &value => Some(format!("parsed {value}, expected {expected}")),
                _ => match serializer.serialize(&value).map(|s| parser.parse(&s).value()) {
                    Ok(Some(again)) if again == value => None,
                    Ok(_) => Some("serialized text does not parse back to the same value".into()),
                    Err(error) => Some(format!("serializer fault: {error}")),
                },
            },
            (ParseOutcome::Failed { .. }, false) => None,
            (ParseOutcome::Parsed { value, .. }, false) => Some(format!("expected a failure, parsed {value}")),
            (ParseOutcome::Failed { message, position }, true) => Some(format!("failed at {position}: {message}")),
        };
        out.push(outcome(group, &case.description, failure));
    }
}

fn outcome(group: &Group, case: &str, failure: Option<String>) -> Outcome {
    Outcome { group: group.description.clone(), case: case.to_string(), failure }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                matched_any = true;
                out.push(entry?);
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }
    out.sort();
    Ok(out)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    if let Err(error) = CommandLineInterface::parse().run() {
        eprintln!("{} {error:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundled() -> CommandLineInterface {
        CommandLineInterface {
            input: vec![format!("{}/suites/*.json", env!("CARGO_MANIFEST_DIR"))],
            all_errors: false,
            standalone: false,
            verbose: false,
        }
    }

    #[test]
    fn bundled_suites_pass() {
        bundled().run().unwrap();
    }

    #[test]
    fn bundled_suites_pass_collecting_all_errors_and_standalone() {
        CommandLineInterface { all_errors: true, standalone: true, ..bundled() }.run().unwrap();
    }

    #[test]
    fn wrong_expectations_are_reported() {
        let dir = std::env::temp_dir().join(format!("json-schemac-suite-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("wrong.json");
        let group = serde_json::json!([{
            "description": "integers",
            "schema": {"type": "integer"},
            "tests": [{"description": "a string is not an integer", "data": "1", "valid": true}]
        }]);
        std::fs::write(&file, group.to_string()).unwrap();
        let outcomes = bundled().run_file(&file).unwrap();
        assert!(outcomes[0].failure.is_some());
        let cli = CommandLineInterface { input: vec![file.display().to_string()], ..bundled() };
        assert!(cli.run().is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
