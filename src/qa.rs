//! Question/answer pairs generated from extracted functions.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crawler::{strip_strings, CodeRecord};

/// Answer of a question that needs a language model to be answered.
pub const PLACEHOLDER: &str = "TO_BE_FILLED_BY_LLM";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: Option<String>,
    pub context: String,
}

impl QaPair {
    fn new(question: String, answer: Option<String>, context: &str) -> Self {
        Self {
            question,
            answer,
            context: context.to_string(),
        }
    }

    fn placeholder(question: String, context: &str) -> Self {
        Self::new(question, Some(PLACEHOLDER.to_string()), context)
    }

    pub fn needs_completion(&self) -> bool {
        self.answer.as_deref() == Some(PLACEHOLDER)
    }

    /// `None` when there is no usable answer yet.
    pub fn training_text(&self) -> Option<String> {
        match self.answer.as_deref() {
            Some(answer) if answer != PLACEHOLDER && !answer.trim().is_empty() => {
                Some(format!("Question: {}\nAnswer: {}", self.question, answer))
            }
            _ => None,
        }
    }
}

/// Generates the fixed question set for every record, in record order.
pub struct QaGenerator {
    call: Regex,
    returns: Regex,
}

impl QaGenerator {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            call: Regex::new(r"([A-Za-z_][\w.]*)\s*\(")?,
            returns: Regex::new(r"(?m)^\s*return\s+(.+?)\s*(?:#.*)?$")?,
        })
    }

    /// Callables invoked in the code chunk, excluding definitions and anything
    /// inside string literals or comments.
    pub fn external_calls(&self, record: &CodeRecord) -> Vec<String> {
        let mut calls: Vec<String> = Vec::new();
        for code in strip_strings(&record.code_chunk) {
            let line = code.trim_start();
            if line.starts_with("def ") || line.starts_with("async def ") {
                continue;
            }
            for cap in self.call.captures_iter(line) {
                let name = &cap[1];
                let keyword = matches!(
                    name,
                    "if" | "elif" | "while" | "for" | "return" | "and" | "or" | "not" | "in"
                        | "with" | "assert" | "yield" | "lambda"
                );
                if !keyword && !calls.iter().any(|c| c == name) {
                    calls.push(name.to_string());
                }
            }
        }
        calls
    }

    fn output_answer(&self, record: &CodeRecord) -> String {
        let values: Vec<&str> = self
            .returns
            .captures_iter(&record.code_chunk)
            .filter_map(|cap| cap.get(1).map(|m| m.as_str()))
            .collect();
        if values.is_empty() {
            "Based on the code, the function does not return a value.".to_string()
        } else {
            format!("Based on the code, the function returns: {}", values.join("; "))
        }
    }

    pub fn pairs_for(&self, record: &CodeRecord) -> Vec<QaPair> {
        let name = &record.function_name;
        let ctx = record.code_chunk.as_str();
        let doc = record.docstring.clone();
        let params: Vec<&str> = record
            .variables
            .iter()
            .map(String::as_str)
            .filter(|v| *v != "self")
            .collect();

        let mut pairs = vec![
            QaPair::new(format!("What does the function '{name}' do?"), doc.clone(), ctx),
            QaPair::new(
                format!("What are the input parameters for the function '{name}'?"),
                Some(format!(
                    "Based on the code, the input parameters appear to be: {}",
                    params.join(", ")
                )),
                ctx,
            ),
            QaPair::new(
                format!("What is the output of the function '{name}'?"),
                Some(self.output_answer(record)),
                ctx,
            ),
        ];
        for var in &record.variables {
            pairs.push(QaPair::placeholder(
                format!("What is the purpose of the variable '{var}' in the function '{name}'?"),
                ctx,
            ));
        }
        pairs.push(QaPair::placeholder(
            format!(
                "Does the docstring '{}' accurately describe the function '{name}'?",
                doc.as_deref().unwrap_or("None")
            ),
            ctx,
        ));
        pairs.push(QaPair::new(
            format!("What external functions or methods are called within the function '{name}'?"),
            Some(format!(
                "Based on the code, the external calls are: {}",
                self.external_calls(record).join(", ")
            )),
            ctx,
        ));
        pairs.push(QaPair::new(
            format!("What is the purpose of the function {name}?"),
            doc.clone(),
            ctx,
        ));
        pairs.push(QaPair::placeholder(
            format!("Identify any potential errors or edge cases in the function '{name}'."),
            ctx,
        ));
        pairs.push(QaPair::placeholder(
            format!("How could the function '{name}' be improved for readability or efficiency?"),
            ctx,
        ));
        pairs.push(QaPair::new(
            format!("In which file can the function '{name}' be found?"),
            Some(format!("The function is in the file: {}", record.filepath)),
            ctx,
        ));
        pairs.push(QaPair::new(
            format!("In which repository and file can the function '{name}' be found?"),
            Some(format!(
                "The function is in repo: {} and file: {}",
                record.repo_name, record.filepath
            )),
            ctx,
        ));
        pairs.push(QaPair::new(
            format!("Write example usage for the function: {name}"),
            Some(record.code_chunk.clone()),
            ctx,
        ));
        pairs.push(QaPair::new(format!("Summarise the code: {ctx}"), doc, ctx));
        pairs.push(QaPair::new(
            format!("What are the key variables in function: {name}"),
            Some(format!("The key variables are: {}", record.variables.join(", "))),
            ctx,
        ));
        pairs
    }

    pub fn generate(&self, records: &[CodeRecord]) -> Vec<QaPair> {
        records.iter().flat_map(|r| self.pairs_for(r)).collect()
    }
}

pub fn generate_qa_pairs(records: &[CodeRecord]) -> anyhow::Result<Vec<QaPair>> {
    Ok(QaGenerator::new()?.generate(records))
}

/// One JSON object per line.
pub fn write_jsonl(path: &Path, pairs: &[QaPair]) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for pair in pairs {
        serde_json::to_writer(&mut writer, pair)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    info!(path = %path.display(), pairs = pairs.len(), "QA pairs written");
    Ok(())
}

pub fn read_jsonl(path: &Path) -> anyhow::Result<Vec<QaPair>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut pairs = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        pairs.push(
            serde_json::from_str(&line)
                .with_context(|| format!("{} line {}", path.display(), lineno + 1))?,
        );
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CodeRecord {
        CodeRecord {
            repo_name: "utils".to_string(),
            filepath: "utils/io.py".to_string(),
            function_name: "load".to_string(),
            code_chunk: "def load(self, path):\n    data = read_file(path)\n    rows = self.parser.parse(data)  # parse\n    return rows".to_string(),
            variables: vec!["self".into(), "path".into(), "data".into(), "rows".into()],
            docstring: None,
        }
    }

    #[test]
    fn finds_calls_but_not_the_definition() {
        let generator = QaGenerator::new().unwrap();
        assert_eq!(
            generator.external_calls(&record()),
            vec!["read_file", "self.parser.parse"]
        );
    }

    #[test]
    fn calls_inside_strings_are_ignored() {
        let generator = QaGenerator::new().unwrap();
        let record = CodeRecord {
            code_chunk: "def report(x):\n    \"\"\"Calls helper(x) eventually.\"\"\"\n    print(\"see foo(x)\")  # or bar(x)\n    return helper(x)".to_string(),
            ..record()
        };
        assert_eq!(generator.external_calls(&record), vec!["print", "helper"]);
    }

    #[test]
    fn output_answer_lists_returned_values() {
        let generator = QaGenerator::new().unwrap();
        assert_eq!(
            generator.output_answer(&record()),
            "Based on the code, the function returns: rows"
        );
    }

    #[test]
    fn training_text_requires_a_real_answer() {
        let answered = QaPair::new("Q?".into(), Some("A.".into()), "");
        assert_eq!(answered.training_text().unwrap(), "Question: Q?\nAnswer: A.");
        let pending = QaPair::placeholder("Q?".into(), "");
        assert!(pending.needs_completion());
        assert!(pending.training_text().is_none());
        assert!(QaPair::new("Q?".into(), None, "").training_text().is_none());
    }
}
