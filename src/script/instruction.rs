// Script instruction decoding (spec.md §6): one `name(arg1, arg2, …)`
// line becomes one [`Instruction`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, Result};

static INSTRUCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]+)\s*\(([^)]*)\)\s*$").expect("static regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Begin { txn: String },
    BeginRO { txn: String },
    Read { txn: String, var: String },
    Write { txn: String, var: String, value: i64 },
    End { txn: String },
    Fail { site: usize },
    Recover { site: usize },
    DumpAll,
    DumpSite { site: usize },
    DumpVariable { var: String },
}

impl Instruction {
    /// Parses one non-comment, non-blank script line.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let caps = INSTRUCTION_RE
            .captures(line)
            .ok_or_else(|| EngineError::ParseError(line.to_string()))?;
        let name = &caps[1];
        let args: Vec<&str> = caps[2].split(',').map(str::trim).filter(|s| !s.is_empty()).collect();

        let bad = || EngineError::ParseError(line.to_string());

        match name {
            "begin" => Ok(Instruction::Begin {
                txn: args.first().ok_or_else(bad)?.to_string(),
            }),
            "beginRO" => Ok(Instruction::BeginRO {
                txn: args.first().ok_or_else(bad)?.to_string(),
            }),
            "R" => {
                let txn = args.first().ok_or_else(bad)?.to_string();
                let var = args.get(1).ok_or_else(bad)?.to_string();
                Ok(Instruction::Read { txn, var })
            }
            "W" => {
                let txn = args.first().ok_or_else(bad)?.to_string();
                let var = args.get(1).ok_or_else(bad)?.to_string();
                let value: i64 = args.get(2).ok_or_else(bad)?.parse().map_err(|_| bad())?;
                Ok(Instruction::Write { txn, var, value })
            }
            "end" => Ok(Instruction::End {
                txn: args.first().ok_or_else(bad)?.to_string(),
            }),
            "fail" => {
                let site: usize = args.first().ok_or_else(bad)?.parse().map_err(|_| bad())?;
                Ok(Instruction::Fail { site })
            }
            "recover" => {
                let site: usize = args.first().ok_or_else(bad)?.parse().map_err(|_| bad())?;
                Ok(Instruction::Recover { site })
            }
            "dump" => match args.first() {
                None => Ok(Instruction::DumpAll),
                Some(arg) if arg.starts_with('x') => Ok(Instruction::DumpVariable { var: arg.to_string() }),
                Some(arg) => {
                    let site: usize = arg.parse().map_err(|_| bad())?;
                    Ok(Instruction::DumpSite { site })
                }
            },
            _ => Err(bad()),
        }
    }
}

/// Splits a script body into instruction lines: semicolon-separated,
/// `//`-comments and blank lines dropped, whitespace around tokens
/// insignificant.
pub fn split_statements(script: &str) -> Vec<String> {
    script
        .lines()
        .map(strip_comment)
        .collect::<Vec<_>>()
        .join(" ")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}
