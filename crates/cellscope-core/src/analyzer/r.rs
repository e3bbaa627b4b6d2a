//! R cell extraction.
//!
//! Line-oriented regex heuristics, in the same spirit as the regex scanners
//! used for languages without a bundled grammar: assignments (`<-`, `<<-`,
//! `=`, `->`), function assignments, identifier reads on right-hand sides,
//! and the common readers/writers with a literal path.

use std::sync::LazyLock;

use regex::Regex;

use crate::analyzer::{FactSet, KernelParser};
use crate::errors::AnalysisError;
use crate::models::CellFacts;

static LEFT_ASSIGN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z.][A-Za-z0-9._]*)\s*(<<-|<-|=)(.*)$").unwrap()
});

static RIGHT_ASSIGN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)->>?\s*([A-Za-z.][A-Za-z0-9._]*)\s*$").unwrap());

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z.][A-Za-z0-9._]*").unwrap());

static STRING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).unwrap());

static MEMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[$@][A-Za-z.][A-Za-z0-9._]*").unwrap());

static NAMED_ARG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([(,]\s*)[A-Za-z.][A-Za-z0-9._]*\s*=([^=]|$)").unwrap());

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9][0-9._eEL]*").unwrap());

static READ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\b(?:read\.csv|read\.csv2|read_csv|read\.delim|read\.table|readRDS|read_excel|fread|nc_open)\s*\(\s*["']([^"']+)["']"#,
    )
    .unwrap()
});

static WRITE_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:write\.csv|write\.csv2|write_csv|write\.table|saveRDS|fwrite|ggsave|png|pdf)\s*\(([^)]*)",
    )
    .unwrap()
});

static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z.][A-Za-z0-9._]*)\s*\(").unwrap());

static FUNCTION_PARAMS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*function\s*\(([^)]*)\)").unwrap());

static FIRST_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).unwrap());

const R_RESERVED: &[&str] = &[
    "if", "else", "repeat", "while", "function", "for", "in", "next", "break", "TRUE", "FALSE",
    "NULL", "Inf", "NaN", "NA", "NA_integer_", "NA_real_", "NA_character_", "T", "F", "return",
];

/// Regex-based parser for R kernels (`ir`, `r`, `ark`, ...).
pub struct RParser;

impl KernelParser for RParser {
    fn family(&self) -> &'static str {
        "r"
    }

    fn handles(&self, kernel: &str) -> bool {
        kernel == "r" || kernel == "ir" || kernel == "ark" || kernel.starts_with("r-")
    }

    fn extension(&self) -> &'static str {
        "R"
    }

    fn parse(&self, source: &str) -> Result<CellFacts, AnalysisError> {
        check_balance(source)?;
        let mut facts = FactSet::default();
        for raw in source.lines() {
            let line = strip_comment(raw);
            if line.trim().is_empty() {
                continue;
            }
            collect_file_io(line, &mut facts);
            scan_line(line, &mut facts);
        }
        Ok(facts.into_facts())
    }
}

/// Drop a trailing `#` comment that is not inside a string literal.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '#') => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Unbalanced brackets are the only syntax errors the heuristics detect.
fn check_balance(source: &str) -> Result<(), AnalysisError> {
    let mut depth: i64 = 0;
    let mut last_line = 0;
    for (n, raw) in source.lines().enumerate() {
        let code = STRING_RE.replace_all(strip_comment(raw), "\"\"");
        for c in code.chars() {
            match c {
                '(' | '{' | '[' => depth += 1,
                ')' | '}' | ']' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Err(AnalysisError::Syntax {
                    line: n + 1,
                    column: 1,
                });
            }
        }
        last_line = n + 1;
    }
    if depth != 0 {
        return Err(AnalysisError::Syntax {
            line: last_line.max(1),
            column: 1,
        });
    }
    Ok(())
}

fn collect_file_io(line: &str, facts: &mut FactSet) {
    for cap in READ_RE.captures_iter(line) {
        facts.reads.insert(cap[1].to_string());
    }
    for cap in WRITE_CALL_RE.captures_iter(line) {
        if let Some(lit) = FIRST_LITERAL_RE.captures(&cap[1]) {
            facts.writes.insert(lit[1].to_string());
        }
    }
}

/// Identifiers read by an expression, ignoring strings, `$`/`@` members,
/// named-argument names, numbers, and reserved words.
fn expression_reads(expr: &str) -> Vec<String> {
    let no_strings = STRING_RE.replace_all(expr, " ");
    let no_members = MEMBER_RE.replace_all(&no_strings, " ");
    let no_named = NAMED_ARG_RE.replace_all(&no_members, "$1$2");
    let no_numbers = NUMBER_RE.replace_all(&no_named, " ");
    IDENT_RE
        .find_iter(&no_numbers)
        .map(|m| m.as_str())
        .filter(|s| !R_RESERVED.contains(s) && !is_dotted_literal(s))
        .map(str::to_string)
        .collect()
}

fn is_dotted_literal(token: &str) -> bool {
    let mut chars = token.chars();
    chars.next() == Some('.') && chars.next().is_none_or(|c| c == '.' || c.is_ascii_digit())
}

fn collect_calls(expr: &str, facts: &mut FactSet) {
    let code = STRING_RE.replace_all(expr, " ");
    for cap in CALL_RE.captures_iter(&code) {
        let name = &cap[1];
        if !R_RESERVED.contains(&name) {
            facts.calls.insert(name.to_string());
        }
    }
}

/// Parameter names of a `function(a, b = 1, ...)` header.
fn function_params(expr: &str) -> Vec<String> {
    let Some(cap) = FUNCTION_PARAMS_RE.captures(expr) else {
        return Vec::new();
    };
    cap[1]
        .split(',')
        .filter_map(|p| p.split('=').next())
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn scan_line(line: &str, facts: &mut FactSet) {
    if let Some(cap) = LEFT_ASSIGN_RE.captures(line) {
        let rest = &cap[3];
        // `x == y` is a comparison, not an assignment.
        if !(cap[2].eq("=") && rest.starts_with('=')) {
            let name = cap[1].to_string();
            let params = function_params(rest);
            collect_calls(rest, facts);
            for read in expression_reads(rest) {
                if !params.contains(&read) {
                    facts.read(&read);
                }
            }
            if rest.trim_start().starts_with("function") {
                facts.functions.insert(name);
            } else {
                facts.define(&name);
            }
            return;
        }
    }
    collect_calls(line, facts);
    if let Some(cap) = RIGHT_ASSIGN_RE.captures(line) {
        for read in expression_reads(&cap[1]) {
            facts.read(&read);
        }
        facts.define(&cap[2]);
        return;
    }
    for read in expression_reads(line) {
        facts.read(&read);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(src: &str) -> CellFacts {
        RParser.parse(src).expect("parse should succeed")
    }

    #[test]
    fn test_left_and_right_assignment() {
        let f = facts("fit <- lm(y ~ x, data = df)\nsummary(fit) -> s\n");
        assert_eq!(f.vars_defined, vec!["fit", "s"]);
        assert_eq!(f.vars_used, vec!["lm", "y", "x", "df", "summary"]);
    }

    #[test]
    fn test_function_assignment_and_call() {
        let f = facts("scale2 <- function(v) v * 2\nout = scale2(values)\n");
        assert_eq!(f.functions_defined, vec!["scale2"]);
        assert!(f.vars_defined.contains(&"scale2".to_string()));
        assert!(f.vars_defined.contains(&"out".to_string()));
        assert!(!f.vars_used.contains(&"scale2".to_string()));
        assert!(f.vars_used.contains(&"values".to_string()));
        assert!(!f.vars_used.contains(&"v".to_string()));
    }

    #[test]
    fn test_calls_are_recorded_for_free_names() {
        let f = facts("m <- mean(values)
print(m)
");
        assert_eq!(f.func_calls, vec!["mean", "print"]);
    }

    #[test]
    fn test_comparison_is_not_assignment() {
        let f = facts("flag == TRUE\n");
        assert!(f.vars_defined.is_empty());
        assert_eq!(f.vars_used, vec!["flag"]);
    }

    #[test]
    fn test_file_io_literals() {
        let f = facts(
            "df <- read.csv(\"data/in.csv\")\nwrite.csv(df, 'out.csv', row.names = FALSE)\nsaveRDS(model, \"m.rds\") # keep\n",
        );
        assert_eq!(f.files_read, vec!["data/in.csv"]);
        assert_eq!(f.files_written, vec!["out.csv", "m.rds"]);
    }

    #[test]
    fn test_members_strings_and_comments_are_not_reads() {
        let f = facts("total <- df$amount + 1 # uses df only\nlabel <- \"hello world\"\n");
        assert_eq!(f.vars_used, vec!["df"]);
    }

    #[test]
    fn test_unbalanced_brackets_are_syntax_errors() {
        let err = RParser.parse("f <- function(x) {\n  x + 1\n").unwrap_err();
        assert!(matches!(err, AnalysisError::Syntax { .. }));
    }
}
