//! Python cell extraction on top of tree-sitter-python.
//!
//! Definitions are module-level bindings; uses are free reads, i.e. names
//! read before the cell binds them. Reads inside function and lambda bodies
//! are resolved once the whole cell has been walked, since they execute at
//! call time.

use std::collections::HashSet;

use indexmap::IndexSet;
use tree_sitter::{Node, Parser};

use crate::analyzer::{FactSet, KernelParser};
use crate::errors::AnalysisError;
use crate::models::CellFacts;

/// Methods that write their first argument regardless of receiver.
const WRITE_METHODS: &[&str] = &[
    "to_csv",
    "to_parquet",
    "to_netcdf",
    "to_json",
    "to_feather",
    "to_excel",
    "to_pickle",
    "to_hdf",
    "savefig",
];

/// Module aliases whose reader functions are recognised.
const READ_MODULES: &[&str] = &["pd", "pandas", "xr", "xarray", "np", "numpy"];

const READ_FUNCTIONS: &[&str] = &[
    "read_csv",
    "read_json",
    "read_parquet",
    "read_excel",
    "read_feather",
    "read_pickle",
    "read_hdf",
    "open_dataset",
    "open_mfdataset",
    "load",
    "loadtxt",
    "genfromtxt",
];

const NUMPY_MODULES: &[&str] = &["np", "numpy"];

const NUMPY_WRITERS: &[&str] = &["save", "savez", "savetxt"];

/// Keyword names that carry a path when not passed positionally.
const PATH_KEYWORDS: &[&str] = &["path_or_buf", "path", "filepath_or_buffer", "fname", "file"];

/// tree-sitter-python backed parser; the fallback for unknown kernels.
pub struct PythonParser;

impl KernelParser for PythonParser {
    fn family(&self) -> &'static str {
        "python"
    }

    fn handles(&self, kernel: &str) -> bool {
        kernel.starts_with("python")
            || kernel.starts_with("xpython")
            || kernel.starts_with("pyodide")
            || kernel == "ipykernel"
            || kernel == "sos"
    }

    fn extension(&self) -> &'static str {
        "py"
    }

    fn parse(&self, source: &str) -> Result<CellFacts, AnalysisError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| AnalysisError::ParserInit(e.to_string()))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| AnalysisError::ParserInit("parser produced no tree".to_string()))?;

        let root = tree.root_node();
        if root.has_error() {
            let (line, column) = first_error(root).unwrap_or((1, 1));
            return Err(AnalysisError::Syntax { line, column });
        }

        let mut walker = Walker::new(source.as_bytes());
        walker.visit(root);
        Ok(walker.finish())
    }
}

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// 1-based position of the first ERROR or MISSING node.
fn first_error(node: Node<'_>) -> Option<(usize, usize)> {
    if node.is_error() || node.is_missing() {
        let p = node.start_position();
        return Some((p.row + 1, p.column + 1));
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error() || c.is_missing())
        .find_map(first_error)
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

struct Walker<'s> {
    src: &'s [u8],
    facts: FactSet,
    scopes: Vec<HashSet<String>>,
    deferred_depth: usize,
    deferred_reads: IndexSet<String>,
}

impl<'s> Walker<'s> {
    fn new(src: &'s [u8]) -> Self {
        Self {
            src,
            facts: FactSet::default(),
            scopes: Vec::new(),
            deferred_depth: 0,
            deferred_reads: IndexSet::new(),
        }
    }

    fn text(&self, node: Node<'_>) -> &'s str {
        node.utf8_text(self.src).unwrap_or("")
    }

    fn finish(mut self) -> CellFacts {
        for name in std::mem::take(&mut self.deferred_reads) {
            self.facts.read(&name);
        }
        self.facts.into_facts()
    }

    fn at_module_level(&self) -> bool {
        self.scopes.is_empty()
    }

    fn bind(&mut self, name: &str) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.to_string());
            }
            None => self.facts.define(name),
        }
    }

    fn read(&mut self, name: &str) {
        if name.is_empty() || self.scopes.iter().any(|s| s.contains(name)) {
            return;
        }
        if self.deferred_depth > 0 {
            self.deferred_reads.insert(name.to_string());
        } else {
            self.facts.read(name);
        }
    }

    fn visit_children(&mut self, node: Node<'_>) {
        for child in named_children(node) {
            self.visit(child);
        }
    }

    fn visit(&mut self, node: Node<'_>) {
        match node.kind() {
            "comment" | "global_statement" | "nonlocal_statement" => {}
            "identifier" => {
                let name = self.text(node);
                self.read(name);
            }
            "function_definition" => self.visit_function(node),
            "class_definition" => self.visit_class(node),
            "lambda" => self.visit_lambda(node),
            "list_comprehension"
            | "set_comprehension"
            | "dictionary_comprehension"
            | "generator_expression" => self.visit_comprehension(node),
            "assignment" => self.visit_assignment(node),
            "augmented_assignment" => {
                if let Some(right) = node.child_by_field_name("right") {
                    self.visit(right);
                }
                if let Some(left) = node.child_by_field_name("left") {
                    self.mutate_target(left);
                }
            }
            "named_expression" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.visit(value);
                }
                if let Some(name) = node.child_by_field_name("name") {
                    self.bind_target(name);
                }
            }
            "for_statement" => {
                if let Some(right) = node.child_by_field_name("right") {
                    self.visit(right);
                }
                if let Some(left) = node.child_by_field_name("left") {
                    self.bind_target(left);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit(body);
                }
                if let Some(alt) = node.child_by_field_name("alternative") {
                    self.visit(alt);
                }
            }
            "as_pattern" => {
                let alias = node.child_by_field_name("alias");
                for child in named_children(node) {
                    if Some(child) != alias {
                        self.visit(child);
                    }
                }
                if let Some(alias) = alias {
                    self.bind_target(alias);
                }
            }
            "import_statement" => self.visit_import(node, None),
            "import_from_statement" => {
                let module = node.child_by_field_name("module_name");
                self.visit_import(node, module);
            }
            "call" => self.visit_call(node),
            "attribute" => {
                if let Some(object) = node.child_by_field_name("object") {
                    self.visit(object);
                }
            }
            "keyword_argument" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.visit(value);
                }
            }
            _ => self.visit_children(node),
        }
    }

    // -- binding positions ----------------------------------------------------

    fn bind_target(&mut self, node: Node<'_>) {
        match node.kind() {
            "identifier" => {
                let name = self.text(node);
                self.bind(name);
            }
            "pattern_list"
            | "tuple_pattern"
            | "list_pattern"
            | "tuple"
            | "list"
            | "expression_list"
            | "parenthesized_expression"
            | "list_splat_pattern"
            | "list_splat" => {
                for child in named_children(node) {
                    self.bind_target(child);
                }
            }
            "as_pattern_target" => {
                let children = named_children(node);
                if children.is_empty() {
                    let name = self.text(node);
                    self.bind(name.trim());
                } else {
                    for child in children {
                        self.bind_target(child);
                    }
                }
            }
            "attribute" | "subscript" => self.mutate_target(node),
            _ => self.visit(node),
        }
    }

    /// `x += 1`, `df["c"] = ...`, `obj.attr = ...`: the root name is read
    /// and then rebound.
    fn mutate_target(&mut self, node: Node<'_>) {
        match node.kind() {
            "identifier" => {
                let name = self.text(node);
                self.read(name);
                self.bind(name);
            }
            "attribute" => {
                if let Some(object) = node.child_by_field_name("object") {
                    self.mutate_target(object);
                }
            }
            "subscript" => {
                let value = node.child_by_field_name("value");
                for child in named_children(node) {
                    if Some(child) != value {
                        self.visit(child);
                    }
                }
                if let Some(value) = value {
                    self.mutate_target(value);
                }
            }
            _ => self.bind_target(node),
        }
    }

    fn visit_assignment(&mut self, node: Node<'_>) {
        if let Some(annotation) = node.child_by_field_name("type") {
            self.visit(annotation);
        }
        // A bare annotation (`x: int`) binds nothing.
        let Some(right) = node.child_by_field_name("right") else {
            return;
        };
        self.visit(right);
        if let Some(left) = node.child_by_field_name("left") {
            self.bind_target(left);
        }
    }

    fn visit_import(&mut self, node: Node<'_>, module: Option<Node<'_>>) {
        for child in named_children(node) {
            if Some(child) == module {
                continue;
            }
            match child.kind() {
                "aliased_import" => {
                    if let Some(alias) = child.child_by_field_name("alias") {
                        let name = self.text(alias);
                        self.bind(name);
                    }
                }
                "dotted_name" => {
                    let dotted = self.text(child);
                    // `import a.b` binds `a`; `from m import a` binds `a`.
                    let bound = if module.is_some() {
                        dotted.rsplit('.').next()
                    } else {
                        dotted.split('.').next()
                    };
                    if let Some(name) = bound {
                        self.bind(name.trim());
                    }
                }
                _ => {}
            }
        }
    }

    // -- scopes -----------------------------------------------------------------

    fn collect_param_name(&self, node: Node<'_>, scope: &mut HashSet<String>) {
        if node.kind() == "identifier" {
            scope.insert(self.text(node).to_string());
            return;
        }
        for child in named_children(node) {
            self.collect_param_name(child, scope);
        }
    }

    /// Parameter names go into `scope`; defaults and annotations are read in
    /// the enclosing scope.
    fn visit_parameters(&mut self, params: Node<'_>, scope: &mut HashSet<String>) {
        for param in named_children(params) {
            match param.kind() {
                "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                    self.collect_param_name(param, scope);
                }
                "default_parameter" | "typed_default_parameter" => {
                    if let Some(name) = param.child_by_field_name("name") {
                        self.collect_param_name(name, scope);
                    }
                    if let Some(ty) = param.child_by_field_name("type") {
                        self.visit(ty);
                    }
                    if let Some(value) = param.child_by_field_name("value") {
                        self.visit(value);
                    }
                }
                "typed_parameter" => {
                    let ty = param.child_by_field_name("type");
                    for child in named_children(param) {
                        if Some(child) == ty {
                            self.visit(child);
                        } else {
                            self.collect_param_name(child, scope);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_deferred_body(&mut self, scope: HashSet<String>, body: Option<Node<'_>>) {
        self.scopes.push(scope);
        self.deferred_depth += 1;
        if let Some(body) = body {
            self.visit(body);
        }
        self.deferred_depth -= 1;
        self.scopes.pop();
    }

    fn visit_function(&mut self, node: Node<'_>) {
        let mut scope = HashSet::new();
        if let Some(params) = node.child_by_field_name("parameters") {
            self.visit_parameters(params, &mut scope);
        }
        if let Some(ret) = node.child_by_field_name("return_type") {
            self.visit(ret);
        }
        if let Some(name) = node.child_by_field_name("name") {
            let name = self.text(name);
            if self.at_module_level() {
                self.facts.functions.insert(name.to_string());
            } else {
                self.bind(name);
            }
        }
        self.visit_deferred_body(scope, node.child_by_field_name("body"));
    }

    fn visit_lambda(&mut self, node: Node<'_>) {
        let mut scope = HashSet::new();
        if let Some(params) = node.child_by_field_name("parameters") {
            self.visit_parameters(params, &mut scope);
        }
        self.visit_deferred_body(scope, node.child_by_field_name("body"));
    }

    fn visit_class(&mut self, node: Node<'_>) {
        if let Some(bases) = node.child_by_field_name("superclasses") {
            self.visit(bases);
        }
        self.scopes.push(HashSet::new());
        if let Some(body) = node.child_by_field_name("body") {
            self.visit(body);
        }
        self.scopes.pop();
        if let Some(name) = node.child_by_field_name("name") {
            let name = self.text(name);
            self.bind(name);
        }
    }

    fn visit_comprehension(&mut self, node: Node<'_>) {
        let children = named_children(node);
        let mut scope = HashSet::new();
        for clause in children.iter().filter(|c| c.kind() == "for_in_clause") {
            if let Some(left) = clause.child_by_field_name("left") {
                self.collect_param_name(left, &mut scope);
            }
        }
        self.scopes.push(scope);
        for child in children {
            if child.kind() == "for_in_clause" {
                let left = child.child_by_field_name("left");
                for part in named_children(child) {
                    if Some(part) != left {
                        self.visit(part);
                    }
                }
            } else {
                self.visit(child);
            }
        }
        self.scopes.pop();
    }

    // -- calls and file I/O -------------------------------------------------------

    fn visit_call(&mut self, node: Node<'_>) {
        let function = node.child_by_field_name("function");
        let args = node.child_by_field_name("arguments");
        if let (Some(function), Some(args)) = (function, args) {
            self.detect_file_io(function, args);
        }
        if let Some(function) = function {
            if function.kind() == "identifier" {
                let name = self.text(function).to_string();
                self.facts.calls.insert(name);
            }
            self.visit(function);
        }
        if let Some(args) = args {
            self.visit(args);
        }
    }

    fn string_literal(&self, node: Node<'_>) -> Option<String> {
        if node.kind() != "string" {
            return None;
        }
        let children = named_children(node);
        if children.iter().any(|c| c.kind() == "interpolation") {
            return None;
        }
        let start = children.iter().find(|c| c.kind() == "string_start");
        let end = children.iter().find(|c| c.kind() == "string_end");
        let value = match (start, end) {
            (Some(s), Some(e)) => {
                std::str::from_utf8(&self.src[s.end_byte()..e.start_byte()]).ok()?.to_string()
            }
            _ => self
                .text(node)
                .trim_start_matches(|c: char| c.is_ascii_alphabetic())
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string(),
        };
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    }

    fn positional_args<'t>(&self, args: Node<'t>) -> Vec<Node<'t>> {
        if args.kind() != "argument_list" {
            return Vec::new();
        }
        named_children(args)
            .into_iter()
            .filter(|a| {
                !matches!(
                    a.kind(),
                    "keyword_argument" | "comment" | "list_splat" | "dictionary_splat"
                )
            })
            .collect()
    }

    fn keyword_literal(&self, args: Node<'_>, names: &[&str]) -> Option<String> {
        if args.kind() != "argument_list" {
            return None;
        }
        named_children(args)
            .into_iter()
            .filter(|a| a.kind() == "keyword_argument")
            .find(|a| {
                a.child_by_field_name("name")
                    .is_some_and(|n| names.contains(&self.text(n)))
            })
            .and_then(|a| a.child_by_field_name("value"))
            .and_then(|v| self.string_literal(v))
    }

    fn detect_file_io(&mut self, function: Node<'_>, args: Node<'_>) {
        let positional = self.positional_args(args);
        let first = positional
            .first()
            .and_then(|a| self.string_literal(*a))
            .or_else(|| self.keyword_literal(args, PATH_KEYWORDS));

        match function.kind() {
            "identifier" if self.text(function) == "open" => {
                let Some(path) = first else { return };
                let mode = positional
                    .get(1)
                    .and_then(|a| self.string_literal(*a))
                    .or_else(|| self.keyword_literal(args, &["mode"]));
                let writes = mode.is_some_and(|m| m.chars().any(|c| matches!(c, 'w' | 'a' | 'x')));
                if writes {
                    self.facts.writes.insert(path);
                } else {
                    self.facts.reads.insert(path);
                }
            }
            "attribute" => {
                let Some(path) = first else { return };
                let Some(attr) = function.child_by_field_name("attribute") else {
                    return;
                };
                let method = self.text(attr);
                if WRITE_METHODS.contains(&method) {
                    self.facts.writes.insert(path);
                    return;
                }
                let Some(object) = function.child_by_field_name("object") else {
                    return;
                };
                if object.kind() != "identifier" {
                    return;
                }
                let module = self.text(object);
                if !READ_MODULES.contains(&module) {
                    return;
                }
                if READ_FUNCTIONS.contains(&method) {
                    self.facts.reads.insert(path);
                } else if NUMPY_MODULES.contains(&module) && NUMPY_WRITERS.contains(&method) {
                    self.facts.writes.insert(path);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(src: &str) -> CellFacts {
        PythonParser.parse(src).expect("parse should succeed")
    }

    #[test]
    fn test_assignment_defines_and_reads() {
        let f = facts("import pandas as pd\ndf = pd.read_csv('data/in.csv')\ntotal = df.sum()");
        assert_eq!(f.vars_defined, vec!["pd", "df", "total"]);
        assert!(f.vars_used.is_empty());
        assert_eq!(f.files_read, vec!["data/in.csv"]);
    }

    #[test]
    fn test_free_reads_only() {
        let f = facts("y = x + 1\nx = 2\nz = x");
        assert_eq!(f.vars_used, vec!["x"]);
        assert_eq!(f.vars_defined, vec!["y", "x", "z"]);
    }

    #[test]
    fn test_self_update_is_use_and_def() {
        let f = facts("count += 1\ndf['b'] = df['a'] * 2");
        assert_eq!(f.vars_used, vec!["count", "df"]);
        assert_eq!(f.vars_defined, vec!["count", "df"]);
    }

    #[test]
    fn test_tuple_unpacking_and_for_targets() {
        let f = facts("a, (b, c) = items\nfor i, row in enumerate(rows):\n    total = row");
        assert_eq!(f.vars_defined, vec!["a", "b", "c", "i", "row", "total"]);
        assert_eq!(f.vars_used, vec!["items", "enumerate", "rows"]);
    }

    #[test]
    fn test_function_locals_do_not_leak() {
        let f = facts(
            "def scale(values, factor=default_factor):\n    tmp = values * factor\n    return helper(tmp)\n",
        );
        assert_eq!(f.functions_defined, vec!["scale"]);
        assert_eq!(f.vars_defined, vec!["scale"]);
        assert_eq!(f.vars_used, vec!["default_factor", "helper"]);
    }

    #[test]
    fn test_function_body_reads_resolved_against_whole_cell() {
        let f = facts("def go():\n    return model.predict(X)\nmodel = build()\n");
        assert_eq!(f.vars_used, vec!["build", "X"]);
        assert!(f.vars_defined.contains(&"model".to_string()));
    }

    #[test]
    fn test_calls_of_own_functions_are_not_uses() {
        let f = facts("def helper():\n    return 1\nresult = helper()\nprint(result)");
        assert_eq!(f.vars_used, vec!["print"]);
        assert_eq!(f.func_calls, vec!["print"]);
    }

    #[test]
    fn test_comprehension_variables_are_local() {
        let f = facts("squares = [v * v for v in values if v > limit]");
        assert_eq!(f.vars_defined, vec!["squares"]);
        assert_eq!(f.vars_used, vec!["values", "limit"]);
    }

    #[test]
    fn test_lambda_parameters_are_local() {
        let f = facts("key = lambda item: item[offset]");
        assert_eq!(f.vars_used, vec!["offset"]);
    }

    #[test]
    fn test_imports_bind_names() {
        let f = facts("import os.path\nimport numpy as np\nfrom scipy import stats, signal as sg\n");
        assert_eq!(f.vars_defined, vec!["os", "np", "stats", "sg"]);
        assert!(f.vars_used.is_empty());
    }

    #[test]
    fn test_class_definition_binds_name_only() {
        let f = facts("class Model(Base):\n    scale = 2\n    def fit(self, x):\n        return x\n");
        assert_eq!(f.vars_defined, vec!["Model"]);
        assert_eq!(f.vars_used, vec!["Base"]);
        assert!(f.functions_defined.is_empty());
    }

    #[test]
    fn test_with_as_binds_handle() {
        let f = facts("with open('notes.txt') as fh:\n    text = fh.read()\n");
        assert_eq!(f.vars_defined, vec!["fh", "text"]);
        assert_eq!(f.files_read, vec!["notes.txt"]);
    }

    #[test]
    fn test_open_modes() {
        let f = facts(
            "open('a.txt', 'w')\nopen('b.txt', mode='a')\nopen('c.txt')\nopen('d.txt', 'rb')\n",
        );
        assert_eq!(f.files_written, vec!["a.txt", "b.txt"]);
        assert_eq!(f.files_read, vec!["c.txt", "d.txt"]);
    }

    #[test]
    fn test_writer_methods_and_readers() {
        let f = facts(
            "df.to_parquet('out/frame.parquet')\nfig.savefig(\"plot.png\")\nds = xr.open_dataset('sst.nc')\nnp.save('arr.npy', a)\narr = np.load('arr.npy')\n",
        );
        assert_eq!(
            f.files_written,
            vec!["out/frame.parquet", "plot.png", "arr.npy"]
        );
        assert_eq!(f.files_read, vec!["sst.nc", "arr.npy"]);
    }

    #[test]
    fn test_keyword_path_argument() {
        let f = facts("df.to_csv(path_or_buf='kw.csv', index=False)");
        assert_eq!(f.files_written, vec!["kw.csv"]);
    }

    #[test]
    fn test_non_literal_paths_are_ignored() {
        let f = facts("df.to_csv(out_path)\npd.read_csv(f'{base}/x.csv')\n");
        assert!(f.files_written.is_empty());
        assert!(f.files_read.is_empty());
    }

    #[test]
    fn test_annotation_without_value_binds_nothing() {
        let f = facts("threshold: float\nlimit: int = 3");
        assert_eq!(f.vars_defined, vec!["limit"]);
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let err = PythonParser.parse("x = 1\ny = (2 +\n").unwrap_err();
        assert!(matches!(err, AnalysisError::Syntax { .. }));
    }
}
