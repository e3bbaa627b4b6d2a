//! Criterion benchmarks for cellscope-core.
//!
//! ## Benchmark groups
//!
//! 1. **analysis**: per-cell fact extraction for the Python and R parsers.
//! 2. **inference**: edge inference over synthetic notebooks.
//! 3. **triples**: metadata construction, flattening and rendering.
//! 4. **schema**: hint store DDL and migration.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/cellscope-core/Cargo.toml
//! # Run only the inference group:
//! cargo bench --manifest-path crates/cellscope-core/Cargo.toml -- inference
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusqlite::Connection;

use _cellscope_core::analyzer::CellAnalyzer;
use _cellscope_core::export::CrateBuilder;
use _cellscope_core::graph::{infer, merge};
use _cellscope_core::index::{flatten, render_insert};
use _cellscope_core::models::{Cell, ReviewHints};
use _cellscope_core::notebook::NotebookCell;
use _cellscope_core::store::schema::{init_schema, migrate_schema};

const PYTHON_CELL: &str = r#"
import pandas as pd
import numpy as np

def normalise(frame, column):
    mean = frame[column].mean()
    return frame.assign(z=(frame[column] - mean) / frame[column].std())

df = pd.read_csv("data/raw.csv")
df = normalise(df, "value")
summary = df.groupby("site").agg({"z": "mean"})
summary.to_csv("results/summary.csv")
with open("results/log.txt", "w") as fh:
    fh.write(str(len(df)))
"#;

const R_CELL: &str = r#"
raw <- read.csv("results/summary.csv")
scaled <- function(x) { (x - mean(x)) / sd(x) }
raw$z2 <- scaled(raw$z)
write.csv(raw, "results/scaled.csv")
"#;

/// `n` cells chaining `v{i}` from the previous cell, with a file hand-off
/// every fourth cell and an R cell every seventh.
fn synthetic_cells(n: usize) -> Vec<NotebookCell> {
    (0..n)
        .map(|i| {
            let (kernel, source) = if i % 7 == 6 {
                ("ir", format!("v{i} <- v{} + 1\n", i.saturating_sub(1)))
            } else if i % 4 == 3 {
                (
                    "python3",
                    format!(
                        "v{i} = v{}.copy()\nv{i}.to_csv('step_{i}.csv')\n",
                        i.saturating_sub(1)
                    ),
                )
            } else {
                (
                    "python3",
                    format!(
                        "import pandas as pd\nv{i} = pd.read_csv('step_{}.csv') if {i} > 4 else v{}\n",
                        i.saturating_sub(i % 4 + 1),
                        i.saturating_sub(1)
                    ),
                )
            };
            NotebookCell {
                index: i,
                kernel: kernel.to_string(),
                source,
            }
        })
        .collect()
}

fn analyzed(n: usize) -> Vec<Cell> {
    CellAnalyzer::new().analyze_cells(&synthetic_cells(n))
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_analysis(c: &mut Criterion) {
    let analyzer = CellAnalyzer::new();
    let mut group = c.benchmark_group("analysis");

    group.bench_function("python_cell", |b| {
        b.iter(|| analyzer.analyze_cell(black_box(PYTHON_CELL), "python3"))
    });
    group.bench_function("r_cell", |b| {
        b.iter(|| analyzer.analyze_cell(black_box(R_CELL), "ir"))
    });

    for n in [10usize, 100, 500] {
        let cells = synthetic_cells(n);
        group.bench_with_input(BenchmarkId::new("notebook", n), &cells, |b, cells| {
            b.iter(|| analyzer.analyze_cells(black_box(cells)))
        });
    }
    group.finish();
}

fn bench_inference(c: &mut Criterion) {
    let mut group = c.benchmark_group("inference");
    for n in [10usize, 100, 500] {
        let cells = analyzed(n);
        group.bench_with_input(BenchmarkId::new("infer", n), &cells, |b, cells| {
            b.iter(|| infer(black_box(cells.clone())))
        });
    }
    group.finish();
}

fn bench_triples(c: &mut Criterion) {
    let mut group = c.benchmark_group("triples");
    let builder = CrateBuilder::new().with_renderer(None);
    let hints = ReviewHints::default();

    for n in [10usize, 100] {
        let graph = infer(analyzed(n));
        let annotated = merge(&graph, &hints);
        group.bench_with_input(BenchmarkId::new("metadata", n), &annotated, |b, annotated| {
            b.iter(|| builder.metadata(black_box(annotated), false))
        });

        let doc = builder.metadata(&annotated, false);
        group.bench_with_input(BenchmarkId::new("flatten", n), &doc, |b, doc| {
            b.iter(|| flatten(black_box(doc), "https://example.org/crate/"))
        });

        let triples = flatten(&doc, "https://example.org/crate/");
        group.bench_with_input(BenchmarkId::new("render_insert", n), &triples, |b, triples| {
            b.iter(|| render_insert(black_box(triples)))
        });
    }
    group.finish();
}

fn bench_schema(c: &mut Criterion) {
    c.bench_function("schema_init_and_migrate", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().unwrap();
            init_schema(&conn).unwrap();
            migrate_schema(&conn).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_analysis,
    bench_inference,
    bench_triples,
    bench_schema
);
criterion_main!(benches);
