//! Bundle writer.
//!
//! Every build gets a fresh run directory named after the current UTC time.
//! The crate is assembled in `ro-crate.partial/` and renamed into place only
//! once every file is written, so a reader never sees a half-built crate.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::analyzer::{file_key, normalize_path, KernelRegistry};
use crate::errors::{CellscopeError, CellscopeResult};
use crate::export::graphml::render_graphml;
use crate::export::jsonld::{
    CrateEntity, MetadataDocument, PropertyValue, ACTIVITY_TYPE, DATA_TYPE, DEPENDENCY_TYPE,
    EDGE_ID_PREFIX, FILE_ID_PREFIX, METADATA_FILE, RO_CRATE_PROFILE, SYMBOL_TYPE, USAGE_ID_PREFIX,
    USAGE_TYPE, VARIABLE_ID_PREFIX,
};
use crate::export::sidecar::Sidecar;
use crate::export::visualize::{default_renderer, Renderer};
use crate::graph::AnnotatedGraph;
use crate::models::{Cell, EdgeKind, HintValue};

pub const CRATE_DIR_NAME: &str = "ro-crate";
pub const PARTIAL_DIR_NAME: &str = "ro-crate.partial";
pub const CELLS_DIR_NAME: &str = "cells";
pub const GRAPHML_FILE: &str = "cell_graph.graphml";
pub const HTML_FILE: &str = "cell_graph.html";
pub const INDEX_DIR_NAME: &str = "index";
pub const DELTA_FILE: &str = "last_update.sparql";

/// Role of a file input when no hint names one.
pub const DEFAULT_FILE_ROLE: &str = "dataset";

const MAX_RUN_DIR_ATTEMPTS: u32 = 10_000;

/// Outcome of the best-effort visualization step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum VisualizationStatus {
    Written(PathBuf),
    Skipped(String),
}

/// A written bundle.
#[derive(Clone, Debug, PartialEq)]
pub struct Bundle {
    pub run_dir: PathBuf,
    pub crate_dir: PathBuf,
    pub metadata: MetadataDocument,
    pub visualization: VisualizationStatus,
}

impl Bundle {
    pub fn metadata_path(&self) -> PathBuf {
        self.crate_dir.join(METADATA_FILE)
    }

    /// `<run>/index/last_update.sparql`.
    pub fn default_delta_path(&self) -> PathBuf {
        self.run_dir.join(INDEX_DIR_NAME).join(DELTA_FILE)
    }
}

/// Reload a bundle written earlier, e.g. to re-index it.
pub fn open_bundle(crate_dir: &Path) -> CellscopeResult<Bundle> {
    let metadata_path = crate_dir.join(METADATA_FILE);
    let payload = fs::read_to_string(&metadata_path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => {
            CellscopeError::NotFound(format!("crate metadata {}", metadata_path.display()))
        }
        _ => CellscopeError::Io(e),
    })?;
    let metadata: MetadataDocument = serde_json::from_str(&payload)
        .map_err(|e| CellscopeError::Validation(format!("malformed crate metadata: {e}")))?;
    let html = crate_dir.join(HTML_FILE);
    let visualization = if html.is_file() {
        VisualizationStatus::Written(html)
    } else {
        VisualizationStatus::Skipped("not present in bundle".to_string())
    };
    Ok(Bundle {
        run_dir: crate_dir.parent().unwrap_or(crate_dir).to_path_buf(),
        crate_dir: crate_dir.to_path_buf(),
        metadata,
        visualization,
    })
}

/// `run-YYYYMMDDTHHMMSS.ffffffZ`.
pub fn run_id(now: DateTime<Utc>) -> String {
    format!("run-{}", now.format("%Y%m%dT%H%M%S%.6fZ"))
}

/// Create a run directory that did not exist before this call.
pub fn create_run_dir(out_dir: &Path) -> CellscopeResult<PathBuf> {
    fs::create_dir_all(out_dir)?;
    let base = run_id(Utc::now());
    for attempt in 0..MAX_RUN_DIR_ATTEMPTS {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{base}-{attempt}")
        };
        let candidate = out_dir.join(name);
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(CellscopeError::Export(format!(
        "could not allocate a run directory under {}",
        out_dir.display()
    )))
}

pub fn variable_id(name: &str) -> String {
    format!("{VARIABLE_ID_PREFIX}{name}")
}

pub fn file_id(base_name: &str) -> String {
    format!("{FILE_ID_PREFIX}{base_name}")
}

fn encoding_format(extension: &str) -> &'static str {
    match extension {
        "py" => "text/x-python",
        "R" => "text/x-r",
        _ => "text/plain",
    }
}

fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hex SHA-256 of a file on disk, if it can be read.
fn file_sha256(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    let mut hasher = Sha256::new();
    match File::open(path).and_then(|mut f| io::copy(&mut f, &mut hasher)) {
        Ok(_) => Some(format!("{:x}", hasher.finalize())),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "could not hash referenced file");
            None
        }
    }
}

/// Record a qualified usage of `entity_id` by `activity`.
fn add_usage(
    usages: &mut IndexMap<String, CrateEntity>,
    activity: &mut CrateEntity,
    cell_index: usize,
    entity_id: &str,
    role: &str,
) {
    let id = format!(
        "{USAGE_ID_PREFIX}{cell_index}-{}",
        entity_id.trim_start_matches('#')
    );
    activity.push("prov:qualifiedUsage", PropertyValue::reference(id.clone()));
    usages.entry(id.clone()).or_insert_with(|| {
        let mut usage = CrateEntity::new(id, &[USAGE_TYPE]);
        usage.set("prov:entity", PropertyValue::reference(entity_id));
        usage.set("prov:hadRole", PropertyValue::text(role));
        usage
    });
}

fn hint_value(value: &HintValue) -> PropertyValue {
    match value {
        HintValue::One(v) => PropertyValue::text(v.clone()),
        HintValue::Many(vs) => PropertyValue::List(vs.iter().cloned().map(PropertyValue::Text).collect()),
    }
}

fn label_target(kind: EdgeKind, label: &str) -> String {
    match kind {
        EdgeKind::File => file_id(label),
        EdgeKind::Variable | EdgeKind::CrossKernel => variable_id(label),
    }
}

/// Serialises an annotated graph into an RO-Crate bundle.
pub struct CrateBuilder {
    registry: KernelRegistry,
    renderer: Option<Box<dyn Renderer>>,
    notebook_dir: Option<PathBuf>,
    name: Option<String>,
    sidecars: Vec<Sidecar>,
}

impl Default for CrateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CrateBuilder {
    pub fn new() -> Self {
        Self {
            registry: KernelRegistry::with_defaults(),
            renderer: default_renderer(),
            notebook_dir: None,
            name: None,
            sidecars: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: KernelRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the renderer; `None` disables visualization.
    pub fn with_renderer(mut self, renderer: Option<Box<dyn Renderer>>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Directory relative file paths are resolved against.
    pub fn with_notebook_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.notebook_dir = dir;
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_sidecars(mut self, sidecars: Vec<Sidecar>) -> Self {
        self.sidecars = sidecars;
        self
    }

    /// Bundle-relative path of a cell's source file.
    pub fn activity_id(&self, cell: &Cell) -> String {
        format!(
            "{CELLS_DIR_NAME}/cell_{}.{}",
            cell.index,
            self.registry.lookup(&cell.kernel).extension()
        )
    }

    fn content_path(&self, raw: &str) -> String {
        match &self.notebook_dir {
            Some(dir) if !Path::new(raw).is_absolute() && !dir.as_os_str().is_empty() => {
                normalize_path(&dir.join(raw).to_string_lossy())
            }
            _ => normalize_path(raw),
        }
    }

    /// Write a new bundle under a fresh run directory inside `out_dir`.
    pub fn build(&self, annotated: &AnnotatedGraph<'_>, out_dir: &Path) -> CellscopeResult<Bundle> {
        let run_dir = create_run_dir(out_dir)?;
        let partial = run_dir.join(PARTIAL_DIR_NAME);
        let crate_dir = run_dir.join(CRATE_DIR_NAME);

        match self.write_partial(annotated, &partial, &crate_dir) {
            Ok((metadata, visualization)) => {
                fs::rename(&partial, &crate_dir)?;
                info!(
                    crate_dir = %crate_dir.display(),
                    entities = metadata.graph.len(),
                    "wrote provenance bundle"
                );
                Ok(Bundle {
                    run_dir,
                    crate_dir,
                    metadata,
                    visualization,
                })
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&partial);
                let _ = fs::remove_dir(&run_dir);
                Err(e)
            }
        }
    }

    fn write_partial(
        &self,
        annotated: &AnnotatedGraph<'_>,
        partial: &Path,
        crate_dir: &Path,
    ) -> CellscopeResult<(MetadataDocument, VisualizationStatus)> {
        let graph = annotated.graph();
        fs::create_dir(partial)?;
        fs::create_dir(partial.join(CELLS_DIR_NAME))?;

        for cell in graph.cells() {
            fs::write(partial.join(self.activity_id(cell)), &cell.source)?;
        }
        fs::write(partial.join(GRAPHML_FILE), render_graphml(graph)?)?;

        let visualization = match &self.renderer {
            None => {
                warn!("visualization renderer unavailable; skipping graph view");
                VisualizationStatus::Skipped("renderer unavailable".to_string())
            }
            Some(renderer) => {
                let title = self.name.as_deref().unwrap_or("Notebook provenance");
                match renderer
                    .render(graph, title)
                    .and_then(|html| Ok(fs::write(partial.join(HTML_FILE), html)?))
                {
                    Ok(()) => VisualizationStatus::Written(crate_dir.join(HTML_FILE)),
                    Err(e) => {
                        warn!(error = %e, "graph view rendering failed; skipping");
                        VisualizationStatus::Skipped(e.to_string())
                    }
                }
            }
        };

        let with_view = matches!(visualization, VisualizationStatus::Written(_));
        let metadata = self.metadata(annotated, with_view);
        fs::write(partial.join(METADATA_FILE), metadata.to_json_pretty()?)?;
        debug!(path = %partial.display(), "bundle files written");
        Ok((metadata, visualization))
    }

    /// Build the metadata document. Deterministic in its inputs and the
    /// contents of the files it references.
    pub fn metadata(&self, annotated: &AnnotatedGraph<'_>, with_view: bool) -> MetadataDocument {
        let graph = annotated.graph();
        let cells = graph.cells();
        let activity_ids: Vec<String> = cells.iter().map(|c| self.activity_id(c)).collect();

        let mut activities: Vec<CrateEntity> = cells
            .iter()
            .zip(&activity_ids)
            .map(|(cell, id)| self.activity_entity(annotated, cell, id))
            .collect();

        let mut usages: IndexMap<String, CrateEntity> = IndexMap::new();
        for edge in graph.edges() {
            let Some(activity) = activities.get_mut(edge.target) else {
                continue;
            };
            for label in &edge.labels {
                let target_id = label_target(edge.kind, label);
                let target = PropertyValue::reference(target_id.clone());
                activity.push("oflow:hasInput", target.clone());
                activity.push("prov:used", target);
                let role = match edge.kind {
                    EdgeKind::Variable => annotated.role(label),
                    EdgeKind::File => Some(annotated.file_role(label).unwrap_or(DEFAULT_FILE_ROLE)),
                    EdgeKind::CrossKernel => None,
                };
                if let Some(role) = role {
                    add_usage(&mut usages, activity, cells[edge.target].index, &target_id, role);
                }
            }
            if edge.kind == EdgeKind::CrossKernel {
                activity.push("oflow:via", PropertyValue::text(edge.mechanism.clone()));
            }
        }

        let position = |index: usize| cells.iter().position(|c| c.index == index);
        let mut sidecars = Vec::with_capacity(self.sidecars.len());
        for sidecar in &self.sidecars {
            let id = sidecar.entity_id();
            let mut entity = CrateEntity::new(id.clone(), &[sidecar.entity_type().as_str()]);
            entity.set("name", PropertyValue::text(sidecar.display_name()));
            entity.set("version", PropertyValue::text("1"));
            if let Some(producer) = sidecar.producer {
                match position(producer) {
                    Some(pos) => {
                        activities[pos].push("oflow:hasOutput", PropertyValue::reference(id.clone()));
                        entity.push(
                            "prov:wasGeneratedBy",
                            PropertyValue::reference(activity_ids[pos].clone()),
                        );
                    }
                    None => warn!(sidecar = %id, cell = producer, "sidecar producer is not a code cell"),
                }
            }
            for &consumer in &sidecar.consumers {
                let Some(pos) = position(consumer) else {
                    warn!(sidecar = %id, cell = consumer, "sidecar consumer is not a code cell");
                    continue;
                };
                let activity = &mut activities[pos];
                let target = PropertyValue::reference(id.clone());
                activity.push("oflow:hasInput", target.clone());
                activity.push("prov:used", target);
                if let Some(role) = &sidecar.role {
                    add_usage(&mut usages, activity, consumer, &id, role);
                }
            }
            sidecars.push(entity);
        }

        let functions: BTreeSet<&str> = cells
            .iter()
            .flat_map(|c| c.facts.functions_defined.iter().map(String::as_str))
            .collect();

        let variables = annotated.variables().iter().map(|name| {
            let is_symbol = functions.contains(name.as_str());
            let ty = if is_symbol { SYMBOL_TYPE } else { DATA_TYPE };
            let mut entity = CrateEntity::new(variable_id(name), &[ty]);
            entity.set("name", PropertyValue::text(name.clone()));
            entity.set("version", PropertyValue::text("1"));
            for (cell, id) in cells.iter().zip(&activity_ids) {
                if cell.facts.defines(name) {
                    entity.push("prov:wasGeneratedBy", PropertyValue::reference(id.clone()));
                }
            }
            if let Some(role) = annotated.role(name) {
                entity.set("prov:hadRole", PropertyValue::text(role));
            }
            if is_symbol {
                entity.set("category", PropertyValue::text("function"));
            }
            entity
        });

        let files = annotated.files().iter().map(|base| {
            let mut entity = CrateEntity::new(file_id(base), &[DATA_TYPE]);
            entity.set("name", PropertyValue::text(base.clone()));
            entity.set("version", PropertyValue::text("1"));
            let raw = cells
                .iter()
                .flat_map(|c| c.facts.files_written.iter().chain(&c.facts.files_read))
                .find(|p| file_key(p) == *base);
            if let Some(raw) = raw {
                let path = self.content_path(raw);
                if let Some(digest) = file_sha256(Path::new(&path)) {
                    entity.set("contentHash", PropertyValue::text(format!("sha256:{digest}")));
                }
                entity.set("contentPath", PropertyValue::text(path));
            }
            for (cell, id) in cells.iter().zip(&activity_ids) {
                if cell.facts.files_written.iter().any(|p| file_key(p) == *base) {
                    entity.push("prov:wasGeneratedBy", PropertyValue::reference(id.clone()));
                }
            }
            if let Some(domain) = annotated.domain(base) {
                for (key, value) in domain {
                    entity
                        .properties
                        .entry(key.clone())
                        .or_insert_with(|| hint_value(value));
                }
            }
            entity
        });

        let relations = graph.edges().iter().enumerate().map(|(n, edge)| {
            let mut entity = CrateEntity::new(format!("{EDGE_ID_PREFIX}{n}"), &[DEPENDENCY_TYPE]);
            entity.set(
                "oflow:fromCell",
                PropertyValue::reference(activity_ids[edge.source].clone()),
            );
            entity.set(
                "oflow:toCell",
                PropertyValue::reference(activity_ids[edge.target].clone()),
            );
            entity.set("oflow:kind", PropertyValue::text(edge.kind.as_str()));
            entity.set("oflow:via", PropertyValue::text(edge.mechanism.clone()));
            for label in &edge.labels {
                entity.push(
                    "prov:entity",
                    PropertyValue::reference(label_target(edge.kind, label)),
                );
            }
            entity
        });

        let mut descriptor = CrateEntity::new(METADATA_FILE, &["CreativeWork"]);
        descriptor.set("conformsTo", PropertyValue::reference(RO_CRATE_PROFILE));
        descriptor.set("about", PropertyValue::reference("./"));

        let mut root = CrateEntity::new("./", &["Dataset"]);
        root.set(
            "name",
            PropertyValue::text(self.name.clone().unwrap_or_else(|| "Notebook provenance".to_string())),
        );
        root.set(
            "description",
            PropertyValue::text("Cell-level provenance captured from a notebook"),
        );
        for id in &activity_ids {
            root.push("hasPart", PropertyValue::reference(id.clone()));
        }
        root.push("hasPart", PropertyValue::reference(GRAPHML_FILE));

        let mut graphml = CrateEntity::new(GRAPHML_FILE, &["File"]);
        graphml.set("name", PropertyValue::text("cell_graph"));
        graphml.set("encodingFormat", PropertyValue::text("application/graphml+xml"));

        let mut entities = vec![descriptor, root];
        entities.append(&mut activities);
        entities.extend(variables);
        entities.extend(files);
        entities.extend(sidecars);
        entities.extend(relations);
        entities.extend(usages.into_values());
        entities.push(graphml);

        if with_view {
            let mut view = CrateEntity::new(HTML_FILE, &["File"]);
            view.set("name", PropertyValue::text("cell_graph view"));
            view.set("encodingFormat", PropertyValue::text("text/html"));
            entities.push(view);
            if let Some(root) = entities.get_mut(1) {
                root.push("hasPart", PropertyValue::reference(HTML_FILE));
            }
        }

        MetadataDocument::new(entities)
    }

    fn activity_entity(&self, annotated: &AnnotatedGraph<'_>, cell: &Cell, id: &str) -> CrateEntity {
        let extension = self.registry.lookup(&cell.kernel).extension();
        let mut entity = CrateEntity::new(id, &["File", ACTIVITY_TYPE]);
        entity.set("name", PropertyValue::text(format!("Cell {}", cell.index)));
        entity.set("oflow:cellIndex", PropertyValue::Integer(cell.index as i64));
        entity.set("oflow:kernel", PropertyValue::text(cell.kernel.clone()));
        entity.set("version", PropertyValue::text("1"));
        entity.set("encodingFormat", PropertyValue::text(encoding_format(extension)));
        entity.set("sha256", PropertyValue::text(sha256_hex(&cell.source)));
        if let Some(err) = &cell.error {
            entity.set("oflow:analysisError", PropertyValue::text(err.clone()));
        }

        let defined: BTreeSet<&String> = cell.facts.vars_defined.iter().collect();
        let roles: Vec<PropertyValue> = defined
            .iter()
            .filter_map(|v| annotated.role(v).map(|r| PropertyValue::text(format!("{v}: {r}"))))
            .collect();
        if !roles.is_empty() {
            entity.set("roles", PropertyValue::List(roles));
        }

        let touched: BTreeSet<String> = cell
            .facts
            .files_written
            .iter()
            .chain(&cell.facts.files_read)
            .map(|p| file_key(p))
            .collect();
        let file_hints: Vec<PropertyValue> = touched
            .iter()
            .filter_map(|base| {
                let domain = annotated.domain(base)?;
                let parts: Vec<String> = domain.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                (!parts.is_empty()).then(|| PropertyValue::text(format!("{base} ({})", parts.join("; "))))
            })
            .collect();
        if !file_hints.is_empty() {
            entity.set("fileHints", PropertyValue::List(file_hints));
        }

        for name in &cell.facts.vars_defined {
            entity.push("oflow:hasOutput", PropertyValue::reference(variable_id(name)));
        }
        for path in &cell.facts.files_written {
            entity.push("oflow:hasOutput", PropertyValue::reference(file_id(&file_key(path))));
        }
        entity
    }
}
