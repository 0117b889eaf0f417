//! Per-run artifact namespace and model resolution.
//!
//! ## Layout
//!
//! ```text
//! <results_root>/<run_id>/
//!   models/trained_model_<i>.json   one estimator per target, i = target index
//!   manifest.json                   features, targets, family, tuned params
//!   cv_result.csv | prediction_result.csv | optimization_result.csv
//!   explanations.json               target -> held-out group -> attributions
//!   run.json                        run record (written by the registry)
//! ```
//!
//! Artifacts are written once by the run that owns the namespace.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::explain::Explanation;
use crate::model::{Estimator, ModelFamily, ModelParams};
use crate::storage::{self, Table};
use crate::{Error, Result};

const MODELS_DIR: &str = "models";
const MODEL_PREFIX: &str = "trained_model_";
const MANIFEST_FILE: &str = "manifest.json";
const EXPLANATIONS_FILE: &str = "explanations.json";

/// Fold attributions per target name.
pub type ExplanationMap = BTreeMap<String, BTreeMap<String, Explanation>>;

/// Describes the models of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Run that produced the models.
    pub run_id: String,
    /// Estimator family.
    pub family: ModelFamily,
    /// Input columns, in model order.
    pub features: Vec<String>,
    /// Target per model index.
    pub targets: Vec<String>,
    /// Hyperparameters used per target.
    pub best_params: Vec<ModelParams>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Models of one run plus its manifest, if present.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    /// Estimators ordered by target index.
    pub models: Vec<Estimator>,
    /// Manifest written next to the models.
    pub manifest: Option<Manifest>,
}

/// Filesystem artifact store rooted at the results directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

fn is_plain_segment(id: &str) -> bool {
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !id.contains(['/', '\\'])
}

impl ArtifactStore {
    /// Store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Results root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] unless `run_id` is a single plain path
    /// segment.
    pub fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        if is_plain_segment(run_id) {
            Ok(self.root.join(run_id))
        } else {
            Err(Error::Validation(format!("invalid run identifier '{run_id}'")))
        }
    }

    /// Create the namespace of `run_id`.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid identifier or if the directory cannot be
    /// created.
    pub fn create_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let dir = self.run_dir(run_id)?;
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn write_json<T: Serialize>(path: &Path, value: &T, pretty: bool) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(fs::File::create(path)?);
        if pretty {
            serde_json::to_writer_pretty(&mut writer, value)?;
        } else {
            serde_json::to_writer(&mut writer, value)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write `models/trained_model_<i>.json` for each model.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be written.
    pub fn save_models(&self, run_id: &str, models: &[Estimator]) -> Result<()> {
        let dir = self.run_dir(run_id)?.join(MODELS_DIR);
        for (index, model) in models.iter().enumerate() {
            Self::write_json(&dir.join(format!("{MODEL_PREFIX}{index}.json")), model, false)?;
        }
        debug!(run_id, count = models.len(), "models saved");
        Ok(())
    }

    /// Write `manifest.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        let path = self.run_dir(&manifest.run_id)?.join(MANIFEST_FILE);
        Self::write_json(&path, manifest, true)
    }

    /// Write `explanations.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_explanations(&self, run_id: &str, explanations: &ExplanationMap) -> Result<()> {
        let path = self.run_dir(run_id)?.join(EXPLANATIONS_FILE);
        Self::write_json(&path, explanations, false)
    }

    /// Read `explanations.json`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_explanations(&self, run_id: &str) -> Result<Option<ExplanationMap>> {
        let path = self.run_dir(run_id)?.join(EXPLANATIONS_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(fs::File::open(path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    /// Write a result table as `<file_name>` in the run namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the CSV cannot be written.
    pub fn save_table(&self, run_id: &str, file_name: &str, table: &Table) -> Result<PathBuf> {
        let path = self.run_dir(run_id)?.join(file_name);
        storage::save(table, &path)?;
        Ok(path)
    }

    /// Load every model of `run_id`, ordered by index.
    ///
    /// Model `i` is the model of target `i`, so the indices must run
    /// `0..n` without gaps and every file must deserialize.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelNotFound`] if the identifier is invalid, the
    /// models directory is missing or holds no model files, and
    /// [`Error::DataAccess`] if an index is missing or a model file cannot be
    /// read or decoded.
    pub fn resolve(&self, run_id: &str) -> Result<Vec<Estimator>> {
        let not_found = || Error::ModelNotFound(run_id.to_string());
        let dir = self.run_dir(run_id).map_err(|_| not_found())?.join(MODELS_DIR);
        let entries = fs::read_dir(&dir).map_err(|_| not_found())?;

        let mut indexed: Vec<(usize, PathBuf)> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let index = name
                    .strip_prefix(MODEL_PREFIX)?
                    .strip_suffix(".json")?
                    .parse::<usize>()
                    .ok()?;
                Some((index, entry.path()))
            })
            .collect();
        if indexed.is_empty() {
            return Err(not_found());
        }
        indexed.sort_by_key(|(index, _)| *index);

        indexed
            .into_iter()
            .enumerate()
            .map(|(expected, (index, path))| {
                if index != expected {
                    return Err(Error::DataAccess(format!(
                        "run '{run_id}': {MODEL_PREFIX}{expected}.json is missing"
                    )));
                }
                fs::File::open(&path)
                    .map_err(Error::from)
                    .and_then(|f| Ok(serde_json::from_reader(BufReader::new(f))?))
                    .map_err(|e| {
                        Error::DataAccess(format!("run '{run_id}': model {index} is unreadable: {e}"))
                    })
            })
            .collect()
    }

    /// Models plus manifest.
    ///
    /// # Errors
    ///
    /// As [`ArtifactStore::resolve`]; an unreadable manifest is treated as
    /// absent.
    pub fn resolve_bundle(&self, run_id: &str) -> Result<ModelBundle> {
        let models = self.resolve(run_id)?;
        let path = self.run_dir(run_id)?.join(MANIFEST_FILE);
        let manifest = fs::File::open(path)
            .ok()
            .and_then(|f| match serde_json::from_reader(BufReader::new(f)) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    warn!(run_id, error = %e, "ignoring unreadable manifest");
                    None
                }
            });
        Ok(ModelBundle { models, manifest })
    }
}
