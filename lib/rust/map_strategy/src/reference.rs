//! The reference registry: named sequences (and optional annotations) per
//! species, with per-mapper flag and index-location overrides.
//!
//! Entries are immutable after registration. Resolving an entry for one
//! mapper applies the default index layout and flags wherever the entry
//! carries no override. The resolver does no filesystem I/O; existence of
//! sequences and indices is the executor's concern.

use crate::mapper::Mapper;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// A reference name (`genome`, `rRNA`, `phiX`, ...).
#[derive(
    Clone,
    Debug,
    Default,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
    derive_more::Deref,
    derive_more::Display,
)]
pub struct RefName(String);

impl RefName {
    /// Return this reference name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RefName {
    fn from(value: &str) -> Self {
        RefName(value.to_string())
    }
}

impl From<RefName> for String {
    fn from(value: RefName) -> Self {
        value.0
    }
}

impl Borrow<str> for RefName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// One registered reference. Field names match the on-disk registry JSON.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub sequence: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<PathBuf>,
    #[serde(default, rename = "STAR_flags", skip_serializing_if = "Option::is_none")]
    pub star_flags: Option<String>,
    #[serde(default, rename = "BT2_flags", skip_serializing_if = "Option::is_none")]
    pub bt2_flags: Option<String>,
    #[serde(default, rename = "BT2_index", skip_serializing_if = "Option::is_none")]
    pub bt2_index: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_dir: Option<PathBuf>,
}

/// Typed lookup failures, reachable through `anyhow` downcasting.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("no reference named '{name}' is registered for species '{species}'")]
    UnknownReference { species: String, name: String },
    #[error("reference '{name}' of species '{species}' has no sequence path")]
    MissingSequence { species: String, name: String },
}

/// Per-species mapping from reference name to entry, plus the root of the
/// species data tree that indices and compiled annotations live under.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferenceRegistry {
    #[serde(default = "default_species_data")]
    pub species_data: PathBuf,
    pub species: BTreeMap<String, BTreeMap<RefName, ReferenceEntry>>,
}

fn default_species_data() -> PathBuf {
    PathBuf::from("species_data")
}

impl ReferenceRegistry {
    pub fn new(species_data: impl Into<PathBuf>) -> ReferenceRegistry {
        ReferenceRegistry {
            species_data: species_data.into(),
            species: BTreeMap::new(),
        }
    }

    /// Load a registry from its JSON form.
    pub fn from_json(path: &Path) -> Result<ReferenceRegistry> {
        let file = File::open(path).with_context(|| path.display().to_string())?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse reference registry '{}'", path.display()))
    }

    pub fn register(&mut self, species: &str, name: &str, entry: ReferenceEntry) {
        self.species
            .entry(species.to_string())
            .or_default()
            .insert(RefName::from(name), entry);
    }

    pub fn get(&self, species: &str, name: &str) -> Result<&ReferenceEntry> {
        let Some(entry) = self
            .species
            .get(species)
            .and_then(|refs| refs.get(name))
        else {
            bail!(ReferenceError::UnknownReference {
                species: species.to_string(),
                name: name.to_string(),
            });
        };
        Ok(entry)
    }

    /// Resolve a reference for one mapper, applying defaults where the
    /// entry carries no override.
    pub fn resolve(&self, species: &str, name: &str, mapper: Mapper) -> Result<ResolvedReference> {
        let entry = self.get(species, name)?;
        if entry.sequence.as_os_str().is_empty() {
            bail!(ReferenceError::MissingSequence {
                species: species.to_string(),
                name: name.to_string(),
            });
        }

        let dir = self.species_data.join(species).join(name);
        let map_index = match mapper {
            Mapper::Star => entry.index_dir.clone(),
            Mapper::Bowtie2 => entry.bt2_index.clone(),
        }
        .unwrap_or_else(|| dir.join(mapper.index_dir_name()));
        let map_flags = match mapper {
            Mapper::Star => entry.star_flags.clone(),
            Mapper::Bowtie2 => entry.bt2_flags.clone(),
        }
        .unwrap_or_else(|| mapper.default_flags().to_string());

        Ok(ResolvedReference {
            name: RefName::from(name),
            species: species.to_string(),
            sequence: entry.sequence.clone(),
            annotation: entry.annotation.clone(),
            map_flags,
            map_index_param: mapper.index_param(&map_index, name),
            map_index_file: mapper.index_sentinel(&map_index, name),
            map_index,
            dir,
        })
    }
}

/// A reference entry resolved for one mapper: effective flags and index
/// locations with all defaults applied.
#[derive(Clone, Debug, Serialize)]
pub struct ResolvedReference {
    pub name: RefName,
    pub species: String,
    pub sequence: PathBuf,
    pub annotation: Option<PathBuf>,
    pub map_flags: String,
    /// Index directory.
    pub map_index: PathBuf,
    /// Index location as handed to the mapper's command line.
    pub map_index_param: PathBuf,
    /// Sentinel file whose existence proves the index is built.
    pub map_index_file: PathBuf,
    /// Per-reference directory under the species data root.
    pub dir: PathBuf,
}

impl ResolvedReference {
    /// The processed GTF the tagging stage is driven by.
    pub fn ann_final(&self) -> Option<PathBuf> {
        self.annotation
            .as_ref()
            .map(|_| self.dir.join("annotation.final.gtf"))
    }

    /// The pre-compiled annotation side-table directory.
    pub fn ann_final_compiled(&self) -> Option<PathBuf> {
        self.annotation
            .as_ref()
            .map(|_| self.dir.join("annotation.final.compiled"))
    }

    /// Sentinel file proving the side-table compilation completed; the
    /// dependency handle the executor waits on before tagging.
    pub fn ann_final_compiled_target(&self) -> Option<PathBuf> {
        self.ann_final_compiled()
            .map(|compiled| compiled.join("non_overlapping.csv"))
    }
}
