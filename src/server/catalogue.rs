//! # Location Catalogue
//!
//! Loads the static set of guessable locations at startup, fills in missing
//! ids, puts the list into canonical order and indexes it by id.
//!
//! ## File Format
//!
//! `locations.json` is a JSON array of records:
//!
//! ```text
//! [
//!   {
//!     "id": "231b158",
//!     "isEnabled": true,
//!     "name": "London",
//!     "panoramaID": "AuEPJltHzwIzwxBBEDekQA",
//!     "latitude": 51.4779302,
//!     "longitude": -0.0014511,
//!     "flag": "🇬🇧",
//!     "difficulty": 2,
//!     "allowMovement": false,
//!     "clues": ["\"Royal Observatory\" to the southeast"],
//!     "bonus": "01.mp4"
//!   }
//! ]
//! ```
//!
//! `id` may be omitted for new records; it is derived from the position and
//! written back when the catalogue is persisted. Every field is optional, but
//! an enabled record needs either `panoramaID` or both `latitude` and
//! `longitude`. Records that do not fit this shape at all (e.g. a latitude
//! written as a string) are kept verbatim at the end of the file and are
//! never served.

use log::{error, info, warn};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::common::messages::MapPosition;

/// Number of hex characters kept from the digest for a derived id.
const DERIVED_ID_LEN: usize = 7;

/// A single guessable place.
///
/// Field declaration order is the canonical on-disk order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "panoramaID", default, skip_serializing_if = "Option::is_none")]
    pub panorama_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_movement: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clues: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonus: Option<String>,
}

impl Location {
    /// Records are enabled unless they explicitly say otherwise.
    pub fn enabled(&self) -> bool {
        self.is_enabled.unwrap_or(true)
    }

    pub fn allows_movement(&self) -> bool {
        self.allow_movement.unwrap_or(false)
    }

    /// The position the client should render. A panorama wins over coordinates.
    pub fn position(&self) -> Option<MapPosition> {
        if let Some(panorama_id) = &self.panorama_id {
            return Some(MapPosition::Panorama {
                panorama_id: panorama_id.clone(),
            });
        }

        let latitude = self.latitude.as_ref().and_then(Number::as_f64);
        let longitude = self.longitude.as_ref().and_then(Number::as_f64);

        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(MapPosition::Coordinates {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    /// Deterministic id: a digest prefix of the panorama id, or of
    /// `"{latitude},{longitude}"` when there is no panorama.
    pub fn derive_id(&self) -> Option<String> {
        let source = match self.position()? {
            MapPosition::Panorama { panorama_id } => panorama_id,
            MapPosition::Coordinates {
                latitude,
                longitude,
            } => format!(
                "{},{}",
                format_coordinate(latitude),
                format_coordinate(longitude)
            ),
        };

        let digest = format!("{:x}", Md5::digest(source.as_bytes()));
        Some(digest[..DERIVED_ID_LEN].to_string())
    }
}

/// Shortest decimal text for a coordinate, as browsers print numbers:
/// no negative zero, exponent form below 1e-6 and from 1e21 up.
pub fn format_coordinate(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }

    let magnitude = value.abs();
    if (1e-6..1e21).contains(&magnitude) {
        return format!("{}", value);
    }

    let text = format!("{:e}", value);
    match text.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{}e+{}", mantissa, exponent)
        }
        _ => text,
    }
}

/// Errors that stop the catalogue from loading.
#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("catalogue I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalogue is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("location id \"{id}\" is shared by \"{first}\" and \"{second}\"")]
    DuplicateId {
        id: String,
        first: String,
        second: String,
    },
}

/// Why a location id did not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("location \"{0}\" does not exist")]
    NotFound(String),

    #[error("location \"{0}\" is disabled")]
    Disabled(String),
}

/// Fill in ids for enabled records that lack one and reject duplicate ids.
///
/// Returns the records together with the number of ids assigned. Records
/// with odd content are passed through; only id collisions are fatal.
pub fn validate(mut locations: Vec<Location>) -> Result<(Vec<Location>, usize), CatalogueError> {
    let mut assigned = 0;

    for location in locations.iter_mut() {
        if location.id.is_some() || !location.enabled() {
            continue;
        }

        match location.derive_id() {
            Some(id) => {
                location.id = Some(id);
                assigned += 1;
            }
            None => warn!(
                "⚠️  Cannot derive an id for \"{}\": no panorama or coordinates",
                location.name
            ),
        }
    }

    for location in locations.iter().filter(|l| l.enabled()) {
        if location.position().is_none() {
            warn!(
                "⚠️  Location \"{}\" has no panorama or coordinates",
                location.name
            );
        }
        if let Some(difficulty) = &location.difficulty {
            if !difficulty.as_u64().is_some_and(|d| (1..=10).contains(&d)) {
                warn!(
                    "⚠️  Location \"{}\" has difficulty {} outside 1-10",
                    location.name, difficulty
                );
            }
        }
    }

    let mut seen: HashMap<&str, &str> = HashMap::new();
    for location in &locations {
        let Some(id) = location.id.as_deref() else {
            continue;
        };
        if let Some(first) = seen.insert(id, &location.name) {
            return Err(CatalogueError::DuplicateId {
                id: id.to_string(),
                first: first.to_string(),
                second: location.name.clone(),
            });
        }
    }

    Ok((locations, assigned))
}

/// Canonical order: enabled first, then by name, then by difficulty.
pub fn compare(a: &Location, b: &Location) -> Ordering {
    b.enabled()
        .cmp(&a.enabled())
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| {
            let difficulty = |l: &Location| l.difficulty.as_ref().and_then(Number::as_f64);
            difficulty(a)
                .partial_cmp(&difficulty(b))
                .unwrap_or(Ordering::Equal)
        })
}

/// Stable sort into canonical order.
pub fn sort(mut locations: Vec<Location>) -> Vec<Location> {
    locations.sort_by(compare);
    locations
}

/// One entry of the persisted file.
#[derive(Serialize)]
#[serde(untagged)]
enum Entry<'a> {
    Location(&'a Location),
    Verbatim(&'a Value),
}

/// The validated, sorted and indexed set of locations.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    locations: Vec<Location>,
    /// Records that are not locations, kept so the rewrite loses nothing
    unreadable: Vec<Value>,
    index: HashMap<String, usize>,
    assigned_ids: usize,
}

impl Catalogue {
    /// Validate and sort raw records into a catalogue.
    pub fn from_records(records: Vec<Location>) -> Result<Self, CatalogueError> {
        info!("🔎 Validating locations");
        let (locations, assigned_ids) = validate(records)?;
        info!("✅ Validated locations, modified {} location(s)", assigned_ids);

        info!("🔃 Sorting locations");
        let locations = sort(locations);

        let index = locations
            .iter()
            .enumerate()
            .filter_map(|(i, location)| location.id.clone().map(|id| (id, i)))
            .collect();

        Ok(Self {
            locations,
            unreadable: Vec::new(),
            index,
            assigned_ids,
        })
    }

    /// Build a catalogue from raw JSON records.
    ///
    /// Each record is converted on its own; one that is not a location is
    /// logged and kept verbatim instead of failing the whole list.
    pub fn from_values(values: Vec<Value>) -> Result<Self, CatalogueError> {
        let mut records = Vec::with_capacity(values.len());
        let mut unreadable = Vec::new();

        for (position, value) in values.into_iter().enumerate() {
            match Location::deserialize(&value) {
                Ok(location) => records.push(location),
                Err(e) => {
                    warn!(
                        "⚠️  Record #{} is not a usable location ({}); keeping it as-is",
                        position, e
                    );
                    unreadable.push(value);
                }
            }
        }

        let mut catalogue = Self::from_records(records)?;
        catalogue.unreadable = unreadable;
        Ok(catalogue)
    }

    /// Read and prepare the catalogue stored at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogueError> {
        let content = fs::read_to_string(path)?;
        let values: Vec<Value> = serde_json::from_str(&content)?;
        Self::from_values(values)
    }

    /// Startup pass: load the file, write the canonical list back and log a
    /// summary. A failed write is logged and does not stop startup.
    pub fn prepare<P: AsRef<Path>>(path: P) -> Result<Self, CatalogueError> {
        let path = path.as_ref();
        Self::prepare_into(path, path)
    }

    /// Like [`Catalogue::prepare`], but writes the canonical list to `output`.
    pub fn prepare_into<P, Q>(source: P, output: Q) -> Result<Self, CatalogueError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let output = output.as_ref();
        let catalogue = Self::load(source)?;

        info!("💾 Updating {} on the filesystem", output.display());
        if let Err(e) = catalogue.persist(output) {
            error!("❌ Error encountered saving {}: {}", output.display(), e);
        }

        info!(
            "📚 Loaded {} locations:\n{}",
            catalogue.len(),
            catalogue.summary_table()
        );
        Ok(catalogue)
    }

    /// Canonical JSON text: two-space indentation and a trailing newline.
    pub fn to_json(&self) -> Result<String, CatalogueError> {
        let entries: Vec<Entry> = self
            .locations
            .iter()
            .map(Entry::Location)
            .chain(self.unreadable.iter().map(Entry::Verbatim))
            .collect();
        let mut json = serde_json::to_string_pretty(&entries)?;
        json.push('\n');
        Ok(json)
    }

    /// Write the canonical list back to `path`.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<(), CatalogueError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Resolve an id to an enabled location.
    pub fn lookup(&self, id: &str) -> Result<&Location, LookupError> {
        let location = self
            .index
            .get(id)
            .map(|&i| &self.locations[i])
            .ok_or_else(|| LookupError::NotFound(id.to_string()))?;

        if !location.enabled() {
            return Err(LookupError::Disabled(id.to_string()));
        }

        Ok(location)
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Records kept verbatim because they are not locations.
    pub fn unreadable(&self) -> &[Value] {
        &self.unreadable
    }

    /// Number of ids derived during validation.
    pub fn assigned_ids(&self) -> usize {
        self.assigned_ids
    }

    /// Human-readable table of the catalogue for the startup log.
    pub fn summary_table(&self) -> String {
        let headings = ["id", "name", "difficulty", "isEnabled"];

        let rows: Vec<[String; 4]> = self
            .locations
            .iter()
            .map(|location| {
                [
                    location.id.clone().unwrap_or_default(),
                    location.name.clone(),
                    location
                        .difficulty
                        .as_ref()
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                    match location.is_enabled {
                        Some(true) => "✓".to_string(),
                        Some(false) => "✕".to_string(),
                        None => String::new(),
                    },
                ]
            })
            .collect();

        let widths: Vec<usize> = (0..headings.len())
            .map(|col| {
                rows.iter()
                    .map(|row| row[col].chars().count())
                    .fold(headings[col].len(), usize::max)
            })
            .collect();

        let pad = |value: &str, width: usize| {
            let fill = width.saturating_sub(value.chars().count());
            format!("{}{}", value, " ".repeat(fill))
        };

        let heading = headings
            .iter()
            .zip(&widths)
            .map(|(h, &w)| pad(&h.to_uppercase(), w))
            .collect::<Vec<_>>()
            .join("  ");

        std::iter::once(heading)
            .chain(rows.iter().map(|row| {
                row.iter()
                    .zip(&widths)
                    .map(|(v, &w)| pad(v, w))
                    .collect::<Vec<_>>()
                    .join("  ")
            }))
            .map(|line| format!("  {}", line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
