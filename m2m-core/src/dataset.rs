//! Dataset classification and partitioning of scene identifiers.
//!
//! The remote service answers lookups one dataset at a time, so every batch of
//! caller-supplied identifiers is first split into per-dataset buckets.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};

use crate::error::IdentifierError;
use crate::identifiers::{DatasetName, SceneId};

/// Identifiers grouped by dataset, in first-appearance order within each bucket.
pub type DatasetBuckets = BTreeMap<DatasetName, Vec<SceneId>>;

/// Maps a scene identifier to the dataset it belongs to.
///
/// Implementations must be deterministic: the same identifier always maps to
/// the same dataset.
pub trait DatasetClassifier: Send + Sync {
    fn dataset(&self, id: &SceneId) -> Result<DatasetName, IdentifierError>;
}

/// Split `ids` into disjoint per-dataset buckets.
///
/// Every input identifier lands in exactly one bucket; repeated identifiers
/// are kept once. Fails on the first identifier the classifier rejects.
pub fn partition<C>(ids: &[SceneId], classifier: &C) -> Result<DatasetBuckets, IdentifierError>
where
    C: DatasetClassifier + ?Sized,
{
    let mut seen = HashSet::with_capacity(ids.len());
    let mut buckets = DatasetBuckets::new();
    for id in ids {
        if !seen.insert(id) {
            continue;
        }
        let dataset = classifier.dataset(id)?;
        buckets.entry(dataset).or_default().push(id.clone());
    }
    Ok(buckets)
}

// ============================================================================
// LANDSAT COLLECTION IDENTIFIERS
// ============================================================================

/// `LXSS_LLLL_PPPRRR_YYYYMMDD_yyyymmdd_CC_TX`
static COLLECTION_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^L([COTE])(0[4-9])_(L[12][A-Z]{2})_(\d{3})(\d{3})_(\d{8})_(\d{8})_(\d{2})_(T1|T2|RT)$",
    )
    .expect("collection id pattern is valid")
});

/// Instrument family, which decides the dataset prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    /// Landsat 8/9 OLI and/or TIRS.
    OliTirs,
    /// Landsat 7 ETM+.
    Etm,
    /// Landsat 4/5 TM.
    Tm,
}

/// Processing level family from the second identifier field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingLevel {
    Level1,
    Level2,
}

/// A parsed Landsat Collection identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionId {
    pub sensor: Sensor,
    pub satellite: u8,
    pub level: ProcessingLevel,
    pub wrs_path: u16,
    pub wrs_row: u16,
    pub acquired: NaiveDate,
    pub processed: NaiveDate,
    pub collection: u8,
}

/// Classifier for Landsat Collection 1 and Collection 2 identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LandsatClassifier;

impl LandsatClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Parse a Collection identifier into its fields.
    pub fn parse(&self, id: &SceneId) -> Result<CollectionId, IdentifierError> {
        let raw = id.as_str();
        let caps = COLLECTION_ID
            .captures(raw)
            .ok_or_else(|| unrecognized(raw, "not a Landsat Collection identifier"))?;

        let satellite: u8 = caps[2]
            .parse()
            .map_err(|_| unrecognized(raw, "bad satellite number"))?;
        let sensor = match (&caps[1], satellite) {
            ("C" | "O" | "T", 8 | 9) => Sensor::OliTirs,
            ("E", 7) => Sensor::Etm,
            ("T", 4 | 5) => Sensor::Tm,
            _ => return Err(unrecognized(raw, "unsupported sensor/satellite combination")),
        };
        let level = if caps[3].starts_with("L1") {
            ProcessingLevel::Level1
        } else {
            ProcessingLevel::Level2
        };

        Ok(CollectionId {
            sensor,
            satellite,
            level,
            wrs_path: caps[4].parse().map_err(|_| unrecognized(raw, "bad WRS path"))?,
            wrs_row: caps[5].parse().map_err(|_| unrecognized(raw, "bad WRS row"))?,
            acquired: parse_date(raw, &caps[6])?,
            processed: parse_date(raw, &caps[7])?,
            collection: caps[8]
                .parse()
                .map_err(|_| unrecognized(raw, "bad collection number"))?,
        })
    }
}

impl DatasetClassifier for LandsatClassifier {
    fn dataset(&self, id: &SceneId) -> Result<DatasetName, IdentifierError> {
        let parsed = self.parse(id)?;
        let name = match (parsed.collection, parsed.level, parsed.sensor) {
            (1, ProcessingLevel::Level1, Sensor::OliTirs) if parsed.satellite == 8 => {
                "LANDSAT_8_C1"
            }
            (1, ProcessingLevel::Level1, Sensor::Etm) => "LANDSAT_ETM_C1",
            (1, ProcessingLevel::Level1, Sensor::Tm) => "LANDSAT_TM_C1",
            (2, ProcessingLevel::Level1, Sensor::OliTirs) => "LANDSAT_OT_C2_L1",
            (2, ProcessingLevel::Level1, Sensor::Etm) => "LANDSAT_ETM_C2_L1",
            (2, ProcessingLevel::Level1, Sensor::Tm) => "LANDSAT_TM_C2_L1",
            (2, ProcessingLevel::Level2, Sensor::OliTirs) => "LANDSAT_OT_C2_L2",
            (2, ProcessingLevel::Level2, Sensor::Etm) => "LANDSAT_ETM_C2_L2",
            (2, ProcessingLevel::Level2, Sensor::Tm) => "LANDSAT_TM_C2_L2",
            _ => {
                return Err(unrecognized(
                    id.as_str(),
                    "no dataset for this collection and processing level",
                ))
            }
        };
        Ok(DatasetName::from(name))
    }
}

fn parse_date(raw: &str, digits: &str) -> Result<NaiveDate, IdentifierError> {
    NaiveDate::parse_from_str(digits, "%Y%m%d")
        .map_err(|e| unrecognized(raw, &format!("bad date {}: {}", digits, e)))
}

fn unrecognized(id: &str, reason: &str) -> IdentifierError {
    IdentifierError::Unrecognized {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_scene_id() -> impl Strategy<Value = SceneId> {
        (
            prop_oneof![Just("LC08"), Just("LE07"), Just("LT05"), Just("LT04")],
            1u16..=233,
            1u16..=248,
            1990i32..=2020,
            1u32..=12,
            1u32..=28,
            prop_oneof![Just("01"), Just("02")],
        )
            .prop_map(|(sensor, path, row, year, month, day, collection)| {
                SceneId::new(format!(
                    "{}_L1TP_{:03}{:03}_{:04}{:02}{:02}_20200101_{}_T1",
                    sensor, path, row, year, month, day, collection
                ))
            })
    }

    proptest! {
        /// Property: buckets are disjoint and their union equals the input set.
        #[test]
        fn prop_partition_is_total_and_disjoint(ids in prop::collection::vec(arb_scene_id(), 0..40)) {
            let buckets = partition(&ids, &LandsatClassifier).unwrap();

            let mut union = HashSet::new();
            let mut total = 0usize;
            for bucket in buckets.values() {
                for id in bucket {
                    total += 1;
                    prop_assert!(union.insert(id.clone()), "{} appears in two buckets", id);
                }
            }
            let input: HashSet<SceneId> = ids.iter().cloned().collect();
            prop_assert_eq!(total, input.len());
            prop_assert_eq!(union, input);
        }

        /// Property: every member of a bucket classifies to that bucket's dataset.
        #[test]
        fn prop_partition_buckets_match_classifier(ids in prop::collection::vec(arb_scene_id(), 1..20)) {
            let buckets = partition(&ids, &LandsatClassifier).unwrap();
            for (dataset, bucket) in &buckets {
                for id in bucket {
                    prop_assert_eq!(&LandsatClassifier.dataset(id).unwrap(), dataset);
                }
            }
        }
    }
}
