// This library turns the text output of the Slurm status commands (sinfo, squeue, and a df run on a
// file server) into per-entity numeric gauges.  It knows nothing about how the gauges are exposed;
// that is up to the client.
//
// The pipeline for one poll is: fetch raw bytes from a `Source`, split them into records on the
// family's delimiter, optionally drop duplicate lines, and fold the records into a map from entity
// key to metric record according to the family's merge policy.  Nothing is retained between polls.

mod aggregate;
mod dedup;
pub mod families;
mod source;
mod split;
mod states;
mod units;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

// Fold a sequence of raw records into a snapshot, or do the whole split/dedupe/fold pass on raw
// command output.

pub use aggregate::{aggregate, parse, Derived, Family, Merge, Row};

// Remove exact duplicate lines.

pub use dedup::dedupe;

// Data-source collaborators.  `poll` is the one entry point that ties a source to a family.

pub use source::{CommandSource, FileSource, RemoteSource, Source};

// Split raw output into records.

pub use split::{lines, records, RawRecord};

// Map raw scheduler states to canonical categories.

pub use states::{classify, Category, Contribution, Quantity};

// Memory and size tokens with a K/M/G/T suffix, normalized to MB.

pub use units::{normalize, parse_size};

/// The identity under which one metric record is grouped.
///
/// The derived ordering exists so that presentation code can produce stable output; the engine
/// itself never depends on it.

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    /// The family has exactly one record, eg cluster-wide CPU totals.
    Global,

    /// Node name, user name, or filesystem path.
    Simple(String),

    /// Two categorical dimensions at once, eg (state bucket, node feature).
    Composite(String, String),
}

/// An attribute value is either a gauge value or a short categorical string that will usually end
/// up as a label.

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Label(String),
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Number(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Label(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Label(s)
    }
}

/// The attributes collected for one entity during one pass.  Attribute names are chosen by the
/// family; the map is ordered by name only so that debug output is readable.

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MetricRecord {
    attrs: BTreeMap<&'static str, Value>,
}

impl MetricRecord {
    pub fn get(&self, attr: &str) -> Option<&Value> {
        self.attrs.get(attr)
    }

    /// The numeric value of `attr`, or None if it is absent or a label.

    pub fn number(&self, attr: &str) -> Option<f64> {
        match self.attrs.get(attr) {
            Some(Value::Number(v)) => Some(*v),
            _ => None,
        }
    }

    /// The label value of `attr`, or None if it is absent or a number.

    pub fn label(&self, attr: &str) -> Option<&str> {
        match self.attrs.get(attr) {
            Some(Value::Label(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.attrs.iter().map(|(k, v)| (*k, v))
    }

    fn set(&mut self, attr: &'static str, value: Value) {
        self.attrs.insert(attr, value);
    }

    // A label (which should not happen for an accumulated attribute) is replaced, not summed.

    fn add(&mut self, attr: &'static str, amount: f64) {
        match self.attrs.get_mut(attr) {
            Some(Value::Number(v)) => *v += amount,
            _ => {
                self.attrs.insert(attr, Value::Number(amount));
            }
        }
    }
}

/// The result of one aggregation pass.  Consumers must treat it as unordered.

pub type MetricMap = HashMap<EntityKey, MetricRecord>;

/// Counters for everything the permissive parser quietly absorbed during one pass.  Nothing here
/// is an error, but a nonzero `defaulted` count means some gauge was computed from a zero that
/// stood in for garbage.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Records produced by the splitter (after deduplication, if any).
    pub lines: usize,

    /// Records skipped because their field count did not fit the family.
    pub malformed: usize,

    /// Numeric or size fields that did not parse and were taken as zero.
    pub defaulted: usize,

    /// Lines removed by the deduplicator.
    pub duplicates: usize,
}

/// One poll's worth of data for one family.

#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub family: &'static str,
    pub records: MetricMap,
    pub stats: ParseStats,
}

impl Snapshot {
    pub fn get(&self, key: &EntityKey) -> Option<&MetricRecord> {
        self.records.get(key)
    }

    /// The records sorted by key, for presentation.

    pub fn sorted(&self) -> Vec<(&EntityKey, &MetricRecord)> {
        let mut v = self.records.iter().collect::<Vec<_>>();
        v.sort_by(|a, b| a.0.cmp(b.0));
        v
    }
}

/// Run one poll: fetch the family's raw output from `source` and parse it.
///
/// A failure to obtain output is fatal to this poll and is returned as an error; there is no retry.
/// Anything wrong with the output itself is absorbed and counted in the snapshot's stats.

pub fn poll(family: &Family, source: &dyn Source) -> anyhow::Result<Snapshot> {
    use anyhow::Context;

    let raw = source
        .fetch()
        .with_context(|| format!("Source unavailable for family '{}'", family.name))?;
    let snapshot = parse(family, &raw);
    tracing::debug!(
        family = family.name,
        bytes = raw.len(),
        records = snapshot.records.len(),
        lines = snapshot.stats.lines,
        malformed = snapshot.stats.malformed,
        defaulted = snapshot.stats.defaulted,
        duplicates = snapshot.stats.duplicates,
        "poll complete"
    );
    Ok(snapshot)
}
