// Fold split records into per-entity metric records.
//
// Every metric family is described by a `Family` value: how its lines are split, how many fields a
// usable line has, whether duplicate lines are dropped first, and a `fold` function that looks at
// one record and says which attributes of which entities it updates, and how.  The loop that owns
// the map, counts what it skips, and applies derived attributes is the same for every family and
// lives here.
//
// Within one pass there is at most one record per key; it is created the first time the key is
// mentioned and every later mention updates it in place.  Overwritten attributes are therefore
// "last line wins" in input order, accumulated ones are running sums.  Derived attributes are
// recomputed for each key a line touched, after all of that line's direct updates.

use crate::{dedupe, lines, parse_size, records};
use crate::{EntityKey, MetricMap, MetricRecord, ParseStats, RawRecord, Snapshot, Value};

use std::ops::RangeInclusive;
use std::str::FromStr;
use tracing::debug;

/// How repeated mentions of one attribute for one key combine.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Merge {
    Overwrite,
    Accumulate,
}

/// An attribute computed from other attributes of the same record, never from input directly.  If
/// `compute` returns None the attribute is left as it was.

pub struct Derived {
    pub attr: &'static str,
    pub compute: fn(&MetricRecord) -> Option<f64>,
}

/// The declarative description of one metric family.

pub struct Family {
    /// Short stable name, used in logs, file names, and labels.
    pub name: &'static str,

    /// Field separator in the command output.
    pub delimiter: u8,

    /// Number of fields a usable line has.  Other lines are counted as malformed and skipped.
    pub fields: RangeInclusive<usize>,

    /// Sort and drop duplicate lines before folding.
    pub dedupe: bool,

    /// Numeric attributes set to zero when a record is created.
    pub initial: &'static [&'static str],

    /// Attributes recomputed after each line, in order.
    pub derived: &'static [Derived],

    /// Turn one record into updates.
    pub fold: fn(&mut Row<'_>),
}

#[derive(Debug)]
enum Op {
    Touch,
    Merge(Merge, Value),
}

#[derive(Debug)]
struct Update {
    key: EntityKey,
    attr: &'static str,
    op: Op,
}

/// The view a family's `fold` function has of one input line: field accessors that apply the
/// zero-on-failure policy (and count it), and methods to emit updates.

pub struct Row<'a> {
    record: &'a RawRecord,
    stats: &'a mut ParseStats,
    updates: Vec<Update>,
}

impl<'a> Row<'a> {
    /// Field `i` as text, or "" if the line is shorter than that.

    pub fn text(&self, i: usize) -> &'a str {
        self.record.get(i).unwrap_or("")
    }

    pub fn has(&self, i: usize) -> bool {
        i < self.record.len()
    }

    /// Field `i` as a number.  Anything unparseable is 0.0 and is counted.

    pub fn number(&mut self, i: usize) -> f64 {
        let s = self.text(i);
        match f64::from_str(s) {
            Ok(v) if v.is_finite() => v,
            _ => {
                self.defaulted(i, s);
                0.0
            }
        }
    }

    /// Field `i` as a size in MB, see units.rs.  A bare zero is zero in any unit.  Anything else
    /// unparseable is 0.0 and is counted.

    pub fn megabytes(&mut self, i: usize) -> f64 {
        let s = self.text(i);
        match parse_size(s) {
            Some(v) => v,
            None if f64::from_str(s) == Ok(0.0) => 0.0,
            None => {
                self.defaulted(i, s);
                0.0
            }
        }
    }

    /// Make sure a record exists for `key` even if this line updates nothing in it.

    pub fn touch(&mut self, key: &EntityKey) {
        self.updates.push(Update {
            key: key.clone(),
            attr: "",
            op: Op::Touch,
        });
    }

    pub fn overwrite(&mut self, key: &EntityKey, attr: &'static str, value: impl Into<Value>) {
        self.updates.push(Update {
            key: key.clone(),
            attr,
            op: Op::Merge(Merge::Overwrite, value.into()),
        });
    }

    pub fn accumulate(&mut self, key: &EntityKey, attr: &'static str, amount: f64) {
        self.updates.push(Update {
            key: key.clone(),
            attr,
            op: Op::Merge(Merge::Accumulate, Value::Number(amount)),
        });
    }

    fn defaulted(&mut self, i: usize, s: &str) {
        self.stats.defaulted += 1;
        debug!(field = i, value = s, "unparseable field taken as zero");
    }
}

/// Fold `records` into a fresh snapshot according to `family`.  Never fails: lines with the wrong
/// number of fields are skipped and counted, and no usable lines simply means no records.

pub fn aggregate<I>(family: &Family, records: I) -> Snapshot
where
    I: IntoIterator<Item = RawRecord>,
{
    let mut map = MetricMap::new();
    let mut stats = ParseStats::default();

    for record in records {
        stats.lines += 1;
        if !family.fields.contains(&record.len()) {
            stats.malformed += 1;
            debug!(
                family = family.name,
                fields = record.len(),
                line = %record.fields().join(","),
                "skipping malformed line"
            );
            continue;
        }

        let updates = {
            let mut row = Row {
                record: &record,
                stats: &mut stats,
                updates: vec![],
            };
            (family.fold)(&mut row);
            row.updates
        };

        let mut touched: Vec<EntityKey> = vec![];
        for Update { key, attr, op } in updates {
            if !touched.contains(&key) {
                touched.push(key.clone());
            }
            let entry = map.entry(key).or_insert_with(|| fresh_record(family));
            match op {
                Op::Touch => {}
                Op::Merge(Merge::Overwrite, value) => entry.set(attr, value),
                Op::Merge(Merge::Accumulate, Value::Number(amount)) => entry.add(attr, amount),
                Op::Merge(Merge::Accumulate, value) => entry.set(attr, value),
            }
        }

        for key in &touched {
            if let Some(entry) = map.get_mut(key) {
                for d in family.derived {
                    if let Some(v) = (d.compute)(entry) {
                        entry.set(d.attr, Value::Number(v));
                    }
                }
            }
        }
    }

    Snapshot {
        family: family.name,
        records: map,
        stats,
    }
}

/// Split `raw` for `family`, dropping duplicate lines first if the family wants that, and fold the
/// result.

pub fn parse(family: &Family, raw: &[u8]) -> Snapshot {
    if family.dedupe {
        let all = lines(raw);
        let unique = dedupe(&all);
        let joined = unique.join("\n");
        let mut snapshot = aggregate(family, records(joined.as_bytes(), family.delimiter));
        snapshot.stats.duplicates = all.len() - unique.len();
        snapshot
    } else {
        aggregate(family, records(raw, family.delimiter))
    }
}

fn fresh_record(family: &Family) -> MetricRecord {
    let mut r = MetricRecord::default();
    for attr in family.initial {
        r.set(*attr, Value::Number(0.0));
    }
    r
}

// The tests use a small made-up family: "name,total,free,count,tag" keyed by name.

#[cfg(test)]
mod test {
    use super::*;

    fn fold_test(row: &mut Row) {
        let key = EntityKey::Simple(row.text(0).to_string());
        let total = row.number(1);
        let free = row.number(2);
        let count = row.number(3);
        row.overwrite(&key, "total", total);
        row.overwrite(&key, "free", free);
        row.accumulate(&key, "count", count);
        if row.has(4) {
            row.overwrite(&key, "tag", row.text(4));
        }
    }

    fn used(r: &MetricRecord) -> Option<f64> {
        Some(r.number("total")? - r.number("free")?)
    }

    static TEST: Family = Family {
        name: "test",
        delimiter: b',',
        fields: 4..=5,
        dedupe: false,
        initial: &["seen"],
        derived: &[Derived { attr: "used", compute: used }],
        fold: fold_test,
    };

    static TEST_DEDUPE: Family = Family {
        name: "test_dedupe",
        delimiter: b',',
        fields: 4..=5,
        dedupe: true,
        initial: &[],
        derived: &[],
        fold: fold_test,
    };

    fn key(s: &str) -> EntityKey {
        EntityKey::Simple(s.to_string())
    }

    #[test]
    fn test_overwrite_and_accumulate() {
        let s = parse(&TEST, b"a,100,10,1\na,200,50,2,x\nb,10,5,7\n");
        assert!(s.records.len() == 2);
        let a = s.get(&key("a")).unwrap();
        assert!(a.number("total") == Some(200.0));
        assert!(a.number("free") == Some(50.0));
        assert!(a.number("count") == Some(3.0));
        assert!(a.label("tag") == Some("x"));
        assert!(a.number("seen") == Some(0.0));
        let b = s.get(&key("b")).unwrap();
        assert!(b.number("count") == Some(7.0));
        assert!(b.get("tag").is_none());
    }

    #[test]
    fn test_derived_uses_latest_line() {
        // The derived value must come from the last total/free pair, not a mix of lines.
        let s = parse(&TEST, b"a,100,10,1\na,200,50,1\n");
        assert!(s.get(&key("a")).unwrap().number("used") == Some(150.0));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let good = parse(&TEST, b"a,100,10,1\nb,10,5,7\n");
        let mixed = parse(&TEST, b"a,100,10,1\nbad,line\nb,10,5,7\na,1,2,3,4,5,6\n");
        assert!(good.records == mixed.records);
        assert!(mixed.stats.malformed == 2);
        assert!(mixed.stats.lines == 4);
    }

    #[test]
    fn test_unparseable_numbers_are_counted() {
        let s = parse(&TEST, b"a,N/A,10,1\n");
        let a = s.get(&key("a")).unwrap();
        assert!(a.number("total") == Some(0.0));
        assert!(a.number("used") == Some(-10.0));
        assert!(s.stats.defaulted == 1);
    }

    fn fold_sizes(row: &mut Row) {
        let key = EntityKey::Simple(row.text(0).to_string());
        let size = row.megabytes(1);
        row.overwrite(&key, "size", size);
    }

    static TEST_SIZES: Family = Family {
        name: "test_sizes",
        delimiter: b',',
        fields: 2..=2,
        dedupe: false,
        initial: &[],
        derived: &[],
        fold: fold_sizes,
    };

    #[test]
    fn test_bare_zero_size() {
        let s = parse(&TEST_SIZES, b"a,0\nb,0.0\nc,12\nd,1G\n");
        assert!(s.get(&key("a")).unwrap().number("size") == Some(0.0));
        assert!(s.get(&key("b")).unwrap().number("size") == Some(0.0));
        assert!(s.get(&key("c")).unwrap().number("size") == Some(0.0));
        assert!(s.get(&key("d")).unwrap().number("size") == Some(1024.0));
        assert!(s.stats.defaulted == 1);
    }

    #[test]
    fn test_empty_input() {
        let s = parse(&TEST, b"");
        assert!(s.records.is_empty());
        assert!(s.stats == ParseStats::default());

        let s = parse(&TEST, b"no delimiters here\n\n");
        assert!(s.records.is_empty());
        assert!(s.stats.lines == 0);
    }

    #[test]
    fn test_idempotent() {
        let raw = b"a,100,10,1\na,200,50,2\nb,10,5,7\n";
        assert!(parse(&TEST, raw) == parse(&TEST, raw));
    }

    #[test]
    fn test_dedupe_family() {
        let s = parse(&TEST_DEDUPE, b"a,1,1,1\na,1,1,1\na,1,1,2\n");
        assert!(s.get(&key("a")).unwrap().number("count") == Some(3.0));
        assert!(s.stats.duplicates == 1);
        assert!(s.stats.lines == 2);
    }
}
