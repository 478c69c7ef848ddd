// Split raw command output into delimiter-separated records.
//
// The CSV reader does the line handling for us (LF or CRLF, blank lines skipped) but it is
// configured to know nothing about quoting: a `"` in a pending-reason or a feature list is just a
// character.  Fields are trimmed, since `sinfo -O` pads its columns and squeue's format string
// starts with a space.
//
// A line that has no delimiter at all comes out as a single-field record.  Those are headers, blank
// padding, or junk at the end of the output, and are dropped here without comment.  Lines that do
// have the delimiter but the wrong number of fields are the family's business, see aggregate.rs.

/// One line of output, split on the family's delimiter.

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecord {
    fields: Vec<String>,
}

impl RawRecord {
    pub fn new(fields: Vec<String>) -> RawRecord {
        RawRecord { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&str> {
        self.fields.get(i).map(|s| s.as_str())
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Lazily split `raw` into records on `delimiter`.  Lines without the delimiter, and lines that are
/// not valid UTF8, are skipped.

pub fn records(raw: &[u8], delimiter: u8) -> impl Iterator<Item = RawRecord> + '_ {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .delimiter(delimiter)
        .from_reader(raw)
        .into_records()
        .filter_map(|r| match r {
            Ok(record) => {
                if record.len() < 2 {
                    None
                } else {
                    Some(RawRecord::new(record.iter().map(|f| f.to_string()).collect()))
                }
            }
            Err(e) => {
                // Reading from a slice cannot produce an I/O error, so this is bad UTF8.
                tracing::debug!(error = %e, "dropping undecodable line");
                None
            }
        })
}

/// The trimmed, non-empty lines of `raw`, in order.  Invalid UTF8 is replaced rather than dropped
/// so that the line still takes part in deduplication.

pub fn lines(raw: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

#[cfg(test)]
fn fields_of(raw: &str, delimiter: u8) -> Vec<Vec<String>> {
    records(raw.as_bytes(), delimiter)
        .map(|r| r.fields().to_vec())
        .collect()
}

#[test]
fn test_records_drop_lines_without_delimiter() {
    let x = fields_of("NODELIST,STATE\nheader without commas\n\n4,idle\n2,mixed\ntrailing junk", b',');
    assert!(x.len() == 3);
    assert!(x[0] == vec!["NODELIST", "STATE"]);
    assert!(x[1] == vec!["4", "idle"]);
    assert!(x[2] == vec!["2", "mixed"]);
}

#[test]
fn test_records_delimiters() {
    let x = fields_of(" 1234|alice|PENDING|4|2G|Resources\n", b'|');
    assert!(x == vec![vec!["1234", "alice", "PENDING", "4", "2G", "Resources"]]);

    let x = fields_of("10/20/2/32\n", b'/');
    assert!(x == vec![vec!["10", "20", "2", "32"]]);

    // sinfo -O pads with blanks before the separator.
    let x = fields_of("c1-1      :0         :mixed     :gpu\r\n", b':');
    assert!(x == vec![vec!["c1-1", "0", "mixed", "gpu"]]);
}

#[test]
fn test_records_no_quoting() {
    // A stray quote must not swallow the rest of the input.
    let x = fields_of("1|bob|PENDING|1|1G|\"odd reason\n2|bob|RUNNING|1|1G|None\n", b'|');
    assert!(x.len() == 2);
    assert!(x[0][5] == "\"odd reason");
    assert!(x[1][2] == "RUNNING");
}

#[test]
fn test_records_ragged() {
    // Field counts are not checked here.
    let x = fields_of("a,b\na,b,c,d\n", b',');
    assert!(x[0].len() == 2);
    assert!(x[1].len() == 4);
}

#[test]
fn test_records_is_pure() {
    let raw = b"a,b\nc,d\n";
    assert!(records(raw, b',').collect::<Vec<_>>() == records(raw, b',').collect::<Vec<_>>());
}

#[test]
fn test_lines() {
    assert!(lines(b"  4,idle \n\n4,idle\r\n 2,mixed") == vec!["4,idle", "4,idle", "2,mixed"]);
    assert!(lines(b"").is_empty());
}
