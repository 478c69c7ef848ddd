// Remove duplicate lines before count-style aggregation.
//
// sinfo prints one row per node (or per partition a node is in) and rows for different nodes can be
// byte-identical once only the derived fields are printed.  For families that want the number of
// distinct signatures rather than the number of rows, we sort and collapse adjacent equal lines.
//
// Equality is plain string equality after trimming.  There is no normalization: `4,idle` and
// `4, idle` are different lines, so the format strings of the commands feeding a deduplicated
// family must not change casually.

use itertools::Itertools;

/// Sort `lines` and drop exact duplicates.  The order of the result carries no meaning.

pub fn dedupe<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .map(|l| l.as_ref().trim().to_string())
        .sorted()
        .dedup()
        .collect()
}

#[test]
fn test_dedupe_counts_signatures() {
    let x = dedupe(["4,idle", "4,idle", "2,mixed"]);
    assert!(x.len() == 2);
    assert!(x.contains(&"4,idle".to_string()));
    assert!(x.contains(&"2,mixed".to_string()));
}

#[test]
fn test_dedupe_is_exact() {
    // Trimming happens, nothing else does.
    let x = dedupe([" 4,idle", "4,idle ", "4, idle", "4,IDLE"]);
    assert!(x.len() == 3);
}

#[test]
fn test_dedupe_empty() {
    assert!(dedupe(Vec::<String>::new()).is_empty());
}
