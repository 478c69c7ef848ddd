// Print the parsed records for inspection, one row per (family, key, attribute), or as JSON.
//
// This is the view to use when checking what the parser made of a cluster's output before pointing
// Prometheus at it.  Families that failed to poll have already been reported and are left out.

use crate::collect::Outcome;
use crate::format;

use anyhow::{bail, Result};
use serde_json::{json, Value};
use slurmstat::EntityKey;
use std::collections::HashMap;
use std::io;

pub const DEFAULT_FIELDS: &str = "family,key,attr,value";

struct Datum {
    family: &'static str,
    key: String,
    attr: &'static str,
    value: String,
}

fn key_text(key: &EntityKey) -> String {
    match key {
        EntityKey::Global => "-".to_string(),
        EntityKey::Simple(s) => s.clone(),
        EntityKey::Composite(a, b) => format!("{a}:{b}"),
    }
}

fn key_json(key: &EntityKey) -> Value {
    match key {
        EntityKey::Global => Value::Null,
        EntityKey::Simple(s) => json!(s),
        EntityKey::Composite(a, b) => json!([a, b]),
    }
}

fn rows(outcomes: &[Outcome]) -> Vec<Datum> {
    let mut data = vec![];
    for s in outcomes.iter().filter_map(|o| o.snapshot()) {
        for (key, record) in s.sorted() {
            for (attr, value) in record.iter() {
                data.push(Datum {
                    family: s.family,
                    key: key_text(key),
                    attr,
                    value: match value {
                        slurmstat::Value::Number(n) => n.to_string(),
                        slurmstat::Value::Label(l) => l.clone(),
                    },
                })
            }
        }
    }
    data
}

pub fn print_table(
    output: &mut dyn io::Write,
    outcomes: &[Outcome],
    fmt: Option<&str>,
    header: bool,
    csv: bool,
) -> Result<()> {
    let mut formatters: HashMap<&'static str, fn(&Datum) -> String> = HashMap::new();
    formatters.insert("family", |d| d.family.to_string());
    formatters.insert("key", |d| d.key.clone());
    formatters.insert("attr", |d| d.attr.to_string());
    formatters.insert("value", |d| d.value.clone());

    let spec = fmt.unwrap_or(DEFAULT_FIELDS);
    let (fields, others) = format::parse_fields(spec, &formatters);
    if !others.is_empty() {
        bail!("Unknown field names for --fmt: {}", others.join(","));
    }
    if fields.is_empty() {
        bail!("No output fields were selected in format string {spec}");
    }
    format::format_data(output, &fields, &formatters, header, csv, rows(outcomes).as_slice())?;
    Ok(())
}

pub fn print_json(output: &mut dyn io::Write, outcomes: &[Outcome]) -> Result<()> {
    let mut items = vec![];
    for s in outcomes.iter().filter_map(|o| o.snapshot()) {
        for (key, record) in s.sorted() {
            items.push(json!({
                "family": s.family,
                "key": key_json(key),
                "attributes": record,
            }));
        }
    }
    serde_json::to_writer_pretty(&mut *output, &Value::Array(items))?;
    writeln!(output)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use slurmstat::{families, parse};

    fn outcomes() -> Vec<Outcome> {
        vec![
            Outcome {
                family: &families::CPUS,
                result: Ok(parse(&families::CPUS, b"120/344/16/480\n")),
            },
            Outcome {
                family: &families::NODE_MEM,
                result: Ok(parse(
                    &families::NODE_MEM,
                    b"c1-1:1000:3000:4000:mixed:gpu\n",
                )),
            },
            Outcome {
                family: &families::USERS,
                result: Err(anyhow::anyhow!("squeue: command not found")),
            },
        ]
    }

    #[test]
    fn test_csv_table() {
        let mut out = vec![];
        print_table(&mut out, &outcomes(), None, true, true).unwrap();
        let s = String::from_utf8(out).unwrap();
        assert!(s.starts_with("family,key,attr,value\n"));
        assert!(s.contains("cpus,-,total,480\n"));
        assert!(s.contains("node_mem,allocated:gpu,memory,1000\n"));
        assert!(s.contains("node_mem,idle:gpu,memory,3000\n"));
        assert!(!s.contains("users"));
    }

    #[test]
    fn test_bad_fmt() {
        let mut out = vec![];
        assert!(print_table(&mut out, &outcomes(), Some("key,bogus"), false, false).is_err());
        assert!(print_table(&mut out, &outcomes(), Some(""), false, false).is_err());
    }

    #[test]
    fn test_json() {
        let mut out = vec![];
        print_json(&mut out, &outcomes()).unwrap();
        let v: Value = serde_json::from_slice(&out).unwrap();
        let items = v.as_array().unwrap();
        assert!(items.len() == 3);
        assert!(items[0]["family"] == "cpus");
        assert!(items[0]["key"].is_null());
        assert!(items[0]["attributes"]["alloc"] == 120.0);
        assert!(items[1]["key"] == json!(["allocated", "gpu"]));
    }
}
