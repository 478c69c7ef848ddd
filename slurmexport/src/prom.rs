// Render polled snapshots as Prometheus text exposition.
//
// Every metric is a gauge.  Samples are collected per metric name first and written out sorted by
// name and then by label values, so that two renderings of the same snapshots are byte-identical.
// Per-user series are only written when they are positive, to keep the series count proportional
// to the number of active users; everything else is written when it is zero too.  Negative values,
// eg the allocated memory of a node whose free memory exceeds its total, are never written.  A
// family that produced no records has no series at all, only its exporter gauges.

use crate::collect::Outcome;

use anyhow::Result;
use chrono::{DateTime, Utc};
use slurmstat::families::USER_COUNTERS;
use slurmstat::{EntityKey, Snapshot};
use std::collections::BTreeMap;
use std::fmt::Write;

// Node state gauges, by the attribute the nodes family accumulates into.

const NODE_STATES: [&str; 8] = [
    "allocated",
    "completing",
    "down",
    "drained",
    "idle",
    "maintenance",
    "mixed",
    "other",
];

#[derive(Default)]
struct Gauge {
    help: String,
    samples: Vec<(Vec<(&'static str, String)>, f64)>,
}

#[derive(Default)]
struct Exposition {
    gauges: BTreeMap<String, Gauge>,
}

impl Exposition {
    fn add(
        &mut self,
        name: &str,
        help: &str,
        labels: Vec<(&'static str, String)>,
        value: f64,
    ) {
        if value < 0.0 {
            return;
        }
        let g = self.gauges.entry(name.to_string()).or_default();
        if g.help.is_empty() {
            g.help = help.to_string();
        }
        g.samples.push((labels, value));
    }

    fn write(mut self) -> Result<String> {
        let mut output = String::default();
        for (name, g) in self.gauges.iter_mut() {
            g.samples.sort_by(|a, b| a.0.cmp(&b.0));
            writeln!(output, "# HELP {} {}", name, g.help)?;
            writeln!(output, "# TYPE {} gauge", name)?;
            for (labels, value) in &g.samples {
                if labels.is_empty() {
                    writeln!(output, "{} {}", name, value)?;
                } else {
                    let ls = labels
                        .iter()
                        .map(|(k, v)| format!("{}=\"{}\"", k, escape(v)))
                        .collect::<Vec<_>>()
                        .join(",");
                    writeln!(output, "{}{{{}}} {}", name, ls, value)?;
                }
            }
        }
        Ok(output)
    }
}

/// Escape a label value: backslash, double quote and newline.

pub fn escape(s: &str) -> String {
    let mut r = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => r.push_str("\\\\"),
            '"' => r.push_str("\\\""),
            '\n' => r.push_str("\\n"),
            _ => r.push(c),
        }
    }
    r
}

/// The exposition for `outcomes`, plus the exporter's own health gauges, stamped with `now`.

pub fn to_prom(outcomes: &[Outcome], now: DateTime<Utc>) -> Result<String> {
    let mut e = Exposition::default();
    for o in outcomes {
        let family = o.family.name;
        let fam = || vec![("family", family.to_string())];
        match o.snapshot() {
            Some(s) => {
                e.add("slurm_exporter_up", "Whether the last poll of a family succeeded", fam(), 1.0);
                e.add(
                    "slurm_exporter_skipped_lines",
                    "Lines skipped for having the wrong number of fields",
                    fam(),
                    s.stats.malformed as f64,
                );
                e.add(
                    "slurm_exporter_defaulted_fields",
                    "Numeric fields that did not parse and were taken as zero",
                    fam(),
                    s.stats.defaulted as f64,
                );
                add_family(&mut e, s);
            }
            None => {
                e.add("slurm_exporter_up", "Whether the last poll of a family succeeded", fam(), 0.0);
            }
        }
    }
    e.add(
        "slurm_exporter_poll_timestamp_seconds",
        "Time of the poll, seconds since the epoch",
        vec![],
        now.timestamp() as f64,
    );
    e.write()
}

fn add_family(e: &mut Exposition, s: &Snapshot) {
    match s.family {
        "nodes" => {
            let Some(r) = s.get(&EntityKey::Global) else { return };
            for state in NODE_STATES {
                let v = r.number(state).unwrap_or(0.0);
                e.add(
                    &format!("slurm_nodes_{state}"),
                    &format!("Nodes in state {state}"),
                    vec![],
                    v,
                );
            }
        }
        "node_info" => {
            for (key, r) in s.sorted() {
                let EntityKey::Simple(node) = key else { continue };
                let labels = vec![
                    ("node", node.clone()),
                    ("state", r.label("state").unwrap_or("").to_string()),
                    ("totalmem", r.label("totalmem_text").unwrap_or("").to_string()),
                    ("cpus", r.label("cpus_text").unwrap_or("").to_string()),
                    ("feature", r.label("feature").unwrap_or("").to_string()),
                    ("weight", r.label("weight").unwrap_or("").to_string()),
                ];
                for (attr, help) in [
                    ("freemem", "Free node memory (MB)"),
                    ("allocmem", "Allocated node memory (MB)"),
                    ("cpuload", "Node cpu load"),
                ] {
                    if let Some(v) = r.number(attr) {
                        e.add(&format!("slurm_node_{attr}"), help, labels.clone(), v);
                    }
                }
            }
        }
        "node_mem" => {
            for (key, r) in s.sorted() {
                let EntityKey::Composite(state, feature) = key else { continue };
                e.add(
                    "slurm_nodes_bytes",
                    "Node memory (MB) by state and feature, allocated or free as the state implies",
                    vec![("state", state.clone()), ("feature", feature.clone())],
                    r.number("memory").unwrap_or(0.0),
                );
            }
        }
        "cpus" => {
            let Some(r) = s.get(&EntityKey::Global) else { return };
            for attr in ["alloc", "idle", "other", "total"] {
                e.add(
                    &format!("slurm_cpus_{attr}"),
                    &format!("CPUs: {attr}"),
                    vec![],
                    r.number(attr).unwrap_or(0.0),
                );
            }
        }
        "filesystem" => {
            for (key, r) in s.sorted() {
                let EntityKey::Simple(name) = key else { continue };
                for (attr, metric, help) in [
                    ("used", "slurm_fs_used", "Used space in filesystem (MB)"),
                    ("size", "slurm_fs_total", "Total space in filesystem (MB)"),
                ] {
                    e.add(
                        metric,
                        help,
                        vec![("name", name.clone())],
                        r.number(attr).unwrap_or(0.0),
                    );
                }
            }
        }
        "users" => {
            for (key, r) in s.sorted() {
                let EntityKey::Simple(user) = key else { continue };
                for attr in USER_COUNTERS {
                    let v = r.number(attr).unwrap_or(0.0);
                    if v > 0.0 {
                        let (metric, help) = user_metric(attr);
                        e.add(&metric, &help, vec![("user", user.clone())], v);
                    }
                }
            }
        }
        _ => {}
    }
}

// "pendingCpus" -> slurm_user_cpus_pending, "pendingQOS" -> slurm_user_jobs_pendingQOS.

fn user_metric(attr: &str) -> (String, String) {
    if let Some(state) = attr.strip_suffix("Cpus") {
        (format!("slurm_user_cpus_{state}"), format!("CPUs of {state} jobs for user"))
    } else if let Some(state) = attr.strip_suffix("Mem") {
        (format!("slurm_user_mem_{state}"), format!("Memory (MB) of {state} jobs for user"))
    } else {
        (format!("slurm_user_jobs_{attr}"), format!("Jobs {attr} for user"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use slurmstat::{families, parse};

    fn outcome(family: &'static slurmstat::Family, raw: &[u8]) -> Outcome {
        Outcome {
            family,
            result: Ok(parse(family, raw)),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_escape() {
        assert!(escape(r#"a"b\c"#) == r#"a\"b\\c"#);
        assert!(escape("x\ny") == "x\\ny");
        assert!(escape("gpu,a100") == "gpu,a100");
    }

    #[test]
    fn test_nodes_and_cpus() {
        let text = to_prom(
            &[
                outcome(&families::NODES, b"4,idle\n4,idle\n2,mixed\n"),
                outcome(&families::CPUS, b"120/344/16/480\n"),
            ],
            now(),
        )
        .unwrap();
        assert!(text.contains("# TYPE slurm_nodes_idle gauge\nslurm_nodes_idle 4\n"));
        assert!(text.contains("\nslurm_nodes_mixed 2\n"));
        assert!(text.contains("\nslurm_nodes_down 0\n"));
        assert!(text.contains("\nslurm_cpus_total 480\n"));
        assert!(text.contains("slurm_exporter_up{family=\"nodes\"} 1\n"));
        assert!(text.contains("slurm_exporter_poll_timestamp_seconds 1705320000\n"));
    }

    #[test]
    fn test_node_info_labels() {
        let text = to_prom(
            &[outcome(&families::NODE_INFO, b"c1-1,1000,4000,8,2.50,mixed,gpu,10\n")],
            now(),
        )
        .unwrap();
        assert!(text.contains(
            "slurm_node_allocmem{node=\"c1-1\",state=\"mixed\",totalmem=\"4000\",cpus=\"8\",feature=\"gpu\",weight=\"10\"} 3000\n"
        ));
        assert!(text.contains("slurm_node_cpuload{node=\"c1-1\""));
    }

    #[test]
    fn test_node_info_unparsed_labels() {
        let text = to_prom(
            &[outcome(&families::NODE_INFO, b"c1-3,N/A,N/A,N/A,N/A,down
")],
            now(),
        )
        .unwrap();
        assert!(text.contains(
            "slurm_node_freemem{node=\"c1-3\",state=\"down\",totalmem=\"N/A\",cpus=\"N/A\",feature=\"\",weight=\"\"} 0\n"
        ));
    }

    #[test]
    fn test_negative_node_values_dropped() {
        // Free memory above total gives a negative allocmem.
        let text = to_prom(
            &[outcome(&families::NODE_INFO, b"c1-9,70000,64000,16,0.5,idle,(null),1\n")],
            now(),
        )
        .unwrap();
        assert!(!text.contains("slurm_node_allocmem"));
        assert!(text.contains("slurm_node_freemem{node=\"c1-9\",state=\"idle\",totalmem=\"64000\",cpus=\"16\",feature=\"(null)\",weight=\"1\"} 70000\n"));
        assert!(text.contains("slurm_node_cpuload{node=\"c1-9\""));
    }

    #[test]
    fn test_users_only_positive() {
        let text = to_prom(
            &[outcome(
                &families::USERS,
                b"1|alice|PENDING|4|2G|QOSMaxCpuPerUserLimit\n2|bob|COMPLETING|1|1G|None\n",
            )],
            now(),
        )
        .unwrap();
        assert!(text.contains("slurm_user_jobs_pending{user=\"alice\"} 1\n"));
        assert!(text.contains("slurm_user_jobs_pendingQOS{user=\"alice\"} 1\n"));
        assert!(text.contains("slurm_user_cpus_pending{user=\"alice\"} 4\n"));
        assert!(text.contains("slurm_user_mem_pending{user=\"alice\"} 2048\n"));
        assert!(!text.contains("pendingOthers"));
        assert!(!text.contains("bob"));
    }

    #[test]
    fn test_failed_family() {
        let failed = Outcome {
            family: &families::FILESYSTEM,
            result: Err(anyhow::anyhow!("ssh: connect to host fs01 port 22: Connection refused")),
        };
        let text = to_prom(&[failed], now()).unwrap();
        assert!(text.contains("slurm_exporter_up{family=\"filesystem\"} 0\n"));
        assert!(!text.contains("slurm_fs_used"));
    }

    #[test]
    fn test_empty_family() {
        let text = to_prom(&[outcome(&families::CPUS, b"\n")], now()).unwrap();
        assert!(text.contains("slurm_exporter_up{family=\"cpus\"} 1\n"));
        assert!(!text.contains("slurm_cpus_total"));
    }

    #[test]
    fn test_stable_output() {
        let raw = b"/scratch,500G,100G\n/,50G,12G\n/home,2.0T,1.5T\n";
        let a = to_prom(&[outcome(&families::FILESYSTEM, raw)], now()).unwrap();
        let b = to_prom(&[outcome(&families::FILESYSTEM, raw)], now()).unwrap();
        assert!(a == b);
        let root = a.find("slurm_fs_used{name=\"/\"}").unwrap();
        let home = a.find("slurm_fs_used{name=\"/home\"}").unwrap();
        let scratch = a.find("slurm_fs_used{name=\"/scratch\"}").unwrap();
        assert!(root < home && home < scratch);
        assert!(a.contains("slurm_fs_total{name=\"/home\"} 2097152\n"));
    }
}
