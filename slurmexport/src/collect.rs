// Decide where each family's output comes from, and poll the families.
//
// The sinfo/squeue families run locally.  The filesystem family runs df on the file server over ssh
// when a host is configured, otherwise locally through the shell.  A family with no known command
// fails to poll.  With a capture directory every family instead reads <dir>/<family>.txt, which is
// how captured output is replayed.
//
// Families are polled concurrently, one thread each.  A poll that fails does not affect the others.

use crate::configs::Config;

use anyhow::{bail, Result};
use slurmstat::families;
use slurmstat::{CommandSource, FileSource, Family, RemoteSource, Snapshot, Source};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// The df pipeline: one "mount,size,used" line per filesystem, pseudo filesystems dropped.

pub const DF_COMMAND: &str =
    "df -hP | awk 'NR>1 && $1 !~ /^(tmpfs|devtmpfs|overlay)$/ {print $6\",\"$2\",\"$3}'";

pub struct Settings {
    pub config: Config,
    pub capture_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

/// The result of polling one family.

pub struct Outcome {
    pub family: &'static Family,
    pub result: Result<Snapshot>,
}

impl Outcome {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.result.as_ref().ok()
    }
}

pub fn source_for(family: &Family, settings: &Settings) -> Result<Box<dyn Source>> {
    if let Some(ref dir) = settings.capture_dir {
        return Ok(Box::new(capture_file(dir, family)));
    }
    let cfg = &settings.config;
    let sinfo = |args: &[&str]| {
        Box::new(CommandSource::new(&cfg.sinfo, args).with_timeout(settings.timeout))
            as Box<dyn Source>
    };
    let source: Box<dyn Source> = match family.name {
        "nodes" => sinfo(&["-h", "-o", "%D,%T"]),
        "node_info" => sinfo(&["-h", "-e", "-N", "-o", "%n,%e,%m,%c,%O,%T,%b,%w"]),
        "node_mem" => sinfo(&[
            "-h",
            "-N",
            "-O",
            "NodeHost:64:,AllocMem:16:,FreeMem:16:,Memory:16:,StateLong:24:,Features:256",
        ]),
        "cpus" => sinfo(&["-h", "-o", "%C"]),
        "users" => Box::new(
            CommandSource::new(&cfg.squeue, &["-a", "-r", "-h", "-o", "%A|%u|%T|%C|%m|%r"])
                .with_timeout(settings.timeout),
        ),
        "filesystem" => {
            let command = cfg.filesystem.command.as_deref().unwrap_or(DF_COMMAND);
            match cfg.filesystem.host {
                Some(ref host) => Box::new(
                    RemoteSource::new(host, command)
                        .with_user(cfg.filesystem.user.clone())
                        .with_identity(cfg.filesystem.identity.as_ref().map(PathBuf::from))
                        .with_port(cfg.filesystem.port)
                        .with_timeout(settings.timeout),
                ),
                None => Box::new(
                    CommandSource::new("sh", &["-c", command]).with_timeout(settings.timeout),
                ),
            }
        }
        _ => bail!("No command for family '{}'", family.name),
    };
    Ok(source)
}

fn capture_file(dir: &Path, family: &Family) -> FileSource {
    FileSource::new(dir.join(format!("{}.txt", family.name)))
}

/// Poll `selected` concurrently.  Outcomes come back in the order of `selected`.

pub fn collect(selected: &[&'static Family], settings: &Settings) -> Vec<Outcome> {
    let sources = selected
        .iter()
        .map(|f| source_for(f, settings))
        .collect::<Vec<_>>();
    thread::scope(|s| {
        let handles = selected
            .iter()
            .zip(sources)
            .map(|(family, source)| {
                let family: &'static Family = *family;
                s.spawn(move || match source {
                    Ok(source) => poll_one(family, source.as_ref()),
                    Err(e) => {
                        warn!(family = family.name, "{:#}", e);
                        Outcome {
                            family,
                            result: Err(e),
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .zip(selected.iter())
            .map(|(h, family)| match h.join() {
                Ok(outcome) => outcome,
                Err(_) => Outcome {
                    family: *family,
                    result: Err(anyhow::anyhow!("Poll of family '{}' panicked", family.name)),
                },
            })
            .collect()
    })
}

fn poll_one(family: &'static Family, source: &dyn Source) -> Outcome {
    let result = slurmstat::poll(family, source);
    match result {
        Ok(ref snapshot) => {
            info!(
                family = family.name,
                records = snapshot.records.len(),
                skipped = snapshot.stats.malformed,
                defaulted = snapshot.stats.defaulted,
                "polled {}",
                source.describe()
            );
        }
        Err(ref e) => {
            warn!(family = family.name, "{:#}", e);
        }
    }
    Outcome { family, result }
}

/// Resolve family names, or all families if there are none.

pub fn select_families(names: &[String]) -> Result<Vec<&'static Family>> {
    if names.is_empty() {
        return Ok(families::ALL.to_vec());
    }
    let mut selected: Vec<&'static Family> = vec![];
    for name in names {
        match families::by_name(name) {
            Some(f) => {
                if !selected.iter().any(|s| s.name == f.name) {
                    selected.push(f)
                }
            }
            None => anyhow::bail!(
                "Unknown family '{}', expected one of: {}",
                name,
                families::ALL.iter().map(|f| f.name).collect::<Vec<_>>().join(", ")
            ),
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod test {
    use super::*;

    fn settings(capture_dir: Option<PathBuf>) -> Settings {
        Settings {
            config: Config::default(),
            capture_dir,
            timeout: None,
        }
    }

    #[test]
    fn test_select_families() {
        assert!(select_families(&[]).unwrap().len() == families::ALL.len());
        let s = select_families(&["users".to_string(), "cpus".to_string(), "users".to_string()])
            .unwrap();
        assert!(s.iter().map(|f| f.name).collect::<Vec<_>>() == vec!["users", "cpus"]);
        assert!(select_families(&["gpus".to_string()]).is_err());
    }

    #[test]
    fn test_default_sources() {
        let s = settings(None);
        let src = source_for(&families::CPUS, &s).unwrap();
        assert!(src.describe() == "sinfo -h -o %C");
        let src = source_for(&families::USERS, &s).unwrap();
        assert!(src.describe() == "squeue -a -r -h -o %A|%u|%T|%C|%m|%r");
        let src = source_for(&families::FILESYSTEM, &s).unwrap();
        assert!(src.describe().starts_with("sh -c df -hP"));

        let mut s = settings(None);
        s.config.filesystem.host = Some("fs01".to_string());
        let src = source_for(&families::FILESYSTEM, &s).unwrap();
        assert!(src.describe().starts_with("ssh fs01: df -hP"));
    }

    fn fold_nothing(_: &mut slurmstat::Row) {}

    static GPUS: Family = Family {
        name: "gpus",
        delimiter: b',',
        fields: 2..=2,
        dedupe: false,
        initial: &[],
        derived: &[],
        fold: fold_nothing,
    };

    #[test]
    fn test_unknown_family_has_no_source() {
        let e = source_for(&GPUS, &settings(None)).err().unwrap();
        assert!(e.to_string().contains("'gpus'"));

        let outcomes = collect(&[&GPUS], &settings(None));
        assert!(outcomes[0].result.is_err());
        assert!(outcomes[0].family.name == "gpus");

        // Captured output is still read by name.
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gpus.txt"), "a,b\n").unwrap();
        let src = source_for(&GPUS, &settings(Some(dir.path().to_path_buf()))).unwrap();
        assert!(src.fetch().unwrap() == b"a,b\n");
    }

    #[test]
    fn test_collect_from_captures() {
        let s = settings(Some(PathBuf::from("../slurmstat/test_data")));
        let outcomes = collect(&[&families::CPUS, &families::NODES], &s);
        assert!(outcomes.len() == 2);
        assert!(outcomes[0].family.name == "cpus");
        let cpus = outcomes[0].snapshot().unwrap();
        assert!(cpus.get(&slurmstat::EntityKey::Global).unwrap().number("total") == Some(480.0));
        assert!(outcomes[1].snapshot().is_some());
    }

    #[test]
    fn test_collect_failure_is_per_family() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cpus.txt"), "1/2/3/6\n").unwrap();
        let s = settings(Some(dir.path().to_path_buf()));
        let outcomes = collect(&[&families::USERS, &families::CPUS], &s);
        assert!(outcomes[0].result.is_err());
        assert!(outcomes[1].result.is_ok());
    }
}
