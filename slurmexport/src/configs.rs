// Read exporter configuration from a json file.
//
// The file holds one object { ... } with the following named fields, all optional:
//
//   families - array of strings, the metric families to poll [default: all]
//   timeout_secs - integer, per-command timeout in seconds [default: none]
//   sinfo - string, path of the sinfo program [default: "sinfo" on the PATH]
//   squeue - string, path of the squeue program [default: "squeue" on the PATH]
//   filesystem - object, where and how to run df for the filesystem family:
//     host - string, file server to ssh to; without it df runs locally
//     user - string, remote login name
//     identity - string, ssh identity file
//     port - integer, ssh port
//     command - string, shell command printing "mount,size,used" lines
//
// Unknown fields are ignored so that a file can carry notes for humans.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path;

// See above comment block for field documentation.

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub families: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub sinfo: String,
    pub squeue: String,
    pub filesystem: FilesystemConfig,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilesystemConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub identity: Option<String>,
    pub port: Option<u16>,
    pub command: Option<String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            families: vec![],
            timeout_secs: None,
            sinfo: "sinfo".to_string(),
            squeue: "squeue".to_string(),
            filesystem: Default::default(),
        }
    }
}

// As for the system config files in the log analyzer, the input is human-generated and mostly
// optional, so it goes through the generic JSON parser and is decoded field by field.

pub fn read_from_json(filename: &str) -> Result<Config> {
    let file = File::open(path::Path::new(filename))
        .with_context(|| format!("Can't open config file {filename}"))?;
    let reader = BufReader::new(file);
    let v = serde_json::from_reader(reader)
        .with_context(|| format!("Can't parse config file {filename}"))?;
    decode(&v)
}

fn decode(v: &Value) -> Result<Config> {
    let Value::Object(fields) = v else {
        bail!("Expected an object value")
    };
    let mut cfg = Config::default();
    if let Some(fs) = fields.get("families") {
        if let Value::Array(names) = fs {
            for name in names {
                if let Value::String(s) = name {
                    cfg.families.push(s.clone());
                } else {
                    bail!("Field 'families' must hold only strings");
                }
            }
        } else {
            bail!("Field 'families' must have an array value");
        }
    }
    cfg.timeout_secs = grab_u64(fields, "timeout_secs")?;
    if let Some(s) = grab_string(fields, "sinfo")? {
        cfg.sinfo = s;
    }
    if let Some(s) = grab_string(fields, "squeue")? {
        cfg.squeue = s;
    }
    if let Some(fs) = fields.get("filesystem") {
        let Value::Object(fs) = fs else {
            bail!("Field 'filesystem' must have an object value")
        };
        cfg.filesystem.host = grab_string(fs, "host")?;
        cfg.filesystem.user = grab_string(fs, "user")?;
        cfg.filesystem.identity = grab_string(fs, "identity")?;
        cfg.filesystem.command = grab_string(fs, "command")?;
        cfg.filesystem.port = match grab_u64(fs, "port")? {
            Some(p) if p > 0 && p <= u16::MAX as u64 => Some(p as u16),
            Some(p) => bail!("Field 'port' out of range: {p}"),
            None => None,
        };
    }
    Ok(cfg)
}

fn grab_string(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Option<String>> {
    match fields.get(name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => bail!("Field '{name}' must have a string value"),
    }
}

fn grab_u64(fields: &serde_json::Map<String, Value>, name: &str) -> Result<Option<u64>> {
    match fields.get(name) {
        None => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(n) = n.as_u64() {
                Ok(Some(n))
            } else {
                bail!("Field '{name}' must have unsigned integer value")
            }
        }
        Some(_) => bail!("Field '{name}' must have an integer value"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn from_str(s: &str) -> Result<Config> {
        decode(&serde_json::from_str(s)?)
    }

    #[test]
    fn test_read_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slurmexport.json");
        let mut f = File::create(&path).unwrap();
        f.write_all(
            br#"{
  "families": ["nodes", "filesystem"],
  "timeout_secs": 20,
  "sinfo": "/opt/slurm/bin/sinfo",
  "filesystem": {
    "host": "fs01.cluster",
    "user": "monitor",
    "identity": "/etc/slurmexport/id_ed25519",
    "port": 2222,
    "command": "df -hP /home /scratch"
  },
  "comment": "ignored"
}"#,
        )
        .unwrap();
        drop(f);

        let cfg = read_from_json(path.to_str().unwrap()).unwrap();
        assert!(cfg.families == vec!["nodes", "filesystem"]);
        assert!(cfg.timeout_secs == Some(20));
        assert!(cfg.sinfo == "/opt/slurm/bin/sinfo");
        assert!(cfg.squeue == "squeue");
        assert!(cfg.filesystem.host.as_deref() == Some("fs01.cluster"));
        assert!(cfg.filesystem.user.as_deref() == Some("monitor"));
        assert!(cfg.filesystem.identity.as_deref() == Some("/etc/slurmexport/id_ed25519"));
        assert!(cfg.filesystem.port == Some(2222));
        assert!(cfg.filesystem.command.as_deref() == Some("df -hP /home /scratch"));
    }

    #[test]
    fn test_empty_config() {
        assert!(from_str("{}").unwrap() == Config::default());
    }

    #[test]
    fn test_bad_configs() {
        assert!(from_str("[]").is_err());
        assert!(from_str(r#"{"families": "nodes"}"#).is_err());
        assert!(from_str(r#"{"families": [1]}"#).is_err());
        assert!(from_str(r#"{"timeout_secs": -1}"#).is_err());
        assert!(from_str(r#"{"timeout_secs": "10"}"#).is_err());
        assert!(from_str(r#"{"filesystem": "fs01"}"#).is_err());
        assert!(from_str(r#"{"filesystem": {"port": 70000}}"#).is_err());
        assert!(read_from_json("/no/such/dir/slurmexport.json").is_err());
    }
}
