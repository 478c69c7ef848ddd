// Data sources: where a family's raw bytes come from.
//
// A source runs one command to completion and hands back everything it printed on stdout.  Spawn
// failures, non-zero exits and timeouts are errors; there is no retry, the next poll simply tries
// again.  Sources hold no mutable state, so concurrent polls only need the commands themselves to
// be safe to run concurrently, which independent subprocesses are.

use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub trait Source: Send + Sync {
    /// The full output of one completed invocation.
    fn fetch(&self) -> Result<Vec<u8>>;

    /// Human-readable description, for logs.
    fn describe(&self) -> String;
}

// How often a command with a timeout is checked for completion.

const WAIT_INTERVAL: Duration = Duration::from_millis(20);

/// A local command, eg `sinfo -h -o %C`.

#[derive(Clone, Debug)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandSource {
    pub fn new(program: &str, args: &[&str]) -> CommandSource {
        CommandSource {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout: None,
        }
    }

    /// Kill the command and fail the fetch if it has not finished after `timeout`.

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> CommandSource {
        self.timeout = timeout;
        self
    }
}

impl Source for CommandSource {
    fn fetch(&self) -> Result<Vec<u8>> {
        run(&self.program, &self.args, self.timeout)
    }

    fn describe(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// A shell command run on another host through the system ssh client.
///
/// Authentication is entirely ssh's business: keys, agent, and known_hosts are used as configured
/// for the user running us.  BatchMode is forced so that a missing key or an unknown host key fails
/// the fetch instead of waiting for a password.

#[derive(Clone, Debug)]
pub struct RemoteSource {
    host: String,
    command: String,
    user: Option<String>,
    identity: Option<PathBuf>,
    port: Option<u16>,
    timeout: Option<Duration>,
}

impl RemoteSource {
    pub fn new(host: &str, command: &str) -> RemoteSource {
        RemoteSource {
            host: host.to_string(),
            command: command.to_string(),
            user: None,
            identity: None,
            port: None,
            timeout: None,
        }
    }

    pub fn with_user(mut self, user: Option<String>) -> RemoteSource {
        self.user = user;
        self
    }

    pub fn with_identity(mut self, identity: Option<PathBuf>) -> RemoteSource {
        self.identity = identity;
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> RemoteSource {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> RemoteSource {
        self.timeout = timeout;
        self
    }

    /// The arguments passed to `ssh`.

    pub fn ssh_args(&self) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(t) = self.timeout {
            // Leave the overall timeout to us, but don't let the connect eat all of it.
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={}", t.as_secs().max(1)));
        }
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(ref identity) = self.identity {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        if let Some(ref user) = self.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        args.push(self.host.clone());
        args.push(self.command.clone());
        args
    }
}

impl Source for RemoteSource {
    fn fetch(&self) -> Result<Vec<u8>> {
        run("ssh", &self.ssh_args(), self.timeout)
    }

    fn describe(&self) -> String {
        format!("ssh {}: {}", self.host, self.command)
    }
}

/// Previously captured output, for replay and testing.

#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> FileSource {
        FileSource { path: path.into() }
    }
}

impl Source for FileSource {
    fn fetch(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).with_context(|| format!("reading {}", self.path.display()))
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

// stdout and stderr are drained on their own threads so that a chatty command cannot block on a
// full pipe while we wait for it.

fn run(program: &str, args: &[String], timeout: Option<Duration>) -> Result<Vec<u8>> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("error running: {:?}", cmd))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_reader = thread::spawn(move || drain(stdout));
    let err_reader = thread::spawn(move || drain(stderr));

    let status = match timeout {
        None => child.wait()?,
        Some(limit) => {
            let start = Instant::now();
            loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if start.elapsed() >= limit {
                    // The readers are abandoned; they finish when the pipes close.
                    let _ = child.kill();
                    let _ = child.wait();
                    bail!("timed out after {:?}: {:?}", limit, cmd);
                }
                thread::sleep(WAIT_INTERVAL);
            }
        }
    };

    let out = out_reader
        .join()
        .map_err(|_| anyhow!("stdout reader panicked: {:?}", cmd))?
        .with_context(|| format!("reading output of: {:?}", cmd))?;
    let err = err_reader
        .join()
        .map_err(|_| anyhow!("stderr reader panicked: {:?}", cmd))?
        .unwrap_or_default();

    if !status.success() {
        bail!(
            "error running: {:?}: {}: {}",
            cmd,
            status,
            String::from_utf8_lossy(&err).trim()
        );
    }
    Ok(out)
}

fn drain<R: Read>(r: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = vec![];
    if let Some(mut r) = r {
        r.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

#[cfg(all(test, unix))]
mod test {
    use super::*;

    #[test]
    fn test_command_output() {
        let s = CommandSource::new("sh", &["-c", "printf '4,idle\\n2,mixed\\n'"]);
        assert!(s.fetch().unwrap() == b"4,idle\n2,mixed\n");
    }

    #[test]
    fn test_command_failures() {
        // Non-zero exit, with stderr in the message
        let e = CommandSource::new("sh", &["-c", "echo nope >&2; exit 3"]).fetch().unwrap_err();
        assert!(format!("{:#}", e).contains("nope"));

        // No such program
        assert!(CommandSource::new("/no/such/program/sinfo", &[]).fetch().is_err());
    }

    #[test]
    fn test_command_timeout() {
        let s = CommandSource::new("sleep", &["5"]).with_timeout(Some(Duration::from_millis(100)));
        let start = Instant::now();
        let e = s.fetch().unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(format!("{}", e).contains("timed out"));

        let s = CommandSource::new("true", &[]).with_timeout(Some(Duration::from_secs(10)));
        assert!(s.fetch().unwrap().is_empty());
    }

    #[test]
    fn test_ssh_args() {
        let r = RemoteSource::new("fileserver", "df -hP");
        assert!(r.ssh_args() == vec!["-o", "BatchMode=yes", "fileserver", "df -hP"]);

        let r = RemoteSource::new("fileserver", "df -hP")
            .with_user(Some("monitor".to_string()))
            .with_identity(Some(PathBuf::from("/etc/slurmexport/id_ed25519")))
            .with_port(Some(2222))
            .with_timeout(Some(Duration::from_secs(15)));
        assert!(
            r.ssh_args()
                == vec![
                    "-o",
                    "BatchMode=yes",
                    "-o",
                    "ConnectTimeout=15",
                    "-p",
                    "2222",
                    "-i",
                    "/etc/slurmexport/id_ed25519",
                    "-l",
                    "monitor",
                    "fileserver",
                    "df -hP"
                ]
        );
    }

    #[test]
    fn test_file_source() {
        assert!(FileSource::new("test_data/cpus.txt").fetch().unwrap() == b"120/344/16/480\n");
        assert!(FileSource::new("test_data/nope.txt").fetch().is_err());
    }
}
