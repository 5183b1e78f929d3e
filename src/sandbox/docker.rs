use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;
use tokio::time::timeout;
use uuid::Uuid;

use super::{ContainerOutput, ContainerRun, ContainerRuntime, LIMITS, SandboxError};

/// Exit codes `docker run` reserves for its own failures. A program that
/// exits with one of these itself is indistinguishable through `docker run`
/// and is reported as a launch failure too.
const LAUNCH_FAILURE_CODES: std::ops::RangeInclusive<i32> = 125..=127;

const ENGINE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs containers through the `docker` CLI
pub struct DockerRuntime {
    docker_binary: String,
    /// `uid:gid` the sandboxed process runs as
    user: String,
    handle: Handle,
}

impl DockerRuntime {
    /// `handle` drives the CLI processes; `run` is called from blocking
    /// threads of the same runtime
    pub fn new(docker_binary: impl Into<String>, handle: Handle) -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            docker_binary: docker_binary.into(),
            user: format!("{uid}:{gid}"),
            handle,
        }
    }

    /// Asks the daemon for its version, to surface a missing engine at startup
    pub async fn server_version(&self) -> Result<String, SandboxError> {
        let mut command = tokio::process::Command::new(&self.docker_binary);
        command
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = timeout(ENGINE_CALL_TIMEOUT, command.output())
            .await
            .map_err(|_| SandboxError::Timeout {
                after: ENGINE_CALL_TIMEOUT,
            })?
            .map_err(SandboxError::Spawn)?;

        if !output.status.success() {
            return Err(SandboxError::Launch {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run_async(&self, spec: &ContainerRun) -> Result<ContainerOutput, SandboxError> {
        let name = format!("twincheck-{}", Uuid::new_v4().simple());
        let args = docker_args(spec, &name, Some(&self.user));
        log::debug!("Starting container {name} from {}", spec.image);

        let mut child = tokio::process::Command::new(&self.docker_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::Spawn)?;
        let pid = child.id();

        let limit = LIMITS.output_bytes;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collect = async move {
            let (stdout, stderr) =
                tokio::try_join!(read_capped(stdout, limit), read_capped(stderr, limit))?;
            let status = child.wait().await.map_err(Capture::Io)?;
            Ok::<_, Capture>(Output {
                status,
                stdout,
                stderr,
            })
        };

        let failure = match timeout(spec.timeout, collect).await {
            Ok(Ok(output)) => return classify(output),
            Ok(Err(Capture::Io(e))) => SandboxError::Spawn(e),
            Ok(Err(Capture::Overflow)) => {
                log::warn!("Container {name} exceeded {limit} bytes of output, killing it");
                SandboxError::OutputLimit { limit }
            }
            Err(_) => {
                log::warn!("Container {name} exceeded {:?}, killing it", spec.timeout);
                SandboxError::Timeout {
                    after: spec.timeout,
                }
            }
        };

        if let Some(pid) = pid {
            kill_process_group(pid);
        }
        self.force_remove(&name).await;
        Err(failure)
    }

    /// Killing the CLI does not stop the container itself
    async fn force_remove(&self, name: &str) {
        let mut removal = tokio::process::Command::new(&self.docker_binary);
        removal
            .args(["rm", "-f", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match timeout(ENGINE_CALL_TIMEOUT, removal.status()).await {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => log::warn!("docker rm -f {name} exited with {status}"),
            Ok(Err(e)) => log::warn!("Failed to run docker rm -f {name}: {e}"),
            Err(_) => log::warn!("docker rm -f {name} timed out"),
        }
    }
}

impl ContainerRuntime for DockerRuntime {
    fn run(&self, spec: &ContainerRun) -> Result<ContainerOutput, SandboxError> {
        self.handle.block_on(self.run_async(spec))
    }
}

fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: plain syscall on a process group we created; ESRCH is fine
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        log::debug!(
            "killpg({pgid}) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

#[derive(Debug)]
enum Capture {
    Io(std::io::Error),
    Overflow,
}

/// Reads a pipe to its end, giving up once it carries more than `limit` bytes
async fn read_capped<R>(stream: Option<R>, limit: u64) -> Result<Vec<u8>, Capture>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(stream) = stream {
        stream
            .take(limit + 1)
            .read_to_end(&mut buf)
            .await
            .map_err(Capture::Io)?;
    }
    if buf.len() as u64 > limit {
        return Err(Capture::Overflow);
    }
    Ok(buf)
}

fn classify(output: Output) -> Result<ContainerOutput, SandboxError> {
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    match output.status.code() {
        Some(code) if LAUNCH_FAILURE_CODES.contains(&code) => Err(SandboxError::Launch {
            code: Some(code),
            stderr,
        }),
        Some(exit_code) => Ok(ContainerOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
            exit_code,
        }),
        None => Err(SandboxError::Launch {
            code: None,
            stderr: format!("container engine terminated by signal: {stderr}"),
        }),
    }
}

/// Full argument list for `docker`, hardening flags first
pub(super) fn docker_args(spec: &ContainerRun, name: &str, user: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = [
        "run",
        "--rm",
        "--name",
        name,
        "--network",
        "none",
        "--read-only",
        "--security-opt",
        "no-new-privileges",
        "--cap-drop",
        "ALL",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    args.extend([
        format!("--pids-limit={}", LIMITS.pids),
        format!("--memory={}m", LIMITS.memory_mib),
        format!("--memory-swap={}m", LIMITS.memory_mib),
        format!("--cpus={}", LIMITS.cpus),
        format!(
            "--tmpfs=/tmp:rw,noexec,nosuid,nodev,size={}m",
            LIMITS.tmp_size_mib
        ),
        format!(
            "--tmpfs=/run:rw,noexec,nosuid,nodev,size={}m",
            LIMITS.run_size_mib
        ),
        "--env=HOME=/tmp".to_string(),
    ]);

    if let Some(user) = user {
        args.push(format!("--user={user}"));
    }

    for mount in &spec.mounts {
        let mode = if mount.read_only { "ro" } else { "rw" };
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:{mode}",
            mount.host.display(),
            mount.target
        ));
    }

    args.push(format!("--workdir={}", spec.workdir));
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt;
    use std::process::{ExitStatus, Output};

    use super::*;
    use crate::sandbox::Mount;

    fn spec() -> ContainerRun {
        ContainerRun {
            image: "gcc:13".to_string(),
            mounts: vec![
                Mount::read_only("/var/tmp/ws/src", "/src"),
                Mount::writable("/var/tmp/ws/build", "/build"),
            ],
            workdir: "/work".to_string(),
            command: vec!["g++".to_string(), "/src/main.cpp".to_string()],
            timeout: Duration::from_secs(5),
        }
    }

    fn output(raw_status: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(raw_status),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_docker_args_carry_every_limit() {
        let args = docker_args(&spec(), "twincheck-test", Some("1000:1000"));
        for flag in [
            "--rm",
            "--read-only",
            "no-new-privileges",
            "--pids-limit=128",
            "--memory=256m",
            "--cpus=0.5",
            "--tmpfs=/tmp:rw,noexec,nosuid,nodev,size=16m",
            "--tmpfs=/run:rw,noexec,nosuid,nodev,size=1m",
            "--user=1000:1000",
        ] {
            assert!(args.iter().any(|a| a == flag), "missing {flag} in {args:?}");
        }
        let network = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[network + 1], "none");
    }

    #[test]
    fn test_docker_args_order() {
        let args = docker_args(&spec(), "twincheck-test", None);
        assert_eq!(&args[..4], ["run", "--rm", "--name", "twincheck-test"]);
        assert!(args.contains(&"/var/tmp/ws/src:/src:ro".to_string()));
        assert!(args.contains(&"/var/tmp/ws/build:/build:rw".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--user")));

        // Image comes after every option, followed only by the command
        let image = args.iter().position(|a| a == "gcc:13").unwrap();
        assert_eq!(&args[image + 1..], ["g++", "/src/main.cpp"]);
        assert_eq!(args[image - 1], "--workdir=/work");
    }

    #[test]
    fn test_classify_exit_codes() {
        // Raw wait statuses: exit code lives in the high byte
        let ok = classify(output(0, "y=1\n", "")).unwrap();
        assert_eq!(ok.stdout, "y=1\n");
        assert!(ok.success());

        let failed = classify(output(3 << 8, "", "boom")).unwrap();
        assert_eq!(failed.exit_code, 3);
        assert_eq!(failed.stderr, "boom");

        let launch =
            classify(output(125 << 8, "", "Cannot connect to the Docker daemon")).unwrap_err();
        assert!(matches!(launch, SandboxError::Launch { code: Some(125), .. }));

        let signalled = classify(output(libc::SIGKILL, "", "")).unwrap_err();
        assert!(matches!(signalled, SandboxError::Launch { code: None, .. }));
    }

    #[test]
    fn test_reserved_exit_codes_are_launch_failures() {
        // A program calling exit(126) cannot be told apart from the engine
        for code in [126, 127] {
            let err = classify(output(code << 8, "", "")).unwrap_err();
            assert!(matches!(err, SandboxError::Launch { code: Some(c), .. } if c == code));
        }
        assert_eq!(classify(output(124 << 8, "", "")).unwrap().exit_code, 124);
        assert_eq!(classify(output(128 << 8, "", "")).unwrap().exit_code, 128);
    }

    #[tokio::test]
    async fn test_output_is_read_up_to_the_limit() {
        let exact = read_capped(Some(&b"y=20.4\n"[..]), 7).await.unwrap();
        assert_eq!(exact, b"y=20.4\n");

        let empty = read_capped(None::<&[u8]>, 7).await.unwrap();
        assert!(empty.is_empty());

        let flood = "x".repeat(4096).repeat(64);
        let overflow = read_capped(Some(flood.as_bytes()), 4096).await.unwrap_err();
        assert!(matches!(overflow, Capture::Overflow));
    }
}
