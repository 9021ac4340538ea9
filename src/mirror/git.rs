//! Git operations using a hybrid CLI + libgit2 approach.
//!
//! **CLI (with hardening and a deadline) for operations that talk to the remote:**
//! - `clone` - full clone of the tracked branch
//! - `pull_ff_only` - fetch + fast-forward, never a merge commit
//! - `ls_remote` - tip lookup without fetching objects
//!
//! **libgit2 for read operations:**
//! - `open_repository` - clean API for opening existing repos
//! - `head_commit` - efficient ref/commit reading
//! - `origin_url` - remote configuration lookup

use git2::{ErrorCode, Oid, Repository};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Repository path does not contain a git repo.
    #[error("repository not found at {0}")]
    NotFound(String),
    /// Clone failed.
    #[error("clone failed: {0}")]
    CloneError(String),
    /// Pull failed.
    #[error("pull failed: {0}")]
    PullError(String),
    /// ls-remote failed.
    #[error("ls-remote failed: {0}")]
    LsRemoteError(String),
    /// The git process exceeded its deadline and was killed.
    #[error("git {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Validate that a branch name does not contain dangerous patterns.
///
/// Rejects:
/// - Empty strings
/// - Strings containing `..` (path traversal)
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
pub fn validate_git_ref(value: &str, name: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidInput(format!("{} cannot be empty", name)));
    }
    if value.contains("..") {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain '..'",
            name
        )));
    }
    if value.starts_with('-') {
        return Err(GitError::InvalidInput(format!(
            "{} cannot start with '-'",
            name
        )));
    }
    if value.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain null or control characters",
            name
        )));
    }
    Ok(())
}

/// Validate an upstream address before it is handed to the git CLI.
///
/// Rejects empty values, values starting with `-`, and control characters.
/// Anything else is left for git to interpret (https, ssh, scp-like, local path).
pub fn validate_source_url(url: &str) -> Result<(), GitError> {
    if url.trim().is_empty() {
        return Err(GitError::InvalidInput("source url cannot be empty".into()));
    }
    if url.starts_with('-') {
        return Err(GitError::InvalidInput(
            "source url cannot start with '-'".into(),
        ));
    }
    if url.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(GitError::InvalidInput(
            "source url cannot contain control characters".into(),
        ));
    }
    Ok(())
}

/// Git CLI wrapper with security hardening.
///
/// Every invocation runs under a deadline; a child that outlives it is killed.
#[derive(Debug, Clone)]
pub struct GitCli {
    git_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
        }
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_LFS_SKIP_SMUDGE=1` - skip LFS file downloads
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `core.hooksPath=` - disable hooks execution
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.args(["-c", "core.hooksPath="]);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Report whether a usable git binary is on PATH.
    pub fn is_available(&self) -> bool {
        Command::new(&self.git_path)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Full clone of `url` into `dest`, checking out `branch`.
    ///
    /// Parent directories are created as needed. A destination that did not
    /// exist before the call is removed again if the clone fails.
    pub fn clone(
        &self,
        url: &str,
        dest: &Path,
        branch: &str,
        timeout: Duration,
    ) -> Result<(), GitError> {
        validate_source_url(url)?;
        validate_git_ref(branch, "branch")?;

        let dest_existed = dest.exists();

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut cmd = self.command();
        cmd.args(["clone", "--branch", branch, "--"])
            .arg(url)
            .arg(dest);

        let output = match run_with_timeout(cmd, "clone", timeout) {
            Ok(output) => output,
            Err(err) => {
                if !dest_existed {
                    let _ = std::fs::remove_dir_all(dest);
                }
                return Err(err);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !dest_existed {
                let _ = std::fs::remove_dir_all(dest);
            }
            return Err(GitError::CloneError(stderr.trim().to_string()));
        }

        Ok(())
    }

    /// Fetch `branch` from origin and fast-forward the working copy onto it.
    ///
    /// `--ff-only` guarantees a failed pull leaves HEAD where it was.
    pub fn pull_ff_only(
        &self,
        worktree: &Path,
        branch: &str,
        timeout: Duration,
    ) -> Result<(), GitError> {
        validate_git_ref(branch, "branch")?;

        let mut cmd = self.command();
        cmd.arg("-C")
            .arg(worktree)
            .args(["pull", "--ff-only", "--no-rebase", "origin"])
            .arg(branch);

        let output = run_with_timeout(cmd, "pull", timeout)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::PullError(stderr.trim().to_string()));
        }

        Ok(())
    }

    /// Query the remote for `refs/heads/<branch>` without fetching any objects.
    ///
    /// Returns raw stdout; parsing belongs to the caller.
    pub fn ls_remote(&self, url: &str, branch: &str, timeout: Duration) -> Result<String, GitError> {
        validate_source_url(url)?;
        validate_git_ref(branch, "branch")?;

        let refname = format!("refs/heads/{}", branch);

        let mut cmd = self.command();
        cmd.args(["ls-remote", "--"]).arg(url).arg(&refname);

        let output = run_with_timeout(cmd, "ls-remote", timeout)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::LsRemoteError(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Spawn `cmd` and wait for it, killing the child once `timeout` has elapsed.
///
/// Output pipes are drained on helper threads so a chatty child cannot block
/// on a full pipe while we poll for its exit.
fn run_with_timeout(mut cmd: Command, name: &str, timeout: Duration) -> Result<Output, GitError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    let stdout_handle = child.stdout.take().map(spawn_reader);
    let stderr_handle = child.stderr.take().map(spawn_reader);

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }

        if start.elapsed() >= timeout {
            kill_and_reap(&mut child);
            // Readers are detached: a grandchild (ssh, a remote helper) may
            // still hold the pipes open.
            drop(stdout_handle);
            drop(stderr_handle);
            return Err(GitError::Timeout {
                command: name.to_string(),
                timeout,
            });
        }

        thread::sleep(Duration::from_millis(20));
    };

    Ok(Output {
        status,
        stdout: join_reader(stdout_handle),
        stderr: join_reader(stderr_handle),
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Open an existing repository at the given path.
///
/// Does not search parent directories: a plain directory nested inside some
/// other working copy is reported as `NotFound`.
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    let repo = Repository::open(path).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            GitError::NotFound(path.display().to_string())
        } else {
            GitError::Git(e)
        }
    })?;
    Ok(repo)
}

/// Resolve HEAD to a commit id.
///
/// Returns `Ok(None)` when the branch is unborn (no commits yet).
pub fn head_commit(repo: &Repository) -> Result<Option<Oid>, GitError> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            return Ok(None);
        }
        Err(e) => return Err(GitError::Git(e)),
    };

    let commit = head.peel_to_commit()?;
    Ok(Some(commit.id()))
}

/// URL configured for the `origin` remote, if any.
pub fn origin_url(repo: &Repository) -> Result<Option<String>, GitError> {
    match repo.find_remote("origin") {
        Ok(remote) => Ok(remote.url().map(str::to_string)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(GitError::Git(e)),
    }
}
