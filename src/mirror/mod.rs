//! Git plumbing and the local mirror

mod files;
mod git;
mod lock;
mod probe;
mod repo;

pub use files::list_files;
pub use git::{
    GitCli, GitError, head_commit, open_repository, origin_url, validate_git_ref,
    validate_source_url,
};
pub use lock::{DEFAULT_LOCK_TIMEOUT, MirrorLock, lock_path_for};
pub use probe::{DEFAULT_PROBE_TIMEOUT, ProbeError, RemoteProbe, parse_ls_remote};
pub use repo::{
    DEFAULT_GIT_TIMEOUT, MirrorAction, MirrorError, PullOutcome, RepositoryMirror,
    is_fatal_pull_error, urls_match,
};
