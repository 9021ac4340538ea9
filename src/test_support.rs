//! Throwaway upstream repositories for tests.
//!
//! Upstreams are built with libgit2 so fixtures never depend on the CLI;
//! tests that clone or pull still need `git` and skip themselves without it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use git2::{Commit, Oid, Repository, RepositoryInitOptions, Signature};

use crate::mirror::{GitCli, MirrorAction, MirrorError, ProbeError};
use crate::sync::{LocalMirror, Upstream};
use crate::types::Fingerprint;

/// Deterministic, distinct fingerprints for fakes.
pub fn fingerprint(n: u32) -> Fingerprint {
    format!("{:040x}", n + 1).parse().expect("valid fingerprint")
}

pub fn git_available() -> bool {
    if GitCli::new().is_available() {
        true
    } else {
        eprintln!("skipping test: git binary not found on PATH");
        false
    }
}

/// A non-bare repository on disk acting as the remote.
pub struct UpstreamRepo {
    pub repo: Repository,
    pub path: PathBuf,
}

impl UpstreamRepo {
    /// Create an upstream whose `main` branch has a single commit.
    pub fn init(path: &Path) -> Self {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(path, &opts).expect("init upstream");
        let upstream = Self {
            repo,
            path: path.to_path_buf(),
        };
        upstream.commit_file("README.md", "hello\n");
        upstream
    }

    pub fn url(&self) -> String {
        self.path.display().to_string()
    }

    /// Write `name`, stage it, and commit on top of HEAD.
    pub fn commit_file(&self, name: &str, contents: &str) -> Fingerprint {
        let full = self.path.join(name);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&full, contents).expect("write file");

        let mut index = self.repo.index().expect("index");
        index.add_path(Path::new(name)).expect("add path");
        index.write().expect("write index");
        let tree_id = index.write_tree().expect("write tree");
        let tree = self.repo.find_tree(tree_id).expect("find tree");

        let sig = signature();
        let parent = self
            .repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&Commit<'_>> = parent.iter().collect();

        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, &format!("update {}", name), &tree, &parents)
            .expect("commit");
        Fingerprint::from(oid)
    }

    /// Point `main` at a brand new root commit, unrelated to the old history.
    pub fn rewrite_history(&self) -> Fingerprint {
        let mut builder = self.repo.treebuilder(None).expect("treebuilder");
        let blob = self.repo.blob(b"rewritten\n").expect("blob");
        builder
            .insert("REWRITTEN.md", blob, 0o100644)
            .expect("insert");
        let tree_id = builder.write().expect("write tree");
        let tree = self.repo.find_tree(tree_id).expect("find tree");

        let sig = signature();
        let oid: Oid = self
            .repo
            .commit(None, &sig, &sig, "rewrite", &tree, &[])
            .expect("orphan commit");
        self.repo
            .reference("refs/heads/main", oid, true, "force rewrite")
            .expect("move main");
        Fingerprint::from(oid)
    }

    pub fn tip(&self) -> Fingerprint {
        let oid = self
            .repo
            .refname_to_id("refs/heads/main")
            .expect("resolve main");
        Fingerprint::from(oid)
    }
}

fn signature() -> Signature<'static> {
    Signature::now("Mirror Test", "mirror-test@example.com").expect("signature")
}

/// What the fake upstream answers with.
#[derive(Debug, Clone)]
pub enum ProbeMode {
    Tip,
    Timeout,
    Malformed,
}

/// In-memory upstream that counts probes and can be paused mid-probe.
pub struct FakeUpstream {
    tip: Arc<Mutex<Fingerprint>>,
    mode: Mutex<ProbeMode>,
    probes: AtomicUsize,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl FakeUpstream {
    pub fn new(tip: Fingerprint) -> Self {
        Self {
            tip: Arc::new(Mutex::new(tip)),
            mode: Mutex::new(ProbeMode::Tip),
            probes: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    /// Shared handle so a fake mirror can "fetch" the current tip.
    pub fn tip_handle(&self) -> Arc<Mutex<Fingerprint>> {
        Arc::clone(&self.tip)
    }

    pub fn set_tip(&self, tip: Fingerprint) {
        *self.tip.lock().unwrap() = tip;
    }

    pub fn tip(&self) -> Fingerprint {
        self.tip.lock().unwrap().clone()
    }

    pub fn set_mode(&self, mode: ProbeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Make the next probes announce themselves on `entered` and then block
    /// until something arrives on `release`.
    pub fn pause_probes(&self, entered: Sender<()>, release: Receiver<()>) {
        *self.gate.lock().unwrap() = Some((entered, release));
    }
}

impl Upstream for FakeUpstream {
    fn remote_fingerprint(&self) -> Result<Fingerprint, ProbeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv_timeout(Duration::from_secs(10));
        }

        match self.mode.lock().unwrap().clone() {
            ProbeMode::Tip => Ok(self.tip()),
            ProbeMode::Timeout => Err(ProbeError::ProbeTimeout(Duration::from_secs(30))),
            ProbeMode::Malformed => crate::mirror::parse_ls_remote("abc\trefs/heads/main", "main"),
        }
    }
}

/// In-memory mirror: `ensure` copies the upstream tip.
pub struct FakeMirror {
    path: PathBuf,
    local: Mutex<Option<Fingerprint>>,
    upstream_tip: Arc<Mutex<Fingerprint>>,
    ensure_failure: Mutex<Option<MirrorError>>,
    ensures: AtomicUsize,
    head_broken: AtomicBool,
}

impl FakeMirror {
    pub fn empty(upstream_tip: Arc<Mutex<Fingerprint>>) -> Self {
        Self {
            path: PathBuf::from("/nonexistent/fake-mirror"),
            local: Mutex::new(None),
            upstream_tip,
            ensure_failure: Mutex::new(None),
            ensures: AtomicUsize::new(0),
            head_broken: AtomicBool::new(false),
        }
    }

    pub fn at(local: Fingerprint, upstream_tip: Arc<Mutex<Fingerprint>>) -> Self {
        let mirror = Self::empty(upstream_tip);
        *mirror.local.lock().unwrap() = Some(local);
        mirror
    }

    /// Root `list_files` reads from.
    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = path.to_path_buf();
        self
    }

    pub fn local(&self) -> Option<Fingerprint> {
        self.local.lock().unwrap().clone()
    }

    pub fn fail_next_ensure(&self, err: MirrorError) {
        *self.ensure_failure.lock().unwrap() = Some(err);
    }

    pub fn ensure_count(&self) -> usize {
        self.ensures.load(Ordering::SeqCst)
    }

    /// Keep validating but fail HEAD reads with `NoCommits` until the next
    /// `ensure`, which reclones.
    pub fn break_head(&self) {
        self.head_broken.store(true, Ordering::SeqCst);
    }
}

impl LocalMirror for FakeMirror {
    fn local_path(&self) -> &Path {
        &self.path
    }

    fn validate(&self) -> Result<(), MirrorError> {
        if self.local.lock().unwrap().is_some() {
            Ok(())
        } else {
            Err(MirrorError::ValidationFailed {
                path: self.path.clone(),
                reason: "not cloned".into(),
            })
        }
    }

    fn local_fingerprint(&self) -> Result<Fingerprint, MirrorError> {
        if self.head_broken.load(Ordering::SeqCst) {
            return Err(MirrorError::NoCommits);
        }
        self.local
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| MirrorError::NotCloned(self.path.clone()))
    }

    fn ensure(&self) -> Result<MirrorAction, MirrorError> {
        self.ensures.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.ensure_failure.lock().unwrap().take() {
            return Err(err);
        }

        let tip = self.upstream_tip.lock().unwrap().clone();
        let mut local = self.local.lock().unwrap();
        let action = match local.as_ref() {
            _ if self.head_broken.swap(false, Ordering::SeqCst) => MirrorAction::Recloned,
            None => MirrorAction::Cloned,
            Some(current) if *current == tip => MirrorAction::Unchanged,
            Some(_) => MirrorAction::Pulled,
        };
        *local = Some(tip);
        Ok(action)
    }
}
