// Copyright (c) 2024-2026 Tern Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Strategy selection, fallback, atomic write-back, and metrics.
//!
//! Every invocation — success or failure, dry-run or not — records exactly
//! one [`DiffMetric`].  Writes are buffered in memory and flushed only after
//! every hunk of every section has applied, so a failing patch leaves the
//! filesystem byte-identical to its pre-invocation state.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tern_config::{PatchConfig, PatchStrategy};
use tern_metrics::{DiffMetric, DiffStrategy, DiffTracker};

use crate::dialect::{is_patch_dialect, parse_patch, FileOp, FileSection, Hunk};
use crate::local::{apply_section, normalize_ws};
use crate::remote::RemoteClient;
use crate::PatchError;

/// One edit request against the engine.
#[derive(Debug, Clone)]
pub struct PatchRequest {
    /// Workspace-relative target.  Dialect patches may address additional
    /// files through their own section headers.
    pub target_file: String,
    /// Human instructions describing the intent of the edit.
    pub instructions: String,
    /// Either a structured patch in the local dialect or a free-form edit
    /// with `... existing code ...` sentinels.
    pub code_edit: String,
    pub strategy: PatchStrategy,
    pub dry_run: bool,
}

/// The result of a successful apply.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    /// Which engine produced the final content.
    pub strategy: DiffStrategy,
    pub fallback_used: bool,
    /// `M`/`A`/`D` lines, one per touched file.
    pub summary: String,
    /// New content of the target file.
    pub updated: String,
}

enum PlannedWrite {
    Write(String),
    Delete,
}

pub struct PatchEngine {
    root: PathBuf,
    config: PatchConfig,
    remote: Option<RemoteClient>,
    tracker: Arc<DiffTracker>,
    /// Serializes writers per target path.
    path_locks: StdMutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PatchEngine {
    pub fn new(
        root: impl Into<PathBuf>,
        config: PatchConfig,
        api_key: Option<String>,
        tracker: Arc<DiffTracker>,
    ) -> Self {
        let remote = config.remote_url.as_ref().map(|url| {
            RemoteClient::new(
                url,
                api_key,
                config.model.clone(),
                std::time::Duration::from_secs(config.timeout_secs),
            )
        });
        Self {
            root: root.into(),
            config,
            remote,
            tracker,
            path_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Apply one edit request.  Exactly one metric is recorded regardless of
    /// outcome.
    pub async fn apply(
        &self,
        req: PatchRequest,
        cancel: &CancellationToken,
    ) -> Result<PatchOutcome, PatchError> {
        let started = Instant::now();
        let target_abs = self.root.join(&req.target_file);
        let original = tokio::fs::read_to_string(&target_abs).await.unwrap_or_default();
        let file_size = original.len() as u64;

        let result = self.route(&req, &original, cancel).await;

        let (strategy, fallback_used, fallback_reason, updated_length, error) = match &result {
            Ok(outcome) => (
                outcome.strategy,
                outcome.fallback_used,
                outcome
                    .fallback_used
                    .then(|| "remote strategy failed".to_string()),
                outcome.updated.len(),
                None,
            ),
            Err(e) => (
                match req.strategy {
                    PatchStrategy::Local => DiffStrategy::Local,
                    PatchStrategy::Remote => DiffStrategy::Remote,
                    PatchStrategy::Auto if is_patch_dialect(&req.code_edit) => DiffStrategy::Local,
                    PatchStrategy::Auto => DiffStrategy::Remote,
                },
                false,
                None,
                original.len(),
                Some(e.to_string()),
            ),
        };

        self.tracker
            .record(&DiffMetric {
                timestamp: chrono::Utc::now(),
                strategy,
                file: req.target_file.clone(),
                file_size_bytes: file_size,
                execution_time_ms: started.elapsed().as_millis() as u64,
                success: result.is_ok(),
                error,
                original_length: original.len(),
                updated_length,
                fallback_used,
                fallback_reason,
            })
            .await;

        result
    }

    async fn route(
        &self,
        req: &PatchRequest,
        original: &str,
        cancel: &CancellationToken,
    ) -> Result<PatchOutcome, PatchError> {
        match req.strategy {
            PatchStrategy::Local => self.apply_local(req, original).await,
            PatchStrategy::Remote => match self.apply_remote(req, original, cancel).await {
                Ok(outcome) => Ok(outcome),
                Err(PatchError::Cancelled) => Err(PatchError::Cancelled),
                // A missing endpoint is a precondition failure, not a remote
                // failure; it never falls back.
                Err(e @ PatchError::NoRemoteConfigured) => Err(e),
                Err(e) if self.config.enable_fallback => {
                    warn!("remote patch failed ({e}); falling back to local patcher");
                    self.apply_synthesized(req, original)
                        .await
                        .map(|o| PatchOutcome { fallback_used: true, ..o })
                }
                Err(e) => Err(e),
            },
            PatchStrategy::Auto => {
                if is_patch_dialect(&req.code_edit) {
                    return self.apply_local(req, original).await;
                }
                match self.apply_remote(req, original, cancel).await {
                    Ok(outcome) => Ok(outcome),
                    Err(PatchError::Cancelled) => Err(PatchError::Cancelled),
                    Err(e) if self.config.enable_fallback => {
                        warn!("remote patch failed ({e}); synthesizing local patch");
                        self.apply_synthesized(req, original)
                            .await
                            .map(|o| PatchOutcome { fallback_used: true, ..o })
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    // ── Remote path ───────────────────────────────────────────────────────────

    async fn apply_remote(
        &self,
        req: &PatchRequest,
        _original: &str,
        cancel: &CancellationToken,
    ) -> Result<PatchOutcome, PatchError> {
        let Some(remote) = &self.remote else {
            return Err(PatchError::NoRemoteConfigured);
        };
        let target_abs = self.root.join(&req.target_file);
        let file_content = tokio::fs::read_to_string(&target_abs).await.unwrap_or_default();
        let updated = remote
            .apply(&req.instructions, &file_content, &req.code_edit, cancel)
            .await?;

        if !req.dry_run {
            self.write_atomic(&target_abs, &updated).await?;
        }
        Ok(PatchOutcome {
            strategy: DiffStrategy::Remote,
            fallback_used: false,
            summary: format!("M {}", req.target_file),
            updated,
        })
    }

    // ── Local path ────────────────────────────────────────────────────────────

    /// Apply `code_edit` locally: a dialect patch is applied as-is, anything
    /// else goes through synthesis.
    async fn apply_local(
        &self,
        req: &PatchRequest,
        original: &str,
    ) -> Result<PatchOutcome, PatchError> {
        if is_patch_dialect(&req.code_edit) {
            self.apply_dialect(req).await
        } else {
            self.apply_synthesized(req, original).await
        }
    }

    /// Apply a structured dialect patch.  All sections are applied in memory
    /// first; nothing touches disk until every hunk has succeeded.
    async fn apply_dialect(&self, req: &PatchRequest) -> Result<PatchOutcome, PatchError> {
        let set = parse_patch(&req.code_edit)?;
        let mut planned: Vec<(String, PathBuf, PlannedWrite)> = Vec::new();
        let mut summary: Vec<String> = Vec::new();
        let mut target_updated: Option<String> = None;

        for section in &set.sections {
            let abs = self.root.join(&section.path);
            match &section.op {
                FileOp::Update(_) => {
                    let content = tokio::fs::read_to_string(&abs)
                        .await
                        .map_err(PatchError::Io)?;
                    let new_content = apply_section(&content, section)?;
                    if section.path == req.target_file || target_updated.is_none() {
                        target_updated = Some(new_content.clone());
                    }
                    summary.push(format!("M {}", section.path));
                    planned.push((section.path.clone(), abs, PlannedWrite::Write(new_content)));
                }
                FileOp::Add(content) => {
                    if section.path == req.target_file || target_updated.is_none() {
                        target_updated = Some(content.clone());
                    }
                    summary.push(format!("A {}", section.path));
                    planned.push((section.path.clone(), abs, PlannedWrite::Write(content.clone())));
                }
                FileOp::Delete => {
                    summary.push(format!("D {}", section.path));
                    planned.push((section.path.clone(), abs, PlannedWrite::Delete));
                }
            }
        }

        if !req.dry_run {
            for (path, abs, write) in &planned {
                match write {
                    PlannedWrite::Write(content) => self.write_atomic(abs, content).await?,
                    PlannedWrite::Delete => {
                        debug!(path = %path, "deleting file");
                        match tokio::fs::remove_file(abs).await {
                            Ok(()) => {}
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => return Err(PatchError::Io(e)),
                        }
                    }
                }
            }
        }

        Ok(PatchOutcome {
            strategy: DiffStrategy::Local,
            fallback_used: false,
            summary: summary.join("\n"),
            updated: target_updated.unwrap_or_default(),
        })
    }

    /// Synthesize a dialect patch from a free-form edit and apply it.
    async fn apply_synthesized(
        &self,
        req: &PatchRequest,
        original: &str,
    ) -> Result<PatchOutcome, PatchError> {
        let hunks = synthesize_hunks(original, &req.code_edit)?;
        let section = FileSection {
            path: req.target_file.clone(),
            op: FileOp::Update(hunks),
        };
        let updated = apply_section(original, &section)?;
        if !req.dry_run {
            let abs = self.root.join(&req.target_file);
            self.write_atomic(&abs, &updated).await?;
        }
        Ok(PatchOutcome {
            strategy: DiffStrategy::Local,
            fallback_used: false,
            summary: format!("M {}", req.target_file),
            updated,
        })
    }

    // ── Write-back ────────────────────────────────────────────────────────────

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.path_locks.lock().unwrap();
        Arc::clone(
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Write-then-rename, preserving the file mode of an existing target.
    async fn write_atomic(&self, path: &Path, content: &str) -> Result<(), PatchError> {
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let existing_perms = std::fs::metadata(path).ok().map(|m| m.permissions());

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| PatchError::Io(e.error))?;

        if let Some(perms) = existing_perms {
            let _ = std::fs::set_permissions(path, perms);
        }
        Ok(())
    }
}

// ─── Patch synthesis ──────────────────────────────────────────────────────────

/// True for `... existing code ...` sentinel lines, with or without a
/// comment prefix.
fn is_sentinel(line: &str) -> bool {
    let t = line.trim();
    let t = t
        .trim_start_matches("//")
        .trim_start_matches('#')
        .trim_start_matches("/*")
        .trim_end_matches("*/")
        .trim();
    t.starts_with("...") && t.ends_with("...") && t.to_lowercase().contains("existing code")
}

/// Turn a free-form edit into update hunks.
///
/// The edit is split into blocks at sentinel lines.  Within a block, lines
/// that occur (whitespace-normalized) in the target file become context;
/// everything else becomes an addition.  The first context line of each
/// block is its anchor.  Deletions cannot be inferred from a free-form
/// edit, so blocks with no context line are rejected.
pub(crate) fn synthesize_hunks(file: &str, edit: &str) -> Result<Vec<Hunk>, PatchError> {
    let file_lines: std::collections::HashSet<String> =
        file.lines().map(normalize_ws).collect();

    let mut blocks: Vec<Vec<&str>> = vec![Vec::new()];
    for line in edit.lines() {
        if is_sentinel(line) {
            if !blocks.last().map(|b| b.is_empty()).unwrap_or(true) {
                blocks.push(Vec::new());
            }
        } else if let Some(block) = blocks.last_mut() {
            block.push(line);
        }
    }

    let mut hunks = Vec::new();
    for block in blocks {
        // Drop leading/trailing blank lines; they carry no anchor value.
        let trimmed: Vec<&str> = {
            let start = block.iter().position(|l| !l.trim().is_empty());
            let end = block.iter().rposition(|l| !l.trim().is_empty());
            match (start, end) {
                (Some(s), Some(e)) => block[s..=e].to_vec(),
                _ => continue,
            }
        };

        let mut lines: Vec<(char, String)> = Vec::new();
        let mut anchor: Option<String> = None;
        for line in &trimmed {
            let known = file_lines.contains(&normalize_ws(line));
            if known {
                if anchor.is_none() && !line.trim().is_empty() {
                    anchor = Some(line.trim_end().to_string());
                }
                lines.push((' ', line.to_string()));
            } else {
                lines.push(('+', line.to_string()));
            }
        }

        let Some(anchor) = anchor else {
            return Err(PatchError::CannotSynthesize(
                "edit block shares no lines with the target file".into(),
            ));
        };
        hunks.push(Hunk { anchor, lines });
    }

    if hunks.is_empty() {
        return Err(PatchError::CannotSynthesize("edit is empty".into()));
    }
    Ok(hunks)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(root: &Path) -> PatchEngine {
        let tracker = Arc::new(DiffTracker::new(root.join("metrics.jsonl")));
        PatchEngine::new(root, PatchConfig::default(), None, tracker)
    }

    fn engine_with_remote(root: &Path, url: &str) -> PatchEngine {
        let config = PatchConfig {
            remote_url: Some(url.to_string()),
            timeout_secs: 1,
            ..PatchConfig::default()
        };
        let tracker = Arc::new(DiffTracker::new(root.join("metrics.jsonl")));
        PatchEngine::new(root, config, None, tracker)
    }

    fn request(target: &str, edit: &str, strategy: PatchStrategy) -> PatchRequest {
        PatchRequest {
            target_file: target.into(),
            instructions: "apply the change".into(),
            code_edit: edit.into(),
            strategy,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn local_dialect_patch_applies_and_writes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "line one\nline two\nline three\n").unwrap();
        let engine = engine(dir.path());

        let edit = "*** Update File: f.txt\n@@ line two @@\n line one\n line two\n+line two and a half\n line three\n";
        let outcome = engine
            .apply(request("f.txt", edit, PatchStrategy::Local), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.strategy, DiffStrategy::Local);
        assert!(!outcome.fallback_used);
        assert_eq!(outcome.summary, "M f.txt");
        let on_disk = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(on_disk, "line one\nline two\nline two and a half\nline three\n");
    }

    #[tokio::test]
    async fn failing_hunk_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let before = "alpha\nbeta\n";
        std::fs::write(dir.path().join("f.txt"), before).unwrap();
        let engine = engine(dir.path());

        // Second hunk's anchor does not exist.
        let edit = "*** Update File: f.txt\n@@ alpha @@\n alpha\n+inserted\n@@ nonexistent @@\n+more\n";
        let err = engine
            .apply(request("f.txt", edit, PatchStrategy::Local), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::AnchorNotFound { .. }));

        let after = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(after, before, "file must be byte-identical after a failed patch");
    }

    #[tokio::test]
    async fn multi_section_patch_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\n").unwrap();
        let engine = engine(dir.path());

        // First section applies cleanly, second fails: neither may land.
        let edit = "*** Update File: a.txt\n@@ one @@\n-one\n+uno\n*** Update File: missing.txt\n@@ x @@\n+y\n";
        let result = engine
            .apply(request("a.txt", edit, PatchStrategy::Local), &CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one\n");
    }

    #[tokio::test]
    async fn add_and_delete_sections() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.txt"), "bye\n").unwrap();
        let engine = engine(dir.path());

        let edit = "*** Add File: sub/new.txt\n+hello\n*** Delete File: old.txt\n";
        let outcome = engine
            .apply(request("sub/new.txt", edit, PatchStrategy::Local), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.summary, "A sub/new.txt\nD old.txt");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("sub/new.txt")).unwrap(),
            "hello\n"
        );
        assert!(!dir.path().join("old.txt").exists());
    }

    #[tokio::test]
    async fn dry_run_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "a\n").unwrap();
        let engine = engine(dir.path());

        let mut req = request(
            "f.txt",
            "*** Update File: f.txt\n@@ a @@\n-a\n+b\n",
            PatchStrategy::Local,
        );
        req.dry_run = true;
        let outcome = engine.apply(req, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.updated, "b\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "a\n");
    }

    #[tokio::test]
    async fn auto_with_dialect_edit_goes_local_directly() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x\n").unwrap();
        let engine = engine(dir.path());

        let outcome = engine
            .apply(
                request("f.txt", "*** Update File: f.txt\n@@ x @@\n-x\n+y\n", PatchStrategy::Auto),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.strategy, DiffStrategy::Local);
        assert!(!outcome.fallback_used);
    }

    #[tokio::test]
    async fn auto_without_remote_falls_back_to_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.rs"), "fn main() {\n    start();\n}\n").unwrap();
        let engine = engine(dir.path());

        let edit = "fn main() {\n    start();\n    log_init();\n// ... existing code ...\n";
        let outcome = engine
            .apply(request("f.rs", edit, PatchStrategy::Auto), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.strategy, DiffStrategy::Local);
        assert!(outcome.fallback_used, "no remote endpoint counts as a remote failure");
        let on_disk = std::fs::read_to_string(dir.path().join("f.rs")).unwrap();
        assert_eq!(on_disk, "fn main() {\n    start();\n    log_init();\n}\n");
    }

    #[tokio::test]
    async fn auto_with_unreachable_remote_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "keep\n").unwrap();
        let engine = engine_with_remote(dir.path(), "http://127.0.0.1:9");

        let edit = "keep\nadded\n";
        let outcome = engine
            .apply(request("f.txt", edit, PatchStrategy::Auto), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.fallback_used);
        assert_eq!(outcome.strategy, DiffStrategy::Local);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "keep\nadded\n"
        );
    }

    #[tokio::test]
    async fn remote_strategy_without_endpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PatchConfig::default();
        config.enable_fallback = false;
        let tracker = Arc::new(DiffTracker::new(dir.path().join("m.jsonl")));
        let engine = PatchEngine::new(dir.path(), config, None, tracker);

        let err = engine
            .apply(request("f.txt", "whatever", PatchStrategy::Remote), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::NoRemoteConfigured));
    }

    #[tokio::test]
    async fn every_invocation_records_exactly_one_metric() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "a\n").unwrap();
        let tracker = Arc::new(DiffTracker::new(dir.path().join("m.jsonl")));
        let engine = PatchEngine::new(dir.path(), PatchConfig::default(), None, Arc::clone(&tracker));

        // one success
        engine
            .apply(
                request("f.txt", "*** Update File: f.txt\n@@ a @@\n-a\n+b\n", PatchStrategy::Local),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        // one failure
        let _ = engine
            .apply(
                request("f.txt", "*** Update File: f.txt\n@@ zz @@\n+c\n", PatchStrategy::Local),
                &CancellationToken::new(),
            )
            .await;

        let metrics = tracker.query(None, 10).await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert!(metrics[0].success);
        assert!(!metrics[1].success);
        assert!(metrics[1].error.as_deref().unwrap_or("").contains("anchor"));
    }

    // ── Synthesis ─────────────────────────────────────────────────────────────

    #[test]
    fn sentinel_detection() {
        assert!(is_sentinel("// ... existing code ..."));
        assert!(is_sentinel("# ... existing code ..."));
        assert!(is_sentinel("... existing code ..."));
        assert!(!is_sentinel("let x = 1; // trailing"));
        assert!(!is_sentinel("..."));
    }

    #[test]
    fn synthesis_classifies_known_lines_as_context() {
        let file = "a\nb\nc\n";
        let edit = "a\nNEW\nb\n";
        let hunks = synthesize_hunks(file, edit).unwrap();
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].anchor, "a");
        assert_eq!(
            hunks[0].lines,
            vec![
                (' ', "a".to_string()),
                ('+', "NEW".to_string()),
                (' ', "b".to_string()),
            ]
        );
    }

    #[test]
    fn synthesis_splits_blocks_at_sentinels() {
        let file = "one\ntwo\nthree\nfour\n";
        let edit = "one\none-extra\n// ... existing code ...\nthree\nthree-b\n";
        let hunks = synthesize_hunks(file, edit).unwrap();
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].anchor, "one");
        assert_eq!(hunks[1].anchor, "three");
    }

    #[test]
    fn synthesis_without_shared_lines_fails() {
        let err = synthesize_hunks("a\nb\n", "entirely\nnew\ncontent\n").unwrap_err();
        assert!(matches!(err, PatchError::CannotSynthesize(_)));
    }
}
