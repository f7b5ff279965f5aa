//! `git` subprocess wrapper behind the local `commit_push` tool.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument};

/// What a commit attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Working tree matched HEAD; no commit was made.
    Clean,
    Committed { sha: String, pushed: bool },
}

impl CommitOutcome {
    /// Tool reply text.
    pub fn describe(&self) -> String {
        match self {
            CommitOutcome::Clean => "Nothing to commit".to_string(),
            CommitOutcome::Committed { sha, pushed: true } => format!("Committed and pushed {sha}"),
            CommitOutcome::Committed { sha, pushed: false } => format!("Committed {sha}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn is_repository(&self) -> bool {
        self.git(&["rev-parse", "--is-inside-work-tree"])
            .is_ok_and(|out| out.status.success())
    }

    /// Stage everything, commit with `message`, and optionally push the
    /// current branch to `origin`.
    #[instrument(skip_all, fields(push))]
    pub fn commit_all(&self, message: &str, push: bool) -> Result<CommitOutcome> {
        if !self.is_repository() {
            bail!("{} is not a git repository", self.workdir.display());
        }
        self.checked(&["add", "-A"])?;
        if self.stdout(&["diff", "--cached", "--name-only"])?.trim().is_empty() {
            debug!("nothing staged");
            return Ok(CommitOutcome::Clean);
        }
        self.checked(&["commit", "-q", "-m", message])?;
        let sha = self.stdout(&["rev-parse", "--short=7", "HEAD"])?.trim().to_string();

        if push {
            let branch = self.stdout(&["rev-parse", "--abbrev-ref", "HEAD"])?;
            let branch = branch.trim();
            if branch == "HEAD" {
                bail!("detached HEAD; refusing to push");
            }
            self.checked(&["push", "origin", branch])?;
        }
        info!(sha = %sha, pushed = push, "committed");
        Ok(CommitOutcome::Committed { sha, pushed: push })
    }

    fn stdout(&self, args: &[&str]) -> Result<String> {
        let out = self.checked(args)?;
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    fn checked(&self, args: &[&str]) -> Result<Output> {
        let out = self.git(args)?;
        if !out.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(out)
    }

    fn git(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    fn repo(dir: &Path) -> Git {
        let git = Git::new(dir);
        git.checked(&["init", "-q"]).expect("git init");
        git.checked(&["config", "user.email", "devloop@example.com"])
            .expect("config email");
        git.checked(&["config", "user.name", "devloop"])
            .expect("config name");
        git
    }

    #[test]
    fn second_commit_without_changes_is_clean() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = repo(temp.path());
        fs::write(temp.path().join("app.py"), "print(1)").expect("write");

        let first = git.commit_all("Complete task t1", false).expect("commit");
        let CommitOutcome::Committed { sha, pushed } = &first else {
            panic!("expected a commit, got {first:?}");
        };
        assert_eq!(sha.len(), 7);
        assert!(!pushed);
        assert_eq!(first.describe(), format!("Committed {sha}"));

        let second = git.commit_all("Complete task t2", false).expect("commit");
        assert_eq!(second, CommitOutcome::Clean);
        assert_eq!(second.describe(), "Nothing to commit");
    }

    #[test]
    fn plain_directory_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        assert!(!git.is_repository());
        let err = git.commit_all("msg", false).expect_err("not a repo");
        assert!(err.to_string().contains("not a git repository"));
    }
}
