//! Plan data model: the unit of scheduling
//!
//! A plan is one action instance materialised into command groups plus
//! the environment they run in. Features mutate the environment before
//! the plan runner executes the groups.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use super::logsink::{LogSink, TracingSink};

/// A single command: a non-empty ordered sequence of arguments
pub type Command = Vec<String>;

/// How a [`FileMap`] stages files between host and execution environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMapKind {
    /// Expose the host path live (not a copy)
    Bind,
    /// Copy host contents in at environment creation time
    CopyIn,
    /// Same as `CopyIn` but honouring `.gitignore` rules at the source
    CopyInWithGitignore,
    /// After the group finishes, copy back out to the host.
    /// If the source does not end in `/.`, the host target is cleared
    /// before copying.
    CopyOut,
}

/// A staging directive between a source and a target path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMap {
    pub kind: FileMapKind,
    pub source: PathBuf,
    pub target: PathBuf,
}

impl FileMap {
    pub fn new(kind: FileMapKind, source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Commands run in a container if `image` is set, otherwise in the
/// host shell. An image starting with `docker://` is pulled from a
/// registry; any other value is a Dockerfile path to build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandGroup {
    pub image: Option<String>,
    pub entrypoint: Vec<String>,
    pub commands: Vec<Command>,
}

/// Mutable context a plan carries to its executor
#[derive(Clone)]
pub struct EnvironmentConfiguration {
    /// Environment variables. Keys starting with `CATALYST_SOURCE_DIR_`
    /// are rewritten relative to the container source root.
    pub env: BTreeMap<String, String>,
    /// Absolute host path the plan runs against
    pub working_dir: PathBuf,
    /// Line sink for command stdout; replaceable by features
    pub stdout: LogSink,
    /// Line sink for command stderr; replaceable by features
    pub stderr: LogSink,
    /// Staging directives, applied in order
    pub file_maps: Vec<FileMap>,
    /// Reuse containers and built images between executions
    pub reuse: bool,
}

impl EnvironmentConfiguration {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            env: BTreeMap::new(),
            working_dir: working_dir.into(),
            stdout: TracingSink::new(),
            stderr: TracingSink::new(),
            file_maps: Vec::new(),
            reuse: false,
        }
    }
}

impl fmt::Debug for EnvironmentConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentConfiguration")
            .field("env", &self.env)
            .field("working_dir", &self.working_dir)
            .field("file_maps", &self.file_maps)
            .field("reuse", &self.reuse)
            .finish_non_exhaustive()
    }
}

/// The unit of scheduling
#[derive(Debug)]
pub struct Plan {
    /// Unique within a run, stable across re-queue
    pub id: String,
    /// Plan ids this plan must not start before. May grow while
    /// features run (deferred wiring).
    pub depends_on: Vec<String>,
    pub environment: EnvironmentConfiguration,
    pub command_groups: Vec<CommandGroup>,
}

impl Plan {
    pub fn new(id: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            environment: EnvironmentConfiguration::new(working_dir),
            command_groups: Vec::new(),
        }
    }

    /// Record a dependency unless it is already present
    pub fn add_depends_on(&mut self, dep: impl Into<String>) {
        let dep = dep.into();
        if !self.depends_on.contains(&dep) {
            self.depends_on.push(dep);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_depends_on_deduplicates() {
        let mut plan = Plan::new("build", "/tmp");
        plan.add_depends_on("test");
        plan.add_depends_on("test");
        plan.add_depends_on("lint");
        assert_eq!(plan.depends_on, vec!["test", "lint"]);
    }

    #[test]
    fn file_map_equality_covers_kind_and_paths() {
        let a = FileMap::new(FileMapKind::Bind, "/src", "/dst");
        let b = FileMap::new(FileMapKind::Bind, "/src", "/dst");
        let c = FileMap::new(FileMapKind::CopyIn, "/src", "/dst");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn environment_defaults_are_empty() {
        let env = EnvironmentConfiguration::new("/work");
        assert!(env.env.is_empty());
        assert!(env.file_maps.is_empty());
        assert!(!env.reuse);
    }
}
