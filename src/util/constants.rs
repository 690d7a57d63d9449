//! Centralized constants for the execution engine
//!
//! All paths, images and timing values in one place for easy tuning.

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════
// Container layout
// ═══════════════════════════════════════════════════════════════

/// Root for staged sources inside a container
pub const CONTAINER_SOURCE_DIR: &str = "/codecatalyst/output/src";

/// Root for staged action code inside a container
pub const CONTAINER_ACTION_DIR: &str = "/codecatalyst/output/action";

/// Mount point of the per-executor scratch directory inside a container
pub const MCE_MOUNT: &str = "/tmp/mce";

/// Curated image used for synthesized build actions and node runtimes
pub const CURATED_IMAGE: &str = "docker://public.ecr.aws/c8t2t1h8/al2/curated:1.3-x86_64-ec2";

/// Prefix for container names derived from plan ids
pub const CONTAINER_NAME_PREFIX: &str = "catalyst";

// ═══════════════════════════════════════════════════════════════
// Scheduling
// ═══════════════════════════════════════════════════════════════

/// Delay before a deferred plan is put back on the work queue
pub const DEFER_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Refresh period for the TUI spinner icons
pub const SPINNER_PERIOD: Duration = Duration::from_millis(500);

// ═══════════════════════════════════════════════════════════════
// Limits
// ═══════════════════════════════════════════════════════════════

/// Files larger than this are never considered as SBOM candidates
pub const MAX_SBOM_SIZE: u64 = 10 * 1024;

/// Registry assumed when an image reference carries no host
pub const DEFAULT_REGISTRY_HOST: &str = "index.docker.io";
