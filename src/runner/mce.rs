//! The MCE persistence convention
//!
//! Command groups are sequences of separate sub-shell invocations, yet
//! working directory and exported variables must carry over from one
//! command to the next. A scratch directory per executor holds:
//!
//! - `dir.txt`  — last observed working directory, seeds the next command
//! - `env.sh`   — last exported environment as shell `export` statements
//! - `init.env` — one-time environment snapshot (container variant only)
//! - `envout.sh` — finalizer emitting `::set-output` lines from env.sh
//!
//! Each command runs wrapped in a generated script that restores state
//! before and persists state after the user command, exiting with the
//! user command's code. Both executor variants share this layout; the
//! container variant keeps the files under `<scratch>/tmp` so the
//! whole scratch dir can be bind-mounted at `/tmp/mce`.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use std::sync::OnceLock;

use crate::error::Result;
use crate::runner::logsink::LogSink;

pub const ENV_SH: &str = "env.sh";
pub const DIR_TXT: &str = "dir.txt";
pub const INIT_ENV: &str = "init.env";
pub const ENVOUT_SH: &str = "envout.sh";

/// Seed the scratch files. `init_env` is written only when provided
/// (container variant); `default_dir` seeds `dir.txt`.
pub fn seed_scratch(scratch: &Path, default_dir: &str, init_env: Option<&[String]>) -> Result<()> {
    std::fs::create_dir_all(scratch)?;
    std::fs::write(scratch.join(ENV_SH), "")?;
    std::fs::write(scratch.join(DIR_TXT), default_dir)?;
    if let Some(env) = init_env {
        std::fs::write(scratch.join(INIT_ENV), env.join("\n"))?;
    }
    Ok(())
}

/// Write the close-time finalizer that turns the persisted exported
/// environment into `::set-output name=K::V` lines on stdout. Used by
/// the container variant, which must run it inside the container.
pub fn write_envout_script(scratch: &Path, mce_root: &str) -> Result<()> {
    let script = format!(
        ". {mce_root}/{ENV_SH}\nenv -0 | while IFS='=' read -r -d '' n v; do  printf \"::set-output name=%s::%s\\n\" \"$n\" \"$v\"; done"
    );
    write_executable(&scratch.join(ENVOUT_SH), &script)
}

/// Generate the per-command wrapper script into the scratch dir and
/// return its file name. `mce_root` is the scratch path as seen by
/// the shell that will run the script.
pub fn write_wrapper_script(
    scratch: &Path,
    mce_root: &str,
    command: &str,
    with_init_env: bool,
) -> Result<String> {
    let init_block = if with_init_env {
        format!("while read line; do\n\tenv \"$line\" > /dev/null\ndone < {mce_root}/{INIT_ENV}\n")
    } else {
        String::new()
    };
    let script = format!(
        "cd $(cat {mce_root}/{DIR_TXT})\nset -a\n. {mce_root}/{ENV_SH}\n{init_block}{command}\nMCE_LAST_EXIT=$?\nexport -p > {mce_root}/{ENV_SH}\npwd > {mce_root}/{DIR_TXT}\nexit $MCE_LAST_EXIT"
    );
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let name = format!("script-{nanos}.sh");
    write_executable(&scratch.join(&name), &script)?;
    Ok(name)
}

fn write_executable(path: &PathBuf, contents: &str) -> Result<()> {
    std::fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

fn export_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // `export -p` quotes with " under bash and ' under dash
    PATTERN.get_or_init(|| Regex::new(r#"^export (.+)=["'](.+)["']$"#).expect("valid regex"))
}

/// Host-side finalizer: parse the persisted `env.sh` and emit
/// `::set-output` lines on the environment's stdout. Used by the
/// shell variant on the success path.
pub fn emit_outputs(scratch: &Path, stdout: &LogSink) -> Result<()> {
    let Ok(contents) = std::fs::read_to_string(scratch.join(ENV_SH)) else {
        return Ok(());
    };
    for line in contents.lines() {
        if let Some(captures) = export_pattern().captures(line) {
            stdout.line(&format!(
                "::set-output name={}::{}\n",
                &captures[1], &captures[2]
            ));
        }
    }
    Ok(())
}
