//! Shared scaffolding for the integration tests: a fake `node` on `PATH`
//! backed by `tests/fixtures/fake_node.sh`, and a deployed-app directory
//! builder.

use std::path::{Path, PathBuf};
use std::sync::Once;

static PATH_INIT: Once = Once::new();

/// Prepend a directory containing a `node` shim (symlinked to
/// `fake_node.sh`) to `PATH`, so `WorkerInstance::spawn`'s `Command::new
/// ("node")` resolves to the fixture instead of a real runtime. Safe to
/// call repeatedly; only does the work once per process.
pub fn install_fake_node() {
    PATH_INIT.call_once(|| {
        let shim_dir = fixture_dir().join("bin");
        std::fs::create_dir_all(&shim_dir).expect("create shim dir");
        let shim = shim_dir.join("node");
        let script = fixture_dir().join("fake_node.sh");
        let _ = std::fs::remove_file(&shim);
        #[cfg(unix)]
        std::os::unix::fs::symlink(&script, &shim).expect("symlink fake node shim");

        let existing = std::env::var("PATH").unwrap_or_default();
        let new_path = format!("{}:{existing}", shim_dir.display());
        std::env::set_var("PATH", new_path);
    });
}

fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Lay out a minimal deployed app at `deploy_root/<name>` with a
/// `manifest.yaml` and a stub entrypoint file (never actually executed;
/// `fake_node.sh` ignores its argv entirely).
pub fn deploy_app(deploy_root: &Path, name: &str, manifest_yaml: &str) -> PathBuf {
    let app_dir = deploy_root.join(name);
    std::fs::create_dir_all(&app_dir).expect("create app dir");
    std::fs::write(app_dir.join("index.js"), "// fake entrypoint, never run\n").unwrap();
    if !manifest_yaml.is_empty() {
        std::fs::write(app_dir.join("manifest.yaml"), manifest_yaml).unwrap();
    }
    app_dir
}
