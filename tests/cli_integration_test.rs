// Runs the gitdock binary against a scratch data directory

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

struct Workspace {
    data: TempDir,
    config: tempfile::NamedTempFile,
}

impl Workspace {
    fn new() -> Self {
        Self {
            data: TempDir::new().unwrap(),
            config: tempfile::NamedTempFile::new().unwrap(),
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_gitdock"))
            .args(args)
            .arg("--data-dir")
            .arg(self.data.path())
            .arg("--config-file")
            .arg(self.config.path())
            .arg("--repo")
            .arg(self.data.path())
            .arg("--no-color")
            .arg("-q")
            .output()
            .unwrap()
    }

    fn data_dir(&self) -> &Path {
        self.data.path()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_capabilities_listing() {
    let workspace = Workspace::new();
    let output = workspace.run(&["capabilities"]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("read-repository-data"));
    assert!(text.contains("shell"));
    assert!(text.contains("high"));
}

#[test]
fn test_install_list_disable_uninstall() {
    let workspace = Workspace::new();

    let output = workspace.run(&["install", "builtin", "agent-notifier", "--enable", "--yes"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("Installed agent-notifier (enabled)"));
    assert!(workspace.data_dir().read_dir().unwrap().next().is_some());

    let output = workspace.run(&["list"]);
    let text = stdout(&output);
    assert!(text.contains("agent-notifier"));
    assert!(text.lines().any(|line| line.contains("agent-notifier") && line.ends_with("enabled")));

    assert!(workspace.run(&["disable", "agent-notifier"]).status.success());
    let text = stdout(&workspace.run(&["list"]));
    assert!(text.lines().any(|line| line.contains("agent-notifier") && line.ends_with("disabled")));

    assert!(workspace.run(&["uninstall", "agent-notifier"]).status.success());
    assert!(stdout(&workspace.run(&["list"])).contains("No plugins installed"));
}

#[test]
fn test_unknown_plugin_fails() {
    let workspace = Workspace::new();

    assert!(!workspace.run(&["enable", "missing"]).status.success());
    assert!(!workspace.run(&["install", "builtin", "missing", "--yes"]).status.success());
    assert!(!workspace.run(&["install", "ftp", "somewhere"]).status.success());
}

#[test]
fn test_settings_command() {
    let workspace = Workspace::new();
    assert!(workspace.run(&["install", "builtin", "agent-notifier", "--yes"]).status.success());

    let output = workspace.run(&["settings", "agent-notifier", "--set", "notify-on-completion=false"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("notify-on-completion boolean false"));

    let output = workspace.run(&["settings", "agent-notifier", "--set", "notify-on-completion=\"loud\""]);
    assert!(!output.status.success());
}
