use std::path::Path;
use std::process::Command;

/// Builds the editor invocation for `file`, jumping to `line` when the
/// editor family has a known syntax for it.
pub fn command(editor: &str, file: &Path, line: Option<u64>) -> Command {
    let mut words = editor.split_whitespace();
    let program = words.next().unwrap_or("vi");
    let mut command = Command::new(program);
    command.args(words);

    let family = Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    match (line, family.as_str()) {
        (Some(n), "vi" | "vim" | "nvim" | "view") => {
            command.arg(format!("+{}", n)).arg(file);
        }
        (Some(n), "nano") => {
            command.arg(format!("+{},1", n)).arg(file);
        }
        (Some(n), "emacs" | "emacsclient") => {
            command.arg(format!("+{}:1", n)).arg(file);
        }
        (Some(n), "code" | "code-insiders" | "codium") => {
            command.arg("-g").arg(format!("{}:{}:1", file.display(), n));
        }
        _ => {
            command.arg(file);
        }
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(command: &Command) -> Vec<String> {
        std::iter::once(command.get_program())
            .chain(command.get_args())
            .map(|arg| arg.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_line_argument_by_family() {
        let file = Path::new("/r/a.rs");
        assert_eq!(argv(&command("vim", file, Some(12))), vec!["vim", "+12", "/r/a.rs"]);
        assert_eq!(
            argv(&command("/usr/bin/nano", file, Some(3))),
            vec!["/usr/bin/nano", "+3,1", "/r/a.rs"]
        );
        assert_eq!(argv(&command("emacs", file, Some(7))), vec!["emacs", "+7:1", "/r/a.rs"]);
        assert_eq!(
            argv(&command("code --wait", file, Some(9))),
            vec!["code", "--wait", "-g", "/r/a.rs:9:1"]
        );
    }

    #[test]
    fn test_unknown_editor_gets_file_only() {
        let file = Path::new("/r/a.rs");
        assert_eq!(argv(&command("hx", file, Some(4))), vec!["hx", "/r/a.rs"]);
        assert_eq!(argv(&command("vim", file, None)), vec!["vim", "/r/a.rs"]);
    }
}
