//! Argument list of the external synthesis executable.

use std::collections::BTreeMap;
use std::path::Path;

/// Synthesis parameters accepted from a submission.
pub const ALLOWED_PARAMS: &[&str] = &[
    "enhanceBreathiness",
    "formantShift",
    "inference",
    "model",
    "pitchShiftNsf",
    "pitchShiftWorld",
    "smoothFormant",
    "smoothPitch",
    "styleShift",
];

/// Turns submitted parameters into `--key value` pairs, dropping unknown
/// keys and empty values. Output order follows the key order.
pub fn params_to_args(params: &BTreeMap<String, String>) -> Vec<String> {
    params
        .iter()
        .filter(|(key, value)| ALLOWED_PARAMS.contains(&key.as_str()) && !value.is_empty())
        .flat_map(|(key, value)| [format!("--{}", key), value.clone()])
        .collect()
}

/// Full argument list, program first.
pub fn build_command(
    executable: &Path,
    rid: &str,
    work_dir: &Path,
    score: &Path,
    extra_args: &[String],
    task_args: &[String],
) -> Vec<String> {
    let mut command = vec![
        executable.to_string_lossy().to_string(),
        "--desc".to_string(),
        rid.to_string(),
        "--workDir".to_string(),
        work_dir.to_string_lossy().to_string(),
        "--score".to_string(),
        score.to_string_lossy().to_string(),
    ];
    command.extend(extra_args.iter().cloned());
    command.extend(task_args.iter().cloned());
    command
}

/// Renders a command as one POSIX shell line.
pub fn render(command: &[String]) -> String {
    command
        .iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_params_filtered_to_known_keys() {
        let mut params = BTreeMap::new();
        params.insert("model".to_string(), "KIRITAN".to_string());
        params.insert("styleShift".to_string(), "2".to_string());
        params.insert("rm".to_string(), "-rf /".to_string());
        params.insert("inference".to_string(), String::new());

        assert_eq!(
            params_to_args(&params),
            vec!["--model", "KIRITAN", "--styleShift", "2"]
        );
    }

    #[test]
    fn test_build_command_order() {
        let command = build_command(
            &PathBuf::from("/opt/neutrino/run.sh"),
            "rid-1",
            &PathBuf::from("/work/rid-1"),
            &PathBuf::from("/work/rid-1/song.musicxml"),
            &["--shell".to_string(), "bash".to_string()],
            &["--model".to_string(), "KIRITAN".to_string()],
        );
        assert_eq!(
            command,
            vec![
                "/opt/neutrino/run.sh",
                "--desc",
                "rid-1",
                "--workDir",
                "/work/rid-1",
                "--score",
                "/work/rid-1/song.musicxml",
                "--shell",
                "bash",
                "--model",
                "KIRITAN",
            ]
        );
    }

    #[test]
    fn test_render_quotes_when_needed() {
        let command = vec![
            "/bin/run".to_string(),
            "--score".to_string(),
            "/w/my song.musicxml".to_string(),
            "it's".to_string(),
            String::new(),
        ];
        assert_eq!(
            render(&command),
            r#"/bin/run --score '/w/my song.musicxml' 'it'\''s' ''"#
        );
    }
}
