//! Stub executables, submissions and queues used across the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use synthjob::dispatch::{StartTask, Submission, TaskQueue};
use synthjob::QueueError;

/// Name of the result directory the succeeding stub creates.
pub const RESULT_ELEMENT: &str = "song__20260101000000_1767225600_1";

/// Writes a wav, a config and a copy of the score into a conforming result
/// directory, echoing its arguments to the log.
///
/// Arguments: `--desc RID --workDir DIR --score PATH [params...]`.
pub const SUCCEEDING_SYNTH: &str = r#"
echo "synthesizing $2 with $@"
out="$4/result/song__20260101000000_1767225600_1"
mkdir -p "$out"
printf 'RIFFwav' > "$out/song.wav"
printf 'RIFFworld' > "$out/song_world.wav"
printf 'model: KIRITAN\nsmoothPitch: 20\n' > "$out/config.yml"
cp "$6" "$out/"
"#;

pub const FAILING_SYNTH: &str = r#"
echo "starting $2"
echo "model not found" >&2
exit 3
"#;

/// Exits cleanly without producing a result directory.
pub const SILENT_SYNTH: &str = "echo done";

pub const AMBIGUOUS_SYNTH: &str = r#"
mkdir -p "$4/result/first" "$4/result/second"
"#;

pub const SLEEPING_SYNTH: &str = "exec sleep 30";

pub const SCORE: &[u8] = b"<score-partwise version=\"3.1\"/>";

pub fn submission(file_name: &str) -> Submission {
    Submission {
        file_name: file_name.to_string(),
        score: SCORE.to_vec(),
        params: BTreeMap::new(),
    }
}

pub fn submission_with_params(file_name: &str, params: &[(&str, &str)]) -> Submission {
    Submission {
        params: params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..submission(file_name)
    }
}

/// Queue that keeps every task instead of running it.
#[derive(Default)]
pub struct RecordingQueue {
    tasks: Mutex<Vec<StartTask>>,
}

impl RecordingQueue {
    pub fn take(&self, rid: &str) -> StartTask {
        let tasks = self.tasks.lock().unwrap();
        tasks
            .iter()
            .find(|t| t.rid == rid)
            .cloned()
            .unwrap_or_else(|| panic!("no task recorded for {}", rid))
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn enqueue(&self, task: &StartTask) -> Result<(), QueueError> {
        self.tasks.lock().unwrap().push(task.clone());
        Ok(())
    }
}
