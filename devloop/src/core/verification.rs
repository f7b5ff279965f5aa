//! Pass/fail judgement over verification command output.

use crate::core::types::Verdict;

/// Judge output: any failure marker present means the task failed.
///
/// Markers are matched case-sensitively, so `FAILED` does not trip on
/// `0 failed`.
pub fn judge_output(output: &str, failure_markers: &[String]) -> Verdict {
    if failure_markers
        .iter()
        .filter(|marker| !marker.is_empty())
        .any(|marker| output.contains(marker.as_str()))
    {
        Verdict::Fail
    } else {
        Verdict::Pass
    }
}

/// Keep the last `max_bytes` of verification output for a correction prompt.
pub fn output_tail(output: &str, max_bytes: usize) -> &str {
    if output.len() <= max_bytes {
        return output;
    }
    let mut start = output.len() - max_bytes;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    &output[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec!["FAILED".to_string()]
    }

    #[test]
    fn failure_marker_fails() {
        let out = "tests/test_app.py::test_root FAILED\n1 failed, 2 passed";
        assert_eq!(judge_output(out, &markers()), Verdict::Fail);
    }

    #[test]
    fn absence_of_marker_passes() {
        assert_eq!(judge_output("3 passed in 0.01s", &markers()), Verdict::Pass);
        assert_eq!(judge_output("", &markers()), Verdict::Pass);
    }

    #[test]
    fn empty_markers_never_fail() {
        let markers = vec![String::new()];
        assert_eq!(judge_output("anything", &markers), Verdict::Pass);
    }

    #[test]
    fn tail_respects_char_boundaries() {
        let text = "héllo wörld";
        let tail = output_tail(text, 6);
        assert!(tail.len() <= 6);
        assert!(text.ends_with(tail));
        assert_eq!(output_tail("short", 100), "short");
    }
}
