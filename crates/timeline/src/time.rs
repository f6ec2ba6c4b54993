//! Frame, time and progress conversions.
//!
//! Times are microseconds; frames are indices on a timeline at some
//! frame rate. Conversions round to the nearest unit so that a frame
//! converted to time and back lands on the same frame.

/// Index of a frame on a timeline.
pub type Frame = i64;

/// Frame rate assumed when a layer has no file scope to inherit one from.
pub const FALLBACK_FRAME_RATE: f32 = 60.0;

/// Converts microseconds to a frame index at `frame_rate`.
pub fn time_to_frame(time: i64, frame_rate: f32) -> Frame {
    if frame_rate <= 0.0 {
        return 0;
    }
    (time as f64 * frame_rate as f64 / 1_000_000.0).round() as Frame
}

/// Converts a frame index at `frame_rate` to microseconds.
pub fn frame_to_time(frame: Frame, frame_rate: f32) -> i64 {
    if frame_rate <= 0.0 {
        return 0;
    }
    (frame as f64 * 1_000_000.0 / frame_rate as f64).round() as i64
}

/// Normalized progress of `frame` on a timeline of `total` frames.
///
/// The small bias keeps the mapping invertible: feeding the result to
/// [`progress_to_frame`] returns `frame` again.
pub fn frame_to_progress(frame: Frame, total: Frame) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    ((frame as f64 + 0.1) / total as f64).clamp(0.0, 1.0)
}

/// Frame selected by normalized `progress`; 1.0 maps to the last valid
/// frame, never one past the end.
pub fn progress_to_frame(progress: f64, total: Frame) -> Frame {
    if total <= 0 {
        return 0;
    }
    let clamped = progress.clamp(0.0, 1.0);
    ((clamped * total as f64).floor() as Frame).clamp(0, total - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_frame_round_trip() {
        for rate in [10.0, 24.0, 29.97, 30.0, 60.0] {
            for frame in [0, 1, 7, 23, 100, 1439] {
                let time = frame_to_time(frame, rate);
                assert_eq!(time_to_frame(time, rate), frame, "rate {}", rate);
            }
        }
    }

    #[test]
    fn test_time_to_frame_rounds() {
        // 41_666us at 24fps is one frame minus half a millisecond.
        assert_eq!(time_to_frame(41_666, 24.0), 1);
        assert_eq!(time_to_frame(20_000, 24.0), 0);
        assert_eq!(time_to_frame(1_000_000, 24.0), 24);
    }

    #[test]
    fn test_invalid_frame_rate() {
        assert_eq!(time_to_frame(1_000_000, 0.0), 0);
        assert_eq!(frame_to_time(24, 0.0), 0);
    }

    #[test]
    fn test_progress_boundaries() {
        assert_eq!(progress_to_frame(0.0, 24), 0);
        assert_eq!(progress_to_frame(1.0, 24), 23);
        assert_eq!(progress_to_frame(-0.5, 24), 0);
        assert_eq!(progress_to_frame(2.0, 24), 23);
        assert_eq!(progress_to_frame(0.5, 0), 0);
    }

    #[test]
    fn test_progress_frame_round_trip() {
        for total in [1, 2, 24, 125] {
            for frame in 0..total {
                let progress = frame_to_progress(frame, total);
                assert_eq!(progress_to_frame(progress, total), frame, "total {}", total);
            }
        }
    }
}
