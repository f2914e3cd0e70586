//! Clip boundary planning.
//!
//! Cuts a source of known duration into consecutive spans of at most
//! `max_clip_duration` seconds. Boundaries sit at exact multiples of the
//! maximum (`i * max`, never accumulated) and the last span ends at the
//! source duration exactly.

use shorts_models::{ClipSpec, JobId};

use crate::error::{MediaError, MediaResult};

/// Plans fixed-length clip spans for a job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipPlanner {
    max_clip_duration: f64,
}

impl ClipPlanner {
    pub fn new(max_clip_duration: f64) -> Self {
        Self { max_clip_duration }
    }

    pub fn max_clip_duration(&self) -> f64 {
        self.max_clip_duration
    }

    /// Plan spans covering `[0, duration)`.
    pub fn plan(&self, job_id: &JobId, duration: f64) -> MediaResult<Vec<ClipSpec>> {
        plan_clips(job_id, duration, self.max_clip_duration)
    }
}

/// Number of clips needed so that every span is at most `max`.
fn clip_count(duration: f64, max: f64) -> usize {
    let mut count = (duration / max).ceil().max(1.0) as usize;

    // Division can land one ulp off in either direction; settle on the
    // smallest count whose clips cover the duration.
    while (count as f64) * max < duration {
        count += 1;
    }
    while count > 1 && ((count - 1) as f64) * max >= duration {
        count -= 1;
    }
    count
}

/// Compute the ordered clip spans for a source.
///
/// Fails with `InvalidDuration` unless both values are finite and positive.
pub fn plan_clips(job_id: &JobId, duration: f64, max_clip_duration: f64) -> MediaResult<Vec<ClipSpec>> {
    let valid = duration.is_finite()
        && max_clip_duration.is_finite()
        && duration > 0.0
        && max_clip_duration > 0.0;
    if !valid {
        return Err(MediaError::InvalidDuration {
            duration,
            max_clip_duration,
        });
    }

    let count = clip_count(duration, max_clip_duration);
    let specs = (0..count)
        .map(|i| {
            let start = i as f64 * max_clip_duration;
            let end = if i + 1 == count {
                duration
            } else {
                (i + 1) as f64 * max_clip_duration
            };
            ClipSpec {
                job_id: job_id.clone(),
                index: i,
                start,
                end,
            }
        })
        .collect();

    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(duration: f64, max: f64) -> Vec<(f64, f64)> {
        plan_clips(&JobId::from_string("job"), duration, max)
            .unwrap()
            .into_iter()
            .map(|s| (s.start, s.end))
            .collect()
    }

    fn assert_partition(duration: f64, max: f64) {
        let specs = plan_clips(&JobId::from_string("job"), duration, max).unwrap();
        assert!(!specs.is_empty());
        assert_eq!(specs[0].start, 0.0);
        assert_eq!(specs.last().unwrap().end, duration, "d={} max={}", duration, max);
        for (i, spec) in specs.iter().enumerate() {
            assert_eq!(spec.index, i);
            assert!(spec.span() > 0.0, "empty span at {} for d={} max={}", i, duration, max);
            // Boundaries are exact multiples; their difference may be off by an ulp
            assert!(spec.span() <= max + 1e-9, "span too long at {} for d={} max={}", i, duration, max);
            if i > 0 {
                assert_eq!(specs[i - 1].end, spec.start, "gap or overlap at {}", i);
            }
        }
    }

    #[test]
    fn test_exact_multiple() {
        assert_eq!(spans(100.0, 50.0), vec![(0.0, 50.0), (50.0, 100.0)]);
    }

    #[test]
    fn test_remainder_clip() {
        assert_eq!(
            spans(125.0, 50.0),
            vec![(0.0, 50.0), (50.0, 100.0), (100.0, 125.0)]
        );
        assert_eq!(
            spans(185.0, 50.0),
            vec![(0.0, 50.0), (50.0, 100.0), (100.0, 150.0), (150.0, 185.0)]
        );
    }

    #[test]
    fn test_short_source_is_single_clip() {
        assert_eq!(spans(40.0, 50.0), vec![(0.0, 40.0)]);
        assert_eq!(spans(50.0, 50.0), vec![(0.0, 50.0)]);
        assert_eq!(spans(0.001, 50.0), vec![(0.0, 0.001)]);
    }

    #[test]
    fn test_fractional_durations() {
        assert_eq!(spans(0.3, 0.1).len(), 3);
        assert_eq!(spans(0.7, 0.1).len(), 7);
        assert_eq!(spans(100.04, 50.0).last().unwrap(), &(100.0, 100.04));
    }

    #[test]
    fn test_partition_property() {
        let maxes = [0.1, 0.7, 1.0, 3.3, 10.0, 29.97, 50.0, 59.94, 60.0];
        for &max in &maxes {
            for step in 1..400 {
                let duration = step as f64 * 0.37 + (step % 7) as f64 * 0.001;
                assert_partition(duration, max);
            }
            for k in 1..40 {
                assert_partition(k as f64 * max, max);
            }
        }
    }

    #[test]
    fn test_idempotent() {
        let id = JobId::from_string("job");
        assert_eq!(
            plan_clips(&id, 3599.99, 50.0).unwrap(),
            plan_clips(&id, 3599.99, 50.0).unwrap()
        );
    }

    #[test]
    fn test_invalid_inputs() {
        let id = JobId::from_string("job");
        for (d, m) in [
            (0.0, 50.0),
            (-1.0, 50.0),
            (100.0, 0.0),
            (100.0, -5.0),
            (f64::NAN, 50.0),
            (f64::INFINITY, 50.0),
            (100.0, f64::NAN),
        ] {
            assert!(matches!(
                plan_clips(&id, d, m),
                Err(MediaError::InvalidDuration { .. })
            ));
        }
    }

    #[test]
    fn test_planner_struct() {
        let planner = ClipPlanner::new(50.0);
        let specs = planner.plan(&JobId::from_string("abc"), 125.0).unwrap();
        assert_eq!(specs.len(), 3);
        assert!(specs.iter().all(|s| s.job_id.as_str() == "abc"));
    }
}
