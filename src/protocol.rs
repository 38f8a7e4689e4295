//! Cue-sequence protocol: a shuffled, balanced list of direction trials,
//! each announced on an LSL marker stream.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::experiment::RunSnapshot;
use crate::state::{RunState, SharedState};
use crate::status::StatusLine;
use crate::triggers::TriggerDef;

pub const MARKER_STREAM_NAME: &str = "BCI-Markers";

/// Phase durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct Timings {
    /// Once, before the first trial.
    #[serde(default = "default_init")]
    pub init: f64,
    /// Rest between trials.
    #[serde(default = "default_gap")]
    pub gap: f64,
    #[serde(default = "default_ready")]
    pub ready: f64,
    /// Direction cue.
    #[serde(default = "default_dir")]
    pub dir: f64,
}

fn default_init() -> f64 {
    2.0
}
fn default_gap() -> f64 {
    2.0
}
fn default_ready() -> f64 {
    2.0
}
fn default_dir() -> f64 {
    5.0
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            init: default_init(),
            gap: default_gap(),
            ready: default_ready(),
            dir: default_dir(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProtocolParams {
    pub directions: Vec<String>,
    pub trials: usize,
    pub timings: Timings,
    pub triggers: Option<TriggerDef>,
    /// Fixed shuffle seed, for reproducible runs.
    pub seed: Option<u64>,
}

impl ProtocolParams {
    pub fn from_snapshot(snapshot: &RunSnapshot) -> Result<Self> {
        let params = &snapshot.params;

        let directions: Vec<String> = params
            .get("DIRECTIONS")
            .and_then(Value::as_array)
            .context("DIRECTIONS must be a list")?
            .iter()
            .map(|v| v.as_str().map(str::to_string).context("DIRECTIONS must hold strings"))
            .collect::<Result<_>>()?;

        let trials = params
            .get("TRIALS_NB")
            .and_then(Value::as_u64)
            .context("TRIALS_NB must be a positive integer")? as usize;

        let timings = match params.get("TIMINGS") {
            Some(v) => serde_json::from_value(v.clone()).context("invalid TIMINGS")?,
            None => Timings::default(),
        };

        let triggers = match params.get("TRIGGER_FILE").and_then(Value::as_str) {
            Some(path) => Some(TriggerDef::load(std::path::Path::new(path))?),
            None => None,
        };

        let seed = params.get("SEED").and_then(Value::as_u64);

        let params = Self {
            directions,
            trials,
            timings,
            triggers,
            seed,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.directions.is_empty() {
            bail!("DIRECTIONS is empty");
        }
        if self.trials == 0 {
            bail!("TRIALS_NB must be a positive integer");
        }
        let t = self.timings;
        if [t.init, t.gap, t.ready, t.dir].iter().any(|d| !d.is_finite() || *d < 0.0) {
            bail!("TIMINGS must be non-negative numbers of seconds");
        }
        Ok(())
    }

    /// Marker value for a phase or direction label: the trigger file wins,
    /// otherwise directions use their 1-based index and phases have none.
    pub fn code_for(&self, label: &str) -> Option<i32> {
        if let Some(ref triggers) = self.triggers {
            return triggers.by_name(label);
        }
        self.directions
            .iter()
            .position(|d| d == label)
            .map(|i| i as i32 + 1)
    }
}

/// `trials` labels drawn evenly from `directions`, in random order.
///
/// Each direction appears `trials / n` times; the remainder goes to
/// randomly chosen distinct directions.
pub fn build_trial_plan(directions: &[String], trials: usize, seed: Option<u64>) -> Vec<String> {
    if directions.is_empty() {
        return Vec::new();
    }
    let mut rng = match seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };

    let per_direction = trials / directions.len();
    let mut plan: Vec<String> = directions
        .iter()
        .flat_map(|d| std::iter::repeat_n(d.clone(), per_direction))
        .collect();

    let mut extra: Vec<&String> = directions.iter().collect();
    rng.shuffle(&mut extra);
    plan.extend(extra.into_iter().take(trials % directions.len()).cloned());

    rng.shuffle(&mut plan);
    plan
}

/// Destination of protocol markers.
pub trait MarkerSink {
    fn push(&mut self, code: i32) -> Result<()>;
}

/// Irregular int32 LSL outlet.
pub struct LslMarkerOutlet {
    outlet: lsl::StreamOutlet,
}

impl LslMarkerOutlet {
    pub fn new(source_id: &str) -> Result<Self> {
        let info = lsl::StreamInfo::new(
            MARKER_STREAM_NAME,
            "Markers",
            1,
            0.0,
            lsl::ChannelFormat::Int32,
            source_id,
        )?;
        let outlet = lsl::StreamOutlet::new(&info, 0, 360)?;
        Ok(Self { outlet })
    }
}

impl MarkerSink for LslMarkerOutlet {
    fn push(&mut self, code: i32) -> Result<()> {
        use lsl::Pushable;
        self.outlet.push_sample(&vec![code])?;
        Ok(())
    }
}

/// Markers kept in memory, for dry runs.
#[derive(Debug, Default)]
pub struct RecordedMarkers(pub Vec<i32>);

impl MarkerSink for RecordedMarkers {
    fn push(&mut self, code: i32) -> Result<()> {
        self.0.push(code);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOutcome {
    Finished { trials: usize },
    Aborted { completed: usize },
}

fn secs(d: f64) -> Duration {
    Duration::from_secs_f64(d.max(0.0))
}

/// Run the trial plan while `state` is `Started`.
///
/// Every sleep is a wait on `state`, so a stop cuts the current phase short.
pub fn run_trials(
    params: &ProtocolParams,
    plan: &[String],
    state: &SharedState,
    sink: &mut dyn MarkerSink,
) -> Result<ProtocolOutcome> {
    let mut mark = |label: &str| -> Result<()> {
        if let Some(code) = params.code_for(label) {
            sink.push(code)?;
        }
        tracing::debug!("marker {}", label);
        Ok(())
    };
    // true when interrupted
    let pause = |d: f64| state.wait_for(RunState::Stopped, secs(d));

    mark("INIT")?;
    if pause(params.timings.init) {
        return Ok(ProtocolOutcome::Aborted { completed: 0 });
    }

    let total = plan.len();
    for (i, direction) in plan.iter().enumerate() {
        StatusLine::Trial {
            index: i + 1,
            total,
            label: direction.clone(),
        }
        .emit();

        for (label, duration) in [
            ("GAP", params.timings.gap),
            ("READY", params.timings.ready),
            (direction.as_str(), params.timings.dir),
        ] {
            mark(label)?;
            if pause(duration) {
                return Ok(ProtocolOutcome::Aborted { completed: i });
            }
        }
    }

    mark("END")?;
    Ok(ProtocolOutcome::Finished { trials: total })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plan_is_balanced() {
        let directions = dirs(&["L", "R", "U"]);
        let plan = build_trial_plan(&directions, 10, Some(7));
        assert_eq!(plan.len(), 10);
        for d in &directions {
            let n = plan.iter().filter(|p| *p == d).count();
            assert!(n == 3 || n == 4, "{} appears {} times", d, n);
        }
    }

    #[test]
    fn plan_is_reproducible_with_seed() {
        let directions = dirs(&["L", "R"]);
        assert_eq!(
            build_trial_plan(&directions, 20, Some(42)),
            build_trial_plan(&directions, 20, Some(42))
        );
        assert!(build_trial_plan(&[], 5, None).is_empty());
    }

    #[test]
    fn direction_codes_without_trigger_file() {
        let params = ProtocolParams {
            directions: dirs(&["LEFT", "RIGHT"]),
            trials: 2,
            timings: Timings::default(),
            triggers: None,
            seed: None,
        };
        assert_eq!(params.code_for("LEFT"), Some(1));
        assert_eq!(params.code_for("RIGHT"), Some(2));
        assert_eq!(params.code_for("READY"), None);
    }
}
