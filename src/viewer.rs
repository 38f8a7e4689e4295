//! Rolling per-channel statistics for checking signal quality.

use std::collections::VecDeque;
use std::fmt::Write as _;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub mean: f64,
    pub rms: f64,
    pub min: f64,
    pub max: f64,
}

/// The last `capacity` samples of a multichannel stream.
#[derive(Debug, Clone)]
pub struct SignalWindow {
    channels: usize,
    capacity: usize,
    samples: VecDeque<Vec<f64>>,
}

impl SignalWindow {
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            channels,
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append one sample, dropping the oldest when full.
    /// Short samples are padded with NaN, long ones truncated.
    pub fn push(&mut self, sample: &[f64]) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        let mut row = sample.iter().copied().take(self.channels).collect::<Vec<_>>();
        row.resize(self.channels, f64::NAN);
        self.samples.push_back(row);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Statistics per channel; `None` while empty. NaN values are skipped.
    pub fn stats(&self) -> Option<Vec<ChannelStats>> {
        if self.samples.is_empty() {
            return None;
        }
        let stats = (0..self.channels)
            .map(|ch| {
                let mut n = 0usize;
                let (mut sum, mut sum_sq) = (0.0, 0.0);
                let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
                for v in self.samples.iter().map(|s| s[ch]).filter(|v| !v.is_nan()) {
                    n += 1;
                    sum += v;
                    sum_sq += v * v;
                    min = min.min(v);
                    max = max.max(v);
                }
                if n == 0 {
                    return ChannelStats {
                        mean: f64::NAN,
                        rms: f64::NAN,
                        min: f64::NAN,
                        max: f64::NAN,
                    };
                }
                ChannelStats {
                    mean: sum / n as f64,
                    rms: (sum_sq / n as f64).sqrt(),
                    min,
                    max,
                }
            })
            .collect();
        Some(stats)
    }

    /// Plain-text table of [`stats`](Self::stats), one row per channel.
    pub fn render_table(&self, labels: &[String]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:<12}{:>12}{:>12}{:>12}{:>12}", "channel", "mean", "rms", "min", "max");
        let Some(stats) = self.stats() else {
            out.push_str("(no samples)\n");
            return out;
        };
        for (ch, s) in stats.iter().enumerate() {
            let label = labels.get(ch).cloned().unwrap_or_else(|| format!("ch{}", ch + 1));
            let _ = writeln!(
                out,
                "{:<12}{:>12.3}{:>12.3}{:>12.3}{:>12.3}",
                label, s.mean, s.rms, s.min, s.max
            );
        }
        out
    }
}

/// Channel labels from a stream description (`<channels><channel><label>`).
pub fn channel_labels(description: &Value) -> Vec<String> {
    let label = |c: &Value| c.get("label").and_then(Value::as_str).unwrap_or_default().to_string();
    match description.pointer("/channels/channel") {
        Some(Value::Array(channels)) => channels.iter().map(label).collect(),
        Some(channel @ Value::Object(_)) => vec![label(channel)],
        _ => Vec::new(),
    }
}
