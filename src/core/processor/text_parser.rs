// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus Exposition Text Parser
//!
//! Parses one sample line into a metric event. Label slices stay
//! zero-copy views into the scrape buffer; only escaped label values are
//! copied into the group arena. Invalid lines are skipped, never fatal.

use crate::core::event::{MetricEvent, MetricValue, PipelineEventGroup, StringView};

pub struct TextParser {
    honor_timestamps: bool,
    default_timestamp_s: i64,
    default_nanos: u32,
}

/// Whether the line is worth parsing at all: comments and blank lines are
/// not errors, they just carry no sample.
pub fn is_valid_metric(line: &[u8]) -> bool {
    line.iter()
        .find(|b| **b != b' ' && **b != b'\t')
        .map(|b| *b != b'#')
        .unwrap_or(false)
}

fn skip_ws(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && (bytes[pos] == b' ' || bytes[pos] == b'\t') {
        pos += 1;
    }
    pos
}

fn trim_ws_back(bytes: &[u8], start: usize, mut end: usize) -> usize {
    while end > start && (bytes[end - 1] == b' ' || bytes[end - 1] == b'\t') {
        end -= 1;
    }
    end
}

fn find(bytes: &[u8], from: usize, target: u8) -> Option<usize> {
    bytes[from..].iter().position(|b| *b == target).map(|p| from + p)
}

fn find_ws_or_exemplar(bytes: &[u8], from: usize) -> Option<usize> {
    bytes[from..]
        .iter()
        .position(|b| *b == b' ' || *b == b'\t' || *b == b'#')
        .map(|p| from + p)
}

impl TextParser {
    pub fn new(honor_timestamps: bool) -> Self {
        Self {
            honor_timestamps,
            default_timestamp_s: 0,
            default_nanos: 0,
        }
    }

    pub fn set_default_timestamp(&mut self, seconds: i64, nanos: u32) {
        self.default_timestamp_s = seconds;
        self.default_nanos = nanos;
    }

    /// Parses one exposition line into `event`, copying escaped label
    /// values into the group arena. Returns whether a sample was produced.
    pub fn parse_line(
        &self,
        line: &StringView,
        group: &mut PipelineEventGroup,
        event: &mut MetricEvent,
    ) -> bool {
        let bytes = line.as_bytes();
        let escape = bytes.contains(&b'\\');
        let start = skip_ws(bytes, 0);
        if start >= bytes.len() {
            return false;
        }

        let after_labels;
        match find(bytes, start, b'{') {
            Some(brace) => {
                let name_end = trim_ws_back(bytes, start, brace);
                if name_end == start {
                    return false;
                }
                event.set_name(line.slice(start..name_end));
                match self.parse_labels(line, bytes, brace + 1, escape, group, event) {
                    Some(next) => after_labels = next,
                    None => return false,
                }
            }
            None => {
                let Some(ws) = find_ws_or_exemplar(bytes, start) else {
                    return false;
                };
                if bytes[ws] == b'#' {
                    return false;
                }
                event.set_name(line.slice(start..ws));
                after_labels = skip_ws(bytes, ws);
            }
        }

        self.parse_sample(line, bytes, after_labels, event)
    }

    /// Parses the `{...}` label section; returns the position after it.
    fn parse_labels(
        &self,
        line: &StringView,
        bytes: &[u8],
        mut pos: usize,
        escape: bool,
        group: &mut PipelineEventGroup,
        event: &mut MetricEvent,
    ) -> Option<usize> {
        pos = skip_ws(bytes, pos);
        loop {
            if pos >= bytes.len() {
                return None;
            }
            if bytes[pos] == b'}' {
                return Some(skip_ws(bytes, pos + 1));
            }

            let eq = find(bytes, pos, b'=')?;
            let name_end = trim_ws_back(bytes, pos, eq);
            if name_end == pos || bytes[pos..name_end].contains(&b'"') {
                return None;
            }
            let label_name = line.slice(pos..name_end);

            pos = skip_ws(bytes, eq + 1);
            if pos >= bytes.len() || bytes[pos] != b'"' {
                return None;
            }
            pos += 1;

            let label_value = if escape {
                let (value, next) = parse_escaped_value(bytes, pos)?;
                pos = next;
                group.copy_string(value)
            } else {
                let close = find(bytes, pos, b'"')?;
                let value = line.slice(pos..close);
                pos = close + 1;
                value
            };
            event.set_tag(label_name, label_value);

            pos = skip_ws(bytes, pos);
            if pos >= bytes.len() {
                return None;
            }
            match bytes[pos] {
                b',' => {
                    pos = skip_ws(bytes, pos + 1);
                    // Trailing comma before the closing brace is accepted.
                }
                b'}' => {
                    return Some(skip_ws(bytes, pos + 1));
                }
                _ => return None,
            }
        }
    }

    /// Parses `<value> [timestamp] [# exemplar]`.
    fn parse_sample(
        &self,
        _line: &StringView,
        bytes: &[u8],
        pos: usize,
        event: &mut MetricEvent,
    ) -> bool {
        let value_end = find_ws_or_exemplar(bytes, pos).unwrap_or(bytes.len());
        if value_end == pos {
            return false;
        }
        let Ok(value_str) = std::str::from_utf8(&bytes[pos..value_end]) else {
            return false;
        };
        let Ok(value) = value_str.parse::<f64>() else {
            return false;
        };
        event.set_value(MetricValue::UntypedSingle(value));

        let exemplar_cut = value_end < bytes.len() && bytes[value_end] == b'#';
        if exemplar_cut || value_end == bytes.len() {
            event.set_timestamp(self.default_timestamp_s, Some(self.default_nanos));
            return true;
        }

        let ts_start = skip_ws(bytes, value_end);
        let ts_end = find_ws_or_exemplar(bytes, ts_start).unwrap_or(bytes.len());
        if ts_end == ts_start {
            // Value followed by whitespace only.
            event.set_timestamp(self.default_timestamp_s, Some(self.default_nanos));
            return true;
        }
        let Ok(ts_str) = std::str::from_utf8(&bytes[ts_start..ts_end]) else {
            return false;
        };
        let Ok(mut milli_timestamp) = ts_str.parse::<f64>() else {
            return false;
        };
        if milli_timestamp > (1u64 << 63) as f64 {
            return false;
        }
        // Values below 2^31 are seconds, scale them to milliseconds.
        if milli_timestamp < (1u64 << 31) as f64 {
            milli_timestamp *= 1000.0;
        }
        let seconds = milli_timestamp as i64 / 1000;
        let nanos = ((milli_timestamp as i64 % 1000) * 1_000_000) as u32;
        if self.honor_timestamps {
            event.set_timestamp(seconds, Some(nanos));
        } else {
            event.set_timestamp(self.default_timestamp_s, Some(self.default_nanos));
        }
        true
    }
}

/// Slow path for label values containing backslash escapes. Returns the
/// unescaped bytes and the position after the closing quote.
fn parse_escaped_value(bytes: &[u8], start: usize) -> Option<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if i + 1 >= bytes.len() {
                    return None;
                }
                match bytes[i + 1] {
                    b'n' => out.push(b'\n'),
                    b'\\' | b'"' => out.push(bytes[i + 1]),
                    other => {
                        out.push(b'\\');
                        out.push(other);
                    }
                }
                i += 2;
            }
            b'"' => return Some((out, i + 1)),
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    None
}
