// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric Value Variants

use super::string_view::StringView;

/// Multi-value payload keeping first-insertion order of its series.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UntypedMultiValues {
    values: Vec<(StringView, f64)>,
}

impl UntypedMultiValues {
    pub fn set_value(&mut self, key: StringView, value: f64) {
        for (k, v) in self.values.iter_mut() {
            if k == &key {
                *v = value;
                return;
            }
        }
        self.values.push((key, value));
    }

    pub fn get_value(&self, key: &[u8]) -> Option<f64> {
        self.values
            .iter()
            .find(|(k, _)| k.as_bytes() == key)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StringView, f64)> {
        self.values.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn data_size(&self) -> usize {
        self.values
            .iter()
            .map(|(k, _)| k.len() + std::mem::size_of::<f64>())
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    UntypedSingle(f64),
    UntypedMulti(UntypedMultiValues),
}

impl MetricValue {
    pub fn data_size(&self) -> usize {
        match self {
            MetricValue::UntypedSingle(_) => std::mem::size_of::<f64>(),
            MetricValue::UntypedMulti(values) => values.data_size(),
        }
    }
}

impl Default for MetricValue {
    fn default() -> Self {
        MetricValue::UntypedSingle(0.0)
    }
}
