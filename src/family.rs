//! Metric family builder.
//!
//! Collectors build their output with [`Family`], a typed builder whose label
//! schema is fixed when the family is created. The number of label values per
//! sample is part of the type (`Family<N>`), so a sample with the wrong label
//! arity does not compile. Finished builders are erased into [`MetricFamily`]
//! for transport through the collection pipeline and for text serialization.

use prometheus::proto;
use prometheus::{Encoder, TextEncoder};

/// Prometheus metric type of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Typed metric family builder with `N` label names.
#[derive(Debug, Clone)]
pub struct Family<const N: usize> {
    name: &'static str,
    help: &'static str,
    kind: MetricKind,
    labels: [&'static str; N],
    samples: Vec<([String; N], f64)>,
}

impl<const N: usize> Family<N> {
    /// Creates an empty point-in-time gauge family.
    pub fn gauge(name: &'static str, help: &'static str, labels: [&'static str; N]) -> Self {
        Self::new(name, help, MetricKind::Gauge, labels)
    }

    /// Creates an empty monotonic counter family.
    pub fn counter(name: &'static str, help: &'static str, labels: [&'static str; N]) -> Self {
        Self::new(name, help, MetricKind::Counter, labels)
    }

    fn new(
        name: &'static str,
        help: &'static str,
        kind: MetricKind,
        labels: [&'static str; N],
    ) -> Self {
        Self {
            name,
            help,
            kind,
            labels,
            samples: Vec::new(),
        }
    }

    /// Appends one sample.
    pub fn add(&mut self, label_values: [&str; N], value: f64) {
        self.samples.push((label_values.map(str::to_owned), value));
    }

    /// Appends one sample, taking ownership of the label values.
    pub fn push(&mut self, label_values: [String; N], value: f64) {
        self.samples.push((label_values, value));
    }

    /// Moves all samples of `other` into this family.
    ///
    /// Used by per-entity collectors that build a scratch family per node or
    /// storage and only merge it once the entity was collected completely.
    pub fn merge(&mut self, other: Family<N>) {
        debug_assert_eq!(self.name, other.name);
        self.samples.extend(other.samples);
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One labeled value of a [`MetricFamily`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub label_values: Vec<String>,
    pub value: f64,
}

/// A finished metric family as produced by a collector.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    name: String,
    help: String,
    kind: MetricKind,
    label_names: Vec<String>,
    samples: Vec<Sample>,
}

impl<const N: usize> From<Family<N>> for MetricFamily {
    fn from(family: Family<N>) -> Self {
        Self {
            name: family.name.to_string(),
            help: family.help.to_string(),
            kind: family.kind,
            label_names: family.labels.iter().map(|l| l.to_string()).collect(),
            samples: family
                .samples
                .into_iter()
                .map(|(labels, value)| Sample {
                    label_values: labels.into(),
                    value,
                })
                .collect(),
        }
    }
}

impl MetricFamily {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the value of the sample whose label values equal `label_values`.
    pub fn value_of(&self, label_values: &[&str]) -> Option<f64> {
        self.samples
            .iter()
            .find(|s| {
                s.label_values
                    .iter()
                    .map(String::as_str)
                    .eq(label_values.iter().copied())
            })
            .map(|s| s.value)
    }

    /// Converts the family into the protobuf model used by the `prometheus` encoders.
    pub fn to_proto(&self) -> proto::MetricFamily {
        let metrics = self
            .samples
            .iter()
            .map(|sample| {
                let labels = self
                    .label_names
                    .iter()
                    .zip(&sample.label_values)
                    .map(|(name, value)| {
                        let mut pair = proto::LabelPair::default();
                        pair.set_name(name.clone());
                        pair.set_value(value.clone());
                        pair
                    })
                    .collect::<Vec<_>>();

                let mut metric = proto::Metric::default();
                metric.set_label(labels);
                match self.kind {
                    MetricKind::Gauge => {
                        let mut gauge = proto::Gauge::default();
                        gauge.set_value(sample.value);
                        metric.set_gauge(gauge);
                    }
                    MetricKind::Counter => {
                        let mut counter = proto::Counter::default();
                        counter.set_value(sample.value);
                        metric.set_counter(counter);
                    }
                }
                metric
            })
            .collect::<Vec<_>>();

        let mut family = proto::MetricFamily::default();
        family.set_name(self.name.clone());
        family.set_help(self.help.clone());
        family.set_field_type(match self.kind {
            MetricKind::Gauge => proto::MetricType::GAUGE,
            MetricKind::Counter => proto::MetricType::COUNTER,
        });
        family.set_metric(metrics);
        family
    }
}

/// Serializes families into the Prometheus text exposition format.
///
/// The text encoder rejects families without samples, so empty families are
/// skipped here. They remain part of the collector output.
pub fn encode_text(families: &[MetricFamily]) -> Result<String, prometheus::Error> {
    let protos = families
        .iter()
        .filter(|f| !f.is_empty())
        .map(MetricFamily::to_proto)
        .collect::<Vec<_>>();

    let mut buffer = Vec::with_capacity(64 * 1024);
    TextEncoder::new().encode(&protos, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Converts a boolean condition into a sample value.
pub fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}
