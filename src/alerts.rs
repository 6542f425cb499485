//! Threshold rules over a sample.
//!
//! Evaluation is stateless: every tick re-checks every enabled rule, so a
//! sustained breach fires on every tick.

use crate::sample::{MetricKind, Sample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
}

impl Comparator {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Lt => value < threshold,
            Comparator::Ge => value >= threshold,
            Comparator::Le => value <= threshold,
            Comparator::Eq => value == threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Lt => "<",
            Comparator::Ge => ">=",
            Comparator::Le => "<=",
            Comparator::Eq => "==",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub metric: MetricKind,
    pub threshold: f64,
    #[serde(alias = "operator")]
    pub comparator: Comparator,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(metric: MetricKind, comparator: Comparator, threshold: f64) -> Self {
        Self {
            metric,
            threshold,
            comparator,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub metric: MetricKind,
    pub value: f64,
    pub threshold: f64,
    pub comparator: Comparator,
    pub triggered_at: DateTime<Utc>,
}

/// Alerts for every enabled rule that holds, in rule order.
///
/// Values come from the sample as stored, i.e. already rounded to two
/// decimals, so 80.004 does not exceed a `> 80` threshold.
pub fn evaluate(sample: &Sample, rules: &[AlertRule]) -> Vec<Alert> {
    rules
        .iter()
        .filter(|rule| rule.enabled)
        .filter_map(|rule| {
            let value = sample.value_of(rule.metric);
            rule.comparator
                .holds(value, rule.threshold)
                .then(|| Alert {
                    metric: rule.metric,
                    value,
                    threshold: rule.threshold,
                    comparator: rule.comparator,
                    triggered_at: sample.taken_at,
                })
        })
        .collect()
}

pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new(MetricKind::Cpu, Comparator::Gt, 80.0),
        AlertRule::new(MetricKind::Memory, Comparator::Gt, 85.0),
        AlertRule::new(MetricKind::Disk, Comparator::Gt, 90.0),
    ]
}

const fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{DiskRaw, MemoryRaw};
    use crate::sample::{round2, CpuReading, DiskReading, MemoryReading, NetworkReading};

    fn sample_with(cpu: f64, memory_available: u64, down: f64, up: f64) -> Sample {
        Sample {
            cpu: CpuReading {
                usage_percent: cpu,
                core_count: 4,
                clock_ghz: 3.0,
                temperature_c: None,
            },
            memory: MemoryReading::from_raw(&MemoryRaw {
                total_bytes: 100,
                free_bytes: 10,
                available_bytes: memory_available,
                swap_total_bytes: 0,
                swap_used_bytes: 0,
            }),
            disk: DiskReading::from_raw(
                &DiskRaw {
                    total_bytes: 100,
                    available_bytes: 50,
                    read_bytes_total: 0,
                    written_bytes_total: 0,
                },
                0.0,
                0.0,
            ),
            network: NetworkReading {
                bytes_received: 0,
                bytes_sent: 0,
                download_rate_mbps: down,
                upload_rate_mbps: up,
            },
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn cpu_above_threshold_fires_once() {
        let sample = sample_with(85.0, 50, 0.0, 0.0);
        let rule = AlertRule::new(MetricKind::Cpu, Comparator::Gt, 80.0);

        let alerts = evaluate(&sample, &[rule.clone()]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, MetricKind::Cpu);
        assert_eq!(alerts[0].value, 85.0);
        assert_eq!(alerts[0].threshold, 80.0);
        assert_eq!(alerts[0].triggered_at, sample.taken_at);

        let disabled = AlertRule {
            enabled: false,
            ..rule
        };
        assert!(evaluate(&sample, &[disabled]).is_empty());
    }

    #[test]
    fn alerts_follow_rule_order() {
        let sample = sample_with(90.0, 5, 3.0, 2.5);
        let rules = vec![
            AlertRule::new(MetricKind::Network, Comparator::Ge, 5.5),
            AlertRule::new(MetricKind::Disk, Comparator::Eq, 50.0),
            AlertRule::new(MetricKind::Cpu, Comparator::Lt, 10.0),
            AlertRule::new(MetricKind::Memory, Comparator::Le, 95.0),
        ];
        let alerts = evaluate(&sample, &rules);
        let metrics: Vec<MetricKind> = alerts.iter().map(|a| a.metric).collect();
        assert_eq!(
            metrics,
            vec![MetricKind::Network, MetricKind::Disk, MetricKind::Memory]
        );
        assert_eq!(alerts[0].value, 5.5);
    }

    #[test]
    fn boundary_compares_rounded_values() {
        let just_above = sample_with(round2(80.004), 50, 0.0, 0.0);
        let gt = AlertRule::new(MetricKind::Cpu, Comparator::Gt, 80.0);
        assert!(evaluate(&just_above, &[gt]).is_empty());

        let just_below = sample_with(round2(79.996), 50, 0.0, 0.0);
        let ge = AlertRule::new(MetricKind::Cpu, Comparator::Ge, 80.0);
        assert_eq!(evaluate(&just_below, &[ge]).len(), 1);
    }

    #[test]
    fn rules_parse_from_yaml_with_operator_alias() {
        let yaml = "- metric: cpu\n  threshold: 75\n  operator: \">=\"\n- metric: network\n  threshold: 100\n  comparator: \"<\"\n  enabled: false\n";
        let rules: Vec<AlertRule> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rules[0], AlertRule::new(MetricKind::Cpu, Comparator::Ge, 75.0));
        assert_eq!(rules[1].comparator, Comparator::Lt);
        assert!(!rules[1].enabled);
    }
}
