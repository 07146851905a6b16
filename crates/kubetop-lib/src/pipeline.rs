//! Filter and sort pipeline
//!
//! Pure transformation from a registry snapshot to the ordered list handed
//! to the presentation sink.

use crate::models::Stats;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Exact-match filters; an empty value leaves that dimension unfiltered
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub namespace: String,
    pub node: String,
    pub pod: String,
    pub container: String,
}

impl Filters {
    /// Whether a record passes every configured dimension
    pub fn matches(&self, stats: &Stats) -> bool {
        dimension_matches(&self.namespace, &stats.namespace)
            && dimension_matches(&self.node, &stats.node_name)
            && dimension_matches(&self.pod, &stats.pod_name)
            && dimension_matches(&self.container, &stats.container_name)
    }

    /// Keep only the records that pass
    pub fn apply(&self, stats: Vec<Stats>) -> Vec<Stats> {
        if self.is_empty() {
            return stats;
        }
        stats.into_iter().filter(|s| self.matches(s)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty()
            && self.node.is_empty()
            && self.pod.is_empty()
            && self.container.is_empty()
    }
}

fn dimension_matches(filter: &str, value: &str) -> bool {
    filter.is_empty() || filter == value
}

/// Sort selection flags as configured by the user.
/// Several may be set; [`SortBy::key`] picks one by priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortBy {
    pub memory: bool,
    pub cpu: bool,
    pub cpu_utilization: bool,
    pub memory_utilization: bool,
    pub pod_name: bool,
}

/// The single active sort criterion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    /// Memory bytes, descending
    Memory,
    /// CPU milli-cores, descending
    #[default]
    Cpu,
    /// CPU percent of limit, descending
    CpuUtilization,
    /// Memory percent of limit, descending
    MemoryUtilization,
    /// Pod name, ascending
    PodName,
}

impl SortBy {
    /// Resolve the flags: memory, cpu, cpu utilization, memory utilization,
    /// pod name, then CPU descending when nothing is set
    pub fn key(&self) -> SortKey {
        if self.memory {
            SortKey::Memory
        } else if self.cpu {
            SortKey::Cpu
        } else if self.cpu_utilization {
            SortKey::CpuUtilization
        } else if self.memory_utilization {
            SortKey::MemoryUtilization
        } else if self.pod_name {
            SortKey::PodName
        } else {
            SortKey::default()
        }
    }
}

impl SortKey {
    /// Stable sort in place
    pub fn sort(self, stats: &mut [Stats]) {
        stats.sort_by(|a, b| self.compare(a, b));
    }

    fn compare(self, a: &Stats, b: &Stats) -> Ordering {
        match self {
            SortKey::Memory => b.memory_bytes.cmp(&a.memory_bytes),
            SortKey::Cpu => b.cpu_usage_milli.total_cmp(&a.cpu_usage_milli),
            SortKey::CpuUtilization => b.cpu_usage_percent.total_cmp(&a.cpu_usage_percent),
            SortKey::MemoryUtilization => b.memory_usage_percent.total_cmp(&a.memory_usage_percent),
            SortKey::PodName => a.pod_name.cmp(&b.pod_name),
        }
    }
}

/// Filter then sort
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    filters: Filters,
    sort_key: SortKey,
}

impl Pipeline {
    pub fn new(filters: Filters, sort_by: SortBy) -> Self {
        Self {
            filters,
            sort_key: sort_by.key(),
        }
    }

    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    pub fn run(&self, stats: Vec<Stats>) -> Vec<Stats> {
        let mut stats = self.filters.apply(stats);
        self.sort_key.sort(&mut stats);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(ns: &str, node: &str, pod: &str, container: &str) -> Stats {
        Stats {
            namespace: ns.to_string(),
            node_name: node.to_string(),
            pod_name: pod.to_string(),
            container_name: container.to_string(),
            ..Default::default()
        }
    }

    fn with_cpu(milli: f64) -> Stats {
        Stats {
            cpu_usage_milli: milli,
            ..stats("default", "node-1", &format!("pod-{}", milli), "app")
        }
    }

    fn pods(list: &[Stats]) -> Vec<&str> {
        list.iter().map(|s| s.pod_name.as_str()).collect()
    }

    #[test]
    fn test_namespace_filter() {
        let input = vec![
            stats("a", "n1", "p1", "c"),
            stats("b", "n1", "p2", "c"),
            stats("a", "n2", "p3", "c"),
        ];

        let filters = Filters {
            namespace: "a".to_string(),
            ..Default::default()
        };
        let out = filters.apply(input.clone());
        assert_eq!(pods(&out), vec!["p1", "p3"]);

        assert_eq!(Filters::default().apply(input).len(), 3);
    }

    #[test]
    fn test_filters_are_exact_and_combined() {
        let filters = Filters {
            node: "n1".to_string(),
            container: "sidecar".to_string(),
            ..Default::default()
        };

        assert!(filters.matches(&stats("x", "n1", "p", "sidecar")));
        assert!(!filters.matches(&stats("x", "n1", "p", "Sidecar")));
        assert!(!filters.matches(&stats("x", "n10", "p", "sidecar")));
        assert!(!filters.matches(&stats("x", "n1", "p", "side")));
    }

    #[test]
    fn test_sort_by_cpu() {
        let mut list = vec![with_cpu(50.0), with_cpu(200.0), with_cpu(10.0)];
        SortBy {
            cpu: true,
            ..Default::default()
        }
        .key()
        .sort(&mut list);

        let cpu: Vec<f64> = list.iter().map(|s| s.cpu_usage_milli).collect();
        assert_eq!(cpu, vec![200.0, 50.0, 10.0]);
    }

    #[test]
    fn test_sort_priority() {
        let both = SortBy {
            memory: true,
            cpu: true,
            ..Default::default()
        };
        assert_eq!(both.key(), SortKey::Memory);

        let utilization = SortBy {
            cpu_utilization: true,
            memory_utilization: true,
            pod_name: true,
            ..Default::default()
        };
        assert_eq!(utilization.key(), SortKey::CpuUtilization);

        let names = SortBy {
            memory_utilization: true,
            pod_name: true,
            ..Default::default()
        };
        assert_eq!(names.key(), SortKey::MemoryUtilization);

        assert_eq!(SortBy::default().key(), SortKey::Cpu);
    }

    #[test]
    fn test_memory_takes_priority_over_cpu() {
        let mut big_mem = with_cpu(10.0);
        big_mem.memory_bytes = 1 << 30;
        let mut big_cpu = with_cpu(900.0);
        big_cpu.memory_bytes = 1 << 20;

        let pipeline = Pipeline::new(
            Filters::default(),
            SortBy {
                memory: true,
                cpu: true,
                ..Default::default()
            },
        );
        let out = pipeline.run(vec![big_cpu, big_mem]);
        assert_eq!(out[0].memory_bytes, 1 << 30);
    }

    #[test]
    fn test_sort_by_pod_name_ascending() {
        let mut list = vec![
            stats("d", "n", "web-2", "c"),
            stats("d", "n", "api-0", "c"),
            stats("d", "n", "db-1", "c"),
        ];
        SortKey::PodName.sort(&mut list);
        assert_eq!(pods(&list), vec!["api-0", "db-1", "web-2"]);
    }

    #[test]
    fn test_sort_is_stable() {
        let mut list = vec![
            stats("d", "n", "first", "c"),
            stats("d", "n", "second", "c"),
            stats("d", "n", "third", "c"),
        ];
        SortKey::Cpu.sort(&mut list);
        assert_eq!(pods(&list), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_pipeline_filters_then_sorts() {
        let mut a = with_cpu(5.0);
        a.namespace = "prod".to_string();
        let mut b = with_cpu(500.0);
        b.namespace = "prod".to_string();
        let c = with_cpu(9000.0);

        let pipeline = Pipeline::new(
            Filters {
                namespace: "prod".to_string(),
                ..Default::default()
            },
            SortBy::default(),
        );
        let out = pipeline.run(vec![a, c, b]);
        let cpu: Vec<f64> = out.iter().map(|s| s.cpu_usage_milli).collect();
        assert_eq!(cpu, vec![500.0, 5.0]);
    }
}
