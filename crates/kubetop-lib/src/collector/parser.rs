//! cAdvisor metrics parsing
//!
//! Reads the Prometheus text exposition format served by the kubelet at
//! `/metrics/cadvisor` and extracts two families:
//! - container_cpu_user_seconds_total (counter, cumulative CPU seconds)
//! - container_memory_usage_bytes (gauge, current memory bytes)
//!
//! All other families are skipped without being fully parsed.

use crate::error::ParseError;
use crate::models::{ContainerIdentity, RawCpuSample, RawMemorySample};

/// CPU counter family name
pub const CPU_FAMILY: &str = "container_cpu_user_seconds_total";
/// Memory gauge family name
pub const MEMORY_FAMILY: &str = "container_memory_usage_bytes";

const POD_LABEL: &str = "pod";
const CONTAINER_LABEL: &str = "container";
const NAMESPACE_LABEL: &str = "namespace";
const IMAGE_LABEL: &str = "image";
const NAME_LABEL: &str = "name";
const ID_LABEL: &str = "id";

/// Samples extracted from one payload
#[derive(Debug, Clone, Default)]
pub struct ParsedMetrics {
    pub cpu: Vec<RawCpuSample>,
    pub memory: Vec<RawMemorySample>,
    /// Data points dropped for missing pod, namespace or container labels
    pub skipped: usize,
}

/// Parser for cAdvisor payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsParser {
    allow_unlabeled_name: bool,
}

/// Parse a payload with the given unlabeled-name policy
pub fn parse(payload: &str, allow_unlabeled_name: bool) -> Result<ParsedMetrics, ParseError> {
    MetricsParser::new(allow_unlabeled_name).parse(payload)
}

#[derive(Debug, Default)]
struct FamilySeen {
    declared: bool,
    samples: usize,
}

impl FamilySeen {
    fn present(&self) -> bool {
        self.declared || self.samples > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Cpu,
    Memory,
}

impl Family {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            CPU_FAMILY => Some(Family::Cpu),
            MEMORY_FAMILY => Some(Family::Memory),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Family::Cpu => CPU_FAMILY,
            Family::Memory => MEMORY_FAMILY,
        }
    }
}

impl MetricsParser {
    /// Create a parser.
    ///
    /// With `allow_unlabeled_name` set, samples whose `container` label is
    /// empty are kept. Samples with an empty `pod` or `namespace` label are
    /// cgroup-level aggregates and are always dropped.
    pub fn new(allow_unlabeled_name: bool) -> Self {
        Self {
            allow_unlabeled_name,
        }
    }

    /// Parse a full exposition payload
    pub fn parse(&self, payload: &str) -> Result<ParsedMetrics, ParseError> {
        let mut parsed = ParsedMetrics::default();
        let mut cpu_seen = FamilySeen::default();
        let mut memory_seen = FamilySeen::default();

        for (index, raw_line) in payload.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(comment) = line.strip_prefix('#') {
                // "# HELP <name> ..." and "# TYPE <name> <type>" declare a family
                let mut parts = comment.split_whitespace();
                if let (Some("HELP" | "TYPE"), Some(name)) = (parts.next(), parts.next()) {
                    match Family::from_name(name) {
                        Some(Family::Cpu) => cpu_seen.declared = true,
                        Some(Family::Memory) => memory_seen.declared = true,
                        None => {}
                    }
                }
                continue;
            }

            let name_end = line
                .find(|c: char| c == '{' || c.is_whitespace())
                .unwrap_or(line.len());
            let Some(family) = Family::from_name(&line[..name_end]) else {
                continue;
            };

            let sample = parse_sample_line(&line[name_end..], line_no)?;
            match family {
                Family::Cpu => cpu_seen.samples += 1,
                Family::Memory => memory_seen.samples += 1,
            }

            let Some((identity, image)) = self.resolve_identity(family, sample.labels)? else {
                parsed.skipped += 1;
                continue;
            };

            match family {
                Family::Cpu => parsed.cpu.push(RawCpuSample {
                    identity,
                    image,
                    cpu_seconds_total: sample.value,
                }),
                Family::Memory => parsed.memory.push(RawMemorySample {
                    identity,
                    image,
                    memory_bytes: sample.value,
                }),
            }
        }

        if !cpu_seen.present() && !memory_seen.present() {
            return Err(ParseError::MissingFamilies {
                cpu_family: CPU_FAMILY.to_string(),
                memory_family: MEMORY_FAMILY.to_string(),
            });
        }
        for (family, seen) in [(Family::Cpu, &cpu_seen), (Family::Memory, &memory_seen)] {
            if seen.declared && seen.samples == 0 {
                return Err(ParseError::EmptyFamily {
                    family: family.name().to_string(),
                });
            }
        }

        Ok(parsed)
    }

    /// Map labels to a container identity.
    /// Returns `Ok(None)` for samples that do not name a single container.
    fn resolve_identity(
        &self,
        family: Family,
        labels: Vec<(String, String)>,
    ) -> Result<Option<(ContainerIdentity, String)>, ParseError> {
        let mut pod = String::new();
        let mut container = String::new();
        let mut namespace = String::new();
        let mut image = String::new();

        for (label, value) in labels {
            match label.as_str() {
                POD_LABEL => pod = value,
                CONTAINER_LABEL => container = value,
                NAMESPACE_LABEL => namespace = value,
                IMAGE_LABEL => image = value,
                NAME_LABEL | ID_LABEL => {}
                _ => {
                    return Err(ParseError::UnknownLabel {
                        family: family.name().to_string(),
                        label,
                    })
                }
            }
        }

        if pod.is_empty() || namespace.is_empty() {
            return Ok(None);
        }
        if container.is_empty() && !self.allow_unlabeled_name {
            return Ok(None);
        }

        Ok(Some((ContainerIdentity::new(namespace, pod, container), image)))
    }
}

/// Labels and value of one sample line, name already stripped
#[derive(Debug)]
struct SampleLine {
    labels: Vec<(String, String)>,
    value: f64,
}

/// Parse `{labels} value [timestamp]`
fn parse_sample_line(rest: &str, line_no: usize) -> Result<SampleLine, ParseError> {
    let (labels, tail) = match rest.strip_prefix('{') {
        Some(body) => parse_labels(body, line_no)?,
        None => (Vec::new(), rest),
    };

    let mut fields = tail.split_whitespace();
    let raw_value = fields.next().ok_or_else(|| ParseError::Malformed {
        line: line_no,
        reason: "missing sample value".to_string(),
    })?;
    let value = parse_value(raw_value).ok_or_else(|| ParseError::InvalidValue {
        line: line_no,
        value: raw_value.to_string(),
    })?;

    // Optional millisecond timestamp; the fetch time is used instead
    if let Some(ts) = fields.next() {
        if ts.parse::<i64>().is_err() {
            return Err(ParseError::Malformed {
                line: line_no,
                reason: format!("invalid timestamp {:?}", ts),
            });
        }
    }
    if fields.next().is_some() {
        return Err(ParseError::Malformed {
            line: line_no,
            reason: "unexpected trailing fields".to_string(),
        });
    }

    Ok(SampleLine { labels, value })
}

/// Parse a label set starting right after `{`.
/// Returns the labels and the remainder after the closing `}`.
fn parse_labels(body: &str, line_no: usize) -> Result<(Vec<(String, String)>, &str), ParseError> {
    let malformed = |reason: &str| ParseError::Malformed {
        line: line_no,
        reason: reason.to_string(),
    };

    let mut labels = Vec::new();
    let mut chars = body.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        match chars.peek().copied() {
            None => return Err(malformed("unterminated label set")),
            Some((i, '}')) => return Ok((labels, &body[i + 1..])),
            Some((_, ',')) => {
                chars.next();
                continue;
            }
            Some(_) => {}
        }

        let mut name = String::new();
        while let Some((_, c)) = chars.next_if(|(_, c)| c.is_ascii_alphanumeric() || *c == '_') {
            name.push(c);
        }
        if name.is_empty() {
            return Err(malformed("expected label name"));
        }

        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        if chars.next().map(|(_, c)| c) != Some('=') {
            return Err(malformed("expected '=' after label name"));
        }
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        if chars.next().map(|(_, c)| c) != Some('"') {
            return Err(malformed("expected quoted label value"));
        }

        let mut value = String::new();
        loop {
            match chars.next() {
                None => return Err(malformed("unterminated label value")),
                Some((_, '"')) => break,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(malformed("unterminated escape sequence")),
                },
                Some((_, c)) => value.push(c),
            }
        }

        labels.push((name, value));
    }
}

fn parse_value(raw: &str) -> Option<f64> {
    match raw {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => raw.parse().ok(),
    }
}
