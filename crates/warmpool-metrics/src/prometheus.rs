//! Prometheus text exposition format.
//!
//! Renders collected samples into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use crate::desc::{self, Metric, PRESET_LABELS};

/// Render samples into Prometheus text format.
///
/// Every known family gets its HELP and TYPE lines, followed by the samples
/// that belong to it. Samples keep their relative order within a family.
pub fn render_prometheus(metrics: &[Metric]) -> String {
    let mut out = String::new();

    for family in desc::ALL.iter() {
        let _ = writeln!(out, "# HELP {} {}", family.name, escape_help(family.help));
        let _ = writeln!(out, "# TYPE {} {}", family.name, family.kind.as_str());

        for m in metrics.iter().filter(|m| m.desc.name == family.name) {
            match m.label_values() {
                Some(values) => {
                    let labels: Vec<String> = PRESET_LABELS
                        .iter()
                        .zip(values)
                        .map(|(name, value)| format!("{name}=\"{}\"", escape_label(value)))
                        .collect();
                    let _ = writeln!(out, "{}{{{}}} {}", family.name, labels.join(","), m.value);
                }
                None => {
                    let _ = writeln!(out, "{} {}", family.name, m.value);
                }
            }
        }
    }

    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use warmpool_prebuilds::PresetKey;

    #[test]
    fn render_empty() {
        let output = render_prometheus(&[]);
        // Should still have type declarations.
        assert!(output.contains("# HELP warmpool_prebuilt_workspaces_created_total"));
        assert!(output.contains("# TYPE warmpool_prebuilt_workspaces_created_total counter"));
        assert!(output.contains("# TYPE warmpool_prebuilt_workspaces_eligible gauge"));
    }

    #[test]
    fn render_labeled_and_unlabeled() {
        let metrics = vec![
            Metric::for_preset(&desc::CREATED_TOTAL, PresetKey::new("acme", "docker", "large"), 5.0),
            Metric::for_preset(&desc::ELIGIBLE, PresetKey::new("acme", "docker", "large"), 2.0),
            Metric::unlabeled(&desc::METRICS_LAST_UPDATED, 1_700_000_000.0),
        ];
        let output = render_prometheus(&metrics);

        assert!(output.contains(
            "warmpool_prebuilt_workspaces_created_total{template_name=\"docker\",preset_name=\"large\",organization_name=\"acme\"} 5\n"
        ));
        assert!(output.contains(
            "warmpool_prebuilt_workspaces_eligible{template_name=\"docker\",preset_name=\"large\",organization_name=\"acme\"} 2\n"
        ));
        assert!(output.contains("warmpool_prebuilt_workspaces_metrics_last_updated 1700000000\n"));
    }

    #[test]
    fn samples_follow_their_type_line() {
        let metrics = vec![Metric::unlabeled(&desc::RECONCILIATION_PAUSED, 1.0)];
        let output = render_prometheus(&metrics);

        let type_at = output
            .find("# TYPE warmpool_prebuilt_workspaces_reconciliation_paused gauge")
            .unwrap();
        let sample_at = output
            .find("warmpool_prebuilt_workspaces_reconciliation_paused 1\n")
            .unwrap();
        assert!(type_at < sample_at);
    }

    #[test]
    fn label_values_are_escaped() {
        let metrics = vec![Metric::for_preset(
            &desc::DESIRED,
            PresetKey::new("acme", "my \"docker\"", "a\\b\nc"),
            1.0,
        )];
        let output = render_prometheus(&metrics);

        assert!(output.contains(r#"template_name="my \"docker\"""#));
        assert!(output.contains(r#"preset_name="a\\b\nc""#));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let metrics = vec![
            Metric::for_preset(&desc::RUNNING, PresetKey::new("o", "t", "p"), 3.0),
            Metric::unlabeled(&desc::RECONCILIATION_PAUSED, 0.0),
        ];
        let output = render_prometheus(&metrics);

        // Every sample line is `name[{labels}] value`.
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (series, value) = line.rsplit_once(' ').unwrap();
            assert!(series.starts_with("warmpool_prebuilt_workspaces_"), "line: {line}");
            assert!(value.parse::<f64>().is_ok(), "line: {line}");
        }
    }
}
