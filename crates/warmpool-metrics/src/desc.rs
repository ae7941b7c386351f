//! Metric descriptors and samples.

use warmpool_prebuilds::PresetKey;

/// Label names carried by every per-preset metric, in exposition order.
pub const PRESET_LABELS: [&str; 3] = ["template_name", "preset_name", "organization_name"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

/// Static description of one metric family.
#[derive(Debug, PartialEq, Eq)]
pub struct Desc {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
    /// Whether samples carry [`PRESET_LABELS`].
    pub per_preset: bool,
}

pub static CREATED_TOTAL: Desc = Desc {
    name: "warmpool_prebuilt_workspaces_created_total",
    help: "Total number of prebuilt workspaces created to meet the desired instance count of each template preset.",
    kind: MetricKind::Counter,
    per_preset: true,
};

pub static FAILED_TOTAL: Desc = Desc {
    name: "warmpool_prebuilt_workspaces_failed_total",
    help: "Total number of prebuilt workspaces that failed to build.",
    kind: MetricKind::Counter,
    per_preset: true,
};

pub static CLAIMED_TOTAL: Desc = Desc {
    name: "warmpool_prebuilt_workspaces_claimed_total",
    help: "Total number of prebuilt workspaces reassigned to users who created a workspace from the preset.",
    kind: MetricKind::Counter,
    per_preset: true,
};

pub static RESOURCE_REPLACEMENTS_TOTAL: Desc = Desc {
    name: "warmpool_prebuilt_workspaces_resource_replacements_total",
    help: "Total number of prebuilt workspaces whose resources were replaced when claimed, undoing the pre-provisioning.",
    kind: MetricKind::Counter,
    per_preset: true,
};

pub static DESIRED: Desc = Desc {
    name: "warmpool_prebuilt_workspaces_desired",
    help: "Target number of prebuilt workspaces that should be available for each template preset.",
    kind: MetricKind::Gauge,
    per_preset: true,
};

pub static RUNNING: Desc = Desc {
    name: "warmpool_prebuilt_workspaces_running",
    help: "Current number of prebuilt workspaces provisioning or running, claimable or not (see warmpool_prebuilt_workspaces_eligible).",
    kind: MetricKind::Gauge,
    per_preset: true,
};

pub static ELIGIBLE: Desc = Desc {
    name: "warmpool_prebuilt_workspaces_eligible",
    help: "Current number of prebuilt workspaces that finished building and can be claimed by users.",
    kind: MetricKind::Gauge,
    per_preset: true,
};

pub static PRESET_HARD_LIMITED: Desc = Desc {
    name: "warmpool_prebuilt_workspaces_preset_hard_limited",
    help: "Set to 1 when a preset has reached its hard failure limit. Omitted otherwise.",
    kind: MetricKind::Gauge,
    per_preset: true,
};

pub static METRICS_LAST_UPDATED: Desc = Desc {
    name: "warmpool_prebuilt_workspaces_metrics_last_updated",
    help: "Unix timestamp of the last successful refresh of the cached prebuild metrics; 0 before the first one.",
    kind: MetricKind::Gauge,
    per_preset: false,
};

pub static RECONCILIATION_PAUSED: Desc = Desc {
    name: "warmpool_prebuilt_workspaces_reconciliation_paused",
    help: "Whether prebuild reconciliation is paused (1 = paused, 0 = running).",
    kind: MetricKind::Gauge,
    per_preset: false,
};

/// Every descriptor, in exposition order.
pub static ALL: [&Desc; 10] = [
    &CREATED_TOTAL,
    &FAILED_TOTAL,
    &CLAIMED_TOTAL,
    &RESOURCE_REPLACEMENTS_TOTAL,
    &DESIRED,
    &RUNNING,
    &ELIGIBLE,
    &PRESET_HARD_LIMITED,
    &METRICS_LAST_UPDATED,
    &RECONCILIATION_PAUSED,
];

/// One sample of a metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub desc: &'static Desc,
    /// `None` for the unlabeled gauges.
    pub labels: Option<PresetKey>,
    pub value: f64,
}

impl Metric {
    pub fn unlabeled(desc: &'static Desc, value: f64) -> Self {
        Self {
            desc,
            labels: None,
            value,
        }
    }

    pub fn for_preset(desc: &'static Desc, key: PresetKey, value: f64) -> Self {
        Self {
            desc,
            labels: Some(key),
            value,
        }
    }

    /// Label values in [`PRESET_LABELS`] order.
    pub fn label_values(&self) -> Option<[&str; 3]> {
        self.labels.as_ref().map(|k| {
            [
                k.template_name.as_str(),
                k.preset_name.as_str(),
                k.organization_name.as_str(),
            ]
        })
    }
}
