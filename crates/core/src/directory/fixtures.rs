use super::{DirectoryError, OrgChart};

/// Bundled sample organisation, shared with the policy tables in the same file.
pub const SAMPLE_ORG_CHART: &str = include_str!("../../../../config/org_chart.toml");

pub fn sample_org_chart() -> Result<OrgChart, DirectoryError> {
    OrgChart::from_toml_str(SAMPLE_ORG_CHART)
}
