use serde::{Deserialize, Serialize};

/// A single Power BI report or dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub name: String,
    #[serde(rename = "webUrl")]
    pub web_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Groups {
    pub value: Vec<Group>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Group {
    pub id: String,
    pub name: String,
}

/// A page within a report. `name` is the stable internal id used for
/// `PostReportTask::page_ids` and `set_page`; `display_name` is the
/// human-facing label shown in the Power BI UI. Both are kept — see
/// DESIGN.md's Open Question 2 — because `name` is the only one safe to
/// persist across report republishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagesContainer {
    pub value: Vec<Page>,
}

/// Reports grouped by the Power BI group (workspace) they live in, the
/// result shape of a `get_grouped_reports` parallel fetch.
#[derive(Debug, Clone, Default)]
pub struct GroupedReports {
    pub groups: Vec<(Group, Vec<Report>)>,
}
