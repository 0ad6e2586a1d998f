use serde::{Deserialize, Serialize};

/// Inbound lead contact shape. `name` and `profile_url` are required by the
/// caller contract; every other field is optional and omitted from CRM
/// payloads when absent so existing CRM data is never blanked out.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInput {
    pub name: String,
    pub profile_url: String,
    #[serde(default)]
    pub public_profile_url: Option<String>,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub selected_role: Option<String>,
    #[serde(default)]
    pub selected_company: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub location_city: Option<String>,
    #[serde(default)]
    pub location_state: Option<String>,
    #[serde(default)]
    pub location_country: Option<String>,
    #[serde(default)]
    pub connected_on: Option<String>,
    #[serde(default)]
    pub experiences: Vec<ExperienceEntry>,
}

/// One work-history entry; used only for note text, never for identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceEntry {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub company_line: Option<String>,
    #[serde(default)]
    pub dates: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyInput {
    pub company_url: String,
    #[serde(default)]
    pub linkedin_company_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location_city: Option<String>,
    #[serde(default)]
    pub location_state: Option<String>,
    #[serde(default)]
    pub location_country: Option<String>,
    #[serde(default)]
    pub employee_count: Option<u32>,
}

/// Outcome of a full lead sync. Company failure is carried as data, never as
/// an error, so the contact path is never blocked by company sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub contact_id: String,
    pub company_id: Option<String>,
    pub company_sync_error: Option<String>,
}

/// Summary of an existing CRM contact returned by the profile probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMatch {
    pub id: String,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
    pub last_modified: Option<String>,
}
