//! Wire shapes for the HubSpot CRM v3/v4 APIs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// CRM property bag. HubSpot serializes every property value as a string.
pub type PropertyMap = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrmObject {
    Contacts,
    Companies,
}

impl CrmObject {
    pub fn path(self) -> &'static str {
        match self {
            Self::Contacts => "contacts",
            Self::Companies => "companies",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngagementObject {
    Notes,
    Tasks,
}

impl EngagementObject {
    pub fn path(self) -> &'static str {
        match self {
            Self::Notes => "notes",
            Self::Tasks => "tasks",
        }
    }

    /// HUBSPOT_DEFINED association type linking the engagement to a contact.
    pub fn contact_association_type_id(self) -> u32 {
        match self {
            Self::Notes => 202,
            Self::Tasks => 204,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchUpsertRequest {
    pub inputs: Vec<UpsertInput>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UpsertInput {
    pub properties: PropertyMap,
    #[serde(rename = "idProperty")]
    pub id_property: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchUpsertResponse {
    #[serde(default)]
    pub results: Vec<UpsertedRecord>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpsertedRecord {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub filter_groups: Vec<FilterGroup>,
    pub properties: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FilterGroup {
    pub filters: Vec<Filter>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub property_name: String,
    pub operator: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<ObjectRecord>,
}

/// Generic CRM object as returned by search and batch-read endpoints.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObjectRecord {
    pub id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, Option<String>>,
}

impl ObjectRecord {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|value| value.as_deref())
    }
}

#[derive(Debug, Serialize)]
pub struct AssociationBatchRequest {
    pub inputs: Vec<AssociationInput>,
}

#[derive(Debug, Serialize)]
pub struct AssociationInput {
    pub from: ObjectRef,
    pub to: ObjectRef,
    #[serde(rename = "type")]
    pub association_type: String,
}

#[derive(Debug, Serialize)]
pub struct ObjectRef {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct EngagementCreateRequest {
    pub properties: PropertyMap,
    pub associations: Vec<EngagementAssociation>,
}

#[derive(Debug, Serialize)]
pub struct EngagementAssociation {
    pub to: ObjectRef,
    pub types: Vec<AssociationTypeSpec>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationTypeSpec {
    pub association_category: &'static str,
    pub association_type_id: u32,
}

#[derive(Debug, Serialize)]
pub struct PropertiesBody {
    pub properties: PropertyMap,
}

#[derive(Debug, Deserialize)]
pub struct CreatedObject {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct AssociationListResponse {
    #[serde(default)]
    pub results: Vec<AssociationEdge>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationEdge {
    pub to_object_id: i64,
}

#[derive(Debug, Serialize)]
pub struct BatchReadRequest {
    pub properties: Vec<String>,
    pub inputs: Vec<ObjectIdInput>,
}

#[derive(Debug, Serialize)]
pub struct ObjectIdInput {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchReadResponse {
    #[serde(default)]
    pub results: Vec<ObjectRecord>,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct OwnersPage {
    #[serde(default)]
    pub results: Vec<OwnerSummary>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerSummary {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PropertyDefinition {
    #[serde(default)]
    pub options: Vec<PropertyOption>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PropertyOption {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub hidden: bool,
}

/// Dropdown data for the integration UI: assignable owners plus the
/// portal's lifecycle stage choices.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyOptions {
    pub owners: Vec<OwnerSummary>,
    pub lifecycle_stages: Vec<PropertyOption>,
}
