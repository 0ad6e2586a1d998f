//! Entity synchronization: lead upserts, identity resolution against the
//! CRM, and note/task engagements.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use leadsync_core::domain::engagement::{
    ContactUpdate, NoteInput, NoteRecord, NoteUpdate, TaskInput, TaskRecord, TaskUpdate,
};
use leadsync_core::domain::lead::{CompanyInput, ContactInput, ContactMatch, SyncResult};
use leadsync_core::identity::{extract_company_segment, extract_profile_handle, normalize_website};

use crate::client::CrmApi;
use crate::error::HubSpotError;
use crate::types::{
    CrmObject, EngagementObject, ObjectRecord, PropertyMap, PropertyOptions, UpsertInput,
};

const NOTE_READ_PROPERTIES: &[&str] = &["hs_note_body", "hs_createdate"];
const TASK_READ_PROPERTIES: &[&str] =
    &["hs_task_subject", "hs_task_body", "hs_task_status", "hs_timestamp"];

pub struct SyncEngine {
    crm: Arc<dyn CrmApi>,
}

impl SyncEngine {
    pub fn new(crm: Arc<dyn CrmApi>) -> Self {
        Self { crm }
    }

    /// Full lead sync: company first (failure tolerated), then contact
    /// (failure fatal), then association and profile note (failures
    /// tolerated). The outcome carries the company failure as data.
    pub async fn sync_full_lead(
        &self,
        access_token: &str,
        contact: &ContactInput,
        company: Option<&CompanyInput>,
        owner_id: Option<&str>,
    ) -> Result<SyncResult, HubSpotError> {
        info!(contact = %contact.name, "starting lead sync");

        let mut company_id = None;
        let mut company_sync_error = None;
        if let Some(company) = company {
            match self.upsert_company(access_token, company, owner_id).await {
                Ok(id) => {
                    info!(company_id = %id, "company upserted");
                    company_id = Some(id);
                }
                Err(err) => {
                    error!(error = %err, "company sync failed");
                    company_sync_error = Some(err.to_string());
                }
            }
        }

        let contact_id = self.upsert_contact(access_token, contact, owner_id).await?;
        info!(contact_id = %contact_id, "contact upserted");

        if let Some(company_id) = company_id.as_deref() {
            if let Err(err) = self
                .crm
                .associate_contact_to_company(access_token, &contact_id, company_id)
                .await
            {
                error!(error = %err, "contact-company association failed");
            }
        }

        if !contact.experiences.is_empty() {
            if let Err(err) = self.add_profile_note(access_token, &contact_id, contact).await {
                error!(error = %err, "profile note failed");
            }
        }

        Ok(SyncResult { success: true, contact_id, company_id, company_sync_error })
    }

    pub async fn upsert_contact(
        &self,
        access_token: &str,
        contact: &ContactInput,
        owner_id: Option<&str>,
    ) -> Result<String, HubSpotError> {
        let handle = contact
            .public_profile_url
            .as_deref()
            .and_then(extract_profile_handle)
            .or_else(|| extract_profile_handle(&contact.profile_url));

        let (id_property, id_value) = match (&handle, &contact.email) {
            (Some(handle), _) => ("linkedin_id", handle.clone()),
            (None, Some(email)) => ("email", email.clone()),
            (None, None) => return Err(HubSpotError::MissingContactIdentifier),
        };

        let (firstname, lastname) = split_name(&contact.name);
        let mut properties = PropertyMap::new();
        properties.insert("firstname".into(), firstname);
        properties.insert("lastname".into(), lastname);
        properties.insert(
            "jobtitle".into(),
            contact
                .selected_role
                .clone()
                .or_else(|| contact.headline.clone())
                .unwrap_or_default(),
        );
        properties.insert("company".into(), contact.selected_company.clone().unwrap_or_default());
        properties.insert("lifecyclestage".into(), "lead".into());
        properties.insert("hs_linkedin_url".into(), contact.profile_url.clone());

        insert_opt(&mut properties, "email", contact.email.as_deref());
        insert_opt(&mut properties, "phone", contact.phone.as_deref());
        insert_opt(&mut properties, "website", contact.website.as_deref());
        insert_opt(&mut properties, "city", contact.location_city.as_deref());
        insert_opt(&mut properties, "state", contact.location_state.as_deref());
        insert_opt(&mut properties, "country", contact.location_country.as_deref());
        insert_opt(&mut properties, "linkedin_id", handle.as_deref());
        insert_opt(&mut properties, "hubspot_owner_id", owner_id);

        let input =
            UpsertInput { properties, id_property: id_property.to_string(), id: id_value };
        let results =
            self.crm.batch_upsert(access_token, CrmObject::Contacts, vec![input]).await?;
        results
            .into_iter()
            .next()
            .map(|record| record.id)
            .ok_or_else(|| HubSpotError::Upstream("contact upsert returned no results".into()))
    }

    pub async fn upsert_company(
        &self,
        access_token: &str,
        company: &CompanyInput,
        owner_id: Option<&str>,
    ) -> Result<String, HubSpotError> {
        let linkedin_id = company
            .linkedin_company_id
            .clone()
            .or_else(|| extract_company_segment(&company.company_url))
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| HubSpotError::MissingCompanyIdentifier {
                url: company.company_url.clone(),
            })?;

        let mut properties = PropertyMap::new();
        properties.insert(
            "name".into(),
            company.name.clone().unwrap_or_else(|| "Unknown Company".to_string()),
        );
        properties.insert("linkedin_company_id".into(), linkedin_id.clone());

        let domain = company.website.as_deref().and_then(normalize_website);
        insert_opt(&mut properties, "domain", domain.as_deref());
        insert_opt(&mut properties, "website", company.website.as_deref());
        insert_opt(&mut properties, "description", company.description.as_deref());
        insert_opt(&mut properties, "city", company.location_city.as_deref());
        insert_opt(&mut properties, "state", company.location_state.as_deref());
        insert_opt(&mut properties, "country", company.location_country.as_deref());
        if let Some(count) = company.employee_count {
            properties.insert("numberofemployees".into(), count.to_string());
        }
        insert_opt(&mut properties, "hubspot_owner_id", owner_id);

        let input = UpsertInput {
            properties,
            id_property: "linkedin_company_id".to_string(),
            id: linkedin_id,
        };
        let results =
            self.crm.batch_upsert(access_token, CrmObject::Companies, vec![input]).await?;
        results
            .into_iter()
            .next()
            .map(|record| record.id)
            .ok_or_else(|| HubSpotError::Upstream("company upsert returned no results".into()))
    }

    /// Looks up an existing contact by LinkedIn handle. The CRM search is
    /// token-based and over-matches on handle prefixes, so candidates are
    /// re-checked for an exact `/in/<handle>` URL suffix.
    pub async fn find_contact_by_handle(
        &self,
        access_token: &str,
        handle: &str,
    ) -> Result<Option<ContactMatch>, HubSpotError> {
        let handle = handle.trim();
        if handle.is_empty() {
            return Ok(None);
        }

        let fragment = format!("/in/{handle}");
        let results = match self
            .crm
            .search_contacts_by_linkedin_fragment(access_token, &fragment)
            .await
        {
            Ok(results) => results,
            Err(HubSpotError::Validation(_)) | Err(HubSpotError::NotFound(_)) => return Ok(None),
            Err(other) => return Err(other),
        };

        let with_slash = format!("{fragment}/");
        let matched = results.into_iter().find(|record| {
            record
                .property("hs_linkedin_url")
                .is_some_and(|url| url.ends_with(&fragment) || url.ends_with(&with_slash))
        });

        Ok(matched.map(|record| ContactMatch {
            firstname: record.property("firstname").map(str::to_string),
            lastname: record.property("lastname").map(str::to_string),
            email: record.property("email").map(str::to_string),
            last_modified: record.property("lastmodifieddate").map(str::to_string),
            id: record.id,
        }))
    }

    pub async fn update_contact_by_handle(
        &self,
        access_token: &str,
        handle: &str,
        update: &ContactUpdate,
    ) -> Result<(), HubSpotError> {
        if update.is_empty() {
            return Err(HubSpotError::Validation("no valid fields to update".into()));
        }

        let matched = self
            .find_contact_by_handle(access_token, handle)
            .await?
            .ok_or_else(|| HubSpotError::NotFound(format!("contact for handle `{handle}`")))?;

        let mut properties = PropertyMap::new();
        if let Some(name) = update.name.as_deref() {
            let (firstname, lastname) = split_name(name);
            properties.insert("firstname".into(), firstname);
            properties.insert("lastname".into(), lastname);
        }
        insert_opt(&mut properties, "email", update.email.as_deref());
        insert_opt(&mut properties, "phone", update.phone.as_deref());
        insert_opt(&mut properties, "company", update.company.as_deref());
        insert_opt(&mut properties, "lifecyclestage", update.lifecycle_stage.as_deref());
        insert_opt(&mut properties, "hubspot_owner_id", update.owner_id.as_deref());

        self.crm.update_contact(access_token, &matched.id, properties).await
    }

    async fn add_profile_note(
        &self,
        access_token: &str,
        contact_id: &str,
        contact: &ContactInput,
    ) -> Result<(), HubSpotError> {
        let mut body = String::from("<b>LinkedIn Sync Details</b><br/>");
        body.push_str(&format!("Profile: {}<br/>", contact.profile_url));
        body.push_str(&format!(
            "Connected On: {}<br/><br/>",
            contact.connected_on.as_deref().unwrap_or("N/A"),
        ));

        if !contact.experiences.is_empty() {
            body.push_str("<b>Work History:</b><br/>");
            for experience in &contact.experiences {
                body.push_str(&format!(
                    "\u{2022} {} at {} ({})<br/>",
                    experience.role.as_deref().unwrap_or("N/A"),
                    experience.company_line.as_deref().unwrap_or("N/A"),
                    experience.dates.as_deref().unwrap_or("N/A"),
                ));
            }
        }

        let mut properties = PropertyMap::new();
        properties.insert("hs_note_body".into(), body);
        properties.insert("hs_timestamp".into(), Utc::now().to_rfc3339());

        self.crm
            .create_engagement(access_token, EngagementObject::Notes, contact_id, properties)
            .await?;
        Ok(())
    }

    pub async fn create_note(
        &self,
        access_token: &str,
        input: &NoteInput,
        owner_id: Option<&str>,
    ) -> Result<String, HubSpotError> {
        let mut properties = PropertyMap::new();
        properties.insert(
            "hs_note_body".into(),
            compose_note_body(
                input.note_title.as_deref(),
                input.deal_value.as_deref(),
                input.next_step.as_deref(),
                input.notes.as_deref(),
            ),
        );
        properties.insert("hs_timestamp".into(), Utc::now().to_rfc3339());
        insert_opt(&mut properties, "hubspot_owner_id", owner_id);

        self.crm
            .create_engagement(access_token, EngagementObject::Notes, &input.contact_id, properties)
            .await
    }

    pub async fn notes_for_contact(
        &self,
        access_token: &str,
        contact_id: &str,
    ) -> Result<Vec<NoteRecord>, HubSpotError> {
        let records = self
            .crm
            .list_engagements_for_contact(
                access_token,
                EngagementObject::Notes,
                contact_id,
                NOTE_READ_PROPERTIES,
            )
            .await?;

        Ok(records.into_iter().map(note_from_record).collect())
    }

    pub async fn update_note(
        &self,
        access_token: &str,
        note_id: &str,
        update: &NoteUpdate,
    ) -> Result<(), HubSpotError> {
        let mut properties = PropertyMap::new();
        properties.insert(
            "hs_note_body".into(),
            compose_note_body(
                update.note_title.as_deref(),
                update.deal_value.as_deref(),
                update.next_step.as_deref(),
                update.notes.as_deref(),
            ),
        );

        self.crm
            .update_engagement(access_token, EngagementObject::Notes, note_id, properties)
            .await
    }

    pub async fn delete_note(
        &self,
        access_token: &str,
        note_id: &str,
    ) -> Result<(), HubSpotError> {
        self.crm.delete_engagement(access_token, EngagementObject::Notes, note_id).await
    }

    pub async fn create_task(
        &self,
        access_token: &str,
        input: &TaskInput,
        owner_id: Option<&str>,
    ) -> Result<String, HubSpotError> {
        let mut properties = PropertyMap::new();
        properties.insert("hs_task_subject".into(), input.subject.clone());
        properties.insert(
            "hs_timestamp".into(),
            input.due_at.clone().unwrap_or_else(|| Utc::now().to_rfc3339()),
        );
        properties.insert(
            "hs_task_status".into(),
            input.status.clone().unwrap_or_else(|| "NOT_STARTED".to_string()),
        );
        insert_opt(&mut properties, "hs_task_body", input.body.as_deref());
        insert_opt(&mut properties, "hs_task_priority", input.priority.as_deref());
        insert_opt(&mut properties, "hubspot_owner_id", owner_id);

        self.crm
            .create_engagement(access_token, EngagementObject::Tasks, &input.contact_id, properties)
            .await
    }

    pub async fn tasks_for_contact(
        &self,
        access_token: &str,
        contact_id: &str,
    ) -> Result<Vec<TaskRecord>, HubSpotError> {
        let records = self
            .crm
            .list_engagements_for_contact(
                access_token,
                EngagementObject::Tasks,
                contact_id,
                TASK_READ_PROPERTIES,
            )
            .await?;

        Ok(records.into_iter().map(task_from_record).collect())
    }

    pub async fn update_task(
        &self,
        access_token: &str,
        task_id: &str,
        update: &TaskUpdate,
    ) -> Result<(), HubSpotError> {
        let mut properties = PropertyMap::new();
        insert_opt(&mut properties, "hs_task_subject", update.subject.as_deref());
        insert_opt(&mut properties, "hs_task_body", update.body.as_deref());
        insert_opt(&mut properties, "hs_timestamp", update.due_at.as_deref());
        insert_opt(&mut properties, "hs_task_priority", update.priority.as_deref());
        insert_opt(&mut properties, "hs_task_status", update.status.as_deref());

        if properties.is_empty() {
            return Err(HubSpotError::Validation("no valid fields to update".into()));
        }

        self.crm
            .update_engagement(access_token, EngagementObject::Tasks, task_id, properties)
            .await
    }

    pub async fn delete_task(
        &self,
        access_token: &str,
        task_id: &str,
    ) -> Result<(), HubSpotError> {
        self.crm.delete_engagement(access_token, EngagementObject::Tasks, task_id).await
    }

    pub async fn property_options(
        &self,
        access_token: &str,
    ) -> Result<PropertyOptions, HubSpotError> {
        let owners = self.crm.list_owners(access_token).await?;
        let lifecycle_stages =
            self.crm.read_property_options(access_token, "contacts", "lifecyclestage").await?;
        Ok(PropertyOptions { owners, lifecycle_stages })
    }
}

fn split_name(name: &str) -> (String, String) {
    let mut parts = name.split_whitespace();
    let first = parts.next().unwrap_or("Unknown").to_string();
    let rest = parts.collect::<Vec<_>>().join(" ");
    (first, rest)
}

fn insert_opt(properties: &mut PropertyMap, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        if !value.is_empty() {
            properties.insert(key.to_string(), value.to_string());
        }
    }
}

fn compose_note_body(
    title: Option<&str>,
    deal_value: Option<&str>,
    next_step: Option<&str>,
    notes: Option<&str>,
) -> String {
    let mut body = String::new();
    if let Some(title) = title.filter(|value| !value.is_empty()) {
        body.push_str(&format!("<b>{title}</b><br/>"));
    }
    if let Some(deal_value) = deal_value.filter(|value| !value.is_empty()) {
        body.push_str(&format!("Deal Value: {deal_value}<br/>"));
    }
    if let Some(next_step) = next_step.filter(|value| !value.is_empty()) {
        body.push_str(&format!("Next Step: {next_step}<br/>"));
    }
    if let Some(notes) = notes.filter(|value| !value.is_empty()) {
        body.push_str(notes);
    }
    body
}

fn note_from_record(record: ObjectRecord) -> NoteRecord {
    NoteRecord {
        body: record.property("hs_note_body").map(str::to_string),
        created_at: record.property("hs_createdate").map(str::to_string),
        id: record.id,
    }
}

fn task_from_record(record: ObjectRecord) -> TaskRecord {
    TaskRecord {
        subject: record.property("hs_task_subject").map(str::to_string),
        body: record.property("hs_task_body").map(str::to_string),
        status: record.property("hs_task_status").map(str::to_string),
        due_at: record.property("hs_timestamp").map(str::to_string),
        id: record.id,
    }
}
