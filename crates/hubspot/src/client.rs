use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::warn;

use leadsync_core::config::HubSpotConfig;
use leadsync_core::domain::connection::TokenPair;

use crate::error::HubSpotError;
use crate::types::{
    AssociationBatchRequest, AssociationInput, AssociationListResponse, AssociationTypeSpec,
    BatchReadRequest, BatchReadResponse, BatchUpsertRequest, BatchUpsertResponse, CreatedObject,
    CrmObject, EngagementAssociation, EngagementCreateRequest, EngagementObject, Filter,
    FilterGroup, ObjectIdInput, ObjectRecord, ObjectRef, OwnersPage, OwnerSummary, PropertiesBody,
    PropertyDefinition, PropertyMap, PropertyOption, SearchRequest, SearchResponse, TokenResponse,
    UpsertInput, UpsertedRecord,
};

const DEFAULT_SCOPES: &[&str] = &[
    "crm.objects.contacts.write",
    "crm.objects.contacts.read",
    "crm.objects.companies.write",
    "crm.objects.companies.read",
    "crm.objects.owners.read",
];

const CONTACT_SEARCH_PROPERTIES: &[&str] =
    &["firstname", "lastname", "email", "lastmodifieddate", "hs_object_id", "hs_linkedin_url"];

/// Provider-side half of the connection lifecycle: authorization URL,
/// code/token exchange, and owner discovery.
#[async_trait]
pub trait OAuthApi: Send + Sync {
    fn authorization_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str) -> Result<TokenPair, HubSpotError>;

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, HubSpotError>;

    /// Best-effort lookup of the portal owner whose email matches. Lookup
    /// failures surface as `Ok(None)`, never as an error.
    async fn find_owner_id(
        &self,
        access_token: &str,
        email: &str,
    ) -> Result<Option<String>, HubSpotError>;
}

/// CRM object operations used by the sync engine. Every call carries the
/// caller's access token; the client itself holds no per-user state.
#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn batch_upsert(
        &self,
        access_token: &str,
        object: CrmObject,
        inputs: Vec<UpsertInput>,
    ) -> Result<Vec<UpsertedRecord>, HubSpotError>;

    async fn associate_contact_to_company(
        &self,
        access_token: &str,
        contact_id: &str,
        company_id: &str,
    ) -> Result<(), HubSpotError>;

    async fn search_contacts_by_linkedin_fragment(
        &self,
        access_token: &str,
        fragment: &str,
    ) -> Result<Vec<ObjectRecord>, HubSpotError>;

    async fn update_contact(
        &self,
        access_token: &str,
        contact_id: &str,
        properties: PropertyMap,
    ) -> Result<(), HubSpotError>;

    async fn create_engagement(
        &self,
        access_token: &str,
        object: EngagementObject,
        contact_id: &str,
        properties: PropertyMap,
    ) -> Result<String, HubSpotError>;

    async fn list_engagements_for_contact(
        &self,
        access_token: &str,
        object: EngagementObject,
        contact_id: &str,
        properties: &[&str],
    ) -> Result<Vec<ObjectRecord>, HubSpotError>;

    async fn update_engagement(
        &self,
        access_token: &str,
        object: EngagementObject,
        engagement_id: &str,
        properties: PropertyMap,
    ) -> Result<(), HubSpotError>;

    async fn delete_engagement(
        &self,
        access_token: &str,
        object: EngagementObject,
        engagement_id: &str,
    ) -> Result<(), HubSpotError>;

    async fn list_owners(&self, access_token: &str) -> Result<Vec<OwnerSummary>, HubSpotError>;

    async fn read_property_options(
        &self,
        access_token: &str,
        object_type: &str,
        property: &str,
    ) -> Result<Vec<PropertyOption>, HubSpotError>;
}

pub struct HubSpotClient {
    http: Client,
    config: HubSpotConfig,
}

impl HubSpotClient {
    pub fn new(config: &HubSpotConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self { http, config: config.clone() })
    }

    fn scopes(&self) -> Vec<String> {
        match self.config.scopes.as_deref() {
            Some(raw) => {
                let scopes: Vec<String> = raw
                    .split(|ch: char| ch.is_whitespace() || ch == ',')
                    .filter(|scope| !scope.is_empty())
                    .map(str::to_string)
                    .collect();
                if scopes.is_empty() {
                    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
                } else {
                    scopes
                }
            }
            None => DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn object_url(&self, object: &str, tail: &str) -> String {
        if tail.is_empty() {
            format!("{}/crm/v3/objects/{object}", self.config.api_base_url)
        } else {
            format!("{}/crm/v3/objects/{object}/{tail}", self.config.api_base_url)
        }
    }

    async fn request_token(
        &self,
        params: &[(&str, &str)],
    ) -> Result<TokenPair, HubSpotError> {
        let url = format!("{}/oauth/v1/token", self.config.api_base_url);
        let response = self
            .http
            .post(&url)
            .form(params)
            .send()
            .await
            .map_err(|error| transport("oauth token exchange", error))?;

        let response = check("oauth token exchange", response).await?;
        let token: TokenResponse = decode("oauth token exchange", response).await?;
        if token.access_token.is_empty() {
            return Err(HubSpotError::Upstream(
                "token endpoint returned empty access token".to_string(),
            ));
        }

        Ok(TokenPair {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in_secs: token.expires_in,
        })
    }
}

#[async_trait]
impl OAuthApi for HubSpotClient {
    fn authorization_url(&self, state: &str) -> String {
        let scope = self.scopes().join(" ");
        format!(
            "{authorize}?client_id={client_id}&redirect_uri={redirect_uri}&scope={scope}&state={state}",
            authorize = self.config.authorize_url,
            client_id = self.config.client_id,
            redirect_uri = encode_query(&self.config.redirect_uri),
            scope = encode_query(&scope),
            state = encode_query(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenPair, HubSpotError> {
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("client_id", &self.config.client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("redirect_uri", &self.config.redirect_uri),
            ("code", code),
        ])
        .await
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, HubSpotError> {
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.config.client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn find_owner_id(
        &self,
        access_token: &str,
        email: &str,
    ) -> Result<Option<String>, HubSpotError> {
        let owners = match self.list_owners(access_token).await {
            Ok(owners) => owners,
            Err(error) => {
                warn!(error = %error, "owner lookup failed, continuing without owner");
                return Ok(None);
            }
        };

        Ok(owners
            .into_iter()
            .find(|owner| {
                owner.email.as_deref().is_some_and(|candidate| candidate.eq_ignore_ascii_case(email))
            })
            .map(|owner| owner.id))
    }
}

#[async_trait]
impl CrmApi for HubSpotClient {
    async fn batch_upsert(
        &self,
        access_token: &str,
        object: CrmObject,
        inputs: Vec<UpsertInput>,
    ) -> Result<Vec<UpsertedRecord>, HubSpotError> {
        let context = match object {
            CrmObject::Contacts => "contact upsert",
            CrmObject::Companies => "company upsert",
        };
        let url = self.object_url(object.path(), "batch/upsert");
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&BatchUpsertRequest { inputs })
            .send()
            .await
            .map_err(|error| transport(context, error))?;

        let response = check(context, response).await?;
        let body: BatchUpsertResponse = decode(context, response).await?;
        Ok(body.results)
    }

    async fn associate_contact_to_company(
        &self,
        access_token: &str,
        contact_id: &str,
        company_id: &str,
    ) -> Result<(), HubSpotError> {
        let context = "contact-company association";
        let url = format!(
            "{}/crm/v3/associations/contacts/companies/batch/create",
            self.config.api_base_url
        );
        let payload = AssociationBatchRequest {
            inputs: vec![AssociationInput {
                from: ObjectRef { id: contact_id.to_string() },
                to: ObjectRef { id: company_id.to_string() },
                association_type: "contact_to_company".to_string(),
            }],
        };
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|error| transport(context, error))?;

        check(context, response).await?;
        Ok(())
    }

    async fn search_contacts_by_linkedin_fragment(
        &self,
        access_token: &str,
        fragment: &str,
    ) -> Result<Vec<ObjectRecord>, HubSpotError> {
        let context = "contact search";
        let url = self.object_url("contacts", "search");
        let payload = SearchRequest {
            filter_groups: vec![FilterGroup {
                filters: vec![Filter {
                    property_name: "hs_linkedin_url".to_string(),
                    operator: "CONTAINS_TOKEN".to_string(),
                    value: fragment.to_string(),
                }],
            }],
            properties: CONTACT_SEARCH_PROPERTIES.iter().map(|p| p.to_string()).collect(),
        };
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|error| transport(context, error))?;

        let response = check(context, response).await?;
        let body: SearchResponse = decode(context, response).await?;
        Ok(body.results)
    }

    async fn update_contact(
        &self,
        access_token: &str,
        contact_id: &str,
        properties: PropertyMap,
    ) -> Result<(), HubSpotError> {
        let context = "contact update";
        let url = self.object_url("contacts", contact_id);
        let response = self
            .http
            .patch(&url)
            .bearer_auth(access_token)
            .json(&PropertiesBody { properties })
            .send()
            .await
            .map_err(|error| transport(context, error))?;

        check(context, response).await?;
        Ok(())
    }

    async fn create_engagement(
        &self,
        access_token: &str,
        object: EngagementObject,
        contact_id: &str,
        properties: PropertyMap,
    ) -> Result<String, HubSpotError> {
        let context = match object {
            EngagementObject::Notes => "note create",
            EngagementObject::Tasks => "task create",
        };
        let url = self.object_url(object.path(), "");
        let payload = EngagementCreateRequest {
            properties,
            associations: vec![EngagementAssociation {
                to: ObjectRef { id: contact_id.to_string() },
                types: vec![AssociationTypeSpec {
                    association_category: "HUBSPOT_DEFINED",
                    association_type_id: object.contact_association_type_id(),
                }],
            }],
        };
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|error| transport(context, error))?;

        let response = check(context, response).await?;
        let created: CreatedObject = decode(context, response).await?;
        Ok(created.id)
    }

    async fn list_engagements_for_contact(
        &self,
        access_token: &str,
        object: EngagementObject,
        contact_id: &str,
        properties: &[&str],
    ) -> Result<Vec<ObjectRecord>, HubSpotError> {
        let context = match object {
            EngagementObject::Notes => "note list",
            EngagementObject::Tasks => "task list",
        };
        let associations_url = format!(
            "{}/crm/v4/objects/contacts/{contact_id}/associations/{}",
            self.config.api_base_url,
            object.path(),
        );
        let response = self
            .http
            .get(&associations_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| transport(context, error))?;

        let response = check(context, response).await?;
        let edges: AssociationListResponse = decode(context, response).await?;
        if edges.results.is_empty() {
            return Ok(Vec::new());
        }

        let read_url = self.object_url(object.path(), "batch/read");
        let payload = BatchReadRequest {
            properties: properties.iter().map(|p| p.to_string()).collect(),
            inputs: edges
                .results
                .into_iter()
                .map(|edge| ObjectIdInput { id: edge.to_object_id.to_string() })
                .collect(),
        };
        let response = self
            .http
            .post(&read_url)
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|error| transport(context, error))?;

        let response = check(context, response).await?;
        let body: BatchReadResponse = decode(context, response).await?;
        Ok(body.results)
    }

    async fn update_engagement(
        &self,
        access_token: &str,
        object: EngagementObject,
        engagement_id: &str,
        properties: PropertyMap,
    ) -> Result<(), HubSpotError> {
        let context = match object {
            EngagementObject::Notes => "note update",
            EngagementObject::Tasks => "task update",
        };
        let url = self.object_url(object.path(), engagement_id);
        let response = self
            .http
            .patch(&url)
            .bearer_auth(access_token)
            .json(&PropertiesBody { properties })
            .send()
            .await
            .map_err(|error| transport(context, error))?;

        check(context, response).await?;
        Ok(())
    }

    async fn delete_engagement(
        &self,
        access_token: &str,
        object: EngagementObject,
        engagement_id: &str,
    ) -> Result<(), HubSpotError> {
        let context = match object {
            EngagementObject::Notes => "note delete",
            EngagementObject::Tasks => "task delete",
        };
        let url = self.object_url(object.path(), engagement_id);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| transport(context, error))?;

        check(context, response).await?;
        Ok(())
    }

    async fn list_owners(&self, access_token: &str) -> Result<Vec<OwnerSummary>, HubSpotError> {
        let context = "owner list";
        let url = format!("{}/crm/v3/owners?limit=100", self.config.api_base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| transport(context, error))?;

        let response = check(context, response).await?;
        let page: OwnersPage = decode(context, response).await?;
        Ok(page.results)
    }

    async fn read_property_options(
        &self,
        access_token: &str,
        object_type: &str,
        property: &str,
    ) -> Result<Vec<PropertyOption>, HubSpotError> {
        let context = "property read";
        let url =
            format!("{}/crm/v3/properties/{object_type}/{property}", self.config.api_base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| transport(context, error))?;

        let response = check(context, response).await?;
        let definition: PropertyDefinition = decode(context, response).await?;
        Ok(definition.options.into_iter().filter(|option| !option.hidden).collect())
    }
}

async fn check(context: &'static str, response: Response) -> Result<Response, HubSpotError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::BAD_REQUEST => HubSpotError::Validation(extract_message(&body)),
        StatusCode::UNAUTHORIZED => HubSpotError::Authentication,
        StatusCode::FORBIDDEN => HubSpotError::Permission,
        StatusCode::NOT_FOUND => HubSpotError::NotFound(context.to_string()),
        _ => HubSpotError::Upstream(format!("{context} returned {status}")),
    })
}

async fn decode<T: serde::de::DeserializeOwned>(
    context: &'static str,
    response: Response,
) -> Result<T, HubSpotError> {
    response
        .json::<T>()
        .await
        .map_err(|error| HubSpotError::Upstream(format!("failed to decode {context} response: {error}")))
}

fn transport(context: &'static str, error: reqwest::Error) -> HubSpotError {
    HubSpotError::Upstream(format!("{context} request failed: {error}"))
}

fn extract_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

fn encode_query(value: &str) -> String {
    value.replace('+', "%2B").replace(' ', "%20").replace('/', "%2F").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use leadsync_core::config::HubSpotConfig;

    use super::{encode_query, extract_message, HubSpotClient, OAuthApi};
    use crate::types::BatchReadResponse;

    fn test_config() -> HubSpotConfig {
        HubSpotConfig {
            client_id: "client-id".to_string(),
            client_secret: String::from("client-secret").into(),
            redirect_uri: "https://app.example.com/callback".to_string(),
            scopes: None,
            api_base_url: "https://api.hubapi.com".to_string(),
            authorize_url: "https://app.hubspot.com/oauth/authorize".to_string(),
            timeout_secs: 20,
        }
    }

    #[test]
    fn authorization_url_carries_default_scopes_and_state() {
        let client = HubSpotClient::new(&test_config()).expect("build client");
        let url = client.authorization_url("state-123");

        assert!(url.starts_with("https://app.hubspot.com/oauth/authorize?client_id=client-id"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Fcallback"));
        assert!(url.contains("scope=crm.objects.contacts.write%20crm.objects.contacts.read"));
        assert!(url.contains("crm.objects.owners.read"));
        assert!(url.ends_with("&state=state-123"));
    }

    #[test]
    fn scope_override_accepts_spaces_and_commas() {
        let mut config = test_config();
        config.scopes = Some("crm.objects.contacts.read, crm.objects.deals.read".to_string());
        let client = HubSpotClient::new(&config).expect("build client");
        let url = client.authorization_url("s");

        assert!(url.contains("scope=crm.objects.contacts.read%20crm.objects.deals.read"));
        assert!(!url.contains("companies"));
    }

    #[test]
    fn blank_scope_override_falls_back_to_defaults() {
        let mut config = test_config();
        config.scopes = Some("   ".to_string());
        let client = HubSpotClient::new(&config).expect("build client");

        assert!(client.authorization_url("s").contains("crm.objects.companies.write"));
    }

    #[test]
    fn batch_read_payload_decodes_into_object_records() {
        let body = r#"{
            "results": [
                {
                    "id": "101",
                    "properties": {
                        "hs_note_body": "<b>Call</b>",
                        "hs_createdate": "2026-08-01T00:00:00Z"
                    }
                }
            ]
        }"#;

        let decoded: BatchReadResponse = serde_json::from_str(body).expect("decode");
        assert_eq!(decoded.results[0].id, "101");
        assert_eq!(decoded.results[0].property("hs_note_body"), Some("<b>Call</b>"));
    }

    #[test]
    fn error_message_extraction_prefers_message_field() {
        assert_eq!(
            extract_message(r#"{"status":"error","message":"Property values were not valid"}"#),
            "Property values were not valid",
        );
        assert_eq!(extract_message("plain text"), "plain text");
    }

    #[test]
    fn query_encoding_covers_url_significant_characters() {
        assert_eq!(encode_query("a b/c:d+e"), "a%20b%2Fc%3Ad%2Be");
    }
}
