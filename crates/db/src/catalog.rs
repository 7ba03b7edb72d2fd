//! Catalog store: template listing and the buyer-side lifecycle of
//! customizations (purchase, API-key rotation, key lookup).

use std::sync::Arc;

use uuid::Uuid;

use agora_core::domain::customization::{Customization, CustomizationId};
use agora_core::domain::overrides::OverrideSet;
use agora_core::domain::template::{AgentTemplate, ModelId, TemplateId, UserId};
use agora_core::errors::DispatchError;
use agora_core::keys::{self, IssuedKey};
use agora_core::policy::CallerPlan;

use crate::repositories::{
    CustomizationRepository, RepositoryError, TemplateFilters, TemplateRepository,
};

/// Buyer input for a new customization. A missing `model` selects the
/// template's default.
#[derive(Clone, Debug)]
pub struct NewCustomization {
    pub template_id: TemplateId,
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub instruction_override: Option<String>,
    pub model: Option<ModelId>,
    pub overrides: OverrideSet,
}

/// The outcome of a purchase. `api_key` is the raw key, handed to the
/// buyer exactly once; it is not recoverable afterwards.
#[derive(Clone, Debug)]
pub struct CreatedCustomization {
    pub customization: Customization,
    pub api_key: String,
}

pub struct CatalogStore {
    templates: Arc<dyn TemplateRepository>,
    customizations: Arc<dyn CustomizationRepository>,
}

impl CatalogStore {
    pub fn new(
        templates: Arc<dyn TemplateRepository>,
        customizations: Arc<dyn CustomizationRepository>,
    ) -> Self {
        Self { templates, customizations }
    }

    pub async fn list_templates(
        &self,
        filters: TemplateFilters,
    ) -> Result<Vec<AgentTemplate>, DispatchError> {
        self.templates.list_visible(filters).await.map_err(internal)
    }

    pub async fn template(&self, id: &TemplateId) -> Result<AgentTemplate, DispatchError> {
        self.templates
            .find_by_id(id)
            .await
            .map_err(internal)?
            .ok_or(DispatchError::TemplateUnavailable)
    }

    /// Purchase path. Rejects templates that are not buyer-visible
    /// (pending, rejected, archived, or deactivated), premium tiers for
    /// free-plan callers, and models outside the template's permit list.
    /// Nothing is written on any rejection.
    pub async fn create_customization(
        &self,
        plan: CallerPlan,
        request: NewCustomization,
    ) -> Result<CreatedCustomization, DispatchError> {
        let template = self
            .templates
            .find_by_id(&request.template_id)
            .await
            .map_err(internal)?
            .ok_or(DispatchError::TemplateUnavailable)?;

        if !template.buyer_visible() {
            return Err(DispatchError::TemplateUnavailable);
        }
        if template.tier.requires_paid_plan() && plan == CallerPlan::Free {
            return Err(DispatchError::AuthorizationDenied);
        }

        let model = request.model.unwrap_or_else(|| template.default_model.clone());
        if !template.permits_model(&model) {
            return Err(DispatchError::ModelNotPermitted(model.0));
        }

        let key = keys::issue_key();
        let customization = Customization {
            id: CustomizationId(Uuid::new_v4().to_string()),
            user_id: request.user_id,
            template_id: template.id.clone(),
            display_name: request.display_name,
            instruction_override: request.instruction_override,
            model,
            overrides: request.overrides,
            api_key_digest: key.digest.clone(),
            created_at: chrono::Utc::now(),
        };
        self.customizations.save(customization.clone()).await.map_err(internal)?;

        tracing::info!(
            event_name = "customization_created",
            customization_id = %customization.id.0,
            template_id = %customization.template_id.0,
            "customization created"
        );

        Ok(CreatedCustomization { customization, api_key: key.raw })
    }

    /// Replaces the stored digest with a freshly issued key. The old key
    /// stops resolving immediately. Owner-checked.
    pub async fn rotate_key(
        &self,
        id: &CustomizationId,
        owner: &UserId,
    ) -> Result<IssuedKey, DispatchError> {
        let customization = self
            .customizations
            .find_by_id(id)
            .await
            .map_err(internal)?
            .ok_or(DispatchError::CustomizationNotFound)?;

        if customization.user_id != *owner {
            return Err(DispatchError::CustomizationNotFound);
        }

        let key = keys::issue_key();
        self.customizations.update_key_digest(id, &key.digest).await.map_err(internal)?;

        tracing::info!(
            event_name = "api_key_rotated",
            customization_id = %id.0,
            "api key rotated"
        );

        Ok(key)
    }

    /// Resolves a presented raw key to its customization. The miss reveals
    /// nothing about whether any similar key exists.
    pub async fn lookup_by_api_key(&self, raw: &str) -> Result<Customization, DispatchError> {
        let digest = keys::digest_key(raw);
        self.customizations
            .find_by_key_digest(&digest)
            .await
            .map_err(internal)?
            .ok_or(DispatchError::CustomizationNotFound)
    }
}

fn internal(error: RepositoryError) -> DispatchError {
    tracing::error!(event_name = "catalog_storage_error", error = %error, "storage error");
    DispatchError::Internal
}
