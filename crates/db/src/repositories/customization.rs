use chrono::{DateTime, Utc};
use sqlx::Row;

use agora_core::domain::customization::{Customization, CustomizationId};
use agora_core::domain::overrides::{
    ExpertiseFocus, InteractionMode, Language, OverrideSet, ResponseStyle,
};
use agora_core::domain::template::{ModelId, TemplateId, UserId};

use super::{CustomizationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCustomizationRepository {
    pool: DbPool,
}

impl SqlCustomizationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_enum<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, RepositoryError> {
    value
        .parse::<T>()
        .map_err(|_| RepositoryError::Decode(format!("unknown {field} `{value}`")))
}

fn row_to_customization(row: &sqlx::sqlite::SqliteRow) -> Result<Customization, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let user_id: String = row.try_get("user_id").map_err(decode)?;
    let template_id: String = row.try_get("template_id").map_err(decode)?;
    let display_name: Option<String> = row.try_get("display_name").map_err(decode)?;
    let instruction_override: Option<String> =
        row.try_get("instruction_override").map_err(decode)?;
    let model: String = row.try_get("model").map_err(decode)?;
    let style: String = row.try_get("style").map_err(decode)?;
    let focus: String = row.try_get("focus").map_err(decode)?;
    let mode: String = row.try_get("mode").map_err(decode)?;
    let language: String = row.try_get("language").map_err(decode)?;
    let api_key_digest: String = row.try_get("api_key_digest").map_err(decode)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode)?;

    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("bad timestamp: {e}")))?;

    Ok(Customization {
        id: CustomizationId(id),
        user_id: UserId(user_id),
        template_id: TemplateId(template_id),
        display_name,
        instruction_override,
        model: ModelId(model),
        overrides: OverrideSet {
            style: parse_enum::<ResponseStyle>("style", &style)?,
            focus: parse_enum::<ExpertiseFocus>("focus", &focus)?,
            mode: parse_enum::<InteractionMode>("mode", &mode)?,
            language: parse_enum::<Language>("language", &language)?,
        },
        api_key_digest,
        created_at,
    })
}

const CUSTOMIZATION_COLUMNS: &str = "id, user_id, template_id, display_name, instruction_override,
       model, style, focus, mode, language, api_key_digest, created_at";

#[async_trait::async_trait]
impl CustomizationRepository for SqlCustomizationRepository {
    async fn find_by_id(
        &self,
        id: &CustomizationId,
    ) -> Result<Option<Customization>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CUSTOMIZATION_COLUMNS} FROM customization WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_customization(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_key_digest(
        &self,
        digest: &str,
    ) -> Result<Option<Customization>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CUSTOMIZATION_COLUMNS} FROM customization WHERE api_key_digest = ?"
        ))
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_customization(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, customization: Customization) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customization (id, user_id, template_id, display_name,
                                        instruction_override, model, style, focus, mode,
                                        language, api_key_digest, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 instruction_override = excluded.instruction_override,
                 style = excluded.style,
                 focus = excluded.focus,
                 mode = excluded.mode,
                 language = excluded.language",
        )
        .bind(&customization.id.0)
        .bind(&customization.user_id.0)
        .bind(&customization.template_id.0)
        .bind(&customization.display_name)
        .bind(&customization.instruction_override)
        .bind(&customization.model.0)
        .bind(customization.overrides.style.as_str())
        .bind(customization.overrides.focus.as_str())
        .bind(customization.overrides.mode.as_str())
        .bind(customization.overrides.language.as_str())
        .bind(&customization.api_key_digest)
        .bind(customization.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_key_digest(
        &self,
        id: &CustomizationId,
        digest: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE customization SET api_key_digest = ? WHERE id = ?")
            .bind(digest)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn exists_for(
        &self,
        user_id: &UserId,
        template_id: &TemplateId,
    ) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM customization WHERE user_id = ? AND template_id = ?",
        )
        .bind(&user_id.0)
        .bind(&template_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn count_all(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customization")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }
}
