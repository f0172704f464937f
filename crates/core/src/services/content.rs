//! Subject / category / subcategory tree.

use chrono::Utc;
use medlearn_common::{AppError, AppResult, IdGenerator};
use medlearn_db::{
    entities::{category, subcategory, subject},
    repositories::ContentRepository,
};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubjectInput {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(length(max = 64))]
    pub icon: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryInput {
    pub subject_id: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubcategoryInput {
    pub category_id: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

/// A category as listed for administrators, with its subject's name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryWithSubject {
    #[serde(flatten)]
    pub category: category::Model,
    pub subject_name: Option<String>,
}

#[derive(Clone)]
pub struct ContentService {
    content_repo: ContentRepository,
    id_gen: IdGenerator,
}

impl ContentService {
    #[must_use]
    pub const fn new(content_repo: ContentRepository) -> Self {
        Self {
            content_repo,
            id_gen: IdGenerator::new(),
        }
    }

    pub async fn subjects(&self) -> AppResult<Vec<subject::Model>> {
        self.content_repo.list_subjects().await
    }

    pub async fn categories(&self, subject_id: &str) -> AppResult<Vec<category::Model>> {
        self.content_repo.list_categories(subject_id).await
    }

    /// Every category, grouped by subject name.
    pub async fn all_categories(&self) -> AppResult<Vec<CategoryWithSubject>> {
        Ok(self
            .content_repo
            .list_all_categories()
            .await?
            .into_iter()
            .map(|(category, subject)| CategoryWithSubject {
                category,
                subject_name: subject.map(|s| s.name),
            })
            .collect())
    }

    pub async fn subcategories(&self, category_id: &str) -> AppResult<Vec<subcategory::Model>> {
        self.content_repo.list_subcategories(category_id).await
    }

    /// Create a subject. Names are unique ignoring case.
    pub async fn create_subject(&self, input: CreateSubjectInput) -> AppResult<subject::Model> {
        input.validate()?;
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("Subject name is required".to_string()));
        }

        if self.content_repo.subject_name_taken(&name).await? {
            return Err(AppError::BadRequest(format!(
                "Subject '{name}' already exists"
            )));
        }

        let subject = self
            .content_repo
            .create_subject(subject::ActiveModel {
                id: Set(self.id_gen.generate()),
                name: Set(name),
                description: Set(non_blank(input.description)),
                icon: Set(non_blank(input.icon)),
                is_active: Set(true),
                created_at: Set(Utc::now().into()),
            })
            .await?;

        info!(subject_id = %subject.id, name = %subject.name, "Subject created");
        Ok(subject)
    }

    pub async fn create_category(&self, input: CreateCategoryInput) -> AppResult<category::Model> {
        input.validate()?;
        if self.content_repo.find_subject(&input.subject_id).await?.is_none() {
            return Err(AppError::BadRequest("Subject not found".to_string()));
        }

        self.content_repo
            .create_category(category::ActiveModel {
                id: Set(self.id_gen.generate()),
                subject_id: Set(input.subject_id),
                name: Set(input.name.trim().to_string()),
                description: Set(non_blank(input.description)),
                is_active: Set(true),
                created_at: Set(Utc::now().into()),
            })
            .await
    }

    pub async fn create_subcategory(
        &self,
        input: CreateSubcategoryInput,
    ) -> AppResult<subcategory::Model> {
        input.validate()?;
        if self.content_repo.find_category(&input.category_id).await?.is_none() {
            return Err(AppError::BadRequest("Category not found".to_string()));
        }

        self.content_repo
            .create_subcategory(subcategory::ActiveModel {
                id: Set(self.id_gen.generate()),
                category_id: Set(input.category_id),
                name: Set(input.name.trim().to_string()),
                description: Set(non_blank(input.description)),
                is_active: Set(true),
                created_at: Set(Utc::now().into()),
            })
            .await
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use medlearn_db::test_utils::fixtures;
    use sea_orm::{DatabaseBackend, MockDatabase, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn count_row(n: i64) -> BTreeMap<String, Value> {
        BTreeMap::from([("num_items".to_string(), Value::BigInt(Some(n)))])
    }

    #[tokio::test]
    async fn test_duplicate_subject_name_rejected() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[count_row(1)]])
            .into_connection();
        let service = ContentService::new(ContentRepository::new(Arc::new(db)));

        let result = service
            .create_subject(CreateSubjectInput {
                name: "  anatomy ".to_string(),
                description: None,
                icon: None,
            })
            .await;

        match result {
            Err(AppError::BadRequest(msg)) => assert!(msg.contains("anatomy")),
            other => panic!("Expected BadRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_subject() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[count_row(0)]])
            .append_query_results([[fixtures::subject("s1", "Anatomy")]])
            .into_connection();
        let service = ContentService::new(ContentRepository::new(Arc::new(db)));

        let subject = service
            .create_subject(CreateSubjectInput {
                name: "Anatomy".to_string(),
                description: Some("  ".to_string()),
                icon: None,
            })
            .await
            .unwrap();
        assert_eq!(subject.name, "Anatomy");
    }

    #[tokio::test]
    async fn test_category_requires_subject() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<subject::Model>::new()])
            .into_connection();
        let service = ContentService::new(ContentRepository::new(Arc::new(db)));

        let result = service
            .create_category(CreateCategoryInput {
                subject_id: "missing".to_string(),
                name: "Bones".to_string(),
                description: None,
            })
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_all_categories_carry_subject_name() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[(
                fixtures::category("c1", "s1", "Bones"),
                fixtures::subject("s1", "Anatomy"),
            )]])
            .into_connection();
        let service = ContentService::new(ContentRepository::new(Arc::new(db)));

        let categories = service.all_categories().await.unwrap();
        let json = serde_json::to_value(&categories).unwrap();
        assert_eq!(json[0]["name"], "Bones");
        assert_eq!(json[0]["subjectName"], "Anatomy");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some(" x ".to_string())), Some("x".to_string()));
        assert_eq!(non_blank(Some("   ".to_string())), None);
        assert_eq!(non_blank(None), None);
    }
}
