//! Resource library service with premium gating and favorites.

use chrono::Utc;
use medlearn_common::{AppError, AppResult, IdGenerator};
use medlearn_db::{
    entities::{resource, user},
    repositories::{ResourceRepository, TypeCount},
};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::authz::RoleCapabilities;

const TOP_VIEWED: u64 = 5;

/// A resource as shown to one reader.
///
/// `locked` is set when the body was withheld because the resource is
/// premium and the reader is neither premium nor staff.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceView {
    #[serde(flatten)]
    pub resource: resource::Model,
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStats {
    pub total: u64,
    pub by_type: Vec<TypeCountView>,
    pub most_viewed: Vec<ResourceView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCountView {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub count: i64,
}

impl From<TypeCount> for TypeCountView {
    fn from(tc: TypeCount) -> Self {
        Self {
            resource_type: tc.resource_type,
            count: tc.count,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceInput {
    #[validate(length(min = 1, max = 256))]
    pub title: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub content: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub resource_type: String,
    #[validate(url)]
    pub url: Option<String>,
    pub subject_id: Option<String>,
    pub category_id: Option<String>,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default = "default_published")]
    pub is_published: bool,
}

const fn default_published() -> bool {
    true
}

/// Whether `reader` may see the body of premium resources.
fn sees_premium(reader: Option<&user::Model>) -> bool {
    reader.is_some_and(|u| u.is_premium || u.role.is_elevated())
}

fn gate(resource: resource::Model, full_access: bool) -> ResourceView {
    if resource.is_premium && !full_access {
        ResourceView {
            resource: resource::Model {
                content: None,
                url: None,
                ..resource
            },
            locked: true,
        }
    } else {
        ResourceView {
            resource,
            locked: false,
        }
    }
}

fn gate_all(resources: Vec<resource::Model>, reader: Option<&user::Model>) -> Vec<ResourceView> {
    let full_access = sees_premium(reader);
    resources
        .into_iter()
        .map(|r| gate(r, full_access))
        .collect()
}

#[derive(Clone)]
pub struct ResourceService {
    resource_repo: ResourceRepository,
    id_gen: IdGenerator,
}

impl ResourceService {
    #[must_use]
    pub const fn new(resource_repo: ResourceRepository) -> Self {
        Self {
            resource_repo,
            id_gen: IdGenerator::new(),
        }
    }

    pub async fn list(&self, reader: Option<&user::Model>) -> AppResult<Vec<ResourceView>> {
        Ok(gate_all(self.resource_repo.list_published().await?, reader))
    }

    pub async fn by_type(
        &self,
        resource_type: &str,
        reader: &user::Model,
    ) -> AppResult<Vec<ResourceView>> {
        Ok(gate_all(
            self.resource_repo.list_by_type(resource_type).await?,
            Some(reader),
        ))
    }

    pub async fn by_subject(
        &self,
        subject_id: &str,
        reader: &user::Model,
    ) -> AppResult<Vec<ResourceView>> {
        Ok(gate_all(
            self.resource_repo.list_by_subject(subject_id).await?,
            Some(reader),
        ))
    }

    /// Search titles and descriptions. A blank query is a 400.
    pub async fn search(&self, query: &str, reader: &user::Model) -> AppResult<Vec<ResourceView>> {
        if query.trim().is_empty() {
            return Err(AppError::BadRequest("Search query is required".to_string()));
        }
        Ok(gate_all(self.resource_repo.search(query).await?, Some(reader)))
    }

    pub async fn create(&self, input: CreateResourceInput) -> AppResult<resource::Model> {
        input.validate()?;

        let created = self
            .resource_repo
            .create(resource::ActiveModel {
                id: Set(self.id_gen.generate()),
                title: Set(input.title.trim().to_string()),
                description: Set(input.description),
                content: Set(input.content),
                resource_type: Set(input.resource_type.trim().to_lowercase()),
                url: Set(input.url),
                subject_id: Set(input.subject_id),
                category_id: Set(input.category_id),
                is_premium: Set(input.is_premium),
                is_published: Set(input.is_published),
                views_count: Set(0),
                created_at: Set(Utc::now().into()),
                updated_at: Set(None),
            })
            .await?;

        info!(resource_id = %created.id, "Resource created");
        Ok(created)
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.resource_repo.delete(id).await?;
        info!(resource_id = %id, "Resource deleted");
        Ok(())
    }

    pub async fn record_view(&self, id: &str) -> AppResult<()> {
        self.resource_repo.increment_views(id).await
    }

    /// Add a favorite. Adding one twice is not an error.
    pub async fn add_favorite(&self, user_id: &str, resource_id: &str) -> AppResult<bool> {
        if self.resource_repo.find_by_id(resource_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Resource {resource_id}")));
        }
        self.resource_repo
            .add_favorite(self.id_gen.generate(), user_id, resource_id)
            .await
    }

    pub async fn remove_favorite(&self, user_id: &str, resource_id: &str) -> AppResult<bool> {
        self.resource_repo.remove_favorite(user_id, resource_id).await
    }

    pub async fn favorites(&self, reader: &user::Model) -> AppResult<Vec<ResourceView>> {
        Ok(gate_all(
            self.resource_repo.favorites(&reader.id).await?,
            Some(reader),
        ))
    }

    pub async fn is_favorite(&self, user_id: &str, resource_id: &str) -> AppResult<bool> {
        self.resource_repo.is_favorite(user_id, resource_id).await
    }

    pub async fn stats(&self, reader: Option<&user::Model>) -> AppResult<ResourceStats> {
        let total = self.resource_repo.count_published().await?;
        let by_type = self.resource_repo.count_by_type().await?;
        let top = self.resource_repo.most_viewed(TOP_VIEWED).await?;

        Ok(ResourceStats {
            total,
            by_type: by_type.into_iter().map(TypeCountView::from).collect(),
            most_viewed: gate_all(top, reader),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use medlearn_db::{entities::user::Role, test_utils::fixtures};
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::Arc;

    #[test]
    fn test_premium_content_withheld_from_free_student() {
        let student = fixtures::user("u1", "a@example.com");
        let views = gate_all(vec![fixtures::resource("r1", "article", true)], Some(&student));

        assert!(views[0].locked);
        assert!(views[0].resource.content.is_none());
        assert_eq!(views[0].resource.description.as_deref(), Some("Summary"));
    }

    #[test]
    fn test_premium_content_visible_to_premium_and_staff() {
        let premium = user::Model {
            is_premium: true,
            ..fixtures::user("u1", "a@example.com")
        };
        let teacher = fixtures::user_with_role("t1", Role::Teacher);

        for reader in [&premium, &teacher] {
            let views = gate_all(vec![fixtures::resource("r1", "video", true)], Some(reader));
            assert!(!views[0].locked);
            assert_eq!(views[0].resource.content.as_deref(), Some("Full text"));
        }
    }

    #[test]
    fn test_anonymous_reader_gets_free_content() {
        let views = gate_all(
            vec![
                fixtures::resource("r1", "article", false),
                fixtures::resource("r2", "article", true),
            ],
            None,
        );
        assert!(!views[0].locked);
        assert!(views[1].locked);
    }

    #[tokio::test]
    async fn test_blank_search_rejected() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let service = ResourceService::new(ResourceRepository::new(Arc::new(db)));
        let reader = fixtures::user("u1", "a@example.com");

        assert!(matches!(
            service.search("  ", &reader).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_favorite_unknown_resource_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<resource::Model>::new()])
            .into_connection();
        let service = ResourceService::new(ResourceRepository::new(Arc::new(db)));

        assert!(matches!(
            service.add_favorite("u1", "missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_view_serializes_flat() {
        let view = gate(fixtures::resource("r1", "pdf", false), false);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["resourceType"], "pdf");
        assert_eq!(json["locked"], false);
    }
}
