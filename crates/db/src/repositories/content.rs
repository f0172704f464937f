//! Content tree repository: subjects, categories and subcategories.

use std::sync::Arc;

use crate::entities::{Category, Subcategory, Subject, category, subcategory, subject};
use medlearn_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
    sea_query::{Expr, Func},
};

/// Content tree repository.
#[derive(Clone)]
pub struct ContentRepository {
    db: Arc<DatabaseConnection>,
}

impl ContentRepository {
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Active subjects by name.
    pub async fn list_subjects(&self) -> AppResult<Vec<subject::Model>> {
        Subject::find()
            .filter(subject::Column::IsActive.eq(true))
            .order_by_asc(subject::Column::Name)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn find_subject(&self, id: &str) -> AppResult<Option<subject::Model>> {
        Subject::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Whether a subject with this name exists, ignoring case.
    pub async fn subject_name_taken(&self, name: &str) -> AppResult<bool> {
        let count = Subject::find()
            .filter(
                Expr::expr(Func::lower(Expr::col(subject::Column::Name)))
                    .eq(name.trim().to_lowercase()),
            )
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    pub async fn create_subject(&self, model: subject::ActiveModel) -> AppResult<subject::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Active categories of a subject.
    pub async fn list_categories(&self, subject_id: &str) -> AppResult<Vec<category::Model>> {
        Category::find()
            .filter(category::Column::SubjectId.eq(subject_id))
            .filter(category::Column::IsActive.eq(true))
            .order_by_asc(category::Column::Name)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Every category with its subject, ordered by subject name then category name.
    pub async fn list_all_categories(
        &self,
    ) -> AppResult<Vec<(category::Model, Option<subject::Model>)>> {
        Category::find()
            .find_also_related(Subject)
            .order_by_asc(subject::Column::Name)
            .order_by_asc(category::Column::Name)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn find_category(&self, id: &str) -> AppResult<Option<category::Model>> {
        Category::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn create_category(
        &self,
        model: category::ActiveModel,
    ) -> AppResult<category::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Active subcategories of a category.
    pub async fn list_subcategories(
        &self,
        category_id: &str,
    ) -> AppResult<Vec<subcategory::Model>> {
        Subcategory::find()
            .filter(subcategory::Column::CategoryId.eq(category_id))
            .filter(subcategory::Column::IsActive.eq(true))
            .order_by_asc(subcategory::Column::Name)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn find_subcategory(&self, id: &str) -> AppResult<Option<subcategory::Model>> {
        Subcategory::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    pub async fn create_subcategory(
        &self,
        model: subcategory::ActiveModel,
    ) -> AppResult<subcategory::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Names of the given subjects, keyed by id.
    pub async fn subject_names(
        &self,
        ids: Vec<String>,
    ) -> AppResult<std::collections::HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(std::collections::HashMap::new());
        }
        let subjects = Subject::find()
            .filter(subject::Column::Id.is_in(ids))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(subjects.into_iter().map(|s| (s.id, s.name)).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;
    use sea_orm::{DatabaseBackend, MockDatabase, Value};
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_subject_name_taken() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[BTreeMap::from([(
                    "num_items".to_string(),
                    Value::BigInt(Some(1)),
                )])]])
                .into_connection(),
        );

        let repo = ContentRepository::new(db);
        assert!(repo.subject_name_taken("ANATOMY").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_all_categories_pairs_subjects() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[(
                    fixtures::category("c1", "s1", "Bones"),
                    fixtures::subject("s1", "Anatomy"),
                )]])
                .into_connection(),
        );

        let repo = ContentRepository::new(db);
        let rows = repo.list_all_categories().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0.name, "Bones");
        assert_eq!(rows[0].1.as_ref().map(|s| s.name.as_str()), Some("Anatomy"));
    }

    #[tokio::test]
    async fn test_subject_names_skips_query_for_empty_input() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let repo = ContentRepository::new(db);
        assert!(repo.subject_names(vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subject_names() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[
                    fixtures::subject("s1", "Anatomy"),
                    fixtures::subject("s2", "Biochemistry"),
                ]])
                .into_connection(),
        );

        let repo = ContentRepository::new(db);
        let names = repo
            .subject_names(vec!["s1".to_string(), "s2".to_string()])
            .await
            .unwrap();
        assert_eq!(names.get("s2").map(String::as_str), Some("Biochemistry"));
    }
}
