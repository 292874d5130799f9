use async_trait::async_trait;
use sqlx::{Row, postgres::PgRow};

use crate::{
    application::repos::{CategoriesRepo, RepoError},
    cache::Base,
    domain::Category,
};

use super::PostgresRepositories;
use super::seeder::{Scanner, Seeder};
use super::util::{map_sqlx_error, scan_record, sync_cache};

const CATEGORY_BY_RAND_ID: &str = "SELECT uuid, rand_id, created_at, updated_at, category \
     FROM categories WHERE rand_id = $1";

pub fn scan_category(row: &PgRow) -> Result<Category, sqlx::Error> {
    Ok(Category {
        record: scan_record(row, "")?,
        category: row.try_get("category")?,
    })
}

#[derive(Clone)]
pub struct CategoryRepository {
    db: PostgresRepositories,
    categories: Base<Category>,
    seeder: Seeder<Category>,
}

impl CategoryRepository {
    pub fn new(db: PostgresRepositories, categories: Base<Category>) -> Self {
        let seeder = Seeder::new(db.clone(), Scanner::new(scan_category));
        Self {
            db,
            categories,
            seeder,
        }
    }
}

#[async_trait]
impl CategoriesRepo for CategoryRepository {
    async fn create_category(&self, category: &Category) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO categories (uuid, rand_id, created_at, updated_at, category)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(category.record.uuid)
        .bind(&category.record.rand_id)
        .bind(category.record.created_at)
        .bind(category.record.updated_at)
        .bind(&category.category)
        .execute(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;

        sync_cache(self.categories.store(), "category", |batch| {
            self.categories.stage_upsert(batch, category)
        })
        .await;
        Ok(())
    }

    async fn find_category_by_rand_id(
        &self,
        rand_id: &str,
    ) -> Result<Option<Category>, RepoError> {
        let row = sqlx::query(CATEGORY_BY_RAND_ID)
            .bind(rand_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref()
            .map(|row| self.seeder.scanner().scan(row))
            .transpose()
    }

    async fn seed_category(&self, rand_id: &str) -> Result<Option<Category>, RepoError> {
        self.seeder
            .seed_one(&self.categories, CATEGORY_BY_RAND_ID, rand_id)
            .await
    }
}
